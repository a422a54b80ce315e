//! The signature: named registry of relations and functions, one namespace
//! per arity, owner of the carrier and every table.
//!
//! Each declaration assigns the table a dense [`Handle`] in declaration
//! order; byte-code operands reference tables by handle, never by name or
//! address.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::event::EventSink;
use crate::{
    BinaryFunction, BinaryRelation, Carrier, Handle, InjectiveFunction, NullaryFunction,
    SymmetricFunction, UnaryRelation,
};

/// The six table arities.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter,
)]
pub enum Arity {
    UnaryRelation,
    BinaryRelation,
    NullaryFunction,
    InjectiveFunction,
    BinaryFunction,
    SymmetricFunction,
}

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("line {lineno}: unknown arity: {name}")]
    UnknownArity { lineno: usize, name: String },
    #[error("line {lineno}: missing symbol name")]
    MissingName { lineno: usize },
    #[error("duplicate symbol: {name}")]
    DuplicateSymbol { name: String },
    #[error("too many {arity} symbols, limit = 256")]
    TooManySymbols { arity: Arity },
}

pub struct Signature {
    carrier: Arc<Carrier>,
    sink: Arc<dyn EventSink>,
    unary_relations: Registry<UnaryRelation>,
    binary_relations: Registry<BinaryRelation>,
    nullary_functions: Registry<NullaryFunction>,
    injective_functions: Registry<InjectiveFunction>,
    binary_functions: Registry<BinaryFunction>,
    symmetric_functions: Registry<SymmetricFunction>,
}

struct Registry<T> {
    tables: Vec<Arc<T>>,
    names: Vec<String>,
    by_name: BTreeMap<String, Handle>,
}

impl<T> Registry<T> {
    fn new() -> Self {
        Self {
            tables: Vec::new(),
            names: Vec::new(),
            by_name: BTreeMap::new(),
        }
    }

    fn declare(
        &mut self,
        name: &str,
        arity: Arity,
        build: impl FnOnce(Handle) -> T,
    ) -> Result<Arc<T>, SignatureError> {
        if self.by_name.contains_key(name) {
            return Err(SignatureError::DuplicateSymbol {
                name: name.to_owned(),
            });
        }
        if self.tables.len() >= 256 {
            return Err(SignatureError::TooManySymbols { arity });
        }
        let handle = self.tables.len() as Handle;
        let table = Arc::new(build(handle));
        self.tables.push(table.clone());
        self.names.push(name.to_owned());
        self.by_name.insert(name.to_owned(), handle);
        Ok(table)
    }

    fn get(&self, name: &str) -> Option<&Arc<T>> {
        self.by_name
            .get(name)
            .map(|&handle| &self.tables[handle as usize])
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &Arc<T>)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.tables.iter())
    }
}

impl Signature {
    pub fn new(carrier: Arc<Carrier>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            carrier,
            sink,
            unary_relations: Registry::new(),
            binary_relations: Registry::new(),
            nullary_functions: Registry::new(),
            injective_functions: Registry::new(),
            binary_functions: Registry::new(),
            symmetric_functions: Registry::new(),
        }
    }

    pub fn carrier(&self) -> &Arc<Carrier> {
        &self.carrier
    }

    /// Declares every symbol listed in a signature file: one `<arity>
    /// <name>` per line, `#` comments and blank lines skipped. Re-declaring
    /// an existing symbol is a no-op so snapshot signatures and theory
    /// signatures can overlap.
    pub fn declare_all(&mut self, source: &str) -> Result<(), SignatureError> {
        for (index, line) in source.lines().enumerate() {
            let lineno = index + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut words = line.split_whitespace();
            let arity_name = words.next().expect("non-empty line has a first word");
            let arity: Arity =
                arity_name
                    .parse()
                    .map_err(|_| SignatureError::UnknownArity {
                        lineno,
                        name: arity_name.to_owned(),
                    })?;
            let name = words
                .next()
                .ok_or(SignatureError::MissingName { lineno })?;
            if self.contains(arity, name) {
                continue;
            }
            self.declare(arity, name)?;
        }
        Ok(())
    }

    pub fn declare(&mut self, arity: Arity, name: &str) -> Result<(), SignatureError> {
        info!(%arity, name, "declaring symbol");
        let carrier = self.carrier.clone();
        let sink = self.sink.clone();
        match arity {
            Arity::UnaryRelation => {
                self.unary_relations.declare(name, arity, |h| {
                    UnaryRelation::new(carrier, h, sink)
                })?;
            }
            Arity::BinaryRelation => {
                self.binary_relations.declare(name, arity, |h| {
                    BinaryRelation::new(carrier, h, sink)
                })?;
            }
            Arity::NullaryFunction => {
                self.nullary_functions.declare(name, arity, |h| {
                    NullaryFunction::new(carrier, h, sink)
                })?;
            }
            Arity::InjectiveFunction => {
                self.injective_functions.declare(name, arity, |h| {
                    InjectiveFunction::new(carrier, h, sink)
                })?;
            }
            Arity::BinaryFunction => {
                self.binary_functions.declare(name, arity, |h| {
                    BinaryFunction::new(carrier, h, sink)
                })?;
            }
            Arity::SymmetricFunction => {
                self.symmetric_functions.declare(name, arity, |h| {
                    SymmetricFunction::new(carrier, h, sink)
                })?;
            }
        }
        Ok(())
    }

    pub fn contains(&self, arity: Arity, name: &str) -> bool {
        match arity {
            Arity::UnaryRelation => self.unary_relations.by_name.contains_key(name),
            Arity::BinaryRelation => self.binary_relations.by_name.contains_key(name),
            Arity::NullaryFunction => self.nullary_functions.by_name.contains_key(name),
            Arity::InjectiveFunction => self.injective_functions.by_name.contains_key(name),
            Arity::BinaryFunction => self.binary_functions.by_name.contains_key(name),
            Arity::SymmetricFunction => self.symmetric_functions.by_name.contains_key(name),
        }
    }

    /// Resolves `(arity, name)` to the handle the byte-code will carry.
    pub fn handle_of(&self, arity: Arity, name: &str) -> Option<Handle> {
        match arity {
            Arity::UnaryRelation => self.unary_relations.by_name.get(name).copied(),
            Arity::BinaryRelation => self.binary_relations.by_name.get(name).copied(),
            Arity::NullaryFunction => self.nullary_functions.by_name.get(name).copied(),
            Arity::InjectiveFunction => self.injective_functions.by_name.get(name).copied(),
            Arity::BinaryFunction => self.binary_functions.by_name.get(name).copied(),
            Arity::SymmetricFunction => self.symmetric_functions.by_name.get(name).copied(),
        }
    }

    pub fn unary_relation(&self, name: &str) -> Option<&Arc<UnaryRelation>> {
        self.unary_relations.get(name)
    }

    pub fn binary_relation(&self, name: &str) -> Option<&Arc<BinaryRelation>> {
        self.binary_relations.get(name)
    }

    pub fn nullary_function(&self, name: &str) -> Option<&Arc<NullaryFunction>> {
        self.nullary_functions.get(name)
    }

    pub fn injective_function(&self, name: &str) -> Option<&Arc<InjectiveFunction>> {
        self.injective_functions.get(name)
    }

    pub fn binary_function(&self, name: &str) -> Option<&Arc<BinaryFunction>> {
        self.binary_functions.get(name)
    }

    pub fn symmetric_function(&self, name: &str) -> Option<&Arc<SymmetricFunction>> {
        self.symmetric_functions.get(name)
    }

    pub fn unary_relations(&self) -> impl Iterator<Item = (&str, &Arc<UnaryRelation>)> {
        self.unary_relations.iter()
    }

    pub fn binary_relations(&self) -> impl Iterator<Item = (&str, &Arc<BinaryRelation>)> {
        self.binary_relations.iter()
    }

    pub fn nullary_functions(&self) -> impl Iterator<Item = (&str, &Arc<NullaryFunction>)> {
        self.nullary_functions.iter()
    }

    pub fn injective_functions(
        &self,
    ) -> impl Iterator<Item = (&str, &Arc<InjectiveFunction>)> {
        self.injective_functions.iter()
    }

    pub fn binary_functions(&self) -> impl Iterator<Item = (&str, &Arc<BinaryFunction>)> {
        self.binary_functions.iter()
    }

    pub fn symmetric_functions(
        &self,
    ) -> impl Iterator<Item = (&str, &Arc<SymmetricFunction>)> {
        self.symmetric_functions.iter()
    }

    pub fn unary_relation_tables(&self) -> &[Arc<UnaryRelation>] {
        &self.unary_relations.tables
    }

    pub fn binary_relation_tables(&self) -> &[Arc<BinaryRelation>] {
        &self.binary_relations.tables
    }

    pub fn nullary_function_tables(&self) -> &[Arc<NullaryFunction>] {
        &self.nullary_functions.tables
    }

    pub fn injective_function_tables(&self) -> &[Arc<InjectiveFunction>] {
        &self.injective_functions.tables
    }

    pub fn binary_function_tables(&self) -> &[Arc<BinaryFunction>] {
        &self.binary_functions.tables
    }

    pub fn symmetric_function_tables(&self) -> &[Arc<SymmetricFunction>] {
        &self.symmetric_functions.tables
    }

    /// The negated spelling of a relation name: `LESS` pairs with `NLESS`.
    pub fn negated(name: &str) -> String {
        match name.strip_prefix('N') {
            Some(stripped) => stripped.to_owned(),
            None => format!("N{name}"),
        }
    }

    /// Checks every positive/negative relation pair for disjointness;
    /// returns the first offending pair as a witness.
    pub fn consistency_witness(&self) -> Option<(String, crate::Ob, crate::Ob)> {
        for (name, pos) in self.binary_relations.iter() {
            let negated = Self::negated(name);
            if name < negated.as_str() {
                if let Some(neg) = self.binary_relation(&negated) {
                    if let Some((lhs, rhs)) = pos.intersection_witness(neg) {
                        return Some((name.to_owned(), lhs, rhs));
                    }
                }
            }
        }
        for (name, pos) in self.unary_relations.iter() {
            let negated = Self::negated(name);
            if name < negated.as_str() {
                if let Some(neg) = self.unary_relation(&negated) {
                    if let Some(ob) = pos.intersection_witness(neg) {
                        return Some((name.to_owned(), ob, 0));
                    }
                }
            }
        }
        None
    }

    /// Validates every table and the carrier; panics on any broken
    /// invariant. Expensive, used at load/dump boundaries and in tests.
    pub fn validate(&self) {
        self.carrier.validate();
        for (_, rel) in self.unary_relations.iter() {
            rel.validate();
        }
        for (_, rel) in self.binary_relations.iter() {
            rel.validate();
        }
        for (_, fun) in self.nullary_functions.iter() {
            fun.validate();
        }
        for (_, fun) in self.injective_functions.iter() {
            fun.validate();
        }
        for (_, fun) in self.binary_functions.iter() {
            fun.validate();
        }
        for (_, fun) in self.symmetric_functions.iter() {
            fun.validate();
        }
        assert!(
            self.consistency_witness().is_none(),
            "positive and negative relations intersect"
        );
    }

    /// Propagates one demotion through every table. Runs inside the strict
    /// critical section, before the dep is removed from the carrier.
    pub fn unsafe_merge(&self, dep: crate::Ob) {
        for (_, rel) in self.unary_relations.iter() {
            rel.unsafe_merge(dep);
        }
        for (_, rel) in self.binary_relations.iter() {
            rel.unsafe_merge(dep);
        }
        for (_, fun) in self.nullary_functions.iter() {
            fun.unsafe_merge(dep);
        }
        for (_, fun) in self.injective_functions.iter() {
            fun.unsafe_merge(dep);
        }
        for (_, fun) in self.binary_functions.iter() {
            fun.unsafe_merge(dep);
        }
        for (_, fun) in self.symmetric_functions.iter() {
            fun.unsafe_merge(dep);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NullSink;

    fn signature() -> Signature {
        let carrier = Arc::new(Carrier::new(8, Arc::new(NullSink)));
        Signature::new(carrier, Arc::new(NullSink))
    }

    #[test]
    fn declaration_file_round_trip() {
        let mut sig = signature();
        sig.declare_all(
            "# combinators\n\
             BinaryRelation LESS\n\
             BinaryRelation NLESS\n\
             NullaryFunction K\n\
             NullaryFunction S\n\
             BinaryFunction APP\n\
             SymmetricFunction JOIN\n",
        )
        .unwrap();
        assert!(sig.binary_relation("LESS").is_some());
        assert!(sig.nullary_function("S").is_some());
        assert_eq!(sig.handle_of(Arity::NullaryFunction, "K"), Some(0));
        assert_eq!(sig.handle_of(Arity::NullaryFunction, "S"), Some(1));
        assert_eq!(sig.handle_of(Arity::BinaryFunction, "APP"), Some(0));
        assert!(sig.handle_of(Arity::BinaryFunction, "JOIN").is_none());
    }

    #[test]
    fn duplicate_declaration_is_rejected() {
        let mut sig = signature();
        sig.declare(Arity::NullaryFunction, "K").unwrap();
        assert!(matches!(
            sig.declare(Arity::NullaryFunction, "K"),
            Err(SignatureError::DuplicateSymbol { .. })
        ));
    }

    #[test]
    fn negation_pairs_by_spelling() {
        assert_eq!(Signature::negated("LESS"), "NLESS");
        assert_eq!(Signature::negated("NLESS"), "LESS");
    }

    #[test]
    fn consistency_witness_finds_overlap() {
        let mut sig = signature();
        sig.declare_all("BinaryRelation LESS\nBinaryRelation NLESS\n")
            .unwrap();
        for _ in 0..3 {
            sig.carrier().try_insert();
        }
        sig.binary_relation("LESS").unwrap().raw_insert(1, 2);
        assert!(sig.consistency_witness().is_none());
        sig.binary_relation("NLESS").unwrap().raw_insert(1, 2);
        assert_eq!(
            sig.consistency_witness(),
            Some(("LESS".to_owned(), 1, 2))
        );
    }
}
