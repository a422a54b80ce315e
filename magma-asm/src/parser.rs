//! Rule-program parser: textual listings to byte-code.
//!
//! Programs are separated by blank lines; `#` begins a line comment. Each
//! program gets fresh register scopes; `SEQUENCE n` widens the current
//! scope over the next `float53(n)` operations.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use magma_core::Signature;

use crate::float::float53;
use crate::op::{ArgKind, OpCode};

/// Descriptor of one parsed program inside the combined byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listing {
    pub offset: usize,
    pub len: usize,
    pub lineno: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {lineno}: {reason}")]
pub struct ParseError {
    pub lineno: usize,
    pub reason: ParseErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("unknown operation: {0}")]
    UnknownOpCode(String),
    #[error("too few arguments")]
    TooFewArguments,
    #[error("too many arguments: {0}")]
    TooManyArguments(String),
    #[error("out of range: {0}")]
    LiteralOutOfRange(String),
    #[error("duplicate variable: {0}")]
    DuplicateRegister(String),
    #[error("too many variables, limit = 256")]
    TooManyRegisters,
    #[error("undefined variable: {0}")]
    UndeclaredRegister(String),
    #[error("unknown constant: {0}")]
    UnknownSymbol(String),
    #[error("unused variable: {0}")]
    UnusedSetRegister(String),
    #[error("unterminated SEQUENCE command")]
    UnterminatedSequence,
}

struct SymbolTable {
    registers: HashMap<String, u8>,
    loaded: HashSet<String>,
}

impl SymbolTable {
    fn new() -> Self {
        Self {
            registers: HashMap::new(),
            loaded: HashSet::new(),
        }
    }

    fn store(&mut self, name: &str) -> Result<u8, ParseErrorKind> {
        if self.registers.contains_key(name) {
            return Err(ParseErrorKind::DuplicateRegister(name.to_owned()));
        }
        if self.registers.len() >= 256 {
            return Err(ParseErrorKind::TooManyRegisters);
        }
        let index = self.registers.len() as u8;
        self.registers.insert(name.to_owned(), index);
        Ok(index)
    }

    fn load(&mut self, name: &str) -> Result<u8, ParseErrorKind> {
        let index = *self
            .registers
            .get(name)
            .ok_or_else(|| ParseErrorKind::UndeclaredRegister(name.to_owned()))?;
        self.loaded.insert(name.to_owned());
        Ok(index)
    }

    fn check_unused(&self) -> Result<(), ParseErrorKind> {
        let mut unused: Vec<&String> = self
            .registers
            .keys()
            .filter(|name| !self.loaded.contains(*name))
            .collect();
        unused.sort();
        match unused.first() {
            None => Ok(()),
            Some(name) => Err(ParseErrorKind::UnusedSetRegister((*name).clone())),
        }
    }
}

/// A stack of register scopes, widened by `SEQUENCE` and unwound as the
/// encoded jump distances run out.
struct ScopeStack {
    stack: Vec<SymbolTable>,
    jumps: Vec<usize>,
    warn_unused: bool,
}

impl ScopeStack {
    fn new(warn_unused: bool) -> Self {
        Self {
            stack: vec![SymbolTable::new()],
            jumps: Vec::new(),
            warn_unused,
        }
    }

    fn top(&mut self) -> &mut SymbolTable {
        self.stack.last_mut().expect("scope stack is never empty")
    }

    fn store(&mut self, name: &str) -> Result<u8, ParseErrorKind> {
        self.top().store(name)
    }

    fn load(&mut self, name: &str) -> Result<u8, ParseErrorKind> {
        self.top().load(name)
    }

    /// Resets for the next program; fails if a `SEQUENCE` scope is still
    /// open or a set register went unused.
    fn clear(&mut self) -> Result<(), ParseErrorKind> {
        if !self.jumps.is_empty() || self.stack.len() != 1 {
            return Err(ParseErrorKind::UnterminatedSequence);
        }
        if self.warn_unused {
            self.top().check_unused()?;
        }
        self.stack.clear();
        self.stack.push(SymbolTable::new());
        Ok(())
    }

    fn push(&mut self, jump: u8) {
        let inherited = SymbolTable {
            registers: self.top().registers.clone(),
            loaded: self.top().loaded.clone(),
        };
        self.stack.push(inherited);
        self.jumps.push(float53(jump));
    }

    /// Counts one parsed byte against every open scope, closing those that
    /// ran out.
    fn pop(&mut self) -> Result<(), ParseErrorKind> {
        for jump in &mut self.jumps {
            if *jump == 0 {
                return Err(ParseErrorKind::UnterminatedSequence);
            }
            *jump -= 1;
        }
        if self.jumps.last() == Some(&0) {
            if self.warn_unused {
                self.top().check_unused()?;
            }
            self.stack.pop();
            self.jumps.pop();
        }
        Ok(())
    }
}

/// Parses rule listings against a loaded signature, appending byte-code to
/// one shared buffer remembered per listing for later dispatch and
/// profiling.
pub struct ProgramParser<'s> {
    signature: &'s Signature,
    data: Vec<u8>,
}

impl<'s> ProgramParser<'s> {
    pub fn new(signature: &'s Signature) -> Self {
        Self {
            signature,
            data: Vec::new(),
        }
    }

    /// The combined byte-code buffer.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn find_program(&self, listing: &Listing) -> &[u8] {
        &self.data[listing.offset..listing.offset + listing.len]
    }

    pub fn parse(&mut self, source: &str) -> Result<Vec<Listing>, ParseError> {
        let mut listings = Vec::new();
        let mut program: Vec<u8> = Vec::new();
        let mut obs = ScopeStack::new(false);
        let mut sets = ScopeStack::new(true);
        let mut start_lineno = 0;

        let mut add_program = |program: &mut Vec<u8>, lineno: usize, data: &mut Vec<u8>| {
            let listing = Listing {
                offset: data.len(),
                len: program.len(),
                lineno,
            };
            debug!(?listing, "parsed program");
            listings.push(listing);
            data.append(program);
        };

        for (index, line) in source.lines().enumerate() {
            let lineno = index + 1;
            let fail = |reason| ParseError { lineno, reason };
            if line.starts_with('#') {
                continue;
            }
            if line.trim().is_empty() {
                obs.clear().map_err(fail)?;
                sets.clear().map_err(fail)?;
                if !program.is_empty() {
                    add_program(&mut program, start_lineno, &mut self.data);
                }
                continue;
            }
            if program.is_empty() {
                start_lineno = lineno;
            }

            let mut words = line.split_whitespace();
            let word = words.next().expect("non-blank line has a first word");
            obs.pop().map_err(fail)?;
            sets.pop().map_err(fail)?;
            let op: OpCode = word
                .parse()
                .map_err(|_| fail(ParseErrorKind::UnknownOpCode(word.to_owned())))?;
            program.push(op.as_byte());

            for &kind in op.arg_kinds() {
                let word = words.next().ok_or(fail(ParseErrorKind::TooFewArguments))?;
                let arg = match kind {
                    ArgKind::Uint8 => {
                        let value: i64 = word.parse().unwrap_or(-1);
                        if !(0 < value && value < 255) {
                            return Err(fail(ParseErrorKind::LiteralOutOfRange(
                                word.to_owned(),
                            )));
                        }
                        value as u8
                    }
                    ArgKind::NewOb => obs.store(word).map_err(fail)?,
                    ArgKind::Ob => obs.load(word).map_err(fail)?,
                    ArgKind::NewSet => sets.store(word).map_err(fail)?,
                    ArgKind::Set => sets.load(word).map_err(fail)?,
                    _ => {
                        let arity = kind.arity().expect("constant operand has an arity");
                        self.signature.handle_of(arity, word).ok_or_else(|| {
                            fail(ParseErrorKind::UnknownSymbol(word.to_owned()))
                        })?
                    }
                };
                program.push(arg);
                obs.pop().map_err(fail)?;
                sets.pop().map_err(fail)?;
            }

            if op == OpCode::Sequence {
                let jump = *program.last().expect("sequence op has a jump byte");
                obs.push(jump);
                sets.push(jump);
            }

            if let Some(extra) = words.next() {
                return Err(fail(ParseErrorKind::TooManyArguments(extra.to_owned())));
            }
        }

        if !program.is_empty() {
            let lineno = source.lines().count();
            let fail = |reason| ParseError { lineno, reason };
            obs.clear().map_err(fail)?;
            sets.clear().map_err(fail)?;
            add_program(&mut program, start_lineno, &mut self.data);
        }

        Ok(listings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magma_core::{Carrier, NullSink, Signature};
    use rstest::rstest;
    use std::sync::Arc;

    fn signature() -> Signature {
        let carrier = Arc::new(Carrier::new(16, Arc::new(NullSink)));
        let mut sig = Signature::new(carrier, Arc::new(NullSink));
        sig.declare_all(
            "BinaryRelation LESS\n\
             BinaryRelation NLESS\n\
             NullaryFunction K\n\
             NullaryFunction S\n\
             InjectiveFunction CODE\n\
             BinaryFunction APP\n\
             SymmetricFunction JOIN\n",
        )
        .unwrap();
        sig
    }

    #[test]
    fn parses_a_one_op_program() {
        let sig = signature();
        let mut parser = ProgramParser::new(&sig);
        let listings = parser.parse("FOR_NULLARY_FUNCTION K k\n").unwrap();
        assert_eq!(listings.len(), 1);
        let listing = listings[0];
        assert_eq!(listing.lineno, 1);
        assert_eq!(
            parser.find_program(&listing),
            &[OpCode::ForNullaryFunction.as_byte(), 0, 0]
        );
    }

    #[test]
    fn blank_lines_separate_programs_and_reset_registers() {
        let sig = signature();
        let mut parser = ProgramParser::new(&sig);
        let listings = parser
            .parse(
                "# comment\n\
                 GIVEN_NULLARY_FUNCTION K k\n\
                 INFER_BINARY_FUNCTION APP k k k\n\
                 \n\
                 GIVEN_NULLARY_FUNCTION S s\n\
                 INFER_BINARY_FUNCTION APP s s s\n",
            )
            .unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].lineno, 2);
        assert_eq!(listings[1].lineno, 5);
        // both programs allocate their event register at index 0
        assert_eq!(parser.find_program(&listings[0])[2], 0);
        assert_eq!(parser.find_program(&listings[1])[2], 0);
        // distinct handles for K and S
        assert_eq!(parser.find_program(&listings[0])[1], 0);
        assert_eq!(parser.find_program(&listings[1])[1], 1);
    }

    #[test]
    fn registers_allocate_in_declaration_order() {
        let sig = signature();
        let mut parser = ProgramParser::new(&sig);
        let listings = parser
            .parse(
                "GIVEN_BINARY_FUNCTION APP x y z\n\
                 IF_EQUAL x y\n\
                 INFER_BINARY_RELATION LESS z z\n",
            )
            .unwrap();
        let code = parser.find_program(&listings[0]);
        assert_eq!(
            code,
            &[
                OpCode::GivenBinaryFunction.as_byte(),
                0, // APP
                0, // x
                1, // y
                2, // z
                OpCode::IfEqual.as_byte(),
                0,
                1,
                OpCode::InferBinaryRelation.as_byte(),
                0, // LESS
                2,
                2,
            ]
        );
    }

    #[test]
    fn sequence_scopes_expire_with_their_jump() {
        let sig = signature();
        let mut parser = ProgramParser::new(&sig);
        // the first branch is 6 bytes, so the widened scope ends exactly
        // where the second branch starts
        let listings = parser
            .parse(
                "SEQUENCE 6\n\
                 FOR_NULLARY_FUNCTION K k\n\
                 INFER_NULLARY_FUNCTION S k\n\
                 FOR_NULLARY_FUNCTION S other\n\
                 INFER_NULLARY_FUNCTION K other\n",
            )
            .unwrap();
        assert_eq!(listings.len(), 1);
        let code = parser.find_program(&listings[0]);
        assert_eq!(code.len(), 14);
        assert_eq!(code[4], 0); // k allocates 0 inside the sequence scope
        assert_eq!(code[10], 0); // k expired, so `other` re-allocates 0
    }

    #[test]
    fn register_surviving_past_its_sequence_scope_is_rejected() {
        let sig = signature();
        let mut parser = ProgramParser::new(&sig);
        let err = parser
            .parse(
                "SEQUENCE 6\n\
                 FOR_NULLARY_FUNCTION K k\n\
                 INFER_NULLARY_FUNCTION S k\n\
                 INFER_NULLARY_FUNCTION K k\n",
            )
            .unwrap_err();
        assert_eq!(err.reason, ParseErrorKind::UndeclaredRegister("k".into()));
    }

    #[rstest]
    #[case("FROB_NOTHING x\n", 1)]
    #[case("FOR_NULLARY_FUNCTION K\n", 1)]
    #[case("FOR_NULLARY_FUNCTION MISSING k\n", 1)]
    #[case("GIVEN_NULLARY_FUNCTION K k\nINFER_NULLARY_FUNCTION K k extra\n", 2)]
    #[case("INFER_EQUAL x y\n", 1)]
    #[case("GIVEN_EXISTS x\nGIVEN_EXISTS x\n", 2)]
    #[case("SEQUENCE 0\n", 1)]
    #[case("SEQUENCE 9\nFOR_NULLARY_FUNCTION K k\n", 2)]
    fn rejects_malformed_programs(#[case] source: &str, #[case] lineno: usize) {
        let sig = signature();
        let mut parser = ProgramParser::new(&sig);
        let err = parser.parse(source).unwrap_err();
        assert_eq!(err.lineno, lineno);
    }

    #[test]
    fn unused_set_register_is_rejected() {
        let sig = signature();
        let mut parser = ProgramParser::new(&sig);
        let err = parser
            .parse("GIVEN_EXISTS x\nLETS_BINARY_RELATION_LHS LESS x s\n")
            .unwrap_err();
        assert_eq!(err.reason, ParseErrorKind::UnusedSetRegister("s".into()));
    }

    #[test]
    fn unused_ob_register_is_tolerated() {
        let sig = signature();
        let mut parser = ProgramParser::new(&sig);
        assert!(parser.parse("GIVEN_EXISTS x\n").is_ok());
    }
}
