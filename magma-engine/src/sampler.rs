//! Random-expression insertion.
//!
//! The sampler draws a symbol from the weighted signature distribution and
//! recursively fills its argument slots; each draw either finds the
//! resulting tuple already in the structure or, if space remains, inserts
//! a fresh ob and records the defining equation.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, warn};

use magma_core::{
    BinaryFunction, Carrier, InjectiveFunction, NullaryFunction, Ob, Signature,
    SymmetricFunction,
};

use crate::error::{EngineError, Result};

enum Draw {
    /// The drawn expression already names this ob.
    Found(Ob),
    /// A fresh ob was inserted with its defining equation.
    Inserted(Ob),
    /// The draw hit an undefined constant or a full carrier.
    Nothing,
}

pub struct Sampler {
    carrier: Arc<Carrier>,
    nullary: Weighted<NullaryFunction>,
    injective: Weighted<InjectiveFunction>,
    binary: Weighted<BinaryFunction>,
    symmetric: Weighted<SymmetricFunction>,
}

struct Weighted<T> {
    entries: Vec<(Arc<T>, f32)>,
    total: f32,
}

impl<T> Weighted<T> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            total: 0.0,
        }
    }

    fn add(&mut self, table: Arc<T>, weight: f32) {
        self.entries.push((table, weight));
        self.total += weight;
    }

    fn pick(&self, rng: &mut StdRng) -> &T {
        loop {
            let mut r = rng.gen::<f32>() * self.total;
            for (table, weight) in &self.entries {
                r -= weight;
                if r < 0.0 {
                    return table;
                }
            }
            // rounding error occasionally falls through
        }
    }
}

impl Sampler {
    /// Builds a sampler from a language file: one `<weight> <name>` per
    /// line, `#` comments skipped.
    pub fn from_language(signature: &Signature, source: &str) -> Result<Self> {
        let mut sampler = Self {
            carrier: signature.carrier().clone(),
            nullary: Weighted::new(),
            injective: Weighted::new(),
            binary: Weighted::new(),
            symmetric: Weighted::new(),
        };
        for (index, line) in source.lines().enumerate() {
            let lineno = index + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let bad = |reason: String| EngineError::BadLanguage { lineno, reason };
            let mut words = line.split_whitespace();
            let weight: f32 = words
                .next()
                .and_then(|w| w.parse().ok())
                .ok_or_else(|| bad("missing weight".to_owned()))?;
            let name = words
                .next()
                .ok_or_else(|| bad("missing symbol name".to_owned()))?;
            if weight <= 0.0 {
                return Err(bad(format!("non-positive weight for {name}")));
            }
            debug!(name, weight, "language weight");
            if let Some(fun) = signature.nullary_function(name) {
                sampler.nullary.add(fun.clone(), weight);
            } else if let Some(fun) = signature.injective_function(name) {
                sampler.injective.add(fun.clone(), weight);
            } else if let Some(fun) = signature.binary_function(name) {
                sampler.binary.add(fun.clone(), weight);
            } else if let Some(fun) = signature.symmetric_function(name) {
                sampler.symmetric.add(fun.clone(), weight);
            } else {
                return Err(bad(format!("unknown language symbol: {name}")));
            }
        }
        Ok(sampler)
    }

    fn total(&self) -> f32 {
        self.nullary.total + self.injective.total + self.binary.total + self.symmetric.total
    }

    /// Attempts one random insertion; returns whether a fresh ob was born.
    pub fn try_insert_random(&self, rng: &mut StdRng) -> bool {
        if self.total() <= 0.0 {
            return false;
        }
        matches!(self.draw(rng), Draw::Inserted(_))
    }

    fn fresh_entry<F>(&self, insert: F) -> Draw
    where
        F: FnOnce(Ob),
    {
        match self.carrier.try_insert() {
            Some(val) => {
                insert(val);
                Draw::Inserted(val)
            }
            None => Draw::Nothing,
        }
    }

    fn draw(&self, rng: &mut StdRng) -> Draw {
        let mut attempt = 0usize;
        loop {
            let mut r = rng.gen::<f32>() * self.total();

            r -= self.nullary.total;
            if r < 0.0 {
                let fun = self.nullary.pick(rng);
                let val = fun.find();
                return if val != 0 {
                    Draw::Found(self.carrier.find(val))
                } else {
                    Draw::Nothing
                };
            }

            let arg1 = match self.draw(rng) {
                Draw::Found(ob) => ob,
                other => return other,
            };

            r -= self.injective.total;
            if r < 0.0 {
                let fun = self.injective.pick(rng);
                let val = fun.find(arg1);
                return if val != 0 {
                    Draw::Found(self.carrier.find(val))
                } else {
                    self.fresh_entry(|fresh| fun.insert(arg1, fresh))
                };
            }

            let arg2 = match self.draw(rng) {
                Draw::Found(ob) => ob,
                other => return other,
            };

            r -= self.binary.total;
            if r < 0.0 {
                let fun = self.binary.pick(rng);
                let val = fun.find(arg1, arg2);
                return if val != 0 {
                    Draw::Found(self.carrier.find(val))
                } else {
                    self.fresh_entry(|fresh| fun.insert(arg1, arg2, fresh))
                };
            }

            r -= self.symmetric.total;
            if r < 0.0 {
                let fun = self.symmetric.pick(rng);
                let val = fun.find(arg1, arg2);
                return if val != 0 {
                    Draw::Found(self.carrier.find(val))
                } else {
                    self.fresh_entry(|fresh| fun.insert(arg1, arg2, fresh))
                };
            }

            attempt += 1;
            if attempt % 10 == 0 {
                warn!(attempt, "sampler draw keeps falling through");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magma_core::{Arity, NullSink};
    use rand::SeedableRng;

    fn signature(item_dim: usize) -> Signature {
        let carrier = Arc::new(Carrier::new(item_dim, Arc::new(NullSink)));
        let mut sig = Signature::new(carrier, Arc::new(NullSink));
        sig.declare(Arity::NullaryFunction, "K").unwrap();
        sig.declare(Arity::BinaryFunction, "APP").unwrap();
        sig
    }

    #[test]
    fn sampling_fills_the_carrier_and_then_stops() {
        let sig = signature(8);
        sig.carrier().try_insert();
        sig.nullary_function("K").unwrap().insert(1);
        let sampler =
            Sampler::from_language(&sig, "0.6 K\n0.4 APP\n").unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let mut inserted = 0;
        for _ in 0..10_000 {
            if sampler.try_insert_random(&mut rng) {
                inserted += 1;
            }
            if sig.carrier().is_full() {
                break;
            }
        }
        assert_eq!(sig.carrier().item_count(), 8);
        assert_eq!(inserted, 7);
        // every born ob has a defining equation
        sig.validate();
    }

    #[test]
    fn unknown_language_symbol_is_rejected() {
        let sig = signature(8);
        assert!(Sampler::from_language(&sig, "1.0 MISSING\n").is_err());
    }
}
