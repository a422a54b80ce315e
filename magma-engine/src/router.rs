//! Least-cost spellings of obs, used for diagnostics and language-weight
//! fitting.
//!
//! Symbol costs are negative log weights; ob costs relax over the defining
//! entries of every function until they stabilize, and routes read back
//! the cheapest derivation in prefix notation.

use std::collections::HashMap;

use tracing::debug;

use magma_core::{Ob, Signature};

#[derive(Clone, Copy, PartialEq, Eq)]
enum SegmentKind {
    Nullary,
    Injective,
    Binary,
}

struct Segment {
    kind: SegmentKind,
    name_index: usize,
    val: Ob,
    arg1: Ob,
    arg2: Ob,
}

pub struct Router {
    item_dim: usize,
    names: Vec<String>,
    costs_of_names: Vec<f32>,
    segments: Vec<Segment>,
}

impl Router {
    pub fn new(signature: &Signature, language: &HashMap<String, f32>) -> Self {
        let carrier = signature.carrier();
        let mut names = Vec::new();
        let mut costs_of_names = Vec::new();
        let mut segments = Vec::new();

        let mut symbol = |name: &str| -> Option<usize> {
            let weight = *language.get(name)?;
            if weight <= 0.0 {
                return None;
            }
            names.push(name.to_owned());
            costs_of_names.push(-weight.ln());
            Some(names.len() - 1)
        };

        for (name, fun) in signature.nullary_functions() {
            let Some(name_index) = symbol(name) else { continue };
            let val = fun.find();
            if val != 0 {
                segments.push(Segment {
                    kind: SegmentKind::Nullary,
                    name_index,
                    val,
                    arg1: 0,
                    arg2: 0,
                });
            }
        }
        for (name, fun) in signature.injective_functions() {
            let Some(name_index) = symbol(name) else { continue };
            for key in fun.iter() {
                segments.push(Segment {
                    kind: SegmentKind::Injective,
                    name_index,
                    val: fun.find(key),
                    arg1: key,
                    arg2: 0,
                });
            }
        }
        for (name, fun) in signature.binary_functions() {
            let Some(name_index) = symbol(name) else { continue };
            for lhs in carrier.iter() {
                for rhs in fun.iter_lhs(lhs) {
                    segments.push(Segment {
                        kind: SegmentKind::Binary,
                        name_index,
                        val: fun.find(lhs, rhs),
                        arg1: lhs,
                        arg2: rhs,
                    });
                }
            }
        }
        for (name, fun) in signature.symmetric_functions() {
            let Some(name_index) = symbol(name) else { continue };
            for lhs in carrier.iter() {
                for rhs in fun.iter_lhs(lhs) {
                    if rhs < lhs {
                        continue;
                    }
                    segments.push(Segment {
                        kind: SegmentKind::Binary,
                        name_index,
                        val: fun.find(lhs, rhs),
                        arg1: lhs,
                        arg2: rhs,
                    });
                }
            }
        }

        Self {
            item_dim: carrier.item_dim(),
            names,
            costs_of_names,
            segments,
        }
    }

    fn segment_cost(&self, segment: &Segment, costs: &[f32]) -> f32 {
        let base = self.costs_of_names[segment.name_index];
        match segment.kind {
            SegmentKind::Nullary => base,
            SegmentKind::Injective => base + costs[segment.arg1 as usize],
            SegmentKind::Binary => {
                base + costs[segment.arg1 as usize] + costs[segment.arg2 as usize]
            }
        }
    }

    /// Relaxes ob costs until no segment improves its value.
    pub fn measure_costs(&self) -> Vec<f32> {
        let mut costs = vec![f32::INFINITY; 1 + self.item_dim];
        loop {
            let mut changed = false;
            for segment in &self.segments {
                let cost = self.segment_cost(segment, &costs);
                if cost + 1e-6 < costs[segment.val as usize] {
                    costs[segment.val as usize] = cost;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        costs
    }

    /// Cheapest spelling of every reachable ob, in prefix notation.
    pub fn find_routes(&self) -> Vec<Option<String>> {
        let costs = self.measure_costs();
        let mut routes: Vec<Option<String>> = vec![None; 1 + self.item_dim];
        let mut order: Vec<Ob> = (1..=self.item_dim as Ob)
            .filter(|&ob| costs[ob as usize].is_finite())
            .collect();
        order.sort_by(|&a, &b| {
            costs[a as usize]
                .partial_cmp(&costs[b as usize])
                .expect("finite costs")
        });

        for ob in order {
            let mut best: Option<(f32, String)> = None;
            for segment in self.segments.iter().filter(|s| s.val == ob) {
                let spelled = match segment.kind {
                    SegmentKind::Nullary => Some(self.names[segment.name_index].clone()),
                    SegmentKind::Injective => routes[segment.arg1 as usize]
                        .as_ref()
                        .map(|arg| format!("{} {}", self.names[segment.name_index], arg)),
                    SegmentKind::Binary => routes[segment.arg1 as usize]
                        .as_ref()
                        .zip(routes[segment.arg2 as usize].as_ref())
                        .map(|(lhs, rhs)| {
                            format!("{} {} {}", self.names[segment.name_index], lhs, rhs)
                        }),
                };
                let Some(spelled) = spelled else { continue };
                let cost = self.segment_cost(segment, &costs);
                if best.as_ref().map_or(true, |(c, _)| cost < *c) {
                    best = Some((cost, spelled));
                }
            }
            debug!(ob, route = best.as_ref().map(|(_, r)| r.as_str()), "routed");
            routes[ob as usize] = best.map(|(_, route)| route);
        }
        routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magma_core::{Arity, Carrier, NullSink};
    use std::sync::Arc;

    #[test]
    fn routes_spell_cheapest_derivations() {
        let carrier = Arc::new(Carrier::new(8, Arc::new(NullSink)));
        let mut sig = Signature::new(carrier, Arc::new(NullSink));
        sig.declare(Arity::NullaryFunction, "K").unwrap();
        sig.declare(Arity::BinaryFunction, "APP").unwrap();
        let k = sig.carrier().try_insert().unwrap();
        let kk = sig.carrier().try_insert().unwrap();
        sig.nullary_function("K").unwrap().insert(k);
        sig.binary_function("APP").unwrap().insert(k, k, kk);

        let language = HashMap::from([("K".to_owned(), 0.5), ("APP".to_owned(), 0.5)]);
        let router = Router::new(&sig, &language);
        let routes = router.find_routes();
        assert_eq!(routes[k as usize].as_deref(), Some("K"));
        assert_eq!(routes[kk as usize].as_deref(), Some("APP K K"));
        assert_eq!(routes[3], None);
    }
}
