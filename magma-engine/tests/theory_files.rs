//! Drives the engine from the shipped SK theory files, the same inputs the
//! binary consumes.

use std::fs;
use std::path::PathBuf;

use magma_engine::{Engine, EngineConfig};

fn theory_file(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.pop();
    path.push("theories");
    path.push(name);
    fs::read_to_string(&path).unwrap_or_else(|err| panic!("reading {path:?}: {err}"))
}

#[test]
fn sk_theory_saturates_deterministically() {
    let mut engine = Engine::new(EngineConfig {
        item_dim: 64,
        ..EngineConfig::default()
    });
    engine
        .declare_signature(&theory_file("sk.signature"))
        .unwrap();
    engine.load_programs(&theory_file("sk.rules")).unwrap();
    engine.seed_nullary_functions().unwrap();
    engine.assume_all(&theory_file("sk.facts")).unwrap();
    engine.grow().unwrap();
    engine.validate().unwrap();

    let sig = engine.signature();
    let carrier = sig.carrier();
    let app = sig.binary_function("APP").unwrap();
    let less = sig.binary_relation("LESS").unwrap();

    // K, S, I survive, plus the irreducible APP K K
    assert_eq!(carrier.item_count(), 4);
    let (k, i, kk) = (1, 3, 4);
    // the K-redex APP (APP K K) K collapsed into K
    assert_eq!(app.find(kk, k), k);
    // identity acts trivially
    for ob in carrier.iter() {
        assert_eq!(app.find(i, ob), ob);
    }
    // reflexivity reached every ob through the sharded cleanup
    for ob in carrier.iter() {
        assert!(less.contains(ob, ob));
    }
}

#[test]
fn sk_language_parses_into_a_sampler() {
    let mut engine = Engine::new(EngineConfig {
        item_dim: 16,
        ..EngineConfig::default()
    });
    engine
        .declare_signature(&theory_file("sk.signature"))
        .unwrap();
    engine.set_language(&theory_file("sk.language")).unwrap();
}
