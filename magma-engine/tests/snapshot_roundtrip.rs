//! Snapshot round-trips: load-then-redump is byte-identical, and hash
//! mismatches are rejected.

use std::fs;

use magma_engine::{snapshot, Engine, EngineConfig, EngineError};

const SIGNATURE: &str = "\
UnaryRelation RETURN
BinaryRelation LESS
BinaryRelation NLESS
NullaryFunction K
NullaryFunction S
InjectiveFunction CODE
BinaryFunction APP
SymmetricFunction JOIN
";

fn populated_engine() -> Engine {
    let mut engine = Engine::new(EngineConfig {
        item_dim: 64,
        ..EngineConfig::default()
    });
    engine.declare_signature(SIGNATURE).unwrap();
    let sig = engine.signature();
    let carrier = sig.carrier();
    for _ in 0..6 {
        carrier.try_insert();
    }
    sig.nullary_function("K").unwrap().insert(1);
    sig.nullary_function("S").unwrap().insert(2);
    sig.unary_relation("RETURN").unwrap().insert(3);
    sig.binary_relation("LESS").unwrap().insert(1, 2);
    sig.binary_relation("NLESS").unwrap().insert(2, 1);
    sig.injective_function("CODE").unwrap().insert(1, 4);
    sig.binary_function("APP").unwrap().insert(1, 2, 3);
    sig.binary_function("APP").unwrap().insert(2, 1, 5);
    sig.symmetric_function("JOIN").unwrap().insert(5, 3, 6);
    sig.symmetric_function("JOIN").unwrap().insert(4, 4, 4);
    engine
}

fn temp_path(name: &str) -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("magma-{name}-{}", std::process::id()));
    path
}

#[test]
fn load_then_redump_is_byte_identical() {
    let engine = populated_engine();
    let first = temp_path("first");
    snapshot::dump(engine.signature(), &first).unwrap();

    let mut reloaded = Engine::new(EngineConfig {
        item_dim: 64,
        ..EngineConfig::default()
    });
    reloaded.declare_signature(SIGNATURE).unwrap();
    snapshot::load(reloaded.signature(), &first).unwrap();

    let second = temp_path("second");
    snapshot::dump(reloaded.signature(), &second).unwrap();

    let original = fs::read(&first).unwrap();
    let roundtrip = fs::read(&second).unwrap();
    assert_eq!(original, roundtrip);

    fs::remove_file(first).ok();
    fs::remove_file(second).ok();
}

#[test]
fn loaded_structure_matches_the_dumped_one() {
    let engine = populated_engine();
    let path = temp_path("content");
    snapshot::dump(engine.signature(), &path).unwrap();

    let mut reloaded = Engine::new(EngineConfig {
        item_dim: 64,
        ..EngineConfig::default()
    });
    reloaded.declare_signature(SIGNATURE).unwrap();
    snapshot::load(reloaded.signature(), &path).unwrap();

    let sig = reloaded.signature();
    assert_eq!(sig.carrier().item_count(), 6);
    assert_eq!(sig.nullary_function("S").unwrap().find(), 2);
    assert_eq!(sig.injective_function("CODE").unwrap().inverse_find(4), 1);
    assert_eq!(sig.binary_function("APP").unwrap().find(2, 1), 5);
    assert_eq!(sig.symmetric_function("JOIN").unwrap().find(3, 5), 6);
    assert_eq!(sig.symmetric_function("JOIN").unwrap().find(4, 4), 4);
    assert!(sig.binary_relation("LESS").unwrap().contains(1, 2));

    fs::remove_file(path).ok();
}

#[test]
fn corrupted_payload_is_rejected() {
    let engine = populated_engine();
    let path = temp_path("corrupt");
    snapshot::dump(engine.signature(), &path).unwrap();

    let mut bytes = fs::read(&path).unwrap();
    // first payload byte of the carrier section: magic (8) + tag (1) +
    // name length (2) + "carrier" (7) + payload length (8)
    bytes[26] ^= 0x01;
    fs::write(&path, &bytes).unwrap();

    let mut reloaded = Engine::new(EngineConfig {
        item_dim: 64,
        ..EngineConfig::default()
    });
    reloaded.declare_signature(SIGNATURE).unwrap();
    let err = snapshot::load(reloaded.signature(), &path).unwrap_err();
    assert!(matches!(err, EngineError::CorruptSnapshot { .. }));

    fs::remove_file(path).ok();
}
