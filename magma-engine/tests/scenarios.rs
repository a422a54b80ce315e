//! End-to-end scheduler scenarios: event dispatch, merge propagation,
//! consistency enforcement, block-sharded cleanup and saturation.

use magma_engine::{Engine, EngineConfig, EngineError};

fn engine(item_dim: usize, signature: &str, programs: &str) -> Engine {
    let mut engine = Engine::new(EngineConfig {
        item_dim,
        ..EngineConfig::default()
    });
    engine.declare_signature(signature).unwrap();
    engine.load_programs(programs).unwrap();
    engine
}

#[test]
fn nullary_propagation() {
    let engine = engine(
        8,
        "NullaryFunction K\nBinaryFunction APP\n",
        "GIVEN_NULLARY_FUNCTION K k\nINFER_BINARY_FUNCTION APP k k k\n",
    );
    engine.seed_nullary_functions().unwrap();
    engine.grow().unwrap();

    let sig = engine.signature();
    assert_eq!(sig.nullary_function("K").unwrap().find(), 1);
    assert_eq!(sig.binary_function("APP").unwrap().find(1, 1), 1);
    engine.validate().unwrap();
}

#[test]
fn merge_propagation() {
    let engine = engine(8, "BinaryFunction f\n", "");
    let sig = engine.signature();
    let carrier = sig.carrier();
    for _ in 0..3 {
        carrier.try_insert();
    }
    let f = sig.binary_function("f").unwrap();
    f.insert(1, 2, 3);
    f.insert(1, 3, 2);

    assert_eq!(carrier.merge(3, 2), 2);
    assert_eq!(carrier.find(3), 2);

    engine.grow().unwrap();
    assert_eq!(f.find(1, 2), 2);
    assert_eq!(f.find(1, 3), 0);
    assert!(!carrier.contains(3));
    assert_eq!(carrier.item_count(), 2);
    engine.validate().unwrap();
}

#[test]
fn no_merge_across_nless() {
    let engine = engine(8, "BinaryRelation LESS\nBinaryRelation NLESS\n", "");
    let sig = engine.signature();
    let carrier = sig.carrier();
    for _ in 0..2 {
        carrier.try_insert();
    }
    sig.binary_relation("NLESS").unwrap().insert(1, 2);
    carrier.merge(2, 1);

    let err = engine.grow().unwrap_err();
    assert!(matches!(err, EngineError::Inconsistent { lhs: 1, rhs: 2 }));
    assert!(err.is_fatal());
}

#[test]
fn block_cleanup_shards() {
    let engine = engine(
        200,
        "UnaryRelation MARK\n",
        "FOR_BLOCK\nFOR_ALL x\nIF_BLOCK x\nINFER_UNARY_RELATION MARK x\n",
    );
    let sig = engine.signature();
    for _ in 0..10 {
        sig.carrier().try_insert();
    }
    assert_eq!(engine.block_count(), 4);
    assert_eq!(engine.cleanup_task_count(), 4);

    engine.grow().unwrap();
    let mark = sig.unary_relation("MARK").unwrap();
    assert_eq!(mark.count_items(), 10);
    engine.validate().unwrap();
}

#[test]
fn symmetric_idempotence() {
    let engine = engine(
        8,
        "NullaryFunction A\nNullaryFunction B\nSymmetricFunction JOIN\n",
        "",
    );
    engine.seed_nullary_functions().unwrap();
    engine.assume("EQUAL JOIN A B JOIN B A", 1).unwrap();
    engine.grow().unwrap();

    let sig = engine.signature();
    let join = sig.symmetric_function("JOIN").unwrap();
    assert_eq!(sig.carrier().item_count(), 3);
    assert_eq!(join.find(1, 2), 3);
    assert_eq!(join.find(2, 1), 3);
    let mut pairs = join.iter_val(3);
    pairs.sort_unstable();
    assert_eq!(pairs, vec![(1, 2), (2, 1)]);
    engine.validate().unwrap();
}

#[test]
fn saturation_of_a_small_combinatory_theory() {
    let engine = engine(
        128,
        "NullaryFunction K\nNullaryFunction S\nNullaryFunction I\nBinaryFunction APP\n",
        "# identity applies to everything\n\
         FOR_NULLARY_FUNCTION I i\n\
         FOR_ALL x\n\
         INFER_BINARY_FUNCTION APP i x x\n",
    );
    engine.seed_nullary_functions().unwrap();
    engine.assume_all("EQUAL APP K I APP I K\n").unwrap();
    engine.grow().unwrap();

    let sig = engine.signature();
    let app = sig.binary_function("APP").unwrap();
    // APP K I and APP I K collapse into K itself
    assert_eq!(sig.carrier().item_count(), 3);
    assert_eq!(app.find(3, 1), 1);
    assert_eq!(app.find(1, 3), 1);
    assert_eq!(app.find(3, 2), 2);
    assert_eq!(app.find(3, 3), 3);
    assert!(engine.merge_count() >= 2);
    engine.validate().unwrap();

    // growing again from the fixed point changes nothing
    let obs_before = sig.carrier().item_count();
    engine.grow().unwrap();
    assert_eq!(sig.carrier().item_count(), obs_before);
}

#[test]
fn repeated_relation_insert_fires_once() {
    let engine = engine(
        8,
        "UnaryRelation SEEN\nBinaryRelation LESS\nBinaryRelation NLESS\n",
        "GIVEN_BINARY_RELATION LESS x y\nINFER_UNARY_RELATION SEEN x\n",
    );
    let sig = engine.signature();
    for _ in 0..2 {
        sig.carrier().try_insert();
    }
    let less = sig.binary_relation("LESS").unwrap();
    less.insert(1, 2);
    less.insert(1, 2);
    engine.grow().unwrap();
    assert!(sig.unary_relation("SEEN").unwrap().contains(1));
    // bit-level dedup queued the pair exactly once
    assert_eq!(less.count_pairs(), 1);
    engine.validate().unwrap();
}

#[test]
fn sampling_grows_until_full_then_saturates() {
    let mut engine = engine(
        32,
        "NullaryFunction K\nBinaryFunction APP\n",
        "",
    );
    engine.set_language("0.55 K\n0.45 APP\n").unwrap();
    engine.seed_nullary_functions().unwrap();
    engine.grow().unwrap();

    let sig = engine.signature();
    assert_eq!(sig.carrier().item_count(), 32);
    engine.validate().unwrap();
}
