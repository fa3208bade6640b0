// Reference preservation and string interning: shared instances, cyclic
// graphs, cross-call identity, and writer-side string suppression.

mod support;

use pretty_assertions::assert_eq;
use serializer::{ReferenceMode, Serializer, SerializerOptions};
use shape::{
    ObjectShape, Property, Provider, ProviderBuilder, Record, Scalar, SequenceShape, Shape,
    ShapeId, Value,
};
use std::sync::Arc;

fn node_fixture() -> (Arc<Provider>, ShapeId) {
    let mut b = ProviderBuilder::new();
    let node = b.declare();
    let next = b.add(Shape::optional("Option<Node>", node));
    let str_id = b.add(Shape::scalar("string", Scalar::Str));
    b.define(
        node,
        Shape::object(
            "Node",
            ObjectShape::new(vec![
                Property::new("label", str_id),
                Property::new("next", next),
            ]),
        ),
    )
    .unwrap();
    (b.finish().unwrap(), node)
}

fn preserving() -> Serializer {
    Serializer::new(
        SerializerOptions::default().with_preserve_references(ReferenceMode::PerCall),
    )
}

#[test]
fn test_shared_instance_is_deduplicated() {
    let mut b = ProviderBuilder::new();
    let leaf = b.declare();
    let str_id = b.add(Shape::scalar("string", Scalar::Str));
    b.define(
        leaf,
        Shape::object("Leaf", ObjectShape::new(vec![Property::new("label", str_id)])),
    )
    .unwrap();
    let pair_elems = b.add(Shape::sequence("Vec<Leaf>", SequenceShape::new(leaf)));
    let provider = b.finish().unwrap();

    let engine = preserving();

    let shared = Record::with_slots(leaf, vec![Some(Value::str("shared"))]);
    let value = Value::Sequence(vec![
        Value::Record(shared.clone()),
        Value::Record(shared.clone()),
    ]);

    let payload = engine.serialize(&provider, pair_elems, &value).unwrap();

    // Without preservation both occurrences are written in full.
    let plain = Serializer::default()
        .serialize(&provider, pair_elems, &value)
        .unwrap();
    assert!(payload.len() < plain.len());

    let decoded = engine.deserialize(&provider, pair_elems, &payload).unwrap();
    let Value::Sequence(items) = decoded else {
        panic!("expected a sequence")
    };
    let (Value::Record(first), Value::Record(second)) = (&items[0], &items[1]) else {
        panic!("expected records")
    };
    assert!(Arc::ptr_eq(first, second));
}

#[test]
fn test_cycle_structure_survives_round_trip() {
    let (provider, node) = node_fixture();
    let engine = preserving();

    let a = Record::new(node, 2);
    let b = Record::new(node, 2);
    a.set(0, Value::str("a"));
    b.set(0, Value::str("b"));
    a.set(1, Value::Record(b.clone()));
    b.set(1, Value::Record(a.clone()));

    let payload = engine
        .serialize(&provider, node, &Value::Record(a.clone()))
        .unwrap();
    let decoded = engine.deserialize(&provider, node, &payload).unwrap();

    let Value::Record(out_a) = decoded else {
        panic!("expected a record")
    };
    let Some(Value::Record(out_b)) = out_a.get(1) else {
        panic!("expected a.next")
    };
    let Some(Value::Record(back)) = out_b.get(1) else {
        panic!("expected b.next")
    };

    assert_eq!(out_a.get(0), Some(Value::str("a")));
    assert_eq!(out_b.get(0), Some(Value::str("b")));
    assert!(Arc::ptr_eq(&out_a, &back));
    assert!(!Arc::ptr_eq(&out_a, &out_b));
}

#[test]
fn test_cross_call_reference_mode() {
    let (provider, node) = node_fixture();
    let engine = Serializer::new(
        SerializerOptions::default().with_preserve_references(ReferenceMode::CrossCall),
    );

    let a = Record::with_slots(node, vec![Some(Value::str("a")), Some(Value::Nil)]);

    let first = engine
        .serialize(&provider, node, &Value::Record(a.clone()))
        .unwrap();
    // The second call sees the identity recorded by the first and emits
    // only a reference token.
    let second = engine
        .serialize(&provider, node, &Value::Record(a.clone()))
        .unwrap();
    assert!(second.len() < first.len());
    assert_eq!(second[0], 0xd4);

    let out_first = engine.deserialize(&provider, node, &first).unwrap();
    let out_second = engine.deserialize(&provider, node, &second).unwrap();
    let (Value::Record(out_first), Value::Record(out_second)) = (&out_first, &out_second) else {
        panic!("expected records")
    };
    assert!(Arc::ptr_eq(out_first, out_second));
}

#[test]
fn test_interning_shares_decoded_strings_across_calls() {
    let mut b = ProviderBuilder::new();
    let str_id = b.add(Shape::scalar("string", Scalar::Str));
    let provider = b.finish().unwrap();

    let engine = Serializer::new(SerializerOptions::default().with_intern_strings(true));

    let payload = engine
        .serialize(&provider, str_id, &Value::str("Lightning"))
        .unwrap();

    let first = engine.deserialize(&provider, str_id, &payload).unwrap();
    let second = engine.deserialize(&provider, str_id, &payload).unwrap();
    let (Value::Str(first), Value::Str(second)) = (&first, &second) else {
        panic!("expected strings")
    };
    assert!(Arc::ptr_eq(first, second));
}

#[test]
fn test_interning_with_preservation_suppresses_repeated_strings() {
    let mut b = ProviderBuilder::new();
    let str_id = b.add(Shape::scalar("string", Scalar::Str));
    let strings = b.add(Shape::sequence("Vec<String>", SequenceShape::new(str_id)));
    let provider = b.finish().unwrap();

    let engine = Serializer::new(
        SerializerOptions::default()
            .with_intern_strings(true)
            .with_preserve_references(ReferenceMode::PerCall),
    );

    let value = Value::Sequence(vec![
        Value::str("a long repeated string"),
        Value::str("a long repeated string"),
        Value::str("a long repeated string"),
    ]);
    let payload = engine.serialize(&provider, strings, &value).unwrap();

    let plain = Serializer::default()
        .serialize(&provider, strings, &value)
        .unwrap();
    assert!(payload.len() < plain.len());

    let decoded = engine.deserialize(&provider, strings, &payload).unwrap();
    assert_eq!(decoded, value);

    // All three decoded occurrences share one allocation.
    let Value::Sequence(items) = decoded else {
        panic!("expected a sequence")
    };
    let (Value::Str(first), Value::Str(last)) = (&items[0], &items[2]) else {
        panic!("expected strings")
    };
    assert!(Arc::ptr_eq(first, last));
}
