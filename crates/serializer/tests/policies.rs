// Policy engine scenarios: default-value emission, required completeness,
// nullability, unknown keys, naming, depth, and build-time validation.

mod support;

use pretty_assertions::assert_eq;
use serializer::{
    ConfigError, DeserializeDefaults, Error, SerializeDefaults, Serializer, SerializerOptions,
};
use shape::{
    ObjectShape, Parameter, Property, Provider, ProviderBuilder, Record, Scalar, SequenceShape,
    Shape, ShapeId, Value,
};
use std::sync::Arc;
use support::hex;

fn apple_with(
    seeds: Property,
    constructor: Option<Vec<Parameter>>,
) -> (Arc<Provider>, ShapeId) {
    let mut b = ProviderBuilder::new();
    let i32_id = b.add(Shape::scalar("i32", Scalar::I32));
    let mut object = ObjectShape::new(vec![seeds.clone_with_shape(i32_id)]);
    if let Some(parameters) = constructor {
        object = object.with_constructor(parameters);
    }
    let apple = b.add(Shape::object("Apple", object));
    (b.finish().unwrap(), apple)
}

// Property::new needs the shape id which is minted inside apple_with, so
// tests describe the property with a placeholder id.
trait CloneWithShape {
    fn clone_with_shape(&self, shape: ShapeId) -> Property;
}

impl CloneWithShape for Property {
    fn clone_with_shape(&self, shape: ShapeId) -> Property {
        let mut cloned = self.clone();
        cloned.shape = shape;
        cloned
    }
}

fn record1(shape: ShapeId, value: Option<Value>) -> Value {
    Value::Record(Record::with_slots(shape, vec![value]))
}

#[test]
fn test_defaults_omitted_only_under_never_policy() {
    let property = Property::new("Seeds", ShapeId(0)).with_default(Value::Signed(7));

    // The permissive default policy emits everything.
    let (provider, apple) = apple_with(property.clone(), None);
    let engine = Serializer::default();
    let payload = engine
        .serialize(&provider, apple, &record1(apple, Some(Value::Signed(7))))
        .unwrap();
    assert_eq!(payload[0], 0x81);

    // NEVER omits the member equal to its declared default, and reading
    // the shortened payload reconstructs the same record.
    let engine = Serializer::new(
        SerializerOptions::default().with_serialize_default_values(SerializeDefaults::NEVER),
    );
    let original = record1(apple, Some(Value::Signed(7)));
    let payload = engine.serialize(&provider, apple, &original).unwrap();
    assert_eq!(payload, vec![0x80]);
    assert_eq!(engine.deserialize(&provider, apple, &payload).unwrap(), original);

    // A changed value is emitted under any policy.
    let payload = engine
        .serialize(&provider, apple, &record1(apple, Some(Value::Signed(8))))
        .unwrap();
    assert_eq!(payload[0], 0x81);
}

#[test]
fn test_constructor_default_takes_priority_over_attribute() {
    let property = Property::new("Seeds", ShapeId(0)).with_default(Value::Signed(7));
    let parameter = Parameter::new("Seeds", 0).with_default(Value::Signed(9));
    let (provider, apple) = apple_with(property, Some(vec![parameter]));

    let engine = Serializer::new(
        SerializerOptions::default().with_serialize_default_values(SerializeDefaults::NEVER),
    );

    // 9 is the effective default: omitted on write, applied on read.
    let nine = record1(apple, Some(Value::Signed(9)));
    let payload = engine.serialize(&provider, apple, &nine).unwrap();
    assert_eq!(payload, vec![0x80]);
    assert_eq!(engine.deserialize(&provider, apple, &payload).unwrap(), nine);

    // The attribute default is no longer the omission threshold.
    let seven = record1(apple, Some(Value::Signed(7)));
    let payload = engine.serialize(&provider, apple, &seven).unwrap();
    assert_eq!(payload[0], 0x81);
}

#[test]
fn test_attribute_default_applies_without_constructor() {
    let property = Property::new("Seeds", ShapeId(0)).with_default(Value::Signed(7));
    let (provider, apple) = apple_with(property, None);

    let engine = Serializer::default();
    // An empty map leaves Seeds unset; the attribute default fills it.
    let decoded = engine.deserialize(&provider, apple, &[0x80]).unwrap();
    assert_eq!(decoded, record1(apple, Some(Value::Signed(7))));
}

#[test]
fn test_required_flag_forces_emission() {
    let property = Property::new("Seeds", ShapeId(0)).with_default(Value::Signed(0));
    let parameter = Parameter::new("Seeds", 0).required();
    let (provider, apple) = apple_with(property, Some(vec![parameter]));

    let engine = Serializer::new(
        SerializerOptions::default()
            .with_serialize_default_values(SerializeDefaults::NEVER | SerializeDefaults::REQUIRED),
    );
    let payload = engine
        .serialize(&provider, apple, &record1(apple, Some(Value::Signed(0))))
        .unwrap();
    assert_eq!(payload[0], 0x81);
}

fn two_required() -> (Arc<Provider>, ShapeId) {
    let mut b = ProviderBuilder::new();
    let str_id = b.add(Shape::scalar("string", Scalar::Str));
    let i32_id = b.add(Shape::scalar("i32", Scalar::I32));
    let horse = b.add(Shape::object(
        "Horse",
        ObjectShape::new(vec![
            Property::new("Name", str_id),
            Property::new("Speed", i32_id),
        ])
        .with_constructor(vec![
            Parameter::new("Name", 0).required(),
            Parameter::new("Speed", 1).required(),
        ]),
    ));
    (b.finish().unwrap(), horse)
}

#[test]
fn test_missing_required_lists_every_name() {
    let (provider, horse) = two_required();
    let engine = Serializer::default();

    let err = engine.deserialize(&provider, horse, &[0x80]).unwrap_err();
    match err.root() {
        Error::MissingRequired { names } => {
            assert_eq!(names, &["Name".to_owned(), "Speed".to_owned()])
        }
        other => panic!("expected MissingRequired, got {other}"),
    }

    // The relaxed policy admits the partial payload.
    let engine = Serializer::new(
        SerializerOptions::default()
            .with_deserialize_default_values(DeserializeDefaults::ALLOW_MISSING_REQUIRED),
    );
    let decoded = engine.deserialize(&provider, horse, &[0x80]).unwrap();
    assert_eq!(decoded, Value::Record(Record::new(horse, 2)));
}

#[test]
fn test_double_assignment_is_rejected() {
    let (provider, horse) = two_required();
    let engine = Serializer::default();

    let mut w = msgpack::Writer::new();
    w.write_map_header(2);
    w.write_str("Name");
    w.write_str("Lightning");
    w.write_str("Name");
    w.write_str("Thunder");

    let err = engine
        .deserialize(&provider, horse, w.as_slice())
        .unwrap_err();
    assert!(matches!(err.root(), Error::DoubleAssignment { name } if name == "Name"));
}

#[test]
fn test_disallowed_null() {
    let property = Property::new("Seeds", ShapeId(0)).non_nullable();
    let (provider, apple) = apple_with(property, None);

    let mut w = msgpack::Writer::new();
    w.write_map_header(1);
    w.write_str("Seeds");
    w.write_nil();

    let engine = Serializer::default();
    let err = engine
        .deserialize(&provider, apple, w.as_slice())
        .unwrap_err();
    assert!(matches!(err.root(), Error::DisallowedNull { name } if name == "Seeds"));

    let engine = Serializer::new(
        SerializerOptions::default()
            .with_deserialize_default_values(DeserializeDefaults::ALLOW_NULL_FOR_NON_NULLABLE),
    );
    let decoded = engine.deserialize(&provider, apple, w.as_slice()).unwrap();
    assert_eq!(decoded, record1(apple, Some(Value::Nil)));
}

#[test]
fn test_unknown_keys_are_skipped() {
    let (provider, horse) = two_required();
    let engine = Serializer::default();

    let mut w = msgpack::Writer::new();
    w.write_map_header(3);
    w.write_str("Name");
    w.write_str("Lightning");
    // An unknown key with a nested structure exercises the structural skip.
    w.write_str("Stable");
    w.write_map_header(1);
    w.write_str("City");
    w.write_array_header(2);
    w.write_int(1);
    w.write_int(2);
    w.write_str("Speed");
    w.write_int(45);

    let decoded = engine.deserialize(&provider, horse, w.as_slice()).unwrap();
    assert_eq!(
        decoded,
        Value::Record(Record::with_slots(
            horse,
            vec![Some(Value::str("Lightning")), Some(Value::Signed(45))],
        ))
    );
}

#[test]
fn test_unused_data_bucket_captures_unknown_keys() {
    let mut b = ProviderBuilder::new();
    let str_id = b.add(Shape::scalar("string", Scalar::Str));
    let extras_id = b.add(Shape::scalar("extras", Scalar::Raw));
    let mut extras = Property::new("Extras", extras_id);
    extras = extras.unused_data_bucket();
    let doc = b.add(Shape::object(
        "Document",
        ObjectShape::new(vec![Property::new("Title", str_id), extras]),
    ));
    let provider = b.finish().unwrap();

    let engine = Serializer::default();

    let mut w = msgpack::Writer::new();
    w.write_map_header(2);
    w.write_str("Title");
    w.write_str("Spec");
    w.write_str("Unknown");
    w.write_int(9);

    let decoded = engine.deserialize(&provider, doc, w.as_slice()).unwrap();
    let Value::Record(record) = &decoded else {
        panic!("expected a record")
    };
    assert_eq!(
        record.get(1),
        Some(Value::Map(vec![(Value::str("Unknown"), Value::Signed(9))]))
    );

    // Re-serializing round-trips the captured entries back onto the wire.
    let payload = engine.serialize(&provider, doc, &decoded).unwrap();
    assert_eq!(engine.deserialize(&provider, doc, &payload).unwrap(), decoded);
    assert!(hex(&payload).contains("a7 55 6e 6b 6e 6f 77 6e"));
}

#[test]
fn test_multiple_buckets_are_a_build_error() {
    let mut b = ProviderBuilder::new();
    let raw_id = b.add(Shape::scalar("raw", Scalar::Raw));
    let doc = b.add(Shape::object(
        "Document",
        ObjectShape::new(vec![
            Property::new("A", raw_id).unused_data_bucket(),
            Property::new("B", raw_id).unused_data_bucket(),
        ]),
    ));
    let provider = b.finish().unwrap();

    let err = Serializer::default()
        .serialize(&provider, doc, &Value::Record(Record::new(doc, 2)))
        .unwrap_err();
    assert!(matches!(
        err.root(),
        Error::Config(ConfigError::MultipleUnusedBuckets { .. })
    ));
}

#[test]
fn test_mixed_key_indexes_are_a_build_error() {
    let mut b = ProviderBuilder::new();
    let i32_id = b.add(Shape::scalar("i32", Scalar::I32));
    let bad = b.add(Shape::object(
        "Bad",
        ObjectShape::new(vec![
            Property::new("X", i32_id).with_key_index(0),
            Property::new("Y", i32_id),
        ]),
    ));
    let provider = b.finish().unwrap();

    let err = Serializer::default()
        .serialize(&provider, bad, &Value::Record(Record::new(bad, 2)))
        .unwrap_err();
    assert!(matches!(
        err.root(),
        Error::Config(ConfigError::MixedKeyIndexes { .. })
    ));
}

#[test]
fn test_ignore_key_attributes_forces_map_form() {
    let mut b = ProviderBuilder::new();
    let i32_id = b.add(Shape::scalar("i32", Scalar::I32));
    let point = b.add(Shape::object(
        "Point",
        ObjectShape::new(vec![
            Property::new("X", i32_id).with_key_index(0),
            Property::new("Y", i32_id).with_key_index(1),
        ]),
    ));
    let provider = b.finish().unwrap();

    let engine =
        Serializer::new(SerializerOptions::default().with_ignore_key_attributes(true));
    let value = Value::Record(Record::with_slots(
        point,
        vec![Some(Value::Signed(1)), Some(Value::Signed(2))],
    ));
    let payload = engine.serialize(&provider, point, &value).unwrap();
    assert_eq!(payload[0], 0x82);
    assert_eq!(engine.deserialize(&provider, point, &payload).unwrap(), value);
}

#[test]
fn test_perf_over_schema_stability_chooses_array_form() {
    let mut b = ProviderBuilder::new();
    let i32_id = b.add(Shape::scalar("i32", Scalar::I32));
    let point = b.add(Shape::object(
        "Point",
        ObjectShape::new(vec![
            Property::new("X", i32_id),
            Property::new("Y", i32_id),
        ]),
    ));
    let provider = b.finish().unwrap();

    let engine =
        Serializer::new(SerializerOptions::default().with_perf_over_schema_stability(true));
    let value = Value::Record(Record::with_slots(
        point,
        vec![Some(Value::Signed(1)), Some(Value::Signed(2))],
    ));
    let payload = engine.serialize(&provider, point, &value).unwrap();
    assert_eq!(hex(&payload), "92 01 02");
}

#[test]
fn test_array_form_trims_only_trailing_defaults() {
    let mut b = ProviderBuilder::new();
    let i32_id = b.add(Shape::scalar("i32", Scalar::I32));
    let triple = b.add(Shape::object(
        "Triple",
        ObjectShape::new(vec![
            Property::new("X", i32_id).with_key_index(0),
            Property::new("Y", i32_id).with_key_index(1),
            Property::new("Z", i32_id).with_key_index(2),
        ]),
    ));
    let provider = b.finish().unwrap();

    let engine = Serializer::new(
        SerializerOptions::default().with_serialize_default_values(SerializeDefaults::NEVER),
    );

    // A trailing default shortens the header.
    let trailing = Value::Record(Record::with_slots(
        triple,
        vec![
            Some(Value::Signed(1)),
            Some(Value::Signed(2)),
            Some(Value::Signed(0)),
        ],
    ));
    let payload = engine.serialize(&provider, triple, &trailing).unwrap();
    assert_eq!(hex(&payload), "92 01 02");
    assert_eq!(
        engine.deserialize(&provider, triple, &payload).unwrap(),
        trailing
    );

    // An interior default must stay, to preserve positions.
    let interior = Value::Record(Record::with_slots(
        triple,
        vec![
            Some(Value::Signed(1)),
            Some(Value::Signed(0)),
            Some(Value::Signed(3)),
        ],
    ));
    let payload = engine.serialize(&provider, triple, &interior).unwrap();
    assert_eq!(hex(&payload), "93 01 00 03");
}

#[test]
fn test_naming_policy_skips_explicit_wire_names() {
    let mut b = ProviderBuilder::new();
    let i32_id = b.add(Shape::scalar("i32", Scalar::I32));
    let apple = b.add(Shape::object(
        "Apple",
        ObjectShape::new(vec![
            Property::new("seeds", i32_id),
            Property::new("stem", i32_id).with_wire_name("Stalk"),
        ]),
    ));
    let provider = b.finish().unwrap();

    let engine = Serializer::new(
        SerializerOptions::default()
            .with_property_naming_policy(Arc::new(|name: &str| name.to_uppercase())),
    );
    let value = Value::Record(Record::with_slots(
        apple,
        vec![Some(Value::Signed(1)), Some(Value::Signed(2))],
    ));

    let payload = engine.serialize(&provider, apple, &value).unwrap();
    let dump = hex(&payload);
    // "SEEDS" from the policy; "Stalk" kept verbatim.
    assert!(dump.contains("a5 53 45 45 44 53"));
    assert!(dump.contains("a5 53 74 61 6c 6b"));
    assert_eq!(engine.deserialize(&provider, apple, &payload).unwrap(), value);
}

#[test]
fn test_depth_cap() {
    let mut b = ProviderBuilder::new();
    let list = b.declare();
    b.define(list, Shape::sequence("Deep", SequenceShape::new(list)))
        .unwrap();
    let provider = b.finish().unwrap();

    let engine = Serializer::new(SerializerOptions::default().with_max_depth(8));

    let mut value = Value::Sequence(vec![]);
    for _ in 0..20 {
        value = Value::Sequence(vec![value]);
    }
    let err = engine.serialize(&provider, list, &value).unwrap_err();
    assert!(matches!(err.root(), Error::DepthExceeded { max: 8 }));

    // The read side fails identically on a hand-built deep payload, and
    // returns no partial object.
    let mut w = msgpack::Writer::new();
    for _ in 0..20 {
        w.write_array_header(1);
    }
    w.write_array_header(0);
    let err = engine
        .deserialize(&provider, list, w.as_slice())
        .unwrap_err();
    assert!(matches!(err.root(), Error::DepthExceeded { max: 8 }));
}

#[test]
fn test_error_breadcrumbs_name_the_failing_location() {
    let mut b = ProviderBuilder::new();
    let i32_id = b.add(Shape::scalar("i32", Scalar::I32));
    let seq = b.add(Shape::sequence("Speeds", SequenceShape::new(i32_id)));
    let horse = b.add(Shape::object(
        "Horse",
        ObjectShape::new(vec![Property::new("laps", seq)]),
    ));
    let provider = b.finish().unwrap();

    let mut w = msgpack::Writer::new();
    w.write_map_header(1);
    w.write_str("laps");
    w.write_array_header(3);
    w.write_int(1);
    w.write_str("oops");
    w.write_int(3);

    let err = Serializer::default()
        .deserialize(&provider, horse, w.as_slice())
        .unwrap_err();
    assert_eq!(err.path(), "/laps/1");
}

#[test]
fn test_cancellation_before_first_byte() {
    let (provider, horse) = two_required();
    let engine = Serializer::default();
    let value = Value::Record(Record::with_slots(
        horse,
        vec![Some(Value::str("Lightning")), Some(Value::Signed(45))],
    ));

    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();

    let err = engine
        .serialize_with(&provider, horse, &value, &cancel)
        .unwrap_err();
    assert!(err.is_cancelled());

    let err = engine
        .deserialize_with(&provider, horse, &[0x80], &cancel)
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[test]
fn test_getter_and_setter_gaps() {
    let mut b = ProviderBuilder::new();
    let i32_id = b.add(Shape::scalar("i32", Scalar::I32));
    let apple = b.add(Shape::object(
        "Apple",
        ObjectShape::new(vec![
            Property::new("WriteOnly", i32_id).without_getter(),
            Property::new("ReadOnly", i32_id).without_setter(),
        ]),
    ));
    let provider = b.finish().unwrap();

    let engine = Serializer::default();
    let value = Value::Record(Record::with_slots(
        apple,
        vec![Some(Value::Signed(1)), Some(Value::Signed(2))],
    ));

    // Only the readable property reaches the wire.
    let payload = engine.serialize(&provider, apple, &value).unwrap();
    assert_eq!(payload[0], 0x81);

    // A setter-less property on the wire is consumed but not applied.
    let decoded = engine.deserialize(&provider, apple, &payload).unwrap();
    let Value::Record(record) = decoded else {
        panic!("expected a record")
    };
    assert_eq!(record.get(1), None);
}
