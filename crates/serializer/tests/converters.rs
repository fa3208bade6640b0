// Enum modes, custom-converter resolution order, and JSON-schema
// fragments.

mod support;

use pretty_assertions::assert_eq;
use serde_json::json;
use serializer::{
    ConfigError, Converter, Error, ReadCx, Serializer, SerializerOptions, WriteCx,
};
use shape::{
    EnumShape, ObjectShape, Property, Provider, ProviderBuilder, Scalar, Shape, ShapeId,
    SurrogateShape, Value,
};
use std::sync::Arc;

fn enum_provider(by: Vec<(&str, i64)>) -> (Arc<Provider>, ShapeId) {
    let mut b = ProviderBuilder::new();
    let id = b.add(Shape::enumeration("Gait", EnumShape::new(by)));
    (b.finish().unwrap(), id)
}

#[test]
fn test_enum_ordinal_mode() {
    let (provider, gait) = enum_provider(vec![("Walk", 0), ("Trot", 1), ("Gallop", 2)]);
    let engine = Serializer::default();

    let payload = engine
        .serialize(&provider, gait, &Value::Signed(2))
        .unwrap();
    assert_eq!(payload, vec![0x02]);
    assert_eq!(
        engine.deserialize(&provider, gait, &payload).unwrap(),
        Value::Signed(2)
    );

    // Ordinal mode accepts values with no declared member.
    assert_eq!(
        engine.deserialize(&provider, gait, &[0x09]).unwrap(),
        Value::Signed(9)
    );
}

#[test]
fn test_enum_by_name_mode() {
    let (provider, gait) = enum_provider(vec![("Walk", 0), ("Trot", 1), ("Gallop", 2)]);
    let engine = Serializer::new(
        SerializerOptions::default().with_serialize_enum_values_by_name(true),
    );

    let payload = engine
        .serialize(&provider, gait, &Value::Signed(2))
        .unwrap();
    assert_eq!(payload[0], 0xa6);

    // Reads accept any casing.
    let mut w = msgpack::Writer::new();
    w.write_str("gallop");
    assert_eq!(
        engine.deserialize(&provider, gait, w.as_slice()).unwrap(),
        Value::Signed(2)
    );

    // Unknown names fail.
    let mut w = msgpack::Writer::new();
    w.write_str("Canter");
    assert!(engine.deserialize(&provider, gait, w.as_slice()).is_err());

    // Values without a clean name fall back to the ordinal.
    let payload = engine
        .serialize(&provider, gait, &Value::Signed(9))
        .unwrap();
    assert_eq!(payload, vec![0x09]);
}

#[test]
fn test_case_distinguished_enum_requires_exact_names() {
    let (provider, gait) = enum_provider(vec![("walk", 0), ("Walk", 1)]);
    let engine = Serializer::new(
        SerializerOptions::default().with_serialize_enum_values_by_name(true),
    );

    let mut w = msgpack::Writer::new();
    w.write_str("Walk");
    assert_eq!(
        engine.deserialize(&provider, gait, w.as_slice()).unwrap(),
        Value::Signed(1)
    );

    let mut w = msgpack::Writer::new();
    w.write_str("WALK");
    assert!(engine.deserialize(&provider, gait, w.as_slice()).is_err());
}

/// Writes any string value reversed; reads it back reversed again.
struct ReversingConverter;

#[async_trait::async_trait]
impl Converter for ReversingConverter {
    fn write(
        &self,
        w: &mut msgpack::Writer,
        value: &Value,
        _cx: &mut WriteCx,
    ) -> Result<(), Error> {
        match value {
            Value::Str(text) => {
                w.write_str(&text.chars().rev().collect::<String>());
                Ok(())
            }
            other => Err(Error::invalid(format!("expected a string, found {}", other.kind_name()))),
        }
    }

    fn read(&self, r: &mut msgpack::Reader<'_>, _cx: &mut ReadCx) -> Result<Value, Error> {
        let text = r.read_str()?;
        Ok(Value::str(text.chars().rev().collect::<String>()))
    }

    fn schema(&self) -> serde_json::Value {
        json!({"type": "string"})
    }
}

#[test]
fn test_custom_converter_by_type_name() {
    let mut b = ProviderBuilder::new();
    let id = b.add(Shape::scalar("Password", Scalar::Str));
    let provider = b.finish().unwrap();

    let engine = Serializer::new(
        SerializerOptions::default().with_converter("Password", Arc::new(ReversingConverter)),
    );

    let payload = engine
        .serialize(&provider, id, &Value::str("drowssap"))
        .unwrap();
    let mut r = msgpack::Reader::new(&payload);
    assert_eq!(r.read_str().unwrap(), "password");

    assert_eq!(
        engine.deserialize(&provider, id, &payload).unwrap(),
        Value::str("drowssap")
    );
}

#[test]
fn test_converter_factory_is_consulted_after_the_list() {
    let mut b = ProviderBuilder::new();
    let id = b.add(Shape::scalar("Password", Scalar::Str));
    let provider = b.finish().unwrap();

    let engine = Serializer::new(SerializerOptions::default().with_converter_factory(
        Arc::new(|shape: &Shape| {
            (shape.name == "Password").then(|| Arc::new(ReversingConverter) as Arc<dyn Converter>)
        }),
    ));

    let payload = engine
        .serialize(&provider, id, &Value::str("drowssap"))
        .unwrap();
    let mut r = msgpack::Reader::new(&payload);
    assert_eq!(r.read_str().unwrap(), "password");
}

#[test]
fn test_type_prescribed_converter_must_be_registered() {
    let mut b = ProviderBuilder::new();
    let id = b.add(Shape::scalar("Password", Scalar::Str).with_converter("reverser"));
    let provider = b.finish().unwrap();

    // Unregistered name: a configuration error.
    let err = Serializer::default()
        .serialize(&provider, id, &Value::str("x"))
        .unwrap_err();
    assert!(matches!(
        err.root(),
        Error::Config(ConfigError::UnknownConverter { name }) if name == "reverser"
    ));

    // Registered: resolution succeeds.
    let engine = Serializer::new(
        SerializerOptions::default().with_named_converter("reverser", Arc::new(ReversingConverter)),
    );
    let payload = engine.serialize(&provider, id, &Value::str("ab")).unwrap();
    let mut r = msgpack::Reader::new(&payload);
    assert_eq!(r.read_str().unwrap(), "ba");
}

#[test]
fn test_member_prescribed_converter() {
    let mut b = ProviderBuilder::new();
    let str_id = b.add(Shape::scalar("string", Scalar::Str));
    let login = b.add(Shape::object(
        "Login",
        ObjectShape::new(vec![
            Property::new("User", str_id),
            Property::new("Password", str_id).with_converter("reverser"),
        ]),
    ));
    let provider = b.finish().unwrap();

    let engine = Serializer::new(
        SerializerOptions::default().with_named_converter("reverser", Arc::new(ReversingConverter)),
    );
    let value = Value::Record(shape::Record::with_slots(
        login,
        vec![Some(Value::str("ab")), Some(Value::str("cd"))],
    ));
    let payload = engine.serialize(&provider, login, &value).unwrap();

    // Only the prescribed member is reversed on the wire.
    assert!(support::hex(&payload).contains("a2 61 62"));
    assert!(support::hex(&payload).contains("a2 64 63"));
    assert_eq!(engine.deserialize(&provider, login, &payload).unwrap(), value);
}

#[test]
fn test_function_shapes_are_unsupported() {
    let mut b = ProviderBuilder::new();
    let id = b.add(Shape::new("Callback", shape::ShapeKind::Function));
    let provider = b.finish().unwrap();

    let err = Serializer::default()
        .serialize(&provider, id, &Value::Nil)
        .unwrap_err();
    assert!(matches!(err.root(), Error::Unsupported(_)));
}

#[test]
fn test_unions_on_surrogated_types_are_ignored() {
    // The registration targets the surrogated type; routing goes through
    // the surrogate with no union framing.
    let mut b = ProviderBuilder::new();
    let str_id = b.add(Shape::scalar("string", Scalar::Str));
    let wrapped = b.add(Shape::surrogate(
        "Wrapped",
        SurrogateShape {
            surrogate: str_id,
            marshal: Arc::new(|v| v.clone()),
            unmarshal: Arc::new(|v| v.clone()),
        },
    ));
    let provider = b.finish().unwrap();

    let engine = Serializer::new(SerializerOptions::default().with_derived_type_union(
        serializer::UnionRegistration::Replace {
            base: "Wrapped".to_owned(),
            cases: vec![(shape::Alias::Int(1), str_id)],
        },
    ));

    let payload = engine
        .serialize(&provider, wrapped, &Value::str("plain"))
        .unwrap();
    // A bare string token, not union framing.
    assert_eq!(payload[0], 0xa5);
}

#[test]
fn test_json_schema_fragments() {
    let mut b = ProviderBuilder::new();
    let str_id = b.add(Shape::scalar("string", Scalar::Str));
    let i32_id = b.add(Shape::scalar("i32", Scalar::I32));
    let horse = b.add(Shape::object(
        "Horse",
        ObjectShape::new(vec![
            Property::new("Name", str_id).required(),
            Property::new("Speed", i32_id),
        ]),
    ));
    let provider = b.finish().unwrap();

    let engine = Serializer::default();
    assert_eq!(
        engine.json_schema(&provider, horse).unwrap(),
        json!({
            "type": "object",
            "properties": {
                "Name": {"type": "string"},
                "Speed": {"type": "integer"},
            },
            "required": ["Name"],
        })
    );
}
