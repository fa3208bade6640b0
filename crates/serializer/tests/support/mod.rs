// Shared fixtures for the scenario suites. Each suite is its own crate, so
// not every helper is used by every suite.
#![allow(dead_code)]

use bytes::Bytes;
use futures::Stream;
use shape::{
    Alias, ObjectShape, Property, Provider, ProviderBuilder, Scalar, Shape, ShapeId, UnionCase,
    UnionShape, Value,
};
use std::io;
use std::sync::Arc;

/// Ids of the animal-union fixture: a base `Animal { Name }` with one
/// derived `Horse { Name, Speed }` case under integer alias 1.
pub struct AnimalFixture {
    pub provider: Arc<Provider>,
    pub union: ShapeId,
    pub animal: ShapeId,
    pub horse: ShapeId,
}

pub fn animal_union() -> AnimalFixture {
    let mut b = ProviderBuilder::new();
    let str_id = b.add(Shape::scalar("string", Scalar::Str));
    let i32_id = b.add(Shape::scalar("i32", Scalar::I32));

    let animal = b.add(Shape::object(
        "Animal",
        ObjectShape::new(vec![Property::new("Name", str_id)]),
    ));
    let horse = b.add(Shape::object(
        "Horse",
        ObjectShape::new(vec![
            Property::new("Name", str_id),
            Property::new("Speed", i32_id),
        ]),
    ));
    let union = b.add(Shape::union(
        "Animal",
        UnionShape::new(
            animal,
            vec![UnionCase {
                alias: Alias::Int(1),
                shape: horse,
            }],
        ),
    ));

    AnimalFixture {
        provider: b.finish().unwrap(),
        union,
        animal,
        horse,
    }
}

pub fn horse_value(fixture: &AnimalFixture, name: &str, speed: i64) -> Value {
    Value::Record(shape::Record::with_slots(
        fixture.horse,
        vec![Some(Value::str(name)), Some(Value::Signed(speed))],
    ))
}

/// A provider holding one scalar shape.
pub fn scalar_provider(scalar: Scalar) -> (Arc<Provider>, ShapeId) {
    let mut b = ProviderBuilder::new();
    let id = b.add(Shape::scalar(scalar.name(), scalar));
    (b.finish().unwrap(), id)
}

/// Split a payload into `chunk_len`-byte chunks as a fallible stream, the
/// way a network source hands them over.
pub fn fragments(payload: &[u8], chunk_len: usize) -> impl Stream<Item = io::Result<Bytes>> {
    let chunks: Vec<io::Result<Bytes>> = payload
        .chunks(chunk_len.max(1))
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect();
    futures::stream::iter(chunks)
}

pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
