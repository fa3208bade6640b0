// Shape is a metadata description of a user type sufficient to drive
// generic serialization without per-type hand-written code. Shapes live in
// an append-only Provider arena and reference one another by ShapeId, so
// recursive and mutually-recursive type graphs need no construction-time
// cycles and shape identity is simply (provider, id).
//
// The runtime representation of user data is the dynamic Value sum type;
// typed object instances are Records carrying their object ShapeId.

use std::sync::Arc;

mod collection;
mod object;
mod provider;
mod scalar;
mod union;
mod value;

pub use collection::{Construction, DictionaryShape, SequenceShape};
pub use object::{ComparerSpec, Constructor, ObjectShape, Parameter, Property, ShouldSerialize};
pub use provider::{Error, Provider, ProviderBuilder, ShapeId};
pub use scalar::Scalar;
pub use union::{Alias, CaseProbe, UnionCase, UnionShape};
pub use value::{Record, Value};

/// A marshaling half: maps a value of one type into its stand-in.
/// Both halves of a surrogate pair must preserve nil identity.
pub type MarshalFn = dyn Fn(&Value) -> Value + Send + Sync;

/// SurrogateShape routes a hard-to-serialize type through a stand-in type.
#[derive(Clone)]
pub struct SurrogateShape {
    pub surrogate: ShapeId,
    pub marshal: Arc<MarshalFn>,
    pub unmarshal: Arc<MarshalFn>,
}

impl std::fmt::Debug for SurrogateShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrogateShape")
            .field("surrogate", &self.surrogate)
            .finish_non_exhaustive()
    }
}

/// One member of an enum shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumMember {
    pub name: String,
    pub value: i64,
}

#[derive(Clone, Debug, Default)]
pub struct EnumShape {
    pub members: Vec<EnumMember>,
}

impl EnumShape {
    pub fn new<I, S>(members: I) -> EnumShape
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        EnumShape {
            members: members
                .into_iter()
                .map(|(name, value)| EnumMember {
                    name: name.into(),
                    value,
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum ShapeKind {
    Scalar(Scalar),
    Object(ObjectShape),
    Union(UnionShape),
    Enum(EnumShape),
    Optional(ShapeId),
    Sequence(SequenceShape),
    Dictionary(DictionaryShape),
    Surrogate(SurrogateShape),
    /// Delegate-like types have no serializable representation.
    Function,
}

/// Shape pairs a type name with its structural kind and type-level
/// directives.
#[derive(Clone, Debug)]
pub struct Shape {
    pub name: String,
    pub kind: ShapeKind,
    /// Name of a registered custom converter prescribed for this type.
    pub converter: Option<String>,
}

impl Shape {
    pub fn new(name: impl Into<String>, kind: ShapeKind) -> Shape {
        Shape {
            name: name.into(),
            kind,
            converter: None,
        }
    }

    pub fn scalar(name: impl Into<String>, scalar: Scalar) -> Shape {
        Shape::new(name, ShapeKind::Scalar(scalar))
    }

    pub fn object(name: impl Into<String>, object: ObjectShape) -> Shape {
        Shape::new(name, ShapeKind::Object(object))
    }

    pub fn union(name: impl Into<String>, union: UnionShape) -> Shape {
        Shape::new(name, ShapeKind::Union(union))
    }

    pub fn enumeration(name: impl Into<String>, members: EnumShape) -> Shape {
        Shape::new(name, ShapeKind::Enum(members))
    }

    pub fn optional(name: impl Into<String>, inner: ShapeId) -> Shape {
        Shape::new(name, ShapeKind::Optional(inner))
    }

    pub fn sequence(name: impl Into<String>, sequence: SequenceShape) -> Shape {
        Shape::new(name, ShapeKind::Sequence(sequence))
    }

    pub fn dictionary(name: impl Into<String>, dictionary: DictionaryShape) -> Shape {
        Shape::new(name, ShapeKind::Dictionary(dictionary))
    }

    pub fn surrogate(name: impl Into<String>, surrogate: SurrogateShape) -> Shape {
        Shape::new(name, ShapeKind::Surrogate(surrogate))
    }

    pub fn with_converter(mut self, converter: impl Into<String>) -> Shape {
        self.converter = Some(converter.into());
        self
    }
}
