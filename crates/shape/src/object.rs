use super::{ShapeId, Value};
use std::sync::Arc;

/// A predicate consulted at write time to decide whether a property is
/// emitted at all, ahead of the engine's default-value policy.
pub type ShouldSerialize = dyn Fn(&Value) -> bool + Send + Sync;

/// ObjectShape describes the properties and construction of one concrete
/// user type. Property order is declaration order; a record's slot index is
/// its property's position in this list.
#[derive(Clone, Debug, Default)]
pub struct ObjectShape {
    pub properties: Vec<Property>,
    pub constructor: Option<Constructor>,
}

impl ObjectShape {
    pub fn new(properties: Vec<Property>) -> ObjectShape {
        ObjectShape {
            properties,
            constructor: None,
        }
    }

    pub fn with_constructor(mut self, parameters: Vec<Parameter>) -> ObjectShape {
        self.constructor = Some(Constructor { parameters });
        self
    }
}

/// Property carries the member-level attribute surface: naming overrides,
/// key indexes, requiredness, nullability, defaults, prescribed converters
/// and comparers, and the unused-data bucket marker.
#[derive(Clone)]
pub struct Property {
    pub name: String,
    pub shape: ShapeId,
    pub wire_name: Option<String>,
    pub key_index: Option<u32>,
    pub has_getter: bool,
    pub has_setter: bool,
    pub required: bool,
    pub non_nullable: bool,
    pub default: Option<Value>,
    pub converter: Option<String>,
    pub comparer: Option<ComparerSpec>,
    pub unused_data_bucket: bool,
    pub should_serialize: Option<Arc<ShouldSerialize>>,
}

impl Property {
    pub fn new(name: impl Into<String>, shape: ShapeId) -> Property {
        Property {
            name: name.into(),
            shape,
            wire_name: None,
            key_index: None,
            has_getter: true,
            has_setter: true,
            required: false,
            non_nullable: false,
            default: None,
            converter: None,
            comparer: None,
            unused_data_bucket: false,
            should_serialize: None,
        }
    }

    pub fn required(mut self) -> Property {
        self.required = true;
        self
    }

    pub fn non_nullable(mut self) -> Property {
        self.non_nullable = true;
        self
    }

    pub fn with_wire_name(mut self, name: impl Into<String>) -> Property {
        self.wire_name = Some(name.into());
        self
    }

    pub fn with_key_index(mut self, index: u32) -> Property {
        self.key_index = Some(index);
        self
    }

    pub fn with_default(mut self, default: Value) -> Property {
        self.default = Some(default);
        self
    }

    pub fn with_converter(mut self, converter: impl Into<String>) -> Property {
        self.converter = Some(converter.into());
        self
    }

    pub fn with_comparer(mut self, comparer: ComparerSpec) -> Property {
        self.comparer = Some(comparer);
        self
    }

    pub fn without_getter(mut self) -> Property {
        self.has_getter = false;
        self
    }

    pub fn without_setter(mut self) -> Property {
        self.has_setter = false;
        self
    }

    pub fn unused_data_bucket(mut self) -> Property {
        self.unused_data_bucket = true;
        self
    }

    pub fn serialize_when(mut self, predicate: Arc<ShouldSerialize>) -> Property {
        self.should_serialize = Some(predicate);
        self
    }
}

impl std::fmt::Debug for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("wire_name", &self.wire_name)
            .field("key_index", &self.key_index)
            .field("required", &self.required)
            .field("non_nullable", &self.non_nullable)
            .field("unused_data_bucket", &self.unused_data_bucket)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Constructor {
    pub parameters: Vec<Parameter>,
}

/// A constructor parameter. Parameters pair with properties by name:
/// case-sensitive first, then case-insensitive unless that would be
/// ambiguous.
#[derive(Clone, Debug)]
pub struct Parameter {
    pub name: String,
    pub position: usize,
    pub required: bool,
    pub non_nullable: bool,
    pub default: Option<Value>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, position: usize) -> Parameter {
        Parameter {
            name: name.into(),
            position,
            required: false,
            non_nullable: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Parameter {
        self.required = true;
        self
    }

    pub fn non_nullable(mut self) -> Parameter {
        self.non_nullable = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Parameter {
        self.default = Some(default);
        self
    }
}

/// Designates a member-declared comparer: a source type plus the member on
/// it to invoke. Converters influenced by a comparer are cached under a key
/// extended with this pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComparerSpec {
    pub source: String,
    pub member: String,
}
