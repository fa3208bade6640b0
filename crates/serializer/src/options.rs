use crate::convert::{Comparer, Converter};
use fxhash::FxHashMap;
use shape::{Alias, ComparerSpec, Shape, ShapeId};
use std::sync::Arc;

/// Flags naming the member categories whose declared-default values are
/// emitted anyway. Members outside every named category are emitted only
/// when their value differs from the declared default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SerializeDefaults(u8);

impl SerializeDefaults {
    /// Emit nothing that equals its default.
    pub const NEVER: SerializeDefaults = SerializeDefaults(0);
    pub const VALUE_TYPES: SerializeDefaults = SerializeDefaults(0b001);
    pub const REFERENCE_TYPES: SerializeDefaults = SerializeDefaults(0b010);
    pub const REQUIRED: SerializeDefaults = SerializeDefaults(0b100);
    /// Emit every member, default-valued or not.
    pub const ALWAYS: SerializeDefaults = SerializeDefaults(0b111);

    pub fn contains(self, other: SerializeDefaults) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for SerializeDefaults {
    type Output = SerializeDefaults;
    fn bitor(self, other: SerializeDefaults) -> SerializeDefaults {
        SerializeDefaults(self.0 | other.0)
    }
}

/// Flags relaxing strictness of the read side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeserializeDefaults(u8);

impl DeserializeDefaults {
    pub const STRICT: DeserializeDefaults = DeserializeDefaults(0);
    pub const ALLOW_NULL_FOR_NON_NULLABLE: DeserializeDefaults = DeserializeDefaults(0b01);
    pub const ALLOW_MISSING_REQUIRED: DeserializeDefaults = DeserializeDefaults(0b10);

    pub fn contains(self, other: DeserializeDefaults) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for DeserializeDefaults {
    type Output = DeserializeDefaults;
    fn bitor(self, other: DeserializeDefaults) -> DeserializeDefaults {
        DeserializeDefaults(self.0 | other.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceMode {
    Off,
    /// Identities are tracked within one top-level call.
    PerCall,
    /// Identities persist across calls on the same Serializer.
    CrossCall,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MultiDimFormat {
    /// Arrays of arrays, one level per rank.
    Nested,
    /// One flat array prefixed by a prelude of per-rank lengths.
    Flat,
}

/// Wire form of a Uuid value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuidFormat {
    /// 16 bytes, little-endian, as a dedicated extension.
    Binary,
    Simple,
    Hyphenated,
    Braced,
    Parenthesized,
    Urn,
}

/// Extension type codes used by the engine. All are reassignable so
/// deployments can dodge collisions with other ecosystems sharing the
/// extension space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtensionCodes {
    pub guid: i8,
    pub big_int: i8,
    pub decimal: i8,
    pub int128: i8,
    pub uint128: i8,
    pub f16: i8,
    pub reference: i8,
}

impl Default for ExtensionCodes {
    fn default() -> ExtensionCodes {
        ExtensionCodes {
            guid: 0x70,
            big_int: 0x71,
            decimal: 0x72,
            int128: 0x73,
            uint128: 0x74,
            f16: 0x75,
            reference: 0x76,
        }
    }
}

/// A runtime polymorphism registration, matched against the base type's
/// shape name. Registrations override, extend, or disable statically
/// declared unions.
#[derive(Clone)]
pub enum UnionRegistration {
    Replace {
        base: String,
        cases: Vec<(Alias, ShapeId)>,
    },
    Extend {
        base: String,
        cases: Vec<(Alias, ShapeId)>,
    },
    /// Serialize the base type directly, without union framing.
    Disable { base: String },
}

impl UnionRegistration {
    pub fn base(&self) -> &str {
        match self {
            UnionRegistration::Replace { base, .. }
            | UnionRegistration::Extend { base, .. }
            | UnionRegistration::Disable { base } => base,
        }
    }
}

/// Maps a declared property name to its wire name. Skipped for properties
/// carrying an explicit wire-name override.
pub type NamingPolicy = dyn Fn(&str) -> String + Send + Sync;

/// Supplies key equality and hashing for keyed containers. Invoked with the
/// member-declared comparer designation, if any; `None` asks for the
/// container-neutral comparer.
pub type ComparerProvider = dyn Fn(Option<&ComparerSpec>) -> Arc<dyn Comparer> + Send + Sync;

/// Builds a converter for shapes it recognizes, or declines.
pub type ConverterFactory = dyn Fn(&Shape) -> Option<Arc<dyn Converter>> + Send + Sync;

/// The immutable configuration bundle of a Serializer. Every `with_*`
/// method clones; the Serializer swaps its converter cache whenever any
/// field changes.
#[derive(Clone)]
pub struct SerializerOptions {
    pub multi_dimensional_array_format: MultiDimFormat,
    pub property_naming_policy: Option<Arc<NamingPolicy>>,
    pub comparer_provider: Option<Arc<ComparerProvider>>,
    pub perf_over_schema_stability: bool,
    pub ignore_key_attributes: bool,
    pub serialize_enum_values_by_name: bool,
    pub serialize_default_values: SerializeDefaults,
    pub deserialize_default_values: DeserializeDefaults,
    pub preserve_references: ReferenceMode,
    pub intern_strings: bool,
    pub extension_codes: ExtensionCodes,
    pub guid_format: GuidFormat,
    /// Custom converters by exact type name, in resolution order.
    pub converters: Vec<(String, Arc<dyn Converter>)>,
    /// Named registrations resolvable from a shape's converter directive.
    pub converter_registry: FxHashMap<String, Arc<dyn Converter>>,
    pub converter_factories: Vec<Arc<ConverterFactory>>,
    pub derived_type_unions: Vec<UnionRegistration>,
    /// Union wire shape: `[discriminator, payload]` arrays when false, a
    /// single-entry discriminator-keyed map when true.
    pub use_discriminator_objects: bool,
    pub disable_hardware_acceleration: bool,
    /// Byte budget within which an async read is attempted as one buffered
    /// sync pass before falling back to incremental decoding. Also the
    /// flush threshold of the async writer.
    pub max_async_buffer: usize,
    pub max_depth: u32,
}

impl Default for SerializerOptions {
    fn default() -> SerializerOptions {
        SerializerOptions {
            multi_dimensional_array_format: MultiDimFormat::Nested,
            property_naming_policy: None,
            comparer_provider: None,
            perf_over_schema_stability: false,
            ignore_key_attributes: false,
            serialize_enum_values_by_name: false,
            serialize_default_values: SerializeDefaults::ALWAYS,
            deserialize_default_values: DeserializeDefaults::STRICT,
            preserve_references: ReferenceMode::Off,
            intern_strings: false,
            extension_codes: ExtensionCodes::default(),
            guid_format: GuidFormat::Binary,
            converters: Vec::new(),
            converter_registry: FxHashMap::default(),
            converter_factories: Vec::new(),
            derived_type_unions: Vec::new(),
            use_discriminator_objects: false,
            disable_hardware_acceleration: false,
            max_async_buffer: 64 * 1024,
            max_depth: 64,
        }
    }
}

impl SerializerOptions {
    pub fn with_multi_dimensional_array_format(mut self, format: MultiDimFormat) -> Self {
        self.multi_dimensional_array_format = format;
        self
    }

    pub fn with_property_naming_policy(mut self, policy: Arc<NamingPolicy>) -> Self {
        self.property_naming_policy = Some(policy);
        self
    }

    pub fn with_comparer_provider(mut self, provider: Arc<ComparerProvider>) -> Self {
        self.comparer_provider = Some(provider);
        self
    }

    pub fn with_perf_over_schema_stability(mut self, on: bool) -> Self {
        self.perf_over_schema_stability = on;
        self
    }

    pub fn with_ignore_key_attributes(mut self, on: bool) -> Self {
        self.ignore_key_attributes = on;
        self
    }

    pub fn with_serialize_enum_values_by_name(mut self, on: bool) -> Self {
        self.serialize_enum_values_by_name = on;
        self
    }

    pub fn with_serialize_default_values(mut self, policy: SerializeDefaults) -> Self {
        self.serialize_default_values = policy;
        self
    }

    pub fn with_deserialize_default_values(mut self, policy: DeserializeDefaults) -> Self {
        self.deserialize_default_values = policy;
        self
    }

    pub fn with_preserve_references(mut self, mode: ReferenceMode) -> Self {
        self.preserve_references = mode;
        self
    }

    pub fn with_intern_strings(mut self, on: bool) -> Self {
        self.intern_strings = on;
        self
    }

    pub fn with_extension_codes(mut self, codes: ExtensionCodes) -> Self {
        self.extension_codes = codes;
        self
    }

    pub fn with_guid_format(mut self, format: GuidFormat) -> Self {
        self.guid_format = format;
        self
    }

    pub fn with_converter(mut self, type_name: impl Into<String>, converter: Arc<dyn Converter>) -> Self {
        self.converters.push((type_name.into(), converter));
        self
    }

    pub fn with_named_converter(
        mut self,
        name: impl Into<String>,
        converter: Arc<dyn Converter>,
    ) -> Self {
        self.converter_registry.insert(name.into(), converter);
        self
    }

    pub fn with_converter_factory(mut self, factory: Arc<ConverterFactory>) -> Self {
        self.converter_factories.push(factory);
        self
    }

    pub fn with_derived_type_union(mut self, registration: UnionRegistration) -> Self {
        self.derived_type_unions.push(registration);
        self
    }

    pub fn with_use_discriminator_objects(mut self, on: bool) -> Self {
        self.use_discriminator_objects = on;
        self
    }

    pub fn with_disable_hardware_acceleration(mut self, on: bool) -> Self {
        self.disable_hardware_acceleration = on;
        self
    }

    pub fn with_max_async_buffer(mut self, bytes: usize) -> Self {
        self.max_async_buffer = bytes;
        self
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    pub(crate) fn union_registration(&self, base: &str) -> Option<&UnionRegistration> {
        self.derived_type_unions
            .iter()
            .find(|reg| reg.base() == base)
    }
}

impl std::fmt::Debug for SerializerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializerOptions")
            .field(
                "multi_dimensional_array_format",
                &self.multi_dimensional_array_format,
            )
            .field("perf_over_schema_stability", &self.perf_over_schema_stability)
            .field("ignore_key_attributes", &self.ignore_key_attributes)
            .field(
                "serialize_enum_values_by_name",
                &self.serialize_enum_values_by_name,
            )
            .field("serialize_default_values", &self.serialize_default_values)
            .field(
                "deserialize_default_values",
                &self.deserialize_default_values,
            )
            .field("preserve_references", &self.preserve_references)
            .field("intern_strings", &self.intern_strings)
            .field("use_discriminator_objects", &self.use_discriminator_objects)
            .field("max_async_buffer", &self.max_async_buffer)
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}
