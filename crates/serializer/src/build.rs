use crate::cache::{CacheKey, ConverterCache};
use crate::convert::collection::{DictionaryConverter, FastKind, SequenceConverter};
use crate::convert::enums::EnumConverter;
use crate::convert::object::{ArrayObjectConverter, Emit, MapObjectConverter, PropertyPlan};
use crate::convert::scalar::ScalarConverter;
use crate::convert::union::{CasePlan, UnionConverter};
use crate::convert::wrap::{OptionalConverter, ReferenceConverter, SurrogateConverter};
use crate::convert::{Comparer, Converter, DefaultComparer};
use crate::error::{ConfigError, Error};
use crate::options::{DeserializeDefaults, ReferenceMode, SerializeDefaults, SerializerOptions, UnionRegistration};
use fxhash::FxHashMap;
use itertools::Itertools;
use msgpack::Writer;
use shape::{
    Alias, ComparerSpec, DictionaryShape, EnumShape, ObjectShape, Parameter, Provider, Scalar,
    SequenceShape, Shape, ShapeId, ShapeKind, SurrogateShape, UnionShape, Value,
};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

// Fingerprint bit distinguishing payload cores (union bases and case
// payloads, which carry neither union framing nor a reference envelope)
// from fully-wrapped converters.
const CORE: u64 = 1;

fn fingerprint(comparer: Option<&ComparerSpec>, core: bool) -> u64 {
    let mut bits = 0u64;
    if let Some(spec) = comparer {
        let mut hasher = fxhash::FxHasher64::default();
        spec.hash(&mut hasher);
        bits = hasher.finish() << 1;
    }
    if core {
        bits |= CORE;
    }
    bits
}

/// Builder is the shape-directed visitor: one handler per shape kind,
/// resolving in order custom converters, the scalar table, surrogates,
/// then structural recursion, finally wrapping objects in union framing
/// and a reference-preservation envelope as configured.
pub(crate) struct Builder<'a> {
    pub options: &'a Arc<SerializerOptions>,
    pub provider: &'a Arc<Provider>,
    pub cache: &'a ConverterCache,
}

impl<'a> Builder<'a> {
    /// The fully-wrapped converter for a shape, memoized.
    pub fn converter(&self, id: ShapeId) -> Result<Arc<dyn Converter>, Error> {
        self.resolve(id, None, false)
    }

    fn resolve(
        &self,
        id: ShapeId,
        comparer: Option<&ComparerSpec>,
        core: bool,
    ) -> Result<Arc<dyn Converter>, Error> {
        let key = CacheKey {
            provider: Arc::as_ptr(self.provider) as usize,
            shape: id.0,
            fingerprint: fingerprint(comparer, core),
        };
        self.cache.get_or_build(key, || self.build(id, comparer, core))
    }

    fn shape(&self, id: ShapeId) -> Result<&Shape, Error> {
        self.provider
            .get(id)
            .ok_or_else(|| ConfigError::UnknownShape { id: id.0 }.into())
    }

    fn build(
        &self,
        id: ShapeId,
        comparer: Option<&ComparerSpec>,
        core: bool,
    ) -> Result<Arc<dyn Converter>, Error> {
        let shape = self.shape(id)?;

        // Custom converters shadow everything: the runtime-registered list
        // first, then factories, then the converter the type prescribes.
        for (type_name, converter) in &self.options.converters {
            if type_name == &shape.name {
                return Ok(converter.clone());
            }
        }
        for factory in &self.options.converter_factories {
            if let Some(converter) = factory(shape) {
                return Ok(converter);
            }
        }
        if let Some(name) = &shape.converter {
            return self.named_converter(name);
        }

        match &shape.kind {
            ShapeKind::Scalar(scalar) => Ok(Arc::new(ScalarConverter::new(*scalar, self.options))),
            ShapeKind::Object(object) => self.build_object(id, shape, object, comparer, core),
            ShapeKind::Union(union) => self.build_union(id, shape, union, core),
            ShapeKind::Enum(members) => self.build_enum(shape, members),
            ShapeKind::Optional(inner) => Ok(Arc::new(OptionalConverter {
                inner: self.resolve(*inner, None, false)?,
            })),
            ShapeKind::Sequence(sequence) => self.build_sequence(shape, sequence),
            ShapeKind::Dictionary(dictionary) => self.build_dictionary(shape, dictionary, comparer),
            ShapeKind::Surrogate(surrogate) => self.build_surrogate(shape, surrogate),
            ShapeKind::Function => Err(Error::unsupported(format!(
                "{} is a function type and has no wire form",
                shape.name
            ))),
        }
    }

    fn named_converter(&self, name: &str) -> Result<Arc<dyn Converter>, Error> {
        self.options
            .converter_registry
            .get(name)
            .cloned()
            .ok_or_else(|| {
                ConfigError::UnknownConverter {
                    name: name.to_owned(),
                }
                .into()
            })
    }

    fn maybe_reference(&self, inner: Arc<dyn Converter>) -> Arc<dyn Converter> {
        if self.options.preserve_references == ReferenceMode::Off {
            return inner;
        }
        Arc::new(ReferenceConverter {
            inner,
            code: self.options.extension_codes.reference,
        })
    }

    fn build_object(
        &self,
        id: ShapeId,
        shape: &Shape,
        object: &ObjectShape,
        comparer: Option<&ComparerSpec>,
        core: bool,
    ) -> Result<Arc<dyn Converter>, Error> {
        if core {
            return self.construct_object(id, shape, object, comparer);
        }

        let base = self.resolve(id, comparer, true)?;
        let framed = match self.options.union_registration(&shape.name) {
            Some(UnionRegistration::Replace { cases, .. })
            | Some(UnionRegistration::Extend { cases, .. }) => {
                self.frame_union(shape, id, base, cases, None, false)?
            }
            Some(UnionRegistration::Disable { .. }) | None => base,
        };
        Ok(self.maybe_reference(framed))
    }

    fn build_union(
        &self,
        _id: ShapeId,
        shape: &Shape,
        union: &UnionShape,
        core: bool,
    ) -> Result<Arc<dyn Converter>, Error> {
        let cases: Vec<(Alias, ShapeId)> = match self.options.union_registration(&shape.name) {
            Some(UnionRegistration::Disable { .. }) => {
                // Runtime-disabled: the base converter is used directly,
                // without union framing.
                let base = self.resolve(union.base, None, true)?;
                return Ok(if core { base } else { self.maybe_reference(base) });
            }
            Some(UnionRegistration::Replace { cases, .. }) => cases.clone(),
            Some(UnionRegistration::Extend { cases, .. }) => union
                .cases
                .iter()
                .map(|c| (c.alias.clone(), c.shape))
                .chain(cases.iter().cloned())
                .collect(),
            None => union.cases.iter().map(|c| (c.alias.clone(), c.shape)).collect(),
        };

        let base = self.resolve(union.base, None, true)?;
        let framed = self.frame_union(
            shape,
            union.base,
            base,
            &cases,
            union.probe.clone(),
            union.duck_typed,
        )?;
        Ok(if core {
            framed
        } else {
            self.maybe_reference(framed)
        })
    }

    fn frame_union(
        &self,
        shape: &Shape,
        base_shape: ShapeId,
        base: Arc<dyn Converter>,
        cases: &[(Alias, ShapeId)],
        probe: Option<Arc<shape::CaseProbe>>,
        duck_typed: bool,
    ) -> Result<Arc<dyn Converter>, Error> {
        // Alias uniqueness across all declared cases.
        if let Some(alias) = cases.iter().map(|(alias, _)| alias).duplicates().next() {
            return Err(ConfigError::DuplicateAlias {
                base: shape.name.clone(),
                alias: alias.to_string(),
            }
            .into());
        }

        let mut plans = Vec::with_capacity(cases.len());
        let mut by_int = FxHashMap::default();
        let mut by_str = FxHashMap::default();
        for (at, (alias, case_shape)) in cases.iter().enumerate() {
            let case_name = self.shape(*case_shape)?.name.clone();
            let required_keys = if duck_typed {
                self.required_wire_names(*case_shape)?
            } else {
                Vec::new()
            };
            match alias {
                Alias::Int(value) => {
                    by_int.insert(*value, at);
                }
                Alias::Str(value) => {
                    by_str.insert(value.clone(), at);
                }
            }
            plans.push(CasePlan {
                alias: alias.clone(),
                shape: *case_shape,
                name: case_name,
                converter: self.resolve(*case_shape, None, true)?,
                required_keys,
            });
        }

        if duck_typed {
            for pair in plans.iter().combinations(2) {
                let (left, right) = (pair[0], pair[1]);
                let mut a = left.required_keys.clone();
                let mut b = right.required_keys.clone();
                a.sort();
                b.sort();
                if a == b {
                    return Err(ConfigError::AmbiguousDuckCases {
                        base: shape.name.clone(),
                        first: left.name.clone(),
                        second: right.name.clone(),
                    }
                    .into());
                }
            }
        }

        Ok(Arc::new(UnionConverter {
            type_name: shape.name.clone(),
            base_shape,
            base,
            cases: plans,
            by_int,
            by_str,
            probe,
            use_objects: self.options.use_discriminator_objects,
            duck_typed,
        }))
    }

    // The wire names of an object's required properties, for duck-typed
    // case matching.
    fn required_wire_names(&self, id: ShapeId) -> Result<Vec<String>, Error> {
        let shape = self.shape(id)?;
        let ShapeKind::Object(object) = &shape.kind else {
            return Ok(Vec::new());
        };
        let params = object
            .constructor
            .as_ref()
            .map(|c| c.parameters.as_slice())
            .unwrap_or(&[]);
        Ok(object
            .properties
            .iter()
            .filter(|p| !p.unused_data_bucket)
            .filter(|p| {
                p.required
                    || match_parameter(params, &p.name).map(|m| m.required).unwrap_or(false)
            })
            .map(|p| self.wire_name(p))
            .collect())
    }

    fn wire_name(&self, property: &shape::Property) -> String {
        if let Some(explicit) = &property.wire_name {
            return explicit.clone();
        }
        match &self.options.property_naming_policy {
            Some(policy) => policy(&property.name),
            None => property.name.clone(),
        }
    }

    fn construct_object(
        &self,
        id: ShapeId,
        shape: &Shape,
        object: &ObjectShape,
        comparer: Option<&ComparerSpec>,
    ) -> Result<Arc<dyn Converter>, Error> {
        let width = object.properties.len();

        let buckets: Vec<usize> = object
            .properties
            .iter()
            .positions(|p| p.unused_data_bucket)
            .collect();
        if buckets.len() > 1 {
            return Err(ConfigError::MultipleUnusedBuckets {
                type_name: shape.name.clone(),
            }
            .into());
        }
        let bucket_slot = buckets.first().copied();

        let declared: Vec<(usize, &shape::Property)> = object
            .properties
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.unused_data_bucket)
            .collect();

        let keyed = declared.iter().filter(|(_, p)| p.key_index.is_some()).count();
        if keyed > 0 && keyed < declared.len() {
            return Err(ConfigError::MixedKeyIndexes {
                type_name: shape.name.clone(),
            }
            .into());
        }

        let params = object
            .constructor
            .as_ref()
            .map(|c| c.parameters.as_slice())
            .unwrap_or(&[]);

        let mut plans: Vec<PropertyPlan> = Vec::with_capacity(declared.len());
        for (slot, property) in &declared {
            let parameter = match_parameter(params, &property.name);

            let converter = if let Some(name) = &property.converter {
                self.named_converter(name)?
            } else {
                self.resolve(property.shape, property.comparer.as_ref(), false)?
            };

            let required = property.required || parameter.map(|p| p.required).unwrap_or(false);
            let non_nullable =
                property.non_nullable || parameter.map(|p| p.non_nullable).unwrap_or(false);

            // Effective default: the constructor's declared default wins,
            // then the attribute default, then the type default.
            let default = parameter
                .and_then(|p| p.default.clone())
                .or_else(|| property.default.clone())
                .or_else(|| self.type_default(property.shape));

            let policy = self.options.serialize_default_values;
            let always = policy.contains(SerializeDefaults::ALWAYS)
                || (required && policy.contains(SerializeDefaults::REQUIRED))
                || if self.is_value_like(property.shape) {
                    policy.contains(SerializeDefaults::VALUE_TYPES)
                } else {
                    policy.contains(SerializeDefaults::REFERENCE_TYPES)
                };
            let emit = if always {
                Emit::Always
            } else {
                Emit::WhenChanged(default.clone())
            };

            let wire_name = self.wire_name(property);
            let mut key_writer = Writer::new();
            key_writer.write_str(&wire_name);

            plans.push(PropertyPlan {
                name: property.name.clone(),
                key: key_writer.into_vec().into_boxed_slice(),
                wire_name,
                slot: *slot,
                converter,
                emit,
                readable: property.has_getter,
                writable: property.has_setter || parameter.is_some(),
                required,
                non_nullable,
                default,
                should: property.should_serialize.clone(),
            });
        }

        if let Some(duplicate) = plans.iter().map(|p| &p.wire_name).duplicates().next() {
            return Err(ConfigError::DuplicateWireName {
                type_name: shape.name.clone(),
                wire_name: duplicate.clone(),
            }
            .into());
        }

        let allow_null = self
            .options
            .deserialize_default_values
            .contains(DeserializeDefaults::ALLOW_NULL_FOR_NON_NULLABLE);
        let allow_missing_required = self
            .options
            .deserialize_default_values
            .contains(DeserializeDefaults::ALLOW_MISSING_REQUIRED);

        let array_form = !self.options.ignore_key_attributes
            && (keyed > 0 || self.options.perf_over_schema_stability);

        if array_form {
            // Explicit key indexes place properties; without them (the
            // perf-over-stability path) declaration order does.
            let mut slots: Vec<Option<usize>> = Vec::new();
            for (at, (_, property)) in declared.iter().enumerate() {
                let index = property.key_index.map(|i| i as usize).unwrap_or(at);
                if slots.len() <= index {
                    slots.resize(index + 1, None);
                }
                if slots[index].is_some() {
                    return Err(ConfigError::DuplicateKeyIndex {
                        type_name: shape.name.clone(),
                        index: index as u32,
                    }
                    .into());
                }
                slots[index] = Some(at);
            }
            Ok(Arc::new(ArrayObjectConverter {
                shape: id,
                type_name: shape.name.clone(),
                width,
                plans,
                slots,
                allow_null,
                allow_missing_required,
            }))
        } else {
            let by_key = plans
                .iter()
                .enumerate()
                .map(|(at, plan)| (plan.wire_name.as_bytes().to_vec().into_boxed_slice(), at))
                .collect();
            Ok(Arc::new(MapObjectConverter {
                shape: id,
                type_name: shape.name.clone(),
                width,
                plans,
                by_key,
                bucket_slot,
                allow_null,
                allow_missing_required,
            }))
        }
    }

    fn build_enum(&self, shape: &Shape, members: &EnumShape) -> Result<Arc<dyn Converter>, Error> {
        let mut by_value = FxHashMap::default();
        let mut by_name = FxHashMap::default();
        let mut by_lower = FxHashMap::default();
        let mut case_distinguished = false;

        for (at, member) in members.members.iter().enumerate() {
            by_value.entry(member.value).or_insert(at);
            by_name.insert(member.name.clone(), at);
            if by_lower.insert(member.name.to_lowercase(), at).is_some() {
                // Members distinguished by case alone: exact matching only.
                case_distinguished = true;
            }
        }

        Ok(Arc::new(EnumConverter {
            type_name: shape.name.clone(),
            members: members.members.clone(),
            by_value,
            by_name,
            by_lower: (!case_distinguished).then_some(by_lower),
            by_name_mode: self.options.serialize_enum_values_by_name,
        }))
    }

    fn build_sequence(
        &self,
        shape: &Shape,
        sequence: &SequenceShape,
    ) -> Result<Arc<dyn Converter>, Error> {
        let element = self.resolve(sequence.element, None, false)?;

        // Width-specialized paths apply only to check-free element kinds.
        let fast = if self.options.disable_hardware_acceleration || sequence.rank > 1 {
            None
        } else {
            match &self.shape(sequence.element)?.kind {
                ShapeKind::Scalar(Scalar::U64) => Some(FastKind::Unsigned),
                ShapeKind::Scalar(Scalar::I64) => Some(FastKind::Signed),
                ShapeKind::Scalar(Scalar::F32) => Some(FastKind::F32),
                ShapeKind::Scalar(Scalar::F64) => Some(FastKind::F64),
                _ => None,
            }
        };

        Ok(Arc::new(SequenceConverter {
            type_name: shape.name.clone(),
            element,
            rank: sequence.rank.max(1),
            construction: sequence.construction,
            layout: self.options.multi_dimensional_array_format,
            fast,
        }))
    }

    fn build_dictionary(
        &self,
        shape: &Shape,
        dictionary: &DictionaryShape,
        comparer: Option<&ComparerSpec>,
    ) -> Result<Arc<dyn Converter>, Error> {
        self.check_key_shape(shape, dictionary.key)?;

        let comparer: Arc<dyn Comparer> = match &self.options.comparer_provider {
            Some(provider) => provider(comparer),
            None => Arc::new(DefaultComparer),
        };

        Ok(Arc::new(DictionaryConverter {
            type_name: shape.name.clone(),
            key: self.resolve(dictionary.key, None, false)?,
            value: self.resolve(dictionary.value, None, false)?,
            construction: dictionary.construction,
            comparer,
        }))
    }

    // Dictionary keys must carry scalar-like wire identity.
    fn check_key_shape(&self, dictionary: &Shape, key: ShapeId) -> Result<(), Error> {
        let key_shape = self.shape(key)?;
        match &key_shape.kind {
            ShapeKind::Scalar(_) | ShapeKind::Enum(_) => Ok(()),
            ShapeKind::Surrogate(surrogate) => self.check_key_shape(dictionary, surrogate.surrogate),
            _ => Err(ConfigError::ObjectKeyedDictionary {
                type_name: dictionary.name.clone(),
                key_type: key_shape.name.clone(),
            }
            .into()),
        }
    }

    fn build_surrogate(
        &self,
        shape: &Shape,
        surrogate: &SurrogateShape,
    ) -> Result<Arc<dyn Converter>, Error> {
        if self.options.union_registration(&shape.name).is_some() {
            tracing::warn!(
                type_name = %shape.name,
                "union declarations on a surrogated type are ignored; declare the union on the surrogate instead",
            );
        }
        Ok(Arc::new(SurrogateConverter {
            inner: self.resolve(surrogate.surrogate, None, false)?,
            marshal: surrogate.marshal.clone(),
            unmarshal: surrogate.unmarshal.clone(),
        }))
    }

    fn is_value_like(&self, id: ShapeId) -> bool {
        match self.provider.get(id).map(|s| &s.kind) {
            Some(ShapeKind::Scalar(scalar)) => scalar.is_value_like(),
            Some(ShapeKind::Enum(_)) => true,
            Some(ShapeKind::Optional(inner)) => self.is_value_like(*inner),
            Some(ShapeKind::Surrogate(surrogate)) => self.is_value_like(surrogate.surrogate),
            _ => false,
        }
    }

    fn type_default(&self, id: ShapeId) -> Option<Value> {
        let shape = self.provider.get(id)?;
        match &shape.kind {
            ShapeKind::Scalar(scalar) => match scalar {
                Scalar::Bool => Some(Value::Bool(false)),
                Scalar::I8 | Scalar::I16 | Scalar::I32 | Scalar::I64 => Some(Value::Signed(0)),
                Scalar::U8 | Scalar::U16 | Scalar::U32 | Scalar::U64 => Some(Value::Unsigned(0)),
                Scalar::I128 => Some(Value::I128(0)),
                Scalar::U128 => Some(Value::U128(0)),
                Scalar::BigInt => Some(Value::BigInt(num_bigint::BigInt::from(0))),
                Scalar::F16 | Scalar::F32 | Scalar::F64 => Some(Value::Float(0.0)),
                Scalar::Decimal => Some(Value::Decimal(bigdecimal::BigDecimal::from(0))),
                Scalar::Duration => Some(Value::Duration(time::Duration::ZERO)),
                Scalar::Rune | Scalar::Char => Some(Value::Char('\0')),
                Scalar::Uuid => Some(Value::Uuid(uuid::Uuid::nil())),
                Scalar::Str | Scalar::Version | Scalar::Uri | Scalar::Bytes | Scalar::Raw => {
                    Some(Value::Nil)
                }
                Scalar::Timestamp | Scalar::Date | Scalar::Time | Scalar::Color | Scalar::Point => {
                    None
                }
            },
            ShapeKind::Enum(_) => Some(Value::Signed(0)),
            ShapeKind::Function => None,
            _ => Some(Value::Nil),
        }
    }
}

// Pair a property with its constructor parameter: exact name first, then a
// unique case-insensitive match; an ambiguous case-only collision matches
// nothing.
fn match_parameter<'p>(parameters: &'p [Parameter], name: &str) -> Option<&'p Parameter> {
    if let Some(exact) = parameters.iter().find(|p| p.name == name) {
        return Some(exact);
    }
    let mut relaxed = parameters.iter().filter(|p| p.name.eq_ignore_ascii_case(name));
    match (relaxed.next(), relaxed.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}
