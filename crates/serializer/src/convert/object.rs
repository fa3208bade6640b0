use super::{read_any, write_any, AsyncSource, Converter};
use crate::context::{ReadCx, WriteCx};
use crate::error::{Error, Segment};
use bitvec::prelude::*;
use fxhash::FxHashMap;
use msgpack::{Reader, TokenType, Writer};
use serde_json::json;
use shape::{Record, ShapeId, ShouldSerialize, Value};
use std::sync::Arc;

/// When a property's value is emitted.
pub(crate) enum Emit {
    Always,
    /// Emit only when the current value differs from the effective default.
    /// Properties with no comparable default always emit.
    WhenChanged(Option<Value>),
}

/// The per-property plan compiled by the builder: resolved wire name and
/// pre-encoded key token, record slot, sub-converter, and the policy
/// decisions baked for this configuration.
pub(crate) struct PropertyPlan {
    pub name: String,
    pub wire_name: String,
    /// The wire name, pre-encoded as a complete str token.
    pub key: Box<[u8]>,
    pub slot: usize,
    pub converter: Arc<dyn Converter>,
    pub emit: Emit,
    pub readable: bool,
    pub writable: bool,
    pub required: bool,
    pub non_nullable: bool,
    pub default: Option<Value>,
    pub should: Option<Arc<ShouldSerialize>>,
}

impl PropertyPlan {
    /// The value this plan would place on the wire, if any.
    fn current(&self, record: &Record) -> Value {
        record
            .get(self.slot)
            .or_else(|| self.default.clone())
            .unwrap_or(Value::Nil)
    }

    fn wants_emission(&self, current: &Value) -> bool {
        if let Some(should) = &self.should {
            if !should(current) {
                return false;
            }
        }
        match &self.emit {
            Emit::Always | Emit::WhenChanged(None) => true,
            Emit::WhenChanged(Some(default)) => current != default,
        }
    }
}

/// Tracks which properties one in-flight deserialization has assigned:
/// one bit per declared property, doubling as the constructor-argument
/// bitset.
pub(crate) struct ArgumentState {
    assigned: BitVec,
}

impl ArgumentState {
    fn new(width: usize) -> ArgumentState {
        ArgumentState {
            assigned: bitvec![0; width],
        }
    }

    /// Mark a property assigned; false if it already was.
    fn assign(&mut self, at: usize) -> bool {
        if self.assigned[at] {
            return false;
        }
        self.assigned.set(at, true);
        true
    }

    fn contains(&self, at: usize) -> bool {
        self.assigned[at]
    }
}

fn expect_record<'v>(value: &'v Value, type_name: &str) -> Result<&'v Arc<Record>, Error> {
    match value {
        Value::Record(record) => Ok(record),
        other => Err(Error::invalid(format!(
            "expected a {type_name} record, found {}",
            other.kind_name()
        ))),
    }
}

// Shared tail of both object layouts: verify required completeness, apply
// declared defaults to unset slots, and attach the unused-data bucket.
fn finish_record(
    plans: &[PropertyPlan],
    state: &ArgumentState,
    record: Arc<Record>,
    bucket: Option<(usize, Vec<(Value, Value)>)>,
    allow_missing_required: bool,
) -> Result<Value, Error> {
    let missing: Vec<String> = plans
        .iter()
        .enumerate()
        .filter(|(at, plan)| plan.required && !state.contains(*at))
        .map(|(_, plan)| plan.name.clone())
        .collect();
    if !missing.is_empty() && !allow_missing_required {
        return Err(Error::MissingRequired { names: missing });
    }

    for (at, plan) in plans.iter().enumerate() {
        if !state.contains(at) && plan.writable {
            if let Some(default) = &plan.default {
                record.set(plan.slot, default.clone());
            }
        }
    }

    if let Some((slot, entries)) = bucket {
        record.set(slot, Value::Map(entries));
    }

    Ok(Value::Record(record))
}

fn properties_schema(plans: &[PropertyPlan]) -> serde_json::Value {
    let properties: serde_json::Map<String, serde_json::Value> = plans
        .iter()
        .map(|plan| (plan.wire_name.clone(), plan.converter.schema()))
        .collect();
    let required: Vec<&str> = plans
        .iter()
        .filter(|plan| plan.required)
        .map(|plan| plan.wire_name.as_str())
        .collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Map-form object converter: `{wire-name: value}` entries for every
/// property which passes the emission policy, plus re-emitted unused-data
/// bucket entries. Unknown keys on the wire are captured by the bucket or
/// skipped structurally.
pub(crate) struct MapObjectConverter {
    pub shape: ShapeId,
    pub type_name: String,
    /// Record slot count, including the bucket slot.
    pub width: usize,
    pub plans: Vec<PropertyPlan>,
    /// Wire-name bytes to plan index.
    pub by_key: FxHashMap<Box<[u8]>, usize>,
    pub bucket_slot: Option<usize>,
    pub allow_null: bool,
    pub allow_missing_required: bool,
}

impl MapObjectConverter {
    // The emitted property set and bucket entries, computed up front so
    // the map header count is exact.
    fn emission_plan(
        &self,
        record: &Record,
    ) -> Result<(Vec<(usize, Value)>, Vec<(Value, Value)>), Error> {
        let mut emitted: Vec<(usize, Value)> = Vec::with_capacity(self.plans.len());
        for (at, plan) in self.plans.iter().enumerate() {
            if !plan.readable {
                continue;
            }
            let current = plan.current(record);
            if plan.wants_emission(&current) {
                emitted.push((at, current));
            }
        }
        let bucket = self.bucket_entries(record)?;
        Ok((emitted, bucket))
    }

    fn bucket_entries(&self, record: &Record) -> Result<Vec<(Value, Value)>, Error> {
        let Some(slot) = self.bucket_slot else {
            return Ok(Vec::new());
        };
        match record.get(slot) {
            None | Some(Value::Nil) => Ok(Vec::new()),
            Some(Value::Map(entries)) => Ok(entries),
            Some(other) => Err(Error::invalid(format!(
                "the unused-data bucket of {} must hold a map, found {}",
                self.type_name,
                other.kind_name()
            ))),
        }
    }
}

#[async_trait::async_trait]
impl Converter for MapObjectConverter {
    fn write(&self, w: &mut Writer, value: &Value, cx: &mut WriteCx) -> Result<(), Error> {
        let record = expect_record(value, &self.type_name)?;
        let (emitted, bucket) = self.emission_plan(record)?;

        w.write_map_header(emitted.len() + bucket.len());
        for (at, current) in &emitted {
            let plan = &self.plans[*at];
            w.write_raw(&plan.key);
            if current.is_nil() {
                w.write_nil();
                continue;
            }
            cx.descend()?;
            plan.converter
                .write(w, current, cx)
                .map_err(|e| e.at(Segment::Property(plan.name.clone())))?;
            cx.ascend();
        }
        for (key, entry) in &bucket {
            match key {
                Value::Str(text) => w.write_str(text),
                other => {
                    return Err(Error::invalid(format!(
                        "unused-data bucket keys must be strings, found {}",
                        other.kind_name()
                    )))
                }
            }
            write_any(w, entry, cx)?;
        }
        Ok(())
    }

    fn read(&self, r: &mut Reader<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        let entries = r.read_map_header()?;
        let record = Record::new(self.shape, self.width);
        if let Some(id) = cx.take_reservation() {
            cx.register_ref(id, Value::Record(record.clone()));
        }

        let mut state = ArgumentState::new(self.plans.len());
        let mut bucket: Vec<(Value, Value)> = Vec::new();

        for _ in 0..entries {
            let key = r.read_str()?;
            match self.by_key.get(key.as_bytes()) {
                Some(&at) => {
                    let plan = &self.plans[at];
                    if !state.assign(at) {
                        return Err(Error::DoubleAssignment {
                            name: plan.name.clone(),
                        });
                    }
                    if !plan.writable {
                        r.skip_value()?;
                        continue;
                    }
                    let value = if r.peek_type()? == TokenType::Nil {
                        r.read_nil()?;
                        if plan.non_nullable && !self.allow_null {
                            return Err(Error::DisallowedNull {
                                name: plan.name.clone(),
                            });
                        }
                        Value::Nil
                    } else {
                        cx.descend()?;
                        let value = plan
                            .converter
                            .read(r, cx)
                            .map_err(|e| e.at(Segment::Property(plan.name.clone())))?;
                        cx.ascend();
                        value
                    };
                    record.set(plan.slot, value);
                }
                None => {
                    if self.bucket_slot.is_some() {
                        let key = Value::str(key);
                        let value = read_any(r, cx)?;
                        bucket.push((key, value));
                    } else {
                        r.skip_value()?;
                    }
                }
            }
        }

        finish_record(
            &self.plans,
            &state,
            record,
            self.bucket_slot.map(|slot| (slot, bucket)),
            self.allow_missing_required,
        )
    }

    async fn write_to(
        &self,
        sink: &mut super::AsyncSink<'_>,
        value: &Value,
        cx: &mut WriteCx,
    ) -> Result<(), Error> {
        let record = expect_record(value, &self.type_name)?;
        let (emitted, bucket) = self.emission_plan(record)?;

        sink.writer().write_map_header(emitted.len() + bucket.len());
        for (at, current) in &emitted {
            let plan = &self.plans[*at];
            sink.writer().write_raw(&plan.key);
            if current.is_nil() {
                sink.writer().write_nil();
                continue;
            }
            cx.descend()?;
            plan.converter
                .write_to(sink, current, cx)
                .await
                .map_err(|e| e.at(Segment::Property(plan.name.clone())))?;
            cx.ascend();
        }
        for (key, entry) in &bucket {
            match key {
                Value::Str(text) => sink.writer().write_str(text),
                other => {
                    return Err(Error::invalid(format!(
                        "unused-data bucket keys must be strings, found {}",
                        other.kind_name()
                    )))
                }
            }
            write_any(sink.writer(), entry, cx)?;
        }
        sink.maybe_flush().await
    }

    async fn read_from(&self, src: &mut AsyncSource<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        let entries = src.read_map_header().await?;
        let record = Record::new(self.shape, self.width);
        if let Some(id) = cx.take_reservation() {
            cx.register_ref(id, Value::Record(record.clone()));
        }

        let mut state = ArgumentState::new(self.plans.len());
        let mut bucket: Vec<(Value, Value)> = Vec::new();

        for _ in 0..entries {
            let key = src.read_str().await?;
            match self.by_key.get(key.as_bytes()) {
                Some(&at) => {
                    let plan = &self.plans[at];
                    if !state.assign(at) {
                        return Err(Error::DoubleAssignment {
                            name: plan.name.clone(),
                        });
                    }
                    if !plan.writable {
                        src.skip_value().await?;
                        continue;
                    }
                    let value = if src.peek_type().await? == TokenType::Nil {
                        src.read_nil().await?;
                        if plan.non_nullable && !self.allow_null {
                            return Err(Error::DisallowedNull {
                                name: plan.name.clone(),
                            });
                        }
                        Value::Nil
                    } else {
                        cx.descend()?;
                        let value = plan
                            .converter
                            .read_from(src, cx)
                            .await
                            .map_err(|e| e.at(Segment::Property(plan.name.clone())))?;
                        cx.ascend();
                        value
                    };
                    record.set(plan.slot, value);
                }
                None => {
                    if self.bucket_slot.is_some() {
                        let raw = src.buffer_value().await?;
                        let mut r = Reader::new(&raw);
                        let value = read_any(&mut r, cx)?;
                        bucket.push((Value::str(&key), value));
                    } else {
                        src.skip_value().await?;
                    }
                }
            }
        }

        finish_record(
            &self.plans,
            &state,
            record,
            self.bucket_slot.map(|slot| (slot, bucket)),
            self.allow_missing_required,
        )
    }

    fn prefer_async(&self) -> bool {
        true
    }

    fn schema(&self) -> serde_json::Value {
        properties_schema(&self.plans)
    }
}

/// Array-form object converter: a positional array of `highest key index
/// plus one` slots, nil for holes. Only a trailing run of defaults may be
/// omitted, by shortening the header; interior defaults are emitted to
/// keep positions stable.
pub(crate) struct ArrayObjectConverter {
    pub shape: ShapeId,
    pub type_name: String,
    pub width: usize,
    pub plans: Vec<PropertyPlan>,
    /// Wire slot index to plan index; None marks a hole.
    pub slots: Vec<Option<usize>>,
    pub allow_null: bool,
    pub allow_missing_required: bool,
}

impl ArrayObjectConverter {
    // Per-slot values plus the emitted length after trimming the trailing
    // run of omittable defaults.
    fn layout(&self, record: &Record) -> (Vec<Option<Value>>, usize) {
        let values: Vec<Option<Value>> = self
            .slots
            .iter()
            .map(|slot| {
                slot.map(|at| {
                    let plan = &self.plans[at];
                    if plan.readable {
                        plan.current(record)
                    } else {
                        Value::Nil
                    }
                })
            })
            .collect();

        let mut len = self.slots.len();
        while len > 0 {
            let Some(at) = self.slots[len - 1] else { break };
            let Some(current) = &values[len - 1] else {
                break;
            };
            if self.plans[at].wants_emission(current) {
                break;
            }
            len -= 1;
        }
        (values, len)
    }
}

#[async_trait::async_trait]
impl Converter for ArrayObjectConverter {
    fn write(&self, w: &mut Writer, value: &Value, cx: &mut WriteCx) -> Result<(), Error> {
        let record = expect_record(value, &self.type_name)?;
        let (values, len) = self.layout(record);

        w.write_array_header(len);
        for (index, current) in values.iter().take(len).enumerate() {
            match (self.slots[index], current) {
                (Some(at), Some(current)) if !current.is_nil() => {
                    let plan = &self.plans[at];
                    cx.descend()?;
                    plan.converter
                        .write(w, current, cx)
                        .map_err(|e| e.at(Segment::Index(index)))?;
                    cx.ascend();
                }
                _ => w.write_nil(),
            }
        }
        Ok(())
    }

    fn read(&self, r: &mut Reader<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        let entries = r.read_array_header()?;
        let record = Record::new(self.shape, self.width);
        if let Some(id) = cx.take_reservation() {
            cx.register_ref(id, Value::Record(record.clone()));
        }

        let mut state = ArgumentState::new(self.plans.len());

        for index in 0..entries {
            match self.slots.get(index).copied().flatten() {
                Some(at) => {
                    let plan = &self.plans[at];
                    if !plan.writable {
                        r.skip_value()?;
                        continue;
                    }
                    state.assign(at);
                    let value = if r.peek_type()? == TokenType::Nil {
                        r.read_nil()?;
                        if plan.non_nullable && !self.allow_null {
                            return Err(Error::DisallowedNull {
                                name: plan.name.clone(),
                            });
                        }
                        Value::Nil
                    } else {
                        cx.descend()?;
                        let value = plan
                            .converter
                            .read(r, cx)
                            .map_err(|e| e.at(Segment::Index(index)))?;
                        cx.ascend();
                        value
                    };
                    record.set(plan.slot, value);
                }
                // Extra or hole slots are skipped structurally.
                None => r.skip_value()?,
            }
        }

        finish_record(&self.plans, &state, record, None, self.allow_missing_required)
    }

    async fn write_to(
        &self,
        sink: &mut super::AsyncSink<'_>,
        value: &Value,
        cx: &mut WriteCx,
    ) -> Result<(), Error> {
        let record = expect_record(value, &self.type_name)?;
        let (values, len) = self.layout(record);

        sink.writer().write_array_header(len);
        for (index, current) in values.iter().take(len).enumerate() {
            match (self.slots[index], current) {
                (Some(at), Some(current)) if !current.is_nil() => {
                    let plan = &self.plans[at];
                    cx.descend()?;
                    plan.converter
                        .write_to(sink, current, cx)
                        .await
                        .map_err(|e| e.at(Segment::Index(index)))?;
                    cx.ascend();
                }
                _ => sink.writer().write_nil(),
            }
        }
        sink.maybe_flush().await
    }

    async fn read_from(&self, src: &mut AsyncSource<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        let entries = src.read_array_header().await?;
        let record = Record::new(self.shape, self.width);
        if let Some(id) = cx.take_reservation() {
            cx.register_ref(id, Value::Record(record.clone()));
        }

        let mut state = ArgumentState::new(self.plans.len());

        for index in 0..entries {
            match self.slots.get(index).copied().flatten() {
                Some(at) => {
                    let plan = &self.plans[at];
                    if !plan.writable {
                        src.skip_value().await?;
                        continue;
                    }
                    state.assign(at);
                    let value = if src.peek_type().await? == TokenType::Nil {
                        src.read_nil().await?;
                        if plan.non_nullable && !self.allow_null {
                            return Err(Error::DisallowedNull {
                                name: plan.name.clone(),
                            });
                        }
                        Value::Nil
                    } else {
                        cx.descend()?;
                        let value = plan
                            .converter
                            .read_from(src, cx)
                            .await
                            .map_err(|e| e.at(Segment::Index(index)))?;
                        cx.ascend();
                        value
                    };
                    record.set(plan.slot, value);
                }
                None => src.skip_value().await?,
            }
        }

        finish_record(&self.plans, &state, record, None, self.allow_missing_required)
    }

    fn prefer_async(&self) -> bool {
        true
    }

    fn schema(&self) -> serde_json::Value {
        let items: Vec<serde_json::Value> = self
            .slots
            .iter()
            .map(|slot| match slot {
                Some(at) => self.plans[*at].converter.schema(),
                None => json!({"type": "null"}),
            })
            .collect();
        json!({
            "type": "array",
            "prefixItems": items,
        })
    }
}
