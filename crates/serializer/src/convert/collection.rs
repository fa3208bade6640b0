use super::{AsyncSource, Comparer, Converter};
use crate::context::{ReadCx, WriteCx};
use crate::error::{Error, Segment};
use crate::options::MultiDimFormat;
use fxhash::FxHashMap;
use msgpack::{Reader, Writer};
use serde_json::json;
use shape::{Construction, Value};
use std::sync::Arc;

/// Width-specialized element kinds eligible for the primitive fast paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FastKind {
    Unsigned,
    Signed,
    F32,
    F64,
}

/// SequenceConverter covers rank-1 enumerables and multi-dimensional
/// rectangular arrays (nested or flat wire layouts).
pub(crate) struct SequenceConverter {
    pub type_name: String,
    pub element: Arc<dyn Converter>,
    pub rank: u32,
    pub construction: Construction,
    pub layout: MultiDimFormat,
    /// Set when the element is a fixed-width primitive and hardware
    /// acceleration is not disabled.
    pub fast: Option<FastKind>,
}

impl SequenceConverter {
    fn expect_sequence<'v>(&self, value: &'v Value) -> Result<&'v [Value], Error> {
        match value {
            Value::Sequence(items) => Ok(items),
            other => Err(Error::invalid(format!(
                "expected a {} sequence, found {}",
                self.type_name,
                other.kind_name()
            ))),
        }
    }

    // The fast paths collect a typed run and hand it to the writer's
    // width-specialized loop. A mixed-variant sequence falls back to the
    // general element loop.
    fn try_fast_write(&self, w: &mut Writer, items: &[Value]) -> bool {
        match self.fast {
            Some(FastKind::Unsigned) => {
                let run: Option<Vec<u64>> = items
                    .iter()
                    .map(|v| match v {
                        Value::Unsigned(v) => Some(*v),
                        _ => None,
                    })
                    .collect();
                run.map(|run| w.write_uint_slice(&run)).is_some()
            }
            Some(FastKind::Signed) => {
                let run: Option<Vec<i64>> = items
                    .iter()
                    .map(|v| match v {
                        Value::Signed(v) => Some(*v),
                        _ => None,
                    })
                    .collect();
                run.map(|run| w.write_int_slice(&run)).is_some()
            }
            Some(FastKind::F32) => {
                let run: Option<Vec<f32>> = items
                    .iter()
                    .map(|v| match v {
                        Value::Float(v) => Some(*v as f32),
                        _ => None,
                    })
                    .collect();
                run.map(|run| w.write_f32_slice(&run)).is_some()
            }
            Some(FastKind::F64) => {
                let run: Option<Vec<f64>> = items
                    .iter()
                    .map(|v| match v {
                        Value::Float(v) => Some(*v),
                        _ => None,
                    })
                    .collect();
                run.map(|run| w.write_f64_slice(&run)).is_some()
            }
            None => false,
        }
    }

    fn write_rank_one(&self, w: &mut Writer, items: &[Value], cx: &mut WriteCx) -> Result<(), Error> {
        if self.try_fast_write(w, items) {
            return Ok(());
        }
        w.write_array_header(items.len());
        for (index, item) in items.iter().enumerate() {
            cx.descend()?;
            self.element
                .write(w, item, cx)
                .map_err(|e| e.at(Segment::Index(index)))?;
            cx.ascend();
        }
        Ok(())
    }

    fn write_nested(
        &self,
        w: &mut Writer,
        items: &[Value],
        level: u32,
        cx: &mut WriteCx,
    ) -> Result<(), Error> {
        if level == 1 {
            return self.write_rank_one(w, items, cx);
        }
        w.write_array_header(items.len());
        for (index, item) in items.iter().enumerate() {
            let inner = self
                .expect_sequence(item)
                .map_err(|e| e.at(Segment::Index(index)))?;
            cx.descend()?;
            self.write_nested(w, inner, level - 1, cx)
                .map_err(|e| e.at(Segment::Index(index)))?;
            cx.ascend();
        }
        Ok(())
    }

    // Flat layout: one array holding a prelude of per-rank lengths, then
    // every element in row-major order.
    fn write_flat(&self, w: &mut Writer, items: &[Value], cx: &mut WriteCx) -> Result<(), Error> {
        let mut dims: Vec<usize> = Vec::with_capacity(self.rank as usize);
        collect_dims(items, self.rank, &mut dims)?;

        let total: usize = dims.iter().product();
        w.write_array_header(self.rank as usize + total);
        for dim in &dims {
            w.write_uint(*dim as u64);
        }
        self.write_flat_elements(w, items, self.rank, &dims, cx)
    }

    fn write_flat_elements(
        &self,
        w: &mut Writer,
        items: &[Value],
        level: u32,
        dims: &[usize],
        cx: &mut WriteCx,
    ) -> Result<(), Error> {
        let expected = dims[dims.len() - level as usize];
        if items.len() != expected {
            return Err(Error::invalid(format!(
                "{} is ragged: expected {expected} elements, found {}",
                self.type_name,
                items.len()
            )));
        }
        for (index, item) in items.iter().enumerate() {
            if level == 1 {
                cx.descend()?;
                self.element
                    .write(w, item, cx)
                    .map_err(|e| e.at(Segment::Index(index)))?;
                cx.ascend();
            } else {
                let inner = self
                    .expect_sequence(item)
                    .map_err(|e| e.at(Segment::Index(index)))?;
                self.write_flat_elements(w, inner, level - 1, dims, cx)
                    .map_err(|e| e.at(Segment::Index(index)))?;
            }
        }
        Ok(())
    }

    fn check_constructible(&self) -> Result<(), Error> {
        if self.construction == Construction::None {
            return Err(Error::unsupported(format!(
                "{} is declared serialize-only",
                self.type_name
            )));
        }
        Ok(())
    }

    fn read_rank_one(&self, r: &mut Reader<'_>, cx: &mut ReadCx) -> Result<Vec<Value>, Error> {
        let len = r.read_array_header()?;
        let mut items = match self.construction {
            // A parameterized constructor receives the whole run at once.
            Construction::Parameterized => Vec::with_capacity(len.min(4096)),
            _ => Vec::new(),
        };
        for index in 0..len {
            cx.descend()?;
            let item = self
                .element
                .read(r, cx)
                .map_err(|e| e.at(Segment::Index(index)))?;
            cx.ascend();
            items.push(item);
        }
        Ok(items)
    }

    fn read_nested(
        &self,
        r: &mut Reader<'_>,
        level: u32,
        cx: &mut ReadCx,
    ) -> Result<Vec<Value>, Error> {
        if level == 1 {
            return self.read_rank_one(r, cx);
        }
        let len = r.read_array_header()?;
        let mut items = Vec::with_capacity(len.min(4096));
        for index in 0..len {
            cx.descend()?;
            let inner = self
                .read_nested(r, level - 1, cx)
                .map_err(|e| e.at(Segment::Index(index)))?;
            cx.ascend();
            items.push(Value::Sequence(inner));
        }
        Ok(items)
    }

    fn read_flat(&self, r: &mut Reader<'_>, cx: &mut ReadCx) -> Result<Vec<Value>, Error> {
        let len = r.read_array_header()?;
        let rank = self.rank as usize;
        if len < rank {
            return Err(Error::invalid(format!(
                "{} is missing its length prelude",
                self.type_name
            )));
        }
        let mut dims = Vec::with_capacity(rank);
        for _ in 0..rank {
            dims.push(r.read_uint()? as usize);
        }
        let total: usize = dims.iter().product();
        if len != rank + total {
            return Err(Error::invalid(format!(
                "{}: header declares {len} slots but the prelude implies {}",
                self.type_name,
                rank + total
            )));
        }

        let mut flat = Vec::with_capacity(total.min(4096));
        for index in 0..total {
            cx.descend()?;
            let item = self
                .element
                .read(r, cx)
                .map_err(|e| e.at(Segment::Index(index)))?;
            cx.ascend();
            flat.push(item);
        }
        Ok(regroup(flat, &dims))
    }
}

// Row-major regrouping of a flat element run into nested sequences.
fn regroup(flat: Vec<Value>, dims: &[usize]) -> Vec<Value> {
    if dims.len() <= 1 {
        return flat;
    }
    let inner_total: usize = dims[1..].iter().product();
    flat.chunks(inner_total.max(1))
        .map(|chunk| {
            let inner = regroup(chunk.to_vec(), &dims[1..]);
            Value::Sequence(inner)
        })
        .collect()
}

fn collect_dims(items: &[Value], rank: u32, dims: &mut Vec<usize>) -> Result<(), Error> {
    dims.push(items.len());
    if rank > 1 {
        match items.first() {
            Some(Value::Sequence(inner)) => collect_dims(inner, rank - 1, dims)?,
            Some(other) => {
                return Err(Error::invalid(format!(
                    "expected a nested sequence, found {}",
                    other.kind_name()
                )))
            }
            // An empty outer dimension: remaining dims are zero.
            None => dims.extend(std::iter::repeat(0).take(rank as usize - 1)),
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl Converter for SequenceConverter {
    fn write(&self, w: &mut Writer, value: &Value, cx: &mut WriteCx) -> Result<(), Error> {
        let items = self.expect_sequence(value)?;
        if self.rank <= 1 {
            self.write_rank_one(w, items, cx)
        } else {
            match self.layout {
                MultiDimFormat::Nested => self.write_nested(w, items, self.rank, cx),
                MultiDimFormat::Flat => self.write_flat(w, items, cx),
            }
        }
    }

    fn read(&self, r: &mut Reader<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        self.check_constructible()?;
        let items = if self.rank <= 1 {
            self.read_rank_one(r, cx)?
        } else {
            match self.layout {
                MultiDimFormat::Nested => self.read_nested(r, self.rank, cx)?,
                MultiDimFormat::Flat => self.read_flat(r, cx)?,
            }
        };
        Ok(Value::Sequence(items))
    }

    async fn write_to(
        &self,
        sink: &mut super::AsyncSink<'_>,
        value: &Value,
        cx: &mut WriteCx,
    ) -> Result<(), Error> {
        let items = self.expect_sequence(value)?;

        // Multi-dimensional and fast-path writes buffer whole, then flush.
        if self.rank > 1 || self.try_fast_write(sink.writer(), items) {
            if self.rank > 1 {
                self.write(sink.writer(), value, cx)?;
            }
            return sink.maybe_flush().await;
        }

        sink.writer().write_array_header(items.len());
        for (index, item) in items.iter().enumerate() {
            cx.descend()?;
            self.element
                .write_to(sink, item, cx)
                .await
                .map_err(|e| e.at(Segment::Index(index)))?;
            cx.ascend();
        }
        sink.maybe_flush().await
    }

    async fn read_from(&self, src: &mut AsyncSource<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        self.check_constructible()?;
        if self.rank > 1 {
            // Multi-dimensional payloads are modest; buffer and reuse the
            // sync path.
            let raw = src.buffer_value().await?;
            let mut r = Reader::new(&raw);
            return self.read(&mut r, cx);
        }

        let len = src.read_array_header().await?;
        let mut items = Vec::with_capacity(len.min(4096));
        for index in 0..len {
            cx.descend()?;
            let item = self
                .element
                .read_from(src, cx)
                .await
                .map_err(|e| e.at(Segment::Index(index)))?;
            cx.ascend();
            items.push(item);
        }
        Ok(Value::Sequence(items))
    }

    fn prefer_async(&self) -> bool {
        true
    }

    fn schema(&self) -> serde_json::Value {
        let mut schema = json!({
            "type": "array",
            "items": self.element.schema(),
        });
        for _ in 1..self.rank {
            schema = json!({"type": "array", "items": schema});
        }
        schema
    }
}

/// DictionaryConverter writes keyed containers as maps and rejects
/// duplicate keys on read, using the configured comparer for key equality.
pub(crate) struct DictionaryConverter {
    pub type_name: String,
    pub key: Arc<dyn Converter>,
    pub value: Arc<dyn Converter>,
    pub construction: Construction,
    pub comparer: Arc<dyn Comparer>,
}

impl DictionaryConverter {
    fn key_label(key: &Value) -> String {
        match key {
            Value::Str(text) => text.to_string(),
            Value::Signed(v) => v.to_string(),
            Value::Unsigned(v) => v.to_string(),
            other => other.kind_name().to_owned(),
        }
    }

    fn push_checked(
        &self,
        entries: &mut Vec<(Value, Value)>,
        buckets: &mut FxHashMap<u64, Vec<usize>>,
        key: Value,
        value: Value,
    ) -> Result<(), Error> {
        let hash = self.comparer.hash(&key);
        let bucket = buckets.entry(hash).or_default();
        for &at in bucket.iter() {
            if self.comparer.eq(&entries[at].0, &key) {
                return Err(Error::invalid(format!(
                    "duplicate key {} in {}",
                    Self::key_label(&key),
                    self.type_name
                )));
            }
        }
        bucket.push(entries.len());
        entries.push((key, value));
        Ok(())
    }
}

#[async_trait::async_trait]
impl Converter for DictionaryConverter {
    fn write(&self, w: &mut Writer, value: &Value, cx: &mut WriteCx) -> Result<(), Error> {
        let entries = match value {
            Value::Map(entries) => entries,
            other => {
                return Err(Error::invalid(format!(
                    "expected a {} map, found {}",
                    self.type_name,
                    other.kind_name()
                )))
            }
        };
        w.write_map_header(entries.len());
        for (key, entry) in entries {
            cx.descend()?;
            self.key
                .write(w, key, cx)
                .map_err(|e| e.at(Segment::Key(Self::key_label(key))))?;
            self.value
                .write(w, entry, cx)
                .map_err(|e| e.at(Segment::Key(Self::key_label(key))))?;
            cx.ascend();
        }
        Ok(())
    }

    fn read(&self, r: &mut Reader<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        if self.construction == Construction::None {
            return Err(Error::unsupported(format!(
                "{} is declared serialize-only",
                self.type_name
            )));
        }
        let len = r.read_map_header()?;
        let mut entries: Vec<(Value, Value)> = Vec::new();
        let mut buckets: FxHashMap<u64, Vec<usize>> = FxHashMap::default();
        for index in 0..len {
            cx.descend()?;
            let key = self
                .key
                .read(r, cx)
                .map_err(|e| e.at(Segment::Index(index)))?;
            let value = self
                .value
                .read(r, cx)
                .map_err(|e| e.at(Segment::Key(Self::key_label(&key))))?;
            cx.ascend();
            self.push_checked(&mut entries, &mut buckets, key, value)?;
        }
        Ok(Value::Map(entries))
    }

    async fn write_to(
        &self,
        sink: &mut super::AsyncSink<'_>,
        value: &Value,
        cx: &mut WriteCx,
    ) -> Result<(), Error> {
        let entries = match value {
            Value::Map(entries) => entries,
            other => {
                return Err(Error::invalid(format!(
                    "expected a {} map, found {}",
                    self.type_name,
                    other.kind_name()
                )))
            }
        };
        sink.writer().write_map_header(entries.len());
        for (key, entry) in entries {
            cx.descend()?;
            self.key
                .write(sink.writer(), key, cx)
                .map_err(|e| e.at(Segment::Key(Self::key_label(key))))?;
            self.value
                .write_to(sink, entry, cx)
                .await
                .map_err(|e| e.at(Segment::Key(Self::key_label(key))))?;
            cx.ascend();
        }
        sink.maybe_flush().await
    }

    async fn read_from(&self, src: &mut AsyncSource<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        if self.construction == Construction::None {
            return Err(Error::unsupported(format!(
                "{} is declared serialize-only",
                self.type_name
            )));
        }
        let len = src.read_map_header().await?;
        let mut entries: Vec<(Value, Value)> = Vec::new();
        let mut buckets: FxHashMap<u64, Vec<usize>> = FxHashMap::default();
        for index in 0..len {
            cx.descend()?;
            let key = self
                .key
                .read_from(src, cx)
                .await
                .map_err(|e| e.at(Segment::Index(index)))?;
            let value = self
                .value
                .read_from(src, cx)
                .await
                .map_err(|e| e.at(Segment::Key(Self::key_label(&key))))?;
            cx.ascend();
            self.push_checked(&mut entries, &mut buckets, key, value)?;
        }
        Ok(Value::Map(entries))
    }

    fn prefer_async(&self) -> bool {
        true
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "additionalProperties": self.value.schema(),
        })
    }
}
