use crate::context::{ReadCx, WriteCx};
use crate::error::Error;
use bytes::Bytes;
use futures::io::{AsyncWrite, AsyncWriteExt};
use futures::stream::{BoxStream, StreamExt};
use msgpack::{Fetch, Reader, StreamReader, TokenType, Writer};
use shape::Value;
use std::io;
use tokio_util::sync::CancellationToken;

pub mod collection;
pub mod enums;
pub mod object;
pub mod scalar;
pub mod union;
pub mod wrap;

/// Converter is the runtime object which encodes and decodes one shape.
/// Converters compose recursively; composite converters hold `Arc`s of
/// their children and charge the context's depth budget when they recurse.
///
/// The async halves default to a buffer-then-run-sync strategy which
/// suspends (cooperatively, at the codec's needs-more-bytes points) until
/// one whole structure is available. Converters for composites override
/// them with truly incremental state machines and report `prefer_async`.
#[async_trait::async_trait]
pub trait Converter: Send + Sync {
    fn write(&self, w: &mut Writer, value: &Value, cx: &mut WriteCx) -> Result<(), Error>;

    fn read(&self, r: &mut Reader<'_>, cx: &mut ReadCx) -> Result<Value, Error>;

    async fn write_to(
        &self,
        sink: &mut AsyncSink<'_>,
        value: &Value,
        cx: &mut WriteCx,
    ) -> Result<(), Error> {
        self.write(sink.writer(), value, cx)?;
        sink.maybe_flush().await
    }

    async fn read_from(&self, src: &mut AsyncSource<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        let raw = src.buffer_value().await?;
        let mut r = Reader::new(&raw);
        self.read(&mut r, cx)
    }

    /// Whether this converter benefits from the incremental async path.
    fn prefer_async(&self) -> bool {
        false
    }

    /// The JSON-schema fragment describing this converter's wire shape.
    fn schema(&self) -> serde_json::Value;
}

// Drive one StreamReader try-read to completion, awaiting more bytes from
// the chunk stream whenever the codec reports a shortfall.
macro_rules! drive {
    ($src:ident . $try_fn:ident ()) => {
        loop {
            match $src.reader.$try_fn()? {
                Fetch::Ready(v) => break v,
                Fetch::More(_) => $src.fill().await?,
            }
        }
    };
}

/// AsyncSource adapts a stream of byte chunks into suspension-capable
/// codec reads. Each primitive read either completes against the buffered
/// window or awaits the next chunk; cancellation is checked before every
/// await.
pub struct AsyncSource<'s> {
    reader: StreamReader,
    chunks: BoxStream<'s, io::Result<Bytes>>,
    exhausted: bool,
    cancel: CancellationToken,
}

impl<'s> AsyncSource<'s> {
    pub fn new<S>(chunks: S, cancel: CancellationToken) -> AsyncSource<'s>
    where
        S: futures::Stream<Item = io::Result<Bytes>> + Send + 's,
    {
        AsyncSource {
            reader: StreamReader::new(),
            chunks: chunks.boxed(),
            exhausted: false,
            cancel,
        }
    }

    /// Pull chunks until the source ends (returns true) or more than
    /// `budget` bytes are buffered (returns false). Used by the facade to
    /// choose between the buffered fast path and incremental decoding.
    pub async fn probe(&mut self, budget: usize) -> Result<bool, Error> {
        while !self.exhausted {
            if self.reader.remaining() > budget {
                return Ok(false);
            }
            self.pull().await?;
        }
        Ok(true)
    }

    /// The buffered window. Valid as a complete payload only after `probe`
    /// reported the source exhausted.
    pub fn buffered(&self) -> &[u8] {
        self.reader.as_slice()
    }

    async fn pull(&mut self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.chunks.next().await {
            Some(Ok(chunk)) => {
                self.reader.feed(&chunk);
                Ok(())
            }
            Some(Err(err)) => Err(Error::Io(err)),
            None => {
                self.exhausted = true;
                Ok(())
            }
        }
    }

    async fn fill(&mut self) -> Result<(), Error> {
        if self.exhausted {
            return Err(Error::Codec(msgpack::Error::Truncated));
        }
        self.pull().await
    }

    pub async fn peek_type(&mut self) -> Result<TokenType, Error> {
        Ok(drive!(self.try_peek_type()))
    }

    pub async fn peek_ext_code(&mut self) -> Result<Option<i8>, Error> {
        Ok(drive!(self.try_peek_ext_code()))
    }

    pub async fn read_nil(&mut self) -> Result<(), Error> {
        Ok(drive!(self.try_read_nil()))
    }

    pub async fn read_bool(&mut self) -> Result<bool, Error> {
        Ok(drive!(self.try_read_bool()))
    }

    pub async fn read_int(&mut self) -> Result<i64, Error> {
        Ok(drive!(self.try_read_int()))
    }

    pub async fn read_uint(&mut self) -> Result<u64, Error> {
        Ok(drive!(self.try_read_uint()))
    }

    pub async fn read_f32(&mut self) -> Result<f32, Error> {
        Ok(drive!(self.try_read_f32()))
    }

    pub async fn read_f64(&mut self) -> Result<f64, Error> {
        Ok(drive!(self.try_read_f64()))
    }

    pub async fn read_str(&mut self) -> Result<String, Error> {
        Ok(drive!(self.try_read_str()))
    }

    pub async fn read_bin(&mut self) -> Result<Vec<u8>, Error> {
        Ok(drive!(self.try_read_bin()))
    }

    pub async fn read_array_header(&mut self) -> Result<usize, Error> {
        Ok(drive!(self.try_read_array_header()))
    }

    pub async fn read_map_header(&mut self) -> Result<usize, Error> {
        Ok(drive!(self.try_read_map_header()))
    }

    pub async fn read_ext(&mut self) -> Result<(i8, Vec<u8>), Error> {
        Ok(drive!(self.try_read_ext()))
    }

    pub async fn read_timestamp(&mut self) -> Result<(i64, u32), Error> {
        Ok(drive!(self.try_read_timestamp()))
    }

    pub async fn skip_value(&mut self) -> Result<(), Error> {
        Ok(drive!(self.try_skip_value()))
    }

    /// Buffer exactly one whole structure and return its raw bytes.
    pub async fn buffer_value(&mut self) -> Result<Vec<u8>, Error> {
        Ok(drive!(self.try_read_raw_value()))
    }

    /// Discard the consumed prefix of the buffered window.
    pub fn compact(&mut self) {
        self.reader.compact();
    }
}

/// AsyncSink pairs the token Writer with an async byte sink, draining the
/// buffer whenever it crosses the flush threshold. Cancellation is checked
/// before every await.
pub struct AsyncSink<'s> {
    writer: Writer,
    out: &'s mut (dyn AsyncWrite + Unpin + Send),
    threshold: usize,
    cancel: CancellationToken,
}

impl<'s> AsyncSink<'s> {
    pub fn new(
        out: &'s mut (dyn AsyncWrite + Unpin + Send),
        threshold: usize,
        cancel: CancellationToken,
    ) -> AsyncSink<'s> {
        AsyncSink {
            writer: Writer::new(),
            out,
            threshold,
            cancel,
        }
    }

    pub fn writer(&mut self) -> &mut Writer {
        &mut self.writer
    }

    /// Flush if buffered output has crossed the threshold.
    pub async fn maybe_flush(&mut self) -> Result<(), Error> {
        if self.writer.len() >= self.threshold {
            self.flush_all().await?;
        }
        Ok(())
    }

    pub async fn flush_all(&mut self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if !self.writer.is_empty() {
            let buffered = self.writer.drain();
            self.out.write_all(&buffered).await?;
        }
        Ok(())
    }
}

/// Best-effort dynamic read of one structure into the Value sum type,
/// used for unused-data buckets and untyped fallbacks.
pub fn read_any(r: &mut Reader<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
    match r.peek_type()? {
        TokenType::Nil => {
            r.read_nil()?;
            Ok(Value::Nil)
        }
        TokenType::Bool => Ok(Value::Bool(r.read_bool()?)),
        TokenType::Unsigned => Ok(Value::Unsigned(r.read_uint()?)),
        TokenType::Signed => Ok(Value::Signed(r.read_int()?)),
        TokenType::Float32 => Ok(Value::Float(r.read_f32()? as f64)),
        TokenType::Float64 => Ok(Value::Float(r.read_f64()?)),
        TokenType::Str => Ok(Value::Str(cx.make_str(r.read_str()?))),
        TokenType::Bin => Ok(Value::bytes(r.read_bin()?)),
        TokenType::Array => {
            let n = r.read_array_header()?;
            cx.descend()?;
            let mut items = Vec::with_capacity(n.min(64));
            for at in 0..n {
                items.push(read_any(r, cx).map_err(|e| e.at(crate::Segment::Index(at)))?);
            }
            cx.ascend();
            Ok(Value::Sequence(items))
        }
        TokenType::Map => {
            let n = r.read_map_header()?;
            cx.descend()?;
            let mut entries = Vec::with_capacity(n.min(64));
            for _ in 0..n {
                let key = read_any(r, cx)?;
                let value = read_any(r, cx)?;
                entries.push((key, value));
            }
            cx.ascend();
            Ok(Value::Map(entries))
        }
        TokenType::Ext => {
            let (code, payload) = r.read_ext()?;
            if code == -1 {
                let (seconds, nanos) = msgpack::decode_timestamp(payload)?;
                Ok(Value::Timestamp(scalar::timestamp_from_parts(
                    seconds, nanos,
                )?))
            } else {
                Ok(Value::Extension(code, payload.into()))
            }
        }
    }
}

/// Dynamic write of a Value produced by `read_any`. Typed variants with no
/// self-describing wire form are not writable dynamically.
pub fn write_any(w: &mut Writer, value: &Value, cx: &mut WriteCx) -> Result<(), Error> {
    match value {
        Value::Nil => w.write_nil(),
        Value::Bool(v) => w.write_bool(*v),
        Value::Signed(v) => w.write_int(*v),
        Value::Unsigned(v) => w.write_uint(*v),
        Value::Float(v) => w.write_f64(*v),
        Value::Char(v) => {
            let mut buf = [0u8; 4];
            w.write_str(v.encode_utf8(&mut buf));
        }
        Value::Str(v) => w.write_str(v),
        Value::Bytes(v) => w.write_bin(v),
        Value::Timestamp(v) => {
            let (seconds, nanos) = scalar::timestamp_parts(v);
            w.write_timestamp(seconds, nanos);
        }
        Value::Sequence(items) => {
            cx.descend()?;
            w.write_array_header(items.len());
            for (at, item) in items.iter().enumerate() {
                write_any(w, item, cx).map_err(|e| e.at(crate::Segment::Index(at)))?;
            }
            cx.ascend();
        }
        Value::Map(entries) => {
            cx.descend()?;
            w.write_map_header(entries.len());
            for (key, value) in entries {
                write_any(w, key, cx)?;
                write_any(w, value, cx)?;
            }
            cx.ascend();
        }
        Value::Extension(code, payload) => w.write_ext(*code, payload),
        other => {
            return Err(Error::unsupported(format!(
                "a {} value has no dynamic wire form",
                other.kind_name()
            )))
        }
    }
    Ok(())
}

/// Key equality and hashing for keyed containers.
pub trait Comparer: Send + Sync {
    fn eq(&self, a: &Value, b: &Value) -> bool;
    fn hash(&self, value: &Value) -> u64;
}

/// The platform-default comparer: structural equality with an fxhash over
/// a variant-tagged canonical form.
pub struct DefaultComparer;

impl Comparer for DefaultComparer {
    fn eq(&self, a: &Value, b: &Value) -> bool {
        a == b
    }

    fn hash(&self, value: &Value) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = fxhash::FxHasher64::default();

        fn walk<H: std::hash::Hasher>(value: &Value, hasher: &mut H) {
            std::mem::discriminant(value).hash(hasher);
            match value {
                Value::Nil => {}
                Value::Bool(v) => v.hash(hasher),
                Value::Signed(v) => v.hash(hasher),
                Value::Unsigned(v) => v.hash(hasher),
                Value::I128(v) => v.hash(hasher),
                Value::U128(v) => v.hash(hasher),
                Value::Float(v) => v.to_bits().hash(hasher),
                Value::Char(v) => v.hash(hasher),
                Value::Str(v) => v.as_bytes().hash(hasher),
                Value::Bytes(v) => v.hash(hasher),
                Value::Timestamp(v) => (v.unix_timestamp(), v.nanosecond()).hash(hasher),
                Value::Date(v) => v.to_julian_day().hash(hasher),
                Value::Time(v) => (v.hour(), v.minute(), v.second(), v.nanosecond()).hash(hasher),
                Value::Duration(v) => v.whole_nanoseconds().hash(hasher),
                Value::Uuid(v) => v.as_bytes().hash(hasher),
                Value::BigInt(v) => v.hash(hasher),
                Value::Decimal(v) => v.to_string().hash(hasher),
                Value::Sequence(items) => {
                    items.len().hash(hasher);
                    for item in items {
                        walk(item, hasher);
                    }
                }
                Value::Map(entries) => {
                    entries.len().hash(hasher);
                    for (k, v) in entries {
                        walk(k, hasher);
                        walk(v, hasher);
                    }
                }
                Value::Record(record) => {
                    record.shape().hash(hasher);
                    for slot in record.snapshot() {
                        match slot {
                            Some(v) => walk(&v, hasher),
                            None => 0u8.hash(hasher),
                        }
                    }
                }
                Value::Extension(code, payload) => {
                    code.hash(hasher);
                    payload.hash(hasher);
                }
            }
        }

        walk(value, &mut hasher);
        hasher.finish()
    }
}

// Reference-token payloads are minimal big-endian unsigned identifiers.

pub(crate) fn encode_ref_id(id: u32) -> Vec<u8> {
    if id <= 0xff {
        vec![id as u8]
    } else if id <= 0xffff {
        (id as u16).to_be_bytes().to_vec()
    } else {
        id.to_be_bytes().to_vec()
    }
}

pub(crate) fn decode_ref_id(payload: &[u8]) -> Result<u32, Error> {
    match payload.len() {
        1 => Ok(payload[0] as u32),
        2 => Ok(u16::from_be_bytes([payload[0], payload[1]]) as u32),
        4 => Ok(u32::from_be_bytes([
            payload[0], payload[1], payload[2], payload[3],
        ])),
        len => Err(Error::invalid(format!(
            "reference token has a malformed {len}-byte identifier"
        ))),
    }
}
