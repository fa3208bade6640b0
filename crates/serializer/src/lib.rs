// A MessagePack serialization engine for statically described object
// graphs. Callers supply a shape Provider describing each user type; the
// engine compiles each shape into a cached converter which reads and
// writes the dynamic Value representation, under the policies of an
// immutable SerializerOptions bundle.
//
// The Serializer is the facade: it owns the converter cache (swapped
// wholesale on any reconfiguration), the weak string-intern table, and the
// cross-call reference maps when that mode is configured. Each top-level
// call builds a context carrying the depth budget, cancellation token, and
// per-call reference state.

use bytes::Bytes;
use futures::io::AsyncWrite;
use futures::Stream;
use msgpack::{Reader, Writer};
use shape::{Provider, ShapeId, Value};
use std::io;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

mod build;
mod cache;
mod context;
pub mod convert;
pub mod error;
mod intern;
pub mod options;

pub use context::{ReadCx, ReadRefs, WriteCx, WriteRefs};
pub use convert::{
    read_any, write_any, AsyncSink, AsyncSource, Comparer, Converter, DefaultComparer,
};
pub use error::{ConfigError, Error, Segment};
pub use options::{
    DeserializeDefaults, ExtensionCodes, GuidFormat, MultiDimFormat, ReferenceMode,
    SerializeDefaults, SerializerOptions, UnionRegistration,
};

use intern::InternTable;

pub struct Serializer {
    options: Arc<SerializerOptions>,
    cache: cache::ConverterCache,
    intern: Arc<InternTable>,
    shared_write_refs: Mutex<Option<WriteRefs>>,
    shared_read_refs: Mutex<Option<ReadRefs>>,
}

impl Default for Serializer {
    fn default() -> Serializer {
        Serializer::new(SerializerOptions::default())
    }
}

impl Serializer {
    pub fn new(options: SerializerOptions) -> Serializer {
        Serializer {
            options: Arc::new(options),
            cache: cache::ConverterCache::new(),
            intern: Arc::new(InternTable::new()),
            shared_write_refs: Mutex::new(None),
            shared_read_refs: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &SerializerOptions {
        &self.options
    }

    /// Derive a Serializer with altered configuration. Converters are
    /// immutable once built, so the derived Serializer starts from a fresh
    /// cache.
    pub fn reconfigure(
        &self,
        alter: impl FnOnce(SerializerOptions) -> SerializerOptions,
    ) -> Serializer {
        Serializer::new(alter((*self.options).clone()))
    }

    /// The converter for a shape, building and memoizing on first use.
    pub fn converter(
        &self,
        provider: &Arc<Provider>,
        shape: ShapeId,
    ) -> Result<Arc<dyn Converter>, Error> {
        build::Builder {
            options: &self.options,
            provider,
            cache: &self.cache,
        }
        .converter(shape)
    }

    /// The JSON-schema fragment mirroring a shape's wire form.
    pub fn json_schema(
        &self,
        provider: &Arc<Provider>,
        shape: ShapeId,
    ) -> Result<serde_json::Value, Error> {
        Ok(self.converter(provider, shape)?.schema())
    }

    fn write_cx(&self, provider: &Arc<Provider>, cancel: &CancellationToken) -> WriteCx {
        let refs = match self.options.preserve_references {
            ReferenceMode::Off => None,
            ReferenceMode::PerCall => Some(WriteRefs::default()),
            ReferenceMode::CrossCall => Some(
                self.shared_write_refs
                    .lock()
                    .unwrap()
                    .take()
                    .unwrap_or_default(),
            ),
        };
        WriteCx::new(
            provider.clone(),
            self.options.max_depth,
            cancel.clone(),
            refs,
            self.options.intern_strings,
        )
    }

    fn finish_write_cx(&self, cx: WriteCx) {
        if self.options.preserve_references == ReferenceMode::CrossCall {
            *self.shared_write_refs.lock().unwrap() = cx.into_refs();
        }
    }

    fn read_cx(&self, provider: &Arc<Provider>, cancel: &CancellationToken) -> ReadCx {
        let refs = match self.options.preserve_references {
            ReferenceMode::Off => None,
            ReferenceMode::PerCall => Some(ReadRefs::default()),
            ReferenceMode::CrossCall => Some(
                self.shared_read_refs
                    .lock()
                    .unwrap()
                    .take()
                    .unwrap_or_default(),
            ),
        };
        ReadCx::new(
            provider.clone(),
            self.options.max_depth,
            cancel.clone(),
            refs,
            self.options.intern_strings.then(|| self.intern.clone()),
            self.options.intern_strings,
        )
    }

    fn finish_read_cx(&self, cx: ReadCx) {
        if self.options.preserve_references == ReferenceMode::CrossCall {
            *self.shared_read_refs.lock().unwrap() = cx.into_refs();
        }
    }

    /// Serialize a value to a complete in-memory payload.
    pub fn serialize(
        &self,
        provider: &Arc<Provider>,
        shape: ShapeId,
        value: &Value,
    ) -> Result<Vec<u8>, Error> {
        self.serialize_with(provider, shape, value, &CancellationToken::new())
    }

    pub fn serialize_with(
        &self,
        provider: &Arc<Provider>,
        shape: ShapeId,
        value: &Value,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, Error> {
        self.serialize_inner(provider, shape, value, cancel)
            .map_err(|e| e.during("serialize"))
    }

    fn serialize_inner(
        &self,
        provider: &Arc<Provider>,
        shape: ShapeId,
        value: &Value,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let converter = self.converter(provider, shape)?;
        let mut cx = self.write_cx(provider, cancel);
        let mut w = Writer::new();
        let outcome = converter.write(&mut w, value, &mut cx);
        self.finish_write_cx(cx);
        outcome?;
        Ok(w.into_vec())
    }

    /// Deserialize a complete in-memory payload. The payload must hold
    /// exactly one structure.
    pub fn deserialize(
        &self,
        provider: &Arc<Provider>,
        shape: ShapeId,
        payload: &[u8],
    ) -> Result<Value, Error> {
        self.deserialize_with(provider, shape, payload, &CancellationToken::new())
    }

    pub fn deserialize_with(
        &self,
        provider: &Arc<Provider>,
        shape: ShapeId,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Value, Error> {
        self.deserialize_inner(provider, shape, payload, cancel)
            .map_err(|e| e.during("deserialize"))
    }

    fn deserialize_inner(
        &self,
        provider: &Arc<Provider>,
        shape: ShapeId,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Value, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let converter = self.converter(provider, shape)?;
        let mut cx = self.read_cx(provider, cancel);
        let mut r = Reader::new(payload);
        let outcome = converter.read(&mut r, &mut cx);
        self.finish_read_cx(cx);
        let value = outcome?;
        if !r.is_at_end() {
            return Err(Error::invalid(format!(
                "{} trailing bytes after the value",
                r.remaining()
            )));
        }
        Ok(value)
    }

    /// Serialize into an async sink, flushing whenever buffered output
    /// crosses the configured threshold.
    pub async fn serialize_async<W>(
        &self,
        provider: &Arc<Provider>,
        shape: ShapeId,
        value: &Value,
        out: &mut W,
        cancel: &CancellationToken,
    ) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.serialize_async_inner(provider, shape, value, out, cancel)
            .await
            .map_err(|e| e.during("serialize"))
    }

    async fn serialize_async_inner<W>(
        &self,
        provider: &Arc<Provider>,
        shape: ShapeId,
        value: &Value,
        out: &mut W,
        cancel: &CancellationToken,
    ) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin + Send,
    {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let converter = self.converter(provider, shape)?;
        let mut cx = self.write_cx(provider, cancel);
        let mut sink = AsyncSink::new(out, self.options.max_async_buffer, cancel.clone());
        let outcome = async {
            // Converters which stream (objects, collections, unions) flush
            // as they go; the rest serialize buffered and flush once.
            if converter.prefer_async() {
                converter.write_to(&mut sink, value, &mut cx).await?;
            } else {
                converter.write(sink.writer(), value, &mut cx)?;
            }
            sink.flush_all().await
        }
        .await;
        self.finish_write_cx(cx);
        outcome
    }

    /// Deserialize from a stream of byte chunks. The facade first buffers
    /// up to the configured budget; a source which completes within it
    /// takes the buffered fast path, otherwise decoding proceeds
    /// incrementally with cooperative suspension at every point the codec
    /// needs more bytes.
    pub async fn deserialize_async<S>(
        &self,
        provider: &Arc<Provider>,
        shape: ShapeId,
        source: S,
        cancel: &CancellationToken,
    ) -> Result<Value, Error>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.deserialize_async_inner(provider, shape, source, cancel)
            .await
            .map_err(|e| e.during("deserialize"))
    }

    async fn deserialize_async_inner<S>(
        &self,
        provider: &Arc<Provider>,
        shape: ShapeId,
        source: S,
        cancel: &CancellationToken,
    ) -> Result<Value, Error>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let converter = self.converter(provider, shape)?;
        let mut src = AsyncSource::new(source, cancel.clone());
        let complete = src.probe(self.options.max_async_buffer).await?;

        let mut cx = self.read_cx(provider, cancel);
        let outcome = if complete {
            let mut r = Reader::new(src.buffered());
            converter.read(&mut r, &mut cx).and_then(|value| {
                if r.is_at_end() {
                    Ok(value)
                } else {
                    Err(Error::invalid(format!(
                        "{} trailing bytes after the value",
                        r.remaining()
                    )))
                }
            })
        } else {
            converter.read_from(&mut src, &mut cx).await
        };
        self.finish_read_cx(cx);
        outcome
    }
}
