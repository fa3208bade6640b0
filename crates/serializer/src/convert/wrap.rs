use super::{decode_ref_id, encode_ref_id, AsyncSink, AsyncSource, Converter};
use crate::context::{ReadCx, WriteCx};
use crate::error::Error;
use msgpack::{Reader, TokenType, Writer};
use serde_json::json;
use shape::{MarshalFn, Value};
use std::sync::Arc;

/// OptionalConverter admits nil alongside its inner shape.
pub(crate) struct OptionalConverter {
    pub inner: Arc<dyn Converter>,
}

#[async_trait::async_trait]
impl Converter for OptionalConverter {
    fn write(&self, w: &mut Writer, value: &Value, cx: &mut WriteCx) -> Result<(), Error> {
        if value.is_nil() {
            w.write_nil();
            return Ok(());
        }
        cx.descend()?;
        self.inner.write(w, value, cx)?;
        cx.ascend();
        Ok(())
    }

    fn read(&self, r: &mut Reader<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        if r.peek_type()? == TokenType::Nil {
            r.read_nil()?;
            return Ok(Value::Nil);
        }
        cx.descend()?;
        let value = self.inner.read(r, cx)?;
        cx.ascend();
        Ok(value)
    }

    async fn read_from(&self, src: &mut AsyncSource<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        if src.peek_type().await? == TokenType::Nil {
            src.read_nil().await?;
            return Ok(Value::Nil);
        }
        cx.descend()?;
        let value = self.inner.read_from(src, cx).await?;
        cx.ascend();
        Ok(value)
    }

    fn prefer_async(&self) -> bool {
        self.inner.prefer_async()
    }

    fn schema(&self) -> serde_json::Value {
        json!({"oneOf": [{"type": "null"}, self.inner.schema()]})
    }
}

/// SurrogateConverter routes a type through its declared stand-in. Nil
/// identity is preserved by construction: nil never reaches the marshaler
/// in either direction.
pub(crate) struct SurrogateConverter {
    pub inner: Arc<dyn Converter>,
    pub marshal: Arc<MarshalFn>,
    pub unmarshal: Arc<MarshalFn>,
}

#[async_trait::async_trait]
impl Converter for SurrogateConverter {
    fn write(&self, w: &mut Writer, value: &Value, cx: &mut WriteCx) -> Result<(), Error> {
        if value.is_nil() {
            w.write_nil();
            return Ok(());
        }
        let surrogate = (self.marshal)(value);
        if surrogate.is_nil() {
            w.write_nil();
            return Ok(());
        }
        cx.descend()?;
        self.inner.write(w, &surrogate, cx)?;
        cx.ascend();
        Ok(())
    }

    fn read(&self, r: &mut Reader<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        if r.peek_type()? == TokenType::Nil {
            r.read_nil()?;
            return Ok(Value::Nil);
        }
        cx.descend()?;
        let surrogate = self.inner.read(r, cx)?;
        cx.ascend();
        if surrogate.is_nil() {
            return Ok(Value::Nil);
        }
        Ok((self.unmarshal)(&surrogate))
    }

    async fn read_from(&self, src: &mut AsyncSource<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        if src.peek_type().await? == TokenType::Nil {
            src.read_nil().await?;
            return Ok(Value::Nil);
        }
        cx.descend()?;
        let surrogate = self.inner.read_from(src, cx).await?;
        cx.ascend();
        if surrogate.is_nil() {
            return Ok(Value::Nil);
        }
        Ok((self.unmarshal)(&surrogate))
    }

    fn prefer_async(&self) -> bool {
        self.inner.prefer_async()
    }

    fn schema(&self) -> serde_json::Value {
        self.inner.schema()
    }
}

/// ReferenceConverter is the reference-preservation envelope. On write it
/// replaces re-encountered records with an extension token carrying the
/// identifier assigned at first emission. On read it reserves the matching
/// identifier before the wrapped converter runs, so cyclic payloads can
/// resolve references to records still being filled.
pub(crate) struct ReferenceConverter {
    pub inner: Arc<dyn Converter>,
    pub code: i8,
}

impl ReferenceConverter {
    fn lookup(&self, cx: &mut ReadCx, id: u32) -> Result<Value, Error> {
        let refs = cx
            .refs()
            .ok_or_else(|| Error::invalid("reference token read outside a preserving call"))?;
        refs.lookup(id)
            .cloned()
            .ok_or_else(|| Error::invalid(format!("reference {id} was not seen earlier")))
    }

    fn finish_read(&self, cx: &mut ReadCx, id: Option<u32>, value: &Value) {
        // If the wrapped converter did not consume the reservation (it
        // produced something other than a fresh record), bind it now.
        if let Some(id) = id {
            if let Some(refs) = cx.refs() {
                if refs.consume_if_pending(id) {
                    refs.register(id, value.clone());
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Converter for ReferenceConverter {
    fn write(&self, w: &mut Writer, value: &Value, cx: &mut WriteCx) -> Result<(), Error> {
        if let (Value::Record(record), Some(refs)) = (value, cx.refs()) {
            if let Some(id) = refs.record_seen(record) {
                w.write_ext(self.code, &encode_ref_id(id));
                return Ok(());
            }
            refs.register_record(record);
        }
        self.inner.write(w, value, cx)
    }

    fn read(&self, r: &mut Reader<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        if let Some(code) = r.peek_ext_code()? {
            if code == self.code {
                let (_code, payload) = r.read_ext()?;
                let id = decode_ref_id(payload)?;
                return self.lookup(cx, id);
            }
        }
        let id = cx.refs().map(|refs| refs.reserve());
        let value = self.inner.read(r, cx)?;
        self.finish_read(cx, id, &value);
        Ok(value)
    }

    async fn write_to(
        &self,
        sink: &mut AsyncSink<'_>,
        value: &Value,
        cx: &mut WriteCx,
    ) -> Result<(), Error> {
        if let (Value::Record(record), Some(refs)) = (value, cx.refs()) {
            if let Some(id) = refs.record_seen(record) {
                sink.writer().write_ext(self.code, &encode_ref_id(id));
                return sink.maybe_flush().await;
            }
            refs.register_record(record);
        }
        self.inner.write_to(sink, value, cx).await
    }

    async fn read_from(&self, src: &mut AsyncSource<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        if let Some(code) = src.peek_ext_code().await? {
            if code == self.code {
                let (_code, payload) = src.read_ext().await?;
                let id = decode_ref_id(&payload)?;
                return self.lookup(cx, id);
            }
        }
        let id = cx.refs().map(|refs| refs.reserve());
        let value = self.inner.read_from(src, cx).await?;
        self.finish_read(cx, id, &value);
        Ok(value)
    }

    fn prefer_async(&self) -> bool {
        self.inner.prefer_async()
    }

    fn schema(&self) -> serde_json::Value {
        self.inner.schema()
    }
}
