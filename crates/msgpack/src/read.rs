use super::format::{self, Fetch, TokenType};
use super::Error;

/// Reader decodes MessagePack from a complete in-memory payload. The caller
/// guarantees the buffer holds whole structures; running off the end is a
/// `Truncated` error rather than a request for more bytes.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'b> {
    buf: &'b [u8],
    pos: usize,
}

// Collapse a Fetch from the format layer: a buffered reader can never
// produce more bytes, so More means the payload was short.
fn complete<T>(fetch: Fetch<T>) -> Result<T, Error> {
    match fetch {
        Fetch::Ready(v) => Ok(v),
        Fetch::More(_) => Err(Error::Truncated),
    }
}

impl<'b> Reader<'b> {
    pub fn new(buf: &'b [u8]) -> Reader<'b> {
        Reader { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn rest(&self) -> &'b [u8] {
        &self.buf[self.pos..]
    }

    /// Classify the next token without advancing the cursor.
    pub fn peek_type(&self) -> Result<TokenType, Error> {
        complete(format::peek_type(self.rest())?)
    }

    pub fn read_nil(&mut self) -> Result<(), Error> {
        let ((), at) = complete(format::decode_nil(self.rest())?)?;
        self.pos += at;
        Ok(())
    }

    pub fn read_bool(&mut self) -> Result<bool, Error> {
        let (v, at) = complete(format::decode_bool(self.rest())?)?;
        self.pos += at;
        Ok(v)
    }

    pub fn read_int(&mut self) -> Result<i64, Error> {
        let (v, at) = complete(format::decode_int(self.rest())?)?;
        self.pos += at;
        Ok(v)
    }

    pub fn read_uint(&mut self) -> Result<u64, Error> {
        let (v, at) = complete(format::decode_uint_wide(self.rest())?)?;
        self.pos += at;
        Ok(v)
    }

    pub fn read_f32(&mut self) -> Result<f32, Error> {
        let (v, at) = complete(format::decode_f32(self.rest())?)?;
        self.pos += at;
        Ok(v)
    }

    pub fn read_f64(&mut self) -> Result<f64, Error> {
        let (v, at) = complete(format::decode_f64(self.rest())?)?;
        self.pos += at;
        Ok(v)
    }

    pub fn read_str(&mut self) -> Result<&'b str, Error> {
        let (v, at) = complete(format::decode_str(self.rest())?)?;
        self.pos += at;
        Ok(v)
    }

    pub fn read_bin(&mut self) -> Result<&'b [u8], Error> {
        let (v, at) = complete(format::decode_bin(self.rest())?)?;
        self.pos += at;
        Ok(v)
    }

    pub fn read_array_header(&mut self) -> Result<usize, Error> {
        let (v, at) = complete(format::decode_array_header(self.rest())?)?;
        self.pos += at;
        Ok(v)
    }

    pub fn read_map_header(&mut self) -> Result<usize, Error> {
        let (v, at) = complete(format::decode_map_header(self.rest())?)?;
        self.pos += at;
        Ok(v)
    }

    pub fn read_ext(&mut self) -> Result<(i8, &'b [u8]), Error> {
        let (v, at) = complete(format::decode_ext(self.rest())?)?;
        self.pos += at;
        Ok(v)
    }

    /// Peek the extension type code of the next token, if it is one.
    pub fn peek_ext_code(&self) -> Result<Option<i8>, Error> {
        match format::peek_type(self.rest())? {
            Fetch::Ready(TokenType::Ext) => {
                let ((code, _len), _at) = complete(format::decode_ext_header(self.rest())?)?;
                Ok(Some(code))
            }
            Fetch::Ready(_) => Ok(None),
            Fetch::More(_) => Err(Error::Truncated),
        }
    }

    /// Read a timestamp extension into whole seconds and nanoseconds.
    pub fn read_timestamp(&mut self) -> Result<(i64, u32), Error> {
        let (code, payload) = self.read_ext()?;
        if code != -1 {
            return Err(Error::Timestamp { len: payload.len() });
        }
        format::decode_timestamp(payload)
    }

    /// Skip exactly one structure, recursing through containers.
    pub fn skip_value(&mut self) -> Result<(), Error> {
        let at = complete(format::skip_value(self.rest())?)?;
        self.pos += at;
        Ok(())
    }

    /// Consume one whole structure and return its raw encoded bytes.
    pub fn read_raw_value(&mut self) -> Result<&'b [u8], Error> {
        let at = complete(format::skip_value(self.rest())?)?;
        let raw = &self.buf[self.pos..self.pos + at];
        self.pos += at;
        Ok(raw)
    }
}
