use super::format::{self, Fetch, TokenType};
use super::Error;
use bytes::{Buf, BytesMut};

/// StreamReader decodes MessagePack from an incrementally-fed byte window.
/// Every read either completes (`Fetch::Ready`, advancing the cursor) or
/// reports how many further bytes it needs (`Fetch::More`, leaving the
/// cursor untouched) so the caller can `feed` another chunk and retry.
///
/// Chunks accumulate into one contiguous buffer, which also materializes
/// strings that straddled chunk boundaries.
#[derive(Debug, Default)]
pub struct StreamReader {
    buf: BytesMut,
    pos: usize,
}

impl StreamReader {
    pub fn new() -> StreamReader {
        StreamReader::default()
    }

    /// Append a chunk received from the byte source.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Total bytes consumed by completed reads.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes fed but not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// The full buffered window, consumed prefix included. Used by callers
    /// which decide to fall back to a buffered read of the whole payload.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Drop the consumed prefix of the window.
    pub fn compact(&mut self) {
        self.buf.advance(self.pos);
        self.pos = 0;
    }

    fn rest(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    pub fn try_peek_type(&self) -> Result<Fetch<TokenType>, Error> {
        format::peek_type(self.rest())
    }

    pub fn try_read_nil(&mut self) -> Result<Fetch<()>, Error> {
        match format::decode_nil(self.rest())? {
            Fetch::Ready(((), at)) => {
                self.pos += at;
                Ok(Fetch::Ready(()))
            }
            Fetch::More(n) => Ok(Fetch::More(n)),
        }
    }

    pub fn try_read_bool(&mut self) -> Result<Fetch<bool>, Error> {
        match format::decode_bool(self.rest())? {
            Fetch::Ready((v, at)) => {
                self.pos += at;
                Ok(Fetch::Ready(v))
            }
            Fetch::More(n) => Ok(Fetch::More(n)),
        }
    }

    pub fn try_read_int(&mut self) -> Result<Fetch<i64>, Error> {
        match format::decode_int(self.rest())? {
            Fetch::Ready((v, at)) => {
                self.pos += at;
                Ok(Fetch::Ready(v))
            }
            Fetch::More(n) => Ok(Fetch::More(n)),
        }
    }

    pub fn try_read_uint(&mut self) -> Result<Fetch<u64>, Error> {
        match format::decode_uint_wide(self.rest())? {
            Fetch::Ready((v, at)) => {
                self.pos += at;
                Ok(Fetch::Ready(v))
            }
            Fetch::More(n) => Ok(Fetch::More(n)),
        }
    }

    pub fn try_read_f32(&mut self) -> Result<Fetch<f32>, Error> {
        match format::decode_f32(self.rest())? {
            Fetch::Ready((v, at)) => {
                self.pos += at;
                Ok(Fetch::Ready(v))
            }
            Fetch::More(n) => Ok(Fetch::More(n)),
        }
    }

    pub fn try_read_f64(&mut self) -> Result<Fetch<f64>, Error> {
        match format::decode_f64(self.rest())? {
            Fetch::Ready((v, at)) => {
                self.pos += at;
                Ok(Fetch::Ready(v))
            }
            Fetch::More(n) => Ok(Fetch::More(n)),
        }
    }

    pub fn try_read_str(&mut self) -> Result<Fetch<String>, Error> {
        match format::decode_str(self.rest())? {
            Fetch::Ready((v, at)) => {
                let owned = v.to_owned();
                self.pos += at;
                Ok(Fetch::Ready(owned))
            }
            Fetch::More(n) => Ok(Fetch::More(n)),
        }
    }

    pub fn try_read_bin(&mut self) -> Result<Fetch<Vec<u8>>, Error> {
        match format::decode_bin(self.rest())? {
            Fetch::Ready((v, at)) => {
                let owned = v.to_vec();
                self.pos += at;
                Ok(Fetch::Ready(owned))
            }
            Fetch::More(n) => Ok(Fetch::More(n)),
        }
    }

    pub fn try_read_array_header(&mut self) -> Result<Fetch<usize>, Error> {
        match format::decode_array_header(self.rest())? {
            Fetch::Ready((v, at)) => {
                self.pos += at;
                Ok(Fetch::Ready(v))
            }
            Fetch::More(n) => Ok(Fetch::More(n)),
        }
    }

    pub fn try_read_map_header(&mut self) -> Result<Fetch<usize>, Error> {
        match format::decode_map_header(self.rest())? {
            Fetch::Ready((v, at)) => {
                self.pos += at;
                Ok(Fetch::Ready(v))
            }
            Fetch::More(n) => Ok(Fetch::More(n)),
        }
    }

    pub fn try_read_ext(&mut self) -> Result<Fetch<(i8, Vec<u8>)>, Error> {
        match format::decode_ext(self.rest())? {
            Fetch::Ready(((code, payload), at)) => {
                let owned = payload.to_vec();
                self.pos += at;
                Ok(Fetch::Ready((code, owned)))
            }
            Fetch::More(n) => Ok(Fetch::More(n)),
        }
    }

    pub fn try_peek_ext_code(&self) -> Result<Fetch<Option<i8>>, Error> {
        match format::peek_type(self.rest())? {
            Fetch::Ready(TokenType::Ext) => match format::decode_ext_header(self.rest())? {
                Fetch::Ready(((code, _len), _at)) => Ok(Fetch::Ready(Some(code))),
                Fetch::More(n) => Ok(Fetch::More(n)),
            },
            Fetch::Ready(_) => Ok(Fetch::Ready(None)),
            Fetch::More(n) => Ok(Fetch::More(n)),
        }
    }

    pub fn try_read_timestamp(&mut self) -> Result<Fetch<(i64, u32)>, Error> {
        match format::decode_ext(self.rest())? {
            Fetch::Ready(((code, payload), at)) => {
                if code != -1 {
                    return Err(Error::Timestamp { len: payload.len() });
                }
                let decoded = format::decode_timestamp(payload)?;
                self.pos += at;
                Ok(Fetch::Ready(decoded))
            }
            Fetch::More(n) => Ok(Fetch::More(n)),
        }
    }

    /// Skip one whole structure. Until the structure is fully buffered this
    /// reports More and consumes nothing, so a retry rescans from the same
    /// position.
    pub fn try_skip_value(&mut self) -> Result<Fetch<()>, Error> {
        match format::skip_value(self.rest())? {
            Fetch::Ready(at) => {
                self.pos += at;
                Ok(Fetch::Ready(()))
            }
            Fetch::More(n) => Ok(Fetch::More(n)),
        }
    }

    /// Consume one whole structure, returning its raw encoded bytes.
    pub fn try_read_raw_value(&mut self) -> Result<Fetch<Vec<u8>>, Error> {
        match format::skip_value(self.rest())? {
            Fetch::Ready(at) => {
                let raw = self.rest()[..at].to_vec();
                self.pos += at;
                Ok(Fetch::Ready(raw))
            }
            Fetch::More(n) => Ok(Fetch::More(n)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::Writer;
    use super::*;

    #[test]
    fn test_byte_at_a_time() {
        let mut w = Writer::new();
        w.write_str("Lightning");
        w.write_int(45);
        let bytes = w.into_vec();

        let mut r = StreamReader::new();
        let mut fed = 0;

        let s = loop {
            match r.try_read_str().unwrap() {
                Fetch::Ready(s) => break s,
                Fetch::More(n) => {
                    assert!(n >= 1);
                    r.feed(&bytes[fed..fed + 1]);
                    fed += 1;
                }
            }
        };
        assert_eq!(s, "Lightning");

        let v = loop {
            match r.try_read_int().unwrap() {
                Fetch::Ready(v) => break v,
                Fetch::More(_) => {
                    r.feed(&bytes[fed..fed + 1]);
                    fed += 1;
                }
            }
        };
        assert_eq!(v, 45);
        assert_eq!(fed, bytes.len());
    }

    #[test]
    fn test_cursor_only_advances_on_ready() {
        let mut w = Writer::new();
        w.write_str("abcdef");
        let bytes = w.into_vec();

        let mut r = StreamReader::new();
        r.feed(&bytes[..3]);
        assert!(matches!(r.try_read_str().unwrap(), Fetch::More(_)));
        assert_eq!(r.position(), 0);

        r.feed(&bytes[3..]);
        assert!(matches!(r.try_read_str().unwrap(), Fetch::Ready(_)));
        assert_eq!(r.position(), bytes.len());
    }

    #[test]
    fn test_compact_drops_consumed_prefix() {
        let mut w = Writer::new();
        w.write_uint(1);
        w.write_uint(2);
        let bytes = w.into_vec();

        let mut r = StreamReader::new();
        r.feed(&bytes);
        assert!(matches!(r.try_read_uint().unwrap(), Fetch::Ready(1)));
        r.compact();
        assert_eq!(r.position(), 0);
        assert!(matches!(r.try_read_uint().unwrap(), Fetch::Ready(2)));
    }
}
