/// Writer buffers MessagePack tokens into an owned byte vector. Integer
/// writers always pick the narrowest encoding that represents the value.
///
/// The buffer is drained (not consumed) by streaming callers, so one Writer
/// may serve many flush cycles of an async sink.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Writer {
        Writer::default()
    }

    pub fn with_capacity(capacity: usize) -> Writer {
        Writer {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    /// Take the buffered bytes, leaving the Writer empty and reusable.
    pub fn drain(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    pub fn reserve(&mut self, additional: usize) {
        self.buf.reserve(additional);
    }

    pub fn write_nil(&mut self) {
        self.buf.push(0xc0);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(if v { 0xc3 } else { 0xc2 });
    }

    pub fn write_uint(&mut self, v: u64) {
        match v {
            0..=0x7f => self.buf.push(v as u8),
            0x80..=0xff => {
                self.buf.push(0xcc);
                self.buf.push(v as u8);
            }
            0x100..=0xffff => {
                self.buf.push(0xcd);
                self.buf.extend_from_slice(&(v as u16).to_be_bytes());
            }
            0x1_0000..=0xffff_ffff => {
                self.buf.push(0xce);
                self.buf.extend_from_slice(&(v as u32).to_be_bytes());
            }
            _ => {
                self.buf.push(0xcf);
                self.buf.extend_from_slice(&v.to_be_bytes());
            }
        }
    }

    pub fn write_int(&mut self, v: i64) {
        if v >= 0 {
            return self.write_uint(v as u64);
        }
        match v {
            -32..=-1 => self.buf.push(v as i8 as u8),
            -0x80..=-33 => {
                self.buf.push(0xd0);
                self.buf.push(v as i8 as u8);
            }
            -0x8000..=-0x81 => {
                self.buf.push(0xd1);
                self.buf.extend_from_slice(&(v as i16).to_be_bytes());
            }
            -0x8000_0000..=-0x8001 => {
                self.buf.push(0xd2);
                self.buf.extend_from_slice(&(v as i32).to_be_bytes());
            }
            _ => {
                self.buf.push(0xd3);
                self.buf.extend_from_slice(&v.to_be_bytes());
            }
        }
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.push(0xca);
        self.buf.extend_from_slice(&v.to_bits().to_be_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.push(0xcb);
        self.buf.extend_from_slice(&v.to_bits().to_be_bytes());
    }

    pub fn write_str(&mut self, v: &str) {
        match v.len() {
            0..=31 => self.buf.push(0xa0 | v.len() as u8),
            32..=0xff => {
                self.buf.push(0xd9);
                self.buf.push(v.len() as u8);
            }
            0x100..=0xffff => {
                self.buf.push(0xda);
                self.buf.extend_from_slice(&(v.len() as u16).to_be_bytes());
            }
            _ => {
                self.buf.push(0xdb);
                self.buf.extend_from_slice(&(v.len() as u32).to_be_bytes());
            }
        }
        self.buf.extend_from_slice(v.as_bytes());
    }

    pub fn write_bin(&mut self, v: &[u8]) {
        match v.len() {
            0..=0xff => {
                self.buf.push(0xc4);
                self.buf.push(v.len() as u8);
            }
            0x100..=0xffff => {
                self.buf.push(0xc5);
                self.buf.extend_from_slice(&(v.len() as u16).to_be_bytes());
            }
            _ => {
                self.buf.push(0xc6);
                self.buf.extend_from_slice(&(v.len() as u32).to_be_bytes());
            }
        }
        self.buf.extend_from_slice(v);
    }

    pub fn write_array_header(&mut self, n: usize) {
        match n {
            0..=15 => self.buf.push(0x90 | n as u8),
            16..=0xffff => {
                self.buf.push(0xdc);
                self.buf.extend_from_slice(&(n as u16).to_be_bytes());
            }
            _ => {
                self.buf.push(0xdd);
                self.buf.extend_from_slice(&(n as u32).to_be_bytes());
            }
        }
    }

    pub fn write_map_header(&mut self, n: usize) {
        match n {
            0..=15 => self.buf.push(0x80 | n as u8),
            16..=0xffff => {
                self.buf.push(0xde);
                self.buf.extend_from_slice(&(n as u16).to_be_bytes());
            }
            _ => {
                self.buf.push(0xdf);
                self.buf.extend_from_slice(&(n as u32).to_be_bytes());
            }
        }
    }

    pub fn write_ext(&mut self, code: i8, payload: &[u8]) {
        match payload.len() {
            1 => self.buf.push(0xd4),
            2 => self.buf.push(0xd5),
            4 => self.buf.push(0xd6),
            8 => self.buf.push(0xd7),
            16 => self.buf.push(0xd8),
            len @ 0..=0xff => {
                self.buf.push(0xc7);
                self.buf.push(len as u8);
            }
            len @ 0x100..=0xffff => {
                self.buf.push(0xc8);
                self.buf.extend_from_slice(&(len as u16).to_be_bytes());
            }
            len => {
                self.buf.push(0xc9);
                self.buf.extend_from_slice(&(len as u32).to_be_bytes());
            }
        }
        self.buf.push(code as u8);
        self.buf.extend_from_slice(payload);
    }

    /// Write a timestamp extension (type -1), picking the narrowest of the
    /// 32/64/96-bit forms which represents the instant.
    pub fn write_timestamp(&mut self, seconds: i64, nanos: u32) {
        if seconds >= 0 && seconds >> 34 == 0 {
            if nanos == 0 && seconds <= u32::MAX as i64 {
                self.write_ext(-1, &(seconds as u32).to_be_bytes());
            } else {
                let packed = ((nanos as u64) << 34) | seconds as u64;
                self.write_ext(-1, &packed.to_be_bytes());
            }
        } else {
            let mut payload = [0u8; 12];
            payload[..4].copy_from_slice(&nanos.to_be_bytes());
            payload[4..].copy_from_slice(&seconds.to_be_bytes());
            self.write_ext(-1, &payload);
        }
    }

    /// Append bytes which are already valid MessagePack.
    pub fn write_raw(&mut self, encoded: &[u8]) {
        self.buf.extend_from_slice(encoded);
    }

    // Width-specialized slice writers. Each reserves the maximum encoded
    // size for the whole run up front so the element loop never renegotiates
    // buffer capacity.

    pub fn write_uint_slice(&mut self, items: &[u64]) {
        self.write_array_header(items.len());
        self.buf.reserve(9 * items.len());
        for v in items {
            self.write_uint(*v);
        }
    }

    pub fn write_int_slice(&mut self, items: &[i64]) {
        self.write_array_header(items.len());
        self.buf.reserve(9 * items.len());
        for v in items {
            self.write_int(*v);
        }
    }

    pub fn write_f32_slice(&mut self, items: &[f32]) {
        self.write_array_header(items.len());
        self.buf.reserve(5 * items.len());
        for v in items {
            self.write_f32(*v);
        }
    }

    pub fn write_f64_slice(&mut self, items: &[f64]) {
        self.write_array_header(items.len());
        self.buf.reserve(9 * items.len());
        for v in items {
            self.write_f64(*v);
        }
    }
}
