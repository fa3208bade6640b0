// MessagePack wire codec: a token layer shared by one writer and two readers.
//
// The `format` module holds pure decode functions over byte slices which
// report either a decoded token or how many further bytes they need. The
// buffered `Reader` treats "needs more" as truncation; the incremental
// `StreamReader` surfaces it so a byte source can feed another chunk and
// retry. Both readers therefore share one decode implementation.

mod format;
pub mod read;
pub mod stream;
pub mod write;

pub use format::{decode_timestamp, Fetch, TokenType};
pub use read::Reader;
pub use stream::StreamReader;
pub use write::Writer;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A read ran past the end of a complete buffer.
    #[error("unexpected end of MessagePack input")]
    Truncated,
    #[error("encountered the reserved marker 0xc1")]
    ReservedMarker,
    #[error("expected {expected} but found {found} (marker 0x{marker:02x})")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
        marker: u8,
    },
    #[error("integer {value} is out of range for {target}")]
    IntegerRange {
        value: i128,
        target: &'static str,
    },
    #[error("string token holds invalid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("malformed timestamp extension of {len} bytes")]
    Timestamp { len: usize },
}

impl Error {
    pub(crate) fn mismatch(expected: &'static str, marker: u8) -> Error {
        let found = match format::token_type(marker) {
            Ok(ty) => ty.name(),
            Err(_) => "a reserved marker",
        };
        Error::TypeMismatch {
            expected,
            found,
            marker,
        }
    }
}
