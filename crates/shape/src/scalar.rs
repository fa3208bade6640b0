/// The closed table of scalar kinds the engine serializes natively.
/// Everything else is described structurally (objects, unions, collections)
/// or routed through a surrogate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scalar {
    Bool,
    I8,
    I16,
    I32,
    I64,
    I128,
    U8,
    U16,
    U32,
    U64,
    U128,
    /// Arbitrary-precision integer, carried as an extension.
    BigInt,
    /// IEEE half-precision float, carried as an extension.
    F16,
    F32,
    F64,
    /// 128-bit decimal, carried as an extension.
    Decimal,
    Timestamp,
    Date,
    Time,
    Duration,
    /// A bare Unicode code point, carried as its integer value.
    Rune,
    /// A character, carried as a one-character string.
    Char,
    Str,
    /// A dotted numeric version string.
    Version,
    /// An absolute URI, validated on read.
    Uri,
    Bytes,
    Uuid,
    /// Three or four color channels, carried as an array of small integers.
    Color,
    /// A two-dimensional integer point.
    Point,
    /// Pre-encoded MessagePack passed through untouched.
    Raw,
}

impl Scalar {
    pub fn name(self) -> &'static str {
        match self {
            Scalar::Bool => "bool",
            Scalar::I8 => "i8",
            Scalar::I16 => "i16",
            Scalar::I32 => "i32",
            Scalar::I64 => "i64",
            Scalar::I128 => "i128",
            Scalar::U8 => "u8",
            Scalar::U16 => "u16",
            Scalar::U32 => "u32",
            Scalar::U64 => "u64",
            Scalar::U128 => "u128",
            Scalar::BigInt => "bigint",
            Scalar::F16 => "f16",
            Scalar::F32 => "f32",
            Scalar::F64 => "f64",
            Scalar::Decimal => "decimal",
            Scalar::Timestamp => "timestamp",
            Scalar::Date => "date",
            Scalar::Time => "time",
            Scalar::Duration => "duration",
            Scalar::Rune => "rune",
            Scalar::Char => "char",
            Scalar::Str => "str",
            Scalar::Version => "version",
            Scalar::Uri => "uri",
            Scalar::Bytes => "bytes",
            Scalar::Uuid => "uuid",
            Scalar::Color => "color",
            Scalar::Point => "point",
            Scalar::Raw => "raw",
        }
    }

    /// Scalars with value semantics, as distinct from reference-like
    /// scalars (strings, byte blobs, raw passthrough). The distinction
    /// feeds the default-value emission policy.
    pub fn is_value_like(self) -> bool {
        !matches!(
            self,
            Scalar::Str | Scalar::Version | Scalar::Uri | Scalar::Bytes | Scalar::Raw
        )
    }
}
