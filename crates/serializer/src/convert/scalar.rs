use super::{decode_ref_id, encode_ref_id, Converter};
use crate::context::{ReadCx, WriteCx};
use crate::error::Error;
use crate::options::{ExtensionCodes, GuidFormat, SerializerOptions};
use bigdecimal::BigDecimal;
use msgpack::{Reader, TokenType, Writer};
use num_bigint::BigInt;
use serde_json::json;
use shape::{Scalar, Value};
use time::OffsetDateTime;

/// ScalarConverter covers the engine's closed table of natively-encoded
/// kinds. One instance per scalar kind, with the extension code block and
/// Guid wire form baked in at build time.
pub struct ScalarConverter {
    scalar: Scalar,
    codes: ExtensionCodes,
    guid_format: GuidFormat,
}

impl ScalarConverter {
    pub(crate) fn new(scalar: Scalar, options: &SerializerOptions) -> ScalarConverter {
        ScalarConverter {
            scalar,
            codes: options.extension_codes,
            guid_format: options.guid_format,
        }
    }

    fn mismatch(&self, value: &Value) -> Error {
        Error::invalid(format!(
            "expected a {} value, found {}",
            self.scalar.name(),
            value.kind_name()
        ))
    }

    fn expect_ext<'b>(&self, r: &mut Reader<'b>, code: i8) -> Result<&'b [u8], Error> {
        let (found, payload) = r.read_ext()?;
        if found != code {
            return Err(Error::invalid(format!(
                "expected extension {code} for {}, found extension {found}",
                self.scalar.name()
            )));
        }
        Ok(payload)
    }
}

#[async_trait::async_trait]
impl Converter for ScalarConverter {
    fn write(&self, w: &mut Writer, value: &Value, cx: &mut WriteCx) -> Result<(), Error> {
        match (self.scalar, value) {
            (Scalar::Bool, Value::Bool(v)) => w.write_bool(*v),

            (Scalar::I8, _) => w.write_int(signed_in_range(self, value, i8::MIN as i64, i8::MAX as i64)?),
            (Scalar::I16, _) => w.write_int(signed_in_range(self, value, i16::MIN as i64, i16::MAX as i64)?),
            (Scalar::I32, _) => w.write_int(signed_in_range(self, value, i32::MIN as i64, i32::MAX as i64)?),
            (Scalar::I64, _) => w.write_int(signed_in_range(self, value, i64::MIN, i64::MAX)?),
            (Scalar::U8, _) => w.write_uint(unsigned_in_range(self, value, u8::MAX as u64)?),
            (Scalar::U16, _) => w.write_uint(unsigned_in_range(self, value, u16::MAX as u64)?),
            (Scalar::U32, _) => w.write_uint(unsigned_in_range(self, value, u32::MAX as u64)?),
            (Scalar::U64, _) => w.write_uint(unsigned_in_range(self, value, u64::MAX)?),

            (Scalar::I128, Value::I128(v)) => w.write_ext(self.codes.int128, &v.to_be_bytes()),
            (Scalar::I128, Value::Signed(v)) => {
                w.write_ext(self.codes.int128, &(*v as i128).to_be_bytes())
            }
            (Scalar::U128, Value::U128(v)) => w.write_ext(self.codes.uint128, &v.to_be_bytes()),
            (Scalar::U128, Value::Unsigned(v)) => {
                w.write_ext(self.codes.uint128, &(*v as u128).to_be_bytes())
            }
            (Scalar::BigInt, Value::BigInt(v)) => {
                w.write_ext(self.codes.big_int, &v.to_signed_bytes_be())
            }

            (Scalar::F16, Value::Float(v)) => {
                w.write_ext(self.codes.f16, &f64_to_f16_bits(*v).to_be_bytes())
            }
            (Scalar::F32, Value::Float(v)) => w.write_f32(*v as f32),
            (Scalar::F64, Value::Float(v)) => w.write_f64(*v),

            (Scalar::Decimal, Value::Decimal(v)) => {
                let (digits, scale) = decimal_parts(v);
                let mut payload = scale.to_be_bytes().to_vec();
                payload.extend_from_slice(&digits.to_signed_bytes_be());
                w.write_ext(self.codes.decimal, &payload);
            }

            (Scalar::Timestamp, Value::Timestamp(v)) => {
                let (seconds, nanos) = timestamp_parts(v);
                w.write_timestamp(seconds, nanos)
            }
            (Scalar::Date, Value::Date(v)) => w.write_int(v.to_julian_day() as i64),
            (Scalar::Time, Value::Time(v)) => {
                let nanos_of_day = v.hour() as u64 * 3_600_000_000_000
                    + v.minute() as u64 * 60_000_000_000
                    + v.second() as u64 * 1_000_000_000
                    + v.nanosecond() as u64;
                w.write_uint(nanos_of_day);
            }
            (Scalar::Duration, Value::Duration(v)) => {
                w.write_array_header(2);
                w.write_int(v.whole_seconds());
                w.write_int(v.subsec_nanoseconds() as i64);
            }

            (Scalar::Rune, Value::Char(v)) => w.write_uint(*v as u32 as u64),
            (Scalar::Char, Value::Char(v)) => {
                let mut buf = [0u8; 4];
                w.write_str(v.encode_utf8(&mut buf));
            }

            (Scalar::Str, Value::Str(v)) => {
                if cx.track_strings() {
                    let refs = cx.refs().expect("string tracking requires reference maps");
                    if let Some(id) = refs.string_seen(v) {
                        w.write_ext(self.codes.reference, &encode_ref_id(id));
                        return Ok(());
                    }
                    refs.register_string(v);
                }
                w.write_str(v);
            }
            (Scalar::Version, Value::Str(v)) => {
                if !is_version_text(v) {
                    return Err(Error::invalid(format!("{v:?} is not a version string")));
                }
                w.write_str(v);
            }
            (Scalar::Uri, Value::Str(v)) => w.write_str(v),

            (Scalar::Bytes, Value::Bytes(v)) => w.write_bin(v),
            (Scalar::Raw, Value::Bytes(v)) => w.write_raw(v),

            (Scalar::Uuid, Value::Uuid(v)) => match self.guid_format {
                GuidFormat::Binary => w.write_ext(self.codes.guid, &v.to_bytes_le()),
                GuidFormat::Simple => w.write_str(&v.simple().to_string()),
                GuidFormat::Hyphenated => w.write_str(&v.hyphenated().to_string()),
                GuidFormat::Braced => w.write_str(&v.braced().to_string()),
                GuidFormat::Parenthesized => w.write_str(&format!("({})", v.hyphenated())),
                GuidFormat::Urn => w.write_str(&v.urn().to_string()),
            },

            (Scalar::Color, Value::Sequence(channels)) => {
                if !(3..=4).contains(&channels.len()) {
                    return Err(self.mismatch(value));
                }
                w.write_array_header(channels.len());
                for channel in channels {
                    w.write_uint(unsigned_in_range(self, channel, u8::MAX as u64)?);
                }
            }
            (Scalar::Point, Value::Sequence(coords)) => {
                if coords.len() != 2 {
                    return Err(self.mismatch(value));
                }
                w.write_array_header(2);
                for coord in coords {
                    w.write_int(signed_in_range(self, coord, i64::MIN, i64::MAX)?);
                }
            }

            _ => return Err(self.mismatch(value)),
        }
        Ok(())
    }

    fn read(&self, r: &mut Reader<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        Ok(match self.scalar {
            Scalar::Bool => Value::Bool(r.read_bool()?),

            Scalar::I8 => read_signed_in_range(r, i8::MIN as i64, i8::MAX as i64, "i8")?,
            Scalar::I16 => read_signed_in_range(r, i16::MIN as i64, i16::MAX as i64, "i16")?,
            Scalar::I32 => read_signed_in_range(r, i32::MIN as i64, i32::MAX as i64, "i32")?,
            Scalar::I64 => Value::Signed(r.read_int()?),
            Scalar::U8 => read_unsigned_in_range(r, u8::MAX as u64, "u8")?,
            Scalar::U16 => read_unsigned_in_range(r, u16::MAX as u64, "u16")?,
            Scalar::U32 => read_unsigned_in_range(r, u32::MAX as u64, "u32")?,
            Scalar::U64 => Value::Unsigned(r.read_uint()?),

            Scalar::I128 => {
                let payload = self.expect_ext(r, self.codes.int128)?;
                let bytes: [u8; 16] = payload
                    .try_into()
                    .map_err(|_| Error::invalid("an i128 extension must hold 16 bytes"))?;
                Value::I128(i128::from_be_bytes(bytes))
            }
            Scalar::U128 => {
                let payload = self.expect_ext(r, self.codes.uint128)?;
                let bytes: [u8; 16] = payload
                    .try_into()
                    .map_err(|_| Error::invalid("a u128 extension must hold 16 bytes"))?;
                Value::U128(u128::from_be_bytes(bytes))
            }
            Scalar::BigInt => {
                let payload = self.expect_ext(r, self.codes.big_int)?;
                Value::BigInt(BigInt::from_signed_bytes_be(payload))
            }

            Scalar::F16 => {
                let payload = self.expect_ext(r, self.codes.f16)?;
                let bits: [u8; 2] = payload
                    .try_into()
                    .map_err(|_| Error::invalid("an f16 extension must hold 2 bytes"))?;
                Value::Float(f16_bits_to_f64(u16::from_be_bytes(bits)))
            }
            Scalar::F32 => Value::Float(r.read_f32()? as f64),
            Scalar::F64 => Value::Float(r.read_f64()?),

            Scalar::Decimal => {
                let payload = self.expect_ext(r, self.codes.decimal)?;
                if payload.len() < 8 {
                    return Err(Error::invalid("a decimal extension must hold a scale prefix"));
                }
                let scale = i64::from_be_bytes(payload[..8].try_into().unwrap());
                let digits = BigInt::from_signed_bytes_be(&payload[8..]);
                Value::Decimal(BigDecimal::new(digits, scale))
            }

            Scalar::Timestamp => {
                let (seconds, nanos) = r.read_timestamp()?;
                Value::Timestamp(timestamp_from_parts(seconds, nanos)?)
            }
            Scalar::Date => {
                let julian = r.read_int()?;
                let julian = i32::try_from(julian)
                    .map_err(|_| Error::invalid("date is outside the representable range"))?;
                Value::Date(
                    time::Date::from_julian_day(julian)
                        .map_err(|_| Error::invalid("date is outside the representable range"))?,
                )
            }
            Scalar::Time => {
                let nanos_of_day = r.read_uint()?;
                if nanos_of_day >= 86_400_000_000_000 {
                    return Err(Error::invalid("time of day is out of range"));
                }
                let (hour, rest) = (nanos_of_day / 3_600_000_000_000, nanos_of_day % 3_600_000_000_000);
                let (minute, rest) = (rest / 60_000_000_000, rest % 60_000_000_000);
                let (second, nano) = (rest / 1_000_000_000, rest % 1_000_000_000);
                Value::Time(
                    time::Time::from_hms_nano(hour as u8, minute as u8, second as u8, nano as u32)
                        .map_err(|_| Error::invalid("time of day is out of range"))?,
                )
            }
            Scalar::Duration => {
                let slots = r.read_array_header()?;
                if slots != 2 {
                    return Err(Error::invalid("a duration must hold seconds and nanoseconds"));
                }
                let seconds = r.read_int()?;
                let nanos = r.read_int()?;
                Value::Duration(
                    time::Duration::seconds(seconds) + time::Duration::nanoseconds(nanos),
                )
            }

            Scalar::Rune => {
                let code_point = r.read_uint()?;
                let code_point = u32::try_from(code_point)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| Error::invalid("not a Unicode code point"))?;
                Value::Char(code_point)
            }
            Scalar::Char => {
                let text = r.read_str()?;
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Value::Char(c),
                    _ => return Err(Error::invalid("a char must be one character")),
                }
            }

            Scalar::Str => {
                if cx.track_strings() {
                    if let Some(code) = r.peek_ext_code()? {
                        if code == self.codes.reference {
                            let (_code, payload) = r.read_ext()?;
                            let id = decode_ref_id(payload)?;
                            let refs = cx.refs().expect("string tracking requires reference maps");
                            return match refs.lookup(id) {
                                Some(Value::Str(text)) => Ok(Value::Str(text.clone())),
                                _ => Err(Error::invalid(format!(
                                    "reference {id} does not resolve to a string"
                                ))),
                            };
                        }
                    }
                }
                let text = cx.make_str(r.read_str()?);
                if cx.track_strings() {
                    if let Some(refs) = cx.refs() {
                        refs.register_string(&text);
                    }
                }
                Value::Str(text)
            }
            Scalar::Version => {
                let text = r.read_str()?;
                if !is_version_text(text) {
                    return Err(Error::invalid(format!("{text:?} is not a version string")));
                }
                Value::str(text)
            }
            Scalar::Uri => {
                let text = r.read_str()?;
                url::Url::parse(text)
                    .map_err(|err| Error::invalid(format!("{text:?} is not a valid URI: {err}")))?;
                Value::str(text)
            }

            Scalar::Bytes => Value::bytes(r.read_bin()?),
            Scalar::Raw => Value::bytes(r.read_raw_value()?),

            Scalar::Uuid => match r.peek_type()? {
                TokenType::Ext => {
                    let payload = self.expect_ext(r, self.codes.guid)?;
                    let bytes: [u8; 16] = payload
                        .try_into()
                        .map_err(|_| Error::invalid("a Guid extension must hold 16 bytes"))?;
                    Value::Uuid(uuid::Uuid::from_bytes_le(bytes))
                }
                _ => {
                    let text = r.read_str()?;
                    let trimmed = text
                        .strip_prefix('(')
                        .and_then(|rest| rest.strip_suffix(')'))
                        .unwrap_or(text);
                    Value::Uuid(
                        uuid::Uuid::parse_str(trimmed)
                            .map_err(|err| Error::invalid(format!("{text:?} is not a Guid: {err}")))?,
                    )
                }
            },

            Scalar::Color => {
                let channels = r.read_array_header()?;
                if !(3..=4).contains(&channels) {
                    return Err(Error::invalid("a color holds three or four channels"));
                }
                let mut out = Vec::with_capacity(channels);
                for _ in 0..channels {
                    let channel = r.read_uint()?;
                    if channel > u8::MAX as u64 {
                        return Err(Error::invalid("color channels are eight-bit"));
                    }
                    out.push(Value::Unsigned(channel));
                }
                Value::Sequence(out)
            }
            Scalar::Point => {
                let coords = r.read_array_header()?;
                if coords != 2 {
                    return Err(Error::invalid("a point holds two coordinates"));
                }
                let x = r.read_int()?;
                let y = r.read_int()?;
                Value::Sequence(vec![Value::Signed(x), Value::Signed(y)])
            }
        })
    }

    fn schema(&self) -> serde_json::Value {
        match self.scalar {
            Scalar::Bool => json!({"type": "boolean"}),
            Scalar::I8
            | Scalar::I16
            | Scalar::I32
            | Scalar::I64
            | Scalar::U8
            | Scalar::U16
            | Scalar::U32
            | Scalar::U64
            | Scalar::I128
            | Scalar::U128
            | Scalar::BigInt
            | Scalar::Rune => json!({"type": "integer"}),
            Scalar::F16 | Scalar::F32 | Scalar::F64 | Scalar::Decimal => json!({"type": "number"}),
            Scalar::Timestamp => json!({"type": "string", "format": "date-time"}),
            Scalar::Date => json!({"type": "string", "format": "date"}),
            Scalar::Time => json!({"type": "string", "format": "time"}),
            Scalar::Duration => json!({"type": "string", "format": "duration"}),
            Scalar::Char | Scalar::Str | Scalar::Version => json!({"type": "string"}),
            Scalar::Uri => json!({"type": "string", "format": "uri"}),
            Scalar::Uuid => json!({"type": "string", "format": "uuid"}),
            Scalar::Bytes | Scalar::Raw => {
                json!({"type": "string", "contentEncoding": "base64"})
            }
            Scalar::Color | Scalar::Point => json!({
                "type": "array",
                "items": {"type": "integer"},
            }),
        }
    }
}

fn signed_in_range(
    converter: &ScalarConverter,
    value: &Value,
    min: i64,
    max: i64,
) -> Result<i64, Error> {
    let v = match value {
        Value::Signed(v) => *v,
        Value::Unsigned(v) if *v <= i64::MAX as u64 => *v as i64,
        _ => return Err(converter.mismatch(value)),
    };
    if v < min || v > max {
        return Err(Error::invalid(format!(
            "{v} does not fit the declared {} width",
            converter.scalar.name()
        )));
    }
    Ok(v)
}

fn unsigned_in_range(converter: &ScalarConverter, value: &Value, max: u64) -> Result<u64, Error> {
    let v = match value {
        Value::Unsigned(v) => *v,
        Value::Signed(v) if *v >= 0 => *v as u64,
        _ => return Err(converter.mismatch(value)),
    };
    if v > max {
        return Err(Error::invalid(format!(
            "{v} does not fit the declared {} width",
            converter.scalar.name()
        )));
    }
    Ok(v)
}

fn read_signed_in_range(
    r: &mut Reader<'_>,
    min: i64,
    max: i64,
    width: &'static str,
) -> Result<Value, Error> {
    let v = r.read_int()?;
    if v < min || v > max {
        return Err(Error::invalid(format!("{v} does not fit {width}")));
    }
    Ok(Value::Signed(v))
}

fn read_unsigned_in_range(
    r: &mut Reader<'_>,
    max: u64,
    width: &'static str,
) -> Result<Value, Error> {
    let v = r.read_uint()?;
    if v > max {
        return Err(Error::invalid(format!("{v} does not fit {width}")));
    }
    Ok(Value::Unsigned(v))
}

pub(crate) fn timestamp_from_parts(seconds: i64, nanos: u32) -> Result<OffsetDateTime, Error> {
    let base = OffsetDateTime::from_unix_timestamp(seconds)
        .map_err(|_| Error::invalid("timestamp is outside the representable range"))?;
    Ok(base + time::Duration::nanoseconds(nanos as i64))
}

// Split an instant into whole seconds plus a non-negative subsecond, the
// form the timestamp extension requires even before the epoch.
pub(crate) fn timestamp_parts(value: &OffsetDateTime) -> (i64, u32) {
    let total = value.unix_timestamp_nanos();
    let seconds = total.div_euclid(1_000_000_000) as i64;
    let nanos = total.rem_euclid(1_000_000_000) as u32;
    (seconds, nanos)
}

fn is_version_text(text: &str) -> bool {
    !text.is_empty()
        && text
            .split('.')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}

// Strip trailing zero digits so equal decimals share one wire form.
fn decimal_parts(value: &BigDecimal) -> (BigInt, i64) {
    let (mut digits, mut scale) = value.as_bigint_and_exponent();
    let zero = BigInt::from(0);
    if digits == zero {
        return (zero, 0);
    }
    let ten = BigInt::from(10);
    while scale > 0 && &digits % &ten == zero {
        digits /= &ten;
        scale -= 1;
    }
    (digits, scale)
}

pub(crate) fn f16_bits_to_f64(bits: u16) -> f64 {
    let exp = (bits >> 10) & 0x1f;
    let frac = bits & 0x3ff;
    let magnitude = match (exp, frac) {
        (0, 0) => 0.0,
        (0, f) => f as f64 * (-24f64).exp2(),
        (0x1f, 0) => f64::INFINITY,
        (0x1f, _) => f64::NAN,
        (e, f) => (1.0 + f as f64 / 1024.0) * ((e as i32 - 15) as f64).exp2(),
    };
    if bits & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

pub(crate) fn f64_to_f16_bits(value: f64) -> u16 {
    let sign: u16 = if value.is_sign_negative() { 0x8000 } else { 0 };
    if value.is_nan() {
        return sign | 0x7e00;
    }
    let magnitude = value.abs();
    // 65520 is the rounding boundary beyond which every value maps to
    // infinity.
    if magnitude >= 65520.0 {
        return sign | 0x7c00;
    }
    if magnitude < (-25f64).exp2() {
        return sign;
    }
    if magnitude < (-14f64).exp2() {
        // Subnormal: round the value in units of 2^-24, to nearest even.
        let scaled = magnitude * 24f64.exp2();
        let mut frac = scaled.floor() as u16;
        let rem = scaled - scaled.floor();
        if rem > 0.5 || (rem == 0.5 && frac & 1 == 1) {
            frac += 1;
        }
        return sign | frac;
    }

    let bits = magnitude.to_bits();
    let exp = ((bits >> 52) & 0x7ff) as i32 - 1023;
    let frac52 = bits & 0xf_ffff_ffff_ffff;

    const SHIFT: u32 = 42;
    let mut mant = (frac52 >> SHIFT) as u16;
    let rem = frac52 & ((1 << SHIFT) - 1);
    let halfway = 1u64 << (SHIFT - 1);
    if rem > halfway || (rem == halfway && mant & 1 == 1) {
        mant += 1;
    }

    let mut half_exp = (exp + 15) as u16;
    if mant == 0x400 {
        mant = 0;
        half_exp += 1;
    }
    if half_exp >= 0x1f {
        return sign | 0x7c00;
    }
    sign | (half_exp << 10) | mant
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_f16_round_trips() {
        for v in [0.0, 1.0, -1.0, 1.5, -2.25, 0.5, 65504.0, -65504.0] {
            let bits = f64_to_f16_bits(v);
            assert_eq!(f16_bits_to_f64(bits), v, "for {v}");
        }
        assert_eq!(f16_bits_to_f64(f64_to_f16_bits(f64::INFINITY)), f64::INFINITY);
        assert!(f16_bits_to_f64(f64_to_f16_bits(f64::NAN)).is_nan());
        // Overflow saturates to infinity.
        assert_eq!(f16_bits_to_f64(f64_to_f16_bits(1e6)), f64::INFINITY);
    }

    #[test]
    fn test_f16_subnormals() {
        // The smallest positive half-precision subnormal.
        let tiny = (-24f64).exp2();
        assert_eq!(f64_to_f16_bits(tiny), 0x0001);
        assert_eq!(f16_bits_to_f64(0x0001), tiny);
        // Below half of it rounds to zero.
        assert_eq!(f64_to_f16_bits(tiny / 4.0), 0);
    }

    #[test]
    fn test_decimal_normalization() {
        use std::str::FromStr;

        let a = BigDecimal::from_str("1.50").unwrap();
        let b = BigDecimal::from_str("1.5").unwrap();
        assert_eq!(decimal_parts(&a), decimal_parts(&b));

        let zero = BigDecimal::from_str("0.000").unwrap();
        assert_eq!(decimal_parts(&zero), (BigInt::from(0), 0));
    }

    #[test]
    fn test_version_text() {
        assert!(is_version_text("1.2.3"));
        assert!(is_version_text("10"));
        assert!(!is_version_text("1..2"));
        assert!(!is_version_text("1.2-beta"));
        assert!(!is_version_text(""));
    }
}
