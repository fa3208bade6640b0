use super::ShapeId;
use std::sync::{Arc, RwLock};

/// Value is the dynamic representation of user data flowing through the
/// engine: a sum over nil, booleans, integers, floats, rich scalar types,
/// sequences, maps, typed records, and opaque extension blobs.
#[derive(Clone, Debug)]
pub enum Value {
    Nil,
    Bool(bool),
    Signed(i64),
    Unsigned(u64),
    I128(i128),
    U128(u128),
    Float(f64),
    Char(char),
    Str(Arc<str>),
    Bytes(Arc<[u8]>),
    Timestamp(time::OffsetDateTime),
    Date(time::Date),
    Time(time::Time),
    Duration(time::Duration),
    Uuid(uuid::Uuid),
    BigInt(num_bigint::BigInt),
    Decimal(bigdecimal::BigDecimal),
    Sequence(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Record(Arc<Record>),
    Extension(i8, Arc<[u8]>),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Value {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn bytes(b: impl AsRef<[u8]>) -> Value {
        Value::Bytes(Arc::from(b.as_ref()))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// A short name of the value's variant, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Signed(_) => "signed integer",
            Value::Unsigned(_) => "unsigned integer",
            Value::I128(_) => "128-bit integer",
            Value::U128(_) => "128-bit unsigned integer",
            Value::Float(_) => "float",
            Value::Char(_) => "char",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Timestamp(_) => "timestamp",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Duration(_) => "duration",
            Value::Uuid(_) => "uuid",
            Value::BigInt(_) => "big integer",
            Value::Decimal(_) => "decimal",
            Value::Sequence(_) => "sequence",
            Value::Map(_) => "map",
            Value::Record(_) => "record",
            Value::Extension(..) => "extension",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Bool(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Signed(v)
    }
}
impl From<u64> for Value {
    fn from(v: u64) -> Value {
        Value::Unsigned(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Float(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::str(v)
    }
}
impl From<Arc<Record>> for Value {
    fn from(v: Arc<Record>) -> Value {
        Value::Record(v)
    }
}

// Structural equality, used as the declared equality of round-trip
// properties. Floats compare by bit pattern so NaN equals itself. Records
// shortcut on identity, then compare shape and slots; comparing two
// distinct-but-cyclic records is the caller's concern.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Nil, Nil) => true,
            (Bool(a), Bool(b)) => a == b,
            (Signed(a), Signed(b)) => a == b,
            (Unsigned(a), Unsigned(b)) => a == b,
            (I128(a), I128(b)) => a == b,
            (U128(a), U128(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Char(a), Char(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Timestamp(a), Timestamp(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (Time(a), Time(b)) => a == b,
            (Duration(a), Duration(b)) => a == b,
            (Uuid(a), Uuid(b)) => a == b,
            (BigInt(a), BigInt(b)) => a == b,
            (Decimal(a), Decimal(b)) => a == b,
            (Sequence(a), Sequence(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Record(a), Record(b)) => {
                Arc::ptr_eq(a, b) || (a.shape() == b.shape() && a.snapshot() == b.snapshot())
            }
            (Extension(ac, ab), Extension(bc, bb)) => ac == bc && ab == bb,
            _ => false,
        }
    }
}

/// Record is a typed object instance: its object shape plus one slot per
/// declared property. Slots are interior-mutable so deserialization can
/// materialize cyclic graphs by setting slots after the record exists, and
/// `Arc<Record>` pointer identity is the object identity that reference
/// preservation tracks. An unset slot (`None`) is distinct from an explicit
/// nil.
pub struct Record {
    shape: ShapeId,
    slots: RwLock<Vec<Option<Value>>>,
}

impl Record {
    pub fn new(shape: ShapeId, width: usize) -> Arc<Record> {
        Arc::new(Record {
            shape,
            slots: RwLock::new(vec![None; width]),
        })
    }

    /// Build a record with the given slot values, in declaration order.
    pub fn with_slots(shape: ShapeId, slots: Vec<Option<Value>>) -> Arc<Record> {
        Arc::new(Record {
            shape,
            slots: RwLock::new(slots),
        })
    }

    pub fn shape(&self) -> ShapeId {
        self.shape
    }

    pub fn width(&self) -> usize {
        self.slots.read().unwrap().len()
    }

    pub fn get(&self, slot: usize) -> Option<Value> {
        self.slots.read().unwrap().get(slot).cloned().flatten()
    }

    pub fn set(&self, slot: usize, value: Value) {
        self.slots.write().unwrap()[slot] = Some(value);
    }

    pub fn is_set(&self, slot: usize) -> bool {
        matches!(self.slots.read().unwrap().get(slot), Some(Some(_)))
    }

    pub fn snapshot(&self) -> Vec<Option<Value>> {
        self.slots.read().unwrap().clone()
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("shape", &self.shape)
            .field("slots", &*self.slots.read().unwrap())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_float_equality_by_bits() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
        assert_eq!(Value::Float(1.5), Value::Float(1.5));
    }

    #[test]
    fn test_record_identity_and_structure() {
        let a = Record::new(ShapeId(0), 2);
        a.set(0, Value::str("x"));

        let b = Record::new(ShapeId(0), 2);
        b.set(0, Value::str("x"));

        // Same structure compares equal; identity still distinguishes.
        assert_eq!(Value::Record(a.clone()), Value::Record(b.clone()));
        assert!(!Arc::ptr_eq(&a, &b));

        b.set(1, Value::Signed(1));
        assert_ne!(Value::Record(a), Value::Record(b));
    }

    #[test]
    fn test_unset_slot_is_not_nil() {
        let rec = Record::new(ShapeId(3), 1);
        assert!(!rec.is_set(0));
        assert_eq!(rec.get(0), None);

        rec.set(0, Value::Nil);
        assert!(rec.is_set(0));
        assert_eq!(rec.get(0), Some(Value::Nil));
    }
}
