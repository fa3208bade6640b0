use super::Converter;
use crate::context::{ReadCx, WriteCx};
use crate::error::Error;
use fxhash::FxHashMap;
use msgpack::{Reader, TokenType, Writer};
use serde_json::json;
use shape::{EnumMember, Value};

/// EnumConverter carries enum values either as their underlying integer
/// (ordinal mode) or by declared name. By-name reads accept any casing
/// unless the enum distinguishes members by case alone; by-name writes
/// fall back to the ordinal for values with no declared name.
pub(crate) struct EnumConverter {
    pub type_name: String,
    pub members: Vec<EnumMember>,
    pub by_value: FxHashMap<i64, usize>,
    pub by_name: FxHashMap<String, usize>,
    /// Lowercased name table; absent when members are case-distinguished.
    pub by_lower: Option<FxHashMap<String, usize>>,
    pub by_name_mode: bool,
}

impl EnumConverter {
    fn underlying(&self, value: &Value) -> Result<i64, Error> {
        match value {
            Value::Signed(v) => Ok(*v),
            Value::Unsigned(v) if *v <= i64::MAX as u64 => Ok(*v as i64),
            other => Err(Error::invalid(format!(
                "expected a {} enum value, found {}",
                self.type_name,
                other.kind_name()
            ))),
        }
    }
}

#[async_trait::async_trait]
impl Converter for EnumConverter {
    fn write(&self, w: &mut Writer, value: &Value, _cx: &mut WriteCx) -> Result<(), Error> {
        let underlying = self.underlying(value)?;
        if self.by_name_mode {
            if let Some(&at) = self.by_value.get(&underlying) {
                w.write_str(&self.members[at].name);
                return Ok(());
            }
            // No clean name for this value; fall back to the ordinal.
        }
        w.write_int(underlying);
        Ok(())
    }

    fn read(&self, r: &mut Reader<'_>, _cx: &mut ReadCx) -> Result<Value, Error> {
        match r.peek_type()? {
            TokenType::Str => {
                let name = r.read_str()?;
                let member = self.by_name.get(name).copied().or_else(|| {
                    self.by_lower
                        .as_ref()
                        .and_then(|table| table.get(&name.to_lowercase()).copied())
                });
                match member {
                    Some(at) => Ok(Value::Signed(self.members[at].value)),
                    None => Err(Error::invalid(format!(
                        "{name:?} is not a member of {}",
                        self.type_name
                    ))),
                }
            }
            _ => Ok(Value::Signed(r.read_int()?)),
        }
    }

    fn schema(&self) -> serde_json::Value {
        if self.by_name_mode {
            let names: Vec<&str> = self.members.iter().map(|m| m.name.as_str()).collect();
            json!({"enum": names})
        } else {
            json!({"type": "integer"})
        }
    }
}
