use super::{AsyncSource, Converter};
use crate::context::{ReadCx, WriteCx};
use crate::error::{Error, Segment};
use fxhash::FxHashMap;
use msgpack::{Reader, TokenType, Writer};
use serde_json::json;
use shape::{Alias, CaseProbe, ShapeId, Value};
use std::sync::Arc;

pub(crate) struct CasePlan {
    pub alias: Alias,
    pub shape: ShapeId,
    pub name: String,
    pub converter: Arc<dyn Converter>,
    /// Wire names the case requires, for duck-typed matching.
    pub required_keys: Vec<String>,
}

/// UnionConverter frames a payload with its case discriminator: nil for
/// the base type itself, or the case's integer or string alias. The wire
/// shape is either a two-slot array or a single-entry map, per
/// configuration.
pub(crate) struct UnionConverter {
    pub type_name: String,
    pub base_shape: ShapeId,
    pub base: Arc<dyn Converter>,
    /// Most-derived first; write-side probing walks in order.
    pub cases: Vec<CasePlan>,
    pub by_int: FxHashMap<i64, usize>,
    pub by_str: FxHashMap<String, usize>,
    pub probe: Option<Arc<CaseProbe>>,
    pub use_objects: bool,
    pub duck_typed: bool,
}

impl UnionConverter {
    /// Resolve which case (if any) carries this value: exact record-shape
    /// match first, then the provider's probe for undeclared derivatives.
    fn select_case(&self, value: &Value) -> Option<usize> {
        if let Value::Record(record) = value {
            if let Some(at) = self.cases.iter().position(|c| c.shape == record.shape()) {
                return Some(at);
            }
            if record.shape() == self.base_shape {
                return None;
            }
        }
        self.probe.as_ref().and_then(|probe| probe(value))
    }

    fn write_discriminator(&self, w: &mut Writer, case: Option<&CasePlan>) {
        match case.map(|c| &c.alias) {
            None => w.write_nil(),
            Some(Alias::Int(alias)) => w.write_int(*alias),
            Some(Alias::Str(alias)) => w.write_str(alias),
        }
    }

    fn case_by_int(&self, alias: i64) -> Result<&CasePlan, Error> {
        self.by_int
            .get(&alias)
            .map(|&at| &self.cases[at])
            .ok_or_else(|| Error::UnknownDiscriminator {
                alias: alias.to_string(),
            })
    }

    fn case_by_str(&self, alias: &str) -> Result<&CasePlan, Error> {
        self.by_str
            .get(alias)
            .map(|&at| &self.cases[at])
            .ok_or_else(|| Error::UnknownDiscriminator {
                alias: format!("{alias:?}"),
            })
    }

    fn write_framed(&self, w: &mut Writer, value: &Value, cx: &mut WriteCx) -> Result<(), Error> {
        let selected = self.select_case(value);
        let (case, converter, label) = match selected {
            Some(at) => {
                let case = &self.cases[at];
                (Some(case), &case.converter, case.name.as_str())
            }
            None => {
                if !matches!(value, Value::Record(r) if r.shape() == self.base_shape) {
                    return Err(Error::unsupported(format!(
                        "no declared union case of {} covers this value",
                        self.type_name
                    )));
                }
                (None, &self.base, "base")
            }
        };

        if self.use_objects {
            w.write_map_header(1);
        } else {
            w.write_array_header(2);
        }
        self.write_discriminator(w, case);

        cx.descend()?;
        converter
            .write(w, value, cx)
            .map_err(|e| e.at(Segment::Case(label.to_owned())))?;
        cx.ascend();
        Ok(())
    }

    fn read_framed(&self, r: &mut Reader<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        if self.use_objects {
            let entries = r.read_map_header()?;
            if entries != 1 {
                return Err(Error::invalid(format!(
                    "a union must be a single-entry map, found {entries} entries"
                )));
            }
        } else {
            let slots = r.read_array_header()?;
            if slots != 2 {
                return Err(Error::invalid(format!(
                    "a union must be a two-slot array, found {slots} slots"
                )));
            }
        }

        let (converter, label) = match r.peek_type()? {
            TokenType::Nil => {
                r.read_nil()?;
                (&self.base, "base".to_owned())
            }
            TokenType::Signed | TokenType::Unsigned => {
                let case = self.case_by_int(r.read_int()?)?;
                (&case.converter, case.name.clone())
            }
            TokenType::Str => {
                let case = self.case_by_str(r.read_str()?)?;
                (&case.converter, case.name.clone())
            }
            found => {
                return Err(Error::invalid(format!(
                    "a union discriminator must be nil, an integer, or a string, found {}",
                    found.name()
                )))
            }
        };

        cx.descend()?;
        let value = converter
            .read(r, cx)
            .map_err(|e| e.at(Segment::Case(label)))?;
        cx.ascend();
        Ok(value)
    }

    // Duck-typed reads scan the payload's keys on a forked reader, choose
    // the single case whose required names are all present, then re-read
    // the payload with that case's converter.
    fn read_duck(&self, r: &mut Reader<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        let mut scan = *r;
        let entries = scan.read_map_header()?;
        let mut present: Vec<&str> = Vec::with_capacity(entries);
        for _ in 0..entries {
            present.push(scan.read_str()?);
            scan.skip_value()?;
        }

        let mut matched: Option<usize> = None;
        for (at, case) in self.cases.iter().enumerate() {
            if case
                .required_keys
                .iter()
                .all(|key| present.iter().any(|p| p == key))
            {
                if let Some(earlier) = matched {
                    return Err(Error::invalid(format!(
                        "payload matches both union cases {} and {}",
                        self.cases[earlier].name, case.name
                    )));
                }
                matched = Some(at);
            }
        }

        let Some(at) = matched else {
            return Err(Error::invalid(format!(
                "payload matches no case of the duck-typed union {}",
                self.type_name
            )));
        };
        let case = &self.cases[at];

        cx.descend()?;
        let value = case
            .converter
            .read(r, cx)
            .map_err(|e| e.at(Segment::Case(case.name.clone())))?;
        cx.ascend();
        Ok(value)
    }
}

#[async_trait::async_trait]
impl Converter for UnionConverter {
    fn write(&self, w: &mut Writer, value: &Value, cx: &mut WriteCx) -> Result<(), Error> {
        if self.duck_typed {
            let (converter, label) = match self.select_case(value) {
                Some(at) => {
                    let case = &self.cases[at];
                    (&case.converter, case.name.as_str())
                }
                None => (&self.base, "base"),
            };
            cx.descend()?;
            converter
                .write(w, value, cx)
                .map_err(|e| e.at(Segment::Case(label.to_owned())))?;
            cx.ascend();
            return Ok(());
        }
        self.write_framed(w, value, cx)
    }

    fn read(&self, r: &mut Reader<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        if self.duck_typed {
            return self.read_duck(r, cx);
        }
        self.read_framed(r, cx)
    }

    async fn write_to(
        &self,
        sink: &mut super::AsyncSink<'_>,
        value: &Value,
        cx: &mut WriteCx,
    ) -> Result<(), Error> {
        let selected = self.select_case(value);
        let (case, converter, label) = match selected {
            Some(at) => {
                let case = &self.cases[at];
                (Some(case), &case.converter, case.name.as_str())
            }
            None => {
                if !matches!(value, Value::Record(r) if r.shape() == self.base_shape) {
                    return Err(Error::unsupported(format!(
                        "no declared union case of {} covers this value",
                        self.type_name
                    )));
                }
                (None, &self.base, "base")
            }
        };

        if !self.duck_typed {
            if self.use_objects {
                sink.writer().write_map_header(1);
            } else {
                sink.writer().write_array_header(2);
            }
            self.write_discriminator(sink.writer(), case);
        }

        cx.descend()?;
        converter
            .write_to(sink, value, cx)
            .await
            .map_err(|e| e.at(Segment::Case(label.to_owned())))?;
        cx.ascend();
        sink.maybe_flush().await
    }

    async fn read_from(&self, src: &mut AsyncSource<'_>, cx: &mut ReadCx) -> Result<Value, Error> {
        if self.duck_typed {
            return Err(Error::unsupported(
                "duck-typed unions require a buffered payload",
            ));
        }

        if self.use_objects {
            let entries = src.read_map_header().await?;
            if entries != 1 {
                return Err(Error::invalid(format!(
                    "a union must be a single-entry map, found {entries} entries"
                )));
            }
        } else {
            let slots = src.read_array_header().await?;
            if slots != 2 {
                return Err(Error::invalid(format!(
                    "a union must be a two-slot array, found {slots} slots"
                )));
            }
        }

        let (converter, label) = match src.peek_type().await? {
            TokenType::Nil => {
                src.read_nil().await?;
                (&self.base, "base".to_owned())
            }
            TokenType::Signed | TokenType::Unsigned => {
                let case = self.case_by_int(src.read_int().await?)?;
                (&case.converter, case.name.clone())
            }
            TokenType::Str => {
                let alias = src.read_str().await?;
                let case = self.case_by_str(&alias)?;
                (&case.converter, case.name.clone())
            }
            found => {
                return Err(Error::invalid(format!(
                    "a union discriminator must be nil, an integer, or a string, found {}",
                    found.name()
                )))
            }
        };

        cx.descend()?;
        let value = converter
            .read_from(src, cx)
            .await
            .map_err(|e| e.at(Segment::Case(label)))?;
        cx.ascend();
        Ok(value)
    }

    fn prefer_async(&self) -> bool {
        true
    }

    fn schema(&self) -> serde_json::Value {
        let mut arms: Vec<serde_json::Value> = vec![self.base.schema()];
        arms.extend(self.cases.iter().map(|case| case.converter.schema()));
        json!({"oneOf": arms})
    }
}
