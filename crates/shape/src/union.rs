use super::{ShapeId, Value};
use std::sync::Arc;

/// A union discriminator value: a signed integer or a UTF-8 string,
/// never both. The base type itself is identified by nil on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Alias {
    Int(i64),
    Str(String),
}

impl std::fmt::Display for Alias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Alias::Int(v) => write!(f, "{v}"),
            Alias::Str(s) => write!(f, "{s:?}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct UnionCase {
    pub alias: Alias,
    pub shape: ShapeId,
}

/// A probe supplied by the shape provider which maps a value to the index
/// of its union case. Consulted when a record's shape is not itself a
/// declared case, so providers can express "nearest declared base"
/// subtyping without the engine doing open type inspection.
pub type CaseProbe = dyn Fn(&Value) -> Option<usize> + Send + Sync;

/// UnionShape declares a polymorphic base type and its closed set of
/// derived cases, ordered most-derived first.
#[derive(Clone)]
pub struct UnionShape {
    pub base: ShapeId,
    pub cases: Vec<UnionCase>,
    pub probe: Option<Arc<CaseProbe>>,
    /// Experimental: no discriminator on the wire; cases are matched by
    /// their required property names.
    pub duck_typed: bool,
}

impl UnionShape {
    pub fn new(base: ShapeId, cases: Vec<UnionCase>) -> UnionShape {
        UnionShape {
            base,
            cases,
            probe: None,
            duck_typed: false,
        }
    }

    pub fn with_probe(mut self, probe: Arc<CaseProbe>) -> UnionShape {
        self.probe = Some(probe);
        self
    }

    pub fn duck_typed(mut self) -> UnionShape {
        self.duck_typed = true;
        self
    }
}

impl std::fmt::Debug for UnionShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnionShape")
            .field("base", &self.base)
            .field("cases", &self.cases)
            .field("duck_typed", &self.duck_typed)
            .finish_non_exhaustive()
    }
}
