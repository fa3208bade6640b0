use std::fmt::Write as _;

/// Build-time configuration faults, raised while a converter is being
/// constructed rather than while data moves.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("shape {id} is not defined by this provider")]
    UnknownShape { id: u32 },
    #[error("union {base} declares alias {alias} more than once")]
    DuplicateAlias { base: String, alias: String },
    #[error("{type_name} mixes members with and without explicit key indexes")]
    MixedKeyIndexes { type_name: String },
    #[error("{type_name} declares more than one unused-data bucket")]
    MultipleUnusedBuckets { type_name: String },
    #[error("{type_name} declares properties which share the wire name {wire_name:?}")]
    DuplicateWireName {
        type_name: String,
        wire_name: String,
    },
    #[error("{type_name} assigns key index {index} to more than one property")]
    DuplicateKeyIndex { type_name: String, index: u32 },
    #[error("no custom converter named {name:?} is registered")]
    UnknownConverter { name: String },
    #[error("{type_name} keys its entries by {key_type}, which has no scalar wire identity")]
    ObjectKeyedDictionary {
        type_name: String,
        key_type: String,
    },
    #[error(
        "duck-typed union {base}: cases {first} and {second} require the same property names"
    )]
    AmbiguousDuckCases {
        base: String,
        first: String,
        second: String,
    },
}

/// One step of the object-graph path attached to a propagating error.
#[derive(Clone, Debug)]
pub enum Segment {
    Property(String),
    Index(usize),
    Case(String),
    Key(String),
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Property(name) => f.write_str(name),
            Segment::Index(at) => write!(f, "{at}"),
            Segment::Case(name) => f.write_str(name),
            Segment::Key(key) => f.write_str(key),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] msgpack::Error),
    #[error("{0}")]
    Invalid(String),
    #[error("nesting depth exceeded the maximum of {max}")]
    DepthExceeded { max: u32 },
    #[error("missing required properties: {}", .names.join(", "))]
    MissingRequired { names: Vec<String> },
    #[error("read a nil value for the non-nullable property {name}")]
    DisallowedNull { name: String },
    #[error("property {name} was assigned twice within one object")]
    DoubleAssignment { name: String },
    #[error("unknown union discriminator {alias}")]
    UnknownDiscriminator { alias: String },
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("the operation was cancelled")]
    Cancelled,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("byte source failed")]
    Io(#[from] std::io::Error),
    /// A breadcrumb wrapper identifying where in the object graph an inner
    /// error arose.
    #[error("at {segment}: {source}")]
    At {
        segment: Segment,
        #[source]
        source: Box<Error>,
    },
    /// The top-level wrapper attached by the facade.
    #[error("failed to {operation}: {source}")]
    Op {
        operation: &'static str,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn invalid(message: impl Into<String>) -> Error {
        Error::Invalid(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Error {
        Error::Unsupported(message.into())
    }

    /// Wrap with a path breadcrumb. Cancellation is never wrapped.
    pub fn at(self, segment: Segment) -> Error {
        match self {
            Error::Cancelled => Error::Cancelled,
            err => Error::At {
                segment,
                source: Box::new(err),
            },
        }
    }

    /// Wrap with the top-level operation name. Cancellation is never
    /// wrapped.
    pub fn during(self, operation: &'static str) -> Error {
        match self {
            Error::Cancelled => Error::Cancelled,
            err => Error::Op {
                operation,
                source: Box::new(err),
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Render the breadcrumb chain as a pointer-style path, outermost
    /// segment first.
    pub fn path(&self) -> String {
        let mut out = String::new();
        let mut cursor = self;
        loop {
            match cursor {
                Error::Op { source, .. } => cursor = source,
                Error::At { segment, source } => {
                    out.push('/');
                    // Writing a Display into a String cannot fail.
                    write!(out, "{segment}").unwrap();
                    cursor = source;
                }
                _ => break,
            }
        }
        if out.is_empty() {
            out.push('/');
        }
        out
    }

    /// The innermost error beneath any breadcrumb or operation wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::At { source, .. } | Error::Op { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_breadcrumb_path() {
        let err = Error::invalid("boom")
            .at(Segment::Index(3))
            .at(Segment::Property("riders".to_owned()))
            .during("deserialize");

        assert_eq!(err.path(), "/riders/3");
        assert!(matches!(err.root(), Error::Invalid(m) if m == "boom"));
        assert_eq!(
            err.to_string(),
            "failed to deserialize: at riders: at 3: boom"
        );
    }

    #[test]
    fn test_cancellation_is_never_wrapped() {
        let err = Error::Cancelled
            .at(Segment::Property("x".to_owned()))
            .during("serialize");
        assert!(err.is_cancelled());
    }
}
