//! The error type compile phases report.

use std::fmt;

use crate::ErrorKind;

/// A compile-phase failure: what went wrong, which phase saw it, and the
/// pieces of input worth printing alongside.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    operation: &'static str,
    context: Vec<(&'static str, String)>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            operation: "",
            context: Vec::new(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The phase that reported this error, e.g. `parser::parse_top`.
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn context(&self) -> &[(&'static str, String)] {
        &self.context
    }

    /// Record the reporting phase. The innermost caller wins: an outer
    /// phase re-tagging a propagated error leaves it untouched.
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        if self.operation.is_empty() {
            self.operation = operation;
        }
        self
    }

    /// Attach a key-value pair of input context (a lexeme, an offset, a
    /// node name).
    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Wrap the underlying failure without leaking its type into the
    /// surface.
    pub fn set_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.operation.is_empty() {
            write!(f, "{}: ", self.operation)?;
        }
        write!(f, "{}: {}", self.kind, self.message)?;

        if !self.context.is_empty() {
            write!(f, " (")?;
            for (i, (key, value)) in self.context.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {}", key, value)?;
            }
            write!(f, ")")?;
        }

        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl Error {
    /// Create a SyntaxError
    pub fn syntax_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SyntaxError, message)
    }

    /// Create a BadNode error
    pub fn bad_node(node: impl Into<String>) -> Self {
        let node = node.into();
        Self::new(ErrorKind::BadNode, format!("cannot lower node '{}'", node))
            .with_context("node", node)
    }

    /// Create a BadAssignTarget error
    pub fn bad_assign_target(node: impl Into<String>) -> Self {
        let node = node.into();
        Self::new(
            ErrorKind::BadAssignTarget,
            format!("invalid assignment to '{}'", node),
        )
        .with_context("node", node)
    }

    /// Create a BadMarker error
    pub fn bad_marker(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadMarker, message)
    }

    /// Create an UnsupportedOp error
    pub fn unsupported_op(op: impl Into<String>) -> Self {
        let op = op.into();
        Self::new(
            ErrorKind::UnsupportedOp,
            format!("unsupported operation '{}'", op),
        )
        .with_context("op", op)
    }

    /// Create a CodeMapFailed error
    pub fn code_map_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CodeMapFailed, message)
    }
}
