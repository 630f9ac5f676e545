//! Error kinds for dynt compile phases.

use strum_macros::Display;

/// What went wrong.
///
/// Every variant maps to a failure some compile phase actually reports:
/// the parser, the IR builder, or the emitter. Runtime faults (calling a
/// non-function, unknown intrinsics) abort the process and never surface
/// here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Invalid syntax in a source buffer
    SyntaxError,

    /// The IR builder received a parse-tree node kind it cannot lower
    BadNode,

    /// The left side of an assignment is not an lvalue
    BadAssignTarget,

    /// A control-flow marker has no matching open jump
    BadMarker,

    /// The emitter saw an operation it cannot lower
    UnsupportedOp,

    /// Mapping or protecting executable memory failed
    CodeMapFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_display_their_name() {
        assert_eq!(ErrorKind::SyntaxError.to_string(), "SyntaxError");
        assert_eq!(ErrorKind::BadMarker.to_string(), "BadMarker");
        assert_eq!(ErrorKind::UnsupportedOp.to_string(), "UnsupportedOp");
    }
}
