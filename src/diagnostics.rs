//! Move-only diagnostics.
//!
//! Every checker step reports into one `DiagnosticEmitter` per function check. The
//! emitter drops exact repeats of (kind, value, location) and never forgets a record,
//! so callers can compare `count()` snapshots to tell whether a step reported anything.

use crate::ir::{Function, SourceLoc, ValueId};
use miette::Diagnostic as MietteDiagnostic;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    DoubleConsume,
    UseAfterConsume,
    ConsumeDuringBorrow,
    ConsumeOfNonConsumable,
    MissingConsume,
    MissingDestroy,
    MissingReinitialization,
    MoveOutOfPartiallyInitialized,
    UseOfMovedFrom,
    AssignToNonAssignable,
    EscapingCapture,
    ImplicitCopy,
    CheckerMissedCopy,
}

impl DiagnosticKind {
    pub fn code(self) -> &'static str {
        match self {
            DiagnosticKind::DoubleConsume => "moveonly::double_consume",
            DiagnosticKind::UseAfterConsume => "moveonly::use_after_consume",
            DiagnosticKind::ConsumeDuringBorrow => "moveonly::consume_during_borrow",
            DiagnosticKind::ConsumeOfNonConsumable => "moveonly::consume_of_non_consumable",
            DiagnosticKind::MissingConsume => "moveonly::missing_consume",
            DiagnosticKind::MissingDestroy => "moveonly::missing_destroy",
            DiagnosticKind::MissingReinitialization => "moveonly::missing_reinitialization",
            DiagnosticKind::MoveOutOfPartiallyInitialized => "moveonly::partially_initialized_move",
            DiagnosticKind::UseOfMovedFrom => "moveonly::use_of_moved_from",
            DiagnosticKind::AssignToNonAssignable => "moveonly::assign_to_non_assignable",
            DiagnosticKind::EscapingCapture => "moveonly::escaping_capture",
            DiagnosticKind::ImplicitCopy => "moveonly::implicit_copy",
            DiagnosticKind::CheckerMissedCopy => "moveonly::checker_missed_copy",
        }
    }
}

/// One move-only violation: what went wrong, where, and to which value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub loc: SourceLoc,
    pub value: ValueId,
    pub value_name: String,
}

impl Diagnostic {
    pub fn to_error(&self, function: &str) -> MoveOnlyError {
        let function = function.to_string();
        let value = self.value_name.clone();
        let loc = self.loc;
        match self.kind {
            DiagnosticKind::DoubleConsume => MoveOnlyError::DoubleConsume { function, value, loc },
            DiagnosticKind::UseAfterConsume => MoveOnlyError::UseAfterConsume { function, value, loc },
            DiagnosticKind::ConsumeDuringBorrow => {
                MoveOnlyError::ConsumeDuringBorrow { function, value, loc }
            }
            DiagnosticKind::ConsumeOfNonConsumable => {
                MoveOnlyError::ConsumeOfNonConsumable { function, value, loc }
            }
            DiagnosticKind::MissingConsume => MoveOnlyError::MissingConsume { function, value, loc },
            DiagnosticKind::MissingDestroy => MoveOnlyError::MissingDestroy { function, value, loc },
            DiagnosticKind::MissingReinitialization => {
                MoveOnlyError::MissingReinitialization { function, value, loc }
            }
            DiagnosticKind::MoveOutOfPartiallyInitialized => {
                MoveOnlyError::MoveOutOfPartiallyInitialized { function, value, loc }
            }
            DiagnosticKind::UseOfMovedFrom => MoveOnlyError::UseOfMovedFrom { function, value, loc },
            DiagnosticKind::AssignToNonAssignable => {
                MoveOnlyError::AssignToNonAssignable { function, value, loc }
            }
            DiagnosticKind::EscapingCapture => MoveOnlyError::EscapingCapture { function, value, loc },
            DiagnosticKind::ImplicitCopy => MoveOnlyError::ImplicitCopy { function, value, loc },
            DiagnosticKind::CheckerMissedCopy => {
                MoveOnlyError::CheckerMissedCopy { function, value, loc }
            }
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) at {}", self.kind.code(), self.value_name, self.loc)
    }
}

/// User-facing rendering of a diagnostic, one variant per kind.
#[derive(Error, Debug, MietteDiagnostic, Clone, PartialEq, Eq)]
pub enum MoveOnlyError {
    #[error("{function}:{loc}: '{value}' consumed more than once")]
    #[diagnostic(code(moveonly::double_consume), help("consume the value on exactly one path, or reinitialize it in between"))]
    DoubleConsume { function: String, value: String, loc: SourceLoc },

    #[error("{function}:{loc}: '{value}' used after being consumed")]
    #[diagnostic(code(moveonly::use_after_consume))]
    UseAfterConsume { function: String, value: String, loc: SourceLoc },

    #[error("{function}:{loc}: '{value}' consumed while it is still borrowed")]
    #[diagnostic(code(moveonly::consume_during_borrow), help("end the borrow before consuming the value"))]
    ConsumeDuringBorrow { function: String, value: String, loc: SourceLoc },

    #[error("{function}:{loc}: '{value}' is borrowed and cannot be consumed")]
    #[diagnostic(code(moveonly::consume_of_non_consumable))]
    ConsumeOfNonConsumable { function: String, value: String, loc: SourceLoc },

    #[error("{function}:{loc}: '{value}' goes out of scope without being consumed")]
    #[diagnostic(code(moveonly::missing_consume))]
    MissingConsume { function: String, value: String, loc: SourceLoc },

    #[error("{function}:{loc}: '{value}' is still initialized when its storage ends")]
    #[diagnostic(code(moveonly::missing_destroy))]
    MissingDestroy { function: String, value: String, loc: SourceLoc },

    #[error("{function}:{loc}: '{value}' was consumed but not reinitialized before returning")]
    #[diagnostic(code(moveonly::missing_reinitialization), help("inout storage must hold a value when the function returns"))]
    MissingReinitialization { function: String, value: String, loc: SourceLoc },

    #[error("{function}:{loc}: cannot move out of partially initialized '{value}'")]
    #[diagnostic(code(moveonly::partially_initialized_move))]
    MoveOutOfPartiallyInitialized { function: String, value: String, loc: SourceLoc },

    #[error("{function}:{loc}: '{value}' used after being moved from")]
    #[diagnostic(code(moveonly::use_of_moved_from))]
    UseOfMovedFrom { function: String, value: String, loc: SourceLoc },

    #[error("{function}:{loc}: '{value}' cannot be assigned to")]
    #[diagnostic(code(moveonly::assign_to_non_assignable))]
    AssignToNonAssignable { function: String, value: String, loc: SourceLoc },

    #[error("{function}:{loc}: noncopyable '{value}' captured by an escaping closure")]
    #[diagnostic(code(moveonly::escaping_capture))]
    EscapingCapture { function: String, value: String, loc: SourceLoc },

    #[error("{function}:{loc}: '{value}' is noncopyable but would be copied here")]
    #[diagnostic(code(moveonly::implicit_copy))]
    ImplicitCopy { function: String, value: String, loc: SourceLoc },

    #[error("{function}:{loc}: copy of noncopyable '{value}' was not understood by the move checker")]
    #[diagnostic(code(moveonly::checker_missed_copy), help("this is a compiler bug, please report it"))]
    CheckerMissedCopy { function: String, value: String, loc: SourceLoc },
}

/// Per-function diagnostic log with deduplication.
#[derive(Debug, Default)]
pub struct DiagnosticEmitter {
    diagnostics: Vec<Diagnostic>,
    seen: HashSet<(DiagnosticKind, ValueId, SourceLoc)>,
}

impl DiagnosticEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic unless the same (kind, value, location) is already recorded.
    /// Returns true when the record is new.
    pub fn record(&mut self, kind: DiagnosticKind, loc: SourceLoc, value: ValueId, value_name: &str) -> bool {
        if !self.seen.insert((kind, value, loc)) {
            crate::debug_println!("DIAG: Dropping duplicate {:?} for '{}' at {}", kind, value_name, loc);
            return false;
        }
        crate::debug_println!("DIAG: {} '{}' at {}", kind.code(), value_name, loc);
        self.diagnostics.push(Diagnostic {
            kind,
            loc,
            value,
            value_name: value_name.to_string(),
        });
        true
    }

    /// Same as `record`, looking the value's name up in `function`.
    pub fn emit(&mut self, function: &Function, kind: DiagnosticKind, loc: SourceLoc, value: ValueId) -> bool {
        let name = function.value(value).name.clone();
        self.record(kind, loc, value, &name)
    }

    pub fn count(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn emitted_diagnostic(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}
