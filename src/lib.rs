// Library crate for moveonly-check
// Exposes the IR, analyses and checker pass for the CLI and for integration testing

#[macro_use]
pub mod debug_macros;

pub mod config;
pub mod diagnostics;
pub mod ir;
pub mod analysis;
pub mod checker;

pub use checker::{CheckOutcome, Invalidation, MoveOnlyChecker};
pub use config::CheckerConfig;
pub use diagnostics::{Diagnostic, DiagnosticKind};
