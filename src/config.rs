// Checker configuration.
//
// Defaults match a normal compilation with move-only types enabled. A module file may
// carry a `config` object, and CLI flags override whatever it says.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    /// When false the pass does nothing at all (the language feature is off).
    pub move_only_enabled: bool,
    /// The whole program is visible, so hidden functions cannot be used externally.
    pub whole_module: bool,
    /// Run the missed-copy audit when no checker emitted a diagnostic.
    pub run_missed_copy_audit: bool,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            move_only_enabled: true,
            whole_module: false,
            run_missed_copy_audit: true,
        }
    }
}

impl CheckerConfig {
    pub fn whole_module(mut self, whole_module: bool) -> Self {
        self.whole_module = whole_module;
        self
    }
}
