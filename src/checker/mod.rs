// Move-only checker pass.
//
// Per function, strictly in this order:
//
//   dead body deletion -> object scan -> object check -> address scan -> address check
//   -> missed-copy audit (only if nothing was reported) -> copy cleanup
//
// Each function gets its own emitter and interval allocator, so functions of a module
// can be checked in parallel.

pub mod address_checker;
pub mod borrow_to_destructure;
pub mod candidates;
pub mod cleanup;
pub mod interval_alloc;
pub mod object_checker;

use crate::analysis::FunctionAnalyses;
use crate::config::CheckerConfig;
use crate::debug_println;
use crate::diagnostics::{Diagnostic, DiagnosticEmitter};
use crate::ir::{Function, Module, ValueRepr};
use address_checker::AddressChecker;
use candidates::search_for_candidates;
use interval_alloc::IntervalAllocator;
use object_checker::ObjectChecker;
use rayon::prelude::*;
use serde::Serialize;

/// Which cached analyses a caller has to throw away after the pass ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Invalidation {
    None,
    Instructions,
    FunctionBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub function: String,
    pub made_change: bool,
    pub invalidation: Invalidation,
    pub diagnostics: Vec<Diagnostic>,
}

impl CheckOutcome {
    fn unchanged(function: &Function) -> Self {
        Self {
            function: function.name.clone(),
            made_change: false,
            invalidation: Invalidation::None,
            diagnostics: Vec::new(),
        }
    }

    pub fn emitted_diagnostic(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MoveOnlyChecker {
    config: CheckerConfig,
}

impl MoveOnlyChecker {
    pub fn new(config: CheckerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    pub fn check_function(&self, function: &mut Function) -> CheckOutcome {
        let mut outcome = CheckOutcome::unchanged(function);

        if !self.config.move_only_enabled {
            debug_println!("CHECKER: Move-only checking disabled, skipping '{}'", function.name);
            return outcome;
        }
        if function.attributes.deserialized_canonical {
            debug_println!("CHECKER: '{}' was already checked, skipping", function.name);
            return outcome;
        }

        if function.attributes.delete_if_unused
            && function.attributes.ref_count == 0
            && !function.linkage.is_possibly_used_externally(self.config.whole_module)
        {
            cleanup::delete_dead_function(function);
            outcome.made_change = true;
            outcome.invalidation = Invalidation::FunctionBody;
            return outcome;
        }

        let mut emitter = DiagnosticEmitter::new();
        let mut allocator = IntervalAllocator::new();
        let mut made_change = false;

        if function.attributes.no_move_only_diagnostics {
            debug_println!("CHECKER: Diagnostics suppressed for '{}', cleanup only", function.name);
        } else {
            made_change |= self.run_checkers(function, &mut emitter, &mut allocator);

            if !emitter.emitted_diagnostic() && self.config.run_missed_copy_audit {
                cleanup::missed_copy_audit(function, &mut emitter);
            }
        }

        made_change |= cleanup::cleanup_copies(function).made_change();

        outcome.made_change = made_change;
        if made_change {
            outcome.invalidation = Invalidation::Instructions;
        }
        outcome.diagnostics = emitter.into_diagnostics();
        debug_println!(
            "CHECKER: '{}' done, {} diagnostic(s), changed: {}",
            outcome.function,
            outcome.diagnostics.len(),
            outcome.made_change
        );
        outcome
    }

    fn run_checkers(
        &self,
        function: &mut Function,
        emitter: &mut DiagnosticEmitter,
        allocator: &mut IntervalAllocator,
    ) -> bool {
        // Scans and the destructure rewrite only add or remove instructions, so one
        // set of analyses stays valid for the whole run.
        let analyses = FunctionAnalyses::compute(function);
        let mut made_change = false;

        let objects = search_for_candidates(function, &analyses, emitter, ValueRepr::Object);
        made_change |= objects.made_change;
        if !objects.markers.is_empty() {
            let before = emitter.count();
            let result = ObjectChecker::new(function, &analyses, emitter, allocator).check(objects.markers);
            made_change |= result.made_change;
            debug_println!(
                "CHECKER: Object checker visited {} marker(s), {} new diagnostic(s)",
                result.checked,
                emitter.count() - before
            );
        }
        allocator.reset();

        let addresses = search_for_candidates(function, &analyses, emitter, ValueRepr::Address);
        made_change |= addresses.made_change;
        if !addresses.markers.is_empty() {
            let before = emitter.count();
            let checked = AddressChecker::new(function, &analyses, emitter, allocator).check(&addresses.markers);
            debug_println!(
                "CHECKER: Address checker visited {} marker(s), {} new diagnostic(s)",
                checked,
                emitter.count() - before
            );
        }
        allocator.reset();

        made_change
    }

    /// Check every function of `module`, in parallel. Outcomes are in module order.
    pub fn check_module(&self, module: &mut Module) -> Vec<CheckOutcome> {
        let outcomes: Vec<CheckOutcome> = module
            .functions
            .par_iter_mut()
            .map(|function| self.check_function(function))
            .collect();
        if outcomes.iter().any(|o| o.invalidation == Invalidation::FunctionBody) {
            module.recompute_ref_counts();
        }
        outcomes
    }
}
