// Candidate scanner: collects the introduction markers one checker has to visit.
//
// A single walk over the instructions in block order. Markers in blocks that cannot
// be reached are dropped on the spot (their uses are rewired to the wrapped value),
// and markers the producer already flagged as uncheckable are reported right here
// instead of being handed to a checker.

use crate::analysis::FunctionAnalyses;
use crate::debug_println;
use crate::diagnostics::{DiagnosticEmitter, DiagnosticKind};
use crate::ir::{Function, InstId, InstKind, MarkerCheck, ValueRepr};
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct ScanResult {
    /// Markers to check, in instruction order, without duplicates.
    pub markers: Vec<InstId>,
    /// Set when unreachable markers were deleted.
    pub made_change: bool,
}

/// Scan `function` for markers whose wrapped value has representation `repr`.
pub fn search_for_candidates(
    function: &mut Function,
    analyses: &FunctionAnalyses,
    emitter: &mut DiagnosticEmitter,
    repr: ValueRepr,
) -> ScanResult {
    let mut result = ScanResult::default();
    let mut seen = HashSet::new();
    let mut dead = Vec::new();

    for id in function.instructions() {
        let inst = function.inst(id);
        let InstKind::MarkMoveOnly { result: value, operand, check } = inst.kind else {
            continue;
        };
        let marker_repr = function.value(value).repr;
        let operand_repr = function.value(operand).repr;
        if marker_repr != operand_repr {
            panic!(
                "move-only marker '{}' in '{}' is {:?} but wraps {:?} value '{}'",
                function.value(value).name,
                function.name,
                marker_repr,
                operand_repr,
                function.value(operand).name
            );
        }
        if marker_repr != repr {
            continue;
        }

        if !analyses.is_reachable(inst.block) {
            dead.push((id, value, operand));
            continue;
        }

        if check == MarkerCheck::Invalid {
            debug_println!("SCAN: Marker '{}' cannot be checked", function.value(value).name);
            emitter.emit(function, DiagnosticKind::EscapingCapture, inst.loc, value);
            continue;
        }

        if seen.insert(id) {
            debug_println!("SCAN: Found {:?} marker '{}'", repr, function.value(value).name);
            result.markers.push(id);
        }
    }

    for (id, value, operand) in dead {
        debug_println!("SCAN: Removing unreachable marker '{}'", function.value(value).name);
        function.replace_all_uses(value, operand);
        function.erase_inst(id);
        result.made_change = true;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ArgConvention, FunctionBuilder, Type};

    fn file() -> Type {
        Type::leaf("File", true)
    }

    #[test]
    fn test_partitions_by_representation() {
        let mut b = FunctionBuilder::new("f");
        let arg = b.argument("x", file(), ArgConvention::Owned);
        let slot = b.alloc_stack("slot", file());
        let object = b.mark_owned(arg);
        let address = b.mark_owned(slot);
        b.destroy_value(object);
        b.destroy_addr(address);
        b.dealloc_stack(slot);
        b.ret(None);
        let mut function = b.finish();
        let analyses = FunctionAnalyses::compute(&function);
        let mut emitter = DiagnosticEmitter::new();

        let objects = search_for_candidates(&mut function, &analyses, &mut emitter, ValueRepr::Object);
        let addresses = search_for_candidates(&mut function, &analyses, &mut emitter, ValueRepr::Address);
        assert_eq!(objects.markers, vec![function.defining_inst(object).unwrap()]);
        assert_eq!(addresses.markers, vec![function.defining_inst(address).unwrap()]);
        assert!(!objects.made_change && !addresses.made_change);
    }

    #[test]
    fn test_invalid_marker_reported_immediately() {
        let mut b = FunctionBuilder::new("f");
        let arg = b.argument("x", file(), ArgConvention::Owned);
        let marked = b.mark(arg, MarkerCheck::Invalid);
        b.destroy_value(marked);
        b.ret(None);
        let mut function = b.finish();
        let analyses = FunctionAnalyses::compute(&function);
        let mut emitter = DiagnosticEmitter::new();

        let scan = search_for_candidates(&mut function, &analyses, &mut emitter, ValueRepr::Object);
        assert!(scan.markers.is_empty());
        assert_eq!(emitter.count(), 1);
        assert_eq!(emitter.diagnostics()[0].kind, DiagnosticKind::EscapingCapture);
    }

    #[test]
    fn test_unreachable_marker_is_deleted() {
        let mut b = FunctionBuilder::new("f");
        let arg = b.argument("x", file(), ArgConvention::Owned);
        let dead = b.block("dead");
        b.destroy_value(arg);
        b.ret(None);
        b.position_at_end(dead);
        let marked = b.mark_owned(arg);
        let destroy = b.destroy_value(marked);
        b.ret(None);
        let mut function = b.finish();
        let analyses = FunctionAnalyses::compute(&function);
        let mut emitter = DiagnosticEmitter::new();

        let scan = search_for_candidates(&mut function, &analyses, &mut emitter, ValueRepr::Object);
        assert!(scan.markers.is_empty());
        assert!(scan.made_change);
        assert_eq!(function.block(dead).insts, vec![destroy]);
        assert_eq!(function.inst(destroy).kind, InstKind::DestroyValue { operand: arg });
    }

    #[test]
    #[should_panic(expected = "wraps")]
    fn test_representation_mismatch_panics() {
        let mut function = Function::new("f");
        let entry = function.entry;
        let slot = function.insert_value_inst(entry, 0, "slot", file(), ValueRepr::Address, Default::default(), |result| {
            InstKind::AllocStack { result }
        });
        function.insert_value_inst(entry, 1, "bad", file(), ValueRepr::Object, Default::default(), |result| {
            InstKind::MarkMoveOnly {
                result,
                operand: slot,
                check: MarkerCheck::ConsumableAndAssignable,
            }
        });
        let analyses = FunctionAnalyses::compute(&function);
        let mut emitter = DiagnosticEmitter::new();
        search_for_candidates(&mut function, &analyses, &mut emitter, ValueRepr::Object);
    }
}
