// Borrow-to-destructure rewrite.
//
// Source code that moves fields out of a move-only aggregate is lowered as a borrow
// of the aggregate, one `struct_extract` per field, and consumes of the extracted
// projections. Consuming a borrowed projection is illegal, so when the pattern is
// exhaustive the borrow is turned into a real `destructure` and every field gets its
// own marker:
//
//   %b = begin_borrow %m              %f0, %f1 = destructure %m
//   %p0 = struct_extract %b, 0   =>   %n0 = mark_move_only %f0
//   %p1 = struct_extract %b, 1        %n1 = mark_move_only %f1
//   ... consume %p0 ...               ... consume %n0 ...
//   end_borrow %b
//   destroy_value %m                  destroy_value %n1
//
// Legal only when the marker's uses are that one borrow plus destroys, the borrow's
// uses are extracts and end_borrows, and each field is extracted exactly once. Every
// destroy of the aggregate must come after the borrow, after each end_borrow and after
// every use of an extracted projection; otherwise the pattern is left for the checker
// to report.

use crate::analysis::FunctionAnalyses;
use crate::checker::interval_alloc::IntervalAllocator;
use crate::checker::object_checker::{classify_object_use, ObjectUse};
use crate::debug_println;
use crate::ir::{Function, InstId, InstKind, MarkerCheck, User, ValueId, ValueRepr};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DestructureRewrite {
    pub inserted: Vec<InstId>,
    pub removed: Vec<InstId>,
    /// Per-field markers, in field order. Also listed in `inserted`.
    pub new_markers: Vec<InstId>,
}

struct Extract {
    inst: InstId,
    field: usize,
    projection: ValueId,
    consumed: bool,
}

struct Pattern {
    value: ValueId,
    borrow_inst: InstId,
    extracts: Vec<Extract>,
    end_borrows: Vec<InstId>,
    destroys: Vec<InstId>,
}

pub fn try_borrow_to_destructure(
    function: &mut Function,
    analyses: &FunctionAnalyses,
    allocator: &mut IntervalAllocator,
    marker: InstId,
) -> Option<DestructureRewrite> {
    let pattern = match_pattern(function, analyses, allocator, marker)?;
    Some(rewrite(function, pattern))
}

fn match_pattern(
    function: &Function,
    analyses: &FunctionAnalyses,
    allocator: &mut IntervalAllocator,
    marker: InstId,
) -> Option<Pattern> {
    let InstKind::MarkMoveOnly { result: value, check, .. } = function.inst(marker).kind else {
        return None;
    };
    if check != MarkerCheck::ConsumableAndAssignable {
        return None;
    }
    let ty = &function.value(value).ty;
    if ty.fields.is_empty() {
        return None;
    }

    let uses = function.compute_uses();
    let mut borrow = None;
    let mut destroys = Vec::new();
    for &user in uses.get(&value)? {
        let User::Inst(id) = user else {
            return None;
        };
        match function.inst(id).kind {
            InstKind::BeginBorrow { result, .. } if borrow.is_none() => borrow = Some((id, result)),
            InstKind::DestroyValue { .. } => destroys.push(id),
            _ => return None,
        }
    }
    let (borrow_inst, borrow) = borrow?;

    let mut extracts = Vec::new();
    let mut end_borrows = Vec::new();
    for &user in uses.get(&borrow).map(Vec::as_slice).unwrap_or(&[]) {
        let User::Inst(id) = user else {
            return None;
        };
        match function.inst(id).kind {
            InstKind::StructExtract { result, field, .. } => {
                let consumed = uses
                    .get(&result)
                    .map(Vec::as_slice)
                    .unwrap_or(&[])
                    .iter()
                    .any(|u| classify_object_use(function, *u, result).contains(&ObjectUse::Consume));
                extracts.push(Extract {
                    inst: id,
                    field,
                    projection: result,
                    consumed,
                });
            }
            InstKind::EndBorrow { .. } => end_borrows.push(id),
            _ => return None,
        }
    }
    if !extracts.iter().any(|e| e.consumed) {
        return None;
    }

    // Every leaf covered exactly once.
    let covered = allocator.allocate(ty.leaf_count());
    for extract in &extracts {
        let range = ty.field_leaf_range(extract.field)?;
        if allocator.overlaps(covered, &range) {
            debug_println!("DESTRUCTURE: Field {} of '{}' extracted twice", extract.field, function.value(value).name);
            return None;
        }
        allocator.insert(covered, range);
    }
    if !allocator.is_full(covered) {
        debug_println!("DESTRUCTURE: Extracts of '{}' are not exhaustive", function.value(value).name);
        return None;
    }

    // The aggregate may only die after the borrow is over and every projection is used up.
    if !destroys.is_empty() && end_borrows.is_empty() {
        debug_println!("DESTRUCTURE: Borrow of '{}' never ends", function.value(value).name);
        return None;
    }
    for &destroy in &destroys {
        if !analyses.dominance.inst_dominates(function, borrow_inst, destroy) {
            return None;
        }
        let borrow_ended = end_borrows
            .iter()
            .all(|end| precedes(function, analyses, User::Inst(*end), destroy));
        let projections_done = extracts.iter().all(|extract| {
            uses.get(&extract.projection)
                .map(Vec::as_slice)
                .unwrap_or(&[])
                .iter()
                .all(|user| precedes(function, analyses, *user, destroy))
        });
        if !borrow_ended || !projections_done {
            debug_println!(
                "DESTRUCTURE: '{}' is destroyed while its borrow may be live",
                function.value(value).name
            );
            return None;
        }
    }

    Some(Pattern {
        value,
        borrow_inst,
        extracts,
        end_borrows,
        destroys,
    })
}

/// Does `user` run before `inst` on every path that reaches `inst`?
fn precedes(function: &Function, analyses: &FunctionAnalyses, user: User, inst: InstId) -> bool {
    match user {
        User::Inst(id) => id != inst && analyses.dominance.inst_dominates(function, id, inst),
        User::Terminator(block) => analyses.dominance.properly_dominates(block, function.inst(inst).block),
    }
}

fn rewrite(function: &mut Function, pattern: Pattern) -> DestructureRewrite {
    let mut result = DestructureRewrite::default();
    let block = function.inst(pattern.borrow_inst).block;
    let loc = function.inst(pattern.borrow_inst).loc;
    let position = function.position_in_block(pattern.borrow_inst);
    debug_println!(
        "DESTRUCTURE: Splitting '{}' at {}",
        function.value(pattern.value).name,
        loc
    );

    let (destructure, fields) = function.insert_destructure(block, position, pattern.value, loc);
    result.inserted.push(destructure);

    let mut field_markers = Vec::with_capacity(fields.len());
    for (i, field) in fields.iter().enumerate() {
        let info = function.value(*field).clone();
        let marker_position = position + 1 + i;
        let marked = function.insert_value_inst(
            block,
            marker_position,
            &info.name,
            info.ty,
            ValueRepr::Object,
            loc,
            |result| InstKind::MarkMoveOnly {
                result,
                operand: *field,
                check: MarkerCheck::ConsumableAndAssignable,
            },
        );
        let marker = function.block(block).insts[marker_position];
        result.inserted.push(marker);
        result.new_markers.push(marker);
        field_markers.push(marked);
    }

    for extract in &pattern.extracts {
        function.replace_all_uses(extract.projection, field_markers[extract.field]);
        function.erase_inst(extract.inst);
        result.removed.push(extract.inst);
    }
    for end in &pattern.end_borrows {
        function.erase_inst(*end);
        result.removed.push(*end);
    }
    function.erase_inst(pattern.borrow_inst);
    result.removed.push(pattern.borrow_inst);

    // Fields nobody consumed are destroyed where the aggregate used to be.
    for destroy in &pattern.destroys {
        let destroy_loc = function.inst(*destroy).loc;
        for extract in pattern.extracts.iter().filter(|e| !e.consumed) {
            let operand = field_markers[extract.field];
            let id = function.insert_inst_before(*destroy, InstKind::DestroyValue { operand }, destroy_loc);
            result.inserted.push(id);
        }
        function.erase_inst(*destroy);
        result.removed.push(*destroy);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ArgConvention, FunctionBuilder, Type};

    fn pair() -> Type {
        Type::aggregate("Pair", true, vec![Type::leaf("File", true), Type::leaf("File", true)])
    }

    fn run(function: &mut Function, marker: ValueId) -> Option<DestructureRewrite> {
        let analyses = FunctionAnalyses::compute(function);
        let mut allocator = IntervalAllocator::new();
        let marker = function.defining_inst(marker).unwrap();
        try_borrow_to_destructure(function, &analyses, &mut allocator, marker)
    }

    #[test]
    fn test_exhaustive_extract_is_destructured() {
        let mut b = FunctionBuilder::new("f");
        let x = b.argument("x", pair(), ArgConvention::Owned);
        let m = b.mark_owned(x);
        let borrow = b.begin_borrow(m);
        let first = b.struct_extract(borrow, 0);
        let second = b.struct_extract(borrow, 1);
        b.apply("sink", vec![(first, ArgConvention::Owned)]);
        b.use_value(second);
        b.end_borrow(borrow);
        b.destroy_value(m);
        b.ret(None);
        let mut function = b.finish();

        let rewrite = run(&mut function, m).expect("pattern should match");
        assert_eq!(rewrite.new_markers.len(), 2);
        // destructure + 2 markers + 1 destroy for the unconsumed field
        assert_eq!(rewrite.inserted.len(), 4);
        // 2 extracts + end_borrow + begin_borrow + aggregate destroy
        assert_eq!(rewrite.removed.len(), 5);

        let kinds: Vec<&'static str> = function
            .instructions()
            .into_iter()
            .map(|id| function.inst(id).kind.mnemonic())
            .collect();
        assert_eq!(
            kinds,
            vec![
                "mark_move_only",
                "destructure",
                "mark_move_only",
                "mark_move_only",
                "apply",
                "use",
                "destroy_value"
            ]
        );
        let second_marker = function.block(function.entry).insts[3];
        let InstKind::MarkMoveOnly { result: n1, .. } = function.inst(second_marker).kind else {
            panic!("expected marker");
        };
        let last = *function.block(function.entry).insts.last().unwrap();
        assert_eq!(function.inst(last).kind, InstKind::DestroyValue { operand: n1 });
    }

    #[test]
    fn test_partial_extract_is_left_alone() {
        let mut b = FunctionBuilder::new("f");
        let x = b.argument("x", pair(), ArgConvention::Owned);
        let m = b.mark_owned(x);
        let borrow = b.begin_borrow(m);
        let first = b.struct_extract(borrow, 0);
        b.apply("sink", vec![(first, ArgConvention::Owned)]);
        b.end_borrow(borrow);
        b.destroy_value(m);
        b.ret(None);
        let mut function = b.finish();
        assert!(run(&mut function, m).is_none());
    }

    #[test]
    fn test_duplicate_extract_is_left_alone() {
        let mut b = FunctionBuilder::new("f");
        let x = b.argument("x", pair(), ArgConvention::Owned);
        let m = b.mark_owned(x);
        let borrow = b.begin_borrow(m);
        let first = b.struct_extract(borrow, 0);
        let again = b.struct_extract(borrow, 0);
        b.struct_extract(borrow, 1);
        b.apply("sink", vec![(first, ArgConvention::Owned)]);
        b.apply("sink", vec![(again, ArgConvention::Owned)]);
        b.end_borrow(borrow);
        b.destroy_value(m);
        b.ret(None);
        let mut function = b.finish();
        assert!(run(&mut function, m).is_none());
    }

    #[test]
    fn test_destroy_inside_borrow_is_left_alone() {
        let mut b = FunctionBuilder::new("f");
        let x = b.argument("x", pair(), ArgConvention::Owned);
        let m = b.mark_owned(x);
        let borrow = b.begin_borrow(m);
        let first = b.struct_extract(borrow, 0);
        b.struct_extract(borrow, 1);
        b.destroy_value(m);
        b.apply("sink", vec![(first, ArgConvention::Owned)]);
        b.end_borrow(borrow);
        b.ret(None);
        let mut function = b.finish();
        assert!(run(&mut function, m).is_none());
    }

    #[test]
    fn test_projection_used_after_destroy_is_left_alone() {
        let mut b = FunctionBuilder::new("f");
        let x = b.argument("x", pair(), ArgConvention::Owned);
        let m = b.mark_owned(x);
        let borrow = b.begin_borrow(m);
        let first = b.struct_extract(borrow, 0);
        let second = b.struct_extract(borrow, 1);
        b.apply("sink", vec![(first, ArgConvention::Owned)]);
        b.end_borrow(borrow);
        b.destroy_value(m);
        b.use_value(second);
        b.ret(None);
        let mut function = b.finish();
        assert!(run(&mut function, m).is_none());
    }

    #[test]
    fn test_unended_borrow_is_left_alone() {
        let mut b = FunctionBuilder::new("f");
        let x = b.argument("x", pair(), ArgConvention::Owned);
        let m = b.mark_owned(x);
        let borrow = b.begin_borrow(m);
        let first = b.struct_extract(borrow, 0);
        b.struct_extract(borrow, 1);
        b.apply("sink", vec![(first, ArgConvention::Owned)]);
        b.destroy_value(m);
        b.ret(None);
        let mut function = b.finish();
        assert!(run(&mut function, m).is_none());
    }

    #[test]
    fn test_read_only_extract_needs_no_rewrite() {
        let mut b = FunctionBuilder::new("f");
        let x = b.argument("x", pair(), ArgConvention::Owned);
        let m = b.mark_owned(x);
        let borrow = b.begin_borrow(m);
        let first = b.struct_extract(borrow, 0);
        b.struct_extract(borrow, 1);
        b.use_value(first);
        b.end_borrow(borrow);
        b.destroy_value(m);
        b.ret(None);
        let mut function = b.finish();
        assert!(run(&mut function, m).is_none());
    }
}
