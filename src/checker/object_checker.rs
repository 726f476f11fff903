// Object move checker.
//
// For each object marker the checked region is every reachable block dominated by the
// marker's block. A forward dataflow over that region tracks whether the value may
// have been consumed, must have been consumed, and which borrows of it may still be
// open. Once the states are stable a second sweep reports:
//
// - a consume after a possible consume (double consume)
// - a read, borrow or copy after a possible consume
// - a consume while a borrow may be open
// - a consume of a borrowed projection, or of a value that may not be consumed
// - leaving the region without a definite consume (reported at the marker)
//
// Leaving the region means a return, an edge to a block the marker does not dominate,
// or an edge back into the marker's own block. Edges into dead-end blocks never need
// a consume.

use crate::analysis::FunctionAnalyses;
use crate::checker::borrow_to_destructure::try_borrow_to_destructure;
use crate::checker::interval_alloc::IntervalAllocator;
use crate::debug_println;
use crate::diagnostics::{DiagnosticEmitter, DiagnosticKind};
use crate::ir::{
    ArgConvention, BlockId, Callee, Function, InstId, InstKind, MarkerCheck, SourceLoc,
    Terminator, User, UseMap, ValueId,
};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// How one user treats an object value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObjectUse {
    Consume,
    Read,
    Copy,
    Borrow { borrow: ValueId },
    Project { projection: ValueId },
    EndBorrow,
}

/// How `user` treats `value`, one entry per operand slot that names it. A call that
/// passes the same value in several argument slots yields one use per slot.
pub(crate) fn classify_object_use(function: &Function, user: User, value: ValueId) -> Vec<ObjectUse> {
    let inst = match user {
        User::Inst(id) => function.inst(id),
        User::Terminator(block) => {
            return match function.block(block).terminator {
                Terminator::Return { value: Some(v) } if v == value => vec![ObjectUse::Consume],
                _ => vec![ObjectUse::Read],
            };
        }
    };
    let single = match &inst.kind {
        InstKind::MarkMoveOnly { .. }
        | InstKind::Destructure { .. }
        | InstKind::Move { .. }
        | InstKind::DestroyValue { .. }
        | InstKind::PartialApply { .. } => ObjectUse::Consume,
        InstKind::Store { value: stored, .. } if *stored == value => ObjectUse::Consume,
        InstKind::BeginBorrow { result, .. } => ObjectUse::Borrow { borrow: *result },
        InstKind::EndBorrow { .. } => ObjectUse::EndBorrow,
        InstKind::StructExtract { result, .. } => ObjectUse::Project { projection: *result },
        InstKind::CopyValue { .. } => ObjectUse::Copy,
        // Calling a closure only borrows it; an owned argument is consumed.
        InstKind::Apply { callee, args, .. } => {
            let mut uses: Vec<ObjectUse> = args
                .iter()
                .filter(|(arg, _)| *arg == value)
                .map(|(_, convention)| match convention {
                    ArgConvention::Owned | ArgConvention::InOwned => ObjectUse::Consume,
                    _ => ObjectUse::Read,
                })
                .collect();
            if *callee == Callee::Closure(value) {
                uses.push(ObjectUse::Read);
            }
            return uses;
        }
        _ => ObjectUse::Read,
    };
    vec![single]
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum EventKind {
    Consume,
    Read,
    Copy,
    BorrowBegin(ValueId),
    BorrowEnd(ValueId),
    ProjectionConsume,
}

#[derive(Debug, Clone)]
struct Event {
    position: usize,
    loc: SourceLoc,
    kind: EventKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ConsumeState {
    maybe_consumed: bool,
    must_consumed: bool,
    open_borrows: BTreeSet<ValueId>,
}

impl ConsumeState {
    fn merge(&mut self, other: &ConsumeState) {
        self.maybe_consumed |= other.maybe_consumed;
        self.must_consumed &= other.must_consumed;
        self.open_borrows.extend(other.open_borrows.iter().copied());
    }
}

#[derive(Debug, Default)]
pub struct ObjectCheckResult {
    pub made_change: bool,
    pub inserted: Vec<InstId>,
    pub removed: Vec<InstId>,
    pub checked: usize,
}

pub struct ObjectChecker<'a> {
    function: &'a mut Function,
    analyses: &'a FunctionAnalyses,
    emitter: &'a mut DiagnosticEmitter,
    allocator: &'a mut IntervalAllocator,
}

impl<'a> ObjectChecker<'a> {
    pub fn new(
        function: &'a mut Function,
        analyses: &'a FunctionAnalyses,
        emitter: &'a mut DiagnosticEmitter,
        allocator: &'a mut IntervalAllocator,
    ) -> Self {
        Self {
            function,
            analyses,
            emitter,
            allocator,
        }
    }

    pub fn check(mut self, markers: Vec<InstId>) -> ObjectCheckResult {
        let mut result = ObjectCheckResult::default();
        let mut worklist: VecDeque<InstId> = markers.into();
        while let Some(marker) = worklist.pop_front() {
            if !self.function.is_live_inst(marker) {
                continue;
            }
            if let Some(rewrite) =
                try_borrow_to_destructure(self.function, self.analyses, self.allocator, marker)
            {
                result.made_change = true;
                worklist.extend(rewrite.new_markers.iter().copied());
                result.inserted.extend(rewrite.inserted);
                result.removed.extend(rewrite.removed);
            }
            self.allocator.reset();
            self.check_marker(marker);
            result.checked += 1;
        }
        result
    }

    fn check_marker(&mut self, marker: InstId) {
        let inst = self.function.inst(marker);
        let InstKind::MarkMoveOnly { result: value, check, .. } = inst.kind else {
            return;
        };
        let marker_block = inst.block;
        let marker_loc = inst.loc;
        let consumable = check == MarkerCheck::ConsumableAndAssignable;
        debug_println!(
            "OBJECT: Checking '{}' ({:?}) from {}",
            self.function.value(value).name,
            check,
            marker_loc
        );

        let region = self.analyses.dominated_region(marker_block);
        let in_region: HashSet<BlockId> = region.iter().copied().collect();
        let uses = self.function.compute_uses();
        let events = self.collect_events(value, &uses, &in_region);

        // Forward dataflow to a fixpoint.
        let mut out_states: HashMap<BlockId, ConsumeState> = HashMap::new();
        loop {
            let mut changed = false;
            for &block in &region {
                let Some(mut state) = self.block_entry_state(block, marker_block, &in_region, &out_states) else {
                    continue;
                };
                for event in events.get(&block).map(Vec::as_slice).unwrap_or(&[]) {
                    transfer(&mut state, &event.kind, consumable);
                }
                if out_states.get(&block) != Some(&state) {
                    out_states.insert(block, state);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        // Reporting sweep.
        for &block in &region {
            let Some(mut state) = self.block_entry_state(block, marker_block, &in_region, &out_states) else {
                continue;
            };
            for event in events.get(&block).map(Vec::as_slice).unwrap_or(&[]) {
                self.report_event(value, &state, event, consumable);
                transfer(&mut state, &event.kind, consumable);
            }
            if consumable && !state.must_consumed && self.leaves_region(block, marker_block, &in_region) {
                debug_println!(
                    "OBJECT: '{}' may leave {} unconsumed",
                    self.function.value(value).name,
                    self.function.block(block).label
                );
                self.emitter
                    .emit(self.function, DiagnosticKind::MissingConsume, marker_loc, value);
            }
        }
    }

    fn block_entry_state(
        &self,
        block: BlockId,
        marker_block: BlockId,
        in_region: &HashSet<BlockId>,
        out_states: &HashMap<BlockId, ConsumeState>,
    ) -> Option<ConsumeState> {
        if block == marker_block {
            return Some(ConsumeState::default());
        }
        let mut merged: Option<ConsumeState> = None;
        for pred in self.function.predecessors(block) {
            if !in_region.contains(&pred) {
                continue;
            }
            let Some(out) = out_states.get(&pred) else {
                continue;
            };
            match merged.as_mut() {
                Some(state) => state.merge(out),
                None => merged = Some(out.clone()),
            }
        }
        merged
    }

    fn leaves_region(&self, block: BlockId, marker_block: BlockId, in_region: &HashSet<BlockId>) -> bool {
        match self.function.block(block).terminator {
            Terminator::Return { .. } => true,
            Terminator::Unreachable => false,
            _ => self.function.successors(block).into_iter().any(|succ| {
                (succ == marker_block || !in_region.contains(&succ))
                    && !self.analyses.dead_ends.is_dead_end(succ)
            }),
        }
    }

    fn report_event(&mut self, value: ValueId, state: &ConsumeState, event: &Event, consumable: bool) {
        let kind = match &event.kind {
            EventKind::Consume if !consumable => Some(DiagnosticKind::ConsumeOfNonConsumable),
            EventKind::Consume if state.maybe_consumed => Some(DiagnosticKind::DoubleConsume),
            EventKind::Consume if !state.open_borrows.is_empty() => Some(DiagnosticKind::ConsumeDuringBorrow),
            EventKind::Consume => None,
            EventKind::Read | EventKind::BorrowBegin(_) if state.maybe_consumed => {
                Some(DiagnosticKind::UseAfterConsume)
            }
            EventKind::Copy => {
                if state.maybe_consumed {
                    self.emitter
                        .emit(self.function, DiagnosticKind::UseAfterConsume, event.loc, value);
                }
                Some(DiagnosticKind::ImplicitCopy)
            }
            EventKind::ProjectionConsume => Some(DiagnosticKind::ConsumeOfNonConsumable),
            EventKind::Read | EventKind::BorrowBegin(_) | EventKind::BorrowEnd(_) => None,
        };
        if let Some(kind) = kind {
            debug_println!(
                "OBJECT: {:?} of '{}' at {}",
                kind,
                self.function.value(value).name,
                event.loc
            );
            self.emitter.emit(self.function, kind, event.loc, value);
        }
    }

    /// Every event on `value` inside the region, grouped by block and sorted by position.
    fn collect_events(
        &self,
        value: ValueId,
        uses: &UseMap,
        in_region: &HashSet<BlockId>,
    ) -> HashMap<BlockId, Vec<Event>> {
        let mut events: HashMap<BlockId, Vec<Event>> = HashMap::new();
        for &user in uses.get(&value).map(Vec::as_slice).unwrap_or(&[]) {
            let object_uses = classify_object_use(self.function, user, value);
            // A call that both consumes the value and reads it in another slot holds a
            // borrow across the call.
            let call_borrow = object_uses.contains(&ObjectUse::Consume) && object_uses.contains(&ObjectUse::Read);
            if call_borrow {
                self.push_event(user, EventKind::BorrowBegin(value), in_region, &mut events);
            }
            for object_use in object_uses {
                let kind = match object_use {
                    ObjectUse::Consume => EventKind::Consume,
                    ObjectUse::Read if call_borrow => continue,
                    ObjectUse::Read | ObjectUse::EndBorrow => EventKind::Read,
                    ObjectUse::Copy => EventKind::Copy,
                    ObjectUse::Borrow { borrow } => {
                        self.collect_borrow_events(borrow, uses, in_region, &mut events);
                        EventKind::BorrowBegin(borrow)
                    }
                    ObjectUse::Project { projection } => {
                        self.collect_projection_events(projection, uses, in_region, &mut events);
                        EventKind::Read
                    }
                };
                self.push_event(user, kind, in_region, &mut events);
            }
            if call_borrow {
                self.push_event(user, EventKind::BorrowEnd(value), in_region, &mut events);
            }
        }
        for list in events.values_mut() {
            list.sort_by_key(|e| e.position);
        }
        events
    }

    fn collect_borrow_events(
        &self,
        borrow: ValueId,
        uses: &UseMap,
        in_region: &HashSet<BlockId>,
        events: &mut HashMap<BlockId, Vec<Event>>,
    ) {
        for &user in uses.get(&borrow).map(Vec::as_slice).unwrap_or(&[]) {
            for object_use in classify_object_use(self.function, user, borrow) {
                match object_use {
                    ObjectUse::EndBorrow => self.push_event(user, EventKind::BorrowEnd(borrow), in_region, events),
                    ObjectUse::Consume => self.push_event(user, EventKind::ProjectionConsume, in_region, events),
                    ObjectUse::Project { projection } | ObjectUse::Borrow { borrow: projection } => {
                        self.collect_projection_events(projection, uses, in_region, events)
                    }
                    ObjectUse::Read | ObjectUse::Copy => {}
                }
            }
        }
    }

    /// Projections of a value the checked value still owns can be read but never consumed.
    fn collect_projection_events(
        &self,
        projection: ValueId,
        uses: &UseMap,
        in_region: &HashSet<BlockId>,
        events: &mut HashMap<BlockId, Vec<Event>>,
    ) {
        let mut worklist = vec![projection];
        let mut visited = HashSet::new();
        while let Some(current) = worklist.pop() {
            if !visited.insert(current) {
                continue;
            }
            for &user in uses.get(&current).map(Vec::as_slice).unwrap_or(&[]) {
                for object_use in classify_object_use(self.function, user, current) {
                    match object_use {
                        ObjectUse::Consume => {
                            self.push_event(user, EventKind::ProjectionConsume, in_region, events)
                        }
                        ObjectUse::Project { projection } | ObjectUse::Borrow { borrow: projection } => {
                            worklist.push(projection)
                        }
                        ObjectUse::Read | ObjectUse::Copy | ObjectUse::EndBorrow => {}
                    }
                }
            }
        }
    }

    fn push_event(
        &self,
        user: User,
        kind: EventKind,
        in_region: &HashSet<BlockId>,
        events: &mut HashMap<BlockId, Vec<Event>>,
    ) {
        let block = self.function.user_block(user);
        if !in_region.contains(&block) {
            return;
        }
        let position = match user {
            User::Inst(id) => self.function.position_in_block(id),
            User::Terminator(block) => self.function.block(block).insts.len(),
        };
        events.entry(block).or_default().push(Event {
            position,
            loc: self.function.user_loc(user),
            kind,
        });
    }
}

fn transfer(state: &mut ConsumeState, kind: &EventKind, consumable: bool) {
    match kind {
        EventKind::Consume if consumable => {
            state.maybe_consumed = true;
            state.must_consumed = true;
        }
        EventKind::BorrowBegin(borrow) => {
            state.open_borrows.insert(*borrow);
        }
        EventKind::BorrowEnd(borrow) => {
            state.open_borrows.remove(borrow);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ArgConvention, FunctionBuilder, Type};

    fn file() -> Type {
        Type::leaf("File", true)
    }

    fn run(function: &mut Function) -> Vec<(DiagnosticKind, SourceLoc)> {
        let analyses = FunctionAnalyses::compute(function);
        let mut emitter = DiagnosticEmitter::new();
        let mut allocator = IntervalAllocator::new();
        let markers: Vec<InstId> = function
            .instructions()
            .into_iter()
            .filter(|id| matches!(function.inst(*id).kind, InstKind::MarkMoveOnly { .. }))
            .collect();
        ObjectChecker::new(function, &analyses, &mut emitter, &mut allocator).check(markers);
        emitter.diagnostics().iter().map(|d| (d.kind, d.loc)).collect()
    }

    #[test]
    fn test_single_consume_is_clean() {
        let mut b = FunctionBuilder::new("f");
        let x = b.argument("x", file(), ArgConvention::Owned);
        let m = b.mark_owned(x);
        b.use_value(m);
        b.destroy_value(m);
        b.ret(None);
        let mut function = b.finish();
        assert!(run(&mut function).is_empty());
    }

    #[test]
    fn test_double_consume_reported_at_second_use() {
        let mut b = FunctionBuilder::new("f");
        let x = b.argument("x", file(), ArgConvention::Owned);
        let m = b.mark_owned(x);
        b.apply("sink", vec![(m, ArgConvention::Owned)]);
        b.destroy_value(m);
        let second = b.last_loc();
        b.ret(None);
        let mut function = b.finish();
        assert_eq!(run(&mut function), vec![(DiagnosticKind::DoubleConsume, second)]);
    }

    #[test]
    fn test_same_value_passed_owned_twice() {
        let mut b = FunctionBuilder::new("f");
        let x = b.argument("x", file(), ArgConvention::Owned);
        let m = b.mark_owned(x);
        b.apply("sink2", vec![(m, ArgConvention::Owned), (m, ArgConvention::Owned)]);
        let call = b.last_loc();
        b.ret(None);
        let mut function = b.finish();
        assert_eq!(run(&mut function), vec![(DiagnosticKind::DoubleConsume, call)]);
    }

    #[test]
    fn test_consumed_and_borrowed_by_one_call() {
        for args in [
            [ArgConvention::Owned, ArgConvention::Guaranteed],
            [ArgConvention::Guaranteed, ArgConvention::Owned],
        ] {
            let mut b = FunctionBuilder::new("f");
            let x = b.argument("x", file(), ArgConvention::Owned);
            let m = b.mark_owned(x);
            b.apply("sink2", args.iter().map(|c| (m, *c)).collect());
            let call = b.last_loc();
            b.ret(None);
            let mut function = b.finish();
            assert_eq!(run(&mut function), vec![(DiagnosticKind::ConsumeDuringBorrow, call)]);
        }
    }

    #[test]
    fn test_use_after_consume() {
        let mut b = FunctionBuilder::new("f");
        let x = b.argument("x", file(), ArgConvention::Owned);
        let m = b.mark_owned(x);
        let moved = b.move_value(m);
        b.use_value(m);
        let read = b.last_loc();
        b.destroy_value(moved);
        b.ret(None);
        let mut function = b.finish();
        assert_eq!(run(&mut function), vec![(DiagnosticKind::UseAfterConsume, read)]);
    }

    #[test]
    fn test_consume_in_one_branch_only() {
        let mut b = FunctionBuilder::new("f");
        let x = b.argument("x", file(), ArgConvention::Owned);
        let c = b.argument("c", Type::leaf("Bool", false), ArgConvention::Guaranteed);
        let m = b.mark_owned(x);
        let marker_loc = b.last_loc();
        let left = b.block("left");
        let right = b.block("right");
        let join = b.block("join");
        b.cond_br(c, left, right);
        b.position_at_end(left);
        b.destroy_value(m);
        b.br(join);
        b.position_at_end(right);
        b.br(join);
        b.position_at_end(join);
        b.ret(None);
        let mut function = b.finish();
        assert_eq!(run(&mut function), vec![(DiagnosticKind::MissingConsume, marker_loc)]);
    }

    #[test]
    fn test_unreachable_path_needs_no_consume() {
        let mut b = FunctionBuilder::new("f");
        let x = b.argument("x", file(), ArgConvention::Owned);
        let c = b.argument("c", Type::leaf("Bool", false), ArgConvention::Guaranteed);
        let m = b.mark_owned(x);
        let trap = b.block("trap");
        let done = b.block("done");
        b.cond_br(c, trap, done);
        b.position_at_end(trap);
        b.unreachable();
        b.position_at_end(done);
        b.destroy_value(m);
        b.ret(None);
        let mut function = b.finish();
        assert!(run(&mut function).is_empty());
    }

    #[test]
    fn test_consume_inside_loop_is_double_consume() {
        let mut b = FunctionBuilder::new("f");
        let x = b.argument("x", file(), ArgConvention::Owned);
        let c = b.argument("c", Type::leaf("Bool", false), ArgConvention::Guaranteed);
        let m = b.mark_owned(x);
        let header = b.block("header");
        let body = b.block("body");
        let exit = b.block("exit");
        b.br(header);
        b.position_at_end(header);
        b.cond_br(c, body, exit);
        b.position_at_end(body);
        b.destroy_value(m);
        let consume = b.last_loc();
        b.br(header);
        b.position_at_end(exit);
        b.ret(None);
        let mut function = b.finish();
        let diags = run(&mut function);
        assert!(diags.contains(&(DiagnosticKind::DoubleConsume, consume)));
        assert!(diags.iter().any(|(k, _)| *k == DiagnosticKind::MissingConsume));
    }

    #[test]
    fn test_consume_during_borrow() {
        let mut b = FunctionBuilder::new("f");
        let x = b.argument("x", file(), ArgConvention::Owned);
        let m = b.mark_owned(x);
        let borrow = b.begin_borrow(m);
        b.use_value(borrow);
        b.destroy_value(m);
        let consume = b.last_loc();
        b.end_borrow(borrow);
        b.ret(None);
        let mut function = b.finish();
        assert_eq!(run(&mut function), vec![(DiagnosticKind::ConsumeDuringBorrow, consume)]);
    }

    #[test]
    fn test_borrow_ended_on_one_path_only_fails_closed() {
        let mut b = FunctionBuilder::new("f");
        let x = b.argument("x", file(), ArgConvention::Owned);
        let c = b.argument("c", Type::leaf("Bool", false), ArgConvention::Guaranteed);
        let m = b.mark_owned(x);
        let borrow = b.begin_borrow(m);
        let left = b.block("left");
        let right = b.block("right");
        let join = b.block("join");
        b.cond_br(c, left, right);
        b.position_at_end(left);
        b.end_borrow(borrow);
        b.br(join);
        b.position_at_end(right);
        b.br(join);
        b.position_at_end(join);
        b.destroy_value(m);
        let consume = b.last_loc();
        b.ret(None);
        let mut function = b.finish();
        assert_eq!(run(&mut function), vec![(DiagnosticKind::ConsumeDuringBorrow, consume)]);
    }

    #[test]
    fn test_borrowed_marker_cannot_be_consumed() {
        let mut b = FunctionBuilder::new("f");
        let x = b.argument("x", file(), ArgConvention::Guaranteed);
        let m = b.mark(x, MarkerCheck::NoConsumeOrAssign);
        b.use_value(m);
        b.apply("sink", vec![(m, ArgConvention::Owned)]);
        let consume = b.last_loc();
        b.ret(None);
        let mut function = b.finish();
        assert_eq!(run(&mut function), vec![(DiagnosticKind::ConsumeOfNonConsumable, consume)]);
    }

    #[test]
    fn test_copy_is_reported_as_implicit_copy() {
        let mut b = FunctionBuilder::new("f");
        let x = b.argument("x", file(), ArgConvention::Owned);
        let m = b.mark_owned(x);
        let copy = b.copy_value(m);
        let copy_loc = b.last_loc();
        b.destroy_value(copy);
        b.destroy_value(m);
        b.ret(None);
        let mut function = b.finish();
        assert_eq!(run(&mut function), vec![(DiagnosticKind::ImplicitCopy, copy_loc)]);
    }

    #[test]
    fn test_return_consumes() {
        let mut b = FunctionBuilder::new("f");
        let x = b.argument("x", file(), ArgConvention::Owned);
        let m = b.mark_owned(x);
        b.ret(Some(m));
        let mut function = b.finish();
        assert!(run(&mut function).is_empty());
    }
}
