// Address move checker.
//
// Tracks a move-only value that lives in memory. The location can be written, read,
// moved out of and re-initialized any number of times, and each field can be in a
// different state, so the dataflow state is a pair of interval sets over the value's
// leaves: which leaves may be uninitialized and which may be initialized.
//
// Accesses reach the location through the marker itself, through `field_addr`
// projections of it (which narrow the leaf range), and through closures that captured
// one of those addresses and are invoked later. Accesses in dead-end blocks are not
// checked.

use crate::analysis::FunctionAnalyses;
use crate::checker::interval_alloc::{IntervalAllocator, IntervalHandle};
use crate::debug_println;
use crate::diagnostics::{DiagnosticEmitter, DiagnosticKind};
use crate::ir::{
    ArgConvention, BlockId, Function, InstId, InstKind, LoadKind, MarkerCheck, SourceLoc, Terminator,
    User, ValueDef, ValueId,
};
use std::collections::{HashMap, HashSet};
use std::ops::Range;

/// Where the tracked memory comes from, which decides the entry state and what must
/// hold when the location goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    /// `alloc_stack`: starts uninitialized, must be empty again at `dealloc_stack`/exit.
    Local,
    /// `@in_owned` argument: starts initialized, must be consumed by exit.
    OwnedArgument,
    /// `@inout` argument: starts initialized, must be initialized again by exit.
    InoutArgument,
    /// Borrowed storage: starts initialized, no exit requirement.
    Borrowed,
}

impl LocationKind {
    pub fn of(function: &Function, address: ValueId) -> Self {
        match function.value(address).def {
            ValueDef::Argument { convention, .. } => match convention {
                ArgConvention::InOwned => LocationKind::OwnedArgument,
                ArgConvention::Inout => LocationKind::InoutArgument,
                _ => LocationKind::Borrowed,
            },
            ValueDef::Inst(_) => match function.defining_inst(address).map(|id| &function.inst(id).kind) {
                Some(InstKind::AllocStack { .. }) => LocationKind::Local,
                _ => LocationKind::Borrowed,
            },
        }
    }

    fn starts_initialized(self) -> bool {
        self != LocationKind::Local
    }

    fn must_be_destroyed(self) -> bool {
        matches!(self, LocationKind::Local | LocationKind::OwnedArgument)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AccessKind {
    Read,
    Take,
    Init,
    Destroy,
    Dealloc,
}

#[derive(Debug, Clone)]
struct Access {
    position: usize,
    loc: SourceLoc,
    kind: AccessKind,
    range: Range<u32>,
}

#[derive(Debug, Clone, Copy)]
struct InitState {
    maybe_uninit: IntervalHandle,
    maybe_init: IntervalHandle,
}

impl InitState {
    fn allocate(allocator: &mut IntervalAllocator, width: u32) -> Self {
        Self {
            maybe_uninit: allocator.allocate(width),
            maybe_init: allocator.allocate(width),
        }
    }

    fn copy_from(self, allocator: &mut IntervalAllocator, other: InitState) {
        allocator.copy(self.maybe_uninit, other.maybe_uninit);
        allocator.copy(self.maybe_init, other.maybe_init);
    }

    fn merge(self, allocator: &mut IntervalAllocator, other: InitState) {
        allocator.union(self.maybe_uninit, other.maybe_uninit);
        allocator.union(self.maybe_init, other.maybe_init);
    }

    fn same_as(self, allocator: &IntervalAllocator, other: InitState) -> bool {
        allocator.same_leaves(self.maybe_uninit, other.maybe_uninit)
            && allocator.same_leaves(self.maybe_init, other.maybe_init)
    }

    fn initialize(self, allocator: &mut IntervalAllocator, range: &Range<u32>) {
        allocator.remove(self.maybe_uninit, range.clone());
        allocator.insert(self.maybe_init, range.clone());
    }

    fn uninitialize(self, allocator: &mut IntervalAllocator, range: &Range<u32>) {
        allocator.remove(self.maybe_init, range.clone());
        allocator.insert(self.maybe_uninit, range.clone());
    }
}

struct Tracked {
    value: ValueId,
    check: MarkerCheck,
    kind: LocationKind,
    width: u32,
    marker_block: BlockId,
}

impl Tracked {
    fn consumable(&self) -> bool {
        self.check == MarkerCheck::ConsumableAndAssignable
    }
}

pub struct AddressChecker<'a> {
    function: &'a Function,
    analyses: &'a FunctionAnalyses,
    emitter: &'a mut DiagnosticEmitter,
    allocator: &'a mut IntervalAllocator,
}

impl<'a> AddressChecker<'a> {
    pub fn new(
        function: &'a Function,
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

    /// Check every marker; returns how many were checked.
    pub fn check(mut self, markers: &[InstId]) -> usize {
        for &marker in markers {
            self.allocator.reset();
            self.check_marker(marker);
        }
        self.allocator.reset();
        markers.len()
    }

    fn check_marker(&mut self, marker: InstId) {
        let inst = self.function.inst(marker);
        let InstKind::MarkMoveOnly { result: value, operand, check } = inst.kind else {
            return;
        };
        let tracked = Tracked {
            value,
            check,
            kind: LocationKind::of(self.function, operand),
            width: self.function.value(value).ty.leaf_count(),
            marker_block: inst.block,
        };
        debug_println!(
            "ADDRESS: Checking '{}' ({:?}, {:?}, {} leaves)",
            self.function.value(value).name,
            tracked.kind,
            check,
            tracked.width
        );

        let region = self.analyses.dominated_region(tracked.marker_block);
        let in_region: HashSet<BlockId> = region.iter().copied().collect();
        let accesses = self.collect_accesses(value, operand, tracked.width, &in_region);

        // Forward dataflow to a fixpoint.
        let mut out_states: HashMap<BlockId, InitState> = HashMap::new();
        let scratch = InitState::allocate(self.allocator, tracked.width);
        loop {
            let mut changed = false;
            for &block in &region {
                if !self.entry_state(block, &tracked, &in_region, &out_states, scratch) {
                    continue;
                }
                for access in accesses.get(&block).map(Vec::as_slice).unwrap_or(&[]) {
                    self.transfer(&tracked, scratch, access);
                }
                match out_states.get(&block) {
                    Some(out) if out.same_as(self.allocator, scratch) => {}
                    Some(out) => {
                        out.copy_from(self.allocator, scratch);
                        changed = true;
                    }
                    None => {
                        let out = InitState::allocate(self.allocator, tracked.width);
                        out.copy_from(self.allocator, scratch);
                        out_states.insert(block, out);
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }

        // Reporting sweep.
        for &block in &region {
            if !self.entry_state(block, &tracked, &in_region, &out_states, scratch) {
                continue;
            }
            for access in accesses.get(&block).map(Vec::as_slice).unwrap_or(&[]) {
                self.report(&tracked, scratch, access);
                self.transfer(&tracked, scratch, access);
            }
            if self.leaves_region(block, &tracked, &in_region) {
                let loc = self.function.block(block).terminator_loc;
                self.check_exit(&tracked, scratch, loc);
            }
        }
    }

    /// Write the state at the top of `block` into `scratch`. False if no predecessor
    /// has been reached yet.
    fn entry_state(
        &mut self,
        block: BlockId,
        tracked: &Tracked,
        in_region: &HashSet<BlockId>,
        out_states: &HashMap<BlockId, InitState>,
        scratch: InitState,
    ) -> bool {
        if block == tracked.marker_block {
            if tracked.kind.starts_initialized() {
                self.allocator.clear(scratch.maybe_uninit);
                self.allocator.fill(scratch.maybe_init);
            } else {
                self.allocator.fill(scratch.maybe_uninit);
                self.allocator.clear(scratch.maybe_init);
            }
            return true;
        }
        self.allocator.clear(scratch.maybe_uninit);
        self.allocator.clear(scratch.maybe_init);
        let mut reached = false;
        for pred in self.function.predecessors(block) {
            if !in_region.contains(&pred) {
                continue;
            }
            if let Some(out) = out_states.get(&pred) {
                scratch.merge(self.allocator, *out);
                reached = true;
            }
        }
        reached
    }

    fn transfer(&mut self, tracked: &Tracked, state: InitState, access: &Access) {
        match access.kind {
            AccessKind::Read => {}
            AccessKind::Take if !tracked.consumable() => {}
            AccessKind::Take | AccessKind::Destroy => state.uninitialize(self.allocator, &access.range),
            AccessKind::Init => state.initialize(self.allocator, &access.range),
            AccessKind::Dealloc => {
                self.allocator.clear(state.maybe_init);
                self.allocator.fill(state.maybe_uninit);
            }
        }
    }

    fn report(&mut self, tracked: &Tracked, state: InitState, access: &Access) {
        let kind = match access.kind {
            AccessKind::Read if self.allocator.overlaps(state.maybe_uninit, &access.range) => {
                Some(DiagnosticKind::UseOfMovedFrom)
            }
            AccessKind::Take if !tracked.consumable() => Some(DiagnosticKind::ConsumeOfNonConsumable),
            AccessKind::Take if self.allocator.covers(state.maybe_uninit, &access.range) => {
                Some(DiagnosticKind::UseOfMovedFrom)
            }
            AccessKind::Take if self.allocator.overlaps(state.maybe_uninit, &access.range) => {
                Some(DiagnosticKind::MoveOutOfPartiallyInitialized)
            }
            AccessKind::Init if tracked.check == MarkerCheck::NoConsumeOrAssign => {
                Some(DiagnosticKind::AssignToNonAssignable)
            }
            AccessKind::Dealloc
                if tracked.kind.must_be_destroyed() && !self.allocator.is_empty(state.maybe_init) =>
            {
                Some(DiagnosticKind::MissingDestroy)
            }
            _ => None,
        };
        if let Some(kind) = kind {
            debug_println!(
                "ADDRESS: {:?} of '{}' leaves {:?} at {}",
                kind,
                self.function.value(tracked.value).name,
                access.range,
                access.loc
            );
            self.emitter.emit(self.function, kind, access.loc, tracked.value);
        }
    }

    fn check_exit(&mut self, tracked: &Tracked, state: InitState, loc: SourceLoc) {
        let kind = match tracked.kind {
            kind if kind.must_be_destroyed() && !self.allocator.is_empty(state.maybe_init) => {
                Some(DiagnosticKind::MissingDestroy)
            }
            LocationKind::InoutArgument if !self.allocator.is_empty(state.maybe_uninit) => {
                Some(DiagnosticKind::MissingReinitialization)
            }
            _ => None,
        };
        if let Some(kind) = kind {
            debug_println!("ADDRESS: {:?} of '{}' at exit {}", kind, self.function.value(tracked.value).name, loc);
            self.emitter.emit(self.function, kind, loc, tracked.value);
        }
    }

    fn leaves_region(&self, block: BlockId, tracked: &Tracked, in_region: &HashSet<BlockId>) -> bool {
        if self.analyses.dead_ends.is_dead_end(block) {
            return false;
        }
        match self.function.block(block).terminator {
            Terminator::Return { .. } => true,
            Terminator::Unreachable => false,
            _ => self.function.successors(block).into_iter().any(|succ| {
                (succ == tracked.marker_block || !in_region.contains(&succ))
                    && !self.analyses.dead_ends.is_dead_end(succ)
            }),
        }
    }

    /// Accesses of the tracked location inside the region, grouped by block and sorted
    /// by position.
    fn collect_accesses(
        &self,
        value: ValueId,
        operand: ValueId,
        width: u32,
        in_region: &HashSet<BlockId>,
    ) -> HashMap<BlockId, Vec<Access>> {
        let uses = self.function.compute_uses();
        let mut accesses: HashMap<BlockId, Vec<Access>> = HashMap::new();
        let mut worklist = vec![(value, 0..width)];
        let mut visited = HashSet::new();

        while let Some((address, range)) = worklist.pop() {
            if !visited.insert(address) {
                continue;
            }
            for &user in uses.get(&address).map(Vec::as_slice).unwrap_or(&[]) {
                let User::Inst(id) = user else {
                    continue;
                };
                for kind in self.classify_access(id, address) {
                    self.push_access(id, kind, range.clone(), in_region, &mut accesses);
                }
                if let InstKind::FieldAddr { result, base, field } = self.function.inst(id).kind {
                    if base != address {
                        continue;
                    }
                    let ty = &self.function.value(address).ty;
                    if let Some(sub) = ty.field_leaf_range(field) {
                        worklist.push((result, range.start + sub.start..range.start + sub.end));
                    }
                }
            }
            for &id in self.analyses.non_local.accesses(address) {
                self.push_access(id, AccessKind::Read, range.clone(), in_region, &mut accesses);
            }
        }

        // The storage itself is released through the original address.
        if LocationKind::of(self.function, operand) == LocationKind::Local {
            for &user in uses.get(&operand).map(Vec::as_slice).unwrap_or(&[]) {
                if let User::Inst(id) = user {
                    if matches!(self.function.inst(id).kind, InstKind::DeallocStack { .. }) {
                        self.push_access(id, AccessKind::Dealloc, 0..width, in_region, &mut accesses);
                    }
                }
            }
        }

        for list in accesses.values_mut() {
            list.sort_by_key(|a| a.position);
        }
        accesses
    }

    fn classify_access(&self, id: InstId, address: ValueId) -> Vec<AccessKind> {
        match &self.function.inst(id).kind {
            InstKind::Store { address: dest, .. } if *dest == address => vec![AccessKind::Init],
            InstKind::CopyAddr { src, dest, take, .. } => {
                let mut kinds = Vec::new();
                if *src == address {
                    kinds.push(if *take { AccessKind::Take } else { AccessKind::Read });
                }
                if *dest == address {
                    kinds.push(AccessKind::Init);
                }
                kinds
            }
            InstKind::Load { kind: LoadKind::Borrow, .. } => vec![AccessKind::Read],
            InstKind::Load { kind: LoadKind::Take, .. } => vec![AccessKind::Take],
            InstKind::DestroyAddr { .. } => vec![AccessKind::Destroy],
            InstKind::DeallocStack { .. } => vec![AccessKind::Dealloc],
            InstKind::Apply { args, .. } => args
                .iter()
                .filter(|(arg, _)| *arg == address)
                .map(|(_, convention)| match convention {
                    ArgConvention::InOwned | ArgConvention::Owned => AccessKind::Take,
                    ArgConvention::Inout | ArgConvention::InGuaranteed | ArgConvention::Guaranteed => {
                        AccessKind::Read
                    }
                })
                .collect(),
            InstKind::PartialApply { .. } | InstKind::Use { .. } => vec![AccessKind::Read],
            _ => Vec::new(),
        }
    }

    fn push_access(
        &self,
        id: InstId,
        kind: AccessKind,
        range: Range<u32>,
        in_region: &HashSet<BlockId>,
        accesses: &mut HashMap<BlockId, Vec<Access>>,
    ) {
        let inst = self.function.inst(id);
        if !in_region.contains(&inst.block) || self.analyses.dead_ends.is_dead_end(inst.block) {
            return;
        }
        accesses.entry(inst.block).or_default().push(Access {
            position: self.function.position_in_block(id),
            loc: inst.loc,
            kind,
            range,
        });
    }
}
