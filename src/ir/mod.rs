use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

pub mod builder;
pub mod function_file;

pub use builder::FunctionBuilder;

pub type ControlFlowGraph = DiGraph<BasicBlock, ()>;
pub type BlockId = NodeIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl InstId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Position in the user's source that an instruction was lowered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SourceLoc {
    pub line: u32,
    pub column: u32,
}

impl SourceLoc {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A type as far as this pass cares: is it move-only, and what are its fields.
///
/// Every type is flattened into a run of "leaves" so that a field of a nested
/// aggregate can be addressed by a small integer range.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Type {
    pub name: String,
    pub move_only: bool,
    pub fields: Vec<Type>,
}

impl Type {
    pub fn leaf(name: &str, move_only: bool) -> Self {
        Self {
            name: name.to_string(),
            move_only,
            fields: Vec::new(),
        }
    }

    pub fn aggregate(name: &str, move_only: bool, fields: Vec<Type>) -> Self {
        Self {
            name: name.to_string(),
            move_only,
            fields,
        }
    }

    pub fn leaf_count(&self) -> u32 {
        if self.fields.is_empty() {
            1
        } else {
            self.fields.iter().map(Type::leaf_count).sum()
        }
    }

    pub fn field(&self, index: usize) -> Option<&Type> {
        self.fields.get(index)
    }

    /// Leaf range covered by direct field `index`, relative to this type.
    pub fn field_leaf_range(&self, index: usize) -> Option<Range<u32>> {
        let field = self.fields.get(index)?;
        let start: u32 = self.fields[..index].iter().map(Type::leaf_count).sum();
        Some(start..start + field.leaf_count())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueRepr {
    /// Held directly, produced once and consumed once.
    Object,
    /// A handle to a memory location.
    Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgConvention {
    Owned,
    Guaranteed,
    InOwned,
    InGuaranteed,
    Inout,
}

impl ArgConvention {
    pub fn repr(self) -> ValueRepr {
        match self {
            ArgConvention::Owned | ArgConvention::Guaranteed => ValueRepr::Object,
            ArgConvention::InOwned | ArgConvention::InGuaranteed | ArgConvention::Inout => {
                ValueRepr::Address
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDef {
    Argument { index: usize, convention: ArgConvention },
    Inst(InstId),
}

#[derive(Debug, Clone)]
pub struct ValueInfo {
    pub name: String,
    pub ty: Type,
    pub repr: ValueRepr,
    pub def: ValueDef,
}

/// What the producer of an introduction marker allows the checker to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerCheck {
    ConsumableAndAssignable,
    AssignableButNotConsumable,
    NoConsumeOrAssign,
    /// The producer already knows the value is used in a way that cannot be checked
    /// (e.g. it was captured by an escaping closure).
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadKind {
    Borrow,
    Take,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Init,
    Assign,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callee {
    Function(String),
    Closure(ValueId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    /// Introduction marker: `result` is `operand`, checked for move-only legality from here on.
    MarkMoveOnly {
        result: ValueId,
        operand: ValueId,
        check: MarkerCheck,
    },
    FunctionRef {
        result: ValueId,
        name: String,
    },
    Literal {
        result: ValueId,
    },
    BeginBorrow {
        result: ValueId,
        operand: ValueId,
    },
    EndBorrow {
        borrow: ValueId,
    },
    StructExtract {
        result: ValueId,
        operand: ValueId,
        field: usize,
    },
    Destructure {
        results: Vec<ValueId>,
        operand: ValueId,
    },
    Move {
        result: ValueId,
        operand: ValueId,
    },
    /// Copy inserted by an earlier stage without knowing whether the type allows it.
    CopyValue {
        result: ValueId,
        operand: ValueId,
    },
    /// Copy the compiler sanctioned after diagnostics were emitted.
    ExplicitCopyValue {
        result: ValueId,
        operand: ValueId,
    },
    DestroyValue {
        operand: ValueId,
    },
    Use {
        operand: ValueId,
    },
    AllocStack {
        result: ValueId,
    },
    DeallocStack {
        address: ValueId,
    },
    FieldAddr {
        result: ValueId,
        base: ValueId,
        field: usize,
    },
    Load {
        result: ValueId,
        address: ValueId,
        kind: LoadKind,
    },
    Store {
        value: ValueId,
        address: ValueId,
        kind: StoreKind,
    },
    CopyAddr {
        src: ValueId,
        dest: ValueId,
        take: bool,
        init: bool,
    },
    DestroyAddr {
        address: ValueId,
    },
    Apply {
        result: Option<ValueId>,
        callee: Callee,
        args: Vec<(ValueId, ArgConvention)>,
    },
    /// Closure formation. Objects are captured by value, addresses by reference.
    PartialApply {
        result: ValueId,
        function: String,
        captures: Vec<ValueId>,
    },
}

impl InstKind {
    pub fn results(&self) -> Vec<ValueId> {
        match self {
            InstKind::MarkMoveOnly { result, .. }
            | InstKind::FunctionRef { result, .. }
            | InstKind::Literal { result }
            | InstKind::BeginBorrow { result, .. }
            | InstKind::StructExtract { result, .. }
            | InstKind::Move { result, .. }
            | InstKind::CopyValue { result, .. }
            | InstKind::ExplicitCopyValue { result, .. }
            | InstKind::AllocStack { result }
            | InstKind::FieldAddr { result, .. }
            | InstKind::Load { result, .. }
            | InstKind::PartialApply { result, .. } => vec![*result],
            InstKind::Destructure { results, .. } => results.clone(),
            InstKind::Apply { result, .. } => result.iter().copied().collect(),
            InstKind::EndBorrow { .. }
            | InstKind::DestroyValue { .. }
            | InstKind::Use { .. }
            | InstKind::DeallocStack { .. }
            | InstKind::Store { .. }
            | InstKind::CopyAddr { .. }
            | InstKind::DestroyAddr { .. } => Vec::new(),
        }
    }

    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            InstKind::MarkMoveOnly { operand, .. }
            | InstKind::BeginBorrow { operand, .. }
            | InstKind::StructExtract { operand, .. }
            | InstKind::Destructure { operand, .. }
            | InstKind::Move { operand, .. }
            | InstKind::CopyValue { operand, .. }
            | InstKind::ExplicitCopyValue { operand, .. }
            | InstKind::DestroyValue { operand }
            | InstKind::Use { operand } => vec![*operand],
            InstKind::EndBorrow { borrow } => vec![*borrow],
            InstKind::DeallocStack { address }
            | InstKind::DestroyAddr { address }
            | InstKind::Load { address, .. } => vec![*address],
            InstKind::FieldAddr { base, .. } => vec![*base],
            InstKind::Store { value, address, .. } => vec![*value, *address],
            InstKind::CopyAddr { src, dest, .. } => vec![*src, *dest],
            InstKind::Apply { callee, args, .. } => {
                let mut ops = Vec::with_capacity(args.len() + 1);
                if let Callee::Closure(closure) = callee {
                    ops.push(*closure);
                }
                ops.extend(args.iter().map(|(v, _)| *v));
                ops
            }
            InstKind::PartialApply { captures, .. } => captures.clone(),
            InstKind::FunctionRef { .. } | InstKind::Literal { .. } | InstKind::AllocStack { .. } => {
                Vec::new()
            }
        }
    }

    /// Rewrite every operand equal to `from` into `to`. Results are left alone.
    pub fn replace_operand(&mut self, from: ValueId, to: ValueId) {
        let swap = |v: &mut ValueId| {
            if *v == from {
                *v = to;
            }
        };
        match self {
            InstKind::MarkMoveOnly { operand, .. }
            | InstKind::BeginBorrow { operand, .. }
            | InstKind::StructExtract { operand, .. }
            | InstKind::Destructure { operand, .. }
            | InstKind::Move { operand, .. }
            | InstKind::CopyValue { operand, .. }
            | InstKind::ExplicitCopyValue { operand, .. }
            | InstKind::DestroyValue { operand }
            | InstKind::Use { operand } => swap(operand),
            InstKind::EndBorrow { borrow } => swap(borrow),
            InstKind::DeallocStack { address }
            | InstKind::DestroyAddr { address }
            | InstKind::Load { address, .. } => swap(address),
            InstKind::FieldAddr { base, .. } => swap(base),
            InstKind::Store { value, address, .. } => {
                swap(value);
                swap(address);
            }
            InstKind::CopyAddr { src, dest, .. } => {
                swap(src);
                swap(dest);
            }
            InstKind::Apply { callee, args, .. } => {
                if let Callee::Closure(closure) = callee {
                    swap(closure);
                }
                for (arg, _) in args.iter_mut() {
                    swap(arg);
                }
            }
            InstKind::PartialApply { captures, .. } => captures.iter_mut().for_each(swap),
            InstKind::FunctionRef { .. } | InstKind::Literal { .. } | InstKind::AllocStack { .. } => {}
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            InstKind::MarkMoveOnly { .. } => "mark_move_only",
            InstKind::FunctionRef { .. } => "function_ref",
            InstKind::Literal { .. } => "literal",
            InstKind::BeginBorrow { .. } => "begin_borrow",
            InstKind::EndBorrow { .. } => "end_borrow",
            InstKind::StructExtract { .. } => "struct_extract",
            InstKind::Destructure { .. } => "destructure",
            InstKind::Move { .. } => "move",
            InstKind::CopyValue { .. } => "copy_value",
            InstKind::ExplicitCopyValue { .. } => "explicit_copy_value",
            InstKind::DestroyValue { .. } => "destroy_value",
            InstKind::Use { .. } => "use",
            InstKind::AllocStack { .. } => "alloc_stack",
            InstKind::DeallocStack { .. } => "dealloc_stack",
            InstKind::FieldAddr { .. } => "field_addr",
            InstKind::Load { .. } => "load",
            InstKind::Store { .. } => "store",
            InstKind::CopyAddr { .. } => "copy_addr",
            InstKind::DestroyAddr { .. } => "destroy_addr",
            InstKind::Apply { .. } => "apply",
            InstKind::PartialApply { .. } => "partial_apply",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub kind: InstKind,
    pub loc: SourceLoc,
    pub block: BlockId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Branch {
        target: BlockId,
    },
    CondBranch {
        condition: ValueId,
        then_block: BlockId,
        else_block: BlockId,
    },
    Return {
        value: Option<ValueId>,
    },
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Branch { target } => vec![*target],
            Terminator::CondBranch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Return { .. } | Terminator::Unreachable => Vec::new(),
        }
    }

    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Terminator::CondBranch { condition, .. } => vec![*condition],
            Terminator::Return { value } => value.iter().copied().collect(),
            Terminator::Branch { .. } | Terminator::Unreachable => Vec::new(),
        }
    }

    fn replace_operand(&mut self, from: ValueId, to: ValueId) {
        match self {
            Terminator::CondBranch { condition, .. } if *condition == from => *condition = to,
            Terminator::Return { value: Some(v) } if *v == from => *v = to,
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub label: String,
    pub insts: Vec<InstId>,
    pub terminator: Terminator,
    pub terminator_loc: SourceLoc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Linkage {
    #[default]
    Public,
    Hidden,
    Shared,
    Private,
}

impl Linkage {
    /// Can code outside the current compilation unit reach a function with this linkage?
    pub fn is_possibly_used_externally(self, whole_module: bool) -> bool {
        match self {
            Linkage::Public => true,
            Linkage::Hidden => !whole_module,
            Linkage::Shared | Linkage::Private => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionAttributes {
    /// An earlier pass asked for the body to be dropped if nothing references it.
    pub delete_if_unused: bool,
    /// Clean up copies but report nothing.
    pub no_move_only_diagnostics: bool,
    /// Already checked in the module it came from.
    pub deserialized_canonical: bool,
    /// Number of references from other functions in the module.
    pub ref_count: usize,
}

/// Who uses a value: an instruction or a block terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum User {
    Inst(InstId),
    Terminator(BlockId),
}

pub type UseMap = HashMap<ValueId, Vec<User>>;

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub linkage: Linkage,
    pub attributes: FunctionAttributes,
    pub cfg: ControlFlowGraph,
    pub entry: BlockId,
    pub arguments: Vec<ValueId>,
    values: Vec<ValueInfo>,
    insts: Vec<Option<Instruction>>,
}

impl Function {
    pub fn new(name: &str) -> Self {
        let mut cfg = ControlFlowGraph::new();
        let entry = cfg.add_node(BasicBlock {
            label: "bb0".to_string(),
            insts: Vec::new(),
            terminator: Terminator::Unreachable,
            terminator_loc: SourceLoc::default(),
        });
        Self {
            name: name.to_string(),
            linkage: Linkage::Public,
            attributes: FunctionAttributes::default(),
            cfg,
            entry,
            arguments: Vec::new(),
            values: Vec::new(),
            insts: Vec::new(),
        }
    }

    pub fn value(&self, id: ValueId) -> &ValueInfo {
        &self.values[id.index()]
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn add_value(&mut self, name: &str, ty: Type, repr: ValueRepr, def: ValueDef) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueInfo {
            name: name.to_string(),
            ty,
            repr,
            def,
        });
        id
    }

    pub fn set_value_def(&mut self, id: ValueId, def: ValueDef) {
        self.values[id.index()].def = def;
    }

    pub fn add_argument(&mut self, name: &str, ty: Type, convention: ArgConvention) -> ValueId {
        let index = self.arguments.len();
        let id = self.add_value(name, ty, convention.repr(), ValueDef::Argument { index, convention });
        self.arguments.push(id);
        id
    }

    pub fn add_block(&mut self, label: &str) -> BlockId {
        self.cfg.add_node(BasicBlock {
            label: label.to_string(),
            insts: Vec::new(),
            terminator: Terminator::Unreachable,
            terminator_loc: SourceLoc::default(),
        })
    }

    pub fn block(&self, block: BlockId) -> &BasicBlock {
        &self.cfg[block]
    }

    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.cfg.node_indices()
    }

    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.cfg[block].terminator.successors()
    }

    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        self.cfg
            .edges_directed(block, petgraph::Direction::Incoming)
            .map(|e| e.source())
            .collect()
    }

    /// Replace a block's terminator and keep the CFG edges in sync with it.
    pub fn set_terminator(&mut self, block: BlockId, terminator: Terminator, loc: SourceLoc) {
        let mut stale: Vec<_> = self.cfg.edges(block).map(|e| e.id()).collect();
        // Removing an edge moves the last edge into its slot, so go from the back.
        stale.sort();
        for edge in stale.into_iter().rev() {
            self.cfg.remove_edge(edge);
        }
        for succ in terminator.successors() {
            self.cfg.add_edge(block, succ, ());
        }
        let data = &mut self.cfg[block];
        data.terminator = terminator;
        data.terminator_loc = loc;
    }

    pub fn inst(&self, id: InstId) -> &Instruction {
        self.insts[id.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("instruction {:?} was erased", id))
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        self.insts[id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("instruction {:?} was erased", id))
    }

    pub fn is_live_inst(&self, id: InstId) -> bool {
        self.insts.get(id.index()).map(Option::is_some).unwrap_or(false)
    }

    /// Append an instruction at the end of `block` (before the terminator).
    pub fn append_inst(&mut self, block: BlockId, kind: InstKind, loc: SourceLoc) -> InstId {
        let position = self.cfg[block].insts.len();
        self.insert_inst(block, position, kind, loc)
    }

    pub fn insert_inst(&mut self, block: BlockId, position: usize, kind: InstKind, loc: SourceLoc) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(Some(Instruction { kind, loc, block }));
        self.cfg[block].insts.insert(position, id);
        id
    }

    /// Insert an instruction that defines exactly one new value, returning that value.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_value_inst(
        &mut self,
        block: BlockId,
        position: usize,
        name: &str,
        ty: Type,
        repr: ValueRepr,
        loc: SourceLoc,
        make: impl FnOnce(ValueId) -> InstKind,
    ) -> ValueId {
        let next = InstId(self.insts.len() as u32);
        let result = self.add_value(name, ty, repr, ValueDef::Inst(next));
        let id = self.insert_inst(block, position, make(result), loc);
        debug_assert_eq!(id, next);
        result
    }

    /// Insert a `destructure` of `operand`, creating one owned value per direct field.
    pub fn insert_destructure(
        &mut self,
        block: BlockId,
        position: usize,
        operand: ValueId,
        loc: SourceLoc,
    ) -> (InstId, Vec<ValueId>) {
        let next = InstId(self.insts.len() as u32);
        let parent = self.value(operand).clone();
        let results: Vec<ValueId> = parent
            .ty
            .fields
            .iter()
            .enumerate()
            .map(|(i, ty)| {
                let name = format!("{}.{}", parent.name, i);
                self.add_value(&name, ty.clone(), ValueRepr::Object, ValueDef::Inst(next))
            })
            .collect();
        let id = self.insert_inst(
            block,
            position,
            InstKind::Destructure {
                results: results.clone(),
                operand,
            },
            loc,
        );
        debug_assert_eq!(id, next);
        (id, results)
    }

    pub fn insert_inst_after(&mut self, anchor: InstId, kind: InstKind, loc: SourceLoc) -> InstId {
        let block = self.inst(anchor).block;
        let position = self.position_in_block(anchor) + 1;
        self.insert_inst(block, position, kind, loc)
    }

    pub fn insert_inst_before(&mut self, anchor: InstId, kind: InstKind, loc: SourceLoc) -> InstId {
        let block = self.inst(anchor).block;
        let position = self.position_in_block(anchor);
        self.insert_inst(block, position, kind, loc)
    }

    pub fn erase_inst(&mut self, id: InstId) {
        let block = self.inst(id).block;
        self.cfg[block].insts.retain(|i| *i != id);
        self.insts[id.index()] = None;
    }

    pub fn position_in_block(&self, id: InstId) -> usize {
        let block = self.inst(id).block;
        self.cfg[block]
            .insts
            .iter()
            .position(|i| *i == id)
            .unwrap_or_else(|| panic!("instruction {:?} missing from its block", id))
    }

    /// Live instruction that defines `value`. None for arguments and for values whose
    /// definition was erased.
    pub fn defining_inst(&self, value: ValueId) -> Option<InstId> {
        match self.value(value).def {
            ValueDef::Inst(id) if self.is_live_inst(id) => Some(id),
            _ => None,
        }
    }

    /// Every live instruction, blocks in CFG order and instructions in block order.
    pub fn instructions(&self) -> Vec<InstId> {
        self.blocks()
            .flat_map(|b| self.cfg[b].insts.iter().copied())
            .collect()
    }

    pub fn compute_uses(&self) -> UseMap {
        let mut uses: UseMap = HashMap::new();
        for block in self.blocks() {
            for &id in &self.cfg[block].insts {
                for operand in self.inst(id).kind.operands() {
                    let users = uses.entry(operand).or_default();
                    if !users.contains(&User::Inst(id)) {
                        users.push(User::Inst(id));
                    }
                }
            }
            for operand in self.cfg[block].terminator.operands() {
                uses.entry(operand).or_default().push(User::Terminator(block));
            }
        }
        uses
    }

    pub fn replace_all_uses(&mut self, from: ValueId, to: ValueId) {
        let blocks: Vec<_> = self.blocks().collect();
        for block in blocks {
            let ids = self.cfg[block].insts.clone();
            for id in ids {
                self.inst_mut(id).kind.replace_operand(from, to);
            }
            self.cfg[block].terminator.replace_operand(from, to);
        }
    }

    pub fn user_loc(&self, user: User) -> SourceLoc {
        match user {
            User::Inst(id) => self.inst(id).loc,
            User::Terminator(block) => self.cfg[block].terminator_loc,
        }
    }

    pub fn user_block(&self, user: User) -> BlockId {
        match user {
            User::Inst(id) => self.inst(id).block,
            User::Terminator(block) => block,
        }
    }

    /// Erase every block and instruction, leaving an entry block holding only an
    /// `unreachable`. Arguments keep their identities. Erased instruction ids stay
    /// tombstoned so they are never handed out again.
    pub fn replace_body_with_unreachable(&mut self) {
        let entry = self.entry;
        let loc = self.cfg[entry]
            .insts
            .first()
            .map(|id| self.inst(*id).loc)
            .unwrap_or(self.cfg[entry].terminator_loc);
        let label = self.cfg[entry].label.clone();

        self.cfg.clear();
        for slot in &mut self.insts {
            *slot = None;
        }
        self.entry = self.cfg.add_node(BasicBlock {
            label,
            insts: Vec::new(),
            terminator: Terminator::Unreachable,
            terminator_loc: loc,
        });
    }

    pub fn is_unreachable_only(&self) -> bool {
        self.cfg.node_count() == 1
            && self.cfg[self.entry].insts.is_empty()
            && self.cfg[self.entry].terminator == Terminator::Unreachable
    }

    /// Every function this body refers to by name.
    pub fn referenced_functions(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for id in self.instructions() {
            match &self.inst(id).kind {
                InstKind::FunctionRef { name, .. } => names.push(name.as_str()),
                InstKind::Apply {
                    callee: Callee::Function(name),
                    ..
                } => names.push(name.as_str()),
                InstKind::PartialApply { function, .. } => names.push(function.as_str()),
                _ => {}
            }
        }
        names
    }
}

/// A compilation unit: the set of functions the pass runs over.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new(functions: Vec<Function>) -> Self {
        let mut module = Self { functions };
        module.recompute_ref_counts();
        module
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    /// Count, for every function, how many other functions reference it.
    pub fn recompute_ref_counts(&mut self) {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for function in &self.functions {
            for name in function.referenced_functions() {
                if name != function.name {
                    *counts.entry(name.to_string()).or_default() += 1;
                }
            }
        }
        for function in &mut self.functions {
            function.attributes.ref_count = counts.get(&function.name).copied().unwrap_or(0);
        }
    }
}
