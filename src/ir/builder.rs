// Convenience builder for constructing function bodies.
//
// Every emitted instruction and terminator gets the next source line, so tests can
// refer to "the consume on line 4" without spelling out locations.

use super::{
    ArgConvention, BlockId, Callee, Function, InstId, InstKind, LoadKind, MarkerCheck, SourceLoc,
    StoreKind, Terminator, Type, ValueId, ValueRepr,
};

pub struct FunctionBuilder {
    function: Function,
    current: BlockId,
    next_line: u32,
    last_loc: SourceLoc,
}

impl FunctionBuilder {
    pub fn new(name: &str) -> Self {
        let function = Function::new(name);
        let current = function.entry;
        Self {
            function,
            current,
            next_line: 1,
            last_loc: SourceLoc::default(),
        }
    }

    pub fn function(&self) -> &Function {
        &self.function
    }

    pub fn function_mut(&mut self) -> &mut Function {
        &mut self.function
    }

    pub fn finish(self) -> Function {
        self.function
    }

    pub fn entry(&self) -> BlockId {
        self.function.entry
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    pub fn block(&mut self, label: &str) -> BlockId {
        self.function.add_block(label)
    }

    pub fn position_at_end(&mut self, block: BlockId) {
        self.current = block;
    }

    /// Force the line used for the next instruction.
    pub fn at_line(&mut self, line: u32) {
        self.next_line = line;
    }

    /// Location given to the most recently emitted instruction or terminator.
    pub fn last_loc(&self) -> SourceLoc {
        self.last_loc
    }

    fn next_loc(&mut self) -> SourceLoc {
        let loc = SourceLoc::new(self.next_line, 1);
        self.next_line += 1;
        self.last_loc = loc;
        loc
    }

    fn emit(&mut self, kind: InstKind) -> InstId {
        let loc = self.next_loc();
        self.function.append_inst(self.current, kind, loc)
    }

    /// Emit an instruction producing one value of the given type and representation.
    fn emit_value(
        &mut self,
        name: &str,
        ty: Type,
        repr: ValueRepr,
        make: impl FnOnce(ValueId) -> InstKind,
    ) -> ValueId {
        let loc = self.next_loc();
        let position = self.function.block(self.current).insts.len();
        self.function
            .insert_value_inst(self.current, position, name, ty, repr, loc, make)
    }

    fn fresh_name(&self) -> String {
        format!("%{}", self.function.value_count())
    }

    pub fn argument(&mut self, name: &str, ty: Type, convention: ArgConvention) -> ValueId {
        self.function.add_argument(name, ty, convention)
    }

    pub fn mark(&mut self, operand: ValueId, check: MarkerCheck) -> ValueId {
        let info = self.function.value(operand).clone();
        let name = format!("{}.marked", info.name);
        self.emit_value(&name, info.ty, info.repr, |result| InstKind::MarkMoveOnly {
            result,
            operand,
            check,
        })
    }

    pub fn mark_owned(&mut self, operand: ValueId) -> ValueId {
        self.mark(operand, MarkerCheck::ConsumableAndAssignable)
    }

    pub fn function_ref(&mut self, name: &str) -> ValueId {
        let callee = name.to_string();
        self.emit_value(name, Type::leaf("fn", false), ValueRepr::Object, |result| {
            InstKind::FunctionRef { result, name: callee }
        })
    }

    pub fn literal(&mut self, name: &str, ty: Type) -> ValueId {
        self.emit_value(name, ty, ValueRepr::Object, |result| InstKind::Literal { result })
    }

    pub fn begin_borrow(&mut self, operand: ValueId) -> ValueId {
        let ty = self.function.value(operand).ty.clone();
        let name = self.fresh_name();
        self.emit_value(&name, ty, ValueRepr::Object, |result| InstKind::BeginBorrow {
            result,
            operand,
        })
    }

    pub fn end_borrow(&mut self, borrow: ValueId) -> InstId {
        self.emit(InstKind::EndBorrow { borrow })
    }

    pub fn struct_extract(&mut self, operand: ValueId, field: usize) -> ValueId {
        let ty = self
            .function
            .value(operand)
            .ty
            .field(field)
            .cloned()
            .unwrap_or_else(|| panic!("struct_extract of missing field {}", field));
        let name = self.fresh_name();
        self.emit_value(&name, ty, ValueRepr::Object, |result| InstKind::StructExtract {
            result,
            operand,
            field,
        })
    }

    pub fn destructure(&mut self, operand: ValueId) -> Vec<ValueId> {
        let loc = self.next_loc();
        let position = self.function.block(self.current).insts.len();
        let (_, results) = self
            .function
            .insert_destructure(self.current, position, operand, loc);
        results
    }

    pub fn move_value(&mut self, operand: ValueId) -> ValueId {
        let ty = self.function.value(operand).ty.clone();
        let name = self.fresh_name();
        self.emit_value(&name, ty, ValueRepr::Object, |result| InstKind::Move { result, operand })
    }

    pub fn copy_value(&mut self, operand: ValueId) -> ValueId {
        let ty = self.function.value(operand).ty.clone();
        let name = self.fresh_name();
        self.emit_value(&name, ty, ValueRepr::Object, |result| InstKind::CopyValue {
            result,
            operand,
        })
    }

    pub fn destroy_value(&mut self, operand: ValueId) -> InstId {
        self.emit(InstKind::DestroyValue { operand })
    }

    pub fn use_value(&mut self, operand: ValueId) -> InstId {
        self.emit(InstKind::Use { operand })
    }

    pub fn alloc_stack(&mut self, name: &str, ty: Type) -> ValueId {
        self.emit_value(name, ty, ValueRepr::Address, |result| InstKind::AllocStack { result })
    }

    pub fn dealloc_stack(&mut self, address: ValueId) -> InstId {
        self.emit(InstKind::DeallocStack { address })
    }

    pub fn field_addr(&mut self, base: ValueId, field: usize) -> ValueId {
        let info = self.function.value(base).clone();
        let ty = info
            .ty
            .field(field)
            .cloned()
            .unwrap_or_else(|| panic!("field_addr of missing field {}", field));
        let name = format!("{}.{}", info.name, field);
        self.emit_value(&name, ty, ValueRepr::Address, |result| InstKind::FieldAddr {
            result,
            base,
            field,
        })
    }

    pub fn load(&mut self, address: ValueId, kind: LoadKind) -> ValueId {
        let ty = self.function.value(address).ty.clone();
        let name = self.fresh_name();
        self.emit_value(&name, ty, ValueRepr::Object, |result| InstKind::Load {
            result,
            address,
            kind,
        })
    }

    pub fn store(&mut self, value: ValueId, address: ValueId, kind: StoreKind) -> InstId {
        self.emit(InstKind::Store { value, address, kind })
    }

    pub fn copy_addr(&mut self, src: ValueId, dest: ValueId, take: bool, init: bool) -> InstId {
        self.emit(InstKind::CopyAddr { src, dest, take, init })
    }

    pub fn destroy_addr(&mut self, address: ValueId) -> InstId {
        self.emit(InstKind::DestroyAddr { address })
    }

    pub fn apply(&mut self, function: &str, args: Vec<(ValueId, ArgConvention)>) -> InstId {
        self.emit(InstKind::Apply {
            result: None,
            callee: Callee::Function(function.to_string()),
            args,
        })
    }

    pub fn apply_with_result(
        &mut self,
        function: &str,
        args: Vec<(ValueId, ArgConvention)>,
        ty: Type,
    ) -> ValueId {
        let name = self.fresh_name();
        let callee = Callee::Function(function.to_string());
        self.emit_value(&name, ty, ValueRepr::Object, |result| InstKind::Apply {
            result: Some(result),
            callee,
            args,
        })
    }

    pub fn apply_closure(&mut self, closure: ValueId, args: Vec<(ValueId, ArgConvention)>) -> InstId {
        self.emit(InstKind::Apply {
            result: None,
            callee: Callee::Closure(closure),
            args,
        })
    }

    pub fn partial_apply(&mut self, function: &str, captures: Vec<ValueId>) -> ValueId {
        let name = self.fresh_name();
        let function = function.to_string();
        self.emit_value(&name, Type::leaf("closure", false), ValueRepr::Object, |result| {
            InstKind::PartialApply {
                result,
                function,
                captures,
            }
        })
    }

    fn terminate(&mut self, terminator: Terminator) {
        let loc = self.next_loc();
        self.function.set_terminator(self.current, terminator, loc);
    }

    pub fn br(&mut self, target: BlockId) {
        self.terminate(Terminator::Branch { target });
    }

    pub fn cond_br(&mut self, condition: ValueId, then_block: BlockId, else_block: BlockId) {
        self.terminate(Terminator::CondBranch {
            condition,
            then_block,
            else_block,
        });
    }

    pub fn ret(&mut self, value: Option<ValueId>) {
        self.terminate(Terminator::Return { value });
    }

    pub fn unreachable(&mut self) {
        self.terminate(Terminator::Unreachable);
    }
}
