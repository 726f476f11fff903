// JSON description of a module, used by the CLI and by tests.
//
// Values are referred to by name. A value has to be defined (as an argument or by an
// earlier instruction in file order) before it is used; blocks may be referenced
// before they are listed.

use super::{
    ArgConvention, BlockId, Callee, Function, InstKind, Linkage, LoadKind, MarkerCheck, Module,
    SourceLoc, StoreKind, Terminator, Type, ValueId, ValueRepr,
};
use crate::config::CheckerConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IrError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse module description: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown type '{0}'")]
    UnknownType(String),
    #[error("type '{0}' contains itself")]
    RecursiveType(String),
    #[error("type '{ty}' has no field {field}")]
    UnknownField { ty: String, field: usize },
    #[error("function '{function}': unknown value '{name}'")]
    UnknownValue { function: String, name: String },
    #[error("function '{function}': value '{name}' defined twice")]
    DuplicateValue { function: String, name: String },
    #[error("function '{function}': unknown block '{label}'")]
    UnknownBlock { function: String, label: String },
    #[error("function '{function}': '{name}' must be an {expected:?} value")]
    WrongRepr {
        function: String,
        name: String,
        expected: ValueRepr,
    },
    #[error("function '{0}' has no blocks")]
    EmptyFunction(String),
    #[error("function '{0}' defined twice")]
    DuplicateFunction(String),
    #[error("no function named '{0}' in the module")]
    UnknownFunction(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleDesc {
    #[serde(default)]
    pub config: Option<CheckerConfig>,
    #[serde(default)]
    pub types: Vec<TypeDesc>,
    pub functions: Vec<FunctionDesc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeDesc {
    pub name: String,
    #[serde(default)]
    pub move_only: bool,
    #[serde(default)]
    pub fields: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionDesc {
    pub name: String,
    #[serde(default)]
    pub linkage: Linkage,
    #[serde(default)]
    pub attributes: AttributesDesc,
    #[serde(default)]
    pub arguments: Vec<ArgumentDesc>,
    pub blocks: Vec<BlockDesc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AttributesDesc {
    pub delete_if_unused: bool,
    pub no_move_only_diagnostics: bool,
    pub deserialized_canonical: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArgumentDesc {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub convention: ArgConvention,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockDesc {
    pub label: String,
    #[serde(default)]
    pub instructions: Vec<InstructionDesc>,
    pub terminator: TerminatorDesc,
}

#[derive(Debug, Deserialize)]
pub struct InstructionDesc {
    #[serde(flatten)]
    pub op: OpDesc,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

fn default_check() -> MarkerCheck {
    MarkerCheck::ConsumableAndAssignable
}

fn default_store() -> StoreKind {
    StoreKind::Init
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpDesc {
    Mark {
        result: String,
        operand: String,
        #[serde(default = "default_check")]
        check: MarkerCheck,
    },
    FunctionRef {
        result: String,
        name: String,
    },
    Literal {
        result: String,
        #[serde(rename = "type")]
        ty: String,
    },
    BeginBorrow {
        result: String,
        operand: String,
    },
    EndBorrow {
        borrow: String,
    },
    StructExtract {
        result: String,
        operand: String,
        field: usize,
    },
    Destructure {
        results: Vec<String>,
        operand: String,
    },
    Move {
        result: String,
        operand: String,
    },
    CopyValue {
        result: String,
        operand: String,
    },
    ExplicitCopyValue {
        result: String,
        operand: String,
    },
    DestroyValue {
        operand: String,
    },
    Use {
        operand: String,
    },
    AllocStack {
        result: String,
        #[serde(rename = "type")]
        ty: String,
    },
    DeallocStack {
        address: String,
    },
    FieldAddr {
        result: String,
        base: String,
        field: usize,
    },
    Load {
        result: String,
        address: String,
        kind: LoadKind,
    },
    Store {
        value: String,
        address: String,
        #[serde(default = "default_store")]
        kind: StoreKind,
    },
    CopyAddr {
        src: String,
        dest: String,
        #[serde(default)]
        take: bool,
        #[serde(default)]
        init: bool,
    },
    DestroyAddr {
        address: String,
    },
    Apply {
        #[serde(default)]
        function: Option<String>,
        #[serde(default)]
        closure: Option<String>,
        #[serde(default)]
        args: Vec<(String, ArgConvention)>,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        result_type: Option<String>,
    },
    PartialApply {
        result: String,
        function: String,
        #[serde(default)]
        captures: Vec<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TerminatorDesc {
    Branch {
        target: String,
        #[serde(default)]
        line: u32,
    },
    CondBranch {
        condition: String,
        then: String,
        #[serde(rename = "else")]
        otherwise: String,
        #[serde(default)]
        line: u32,
    },
    Return {
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        line: u32,
    },
    Unreachable {
        #[serde(default)]
        line: u32,
    },
}

/// A module plus the configuration it asked for, if any.
#[derive(Debug)]
pub struct LoadedModule {
    pub module: Module,
    pub config: Option<CheckerConfig>,
}

pub fn load_module_file(path: &Path) -> Result<LoadedModule, IrError> {
    let content = std::fs::read_to_string(path).map_err(|source| IrError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_module(&content)
}

pub fn parse_module(content: &str) -> Result<LoadedModule, IrError> {
    let desc: ModuleDesc = serde_json::from_str(content)?;
    build_module(desc)
}

pub fn build_module(desc: ModuleDesc) -> Result<LoadedModule, IrError> {
    let types = TypeTable::new(&desc.types)?;
    let mut functions: Vec<Function> = Vec::with_capacity(desc.functions.len());
    for function_desc in &desc.functions {
        if functions.iter().any(|f| f.name == function_desc.name) {
            return Err(IrError::DuplicateFunction(function_desc.name.clone()));
        }
        functions.push(FunctionLowering::new(function_desc, &types).lower()?);
    }
    Ok(LoadedModule {
        module: Module::new(functions),
        config: desc.config,
    })
}

struct TypeTable<'a> {
    descs: HashMap<&'a str, &'a TypeDesc>,
}

impl<'a> TypeTable<'a> {
    fn new(descs: &'a [TypeDesc]) -> Result<Self, IrError> {
        let table = Self {
            descs: descs.iter().map(|d| (d.name.as_str(), d)).collect(),
        };
        // Resolve everything once up front so cycles and typos surface early.
        for desc in descs {
            table.resolve(&desc.name)?;
        }
        Ok(table)
    }

    fn resolve(&self, name: &str) -> Result<Type, IrError> {
        self.resolve_inner(name, &mut Vec::new())
    }

    fn resolve_inner(&self, name: &str, stack: &mut Vec<String>) -> Result<Type, IrError> {
        if stack.iter().any(|n| n == name) {
            return Err(IrError::RecursiveType(name.to_string()));
        }
        let desc = self
            .descs
            .get(name)
            .ok_or_else(|| IrError::UnknownType(name.to_string()))?;
        stack.push(name.to_string());
        let fields = desc
            .fields
            .iter()
            .map(|field| self.resolve_inner(field, stack))
            .collect::<Result<Vec<_>, _>>()?;
        stack.pop();
        Ok(Type::aggregate(&desc.name, desc.move_only, fields))
    }
}

struct FunctionLowering<'a> {
    desc: &'a FunctionDesc,
    types: &'a TypeTable<'a>,
    function: Function,
    values: HashMap<String, ValueId>,
    blocks: HashMap<String, BlockId>,
}

impl<'a> FunctionLowering<'a> {
    fn new(desc: &'a FunctionDesc, types: &'a TypeTable<'a>) -> Self {
        Self {
            desc,
            types,
            function: Function::new(&desc.name),
            values: HashMap::new(),
            blocks: HashMap::new(),
        }
    }

    fn lower(mut self) -> Result<Function, IrError> {
        if self.desc.blocks.is_empty() {
            return Err(IrError::EmptyFunction(self.desc.name.clone()));
        }
        self.function.linkage = self.desc.linkage;
        self.function.attributes.delete_if_unused = self.desc.attributes.delete_if_unused;
        self.function.attributes.no_move_only_diagnostics = self.desc.attributes.no_move_only_diagnostics;
        self.function.attributes.deserialized_canonical = self.desc.attributes.deserialized_canonical;

        for arg in &self.desc.arguments {
            let ty = self.types.resolve(&arg.ty)?;
            let id = self.function.add_argument(&arg.name, ty, arg.convention);
            self.define(&arg.name, id)?;
        }

        // The entry block already exists; create the rest so branches can refer forward.
        for (i, block) in self.desc.blocks.iter().enumerate() {
            let id = if i == 0 {
                self.function.cfg[self.function.entry].label = block.label.clone();
                self.function.entry
            } else {
                self.function.add_block(&block.label)
            };
            self.blocks.insert(block.label.clone(), id);
        }

        for block_desc in &self.desc.blocks {
            let block = self.blocks[&block_desc.label];
            for inst in &block_desc.instructions {
                let loc = SourceLoc::new(inst.line, inst.column);
                self.lower_inst(block, &inst.op, loc)?;
            }
            let (terminator, loc) = self.lower_terminator(&block_desc.terminator)?;
            self.function.set_terminator(block, terminator, loc);
        }
        Ok(self.function)
    }

    fn define(&mut self, name: &str, id: ValueId) -> Result<(), IrError> {
        if self.values.insert(name.to_string(), id).is_some() {
            return Err(IrError::DuplicateValue {
                function: self.desc.name.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn value(&self, name: &str) -> Result<ValueId, IrError> {
        self.values.get(name).copied().ok_or_else(|| IrError::UnknownValue {
            function: self.desc.name.clone(),
            name: name.to_string(),
        })
    }

    fn value_of(&self, name: &str, expected: ValueRepr) -> Result<ValueId, IrError> {
        let id = self.value(name)?;
        if self.function.value(id).repr != expected {
            return Err(IrError::WrongRepr {
                function: self.desc.name.clone(),
                name: name.to_string(),
                expected,
            });
        }
        Ok(id)
    }

    fn block(&self, label: &str) -> Result<BlockId, IrError> {
        self.blocks.get(label).copied().ok_or_else(|| IrError::UnknownBlock {
            function: self.desc.name.clone(),
            label: label.to_string(),
        })
    }

    fn field_type(&self, ty: &Type, field: usize) -> Result<Type, IrError> {
        ty.field(field).cloned().ok_or_else(|| IrError::UnknownField {
            ty: ty.name.clone(),
            field,
        })
    }

    fn push_value(
        &mut self,
        block: BlockId,
        name: &str,
        ty: Type,
        repr: ValueRepr,
        loc: SourceLoc,
        make: impl FnOnce(ValueId) -> InstKind,
    ) -> Result<(), IrError> {
        let position = self.function.block(block).insts.len();
        let id = self
            .function
            .insert_value_inst(block, position, name, ty, repr, loc, make);
        self.define(name, id)
    }

    fn lower_inst(&mut self, block: BlockId, op: &OpDesc, loc: SourceLoc) -> Result<(), IrError> {
        match op {
            OpDesc::Mark { result, operand, check } => {
                let operand = self.value(operand)?;
                let info = self.function.value(operand).clone();
                let check = *check;
                self.push_value(block, result, info.ty, info.repr, loc, |result| {
                    InstKind::MarkMoveOnly { result, operand, check }
                })
            }
            OpDesc::FunctionRef { result, name } => {
                let callee = name.clone();
                self.push_value(block, result, Type::leaf("fn", false), ValueRepr::Object, loc, |result| {
                    InstKind::FunctionRef { result, name: callee }
                })
            }
            OpDesc::Literal { result, ty } => {
                let ty = self.types.resolve(ty)?;
                self.push_value(block, result, ty, ValueRepr::Object, loc, |result| InstKind::Literal {
                    result,
                })
            }
            OpDesc::BeginBorrow { result, operand } => {
                let operand = self.value_of(operand, ValueRepr::Object)?;
                let ty = self.function.value(operand).ty.clone();
                self.push_value(block, result, ty, ValueRepr::Object, loc, |result| {
                    InstKind::BeginBorrow { result, operand }
                })
            }
            OpDesc::EndBorrow { borrow } => {
                let borrow = self.value_of(borrow, ValueRepr::Object)?;
                self.function.append_inst(block, InstKind::EndBorrow { borrow }, loc);
                Ok(())
            }
            OpDesc::StructExtract { result, operand, field } => {
                let operand = self.value_of(operand, ValueRepr::Object)?;
                let ty = self.field_type(&self.function.value(operand).ty, *field)?;
                let field = *field;
                self.push_value(block, result, ty, ValueRepr::Object, loc, |result| {
                    InstKind::StructExtract { result, operand, field }
                })
            }
            OpDesc::Destructure { results, operand } => {
                let operand = self.value_of(operand, ValueRepr::Object)?;
                let field_count = self.function.value(operand).ty.fields.len();
                if results.len() != field_count {
                    return Err(IrError::UnknownField {
                        ty: self.function.value(operand).ty.name.clone(),
                        field: results.len(),
                    });
                }
                let position = self.function.block(block).insts.len();
                let (_, ids) = self.function.insert_destructure(block, position, operand, loc);
                for (name, id) in results.iter().zip(ids) {
                    self.define(name, id)?;
                }
                Ok(())
            }
            OpDesc::Move { result, operand } => {
                let operand = self.value_of(operand, ValueRepr::Object)?;
                let ty = self.function.value(operand).ty.clone();
                self.push_value(block, result, ty, ValueRepr::Object, loc, |result| InstKind::Move {
                    result,
                    operand,
                })
            }
            OpDesc::CopyValue { result, operand } => {
                let operand = self.value_of(operand, ValueRepr::Object)?;
                let ty = self.function.value(operand).ty.clone();
                self.push_value(block, result, ty, ValueRepr::Object, loc, |result| {
                    InstKind::CopyValue { result, operand }
                })
            }
            OpDesc::ExplicitCopyValue { result, operand } => {
                let operand = self.value_of(operand, ValueRepr::Object)?;
                let ty = self.function.value(operand).ty.clone();
                self.push_value(block, result, ty, ValueRepr::Object, loc, |result| {
                    InstKind::ExplicitCopyValue { result, operand }
                })
            }
            OpDesc::DestroyValue { operand } => {
                let operand = self.value_of(operand, ValueRepr::Object)?;
                self.function.append_inst(block, InstKind::DestroyValue { operand }, loc);
                Ok(())
            }
            OpDesc::Use { operand } => {
                let operand = self.value(operand)?;
                self.function.append_inst(block, InstKind::Use { operand }, loc);
                Ok(())
            }
            OpDesc::AllocStack { result, ty } => {
                let ty = self.types.resolve(ty)?;
                self.push_value(block, result, ty, ValueRepr::Address, loc, |result| {
                    InstKind::AllocStack { result }
                })
            }
            OpDesc::DeallocStack { address } => {
                let address = self.value_of(address, ValueRepr::Address)?;
                self.function.append_inst(block, InstKind::DeallocStack { address }, loc);
                Ok(())
            }
            OpDesc::FieldAddr { result, base, field } => {
                let base = self.value_of(base, ValueRepr::Address)?;
                let ty = self.field_type(&self.function.value(base).ty, *field)?;
                let field = *field;
                self.push_value(block, result, ty, ValueRepr::Address, loc, |result| {
                    InstKind::FieldAddr { result, base, field }
                })
            }
            OpDesc::Load { result, address, kind } => {
                let address = self.value_of(address, ValueRepr::Address)?;
                let ty = self.function.value(address).ty.clone();
                let kind = *kind;
                self.push_value(block, result, ty, ValueRepr::Object, loc, |result| InstKind::Load {
                    result,
                    address,
                    kind,
                })
            }
            OpDesc::Store { value, address, kind } => {
                let value = self.value_of(value, ValueRepr::Object)?;
                let address = self.value_of(address, ValueRepr::Address)?;
                self.function.append_inst(
                    block,
                    InstKind::Store {
                        value,
                        address,
                        kind: *kind,
                    },
                    loc,
                );
                Ok(())
            }
            OpDesc::CopyAddr { src, dest, take, init } => {
                let src = self.value_of(src, ValueRepr::Address)?;
                let dest = self.value_of(dest, ValueRepr::Address)?;
                self.function.append_inst(
                    block,
                    InstKind::CopyAddr {
                        src,
                        dest,
                        take: *take,
                        init: *init,
                    },
                    loc,
                );
                Ok(())
            }
            OpDesc::DestroyAddr { address } => {
                let address = self.value_of(address, ValueRepr::Address)?;
                self.function.append_inst(block, InstKind::DestroyAddr { address }, loc);
                Ok(())
            }
            OpDesc::Apply {
                function,
                closure,
                args,
                result,
                result_type,
            } => {
                let callee = match (function, closure) {
                    (_, Some(closure)) => Callee::Closure(self.value_of(closure, ValueRepr::Object)?),
                    (Some(function), None) => Callee::Function(function.clone()),
                    (None, None) => Callee::Function(String::from("<unknown>")),
                };
                let args = args
                    .iter()
                    .map(|(name, convention)| Ok((self.value_of(name, convention.repr())?, *convention)))
                    .collect::<Result<Vec<_>, IrError>>()?;
                match result {
                    Some(result) => {
                        let ty = match result_type {
                            Some(ty) => self.types.resolve(ty)?,
                            None => Type::leaf("()", false),
                        };
                        self.push_value(block, result, ty, ValueRepr::Object, loc, |result| {
                            InstKind::Apply {
                                result: Some(result),
                                callee,
                                args,
                            }
                        })
                    }
                    None => {
                        self.function.append_inst(
                            block,
                            InstKind::Apply {
                                result: None,
                                callee,
                                args,
                            },
                            loc,
                        );
                        Ok(())
                    }
                }
            }
            OpDesc::PartialApply {
                result,
                function,
                captures,
            } => {
                let captures = captures
                    .iter()
                    .map(|name| self.value(name))
                    .collect::<Result<Vec<_>, _>>()?;
                let function = function.clone();
                self.push_value(
                    block,
                    result,
                    Type::leaf("closure", false),
                    ValueRepr::Object,
                    loc,
                    |result| InstKind::PartialApply {
                        result,
                        function,
                        captures,
                    },
                )
            }
        }
    }

    fn lower_terminator(&self, desc: &TerminatorDesc) -> Result<(Terminator, SourceLoc), IrError> {
        Ok(match desc {
            TerminatorDesc::Branch { target, line } => (
                Terminator::Branch {
                    target: self.block(target)?,
                },
                SourceLoc::new(*line, 0),
            ),
            TerminatorDesc::CondBranch {
                condition,
                then,
                otherwise,
                line,
            } => (
                Terminator::CondBranch {
                    condition: self.value(condition)?,
                    then_block: self.block(then)?,
                    else_block: self.block(otherwise)?,
                },
                SourceLoc::new(*line, 0),
            ),
            TerminatorDesc::Return { value, line } => {
                let value = value.as_deref().map(|v| self.value(v)).transpose()?;
                (Terminator::Return { value }, SourceLoc::new(*line, 0))
            }
            TerminatorDesc::Unreachable { line } => (Terminator::Unreachable, SourceLoc::new(*line, 0)),
        })
    }
}
