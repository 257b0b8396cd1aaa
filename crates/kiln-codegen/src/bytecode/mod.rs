//! Stack-machine bytecode backend.
//!
//! Values live on an operand stack and in numbered local slots; opcodes
//! are selected per [`RuntimeCategory`] from fixed tables. Structured
//! control flow uses the default label lowering of [`Backend`].
//!
//! ```text
//! if a > b then x else y      a; b; if_icmple L0; x; goto L1; L0: y; L1:
//! ```

pub mod assembler;
pub mod insn;
pub mod interp;

use rustc_hash::FxHashMap;
use tracing::trace;

use kiln_ast::Literal;
use kiln_common::{DispatchKind, RuntimeCategory, TypeRef};

use crate::backend::{ArrayOp, Backend, CompareOp, Condition, EmitResult, Label};
use crate::error::CompileErrorKind;

pub use assembler::{Assembler, ClassFile, FieldInfo, ListingAssembler, MethodCode};
pub use insn::{FieldRef, Instruction, MethodRef, Opcode};
pub use interp::{Interpreter, RuntimeError, Value};

const CONSOLE_OWNER: &str = "java.lang.System";
const CONSOLE_FIELD: &str = "out";
const CONSOLE_TYPE: &str = "java.io.PrintStream";

/// Per-method emission state, saved while a nested method is compiled.
#[derive(Debug)]
struct MethodState {
    name: String,
    return_type: TypeRef,
    slots: FxHashMap<String, (u16, TypeRef)>,
    next_slot: u16,
    next_label: u32,
    last_line: Option<u32>,
}

/// The stack-machine [`Backend`], feeding an [`Assembler`].
pub struct BytecodeBackend<A = ListingAssembler> {
    asm: A,
    /// Open methods, innermost last.
    methods: Vec<MethodState>,
}

impl BytecodeBackend<ListingAssembler> {
    pub fn new() -> Self {
        Self::with_assembler(ListingAssembler::new())
    }
}

impl Default for BytecodeBackend<ListingAssembler> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Assembler> BytecodeBackend<A> {
    pub fn with_assembler(asm: A) -> Self {
        BytecodeBackend {
            asm,
            methods: Vec::new(),
        }
    }

    fn emit(&mut self, insn: Instruction) {
        trace!(insn = %insn, "emit");
        self.asm.emit(insn);
    }

    fn op(&mut self, op: Opcode) {
        self.emit(Instruction::Op(op));
    }

    fn allocate(&mut self, name: &str, ty: &TypeRef) {
        let Some(method) = self.methods.last_mut() else {
            return;
        };
        if method.slots.contains_key(name) {
            return;
        }
        let slot = method.next_slot;
        method.next_slot += ty.category().slot_width().max(1);
        method.slots.insert(name.to_string(), (slot, ty.clone()));
    }

    fn slot(&self, name: &str) -> Result<u16, CompileErrorKind> {
        self.methods
            .last()
            .and_then(|m| m.slots.get(name))
            .map(|(slot, _)| *slot)
            .ok_or_else(|| CompileErrorKind::UnknownLocal(name.to_string()))
    }

    fn field_ref(owner: &TypeRef, name: &str, ty: &TypeRef) -> FieldRef {
        FieldRef {
            owner: owner.to_string(),
            name: name.to_string(),
            ty: ty.clone(),
        }
    }
}

// ── Opcode tables ──────────────────────────────────────────────────────

const INT_OPS: &[(&str, Opcode)] = &[
    ("+", Opcode::IAdd),
    ("-", Opcode::ISub),
    ("*", Opcode::IMul),
    ("/", Opcode::IDiv),
    ("%", Opcode::IRem),
    ("&", Opcode::IAnd),
    ("|", Opcode::IOr),
    ("^", Opcode::IXor),
    ("<<", Opcode::IShl),
    (">>", Opcode::IShr),
    ("-@", Opcode::INeg),
];

const LONG_OPS: &[(&str, Opcode)] = &[
    ("+", Opcode::LAdd),
    ("-", Opcode::LSub),
    ("*", Opcode::LMul),
    ("/", Opcode::LDiv),
    ("%", Opcode::LRem),
    ("&", Opcode::LAnd),
    ("|", Opcode::LOr),
    ("^", Opcode::LXor),
    ("<<", Opcode::LShl),
    (">>", Opcode::LShr),
    ("-@", Opcode::LNeg),
];

const FLOAT_OPS: &[(&str, Opcode)] = &[
    ("+", Opcode::FAdd),
    ("-", Opcode::FSub),
    ("*", Opcode::FMul),
    ("/", Opcode::FDiv),
    ("%", Opcode::FRem),
    ("-@", Opcode::FNeg),
];

const DOUBLE_OPS: &[(&str, Opcode)] = &[
    ("+", Opcode::DAdd),
    ("-", Opcode::DSub),
    ("*", Opcode::DMul),
    ("/", Opcode::DDiv),
    ("%", Opcode::DRem),
    ("-@", Opcode::DNeg),
];

/// The instruction for operator `op` on `category`, if there is one.
pub fn operator_opcode(op: &str, category: RuntimeCategory) -> Option<Opcode> {
    let table = match category {
        c if c.is_int_like() => INT_OPS,
        RuntimeCategory::WideInt => LONG_OPS,
        RuntimeCategory::Float32 => FLOAT_OPS,
        RuntimeCategory::Float64 => DOUBLE_OPS,
        _ => return None,
    };
    table.iter().find(|(name, _)| *name == op).map(|(_, code)| *code)
}

fn array_load(category: RuntimeCategory) -> Opcode {
    match category {
        RuntimeCategory::NarrowInt => Opcode::IALoad,
        RuntimeCategory::WideInt => Opcode::LALoad,
        RuntimeCategory::Float32 => Opcode::FALoad,
        RuntimeCategory::Float64 => Opcode::DALoad,
        RuntimeCategory::Boolean | RuntimeCategory::Byte => Opcode::BALoad,
        RuntimeCategory::Char => Opcode::CALoad,
        RuntimeCategory::Short => Opcode::SALoad,
        RuntimeCategory::Reference | RuntimeCategory::Void => Opcode::AALoad,
    }
}

fn array_store(category: RuntimeCategory) -> Opcode {
    match category {
        RuntimeCategory::NarrowInt => Opcode::IAStore,
        RuntimeCategory::WideInt => Opcode::LAStore,
        RuntimeCategory::Float32 => Opcode::FAStore,
        RuntimeCategory::Float64 => Opcode::DAStore,
        RuntimeCategory::Boolean | RuntimeCategory::Byte => Opcode::BAStore,
        RuntimeCategory::Char => Opcode::CAStore,
        RuntimeCategory::Short => Opcode::SAStore,
        RuntimeCategory::Reference | RuntimeCategory::Void => Opcode::AAStore,
    }
}

fn return_opcode(category: RuntimeCategory) -> Opcode {
    match category {
        RuntimeCategory::Void => Opcode::Return,
        RuntimeCategory::WideInt => Opcode::LReturn,
        RuntimeCategory::Float32 => Opcode::FReturn,
        RuntimeCategory::Float64 => Opcode::DReturn,
        RuntimeCategory::Reference => Opcode::AReturn,
        _ => Opcode::IReturn,
    }
}

fn widening_opcode(from: RuntimeCategory, to: RuntimeCategory) -> Option<Opcode> {
    match (from, to) {
        (f, RuntimeCategory::WideInt) if f.is_int_like() => Some(Opcode::I2L),
        (f, RuntimeCategory::Float32) if f.is_int_like() => Some(Opcode::I2F),
        (f, RuntimeCategory::Float64) if f.is_int_like() => Some(Opcode::I2D),
        (RuntimeCategory::WideInt, RuntimeCategory::Float32) => Some(Opcode::L2F),
        (RuntimeCategory::WideInt, RuntimeCategory::Float64) => Some(Opcode::L2D),
        (RuntimeCategory::Float32, RuntimeCategory::Float64) => Some(Opcode::F2D),
        _ => None,
    }
}

impl<A: Assembler> Backend for BytecodeBackend<A> {
    type Output = A;

    fn begin_class(&mut self, name: &str, superclass: &TypeRef) {
        self.asm.begin_class(name, superclass);
    }

    fn declare_field(&mut self, name: &str, ty: &TypeRef, is_static: bool) {
        self.asm.declare_field(FieldInfo {
            name: name.to_string(),
            ty: ty.clone(),
            is_static,
        });
    }

    fn end_class(&mut self) {
        self.asm.end_class();
    }

    fn begin_method(&mut self, name: &str, return_type: &TypeRef, arg_types: &[TypeRef], is_static: bool) {
        self.asm.begin_method(name, arg_types, return_type, is_static);
        self.methods.push(MethodState {
            name: name.to_string(),
            return_type: return_type.clone(),
            slots: FxHashMap::default(),
            // Slot 0 holds `this` in instance methods.
            next_slot: if is_static { 0 } else { 1 },
            next_label: 0,
            last_line: None,
        });
    }

    fn declare_argument(&mut self, name: &str, ty: &TypeRef) {
        self.allocate(name, ty);
    }

    fn declare_local(&mut self, name: &str, ty: &TypeRef) {
        self.allocate(name, ty);
    }

    fn end_method(&mut self) -> EmitResult {
        let max_locals = self.methods.pop().map(|m| m.next_slot).unwrap_or(0);
        self.asm.end_method(max_locals);
        Ok(())
    }

    fn mark_line(&mut self, line: u32) {
        let Some(method) = self.methods.last_mut() else {
            return;
        };
        if method.last_line != Some(line) {
            method.last_line = Some(line);
            self.emit(Instruction::Line(line));
        }
    }

    fn emit_literal(&mut self, value: &Literal, ty: &TypeRef) {
        let insn = match (value, ty.category()) {
            (Literal::Integer(v), RuntimeCategory::WideInt) => Instruction::LConst(*v),
            (Literal::Integer(v), RuntimeCategory::Float32) => Instruction::FConst(*v as f32),
            (Literal::Integer(v), RuntimeCategory::Float64) => Instruction::DConst(*v as f64),
            (Literal::Integer(v), _) => Instruction::IConst(*v as i32),
            (Literal::Float(v), RuntimeCategory::Float64) => Instruction::DConst(*v),
            (Literal::Float(v), _) => Instruction::FConst(*v as f32),
            (Literal::String(s), _) => Instruction::SConst(s.clone()),
            (Literal::Boolean(b), _) => Instruction::IConst(i32::from(*b)),
        };
        self.emit(insn);
    }

    fn emit_default(&mut self, ty: &TypeRef) {
        let insn = match ty.category() {
            RuntimeCategory::Void => return,
            RuntimeCategory::WideInt => Instruction::LConst(0),
            RuntimeCategory::Float32 => Instruction::FConst(0.0),
            RuntimeCategory::Float64 => Instruction::DConst(0.0),
            RuntimeCategory::Reference => Instruction::Op(Opcode::AConstNull),
            _ => Instruction::IConst(0),
        };
        self.emit(insn);
    }

    fn emit_pop(&mut self, ty: &TypeRef) {
        match ty.category().slot_width() {
            0 => {}
            1 => self.op(Opcode::Pop),
            _ => self.op(Opcode::Pop2),
        }
    }

    fn emit_convert(&mut self, from: &TypeRef, to: &TypeRef) {
        if let Some(op) = widening_opcode(from.category(), to.category()) {
            self.op(op);
        }
    }

    fn emit_self_load(&mut self, _ty: &TypeRef) {
        self.emit(Instruction::Load {
            category: RuntimeCategory::Reference,
            slot: 0,
        });
    }

    fn emit_local_load(&mut self, name: &str, ty: &TypeRef) -> EmitResult {
        let slot = self.slot(name)?;
        self.emit(Instruction::Load {
            category: ty.category(),
            slot,
        });
        Ok(())
    }

    fn emit_local_store(&mut self, name: &str, ty: &TypeRef) -> EmitResult {
        let slot = self.slot(name)?;
        self.emit(Instruction::Store {
            category: ty.category(),
            slot,
        });
        Ok(())
    }

    fn emit_field_load(&mut self, owner: &TypeRef, name: &str, ty: &TypeRef, is_static: bool) {
        let field = Self::field_ref(owner, name, ty);
        self.emit(if is_static {
            Instruction::GetStatic(field)
        } else {
            Instruction::GetField(field)
        });
    }

    fn emit_field_store(&mut self, owner: &TypeRef, name: &str, ty: &TypeRef, is_static: bool) {
        let field = Self::field_ref(owner, name, ty);
        self.emit(if is_static {
            Instruction::PutStatic(field)
        } else {
            Instruction::PutField(field)
        });
    }

    fn emit_binary_primitive(&mut self, op: &str, operand_type: &TypeRef) -> EmitResult {
        let category = operand_type.category();
        let opcode =
            operator_opcode(op, category).ok_or_else(|| CompileErrorKind::UnsupportedPrimitiveOp {
                op: op.to_string(),
                category,
            })?;
        self.op(opcode);
        Ok(())
    }

    fn emit_unary_primitive(&mut self, op: &str, operand_type: &TypeRef) -> EmitResult {
        let category = operand_type.category();
        if op == "+@" && category.is_primitive() {
            return Ok(());
        }
        self.emit_binary_primitive(op, operand_type)
    }

    fn emit_array_op(&mut self, op: ArrayOp, component: &TypeRef) {
        let category = component.category();
        match op {
            ArrayOp::Length => self.op(Opcode::ArrayLength),
            ArrayOp::Load => self.op(array_load(category)),
            ArrayOp::Store => {
                // Keep the stored value as the expression's result.
                if category.slot_width() == 2 {
                    self.op(Opcode::Dup2X2);
                } else {
                    self.op(Opcode::DupX2);
                }
                self.op(array_store(category));
            }
        }
    }

    fn begin_new(&mut self, ty: &TypeRef) {
        self.emit(Instruction::New(ty.to_string()));
        self.op(Opcode::Dup);
    }

    fn emit_call(
        &mut self,
        owner: &TypeRef,
        name: &str,
        params: &[TypeRef],
        return_type: &TypeRef,
        dispatch: DispatchKind,
    ) {
        let (name, returns) = match dispatch {
            DispatchKind::Constructor => ("<init>".to_string(), TypeRef::void()),
            _ => (name.to_string(), return_type.clone()),
        };
        self.emit(Instruction::Invoke {
            dispatch,
            method: MethodRef {
                owner: owner.to_string(),
                name,
                params: params.to_vec(),
                returns,
            },
        });
    }

    fn begin_print(&mut self) {
        self.emit(Instruction::GetStatic(FieldRef {
            owner: CONSOLE_OWNER.to_string(),
            name: CONSOLE_FIELD.to_string(),
            ty: TypeRef::new(CONSOLE_TYPE),
        }));
    }

    fn emit_print(&mut self, ty: &TypeRef, newline: bool) {
        let params = if ty.is_void() { vec![] } else { vec![ty.clone()] };
        self.emit(Instruction::Invoke {
            dispatch: DispatchKind::Virtual,
            method: MethodRef {
                owner: CONSOLE_TYPE.to_string(),
                name: if newline { "println" } else { "print" }.to_string(),
                params,
                returns: TypeRef::void(),
            },
        });
    }

    fn emit_return(&mut self, ty: &TypeRef) -> EmitResult {
        if let Some(method) = self.methods.last() {
            if ty.is_void() != method.return_type.is_void() {
                return Err(CompileErrorKind::UnknownReturnCategory {
                    method: method.name.clone(),
                    declared: method.return_type.clone(),
                    found: ty.clone(),
                });
            }
        }
        self.op(return_opcode(ty.category()));
        Ok(())
    }

    fn new_label(&mut self) -> Label {
        match self.methods.last_mut() {
            Some(method) => {
                let label = Label(method.next_label);
                method.next_label += 1;
                label
            }
            None => Label(0),
        }
    }

    fn set_label(&mut self, label: Label) {
        self.emit(Instruction::Label(label));
    }

    fn emit_jump(&mut self, label: Label) {
        self.emit(Instruction::Goto(label));
    }

    fn emit_branch_if_false(&mut self, condition: Condition, label: Label) -> EmitResult {
        let (op, category, negated) = match condition {
            Condition::IsTrue => {
                self.emit(Instruction::If {
                    cond: CompareOp::Eq,
                    label,
                });
                return Ok(());
            }
            Condition::IsFalse => {
                self.emit(Instruction::If {
                    cond: CompareOp::Ne,
                    label,
                });
                return Ok(());
            }
            Condition::Compare {
                op,
                category,
                negated,
            } => (op, category, negated),
        };
        // Jump when `a op b` equals `negated`. Three-way compare results
        // are totally ordered, so flipping the branch test is exact.
        let cond = if negated { op } else { op.negate() };
        match category {
            c if c.is_int_like() => self.emit(Instruction::IfICmp { cond, label }),
            RuntimeCategory::WideInt => {
                self.op(Opcode::LCmp);
                self.emit(Instruction::If { cond, label });
            }
            RuntimeCategory::Float32 | RuntimeCategory::Float64 => {
                // NaN must make `a op b` false whichever way the branch
                // goes, so it compares as greater for `<`/`<=` and as less
                // otherwise. `==`/`!=` see a nonzero result either way.
                let greater_on_nan = matches!(op, CompareOp::Lt | CompareOp::Le);
                let compare = match (category, greater_on_nan) {
                    (RuntimeCategory::Float32, true) => Opcode::FCmpG,
                    (RuntimeCategory::Float32, false) => Opcode::FCmpL,
                    (_, true) => Opcode::DCmpG,
                    (_, false) => Opcode::DCmpL,
                };
                self.op(compare);
                self.emit(Instruction::If { cond, label });
            }
            RuntimeCategory::Reference if matches!(op, CompareOp::Eq | CompareOp::Ne) => {
                self.emit(Instruction::IfACmp { cond, label });
            }
            _ => {
                return Err(CompileErrorKind::UnsupportedPrimitiveOp {
                    op: op.symbol().to_string(),
                    category,
                })
            }
        }
        Ok(())
    }

    fn finish(self) -> A {
        self.asm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_tables_cover_numeric_categories() {
        assert_eq!(operator_opcode("+", RuntimeCategory::NarrowInt), Some(Opcode::IAdd));
        assert_eq!(operator_opcode("^", RuntimeCategory::Boolean), Some(Opcode::IXor));
        assert_eq!(operator_opcode("<<", RuntimeCategory::WideInt), Some(Opcode::LShl));
        assert_eq!(operator_opcode("%", RuntimeCategory::Float64), Some(Opcode::DRem));
        assert_eq!(operator_opcode("&", RuntimeCategory::Float32), None);
        assert_eq!(operator_opcode("+", RuntimeCategory::Reference), None);
    }

    #[test]
    fn wide_locals_take_two_slots() {
        let mut backend = BytecodeBackend::new();
        backend.begin_class("T", &TypeRef::object());
        backend.begin_method("f", &TypeRef::void(), &[TypeRef::long(), TypeRef::int()], false);
        backend.declare_argument("a", &TypeRef::long());
        backend.declare_argument("b", &TypeRef::int());
        backend.declare_local("c", &TypeRef::double());
        assert_eq!(backend.slot("a"), Ok(1));
        assert_eq!(backend.slot("b"), Ok(3));
        assert_eq!(backend.slot("c"), Ok(4));
        assert_eq!(
            backend.slot("d"),
            Err(CompileErrorKind::UnknownLocal("d".to_string()))
        );
        backend.end_method().unwrap();
        backend.end_class();

        let asm = backend.finish();
        assert_eq!(asm.classes()[0].methods[0].max_locals, 6);
    }

    #[test]
    fn unsupported_operator_is_reported() {
        let mut backend = BytecodeBackend::new();
        let err = backend
            .emit_binary_primitive("&", &TypeRef::double())
            .unwrap_err();
        assert_eq!(
            err,
            CompileErrorKind::UnsupportedPrimitiveOp {
                op: "&".to_string(),
                category: RuntimeCategory::Float64,
            }
        );
    }

    #[test]
    fn nested_methods_keep_their_own_slots() {
        let mut backend = BytecodeBackend::new();
        backend.begin_class("T", &TypeRef::object());
        backend.begin_method("outer", &TypeRef::void(), &[], true);
        backend.declare_local("x", &TypeRef::int());
        backend.begin_method("inner", &TypeRef::void(), &[], true);
        backend.declare_local("y", &TypeRef::long());
        assert_eq!(backend.slot("y"), Ok(0));
        assert!(backend.slot("x").is_err());
        backend.end_method().unwrap();
        assert_eq!(backend.slot("x"), Ok(0));
        backend.end_method().unwrap();
        backend.end_class();

        let asm = backend.finish();
        let names: Vec<&str> = asm.classes()[0].methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["inner", "outer"]);
    }
}
