//! Stack-machine instructions.
//!
//! The instruction set follows the JVM's: typed arithmetic, typed local
//! slots (wide values take two), compare-then-branch for `long`, `float`
//! and `double`, and symbolic method and field references.

use std::fmt;

use kiln_common::{DispatchKind, RuntimeCategory, TypeRef};

use crate::backend::{CompareOp, Label};

/// Instructions without operands.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ── int ──
    IAdd,
    ISub,
    IMul,
    IDiv,
    IRem,
    IAnd,
    IOr,
    IXor,
    IShl,
    IShr,
    INeg,
    // ── long ──
    LAdd,
    LSub,
    LMul,
    LDiv,
    LRem,
    LAnd,
    LOr,
    LXor,
    LShl,
    LShr,
    LNeg,
    // ── float ──
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
    FNeg,
    // ── double ──
    DAdd,
    DSub,
    DMul,
    DDiv,
    DRem,
    DNeg,
    // ── widening ──
    I2L,
    I2F,
    I2D,
    L2F,
    L2D,
    F2D,
    // ── comparison ──
    LCmp,
    FCmpL,
    FCmpG,
    DCmpL,
    DCmpG,
    // ── arrays ──
    IALoad,
    LALoad,
    FALoad,
    DALoad,
    AALoad,
    BALoad,
    CALoad,
    SALoad,
    IAStore,
    LAStore,
    FAStore,
    DAStore,
    AAStore,
    BAStore,
    CAStore,
    SAStore,
    ArrayLength,
    // ── stack ──
    AConstNull,
    Pop,
    Pop2,
    Dup,
    DupX2,
    Dup2X2,
    // ── returns ──
    Return,
    IReturn,
    LReturn,
    FReturn,
    DReturn,
    AReturn,
}

impl Opcode {
    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            IAdd => "iadd",
            ISub => "isub",
            IMul => "imul",
            IDiv => "idiv",
            IRem => "irem",
            IAnd => "iand",
            IOr => "ior",
            IXor => "ixor",
            IShl => "ishl",
            IShr => "ishr",
            INeg => "ineg",
            LAdd => "ladd",
            LSub => "lsub",
            LMul => "lmul",
            LDiv => "ldiv",
            LRem => "lrem",
            LAnd => "land",
            LOr => "lor",
            LXor => "lxor",
            LShl => "lshl",
            LShr => "lshr",
            LNeg => "lneg",
            FAdd => "fadd",
            FSub => "fsub",
            FMul => "fmul",
            FDiv => "fdiv",
            FRem => "frem",
            FNeg => "fneg",
            DAdd => "dadd",
            DSub => "dsub",
            DMul => "dmul",
            DDiv => "ddiv",
            DRem => "drem",
            DNeg => "dneg",
            I2L => "i2l",
            I2F => "i2f",
            I2D => "i2d",
            L2F => "l2f",
            L2D => "l2d",
            F2D => "f2d",
            LCmp => "lcmp",
            FCmpL => "fcmpl",
            FCmpG => "fcmpg",
            DCmpL => "dcmpl",
            DCmpG => "dcmpg",
            IALoad => "iaload",
            LALoad => "laload",
            FALoad => "faload",
            DALoad => "daload",
            AALoad => "aaload",
            BALoad => "baload",
            CALoad => "caload",
            SALoad => "saload",
            IAStore => "iastore",
            LAStore => "lastore",
            FAStore => "fastore",
            DAStore => "dastore",
            AAStore => "aastore",
            BAStore => "bastore",
            CAStore => "castore",
            SAStore => "sastore",
            ArrayLength => "arraylength",
            AConstNull => "aconst_null",
            Pop => "pop",
            Pop2 => "pop2",
            Dup => "dup",
            DupX2 => "dup_x2",
            Dup2X2 => "dup2_x2",
            Return => "return",
            IReturn => "ireturn",
            LReturn => "lreturn",
            FReturn => "freturn",
            DReturn => "dreturn",
            AReturn => "areturn",
        }
    }
}

/// A symbolic field reference.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    pub ty: TypeRef,
}

/// A symbolic method reference.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodRef {
    pub owner: String,
    pub name: String,
    pub params: Vec<TypeRef>,
    pub returns: TypeRef,
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}(", self.owner, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, "): {}", self.returns)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Op(Opcode),
    IConst(i32),
    LConst(i64),
    FConst(f32),
    DConst(f64),
    SConst(String),
    Load { category: RuntimeCategory, slot: u16 },
    Store { category: RuntimeCategory, slot: u16 },
    /// Compare two ints and branch when `cond` holds.
    IfICmp { cond: CompareOp, label: Label },
    /// Compare two references (`Eq` or `Ne` only) and branch.
    IfACmp { cond: CompareOp, label: Label },
    /// Compare an int with zero and branch when `cond` holds.
    If { cond: CompareOp, label: Label },
    Goto(Label),
    Label(Label),
    /// Source line of the following instructions.
    Line(u32),
    Invoke { dispatch: DispatchKind, method: MethodRef },
    New(String),
    GetStatic(FieldRef),
    PutStatic(FieldRef),
    GetField(FieldRef),
    PutField(FieldRef),
}

fn prefix(category: RuntimeCategory) -> char {
    match category {
        RuntimeCategory::WideInt => 'l',
        RuntimeCategory::Float32 => 'f',
        RuntimeCategory::Float64 => 'd',
        RuntimeCategory::Reference | RuntimeCategory::Void => 'a',
        _ => 'i',
    }
}

fn suffix(cond: CompareOp) -> &'static str {
    match cond {
        CompareOp::Eq => "eq",
        CompareOp::Ne => "ne",
        CompareOp::Lt => "lt",
        CompareOp::Ge => "ge",
        CompareOp::Gt => "gt",
        CompareOp::Le => "le",
    }
}

fn slot_op(f: &mut fmt::Formatter<'_>, op: &str, category: RuntimeCategory, slot: u16) -> fmt::Result {
    if slot <= 3 {
        write!(f, "{}{}_{}", prefix(category), op, slot)
    } else {
        write!(f, "{}{} {}", prefix(category), op, slot)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Op(op) => write!(f, "{}", op.mnemonic()),
            Instruction::IConst(-1) => write!(f, "iconst_m1"),
            Instruction::IConst(v @ 0..=5) => write!(f, "iconst_{}", v),
            Instruction::IConst(v @ -128..=127) => write!(f, "bipush {}", v),
            Instruction::IConst(v @ -32768..=32767) => write!(f, "sipush {}", v),
            Instruction::IConst(v) => write!(f, "ldc {}", v),
            Instruction::LConst(v @ 0..=1) => write!(f, "lconst_{}", v),
            Instruction::LConst(v) => write!(f, "ldc2_w {}", v),
            Instruction::FConst(v) if *v == 0.0 || *v == 1.0 || *v == 2.0 => {
                write!(f, "fconst_{}", *v as i32)
            }
            Instruction::FConst(v) => write!(f, "ldc {:?}", v),
            Instruction::DConst(v) if *v == 0.0 || *v == 1.0 => write!(f, "dconst_{}", *v as i32),
            Instruction::DConst(v) => write!(f, "ldc2_w {:?}", v),
            Instruction::SConst(s) => write!(f, "ldc {:?}", s),
            Instruction::Load { category, slot } => slot_op(f, "load", *category, *slot),
            Instruction::Store { category, slot } => slot_op(f, "store", *category, *slot),
            Instruction::IfICmp { cond, label } => write!(f, "if_icmp{} {}", suffix(*cond), label),
            Instruction::IfACmp { cond, label } => write!(f, "if_acmp{} {}", suffix(*cond), label),
            Instruction::If { cond, label } => write!(f, "if{} {}", suffix(*cond), label),
            Instruction::Goto(label) => write!(f, "goto {}", label),
            Instruction::Label(label) => write!(f, "{}:", label),
            Instruction::Line(line) => write!(f, "line {}", line),
            Instruction::Invoke { dispatch, method } => {
                let op = match dispatch {
                    DispatchKind::Static => "invokestatic",
                    DispatchKind::Virtual => "invokevirtual",
                    DispatchKind::Interface => "invokeinterface",
                    DispatchKind::Constructor => "invokespecial",
                };
                write!(f, "{} {}", op, method)
            }
            Instruction::New(class) => write!(f, "new {}", class),
            Instruction::GetStatic(field) => write!(f, "getstatic {}.{}: {}", field.owner, field.name, field.ty),
            Instruction::PutStatic(field) => write!(f, "putstatic {}.{}: {}", field.owner, field.name, field.ty),
            Instruction::GetField(field) => write!(f, "getfield {}.{}: {}", field.owner, field.name, field.ty),
            Instruction::PutField(field) => write!(f, "putfield {}.{}: {}", field.owner, field.name, field.ty),
        }
    }
}
