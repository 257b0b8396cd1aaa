//! The interface between the dispatcher and a target.
//!
//! A backend is an imperative emitter with an implicit operand stack. The
//! dispatcher pushes operands before calling an `emit_*` operation, and
//! each operation consumes its operands and pushes its result (nothing
//! for `void`).
//!
//! Structured control flow goes through hooks (`begin_if`, `begin_loop`
//! and friends). Their default implementations lower to labels and
//! conditional jumps, which is what a stack machine wants; a backend that
//! emits structured source overrides them.

use std::fmt;

use kiln_ast::Literal;
use kiln_common::{DispatchKind, RuntimeCategory, TypeRef};

use crate::error::CompileErrorKind;

pub type EmitResult = Result<(), CompileErrorKind>;

/// A branch target, unique within the method that created it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// A primitive comparison operator.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn from_name(name: &str) -> Option<CompareOp> {
        match name {
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            "==" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Ne),
            _ => None,
        }
    }

    /// The operator that holds exactly when `self` does not, for operands
    /// that are totally ordered. Floating-point operands are not: with a
    /// NaN both `a < b` and `a >= b` are false.
    pub fn negate(self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::Ge,
            CompareOp::Le => CompareOp::Gt,
            CompareOp::Gt => CompareOp::Le,
            CompareOp::Ge => CompareOp::Lt,
            CompareOp::Eq => CompareOp::Ne,
            CompareOp::Ne => CompareOp::Eq,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }
}

/// What a conditional branch tests.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Condition {
    /// Two operands of `category` on the stack, compared with `op`. When
    /// `negated` the condition holds exactly when `a op b` does not.
    Compare {
        op: CompareOp,
        category: RuntimeCategory,
        negated: bool,
    },
    /// One boolean on the stack that must be true.
    IsTrue,
    /// One boolean on the stack that must be false.
    IsFalse,
}

impl Condition {
    pub fn negate(self) -> Condition {
        match self {
            Condition::Compare {
                op,
                category,
                negated,
            } => Condition::Compare {
                op,
                category,
                negated: !negated,
            },
            Condition::IsTrue => Condition::IsFalse,
            Condition::IsFalse => Condition::IsTrue,
        }
    }
}

/// `length`, `[]` and `[]=` on an array.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArrayOp {
    /// `array` on the stack; pushes an `int`.
    Length,
    /// `array, index` on the stack; pushes the element.
    Load,
    /// `array, index, value` on the stack; pushes `value`.
    Store,
}

impl ArrayOp {
    pub fn from_name(name: &str) -> Option<ArrayOp> {
        match name {
            "length" => Some(ArrayOp::Length),
            "[]" => Some(ArrayOp::Load),
            "[]=" => Some(ArrayOp::Store),
            _ => None,
        }
    }

    /// Operands after the array itself.
    pub fn arity(self) -> usize {
        match self {
            ArrayOp::Length => 0,
            ArrayOp::Load => 1,
            ArrayOp::Store => 2,
        }
    }
}

/// State carried from `begin_if` to `end_if`.
#[derive(Clone, Debug)]
pub struct IfFrame {
    pub else_label: Label,
    pub done: Label,
    /// The value both branches leave behind.
    pub result_type: TypeRef,
}

/// State carried from `begin_loop` to `end_loop`.
#[derive(Clone, Debug)]
pub struct LoopFrame {
    pub body: Label,
    pub condition: Label,
    pub check_first: bool,
    /// The type of the value the body leaves on each iteration.
    pub body_type: TypeRef,
}

/// A code generation target.
///
/// Method state (locals, labels, pending code) belongs to the backend and
/// nests: a `begin_method` inside another method's body starts a fresh
/// method, and the matching `end_method` resumes the outer one. Classes
/// nest the same way.
pub trait Backend {
    type Output;

    // ── Classes and methods ────────────────────────────────────────────

    fn begin_class(&mut self, name: &str, superclass: &TypeRef);

    fn declare_field(&mut self, name: &str, ty: &TypeRef, is_static: bool);

    fn end_class(&mut self);

    fn begin_method(
        &mut self,
        name: &str,
        return_type: &TypeRef,
        arg_types: &[TypeRef],
        is_static: bool,
    );

    /// Bind the next argument, in declaration order.
    fn declare_argument(&mut self, name: &str, ty: &TypeRef);

    /// Bind a method-local variable. Called once per local, before the
    /// method body is emitted.
    fn declare_local(&mut self, name: &str, ty: &TypeRef);

    fn end_method(&mut self) -> EmitResult;

    /// The source line of the code emitted next.
    fn mark_line(&mut self, _line: u32) {}

    // ── Values ─────────────────────────────────────────────────────────

    fn emit_literal(&mut self, value: &Literal, ty: &TypeRef);

    /// The zero value of `ty`; nothing for `void`.
    fn emit_default(&mut self, ty: &TypeRef);

    /// Discard the top value; nothing for `void`.
    fn emit_pop(&mut self, ty: &TypeRef);

    /// Widen the top value from `from` to `to`.
    fn emit_convert(&mut self, from: &TypeRef, to: &TypeRef);

    fn emit_self_load(&mut self, ty: &TypeRef);

    fn emit_local_load(&mut self, name: &str, ty: &TypeRef) -> EmitResult;

    fn emit_local_store(&mut self, name: &str, ty: &TypeRef) -> EmitResult;

    /// Instance fields expect the receiver below the value; static fields
    /// take no receiver.
    fn emit_field_load(&mut self, owner: &TypeRef, name: &str, ty: &TypeRef, is_static: bool);

    fn emit_field_store(&mut self, owner: &TypeRef, name: &str, ty: &TypeRef, is_static: bool);

    // ── Operators ──────────────────────────────────────────────────────

    /// `lhs op rhs` with both operands of `operand_type`.
    fn emit_binary_primitive(&mut self, op: &str, operand_type: &TypeRef) -> EmitResult;

    fn emit_unary_primitive(&mut self, op: &str, operand_type: &TypeRef) -> EmitResult;

    fn emit_array_op(&mut self, op: ArrayOp, component: &TypeRef);

    /// A comparison used as a boolean value.
    fn emit_comparison(&mut self, op: CompareOp, category: RuntimeCategory) -> EmitResult {
        let is_false = self.new_label();
        let done = self.new_label();
        let condition = Condition::Compare {
            op,
            category,
            negated: false,
        };
        self.emit_branch_if_false(condition, is_false)?;
        self.emit_literal(&Literal::Boolean(true), &TypeRef::boolean());
        self.emit_jump(done);
        self.set_label(is_false);
        self.emit_literal(&Literal::Boolean(false), &TypeRef::boolean());
        self.set_label(done);
        Ok(())
    }

    /// Boolean negation of the top value.
    fn emit_not(&mut self) -> EmitResult {
        self.emit_literal(&Literal::Boolean(true), &TypeRef::boolean());
        self.emit_binary_primitive("^", &TypeRef::boolean())
    }

    // ── Calls ──────────────────────────────────────────────────────────

    /// Prepare for a constructor call whose arguments follow.
    fn begin_new(&mut self, ty: &TypeRef);

    /// Invoke a method. The receiver (for instance calls) and the
    /// arguments, already converted to `params`, are on the stack.
    fn emit_call(
        &mut self,
        owner: &TypeRef,
        name: &str,
        params: &[TypeRef],
        return_type: &TypeRef,
        dispatch: DispatchKind,
    );

    /// Prepare for a `puts`/`print` whose argument follows.
    fn begin_print(&mut self);

    fn emit_print(&mut self, ty: &TypeRef, newline: bool);

    /// Return the top value (nothing for `void`) from the current method.
    fn emit_return(&mut self, ty: &TypeRef) -> EmitResult;

    // ── Labels and jumps ───────────────────────────────────────────────

    fn new_label(&mut self) -> Label;

    fn set_label(&mut self, label: Label);

    fn emit_jump(&mut self, label: Label);

    /// Consume the operands of `condition` and jump to `label` when it does
    /// not hold.
    fn emit_branch_if_false(&mut self, condition: Condition, label: Label) -> EmitResult;

    // ── Structured control flow ────────────────────────────────────────

    /// The condition operands are on the stack; the then-branch follows.
    fn begin_if(&mut self, condition: Condition, result_type: &TypeRef) -> Result<IfFrame, CompileErrorKind> {
        let frame = IfFrame {
            else_label: self.new_label(),
            done: self.new_label(),
            result_type: result_type.clone(),
        };
        self.emit_branch_if_false(condition, frame.else_label)?;
        Ok(frame)
    }

    /// The then-branch value is on the stack; the else-branch follows.
    fn begin_else(&mut self, frame: &IfFrame) {
        self.emit_jump(frame.done);
        self.set_label(frame.else_label);
    }

    fn end_if(&mut self, frame: IfFrame) {
        self.set_label(frame.done);
    }

    /// Start a loop whose body comes next. The body's last value is kept
    /// across iterations, so a placeholder stands in before the first.
    fn begin_loop(&mut self, check_first: bool, body_type: &TypeRef) -> LoopFrame {
        let frame = LoopFrame {
            body: self.new_label(),
            condition: self.new_label(),
            check_first,
            body_type: body_type.clone(),
        };
        self.emit_default(body_type);
        if check_first {
            self.emit_jump(frame.condition);
        }
        self.set_label(frame.body);
        self.emit_pop(body_type);
        frame
    }

    /// The body value is on the stack; the condition operands follow.
    fn begin_loop_condition(&mut self, frame: &LoopFrame) {
        self.set_label(frame.condition);
    }

    /// Branch back while `condition` holds, then drop the last body value.
    fn end_loop(&mut self, frame: LoopFrame, condition: Condition) -> EmitResult {
        self.emit_branch_if_false(condition.negate(), frame.body)?;
        self.emit_pop(&frame.body_type);
        Ok(())
    }

    fn finish(self) -> Self::Output
    where
        Self: Sized;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negation_round_trips() {
        for op in [
            CompareOp::Lt,
            CompareOp::Le,
            CompareOp::Gt,
            CompareOp::Ge,
            CompareOp::Eq,
            CompareOp::Ne,
        ] {
            assert_eq!(op.negate().negate(), op);
            assert_eq!(CompareOp::from_name(op.symbol()), Some(op));
        }
        assert_eq!(Condition::IsTrue.negate(), Condition::IsFalse);
    }

    #[test]
    fn negating_a_comparison_keeps_its_operator() {
        let lt = Condition::Compare {
            op: CompareOp::Lt,
            category: RuntimeCategory::Float64,
            negated: false,
        };
        assert_eq!(
            lt.negate(),
            Condition::Compare {
                op: CompareOp::Lt,
                category: RuntimeCategory::Float64,
                negated: true,
            }
        );
        assert_eq!(lt.negate().negate(), lt);
    }

    #[test]
    fn array_op_arity() {
        assert_eq!(ArrayOp::from_name("[]=").map(ArrayOp::arity), Some(2));
        assert_eq!(ArrayOp::from_name("length").map(ArrayOp::arity), Some(0));
        assert_eq!(ArrayOp::from_name("push"), None);
    }
}
