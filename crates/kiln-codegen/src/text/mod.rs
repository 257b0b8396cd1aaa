//! C-like source backend.
//!
//! Emits one `class` block per class with typed fields and methods.
//! Expressions are built on a stack of source fragments and written out
//! as statements when their value is stored, returned or discarded.
//! Structured control flow is overridden to produce `if`/`else` and
//! `do`/`while` blocks; a value-producing `if` assigns a temporary in each
//! branch. Code after a `return` or `goto` is dropped until the next
//! label or block boundary.

use rustc_hash::FxHashSet;

use kiln_ast::Literal;
use kiln_common::{DispatchKind, RuntimeCategory, TypeRef};

use crate::backend::{ArrayOp, Backend, CompareOp, Condition, EmitResult, IfFrame, Label, LoopFrame};
use crate::error::CompileErrorKind;

const INDENT: &str = "    ";

/// A source fragment on the expression stack.
#[derive(Clone, Debug)]
struct Expr {
    text: String,
    /// Evaluating the fragment has no effect, so it may be dropped.
    pure: bool,
}

impl Expr {
    fn pure(text: impl Into<String>) -> Self {
        Expr {
            text: text.into(),
            pure: true,
        }
    }

    fn effect(text: impl Into<String>) -> Self {
        Expr {
            text: text.into(),
            pure: false,
        }
    }

    /// The fragment without one redundant layer of outer parentheses.
    fn bare(&self) -> &str {
        strip_parens(&self.text)
    }
}

fn strip_parens(text: &str) -> &str {
    let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) else {
        return text;
    };
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return text;
                }
            }
            _ => {}
        }
    }
    if depth == 0 {
        inner
    } else {
        text
    }
}

struct TextClass {
    /// Index into the finished list, so classes print in the order they
    /// were begun.
    slot: usize,
    name: String,
    superclass: TypeRef,
    fields: Vec<String>,
    methods: Vec<String>,
}

struct TextMethod {
    name: String,
    class: String,
    return_type: TypeRef,
    is_static: bool,
    params: Vec<(String, TypeRef)>,
    known: FxHashSet<String>,
    declarations: Vec<String>,
    body: Vec<String>,
    stack: Vec<Expr>,
    indent: usize,
    next_label: u32,
    reachable: bool,
    /// Open `if` blocks: whether the then-branch falls through, and where
    /// the else-branch starts.
    branches: Vec<(bool, usize)>,
}

impl TextMethod {
    fn render(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|(name, ty)| format!("{} {}", ty, name))
            .collect();
        let modifier = if self.is_static { "static " } else { "" };
        let mut out = format!(
            "{}{} {}({}) {{\n",
            modifier,
            self.return_type,
            self.name,
            params.join(", ")
        );
        for line in self.declarations.iter().chain(&self.body) {
            out.push_str(line);
            out.push('\n');
        }
        out.push('}');
        out
    }
}

/// The C-like text [`Backend`].
#[derive(Default)]
pub struct TextBackend {
    classes: Vec<TextClass>,
    methods: Vec<TextMethod>,
    finished: Vec<Option<String>>,
}

impl TextBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn method(&mut self) -> Option<&mut TextMethod> {
        self.methods.last_mut()
    }

    fn push(&mut self, expr: Expr) {
        if let Some(method) = self.method() {
            method.stack.push(expr);
        }
    }

    fn pop(&mut self) -> Expr {
        self.method()
            .and_then(|m| m.stack.pop())
            .unwrap_or_else(|| Expr::pure("0"))
    }

    fn pop_n(&mut self, n: usize) -> Vec<Expr> {
        let mut out: Vec<Expr> = (0..n).map(|_| self.pop()).collect();
        out.reverse();
        out
    }

    /// A statement, dropped when unreachable.
    fn line(&mut self, text: impl AsRef<str>) {
        if let Some(method) = self.method() {
            if method.reachable {
                let indent = INDENT.repeat(method.indent);
                method.body.push(format!("{}{}", indent, text.as_ref()));
            }
        }
    }

    /// A block boundary or label, always written.
    fn structural(&mut self, text: impl AsRef<str>) {
        if let Some(method) = self.method() {
            let indent = INDENT.repeat(method.indent);
            method.body.push(format!("{}{}", indent, text.as_ref()));
        }
    }

    fn set_reachable(&mut self, reachable: bool) {
        if let Some(method) = self.method() {
            method.reachable = reachable;
        }
    }

    fn reachable(&self) -> bool {
        self.methods.last().is_some_and(|m| m.reachable)
    }

    fn indent(&mut self, delta: isize) {
        if let Some(method) = self.method() {
            method.indent = method.indent.saturating_add_signed(delta);
        }
    }

    fn body_len(&self) -> usize {
        self.methods.last().map_or(0, |m| m.body.len())
    }

    fn check_local(&self, name: &str) -> EmitResult {
        match self.methods.last() {
            Some(method) if method.known.contains(name) => Ok(()),
            _ => Err(CompileErrorKind::UnknownLocal(name.to_string())),
        }
    }

    /// Pop a discarded value, writing it out if it has effects.
    fn discard(&mut self) {
        let expr = self.pop();
        if !expr.pure {
            self.line(format!("{};", expr.bare()));
        }
    }

    /// Pop the branch value of an `if` into its temporary.
    fn assign_temp(&mut self, frame: &IfFrame) {
        if frame.result_type.is_void() {
            return;
        }
        let value = self.pop();
        if !self.reachable() {
            return;
        }
        let temp = temp_name(frame);
        let declaration = format!("{}{} {};", INDENT, frame.result_type, temp);
        if let Some(method) = self.method() {
            if !method.declarations.contains(&declaration) {
                method.declarations.push(declaration);
            }
        }
        self.line(format!("{} = {};", temp, value.bare()));
    }

    fn render_condition(&mut self, condition: Condition) -> String {
        match condition {
            Condition::Compare {
                op,
                category,
                negated,
            } => {
                let rhs = self.pop();
                let lhs = self.pop();
                let floating = matches!(category, RuntimeCategory::Float32 | RuntimeCategory::Float64);
                match (negated, floating) {
                    (false, _) => format!("{} {} {}", lhs.bare(), op.symbol(), rhs.bare()),
                    (true, false) => format!("{} {} {}", lhs.bare(), op.negate().symbol(), rhs.bare()),
                    // Flipping the operator is wrong for NaN.
                    (true, true) => format!("!({} {} {})", lhs.bare(), op.symbol(), rhs.bare()),
                }
            }
            Condition::IsTrue => self.pop().bare().to_string(),
            Condition::IsFalse => format!("!{}", self.pop().text),
        }
    }

    fn owner_prefix(&self, owner: &TypeRef) -> String {
        let current = self.methods.last().map(|m| m.class.as_str());
        if current == Some(owner.name()) && !owner.is_array() {
            String::new()
        } else {
            format!("{}.", owner)
        }
    }
}

fn temp_name(frame: &IfFrame) -> String {
    format!("t{}", frame.done.0)
}

fn literal_text(value: &Literal, ty: &TypeRef) -> String {
    match (value, ty.category()) {
        (Literal::Integer(v), RuntimeCategory::WideInt) => format!("{}L", v),
        (Literal::Integer(v), _) => v.to_string(),
        (Literal::Float(v), RuntimeCategory::Float64) => format!("{:?}", v),
        (Literal::Float(v), _) => format!("{:?}f", *v as f32),
        (Literal::String(s), _) => format!("{:?}", s),
        (Literal::Boolean(b), _) => b.to_string(),
    }
}

fn default_text(ty: &TypeRef) -> Option<&'static str> {
    match ty.category() {
        RuntimeCategory::Void => None,
        RuntimeCategory::Boolean => Some("false"),
        RuntimeCategory::WideInt => Some("0L"),
        RuntimeCategory::Float32 => Some("0.0f"),
        RuntimeCategory::Float64 => Some("0.0"),
        RuntimeCategory::Reference => Some("null"),
        _ => Some("0"),
    }
}

fn supports_operator(op: &str, category: RuntimeCategory) -> bool {
    let numeric = category.is_int_like()
        || matches!(
            category,
            RuntimeCategory::WideInt | RuntimeCategory::Float32 | RuntimeCategory::Float64
        );
    let integral = category.is_int_like() || category == RuntimeCategory::WideInt;
    match op {
        "+" | "-" | "*" | "/" | "%" => numeric,
        "&" | "|" | "^" | "<<" | ">>" => integral,
        _ => false,
    }
}

impl Backend for TextBackend {
    type Output = String;

    fn begin_class(&mut self, name: &str, superclass: &TypeRef) {
        self.classes.push(TextClass {
            slot: self.finished.len(),
            name: name.to_string(),
            superclass: superclass.clone(),
            fields: Vec::new(),
            methods: Vec::new(),
        });
        self.finished.push(None);
    }

    fn declare_field(&mut self, name: &str, ty: &TypeRef, is_static: bool) {
        if let Some(class) = self.classes.last_mut() {
            let modifier = if is_static { "static " } else { "" };
            class.fields.push(format!("{}{} {};", modifier, ty, name));
        }
    }

    fn end_class(&mut self) {
        let Some(class) = self.classes.pop() else {
            return;
        };
        let mut out = if class.superclass == TypeRef::object() {
            format!("class {} {{\n", class.name)
        } else {
            format!("class {} extends {} {{\n", class.name, class.superclass)
        };
        for field in &class.fields {
            out.push_str(INDENT);
            out.push_str(field);
            out.push('\n');
        }
        for (i, method) in class.methods.iter().enumerate() {
            if i > 0 || !class.fields.is_empty() {
                out.push('\n');
            }
            for line in method.lines() {
                if !line.is_empty() {
                    out.push_str(INDENT);
                }
                out.push_str(line);
                out.push('\n');
            }
        }
        out.push('}');
        self.finished[class.slot] = Some(out);
    }

    fn begin_method(&mut self, name: &str, return_type: &TypeRef, _arg_types: &[TypeRef], is_static: bool) {
        let class = self
            .classes
            .last()
            .map(|c| c.name.clone())
            .unwrap_or_default();
        self.methods.push(TextMethod {
            name: name.to_string(),
            class,
            return_type: return_type.clone(),
            is_static,
            params: Vec::new(),
            known: FxHashSet::default(),
            declarations: Vec::new(),
            body: Vec::new(),
            stack: Vec::new(),
            indent: 1,
            next_label: 0,
            reachable: true,
            branches: Vec::new(),
        });
    }

    fn declare_argument(&mut self, name: &str, ty: &TypeRef) {
        if let Some(method) = self.method() {
            method.params.push((name.to_string(), ty.clone()));
            method.known.insert(name.to_string());
        }
    }

    fn declare_local(&mut self, name: &str, ty: &TypeRef) {
        if let Some(method) = self.method() {
            if method.known.insert(name.to_string()) {
                method.declarations.push(format!("{}{} {};", INDENT, ty, name));
            }
        }
    }

    fn end_method(&mut self) -> EmitResult {
        let Some(method) = self.methods.pop() else {
            return Ok(());
        };
        let rendered = method.render();
        if let Some(class) = self.classes.last_mut() {
            class.methods.push(rendered);
        }
        Ok(())
    }

    fn emit_literal(&mut self, value: &Literal, ty: &TypeRef) {
        self.push(Expr::pure(literal_text(value, ty)));
    }

    fn emit_default(&mut self, ty: &TypeRef) {
        if let Some(text) = default_text(ty) {
            self.push(Expr::pure(text));
        }
    }

    fn emit_pop(&mut self, ty: &TypeRef) {
        if !ty.is_void() {
            self.discard();
        }
    }

    fn emit_convert(&mut self, from: &TypeRef, to: &TypeRef) {
        let widens = from.category() != to.category()
            && matches!(
                to.category(),
                RuntimeCategory::WideInt | RuntimeCategory::Float32 | RuntimeCategory::Float64
            );
        if widens {
            let value = self.pop();
            self.push(Expr {
                text: format!("({}) {}", to, value.text),
                pure: value.pure,
            });
        }
    }

    fn emit_self_load(&mut self, _ty: &TypeRef) {
        self.push(Expr::pure("this"));
    }

    fn emit_local_load(&mut self, name: &str, _ty: &TypeRef) -> EmitResult {
        self.check_local(name)?;
        self.push(Expr::pure(name));
        Ok(())
    }

    fn emit_local_store(&mut self, name: &str, _ty: &TypeRef) -> EmitResult {
        self.check_local(name)?;
        let value = self.pop();
        self.line(format!("{} = {};", name, value.bare()));
        Ok(())
    }

    fn emit_field_load(&mut self, owner: &TypeRef, name: &str, _ty: &TypeRef, is_static: bool) {
        let target = if is_static {
            owner.to_string()
        } else {
            self.pop().text
        };
        self.push(Expr::pure(format!("{}.{}", target, name)));
    }

    fn emit_field_store(&mut self, owner: &TypeRef, name: &str, _ty: &TypeRef, is_static: bool) {
        let value = self.pop();
        let target = if is_static {
            owner.to_string()
        } else {
            self.pop().text
        };
        self.line(format!("{}.{} = {};", target, name, value.bare()));
    }

    fn emit_binary_primitive(&mut self, op: &str, operand_type: &TypeRef) -> EmitResult {
        let category = operand_type.category();
        if !supports_operator(op, category) {
            return Err(CompileErrorKind::UnsupportedPrimitiveOp {
                op: op.to_string(),
                category,
            });
        }
        let rhs = self.pop();
        let lhs = self.pop();
        self.push(Expr {
            text: format!("({} {} {})", lhs.text, op, rhs.text),
            pure: lhs.pure && rhs.pure,
        });
        Ok(())
    }

    fn emit_unary_primitive(&mut self, op: &str, operand_type: &TypeRef) -> EmitResult {
        let category = operand_type.category();
        match op {
            "+@" if category.is_primitive() => Ok(()),
            "-@" if supports_operator("-", category) => {
                let value = self.pop();
                self.push(Expr {
                    text: format!("(-{})", value.text),
                    pure: value.pure,
                });
                Ok(())
            }
            _ => Err(CompileErrorKind::UnsupportedPrimitiveOp {
                op: op.to_string(),
                category,
            }),
        }
    }

    fn emit_array_op(&mut self, op: ArrayOp, _component: &TypeRef) {
        match op {
            ArrayOp::Length => {
                let array = self.pop();
                self.push(Expr {
                    text: format!("{}.length", array.text),
                    pure: array.pure,
                });
            }
            ArrayOp::Load => {
                let index = self.pop();
                let array = self.pop();
                self.push(Expr {
                    text: format!("{}[{}]", array.text, index.bare()),
                    pure: array.pure && index.pure,
                });
            }
            ArrayOp::Store => {
                let value = self.pop();
                let index = self.pop();
                let array = self.pop();
                self.push(Expr::effect(format!(
                    "({}[{}] = {})",
                    array.text,
                    index.bare(),
                    value.bare()
                )));
            }
        }
    }

    fn emit_comparison(&mut self, op: CompareOp, _category: RuntimeCategory) -> EmitResult {
        let rhs = self.pop();
        let lhs = self.pop();
        self.push(Expr {
            text: format!("({} {} {})", lhs.text, op.symbol(), rhs.text),
            pure: lhs.pure && rhs.pure,
        });
        Ok(())
    }

    fn emit_not(&mut self) -> EmitResult {
        let value = self.pop();
        self.push(Expr {
            text: format!("!{}", value.text),
            pure: value.pure,
        });
        Ok(())
    }

    fn begin_new(&mut self, _ty: &TypeRef) {}

    fn emit_call(
        &mut self,
        owner: &TypeRef,
        name: &str,
        params: &[TypeRef],
        return_type: &TypeRef,
        dispatch: DispatchKind,
    ) {
        let args: Vec<String> = self
            .pop_n(params.len())
            .iter()
            .map(|a| a.bare().to_string())
            .collect();
        let args = args.join(", ");
        let call = match dispatch {
            DispatchKind::Constructor => format!("new {}({})", owner, args),
            DispatchKind::Static => format!("{}{}({})", self.owner_prefix(owner), name, args),
            DispatchKind::Virtual | DispatchKind::Interface => {
                let receiver = self.pop();
                format!("{}.{}({})", receiver.text, name, args)
            }
        };
        if return_type.is_void() && dispatch != DispatchKind::Constructor {
            self.line(format!("{};", call));
        } else {
            self.push(Expr::effect(call));
        }
    }

    fn begin_print(&mut self) {}

    fn emit_print(&mut self, ty: &TypeRef, newline: bool) {
        let function = if newline { "puts" } else { "print" };
        let arg = if ty.is_void() {
            String::new()
        } else {
            self.pop().bare().to_string()
        };
        self.line(format!("{}({});", function, arg));
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
        if ty.is_void() {
            self.line("return;");
        } else {
            let value = self.pop();
            self.line(format!("return {};", value.bare()));
        }
        self.set_reachable(false);
        Ok(())
    }

    fn new_label(&mut self) -> Label {
        match self.method() {
            Some(method) => {
                let label = Label(method.next_label);
                method.next_label += 1;
                label
            }
            None => Label(0),
        }
    }

    fn set_label(&mut self, label: Label) {
        self.structural(format!("{}: ;", label));
        self.set_reachable(true);
    }

    fn emit_jump(&mut self, label: Label) {
        self.line(format!("goto {};", label));
        self.set_reachable(false);
    }

    fn emit_branch_if_false(&mut self, condition: Condition, label: Label) -> EmitResult {
        let test = self.render_condition(condition.negate());
        self.line(format!("if ({}) goto {};", test, label));
        Ok(())
    }

    // ── Structured control flow ────────────────────────────────────────

    fn begin_if(&mut self, condition: Condition, result_type: &TypeRef) -> Result<IfFrame, CompileErrorKind> {
        let frame = IfFrame {
            else_label: self.new_label(),
            done: self.new_label(),
            result_type: result_type.clone(),
        };
        let test = self.render_condition(condition);
        self.structural(format!("if ({}) {{", test));
        self.indent(1);
        Ok(frame)
    }

    fn begin_else(&mut self, frame: &IfFrame) {
        self.assign_temp(frame);
        let then_falls_through = self.reachable();
        self.indent(-1);
        self.structural("} else {");
        let else_start = self.body_len();
        if let Some(method) = self.method() {
            method.branches.push((then_falls_through, else_start));
        }
        self.indent(1);
        self.set_reachable(true);
    }

    fn end_if(&mut self, frame: IfFrame) {
        self.assign_temp(&frame);
        let else_falls_through = self.reachable();
        self.indent(-1);
        let (then_falls_through, else_start) = self
            .method()
            .and_then(|m| m.branches.pop())
            .unwrap_or((true, 0));

        let empty_else = self.body_len() == else_start;
        if let Some(method) = self.method() {
            if empty_else {
                // Collapse `} else {` into the closing brace.
                method.body.pop();
            }
        }
        self.structural("}");
        self.set_reachable(then_falls_through || else_falls_through);
        if !frame.result_type.is_void() {
            self.push(Expr::pure(temp_name(&frame)));
        }
    }

    fn begin_loop(&mut self, check_first: bool, body_type: &TypeRef) -> LoopFrame {
        let frame = LoopFrame {
            body: self.new_label(),
            condition: self.new_label(),
            check_first,
            body_type: body_type.clone(),
        };
        if check_first {
            self.line(format!("goto {};", frame.condition));
        }
        self.structural("do {");
        self.indent(1);
        self.set_reachable(true);
        frame
    }

    fn begin_loop_condition(&mut self, frame: &LoopFrame) {
        if !frame.body_type.is_void() {
            self.discard();
        }
        if frame.check_first {
            self.structural(format!("{}: ;", frame.condition));
        }
        self.set_reachable(true);
    }

    fn end_loop(&mut self, _frame: LoopFrame, condition: Condition) -> EmitResult {
        let test = self.render_condition(condition);
        self.indent(-1);
        self.structural(format!("}} while ({});", test));
        self.set_reachable(true);
        Ok(())
    }

    fn finish(self) -> String {
        self.finished
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
