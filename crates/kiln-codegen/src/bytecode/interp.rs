//! A reference interpreter for assembled classes.
//!
//! Runs the instructions the bytecode backend emits so that tests and the
//! `kilnc run` command can check what compiled code does. Host classes
//! are modelled by a handful of intrinsics covering the standard host
//! table (`Math`, strings, `StringBuilder`, `ArrayList`, the console).
//! Console output is captured rather than written to stdout.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::trace;

use kiln_common::{DispatchKind, RuntimeCategory, TypeRef};

use super::assembler::{ClassFile, MethodCode};
use super::insn::{FieldRef, Instruction, MethodRef, Opcode};
use crate::backend::{CompareOp, Label};

const DEFAULT_STEP_LIMIT: u64 = 10_000_000;

/// A runtime value. Wide values occupy one entry on the operand stack.
#[derive(Clone, Debug)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
    Str(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<Object>>),
    /// The console stream.
    Console,
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Null, Value::Null) | (Value::Console, Value::Console) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Value {
    pub fn string(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }

    pub fn array(elements: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(elements)))
    }

    /// The zero value of `ty`.
    pub fn default_for(ty: &TypeRef) -> Value {
        match ty.category() {
            RuntimeCategory::WideInt => Value::Long(0),
            RuntimeCategory::Float32 => Value::Float(0.0),
            RuntimeCategory::Float64 => Value::Double(0.0),
            RuntimeCategory::Reference | RuntimeCategory::Void => Value::Null,
            _ => Value::Int(0),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Null => "null",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Console => "console",
        }
    }

    /// Render as the console would print a value of static type `ty`.
    pub fn render(&self, ty: &TypeRef) -> String {
        match (self, ty.category()) {
            (Value::Int(v), RuntimeCategory::Boolean) => (*v != 0).to_string(),
            (Value::Int(v), RuntimeCategory::Char) => char::from_u32(*v as u32)
                .map(String::from)
                .unwrap_or_default(),
            (Value::Int(v), _) => v.to_string(),
            (Value::Long(v), _) => v.to_string(),
            (Value::Float(v), _) => format!("{:?}", v),
            (Value::Double(v), _) => format!("{:?}", v),
            (Value::Null, _) => "null".to_string(),
            (Value::Str(s), _) => s.to_string(),
            (Value::Array(items), _) => {
                let component = ty.component().unwrap_or_else(TypeRef::object);
                let items: Vec<String> = items.borrow().iter().map(|v| v.render(&component)).collect();
                format!("[{}]", items.join(", "))
            }
            (Value::Object(obj), _) => obj.borrow().render(),
            (Value::Console, _) => "console".to_string(),
        }
    }
}

/// Host state carried by instances of host classes.
#[derive(Clone, Debug, PartialEq)]
pub enum HostState {
    None,
    Builder(String),
    List(Vec<Value>),
}

#[derive(Clone, Debug)]
pub struct Object {
    pub class: String,
    pub fields: FxHashMap<String, Value>,
    pub host: HostState,
}

impl Object {
    fn render(&self) -> String {
        match &self.host {
            HostState::Builder(text) => text.clone(),
            HostState::List(items) => {
                let items: Vec<String> = items.iter().map(|v| v.render(&TypeRef::object())).collect();
                format!("[{}]", items.join(", "))
            }
            HostState::None => self.class.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    NoSuchClass(String),
    NoSuchMethod(String),
    StackUnderflow(String),
    TypeMismatch { expected: &'static str, found: &'static str },
    DivisionByZero,
    IndexOutOfBounds { index: i32, len: usize },
    NullReference(String),
    UnknownLabel(Label),
    UnsupportedHostCall(String),
    HostError(String),
    StepLimitExceeded(u64),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::NoSuchClass(name) => write!(f, "no class `{}`", name),
            RuntimeError::NoSuchMethod(method) => write!(f, "no method {}", method),
            RuntimeError::StackUnderflow(method) => write!(f, "operand stack underflow in {}", method),
            RuntimeError::TypeMismatch { expected, found } => {
                write!(f, "expected {} on the stack, found {}", expected, found)
            }
            RuntimeError::DivisionByZero => write!(f, "division by zero"),
            RuntimeError::IndexOutOfBounds { index, len } => {
                write!(f, "index {} out of bounds for length {}", index, len)
            }
            RuntimeError::NullReference(what) => write!(f, "null reference in {}", what),
            RuntimeError::UnknownLabel(label) => write!(f, "jump to undefined label {}", label),
            RuntimeError::UnsupportedHostCall(method) => {
                write!(f, "host method {} is not available in the interpreter", method)
            }
            RuntimeError::HostError(msg) => write!(f, "{}", msg),
            RuntimeError::StepLimitExceeded(limit) => {
                write!(f, "step limit of {} instructions exceeded", limit)
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

type RunResult<T> = Result<T, RuntimeError>;

/// Executes methods of a set of assembled classes.
pub struct Interpreter<'c> {
    classes: FxHashMap<&'c str, &'c ClassFile>,
    statics: FxHashMap<(String, String), Value>,
    output: String,
    steps: u64,
    step_limit: u64,
}

impl<'c> Interpreter<'c> {
    pub fn new(classes: &'c [ClassFile]) -> Self {
        Interpreter {
            classes: classes.iter().map(|c| (c.name.as_str(), c)).collect(),
            statics: FxHashMap::default(),
            output: String::new(),
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    /// Everything printed so far.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Call the static method `class.method` with `args`. Returns `None`
    /// for `void` methods.
    pub fn invoke_static(&mut self, class: &str, method: &str, args: Vec<Value>) -> RunResult<Option<Value>> {
        let code = self.find_method(class, method, args.len())?;
        self.execute(code, None, args)
    }

    /// Call instance method `method` on `receiver`.
    pub fn invoke_virtual(&mut self, receiver: Value, method: &str, args: Vec<Value>) -> RunResult<Option<Value>> {
        let Value::Object(obj) = &receiver else {
            return Err(RuntimeError::NullReference(method.to_string()));
        };
        let class = obj.borrow().class.clone();
        let code = self.find_method(&class, method, args.len())?;
        self.execute(code, Some(receiver), args)
    }

    /// A fresh instance of a compiled class.
    pub fn instantiate(&self, class: &str) -> RunResult<Value> {
        if !self.classes.contains_key(class) {
            return Err(RuntimeError::NoSuchClass(class.to_string()));
        }
        Ok(new_object(class, HostState::None))
    }

    /// Find `name/arity` on `class` or its compiled superclasses.
    fn find_method(&self, class: &str, name: &str, arity: usize) -> RunResult<&'c MethodCode> {
        let mut current = Some(class.to_string());
        while let Some(class_name) = current {
            let Some(&class) = self.classes.get(class_name.as_str()) else {
                break;
            };
            if let Some(method) = class
                .methods
                .iter()
                .find(|m| m.name == name && m.params.len() == arity)
            {
                return Ok(method);
            }
            current = Some(class.superclass.to_string());
        }
        if self.classes.contains_key(class) {
            Err(RuntimeError::NoSuchMethod(format!("{}.{}/{}", class, name, arity)))
        } else {
            Err(RuntimeError::NoSuchClass(class.to_string()))
        }
    }

    fn execute(&mut self, method: &'c MethodCode, this: Option<Value>, args: Vec<Value>) -> RunResult<Option<Value>> {
        trace!(method = %method.name, "execute");
        let mut labels = FxHashMap::default();
        for (pc, insn) in method.code.iter().enumerate() {
            if let Instruction::Label(label) = insn {
                labels.insert(*label, pc);
            }
        }

        let mut locals = vec![Value::Null; usize::from(method.max_locals).max(1)];
        let mut slot = 0usize;
        if let Some(this) = this {
            locals[0] = this;
            slot = 1;
        }
        for (arg, param) in args.into_iter().zip(&method.params) {
            if slot < locals.len() {
                locals[slot] = arg;
            }
            slot += usize::from(param.category().slot_width().max(1));
        }

        let mut frame = Frame {
            method: &method.name,
            stack: Vec::new(),
        };
        let mut pc = 0;
        while pc < method.code.len() {
            self.steps += 1;
            if self.steps > self.step_limit {
                return Err(RuntimeError::StepLimitExceeded(self.step_limit));
            }
            let insn = &method.code[pc];
            pc += 1;
            let jump = |label: &Label| labels.get(label).copied().ok_or(RuntimeError::UnknownLabel(*label));

            match insn {
                Instruction::Label(_) | Instruction::Line(_) => {}
                Instruction::IConst(v) => frame.push(Value::Int(*v)),
                Instruction::LConst(v) => frame.push(Value::Long(*v)),
                Instruction::FConst(v) => frame.push(Value::Float(*v)),
                Instruction::DConst(v) => frame.push(Value::Double(*v)),
                Instruction::SConst(s) => frame.push(Value::string(s)),
                Instruction::Load { slot, .. } => {
                    let value = locals.get(usize::from(*slot)).cloned().unwrap_or(Value::Null);
                    frame.push(value);
                }
                Instruction::Store { slot, .. } => {
                    let value = frame.pop()?;
                    let slot = usize::from(*slot);
                    if slot >= locals.len() {
                        locals.resize(slot + 1, Value::Null);
                    }
                    locals[slot] = value;
                }
                Instruction::Op(op) => {
                    if let Some(result) = self.exec_op(&mut frame, *op)? {
                        return Ok(result);
                    }
                }
                Instruction::IfICmp { cond, label } => {
                    let b = frame.pop_int()?;
                    let a = frame.pop_int()?;
                    if holds(*cond, a.cmp(&b)) {
                        pc = jump(label)?;
                    }
                }
                Instruction::IfACmp { cond, label } => {
                    let b = frame.pop()?;
                    let a = frame.pop()?;
                    let equal = a == b;
                    if (*cond == CompareOp::Eq) == equal {
                        pc = jump(label)?;
                    }
                }
                Instruction::If { cond, label } => {
                    let v = frame.pop_int()?;
                    if holds(*cond, v.cmp(&0)) {
                        pc = jump(label)?;
                    }
                }
                Instruction::Goto(label) => pc = jump(label)?,
                Instruction::Invoke { dispatch, method } => {
                    let mut args = Vec::with_capacity(method.params.len());
                    for _ in &method.params {
                        args.push(frame.pop()?);
                    }
                    args.reverse();
                    let receiver = match dispatch {
                        DispatchKind::Static => None,
                        _ => Some(frame.pop()?),
                    };
                    if let Some(result) = self.invoke(*dispatch, method, receiver, args)? {
                        frame.push(result);
                    }
                }
                Instruction::New(class) => {
                    let host = match class.as_str() {
                        "java.lang.StringBuilder" => HostState::Builder(String::new()),
                        "java.util.ArrayList" => HostState::List(Vec::new()),
                        _ => HostState::None,
                    };
                    frame.push(new_object(class, host));
                }
                Instruction::GetStatic(field) => {
                    let value = self.get_static(field);
                    frame.push(value);
                }
                Instruction::PutStatic(field) => {
                    let value = frame.pop()?;
                    self.statics
                        .insert((field.owner.clone(), field.name.clone()), value);
                }
                Instruction::GetField(field) => {
                    let obj = frame.pop_object(&field.name)?;
                    let value = obj
                        .borrow()
                        .fields
                        .get(&field.name)
                        .cloned()
                        .unwrap_or_else(|| Value::default_for(&field.ty));
                    frame.push(value);
                }
                Instruction::PutField(field) => {
                    let value = frame.pop()?;
                    let obj = frame.pop_object(&field.name)?;
                    obj.borrow_mut().fields.insert(field.name.clone(), value);
                }
            }
        }
        Ok(None)
    }

    fn get_static(&self, field: &FieldRef) -> Value {
        if field.owner == "java.lang.System" && field.name == "out" {
            return Value::Console;
        }
        self.statics
            .get(&(field.owner.clone(), field.name.clone()))
            .cloned()
            .unwrap_or_else(|| Value::default_for(&field.ty))
    }

    /// Execute an operand-free instruction. Returns `Some` when the method
    /// returns.
    fn exec_op(&mut self, frame: &mut Frame<'_>, op: Opcode) -> RunResult<Option<Option<Value>>> {
        use Opcode::*;
        match op {
            IAdd | ISub | IMul | IDiv | IRem | IAnd | IOr | IXor | IShl | IShr => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                frame.push(Value::Int(int_op(op, a, b)?));
            }
            LAdd | LSub | LMul | LDiv | LRem | LAnd | LOr | LXor => {
                let b = frame.pop_long()?;
                let a = frame.pop_long()?;
                frame.push(Value::Long(long_op(op, a, b)?));
            }
            LShl | LShr => {
                let b = frame.pop_int()?;
                let a = frame.pop_long()?;
                frame.push(Value::Long(long_op(op, a, i64::from(b))?));
            }
            FAdd | FSub | FMul | FDiv | FRem => {
                let b = frame.pop_float()?;
                let a = frame.pop_float()?;
                frame.push(Value::Float(float_op(op, a as f64, b as f64) as f32));
            }
            DAdd | DSub | DMul | DDiv | DRem => {
                let b = frame.pop_double()?;
                let a = frame.pop_double()?;
                frame.push(Value::Double(float_op(op, a, b)));
            }
            INeg => {
                let v = frame.pop_int()?;
                frame.push(Value::Int(v.wrapping_neg()));
            }
            LNeg => {
                let v = frame.pop_long()?;
                frame.push(Value::Long(v.wrapping_neg()));
            }
            FNeg => {
                let v = frame.pop_float()?;
                frame.push(Value::Float(-v));
            }
            DNeg => {
                let v = frame.pop_double()?;
                frame.push(Value::Double(-v));
            }
            I2L => {
                let v = frame.pop_int()?;
                frame.push(Value::Long(i64::from(v)));
            }
            I2F => {
                let v = frame.pop_int()?;
                frame.push(Value::Float(v as f32));
            }
            I2D => {
                let v = frame.pop_int()?;
                frame.push(Value::Double(f64::from(v)));
            }
            L2F => {
                let v = frame.pop_long()?;
                frame.push(Value::Float(v as f32));
            }
            L2D => {
                let v = frame.pop_long()?;
                frame.push(Value::Double(v as f64));
            }
            F2D => {
                let v = frame.pop_float()?;
                frame.push(Value::Double(f64::from(v)));
            }
            LCmp => {
                let b = frame.pop_long()?;
                let a = frame.pop_long()?;
                frame.push(Value::Int(a.cmp(&b) as i32));
            }
            FCmpL | FCmpG => {
                let b = frame.pop_float()?;
                let a = frame.pop_float()?;
                frame.push(Value::Int(float_cmp(a as f64, b as f64, op == FCmpG)));
            }
            DCmpL | DCmpG => {
                let b = frame.pop_double()?;
                let a = frame.pop_double()?;
                frame.push(Value::Int(float_cmp(a, b, op == DCmpG)));
            }
            IALoad | LALoad | FALoad | DALoad | AALoad | BALoad | CALoad | SALoad => {
                let index = frame.pop_int()?;
                let array = frame.pop_array()?;
                let items = array.borrow();
                let value = usize::try_from(index)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .ok_or(RuntimeError::IndexOutOfBounds {
                        index,
                        len: items.len(),
                    })?;
                frame.push(value);
            }
            IAStore | LAStore | FAStore | DAStore | AAStore | BAStore | CAStore | SAStore => {
                let value = frame.pop()?;
                let index = frame.pop_int()?;
                let array = frame.pop_array()?;
                let mut items = array.borrow_mut();
                let len = items.len();
                let slot = usize::try_from(index)
                    .ok()
                    .and_then(|i| items.get_mut(i))
                    .ok_or(RuntimeError::IndexOutOfBounds { index, len })?;
                *slot = value;
            }
            ArrayLength => {
                let array = frame.pop_array()?;
                let len = array.borrow().len();
                frame.push(Value::Int(len as i32));
            }
            AConstNull => frame.push(Value::Null),
            Pop | Pop2 => {
                frame.pop()?;
            }
            Dup => {
                let top = frame.peek()?;
                frame.push(top);
            }
            DupX2 | Dup2X2 => {
                let top = frame.peek()?;
                let at = frame
                    .stack
                    .len()
                    .checked_sub(3)
                    .ok_or_else(|| RuntimeError::StackUnderflow(frame.method.to_string()))?;
                frame.stack.insert(at, top);
            }
            Return => return Ok(Some(None)),
            IReturn | LReturn | FReturn | DReturn | AReturn => return Ok(Some(Some(frame.pop()?))),
        }
        Ok(None)
    }

    fn invoke(
        &mut self,
        dispatch: DispatchKind,
        method: &MethodRef,
        receiver: Option<Value>,
        args: Vec<Value>,
    ) -> RunResult<Option<Value>> {
        match dispatch {
            DispatchKind::Static if self.classes.contains_key(method.owner.as_str()) => {
                let code = self.find_method(&method.owner, &method.name, args.len())?;
                self.execute(code, None, args)
            }
            DispatchKind::Static => host_static(method, &args).map(Some),
            DispatchKind::Constructor => {
                let receiver = receiver.unwrap_or(Value::Null);
                construct_host(&receiver, method, &args)?;
                Ok(None)
            }
            DispatchKind::Virtual | DispatchKind::Interface => {
                let receiver = receiver.unwrap_or(Value::Null);
                let compiled = match &receiver {
                    Value::Object(obj) => {
                        let class = obj.borrow().class.clone();
                        self.classes.contains_key(class.as_str()).then_some(class)
                    }
                    _ => None,
                };
                match compiled {
                    Some(class) => {
                        let code = self.find_method(&class, &method.name, args.len())?;
                        self.execute(code, Some(receiver), args)
                    }
                    None => self.host_virtual(&receiver, method, args),
                }
            }
        }
    }

    fn host_virtual(&mut self, receiver: &Value, method: &MethodRef, args: Vec<Value>) -> RunResult<Option<Value>> {
        let first_text = match (args.first(), method.params.first()) {
            (Some(value), Some(ty)) => value.render(ty),
            _ => String::new(),
        };
        let obj = match (receiver, method.name.as_str()) {
            (Value::Console, "println") => {
                self.output.push_str(&first_text);
                self.output.push('\n');
                return Ok(None);
            }
            (Value::Console, "print") => {
                self.output.push_str(&first_text);
                return Ok(None);
            }
            (Value::Str(s), name) => return string_method(s, name, &args).map(Some),
            (Value::Object(obj), "toString") => {
                return Ok(Some(Value::string(&obj.borrow().render())));
            }
            (Value::Object(_), "hashCode") => return Ok(Some(Value::Int(0))),
            (Value::Object(_), "equals") => {
                let other = args.first().cloned().unwrap_or(Value::Null);
                return Ok(Some(Value::Int(i32::from(*receiver == other))));
            }
            (Value::Object(obj), _) => obj,
            (Value::Null, _) => return Err(RuntimeError::NullReference(method.to_string())),
            _ => return Err(RuntimeError::UnsupportedHostCall(method.to_string())),
        };

        let mut obj = obj.borrow_mut();
        match (&mut obj.host, method.name.as_str()) {
            (HostState::Builder(text), "append") => {
                text.push_str(&first_text);
                Ok(Some(receiver.clone()))
            }
            (HostState::Builder(text), "length") => Ok(Some(Value::Int(text.chars().count() as i32))),
            (HostState::List(items), "add") => {
                items.push(args.into_iter().next().unwrap_or(Value::Null));
                Ok(Some(Value::Int(1)))
            }
            (HostState::List(items), "size") => Ok(Some(Value::Int(items.len() as i32))),
            (HostState::List(items), "isEmpty") => Ok(Some(Value::Int(i32::from(items.is_empty())))),
            (HostState::List(items), "get") => {
                let index = int_arg(&args, 0)?;
                let len = items.len();
                usize::try_from(index)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .map(Some)
                    .ok_or(RuntimeError::IndexOutOfBounds { index, len })
            }
            _ => Err(RuntimeError::UnsupportedHostCall(method.to_string())),
        }
    }
}

/// Operand stack of one activation.
struct Frame<'m> {
    method: &'m str,
    stack: Vec<Value>,
}

impl Frame<'_> {
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> RunResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::StackUnderflow(self.method.to_string()))
    }

    fn peek(&self) -> RunResult<Value> {
        self.stack
            .last()
            .cloned()
            .ok_or_else(|| RuntimeError::StackUnderflow(self.method.to_string()))
    }

    fn pop_int(&mut self) -> RunResult<i32> {
        match self.pop()? {
            Value::Int(v) => Ok(v),
            other => Err(mismatch("int", &other)),
        }
    }

    fn pop_long(&mut self) -> RunResult<i64> {
        match self.pop()? {
            Value::Long(v) => Ok(v),
            other => Err(mismatch("long", &other)),
        }
    }

    fn pop_float(&mut self) -> RunResult<f32> {
        match self.pop()? {
            Value::Float(v) => Ok(v),
            other => Err(mismatch("float", &other)),
        }
    }

    fn pop_double(&mut self) -> RunResult<f64> {
        match self.pop()? {
            Value::Double(v) => Ok(v),
            other => Err(mismatch("double", &other)),
        }
    }

    fn pop_array(&mut self) -> RunResult<Rc<RefCell<Vec<Value>>>> {
        match self.pop()? {
            Value::Array(items) => Ok(items),
            Value::Null => Err(RuntimeError::NullReference(self.method.to_string())),
            other => Err(mismatch("array", &other)),
        }
    }

    fn pop_object(&mut self, field: &str) -> RunResult<Rc<RefCell<Object>>> {
        match self.pop()? {
            Value::Object(obj) => Ok(obj),
            Value::Null => Err(RuntimeError::NullReference(format!("field `{}`", field))),
            other => Err(mismatch("object", &other)),
        }
    }
}

fn mismatch(expected: &'static str, found: &Value) -> RuntimeError {
    RuntimeError::TypeMismatch {
        expected,
        found: found.kind(),
    }
}

fn new_object(class: &str, host: HostState) -> Value {
    Value::Object(Rc::new(RefCell::new(Object {
        class: class.to_string(),
        fields: FxHashMap::default(),
        host,
    })))
}

fn holds(cond: CompareOp, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match cond {
        CompareOp::Eq => ordering == Equal,
        CompareOp::Ne => ordering != Equal,
        CompareOp::Lt => ordering == Less,
        CompareOp::Le => ordering != Greater,
        CompareOp::Gt => ordering == Greater,
        CompareOp::Ge => ordering != Less,
    }
}

fn float_cmp(a: f64, b: f64, greater_on_nan: bool) -> i32 {
    match a.partial_cmp(&b) {
        Some(ordering) => ordering as i32,
        None if greater_on_nan => 1,
        None => -1,
    }
}

fn int_op(op: Opcode, a: i32, b: i32) -> RunResult<i32> {
    use Opcode::*;
    Ok(match op {
        IAdd => a.wrapping_add(b),
        ISub => a.wrapping_sub(b),
        IMul => a.wrapping_mul(b),
        IDiv | IRem if b == 0 => return Err(RuntimeError::DivisionByZero),
        IDiv => a.wrapping_div(b),
        IRem => a.wrapping_rem(b),
        IAnd => a & b,
        IOr => a | b,
        IXor => a ^ b,
        IShl => a.wrapping_shl(b as u32 & 31),
        IShr => a.wrapping_shr(b as u32 & 31),
        _ => return Err(RuntimeError::HostError(format!("{} is not an int operator", op.mnemonic()))),
    })
}

fn long_op(op: Opcode, a: i64, b: i64) -> RunResult<i64> {
    use Opcode::*;
    Ok(match op {
        LAdd => a.wrapping_add(b),
        LSub => a.wrapping_sub(b),
        LMul => a.wrapping_mul(b),
        LDiv | LRem if b == 0 => return Err(RuntimeError::DivisionByZero),
        LDiv => a.wrapping_div(b),
        LRem => a.wrapping_rem(b),
        LAnd => a & b,
        LOr => a | b,
        LXor => a ^ b,
        LShl => a.wrapping_shl(b as u32 & 63),
        LShr => a.wrapping_shr(b as u32 & 63),
        _ => return Err(RuntimeError::HostError(format!("{} is not a long operator", op.mnemonic()))),
    })
}

fn float_op(op: Opcode, a: f64, b: f64) -> f64 {
    use Opcode::*;
    match op {
        FAdd | DAdd => a + b,
        FSub | DSub => a - b,
        FMul | DMul => a * b,
        FDiv | DDiv => a / b,
        _ => a % b,
    }
}

fn int_arg(args: &[Value], i: usize) -> RunResult<i32> {
    match args.get(i) {
        Some(Value::Int(v)) => Ok(*v),
        Some(other) => Err(mismatch("int", other)),
        None => Err(RuntimeError::HostError(format!("missing argument {}", i))),
    }
}

fn str_arg(args: &[Value], i: usize) -> RunResult<Rc<str>> {
    match args.get(i) {
        Some(Value::Str(s)) => Ok(s.clone()),
        Some(Value::Null) => Err(RuntimeError::NullReference("string argument".to_string())),
        Some(other) => Err(mismatch("string", other)),
        None => Err(RuntimeError::HostError(format!("missing argument {}", i))),
    }
}

fn construct_host(receiver: &Value, method: &MethodRef, args: &[Value]) -> RunResult<()> {
    let Value::Object(obj) = receiver else {
        return Err(RuntimeError::NullReference(method.to_string()));
    };
    let mut obj = obj.borrow_mut();
    if let (HostState::Builder(text), Some(Value::Str(initial))) = (&mut obj.host, args.first()) {
        text.push_str(initial);
    }
    Ok(())
}

fn substring(s: &str, begin: i32, end: Option<i32>) -> RunResult<Value> {
    let chars: Vec<char> = s.chars().collect();
    let end = end.unwrap_or(chars.len() as i32);
    let len = chars.len();
    let in_range = |i: i32| usize::try_from(i).ok().filter(|&i| i <= len);
    match (in_range(begin), in_range(end)) {
        (Some(b), Some(e)) if b <= e => Ok(Value::string(&chars[b..e].iter().collect::<String>())),
        _ => Err(RuntimeError::IndexOutOfBounds { index: begin, len }),
    }
}

fn string_method(s: &Rc<str>, name: &str, args: &[Value]) -> RunResult<Value> {
    match name {
        "length" => Ok(Value::Int(s.chars().count() as i32)),
        "isEmpty" => Ok(Value::Int(i32::from(s.is_empty()))),
        "charAt" => {
            let index = int_arg(args, 0)?;
            usize::try_from(index)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::Int(c as i32))
                .ok_or(RuntimeError::IndexOutOfBounds {
                    index,
                    len: s.chars().count(),
                })
        }
        "concat" => Ok(Value::string(&format!("{}{}", s, str_arg(args, 0)?))),
        "substring" => {
            let begin = int_arg(args, 0)?;
            let end = if args.len() > 1 { Some(int_arg(args, 1)?) } else { None };
            substring(s, begin, end)
        }
        "indexOf" => {
            let needle = str_arg(args, 0)?;
            let index = s
                .find(&*needle)
                .map(|byte| s[..byte].chars().count() as i32)
                .unwrap_or(-1);
            Ok(Value::Int(index))
        }
        "toUpperCase" => Ok(Value::string(&s.to_uppercase())),
        "toLowerCase" => Ok(Value::string(&s.to_lowercase())),
        "toString" => Ok(Value::Str(s.clone())),
        "hashCode" => Ok(Value::Int(
            s.chars()
                .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32)),
        )),
        "equals" => Ok(Value::Int(i32::from(args.first() == Some(&Value::Str(s.clone()))))),
        _ => Err(RuntimeError::UnsupportedHostCall(format!("string.{}", name))),
    }
}

fn host_static(method: &MethodRef, args: &[Value]) -> RunResult<Value> {
    let unsupported = || RuntimeError::UnsupportedHostCall(method.to_string());
    match (method.owner.as_str(), method.name.as_str()) {
        ("java.lang.Math", name @ ("max" | "min")) => {
            let pick_max = name == "max";
            match (args.first(), args.get(1)) {
                (Some(Value::Int(a)), Some(Value::Int(b))) => {
                    Ok(Value::Int(if pick_max { *a.max(b) } else { *a.min(b) }))
                }
                (Some(Value::Long(a)), Some(Value::Long(b))) => {
                    Ok(Value::Long(if pick_max { *a.max(b) } else { *a.min(b) }))
                }
                (Some(Value::Float(a)), Some(Value::Float(b))) => {
                    Ok(Value::Float(if pick_max { a.max(*b) } else { a.min(*b) }))
                }
                (Some(Value::Double(a)), Some(Value::Double(b))) => {
                    Ok(Value::Double(if pick_max { a.max(*b) } else { a.min(*b) }))
                }
                _ => Err(unsupported()),
            }
        }
        ("java.lang.Math", "abs") => match args.first() {
            Some(Value::Int(v)) => Ok(Value::Int(v.wrapping_abs())),
            Some(Value::Long(v)) => Ok(Value::Long(v.wrapping_abs())),
            Some(Value::Float(v)) => Ok(Value::Float(v.abs())),
            Some(Value::Double(v)) => Ok(Value::Double(v.abs())),
            _ => Err(unsupported()),
        },
        ("java.lang.Math", "sqrt") => match args.first() {
            Some(Value::Double(v)) => Ok(Value::Double(v.sqrt())),
            _ => Err(unsupported()),
        },
        ("java.lang.Math", "pow") => match (args.first(), args.get(1)) {
            (Some(Value::Double(a)), Some(Value::Double(b))) => Ok(Value::Double(a.powf(*b))),
            _ => Err(unsupported()),
        },
        ("java.lang.System", "currentTimeMillis" | "nanoTime") => {
            let elapsed = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map_err(|e| RuntimeError::HostError(e.to_string()))?;
            let value = if method.name == "nanoTime" {
                elapsed.as_nanos() as i64
            } else {
                elapsed.as_millis() as i64
            };
            Ok(Value::Long(value))
        }
        ("java.lang.Integer", "parseInt") => {
            let text = str_arg(args, 0)?;
            text.trim()
                .parse::<i32>()
                .map(Value::Int)
                .map_err(|_| RuntimeError::HostError(format!("not an int: {:?}", text)))
        }
        ("java.lang.Integer", "toString") | ("string", "valueOf") => {
            let (Some(value), Some(ty)) = (args.first(), method.params.first()) else {
                return Err(unsupported());
            };
            Ok(Value::string(&value.render(ty)))
        }
        _ => Err(unsupported()),
    }
}
