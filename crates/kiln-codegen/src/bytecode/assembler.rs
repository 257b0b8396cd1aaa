//! The class-file builder behind the bytecode backend.
//!
//! [`Assembler`] is the boundary to whatever serializes classes into a
//! loadable artifact. [`ListingAssembler`] keeps the classes in memory,
//! which is what the interpreter runs, and serializes them as a textual
//! listing.

use std::fmt;

use kiln_common::TypeRef;

use super::insn::Instruction;

#[derive(Clone, Debug, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub ty: TypeRef,
    pub is_static: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MethodCode {
    pub name: String,
    pub params: Vec<TypeRef>,
    pub return_type: TypeRef,
    pub is_static: bool,
    /// Local slots used, including `this` and the arguments.
    pub max_locals: u16,
    pub code: Vec<Instruction>,
}

impl MethodCode {
    /// The instructions without labels and line markers.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.code
            .iter()
            .filter(|insn| !matches!(insn, Instruction::Label(_) | Instruction::Line(_)))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassFile {
    pub name: String,
    pub superclass: TypeRef,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodCode>,
}

impl ClassFile {
    pub fn method(&self, name: &str) -> Option<&MethodCode> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }
}

impl fmt::Display for ClassFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "class {} extends {}", self.name, self.superclass)?;
        for field in &self.fields {
            let modifier = if field.is_static { "static " } else { "" };
            writeln!(f, "  {}field {}: {}", modifier, field.name, field.ty)?;
        }
        for method in &self.methods {
            let modifier = if method.is_static { "static " } else { "" };
            let params: Vec<String> = method.params.iter().map(|p| p.to_string()).collect();
            writeln!(
                f,
                "  {}method {}({}): {} [locals={}]",
                modifier,
                method.name,
                params.join(", "),
                method.return_type,
                method.max_locals
            )?;
            for insn in &method.code {
                match insn {
                    Instruction::Label(_) => writeln!(f, "   {}", insn)?,
                    _ => writeln!(f, "    {}", insn)?,
                }
            }
        }
        Ok(())
    }
}

/// Receives classes, fields, methods and instructions in emission order.
///
/// Methods may be opened while another is open; instructions always go
/// to the innermost open method.
pub trait Assembler {
    fn begin_class(&mut self, name: &str, superclass: &TypeRef);

    fn declare_field(&mut self, field: FieldInfo);

    fn end_class(&mut self);

    fn begin_method(&mut self, name: &str, params: &[TypeRef], return_type: &TypeRef, is_static: bool);

    fn emit(&mut self, insn: Instruction);

    fn end_method(&mut self, max_locals: u16);

    /// Serialize everything assembled so far.
    fn generate(&self) -> Vec<u8>;
}

/// An in-memory [`Assembler`] whose serialized form is a listing.
#[derive(Debug, Default)]
pub struct ListingAssembler {
    classes: Vec<ClassFile>,
    open_classes: Vec<usize>,
    /// Methods being assembled with the index of their class.
    open_methods: Vec<(usize, MethodCode)>,
}

impl ListingAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classes in the order they were begun.
    pub fn classes(&self) -> &[ClassFile] {
        &self.classes
    }

    pub fn class(&self, name: &str) -> Option<&ClassFile> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub fn into_classes(self) -> Vec<ClassFile> {
        self.classes
    }

    pub fn listing(&self) -> String {
        self.classes
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn current_class(&mut self) -> Option<&mut ClassFile> {
        let index = *self.open_classes.last()?;
        self.classes.get_mut(index)
    }
}

impl Assembler for ListingAssembler {
    fn begin_class(&mut self, name: &str, superclass: &TypeRef) {
        self.open_classes.push(self.classes.len());
        self.classes.push(ClassFile {
            name: name.to_string(),
            superclass: superclass.clone(),
            fields: Vec::new(),
            methods: Vec::new(),
        });
    }

    fn declare_field(&mut self, field: FieldInfo) {
        if let Some(class) = self.current_class() {
            class.fields.push(field);
        }
    }

    fn end_class(&mut self) {
        self.open_classes.pop();
    }

    fn begin_method(&mut self, name: &str, params: &[TypeRef], return_type: &TypeRef, is_static: bool) {
        let Some(&class) = self.open_classes.last() else {
            return;
        };
        self.open_methods.push((
            class,
            MethodCode {
                name: name.to_string(),
                params: params.to_vec(),
                return_type: return_type.clone(),
                is_static,
                max_locals: 0,
                code: Vec::new(),
            },
        ));
    }

    fn emit(&mut self, insn: Instruction) {
        if let Some((_, method)) = self.open_methods.last_mut() {
            method.code.push(insn);
        }
    }

    fn end_method(&mut self, max_locals: u16) {
        if let Some((class, mut method)) = self.open_methods.pop() {
            method.max_locals = max_locals;
            self.classes[class].methods.push(method);
        }
    }

    fn generate(&self) -> Vec<u8> {
        self.listing().into_bytes()
    }
}
