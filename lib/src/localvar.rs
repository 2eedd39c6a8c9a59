//! Variables snippets share through static fields of the instrumentation class
//!
//! Snippets are compiled as static methods, so they can only share state through static fields.
//! Two kinds of such fields get special treatment:
//!
//!   - synthetic locals are turned into local variables of the instrumented method, so that
//!     snippets woven in the same method see the same variable (see
//!     [`crate::fixup::static_to_local`])
//!   - thread locals become instance fields of `java/lang/Thread`, accessed through
//!     `Thread.currentThread()` (see [`insert_thread_local_init`])

use crate::jvm::analysis::{Analyzer, SourceInterpreter};
use crate::jvm::code::{
    current_thread, default_value, get_field, int_constant_operand, load_literal, put_field,
    ClassCode, FieldDecl, InsnId, InsnList, Literal, MethodCode, Node,
};
use crate::jvm::{
    BaseType, BranchInstruction, Constant, EqComparison, FieldAccessFlags, FieldType, Instruction,
    InvokeType,
};
use crate::weaver::Error;
use log::warn;
use std::collections::BTreeMap;

pub const THREAD_CLASS: &str = "java/lang/Thread";

/// Key of a variable: `owner.name`
pub fn local_var_id(owner: &str, name: &str) -> String {
    format!("{}.{}", owner, name)
}

/// When a synthetic local gets initialized on method entry
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Initialize {
    Always,
    Never,

    /// Initialize only if some snippet might read the variable before writing it
    ///
    /// Handled like `Always`.
    BestEffort,
}

#[derive(Clone, Debug)]
pub struct SyntheticLocalVar {
    /// Internal name of the class declaring the field
    pub owner: String,
    pub name: String,
    pub field_type: FieldType,
    pub initialize: Initialize,

    /// Code computing and storing the initial value (ends with a `putstatic` to the variable)
    pub init_code: Option<InsnList>,
}

impl SyntheticLocalVar {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        field_type: FieldType,
        initialize: Initialize,
    ) -> SyntheticLocalVar {
        SyntheticLocalVar {
            owner: owner.into(),
            name: name.into(),
            field_type,
            initialize,
            init_code: None,
        }
    }

    pub fn id(&self) -> String {
        local_var_id(&self.owner, &self.name)
    }
}

#[derive(Clone, Debug)]
pub struct ThreadLocalVar {
    /// Internal name of the class declaring the field
    pub owner: String,

    /// Name of the field, both in the declaring class and in `java/lang/Thread`
    pub name: String,
    pub field_type: FieldType,

    /// New threads start with the value of the thread creating them
    pub inheritable: bool,

    /// Initial value (the zero of the type if missing)
    pub default_value: Option<Literal>,
}

impl ThreadLocalVar {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        field_type: FieldType,
        inheritable: bool,
    ) -> ThreadLocalVar {
        ThreadLocalVar {
            owner: owner.into(),
            name: name.into(),
            field_type,
            inheritable,
            default_value: None,
        }
    }

    /// Flag read by the dynamic bypass (`true` while a snippet is running)
    pub fn dynamic_bypass() -> ThreadLocalVar {
        ThreadLocalVar {
            owner: String::from(THREAD_CLASS),
            name: String::from("bypass"),
            field_type: FieldType::Base(BaseType::Boolean),
            inheritable: false,
            default_value: Some(Literal::Boolean(false)),
        }
    }

    pub fn id(&self) -> String {
        local_var_id(&self.owner, &self.name)
    }

    fn field(&self) -> FieldDecl {
        FieldDecl {
            access_flags: FieldAccessFlags::PUBLIC,
            name: self.name.clone(),
            descriptor: self.field_type.clone(),
        }
    }
}

/// Every synthetic and thread local declared by the instrumentation
#[derive(Clone, Debug, Default)]
pub struct LocalVars {
    synthetic_locals: BTreeMap<String, SyntheticLocalVar>,
    thread_locals: BTreeMap<String, ThreadLocalVar>,
}

impl LocalVars {
    pub fn new() -> LocalVars {
        LocalVars::default()
    }

    pub fn add_synthetic_local(&mut self, var: SyntheticLocalVar) {
        self.synthetic_locals.insert(var.id(), var);
    }

    pub fn add_thread_local(&mut self, var: ThreadLocalVar) {
        self.thread_locals.insert(var.id(), var);
    }

    pub fn synthetic_local(&self, id: &str) -> Option<&SyntheticLocalVar> {
        self.synthetic_locals.get(id)
    }

    pub fn thread_local(&self, id: &str) -> Option<&ThreadLocalVar> {
        self.thread_locals.get(id)
    }

    pub fn synthetic_locals(&self) -> impl Iterator<Item = &SyntheticLocalVar> + '_ {
        self.synthetic_locals.values()
    }

    pub fn thread_locals(&self) -> impl Iterator<Item = &ThreadLocalVar> + '_ {
        self.thread_locals.values()
    }

    /// Extract initial values from the static initializer of the instrumentation class
    ///
    /// Each access to a synthetic local ends a block of initialization code for that local: the
    /// real instructions since the previous such access. A thread local must be assigned a
    /// single constant.
    pub fn parse_initializers(&mut self, clinit: &MethodCode) -> Result<(), Error> {
        let insns = &clinit.instructions;

        let mut block_start = insns.first();
        for id in insns {
            let node = insns.node(id);
            if node.is_return() {
                break;
            }
            let field = match node {
                Node::Insn(
                    Instruction::GetStatic(field)
                    | Instruction::PutStatic(field)
                    | Instruction::GetField(field)
                    | Instruction::PutField(field),
                ) => field,
                _ => continue,
            };
            let var = match self
                .synthetic_locals
                .get_mut(&local_var_id(&field.owner, &field.name))
            {
                Some(var) => var,
                None => continue,
            };

            if var.init_code.is_some() {
                warn!("replacing initialization code for synthetic local {}", var.id());
            }
            let mut code = InsnList::new();
            let mut cursor = block_start;
            while let Some(current) = cursor {
                if let Node::Insn(insn) = insns.node(current) {
                    code.push_insn(insn.clone());
                }
                if current == id {
                    break;
                }
                cursor = insns.next(current);
            }
            var.init_code = Some(code);
            block_start = insns.next(id);
        }

        if self.thread_locals.is_empty() {
            return Ok(());
        }
        let frames = Analyzer::new(SourceInterpreter).analyze(clinit)?;
        for id in insns {
            let field = match insns.insn(id) {
                Some(Instruction::PutStatic(field)) => field,
                _ => continue,
            };
            let var = match self
                .thread_locals
                .get_mut(&local_var_id(&field.owner, &field.name))
            {
                Some(var) => var,
                None => continue,
            };
            let sources = frames
                .get(&id)
                .and_then(|frame| frame.stack_from_top(0))
                .map(|value| value.insns.clone())
                .unwrap_or_default();

            let literal = match sources.iter().next() {
                Some(source) if sources.len() == 1 => insns
                    .insn(*source)
                    .and_then(|insn| constant_literal(insn, &var.field_type)),
                _ => None,
            };
            match literal {
                Some(literal) => var.default_value = Some(literal),
                None => {
                    return Err(Error::InvalidContextUsage {
                        location: format!("class {}", clinit.owner),
                        message: format!(
                            "thread local variable {} can only be initialized by a single constant",
                            var.name
                        ),
                    })
                }
            }
        }
        Ok(())
    }
}

/// Literal pushed by a constant instruction, read as a value of the given type
fn constant_literal(insn: &Instruction, field_type: &FieldType) -> Option<Literal> {
    let literal = match field_type {
        FieldType::Base(BaseType::Boolean) => Literal::Boolean(int_constant_operand(insn)? != 0),
        FieldType::Base(BaseType::Byte) => Literal::Byte(int_constant_operand(insn)? as i8),
        FieldType::Base(BaseType::Char) => Literal::Char(int_constant_operand(insn)? as u16),
        FieldType::Base(BaseType::Short) => Literal::Short(int_constant_operand(insn)? as i16),
        FieldType::Base(BaseType::Int) => Literal::Int(int_constant_operand(insn)?),
        FieldType::Base(BaseType::Long) => match insn {
            Instruction::LConst0 => Literal::Long(0),
            Instruction::LConst1 => Literal::Long(1),
            Instruction::Ldc(Constant::Long(l)) => Literal::Long(*l),
            _ => return None,
        },
        FieldType::Base(BaseType::Float) => match insn {
            Instruction::FConst0 => Literal::Float(0.0),
            Instruction::FConst1 => Literal::Float(1.0),
            Instruction::FConst2 => Literal::Float(2.0),
            Instruction::Ldc(Constant::Float(f)) => Literal::Float(*f),
            _ => return None,
        },
        FieldType::Base(BaseType::Double) => match insn {
            Instruction::DConst0 => Literal::Double(0.0),
            Instruction::DConst1 => Literal::Double(1.0),
            Instruction::Ldc(Constant::Double(d)) => Literal::Double(*d),
            _ => return None,
        },
        FieldType::Ref(_) => match insn {
            Instruction::Ldc(Constant::String(s)) => Literal::String(s.clone()),
            _ => return None,
        },
    };
    Some(literal)
}

/// Code setting up every thread local in a new `Thread` object
///
/// ```text
///     aload 0
///     invokestatic java/lang/Thread.currentThread      // only when inheritable
///     ifnull DEFAULT
///     invokestatic java/lang/Thread.currentThread
///     getfield java/lang/Thread.NAME
///     goto PUT
/// DEFAULT:
///     <default value>
/// PUT:
///     putfield java/lang/Thread.NAME
/// ```
pub fn thread_local_init_code<'a>(vars: impl IntoIterator<Item = &'a ThreadLocalVar>) -> InsnList {
    let mut code = InsnList::new();
    for var in vars {
        code.push_insn(Instruction::ALoad(0));
        let default_label = code.push_label();
        let put_label = code.push_label();
        if var.inheritable {
            code.insert_before(default_label, Node::Insn(current_thread()));
            code.insert_before(
                default_label,
                Node::Branch(BranchInstruction::IfNull(EqComparison::EQ, default_label)),
            );
            code.insert_before(default_label, Node::Insn(current_thread()));
            let get = get_field(THREAD_CLASS, &var.name, var.field_type.clone());
            code.insert_before(default_label, Node::Insn(get));
            code.insert_before(
                default_label,
                Node::Branch(BranchInstruction::Goto(put_label)),
            );
        }
        match &var.default_value {
            Some(literal) => {
                code.insert_before(put_label, Node::Insn(load_literal(literal)));
            }
            None => {
                for insn in default_value(&var.field_type) {
                    code.insert_before(put_label, Node::Insn(insn));
                }
            }
        }
        code.push_insn(put_field(THREAD_CLASS, &var.name, var.field_type.clone()));
    }
    code
}

/// Constructor call initializing the object under construction (`super(..)` or `this(..)`)
fn initializing_constructor_call(method: &MethodCode) -> Option<InsnId> {
    let insns = &method.instructions;
    let mut pending_news = 0;
    for id in insns {
        match insns.insn(id) {
            Some(Instruction::New(_)) => pending_news += 1,
            Some(Instruction::Invoke(InvokeType::Special, callee)) if callee.name == "<init>" => {
                if pending_news == 0 {
                    return Some(id);
                }
                pending_news -= 1;
            }
            _ => (),
        }
    }
    None
}

/// Initialize thread locals in a constructor, right after the object is initialized
pub fn insert_thread_local_init<'a>(
    constructor: &mut MethodCode,
    vars: impl IntoIterator<Item = &'a ThreadLocalVar>,
) {
    let code = thread_local_init_code(vars);
    match initializing_constructor_call(constructor) {
        Some(call) => {
            constructor.instructions.splice_after(call, code);
        }
        None => {
            constructor.instructions.splice_front(code);
        }
    }
}

/// Add the thread local fields to `java/lang/Thread` and initialize them in its constructors
pub fn lower_thread_locals<'a>(
    class: &mut ClassCode,
    vars: impl IntoIterator<Item = &'a ThreadLocalVar> + Clone,
) {
    for method in class.methods.iter_mut().filter(|m| m.is_constructor()) {
        insert_thread_local_init(method, vars.clone());
    }
    class.fields.extend(vars.into_iter().map(ThreadLocalVar::field));
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{parse_method, print_instructions};

    #[test]
    fn initializers_from_static_block() {
        let mut vars = LocalVars::new();
        vars.add_synthetic_local(SyntheticLocalVar::new(
            "Instr",
            "counter",
            FieldType::int(),
            Initialize::Always,
        ));
        vars.add_thread_local(ThreadLocalVar::new("Instr", "depth", FieldType::long(), true));

        let clinit = parse_method(
            r#"
            class Instr
            method static <clinit> ()V
              bipush 42
              putstatic Instr.counter I
              ldc 7L
              putstatic Instr.depth J
              return
            "#,
        )
        .unwrap();
        vars.parse_initializers(&clinit).unwrap();

        let counter = vars.synthetic_local("Instr.counter").unwrap();
        let code = counter.init_code.as_ref().unwrap();
        assert_eq!(code.real_len(), 2);
        assert_eq!(
            code.insn(code.first().unwrap()),
            Some(&Instruction::BiPush(42))
        );
        let depth = vars.thread_local("Instr.depth").unwrap();
        assert_eq!(depth.default_value, Some(Literal::Long(7)));
    }

    #[test]
    fn thread_local_needs_a_constant() {
        let mut vars = LocalVars::new();
        vars.add_thread_local(ThreadLocalVar::new("Instr", "id", FieldType::int(), false));
        let clinit = parse_method(
            r#"
            class Instr
            method static <clinit> ()V
              invokestatic Instr.next ()I
              putstatic Instr.id I
              return
            "#,
        )
        .unwrap();
        assert!(matches!(
            vars.parse_initializers(&clinit),
            Err(Error::InvalidContextUsage { .. })
        ));
    }

    #[test]
    fn inheritable_init_code() {
        let var = ThreadLocalVar::new("Instr", "depth", FieldType::int(), true);
        let code = thread_local_init_code([&var]);
        let listing = print_instructions(&code, &[]);
        let lines: Vec<&str> = listing.lines().map(str::trim).collect();
        assert_eq!(
            lines,
            vec![
                "aload 0",
                "invokestatic java/lang/Thread.currentThread ()Ljava/lang/Thread;",
                "ifnull L0",
                "invokestatic java/lang/Thread.currentThread ()Ljava/lang/Thread;",
                "getfield java/lang/Thread.depth I",
                "goto L1",
                "L0:",
                "iconst_0",
                "L1:",
                "putfield java/lang/Thread.depth I",
            ]
        );
    }

    #[test]
    fn thread_fields_and_constructor_init() {
        let ctor = parse_method(
            r#"
            class java/lang/Thread
            method <init> ()V
              aload 0
              invokespecial java/lang/Object.<init> ()V
              return
            "#,
        )
        .unwrap();
        let mut class = ClassCode {
            name: String::from(THREAD_CLASS),
            methods: vec![ctor],
            fields: vec![],
        };
        let bypass = ThreadLocalVar::dynamic_bypass();
        lower_thread_locals(&mut class, [&bypass]);

        assert_eq!(class.fields.len(), 1);
        assert_eq!(class.fields[0].name, "bypass");
        assert_eq!(class.fields[0].access_flags, FieldAccessFlags::PUBLIC);

        let insns = &class.methods[0].instructions;
        let mnemonics: Vec<&str> = insns
            .iter()
            .filter(|id| insns.node(*id).is_real())
            .map(|id| insns.node(id).mnemonic())
            .collect();
        assert_eq!(
            mnemonics,
            vec!["aload", "invokespecial", "aload", "iconst_0", "putfield", "return"]
        );
    }
}
