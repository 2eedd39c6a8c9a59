use super::context::{
    ArgumentProcessorContextCall, ArgumentProcessorMode, ContextCall, ARGUMENT_PROCESSOR_MODE,
    DYNAMIC_BYPASS,
};
use super::ArgProcessor;
use crate::cfg::ControlFlowGraph;
use crate::jvm::code::{
    const_int, current_thread, get_field, get_static, invoke_static, invoke_virtual, line_number,
    put_field, InsnId, InsnList, MethodCode, Node, TryCatchBlock,
};
use crate::jvm::{
    BranchInstruction, ClassName, Constant, FieldType, Instruction, MethodDescriptor, RefType,
};
use crate::localvar::{local_var_id, LocalVars, THREAD_CLASS};
use crate::util::Width;
use crate::weaver::{CodeOptions, Error, StaticContextMethod, StaticContexts};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// `snippet Class.method`, with the line when known
pub fn code_location(class_name: &str, method_name: &str, line: Option<u32>) -> String {
    match line {
        Some(line) => format!("snippet {}.{}:{}", class_name, method_name, line),
        None => format!("snippet {}.{}", class_name, method_name),
    }
}

/// Snippet or argument processor method, as compiled
#[derive(Clone, Debug)]
pub struct UnprocessedCode {
    /// Internal name of the class declaring the method
    pub class_name: String,
    pub method: MethodCode,
}

impl UnprocessedCode {
    pub fn new(class_name: impl Into<String>, method: MethodCode) -> UnprocessedCode {
        UnprocessedCode {
            class_name: class_name.into(),
            method,
        }
    }

    pub fn location(&self, line: Option<u32>) -> String {
        code_location(&self.class_name, &self.method.name, line)
    }

    fn location_of(&self, id: InsnId) -> String {
        self.location(line_number(&self.method.instructions, id))
    }

    /// Analyze the code and turn it into a template that can be inlined
    ///
    /// Returns are turned into jumps to the end of the code, and thread local accesses into
    /// field accesses on the current thread.
    pub fn process(
        &self,
        vars: &LocalVars,
        static_contexts: &StaticContexts,
    ) -> Result<Code, Error> {
        let insns = &self.method.instructions;
        let tcbs = &self.method.try_catch_blocks;

        let static_context_methods = self.collect_static_context_methods(static_contexts)?;
        let synthetic_locals = referenced_vars(insns, |id| vars.synthetic_local(id).is_some());
        let thread_locals = referenced_vars(insns, |id| vars.thread_local(id).is_some());
        let handles_exception = handles_exception_without_throwing(insns, tcbs);

        let mut instructions = insns.clone();
        replace_returns_with_goto(&mut instructions);
        rewrite_thread_local_accesses(&mut instructions, &thread_locals);

        Ok(Code {
            class_name: self.class_name.clone(),
            method_name: self.method.name.clone(),
            descriptor: self.method.descriptor.clone(),
            instructions,
            try_catch_blocks: tcbs.clone(),
            synthetic_locals,
            thread_locals,
            static_context_methods,
            handles_exception,
        })
    }

    fn collect_static_context_methods(
        &self,
        static_contexts: &StaticContexts,
    ) -> Result<BTreeSet<StaticContextMethod>, Error> {
        let insns = &self.method.instructions;
        let mut methods = BTreeSet::new();
        for id in insns {
            let method = match insns.insn(id) {
                Some(Instruction::Invoke(_, method)) => method,
                _ => continue,
            };
            let context = match static_contexts.get(&method.owner) {
                Some(context) => context,
                None => continue,
            };

            let problem = if !method.descriptor.parameters.is_empty() {
                Some("arguments found, but NONE allowed")
            } else if !returns_allowed_type(&method.descriptor) {
                Some("return type MUST be a primitive type or a String")
            } else if !context.provides(&method.name) {
                Some("no such static context method")
            } else {
                None
            };
            if let Some(problem) = problem {
                return Err(Error::InvalidContextUsage {
                    location: self.location_of(id),
                    message: format!(
                        "invocation of static context method {}.{}: {}",
                        method.owner, method.name, problem
                    ),
                });
            }
            methods.insert(StaticContextMethod::new(&method.owner, &method.name));
        }
        Ok(methods)
    }
}

fn returns_allowed_type(descriptor: &MethodDescriptor) -> bool {
    match &descriptor.return_type {
        Some(FieldType::Base(_)) => true,
        Some(FieldType::Ref(RefType::Object(ClassName(name)))) => name == "java/lang/String",
        _ => false,
    }
}

/// Ids of the variables accessed through a field instruction
fn referenced_vars(insns: &InsnList, is_var: impl Fn(&str) -> bool) -> BTreeSet<String> {
    let mut vars = BTreeSet::new();
    for id in insns {
        if let Some(
            Instruction::GetStatic(field)
            | Instruction::PutStatic(field)
            | Instruction::GetField(field)
            | Instruction::PutField(field),
        ) = insns.insn(id)
        {
            let var_id = local_var_id(&field.owner, &field.name);
            if is_var(&var_id) {
                vars.insert(var_id);
            }
        }
    }
    vars
}

/// Whether control continues normally after some exception handler
///
/// Such a handler leaves the stack in a different state from the one it had when the exception
/// was thrown, so the weaver has to save the stack around the code.
fn handles_exception_without_throwing(insns: &InsnList, tcbs: &[TryCatchBlock]) -> bool {
    if tcbs.is_empty() {
        return false;
    }
    let mut cfg = ControlFlowGraph::new(insns, tcbs);
    if let Some(first) = insns.first() {
        cfg.visit(insns, first);
    }
    tcbs.iter()
        .rev()
        .any(|tcb| !cfg.visit(insns, tcb.handler).is_empty())
}

/// Make the code fall off its end instead of returning
fn replace_returns_with_goto(insns: &mut InsnList) {
    let returns: Vec<InsnId> = insns
        .iter()
        .filter(|id| insns.node(*id).is_return())
        .collect();
    match returns.len() {
        0 => (),
        1 => insns.remove(returns[0]),
        _ => {
            let end = insns.push_label();
            for ret in returns {
                insns.insert_before(ret, Node::Branch(BranchInstruction::Goto(end)));
                insns.remove(ret);
            }
        }
    }
}

/// Turn static field accesses to thread locals into field accesses on the current thread
fn rewrite_thread_local_accesses(insns: &mut InsnList, thread_locals: &BTreeSet<String>) {
    let accesses: Vec<InsnId> = insns
        .iter()
        .filter(|id| match insns.insn(*id) {
            Some(Instruction::GetStatic(field) | Instruction::PutStatic(field)) => {
                thread_locals.contains(&local_var_id(&field.owner, &field.name))
            }
            _ => false,
        })
        .collect();

    for id in accesses {
        let (is_get, name, field_type) = match insns.insn(id) {
            Some(Instruction::GetStatic(field)) => {
                (true, field.name.clone(), field.descriptor.clone())
            }
            Some(Instruction::PutStatic(field)) => {
                (false, field.name.clone(), field.descriptor.clone())
            }
            _ => continue,
        };
        insns.insert_before(id, Node::Insn(current_thread()));
        if is_get {
            insns.insert_before(id, Node::Insn(get_field(THREAD_CLASS, &name, field_type)));
        } else {
            // The thread must go under the value being stored
            if field_type.width() == 1 {
                insns.insert_before(id, Node::Insn(Instruction::Swap));
            } else {
                insns.insert_before(id, Node::Insn(Instruction::DupX2));
                insns.insert_before(id, Node::Insn(Instruction::Pop));
            }
            insns.insert_before(id, Node::Insn(put_field(THREAD_CLASS, &name, field_type)));
        }
        insns.remove(id);
    }
}

/// Template of a snippet or processor method, ready to be cloned at each weaving site
#[derive(Clone, Debug)]
pub struct Code {
    pub class_name: String,
    pub method_name: String,

    /// Descriptor of the original method (whose parameters are the contexts it uses)
    pub descriptor: MethodDescriptor,
    pub instructions: InsnList,
    pub try_catch_blocks: Vec<TryCatchBlock>,

    /// Ids of the synthetic locals accessed
    pub synthetic_locals: BTreeSet<String>,

    /// Ids of the thread locals accessed
    pub thread_locals: BTreeSet<String>,
    pub static_context_methods: BTreeSet<StaticContextMethod>,

    /// Some exception handler in the code lets execution continue normally
    pub handles_exception: bool,
}

impl Code {
    /// Location of an instruction of the code, for error messages
    pub fn location(&self, id: InsnId) -> String {
        code_location(
            &self.class_name,
            &self.method_name,
            line_number(&self.instructions, id),
        )
    }
}

/// Argument processor applied at some instruction of a snippet
#[derive(Clone, Debug)]
pub struct ProcessorApplication {
    pub processor: Arc<ArgProcessor>,
    pub mode: ArgumentProcessorMode,
}

/// Template of a snippet
#[derive(Clone, Debug)]
pub struct SnippetCode {
    pub code: Code,

    /// Processor applications, keyed by the `ArgumentProcessorContext.apply` call
    ///
    /// Node handles survive cloning the instructions, so the keys stay valid in every copy of
    /// the template.
    pub processor_applications: BTreeMap<InsnId, ProcessorApplication>,
}

impl SnippetCode {
    /// Prepare a snippet template
    ///
    /// `processors` maps processor class names to processors, `callsite_allowed` says whether
    /// processors may be applied to call site arguments (only when marking single instructions).
    #[allow(clippy::too_many_arguments)]
    pub fn prepare(
        template: &UnprocessedCode,
        dynamic_bypass: bool,
        callsite_allowed: bool,
        processors: &HashMap<String, Arc<ArgProcessor>>,
        options: CodeOptions,
        vars: &LocalVars,
        static_contexts: &StaticContexts,
    ) -> Result<SnippetCode, Error> {
        let mut code = template.process(vars, static_contexts)?;

        if options.contains(CodeOptions::DYNAMIC_BYPASS) && dynamic_bypass {
            insert_dynamic_bypass_control(&mut code.instructions);
        }
        if options.contains(CodeOptions::CATCH_EXCEPTIONS) {
            let location = template.location(None);
            insert_exception_handler(&mut code, &location);
        }

        let processor_applications =
            collect_processor_applications(&code, processors, callsite_allowed)?;

        Ok(SnippetCode {
            code,
            processor_applications,
        })
    }

    /// Static context methods used by the snippet or by any processor it applies
    pub fn static_context_methods(&self) -> BTreeSet<StaticContextMethod> {
        let mut methods = self.code.static_context_methods.clone();
        for application in self.processor_applications.values() {
            methods.extend(application.processor.static_context_methods());
        }
        methods
    }
}

fn no_arg_void() -> MethodDescriptor {
    MethodDescriptor {
        parameters: vec![],
        return_type: None,
    }
}

/// Turn on the dynamic bypass for the duration of the snippet
fn insert_dynamic_bypass_control(insns: &mut InsnList) {
    insns.push_front(Node::Insn(invoke_static(
        DYNAMIC_BYPASS,
        "activate",
        no_arg_void(),
    )));
    insns.push_insn(invoke_static(DYNAMIC_BYPASS, "deactivate", no_arg_void()));
}

/// Wrap the code in a handler that reports the exception and exits the VM
///
/// ```text
/// TRY_BEGIN:
///     <code>
///     goto HANDLER_END
/// TRY_END:
/// HANDLER_BEGIN:
///     System.err.println("<location>: failed to handle an exception")
///     dup
///     invokevirtual Throwable.printStackTrace
///     System.exit(666)
///     athrow
/// HANDLER_END:
/// ```
fn insert_exception_handler(code: &mut Code, location: &str) {
    let insns = &mut code.instructions;
    let try_begin = insns.push_front(Node::Label);
    let handler_end = insns.push_label();
    insns.insert_before(handler_end, Node::Branch(BranchInstruction::Goto(handler_end)));
    let try_end = insns.insert_before(handler_end, Node::Label);
    let handler_begin = insns.insert_before(handler_end, Node::Label);

    let print_stream = FieldType::object("java/io/PrintStream");
    let handler = vec![
        get_static("java/lang/System", "err", print_stream),
        Instruction::Ldc(Constant::String(format!(
            "{}: failed to handle an exception",
            location
        ))),
        invoke_virtual(
            "java/io/PrintStream",
            "println",
            MethodDescriptor {
                parameters: vec![FieldType::string()],
                return_type: None,
            },
        ),
        Instruction::Dup,
        invoke_virtual("java/lang/Throwable", "printStackTrace", no_arg_void()),
        const_int(666),
        invoke_static(
            "java/lang/System",
            "exit",
            MethodDescriptor {
                parameters: vec![FieldType::int()],
                return_type: None,
            },
        ),
    ];
    for insn in handler {
        insns.insert_before(handler_end, Node::Insn(insn));
    }
    insns.insert_before(handler_end, Node::Branch(BranchInstruction::AThrow));

    code.try_catch_blocks
        .push(TryCatchBlock::new(try_begin, try_end, handler_begin, None));
}

fn collect_processor_applications(
    code: &Code,
    processors: &HashMap<String, Arc<ArgProcessor>>,
    callsite_allowed: bool,
) -> Result<BTreeMap<InsnId, ProcessorApplication>, Error> {
    let insns = &code.instructions;
    let mut applications = BTreeMap::new();
    for id in insns {
        let call = match insns.insn(id).map(ContextCall::of) {
            Some(Ok(call)) => call,
            Some(Err(message)) => {
                return Err(Error::InvalidContextUsage {
                    location: code.location(id),
                    message,
                })
            }
            None => continue,
        };
        if call != Some(ContextCall::ArgumentProcessor(ArgumentProcessorContextCall::Apply)) {
            continue;
        }

        let invalid = |message: String| Error::InvalidContextUsage {
            location: code.location(id),
            message,
        };
        let mode_insn = insns.prev_real(id);
        let class_insn = mode_insn.and_then(|mode| insns.prev_real(mode));

        let processor_class = match class_insn.and_then(|c| insns.insn(c)) {
            Some(Instruction::Ldc(Constant::Class(RefType::Object(ClassName(name))))) => name,
            _ => {
                return Err(invalid(String::from(
                    "pass the first (class) argument to the apply() method directly as a class \
                     literal",
                )))
            }
        };
        let mode = match mode_insn.and_then(|m| insns.insn(m)) {
            Some(Instruction::GetStatic(field)) if field.owner == ARGUMENT_PROCESSOR_MODE => {
                ArgumentProcessorMode::from_constant(&field.name)
            }
            _ => None,
        };
        let mode = mode.ok_or_else(|| {
            invalid(String::from(
                "pass the second (type) argument to the apply() method directly as an enum \
                 literal",
            ))
        })?;

        if mode == ArgumentProcessorMode::CallSiteArgs && !callsite_allowed {
            return Err(invalid(String::from(
                "ArgumentProcessor applied in the CALLSITE_ARGS mode can be only used with the \
                 BytecodeMarker",
            )));
        }
        let processor = processors
            .get(processor_class.as_str())
            .ok_or_else(|| invalid(format!("unknown processor: {}", processor_class)))?;

        applications.insert(
            id,
            ProcessorApplication {
                processor: processor.clone(),
                mode,
            },
        );
    }
    Ok(applications)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::parse_method;
    use crate::localvar::{Initialize, SyntheticLocalVar, ThreadLocalVar};

    fn vars() -> LocalVars {
        let mut vars = LocalVars::new();
        vars.add_synthetic_local(SyntheticLocalVar::new(
            "Instr",
            "counter",
            FieldType::int(),
            Initialize::Always,
        ));
        vars.add_thread_local(ThreadLocalVar::new("Instr", "total", FieldType::long(), false));
        vars
    }

    fn mnemonics(insns: &InsnList) -> Vec<&'static str> {
        insns
            .iter()
            .filter(|id| insns.node(*id).is_real())
            .map(|id| insns.node(id).mnemonic())
            .collect()
    }

    #[test]
    fn single_return_is_dropped() {
        let snippet = parse_method(
            r#"
            method static before ()V
              iconst_1
              putstatic Instr.counter I
              return
            "#,
        )
        .unwrap();
        let template = UnprocessedCode::new("Instr", snippet);
        let code = template
            .process(&vars(), &StaticContexts::standard())
            .unwrap();
        assert_eq!(mnemonics(&code.instructions), vec!["iconst_1", "putstatic"]);
        assert_eq!(
            code.synthetic_locals,
            BTreeSet::from([String::from("Instr.counter")])
        );
        assert!(code.thread_locals.is_empty());
        assert!(!code.handles_exception);
    }

    #[test]
    fn many_returns_jump_to_the_end() {
        let snippet = parse_method(
            r#"
            method static before (I)V
              iload 0
              ifeq DONE
              return
            DONE:
              return
            "#,
        )
        .unwrap();
        let code = UnprocessedCode::new("Instr", snippet)
            .process(&vars(), &StaticContexts::standard())
            .unwrap();
        assert_eq!(mnemonics(&code.instructions), vec!["iload", "ifeq", "goto", "goto"]);
        assert!(code.instructions.node(code.instructions.last().unwrap()).is_label());
    }

    #[test]
    fn thread_locals_live_in_the_thread() {
        let snippet = parse_method(
            r#"
            method static before ()V
              getstatic Instr.total J
              lconst_1
              ladd
              putstatic Instr.total J
              return
            "#,
        )
        .unwrap();
        let code = UnprocessedCode::new("Instr", snippet)
            .process(&vars(), &StaticContexts::standard())
            .unwrap();
        assert_eq!(
            mnemonics(&code.instructions),
            vec![
                "invokestatic",
                "getfield",
                "lconst_1",
                "ladd",
                "invokestatic",
                "dup_x2",
                "pop",
                "putfield"
            ]
        );
        assert_eq!(
            code.thread_locals,
            BTreeSet::from([String::from("Instr.total")])
        );
    }

    #[test]
    fn static_context_calls_are_validated() {
        let snippet = parse_method(
            r#"
            method static before (Lch/usi/dag/disl/staticcontext/MethodStaticContext;)V
              aload 0
              invokevirtual ch/usi/dag/disl/staticcontext/MethodStaticContext.thisMethodName ()Ljava/lang/String;
              pop
              return
            "#,
        )
        .unwrap();
        let code = UnprocessedCode::new("Instr", snippet)
            .process(&vars(), &StaticContexts::standard())
            .unwrap();
        assert_eq!(code.static_context_methods.len(), 1);

        let snippet = parse_method(
            r#"
            method static before (Lch/usi/dag/disl/staticcontext/MethodStaticContext;)V
              aload 0
              invokevirtual ch/usi/dag/disl/staticcontext/MethodStaticContext.thisClass ()Ljava/lang/Object;
              pop
              return
            "#,
        )
        .unwrap();
        let result = UnprocessedCode::new("Instr", snippet)
            .process(&vars(), &StaticContexts::standard());
        assert!(matches!(result, Err(Error::InvalidContextUsage { .. })));
    }

    #[test]
    fn exception_catching_and_bypass() {
        let snippet = parse_method(
            r#"
            method static before ()V
              invokestatic Instr.log ()V
              return
            "#,
        )
        .unwrap();
        let template = UnprocessedCode::new("Instr", snippet);
        let prepared = SnippetCode::prepare(
            &template,
            true,
            false,
            &HashMap::new(),
            CodeOptions::DYNAMIC_BYPASS | CodeOptions::CATCH_EXCEPTIONS,
            &vars(),
            &StaticContexts::standard(),
        )
        .unwrap();
        let code = &prepared.code;
        assert_eq!(
            mnemonics(&code.instructions),
            vec![
                "invokestatic", // activate
                "invokestatic",
                "invokestatic", // deactivate
                "goto",
                "getstatic",
                "ldc",
                "invokevirtual",
                "dup",
                "invokevirtual",
                "sipush",
                "invokestatic",
                "athrow"
            ]
        );
        assert_eq!(code.try_catch_blocks.len(), 1);
        assert_eq!(code.try_catch_blocks[0].exception, None);
        assert!(!code.handles_exception);
    }

    #[test]
    fn processor_applications_need_literals() {
        let snippet = parse_method(
            r#"
            method static before (Lch/usi/dag/disl/processorcontext/ArgumentProcessorContext;)V
              aload 0
              ldc class Proc
              getstatic ch/usi/dag/disl/processorcontext/ArgumentProcessorMode.CALLSITE_ARGS Lch/usi/dag/disl/processorcontext/ArgumentProcessorMode;
              invokeinterface ch/usi/dag/disl/processorcontext/ArgumentProcessorContext.apply (Ljava/lang/Class;Lch/usi/dag/disl/processorcontext/ArgumentProcessorMode;)V
              return
            "#,
        )
        .unwrap();
        let template = UnprocessedCode::new("Instr", snippet);
        let processors = HashMap::from([(
            String::from("Proc"),
            Arc::new(ArgProcessor::new("Proc", vec![])),
        )]);

        let prepare = |callsite_allowed| {
            SnippetCode::prepare(
                &template,
                false,
                callsite_allowed,
                &processors,
                CodeOptions::empty(),
                &vars(),
                &StaticContexts::standard(),
            )
        };
        let prepared = prepare(true).unwrap();
        assert_eq!(prepared.processor_applications.len(), 1);
        let application = prepared.processor_applications.values().next().unwrap();
        assert_eq!(application.mode, ArgumentProcessorMode::CallSiteArgs);

        assert!(matches!(
            prepare(false),
            Err(Error::InvalidContextUsage { .. })
        ));
    }
}
