use super::{Error, ShadowKey, SnippetMarking};
use crate::jvm::code::{InsnId, MethodCode};
use crate::jvm::{FieldType, Instruction};
use crate::snippet::context::ArgumentProcessorMode;
use crate::snippet::{ArgProcessorKind, ArgumentInfo, Code, ProcessorApplication, Snippet};
use std::collections::HashMap;

/// Processor method applied to one argument
#[derive(Debug)]
pub struct ProcessorMethodInstance<'a> {
    /// Index of the argument
    pub position: usize,
    pub total_count: usize,

    /// Declared type of the argument
    pub arg_type: FieldType,
    pub kind: ArgProcessorKind,
    pub code: &'a Code,
}

/// Argument processor resolved against the arguments of one shadow
#[derive(Debug)]
pub struct ProcessorInstance<'a> {
    pub mode: ArgumentProcessorMode,

    /// Applications in argument order (an argument may get several)
    pub methods: Vec<ProcessorMethodInstance<'a>>,
}

/// Processor instances of a method, keyed by shadow and by `apply` call in the snippet
#[derive(Debug, Default)]
pub struct ProcessorInstances<'a> {
    instances: HashMap<(ShadowKey, InsnId), ProcessorInstance<'a>>,
}

impl<'a> ProcessorInstances<'a> {
    /// Resolve every processor application of every shadow
    ///
    /// Applications with no processor method matching any argument get no instance, so the
    /// weaver just drops them.
    pub fn resolve(
        method: &MethodCode,
        markings: &[SnippetMarking<'a>],
    ) -> Result<ProcessorInstances<'a>, Error> {
        let mut instances = HashMap::new();
        for (snippet_index, marking) in markings.iter().enumerate() {
            let snippet: &'a Snippet = marking.snippet;
            let applications = &snippet.code.processor_applications;
            if applications.is_empty() {
                continue;
            }

            for (shadow_index, shadow) in marking.shadows.iter().enumerate() {
                let key = ShadowKey {
                    snippet: snippet_index,
                    shadow: shadow_index,
                };
                for (apply, application) in applications {
                    let arguments = match application.mode {
                        ArgumentProcessorMode::MethodArgs => {
                            method.descriptor.parameters.as_slice()
                        }
                        ArgumentProcessorMode::CallSiteArgs => {
                            callee_arguments(method, &shadow.region_ends, application)?
                        }
                    };
                    if let Some(instance) = instantiate(application, arguments) {
                        instances.insert((key, *apply), instance);
                    }
                }
            }
        }
        Ok(ProcessorInstances { instances })
    }

    pub fn get(&self, key: ShadowKey, apply: InsnId) -> Option<&ProcessorInstance<'a>> {
        self.instances.get(&(key, apply))
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Parameters of the method invoked at the end of a marked region
fn callee_arguments<'m>(
    method: &'m MethodCode,
    region_ends: &[InsnId],
    application: &ProcessorApplication,
) -> Result<&'m [FieldType], Error> {
    let end = match region_ends {
        [end] => *end,
        _ => {
            return Err(Error::Fatal(String::from(
                "expected only one end in marked region",
            )))
        }
    };
    match method.instructions.insn(end) {
        Some(Instruction::Invoke(_, callee)) => Ok(&callee.descriptor.parameters),
        _ => Err(Error::InvalidMarker(format!(
            "argument processor {} is not applied before a method invocation in {}.{}",
            application.processor.class_name, method.owner, method.name
        ))),
    }
}

fn instantiate<'a>(
    application: &'a ProcessorApplication,
    arguments: &[FieldType],
) -> Option<ProcessorInstance<'a>> {
    let total_count = arguments.len();
    let mut methods = vec![];
    for (position, arg_type) in arguments.iter().enumerate() {
        let kind = ArgProcessorKind::of_type(arg_type);
        let info = ArgumentInfo {
            position,
            total_count,
            field_type: arg_type,
        };
        for processor_method in &application.processor.methods {
            if processor_method.handles(kind) && processor_method.accepts(&info) {
                methods.push(ProcessorMethodInstance {
                    position,
                    total_count,
                    arg_type: arg_type.clone(),
                    kind,
                    code: &processor_method.code,
                });
            }
        }
    }

    if methods.is_empty() {
        None
    } else {
        Some(ProcessorInstance {
            mode: application.mode,
            methods,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::parse_method;
    use crate::localvar::LocalVars;
    use crate::shadow::{BodyMarker, BytecodeMarker, Marker, Shadow};
    use crate::snippet::{
        ArgGuard, ArgProcessor, ArgProcessorMethod, SnippetCode, SnippetKind, UnprocessedCode,
    };
    use crate::weaver::{CodeOptions, StaticContexts};
    use std::sync::Arc;

    const APPLY: &str = r#"
        method static before (Lch/usi/dag/disl/processorcontext/ArgumentProcessorContext;)V
          aload 0
          ldc class Proc
          getstatic ch/usi/dag/disl/processorcontext/ArgumentProcessorMode.MODE Lch/usi/dag/disl/processorcontext/ArgumentProcessorMode;
          invokeinterface ch/usi/dag/disl/processorcontext/ArgumentProcessorContext.apply (Ljava/lang/Class;Lch/usi/dag/disl/processorcontext/ArgumentProcessorMode;)V
          return
        "#;

    fn processor() -> Arc<ArgProcessor> {
        let vars = LocalVars::new();
        let contexts = StaticContexts::standard();
        let int_method = parse_method(
            r#"
            method static onInt (I)V
              return
            "#,
        )
        .unwrap();
        let object_method = parse_method(
            r#"
            method static onObject (Ljava/lang/Object;)V
              return
            "#,
        )
        .unwrap();
        let only_first: ArgGuard = Arc::new(|arg: &ArgumentInfo| arg.position == 0);
        Arc::new(ArgProcessor::new(
            "Proc",
            vec![
                ArgProcessorMethod::prepare(
                    &UnprocessedCode::new("Proc", int_method),
                    &[ArgProcessorKind::Boolean],
                    None,
                    &vars,
                    &contexts,
                )
                .unwrap(),
                ArgProcessorMethod::prepare(
                    &UnprocessedCode::new("Proc", object_method),
                    &[],
                    Some(only_first),
                    &vars,
                    &contexts,
                )
                .unwrap(),
            ],
        ))
    }

    fn snippet(mode: &str, marker: Box<dyn Marker + Send + Sync>) -> Snippet {
        let listing = APPLY.replace("MODE", mode);
        let template = UnprocessedCode::new("Instr", parse_method(&listing).unwrap());
        let processors = std::collections::HashMap::from([(String::from("Proc"), processor())]);
        let code = SnippetCode::prepare(
            &template,
            false,
            true,
            &processors,
            CodeOptions::empty(),
            &LocalVars::new(),
            &StaticContexts::standard(),
        )
        .unwrap();
        Snippet::new(SnippetKind::Before, 0, marker, code)
    }

    #[test]
    fn method_arguments_by_kind_and_guard() {
        let method = parse_method(
            r#"
            method static f (Ljava/lang/String;ZJLjava/lang/Object;)V
              return
            "#,
        )
        .unwrap();
        let snippet = snippet("METHOD_ARGS", Box::new(BodyMarker));
        let shadows = Shadow::mark(snippet.marker.as_ref(), &method);
        let markings = vec![SnippetMarking {
            snippet: &snippet,
            shadows,
        }];

        let instances = ProcessorInstances::resolve(&method, &markings).unwrap();
        assert_eq!(instances.len(), 1);
        let apply = *snippet.code.processor_applications.keys().next().unwrap();
        let key = ShadowKey {
            snippet: 0,
            shadow: 0,
        };
        let instance = instances.get(key, apply).unwrap();
        assert_eq!(instance.mode, ArgumentProcessorMode::MethodArgs);

        // The string (first) and the boolean: the long has no method, the last object is
        // rejected by the guard
        let applied: Vec<(usize, ArgProcessorKind)> = instance
            .methods
            .iter()
            .map(|method| (method.position, method.kind))
            .collect();
        assert_eq!(
            applied,
            vec![(0, ArgProcessorKind::Object), (1, ArgProcessorKind::Boolean)]
        );
        assert!(instance.methods.iter().all(|method| method.total_count == 4));
    }

    #[test]
    fn call_site_arguments_need_an_invocation() {
        let method = parse_method(
            r#"
            method static f ()V
              iconst_1
              invokestatic A.g (I)V
              iconst_2
              pop
              return
            "#,
        )
        .unwrap();

        let invokes = BytecodeMarker::from_mnemonics("invokestatic").unwrap();
        let calls = snippet("CALLSITE_ARGS", Box::new(invokes));
        let shadows = Shadow::mark(calls.marker.as_ref(), &method);
        let markings = vec![SnippetMarking {
            snippet: &calls,
            shadows,
        }];
        let instances = ProcessorInstances::resolve(&method, &markings).unwrap();
        assert_eq!(instances.len(), 1);

        let pops = Box::new(BytecodeMarker::from_mnemonics("pop").unwrap());
        let pops = snippet("CALLSITE_ARGS", pops);
        let shadows = Shadow::mark(pops.marker.as_ref(), &method);
        let markings = vec![SnippetMarking {
            snippet: &pops,
            shadows,
        }];
        assert!(matches!(
            ProcessorInstances::resolve(&method, &markings),
            Err(Error::InvalidMarker(_))
        ));
    }
}
