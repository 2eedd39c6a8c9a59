//! Weaving of prepared snippets into method code
//!
//! A method gets instrumented in one go, with every snippet whose marker matched something in
//! it. The order of operations matters:
//!
//!   1. static context values are computed against the method as it was marked
//!   2. argument processors are resolved against the arguments of every shadow
//!   3. every weaving location gets its own label and the method is analyzed once
//!      ([`WeavingInfo`])
//!   4. snippets are woven one shadow at a time ([`WeavingCode`]), highest order first
//!   5. synthetic locals become locals of the method and the exception table gets sorted

mod code;
mod errors;
mod info;
mod processors;
mod settings;
mod static_context;

pub use code::{WeavingCode, WeavingEnv};
pub use errors::*;
pub use info::{dup_stack, ShadowKey, WeavingInfo};
pub use processors::{ProcessorInstance, ProcessorInstances, ProcessorMethodInstance};
pub use settings::*;
pub use static_context::*;

use crate::fixup;
use crate::jvm::code::{InsnId, MethodCode, Node, TryCatchBlock};
use crate::jvm::BranchInstruction;
use crate::localvar::LocalVars;
use crate::pe::PureMethodRegistry;
use crate::shadow::Shadow;
use crate::snippet::{Snippet, SnippetKind};
use log::debug;
use std::collections::BTreeSet;

/// Shadows a snippet matched in a method
#[derive(Debug)]
pub struct SnippetMarking<'a> {
    pub snippet: &'a Snippet,
    pub shadows: Vec<Shadow>,
}

/// Weaves snippets into methods
///
/// Holds everything that is fixed for a whole instrumentation run. Weaving a method only reads
/// the weaver: per-method state lives in [`WeavingInfo`] and [`StaticContextValues`].
pub struct Weaver {
    settings: Settings,
    registry: PureMethodRegistry,
    static_contexts: StaticContexts,
    vars: LocalVars,
}

impl Weaver {
    pub fn new(settings: Settings, vars: LocalVars) -> Weaver {
        Weaver {
            settings,
            registry: PureMethodRegistry::standard(),
            static_contexts: StaticContexts::standard(),
            vars,
        }
    }

    pub fn with_static_contexts(mut self, static_contexts: StaticContexts) -> Weaver {
        self.static_contexts = static_contexts;
        self
    }

    pub fn with_registry(mut self, registry: PureMethodRegistry) -> Weaver {
        self.registry = registry;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn static_contexts(&self) -> &StaticContexts {
        &self.static_contexts
    }

    pub fn vars(&self) -> &LocalVars {
        &self.vars
    }

    /// Weave the snippets into a method
    ///
    /// The weaving regions of the shadows get rewritten along the way. A method without any
    /// shadow is left untouched.
    pub fn instrument<'a>(
        &self,
        method: &mut MethodCode,
        markings: &mut [SnippetMarking<'a>],
    ) -> Result<(), Error> {
        if markings.iter().all(|marking| marking.shadows.is_empty()) {
            return Ok(());
        }
        debug!(
            "weaving {} snippet(s) into {}",
            markings.len(),
            method.display_name()
        );

        let static_values = self.static_context_values(method, markings)?;
        let processors = ProcessorInstances::resolve(method, markings)?;
        let info = WeavingInfo::new(method, markings)?;
        let env = WeavingEnv {
            info: &info,
            static_values: &static_values,
            processors: &processors,
            partial_evaluation: self.settings.partial_evaluation,
            registry: &self.registry,
        };

        for &index in info.sorted_snippets() {
            let snippet = markings[index].snippet;
            for (shadow_index, shadow) in markings[index].shadows.iter().enumerate() {
                let key = ShadowKey {
                    snippet: index,
                    shadow: shadow_index,
                };
                let region = &shadow.weaving_region;

                if snippet.kind == SnippetKind::Before {
                    insert(&env, method, snippet, key, shadow, region.start)?;
                }
                if matches!(snippet.kind, SnippetKind::After | SnippetKind::AfterReturning) {
                    for end in region.ends.iter().flatten() {
                        insert(&env, method, snippet, key, shadow, *end)?;
                    }
                }
                if matches!(snippet.kind, SnippetKind::After | SnippetKind::AfterThrowing) {
                    weave_after_throwing(&env, method, snippet, key, shadow)?;
                }
            }
        }

        fixup::static_to_local(method, &self.vars, &referenced_synthetic_locals(markings))?;
        fixup::sort_try_catch_blocks(method)
    }

    /// Every static context value the snippets ask for, at every one of their shadows
    fn static_context_values(
        &self,
        method: &MethodCode,
        markings: &[SnippetMarking],
    ) -> Result<StaticContextValues<ShadowKey>, Error> {
        let values = StaticContextValues::new();
        for (snippet_index, marking) in markings.iter().enumerate() {
            let methods = marking.snippet.code.static_context_methods();
            if methods.is_empty() {
                continue;
            }
            for (shadow_index, shadow) in marking.shadows.iter().enumerate() {
                let key = ShadowKey {
                    snippet: snippet_index,
                    shadow: shadow_index,
                };
                let context = ShadowContext { method, shadow };
                for static_method in &methods {
                    values.get_or_compute(&key, static_method, || {
                        self.static_contexts.evaluate(static_method, &context)
                    })?;
                }
            }
        }
        Ok(values)
    }
}

/// Synthetic locals used by the snippets (and their argument processors)
fn referenced_synthetic_locals(markings: &[SnippetMarking]) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    for marking in markings.iter().filter(|m| !m.shadows.is_empty()) {
        let code = &marking.snippet.code;
        ids.extend(code.code.synthetic_locals.iter().cloned());
        for application in code.processor_applications.values() {
            for processor_method in &application.processor.methods {
                ids.extend(processor_method.code.synthetic_locals.iter().cloned());
            }
        }
    }
    ids
}

/// Weave a snippet right after `loc`
///
/// A snippet catching exceptions empties the operand stack when it does, so a non-empty stack
/// gets stored into fresh locals before and loaded back after.
fn insert<'w>(
    env: &'w WeavingEnv<'w>,
    method: &mut MethodCode,
    snippet: &'w Snippet,
    key: ShadowKey,
    shadow: &'w Shadow,
    loc: InsnId,
) -> Result<(), Error> {
    let info = env.info;
    if snippet.code.code.handles_exception && info.stack_not_empty(loc) {
        let first_slot = method.max_locals;
        let backup = info.backup_stack(loc, first_slot)?;
        let restore = info.restore_stack(loc, first_slot)?;
        method.max_locals += info.stack_height(loc);
        method.instructions.splice_before(loc, backup);
        method.instructions.splice_after(loc, restore);
    }

    let mut code = WeavingCode::new(env, snippet, key, shadow, loc);
    code.transform(method, false)?;
    let (instructions, try_catch_blocks) = code.into_parts();
    let map = method.instructions.splice_after(loc, instructions);
    method
        .try_catch_blocks
        .extend(try_catch_blocks.iter().map(|tcb| tcb.remap(&map)));
    Ok(())
}

/// Wrap the region in a catch-all handler running the snippet, then rethrowing
fn weave_after_throwing<'w>(
    env: &'w WeavingEnv<'w>,
    method: &mut MethodCode,
    snippet: &'w Snippet,
    key: ShadowKey,
    shadow: &'w Shadow,
) -> Result<(), Error> {
    let region = &shadow.weaving_region;
    let loc = region.after_throw_end;

    let mut code = WeavingCode::new(env, snippet, key, shadow, loc);
    code.transform(method, true)?;
    let (instructions, try_catch_blocks) = code.into_parts();

    let (start, handler) = catch_all_range(method, region.after_throw_start, loc)?;
    let map = method.instructions.splice_after(handler, instructions);
    method
        .try_catch_blocks
        .push(TryCatchBlock::new(start, handler, handler, None));
    method
        .try_catch_blocks
        .extend(try_catch_blocks.iter().map(|tcb| tcb.remap(&map)));
    Ok(())
}

/// Range of a handler covering `start` up to `end`, and the label of the handler
///
/// The range is adjusted so that it does not straddle the boundary of an existing range. The
/// handler goes right after `end`: if code follows, normal execution jumps over the handler.
///
/// ```text
///     <end>
///     goto RESUME         // only when code follows
/// HANDLER:
/// RESUME:
/// ```
fn catch_all_range(
    method: &mut MethodCode,
    start: InsnId,
    end: InsnId,
) -> Result<(InsnId, InsnId), Error> {
    let insns = &mut method.instructions;
    let position = |id: InsnId| {
        insns
            .index_of(id)
            .ok_or_else(|| Error::Fatal(String::from("weaving location is not in the method")))
    };

    let mut new_start = position(start)?;
    let new_end = position(end)?;
    for tcb in &method.try_catch_blocks {
        let tcb_start = position(tcb.start)?;
        let tcb_end = position(tcb.end)?;
        let before = |from: usize, to: usize| insns.has_real_between(from, to);

        if before(new_start, tcb_start) && before(tcb_start, new_end) && before(new_end, tcb_end)
        {
            new_start = tcb_start;
        } else if before(tcb_start, new_start)
            && before(new_start, tcb_end)
            && before(tcb_end, new_end)
        {
            new_start = tcb_end;
        }
    }

    let missing = || Error::Fatal(String::from("handler range is out of the method"));
    let start = insns.get(new_start).ok_or_else(missing)?;
    let end = insns.get(new_end).ok_or_else(missing)?;

    let start = if insns.node(start).is_label() {
        start
    } else {
        insns.insert_before(start, Node::Label)
    };

    let mut last = end;
    if insns.next_real(end).is_some() {
        let resume = insns.insert_after(end, Node::Label);
        last = insns.insert_after(end, Node::Branch(BranchInstruction::Goto(resume)));
    }
    let handler = insns.insert_after(last, Node::Label);
    Ok((start, handler))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{parse_method, render_node, InsnList};
    use crate::jvm::FieldType;
    use crate::localvar::{Initialize, SyntheticLocalVar};
    use crate::shadow::{BodyMarker, BytecodeMarker, Marker};
    use crate::snippet::{SnippetCode, UnprocessedCode};
    use std::collections::HashMap;

    fn snippet_with(
        kind: SnippetKind,
        order: i32,
        marker: Box<dyn Marker + Send + Sync>,
        vars: &LocalVars,
        listing: &str,
    ) -> Snippet {
        let template = UnprocessedCode::new("Instr", parse_method(listing).unwrap());
        let code = SnippetCode::prepare(
            &template,
            false,
            false,
            &HashMap::new(),
            CodeOptions::empty(),
            vars,
            &StaticContexts::standard(),
        )
        .unwrap();
        Snippet::new(kind, order, marker, code)
    }

    fn snippet(kind: SnippetKind, order: i32, listing: &str) -> Snippet {
        snippet_with(kind, order, Box::new(BodyMarker), &LocalVars::new(), listing)
    }

    fn rendered(insns: &InsnList) -> Vec<String> {
        insns
            .iter()
            .filter_map(|id| render_node(insns.node(id)))
            .collect()
    }

    fn weave(weaver: &Weaver, method: &mut MethodCode, snippets: &[&Snippet]) -> Result<(), Error> {
        let mut markings: Vec<SnippetMarking> = snippets
            .iter()
            .map(|snippet| SnippetMarking {
                snippet,
                shadows: Shadow::mark(snippet.marker.as_ref(), method),
            })
            .collect();
        weaver.instrument(method, &mut markings)
    }

    fn plain_weaver() -> Weaver {
        Weaver::new(Settings::default(), LocalVars::new())
    }

    #[test]
    fn nothing_to_weave_leaves_the_method_alone() {
        let mut method = parse_method(
            r#"
            method static f ()V
              return
            "#,
        )
        .unwrap();
        let before = method.instructions.len();
        let pops = snippet_with(
            SnippetKind::Before,
            0,
            Box::new(BytecodeMarker::from_mnemonics("pop").unwrap()),
            &LocalVars::new(),
            r#"
            method static s ()V
              iconst_1
              pop
              return
            "#,
        );
        weave(&plain_weaver(), &mut method, &[&pops]).unwrap();
        assert_eq!(method.instructions.len(), before);
        assert!(method.try_catch_blocks.is_empty());
    }

    #[test]
    fn lower_orders_end_up_closer() {
        let mut method = parse_method(
            r#"
            method static f ()V
              nop
              return
            "#,
        )
        .unwrap();
        let outer = snippet(
            SnippetKind::Before,
            10,
            r#"
            method static outer ()V
              iconst_1
              pop
              return
            "#,
        );
        let inner = snippet(
            SnippetKind::Before,
            0,
            r#"
            method static inner ()V
              iconst_2
              pop
              return
            "#,
        );
        let after = snippet(
            SnippetKind::AfterReturning,
            0,
            r#"
            method static after ()V
              iconst_3
              pop
              return
            "#,
        );

        weave(&plain_weaver(), &mut method, &[&inner, &after, &outer]).unwrap();
        assert_eq!(
            rendered(&method.instructions),
            vec![
                "iconst_1", "pop", "iconst_2", "pop", "nop", "iconst_3", "pop", "return"
            ]
        );
    }

    #[test]
    fn after_throwing_wraps_the_body() {
        let mut method = parse_method(
            r#"
            method static f ()V
              invokestatic A.g ()V
              return
            "#,
        )
        .unwrap();
        let on_throw = snippet(
            SnippetKind::AfterThrowing,
            0,
            r#"
            method static thrown ()V
              iconst_4
              pop
              return
            "#,
        );
        weave(&plain_weaver(), &mut method, &[&on_throw]).unwrap();

        assert_eq!(method.try_catch_blocks.len(), 1);
        let tcb = &method.try_catch_blocks[0];
        assert_eq!(tcb.exception, None);
        assert_eq!(tcb.end, tcb.handler);

        let insns = &method.instructions;
        assert_eq!(insns.first_real_from(tcb.start), insns.first_real());
        assert_eq!(
            rendered(insns),
            vec![
                "invokestatic A.g ()V",
                "return",
                "astore 0",
                "iconst_4",
                "pop",
                "aload 0",
                "athrow"
            ]
        );
        assert_eq!(method.max_locals, 1);
    }

    #[test]
    fn after_throwing_jumps_over_the_handler() {
        let mut method = parse_method(
            r#"
            method static f ()V
              invokestatic A.g ()V
              invokestatic A.h ()V
              return
            "#,
        )
        .unwrap();
        let calls = snippet_with(
            SnippetKind::AfterThrowing,
            0,
            Box::new(BytecodeMarker::from_mnemonics("invokestatic").unwrap()),
            &LocalVars::new(),
            r#"
            method static thrown ()V
              return
            "#,
        );
        weave(&plain_weaver(), &mut method, &[&calls]).unwrap();

        assert_eq!(method.try_catch_blocks.len(), 2);
        assert_eq!(
            rendered(&method.instructions),
            vec![
                "invokestatic A.g ()V",
                "goto",
                "astore 0",
                "aload 0",
                "athrow",
                "invokestatic A.h ()V",
                "goto",
                "astore 1",
                "aload 1",
                "athrow",
                "return"
            ]
        );
        assert_eq!(method.max_locals, 2);
    }

    #[test]
    fn synthetic_locals_become_method_locals() {
        let mut vars = LocalVars::new();
        vars.add_synthetic_local(SyntheticLocalVar::new(
            "Instr",
            "start",
            FieldType::long(),
            Initialize::Never,
        ));
        let mut method = parse_method(
            r#"
            method static f (I)V
              return
            "#,
        )
        .unwrap();
        let timer = snippet_with(
            SnippetKind::Before,
            0,
            Box::new(BodyMarker),
            &vars,
            r#"
            method static start ()V
              ldc 5L
              putstatic Instr.start J
              return
            "#,
        );
        let weaver = Weaver::new(Settings::default(), vars);
        weave(&weaver, &mut method, &[&timer]).unwrap();

        assert_eq!(
            rendered(&method.instructions),
            vec!["ldc 5L", "lstore 1", "return"]
        );
        assert_eq!(method.max_locals, 3);
    }
}
