//! Instrumentation of whole methods and classes
//!
//! The [`Weaver`] only weaves. Around it, an [`Instrumenter`] marks methods with every snippet,
//! keeps the original code behind a bypass check, recomputes the maximums and reverts methods that
//! grew too large. For `java/lang/Thread`, it also adds the thread local fields.

use crate::fixup::{create_bypass, fit_method_size};
use crate::jvm::code::{ClassCode, MethodCode};
use crate::jvm::{MethodAccessFlags, RenderDescriptor};
use crate::localvar::{lower_thread_locals, ThreadLocalVar, THREAD_CLASS};
use crate::pe::compute_maxs;
use crate::shadow::Shadow;
use crate::snippet::Snippet;
use crate::weaver::{CodeOptions, Error, SnippetMarking, Weaver};
use log::{debug, trace};
use std::collections::BTreeSet;

/// What instrumenting a method did
#[derive(Debug)]
pub enum MethodOutcome {
    /// No snippet matched anything in the method
    Unchanged,
    Instrumented,

    /// The method grew too large, so it was given back its original code
    Reverted(Error),
}

/// What instrumenting a class did
#[derive(Debug, Default)]
pub struct ClassReport {
    /// Methods that got instrumented, as `name` followed by descriptor
    pub changed_methods: BTreeSet<String>,

    /// Methods left alone because they would have become too large
    pub reverted: Vec<Error>,

    /// Whether anything changed (thread local fields count)
    pub class_changed: bool,
}

pub struct Instrumenter {
    weaver: Weaver,
    snippets: Vec<Snippet>,
}

impl Instrumenter {
    pub fn new(weaver: Weaver, snippets: Vec<Snippet>) -> Instrumenter {
        Instrumenter { weaver, snippets }
    }

    pub fn weaver(&self) -> &Weaver {
        &self.weaver
    }

    pub fn snippets(&self) -> &[Snippet] {
        &self.snippets
    }

    /// Mark a method with every snippet and weave those that matched
    pub fn instrument_method(&self, method: &mut MethodCode) -> Result<MethodOutcome, Error> {
        if method
            .access_flags
            .intersects(MethodAccessFlags::ABSTRACT | MethodAccessFlags::NATIVE)
            || method.instructions.is_empty()
        {
            return Ok(MethodOutcome::Unchanged);
        }

        let mut markings: Vec<SnippetMarking> = vec![];
        for snippet in &self.snippets {
            let shadows = Shadow::mark(snippet.marker.as_ref(), method);
            trace!(
                "{} marks {} shadow(s) in {}",
                snippet.display_name(),
                shadows.len(),
                method.display_name()
            );
            if !shadows.is_empty() {
                markings.push(SnippetMarking { snippet, shadows });
            }
        }
        if markings.is_empty() {
            debug!("skipping unaffected method {}", method.display_name());
            return Ok(MethodOutcome::Unchanged);
        }

        let original = method.clone();
        self.weaver.instrument(method, &mut markings)?;

        let settings = self.weaver.settings();
        if settings.code_options.contains(CodeOptions::CREATE_BYPASS) {
            create_bypass(method, &original);
        }

        // Slots the weaver allocated stay allocated even if nothing uses them anymore
        let max_locals = method.max_locals;
        compute_maxs(method);
        method.max_locals = method.max_locals.max(max_locals);

        match fit_method_size(method, &original, settings) {
            Ok(()) => Ok(MethodOutcome::Instrumented),
            Err(err @ Error::MethodTooLarge { .. }) => Ok(MethodOutcome::Reverted(err)),
            Err(err) => Err(err),
        }
    }

    /// Instrument every method of a class
    pub fn instrument_class(&self, class: &mut ClassCode) -> Result<ClassReport, Error> {
        let mut report = ClassReport::default();
        for method in &mut class.methods {
            match self.instrument_method(method)? {
                MethodOutcome::Unchanged => (),
                MethodOutcome::Instrumented => {
                    report
                        .changed_methods
                        .insert(format!("{}{}", method.name, method.descriptor.render()));
                }
                MethodOutcome::Reverted(err) => report.reverted.push(err),
            }
        }
        report.class_changed = !report.changed_methods.is_empty();

        if class.name == THREAD_CLASS {
            let thread_locals = self.thread_locals();
            if !thread_locals.is_empty() {
                lower_thread_locals(class, thread_locals.iter());
                report.class_changed = true;
            }
        }
        Ok(report)
    }

    /// Thread locals to add to `java/lang/Thread`: those the snippets use, plus the bypass flag
    fn thread_locals(&self) -> Vec<ThreadLocalVar> {
        let vars = self.weaver.vars();
        let mut thread_locals = vec![];
        let options = self.weaver.settings().code_options;
        if options.contains(CodeOptions::DYNAMIC_BYPASS) {
            thread_locals.push(ThreadLocalVar::dynamic_bypass());
        }

        let used: BTreeSet<&String> = self
            .snippets
            .iter()
            .flat_map(|snippet| snippet.code.code.thread_locals.iter())
            .collect();
        thread_locals.extend(
            used.into_iter()
                .filter_map(|id| vars.thread_local(id))
                .cloned(),
        );
        thread_locals
    }
}
