//! Snippets and argument processors, prepared for weaving
//!
//! Snippet methods arrive as plain method code. Before they can be inlined they go through
//! [`UnprocessedCode::process`], which turns them into a [`Code`] template: returns become jumps
//! to the end, thread locals become fields of the current thread, and every use of a local
//! variable, static context, or argument processor is recorded. The weaver then clones the
//! template once per weaving site.

pub mod context;
mod processor;
mod template;

pub use processor::*;
pub use template::*;

use crate::shadow::Marker;
use std::fmt;

/// Where a snippet is woven relative to its shadow
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SnippetKind {
    /// At the start of the region
    Before,

    /// At every exit of the region, normal or exceptional
    After,

    /// At every normal exit of the region
    AfterReturning,

    /// When the region exits by throwing
    AfterThrowing,
}

/// Snippet ready to be woven
pub struct Snippet {
    /// Internal name of the class declaring the snippet
    pub class_name: String,
    pub method_name: String,
    pub kind: SnippetKind,

    /// Snippets with a lower order end up closer to the marked code
    pub order: i32,
    pub marker: Box<dyn Marker + Send + Sync>,
    pub code: SnippetCode,
}

impl Snippet {
    pub fn new(
        kind: SnippetKind,
        order: i32,
        marker: Box<dyn Marker + Send + Sync>,
        code: SnippetCode,
    ) -> Snippet {
        Snippet {
            class_name: code.code.class_name.clone(),
            method_name: code.code.method_name.clone(),
            kind,
            order,
            marker,
            code,
        }
    }

    /// `Class.method` as used in diagnostics
    pub fn display_name(&self) -> String {
        format!("{}.{}", self.class_name, self.method_name)
    }
}

impl fmt::Debug for Snippet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Snippet")
            .field("class_name", &self.class_name)
            .field("method_name", &self.method_name)
            .field("kind", &self.kind)
            .field("order", &self.order)
            .finish()
    }
}
