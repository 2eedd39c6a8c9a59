//! Weaving of instrumentation snippets into JVM method bytecode
//!
//! Snippets are small static methods meant to run at some place in other methods: before a
//! method body, after every call, when a basic block is entered, and so on. Where exactly is
//! decided by a [`shadow::Marker`]. This crate takes methods as instruction lists (see
//! [`jvm::code`]) and inlines the matching snippets into them, resolving everything the snippet
//! code asks of its context along the way:
//!
//!   - static context values (method name, basic block index, ...) become constants
//!   - dynamic context calls (stack values, arguments, locals, fields) become the bytecode that
//!     fetches the value at the weaving location
//!   - argument processors get inlined once per argument they apply to
//!   - synthetic locals become local variables of the instrumented method
//!
//! Woven code is then simplified by partial evaluation ([`pe`]). The [`instrumenter`] wraps all
//! of this for whole methods and classes.

pub mod cfg;
pub mod fixup;
pub mod instrumenter;
pub mod jvm;
pub mod localvar;
pub mod pe;
pub mod shadow;
pub mod snippet;
pub mod util;
pub mod weaver;
