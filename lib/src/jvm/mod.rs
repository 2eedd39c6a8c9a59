//! JVM types, bytecode, and method bodies
//!
//! Only the pieces a bytecode rewriter needs are modelled: descriptors, the instruction set, and
//! method code with its exception table. Reading and writing class files is left to whatever
//! hands methods to the weaver.

mod access_flags;
pub mod analysis;
mod bytecode;
pub mod code;
mod descriptors;
mod errors;

pub use access_flags::*;
pub use bytecode::*;
pub use descriptors::*;
pub use errors::*;
