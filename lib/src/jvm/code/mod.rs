//! Method bodies as mutable instruction lists
//!
//! ### Structure
//!
//! Weaving is mostly about inserting code at precise points and then fixing everything that
//! pointed into the method: jump targets, exception ranges, analysis frames. To keep those
//! references stable, a method body is an [`InsnList`]: an arena of [`Node`]s threaded into a
//! doubly linked list and addressed through [`InsnId`] handles. Nodes are either
//!
//!   - real instructions ([`crate::jvm::Instruction`] and [`crate::jvm::BranchInstruction`]), or
//!   - virtual nodes (labels and line numbers) which take up no space in the bytecode.
//!
//! Code coming from elsewhere (snippets, argument processors, the original body of a method) is
//! assembled in its own list and spliced in, which hands back the mapping from old to new handles.
//!
//! ### Listings
//!
//! [`parse_method`] and [`print_method`] convert to and from a small assembly format, which is
//! what the tests and the command line driver use.

mod builders;
mod insn_list;
mod listing;
mod method;

pub use builders::*;
pub use insn_list::*;
pub use listing::*;
pub use method::*;
