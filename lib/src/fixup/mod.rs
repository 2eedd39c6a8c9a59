//! Rewrites applied to a method once all snippets are woven into it

mod bypass;
mod handlers;
mod method_size;
mod synthetic_locals;

pub use bypass::*;
pub use handlers::*;
pub use method_size::*;
pub use synthetic_locals::*;
