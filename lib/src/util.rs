mod slot_stack;

pub use slot_stack::*;
