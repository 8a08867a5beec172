//! Types are checked here and the tree is simplified step by step until it
//! can be turned into a control flow graph of flat statements.

pub mod cir;
pub mod expose_allocation;
pub mod flatten;
pub mod interpreter;
pub mod ty;
pub mod type_check;
