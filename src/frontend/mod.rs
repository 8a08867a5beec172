//! The source language as the backend receives it: an already built tree of
//! interned names.

pub mod ast;
pub mod intern;
