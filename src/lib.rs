//! A compiler backend for a small language of integers, booleans, functions
//! and heap allocated tuples. Programs arrive as an already built tree and
//! leave as AT&T x86-64 assembly.

pub mod backend;
pub mod compile;
pub mod config;
pub mod error;
pub mod frontend;
pub mod index;
pub mod middle;

pub use compile::{compile, compile_to_x86};
pub use config::Config;
pub use error::{CompileError, CompileResult};
