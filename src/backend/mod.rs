//! The backend lowers the control flow graph to x86-64. Instructions are first
//! selected over variables, then every variable is given a home by a graph
//! coloring allocator. What cannot be encoded is patched, and each function
//! is wrapped in the code that builds and tears down its frame.

pub mod assemblers;
pub mod emulator;
pub mod interference;
pub mod liveness;
pub mod patch;
pub mod prelude;
pub mod regalloc;
pub mod select;
pub mod targets;
pub mod x86;
