//! minic-core: the instruction representation and stack machine shared
//! between the compiler and anything that wants to run its output.
//!
//! # Modules
//!
//! - `cell`: opcodes and the tagged-cell [`Program`] buffer the compiler
//!   emits into (with in-place backpatching support).
//! - `vm`: the linear-memory stack machine that executes a [`Program`].
//!
//! The VM is untyped: every piece of type-directed decision-making (load
//! width, pointer-arithmetic scaling, member offsets) happens in the
//! compiler, which bakes the result down to plain opcodes and integers.

pub mod cell;
pub mod vm;

pub use cell::{Cell, Opcode, Program};
pub use vm::{execute, INT_SIZE, MIN_MEMORY_CELLS};
