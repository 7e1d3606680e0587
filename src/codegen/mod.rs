//! Assembling classes, one method at a time
//!
//! [`ClassAssembler`] owns the class being generated (its constant pool, fields, and methods) and
//! hands out [`MethodAssembler`]s to generate code into methods. Code generation is driven by a
//! simulated operand stack, so callers never compute `max_stack` or branch offsets themselves.
//!
//! Methods that end up too long for the class file format are transparently split into private
//! sub-methods, either as they are being generated (see `Settings::overflow_threshold`) or once
//! they are completed (see `Settings::split_length`).

mod analysis;
mod cast;
mod class;
mod code_buffer;
mod conditional;
mod method;
mod opcode;
mod settings;
mod split;
mod stack;

pub use class::ClassAssembler;
pub use code_buffer::{CodeBuffer, CodePatch};
pub use method::{DescribedMethod, InvokeKind, LocalField, MethodAssembler, MethodId};
pub use opcode::{Opcode, OpcodeInfo, StackEffect};
pub use settings::Settings;
