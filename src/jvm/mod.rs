//! Class file model: names, descriptors, access flags, and the serialized format
//!
//! This layer knows nothing about operand stacks or method splitting. It just provides the
//! vocabulary (and the constant pool) that [`crate::codegen`] assembles classes with.

mod access_flags;
pub mod class_file;
mod descriptors;
mod errors;
mod names;

pub use access_flags::*;
pub use descriptors::*;
pub use errors::*;
pub use names::*;
