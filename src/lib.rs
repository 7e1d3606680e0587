pub mod codegen;
pub mod jvm;
pub mod util;
