mod attribute;
mod class;
mod constants;
mod member;
mod serialize;
mod version;

pub use attribute::*;
pub use class::*;
pub use constants::*;
pub use member::*;
pub use serialize::*;
pub use version::*;
