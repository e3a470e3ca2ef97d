pub mod knowledge;
pub mod target;

pub use knowledge::*;
pub use target::*;
