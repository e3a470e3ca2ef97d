pub mod curve;
pub mod errors;
pub mod parameters;

pub use curve::*;
pub use errors::*;
pub use parameters::*;
