pub mod encoder;
pub mod registry;
pub mod types;

pub use encoder::*;
pub use registry::*;
pub use types::*;
