pub mod cancel;
pub mod job;
pub mod state;
pub mod stream;
pub mod types;

pub use cancel::*;
pub use job::*;
pub use state::*;
pub use stream::*;
pub use types::*;
