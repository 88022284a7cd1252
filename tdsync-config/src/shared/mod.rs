mod base;
mod retry;
mod sync;

pub use base::*;
pub use retry::*;
pub use sync::*;
