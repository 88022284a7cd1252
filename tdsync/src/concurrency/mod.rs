pub mod retry;
pub mod shutdown;
pub mod signal;
