pub mod client;
pub mod offline;
pub mod prompts;
pub mod retry;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use client::*;
pub use offline::*;
pub use prompts::*;
pub use retry::*;
pub use validation::*;
