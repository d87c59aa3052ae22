//! Contract with the remote simulation service and an in-process dry-run implementation

pub mod client;
pub mod dry_run;
pub mod types;

pub use client::*;
pub use dry_run::*;
pub use types::*;
