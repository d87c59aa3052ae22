//! Workers pull homogeneous batches from a shared scheduler and drive them
//! through the remote simulation service until every task is settled.

pub mod types;
pub mod worker;


pub use types::*;
pub use worker::*;
