//! Elastic pool of simulation workers with heartbeat-driven health checks
//! and rolling throughput statistics.

pub mod pool;
pub mod types;


pub use pool::*;
pub use types::*;
