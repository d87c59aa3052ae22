pub mod provider;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use provider::*;
pub use scheduler::*;
pub use settings::*;
pub use store::*;
pub use types::*;
