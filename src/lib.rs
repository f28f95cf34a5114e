#[macro_use]
extern crate async_trait;

#[cfg(test)]
pub(crate) mod test_util;

pub mod cache;
pub mod configuration;
pub mod document;
pub mod memory;
pub mod operation;
pub mod pipeline;
pub mod run;
pub mod runner;
pub mod scheduler;
pub mod settings;
pub mod stats;
pub mod store;

/// The random generator owned by every worker.
pub type RngGen = rand_pcg::Pcg64Mcg;
