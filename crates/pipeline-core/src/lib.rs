#![cfg_attr(not(test), warn(unused_crate_dependencies))]

//! The proof pipeline's own actors: the BlockMetadataCache, the external
//! input-building seam, the InputGenerator and Prover worker stages, and the
//! StatusSurface that reports on all of them. Wiring them into a running
//! process is [`supervisor::Supervisor`]'s job.

pub mod input_builder;
pub mod input_generator;
pub mod meta_cache;
pub mod prover;
pub mod status;
pub mod supervisor;

pub use input_builder::{CliInputBuilder, InputBuilder};
pub use input_generator::{GeneratorStatus, InputGenerator};
pub use meta_cache::BlockMetadataCache;
pub use prover::{Prover, ProverConfig, ProverStatus};
pub use status::{RpcHealthSnapshot, DEFAULT_PROVER_STUCK_THRESHOLD_SECONDS};
pub use supervisor::{Supervisor, SupervisorConfig};
