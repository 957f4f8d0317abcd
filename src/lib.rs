//! ioforge - flexible IO workload generator and benchmark harness
//!
//! ioforge spawns independent workers, each executing a programmable mix of
//! read/write/trim operations against files or block devices through a
//! pluggable IO engine, while collecting fine-grained latency, bandwidth,
//! and error statistics.
//!
//! # Architecture
//!
//! - **Workers**: one thread per job instance, own everything they touch
//! - **Pluggable engines**: sync pread/pwrite, io_uring, mock for tests
//! - **Generators**: sequential/random/zoned offsets, weighted block
//!   sizes, mixed read/write/trim direction selection
//! - **Statistics**: log-linear percentile histograms, running latency
//!   stats, depth maps, per-sample logs
//! - **Verification**: self-describing block headers, write history with
//!   extent-precise supersession, optional async verify offload

pub mod config;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod ioq;
pub mod output;
pub mod rate;
pub mod rng;
pub mod stats;
pub mod supervisor;
pub mod target;
pub mod util;
pub mod verify;
pub mod worker;

// Re-export commonly used types
pub use config::Options;
pub use error::{Error, Result};
pub use supervisor::Supervisor;
