//! CT Hammer: load and stress testing for Certificate Transparency logs
//!
//! The hammer drives a log's public API with a randomized, weighted mix of
//! submissions and reads, and checks what the log returns:
//!
//! 1. **Submissions** - fresh certificates and pre-certificates are added in
//!    concurrent bursts, and a spaced sample of their SCTs is remembered
//! 2. **Inclusion** - once a remembered SCT's merge delay has passed, the log
//!    must prove the leaf is in the tree
//! 3. **Consistency** - recently observed tree heads must be consistent with
//!    the current one
//!
//! # Architecture
//!
//! The log is reached only through the [`LogClient`] trait. A real deployment
//! plugs in an HTTP client; [`SimulatedLog`] answers from memory with seeded
//! fault injection for tests and dry runs.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ct_hammer::{config, ClientPool, Hammer, SimConfig, SimulatedLog, SystemClock};
//! use tokio_util::sync::CancellationToken;
//!
//! let log = Arc::new(SimulatedLog::new(SimConfig::default(), Arc::new(SystemClock)));
//! let hammer = Hammer::new(config::load_profile("proofs")?, ClientPool::single(log))?;
//!
//! let summary = hammer.run(CancellationToken::new()).await?;
//! assert_eq!(summary.total_errs, 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod fanout;
mod hammer;
mod ops;

pub mod chain;
pub mod client;
pub mod clock;
pub mod config;
pub mod history;
pub mod merkle;
pub mod operation;
pub mod pending;
pub mod sim;
pub mod stats;
pub mod types;

pub use chain::{ChainError, ChainGenerator, PrecertChain, SyntheticChainGenerator};
pub use client::{ClientError, ClientPool, ClientResult, LogClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, HammerConfig};
pub use error::{HammerError, HammerResult, OpError};
pub use fanout::add_multiple;
pub use hammer::{Hammer, HammerBuilder, HammerSummary, RoundOutcome};
pub use operation::{Entrypoint, OperationBias};
pub use sim::{SimConfig, SimulatedLog};
pub use stats::LogStats;
