//! The hammer: runs scheduled operations against one log.
//!
//! A [`Hammer`] runs `operations` rounds one after another. Each round picks an
//! entry point from the bias, then executes it, retrying failures for as long
//! as the configuration allows. A background task logs a status line at a fixed
//! interval while the run is in progress.
//!
//! State is split in two: the submitted-cert queue sits behind its own lock so
//! concurrent submissions can offer to it, and everything else sits behind one
//! async read/write lock that each attempt holds for writing and the reporter
//! takes for reading.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::chain::{ChainGenerator, SyntheticChainGenerator};
use crate::client::ClientPool;
use crate::clock::{Clock, SystemClock};
use crate::config::HammerConfig;
use crate::error::{HammerError, HammerResult, OpError};
use crate::history::TreeHeadHistory;
use crate::operation::{Entrypoint, OperationBias};
use crate::ops;
use crate::pending::PendingCerts;
use crate::stats::{LogStats, STATUS_FAILED_DEPENDENCY, STATUS_OK};
use crate::types::SignedTreeHead;

/// Collaborators and lock-free state shared by all tasks of a run.
pub(crate) struct Shared {
    pub(crate) config: HammerConfig,
    pub(crate) pool: ClientPool,
    pub(crate) chains: Arc<dyn ChainGenerator>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) pending: PendingCerts,
}

/// Mutable run state, guarded by the hammer's read/write lock.
pub(crate) struct HammerState {
    pub(crate) prefix: String,
    pub(crate) bias: OperationBias,
    pub(crate) stats: LogStats,
    pub(crate) sths: TreeHeadHistory,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) total_ops: u64,
    pub(crate) total_errs: u64,
}

impl HammerState {
    /// State at the start of a run: configured bias, empty counters and
    /// history, and the RNG freshly seeded.
    fn new(config: &HammerConfig) -> Self {
        Self {
            prefix: config.log_prefix.clone(),
            bias: config.bias.clone(),
            stats: LogStats::new(config.log_id),
            sths: TreeHeadHistory::new(),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            total_ops: 0,
            total_errs: 0,
        }
    }
}

impl fmt::Display for HammerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: lastSTH.size=", self.prefix)?;
        match self.sths.latest() {
            Some(sth) => write!(f, "{}", sth.tree_size)?,
            None => f.write_str("n/a")?,
        }
        write!(f, " ops: total={} errs={}", self.total_ops, self.total_errs)?;
        for ep in Entrypoint::ALL {
            if self.bias.weight(ep) > 0 {
                write!(
                    f,
                    " {ep}={}/{}",
                    self.stats.responses(ep, STATUS_OK),
                    self.stats.requests(ep)
                )?;
            }
        }
        Ok(())
    }
}

/// How a round ended, short of a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// The operation completed with `status`.
    Succeeded {
        /// Entry point that ran.
        op: Entrypoint,
        /// HTTP-like status it produced.
        status: u16,
    },
    /// The operation's preconditions were not met; nothing was checked.
    Skipped {
        /// Entry point that was chosen.
        op: Entrypoint,
    },
}

/// Totals for a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HammerSummary {
    /// Log prefix.
    pub prefix: String,
    /// Rounds run.
    pub rounds: u64,
    /// Rounds that completed an operation.
    pub successes: u64,
    /// Rounds that were skipped.
    pub skips: u64,
    /// Operation attempts, including retries.
    pub total_ops: u64,
    /// Failed attempts.
    pub total_errs: u64,
    /// Size of the most recently observed tree, if any.
    pub latest_tree_size: Option<u64>,
    /// Final counters.
    pub stats: LogStats,
}

impl HammerSummary {
    /// Print a human-readable summary to stdout.
    pub fn print_summary(&self) {
        println!("\n=== Hammer Summary: {} ===", self.prefix);
        println!("Rounds:            {}", self.rounds);
        println!("Succeeded:         {}", self.successes);
        println!("Skipped:           {}", self.skips);
        println!("Attempts:          {}", self.total_ops);
        println!("Errors:            {}", self.total_errs);
        match self.latest_tree_size {
            Some(size) => println!("Latest tree size:  {size}"),
            None => println!("Latest tree size:  n/a"),
        }
        println!("\nPer entry point (ok/skipped/requests):");
        for ep in Entrypoint::ALL {
            let reqs = self.stats.requests(ep);
            if reqs == 0 {
                continue;
            }
            println!(
                "  {:<18} {}/{}/{}",
                ep.name(),
                self.stats.responses(ep, STATUS_OK),
                self.stats.responses(ep, STATUS_FAILED_DEPENDENCY),
                reqs
            );
        }
    }
}

/// Builder for [`Hammer`].
pub struct HammerBuilder {
    config: HammerConfig,
    pool: ClientPool,
    chains: Option<Arc<dyn ChainGenerator>>,
    clock: Option<Arc<dyn Clock>>,
}

impl HammerBuilder {
    /// Use `chains` to generate submissions instead of synthetic chains.
    #[must_use]
    pub fn chain_generator(mut self, chains: Arc<dyn ChainGenerator>) -> Self {
        self.chains = Some(chains);
        self
    }

    /// Read time from `clock` instead of the system clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Override the configured RNG seed.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Builds the hammer.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot drive a run.
    pub fn build(self) -> HammerResult<Hammer> {
        self.config.validate()?;

        let state = HammerState::new(&self.config);
        let shared = Shared {
            chains: self
                .chains
                .unwrap_or_else(|| Arc::new(SyntheticChainGenerator::new(self.config.log_prefix.clone()))),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            config: self.config,
            pool: self.pool,
            pending: PendingCerts::new(),
        };

        Ok(Hammer {
            shared: Arc::new(shared),
            state: Arc::new(RwLock::new(state)),
        })
    }
}

/// Drives randomized load against one log.
pub struct Hammer {
    shared: Arc<Shared>,
    state: Arc<RwLock<HammerState>>,
}

impl Hammer {
    /// Creates a hammer with synthetic chains and the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot drive a run.
    pub fn new(config: HammerConfig, pool: ClientPool) -> HammerResult<Self> {
        Self::builder(config, pool).build()
    }

    /// Starts building a hammer.
    #[must_use]
    pub fn builder(config: HammerConfig, pool: ClientPool) -> HammerBuilder {
        HammerBuilder {
            config,
            pool,
            chains: None,
            clock: None,
        }
    }

    /// The configuration this hammer runs with.
    #[must_use]
    pub fn config(&self) -> &HammerConfig {
        &self.shared.config
    }

    /// Submitted certs awaiting an inclusion check.
    #[must_use]
    pub fn pending(&self) -> &PendingCerts {
        &self.shared.pending
    }

    /// Snapshot of the counters.
    pub async fn stats(&self) -> LogStats {
        self.state.read().await.stats.clone()
    }

    /// Most recently observed tree head.
    pub async fn latest_sth(&self) -> Option<SignedTreeHead> {
        self.state.read().await.sths.latest().cloned()
    }

    /// Attempt and failure totals.
    pub async fn totals(&self) -> (u64, u64) {
        let state = self.state.read().await;
        (state.total_ops, state.total_errs)
    }

    /// The current status line.
    pub async fn status_line(&self) -> String {
        self.state.read().await.to_string()
    }

    /// Replaces the operation mix for subsequent rounds driven through
    /// [`Hammer::retry_one_op`]. [`Hammer::run`] starts from the configured mix.
    ///
    /// # Errors
    ///
    /// Returns an error if no entry point in `bias` has a positive weight.
    pub async fn set_bias(&self, bias: OperationBias) -> HammerResult<()> {
        if !bias.is_schedulable() {
            return Err(crate::config::ConfigError::Invalid {
                message: format!("{}: no operation has a positive weight", self.shared.config.log_prefix),
            }
            .into());
        }
        self.state.write().await.bias = bias;
        Ok(())
    }

    /// Runs the configured number of rounds.
    ///
    /// Every run starts from scratch: counters, tree-head history, pending
    /// certs and the bias are reset, and the RNG is reseeded, so repeated runs
    /// of one hammer are independent of each other.
    ///
    /// # Errors
    ///
    /// Returns the first terminal failure, or [`HammerError::Cancelled`] if
    /// `cancel` fires first.
    pub async fn run(&self, cancel: CancellationToken) -> HammerResult<HammerSummary> {
        let config = &self.shared.config;
        info!(
            prefix = %config.log_prefix,
            operations = config.operations,
            seed = config.seed,
            "starting hammer"
        );
        *self.state.write().await = HammerState::new(config);
        self.shared.pending.clear();

        let stop_reporter = cancel.child_token();
        let reporter = tokio::spawn(report_stats(
            Arc::clone(&self.state),
            config.emit_interval(),
            stop_reporter.clone(),
        ));

        let result = self.run_rounds(&cancel).await;

        stop_reporter.cancel();
        if let Err(e) = reporter.await {
            warn!(prefix = %config.log_prefix, error = %e, "stats reporter failed");
        }

        match &result {
            Ok(summary) => info!(
                prefix = %config.log_prefix,
                rounds = summary.rounds,
                total_ops = summary.total_ops,
                total_errs = summary.total_errs,
                "hammer finished"
            ),
            Err(e) => warn!(prefix = %config.log_prefix, error = %e, "hammer stopped"),
        }
        result
    }

    async fn run_rounds(&self, cancel: &CancellationToken) -> HammerResult<HammerSummary> {
        let mut successes = 0;
        let mut skips = 0;
        for round in 0..self.shared.config.operations {
            if cancel.is_cancelled() {
                return Err(HammerError::Cancelled);
            }
            match self.retry_one_op(cancel).await? {
                RoundOutcome::Succeeded { op, status } => {
                    trace!(round, op = %op, status, "round succeeded");
                    successes += 1;
                }
                RoundOutcome::Skipped { op } => {
                    trace!(round, op = %op, "round skipped");
                    skips += 1;
                }
            }
        }

        let state = self.state.read().await;
        Ok(HammerSummary {
            prefix: state.prefix.clone(),
            rounds: self.shared.config.operations,
            successes,
            skips,
            total_ops: state.total_ops,
            total_errs: state.total_errs,
            latest_tree_size: state.sths.latest().map(|sth| sth.tree_size),
            stats: state.stats.clone(),
        })
    }

    /// Runs one round: picks an entry point and executes it, retrying failures
    /// while errors are ignored and the retry budget lasts.
    ///
    /// # Errors
    ///
    /// Returns an error if the round ends in a terminal failure or is
    /// cancelled.
    pub async fn retry_one_op(&self, cancel: &CancellationToken) -> HammerResult<RoundOutcome> {
        let config = &self.shared.config;
        let started = Instant::now();
        let ep = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            state.bias.choose(&mut state.rng)
        };

        loop {
            if cancel.is_cancelled() {
                return Err(HammerError::Cancelled);
            }

            let mut guard = self.state.write().await;
            let state = &mut *guard;
            state.total_ops += 1;
            let err = match ops::perform(ep, &self.shared, state, cancel).await {
                Ok(status) => {
                    state.stats.record(ep, status);
                    debug!(prefix = %state.prefix, op = %ep, status, "operation completed");
                    return Ok(RoundOutcome::Succeeded { op: ep, status });
                }
                Err(OpError::Skip(reason)) => {
                    state.stats.record(ep, STATUS_FAILED_DEPENDENCY);
                    trace!(prefix = %state.prefix, op = %ep, reason, "operation skipped");
                    return Ok(RoundOutcome::Skipped { op: ep });
                }
                Err(e) => e,
            };
            state.total_errs += 1;
            drop(guard);

            if matches!(err, OpError::Cancelled) {
                return Err(HammerError::Cancelled);
            }
            if err.is_fatal() || !config.ignore_errors {
                return Err(HammerError::Operation {
                    prefix: config.log_prefix.clone(),
                    op: ep,
                    source: err,
                });
            }
            let budget = config.max_retry();
            if started.elapsed() > budget {
                warn!(prefix = %config.log_prefix, op = %ep, error = %err, "giving up on operation");
                return Err(HammerError::RetryBudgetExhausted {
                    prefix: config.log_prefix.clone(),
                    op: ep,
                    budget,
                    source: err,
                });
            }
            warn!(prefix = %config.log_prefix, op = %ep, error = %err, "operation failed, retrying");
        }
    }
}

impl fmt::Debug for Hammer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hammer")
            .field("prefix", &self.shared.config.log_prefix)
            .field("pool", &self.shared.pool)
            .finish_non_exhaustive()
    }
}

/// Logs the status line every `every` until `stop` fires.
async fn report_stats(state: Arc<RwLock<HammerState>>, every: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            () = stop.cancelled() => {
                debug!("stats reporter stopped");
                return;
            }
            _ = ticker.tick() => {
                let state = state.read().await;
                info!("{}", *state);
            }
        }
    }
}
