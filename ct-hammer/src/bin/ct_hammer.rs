//! CT Hammer binary.
//!
//! Runs a hammer against an in-memory simulated log. Useful for exercising a
//! profile's operation mix and the hammer's retry behaviour without a real
//! log.
//!
//! ```bash
//! ct-hammer --profile proofs --operations 5000
//! ct-hammer --config hammer.toml --sim-error-rate 0.05 --log-level debug
//! ct-hammer --list-profiles
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use ct_hammer::config::{self, HammerConfig};
use ct_hammer::{ClientPool, Hammer, SimConfig, SimulatedLog, SystemClock};

/// Load and stress testing for Certificate Transparency logs.
#[derive(Parser, Debug)]
#[command(name = "ct-hammer")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Built-in profile to run.
    #[arg(long, default_value = "default", conflicts_with = "config")]
    profile: String,

    /// TOML config file to run instead of a built-in profile.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the number of rounds.
    #[arg(long)]
    operations: Option<u64>,

    /// Override the RNG seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Retry failed operations instead of stopping.
    #[arg(long)]
    ignore_errors: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Probability that a simulated log call fails.
    #[arg(long, default_value = "0.0", value_parser = parse_rate)]
    sim_error_rate: f64,

    /// Probability that a simulated proof comes back corrupted.
    #[arg(long, default_value = "0.0", value_parser = parse_rate)]
    sim_corrupt_rate: f64,

    /// Milliseconds before the simulated log merges a submission.
    #[arg(long, default_value = "0")]
    sim_merge_delay_ms: u64,

    /// List built-in profiles and exit.
    #[arg(long)]
    list_profiles: bool,
}

/// Parses a probability in `[0, 1]`.
fn parse_rate(s: &str) -> Result<f64, String> {
    let rate: f64 = s.parse().map_err(|e| format!("invalid rate '{s}': {e}"))?;
    if !(0.0..=1.0).contains(&rate) {
        return Err(format!("rate must be between 0 and 1, got {s}"));
    }
    Ok(rate)
}

fn load_config(args: &Args) -> Result<HammerConfig, config::ConfigError> {
    let mut config = match &args.config {
        Some(path) => HammerConfig::from_file(path)?,
        None => config::load_profile(&args.profile)?,
    };
    if let Some(operations) = args.operations {
        config.operations = operations;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    config.ignore_errors |= args.ignore_errors;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.list_profiles {
        for name in config::list_profiles() {
            let profile = config::load_profile(name)?;
            println!("{name:<12} {}", profile.description);
        }
        return Ok(());
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&args)?;
    info!(
        profile = %config.name,
        prefix = %config.log_prefix,
        operations = config.operations,
        sim_error_rate = args.sim_error_rate,
        "Starting CT hammer against simulated log"
    );

    let clock = Arc::new(SystemClock);
    let log = Arc::new(SimulatedLog::new(
        SimConfig {
            seed: config.seed,
            error_rate: args.sim_error_rate,
            corrupt_proof_rate: args.sim_corrupt_rate,
            merge_delay: Duration::from_millis(args.sim_merge_delay_ms),
            ..SimConfig::default()
        },
        clock.clone(),
    ));
    let hammer = Hammer::builder(config, ClientPool::single(log))
        .clock(clock)
        .build()?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping hammer");
            on_signal.cancel();
        }
    });

    let summary = hammer.run(cancel).await?;
    summary.print_summary();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate_accepts_probabilities() {
        assert_eq!(parse_rate("0").unwrap(), 0.0);
        assert_eq!(parse_rate("0.05").unwrap(), 0.05);
        assert_eq!(parse_rate("1.0").unwrap(), 1.0);
    }

    #[test]
    fn test_parse_rate_rejects_non_probabilities() {
        for bad in ["NaN", "nan", "inf", "-inf", "-0.1", "1.5", "often"] {
            assert!(parse_rate(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_cli_rejects_nan_error_rate() {
        assert!(Args::try_parse_from(["ct-hammer", "--sim-error-rate", "NaN"]).is_err());
        let args = Args::try_parse_from(["ct-hammer", "--sim-corrupt-rate", "0.5"]).unwrap();
        assert_eq!(args.sim_corrupt_rate, 0.5);
    }
}
