use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use govscope::{
    AnalyzerConfig, BuildOptions, Core, DistributionProfile, MetricSelector, Provenance,
};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Governance token distribution and voting analytics.
///
/// All commands print JSON to stdout; diagnostics go to stderr. Exit codes:
/// 0 success, 1 internal error, 2 invalid input, 3 success on simulated
/// fallback data, 4 cancelled.
#[derive(Parser)]
#[command(author, version, about = "Governance token analytics engine")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build, persist, and print a snapshot for one protocol
    Analyze {
        protocol: String,
        /// Holder count ceiling
        #[arg(long, default_value_t = 100)]
        limit: usize,
        /// Snapshot reference time (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<DateTime<Utc>>,
        /// Build deadline in seconds
        #[arg(long)]
        deadline_s: Option<u64>,
    },
    /// Join a metric across protocols into an aligned table
    Compare {
        #[arg(required = true, num_args = 1..)]
        protocols: Vec<String>,
        #[arg(long, default_value = "gini")]
        metric: MetricSelector,
        #[arg(long, value_parser = parse_timestamp)]
        from: Option<DateTime<Utc>>,
        #[arg(long, value_parser = parse_timestamp)]
        to: Option<DateTime<Utc>>,
    },
    /// Print a fully synthetic snapshot
    Simulate {
        profile: ProfileArg,
        #[arg(long, default_value = "compound")]
        protocol: String,
        #[arg(long, default_value_t = 100)]
        holders: usize,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Print a metric time series from the snapshot store
    Series {
        protocol: String,
        #[arg(long)]
        metric: MetricSelector,
        #[arg(long, value_parser = parse_timestamp)]
        from: Option<DateTime<Utc>>,
        #[arg(long, value_parser = parse_timestamp)]
        to: Option<DateTime<Utc>>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProfileArg {
    PowerLaw,
    ProtocolDominated,
    Community,
}

impl From<ProfileArg> for DistributionProfile {
    fn from(profile: ProfileArg) -> Self {
        match profile {
            ProfileArg::PowerLaw => DistributionProfile::PowerLaw,
            ProfileArg::ProtocolDominated => DistributionProfile::ProtocolDominated,
            ProfileArg::Community => DistributionProfile::Community,
        }
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|date| {
            date.and_hms_opt(0, 0, 0)
                .expect("midnight is always valid")
                .and_utc()
        })
        .map_err(|_| format!("'{value}' is neither RFC 3339 nor YYYY-MM-DD"))
}

fn print_json<T: serde::Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(body) => {
            println!("{body}");
            0
        }
        Err(e) => {
            error!(error = %e, "failed to serialize output");
            1
        }
    }
}

async fn run(cli: Cli) -> i32 {
    let config = match AnalyzerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return e.exit_code();
        }
    };
    let core = match Core::new(config).await {
        Ok(core) => core,
        Err(e) => {
            error!(error = %e, "engine startup failed");
            return e.exit_code();
        }
    };

    match cli.cmd {
        Command::Analyze { protocol, limit, at, deadline_s } => {
            let options = BuildOptions {
                limit,
                at,
                deadline: deadline_s.map(std::time::Duration::from_secs),
                ..BuildOptions::default()
            };
            match core.analyze(&protocol, options).await {
                Ok(snapshot) => {
                    let degraded = snapshot.provenance == Provenance::Simulated;
                    let code = print_json(&snapshot);
                    if code == 0 && degraded {
                        3
                    } else {
                        code
                    }
                }
                Err(e) => {
                    error!(error = %e, %protocol, "analyze failed");
                    e.exit_code()
                }
            }
        }
        Command::Compare { protocols, metric, from, to } => {
            let to = to.unwrap_or_else(Utc::now);
            let from = from.unwrap_or(to - Duration::days(365));
            match core.compare(&protocols, metric, from, to).await {
                Ok(table) => print_json(&table),
                Err(e) => {
                    error!(error = %e, "compare failed");
                    e.exit_code()
                }
            }
        }
        Command::Simulate { profile, protocol, holders, seed } => {
            match core
                .simulate(&protocol, profile.into(), holders, seed, None)
                .await
            {
                Ok(snapshot) => print_json(&snapshot),
                Err(e) => {
                    error!(error = %e, "simulate failed");
                    e.exit_code()
                }
            }
        }
        Command::Series { protocol, metric, from, to } => {
            let to = to.unwrap_or_else(Utc::now);
            let from = from.unwrap_or(to - Duration::days(365));
            match core.series(&protocol, metric, from, to).await {
                Ok(points) => print_json(&points),
                Err(e) => {
                    error!(error = %e, %protocol, "series failed");
                    e.exit_code()
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}
