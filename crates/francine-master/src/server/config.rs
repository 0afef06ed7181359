use crate::server::telemetry::LogFormat;
use anyhow::bail;
use clap::Parser;
use francine_core::{Error, Result};

/// Runtime configuration for the `francine-master` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is honored at startup).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "francine-master",
    version,
    about = "A gRPC front-end that dispatches render jobs to francine workers"
)]
pub struct CliArgs {
    /// Address the master listens on (TCP or Unix socket path; use --uds for
    /// Unix socket).
    ///
    /// Environment variable: `MASTER_ADDRESS`
    #[arg(long, env = "MASTER_ADDRESS", default_value_t = String::from("0.0.0.0:50051"))]
    pub master_address: String,

    /// Comma separated list of worker addresses.
    ///
    /// Requests are handed out round-robin in the listed order. An address may
    /// appear more than once to give that worker a bigger share of traffic.
    /// Addresses without a scheme are dialed over plain `http://`.
    ///
    /// Surrounding whitespace is trimmed and blank entries are dropped without
    /// a warning: `"a,,b"` and `"a, ,b,"` both configure `a` then `b`.
    ///
    /// Environment variable: `WORKERS_LIST`
    #[arg(long, env = "WORKERS_LIST", default_value_t = String::from("127.0.0.1:50052"))]
    pub workers_list: String,

    /// Seconds to wait for in-flight renders to finish during shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,

    /// Listen on a Unix socket instead of TCP. If set, `MASTER_ADDRESS` must be
    /// a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Console log layout.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub master_address: String,
    pub workers: Vec<String>,
    pub shutdown_timeout: u64,
    pub uds: bool,
    pub log_format: LogFormat,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> core::result::Result<Self, Self::Error> {
        if args.master_address.trim().is_empty() {
            bail!("MASTER_ADDRESS must not be empty");
        }

        let workers = parse_workers_list(&args.workers_list)?;

        Ok(Self {
            master_address: args.master_address,
            workers,
            shutdown_timeout: args.shutdown_timeout,
            uds: args.uds,
            log_format: args.log_format,
        })
    }
}

/// Splits a comma separated worker list into addresses, keeping their order.
///
/// Blank entries anywhere in the list (`"a,,b"`, a trailing comma) are
/// silently skipped. Duplicates are kept. A list with no address at all is
/// rejected.
pub fn parse_workers_list(raw: &str) -> Result<Vec<String>> {
    let workers: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(String::from)
        .collect();

    if workers.is_empty() {
        return Err(Error::Configuration {
            reason: "WORKERS_LIST must name at least one worker".to_string(),
        });
    }

    Ok(workers)
}
