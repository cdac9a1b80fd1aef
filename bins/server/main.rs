//! # Market Data Provider
//!
//! Interactive provider that publishes one service to TCP consumers.
//! Consumers log in, fetch the source directory and dictionaries, and
//! open market price, market-by-order or symbol list streams. Updates are
//! published every idle loop interval until the run time elapses.
//!
//! ## Command-line Options
//! - `--port` / `-p`: TCP port to listen on (default `14002`).
//! - `--service` / `-s`: Service name published in the directory.
//! - `--service-id`: Service id published in the directory.
//! - `--runtime` / `-r`: Seconds to run before shutting down.
//! - `--field-dictionary`, `--enum-dictionary`: Dictionary file paths.
//! - `--ping-timeout`: Largest ping timeout offered to consumers, in seconds.
//! - `--max-sessions`: Session capacity.
//! - `--update-interval-ms`: Idle wait, which is also the publish cadence.
//! - `--trace`: Log every message sent and received.
//! - `--transport-details`: Log byte counts of every read.
//! - `--log-level` / `-l`: Log level (`error`, `warn`, `info`, `debug`, `trace`).
//!
//! The process exits with a non-zero status on every path, including
//! the run time expiring.

use market_provider::clock::SystemClock;
use market_provider::defs::{
    DEFAULT_PING_TIMEOUT_SEC, DEFAULT_PORT, DEFAULT_RUNTIME_SEC, DEFAULT_SERVICE_ID,
    DEFAULT_SERVICE_NAME, MAX_CLIENT_SESSIONS, UPDATE_INTERVAL_MSEC, VOLATILITY,
};
use market_provider::dictionary::DataDictionary;
use market_provider::domains::{Provider, ProviderSettings};
use market_provider::errors::CliError;
use market_provider::poller::PollSelector;
use market_provider::server::{ProviderServer, ServerConfig};
use market_provider::transport::tcp::{ChannelOptions, TcpEndpoint};
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;

/// Command-line options for the provider
#[derive(Debug, StructOpt)]
#[structopt(
    name = "provider",
    about = "Single-threaded interactive market data provider"
)]
struct Opt {
    /// TCP port to listen on
    #[structopt(short, long)]
    port: Option<String>,

    /// Service name published in the source directory
    #[structopt(short, long)]
    service: Option<String>,

    /// Service id published in the source directory
    #[structopt(long)]
    service_id: Option<u16>,

    /// Seconds to run before closing every stream and exiting
    #[structopt(short, long)]
    runtime: Option<u64>,

    /// Field dictionary file
    #[structopt(long, parse(from_os_str), default_value = "RDMFieldDictionary")]
    field_dictionary: PathBuf,

    /// Enum-type dictionary file
    #[structopt(long, parse(from_os_str), default_value = "enumtype.def")]
    enum_dictionary: PathBuf,

    /// Largest ping timeout offered to consumers, in seconds
    #[structopt(long)]
    ping_timeout: Option<u16>,

    /// Maximum number of concurrent sessions
    #[structopt(long)]
    max_sessions: Option<usize>,

    /// Idle wait in milliseconds; one round of updates is published per idle wait
    #[structopt(long)]
    update_interval_ms: Option<u64>,

    /// Log every message sent and received
    #[structopt(long)]
    trace: bool,

    /// Log byte counts of every read
    #[structopt(long)]
    transport_details: bool,

    /// Log level: error, warn, info, debug, trace
    #[structopt(short, long, default_value = "info")]
    log_level: String,
}

/// Initializes the logger using env_logger with the given level
fn init_logger(level: &str) {
    let mut builder = env_logger::Builder::new();

    let log_level = match level.to_lowercase().as_str() {
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "info" => log::LevelFilter::Info,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };

    builder.filter_level(log_level);
    builder.format_timestamp_micros();
    builder.format_module_path(false);
    builder.format_target(false);
    builder.init();
}

fn main() -> Result<(), CliError> {
    let opt = Opt::from_args();
    init_logger(&opt.log_level);

    log::info!("Starting market data provider");
    log::debug!("Command line options: {:?}", opt);

    let port = opt.port.as_deref().unwrap_or(DEFAULT_PORT);
    let service_name = opt.service.as_deref().unwrap_or(DEFAULT_SERVICE_NAME);
    let service_id = opt.service_id.unwrap_or(DEFAULT_SERVICE_ID);
    if service_id == 0 {
        return Err(CliError::GeneralError(
            "service id must be a positive number".into(),
        ));
    }

    let options = ChannelOptions {
        ping_timeout: Duration::from_secs(
            opt.ping_timeout.unwrap_or(DEFAULT_PING_TIMEOUT_SEC) as u64,
        ),
        ..ChannelOptions::default()
    };
    let endpoint = TcpEndpoint::bind(&format!("0.0.0.0:{}", port), options)?;

    log::info!(
        "Loading dictionary from {} and {}",
        opt.field_dictionary.display(),
        opt.enum_dictionary.display()
    );
    let (dictionary, errors) = DataDictionary::load(&opt.field_dictionary, &opt.enum_dictionary);
    for e in &errors {
        log::warn!("{}", e);
    }

    let settings = ProviderSettings {
        service_name: service_name.to_string(),
        service_id,
        trace_messages: opt.trace,
        volatility: VOLATILITY,
    };
    let provider = Provider::new(settings, dictionary)?;

    let config = ServerConfig {
        capacity: opt.max_sessions.unwrap_or(MAX_CLIENT_SESSIONS),
        update_interval: Duration::from_millis(
            opt.update_interval_ms.unwrap_or(UPDATE_INTERVAL_MSEC),
        ),
        run_time: Duration::from_secs(opt.runtime.unwrap_or(DEFAULT_RUNTIME_SEC)),
        trace_messages: opt.trace,
        show_transport_details: opt.transport_details,
    };

    log::info!(
        "Publishing service {} (id {}) on port {}",
        service_name,
        service_id,
        port
    );
    let mut server = ProviderServer::new(endpoint, PollSelector, provider, SystemClock, config);
    let reason = server.run()?;

    log::info!("Provider shut down: {}", reason);
    std::process::exit(1);
}
