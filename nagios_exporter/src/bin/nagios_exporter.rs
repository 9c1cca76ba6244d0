use std::{env, net::SocketAddr, num::NonZeroUsize, path::PathBuf, time::Duration};

use clap::Parser;
use jemallocator::Jemalloc;
use nagios_exporter::{
    config::{self, API_KEY_ENV, Settings},
    httpd::{self, Exporter},
    redact::RedactingWriter,
    source::{self, Source},
    update,
};
use tokio::{runtime::Builder, signal};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to load configuration: {0}")]
    Config(#[from] config::Error),
    #[error("Failed to set up Nagios source: {0}")]
    Source(#[from] source::Error),
    #[error("HTTP server failed: {0}")]
    Httpd(#[from] httpd::Error),
}

#[derive(Parser, Debug)]
#[clap(version, about = "Prometheus exporter for Nagios", long_about = None)]
struct Cli {
    /// Address to listen on for telemetry
    #[clap(long = "web.listen-address", default_value = "0.0.0.0:9927")]
    listen_address: SocketAddr,
    /// Path under which to expose metrics
    #[clap(long = "web.telemetry-path", default_value = "/metrics")]
    telemetry_path: String,
    /// Maximum number of concurrent connections, excess ones are dropped
    #[clap(long = "web.max-connections", default_value = "100")]
    max_connections: NonZeroUsize,
    /// Nagios application address
    #[clap(long = "nagios.scrape-uri", default_value = "http://localhost")]
    scrape_uri: String,
    /// Validate the Nagios XI TLS certificate
    #[clap(long = "nagios.ssl-verify")]
    ssl_verify: bool,
    /// Timeout for querying the Nagios API, in seconds
    #[clap(long = "nagios.timeout", default_value_t = 5)]
    timeout: u64,
    /// Credentials file path, TOML unless it ends in .yaml or .yml
    #[clap(
        long = "config.path",
        default_value = "/etc/prometheus-nagios-exporter/config.toml"
    )]
    config_path: PathBuf,
    /// Minimum log level, overridden by `RUST_LOG`
    #[clap(long = "log.level", default_value = "info")]
    log_level: String,
    /// Path of the nagiostats binary; query it instead of the Nagios XI API
    #[clap(long = "nagios.stats_binary")]
    stats_binary: Option<PathBuf>,
    /// Nagios configuration path for use with the nagiostats binary
    #[clap(
        long = "nagios.config_path",
        default_value = "/usr/local/nagios/etc/nagios.cfg"
    )]
    nagios_config: PathBuf,
    /// Report whether a newer Nagios XI release is published
    #[clap(long = "nagios.check-updates")]
    check_updates: bool,
    /// Page listing published Nagios XI releases
    #[clap(long = "nagios.versions-uri", default_value = update::DEFAULT_VERSIONS_URI)]
    versions_uri: String,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            scrape_uri: self.scrape_uri.clone(),
            ssl_verify: self.ssl_verify,
            timeout: Duration::from_secs(self.timeout),
            credentials_path: self.config_path.clone(),
            stats_binary: self.stats_binary.clone(),
            nagios_config: self.nagios_config.clone(),
            check_updates: self.check_updates,
            versions_uri: self.versions_uri.clone(),
        }
    }
}

fn init_logging(log_level: &str, api_key: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(RedactingWriter::new(std::io::stderr, api_key))
        .finish()
        .init();
}

async fn inner_main(cli: Cli, source_config: source::Config) -> Result<(), Error> {
    match &source_config {
        source::Config::Api(conf) => info!("Using connection endpoint: {}", conf.scrape_uri),
        source::Config::Nagiostats(conf) => {
            info!("Using nagiostats binary: {}", conf.binary.display());
            info!("Using Nagios configuration: {}", conf.nagios_config.display());
        }
    }

    let source = Source::new(source_config)?;
    let exporter = Exporter::new(source, &cli.telemetry_path);
    let listener = httpd::bind(cli.listen_address).await?;

    let shutdown = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c, running until killed: {err}");
            std::future::pending::<()>().await;
        }
    };
    httpd::serve(listener, exporter, cli.max_connections.get(), shutdown).await?;
    info!("Bye. :)");
    Ok(())
}

fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    // The key has to be known before logging starts so the writer can scrub
    // it, so credentials are read first and any failure reported after.
    let source_config = cli.settings().source(env::var(API_KEY_ENV).ok());
    let api_key = match &source_config {
        Ok(source::Config::Api(conf)) => conf.api_key.as_str(),
        _ => "",
    };
    init_logging(&cli.log_level, api_key);

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting nagios_exporter {version}.");

    let source_config = source_config.map_err(|err| {
        error!("Could not load credentials: {err}");
        err
    })?;

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    runtime.block_on(inner_main(cli, source_config))
}
