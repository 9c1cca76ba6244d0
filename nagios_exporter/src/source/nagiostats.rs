//! `nagiostats` source
//!
//! Nagios Core has no REST API but ships with `nagiostats`, which can print
//! selected statistics in MRTG mode. We ask for a fixed list of variables,
//! delimited by commas, and read the output back positionally.

use std::{path::PathBuf, process::Stdio};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::snapshot::{
    CheckActivity, CheckPerformance, CheckWindows, HostTally, ServiceTally, Snapshot, Spread,
};

/// The MRTG variables requested from `nagiostats`, in output order.
///
/// The positions below are load bearing: [`parse_mrtg`] reads fields by
/// index into this list.
pub const MRTG_VARIABLES: [&str; 42] = [
    "NAGIOSVERSION",
    "NUMHOSTS",
    "NUMHSTACTCHK60M",
    "NUMHSTPSVCHK60M",
    "NUMHSTUP",
    "NUMHSTDOWN",
    "NUMHSTUNR",
    "NUMHSTFLAPPING",
    "NUMHSTDOWNTIME",
    "NUMSERVICES",
    "NUMSVCACTCHK60M",
    "NUMSVCPSVCHK60M",
    "NUMSVCOK",
    "NUMSVCWARN",
    "NUMSVCUNKN",
    "NUMSVCCRIT",
    "NUMSVCFLAPPING",
    "NUMSVCDOWNTIME",
    "NUMHSTACTCHK1M",
    "NUMHSTACTCHK5M",
    "NUMHSTACTCHK15M",
    "NUMHSTPSVCHK1M",
    "NUMHSTPSVCHK5M",
    "NUMHSTPSVCHK15M",
    "NUMSVCACTCHK1M",
    "NUMSVCACTCHK5M",
    "NUMSVCACTCHK15M",
    "NUMSVCPSVCHK1M",
    "NUMSVCPSVCHK5M",
    "NUMSVCPSVCHK15M",
    "AVGACTHSTLAT",
    "MINACTHSTLAT",
    "MAXACTHSTLAT",
    "AVGACTHSTEXT",
    "MINACTHSTEXT",
    "MAXACTHSTEXT",
    "AVGACTSVCLAT",
    "MINACTSVCLAT",
    "MAXACTSVCLAT",
    "AVGACTSVCEXT",
    "MINACTSVCEXT",
    "MAXACTSVCEXT",
];

const DELIMITER: char = ',';

/// `nagiostats` reports latency and execution time in milliseconds.
const SECONDS_PER_MILLISECOND: f64 = 0.001;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Nagiostats`]
pub enum Error {
    /// The binary could not be started.
    #[error("Failed to execute {binary:?}: {source}")]
    Spawn {
        /// Binary we tried to run
        binary: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
    /// The binary ran but reported failure.
    #[error("{binary:?} exited with {status}: {stderr}")]
    Exit {
        /// Binary we ran
        binary: PathBuf,
        /// Its exit status
        status: std::process::ExitStatus,
        /// Whatever it wrote to stderr
        stderr: String,
    },
    /// The output had fewer fields than we asked for.
    #[error("Expected {expected} fields from nagiostats, found {found}")]
    Truncated {
        /// Number of variables requested
        expected: usize,
        /// Number of fields received
        found: usize,
    },
}

/// Configuration for [`Nagiostats`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Path of the `nagiostats` binary
    pub binary: PathBuf,
    /// Path of the Nagios Core main configuration file, passed as `-c`
    pub nagios_config: PathBuf,
}

/// The `nagiostats` source.
#[derive(Debug)]
pub struct Nagiostats {
    config: Config,
}

impl Nagiostats {
    /// Create a new [`Nagiostats`] instance
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("-c")
            .arg(&self.config.nagios_config)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, cmd: &mut Command) -> Result<String, Error> {
        let output = cmd.output().await.map_err(|source| Error::Spawn {
            binary: self.config.binary.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(Error::Exit {
                binary: self.config.binary.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run `nagiostats` without MRTG arguments to see whether it works at
    /// all. Returns 1 on success and 0 otherwise.
    pub async fn probe(&self) -> f64 {
        match self.run(&mut self.command()).await {
            Ok(_) => 1.0,
            Err(err) => {
                warn!("Cannot execute nagiostats: {err}");
                0.0
            }
        }
    }

    /// Run `nagiostats` in MRTG mode and build a [`Snapshot`].
    ///
    /// # Errors
    ///
    /// Returns an error if the binary cannot be run, exits with failure or
    /// prints too few fields.
    pub async fn collect(&self) -> Result<Snapshot, Error> {
        let up = self.probe().await;

        let mut cmd = self.command();
        // -m = MRTG output, -D = field delimiter, -d = variables to print
        cmd.arg("-m")
            .arg("-D")
            .arg(DELIMITER.to_string())
            .arg("-d")
            .arg(MRTG_VARIABLES.join(","));
        let stdout = self.run(&mut cmd).await?;
        debug!("Queried nagiostats: {}", stdout.trim());

        let mut snapshot = parse_mrtg(&stdout)?;
        snapshot.up = up;
        Ok(snapshot)
    }
}

/// Parse the delimited MRTG output of `nagiostats` into a [`Snapshot`].
///
/// Blank or non-numeric fields read as zero. `up` is left at zero for the
/// caller to fill in. Acknowledgements and users are not available from
/// `nagiostats` and are left unset.
///
/// # Errors
///
/// Returns [`Error::Truncated`] if there are fewer fields than
/// [`MRTG_VARIABLES`].
pub fn parse_mrtg(output: &str) -> Result<Snapshot, Error> {
    let fields: Vec<&str> = output.trim().split(DELIMITER).map(str::trim).collect();
    if fields.len() < MRTG_VARIABLES.len() {
        return Err(Error::Truncated {
            expected: MRTG_VARIABLES.len(),
            found: fields.len(),
        });
    }
    let num = |idx: usize| fields[idx].parse::<f64>().unwrap_or(0.0);
    let windows = |first: usize| CheckWindows {
        last_1m: num(first),
        last_5m: num(first + 1),
        last_15m: num(first + 2),
    };
    let spread = |first: usize| {
        Spread {
            avg: num(first),
            min: num(first + 1),
            max: num(first + 2),
        }
        .scaled(SECONDS_PER_MILLISECOND)
    };

    Ok(Snapshot {
        up: 0.0,
        version: fields[0].to_string(),
        hosts: HostTally {
            total: num(1),
            active: num(2),
            passive: num(3),
            up: num(4),
            down: num(5),
            unreachable: num(6),
            flapping: num(7),
            downtime: num(8),
            acknowledged: None,
        },
        services: ServiceTally {
            total: num(9),
            active: num(10),
            passive: num(11),
            ok: num(12),
            warning: num(13),
            unknown: num(14),
            critical: num(15),
            flapping: num(16),
            downtime: num(17),
            acknowledged: None,
        },
        users: None,
        host_checks: CheckActivity {
            active: windows(18),
            passive: windows(21),
        },
        service_checks: CheckActivity {
            active: windows(24),
            passive: windows(27),
        },
        host_performance: CheckPerformance {
            latency: spread(30),
            execution: spread(33),
        },
        service_performance: CheckPerformance {
            latency: spread(36),
            execution: spread(39),
        },
        update: None,
    })
}
