//! Fetch status from the upstream Nagios
//!
//! Two kinds of upstream are supported: the Nagios XI REST API and the
//! `nagiostats` binary shipped with Nagios Core. Both produce a
//! [`Snapshot`], the API with more detail than `nagiostats`.

use crate::snapshot::{self, Snapshot};

pub mod api;
pub mod nagiostats;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Source`]
pub enum Error {
    /// See [`crate::source::api::Error`] for details.
    #[error(transparent)]
    Api(#[from] api::Error),
    /// See [`crate::source::nagiostats::Error`] for details.
    #[error(transparent)]
    Nagiostats(#[from] nagiostats::Error),
    /// The upstream answered with values that cannot be real.
    #[error("Discarding upstream status: {0}")]
    Implausible(#[from] snapshot::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Configuration for [`Source`]
pub enum Config {
    /// See [`crate::source::api::Config`] for details.
    Api(api::Config),
    /// See [`crate::source::nagiostats::Config`] for details.
    Nagiostats(nagiostats::Config),
}

/// The upstream a scrape reads from.
#[derive(Debug)]
pub enum Source {
    /// See [`crate::source::api::Api`] for details.
    Api(api::Api),
    /// See [`crate::source::nagiostats::Nagiostats`] for details.
    Nagiostats(nagiostats::Nagiostats),
}

impl Source {
    /// Create a new [`Source`] instance
    ///
    /// # Errors
    ///
    /// Function will return an error if the HTTP client for the API source
    /// cannot be built.
    pub fn new(config: Config) -> Result<Self, Error> {
        match config {
            Config::Api(conf) => Ok(Self::Api(api::Api::new(conf)?)),
            Config::Nagiostats(conf) => Ok(Self::Nagiostats(nagiostats::Nagiostats::new(conf))),
        }
    }

    /// Collect one [`Snapshot`] from the upstream.
    ///
    /// # Errors
    ///
    /// Function will return an error if the underlying source does, or if
    /// the snapshot fails [`Snapshot::validate`].
    pub async fn collect(&self) -> Result<Snapshot, Error> {
        let snapshot = match self {
            Source::Api(inner) => inner.collect().await?,
            Source::Nagiostats(inner) => inner.collect().await?,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Whether this source reports acknowledgements and users.
    #[must_use]
    pub fn supports_extended(&self) -> bool {
        matches!(self, Source::Api(_))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[tokio::test]
    async fn dispatches_to_api() {
        let addr = api::tests::mock_xi();
        let source = Source::new(Config::Api(api::tests::config(addr, "0123456789abcdef")))
            .expect("failed to build source");
        assert!(source.supports_extended());

        let snapshot = source.collect().await.expect("collection failed");
        assert_eq!(snapshot.up, 1.0);
        assert!(snapshot.users.is_some());
    }

    #[tokio::test]
    async fn dispatches_to_nagiostats() {
        let source = Source::new(Config::Nagiostats(nagiostats::Config {
            binary: PathBuf::from("/nonexistent/nagiostats"),
            nagios_config: PathBuf::from("/usr/local/nagios/etc/nagios.cfg"),
        }))
        .expect("failed to build source");
        assert!(!source.supports_extended());

        assert!(matches!(
            source.collect().await,
            Err(Error::Nagiostats(nagiostats::Error::Spawn { .. }))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn implausible_check_window_fails_collection() {
        let mut fields: Vec<&str> = nagiostats::tests::MRTG_OUTPUT.trim().split(',').collect();
        // NUMSVCACTCHK15M
        fields[26] = "1e12";
        let script = format!("printf '{}'", fields.join(","));
        let source = Source::new(Config::Nagiostats(nagiostats::tests::shell(&script)))
            .expect("failed to build source");

        assert!(matches!(
            source.collect().await,
            Err(Error::Implausible(snapshot::Error::ImplausibleWindow {
                minutes: 15,
                ..
            }))
        ));
    }
}
