//! Nagios XI REST API source
//!
//! This module queries the Nagios XI v1 REST API over HTTP(S). XI only
//! accepts its API key as a query parameter, so every error that might carry
//! the request URL has the URL stripped before it is surfaced.

pub mod schema;

use std::time::Duration;

use http::header;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use self::schema::{
    HostStatusList, ServiceStatusList, StatusDetail, SystemInfo, SystemStatus, UserList,
};
use crate::{
    snapshot::{
        CheckActivity, CheckPerformance, CheckWindows, HostTally, ServiceTally, Snapshot, Spread,
        UserTally,
    },
    update,
};

/// Path prefix of the XI v1 API beneath the server address.
pub const API_PREFIX: &str = "/nagiosxi/api/v1";

const SYSTEM_STATUS: &str = "/system/status";
const SYSTEM_INFO: &str = "/system/info";
const HOST_STATUS: &str = "/objects/hoststatus";
const SERVICE_STATUS: &str = "/objects/servicestatus";
const STATUS_DETAIL: &str = "/system/statusdetail";
const SYSTEM_USER: &str = "/system/user";

const USER_AGENT: &str = "Prometheus";

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Api`]
pub enum Error {
    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    /// The request could not be sent or its body could not be read.
    #[error("Request to {endpoint} failed: {source}")]
    Request {
        /// API endpoint queried
        endpoint: &'static str,
        /// Underlying client error, URL removed
        #[source]
        source: reqwest::Error,
    },
    /// The API answered with a non-success status.
    #[error("{endpoint} responded with status {status}")]
    Status {
        /// API endpoint queried
        endpoint: &'static str,
        /// Status code received
        status: reqwest::StatusCode,
    },
    /// The response body was not the JSON we expected.
    #[error("Failed to decode {endpoint} response: {source}")]
    Decode {
        /// API endpoint queried
        endpoint: &'static str,
        /// Underlying decode error
        #[source]
        source: serde_json::Error,
    },
}

/// Configuration for [`Api`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address of the XI server, e.g. `https://nagios.example.com`
    pub scrape_uri: String,
    /// XI API key
    pub api_key: String,
    /// Verify the server's TLS certificate
    pub ssl_verify: bool,
    /// Per-request timeout
    pub timeout: Duration,
    /// Look up the latest published XI release on every scrape
    pub update_check: Option<update::Config>,
}

/// The Nagios XI API source.
#[derive(Debug)]
pub struct Api {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
    update_check: Option<(update::Config, reqwest::Client)>,
}

impl Api {
    /// Create a new [`Api`] instance
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built, for instance
    /// when no TLS backend is available.
    pub fn new(config: Config) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.ssl_verify)
            .build()
            .map_err(Error::Client)?;
        // The versions page is a public site, XI's certificate leniency must
        // not carry over to it.
        let update_check = match config.update_check {
            Some(conf) => Some((conf, update::client().map_err(Error::Client)?)),
            None => None,
        };

        Ok(Self {
            endpoint: format!(
                "{base}{API_PREFIX}",
                base = config.scrape_uri.trim_end_matches('/')
            ),
            api_key: config.api_key,
            client,
            update_check,
        })
    }

    #[cfg(test)]
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// GET `endpoint` and decode the JSON body into `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the status is not a success or
    /// the body does not decode.
    pub async fn fetch<T>(
        &self,
        endpoint: &'static str,
        query: &[(&str, &str)],
    ) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let resp = self
            .client
            .get(format!("{base}{endpoint}", base = self.endpoint))
            .query(&[("apikey", self.api_key.as_str())])
            .query(query)
            .header(header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|err| Error::Request {
                endpoint,
                source: err.without_url(),
            })?;
        debug!("Queried API: {endpoint}");

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Status { endpoint, status });
        }

        let body = resp.text().await.map_err(|err| Error::Request {
            endpoint,
            source: err.without_url(),
        })?;
        serde_json::from_str(&body).map_err(|source| Error::Decode { endpoint, source })
    }

    /// Whether the Nagios Core process behind XI is running, as 1 or 0.
    ///
    /// # Errors
    ///
    /// See [`Api::fetch`].
    pub async fn running(&self) -> Result<f64, Error> {
        let status: SystemStatus = self.fetch(SYSTEM_STATUS, &[]).await?;
        Ok(status.is_currently_running)
    }

    /// Query every endpoint once and build a [`Snapshot`].
    ///
    /// # Errors
    ///
    /// Returns the first error encountered. A failed update check is logged
    /// and does not fail the collection.
    pub async fn collect(&self) -> Result<Snapshot, Error> {
        let up = self.running().await?;
        if up <= 0.0 {
            warn!("Nagios XI reports that Nagios Core is not running");
        }

        let info: SystemInfo = self.fetch(SYSTEM_INFO, &[]).await?;
        let hosts: HostStatusList = self.fetch(HOST_STATUS, &[]).await?;
        let services: ServiceStatusList = self.fetch(SERVICE_STATUS, &[]).await?;
        let detail: StatusDetail = self.fetch(STATUS_DETAIL, &[]).await?;
        // `advanced` is required for the privilege and status fields.
        let users: UserList = self.fetch(SYSTEM_USER, &[("advanced", "1")]).await?;

        let update = match &self.update_check {
            Some((config, client)) => match update::check(client, config, &info.version).await {
                Ok(info) => Some(info),
                Err(err) => {
                    warn!("Nagios XI update check failed: {err}");
                    None
                }
            },
            None => None,
        };

        let core = detail.nagioscore;
        Ok(Snapshot {
            up,
            version: info.version,
            hosts: HostTally::tally(&hosts.hoststatus),
            services: ServiceTally::tally(&services.servicestatus),
            users: Some(UserTally::tally(
                users.records,
                users.users.iter().map(|user| (user.admin, user.enabled)),
            )),
            host_checks: CheckActivity {
                active: windows(core.activehostchecks),
                passive: windows(core.passivehostchecks),
            },
            service_checks: CheckActivity {
                active: windows(core.activeservicechecks),
                passive: windows(core.passiveservicechecks),
            },
            host_performance: performance(core.activehostcheckperf),
            service_performance: performance(core.activeservicecheckperf),
            update,
        })
    }
}

fn windows(counts: schema::CheckCounts) -> CheckWindows {
    CheckWindows {
        last_1m: counts.val1,
        last_5m: counts.val5,
        last_15m: counts.val15,
    }
}

fn performance(perf: schema::CheckPerf) -> CheckPerformance {
    CheckPerformance {
        latency: Spread {
            avg: perf.avg_latency,
            min: perf.min_latency,
            max: perf.max_latency,
        },
        execution: Spread {
            avg: perf.avg_execution_time,
            min: perf.min_execution_time,
            max: perf.max_execution_time,
        },
    }
}
