//! This module turns what the operator supplied, flags plus the credentials
//! file, into a [`source::Config`]. Startup failures are most likely to
//! originate from this code.
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tracing::debug;

use crate::{
    source::{self, api, nagiostats},
    update,
};

/// Environment variable that, when set, supplies the API key in place of the
/// credentials file.
pub const API_KEY_ENV: &str = "NAGIOS_EXPORTER_API_KEY";

/// Errors produced by [`Settings`] and [`Credentials`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`toml`].
    #[error("Failed to deserialize toml: {0}")]
    Toml(#[from] toml::de::Error),
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading the credentials file
    #[error("Failed to read credentials file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<std::io::Error>,
    },
}

/// Encoding of a credentials file, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// The default
    Toml,
    /// `.yaml` and `.yml`
    Yaml,
}

impl Format {
    /// Pick the format for `path`. Anything not ending in `.yaml` or `.yml`
    /// is read as TOML.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                Self::Yaml
            }
            _ => Self::Toml,
        }
    }
}

/// Contents of the credentials file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    /// Nagios XI API key
    #[serde(rename = "APIKey", alias = "api_key")]
    pub api_key: String,
}

impl Credentials {
    /// Parse `contents` as `format`.
    ///
    /// # Errors
    ///
    /// Returns an error if `contents` is not valid for `format` or lacks the
    /// API key.
    pub fn parse(contents: &str, format: Format) -> Result<Self, Error> {
        match format {
            Format::Toml => Ok(toml::from_str(contents)?),
            Format::Yaml => Ok(serde_yaml::from_str(contents)?),
        }
    }

    /// Load credentials, preferring `override_key` over the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is consulted and cannot be read or
    /// parsed.
    pub fn load(path: &Path, override_key: Option<String>) -> Result<Self, Error> {
        if let Some(api_key) = override_key {
            debug!("Using API key from env var '{API_KEY_ENV}'");
            return Ok(Self { api_key });
        }

        debug!("Attempting to open credentials file at: {}", path.display());
        let contents = std::fs::read_to_string(path).map_err(|err| Error::ReadFile {
            path: path.to_path_buf(),
            source: Box::new(err),
        })?;
        Self::parse(&contents, Format::from_path(path))
    }
}

/// How the exporter reaches Nagios, independent of how the values were
/// supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Nagios XI address
    pub scrape_uri: String,
    /// Verify XI's TLS certificate
    pub ssl_verify: bool,
    /// XI request timeout
    pub timeout: Duration,
    /// Credentials file, read only in API mode
    pub credentials_path: PathBuf,
    /// `nagiostats` binary; selects `nagiostats` mode when set
    pub stats_binary: Option<PathBuf>,
    /// Nagios Core configuration passed to `nagiostats`
    pub nagios_config: PathBuf,
    /// Look up the latest published XI release, API mode only
    pub check_updates: bool,
    /// Page listing XI releases
    pub versions_uri: String,
}

impl Settings {
    /// Build the [`source::Config`] these settings describe. In API mode the
    /// credentials are loaded here; `nagiostats` mode needs none.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are needed and cannot be loaded.
    pub fn source(&self, override_key: Option<String>) -> Result<source::Config, Error> {
        if let Some(binary) = &self.stats_binary {
            return Ok(source::Config::Nagiostats(nagiostats::Config {
                binary: binary.clone(),
                nagios_config: self.nagios_config.clone(),
            }));
        }

        let credentials = Credentials::load(&self.credentials_path, override_key)?;
        let update_check = self.check_updates.then(|| update::Config {
            versions_uri: self.versions_uri.clone(),
            timeout: self.timeout,
        });
        Ok(source::Config::Api(api::Config {
            scrape_uri: self.scrape_uri.clone(),
            api_key: credentials.api_key,
            ssl_verify: self.ssl_verify,
            timeout: self.timeout,
            update_check,
        }))
    }
}
