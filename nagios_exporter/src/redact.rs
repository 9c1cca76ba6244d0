//! Scrub the Nagios XI API key out of text.
//!
//! Nagios XI only accepts its API key as a URL query parameter so the key
//! ends up in request URLs and, from there, in error messages and logs. The
//! functions here make sure it never leaves the process.

use std::{borrow::Cow, io, sync::Arc};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing_subscriber::fmt::MakeWriter;

/// Replacement written wherever an API key used to be.
pub const REDACTED: &str = "<redactedAPIKey>";

static APIKEY_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(apikey=)[^&\s)]*").expect("Invalid regex pattern provided"));

/// Replace the value of every `apikey=` query parameter found in `text`.
#[must_use]
pub fn redact_api_key(text: &str) -> Cow<'_, str> {
    APIKEY_PARAM.replace_all(text, format!("${{1}}{REDACTED}"))
}

/// A [`MakeWriter`] that scrubs API keys from everything written through it.
///
/// Both `apikey=` query parameters and literal occurrences of the configured
/// secret are replaced with [`REDACTED`].
#[derive(Debug, Clone)]
pub struct RedactingWriter<M> {
    inner: M,
    secret: Option<Arc<str>>,
}

impl<M> RedactingWriter<M> {
    /// Wrap `inner`, scrubbing `secret` in addition to `apikey=` parameters.
    /// An empty secret is ignored.
    pub fn new(inner: M, secret: &str) -> Self {
        let secret = if secret.is_empty() {
            None
        } else {
            Some(Arc::from(secret))
        };
        Self { inner, secret }
    }
}

/// Writer produced by [`RedactingWriter`].
#[derive(Debug)]
pub struct Redacted<W> {
    inner: W,
    secret: Option<Arc<str>>,
}

impl<W> Redacted<W> {
    fn scrub(&self, buf: &[u8]) -> String {
        let text = String::from_utf8_lossy(buf);
        let scrubbed = redact_api_key(&text);
        match &self.secret {
            Some(secret) => scrubbed.replace(secret.as_ref(), REDACTED),
            None => scrubbed.into_owned(),
        }
    }
}

impl<W: io::Write> io::Write for Redacted<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let scrubbed = self.scrub(buf);
        self.inner.write_all(scrubbed.as_bytes())?;
        // The caller's view is the unscrubbed buffer, all of which was consumed.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<'a, M> MakeWriter<'a> for RedactingWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = Redacted<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        Redacted {
            inner: self.inner.make_writer(),
            secret: self.secret.clone(),
        }
    }
}
