//! The values produced by a single scrape.
//!
//! A [`Snapshot`] is built by one of the [`crate::source`] implementations,
//! handed to [`crate::exposition`] for rendering and then dropped. Nothing in
//! here outlives a scrape.

use crate::{source::api::schema::ObjectStatus, update::UpdateInfo};

/// Host and service `check_type` for an active check. Everything else counts
/// as passive.
const CHECK_TYPE_ACTIVE: i64 = 0;

/// Largest check count accepted in any window. A 15 minute window above
/// this is more than a thousand checks a second and is treated as a corrupt
/// reading rather than rendered.
pub const MAX_WINDOW_CHECKS: f64 = 1_000_000.0;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
/// Errors produced by [`Snapshot::validate`]
pub enum Error {
    /// A check window is negative, not finite or above [`MAX_WINDOW_CHECKS`].
    #[error("Implausible {checks} check count over the last {minutes} minutes: {value}")]
    ImplausibleWindow {
        /// Which checks, e.g. `active host`
        checks: &'static str,
        /// Window length
        minutes: u8,
        /// Value received
        value: f64,
    },
}

/// Host `current_state` codes.
mod host_state {
    pub(super) const UP: i64 = 0;
    pub(super) const DOWN: i64 = 1;
    pub(super) const UNREACHABLE: i64 = 2;
}

/// Service `current_state` codes.
mod service_state {
    pub(super) const OK: i64 = 0;
    pub(super) const WARNING: i64 = 1;
    pub(super) const CRITICAL: i64 = 2;
    pub(super) const UNKNOWN: i64 = 3;
}

/// Counters derived from the host status list.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostTally {
    /// Hosts present in configuration
    pub total: f64,
    /// Hosts checked actively
    pub active: f64,
    /// Hosts checked passively
    pub passive: f64,
    /// Hosts in state UP
    pub up: f64,
    /// Hosts in state DOWN
    pub down: f64,
    /// Hosts in state UNREACHABLE
    pub unreachable: f64,
    /// Hosts currently flapping
    pub flapping: f64,
    /// Hosts in scheduled downtime
    pub downtime: f64,
    /// Host problems acknowledged, `None` when the source cannot tell
    pub acknowledged: Option<f64>,
}

impl HostTally {
    /// Walk `records` once and count every category.
    #[must_use]
    pub fn tally<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a ObjectStatus>,
    {
        let mut tally = Self::default();
        let mut acknowledged = 0.0;

        for record in records {
            tally.total += 1.0;

            if record.check_type == CHECK_TYPE_ACTIVE {
                tally.active += 1.0;
            } else {
                tally.passive += 1.0;
            }

            match record.current_state {
                host_state::UP => tally.up += 1.0,
                host_state::DOWN => tally.down += 1.0,
                host_state::UNREACHABLE => tally.unreachable += 1.0,
                _ => {}
            }

            if record.is_flapping == 1 {
                tally.flapping += 1.0;
            }
            if record.scheduled_downtime_depth == 1 {
                tally.downtime += 1.0;
            }
            if record.problem_has_been_acknowledged == 1 {
                acknowledged += 1.0;
            }
        }

        tally.acknowledged = Some(acknowledged);
        tally
    }
}

/// Counters derived from the service status list.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ServiceTally {
    /// Services present in configuration
    pub total: f64,
    /// Services checked actively
    pub active: f64,
    /// Services checked passively
    pub passive: f64,
    /// Services in state OK
    pub ok: f64,
    /// Services in state WARNING
    pub warning: f64,
    /// Services in state CRITICAL
    pub critical: f64,
    /// Services in state UNKNOWN
    pub unknown: f64,
    /// Services currently flapping
    pub flapping: f64,
    /// Services in scheduled downtime
    pub downtime: f64,
    /// Service problems acknowledged, `None` when the source cannot tell
    pub acknowledged: Option<f64>,
}

impl ServiceTally {
    /// Walk `records` once and count every category.
    #[must_use]
    pub fn tally<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a ObjectStatus>,
    {
        let mut tally = Self::default();
        let mut acknowledged = 0.0;

        for record in records {
            tally.total += 1.0;

            if record.check_type == CHECK_TYPE_ACTIVE {
                tally.active += 1.0;
            } else {
                tally.passive += 1.0;
            }

            match record.current_state {
                service_state::OK => tally.ok += 1.0,
                service_state::WARNING => tally.warning += 1.0,
                service_state::CRITICAL => tally.critical += 1.0,
                service_state::UNKNOWN => tally.unknown += 1.0,
                _ => {}
            }

            if record.is_flapping == 1 {
                tally.flapping += 1.0;
            }
            if record.scheduled_downtime_depth == 1 {
                tally.downtime += 1.0;
            }
            if record.problem_has_been_acknowledged == 1 {
                acknowledged += 1.0;
            }
        }

        tally.acknowledged = Some(acknowledged);
        tally
    }
}

/// Counters derived from the user list. Only the XI API reports users.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UserTally {
    /// Users present on the system, as reported by the API
    pub total: f64,
    /// Users with admin privileges
    pub admin: f64,
    /// Users without admin privileges
    pub regular: f64,
    /// Enabled accounts
    pub enabled: f64,
    /// Disabled accounts
    pub disabled: f64,
}

impl UserTally {
    /// Count `(admin, enabled)` flag pairs. `total` is taken as reported by
    /// the upstream, not derived from the list length.
    #[must_use]
    pub fn tally<I>(total: f64, users: I) -> Self
    where
        I: IntoIterator<Item = (i64, i64)>,
    {
        let mut tally = Self {
            total,
            ..Self::default()
        };
        for (admin, enabled) in users {
            if admin == 1 {
                tally.admin += 1.0;
            } else {
                tally.regular += 1.0;
            }
            if enabled == 1 {
                tally.enabled += 1.0;
            } else {
                tally.disabled += 1.0;
            }
        }
        tally
    }
}

/// Number of checks run over the trailing 1, 5 and 15 minutes. Each window
/// contains the ones before it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CheckWindows {
    /// Checks in the last minute
    pub last_1m: f64,
    /// Checks in the last five minutes
    pub last_5m: f64,
    /// Checks in the last fifteen minutes
    pub last_15m: f64,
}

impl CheckWindows {
    fn plausible(value: f64) -> bool {
        value.is_finite() && (0.0..=MAX_WINDOW_CHECKS).contains(&value)
    }

    /// The first implausible window as `(minutes, value)`, if any.
    #[must_use]
    pub fn implausible(&self) -> Option<(u8, f64)> {
        [(1, self.last_1m), (5, self.last_5m), (15, self.last_15m)]
            .into_iter()
            .find(|(_, value)| !Self::plausible(*value))
    }
}

/// Active and passive check windows for hosts or services.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CheckActivity {
    /// Actively scheduled checks
    pub active: CheckWindows,
    /// Passively submitted results
    pub passive: CheckWindows,
}

/// Minimum, maximum and mean of some measurement, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Spread {
    /// Mean
    pub avg: f64,
    /// Minimum
    pub min: f64,
    /// Maximum
    pub max: f64,
}

impl Spread {
    /// Scale every member by `factor`.
    #[must_use]
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            avg: self.avg * factor,
            min: self.min * factor,
            max: self.max * factor,
        }
    }
}

/// Active check latency and execution time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CheckPerformance {
    /// Delay between scheduled and actual check start
    pub latency: Spread,
    /// Time spent running the check
    pub execution: Spread,
}

/// Everything one scrape has to say about the upstream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// 1 if Nagios is running, 0 otherwise
    pub up: f64,
    /// Upstream version string
    pub version: String,
    /// Host counters
    pub hosts: HostTally,
    /// Service counters
    pub services: ServiceTally,
    /// User counters, when the source reports users
    pub users: Option<UserTally>,
    /// Host check volume
    pub host_checks: CheckActivity,
    /// Service check volume
    pub service_checks: CheckActivity,
    /// Active host check performance
    pub host_performance: CheckPerformance,
    /// Active service check performance
    pub service_performance: CheckPerformance,
    /// Result of the update check, when enabled and successful
    pub update: Option<UpdateInfo>,
}

impl Snapshot {
    /// Reject snapshots whose check windows cannot be real.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ImplausibleWindow`] for the first window that is
    /// negative, not finite or above [`MAX_WINDOW_CHECKS`].
    pub fn validate(&self) -> Result<(), Error> {
        let windows = [
            ("active host", self.host_checks.active),
            ("passive host", self.host_checks.passive),
            ("active service", self.service_checks.active),
            ("passive service", self.service_checks.passive),
        ];
        for (checks, windows) in windows {
            if let Some((minutes, value)) = windows.implausible() {
                return Err(Error::ImplausibleWindow {
                    checks,
                    minutes,
                    value,
                });
            }
        }
        Ok(())
    }
}
