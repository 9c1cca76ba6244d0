//! Metric catalogue and Prometheus rendering
//!
//! Each scrape builds a fresh [`PrometheusRecorder`], installs it for the
//! current thread only, writes one [`Snapshot`] into it and renders the text
//! exposition. No metric state survives between scrapes, a value that
//! disappears upstream disappears from the output.

use metrics::{describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusRecorder};
use tracing::warn;

use crate::snapshot::{CheckActivity, CheckPerformance, CheckWindows, Snapshot, Spread};

/// Content type of the rendered exposition.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub(crate) const UP: &str = "nagios_up";
pub(crate) const HOSTS_TOTAL: &str = "nagios_hosts_total";
pub(crate) const HOSTS_CHECKED: &str = "nagios_hosts_checked_total";
pub(crate) const HOSTS_STATUS: &str = "nagios_hosts_status_total";
pub(crate) const HOSTS_DOWNTIME: &str = "nagios_hosts_downtime_total";
pub(crate) const HOSTS_ACKNOWLEDGES: &str = "nagios_hosts_acknowledges_total";
pub(crate) const SERVICES_TOTAL: &str = "nagios_services_total";
pub(crate) const SERVICES_CHECKED: &str = "nagios_services_checked_total";
pub(crate) const SERVICES_STATUS: &str = "nagios_services_status_total";
pub(crate) const SERVICES_DOWNTIME: &str = "nagios_services_downtime_total";
pub(crate) const SERVICES_ACKNOWLEDGES: &str = "nagios_services_acknowledges_total";
pub(crate) const VERSION_INFO: &str = "nagios_version_info";
pub(crate) const BUILD_INFO: &str = "nagios_build_info";
pub(crate) const HOST_CHECKS: &str = "nagios_host_checks_minutes";
pub(crate) const SERVICE_CHECKS: &str = "nagios_service_checks_minutes";
pub(crate) const HOST_PERFORMANCE: &str = "nagios_host_checks_performance_seconds";
pub(crate) const SERVICE_PERFORMANCE: &str = "nagios_service_checks_performance_seconds";
pub(crate) const USERS_TOTAL: &str = "nagios_users_total";
pub(crate) const USERS_PRIVILEGES: &str = "nagios_users_privileges_total";
pub(crate) const USERS_STATUS: &str = "nagios_users_status_total";
pub(crate) const UPDATE_AVAILABLE: &str = "nagios_update_available_info";

/// Upper bounds, in minutes, of the check window histograms.
const CHECK_WINDOW_BUCKETS: [f64; 3] = [1.0, 5.0, 15.0];

const UNKNOWN: &str = "unknown";

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`render`]
pub enum Error {
    /// The Prometheus recorder could not be configured.
    #[error("Failed to build Prometheus recorder: {0}")]
    Recorder(#[from] BuildError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Gauge,
    Histogram,
}

/// When a metric is present in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Availability {
    /// Every source
    Always,
    /// Sources that report acknowledgements and users
    Extended,
    /// Only with the update check enabled
    OptIn,
}

const CATALOGUE: [(&str, Kind, Availability, &str); 21] = [
    (UP, Kind::Gauge, Availability::Always, "Whether Nagios can be reached"),
    (HOSTS_TOTAL, Kind::Gauge, Availability::Always, "Amount of hosts present in configuration"),
    (HOSTS_CHECKED, Kind::Gauge, Availability::Always, "Amount of hosts checked"),
    (HOSTS_STATUS, Kind::Gauge, Availability::Always, "Amount of hosts in different states"),
    (HOSTS_DOWNTIME, Kind::Gauge, Availability::Always, "Amount of hosts in downtime"),
    (
        HOSTS_ACKNOWLEDGES,
        Kind::Gauge,
        Availability::Extended,
        "Amount of host problems acknowledged",
    ),
    (
        SERVICES_TOTAL,
        Kind::Gauge,
        Availability::Always,
        "Amount of services present in configuration",
    ),
    (SERVICES_CHECKED, Kind::Gauge, Availability::Always, "Amount of services checked"),
    (
        SERVICES_STATUS,
        Kind::Gauge,
        Availability::Always,
        "Amount of services in different states",
    ),
    (SERVICES_DOWNTIME, Kind::Gauge, Availability::Always, "Amount of services in downtime"),
    (
        SERVICES_ACKNOWLEDGES,
        Kind::Gauge,
        Availability::Extended,
        "Amount of service problems acknowledged",
    ),
    (VERSION_INFO, Kind::Gauge, Availability::Always, "Nagios version information"),
    (BUILD_INFO, Kind::Gauge, Availability::Always, "Nagios exporter build information"),
    (HOST_CHECKS, Kind::Histogram, Availability::Always, "Host checks over time"),
    (SERVICE_CHECKS, Kind::Histogram, Availability::Always, "Service checks over time"),
    (HOST_PERFORMANCE, Kind::Gauge, Availability::Always, "Host checks performance"),
    (SERVICE_PERFORMANCE, Kind::Gauge, Availability::Always, "Service checks performance"),
    (USERS_TOTAL, Kind::Gauge, Availability::Extended, "Amount of users present on the system"),
    (
        USERS_PRIVILEGES,
        Kind::Gauge,
        Availability::Extended,
        "Amount of admin or regular users",
    ),
    (
        USERS_STATUS,
        Kind::Gauge,
        Availability::Extended,
        "Amount of disabled or enabled users",
    ),
    (UPDATE_AVAILABLE, Kind::Gauge, Availability::OptIn, "Nagios XI update availability"),
];

/// Names of the metrics a successful scrape always emits. `extended` adds
/// acknowledgement and user metrics. The opt-in update metric is never
/// included.
#[must_use]
pub fn declared(extended: bool) -> Vec<&'static str> {
    CATALOGUE
        .iter()
        .filter(|(_, _, availability, _)| match availability {
            Availability::Always => true,
            Availability::Extended => extended,
            Availability::OptIn => false,
        })
        .map(|(name, _, _, _)| *name)
        .collect()
}

/// Describe every metric in the catalogue to the current recorder.
/// Extended metrics are described only when `extended` is set.
pub fn describe(extended: bool) {
    for (name, kind, availability, help) in CATALOGUE {
        if availability == Availability::Extended && !extended {
            continue;
        }
        match kind {
            Kind::Gauge => describe_gauge!(name, help),
            Kind::Histogram => describe_histogram!(name, help),
        }
    }
}

/// Record the exporter's own build information.
pub fn emit_build_info() {
    gauge!(
        BUILD_INFO,
        "version" => env!("CARGO_PKG_VERSION"),
        "build_date" => option_env!("NAGIOS_EXPORTER_BUILD_DATE").unwrap_or(UNKNOWN),
        "commit" => option_env!("NAGIOS_EXPORTER_COMMIT").unwrap_or(UNKNOWN)
    )
    .set(1.0);
}

/// Record every sample `snapshot` carries into the current recorder.
pub fn emit(snapshot: &Snapshot) {
    gauge!(UP).set(snapshot.up);
    gauge!(VERSION_INFO, "version" => snapshot.version.clone()).set(1.0);

    let hosts = &snapshot.hosts;
    gauge!(HOSTS_TOTAL).set(hosts.total);
    gauge!(HOSTS_CHECKED, "check_type" => "active").set(hosts.active);
    gauge!(HOSTS_CHECKED, "check_type" => "passive").set(hosts.passive);
    gauge!(HOSTS_STATUS, "status" => "up").set(hosts.up);
    gauge!(HOSTS_STATUS, "status" => "down").set(hosts.down);
    gauge!(HOSTS_STATUS, "status" => "unreachable").set(hosts.unreachable);
    gauge!(HOSTS_STATUS, "status" => "flapping").set(hosts.flapping);
    gauge!(HOSTS_DOWNTIME).set(hosts.downtime);
    if let Some(acknowledged) = hosts.acknowledged {
        gauge!(HOSTS_ACKNOWLEDGES).set(acknowledged);
    }

    let services = &snapshot.services;
    gauge!(SERVICES_TOTAL).set(services.total);
    gauge!(SERVICES_CHECKED, "check_type" => "active").set(services.active);
    gauge!(SERVICES_CHECKED, "check_type" => "passive").set(services.passive);
    gauge!(SERVICES_STATUS, "status" => "ok").set(services.ok);
    gauge!(SERVICES_STATUS, "status" => "warn").set(services.warning);
    gauge!(SERVICES_STATUS, "status" => "critical").set(services.critical);
    gauge!(SERVICES_STATUS, "status" => "unknown").set(services.unknown);
    gauge!(SERVICES_STATUS, "status" => "flapping").set(services.flapping);
    gauge!(SERVICES_DOWNTIME).set(services.downtime);
    if let Some(acknowledged) = services.acknowledged {
        gauge!(SERVICES_ACKNOWLEDGES).set(acknowledged);
    }

    emit_check_activity(HOST_CHECKS, snapshot.host_checks);
    emit_check_activity(SERVICE_CHECKS, snapshot.service_checks);
    emit_performance(HOST_PERFORMANCE, snapshot.host_performance);
    emit_performance(SERVICE_PERFORMANCE, snapshot.service_performance);

    if let Some(users) = snapshot.users {
        gauge!(USERS_TOTAL).set(users.total);
        gauge!(USERS_PRIVILEGES, "privileges" => "admin").set(users.admin);
        gauge!(USERS_PRIVILEGES, "privileges" => "user").set(users.regular);
        gauge!(USERS_STATUS, "status" => "enabled").set(users.enabled);
        gauge!(USERS_STATUS, "status" => "disabled").set(users.disabled);
    }

    if let Some(update) = &snapshot.update {
        gauge!(
            UPDATE_AVAILABLE,
            "installed_version" => update.installed.clone(),
            "latest_version" => update.latest.clone(),
            "available" => update.available.to_string()
        )
        .set(1.0);
    }
}

fn emit_check_activity(name: &'static str, activity: CheckActivity) {
    record_windows(name, "active", activity.active);
    record_windows(name, "passive", activity.passive);
}

/// Record cumulative check windows as histogram observations. The 1 minute
/// bucket receives the last minute's checks, each wider bucket the checks
/// not already counted by a narrower one, so bucket counts equal the window
/// counts and the histogram count equals the 15 minute window.
///
/// Windows that fail [`CheckWindows::implausible`] are skipped, which keeps
/// the number of observations bounded by [`crate::snapshot::MAX_WINDOW_CHECKS`].
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn record_windows(name: &'static str, check_type: &'static str, windows: CheckWindows) {
    if let Some((minutes, value)) = windows.implausible() {
        warn!("Skipping {name}{{check_type=\"{check_type}\"}}: {minutes}m window is {value}");
        return;
    }
    let handle = histogram!(name, "check_type" => check_type);
    let mut seen = 0.0_f64;
    for (bound, cumulative) in CHECK_WINDOW_BUCKETS.into_iter().zip([
        windows.last_1m,
        windows.last_5m,
        windows.last_15m,
    ]) {
        let fresh = (cumulative - seen).max(0.0);
        for _ in 0..fresh.round() as u64 {
            handle.record(bound);
        }
        seen = seen.max(cumulative);
    }
}

fn emit_performance(name: &'static str, performance: CheckPerformance) {
    emit_spread(name, "latency", performance.latency);
    emit_spread(name, "execution", performance.execution);
}

fn emit_spread(name: &'static str, performance_type: &'static str, spread: Spread) {
    for (operator, value) in [("avg", spread.avg), ("min", spread.min), ("max", spread.max)] {
        gauge!(
            name,
            "check_type" => "active",
            "performance_type" => performance_type,
            "operator" => operator
        )
        .set(value);
    }
}

fn recorder() -> Result<PrometheusRecorder, Error> {
    let mut builder = PrometheusBuilder::new();
    for name in [HOST_CHECKS, SERVICE_CHECKS] {
        builder =
            builder.set_buckets_for_metric(Matcher::Full(name.to_string()), &CHECK_WINDOW_BUCKETS)?;
    }
    Ok(builder.build_recorder())
}

/// Render one scrape. `None` means collection failed: only `nagios_up 0`
/// and the build information are emitted.
///
/// # Errors
///
/// Returns an error if the recorder cannot be configured.
pub fn render(snapshot: Option<&Snapshot>, extended: bool) -> Result<String, Error> {
    let recorder = recorder()?;
    metrics::with_local_recorder(&recorder, || {
        describe(extended);
        emit_build_info();
        match snapshot {
            Some(snapshot) => emit(snapshot),
            None => gauge!(UP).set(0.0),
        }
    });
    Ok(recorder.handle().render())
}

#[allow(clippy::mutable_key_type)] // CompositeKey has interior mutability
#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use metrics::{Key, Label, SharedString, Unit};
    use metrics_util::{
        CompositeKey, MetricKind,
        debugging::{DebugValue, DebuggingRecorder},
    };

    use super::*;
    use crate::{
        snapshot::{HostTally, ServiceTally, UserTally},
        update::UpdateInfo,
    };

    type Captured = HashMap<CompositeKey, (Option<Unit>, Option<SharedString>, DebugValue)>;

    fn snapshot() -> Snapshot {
        Snapshot {
            up: 1.0,
            version: "5.8.10".to_string(),
            hosts: HostTally {
                total: 3.0,
                active: 2.0,
                passive: 1.0,
                up: 1.0,
                down: 1.0,
                unreachable: 1.0,
                flapping: 1.0,
                downtime: 1.0,
                acknowledged: Some(1.0),
            },
            services: ServiceTally {
                total: 4.0,
                warning: 1.0,
                acknowledged: Some(2.0),
                ..ServiceTally::default()
            },
            users: Some(UserTally {
                total: 3.0,
                admin: 1.0,
                regular: 2.0,
                enabled: 2.0,
                disabled: 1.0,
            }),
            host_checks: CheckActivity {
                active: CheckWindows {
                    last_1m: 1.0,
                    last_5m: 4.0,
                    last_15m: 12.0,
                },
                passive: CheckWindows::default(),
            },
            host_performance: CheckPerformance {
                latency: Spread {
                    avg: 0.1,
                    min: 0.0,
                    max: 0.3,
                },
                execution: Spread::default(),
            },
            ..Snapshot::default()
        }
    }

    fn capture(snapshot: &Snapshot) -> Captured {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, || emit(snapshot));
        snapshotter.snapshot().into_hashmap()
    }

    fn gauge_value(captured: &Captured, name: &'static str, labels: &[(&str, &str)]) -> f64 {
        let labels: Vec<Label> = labels
            .iter()
            .map(|(k, v)| Label::new(k.to_string(), v.to_string()))
            .collect();
        let key = CompositeKey::new(MetricKind::Gauge, Key::from_parts(name, labels));
        match captured.get(&key) {
            Some((_, _, DebugValue::Gauge(value))) => value.into_inner(),
            other => panic!("unexpected value for {name}: {other:?}"),
        }
    }

    #[test]
    fn snapshot_values_are_emitted() {
        let captured = capture(&snapshot());

        assert_eq!(gauge_value(&captured, UP, &[]), 1.0);
        assert_eq!(gauge_value(&captured, VERSION_INFO, &[("version", "5.8.10")]), 1.0);
        assert_eq!(gauge_value(&captured, HOSTS_CHECKED, &[("check_type", "passive")]), 1.0);
        assert_eq!(gauge_value(&captured, HOSTS_STATUS, &[("status", "unreachable")]), 1.0);
        assert_eq!(gauge_value(&captured, SERVICES_STATUS, &[("status", "warn")]), 1.0);
        assert_eq!(gauge_value(&captured, SERVICES_ACKNOWLEDGES, &[]), 2.0);
        assert_eq!(gauge_value(&captured, USERS_PRIVILEGES, &[("privileges", "user")]), 2.0);
        assert_eq!(
            gauge_value(
                &captured,
                HOST_PERFORMANCE,
                &[
                    ("check_type", "active"),
                    ("performance_type", "latency"),
                    ("operator", "max"),
                ],
            ),
            0.3
        );
    }

    #[test]
    fn check_windows_become_histogram_samples() {
        let captured = capture(&snapshot());
        let key = CompositeKey::new(
            MetricKind::Histogram,
            Key::from_parts(HOST_CHECKS, vec![Label::new("check_type", "active")]),
        );
        match captured.get(&key) {
            Some((_, _, DebugValue::Histogram(samples))) => {
                let at = |bound: f64| samples.iter().filter(|s| s.into_inner() == bound).count();
                assert_eq!(samples.len(), 12);
                assert_eq!(at(1.0), 1);
                assert_eq!(at(5.0), 3);
                assert_eq!(at(15.0), 8);
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn nagiostats_snapshot_omits_extended_metrics() {
        let mut snapshot = snapshot();
        snapshot.hosts.acknowledged = None;
        snapshot.services.acknowledged = None;
        snapshot.users = None;

        let captured = capture(&snapshot);
        let names: Vec<&str> = captured.keys().map(|key| key.key().name()).collect();
        for absent in [HOSTS_ACKNOWLEDGES, SERVICES_ACKNOWLEDGES, USERS_TOTAL, USERS_STATUS] {
            assert!(!names.contains(&absent), "{absent} should not be emitted");
        }
    }

    #[test]
    fn render_contains_every_declared_metric() {
        let text = render(Some(&snapshot()), true).expect("failed to render");
        for name in declared(true) {
            assert!(text.contains(name), "{name} missing from:\n{text}");
        }
        assert!(text.contains("# HELP nagios_hosts_total Amount of hosts present in configuration"));
        assert!(text.contains(r#"nagios_host_checks_minutes_bucket{check_type="active",le="5"} 4"#));
        assert!(text.contains(r#"nagios_host_checks_minutes_count{check_type="active"} 12"#));
        assert!(!text.contains(UPDATE_AVAILABLE));
    }

    #[test]
    fn failed_collection_renders_down() {
        let text = render(None, true).expect("failed to render");
        assert!(text.contains("nagios_up 0"));
        assert!(text.contains(BUILD_INFO));
        assert!(!text.contains(HOSTS_TOTAL));
    }

    #[test]
    fn update_info_is_rendered_when_present() {
        let mut snapshot = snapshot();
        snapshot.update = Some(UpdateInfo {
            installed: "5.8.10".to_string(),
            latest: "5.9.3".to_string(),
            available: true,
        });
        let text = render(Some(&snapshot), true).expect("failed to render");
        assert!(text.contains(
            r#"nagios_update_available_info{installed_version="5.8.10",latest_version="5.9.3",available="true"} 1"#
        ));
    }

    #[test]
    fn each_render_starts_empty() {
        let first = render(Some(&snapshot()), true).expect("failed to render");
        let second = render(Some(&snapshot()), true).expect("failed to render");
        assert!(first.contains(r#"nagios_host_checks_minutes_count{check_type="active"} 12"#));
        assert!(second.contains(r#"nagios_host_checks_minutes_count{check_type="active"} 12"#));
    }

    #[test]
    fn implausible_windows_are_skipped() {
        let mut snapshot = snapshot();
        snapshot.service_checks.active.last_15m = 1e12;
        snapshot.service_checks.passive.last_5m = f64::NAN;
        snapshot.host_checks.passive.last_1m = f64::INFINITY;

        let start = std::time::Instant::now();
        let text = render(Some(&snapshot), true).expect("failed to render");
        assert!(start.elapsed() < std::time::Duration::from_secs(5));

        assert!(!text.contains(r#"nagios_service_checks_minutes_count{check_type="active"}"#));
        assert!(!text.contains(r#"nagios_service_checks_minutes_count{check_type="passive"}"#));
        assert!(!text.contains(r#"nagios_host_checks_minutes_count{check_type="passive"}"#));
        assert!(text.contains(r#"nagios_host_checks_minutes_count{check_type="active"} 12"#));
    }
}
