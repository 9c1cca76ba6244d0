//! Decode targets for Nagios XI API responses.
//!
//! Nagios XI reports almost every number as a JSON string (`"0"`, `"0.123"`).
//! Fields here accept either a string or a bare number and fall back to zero
//! when absent. Unknown fields are ignored, the API returns far more than the
//! exporter needs.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Deserializer, de};

/// Deserialize a number that may be encoded as a string.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de> + Default,
    T::Err: Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw<T> {
        Number(T),
        Text(String),
        Null(()),
    }

    match Raw::<T>::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(text) => text
            .trim()
            .parse()
            .map_err(|err| de::Error::custom(format!("invalid number {text:?}: {err}"))),
        Raw::Null(()) => Ok(T::default()),
    }
}

/// `GET /system/status`
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
pub struct SystemStatus {
    /// 1 when the Nagios Core process is running
    #[serde(default, deserialize_with = "lenient")]
    pub is_currently_running: f64,
}

/// `GET /system/info`
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SystemInfo {
    /// Nagios XI release, e.g. `5.8.10`
    #[serde(default)]
    pub version: String,
}

/// The status fields shared by host and service records.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct ObjectStatus {
    /// 0 for active checks, 1 for passive
    #[serde(default, deserialize_with = "lenient")]
    pub check_type: i64,
    /// Host: 0 up, 1 down, 2 unreachable. Service: 0 ok, 1 warning, 2
    /// critical, 3 unknown.
    #[serde(default, deserialize_with = "lenient")]
    pub current_state: i64,
    /// 1 when flapping
    #[serde(default, deserialize_with = "lenient")]
    pub is_flapping: i64,
    /// Number of overlapping scheduled downtimes
    #[serde(default, deserialize_with = "lenient")]
    pub scheduled_downtime_depth: i64,
    /// 1 when the current problem is acknowledged
    #[serde(default, deserialize_with = "lenient")]
    pub problem_has_been_acknowledged: i64,
}

/// `GET /objects/hoststatus`
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct HostStatusList {
    /// Number of records the API claims to have returned
    #[serde(default, deserialize_with = "lenient")]
    pub recordcount: f64,
    /// One entry per configured host
    #[serde(default)]
    pub hoststatus: Vec<ObjectStatus>,
}

/// `GET /objects/servicestatus`
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ServiceStatusList {
    /// Number of records the API claims to have returned
    #[serde(default, deserialize_with = "lenient")]
    pub recordcount: f64,
    /// One entry per configured service
    #[serde(default)]
    pub servicestatus: Vec<ObjectStatus>,
}

/// One entry of `GET /system/user?advanced=1`
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    /// 1 for administrators
    #[serde(default, deserialize_with = "lenient")]
    pub admin: i64,
    /// 1 for enabled accounts
    #[serde(default, deserialize_with = "lenient")]
    pub enabled: i64,
}

/// `GET /system/user?advanced=1`
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct UserList {
    // Unlike every other endpoint this one calls its count `records`.
    /// Number of users on the system
    #[serde(default, deserialize_with = "lenient")]
    pub records: f64,
    /// One entry per user
    #[serde(default)]
    pub users: Vec<UserRecord>,
}

/// Rolling check counts, `valN` being the last N minutes.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
pub struct CheckCounts {
    /// Last minute
    #[serde(default, deserialize_with = "lenient")]
    pub val1: f64,
    /// Last five minutes
    #[serde(default, deserialize_with = "lenient")]
    pub val5: f64,
    /// Last fifteen minutes
    #[serde(default, deserialize_with = "lenient")]
    pub val15: f64,
}

/// Active check performance figures, in seconds.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
pub struct CheckPerf {
    /// Mean execution time
    #[serde(default, deserialize_with = "lenient")]
    pub avg_execution_time: f64,
    /// Mean latency
    #[serde(default, deserialize_with = "lenient")]
    pub avg_latency: f64,
    /// Longest execution time
    #[serde(default, deserialize_with = "lenient")]
    pub max_execution_time: f64,
    /// Longest latency
    #[serde(default, deserialize_with = "lenient")]
    pub max_latency: f64,
    /// Shortest execution time
    #[serde(default, deserialize_with = "lenient")]
    pub min_execution_time: f64,
    /// Shortest latency
    #[serde(default, deserialize_with = "lenient")]
    pub min_latency: f64,
}

/// The `nagioscore` object of `GET /system/statusdetail`
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
pub struct CoreDetail {
    /// Active host check performance
    #[serde(default)]
    pub activehostcheckperf: CheckPerf,
    /// Active host check volume
    #[serde(default)]
    pub activehostchecks: CheckCounts,
    /// Active service check performance
    #[serde(default)]
    pub activeservicecheckperf: CheckPerf,
    /// Active service check volume
    #[serde(default)]
    pub activeservicechecks: CheckCounts,
    /// Passive host check volume
    #[serde(default)]
    pub passivehostchecks: CheckCounts,
    /// Passive service check volume
    #[serde(default)]
    pub passiveservicechecks: CheckCounts,
}

/// `GET /system/statusdetail`
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
pub struct StatusDetail {
    /// Nagios Core scheduling statistics
    #[serde(default)]
    pub nagioscore: CoreDetail,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_status_decodes_string_numbers() {
        let body = r#"{
            "recordcount": 2,
            "hoststatus": [
                {"host_object_id": "140", "check_type": "0", "current_state": "1",
                 "is_flapping": "0", "scheduled_downtime_depth": "1",
                 "problem_has_been_acknowledged": "1", "host_name": "db01"},
                {"host_object_id": "141", "check_type": "1", "current_state": "0",
                 "is_flapping": "1", "scheduled_downtime_depth": "0",
                 "problem_has_been_acknowledged": "0"}
            ]
        }"#;
        let list: HostStatusList = serde_json::from_str(body).expect("failed to decode");
        assert_eq!(list.recordcount, 2.0);
        assert_eq!(
            list.hoststatus[0],
            ObjectStatus {
                check_type: 0,
                current_state: 1,
                is_flapping: 0,
                scheduled_downtime_depth: 1,
                problem_has_been_acknowledged: 1,
            }
        );
        assert_eq!(list.hoststatus[1].is_flapping, 1);
    }

    #[test]
    fn bare_numbers_and_nulls_are_accepted() {
        let body = r#"{"check_type": 1, "current_state": null}"#;
        let status: ObjectStatus = serde_json::from_str(body).expect("failed to decode");
        assert_eq!(status.check_type, 1);
        assert_eq!(status.current_state, 0);
    }

    #[test]
    fn malformed_number_is_an_error() {
        let body = r#"{"is_currently_running": "yes"}"#;
        assert!(serde_json::from_str::<SystemStatus>(body).is_err());
    }

    #[test]
    fn status_detail_decodes() {
        let body = r#"{"nagioscore": {
            "activehostchecks": {"val1": "2", "val5": "10", "val15": "30"},
            "activeservicecheckperf": {"avg_latency": "0.25", "min_latency": "0",
                "max_latency": "1.5", "avg_execution_time": "0.1",
                "min_execution_time": "0.01", "max_execution_time": "4"},
            "updated": "2024-01-01 00:00:00"
        }}"#;
        let detail: StatusDetail = serde_json::from_str(body).expect("failed to decode");
        assert_eq!(detail.nagioscore.activehostchecks.val15, 30.0);
        assert_eq!(detail.nagioscore.activeservicecheckperf.max_latency, 1.5);
        assert_eq!(detail.nagioscore.passivehostchecks, CheckCounts::default());
    }

    #[test]
    fn user_list_reads_records_field() {
        let body = r#"{"records": "2", "users": [
            {"admin": "1", "enabled": "1", "username": "nagiosadmin"},
            {"admin": "0", "enabled": "0"}
        ]}"#;
        let list: UserList = serde_json::from_str(body).expect("failed to decode");
        assert_eq!(list.records, 2.0);
        assert_eq!(list.users[1], UserRecord { admin: 0, enabled: 0 });
    }
}
