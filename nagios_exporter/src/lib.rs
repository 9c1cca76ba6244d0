//! The nagios exporter.
//!
//! This library supports the `nagios_exporter` binary found elsewhere in this
//! project. On every scrape the exporter asks Nagios for its current status,
//! through either the Nagios XI REST API or a local `nagiostats` binary, and
//! renders what it learns in the Prometheus text exposition format.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod exposition;
pub mod httpd;
pub mod redact;
pub mod snapshot;
pub mod source;
pub mod update;
