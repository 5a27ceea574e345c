//! imageprogress: coalesced progress reporting for container image pulls
//! and pushes.
//!
//! A container runtime reports transfer progress as a stream of JSON status
//! objects, several per second per layer. This crate folds that stream into
//! occasional [`Report`]s that count layers per [`Phase`] and sum their byte
//! progress, suitable for a log line or a status bar.
//!
//! # Pipeline
//!
//! ```text
//! bytes ─▶ StatusDecoder ─▶ layer filter ─▶ records ─▶ stability gate
//!                                                      │
//!          ReportSink ◀─ change / heartbeat gate ◀─ Report::build
//! ```
//!
//! - [`Aggregator`] owns all per-run state and drives the loop.
//! - [`ProgressWriter`] runs an aggregator on its own thread behind an
//!   [`std::io::Write`] pipe, so a producer can simply copy runtime output
//!   into it.
//! - [`pull_reporter`] / [`push_reporter`] turn reports into
//!   `Pulled 3/5 layers, 62% complete` style lines.
//!
//! # Example
//!
//! ```no_run
//! use std::io::Write;
//! use imageprogress::{AggregatorConfig, ProgressWriter};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut writer = ProgressWriter::pull(AggregatorConfig::default(), |line| {
//!         eprintln!("{}", line);
//!     })?;
//!
//!     let mut daemon_output = std::fs::File::open("pull.json")?;
//!     std::io::copy(&mut daemon_output, &mut writer)?;
//!     writer.flush()?;
//!     writer.finish()?;
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod config;
pub mod error;
pub mod phase;
pub mod report;
pub mod reporter;
pub mod writer;

pub use aggregator::{Aggregator, ChangePolicy, Clock, Emission, Outcome, ReportSink, SystemClock};
pub use config::AggregatorConfig;
pub use error::{Error, Result};
pub use imageprogress_protocol as protocol;
pub use imageprogress_protocol::{LayerStatusEvent, ProgressDetail, StatusDecoder};
pub use phase::Phase;
pub use report::{phases_changed, PhaseDetail, Report};
pub use reporter::{pull_reporter, push_reporter};
pub use writer::{run_detached, ProgressWriter};
