//! Stabilization, change detection and the decode loop.
//!
//! An [`Aggregator`] owns all per-run state. Each decoded event passes two
//! gates before a report reaches the [`ReportSink`]:
//!
//! 1. **Layer-count stability.** While new layer ids keep appearing the
//!    manifest is still being enumerated and nothing is reported. Once the
//!    number of known layers has stayed the same for
//!    `stabilization_threshold` consecutive events, reporting starts.
//! 2. **Material change.** A fresh [`Report`] is built and compared against
//!    the last emitted one with the injected [`ChangePolicy`]. Changed
//!    reports are emitted immediately; unchanged ones only once
//!    `heartbeat_interval` has passed since the last emission.

use std::collections::HashMap;
use std::io::{BufReader, Read};
use std::time::Instant;

use imageprogress_protocol::{LayerStatusEvent, StatusDecoder};
use tracing::{debug, trace, warn};

use crate::config::AggregatorConfig;
use crate::report::Report;
use crate::{Error, Result};

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Receives every emitted report.
pub trait ReportSink {
    fn report(&mut self, report: &Report);
}

impl<F: FnMut(&Report)> ReportSink for F {
    fn report(&mut self, report: &Report) {
        self(report)
    }
}

/// Decides whether a new report differs materially from the last emitted one.
pub trait ChangePolicy {
    fn changed(&self, old: &Report, new: &Report) -> bool;
}

impl<F: Fn(&Report, &Report) -> bool> ChangePolicy for F {
    fn changed(&self, old: &Report, new: &Report) -> bool {
        self(old, new)
    }
}

/// Time source for heartbeat decisions.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Why a report was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emission {
    /// The change policy saw a material change.
    Changed,
    /// Nothing changed but the heartbeat interval elapsed.
    Heartbeat,
}

/// What [`Aggregator::observe`] did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Not a per-layer event; state untouched.
    Filtered,
    /// Recorded, but the layer count has not stabilized.
    Unstable,
    /// Recorded; no change and no heartbeat due.
    Unchanged,
    /// Recorded and a report was emitted.
    Reported(Emission),
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Per-run progress aggregation state.
pub struct Aggregator<S, C, K = SystemClock> {
    config: AggregatorConfig,
    records: HashMap<String, LayerStatusEvent>,
    last_layer_count: usize,
    stable_streak: usize,
    last_report: Report,
    last_report_time: Option<Instant>,
    sink: S,
    policy: C,
    clock: K,
}

impl<S: ReportSink, C: ChangePolicy> Aggregator<S, C, SystemClock> {
    /// Create an aggregator that hands reports to `sink` and uses `policy`
    /// to detect material changes.
    pub fn new(config: AggregatorConfig, sink: S, policy: C) -> Self {
        Self::with_clock(config, sink, policy, SystemClock)
    }
}

impl<S: ReportSink, C: ChangePolicy, K: Clock> Aggregator<S, C, K> {
    pub fn with_clock(config: AggregatorConfig, sink: S, policy: C, clock: K) -> Self {
        Self {
            config,
            records: HashMap::new(),
            last_layer_count: 0,
            stable_streak: 0,
            last_report: Report::default(),
            last_report_time: None,
            sink,
            policy,
            clock,
        }
    }

    /// Distinct layers seen so far.
    pub fn layer_count(&self) -> usize {
        self.records.len()
    }

    /// Latest status recorded for layer `id`.
    pub fn layer(&self, id: &str) -> Option<&LayerStatusEvent> {
        self.records.get(id)
    }

    /// The most recently emitted report (empty before the first emission).
    pub fn last_report(&self) -> &Report {
        &self.last_report
    }

    /// Build a report over the current records without emitting it.
    pub fn snapshot(&self) -> Report {
        Report::build(self.records.values())
    }

    /// Process one decoded event.
    ///
    /// Events carrying a runtime error terminate the run with
    /// [`Error::Remote`].
    pub fn observe(&mut self, event: LayerStatusEvent) -> Result<Outcome> {
        if let Some(message) = event.error_message() {
            warn!(id = %event.id, error = %message, "runtime reported failure");
            return Err(Error::Remote(message.to_string()));
        }

        if !event.is_layer_status() {
            trace!(id = %event.id, status = %event.status, "ignoring non-layer status");
            return Ok(Outcome::Filtered);
        }

        self.records.insert(event.id.clone(), event);

        if !self.is_layer_count_stable() {
            return Ok(Outcome::Unstable);
        }

        let report = self.snapshot();
        let now = self.clock.now();

        if self.policy.changed(&self.last_report, &report) {
            debug!(%report, "layer phases changed");
            self.sink.report(&report);
            self.last_report = report;
            self.last_report_time = Some(now);
            return Ok(Outcome::Reported(Emission::Changed));
        }

        let heartbeat_due = match self.last_report_time {
            None => true,
            Some(at) => now.saturating_duration_since(at) > self.config.heartbeat_interval,
        };
        if heartbeat_due {
            debug!(%report, "heartbeat report");
            self.sink.report(&report);
            self.last_report_time = Some(now);
            return Ok(Outcome::Reported(Emission::Heartbeat));
        }

        Ok(Outcome::Unchanged)
    }

    /// Decode and process events from `reader` until end of stream.
    ///
    /// Returns `Ok(())` on a clean EOF. The first decode error or runtime
    /// error ends the run; nothing after it is read.
    pub fn run<R: Read>(&mut self, reader: R) -> Result<()> {
        let mut decoder = StatusDecoder::new(BufReader::new(reader));
        loop {
            let event = match decoder.next_event() {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        offset = decoder.byte_offset(),
                        error = %e,
                        "progress stream decode failed"
                    );
                    return Err(e.into());
                }
            };
            self.observe(event)?;
        }
        debug!(layers = self.records.len(), "progress stream ended");
        Ok(())
    }

    /// Returns true once the number of known layers has held steady for
    /// `stabilization_threshold` consecutive observations.
    fn is_layer_count_stable(&mut self) -> bool {
        let count = self.records.len();
        if count != self.last_layer_count {
            debug!(
                layers = count,
                previous = self.last_layer_count,
                "layer count changed"
            );
            self.last_layer_count = count;
            self.stable_streak = 0;
            return false;
        }
        self.stable_streak += 1;
        self.stable_streak >= self.config.stabilization_threshold
    }
}
