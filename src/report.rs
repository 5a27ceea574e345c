//! Phase-keyed progress reports

use std::collections::BTreeMap;
use std::fmt;

use imageprogress_protocol::LayerStatusEvent;
use serde::Serialize;

use crate::phase::Phase;

/// Totals for all layers currently in one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseDetail {
    /// Number of layers in the phase
    pub count: usize,
    /// Sum of `current` bytes over layers that reported byte detail
    pub current: i64,
    /// Sum of `total` bytes over layers that reported byte detail
    pub total: i64,
}

/// Snapshot of every known layer, folded by phase.
///
/// Only phases with at least one layer are present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    phases: BTreeMap<Phase, PhaseDetail>,
}

impl Report {
    /// Fold the latest status of each layer into a report.
    pub fn build<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a LayerStatusEvent>,
    {
        let mut phases: BTreeMap<Phase, PhaseDetail> = BTreeMap::new();
        for record in records {
            let detail = phases.entry(Phase::from_status(&record.status)).or_default();
            detail.count += 1;
            if let Some(progress) = record.progress_detail {
                detail.current = detail.current.saturating_add(progress.current);
                detail.total = detail.total.saturating_add(progress.total);
            }
        }
        Self { phases }
    }

    pub fn get(&self, phase: Phase) -> Option<&PhaseDetail> {
        self.phases.get(&phase)
    }

    /// Layers in `phase`, zero if absent.
    pub fn count(&self, phase: Phase) -> usize {
        self.phases.get(&phase).map_or(0, |d| d.count)
    }

    /// Layers across all phases.
    pub fn total_count(&self) -> usize {
        self.phases.values().map(|d| d.count).sum()
    }

    /// Byte progress of `phase` as a percentage in `[0, 100]`.
    ///
    /// Zero when the phase is absent or no layer in it reported a total.
    pub fn percent_progress(&self, phase: Phase) -> f32 {
        let Some(detail) = self.phases.get(&phase) else {
            return 0.0;
        };
        if detail.total == 0 {
            return 0.0;
        }
        let pct = detail.current as f32 / detail.total as f32 * 100.0;
        pct.clamp(0.0, 100.0)
    }

    /// Phases present in this report, in [`Phase`] order.
    pub fn phases(&self) -> impl Iterator<Item = Phase> + '_ {
        self.phases.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Phase, &PhaseDetail)> + '_ {
        self.phases.iter().map(|(p, d)| (*p, d))
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (phase, detail)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", phase, detail.count)?;
            if detail.total > 0 {
                write!(f, " ({}/{})", detail.current, detail.total)?;
            }
        }
        f.write_str("}")
    }
}

/// Production change policy: two reports differ iff their sets of present
/// phases differ. Counts and byte totals are ignored; byte-only progress is
/// surfaced by the heartbeat instead.
pub fn phases_changed(old: &Report, new: &Report) -> bool {
    !old.phases().eq(new.phases())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(id: &str, status: &str) -> LayerStatusEvent {
        LayerStatusEvent::new(id, status)
    }

    #[test]
    fn build_counts_and_sums() {
        let records = vec![
            layer("a1", "Downloading").with_progress(100, 400),
            layer("b2", "Downloading").with_progress(50, 100),
            layer("c3", "Downloading"),
            layer("d4", "Pull complete"),
            layer("e5", "Waiting"),
        ];
        let report = Report::build(&records);

        assert_eq!(
            report.get(Phase::Downloading),
            Some(&PhaseDetail {
                count: 3,
                current: 150,
                total: 500
            })
        );
        assert_eq!(report.count(Phase::Complete), 1);
        assert_eq!(report.count(Phase::Pending), 1);
        assert_eq!(report.count(Phase::Pushing), 0);
        assert!(report.get(Phase::Extracting).is_none());
        assert_eq!(report.total_count(), 5);
    }

    #[test]
    fn build_is_repeatable() {
        let records = vec![
            layer("a1", "Extracting").with_progress(3, 9),
            layer("b2", "Pushing").with_progress(1, 2),
        ];
        let first = Report::build(&records);
        let second = Report::build(&records);
        assert_eq!(first, second);
        assert!(first.phases().eq(second.phases()));
    }

    #[test]
    fn byte_sums_saturate() {
        let records = vec![
            layer("a1", "Downloading").with_progress(i64::MAX, i64::MAX),
            layer("b2", "Downloading").with_progress(i64::MAX, i64::MAX),
            layer("c3", "Pushing").with_progress(i64::MIN, 10),
            layer("d4", "Pushing").with_progress(-1, 10),
        ];
        let report = Report::build(&records);

        let downloading = report.get(Phase::Downloading).unwrap();
        assert_eq!(downloading.count, 2);
        assert_eq!(downloading.current, i64::MAX);
        assert_eq!(downloading.total, i64::MAX);
        assert_eq!(report.percent_progress(Phase::Downloading), 100.0);
        assert_eq!(report.get(Phase::Pushing).unwrap().current, i64::MIN);
    }

    #[test]
    fn empty_records_build_empty_report() {
        let report = Report::build(std::iter::empty());
        assert!(report.is_empty());
        assert_eq!(report.total_count(), 0);
        assert_eq!(report.to_string(), "{}");
    }

    #[test]
    fn percent_progress_clamps() {
        let records = vec![
            layer("a1", "Downloading").with_progress(150, 100),
            layer("b2", "Pushing").with_progress(-10, 100),
            layer("c3", "Extracting"),
        ];
        let report = Report::build(&records);
        assert_eq!(report.percent_progress(Phase::Downloading), 100.0);
        assert_eq!(report.percent_progress(Phase::Pushing), 0.0);
        assert_eq!(report.percent_progress(Phase::Extracting), 0.0);
        assert_eq!(report.percent_progress(Phase::Complete), 0.0);
    }

    #[test]
    fn percent_progress_ratio() {
        let records = vec![layer("a1", "Downloading").with_progress(1, 4)];
        let report = Report::build(&records);
        assert_eq!(report.percent_progress(Phase::Downloading), 25.0);
    }

    #[test]
    fn display_lists_phases_in_order() {
        let records = vec![
            layer("a1", "Pull complete"),
            layer("b2", "Downloading").with_progress(512, 1024),
            layer("c3", "Downloading").with_progress(0, 0),
        ];
        let report = Report::build(&records);
        assert_eq!(report.to_string(), "{downloading: 2 (512/1024), complete: 1}");
    }

    #[test]
    fn phases_changed_compares_membership_only() {
        let a = Report::build(&[layer("a1", "Downloading").with_progress(1, 10)]);
        let b = Report::build(&[
            layer("a1", "Downloading").with_progress(9, 10),
            layer("b2", "Downloading"),
        ]);
        let c = Report::build(&[layer("a1", "Downloading"), layer("b2", "Pull complete")]);

        assert!(!phases_changed(&a, &b));
        assert!(phases_changed(&b, &c));
        assert!(phases_changed(&c, &b));
        assert!(phases_changed(&Report::default(), &a));
        assert!(!phases_changed(&Report::default(), &Report::default()));
    }
}
