//! Human-readable status lines for pulls and pushes.

use crate::phase::Phase;
use crate::report::Report;

/// Report sink for image pulls.
///
/// Prints `Pulled n/m layers, p% complete`, counting layers that are being
/// extracted as pulled. Once every layer has left the pending and
/// downloading phases, prints a final 100% line followed by `Extracting`
/// and stays quiet for the rest of the run.
pub fn pull_reporter<F>(mut print: F) -> impl FnMut(&Report) + Send
where
    F: FnMut(String) + Send,
{
    let mut extracting = false;
    move |report: &Report| {
        if extracting {
            return;
        }
        let total = report.total_count();
        if total == 0 {
            return;
        }
        if report.count(Phase::Downloading) == 0
            && report.count(Phase::Pending) == 0
            && report.count(Phase::Extracting) > 0
        {
            print(format!("Pulled {total}/{total} layers, 100% complete"));
            print("Extracting".to_string());
            extracting = true;
            return;
        }

        let done = report.count(Phase::Complete) + report.count(Phase::Extracting);
        let pct = completion(report, done, Phase::Downloading);
        print(format!("Pulled {done}/{total} layers, {pct:.0}% complete"));
    }
}

/// Report sink for image pushes: prints `Pushed n/m layers, p% complete`.
pub fn push_reporter<F>(mut print: F) -> impl FnMut(&Report) + Send
where
    F: FnMut(String) + Send,
{
    move |report: &Report| {
        let total = report.total_count();
        if total == 0 {
            return;
        }
        let done = report.count(Phase::Complete);
        let pct = completion(report, done, Phase::Pushing);
        print(format!("Pushed {done}/{total} layers, {pct:.0}% complete"));
    }
}

/// Overall percentage: finished layers count fully, layers in `active`
/// count by their byte progress.
fn completion(report: &Report, done: usize, active: Phase) -> f32 {
    let total = report.total_count() as f32;
    let finished = done as f32 / total;
    let in_flight = report.count(active) as f32 / total * report.percent_progress(active) / 100.0;
    (finished + in_flight) * 100.0
}
