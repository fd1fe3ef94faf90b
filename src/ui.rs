//! Terminal output: a live spinner while a run is going and colored
//! summaries afterwards.

use std::path::Path;
use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::board::RunSnapshot;
use crate::controller::RunSummary;
use crate::results::ResultSummary;

/// Spinner showing queue and slot usage of a running search.
#[derive(Clone)]
pub struct RunProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    dim: Style,
}

impl RunProgress {
    pub fn start(mode: &str, capacity: usize) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!("{mode}: generating candidates (capacity {capacity})"));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            dim: Style::new().dim(),
        }
    }

    pub fn update(&self, snapshot: &RunSnapshot) {
        let generating = if snapshot.all_submitted { "" } else { " +generating" };
        self.pb.set_message(format!(
            "queued {} | active {}/{} | done {}/{} ({} failed){generating}",
            snapshot.queued,
            snapshot.active,
            snapshot.capacity,
            snapshot.finished + snapshot.failed,
            snapshot.total,
            snapshot.failed,
        ));
    }

    /// Clear the spinner and print the run summary.
    pub fn finish(&self, summary: &RunSummary) {
        self.pb.finish_and_clear();
        let mark = if summary.failed == 0 {
            self.green.apply_to("✓")
        } else {
            self.red.apply_to("!")
        };
        println!(
            "  {mark} Run {} ({}) started {} done in {:.1}s",
            summary.run_id,
            summary.mode,
            summary.started_at.format("%Y-%m-%d %H:%M:%S"),
            summary.elapsed.as_secs_f64()
        );
        println!(
            "    {} finished, {} failed, {} rejected attempts, {} abandoned rungs",
            self.green.apply_to(summary.finished),
            self.red.apply_to(summary.failed),
            summary.generation.duplicates
                + summary.generation.restarts
                + summary.generation.closing_failures
                + summary.generation.invalid_metrics,
            summary.generation.abandoned_rungs,
        );
        if let Some((id, value)) = summary.best() {
            println!("    best: {id} = {value:.4}");
        }
        println!(
            "    {}",
            self.dim.apply_to(format!("results: {}", summary.result_log.display()))
        );
    }
}

/// Print an aggregate of a result log.
pub fn print_status(path: &Path, summary: &ResultSummary) {
    let green = Style::new().green().bold();
    let red = Style::new().red().bold();
    println!("{}", Style::new().bold().apply_to(path.display()));
    println!(
        "  {} finished, {} failed",
        green.apply_to(summary.finished),
        red.apply_to(summary.failed)
    );
    match (&summary.best, summary.mean_property) {
        (Some((id, best)), Some(mean)) => {
            println!("  best: {id} = {best:.4}");
            println!("  mean: {mean:.4}");
        }
        _ => println!("  no finished jobs yet"),
    }
}
