//! Console rendering of plans and run reports, and live progress

use colored::{ColoredString, Colorize};
use declarative::{
    ExecutionRecord, ProgressCallback, Reconciliation, RunReport, StepStatus,
};
use indicatif::{ProgressBar, ProgressStyle};

use crate::operation::Operation;
use crate::ui;

/// Lines of remote output shown under a failed step
const OUTPUT_TAIL: usize = 10;

fn symbol(status: StepStatus) -> ColoredString {
    match status {
        StepStatus::Succeeded => "✓".green(),
        StepStatus::Failed => "✗".red(),
        StepStatus::Skipped => "⊘".yellow(),
        StepStatus::RolledBack => "↺".magenta(),
        StepStatus::Pending | StepStatus::Running => "○".dimmed(),
    }
}

/// Compact wall-time display: `850ms`, `12.3s`, `4m05s`
pub fn format_duration(duration: chrono::Duration) -> String {
    let ms = duration.num_milliseconds().max(0);
    if ms < 1000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1000)
    }
}

/// One-line tally of a report, e.g. `3 succeeded, 1 failed, 2 skipped`
pub fn summary_line(report: &RunReport) -> String {
    let parts: Vec<String> = [
        StepStatus::Succeeded,
        StepStatus::Failed,
        StepStatus::Skipped,
        StepStatus::RolledBack,
    ]
    .into_iter()
    .filter_map(|status| match report.count(status) {
        0 => None,
        n => Some(format!("{n} {status}")),
    })
    .collect();

    if parts.is_empty() {
        "nothing to do".to_string()
    } else {
        parts.join(", ")
    }
}

/// Show what a plan will do, wave by wave
pub fn print_plan(operation: Operation, host: &str, plan: &Reconciliation) -> anyhow::Result<()> {
    ui::header(&format!("{operation} on {host}"));
    println!("{}", operation.description().dimmed());

    if !plan.pruned.is_empty() {
        ui::section("Already satisfied");
        for id in &plan.pruned {
            println!("  {} {}", "○".dimmed(), id.dimmed());
        }
    }

    if !plan.has_changes() {
        println!();
        ui::success("Nothing to do");
        return Ok(());
    }

    ui::section("To run");
    for (i, layer) in plan.graph.layers()?.iter().enumerate() {
        println!("  {}", format!("wave {}", i + 1).blue().bold());
        for id in layer {
            let description = plan
                .graph
                .get(id)
                .map(|n| n.step.description())
                .unwrap_or_default();
            println!("    {} {}  {}", "→".cyan(), id, description.dimmed());
        }
    }
    Ok(())
}

fn print_record(record: &ExecutionRecord) {
    let duration = record
        .duration()
        .map(|d| format!(" ({})", format_duration(d)))
        .unwrap_or_default();
    println!(
        "  {} {}{}",
        symbol(record.status),
        record.step_id,
        duration.dimmed()
    );

    if let Some(error) = &record.error {
        println!("      {} {}", error.kind().red(), error.to_string().dimmed());
        let tail = record.output_tail(OUTPUT_TAIL);
        if !tail.is_empty() {
            println!("{}", ui::indent(&tail, "      │ ").dimmed());
        }
    }
    if let Some(reason) = &record.skip_reason {
        println!("      {}", reason.to_string().dimmed());
    }
    if let Some(error) = &record.rollback_error {
        println!("      {} {}", "rollback failed:".red(), error);
    }
}

/// Print every step's terminal status, failures with their output tail
pub fn print_report(report: &RunReport) {
    println!();
    for record in report.records() {
        print_record(record);
    }

    println!();
    let duration = format_duration(report.finished_at() - report.started_at());
    let line = format!("{} in {duration}", summary_line(report));
    if report.is_success() {
        ui::success(&line);
    } else if report.was_cancelled() {
        ui::warn(&format!("Cancelled: {line}"));
    } else {
        ui::error(&format!("Failed ({}): {line}", report.policy()));
    }
}

/// Live progress bar fed by the executor
pub struct ConsoleProgress {
    bar: ProgressBar,
    verbose: bool,
}

impl ConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        Self { bar, verbose }
    }

    /// Progress that draws nothing
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            verbose: false,
        }
    }
}

impl ProgressCallback for ConsoleProgress {
    fn on_run_start(&mut self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn on_step_start(&mut self, id: &str, description: &str) {
        self.bar.set_message(ui::truncate_start(id, 40));
        if self.verbose {
            self.bar
                .println(format!("  {} {}", "→".cyan(), description));
        }
    }

    fn on_step_complete(&mut self, record: &ExecutionRecord) {
        self.bar
            .println(format!("  {} {}", symbol(record.status), record.step_id));
        if self.verbose && !record.output.is_empty() {
            self.bar
                .println(ui::indent(record.output.trim_end(), "      │ ").dimmed().to_string());
        }
        self.bar.inc(1);
    }

    fn on_rollback(&mut self, id: &str) {
        self.bar
            .println(format!("  {} rolling back {}", "↺".magenta(), id));
    }

    fn on_run_complete(&mut self, _report: &RunReport) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::ShellStep;
    use declarative::{
        CommandOutput, Connection, ConnectionError, ExecuteOptions, FailurePolicy, PlanGraph,
        RemoteCommand, execute_simple,
    };
    use std::sync::Arc;

    /// Fails any command mentioning "boom"
    struct Boom;

    impl Connection for Boom {
        fn host(&self) -> &str {
            "boom"
        }

        fn run(&self, command: &RemoteCommand) -> Result<CommandOutput, ConnectionError> {
            if command.command.contains("boom") {
                Ok(CommandOutput::failed(2, "boom"))
            } else {
                Ok(CommandOutput::ok("fine"))
            }
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(chrono::Duration::milliseconds(850)), "850ms");
        assert_eq!(format_duration(chrono::Duration::milliseconds(12_340)), "12.3s");
        assert_eq!(format_duration(chrono::Duration::seconds(245)), "4m05s");
        assert_eq!(format_duration(chrono::Duration::milliseconds(-5)), "0ms");
    }

    #[test]
    fn test_summary_line_of_empty_report() {
        assert_eq!(
            summary_line(&RunReport::empty(FailurePolicy::FailFast)),
            "nothing to do"
        );
    }

    #[test]
    fn test_summary_line_counts() {
        let mut graph = PlanGraph::new();
        graph
            .add(ShellStep::new("create-home-dir", "a").run(RemoteCommand::new("true")), &[])
            .unwrap();
        graph
            .add(
                ShellStep::new("create-user", "b").run(RemoteCommand::new("boom")),
                &["create-home-dir"],
            )
            .unwrap();
        graph
            .add(
                ShellStep::new("chown-home", "c").run(RemoteCommand::new("true")),
                &["create-user"],
            )
            .unwrap();

        let report = execute_simple(graph, Arc::new(Boom), &ExecuteOptions::default()).unwrap();
        assert_eq!(summary_line(&report), "1 succeeded, 1 failed, 1 skipped");
        let failed = report.record("create-user").unwrap();
        assert_eq!(failed.output_tail(OUTPUT_TAIL), "boom");
    }
}
