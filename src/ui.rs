//! Interface de terminal do outbox: spinner durante o tick e saída colorida.
//!
//! Usa `indicatif` para o spinner e `console` para as cores. O
//! [`TickProgress`] é o [`TickObserver`] usado pela CLI.

use std::path::Path;
use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::engine::{JobReport, StopReason, TickObserver, TickSummary};
use crate::publish::PublishReport;
use crate::queue::JobStatus;

/// Acompanha um tick no terminal.
///
/// Cada job terminado vira uma linha: verde para DONE, amarelo para
/// NEEDS_INPUT e vermelho para FAILED ou para um job que ficou preso.
pub struct TickProgress {
    pb: ProgressBar,
    total: usize,
    green: Style,
    red: Style,
    yellow: Style,
}

impl TickProgress {
    pub fn new() -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        Self {
            pb,
            total: 0,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    fn status_style(&self, status: JobStatus) -> &Style {
        match status {
            JobStatus::Done => &self.green,
            JobStatus::NeedsInput => &self.yellow,
            _ => &self.red,
        }
    }
}

impl Default for TickProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl TickObserver for TickProgress {
    fn tick_started(&mut self, pending: usize) {
        self.total = pending;
        self.pb.set_message(format!("{pending} pending job(s)"));
        self.pb.enable_steady_tick(Duration::from_millis(100));
    }

    fn job_started(&mut self, index: usize, path: &Path) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.pb
            .set_message(format!("[{}/{}] {name}", index + 1, self.total));
    }

    fn job_finished(&mut self, report: &JobReport) {
        let line = match &report.terminal_path {
            Some(_) => {
                let style = self.status_style(report.status);
                let mark = if report.status == JobStatus::Done { "✓" } else { "✗" };
                format!(
                    "  {} {} {} {}",
                    style.apply_to(mark),
                    report.job_type,
                    style.apply_to(report.status),
                    report.note
                )
            }
            None => format!(
                "  {} {} {} (still pending: {})",
                self.red.apply_to("!"),
                report.job_type,
                self.red.apply_to("STUCK"),
                report.note
            ),
        };
        self.pb.println(line);
    }

    fn tick_finished(&mut self, _summary: &TickSummary) {
        self.pb.finish_and_clear();
    }
}

/// Resumo de um tick.
pub fn print_tick_summary(summary: &TickSummary) {
    let stop = match summary.stop {
        StopReason::Drained => "queue drained",
        StopReason::MaxJobs => "job limit reached",
        StopReason::Deadline => "time budget reached",
    };
    println!(
        "{} done, {} needs input, {} failed, {} left pending ({stop}, {:.1}s)",
        Style::new().green().apply_to(summary.done),
        Style::new().yellow().apply_to(summary.needs_input),
        Style::new().red().apply_to(summary.failed),
        summary.left_pending(),
        summary.elapsed.as_secs_f64()
    );
    if summary.follow_ups > 0 {
        println!("{} follow-up job(s) enqueued", summary.follow_ups);
    }
}

/// Resumo de uma publicação.
pub fn print_publish_report(report: &PublishReport) {
    let red = Style::new().red().bold();
    for key in &report.published {
        println!("  {} {key}", Style::new().green().apply_to("↑"));
    }
    for failure in &report.failures {
        println!("  {} {}: {}", red.apply_to("✗"), failure.key, failure.error);
    }
    println!(
        "{} published, {} unchanged, {} failed",
        report.published.len(),
        report.skipped,
        report.failures.len()
    );
    if let Some(commit) = &report.commit {
        println!("commit {}", Style::new().cyan().apply_to(commit));
    }
}

/// Contagem de jobs por estado.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: usize,
    pub done: usize,
    pub failed: usize,
    pub needs_input: usize,
    pub needs_files: usize,
    pub last_log_line: Option<String>,
}

impl QueueStatus {
    /// Conta um arquivo terminal pelo estado embutido no nome.
    pub fn count_terminal(&mut self, file_name: &str) {
        for status in [JobStatus::Done, JobStatus::Failed, JobStatus::NeedsInput] {
            if file_name.contains(&format!(".{}.", status.as_str())) {
                match status {
                    JobStatus::Done => self.done += 1,
                    JobStatus::Failed => self.failed += 1,
                    _ => self.needs_input += 1,
                }
                return;
            }
        }
    }
}

pub fn print_status(status: &QueueStatus) {
    let bold = Style::new().bold();
    println!("{}", bold.apply_to("─── Outbox ───"));
    println!("  pending      {}", status.pending);
    println!("  done         {}", Style::new().green().apply_to(status.done));
    println!("  needs input  {}", Style::new().yellow().apply_to(status.needs_input));
    println!("  failed       {}", Style::new().red().apply_to(status.failed));
    println!("  needs files  {}", status.needs_files);
    if let Some(line) = &status.last_log_line {
        println!("  last         {line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_names_are_counted_by_status() {
        let mut status = QueueStatus::default();
        status.count_terminal("job_1.DONE.20260101T000000Z.json");
        status.count_terminal("job_2.NEEDS_INPUT.20260101T000000Z.json");
        status.count_terminal("job_3.FAILED.20260101T000000Z-1.json");
        status.count_terminal("stray.json");
        assert_eq!((status.done, status.needs_input, status.failed), (1, 1, 1));
    }

    #[test]
    fn observer_handles_stuck_jobs() {
        let mut progress = TickProgress::new();
        progress.tick_started(1);
        progress.job_started(0, Path::new("outbox/a.json"));
        progress.job_finished(&JobReport {
            job_id: "a".into(),
            job_type: "ROI_SCAN".into(),
            status: JobStatus::Done,
            note: "ok".into(),
            terminal_path: None,
            follow_ups: 0,
        });
    }
}
