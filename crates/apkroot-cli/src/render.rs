use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use apkroot_installer::{
    format_file_size, AttemptReport, FailurePolicy, InstallOutcome, InstallPlan, SavedReport,
};
use chrono::{DateTime, Local};
use indicatif::{ProgressBar, ProgressStyle};

const PROGRESS_TICK_CHARS: &str = "|/-\\ ";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

/// Shows the executor's current phase while an attempt runs.
pub(crate) struct PhaseProgress {
    style: OutputStyle,
    label: String,
    phases: u64,
    spinner: Option<ProgressBar>,
    started_at: Instant,
}

impl TerminalRenderer {
    pub(crate) fn new(plain: bool) -> Self {
        Self {
            style: current_output_style(plain),
        }
    }

    pub(crate) fn style(self) -> OutputStyle {
        self.style
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        println!("{}", render_status_line(self.style, status, message));
    }

    pub(crate) fn print_section(self, title: &str) {
        if self.style == OutputStyle::Rich {
            println!();
            println!("{}", colorize(section_style(), &format!("== {title} ==")));
        }
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }

    pub(crate) fn start_progress(self, label: &str) -> PhaseProgress {
        let spinner = if self.style == OutputStyle::Rich {
            let spinner = ProgressBar::new_spinner();
            if let Ok(style) =
                ProgressStyle::with_template("{spinner:.cyan.bold} {msg} {elapsed_precise}")
            {
                spinner.set_style(style.tick_chars(PROGRESS_TICK_CHARS));
            }
            spinner.enable_steady_tick(Duration::from_millis(80));
            Some(spinner)
        } else {
            None
        };

        PhaseProgress {
            style: self.style,
            label: label.to_string(),
            phases: 0,
            spinner,
            started_at: Instant::now(),
        }
    }
}

impl PhaseProgress {
    pub(crate) fn set_phase(&mut self, phase: &str) {
        self.phases += 1;
        match &self.spinner {
            Some(spinner) => spinner.set_message(phase.to_string()),
            None => println!("{phase}"),
        }
    }

    pub(crate) fn finish(mut self) {
        let Some(spinner) = self.spinner.take() else {
            return;
        };
        spinner.finish_and_clear();
        if let Some(line) = render_progress_line(
            self.style,
            &self.label,
            self.phases,
            self.started_at.elapsed(),
        ) {
            println!("{line}");
        }
    }
}

pub(crate) fn resolve_output_style(stdout_is_tty: bool) -> OutputStyle {
    if stdout_is_tty {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn current_output_style(plain: bool) -> OutputStyle {
    if plain {
        return OutputStyle::Plain;
    }
    resolve_output_style(std::io::stdout().is_terminal())
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("{} {message}", status_badge(status)),
    }
}

fn status_badge(status: &str) -> &'static str {
    match status {
        "ok" => "[OK]",
        "warn" => "[WARN]",
        "error" | "err" => "[ERR]",
        _ => "[..]",
    }
}

pub(crate) fn format_plan_lines(plan: &InstallPlan, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();

    match &plan.candidate {
        Some(candidate) => lines.push(format!(
            "package: {} {} ({})",
            candidate.display_name(),
            candidate.version_name,
            candidate.version_code
        )),
        None => lines.push(format!("package: {}", plan.package_name)),
    }
    if let Some(existing) = &plan.existing {
        lines.push(format!(
            "installed: {} ({})",
            existing.version_name.as_deref().unwrap_or("unknown"),
            existing.version_code
        ));
    }

    lines.push(format!(
        "action: {} strategy: {}",
        plan.action.as_str(),
        plan.strategy.as_str()
    ));
    if let Some(risk) = &plan.risk {
        lines.push(format!("update: {}", risk.update_kind.as_str()));
        for issue in risk.issues() {
            lines.push(render_status_line(style, "warn", &format!("risk: {issue}")));
        }
    }

    for (index, step) in plan.steps.iter().enumerate() {
        let policy = match step.on_failure {
            FailurePolicy::Abort => "abort".to_string(),
            FailurePolicy::Fallthrough { next } => format!("fallthrough -> {}", next + 1),
            FailurePolicy::Ignore => "ignore".to_string(),
        };
        lines.push(format!(
            "{:>2}. {}: {} [{policy}]",
            index + 1,
            step.operation.name(),
            step.command
        ));
    }
    lines
}

pub(crate) fn format_attempt_lines(
    attempt: &AttemptReport,
    style: OutputStyle,
    quiet_report: bool,
) -> Vec<String> {
    match &attempt.outcome {
        InstallOutcome::Success { message, .. } => {
            vec![render_status_line(style, "ok", message)]
        }
        InstallOutcome::Failure {
            message, report, ..
        } => {
            let mut lines = vec![render_status_line(style, "error", message)];
            if !quiet_report {
                lines.extend(report.render().lines().map(ToString::to_string));
            }
            match &attempt.report_path {
                Some(path) => lines.push(format!("report: {}", path.display())),
                None => lines.push(render_status_line(
                    style,
                    "warn",
                    "report could not be saved",
                )),
            }
            lines
        }
    }
}

pub(crate) fn format_saved_report_line(report: &SavedReport) -> String {
    let modified: DateTime<Local> = report.modified.into();
    format!(
        "{}  {:>10}  {}",
        modified.format("%Y-%m-%d %H:%M:%S"),
        format_file_size(report.size_bytes),
        report.path.display()
    )
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn progress_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

fn render_progress_line(
    style: OutputStyle,
    label: &str,
    phases: u64,
    elapsed: Duration,
) -> Option<String> {
    if style == OutputStyle::Plain {
        return None;
    }
    Some(format!(
        "{} {phases} phases complete in {}",
        colorize(progress_label_style(), label),
        format_elapsed(elapsed)
    ))
}
