use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use apkroot_core::RiskClassification;
use chrono::{DateTime, Local};

use crate::error::InstallError;
use crate::plan::{InstallPlan, InstallStrategy, Operation, PlanAction};
use crate::shell::CommandOutput;

/// One executed (or faulted) step of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub index: usize,
    pub operation: Operation,
    pub command: String,
    pub output: Option<CommandOutput>,
    /// Shell fault raised instead of an output.
    pub fault: Option<String>,
    pub succeeded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Success {
        message: String,
        trail: Vec<StepRecord>,
    },
    Failure {
        message: String,
        error: InstallError,
        report: DiagnosticReport,
    },
}

impl InstallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Success { message, .. } | Self::Failure { message, .. } => message,
        }
    }

    pub fn trail(&self) -> &[StepRecord] {
        match self {
            Self::Success { trail, .. } => trail,
            Self::Failure { report, .. } => &report.trail,
        }
    }
}

/// Package facts printed at the bottom of a failure report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFooter {
    pub version_name: String,
    pub version_code: i64,
    pub source_path: PathBuf,
    pub size_bytes: Option<u64>,
    pub is_update: bool,
    pub existing_version: Option<String>,
    pub risk: Option<RiskClassification>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticReport {
    pub generated_at: DateTime<Local>,
    pub action: PlanAction,
    pub package_name: String,
    pub error_message: String,
    pub strategy: InstallStrategy,
    pub trail: Vec<StepRecord>,
    pub exception: Option<String>,
    pub package: Option<PackageFooter>,
}

impl DiagnosticReport {
    pub fn for_plan(
        plan: &InstallPlan,
        error_message: String,
        trail: Vec<StepRecord>,
        exception: Option<String>,
    ) -> Self {
        let package = plan.candidate.as_ref().map(|candidate| PackageFooter {
            version_name: candidate.version_name.clone(),
            version_code: candidate.version_code,
            source_path: candidate.source_path.clone(),
            size_bytes: fs::metadata(&candidate.source_path)
                .ok()
                .map(|metadata| metadata.len()),
            is_update: plan.is_update(),
            existing_version: plan.existing.as_ref().map(|existing| {
                format_version(
                    existing.version_name.as_deref().unwrap_or("unknown"),
                    existing.version_code,
                )
            }),
            risk: plan.risk.clone(),
        });

        Self {
            generated_at: Local::now(),
            action: plan.action,
            package_name: plan.package_name.clone(),
            error_message,
            strategy: plan.strategy,
            trail,
            exception,
            package,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== apkroot Installation Error Log ===");
        let _ = writeln!(
            out,
            "Timestamp: {}",
            self.generated_at.format("%Y-%m-%d %H:%M:%S")
        );
        let _ = writeln!(out, "Action: {}", self.action.as_str());
        let _ = writeln!(out, "Package: {}", self.package_name);
        let _ = writeln!(out, "Error: {}", self.error_message);
        let _ = writeln!(out);

        let _ = writeln!(out, "=== Installation Commands ===");
        if self.trail.is_empty() {
            let _ = writeln!(out, "(no commands were run)");
        }
        for step in &self.trail {
            let _ = writeln!(
                out,
                "[{}] {}: {}",
                step.index + 1,
                step.operation.name(),
                step.command
            );
            if let Some(output) = &step.output {
                let _ = writeln!(out, "Exit code: {}", output.exit_code);
                write_block(&mut out, "Output", &output.stdout);
                write_block(&mut out, "Errors", &output.stderr);
            }
            if let Some(fault) = &step.fault {
                let _ = writeln!(out, "Fault: {fault}");
            }
            let _ = writeln!(
                out,
                "Status: {}",
                if step.succeeded { "succeeded" } else { "failed" }
            );
            let _ = writeln!(out);
        }

        if let Some(exception) = &self.exception {
            let _ = writeln!(out, "=== Exception Details ===");
            let _ = writeln!(out, "{}", exception.trim_end());
            let _ = writeln!(out);
        }

        if let Some(package) = &self.package {
            let _ = writeln!(out, "=== APK Information ===");
            let _ = writeln!(out, "Package: {}", self.package_name);
            let _ = writeln!(
                out,
                "Version: {}",
                format_version(&package.version_name, package.version_code)
            );
            let _ = writeln!(out, "File: {}", package.source_path.display());
            let _ = writeln!(
                out,
                "Size: {}",
                package
                    .size_bytes
                    .map(format_file_size)
                    .unwrap_or_else(|| "unknown".to_string())
            );
            let _ = writeln!(out, "Is Update: {}", package.is_update);
            let _ = writeln!(out, "Strategy: {}", self.strategy.as_str());
            if let Some(risk) = &package.risk {
                let _ = writeln!(out, "Is Risky Install: {}", risk.has_risky_conditions());
                let _ = writeln!(out, "Signature Changed: {}", risk.is_signature_changed);
                let _ = writeln!(out, "Downgrade: {}", risk.is_downgrade);
                for issue in risk.issues() {
                    let _ = writeln!(out, "Risk: {issue}");
                }
            }
            if let Some(existing) = &package.existing_version {
                let _ = writeln!(out, "Existing Version: {existing}");
            }
            let _ = writeln!(out);
        }

        let _ = writeln!(out, "=== End of Log ===");
        out
    }
}

fn write_block(out: &mut String, title: &str, body: &str) {
    let body = body.trim_end();
    if body.is_empty() {
        return;
    }
    let _ = writeln!(out, "{title}:");
    let _ = writeln!(out, "{body}");
}

fn format_version(name: &str, code: i64) -> String {
    if name.is_empty() {
        return code.to_string();
    }
    format!("{name} ({code})")
}

pub fn format_file_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let value = bytes as f64;
    if value < KB {
        format!("{bytes} B")
    } else if value < MB {
        format!("{:.2} KB", value / KB)
    } else if value < GB {
        format!("{:.2} MB", value / MB)
    } else {
        format!("{:.2} GB", value / GB)
    }
}
