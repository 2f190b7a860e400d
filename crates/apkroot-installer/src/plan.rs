use anyhow::{anyhow, Result};
use apkroot_core::{
    validate_package_name, ExistingInstallState, InstallerConfig, PackageDescriptor,
    RiskClassification, DEFAULT_STAGING_DIR,
};
use serde::Serialize;
use tracing::debug;

use crate::shell::{quote_arg, CommandOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallMode {
    Plain,
    /// `-r`: overwrite an existing same-signature install.
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeKind {
    Storage,
    StagedFile,
    PackageManager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Operation {
    StageFile,
    FixPermissions,
    Probe { probe: ProbeKind },
    UninstallPreservingData,
    UninstallClean,
    Install { mode: InstallMode },
    ForceInstall,
    InstallExisting,
    Cleanup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum FailurePolicy {
    Abort,
    /// Continue with the next alternative of the fallback chain at `next`.
    Fallthrough { next: usize },
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanAction {
    Install,
    Uninstall,
    Reinstall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallStrategy {
    Fresh,
    Update,
    RiskyFallback,
    RiskyReplace,
    Uninstall,
    Reinstall,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedOperation {
    pub operation: Operation,
    pub command: String,
    pub phase: &'static str,
    pub on_failure: FailurePolicy,
    /// Success of a terminal step completes the plan.
    pub terminal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallPlan {
    pub action: PlanAction,
    pub package_name: String,
    pub strategy: InstallStrategy,
    pub staged_path: Option<String>,
    pub risk: Option<RiskClassification>,
    pub candidate: Option<PackageDescriptor>,
    pub existing: Option<ExistingInstallState>,
    pub steps: Vec<PlannedOperation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOptions {
    pub staging_dir: String,
    pub preflight_probes: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            staging_dir: DEFAULT_STAGING_DIR.to_string(),
            preflight_probes: false,
        }
    }
}

impl From<&InstallerConfig> for PlanOptions {
    fn from(config: &InstallerConfig) -> Self {
        Self {
            staging_dir: config.staging_dir.clone(),
            preflight_probes: config.preflight_probes,
        }
    }
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StageFile => "stage-file",
            Self::FixPermissions => "fix-permissions",
            Self::Probe {
                probe: ProbeKind::Storage,
            } => "probe-storage",
            Self::Probe {
                probe: ProbeKind::StagedFile,
            } => "probe-staged-file",
            Self::Probe {
                probe: ProbeKind::PackageManager,
            } => "probe-package-manager",
            Self::UninstallPreservingData => "uninstall-keep-data",
            Self::UninstallClean => "uninstall",
            Self::Install {
                mode: InstallMode::Plain,
            } => "install",
            Self::Install {
                mode: InstallMode::Replace,
            } => "install-replace",
            Self::ForceInstall => "force-install",
            Self::InstallExisting => "install-existing",
            Self::Cleanup => "cleanup",
        }
    }

    pub fn is_staging(&self) -> bool {
        matches!(self, Self::StageFile | Self::FixPermissions)
    }

    pub fn is_uninstall(&self) -> bool {
        matches!(self, Self::UninstallPreservingData | Self::UninstallClean)
    }

    pub fn is_install(&self) -> bool {
        matches!(
            self,
            Self::Install { .. } | Self::ForceInstall | Self::InstallExisting
        )
    }

    /// Package manager builds disagree on exit codes: some print `Success` and exit
    /// non-zero, others exit zero without the marker. Either signal counts.
    pub fn succeeded(&self, output: &CommandOutput) -> bool {
        if self.is_install() || self.is_uninstall() {
            output.exited_cleanly() || output.has_success_marker()
        } else {
            output.exited_cleanly()
        }
    }
}

impl PlanAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Uninstall => "uninstall",
            Self::Reinstall => "reinstall",
        }
    }

    pub fn success_message(&self) -> &'static str {
        match self {
            Self::Install => "Success",
            Self::Uninstall => "Uninstall successful",
            Self::Reinstall => "Reinstall successful",
        }
    }

    pub fn failure_prefix(&self) -> &'static str {
        match self {
            Self::Install => "Installation failed",
            Self::Uninstall => "Uninstallation failed",
            Self::Reinstall => "Reinstall failed",
        }
    }

    pub fn completed_phase(&self) -> &'static str {
        match self {
            Self::Install => "Installation completed successfully",
            Self::Uninstall => "Uninstallation completed successfully",
            Self::Reinstall => "Reinstall completed successfully",
        }
    }
}

impl InstallStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Update => "update",
            Self::RiskyFallback => "risky-fallback",
            Self::RiskyReplace => "risky-replace",
            Self::Uninstall => "uninstall",
            Self::Reinstall => "reinstall",
        }
    }
}

impl InstallPlan {
    pub fn operations(&self) -> Vec<Operation> {
        self.steps.iter().map(|step| step.operation).collect()
    }

    pub fn is_update(&self) -> bool {
        self.existing.is_some()
    }
}

#[derive(Default)]
struct StepList {
    steps: Vec<PlannedOperation>,
}

impl StepList {
    fn next_index(&self) -> usize {
        self.steps.len()
    }

    fn push(
        &mut self,
        operation: Operation,
        command: String,
        phase: &'static str,
        on_failure: FailurePolicy,
        terminal: bool,
    ) {
        self.steps.push(PlannedOperation {
            operation,
            command,
            phase,
            on_failure,
            terminal,
        });
    }
}

pub fn plan_install(
    candidate: &PackageDescriptor,
    existing: Option<&ExistingInstallState>,
    options: &PlanOptions,
) -> Result<InstallPlan> {
    validate_package_name(&candidate.package_name)?;
    let file_name = candidate.file_name().ok_or_else(|| {
        anyhow!(
            "source_path has no usable file name: {}",
            candidate.source_path.display()
        )
    })?;

    let risk = RiskClassification::classify(candidate, existing);
    let strategy = match existing {
        None => InstallStrategy::Fresh,
        Some(_) if risk.requires_fallback_chain() => InstallStrategy::RiskyFallback,
        Some(_) if risk.has_risky_conditions() => InstallStrategy::RiskyReplace,
        Some(_) => InstallStrategy::Update,
    };

    let staged_path = staged_path(&options.staging_dir, file_name);
    let staged = quote_arg(&staged_path);
    let package = quote_arg(&candidate.package_name);
    let source = quote_arg(&candidate.source_path.to_string_lossy());

    let mut steps = StepList::default();
    steps.push(
        Operation::StageFile,
        format!("cp {source} {staged}"),
        "Copying package...",
        FailurePolicy::Abort,
        false,
    );
    steps.push(
        Operation::FixPermissions,
        format!("chmod 644 {staged}"),
        "Setting package permissions...",
        FailurePolicy::Abort,
        false,
    );

    if options.preflight_probes {
        for (probe, command) in [
            (ProbeKind::Storage, "df /data".to_string()),
            (ProbeKind::StagedFile, format!("ls -la {staged}")),
            (
                ProbeKind::PackageManager,
                "pm list packages | head -5".to_string(),
            ),
        ] {
            steps.push(
                Operation::Probe { probe },
                command,
                "Running pre-install checks...",
                FailurePolicy::Ignore,
                false,
            );
        }
    }

    match strategy {
        InstallStrategy::Fresh => {
            steps.push(
                Operation::Install {
                    mode: InstallMode::Plain,
                },
                format!("pm install {staged}"),
                "Installing application...",
                FailurePolicy::Abort,
                true,
            );
        }
        InstallStrategy::Update | InstallStrategy::RiskyReplace => {
            steps.push(
                Operation::Install {
                    mode: InstallMode::Replace,
                },
                format!("pm install -r {staged}"),
                "Installing application...",
                FailurePolicy::Abort,
                true,
            );
        }
        InstallStrategy::RiskyFallback => {
            // Each uninstall is paired with the plain install right after it; when the
            // uninstall fails, execution skips its install and moves to the next pair.
            let next = steps.next_index() + 2;
            steps.push(
                Operation::UninstallPreservingData,
                format!("pm uninstall -k {package}"),
                "Uninstalling existing app (keeping data)...",
                FailurePolicy::Fallthrough { next },
                false,
            );
            steps.push(
                Operation::Install {
                    mode: InstallMode::Plain,
                },
                format!("pm install {staged}"),
                "Installing new version...",
                FailurePolicy::Abort,
                true,
            );

            let next = steps.next_index() + 2;
            steps.push(
                Operation::UninstallClean,
                format!("pm uninstall {package}"),
                "Trying normal uninstall...",
                FailurePolicy::Fallthrough { next },
                false,
            );
            steps.push(
                Operation::Install {
                    mode: InstallMode::Plain,
                },
                format!("pm install {staged}"),
                "Installing new version...",
                FailurePolicy::Abort,
                true,
            );

            steps.push(
                Operation::ForceInstall,
                format!("pm install -r -d {staged}"),
                "Trying force install...",
                FailurePolicy::Abort,
                true,
            );
        }
        InstallStrategy::Uninstall | InstallStrategy::Reinstall => {
            return Err(anyhow!(
                "install planning cannot use the {} strategy",
                strategy.as_str()
            ));
        }
    }

    steps.push(
        Operation::Cleanup,
        format!("rm -f {staged}"),
        "Cleaning up...",
        FailurePolicy::Ignore,
        false,
    );

    debug!(
        package = %candidate.package_name,
        strategy = strategy.as_str(),
        steps = steps.steps.len(),
        "planned install"
    );

    Ok(InstallPlan {
        action: PlanAction::Install,
        package_name: candidate.package_name.clone(),
        strategy,
        staged_path: Some(staged_path),
        risk: Some(risk),
        candidate: Some(candidate.clone()),
        existing: existing.cloned(),
        steps: steps.steps,
    })
}

pub fn plan_uninstall(package_name: &str) -> Result<InstallPlan> {
    validate_package_name(package_name)?;
    Ok(single_operation_plan(
        PlanAction::Uninstall,
        InstallStrategy::Uninstall,
        package_name,
        PlannedOperation {
            operation: Operation::UninstallClean,
            command: format!("pm uninstall {}", quote_arg(package_name)),
            phase: "Uninstalling application...",
            on_failure: FailurePolicy::Abort,
            terminal: true,
        },
    ))
}

/// Restores a package that is still present for another user or was uninstalled with
/// its data kept.
pub fn plan_reinstall(package_name: &str) -> Result<InstallPlan> {
    validate_package_name(package_name)?;
    Ok(single_operation_plan(
        PlanAction::Reinstall,
        InstallStrategy::Reinstall,
        package_name,
        PlannedOperation {
            operation: Operation::InstallExisting,
            command: format!("cmd package install-existing {}", quote_arg(package_name)),
            phase: "Reinstalling application...",
            on_failure: FailurePolicy::Abort,
            terminal: true,
        },
    ))
}

fn single_operation_plan(
    action: PlanAction,
    strategy: InstallStrategy,
    package_name: &str,
    step: PlannedOperation,
) -> InstallPlan {
    InstallPlan {
        action,
        package_name: package_name.to_string(),
        strategy,
        staged_path: None,
        risk: None,
        candidate: None,
        existing: None,
        steps: vec![step],
    }
}

fn staged_path(staging_dir: &str, file_name: &str) -> String {
    format!("{}/{}", staging_dir.trim_end_matches('/'), file_name)
}
