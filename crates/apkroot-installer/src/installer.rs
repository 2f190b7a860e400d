use std::path::PathBuf;

use anyhow::Result;
use apkroot_core::{ExistingInstallState, InstallerConfig, PackageDescriptor};
use tracing::warn;

use crate::diagnostics::DiagnosticLogger;
use crate::executor::execute;
use crate::guard::AttemptGuard;
use crate::plan::{plan_install, plan_reinstall, plan_uninstall, InstallPlan, PlanOptions};
use crate::report::InstallOutcome;
use crate::shell::PrivilegedShell;
use crate::StateLayout;

/// Result of one attempt: the outcome plus where its failure report landed, if any.
#[derive(Debug)]
pub struct AttemptReport {
    pub outcome: InstallOutcome,
    pub report_path: Option<PathBuf>,
}

/// Plans, guards, executes and records attempts for one state prefix.
pub struct Installer<S> {
    shell: S,
    layout: StateLayout,
    logger: DiagnosticLogger,
    options: PlanOptions,
}

impl<S: PrivilegedShell> Installer<S> {
    pub fn new(shell: S, layout: StateLayout, config: &InstallerConfig) -> Self {
        let logger = DiagnosticLogger::new(
            config.log_dir_or(layout.logs_dir()),
            config.log_retention,
        );
        Self {
            shell,
            layout,
            logger,
            options: PlanOptions::from(config),
        }
    }

    pub fn shell(&self) -> &S {
        &self.shell
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn logger(&self) -> &DiagnosticLogger {
        &self.logger
    }

    pub fn plan(
        &self,
        candidate: &PackageDescriptor,
        existing: Option<&ExistingInstallState>,
    ) -> Result<InstallPlan> {
        plan_install(candidate, existing, &self.options)
    }

    pub fn install<P: FnMut(&str)>(
        &self,
        candidate: &PackageDescriptor,
        existing: Option<&ExistingInstallState>,
        progress: P,
    ) -> Result<AttemptReport> {
        let plan = self.plan(candidate, existing)?;
        self.run(&plan, progress)
    }

    pub fn uninstall<P: FnMut(&str)>(&self, package_name: &str, progress: P) -> Result<AttemptReport> {
        let plan = plan_uninstall(package_name)?;
        self.run(&plan, progress)
    }

    pub fn reinstall<P: FnMut(&str)>(&self, package_name: &str, progress: P) -> Result<AttemptReport> {
        let plan = plan_reinstall(package_name)?;
        self.run(&plan, progress)
    }

    /// Executes an already built plan under the attempt guard.
    pub fn run<P: FnMut(&str)>(&self, plan: &InstallPlan, progress: P) -> Result<AttemptReport> {
        self.run_with_preflight(plan, |_| Ok(()), progress)
    }

    /// Like [`Installer::run`], but calls `preflight` with the shell once the guard is held.
    /// A preflight error releases the guard and aborts before any plan step runs.
    pub fn run_with_preflight<F, P>(
        &self,
        plan: &InstallPlan,
        preflight: F,
        progress: P,
    ) -> Result<AttemptReport>
    where
        F: FnOnce(&S) -> Result<()>,
        P: FnMut(&str),
    {
        let guard = AttemptGuard::claim(&self.layout, plan.action.as_str(), &plan.package_name)?;
        preflight(&self.shell)?;

        let outcome = execute(plan, &self.shell, progress);
        let report_path = match &outcome {
            InstallOutcome::Failure { report, .. } => self.logger.persist(report),
            InstallOutcome::Success { .. } => None,
        };

        if let Err(err) = guard.release() {
            warn!(error = %err, "attempt finished but its marker could not be removed");
        }

        Ok(AttemptReport {
            outcome,
            report_path,
        })
    }
}
