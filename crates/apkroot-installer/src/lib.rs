mod device;
mod diagnostics;
mod error;
mod executor;
mod fs_utils;
mod guard;
mod installer;
mod layout;
mod plan;
mod report;
mod shell;
mod su;

pub use device::probe_device_profile;
pub use diagnostics::{DiagnosticLogger, SavedReport};
pub use error::{DiagnosticWriteFailure, InstallError};
pub use executor::execute;
pub use guard::{clear_attempt_marker, read_attempt_marker, AttemptGuard, AttemptMarker};
pub use installer::{AttemptReport, Installer};
pub use layout::{default_user_prefix, StateLayout};
pub use plan::{
    plan_install, plan_reinstall, plan_uninstall, FailurePolicy, InstallMode, InstallPlan,
    InstallStrategy, Operation, PlanAction, PlanOptions, PlannedOperation, ProbeKind,
};
pub use report::{format_file_size, DiagnosticReport, InstallOutcome, PackageFooter, StepRecord};
pub use shell::{quote_arg, CommandOutput, PrivilegedShell, Session, ShellError, SUCCESS_MARKER};
pub use su::SuShell;
