use std::error::Error as _;
use std::fmt::Write as _;

use tracing::{debug, error, info, warn};

use crate::error::InstallError;
use crate::plan::{FailurePolicy, InstallPlan, Operation, PlannedOperation};
use crate::report::{DiagnosticReport, InstallOutcome, StepRecord};
use crate::shell::{CommandOutput, PrivilegedShell, Session, ShellError};

/// Runs `plan` against `shell`, reporting each phase through `progress`.
///
/// Steps run strictly in order. The first terminal step that succeeds ends the plan;
/// cleanup steps are held back and run once after the main sequence, whatever its result.
pub fn execute<S, P>(plan: &InstallPlan, shell: &S, mut progress: P) -> InstallOutcome
where
    S: PrivilegedShell + ?Sized,
    P: FnMut(&str),
{
    let session = match shell.acquire() {
        Ok(session) => session,
        Err(err) => {
            let error = match err {
                ShellError::PrivilegeUnavailable { reason } => {
                    InstallError::PrivilegeUnavailable { reason }
                }
                other => InstallError::PrivilegeUnavailable {
                    reason: other.to_string(),
                },
            };
            error!(package = %plan.package_name, %error, "cannot acquire privileged session");
            return failure(plan, error, Vec::new(), None);
        }
    };

    info!(
        package = %plan.package_name,
        action = plan.action.as_str(),
        strategy = plan.strategy.as_str(),
        "executing plan"
    );

    let mut trail = Vec::new();
    let mut last_phase: Option<&'static str> = None;
    let verdict = run_main_sequence(plan, shell, &session, &mut trail, &mut |phase: &'static str| {
        if last_phase != Some(phase) {
            progress(phase);
            last_phase = Some(phase);
        }
    });

    run_cleanup(plan, shell, &session, &mut trail, &mut progress);

    match verdict {
        Ok(()) => {
            progress(plan.action.completed_phase());
            info!(package = %plan.package_name, "attempt succeeded");
            InstallOutcome::Success {
                message: plan.action.success_message().to_string(),
                trail,
            }
        }
        Err((error, exception)) => {
            error!(package = %plan.package_name, kind = error.kind(), %error, "attempt failed");
            failure(plan, error, trail, exception)
        }
    }
}

type Verdict = Result<(), (InstallError, Option<String>)>;

fn run_main_sequence<S>(
    plan: &InstallPlan,
    shell: &S,
    session: &Session,
    trail: &mut Vec<StepRecord>,
    progress: &mut dyn FnMut(&'static str),
) -> Verdict
where
    S: PrivilegedShell + ?Sized,
{
    let mut fallthrough_failures = 0usize;
    let mut last_detail: Option<String> = None;
    let mut index = 0;

    while let Some(step) = plan.steps.get(index) {
        if step.operation == Operation::Cleanup {
            index += 1;
            continue;
        }

        progress(step.phase);
        debug!(step = index, operation = step.operation.name(), command = %step.command);

        let output = match shell.run(session, &step.command) {
            Ok(output) => output,
            Err(err) => {
                trail.push(StepRecord {
                    index,
                    operation: step.operation,
                    command: step.command.clone(),
                    output: None,
                    fault: Some(err.to_string()),
                    succeeded: false,
                });
                let exception = exception_details(index, step, &err);
                return Err((
                    InstallError::ShellFault {
                        message: err.to_string(),
                    },
                    Some(exception),
                ));
            }
        };

        let succeeded = step.operation.succeeded(&output);
        trail.push(StepRecord {
            index,
            operation: step.operation,
            command: step.command.clone(),
            output: Some(output.clone()),
            fault: None,
            succeeded,
        });

        if succeeded {
            if step.terminal {
                return Ok(());
            }
            index += 1;
            continue;
        }

        match step.on_failure {
            FailurePolicy::Ignore => {
                warn!(
                    operation = step.operation.name(),
                    detail = %output.failure_detail(),
                    "best-effort step failed"
                );
                index += 1;
            }
            FailurePolicy::Fallthrough { next } => {
                info!(
                    operation = step.operation.name(),
                    detail = %output.failure_detail(),
                    "falling through to next alternative"
                );
                fallthrough_failures += 1;
                last_detail = Some(output.failure_detail());
                index = next;
            }
            FailurePolicy::Abort => {
                return Err((
                    abort_error(step, &output, fallthrough_failures),
                    None,
                ));
            }
        }
    }

    // Only reachable when a plan has no terminal step left to try.
    Err((
        InstallError::OperationFailure {
            operation: "plan",
            detail: last_detail.unwrap_or_else(|| "no install step completed".to_string()),
        },
        None,
    ))
}

fn abort_error(
    step: &PlannedOperation,
    output: &CommandOutput,
    fallthrough_failures: usize,
) -> InstallError {
    let detail = output.failure_detail();
    if step.operation.is_staging() {
        InstallError::StagingFailure {
            operation: step.operation.name(),
            detail,
        }
    } else if step.operation == Operation::ForceInstall && fallthrough_failures > 0 {
        InstallError::ChainExhausted {
            attempts: fallthrough_failures + 1,
            detail,
        }
    } else {
        InstallError::OperationFailure {
            operation: step.operation.name(),
            detail,
        }
    }
}

fn run_cleanup<S>(
    plan: &InstallPlan,
    shell: &S,
    session: &Session,
    trail: &mut Vec<StepRecord>,
    progress: &mut dyn FnMut(&str),
) where
    S: PrivilegedShell + ?Sized,
{
    for (index, step) in plan.steps.iter().enumerate() {
        if step.operation != Operation::Cleanup {
            continue;
        }
        progress(step.phase);

        // A fault in the main sequence may have replaced the session.
        let result = shell
            .acquire()
            .or_else(|_| Ok::<_, ShellError>(session.clone()))
            .and_then(|current| shell.run(&current, &step.command));

        let record = match result {
            Ok(output) => {
                let succeeded = step.operation.succeeded(&output);
                if !succeeded {
                    warn!(
                        command = %step.command,
                        detail = %output.failure_detail(),
                        "cleanup failed"
                    );
                }
                StepRecord {
                    index,
                    operation: step.operation,
                    command: step.command.clone(),
                    output: Some(output),
                    fault: None,
                    succeeded,
                }
            }
            Err(err) => {
                warn!(command = %step.command, error = %err, "cleanup failed");
                StepRecord {
                    index,
                    operation: step.operation,
                    command: step.command.clone(),
                    output: None,
                    fault: Some(err.to_string()),
                    succeeded: false,
                }
            }
        };
        trail.push(record);
    }
}

fn failure(
    plan: &InstallPlan,
    error: InstallError,
    trail: Vec<StepRecord>,
    exception: Option<String>,
) -> InstallOutcome {
    let message = format!("{}: {error}", plan.action.failure_prefix());
    let report = DiagnosticReport::for_plan(plan, message.clone(), trail, exception);
    InstallOutcome::Failure {
        message,
        error,
        report,
    }
}

fn exception_details(index: usize, step: &PlannedOperation, err: &ShellError) -> String {
    let kind = match err {
        ShellError::PrivilegeUnavailable { .. } => "PrivilegeUnavailable",
        ShellError::SessionClosed { .. } => "SessionClosed",
        ShellError::Timeout { .. } => "Timeout",
        ShellError::Io(_) => "Io",
    };

    let mut out = String::new();
    let _ = writeln!(out, "Exception: {kind}");
    let _ = writeln!(out, "Message: {err}");
    let _ = writeln!(
        out,
        "Step: {} ({})",
        index + 1,
        step.operation.name()
    );
    let _ = writeln!(out, "Command: {}", step.command);
    let mut source = err.source();
    while let Some(cause) = source {
        let _ = writeln!(out, "Caused by: {cause}");
        source = cause.source();
    }
    out
}
