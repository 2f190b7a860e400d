use std::fs;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use apkroot_core::{assess_compatibility, InstallerConfig, PackageDescriptor, PackageSnapshot};
use apkroot_installer::{
    clear_attempt_marker, default_user_prefix, plan_install, probe_device_profile,
    read_attempt_marker, AttemptReport, DiagnosticLogger, Installer, PlanOptions,
    PrivilegedShell, StateLayout, SuShell,
};
use apkroot_security::{certificate_fingerprint, display_fingerprint, sha256_file_hex};
use tracing::{debug, warn};

use crate::completion::write_completions_script;
use crate::render::{
    format_attempt_lines, format_plan_lines, format_saved_report_line, PhaseProgress,
    TerminalRenderer,
};
use crate::{Cli, Commands};

/// Prefix, layout and config resolved from the global flags.
pub(crate) struct CliContext {
    pub(crate) layout: StateLayout,
    pub(crate) config: InstallerConfig,
}

impl CliContext {
    pub(crate) fn resolve(cli: &Cli) -> Result<Self> {
        let prefix = match &cli.prefix {
            Some(prefix) => prefix.clone(),
            None => default_user_prefix()?,
        };
        let layout = StateLayout::new(prefix);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| layout.config_path());
        let config = InstallerConfig::load(&config_path)?;
        debug!(prefix = %layout.prefix().display(), config = %config_path.display(), "resolved context");
        Ok(Self { layout, config })
    }

    pub(crate) fn logger(&self) -> DiagnosticLogger {
        DiagnosticLogger::new(
            self.config.log_dir_or(self.layout.logs_dir()),
            self.config.log_retention,
        )
    }

    fn shell(&self) -> &'static SuShell {
        SuShell::shared(&self.config.su_binary, self.config.command_timeout())
    }
}

pub(crate) fn run_cli(cli: Cli) -> Result<ExitCode> {
    let renderer = TerminalRenderer::new(cli.plain);

    match &cli.command {
        Commands::Install {
            descriptor,
            dry_run,
            ignore_compat,
            quiet_report,
        } => {
            let context = CliContext::resolve(&cli)?;
            let snapshot = PackageSnapshot::load(descriptor)?;
            let options = PlanOptions::from(&context.config);
            let plan = plan_install(&snapshot.candidate, snapshot.existing.as_ref(), &options)?;

            if *dry_run {
                renderer.print_section("plan");
                renderer.print_lines(&format_plan_lines(&plan, renderer.style()));
                return Ok(ExitCode::SUCCESS);
            }

            context.layout.ensure_base_dirs()?;
            let installer = Installer::new(context.shell(), context.layout.clone(), &context.config);
            let mut progress: Option<PhaseProgress> = None;
            let attempt = installer.run_with_preflight(
                &plan,
                |shell| {
                    check_compatibility(*shell, &snapshot.candidate, *ignore_compat, renderer)?;
                    if let Some(risk) = &plan.risk {
                        for issue in risk.issues() {
                            renderer.print_status("warn", issue);
                        }
                    }
                    Ok(())
                },
                |phase: &str| {
                    progress
                        .get_or_insert_with(|| renderer.start_progress("install"))
                        .set_phase(phase)
                },
            );
            if let Some(progress) = progress {
                progress.finish();
            }
            report_attempt(attempt?, renderer, *quiet_report)
        }
        Commands::Uninstall {
            package,
            quiet_report,
        } => {
            let context = CliContext::resolve(&cli)?;
            context.layout.ensure_base_dirs()?;
            let installer = Installer::new(context.shell(), context.layout.clone(), &context.config);
            let mut progress = renderer.start_progress("uninstall");
            let attempt = installer.uninstall(package, |phase: &str| progress.set_phase(phase));
            progress.finish();
            report_attempt(attempt?, renderer, *quiet_report)
        }
        Commands::Reinstall {
            package,
            quiet_report,
        } => {
            let context = CliContext::resolve(&cli)?;
            context.layout.ensure_base_dirs()?;
            let installer = Installer::new(context.shell(), context.layout.clone(), &context.config);
            let mut progress = renderer.start_progress("reinstall");
            let attempt = installer.reinstall(package, |phase: &str| progress.set_phase(phase));
            progress.finish();
            report_attempt(attempt?, renderer, *quiet_report)
        }
        Commands::Inspect { descriptor, json } => {
            let context = CliContext::resolve(&cli)?;
            let snapshot = PackageSnapshot::load(descriptor)?;
            let plan = plan_install(
                &snapshot.candidate,
                snapshot.existing.as_ref(),
                &PlanOptions::from(&context.config),
            )?;

            if *json {
                let rendered = serde_json::to_string_pretty(&plan)
                    .context("failed to serialize install plan")?;
                println!("{rendered}");
                return Ok(ExitCode::SUCCESS);
            }

            renderer.print_lines(&format_plan_lines(&plan, renderer.style()));
            if let Some(digest) = local_package_digest(&snapshot.candidate.source_path) {
                println!("sha256: {digest}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Logs => {
            let context = CliContext::resolve(&cli)?;
            let logger = context.logger();
            let reports = logger.list_reports();
            if reports.is_empty() {
                println!("No saved reports in {}", logger.dir().display());
            }
            for report in &reports {
                println!("{}", format_saved_report_line(report));
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Doctor => {
            let context = CliContext::resolve(&cli)?;
            run_doctor(&context, renderer)
        }
        Commands::Unlock => {
            let context = CliContext::resolve(&cli)?;
            if let Some(marker) = read_attempt_marker(&context.layout).ok().flatten() {
                warn!(action = %marker.action, package = %marker.package, pid = marker.pid, "removing attempt marker");
            }
            if clear_attempt_marker(&context.layout)? {
                renderer.print_status("ok", "removed attempt marker");
            } else {
                println!("no attempt marker present");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Fingerprint { certificate } => {
            let der = fs::read(certificate)
                .with_context(|| format!("failed to read {}", certificate.display()))?;
            if der.is_empty() {
                return Err(anyhow!("certificate file is empty: {}", certificate.display()));
            }
            let fingerprint = certificate_fingerprint(&der);
            println!("{}", display_fingerprint(&fingerprint));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completions { shell } => {
            let mut stdout = std::io::stdout().lock();
            write_completions_script(*shell, &mut stdout)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Version => {
            println!("apkroot {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn report_attempt(
    attempt: AttemptReport,
    renderer: TerminalRenderer,
    quiet_report: bool,
) -> Result<ExitCode> {
    renderer.print_lines(&format_attempt_lines(&attempt, renderer.style(), quiet_report));
    if attempt.outcome.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Refuses descriptors the device cannot run unless the caller opted out.
fn check_compatibility<S>(
    shell: &S,
    candidate: &PackageDescriptor,
    ignore_compat: bool,
    renderer: TerminalRenderer,
) -> Result<()>
where
    S: PrivilegedShell + ?Sized,
{
    if candidate.min_sdk.is_none() && candidate.native_abis.is_empty() {
        return Ok(());
    }

    let device = match probe_device_profile(shell) {
        Ok(device) => device,
        Err(err) => {
            // The attempt itself reports a missing root grant.
            warn!(error = %format!("{err:#}"), "skipping compatibility check");
            return Ok(());
        }
    };

    let issues = assess_compatibility(candidate, &device);
    if issues.is_empty() {
        return Ok(());
    }
    if ignore_compat {
        for issue in &issues {
            renderer.print_status("warn", &format!("ignoring: {issue}"));
        }
        return Ok(());
    }

    let summary = issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    Err(anyhow!(
        "{} cannot be installed on this device: {summary} (use --ignore-compat to override)",
        candidate.package_name
    ))
}

fn run_doctor(context: &CliContext, renderer: TerminalRenderer) -> Result<ExitCode> {
    let layout = &context.layout;
    let config = &context.config;
    println!("prefix: {}", layout.prefix().display());
    println!(
        "config: {}{}",
        layout.config_path().display(),
        if layout.config_path().exists() {
            ""
        } else {
            " (defaults)"
        }
    );
    println!(
        "logs: {} (keep {})",
        config.log_dir_or(layout.logs_dir()).display(),
        config.log_retention
    );
    println!("staging: {}", config.staging_dir);
    println!("su: {}", config.su_binary);
    match config.command_timeout() {
        Some(timeout) => println!("command timeout: {}s", timeout.as_secs()),
        None => println!("command timeout: disabled"),
    }

    match read_attempt_marker(layout) {
        Ok(Some(marker)) => renderer.print_status(
            "warn",
            &format!(
                "attempt marker held: {} {} (pid {}, started {}); run `apkroot unlock` if stale",
                marker.action, marker.package, marker.pid, marker.started_at_unix
            ),
        ),
        Ok(None) => renderer.print_status("ok", "no attempt in progress"),
        Err(err) => renderer.print_status("warn", &format!("{err:#}")),
    }

    let shell = context.shell();
    let healthy = match shell.acquire() {
        Ok(_) => {
            renderer.print_status("ok", &format!("root shell available via '{}'", shell.program()));
            match probe_device_profile(shell) {
                Ok(device) => println!(
                    "device: API {} ({})",
                    device.sdk_int,
                    device.abis.join(",")
                ),
                Err(err) => renderer.print_status("warn", &format!("device probe failed: {err:#}")),
            }
            true
        }
        Err(err) => {
            renderer.print_status("error", &err.to_string());
            false
        }
    };

    Ok(if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn local_package_digest(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    sha256_file_hex(path)
        .map_err(|err| warn!(error = %format!("{err:#}"), "could not hash package"))
        .ok()
}
