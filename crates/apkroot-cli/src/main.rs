use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};

mod completion;
mod dispatch;
mod logging;
mod render;

use completion::CliCompletionShell;

#[derive(Parser, Debug)]
#[command(name = "apkroot")]
#[command(about = "Install, update and remove Android packages through a root shell", long_about = None)]
struct Cli {
    /// State prefix holding config.toml, logs and the attempt marker.
    #[arg(long, global = true)]
    prefix: Option<PathBuf>,
    /// Config file to use instead of <prefix>/config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Disable badges, colors and the progress spinner.
    #[arg(long, global = true)]
    plain: bool,
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install or update the package described by a descriptor file.
    Install {
        descriptor: PathBuf,
        /// Print the plan without touching the device.
        #[arg(long)]
        dry_run: bool,
        /// Install even when the device fails the SDK or ABI check.
        #[arg(long)]
        ignore_compat: bool,
        /// Only print the report path on failure.
        #[arg(long)]
        quiet_report: bool,
    },
    Uninstall {
        package: String,
        #[arg(long)]
        quiet_report: bool,
    },
    /// Restore a package that is still present for another user or kept its data.
    Reinstall {
        package: String,
        #[arg(long)]
        quiet_report: bool,
    },
    /// Show risk and the planned commands for a descriptor.
    Inspect {
        descriptor: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List saved failure reports, newest first.
    Logs,
    Doctor,
    /// Remove a stale attempt marker.
    Unlock,
    /// Print the SHA-256 fingerprint of a DER signing certificate.
    Fingerprint { certificate: PathBuf },
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    match dispatch::run_cli(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!(
                "{}",
                render::render_status_line(
                    render::current_output_style(false),
                    "error",
                    &format!("{err:#}")
                )
            );
            ExitCode::FAILURE
        }
    }
}
