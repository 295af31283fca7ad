//! `typegen-install`: installs the `typegenctl` release binary and its
//! application home.
use std::io::IsTerminal as _;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use typegen_installer::cancel::{CancelToken, Interrupt};
use typegen_installer::cli::Cli;
use typegen_installer::error::{EXIT_INTERRUPTED, InstallError};
use typegen_installer::exec::SystemExecutor;
use typegen_installer::http::{HttpClient, UreqClient};
use typegen_installer::install::fetch::ThreadSleeper;
use typegen_installer::logging::{self, Logger};
use typegen_installer::pipeline::{self, Collaborators};
use typegen_installer::progress::{NoProgress, Progress, Spinner};

/// End-to-end bound on metadata and asset requests.
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Bound on the install beacon.
const BEACON_TIMEOUT: Duration = Duration::from_secs(3);

fn main() -> ExitCode {
    let _ = enable_ansi_support::enable_ansi_support();
    let options = Cli::parse().into_options();
    logging::init_subscriber(options.verbose, "install");
    let log = Logger::new("install");

    let cancel = CancelToken::new();
    if let Err(e) = install_interrupt_handler(cancel.clone()) {
        log.warn(&format!("cannot install interrupt handler: {e}"));
    }

    let progress: Box<dyn Progress> = if std::io::stdout().is_terminal() {
        Box::new(Spinner::new())
    } else {
        Box::new(NoProgress)
    };
    let http: Arc<dyn HttpClient> = Arc::new(UreqClient::new(HTTP_TIMEOUT));
    let beacon_http: Arc<dyn HttpClient> = Arc::new(UreqClient::new(BEACON_TIMEOUT));

    let deps = Collaborators {
        executor: &SystemExecutor,
        http,
        beacon_http,
        sleeper: &ThreadSleeper,
        progress: progress.as_ref(),
        cancel: &cancel,
        log: &log,
    };

    match pipeline::run(options, &deps) {
        Ok(outcome) => {
            log.print_summary();
            if let Some(installed) = outcome.context.installed() {
                log.info(&format!("typegenctl is ready at {}", installed.path.display()));
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log.print_summary();
            report(&log, &e);
            exit_code(&e)
        }
    }
}

/// The first interrupt requests a graceful stop; a second one removes the
/// scratch directory and exits at once.
fn install_interrupt_handler(cancel: CancelToken) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || match cancel.interrupt() {
        Interrupt::Graceful => {
            tracing::warn!("interrupt received; cleaning up (press Ctrl-C again to abort)");
        }
        Interrupt::Abort => {
            tracing::warn!("aborting; scratch directory removed");
            std::process::exit(EXIT_INTERRUPTED);
        }
    })
}

fn report(log: &Logger, error: &InstallError) {
    if matches!(error, InstallError::Interrupted) {
        log.error("installation interrupted");
        return;
    }
    for (i, line) in error.to_string().lines().enumerate() {
        if i == 0 {
            log.error(&format!("installation failed: {line}"));
        } else {
            log.error(&format!("  {line}"));
        }
    }
}

fn exit_code(error: &InstallError) -> ExitCode {
    u8::try_from(error.exit_code()).map_or(ExitCode::FAILURE, ExitCode::from)
}
