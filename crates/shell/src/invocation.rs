//! Process entry: preconditions, logging, then picker → session → teardown,
//! repeated for every retarget.

use std::io::{self, IsTerminal};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use cluster_api::ClusterGateway;
use cluster_kubectl::KubectlGateway;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cli::Cli;
use crate::clipboard::SystemClipboard;
use crate::dispatcher::{ExitReason, ShellState};
use crate::logging;
use crate::orchestrator::{Orchestrator, ThreadSleeper};
use crate::picker::{resolve_target, StdinChooser, TargetArgs};
use crate::repl::{self, HELP_LINE};
use crate::runner::Services;
use crate::session::Session;
use crate::settings::Settings;
use crate::teardown::{teardown, Confirm, StdinConfirm};

pub fn run_shell() -> Result<i32> {
    run_shell_with_cli(Cli::parse())
}

pub fn run_shell_with_cli(cli: Cli) -> Result<i32> {
    let settings = match Settings::resolve(&cli) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("kcmd: {err:#}");
            return Ok(1);
        }
    };

    let gateway = match KubectlGateway::locate(&settings.kubectl) {
        Ok(gateway) => gateway
            .with_context(settings.context.as_deref())
            .with_kubeconfig(settings.kubeconfig.as_deref()),
        Err(err) => {
            eprintln!("kcmd: {err}");
            return Ok(1);
        }
    };

    if !(io::stdin().is_terminal() && io::stdout().is_terminal()) {
        eprintln!("kcmd: no interactive TTY detected on stdin/stdout; exiting.");
        return Ok(1);
    }

    let _log_guard = match logging::init(&settings.log_dir, &settings.log_level) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("kcmd: warning: logging disabled: {err:#}");
            None
        }
    };
    info!(
        kubectl = %gateway.binary().display(),
        context = ?settings.context,
        "kcmd starting"
    );

    let gateway: Arc<dyn ClusterGateway> = Arc::new(gateway);
    let orchestrator = Arc::new(Orchestrator::new(
        settings.debug.clone(),
        Arc::new(ThreadSleeper),
    ));
    let mut target_args = settings.target.clone();

    loop {
        let target = resolve_target(
            gateway.as_ref(),
            &target_args,
            &mut StdinChooser::terminal(),
        )?;
        let session_id = Uuid::now_v7().to_string();
        info!(session_id = %session_id, target = %target.describe(), "session started");

        let banner = vec![
            format!("kcmd v{}", env!("CARGO_PKG_VERSION")),
            format!("Target: {}", target.describe()),
            format!("Logging to: {}", settings.log_dir.display()),
            HELP_LINE.to_string(),
            String::new(),
        ];
        let mut state = ShellState::new(Session::new(target), settings.elevate_eagerly);
        let services = Services {
            gateway: gateway.clone(),
            orchestrator: orchestrator.clone(),
            clipboard: Arc::new(SystemClipboard),
            session_id: session_id.clone(),
        };

        let outcome = repl::run_session(&mut state, services, &banner);
        if let Err(err) = &outcome {
            warn!(session_id = %session_id, error = %err, "session loop failed");
        }

        let mut stdin_confirm = StdinConfirm;
        let confirm: Option<&mut dyn Confirm> = if settings.offer_pod_delete {
            Some(&mut stdin_confirm)
        } else {
            None
        };
        teardown(
            gateway.as_ref(),
            &state.session,
            &session_id,
            &mut io::stdout(),
            confirm,
        );

        match outcome? {
            ExitReason::Quit => return Ok(0),
            ExitReason::Retarget => {
                println!("\nSelect a new target.");
                target_args = TargetArgs::default();
            }
        }
    }
}
