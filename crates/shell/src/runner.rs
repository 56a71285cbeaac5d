//! Effect execution. Each effect becomes one blocking call against the
//! gateway, the orchestrator or the clipboard, and its outcome is reported
//! back as an [`Event`].

use std::sync::Arc;
use std::time::Instant;

use cluster_api::{ClusterGateway, ExecResult};
use kcmd_common::{clip_for_log, log_schema};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::autocomplete::complete_remote;
use crate::clipboard::Clipboard;
use crate::dispatcher::{Effect, Event, ExitReason, ShellState};
use crate::orchestrator::Orchestrator;
use crate::policy;

/// Everything effects run against.
#[derive(Clone)]
pub struct Services {
    pub gateway: Arc<dyn ClusterGateway>,
    pub orchestrator: Arc<Orchestrator>,
    pub clipboard: Arc<dyn Clipboard>,
    pub session_id: String,
}

impl Services {
    /// Execute `effect`. `Exit` is not work and yields no event.
    pub fn execute(&self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::RunCommand { command, request } => {
                let cmd_id = Uuid::now_v7().to_string();
                let started = Instant::now();
                let outcome = self.gateway.exec(&request).map_err(|err| err.to_string());
                let elapsed = started.elapsed();
                info!(
                    event = %command_event(&self.session_id, &cmd_id, &request.target, &outcome, elapsed.as_millis()),
                    "command finished"
                );
                Some(Event::CommandResult {
                    command,
                    outcome,
                    elapsed,
                })
            }
            Effect::Complete {
                input,
                token,
                session,
            } => {
                let remote = complete_remote(self.gateway.as_ref(), &session, &token);
                debug!(token = %token, completion = ?remote, "completion lookup");
                Some(Event::CompletionResult { input, remote })
            }
            Effect::ElevatePolicy { namespace } => Some(Event::PolicyResult(policy::elevate(
                self.gateway.as_ref(),
                &namespace,
            ))),
            Effect::ProvisionDebugContainer { target } => Some(Event::ContainerResult(
                self.orchestrator.provision(self.gateway.as_ref(), &target),
            )),
            Effect::CopyToClipboard { text, lines } => Some(Event::ClipboardResult {
                lines,
                result: self.clipboard.copy(&text),
            }),
            Effect::Exit(_) => None,
        }
    }

    /// Feed `event` through `state`, executing every follow-up effect inline
    /// until the state is idle. Returns the exit reason if one was requested.
    pub fn drive(&self, state: &mut ShellState, event: Event) -> Option<ExitReason> {
        let mut next = state.update(event);
        while let Some(effect) = next {
            if let Effect::Exit(reason) = effect {
                return Some(reason);
            }
            next = self.execute(effect).and_then(|event| state.update(event));
        }
        state.exit_reason()
    }
}

fn command_event(
    session_id: &str,
    cmd_id: &str,
    target: &cluster_api::ExecTarget,
    outcome: &Result<ExecResult, String>,
    duration_ms: u128,
) -> Value {
    let (exit, stderr) = match outcome {
        Ok(result) => (result.exit, clip_for_log(&result.stderr, 200)),
        Err(err) => (None, clip_for_log(err, 200)),
    };
    json!({
        log_schema::EVENT_TYPE: "command_complete",
        log_schema::SESSION_ID: session_id,
        log_schema::COMMAND_ID: cmd_id,
        log_schema::NAMESPACE: target.namespace,
        log_schema::POD: target.pod,
        log_schema::CONTAINER: target.container,
        log_schema::EXIT_CODE: exit,
        log_schema::DURATION_MS: duration_ms as u64,
        "stderr": stderr,
    })
}
