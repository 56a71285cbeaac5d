//! Session teardown: policy restoration and ephemeral container notice.
//!
//! Runs after the terminal left raw mode. Nothing here fails the process;
//! problems are printed and logged.

use std::io::{self, BufRead, Write};

use cluster_api::ClusterGateway;
use serde_json::json;
use tracing::{info, warn};

use kcmd_common::log_schema;

use crate::policy;
use crate::session::Session;

/// Yes/no question on the controlling terminal.
pub trait Confirm {
    fn confirm(&mut self, question: &str) -> bool;
}

/// Reads the answer from stdin; anything but `y`/`yes` is no.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, question: &str) -> bool {
        print!("{question} [y/N]: ");
        io::stdout().flush().ok();
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// `None` when the session never changed the label.
    pub policy_restored: Option<bool>,
    pub pod_deleted: bool,
}

/// Restore the namespace label, surface attached debug containers and, when
/// `confirm` is given, offer to delete the pod.
pub fn teardown(
    gateway: &dyn ClusterGateway,
    session: &Session,
    session_id: &str,
    out: &mut dyn Write,
    confirm: Option<&mut dyn Confirm>,
) -> TeardownReport {
    let mut report = TeardownReport::default();
    let namespace = &session.target.namespace;
    let pod = &session.target.pod;

    if session.policy.changed {
        let _ = if session.policy.original.is_empty() {
            writeln!(out, "Removing PodSecurity policy label...")
        } else {
            writeln!(
                out,
                "Restoring namespace policy to '{}'...",
                session.policy.original
            )
        };
        let restored = match policy::restore(gateway, namespace, &session.policy) {
            Ok(_) => {
                let _ = writeln!(out, "✓ Policy restored successfully");
                true
            }
            Err(err) => {
                let _ = writeln!(out, "Failed to restore policy: {err}");
                false
            }
        };
        report.policy_restored = Some(restored);
    }

    if !session.attached_containers.is_empty() {
        for name in &session.attached_containers {
            let _ = writeln!(out, "\nEphemeral container '{name}' was created in pod '{pod}'.");
        }
        let _ = writeln!(
            out,
            "Ephemeral containers cannot be removed without deleting the pod."
        );
        if let Some(confirm) = confirm {
            if confirm.confirm("Delete and recreate the pod?") {
                let _ = writeln!(out, "Deleting pod '{pod}'...");
                match gateway.delete_pod(namespace, pod) {
                    Ok(()) => {
                        let _ = writeln!(
                            out,
                            "✓ Pod deleted successfully. It will be recreated by the controller."
                        );
                        report.pod_deleted = true;
                    }
                    Err(err) => {
                        warn!(namespace = %namespace, pod = %pod, error = %err, "pod deletion failed");
                        let _ = writeln!(out, "Failed to delete pod: {err}");
                    }
                }
            }
        }
    }

    let entry = json!({
        log_schema::EVENT_TYPE: "session_end",
        log_schema::SESSION_ID: session_id,
        log_schema::NAMESPACE: namespace,
        log_schema::POD: pod,
        log_schema::CONTAINER: session.target.container,
        "debug_containers": session.attached_containers,
        "policy_restored": report.policy_restored,
        "pod_deleted": report.pod_deleted,
    });
    info!(event = %entry, "session torn down");
    report
}
