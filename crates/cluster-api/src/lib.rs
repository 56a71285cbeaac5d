//! Cluster gateway abstraction for stateless remote execution.
//!
//! This crate provides the trait and types the shell engine uses to talk to a
//! cluster, so the engine can be driven by the real `kubectl` runner or by a
//! stub in tests.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

/// Namespace label holding the pod security admission level.
pub const POD_SECURITY_ENFORCE_LABEL: &str = "pod-security.kubernetes.io/enforce";

/// Container addressed by a remote exec.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecTarget {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl ExecTarget {
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: container.into(),
        }
    }
}

/// Request to execute one command inside a container, without a TTY.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRequest {
    /// Container to execute in.
    pub target: ExecTarget,
    /// Argument vector passed after `--`.
    pub argv: Vec<String>,
}

impl ExecRequest {
    /// `sh -lc <script>`: login shell, so the image profile sets up PATH.
    pub fn login_shell(target: ExecTarget, script: impl Into<String>) -> Self {
        Self {
            target,
            argv: vec!["sh".to_string(), "-lc".to_string(), script.into()],
        }
    }

    /// `sh -c <script>`.
    pub fn shell(target: ExecTarget, script: impl Into<String>) -> Self {
        Self {
            target,
            argv: vec!["sh".to_string(), "-c".to_string(), script.into()],
        }
    }

    /// Run an argument vector directly, with no shell involved.
    pub fn direct<I, S>(target: ExecTarget, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target,
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    /// The script handed to the remote shell, if this is a shell invocation.
    pub fn script(&self) -> Option<&str> {
        match self.argv.as_slice() {
            [sh, flag, script] if sh == "sh" && flag.starts_with('-') => Some(script.as_str()),
            _ => None,
        }
    }
}

/// Result of a remote exec. Streams are kept apart, never merged.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    /// Exit code of the runner; `None` when terminated by a signal.
    pub exit: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip)]
    pub duration: Duration,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit == Some(0)
    }
}

/// Workload kinds the target picker can resolve a pod from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Pod,
    Deployment,
    StatefulSet,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Pod,
        ResourceKind::Deployment,
        ResourceKind::StatefulSet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "pod",
            ResourceKind::Deployment => "deployment",
            ResourceKind::StatefulSet => "statefulset",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pod" | "pods" | "po" => Some(ResourceKind::Pod),
            "deployment" | "deployments" | "deploy" => Some(ResourceKind::Deployment),
            "statefulset" | "statefulsets" | "sts" => Some(ResourceKind::StatefulSet),
            _ => None,
        }
    }

    /// Whether pods are found through the workload's label selector.
    pub fn is_workload(&self) -> bool {
        !matches!(self, ResourceKind::Pod)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Waiting reason the kubelet reports when it refuses a container's security settings.
pub const CREATE_CONTAINER_CONFIG_ERROR: &str = "CreateContainerConfigError";

/// Lifecycle state of a single container as reported in pod status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    Running,
    Waiting { reason: String, message: String },
    Terminated { reason: String, message: String },
    /// No status entry yet.
    Absent,
}

impl ContainerState {
    /// Read the state of ephemeral container `name` from a pod descriptor.
    pub fn of_ephemeral(pod: &Value, name: &str) -> Self {
        let entry = pod
            .pointer("/status/ephemeralContainerStatuses")
            .and_then(Value::as_array)
            .and_then(|statuses| statuses.iter().find(|s| s["name"].as_str() == Some(name)));
        let Some(state) = entry.map(|e| &e["state"]) else {
            return ContainerState::Absent;
        };
        let text = |v: &Value, key: &str| v[key].as_str().unwrap_or_default().to_string();
        if state.get("running").is_some() {
            ContainerState::Running
        } else if let Some(w) = state.get("waiting") {
            ContainerState::Waiting {
                reason: text(w, "reason"),
                message: text(w, "message"),
            }
        } else if let Some(t) = state.get("terminated") {
            ContainerState::Terminated {
                reason: text(t, "reason"),
                message: text(t, "message"),
            }
        } else {
            ContainerState::Absent
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }

    /// The kubelet will never start the container as configured.
    pub fn is_config_error(&self) -> bool {
        matches!(self, ContainerState::Waiting { reason, .. } if reason == CREATE_CONTAINER_CONFIG_ERROR)
    }
}

/// Errors raised by a gateway. Remote stderr is always retained in full.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{action} failed: {stderr}")]
    Command {
        action: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("failed to parse {what}: {source}")]
    Parse {
        what: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

impl GatewayError {
    pub fn command(action: impl Into<String>, status: Option<i32>, stderr: impl Into<String>) -> Self {
        GatewayError::Command {
            action: action.into(),
            status,
            stderr: stderr.into(),
        }
    }

    /// Remote stderr when the error came from a failed remote call.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            GatewayError::Command { stderr, .. } => Some(stderr.as_str()),
            _ => None,
        }
    }
}

/// Trait for cluster gateway implementations.
///
/// Every method is a blocking call that performs one remote round trip (the
/// listing helpers may perform two). Callers on an async loop run them via
/// `tokio::task::spawn_blocking`.
pub trait ClusterGateway: Send + Sync {
    /// Execute a command in a container. A non-zero exit is returned as data,
    /// only a failure to run the gateway itself is an `Err`.
    fn exec(&self, req: &ExecRequest) -> Result<ExecResult, GatewayError>;

    /// Read a namespace label; `None` when the label is absent.
    fn namespace_label(&self, namespace: &str, key: &str) -> Result<Option<String>, GatewayError>;

    /// Set a namespace label (overwriting), or remove it when `value` is `None`.
    fn set_namespace_label(
        &self,
        namespace: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<(), GatewayError>;

    /// Fetch the full pod descriptor.
    fn get_pod(&self, namespace: &str, pod: &str) -> Result<Value, GatewayError>;

    /// Replace the pod's `ephemeralcontainers` subresource with `pod_body`.
    fn replace_ephemeral_containers(
        &self,
        namespace: &str,
        pod: &str,
        pod_body: &Value,
    ) -> Result<(), GatewayError>;

    /// Current state of the named ephemeral container.
    fn ephemeral_container_state(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<ContainerState, GatewayError>;

    /// Delete a pod (its controller is expected to recreate it).
    fn delete_pod(&self, namespace: &str, pod: &str) -> Result<(), GatewayError>;

    /// Sorted namespace names.
    fn list_namespaces(&self) -> Result<Vec<String>, GatewayError>;

    /// Sorted resource names of `kind` in `namespace`.
    fn list_resources(&self, namespace: &str, kind: ResourceKind)
        -> Result<Vec<String>, GatewayError>;

    /// Sorted pod names owned by a deployment or statefulset, via its
    /// `matchLabels` selector.
    fn workload_pods(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Vec<String>, GatewayError>;

    /// Sorted container names of a pod.
    fn pod_containers(&self, namespace: &str, pod: &str) -> Result<Vec<String>, GatewayError>;
}

/// Render a `matchLabels` map as a label selector, keys sorted.
pub fn selector_from_match_labels(labels: &serde_json::Map<String, Value>) -> Option<String> {
    if labels.is_empty() {
        return None;
    }
    let mut pairs: Vec<(&String, String)> = labels
        .iter()
        .map(|(k, v)| {
            let value = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
            (k, value)
        })
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    Some(
        pairs
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(","),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ephemeral_container_state() {
        let pod = json!({
            "status": {
                "ephemeralContainerStatuses": [
                    {"name": "up", "state": {"running": {"startedAt": "2024-01-01T00:00:00Z"}}},
                    {"name": "blocked", "state": {"waiting": {
                        "reason": "CreateContainerConfigError",
                        "message": "container has runAsNonRoot and image will run as root"
                    }}},
                    {"name": "pulling", "state": {"waiting": {"reason": "ContainerCreating"}}},
                    {"name": "done", "state": {"terminated": {"reason": "Completed"}}}
                ]
            }
        });
        assert!(ContainerState::of_ephemeral(&pod, "up").is_running());
        let blocked = ContainerState::of_ephemeral(&pod, "blocked");
        assert!(blocked.is_config_error());
        assert_eq!(
            blocked,
            ContainerState::Waiting {
                reason: "CreateContainerConfigError".into(),
                message: "container has runAsNonRoot and image will run as root".into(),
            }
        );
        let pulling = ContainerState::of_ephemeral(&pod, "pulling");
        assert!(!pulling.is_running() && !pulling.is_config_error());
        assert_eq!(
            ContainerState::of_ephemeral(&pod, "done"),
            ContainerState::Terminated { reason: "Completed".into(), message: String::new() }
        );
        assert_eq!(ContainerState::of_ephemeral(&pod, "missing"), ContainerState::Absent);
        assert_eq!(ContainerState::of_ephemeral(&json!({}), "up"), ContainerState::Absent);
    }

    #[test]
    fn test_shell_requests() {
        let target = ExecTarget::new("ns", "pod", "app");
        let login = ExecRequest::login_shell(target.clone(), "ls");
        assert_eq!(login.argv, vec!["sh", "-lc", "ls"]);
        assert_eq!(login.script(), Some("ls"));

        let plain = ExecRequest::shell(target.clone(), "pwd");
        assert_eq!(plain.argv, vec!["sh", "-c", "pwd"]);

        let direct = ExecRequest::direct(target, ["echo", "ready"]);
        assert_eq!(direct.script(), None);
    }

    #[test]
    fn test_resource_kind_parse() {
        assert_eq!(ResourceKind::parse("deploy"), Some(ResourceKind::Deployment));
        assert_eq!(ResourceKind::parse("StatefulSet"), Some(ResourceKind::StatefulSet));
        assert_eq!(ResourceKind::parse("pods"), Some(ResourceKind::Pod));
        assert_eq!(ResourceKind::parse("job"), None);
        assert!(!ResourceKind::Pod.is_workload());
    }

    #[test]
    fn test_selector_sorted() {
        let labels = json!({"tier": "web", "app": "shop"});
        let selector = selector_from_match_labels(labels.as_object().unwrap());
        assert_eq!(selector.as_deref(), Some("app=shop,tier=web"));
        assert_eq!(selector_from_match_labels(&serde_json::Map::new()), None);
    }

    #[test]
    fn test_gateway_error_keeps_stderr() {
        let err = GatewayError::command("kubectl label", Some(1), "forbidden: cannot patch");
        assert_eq!(err.stderr(), Some("forbidden: cannot patch"));
        assert!(err.to_string().contains("forbidden"));
    }
}
