//! Ephemeral debug container provisioning.
//!
//! Attaches an elevated busybox-style container to the target pod, waits for
//! it to become usable and picks how commands reach the target's filesystem.

use std::sync::Arc;
use std::time::Duration;

use cluster_api::{
    ClusterGateway, ContainerState, ExecRequest, ExecTarget, GatewayError,
    CREATE_CONTAINER_CONFIG_ERROR,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::classify::is_restrictive_policy;
use crate::session::{DebugContainerRecord, DebugExecutionMode, Target};

pub const NAMESPACE_ENTRY_PID: &str = "1";
pub const FILESYSTEM_ROOT: &str = "/proc/1/root";

/// Bounded polling expressed as data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Sleep, then call `attempt`, until it yields a value or the budget runs
    /// out. Returns the value and the 1-based attempt that produced it.
    pub fn poll<T>(
        &self,
        sleeper: &dyn Sleeper,
        mut attempt: impl FnMut(u32) -> Option<T>,
    ) -> Option<(T, u32)> {
        for n in 1..=self.max_attempts {
            sleeper.sleep(self.interval);
            if let Some(value) = attempt(n) {
                return Some((value, n));
            }
        }
        None
    }
}

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// What to attach and how long to wait for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugProfile {
    pub image: String,
    pub command: Vec<String>,
    pub name_prefix: String,
    pub readiness: RetryPolicy,
}

impl Default for DebugProfile {
    fn default() -> Self {
        Self {
            image: "busybox:latest".to_string(),
            command: vec!["sleep".to_string(), "infinity".to_string()],
            name_prefix: "kcmd-debug".to_string(),
            readiness: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("failed to get pod: {0}")]
    FetchPod(#[source] GatewayError),
    #[error("pod descriptor has no spec: {0}")]
    InvalidPodSpec(String),
    #[error("failed to create ephemeral container: {0}")]
    Attach(#[source] GatewayError),
    #[error("debug container {name} not ready after {attempts} attempts")]
    Timeout { name: String, attempts: u32 },
    #[error("debug container {name} failed to start: {message}")]
    StartFailed {
        name: String,
        reason: String,
        message: String,
    },
}

impl ProvisionError {
    /// Admission rejected the container for running as root or with
    /// capabilities.
    pub fn is_restrictive(&self) -> bool {
        is_restrictive_policy(&self.to_string())
    }

    /// Name of a container that was attached before the failure.
    pub fn attached_container(&self) -> Option<&str> {
        match self {
            ProvisionError::Timeout { name, .. } | ProvisionError::StartFailed { name, .. } => {
                Some(name)
            }
            _ => None,
        }
    }

    /// Extra advice for failures a retry cannot fix.
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            ProvisionError::StartFailed { .. } => Some(POLICY_ENGINE_GUIDANCE),
            _ => None,
        }
    }
}

pub const POLICY_ENGINE_GUIDANCE: &str = "This namespace likely has additional policy enforcement (Kyverno/OPA) preventing root containers. Use a non-root debug image or relax the policy.";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EphemeralContainer<'a> {
    name: &'a str,
    image: &'a str,
    target_container_name: &'a str,
    command: &'a [String],
    security_context: SecurityContext,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SecurityContext {
    allow_privilege_escalation: bool,
    run_as_user: u32,
    capabilities: Capabilities,
    seccomp_profile: SeccompProfile,
}

#[derive(Serialize)]
struct Capabilities {
    drop: Vec<&'static str>,
    add: Vec<&'static str>,
}

#[derive(Serialize)]
struct SeccompProfile {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Ephemeral container descriptor as accepted by the pod API.
pub fn container_descriptor(profile: &DebugProfile, name: &str, target_container: &str) -> Value {
    let container = EphemeralContainer {
        name,
        image: &profile.image,
        target_container_name: target_container,
        command: &profile.command,
        security_context: SecurityContext {
            allow_privilege_escalation: false,
            run_as_user: 0,
            capabilities: Capabilities {
                drop: vec!["ALL"],
                add: vec!["SYS_ADMIN", "SYS_CHROOT", "SYS_PTRACE"],
            },
            seccomp_profile: SeccompProfile {
                kind: "RuntimeDefault",
            },
        },
    };
    serde_json::to_value(container).unwrap_or(Value::Null)
}

/// Append `container` to `spec.ephemeralContainers` of a pod descriptor.
pub fn append_ephemeral(pod: &mut Value, container: Value) -> Result<(), ProvisionError> {
    let spec = pod
        .get_mut("spec")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| ProvisionError::InvalidPodSpec("missing spec object".to_string()))?;
    let list = spec
        .entry("ephemeralContainers")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !list.is_array() {
        *list = Value::Array(Vec::new());
    }
    if let Value::Array(items) = list {
        items.push(container);
    }
    Ok(())
}

pub struct Orchestrator {
    profile: DebugProfile,
    sleeper: Arc<dyn Sleeper>,
}

impl Orchestrator {
    pub fn new(profile: DebugProfile, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { profile, sleeper }
    }

    pub fn profile(&self) -> &DebugProfile {
        &self.profile
    }

    pub fn container_name(&self, unix_secs: i64) -> String {
        format!("{}-{}", self.profile.name_prefix, unix_secs)
    }

    /// Attach, wait for readiness, then probe the execution strategy.
    pub fn provision(
        &self,
        gateway: &dyn ClusterGateway,
        target: &Target,
    ) -> Result<DebugContainerRecord, ProvisionError> {
        let name = self.container_name(chrono::Utc::now().timestamp());
        info!(
            namespace = %target.namespace,
            pod = %target.pod,
            container = %name,
            image = %self.profile.image,
            "attaching debug container"
        );

        let mut pod = gateway
            .get_pod(&target.namespace, &target.pod)
            .map_err(ProvisionError::FetchPod)?;
        let descriptor = container_descriptor(&self.profile, &name, &target.container);
        append_ephemeral(&mut pod, descriptor)?;
        gateway
            .replace_ephemeral_containers(&target.namespace, &target.pod, &pod)
            .map_err(ProvisionError::Attach)?;

        let debug_target = ExecTarget::new(&target.namespace, &target.pod, &name);
        let attempts = self.wait_ready(gateway, target, &debug_target)?;
        debug!(container = %name, attempts, "debug container ready");

        let mode = probe_mode(gateway, &debug_target);
        info!(container = %name, mode = %mode.describe(), "debug container strategy chosen");
        Ok(DebugContainerRecord { name, mode })
    }

    fn wait_ready(
        &self,
        gateway: &dyn ClusterGateway,
        target: &Target,
        debug_target: &ExecTarget,
    ) -> Result<u32, ProvisionError> {
        let readiness = self.profile.readiness;
        let ready = readiness.poll(self.sleeper.as_ref(), |attempt| {
            let state = gateway
                .ephemeral_container_state(&target.namespace, &target.pod, &debug_target.container)
                .unwrap_or_else(|err| {
                    debug!(attempt, error = %err, "status check failed");
                    ContainerState::Absent
                });
            match state {
                ContainerState::Running => {}
                ContainerState::Waiting { reason, message }
                    if reason == CREATE_CONTAINER_CONFIG_ERROR =>
                {
                    warn!(
                        container = %debug_target.container,
                        %reason,
                        %message,
                        "debug container cannot start"
                    );
                    return Some(Err(ProvisionError::StartFailed {
                        name: debug_target.container.clone(),
                        reason,
                        message,
                    }));
                }
                other => {
                    debug!(attempt, state = ?other, "debug container not running yet");
                    return None;
                }
            }
            let echo = ExecRequest::direct(debug_target.clone(), ["echo", "ready"]);
            match gateway.exec(&echo) {
                Ok(result) if result.success() => Some(Ok(())),
                _ => None,
            }
        });
        match ready {
            Some((Ok(()), attempt)) => Ok(attempt),
            Some((Err(err), _)) => Err(err),
            None => {
                warn!(
                    container = %debug_target.container,
                    attempts = readiness.max_attempts,
                    "debug container never became ready"
                );
                Err(ProvisionError::Timeout {
                    name: debug_target.container.clone(),
                    attempts: readiness.max_attempts,
                })
            }
        }
    }
}

/// Namespace entry when `nsenter` into pid 1 works, otherwise the target's
/// filesystem through `/proc/1/root`.
pub fn probe_mode(gateway: &dyn ClusterGateway, debug_target: &ExecTarget) -> DebugExecutionMode {
    let probe = ExecRequest::shell(
        debug_target.clone(),
        format!("nsenter -t {NAMESPACE_ENTRY_PID} -m -u -i -p -- pwd 2>&1"),
    );
    match gateway.exec(&probe) {
        Ok(result) if result.success() && !result.stdout.trim().is_empty() => {
            DebugExecutionMode::NamespaceEntry {
                pid: NAMESPACE_ENTRY_PID.to_string(),
            }
        }
        _ => DebugExecutionMode::FilesystemRoot {
            root: FILESYSTEM_ROOT.to_string(),
        },
    }
}
