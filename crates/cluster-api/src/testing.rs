//! In-memory gateway for tests: records every call and answers from
//! programmable state.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::{json, Value};

use crate::{ClusterGateway, ContainerState, ExecRequest, ExecResult, GatewayError, ResourceKind};

/// One recorded gateway call.
#[derive(Clone, Debug, PartialEq)]
pub enum GatewayCall {
    Exec(ExecRequest),
    ReadLabel {
        namespace: String,
        key: String,
    },
    WriteLabel {
        namespace: String,
        key: String,
        value: Option<String>,
    },
    GetPod {
        namespace: String,
        pod: String,
    },
    ReplaceEphemeral {
        namespace: String,
        pod: String,
        body: Value,
    },
    ContainerStatus {
        container: String,
    },
    DeletePod {
        namespace: String,
        pod: String,
    },
    ListNamespaces,
    ListResources {
        namespace: String,
        kind: ResourceKind,
    },
    WorkloadPods {
        namespace: String,
        name: String,
    },
    PodContainers {
        namespace: String,
        pod: String,
    },
}

type ExecHandler = Box<dyn FnMut(&ExecRequest) -> Result<ExecResult, GatewayError> + Send>;

/// Programmable gateway. Defaults: every exec succeeds with empty output, no
/// labels exist, the pod has a single `app` container, and ephemeral
/// containers report running immediately.
pub struct StubGateway {
    calls: Mutex<Vec<GatewayCall>>,
    exec_handler: Mutex<ExecHandler>,
    labels: Mutex<HashMap<(String, String), String>>,
    label_read_error: Mutex<Option<String>>,
    label_write_error: Mutex<Option<String>>,
    pod: Mutex<Value>,
    replace_errors: Mutex<VecDeque<String>>,
    running_after: Mutex<Option<u32>>,
    running_checks: Mutex<u32>,
    waiting: Mutex<(String, String)>,
    listing: Mutex<BTreeMap<String, Vec<String>>>,
}

impl Default for StubGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl StubGateway {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            exec_handler: Mutex::new(Box::new(|_| Ok(ok_result("")))),
            labels: Mutex::new(HashMap::new()),
            label_read_error: Mutex::new(None),
            label_write_error: Mutex::new(None),
            pod: Mutex::new(json!({
                "metadata": {"name": "pod"},
                "spec": {"containers": [{"name": "app"}]}
            })),
            replace_errors: Mutex::new(VecDeque::new()),
            running_after: Mutex::new(Some(1)),
            running_checks: Mutex::new(0),
            waiting: Mutex::new(("ContainerCreating".to_string(), String::new())),
            listing: Mutex::new(BTreeMap::new()),
        }
    }

    /// Answer every exec through `handler`.
    pub fn with_exec<F>(self, handler: F) -> Self
    where
        F: FnMut(&ExecRequest) -> Result<ExecResult, GatewayError> + Send + 'static,
    {
        *lock(&self.exec_handler) = Box::new(handler);
        self
    }

    /// Seed a namespace label.
    pub fn with_label(self, namespace: &str, key: &str, value: &str) -> Self {
        lock(&self.labels).insert((namespace.to_string(), key.to_string()), value.to_string());
        self
    }

    /// Make every label read fail with `stderr`.
    pub fn with_label_read_error(self, stderr: &str) -> Self {
        *lock(&self.label_read_error) = Some(stderr.to_string());
        self
    }

    /// Make every label write fail with `stderr`.
    pub fn with_label_write_error(self, stderr: &str) -> Self {
        *lock(&self.label_write_error) = Some(stderr.to_string());
        self
    }

    pub fn with_pod(self, pod: Value) -> Self {
        *lock(&self.pod) = pod;
        self
    }

    /// Queue failures for successive `replace_ephemeral_containers` calls.
    pub fn with_replace_errors<I, S>(self, errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.replace_errors).extend(errors.into_iter().map(Into::into));
        self
    }

    /// Report running from the `n`-th status check on (1-based); `None` never.
    pub fn with_running_after(self, checks: Option<u32>) -> Self {
        *lock(&self.running_after) = checks;
        self
    }

    /// Waiting reason and message reported before the container runs.
    pub fn with_waiting(self, reason: &str, message: &str) -> Self {
        *lock(&self.waiting) = (reason.to_string(), message.to_string());
        self
    }

    /// Seed a listing keyed like `namespaces`, `pod@ns`, `deployment@ns`,
    /// `pods-of:web@ns` or `containers:pod@ns`.
    pub fn with_listing(self, key: &str, values: &[&str]) -> Self {
        lock(&self.listing).insert(
            key.to_string(),
            values.iter().map(|v| v.to_string()).collect(),
        );
        self
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        lock(&self.calls).clone()
    }

    pub fn exec_calls(&self) -> Vec<ExecRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::Exec(req) => Some(req),
                _ => None,
            })
            .collect()
    }

    pub fn label_writes(&self) -> Vec<(String, Option<String>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::WriteLabel {
                    namespace, value, ..
                } => Some((namespace, value)),
                _ => None,
            })
            .collect()
    }

    pub fn replace_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, GatewayCall::ReplaceEphemeral { .. }))
            .count()
    }

    pub fn label(&self, namespace: &str, key: &str) -> Option<String> {
        lock(&self.labels)
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
    }

    fn record(&self, call: GatewayCall) {
        lock(&self.calls).push(call);
    }

    fn listing(&self, key: &str) -> Vec<String> {
        lock(&self.listing).get(key).cloned().unwrap_or_default()
    }
}

impl ClusterGateway for StubGateway {
    fn exec(&self, req: &ExecRequest) -> Result<ExecResult, GatewayError> {
        self.record(GatewayCall::Exec(req.clone()));
        let mut handler = lock(&self.exec_handler);
        (*handler)(req)
    }

    fn namespace_label(&self, namespace: &str, key: &str) -> Result<Option<String>, GatewayError> {
        self.record(GatewayCall::ReadLabel {
            namespace: namespace.to_string(),
            key: key.to_string(),
        });
        if let Some(stderr) = lock(&self.label_read_error).clone() {
            return Err(GatewayError::command("kubectl get namespace", Some(1), stderr));
        }
        Ok(self.label(namespace, key))
    }

    fn set_namespace_label(
        &self,
        namespace: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.record(GatewayCall::WriteLabel {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value: value.map(str::to_string),
        });
        if let Some(stderr) = lock(&self.label_write_error).clone() {
            return Err(GatewayError::command("kubectl label", Some(1), stderr));
        }
        let mut labels = lock(&self.labels);
        let slot = (namespace.to_string(), key.to_string());
        match value {
            Some(value) => {
                labels.insert(slot, value.to_string());
            }
            None => {
                labels.remove(&slot);
            }
        }
        Ok(())
    }

    fn get_pod(&self, namespace: &str, pod: &str) -> Result<Value, GatewayError> {
        self.record(GatewayCall::GetPod {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
        });
        Ok(lock(&self.pod).clone())
    }

    fn replace_ephemeral_containers(
        &self,
        namespace: &str,
        pod: &str,
        pod_body: &Value,
    ) -> Result<(), GatewayError> {
        self.record(GatewayCall::ReplaceEphemeral {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            body: pod_body.clone(),
        });
        if let Some(stderr) = lock(&self.replace_errors).pop_front() {
            return Err(GatewayError::command("kubectl replace --raw", Some(1), stderr));
        }
        Ok(())
    }

    fn ephemeral_container_state(
        &self,
        _namespace: &str,
        _pod: &str,
        container: &str,
    ) -> Result<ContainerState, GatewayError> {
        self.record(GatewayCall::ContainerStatus {
            container: container.to_string(),
        });
        let mut checks = lock(&self.running_checks);
        *checks += 1;
        if matches!(*lock(&self.running_after), Some(after) if *checks >= after) {
            return Ok(ContainerState::Running);
        }
        let (reason, message) = lock(&self.waiting).clone();
        Ok(ContainerState::Waiting { reason, message })
    }

    fn delete_pod(&self, namespace: &str, pod: &str) -> Result<(), GatewayError> {
        self.record(GatewayCall::DeletePod {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
        });
        Ok(())
    }

    fn list_namespaces(&self) -> Result<Vec<String>, GatewayError> {
        self.record(GatewayCall::ListNamespaces);
        Ok(self.listing("namespaces"))
    }

    fn list_resources(
        &self,
        namespace: &str,
        kind: ResourceKind,
    ) -> Result<Vec<String>, GatewayError> {
        self.record(GatewayCall::ListResources {
            namespace: namespace.to_string(),
            kind,
        });
        Ok(self.listing(&format!("{kind}@{namespace}")))
    }

    fn workload_pods(
        &self,
        namespace: &str,
        _kind: ResourceKind,
        name: &str,
    ) -> Result<Vec<String>, GatewayError> {
        self.record(GatewayCall::WorkloadPods {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        Ok(self.listing(&format!("pods-of:{name}@{namespace}")))
    }

    fn pod_containers(&self, namespace: &str, pod: &str) -> Result<Vec<String>, GatewayError> {
        self.record(GatewayCall::PodContainers {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
        });
        Ok(self.listing(&format!("containers:{pod}@{namespace}")))
    }
}

/// Successful exec result with `stdout`.
pub fn ok_result(stdout: &str) -> ExecResult {
    ExecResult {
        exit: Some(0),
        stdout: stdout.to_string(),
        ..ExecResult::default()
    }
}

/// Failed exec result with `stderr` and the given exit code.
pub fn failed_result(exit: i32, stderr: &str) -> ExecResult {
    ExecResult {
        exit: Some(exit),
        stderr: stderr.to_string(),
        ..ExecResult::default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
