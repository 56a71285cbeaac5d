//! `kubectl`-backed cluster gateway.
//!
//! Every operation shells out to one `kubectl` invocation and captures stdout
//! and stderr separately.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Instant;

use cluster_api::{
    selector_from_match_labels, ClusterGateway, ContainerState, ExecRequest, ExecResult,
    GatewayError, ResourceKind,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

pub const DEFAULT_KUBECTL: &str = "kubectl";

/// Gateway that drives a local `kubectl` binary.
#[derive(Clone, Debug)]
pub struct KubectlGateway {
    binary: PathBuf,
    global_args: Vec<String>,
}

impl KubectlGateway {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            global_args: Vec::new(),
        }
    }

    /// Resolve `program` on PATH (or as a path) and build a gateway for it.
    pub fn locate(program: &str) -> Result<Self, GatewayError> {
        let binary = which::which(program).map_err(|err| {
            GatewayError::Invalid(format!("{program} not found in PATH: {err}"))
        })?;
        Ok(Self::new(binary))
    }

    /// Pin every call to a kubeconfig context.
    pub fn with_context(mut self, context: Option<&str>) -> Self {
        if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
            self.global_args.push("--context".to_string());
            self.global_args.push(context.to_string());
        }
        self
    }

    pub fn with_kubeconfig(mut self, kubeconfig: Option<&Path>) -> Self {
        if let Some(path) = kubeconfig {
            self.global_args.push("--kubeconfig".to_string());
            self.global_args.push(path.display().to_string());
        }
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Arguments for a remote exec, after the global flags.
    pub fn exec_args(req: &ExecRequest) -> Vec<String> {
        let mut args = vec![
            "-n".to_string(),
            req.target.namespace.clone(),
            "exec".to_string(),
            req.target.pod.clone(),
            "-c".to_string(),
            req.target.container.clone(),
            "--".to_string(),
        ];
        args.extend(req.argv.iter().cloned());
        args
    }

    fn run(&self, args: &[String], stdin: Option<&[u8]>) -> Result<Output, GatewayError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.global_args)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let launch_err = |source| GatewayError::Launch {
            program: self.binary.display().to_string(),
            source,
        };

        let mut child = cmd.spawn().map_err(launch_err)?;
        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input).map_err(launch_err)?;
            }
        }
        child.wait_with_output().map_err(launch_err)
    }

    fn run_checked(
        &self,
        action: &str,
        args: &[String],
        stdin: Option<&[u8]>,
    ) -> Result<Vec<u8>, GatewayError> {
        let output = self.run(args, stdin)?;
        if !output.status.success() {
            return Err(GatewayError::command(
                action,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(output.stdout)
    }

    fn get_json<T: DeserializeOwned>(&self, what: &str, args: &[String]) -> Result<T, GatewayError> {
        let stdout = self.run_checked(&format!("kubectl get {what}"), args, None)?;
        serde_json::from_slice(&stdout).map_err(|source| GatewayError::Parse {
            what: what.to_string(),
            source,
        })
    }
}

#[derive(Deserialize)]
struct ItemList {
    #[serde(default)]
    items: Vec<NamedItem>,
}

#[derive(Deserialize)]
struct NamedItem {
    metadata: Metadata,
}

#[derive(Deserialize)]
struct Metadata {
    name: String,
}

#[derive(Deserialize)]
struct Workload {
    spec: WorkloadSpec,
}

#[derive(Deserialize)]
struct WorkloadSpec {
    selector: WorkloadSelector,
}

#[derive(Deserialize)]
struct WorkloadSelector {
    #[serde(default, rename = "matchLabels")]
    match_labels: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
struct PodContainers {
    spec: PodContainersSpec,
}

#[derive(Deserialize)]
struct PodContainersSpec {
    #[serde(default)]
    containers: Vec<Metadata>,
}

fn sorted_names(list: ItemList) -> Vec<String> {
    let mut names: Vec<String> = list.items.into_iter().map(|i| i.metadata.name).collect();
    names.sort();
    names
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// jsonpath expression selecting a label whose key contains dots.
fn label_jsonpath(key: &str) -> String {
    format!("jsonpath={{.metadata.labels.{}}}", key.replace('.', "\\."))
}

impl ClusterGateway for KubectlGateway {
    fn exec(&self, req: &ExecRequest) -> Result<ExecResult, GatewayError> {
        let started = Instant::now();
        let output = self.run(&Self::exec_args(req), None)?;
        let result = ExecResult {
            exit: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started.elapsed(),
        };
        debug!(
            pod = %req.target.pod,
            container = %req.target.container,
            exit = ?result.exit,
            duration_ms = result.duration.as_millis() as u64,
            "kubectl exec finished"
        );
        Ok(result)
    }

    fn namespace_label(&self, namespace: &str, key: &str) -> Result<Option<String>, GatewayError> {
        let args = vec![
            "get".to_string(),
            "namespace".to_string(),
            namespace.to_string(),
            "-o".to_string(),
            label_jsonpath(key),
        ];
        let stdout = self.run_checked("kubectl get namespace", &args, None)?;
        let value = String::from_utf8_lossy(&stdout).trim().to_string();
        Ok((!value.is_empty()).then_some(value))
    }

    fn set_namespace_label(
        &self,
        namespace: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<(), GatewayError> {
        let mut args = strings(&["label", "namespace", namespace]);
        match value {
            Some(value) => {
                args.push(format!("{key}={value}"));
                args.push("--overwrite".to_string());
            }
            None => args.push(format!("{key}-")),
        }
        self.run_checked("kubectl label namespace", &args, None)?;
        Ok(())
    }

    fn get_pod(&self, namespace: &str, pod: &str) -> Result<Value, GatewayError> {
        self.get_json(
            &format!("pod/{pod}"),
            &strings(&["get", "pod", pod, "-n", namespace, "-o", "json"]),
        )
    }

    fn replace_ephemeral_containers(
        &self,
        namespace: &str,
        pod: &str,
        pod_body: &Value,
    ) -> Result<(), GatewayError> {
        let body = serde_json::to_vec(pod_body).map_err(|source| GatewayError::Parse {
            what: "patched pod spec".to_string(),
            source,
        })?;
        let args = vec![
            "replace".to_string(),
            "--raw".to_string(),
            format!("/api/v1/namespaces/{namespace}/pods/{pod}/ephemeralcontainers"),
            "-f".to_string(),
            "-".to_string(),
        ];
        self.run_checked("kubectl replace --raw ephemeralcontainers", &args, Some(&body))?;
        Ok(())
    }

    fn ephemeral_container_state(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<ContainerState, GatewayError> {
        let pod_json = self.get_pod(namespace, pod)?;
        let state = ContainerState::of_ephemeral(&pod_json, container);
        debug!(pod, container, ?state, "ephemeral container state");
        Ok(state)
    }

    fn delete_pod(&self, namespace: &str, pod: &str) -> Result<(), GatewayError> {
        self.run_checked(
            "kubectl delete pod",
            &strings(&["delete", "pod", pod, "-n", namespace]),
            None,
        )?;
        Ok(())
    }

    fn list_namespaces(&self) -> Result<Vec<String>, GatewayError> {
        let list: ItemList = self.get_json("ns", &strings(&["get", "ns", "-o", "json"]))?;
        Ok(sorted_names(list))
    }

    fn list_resources(
        &self,
        namespace: &str,
        kind: ResourceKind,
    ) -> Result<Vec<String>, GatewayError> {
        let list: ItemList = self.get_json(
            kind.as_str(),
            &strings(&["-n", namespace, "get", kind.as_str(), "-o", "json"]),
        )?;
        Ok(sorted_names(list))
    }

    fn workload_pods(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Vec<String>, GatewayError> {
        if !kind.is_workload() {
            return Err(GatewayError::Invalid(
                "selector only supported for deployment/statefulset".to_string(),
            ));
        }
        let workload: Workload = self.get_json(
            &format!("{kind}/{name}"),
            &strings(&["-n", namespace, "get", kind.as_str(), name, "-o", "json"]),
        )?;
        let selector = selector_from_match_labels(&workload.spec.selector.match_labels)
            .ok_or_else(|| {
                GatewayError::Invalid(format!(
                    "{kind}/{name} has empty matchLabels; cannot locate its pods"
                ))
            })?;
        let list: ItemList = self.get_json(
            "pods",
            &strings(&["-n", namespace, "get", "pods", "-l", &selector, "-o", "json"]),
        )?;
        Ok(sorted_names(list))
    }

    fn pod_containers(&self, namespace: &str, pod: &str) -> Result<Vec<String>, GatewayError> {
        let parsed: PodContainers = self.get_json(
            &format!("pod/{pod}"),
            &strings(&["-n", namespace, "get", "pod", pod, "-o", "json"]),
        )?;
        let mut names: Vec<String> = parsed.spec.containers.into_iter().map(|c| c.name).collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_api::ExecTarget;

    #[test]
    fn test_exec_args_shape() {
        let req = ExecRequest::login_shell(ExecTarget::new("shop", "web-0", "app"), "cd /srv && ls");
        assert_eq!(
            KubectlGateway::exec_args(&req),
            vec!["-n", "shop", "exec", "web-0", "-c", "app", "--", "sh", "-lc", "cd /srv && ls"]
        );
    }

    #[test]
    fn test_label_jsonpath_escapes_dots() {
        assert_eq!(
            label_jsonpath("pod-security.kubernetes.io/enforce"),
            "jsonpath={.metadata.labels.pod-security\\.kubernetes\\.io/enforce}"
        );
    }

    #[test]
    fn test_missing_binary_is_launch_error() {
        let gateway = KubectlGateway::new("/nonexistent/kubectl-binary");
        let req = ExecRequest::shell(ExecTarget::new("ns", "pod", "app"), "true");
        match gateway.exec(&req) {
            Err(GatewayError::Launch { program, .. }) => {
                assert!(program.contains("kubectl-binary"))
            }
            other => panic!("expected launch error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    mod fake_binary {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        fn fake_kubectl(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("kubectl");
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            let mut perms = fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&path, perms).unwrap();
            path
        }

        #[test]
        fn exec_keeps_streams_apart() {
            let temp = tempfile::tempdir().unwrap();
            let bin = fake_kubectl(temp.path(), "echo out; echo err >&2; exit 3");
            let gateway = KubectlGateway::new(bin);
            let req = ExecRequest::shell(ExecTarget::new("ns", "pod", "app"), "ignored");
            let result = gateway.exec(&req).unwrap();
            assert_eq!(result.exit, Some(3));
            assert_eq!(result.stdout, "out\n");
            assert_eq!(result.stderr, "err\n");
        }

        #[test]
        fn global_args_come_first() {
            let temp = tempfile::tempdir().unwrap();
            let bin = fake_kubectl(temp.path(), "echo \"$@\"");
            let gateway = KubectlGateway::new(bin).with_context(Some("staging"));
            let req = ExecRequest::direct(ExecTarget::new("ns", "pod", "app"), ["echo", "ready"]);
            let result = gateway.exec(&req).unwrap();
            assert_eq!(
                result.stdout.trim(),
                "--context staging -n ns exec pod -c app -- echo ready"
            );
        }

        #[test]
        fn label_removal_uses_trailing_dash() {
            let temp = tempfile::tempdir().unwrap();
            let log = temp.path().join("args.log");
            let bin = fake_kubectl(temp.path(), &format!("echo \"$@\" > {}", log.display()));
            let gateway = KubectlGateway::new(bin);
            gateway
                .set_namespace_label("shop", "pod-security.kubernetes.io/enforce", None)
                .unwrap();
            let args = fs::read_to_string(&log).unwrap();
            assert_eq!(
                args.trim(),
                "label namespace shop pod-security.kubernetes.io/enforce-"
            );
        }

        #[test]
        fn container_state_reads_waiting_reason() {
            let temp = tempfile::tempdir().unwrap();
            let bin = fake_kubectl(
                temp.path(),
                r#"cat <<'JSON'
{"status":{"ephemeralContainerStatuses":[{"name":"kcmd-debug-1","state":{"waiting":{"reason":"CreateContainerConfigError","message":"container has runAsNonRoot and image will run as root"}}}]}}
JSON"#,
            );
            let gateway = KubectlGateway::new(bin);
            let state = gateway
                .ephemeral_container_state("shop", "web-0", "kcmd-debug-1")
                .unwrap();
            assert!(state.is_config_error());
            assert_eq!(
                state,
                ContainerState::Waiting {
                    reason: "CreateContainerConfigError".to_string(),
                    message: "container has runAsNonRoot and image will run as root".to_string(),
                }
            );
        }

        #[test]
        fn failed_label_read_keeps_stderr() {
            let temp = tempfile::tempdir().unwrap();
            let bin = fake_kubectl(temp.path(), "echo 'Error from server (Forbidden)' >&2; exit 1");
            let gateway = KubectlGateway::new(bin);
            let err = gateway.namespace_label("shop", "k").unwrap_err();
            assert_eq!(err.stderr(), Some("Error from server (Forbidden)"));
        }

        #[test]
        fn replace_streams_body_on_stdin() {
            let temp = tempfile::tempdir().unwrap();
            let body_file = temp.path().join("body.json");
            let bin = fake_kubectl(temp.path(), &format!("cat > {}", body_file.display()));
            let gateway = KubectlGateway::new(bin);
            let body = serde_json::json!({"spec": {"ephemeralContainers": []}});
            gateway
                .replace_ephemeral_containers("shop", "web-0", &body)
                .unwrap();
            let written: Value =
                serde_json::from_str(&fs::read_to_string(&body_file).unwrap()).unwrap();
            assert_eq!(written, body);
        }

        #[test]
        fn list_namespaces_sorted() {
            let temp = tempfile::tempdir().unwrap();
            let bin = fake_kubectl(
                temp.path(),
                r#"echo '{"items":[{"metadata":{"name":"zeta"}},{"metadata":{"name":"alpha"}}]}'"#,
            );
            let gateway = KubectlGateway::new(bin);
            assert_eq!(gateway.list_namespaces().unwrap(), vec!["alpha", "zeta"]);
        }
    }
}
