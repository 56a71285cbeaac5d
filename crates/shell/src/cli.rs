use clap::{ArgGroup, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(name = "kcmd")]
#[command(
    version,
    about = "Shell-like session inside a Kubernetes container over stateless kubectl exec",
    long_about = None
)]
#[command(group(ArgGroup::new("workload").args(["pod", "deployment", "statefulset"])))]
pub struct Cli {
    /// Namespace of the target
    #[arg(short = 'n', long = "namespace", value_name = "NS")]
    pub namespace: Option<String>,

    /// Target pod by name
    #[arg(long = "pod", value_name = "POD")]
    pub pod: Option<String>,

    /// Pick a pod of this deployment
    #[arg(long = "deployment", value_name = "NAME")]
    pub deployment: Option<String>,

    /// Pick a pod of this statefulset
    #[arg(long = "statefulset", value_name = "NAME")]
    pub statefulset: Option<String>,

    /// Container inside the pod
    #[arg(short = 'c', long = "container", value_name = "NAME")]
    pub container: Option<String>,

    /// kubeconfig context for every kubectl call
    #[arg(long = "context", env = "KCMD_CONTEXT", value_name = "CONTEXT")]
    pub context: Option<String>,

    /// kubeconfig file
    #[arg(long = "kubeconfig", value_name = "PATH")]
    pub kubeconfig: Option<PathBuf>,

    /// kubectl binary name or path
    #[arg(long = "kubectl", env = "KCMD_KUBECTL", value_name = "PATH")]
    pub kubectl: Option<String>,

    /// Image for the ephemeral debug container
    #[arg(long = "debug-image", env = "KCMD_DEBUG_IMAGE", value_name = "IMAGE")]
    pub debug_image: Option<String>,

    /// Only touch the namespace security label after admission rejects the
    /// debug container
    #[arg(long = "no-elevate-eagerly")]
    pub no_elevate_eagerly: bool,

    /// Do not offer to delete the pod at exit when a debug container was attached
    #[arg(long = "no-pod-delete-prompt")]
    pub no_pod_delete_prompt: bool,

    /// Directory for log files (default: ~/.kcmd/logs)
    #[arg(long = "log-dir", value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Config file (default: ~/.kcmd/config.toml)
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,
}
