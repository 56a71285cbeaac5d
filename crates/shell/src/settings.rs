//! Settings resolution: CLI flags (and their environment fallbacks) over the
//! config file over built-in defaults.

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cluster_api::ResourceKind;
use cluster_kubectl::DEFAULT_KUBECTL;
use kcmd_common::paths as kcmd_paths;

use crate::cli::Cli;
use crate::orchestrator::{DebugProfile, RetryPolicy};
use crate::picker::TargetArgs;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub kubectl: String,
    pub context: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub debug: DebugProfile,
    pub elevate_eagerly: bool,
    pub offer_pod_delete: bool,
    pub log_level: String,
    pub log_dir: PathBuf,
    pub target: TargetArgs,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    kubectl: KubectlSection,
    debug: DebugSection,
    policy: PolicySection,
    teardown: TeardownSection,
    log: LogSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct KubectlSection {
    binary: Option<String>,
    context: Option<String>,
    kubeconfig: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DebugSection {
    image: Option<String>,
    command: Option<Vec<String>>,
    name_prefix: Option<String>,
    ready_attempts: Option<u32>,
    ready_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PolicySection {
    elevate_eagerly: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TeardownSection {
    offer_pod_delete: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LogSection {
    level: Option<String>,
}

impl Settings {
    /// Resolve from parsed CLI flags and the config file they point at.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => load_config(path, true)?,
            None => load_config(&kcmd_paths::config_file()?, false)?,
        };
        let log_dir = match &cli.log_dir {
            Some(dir) => dir.clone(),
            None => kcmd_paths::log_dir()?,
        };
        Self::merge(cli, file, log_dir)
    }

    fn merge(cli: &Cli, file: FileConfig, log_dir: PathBuf) -> Result<Self> {
        let defaults = DebugProfile::default();
        let ready_attempts = file
            .debug
            .ready_attempts
            .unwrap_or(defaults.readiness.max_attempts);
        if ready_attempts == 0 {
            bail!("debug.ready_attempts must be at least 1");
        }
        let command = file.debug.command.unwrap_or(defaults.command);
        if command.is_empty() {
            bail!("debug.command must not be empty");
        }

        let debug = DebugProfile {
            image: non_blank(cli.debug_image.clone())
                .or(non_blank(file.debug.image))
                .unwrap_or(defaults.image),
            command,
            name_prefix: non_blank(file.debug.name_prefix).unwrap_or(defaults.name_prefix),
            readiness: RetryPolicy {
                max_attempts: ready_attempts,
                interval: file
                    .debug
                    .ready_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.readiness.interval),
            },
        };

        Ok(Self {
            kubectl: non_blank(cli.kubectl.clone())
                .or(non_blank(file.kubectl.binary))
                .unwrap_or_else(|| DEFAULT_KUBECTL.to_string()),
            context: non_blank(cli.context.clone()).or(non_blank(file.kubectl.context)),
            kubeconfig: cli.kubeconfig.clone().or(file.kubectl.kubeconfig),
            debug,
            elevate_eagerly: !cli.no_elevate_eagerly && file.policy.elevate_eagerly.unwrap_or(true),
            offer_pod_delete: !cli.no_pod_delete_prompt
                && file.teardown.offer_pod_delete.unwrap_or(true),
            log_level: non_blank(file.log.level).unwrap_or_else(|| "info".to_string()),
            log_dir,
            target: target_args(cli),
        })
    }
}

fn target_args(cli: &Cli) -> TargetArgs {
    let (kind, resource) = if let Some(pod) = &cli.pod {
        (Some(ResourceKind::Pod), Some(pod.clone()))
    } else if let Some(name) = &cli.deployment {
        (Some(ResourceKind::Deployment), Some(name.clone()))
    } else if let Some(name) = &cli.statefulset {
        (Some(ResourceKind::StatefulSet), Some(name.clone()))
    } else {
        (None, None)
    };
    TargetArgs {
        namespace: non_blank(cli.namespace.clone()),
        kind,
        resource,
        container: non_blank(cli.container.clone()),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn load_config(path: &Path, required: bool) -> Result<FileConfig> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            toml::from_str(&contents).with_context(|| format!("invalid TOML in {}", path.display()))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound && !required => Ok(FileConfig::default()),
        Err(err) => Err(anyhow!("failed to read {}: {err}", path.display())),
    }
}
