//! Session state for one target container.

use cluster_api::{ExecTarget, ResourceKind};

/// Container chosen by the picker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub namespace: String,
    pub kind: ResourceKind,
    /// Workload name; equals `pod` when `kind` is `Pod`.
    pub resource: String,
    pub pod: String,
    pub container: String,
}

impl Target {
    pub fn pod(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        let pod = pod.into();
        Self {
            namespace: namespace.into(),
            kind: ResourceKind::Pod,
            resource: pod.clone(),
            pod,
            container: container.into(),
        }
    }

    pub fn exec_target(&self) -> ExecTarget {
        ExecTarget::new(&self.namespace, &self.pod, &self.container)
    }

    /// `ns=… type=… pod=… container=…`, shown in the banner.
    pub fn describe(&self) -> String {
        format!(
            "ns={} type={} pod={} container={}",
            self.namespace, self.kind, self.pod, self.container
        )
    }
}

/// How commands reach the target once a debug container is in use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DebugExecutionMode {
    /// `nsenter` into the namespaces of the given process id.
    NamespaceEntry { pid: String },
    /// Operate on the target's filesystem through `/proc/<pid>/root`.
    FilesystemRoot { root: String },
}

impl DebugExecutionMode {
    pub fn describe(&self) -> String {
        match self {
            DebugExecutionMode::NamespaceEntry { pid } => format!("nsenter into pid {pid}"),
            DebugExecutionMode::FilesystemRoot { root } => format!("filesystem root {root}"),
        }
    }
}

/// Ephemeral debug container attached to the target pod.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugContainerRecord {
    pub name: String,
    pub mode: DebugExecutionMode,
}

/// Original value of the namespace enforcement label, captured at the first
/// elevation of the session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SecurityPolicyState {
    /// "" when the namespace had no label.
    pub original: String,
    pub changed: bool,
}

impl SecurityPolicyState {
    /// Record a successful elevation. Only the first one captures the original.
    pub fn record_elevation(&mut self, previous: &str) {
        if !self.changed {
            self.original = previous.to_string();
            self.changed = true;
        }
    }
}

/// Bookkeeping for the no-shell fallback, capped per session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FallbackState {
    pub started: bool,
    pub policy_retries: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub target: Target,
    /// "" is the container user's home directory.
    pub current_dir: String,
    pub debug: Option<DebugContainerRecord>,
    pub policy: SecurityPolicyState,
    /// Every ephemeral container attached this session, adopted or not.
    pub attached_containers: Vec<String>,
    pub fallback: FallbackState,
}

impl Session {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            current_dir: String::new(),
            debug: None,
            policy: SecurityPolicyState::default(),
            attached_containers: Vec::new(),
            fallback: FallbackState::default(),
        }
    }

    pub fn using_debug_container(&self) -> bool {
        self.debug.is_some()
    }

    /// Apply a `cd` argument; see [`join_directory`].
    pub fn change_directory(&mut self, arg: &str) {
        self.current_dir = join_directory(&self.current_dir, arg);
    }

    /// `~` for home, otherwise the emulated working directory.
    pub fn display_dir(&self) -> &str {
        if self.current_dir.is_empty() {
            "~"
        } else {
            &self.current_dir
        }
    }

    pub fn note_attached(&mut self, name: &str) {
        if !self.attached_containers.iter().any(|c| c == name) {
            self.attached_containers.push(name.to_string());
        }
    }

    /// Switch to the debug container; the working directory becomes `/`.
    pub fn adopt_debug_container(&mut self, record: DebugContainerRecord) {
        self.note_attached(&record.name);
        self.debug = Some(record);
        self.current_dir = "/".to_string();
    }
}

/// Sequential `cd` semantics over a stateless shell: empty or `~` returns
/// home, an absolute path replaces, anything else is joined with `/`.
pub fn join_directory(current: &str, arg: &str) -> String {
    let arg = arg.trim();
    if arg.is_empty() || arg == "~" {
        return String::new();
    }
    if arg.starts_with('/') {
        return arg.to_string();
    }
    if current.is_empty() {
        return arg.to_string();
    }
    format!("{}/{}", current.trim_end_matches('/'), arg)
}
