//! Full-command composition: emulates a working directory by prefixing each
//! stateless invocation with a `cd`.

use cluster_api::{ExecRequest, ExecTarget};

use crate::session::{DebugExecutionMode, Session};

/// Build the exec request for `line` in the session's current mode.
pub fn compose(session: &Session, line: &str) -> ExecRequest {
    match &session.debug {
        None => ExecRequest::login_shell(
            session.target.exec_target(),
            with_cd_prefix(&session.current_dir, line),
        ),
        Some(record) => {
            let debug_target = ExecTarget::new(
                &session.target.namespace,
                &session.target.pod,
                &record.name,
            );
            ExecRequest::shell(
                debug_target,
                debug_script(&record.mode, &session.current_dir, line),
            )
        }
    }
}

/// `cd <dir> && <line>`, or `<line>` when no directory is set.
pub fn with_cd_prefix(dir: &str, line: &str) -> String {
    if dir.is_empty() {
        line.to_string()
    } else {
        format!("cd {dir} && {line}")
    }
}

/// Wrapper script run by `sh -c` inside the debug container.
pub fn debug_script(mode: &DebugExecutionMode, dir: &str, line: &str) -> String {
    let home = dir.is_empty() || dir == "~";
    match mode {
        DebugExecutionMode::NamespaceEntry { pid } => {
            let inner = if home {
                line.to_string()
            } else {
                with_cd_prefix(dir, line)
            };
            format!(
                "nsenter -t {pid} -m -u -i -p -- sh -c '{}'",
                escape_single_quotes(&inner)
            )
        }
        DebugExecutionMode::FilesystemRoot { root } => {
            if home {
                format!("cd {root} && {line}")
            } else {
                format!("cd {} && {line}", rooted(root, dir))
            }
        }
    }
}

/// `root` + `path`, inserting a `/` when `path` is relative.
pub fn rooted(root: &str, path: &str) -> String {
    if path.starts_with('/') {
        format!("{root}{path}")
    } else {
        format!("{root}/{path}")
    }
}

/// Make `s` safe inside a single-quoted shell string.
pub fn escape_single_quotes(s: &str) -> String {
    s.replace('\'', "'\"'\"'")
}
