//! Two-phase completion of the last input token: remote filesystem lookup,
//! then the output dictionary.

use std::collections::BTreeSet;

use cluster_api::ClusterGateway;
use tracing::debug;

use crate::compose::{compose, rooted};
use crate::session::{DebugExecutionMode, Session};

/// Split `input` into everything before the last non-blank word and the word
/// itself. Trailing whitespace is not part of either.
pub fn split_token(input: &str) -> (&str, &str) {
    let input = input.trim_end();
    match input.rfind(char::is_whitespace) {
        Some(idx) => {
            let ws_len = input[idx..].chars().next().map_or(1, char::len_utf8);
            input.split_at(idx + ws_len)
        }
        None => ("", input),
    }
}

/// `(dirPath, partialFile)`; `dirPath` keeps its trailing `/` and is `./`
/// when the token has no slash.
pub fn split_path(token: &str) -> (String, &str) {
    match token.rfind('/') {
        Some(idx) => (token[..=idx].to_string(), &token[idx + 1..]),
        None => ("./".to_string(), token),
    }
}

pub fn glob_command(dir_path: &str, partial: &str) -> String {
    format!(
        "for f in {dir_path}{partial}*; do [ -e \"$f\" ] && echo \"$f\" && break; done 2>/dev/null"
    )
}

pub fn dir_test_command(dir_path: &str, name: &str) -> String {
    format!("[ -d \"{dir_path}{name}\" ] && echo \"DIR\" || echo \"FILE\"")
}

/// Directory to look in on the remote side. In filesystem-root mode an
/// absolute path lives under the target root.
fn lookup_dir(session: &Session, dir_path: &str) -> String {
    match session.debug.as_ref().map(|d| &d.mode) {
        Some(DebugExecutionMode::FilesystemRoot { root }) if dir_path.starts_with('/') => {
            rooted(root, dir_path)
        }
        _ => dir_path.to_string(),
    }
}

/// Phase 1: first remote entry matching `token`, as the replacement token.
pub fn complete_remote(gateway: &dyn ClusterGateway, session: &Session, token: &str) -> Option<String> {
    let (dir_path, partial) = split_path(token);
    let lookup = lookup_dir(session, &dir_path);

    let found = gateway
        .exec(&compose(session, &glob_command(&lookup, partial)))
        .map_err(|err| debug!(error = %err, "completion lookup failed"))
        .ok()?;
    let first = found.stdout.lines().next()?.trim();
    if first.is_empty() {
        return None;
    }
    let name = first.rsplit('/').next().filter(|n| !n.is_empty())?;

    let is_dir = gateway
        .exec(&compose(session, &dir_test_command(&lookup, name)))
        .map(|r| r.stdout.trim() == "DIR")
        .unwrap_or(false);
    let name = if is_dir {
        format!("{name}/")
    } else {
        name.to_string()
    };

    if dir_path == "./" {
        Some(name)
    } else {
        Some(format!("{dir_path}{name}"))
    }
}

/// Phase 2: smallest dictionary word strictly extending `token`.
pub fn complete_local(dictionary: &BTreeSet<String>, token: &str) -> Option<String> {
    if token.chars().count() < 2 {
        return None;
    }
    dictionary
        .range(token.to_string()..)
        .take_while(|word| word.starts_with(token))
        .find(|word| word.as_str() != token)
        .cloned()
}

/// `input` with its last token replaced.
pub fn replace_last_token(input: &str, replacement: &str) -> String {
    let (head, _) = split_token(input);
    format!("{head}{replacement}")
}
