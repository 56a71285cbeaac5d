//! Session state machine.
//!
//! Every input (keys and results of remote work) is an [`Event`]; every
//! transition mutates [`ShellState`] and asks for at most one [`Effect`]. The
//! runner executes effects and feeds their results back as events.

use std::time::Duration;

use cluster_api::{ExecRequest, ExecResult};
use tracing::{debug, info, warn};

use crate::autocomplete::{complete_local, replace_last_token, split_token};
use crate::classify::is_shell_missing;
use crate::clipboard::ClipboardError;
use crate::compose::compose;
use crate::copy::CopyRange;
use crate::history::History;
use crate::orchestrator::ProvisionError;
use crate::output::{LineKind, OutputLog};
use crate::policy::{Elevation, PolicyError, PRIVILEGED};
use crate::session::{DebugContainerRecord, Session, Target};

/// First command run through a freshly adopted debug container.
pub const VERIFY_COMMAND: &str = "ls 2>&1 | head -5";

/// Policy elevation attempts allowed after a restrictive admission failure.
pub const MAX_POLICY_RETRIES: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyInput {
    Char(char),
    Backspace,
    Enter,
    Tab,
    Up,
    Down,
    Esc,
    Quit,
    Retarget,
}

#[derive(Debug)]
pub enum Event {
    Key(KeyInput),
    CommandResult {
        command: String,
        /// `Err` carries the text of a gateway launch failure.
        outcome: Result<ExecResult, String>,
        elapsed: Duration,
    },
    CompletionResult {
        /// Input the completion was requested for.
        input: String,
        remote: Option<String>,
    },
    PolicyResult(Result<Elevation, PolicyError>),
    ContainerResult(Result<DebugContainerRecord, ProvisionError>),
    ClipboardResult {
        lines: usize,
        result: Result<(), ClipboardError>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    Quit,
    Retarget,
}

#[derive(Debug, PartialEq)]
pub enum Effect {
    RunCommand {
        command: String,
        request: ExecRequest,
    },
    Complete {
        input: String,
        token: String,
        session: Box<Session>,
    },
    ElevatePolicy {
        namespace: String,
    },
    ProvisionDebugContainer {
        target: Target,
    },
    CopyToClipboard {
        text: String,
        lines: usize,
    },
    Exit(ExitReason),
}

/// Work in flight; drives the busy indicator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pending {
    Command,
    Completion,
    /// `retry` when elevating after a restrictive admission failure.
    Policy { retry: bool },
    Container,
    Clipboard,
}

impl Pending {
    pub fn label(&self) -> &'static str {
        match self {
            Pending::Command => "running",
            Pending::Completion => "completing",
            Pending::Policy { .. } => "updating namespace policy",
            Pending::Container => "creating debug container",
            Pending::Clipboard => "copying",
        }
    }
}

#[derive(Debug)]
pub struct ShellState {
    pub session: Session,
    pub output: OutputLog,
    pub history: History,
    pub input: String,
    pending: Option<Pending>,
    elevate_eagerly: bool,
    exit: Option<ExitReason>,
}

impl ShellState {
    pub fn new(session: Session, elevate_eagerly: bool) -> Self {
        Self {
            session,
            output: OutputLog::new(),
            history: History::new(),
            input: String::new(),
            pending: None,
            elevate_eagerly,
            exit: None,
        }
    }

    pub fn pending(&self) -> Option<Pending> {
        self.pending
    }

    pub fn busy(&self) -> bool {
        self.pending.is_some()
    }

    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.exit
    }

    /// Apply one event. Once an exit was requested, results are still
    /// recorded but no further work is started.
    pub fn update(&mut self, event: Event) -> Option<Effect> {
        let effect = match event {
            Event::Key(key) => self.on_key(key),
            Event::CommandResult {
                command,
                outcome,
                elapsed,
            } => self.on_command_result(command, outcome, elapsed),
            Event::CompletionResult { input, remote } => self.on_completion(input, remote),
            Event::PolicyResult(result) => self.on_policy(result),
            Event::ContainerResult(result) => self.on_container(result),
            Event::ClipboardResult { lines, result } => self.on_clipboard(lines, result),
        };
        match (self.exit, effect) {
            (Some(_), Some(Effect::Exit(reason))) => Some(Effect::Exit(reason)),
            (Some(_), Some(dropped)) => {
                debug!(?dropped, "session ending; effect dropped");
                self.pending = None;
                None
            }
            (_, effect) => effect,
        }
    }

    /// Record the result of work that finished after the session loop ended.
    /// Follow-up work is never started, so teardown sees every label change
    /// and attached container.
    pub fn settle(&mut self, event: Event) {
        if let Some(dropped) = self.update(event) {
            debug!(?dropped, "session over; effect dropped");
        }
        self.pending = None;
    }

    fn start(&mut self, pending: Pending, effect: Effect) -> Option<Effect> {
        self.pending = Some(pending);
        Some(effect)
    }

    fn finish(&mut self) {
        self.pending = None;
    }

    fn on_key(&mut self, key: KeyInput) -> Option<Effect> {
        match key {
            KeyInput::Char(c) => {
                self.input.push(c);
                None
            }
            KeyInput::Backspace => {
                self.input.pop();
                None
            }
            KeyInput::Esc => {
                self.input.clear();
                self.history.reset_cursor();
                None
            }
            KeyInput::Up => {
                if let Some(entry) = self.history.up() {
                    self.input = entry.to_string();
                }
                None
            }
            KeyInput::Down => {
                if let Some(entry) = self.history.down() {
                    self.input = entry.to_string();
                }
                None
            }
            KeyInput::Tab => self.request_completion(),
            KeyInput::Enter => self.submit(),
            KeyInput::Quit => self.request_exit(ExitReason::Quit),
            KeyInput::Retarget => self.request_exit(ExitReason::Retarget),
        }
    }

    fn request_exit(&mut self, reason: ExitReason) -> Option<Effect> {
        if self.exit.is_none() {
            self.exit = Some(reason);
        }
        Some(Effect::Exit(reason))
    }

    fn request_completion(&mut self) -> Option<Effect> {
        if self.busy() {
            return None;
        }
        let (_, token) = split_token(&self.input);
        if token.is_empty() {
            return None;
        }
        let effect = Effect::Complete {
            input: self.input.clone(),
            token: token.to_string(),
            session: Box::new(self.session.clone()),
        };
        self.start(Pending::Completion, effect)
    }

    fn submit(&mut self) -> Option<Effect> {
        if self.busy() {
            return None;
        }
        let line = self.input.trim().to_string();
        if line.is_empty() {
            return None;
        }
        self.input.clear();
        self.history.reset_cursor();

        if line == "clear" {
            self.output.clear();
            return None;
        }
        if line == "/quit" {
            return self.request_exit(ExitReason::Quit);
        }
        if line == "/copy" || line.starts_with("/copy ") {
            return self.copy(&line["/copy".len()..]);
        }
        if line == "cd" || line.starts_with("cd ") {
            self.change_directory(&line);
            return None;
        }

        self.history.push(&line);
        let request = compose(&self.session, &line);
        self.start(
            Pending::Command,
            Effect::RunCommand {
                command: line,
                request,
            },
        )
    }

    fn change_directory(&mut self, line: &str) {
        self.history.push(line);
        self.session.change_directory(&line["cd".len()..]);
        self.output.append(&format!("» {line}"), LineKind::Command);
        let shown = format!("Working directory: {}", self.session.display_dir());
        self.output.append(&shown, LineKind::Success);
        self.output.clear_dictionary();
    }

    fn copy(&mut self, args: &str) -> Option<Effect> {
        let range = CopyRange::parse(args);
        match self.output.copy_text(range) {
            Ok(text) => self.start(
                Pending::Clipboard,
                Effect::CopyToClipboard {
                    text,
                    lines: range.line_count(),
                },
            ),
            Err(err) => {
                self.output.append(&err.to_string(), LineKind::Error);
                None
            }
        }
    }

    fn on_command_result(
        &mut self,
        command: String,
        outcome: Result<ExecResult, String>,
        elapsed: Duration,
    ) -> Option<Effect> {
        self.finish();
        let (ok, stdout, stderr) = match outcome {
            Ok(result) => (result.success(), result.stdout, result.stderr),
            Err(launch) => (false, String::new(), launch),
        };

        if !ok
            && !self.session.using_debug_container()
            && !self.session.fallback.started
            && is_shell_missing(&stderr)
        {
            return self.begin_fallback(&command, &stderr);
        }

        let status = if ok { "OK" } else { "ERR" };
        self.output.append(
            &format!("» {command}  ({})  [{status}]", format_elapsed(elapsed)),
            LineKind::Command,
        );
        if !stdout.trim().is_empty() {
            self.output.append(&stdout, LineKind::Plain);
        }
        if !stderr.trim().is_empty() {
            self.output.append(&stderr, LineKind::Error);
        }
        None
    }

    fn begin_fallback(&mut self, command: &str, stderr: &str) -> Option<Effect> {
        info!(command, stderr, "target container has no shell; starting debug fallback");
        self.session.fallback.started = true;
        self.output.append(
            "Container has no shell. Creating ephemeral debug container...",
            LineKind::Error,
        );
        if self.elevate_eagerly {
            self.output
                .append("Checking namespace pod security policy...", LineKind::Notice);
            let namespace = self.session.target.namespace.clone();
            self.start(
                Pending::Policy { retry: false },
                Effect::ElevatePolicy { namespace },
            )
        } else {
            self.provision()
        }
    }

    fn provision(&mut self) -> Option<Effect> {
        let target = self.session.target.clone();
        self.start(
            Pending::Container,
            Effect::ProvisionDebugContainer { target },
        )
    }

    fn on_policy(&mut self, result: Result<Elevation, PolicyError>) -> Option<Effect> {
        let retry = matches!(self.pending, Some(Pending::Policy { retry: true }));
        self.finish();
        match result {
            Ok(Elevation::AlreadyPrivileged) => {
                self.output.append(
                    &format!("Namespace policy is already '{PRIVILEGED}'"),
                    LineKind::Notice,
                );
            }
            Ok(Elevation::Elevated { previous }) => {
                self.session.policy.record_elevation(&previous);
                let changed = if previous.is_empty() {
                    format!("✓ Changed namespace from no policy (unrestricted) to '{PRIVILEGED}'")
                } else {
                    format!("✓ Changed namespace policy from '{previous}' to '{PRIVILEGED}'")
                };
                self.output.append(&changed, LineKind::Success);
                self.output
                    .append("Policy will be restored to original on quit.", LineKind::Notice);
            }
            Err(err) => {
                warn!(error = %err, "namespace policy elevation failed");
                self.output
                    .append(&format!("Failed to change policy: {err}"), LineKind::Error);
                self.output.append(err.guidance(), LineKind::Notice);
                return None;
            }
        }
        if retry {
            self.output
                .append("Retrying debug container creation...", LineKind::Notice);
        }
        self.provision()
    }

    fn on_container(
        &mut self,
        result: Result<DebugContainerRecord, ProvisionError>,
    ) -> Option<Effect> {
        self.finish();
        let record = match result {
            Ok(record) => record,
            Err(err) => return self.on_provision_failure(err),
        };

        info!(container = %record.name, mode = %record.mode.describe(), "debug container adopted");
        let created = format!("✓ Debug container '{}' created.", record.name);
        let strategy = format!("Execution strategy: {}", record.mode.describe());
        self.session.adopt_debug_container(record);
        self.output.append(&created, LineKind::Success);
        self.output.append(&strategy, LineKind::Notice);
        self.output
            .append("Testing filesystem access...", LineKind::Notice);

        let request = compose(&self.session, VERIFY_COMMAND);
        self.start(
            Pending::Command,
            Effect::RunCommand {
                command: VERIFY_COMMAND.to_string(),
                request,
            },
        )
    }

    fn on_provision_failure(&mut self, err: ProvisionError) -> Option<Effect> {
        if let Some(name) = err.attached_container() {
            self.session.note_attached(name);
        }
        if err.is_restrictive() && self.session.fallback.policy_retries < MAX_POLICY_RETRIES {
            self.session.fallback.policy_retries += 1;
            info!(error = %err, "debug container blocked by admission; elevating policy");
            self.output.append(
                "Debug container creation blocked by restricted PodSecurity policy",
                LineKind::Error,
            );
            self.output.append(
                &format!("Attempting to temporarily change namespace policy to '{PRIVILEGED}'..."),
                LineKind::Notice,
            );
            let namespace = self.session.target.namespace.clone();
            return self.start(
                Pending::Policy { retry: true },
                Effect::ElevatePolicy { namespace },
            );
        }

        warn!(error = %err, "debug container provisioning failed");
        self.output.append(
            &format!("Failed to create debug container: {err}"),
            LineKind::Error,
        );
        if let Some(guidance) = err.guidance() {
            self.output.append(guidance, LineKind::Notice);
        }
        if let Some(name) = err.attached_container() {
            self.output.append(
                &format!(
                    "Ephemeral container '{name}' remains attached to pod '{}'.",
                    self.session.target.pod
                ),
                LineKind::Notice,
            );
        }
        None
    }

    fn on_completion(&mut self, input: String, remote: Option<String>) -> Option<Effect> {
        self.finish();
        if input != self.input {
            debug!("input changed while completing; result discarded");
            return None;
        }
        let (_, token) = split_token(&input);
        let replacement = remote.or_else(|| complete_local(self.output.dictionary(), token));
        if let Some(replacement) = replacement {
            self.input = replace_last_token(&input, &replacement);
        }
        None
    }

    fn on_clipboard(&mut self, lines: usize, result: Result<(), ClipboardError>) -> Option<Effect> {
        self.finish();
        match result {
            Ok(()) => self.output.append(
                &format!("✓ Copied {lines} line(s) to clipboard"),
                LineKind::Success,
            ),
            Err(ClipboardError::Unavailable) => self.output.append(
                "No clipboard utility found (pbcopy/xclip/xsel/clip.exe)",
                LineKind::Error,
            ),
            Err(err) => self
                .output
                .append(&format!("Failed to copy: {err}"), LineKind::Error),
        }
        None
    }
}

/// Elapsed time rounded to milliseconds: `0s`, `532ms`, `1.25s`, `2m3.5s`,
/// `1h2m3s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let ms = (elapsed.as_micros() + 500) / 1000;
    if ms == 0 {
        return "0s".to_string();
    }
    if ms < 1000 {
        return format!("{ms}ms");
    }
    let hours = ms / 3_600_000;
    let minutes = ms % 3_600_000 / 60_000;
    let rest = ms % 60_000;
    let seconds = format!("{}.{:03}", rest / 1000, rest % 1000);
    let seconds = seconds.trim_end_matches('0').trim_end_matches('.');
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DebugExecutionMode;
    use cluster_api::testing::{failed_result, ok_result};
    use cluster_api::GatewayError;

    fn state() -> ShellState {
        ShellState::new(Session::new(Target::pod("shop", "web-0", "app")), true)
    }

    fn type_line(state: &mut ShellState, line: &str) -> Option<Effect> {
        for c in line.chars() {
            state.update(Event::Key(KeyInput::Char(c)));
        }
        state.update(Event::Key(KeyInput::Enter))
    }

    fn texts(state: &ShellState) -> Vec<String> {
        state.output.lines().iter().map(|l| l.text.clone()).collect()
    }

    fn result(command: &str, outcome: ExecResult) -> Event {
        Event::CommandResult {
            command: command.to_string(),
            outcome: Ok(outcome),
            elapsed: Duration::from_millis(12),
        }
    }

    #[test]
    fn enter_runs_composed_command() {
        let mut s = state();
        let effect = type_line(&mut s, "  ls -la ");
        match effect {
            Some(Effect::RunCommand { command, request }) => {
                assert_eq!(command, "ls -la");
                assert_eq!(request.argv, vec!["sh", "-lc", "ls -la"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(s.busy());
        assert_eq!(s.history.entries(), ["ls -la"]);
    }

    #[test]
    fn enter_while_busy_keeps_input() {
        let mut s = state();
        type_line(&mut s, "sleep 5");
        assert_eq!(type_line(&mut s, "pwd"), None);
        assert_eq!(s.input, "pwd");
        assert_eq!(s.history.entries(), ["sleep 5"]);
    }

    #[test]
    fn result_is_rendered() {
        let mut s = state();
        type_line(&mut s, "cat x");
        s.update(result("cat x", ExecResult {
            exit: Some(1),
            stdout: "partial\n".to_string(),
            stderr: "cat: x: No such file\n".to_string(),
            ..ExecResult::default()
        }));
        assert!(!s.busy());
        assert_eq!(
            texts(&s),
            vec!["» cat x  (12ms)  [ERR]", "partial", "cat: x: No such file"]
        );
        assert_eq!(s.output.lines()[2].kind, LineKind::Error);
    }

    #[test]
    fn launch_failure_is_err_entry() {
        let mut s = state();
        type_line(&mut s, "ls");
        s.update(Event::CommandResult {
            command: "ls".to_string(),
            outcome: Err(GatewayError::Invalid("kubectl vanished".to_string()).to_string()),
            elapsed: Duration::ZERO,
        });
        assert_eq!(texts(&s), vec!["» ls  (0s)  [ERR]", "kubectl vanished"]);
    }

    #[test]
    fn cd_updates_directory_and_clears_dictionary() {
        let mut s = state();
        type_line(&mut s, "ls");
        s.update(result("ls", ok_result("config.yaml\nresponses\n")));
        assert!(!s.output.dictionary().is_empty());
        assert_eq!(type_line(&mut s, "cd /srv/app"), None);
        assert_eq!(s.session.current_dir, "/srv/app");
        assert!(s.output.dictionary().is_empty());
        let lines = texts(&s);
        assert_eq!(lines[lines.len() - 2..], ["» cd /srv/app", "Working directory: /srv/app"]);
        type_line(&mut s, "cd");
        assert_eq!(texts(&s).last().map(String::as_str), Some("Working directory: ~"));
    }

    #[test]
    fn clear_and_copy_are_local() {
        let mut s = state();
        type_line(&mut s, "ls");
        s.update(result("ls", ok_result("a\nb\n")));
        match type_line(&mut s, "/copy 2-3") {
            Some(Effect::CopyToClipboard { text, lines }) => {
                assert_eq!(text, "a\nb");
                assert_eq!(lines, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        s.update(Event::ClipboardResult {
            lines: 2,
            result: Ok(()),
        });
        assert_eq!(
            texts(&s).last().map(String::as_str),
            Some("✓ Copied 2 line(s) to clipboard")
        );
        assert_eq!(type_line(&mut s, "/copy 9"), None);
        assert_eq!(
            texts(&s).last().map(String::as_str),
            Some("Invalid range. Available lines: 1-4")
        );
        assert_eq!(type_line(&mut s, "clear"), None);
        assert!(s.output.is_empty());
        assert_eq!(s.history.entries(), ["ls"]);
    }

    #[test]
    fn missing_clipboard_is_inline_error() {
        let mut s = state();
        s.update(Event::ClipboardResult {
            lines: 1,
            result: Err(ClipboardError::Unavailable),
        });
        assert_eq!(s.output.lines()[0].kind, LineKind::Error);
    }

    #[test]
    fn quit_and_retarget() {
        let mut s = state();
        assert_eq!(type_line(&mut s, "/quit"), Some(Effect::Exit(ExitReason::Quit)));
        let mut s = state();
        assert_eq!(
            s.update(Event::Key(KeyInput::Retarget)),
            Some(Effect::Exit(ExitReason::Retarget))
        );
        assert_eq!(s.exit_reason(), Some(ExitReason::Retarget));
    }

    #[test]
    fn shell_missing_starts_eager_fallback_once() {
        let mut s = state();
        type_line(&mut s, "ls");
        let effect = s.update(result(
            "ls",
            failed_result(126, "OCI runtime exec failed: exec: \"sh\": executable file not found in $PATH"),
        ));
        assert_eq!(
            effect,
            Some(Effect::ElevatePolicy {
                namespace: "shop".to_string()
            })
        );
        assert!(s.session.fallback.started);
        assert!(!texts(&s).iter().any(|l| l.starts_with("» ls")));

        let effect = s.update(Event::PolicyResult(Ok(Elevation::Elevated {
            previous: "restricted".to_string(),
        })));
        assert!(matches!(effect, Some(Effect::ProvisionDebugContainer { .. })));
        assert_eq!(s.session.policy.original, "restricted");

        s.update(Event::ContainerResult(Err(ProvisionError::Timeout {
            name: "kcmd-debug-1".to_string(),
            attempts: 30,
        })));
        assert_eq!(s.session.attached_containers, vec!["kcmd-debug-1"]);

        type_line(&mut s, "ls");
        let effect = s.update(result("ls", failed_result(126, "executable file not found")));
        assert_eq!(effect, None);
        assert!(texts(&s).iter().any(|l| l.starts_with("» ls")));
    }

    #[test]
    fn lazy_fallback_provisions_directly() {
        let mut s = ShellState::new(Session::new(Target::pod("shop", "web-0", "app")), false);
        type_line(&mut s, "ls");
        let effect = s.update(result("ls", failed_result(1, "executable file not found")));
        assert!(matches!(effect, Some(Effect::ProvisionDebugContainer { .. })));
    }

    #[test]
    fn restrictive_failure_retries_once() {
        let mut s = ShellState::new(Session::new(Target::pod("shop", "web-0", "app")), false);
        type_line(&mut s, "ls");
        s.update(result("ls", failed_result(1, "executable file not found")));
        let rejected = || {
            Event::ContainerResult(Err(ProvisionError::Attach(GatewayError::command(
                "kubectl replace --raw",
                Some(1),
                "violates PodSecurity \"restricted:latest\"",
            ))))
        };
        let effect = s.update(rejected());
        assert!(matches!(effect, Some(Effect::ElevatePolicy { .. })));
        let effect = s.update(Event::PolicyResult(Ok(Elevation::Elevated {
            previous: String::new(),
        })));
        assert!(matches!(effect, Some(Effect::ProvisionDebugContainer { .. })));
        assert!(texts(&s).contains(&"Retrying debug container creation...".to_string()));
        assert_eq!(s.update(rejected()), None);
        assert!(!s.busy());
        assert_eq!(s.session.fallback.policy_retries, 1);
    }

    #[test]
    fn adopted_container_runs_verification() {
        let mut s = state();
        let effect = s.update(Event::ContainerResult(Ok(DebugContainerRecord {
            name: "kcmd-debug-7".to_string(),
            mode: DebugExecutionMode::FilesystemRoot {
                root: "/proc/1/root".to_string(),
            },
        })));
        match effect {
            Some(Effect::RunCommand { command, request }) => {
                assert_eq!(command, VERIFY_COMMAND);
                assert_eq!(request.target.container, "kcmd-debug-7");
                assert_eq!(request.script(), Some("cd /proc/1/root/ && ls 2>&1 | head -5"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(s.session.current_dir, "/");
    }

    #[test]
    fn policy_error_is_terminal() {
        let mut s = state();
        s.update(Event::PolicyResult(Err(PolicyError::Permission {
            action: "write",
            namespace: "shop".to_string(),
            source: GatewayError::command("kubectl label", Some(1), "forbidden"),
        })));
        let lines = texts(&s);
        assert!(lines[0].starts_with("Failed to change policy"));
        assert_eq!(lines[1], "You may need permissions to modify namespace labels.");
    }

    #[test]
    fn completion_applies_remote_then_local() {
        let mut s = state();
        type_line(&mut s, "ls");
        s.update(result("ls", ok_result("configmap.yaml\n")));
        for c in "cat conf".chars() {
            s.update(Event::Key(KeyInput::Char(c)));
        }
        match s.update(Event::Key(KeyInput::Tab)) {
            Some(Effect::Complete { token, .. }) => assert_eq!(token, "conf"),
            other => panic!("unexpected {other:?}"),
        }
        s.update(Event::CompletionResult {
            input: "cat conf".to_string(),
            remote: None,
        });
        assert_eq!(s.input, "cat configmap.yaml");
    }

    #[test]
    fn settled_policy_result_is_recorded_without_follow_up() {
        let mut s = state();
        type_line(&mut s, "ls");
        let effect = s.update(Event::CommandResult {
            command: "ls".to_string(),
            outcome: Ok(failed_result(126, "exec: \"sh\": executable file not found in $PATH")),
            elapsed: Duration::ZERO,
        });
        assert!(matches!(effect, Some(Effect::ElevatePolicy { .. })));

        s.settle(Event::PolicyResult(Ok(Elevation::Elevated {
            previous: "baseline".to_string(),
        })));
        assert!(s.session.policy.changed);
        assert_eq!(s.session.policy.original, "baseline");
        assert!(!s.busy());
    }

    #[test]
    fn completion_uses_last_word_before_trailing_space() {
        let mut s = state();
        type_line(&mut s, "ls");
        s.update(result("ls", ok_result("configmap.yaml\n")));
        for c in "cat conf ".chars() {
            s.update(Event::Key(KeyInput::Char(c)));
        }
        match s.update(Event::Key(KeyInput::Tab)) {
            Some(Effect::Complete { token, .. }) => assert_eq!(token, "conf"),
            other => panic!("unexpected {other:?}"),
        }
        s.update(Event::CompletionResult {
            input: "cat conf ".to_string(),
            remote: None,
        });
        assert_eq!(s.input, "cat configmap.yaml");
    }

    #[test]
    fn stale_completion_is_discarded() {
        let mut s = state();
        for c in "cat /app/re".chars() {
            s.update(Event::Key(KeyInput::Char(c)));
        }
        s.update(Event::Key(KeyInput::Tab));
        s.update(Event::Key(KeyInput::Char('x')));
        s.update(Event::CompletionResult {
            input: "cat /app/re".to_string(),
            remote: Some("/app/responses/".to_string()),
        });
        assert_eq!(s.input, "cat /app/rex");
        assert!(!s.busy());
    }

    #[test]
    fn history_keys_fill_input() {
        let mut s = state();
        type_line(&mut s, "ls");
        s.update(result("ls", ok_result("")));
        type_line(&mut s, "pwd");
        s.update(result("pwd", ok_result("/\n")));
        s.update(Event::Key(KeyInput::Down));
        assert_eq!(s.input, "");
        s.update(Event::Key(KeyInput::Up));
        s.update(Event::Key(KeyInput::Up));
        s.update(Event::Key(KeyInput::Up));
        assert_eq!(s.input, "ls");
        s.update(Event::Key(KeyInput::Down));
        assert_eq!(s.input, "pwd");
        s.update(Event::Key(KeyInput::Down));
        assert_eq!(s.input, "");
    }

    #[test]
    fn exit_drops_follow_up_work() {
        let mut s = state();
        s.update(Event::Key(KeyInput::Quit));
        let effect = s.update(Event::PolicyResult(Ok(Elevation::Elevated {
            previous: "baseline".to_string(),
        })));
        assert_eq!(effect, None);
        assert!(s.session.policy.changed);
        assert!(!s.busy());
    }

    #[test]
    fn elapsed_formatting() {
        assert_eq!(format_elapsed(Duration::ZERO), "0s");
        assert_eq!(format_elapsed(Duration::from_micros(532_400)), "532ms");
        assert_eq!(format_elapsed(Duration::from_millis(1250)), "1.25s");
        assert_eq!(format_elapsed(Duration::from_secs(2)), "2s");
        assert_eq!(format_elapsed(Duration::from_millis(123_500)), "2m3.5s");
        assert_eq!(format_elapsed(Duration::from_secs(120)), "2m0s");
        assert_eq!(format_elapsed(Duration::from_secs(3723)), "1h2m3s");
        assert_eq!(format_elapsed(Duration::from_secs(7200)), "2h0m0s");
    }
}
