#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cluster_api::testing::StubGateway;
use kcmd_shell::clipboard::{Clipboard, ClipboardError};
use kcmd_shell::orchestrator::{DebugProfile, Orchestrator, RetryPolicy, Sleeper};
use kcmd_shell::{Event, ExitReason, KeyInput, Services, Session, ShellState, Target};

pub const SHELL_MISSING: &str = "error: Internal error occurred: error executing command in container: failed to exec in container: failed to start exec: OCI runtime exec failed: exec failed: unable to start container process: exec: \"sh\": executable file not found in $PATH: unknown";

pub const PODSECURITY_REJECTION: &str = "Error from server (Forbidden): pods \"web-0\" is forbidden: violates PodSecurity \"restricted:latest\": allowPrivilegeEscalation != false, runAsNonRoot != true";

#[derive(Default)]
pub struct CountingSleeper {
    pub sleeps: Mutex<u32>,
}

impl Sleeper for CountingSleeper {
    fn sleep(&self, _: Duration) {
        *self.sleeps.lock().unwrap() += 1;
    }
}

#[derive(Default)]
pub struct MemoryClipboard {
    pub copied: Mutex<Vec<String>>,
}

impl Clipboard for MemoryClipboard {
    fn copy(&self, text: &str) -> Result<(), ClipboardError> {
        self.copied.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

pub struct Harness {
    pub stub: Arc<StubGateway>,
    pub sleeper: Arc<CountingSleeper>,
    pub clipboard: Arc<MemoryClipboard>,
    pub services: Services,
    pub state: ShellState,
}

impl Harness {
    pub fn new(stub: StubGateway, elevate_eagerly: bool) -> Self {
        Self::with_attempts(stub, elevate_eagerly, 5)
    }

    pub fn with_attempts(stub: StubGateway, elevate_eagerly: bool, attempts: u32) -> Self {
        let stub = Arc::new(stub);
        let sleeper = Arc::new(CountingSleeper::default());
        let clipboard = Arc::new(MemoryClipboard::default());
        let profile = DebugProfile {
            readiness: RetryPolicy {
                max_attempts: attempts,
                interval: Duration::from_millis(500),
            },
            ..DebugProfile::default()
        };
        let services = Services {
            gateway: stub.clone(),
            orchestrator: Arc::new(Orchestrator::new(profile, sleeper.clone())),
            clipboard: clipboard.clone(),
            session_id: "test-session".to_string(),
        };
        let state = ShellState::new(
            Session::new(Target::pod("shop", "web-0", "app")),
            elevate_eagerly,
        );
        Self {
            stub,
            sleeper,
            clipboard,
            services,
            state,
        }
    }

    /// Type `line`, press Enter and run everything that follows to idle.
    pub fn submit(&mut self, line: &str) -> Option<ExitReason> {
        for c in line.chars() {
            self.services
                .drive(&mut self.state, Event::Key(KeyInput::Char(c)));
        }
        self.services
            .drive(&mut self.state, Event::Key(KeyInput::Enter))
    }

    pub fn key(&mut self, key: KeyInput) -> Option<ExitReason> {
        self.services.drive(&mut self.state, Event::Key(key))
    }

    pub fn output(&self) -> Vec<String> {
        self.state
            .output
            .lines()
            .iter()
            .map(|l| l.text.clone())
            .collect()
    }

    pub fn sleeps(&self) -> u32 {
        *self.sleeper.sleeps.lock().unwrap()
    }
}
