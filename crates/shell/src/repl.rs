//! Raw-mode terminal frontend driving [`ShellState`].

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{Event as CtEvent, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, Clear, ClearType};
use crossterm::{ExecutableCommand, QueueableCommand};
use futures::StreamExt;
use nu_ansi_term::{Color, Style};
use tokio::runtime::Builder as TokioRuntimeBuilder;
use tokio::task::{self, JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::dispatcher::{Effect, Event, ExitReason, KeyInput, ShellState};
use crate::output::{LineKind, OutputLine};
use crate::runner::Services;

const CLEAR_LINE: &str = "\r\x1b[K";
const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const TICK: Duration = Duration::from_millis(100);

pub const HELP_LINE: &str =
    "cd <dir> · clear · /copy <n|a,b|a-b> · /quit · Tab completes · ↑/↓ history · Ctrl+R retarget";

/// Run the session until the user quits or retargets.
pub fn run_session(state: &mut ShellState, services: Services, banner: &[String]) -> Result<ExitReason> {
    let rt = TokioRuntimeBuilder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to initialize session runtime")?;
    rt.block_on(session_loop(state, services, banner))
}

enum Wake {
    Terminal(Option<io::Result<CtEvent>>),
    Task(Result<Option<Event>, JoinError>),
    Tick,
    Signal,
}

/// Runs the terminal loop, then settles whatever task is still in flight,
/// whether the loop ended normally or with an error.
async fn session_loop(
    state: &mut ShellState,
    services: Services,
    banner: &[String],
) -> Result<ExitReason> {
    let mut in_flight = None;
    let outcome = terminal_loop(state, services, banner, &mut in_flight).await;
    finish_session(state, &mut in_flight, outcome).await
}

async fn finish_session(
    state: &mut ShellState,
    in_flight: &mut Option<JoinHandle<Option<Event>>>,
    outcome: Result<ExitReason>,
) -> Result<ExitReason> {
    if let Some(handle) = in_flight.take() {
        if let Err(err) = &outcome {
            warn!(error = %err, "session loop failed; waiting for in-flight work");
        }
        settle(state, handle).await;
    }
    outcome
}

async fn settle(state: &mut ShellState, handle: JoinHandle<Option<Event>>) {
    match handle.await {
        Ok(Some(event)) => state.settle(event),
        Ok(None) => {}
        Err(err) => warn!(error = %err, "in-flight task failed during shutdown"),
    }
}

async fn terminal_loop(
    state: &mut ShellState,
    services: Services,
    banner: &[String],
    in_flight: &mut Option<JoinHandle<Option<Event>>>,
) -> Result<ExitReason> {
    let mut guard = RawTerminalGuard::new().context("failed to prepare terminal")?;
    let mut stdout = io::stdout();
    for line in banner {
        write!(stdout, "{line}\r\n")?;
    }
    let mut renderer = Renderer::default();
    renderer.sync(&mut stdout, state)?;

    let mut termination = Termination::new()?;
    let mut input_stream = EventStream::new().fuse();
    let mut ticker = tokio::time::interval(TICK);

    loop {
        let wake = tokio::select! {
            maybe_event = input_stream.next() => Wake::Terminal(maybe_event),
            done = next_result(in_flight) => Wake::Task(done),
            _ = ticker.tick(), if state.busy() => Wake::Tick,
            _ = termination.recv() => Wake::Signal,
        };

        let event = match wake {
            Wake::Terminal(Some(Ok(CtEvent::Key(key)))) => {
                match translate_key(&key, state.input.is_empty()) {
                    Some(key) => Event::Key(key),
                    None => continue,
                }
            }
            Wake::Terminal(Some(Ok(CtEvent::Resize(_, _)))) => {
                renderer.draw_prompt(&mut stdout, state)?;
                continue;
            }
            Wake::Terminal(Some(Ok(_))) => continue,
            Wake::Terminal(Some(Err(err))) => {
                return Err(err).context("terminal event stream failed");
            }
            Wake::Terminal(None) => Event::Key(KeyInput::Quit),
            Wake::Task(done) => {
                *in_flight = None;
                match done.map_err(|err| anyhow!("background task failed: {err}"))? {
                    Some(event) => event,
                    None => continue,
                }
            }
            Wake::Tick => {
                renderer.spinner = renderer.spinner.wrapping_add(1);
                renderer.draw_prompt(&mut stdout, state)?;
                continue;
            }
            Wake::Signal => {
                info!("termination signal received");
                Event::Key(KeyInput::Quit)
            }
        };

        let effect = state.update(event);
        renderer.sync(&mut stdout, state)?;
        match effect {
            Some(Effect::Exit(reason)) => {
                if let Some(handle) = in_flight.take() {
                    write!(stdout, "{CLEAR_LINE}Waiting for {} to finish...\r\n", pending_label(state))?;
                    stdout.flush()?;
                    settle(state, handle).await;
                    renderer.sync(&mut stdout, state)?;
                }
                write!(stdout, "{CLEAR_LINE}")?;
                stdout.flush()?;
                guard.pause()?;
                debug!(?reason, "session loop finished");
                return Ok(reason);
            }
            Some(effect) => {
                let services = services.clone();
                *in_flight = Some(task::spawn_blocking(move || services.execute(effect)));
            }
            None => {}
        }
    }
}

async fn next_result(task: &mut Option<JoinHandle<Option<Event>>>) -> Result<Option<Event>, JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn pending_label(state: &ShellState) -> &'static str {
    state.pending().map_or("operation", |p| p.label())
}

/// Map a key press to dispatcher input. Ctrl+D only quits on empty input.
pub fn translate_key(key: &KeyEvent, input_empty: bool) -> Option<KeyInput> {
    if !matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') | KeyCode::Char('C') => Some(KeyInput::Quit),
            KeyCode::Char('d') | KeyCode::Char('D') if input_empty => Some(KeyInput::Quit),
            KeyCode::Char('r') | KeyCode::Char('R') => Some(KeyInput::Retarget),
            _ => None,
        };
    }
    match key.code {
        KeyCode::Char(c) => Some(KeyInput::Char(c)),
        KeyCode::Backspace => Some(KeyInput::Backspace),
        KeyCode::Enter => Some(KeyInput::Enter),
        KeyCode::Tab => Some(KeyInput::Tab),
        KeyCode::Up => Some(KeyInput::Up),
        KeyCode::Down => Some(KeyInput::Down),
        KeyCode::Esc => Some(KeyInput::Esc),
        _ => None,
    }
}

/// `  12 │ text`, colored by kind.
pub fn format_line(line: &OutputLine) -> String {
    let style = match line.kind {
        LineKind::Plain => Style::new(),
        LineKind::Command => Style::new().bold(),
        LineKind::Success => Color::Green.normal(),
        LineKind::Error => Color::Red.normal(),
        LineKind::Notice => Color::Yellow.normal(),
    };
    let gutter = Color::DarkGray.paint(format!("{:4} │", line.ordinal));
    format!("{gutter} {}", style.paint(&line.text))
}

pub fn prompt_line(state: &ShellState, spinner: usize) -> String {
    let dir = Color::Blue.bold().paint(state.session.display_dir());
    let mut prompt = format!("{dir} ❯ {}", state.input);
    if let Some(pending) = state.pending() {
        let frame = SPINNER[spinner % SPINNER.len()];
        prompt.push_str(&format!("  {}", Color::DarkGray.paint(format!("{frame} {}", pending.label()))));
    }
    prompt
}

#[derive(Default)]
struct Renderer {
    printed: usize,
    generation: u64,
    spinner: usize,
}

impl Renderer {
    /// Print lines appended since the last call, then the prompt.
    fn sync(&mut self, stdout: &mut io::Stdout, state: &ShellState) -> io::Result<()> {
        if state.output.generation() != self.generation {
            stdout.queue(Clear(ClearType::All))?.queue(MoveTo(0, 0))?;
            self.generation = state.output.generation();
            self.printed = 0;
        }
        let lines = state.output.lines();
        if self.printed < lines.len() {
            write!(stdout, "{CLEAR_LINE}")?;
            for line in &lines[self.printed..] {
                write!(stdout, "{}\r\n", format_line(line))?;
            }
            self.printed = lines.len();
        }
        self.draw_prompt(stdout, state)
    }

    fn draw_prompt(&self, stdout: &mut io::Stdout, state: &ShellState) -> io::Result<()> {
        write!(stdout, "{CLEAR_LINE}{}", prompt_line(state, self.spinner))?;
        stdout.flush()
    }
}

struct RawTerminalGuard {
    active: bool,
}

impl RawTerminalGuard {
    fn new() -> Result<Self> {
        enable_raw_mode().context("enable raw mode")?;
        io::stdout().execute(Hide).context("hide cursor")?;
        Ok(Self { active: true })
    }

    fn pause(&mut self) -> Result<()> {
        if self.active {
            io::stdout().execute(Show).context("show cursor")?;
            disable_raw_mode().context("disable raw mode")?;
            self.active = false;
        }
        Ok(())
    }
}

impl Drop for RawTerminalGuard {
    fn drop(&mut self) {
        let _ = self.pause();
        let _ = io::stdout().flush();
    }
}

/// SIGTERM, SIGHUP and an external SIGINT end the session like `/quit`.
#[cfg(unix)]
struct Termination {
    term: tokio::signal::unix::Signal,
    hup: tokio::signal::unix::Signal,
    int: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Termination {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            term: signal(SignalKind::terminate()).context("install SIGTERM handler")?,
            hup: signal(SignalKind::hangup()).context("install SIGHUP handler")?,
            int: signal(SignalKind::interrupt()).context("install SIGINT handler")?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = self.term.recv() => {}
            _ = self.hup.recv() => {}
            _ = self.int.recv() => {}
        }
    }
}

#[cfg(not(unix))]
struct Termination;

#[cfg(not(unix))]
impl Termination {
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        let _ = tokio::signal::ctrl_c().await;
    }
}
