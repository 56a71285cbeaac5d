//! Command history with a browsing cursor.

#[derive(Debug, Default)]
pub struct History {
    entries: Vec<String>,
    /// Index into `entries` while browsing; `None` when idle.
    cursor: Option<usize>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `line`, skipping it when it repeats the newest entry. Resets the
    /// cursor.
    pub fn push(&mut self, line: &str) {
        self.cursor = None;
        if line.is_empty() || self.entries.last().is_some_and(|last| last == line) {
            return;
        }
        self.entries.push(line.to_string());
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Step towards older entries. Starts at the newest, stops at the oldest.
    pub fn up(&mut self) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        let next = match self.cursor {
            None => self.entries.len() - 1,
            Some(0) => 0,
            Some(i) => i - 1,
        };
        self.cursor = Some(next);
        Some(&self.entries[next])
    }

    /// Step towards newer entries. `None` when idle; `Some("")` when leaving
    /// the newest entry, which ends browsing.
    pub fn down(&mut self) -> Option<&str> {
        let current = self.cursor?;
        if current + 1 < self.entries.len() {
            self.cursor = Some(current + 1);
            Some(&self.entries[current + 1])
        } else {
            self.cursor = None;
            Some("")
        }
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = None;
    }
}
