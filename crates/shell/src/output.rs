//! Append-only numbered output log and the completion dictionary fed by it.

use std::collections::BTreeSet;

use crate::copy::{CopyRange, CopyRangeError};

/// Rendering hint for an output line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineKind {
    Plain,
    /// `» command (elapsed) [OK]` headers.
    Command,
    Success,
    Error,
    Notice,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputLine {
    pub ordinal: usize,
    pub text: String,
    pub kind: LineKind,
}

#[derive(Debug, Default)]
pub struct OutputLog {
    lines: Vec<OutputLine>,
    dictionary: BTreeSet<String>,
    generation: u64,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `text`, one entry per line. Empty text is ignored; interior
    /// blank lines are kept.
    pub fn append(&mut self, text: &str, kind: LineKind) {
        if text.is_empty() {
            return;
        }
        for line in text.lines() {
            self.index_words(line);
            self.lines.push(OutputLine {
                ordinal: self.lines.len() + 1,
                text: line.to_string(),
                kind,
            });
        }
    }

    pub fn lines(&self) -> &[OutputLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Bumped by every `clear`, so renderers know to start over.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Empty the log; ordinals restart at 1.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.generation += 1;
    }

    /// Lines `range` joined by newline, validated against the current length.
    pub fn copy_text(&self, range: CopyRange) -> Result<String, CopyRangeError> {
        let (start, end) = range.validate(self.lines.len())?;
        Ok(self.lines[start - 1..end]
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"))
    }

    pub fn dictionary(&self) -> &BTreeSet<String> {
        &self.dictionary
    }

    pub fn clear_dictionary(&mut self) {
        self.dictionary.clear();
    }

    fn index_words(&mut self, line: &str) {
        for word in line.split_whitespace() {
            if is_dictionary_word(word) {
                self.dictionary.insert(word.to_string());
            }
        }
    }
}

/// Words longer than two characters that are not `/`-prefixed and carry no
/// control characters.
pub fn is_dictionary_word(word: &str) -> bool {
    word.chars().count() > 2 && !word.starts_with('/') && !word.chars().any(char::is_control)
}
