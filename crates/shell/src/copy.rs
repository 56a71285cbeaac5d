//! `/copy` range parsing.

/// 1-based inclusive line range. Fields are signed so that unparsable or
/// negative input can still be reported through validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopyRange {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid range. Available lines: 1-{available}")]
pub struct CopyRangeError {
    pub available: usize,
}

impl CopyRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start: start as i64,
            end: end as i64,
        }
    }

    /// Parse `<n>`, `<a>,<b>` or `<a>-<b>`. Unparsable parts become 0 and are
    /// rejected by [`CopyRange::validate`].
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        let number = |s: &str| s.trim().parse::<i64>().unwrap_or(0);
        if let Some((a, b)) = spec.split_once(',') {
            return Self {
                start: number(a),
                end: number(b),
            };
        }
        // `-3` is a negative single line, not a range.
        if let Some((a, b)) = spec.split_once('-').filter(|(a, _)| !a.trim().is_empty()) {
            return Self {
                start: number(a),
                end: number(b),
            };
        }
        let line = number(spec);
        Self {
            start: line,
            end: line,
        }
    }

    /// Check against `available` lines and return `(start, end)` as indices
    /// usable for slicing (`start - 1..end`).
    pub fn validate(&self, available: usize) -> Result<(usize, usize), CopyRangeError> {
        let err = CopyRangeError { available };
        if self.start < 1 || self.end < self.start || self.end > available as i64 {
            return Err(err);
        }
        Ok((self.start as usize, self.end as usize))
    }

    pub fn line_count(&self) -> usize {
        (self.end - self.start + 1).max(0) as usize
    }
}
