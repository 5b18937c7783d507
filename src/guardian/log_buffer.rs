use std::collections::VecDeque;

pub const DEFAULT_MAX_LINES: usize = 1_000;

/// Fixed-capacity line store for one service's captured stdout/stderr.
///
/// Oldest lines are dropped once `max_lines` is reached.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    max_lines: usize,
    lines: VecDeque<String>,
}

impl LogBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines,
            lines: VecDeque::with_capacity(max_lines.min(DEFAULT_MAX_LINES)),
        }
    }

    /// Append a line, evicting the oldest if at capacity.
    pub fn push(&mut self, line: String) {
        if self.max_lines == 0 {
            return;
        }
        while self.lines.len() >= self.max_lines {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// All buffered lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    /// Return the last `n` lines (or all if `n` exceeds stored count).
    pub fn tail(&self, n: usize) -> Vec<String> {
        let start = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut buf = LogBuffer::new(3);
        for line in ["a", "b", "c", "d"] {
            buf.push(line.to_string());
        }
        assert_eq!(buf.lines(), vec!["b", "c", "d"]);
    }

    #[test]
    fn tail_returns_last_n_lines() {
        let mut buf = LogBuffer::new(100);
        for i in 0..10 {
            buf.push(format!("line {i}"));
        }
        assert_eq!(buf.tail(3), vec!["line 7", "line 8", "line 9"]);
        assert_eq!(buf.tail(50).len(), 10);
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut buf = LogBuffer::new(0);
        buf.push("ignored".into());
        assert!(buf.is_empty());
    }

    #[test]
    fn default_capacity() {
        let buf = LogBuffer::default();
        assert_eq!(buf.max_lines, DEFAULT_MAX_LINES);
        assert_eq!(buf.len(), 0);
    }
}
