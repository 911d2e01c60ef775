// ABOUTME: Classifies child process output against an ordered set of patterns
//
// Every wait has four distinct outcomes: a pattern matched, the child closed
// its output, the deadline passed, or the session was cancelled.

use std::time::Duration;

use regex::Regex;
use tracing::trace;

use super::{Cancellation, ManagedProcess};

/// Ordered regexes; earlier entries win when several match one line
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<Regex>,
}

impl PatternSet {
    /// Earlier patterns win when several match the same line
    pub fn new(patterns: impl IntoIterator<Item = Regex>) -> Self {
        Self {
            patterns: patterns.into_iter().collect(),
        }
    }

    /// Index of the first pattern matching `line`
    pub fn classify(&self, line: &str) -> Option<usize> {
        self.patterns.iter().position(|re| re.is_match(line))
    }
}

/// Result of waiting for a pattern on a child's output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A line matched
    Matched {
        /// Which pattern matched
        index: usize,
        /// The matching line
        line: String,
    },
    /// Output closed before any match
    Ended,
    /// No match within the bound
    TimedOut,
    /// The cancellation flag fired first
    Cancelled,
}

/// Read lines until one matches, the output ends, time runs out or the flag fires
pub async fn wait_for_pattern<P: ManagedProcess>(
    process: &mut P,
    patterns: &PatternSet,
    timeout: Duration,
    cancel: &Cancellation,
) -> WaitOutcome {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => return WaitOutcome::Cancelled,
            () = &mut deadline => return WaitOutcome::TimedOut,
            line = process.next_line() => match line {
                None => return WaitOutcome::Ended,
                Some(line) => {
                    trace!(process = %process.label(), line = %line, "Child output");
                    if let Some(index) = patterns.classify(&line) {
                        return WaitOutcome::Matched { index, line };
                    }
                }
            },
        }
    }
}
