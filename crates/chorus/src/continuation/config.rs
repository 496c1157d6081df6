use std::time::Duration;

use regex::{RegexSet, RegexSetBuilder};
use thiserror::Error;

/// Default cap on autonomous re-invocations per user turn.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;
/// Default wall-clock budget for one user turn.
pub const DEFAULT_TIMEOUT_SECONDS: f64 = 300.0;

#[derive(Debug, Error)]
pub enum ContinuationConfigError {
    #[error("max_iterations must be at least 1")]
    ZeroIterations,

    #[error("timeout_seconds must be a positive number, got {0}")]
    InvalidTimeout(f64),

    #[error("invalid {kind} pattern: {source}")]
    Pattern {
        kind: &'static str,
        #[source]
        source: regex::Error,
    },
}

/// Immutable continuation limits for one agent runtime.
#[derive(Debug, Clone)]
pub struct ContinuationConfig {
    max_iterations: u32,
    timeout: Duration,
    require_explicit_signal: bool,
    continuation_patterns: RegexSet,
    termination_patterns: RegexSet,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_SECONDS),
            require_explicit_signal: true,
            continuation_patterns: RegexSet::empty(),
            termination_patterns: RegexSet::empty(),
        }
    }
}

impl ContinuationConfig {
    /// Create a config with no heuristic patterns.
    pub fn new(
        max_iterations: u32,
        timeout_seconds: f64,
        require_explicit_signal: bool,
    ) -> Result<Self, ContinuationConfigError> {
        if max_iterations == 0 {
            return Err(ContinuationConfigError::ZeroIterations);
        }
        if timeout_seconds <= 0.0 {
            return Err(ContinuationConfigError::InvalidTimeout(timeout_seconds));
        }
        let timeout = Duration::try_from_secs_f64(timeout_seconds)
            .map_err(|_| ContinuationConfigError::InvalidTimeout(timeout_seconds))?;

        Ok(Self {
            max_iterations,
            timeout,
            require_explicit_signal,
            continuation_patterns: RegexSet::empty(),
            termination_patterns: RegexSet::empty(),
        })
    }

    /// Attach heuristic pattern lists, compiled case-insensitively.
    pub fn with_patterns<C, T>(
        mut self,
        continuation: C,
        termination: T,
    ) -> Result<Self, ContinuationConfigError>
    where
        C: IntoIterator,
        C::Item: AsRef<str>,
        T: IntoIterator,
        T::Item: AsRef<str>,
    {
        self.continuation_patterns = compile(continuation, "continuation")?;
        self.termination_patterns = compile(termination, "termination")?;
        Ok(self)
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn require_explicit_signal(&self) -> bool {
        self.require_explicit_signal
    }

    pub(crate) fn matches_continuation(&self, text: &str) -> bool {
        self.continuation_patterns.is_match(text)
    }

    pub(crate) fn matches_termination(&self, text: &str) -> bool {
        self.termination_patterns.is_match(text)
    }
}

fn compile<I>(patterns: I, kind: &'static str) -> Result<RegexSet, ContinuationConfigError>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    RegexSetBuilder::new(patterns)
        .case_insensitive(true)
        .build()
        .map_err(|source| ContinuationConfigError::Pattern { kind, source })
}
