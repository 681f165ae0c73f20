use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Channel every router carries, linked or not.
pub const MAIN_CHANNEL: &str = "main";

/// Default pause between two loop iterations, so other stage threads get a turn.
pub const DEFAULT_LOOP_SLEEP: Duration = Duration::from_millis(20);

/// Default bound for a blocking dequeue.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(1);

/// How a stage pulls the next job out of its mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Wait up to the given duration for a job.
    Block(Duration),
    /// Return immediately when nothing is queued. An empty poll is
    /// followed by at least `stage::MIN_POLL_SLEEP`, even with a zero
    /// `loop_sleep`.
    Poll,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        WaitPolicy::Block(DEFAULT_WAIT)
    }
}

/// What a full mailbox does with a new job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued job to admit the new one.
    #[default]
    DropOldest,
    /// Reject the new job and keep the queue as is.
    DropIncoming,
}

/// Lifecycle of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Idle,
    Running,
    StopRequested,
    Stopped,
}

impl StageState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            StageState::Idle => 0,
            StageState::Running => 1,
            StageState::StopRequested => 2,
            StageState::Stopped => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => StageState::Idle,
            1 => StageState::Running,
            2 => StageState::StopRequested,
            _ => StageState::Stopped,
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageState::Idle => "idle",
            StageState::Running => "running",
            StageState::StopRequested => "stop_requested",
            StageState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Per-stage tuning, fixed at construction.
#[derive(Debug, Clone)]
pub struct StageOptions {
    /// Mailbox capacity, 0 for unbounded.
    pub capacity: usize,
    pub overflow: OverflowPolicy,
    pub wait: WaitPolicy,
    /// Pause after each iteration. Zero disables it.
    pub loop_sleep: Duration,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            capacity: 0,
            overflow: OverflowPolicy::default(),
            wait: WaitPolicy::default(),
            loop_sleep: DEFAULT_LOOP_SLEEP,
        }
    }
}

impl StageOptions {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn with_wait(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_loop_sleep(mut self, loop_sleep: Duration) -> Self {
        self.loop_sleep = loop_sleep;
        self
    }
}

/// Result of one processing step: payloads keyed by output channel.
///
/// Entries keep the order they were emitted in, which is also the fan-out
/// order. Emitting twice on the same channel replaces the earlier payload.
/// A `None` payload is kept in the map but never delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct Outputs<J> {
    entries: Vec<(String, Option<J>)>,
}

impl<J> Default for Outputs<J> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<J> Outputs<J> {
    /// No output at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// A single payload on the main channel.
    pub fn main(job: J) -> Self {
        Self::none().emit(MAIN_CHANNEL, job)
    }

    pub fn emit(self, channel: impl Into<String>, job: J) -> Self {
        self.emit_opt(channel, Some(job))
    }

    pub fn emit_opt(mut self, channel: impl Into<String>, job: Option<J>) -> Self {
        let channel = channel.into();
        match self.entries.iter_mut().find(|(c, _)| *c == channel) {
            Some(entry) => entry.1 = job,
            None => self.entries.push((channel, job)),
        }
        self
    }

    pub fn get(&self, channel: &str) -> Option<&J> {
        self.entries
            .iter()
            .find(|(c, _)| c == channel)
            .and_then(|(_, job)| job.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<J> IntoIterator for Outputs<J> {
    type Item = (String, Option<J>);
    type IntoIter = std::vec::IntoIter<(String, Option<J>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
