// Stage: one mailbox, one processor, one thread
//
// The loop pulls a job, runs the processor and fans the outputs out through
// the router. Cancellation is cooperative: `stop` flips the state and the
// loop notices at its next checkpoint. A failing job never takes the thread
// down; a failing `on_starting` hook ends the run before any job is served.

use crate::pipeline::error::StageError;
use crate::pipeline::mailbox::{Admission, Mailbox};
use crate::pipeline::router::{Recipient, Router};
use crate::pipeline::stats::{StageSnapshot, StageStats};
use crate::pipeline::types::{Outputs, StageOptions, StageState, WaitPolicy, MAIN_CHANNEL};
use anyhow::{anyhow, Result};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// The work a stage does. Implemented by every collaborator.
pub trait Processor<J>: Send {
    /// Acquires resources before the first job. An error aborts the run.
    fn on_starting(&mut self, _ctx: &StageContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Handles one job and returns what to send downstream.
    fn process(&mut self, job: J, ctx: &StageContext<'_>) -> Result<Outputs<J>>;

    /// Called on iterations where no job arrived within the wait policy.
    fn idle(&mut self, _ctx: &StageContext<'_>) -> Result<Outputs<J>> {
        Ok(Outputs::none())
    }

    /// Releases resources after the loop. Errors are logged, not returned.
    fn on_stopped(&mut self, _ctx: &StageContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Adapts a plain closure into a `Processor` without lifecycle hooks.
pub struct FnProcessor<F>(F);

pub fn from_fn<J, F>(f: F) -> FnProcessor<F>
where
    F: FnMut(J) -> Result<Outputs<J>> + Send,
{
    FnProcessor(f)
}

impl<J, F> Processor<J> for FnProcessor<F>
where
    F: FnMut(J) -> Result<Outputs<J>> + Send,
{
    fn process(&mut self, job: J, _ctx: &StageContext<'_>) -> Result<Outputs<J>> {
        (self.0)(job)
    }
}

/// What a processor may see of its stage while running.
pub struct StageContext<'a> {
    name: &'a str,
    state: &'a AtomicU8,
}

impl StageContext<'_> {
    pub fn name(&self) -> &str {
        self.name
    }

    /// Asks the loop to exit after the current iteration.
    pub fn request_stop(&self) {
        request_stop(self.state, self.name);
    }

    pub fn stop_requested(&self) -> bool {
        StageState::from_u8(self.state.load(Ordering::Acquire)) == StageState::StopRequested
    }
}

fn request_stop(state: &AtomicU8, name: &str) -> bool {
    let requested = state
        .compare_exchange(
            StageState::Running.as_u8(),
            StageState::StopRequested.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_ok();
    if requested {
        debug!("Stop requested for stage {}", name);
    }
    requested
}

/// Marks the stage stopped however the loop thread exits.
///
/// Only a live run (Running or StopRequested) is moved to Stopped.
struct StoppedOnExit<'a>(&'a AtomicU8);

impl Drop for StoppedOnExit<'_> {
    fn drop(&mut self) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                match StageState::from_u8(current) {
                    StageState::Running | StageState::StopRequested => {
                        Some(StageState::Stopped.as_u8())
                    }
                    StageState::Idle | StageState::Stopped => None,
                }
            });
    }
}

/// Shortest pause after a poll that found the mailbox empty.
pub const MIN_POLL_SLEEP: Duration = Duration::from_millis(1);

/// Pause between two checks while an old loop thread winds down.
const EXIT_POLL: Duration = Duration::from_millis(1);

pub struct Stage<J> {
    name: String,
    options: StageOptions,
    mailbox: Mailbox<J>,
    router: RwLock<Router<J>>,
    // Locked by the loop thread for the whole run.
    processor: Mutex<Box<dyn Processor<J>>>,
    state: AtomicU8,
    handle: Mutex<Option<JoinHandle<Result<(), StageError>>>>,
    last_failure: RwLock<Option<String>>,
    stats: StageStats,
}

impl<J: Clone + Send + 'static> Stage<J> {
    /// Creates an idle stage with its own mailbox and routing table.
    pub fn new(
        name: impl Into<String>,
        processor: impl Processor<J> + 'static,
        options: StageOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            mailbox: Mailbox::new(options.capacity, options.overflow),
            router: RwLock::new(Router::new()),
            processor: Mutex::new(Box::new(processor)),
            state: AtomicU8::new(StageState::Idle.as_u8()),
            handle: Mutex::new(None),
            last_failure: RwLock::new(None),
            stats: StageStats::default(),
            options,
        })
    }

    /// Shorthand for a stage whose processor is a closure.
    pub fn from_fn<F>(name: impl Into<String>, f: F, options: StageOptions) -> Arc<Self>
    where
        F: FnMut(J) -> Result<Outputs<J>> + Send + 'static,
    {
        Self::new(name, from_fn(f), options)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &StageOptions {
        &self.options
    }

    pub fn state(&self) -> StageState {
        StageState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn mailbox(&self) -> &Mailbox<J> {
        &self.mailbox
    }

    pub fn stats(&self) -> &StageStats {
        &self.stats
    }

    /// Why the latest run failed to start, if it did.
    pub fn last_failure(&self) -> Option<String> {
        self.last_failure
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a loop thread exists and has not finished yet.
    pub fn is_alive(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Routes `channel` output to `recipient`. Returns `self` for chaining.
    pub fn link<R>(&self, recipient: &Arc<R>, channel: &str) -> Result<&Self, StageError>
    where
        R: Recipient<J> + 'static,
    {
        let as_dyn: Arc<dyn Recipient<J>> = recipient.clone();
        self.link_weak(Arc::downgrade(&as_dyn), channel)
    }

    /// Routes the main channel to `recipient`.
    pub fn link_main<R>(&self, recipient: &Arc<R>) -> Result<&Self, StageError>
    where
        R: Recipient<J> + 'static,
    {
        self.link(recipient, MAIN_CHANNEL)
    }

    pub fn link_weak(
        &self,
        recipient: Weak<dyn Recipient<J>>,
        channel: &str,
    ) -> Result<&Self, StageError> {
        let target = recipient
            .upgrade()
            .map(|r| r.recipient_name().to_string())
            .unwrap_or_default();
        self.router
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .link(recipient, channel)?;
        debug!("Linked {} -> {} on channel '{}'", self.name, target, channel);
        Ok(self)
    }

    /// Live recipients of this stage across all channels.
    pub fn linked(&self) -> Vec<Arc<dyn Recipient<J>>> {
        self.router
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .linked()
    }

    pub fn channels(&self) -> Vec<String> {
        self.router
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .channels()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Spawns the loop thread. Starting a running stage does nothing.
    ///
    /// A stage still winding down from `stop` is joined first, then started
    /// again. Every run begins with an empty mailbox.
    pub fn start(self: &Arc<Self>) -> Result<(), StageError> {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);

        if self.state() == StageState::Running {
            debug!("Stage {} is already running", self.name);
            return Ok(());
        }

        if let Some(previous) = handle.take() {
            if let Err(e) = join_thread(&self.name, previous) {
                debug!("Previous run of stage {} ended with: {}", self.name, e);
            }
        }

        // Someone else may be joining the previous run; its loop still owns
        // the state until it exits.
        while self.state() == StageState::StopRequested {
            thread::sleep(EXIT_POLL);
        }

        let stale = self.mailbox.clear();
        if stale > 0 {
            debug!("Cleared {} stale jobs from stage {}", stale, self.name);
        }

        self.state
            .store(StageState::Running.as_u8(), Ordering::Release);

        let stage = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || stage.run());

        match spawned {
            Ok(h) => {
                *handle = Some(h);
                Ok(())
            }
            Err(source) => {
                self.state
                    .store(StageState::Stopped.as_u8(), Ordering::Release);
                Err(StageError::Spawn {
                    stage: self.name.clone(),
                    source,
                })
            }
        }
    }

    /// Starts the stage and waits until its loop ends.
    pub fn start_blocking(self: &Arc<Self>) -> Result<(), StageError> {
        self.start()?;
        self.join()
    }

    /// Requests a cooperative stop and returns at once.
    ///
    /// The loop exits at its next checkpoint: at most one wait interval plus
    /// one processing call later. Use `join` or `shutdown` to wait for it.
    pub fn stop(&self) {
        if !request_stop(&self.state, &self.name) {
            debug!("Stop ignored for stage {} in state {}", self.name, self.state());
        }
    }

    /// Waits for the loop thread of the latest run, if any.
    pub fn join(&self) -> Result<(), StageError> {
        let taken = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match taken {
            Some(h) => join_thread(&self.name, h),
            None => Ok(()),
        }
    }

    /// Stops the stage and waits for its thread to terminate.
    pub fn shutdown(&self) -> Result<(), StageError> {
        self.stop();
        self.join()
    }

    pub fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            name: self.name.clone(),
            state: self.state(),
            queued: self.mailbox.len(),
            capacity: self.mailbox.capacity(),
            dropped_incoming: self.mailbox.dropped(),
            runs: self.stats.runs.load(Ordering::Relaxed),
            processed: self.stats.processed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            dropped_downstream: self.stats.dropped_downstream.load(Ordering::Relaxed),
            ms_per_job: self.stats.ms_per_job(),
            last_failure: self.last_failure(),
        }
    }

    fn run(&self) -> Result<(), StageError> {
        let _stopped = StoppedOnExit(&self.state);
        let mut processor = self
            .processor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let ctx = StageContext {
            name: &self.name,
            state: &self.state,
        };

        self.stats.runs.fetch_add(1, Ordering::Relaxed);
        *self
            .last_failure
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;

        debug!("Stage {} starting", self.name);
        if let Err(e) = guarded(|| processor.on_starting(&ctx)) {
            error!("Stage {} failed to start: {:#}", self.name, e);
            *self
                .last_failure
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(format!("{:#}", e));
            return Err(StageError::Startup {
                stage: self.name.clone(),
                source: e,
            });
        }
        info!("Stage {} running", self.name);

        loop {
            if ctx.stop_requested() {
                break;
            }

            let (outcome, got_job) = match self.mailbox.get(self.options.wait) {
                Some(job) => {
                    let start_inst = Instant::now();
                    let outcome = guarded(|| processor.process(job, &ctx));
                    if outcome.is_ok() {
                        self.stats
                            .record_job(start_inst.elapsed().as_secs_f64() * 1000.0);
                    }
                    (outcome, true)
                }
                None => (guarded(|| processor.idle(&ctx)), false),
            };

            match outcome {
                Ok(outputs) if !outputs.is_empty() => {
                    let report = self
                        .router
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .fan_out(outputs);
                    self.stats.record_fan_out(&report);
                    if report.dropped > 0 {
                        debug!(
                            "Stage {}: {} deliveries lost to full mailboxes",
                            self.name, report.dropped
                        );
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    self.stats.record_failure();
                    error!("Stage {}: error in an iteration of the main loop: {:#}", self.name, e);
                }
            }

            // Give other threads a breather
            match (got_job, self.options.wait) {
                // A blocking wait that timed out already paused.
                (false, WaitPolicy::Block(_)) => {}
                (false, WaitPolicy::Poll) => {
                    thread::sleep(self.options.loop_sleep.max(MIN_POLL_SLEEP));
                }
                (true, _) if !self.options.loop_sleep.is_zero() => {
                    thread::sleep(self.options.loop_sleep);
                }
                (true, _) => {}
            }
        }

        debug!("Stage {} stopping", self.name);
        if let Err(e) = guarded(|| processor.on_stopped(&ctx)) {
            warn!("Stage {}: cleanup after loop failed: {:#}", self.name, e);
        }
        info!("Stage {} stopped", self.name);

        Ok(())
    }
}

impl<J> std::fmt::Debug for Stage<J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("state", &StageState::from_u8(self.state.load(Ordering::Acquire)))
            .field("mailbox", &self.mailbox)
            .finish()
    }
}

impl<J: Clone + Send + 'static> Recipient<J> for Stage<J> {
    fn deliver(&self, job: J) -> Admission {
        let admission = self.mailbox.put(job);
        if admission != Admission::Accepted {
            tracing::trace!("Stage {} mailbox full: {:?}", self.name, admission);
        }
        admission
    }

    fn recipient_name(&self) -> &str {
        &self.name
    }
}

fn join_thread(
    name: &str,
    handle: JoinHandle<Result<(), StageError>>,
) -> Result<(), StageError> {
    debug!("Joining thread of stage {}", name);
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(StageError::Panicked {
            stage: name.to_string(),
        }),
    }
}

/// Runs a processor callback, turning a panic into an error.
fn guarded<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}
