//! Display pacing: reveals received text in small, evenly spaced chunks.
//!
//! The pacer does not spawn anything. Its timer is an explicit handle that the
//! owner drives by awaiting [`DisplayPacer::tick`], typically from the same
//! `select!` loop that reads the transport, so all state stays on one task.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::errors::ClientError;

/// Pacing parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacerConfig {
    /// Characters revealed per tick.
    pub chunk_size: usize,
    pub tick_interval: Duration,
    /// What `displayed()` holds after construction or `reset()`.
    pub initial_text: String,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 3,
            tick_interval: Duration::from_millis(25),
            initial_text: String::new(),
        }
    }
}

impl PacerConfig {
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn initial_text(mut self, text: impl Into<String>) -> Self {
        self.initial_text = text.into();
        self
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.chunk_size == 0 {
            return Err(ClientError::Validation(
                "pacer chunk_size must be greater than 0".into(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(ClientError::Validation(
                "pacer tick_interval must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Output of one reveal step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reveal {
    /// Characters appended to the displayed text by this step.
    pub chunk: String,
    /// True when this step emptied the queue and fired completion.
    pub completed: bool,
}

/// Fixed-period timer with a single cancellation point.
struct TickTimer {
    interval: Option<Interval>,
}

impl TickTimer {
    fn idle() -> Self {
        Self { interval: None }
    }

    /// Starts the timer unless it is already running. The first tick lands
    /// one full period from now.
    fn start(&mut self, period: Duration) {
        if self.interval.is_some() {
            return;
        }
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    fn cancel(&mut self) {
        self.interval = None;
    }

    fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Waits for the next tick. `None` if the timer is not running.
    async fn tick(&mut self) -> Option<Instant> {
        Some(self.interval.as_mut()?.tick().await)
    }
}

type CompleteHook = Box<dyn FnMut() + Send>;

/// Decouples text arrival from text reveal.
pub struct DisplayPacer {
    config: PacerConfig,
    pending: VecDeque<char>,
    displayed: String,
    timer: TickTimer,
    completion_due: bool,
    on_complete: Option<CompleteHook>,
}

impl DisplayPacer {
    pub fn new(config: PacerConfig) -> Result<Self, ClientError> {
        config.validate()?;
        Ok(Self {
            displayed: config.initial_text.clone(),
            config,
            pending: VecDeque::new(),
            timer: TickTimer::idle(),
            completion_due: false,
            on_complete: None,
        })
    }

    /// Registers a hook fired once each time the queue is fully revealed,
    /// whether by draining or by [`skip`](Self::skip).
    pub fn set_on_complete(&mut self, hook: impl FnMut() + Send + 'static) {
        self.on_complete = Some(Box::new(hook));
    }

    /// Queues `text` behind anything still pending and starts the timer if it
    /// is idle. A running timer is left untouched.
    pub fn add_tokens(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.pending.extend(text.chars());
        self.completion_due = true;
        self.timer.start(self.config.tick_interval);
    }

    /// Waits for the next tick and reveals up to `chunk_size` characters.
    ///
    /// Returns `None` immediately when nothing is being revealed.
    pub async fn tick(&mut self) -> Option<Reveal> {
        self.timer.tick().await?;
        Some(self.reveal(self.config.chunk_size))
    }

    /// Reveals everything pending at once, stops the timer and fires
    /// completion. A no-op returning `None` if nothing is owed.
    pub fn skip(&mut self) -> Option<Reveal> {
        self.timer.cancel();
        if !self.completion_due {
            return None;
        }
        Some(self.reveal(self.pending.len()))
    }

    /// Stops the timer and restores the initial state. Completion is not
    /// fired.
    pub fn reset(&mut self) {
        self.timer.cancel();
        self.pending.clear();
        self.displayed = self.config.initial_text.clone();
        self.completion_due = false;
    }

    pub fn displayed(&self) -> &str {
        &self.displayed
    }

    pub fn is_typing(&self) -> bool {
        self.timer.is_running()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn reveal(&mut self, max: usize) -> Reveal {
        let take = max.min(self.pending.len());
        let chunk: String = self.pending.drain(..take).collect();
        self.displayed.push_str(&chunk);
        let completed = self.pending.is_empty();
        if completed {
            self.timer.cancel();
            self.completion_due = false;
            if let Some(hook) = self.on_complete.as_mut() {
                hook();
            }
        }
        Reveal { chunk, completed }
    }
}
