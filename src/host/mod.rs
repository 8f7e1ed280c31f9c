//! Isolated Execution Host
//!
//! A host takes a composed document and runs it somewhere the previewed
//! script cannot touch host state. Output comes back asynchronously as
//! [`Envelope`]s tagged with the render generation that produced them.

use crate::Result;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[cfg(feature = "boa")]
pub mod boa;
#[cfg(feature = "boa")]
mod markers;

/// Something the isolated context reported
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// Raw boundary message text, as posted to `parent.postMessage`
    Message(String),
    /// The document finished evaluating (including queued timers)
    Settled(RunOutcome),
}

/// Summary of one finished run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutcome {
    /// First error that escaped every handler, if any
    pub uncaught: Option<String>,
    /// Wall time spent evaluating
    pub elapsed_ms: u64,
}

/// A host event tagged with the render generation that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub generation: u64,
    pub event: HostEvent,
}

impl Envelope {
    pub fn message(generation: u64, raw: impl Into<String>) -> Self {
        Self { generation, event: HostEvent::Message(raw.into()) }
    }

    pub fn settled(generation: u64, outcome: RunOutcome) -> Self {
        Self { generation, event: HostEvent::Settled(outcome) }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.event, HostEvent::Settled(_))
    }
}

/// Core trait for isolated execution backends
pub trait ExecutionHost: Send {
    /// Replace the current isolated context with a fresh one running
    /// `document`. Never blocks on the previous context.
    fn render(&mut self, document: &str, generation: u64) -> Result<()>;

    /// Collect whatever the isolated context has reported so far, in order.
    fn poll(&mut self) -> Vec<Envelope>;

    /// Block until `generation` settles or `timeout` passes, returning every
    /// envelope collected meanwhile. Callers check for a `Settled` envelope to
    /// tell the two apart.
    fn wait_settled(&mut self, generation: u64, timeout: Duration) -> Vec<Envelope> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        loop {
            let batch = self.poll();
            let done = batch.iter().any(|e| e.generation == generation && e.is_settled());
            out.extend(batch);
            if done || Instant::now() >= deadline {
                return out;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

/// A host that runs nothing and records what it was asked to render
///
/// Tests and UI prototypes feed it envelopes by hand.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub rendered: Vec<(u64, String)>,
    queue: VecDeque<Envelope>,
    /// Settle every render immediately with an empty outcome
    pub auto_settle: bool,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auto_settling() -> Self {
        Self { auto_settle: true, ..Self::default() }
    }

    pub fn push(&mut self, envelope: Envelope) {
        self.queue.push_back(envelope);
    }

    pub fn push_message(&mut self, generation: u64, raw: impl Into<String>) {
        self.push(Envelope::message(generation, raw));
    }

    pub fn render_count(&self) -> usize {
        self.rendered.len()
    }

    pub fn last_document(&self) -> Option<&str> {
        self.rendered.last().map(|(_, d)| d.as_str())
    }
}

impl ExecutionHost for RecordingHost {
    fn render(&mut self, document: &str, generation: u64) -> Result<()> {
        self.rendered.push((generation, document.to_string()));
        if self.auto_settle {
            self.queue.push_back(Envelope::settled(generation, RunOutcome::default()));
        }
        Ok(())
    }

    fn poll(&mut self) -> Vec<Envelope> {
        self.queue.drain(..).collect()
    }
}
