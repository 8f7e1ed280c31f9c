//! Timers around a [`Playground`]: the edit debounce, the periodic auto-save
//! and the message pump.
//!
//! Each concern is its own tokio task holding the shared playground behind a
//! mutex. The lock is never held across an await point.

use crate::playground::Playground;
use crate::{ExecutionHost, HostUi, KvBackend, Pane};
use log::debug;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

type Shared<H, B, U> = Arc<Mutex<Playground<H, B, U>>>;

fn lock<H: ExecutionHost, B: KvBackend, U: HostUi>(shared: &Shared<H, B, U>) -> MutexGuard<'_, Playground<H, B, U>> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cancel-and-restart timer for the settle after the last edit
struct Debouncer {
    delay: Duration,
    pending: Option<JoinHandle<()>>,
}

impl Debouncer {
    fn new(delay: Duration) -> Self {
        Self { delay, pending: None }
    }

    fn restart<F>(&mut self, on_quiet: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        let delay = self.delay;
        self.pending = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            on_quiet();
        }));
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

/// A playground driven by its own timers
///
/// Must be created inside a tokio runtime. Dropping it stops every task.
pub struct LivePlayground<H, B, U>
where
    H: ExecutionHost + 'static,
    B: KvBackend + 'static,
    U: HostUi + Send + 'static,
{
    shared: Shared<H, B, U>,
    debounce: Debouncer,
    background: Vec<JoinHandle<()>>,
}

impl<H, B, U> LivePlayground<H, B, U>
where
    H: ExecutionHost + 'static,
    B: KvBackend + 'static,
    U: HostUi + Send + 'static,
{
    pub fn start(playground: Playground<H, B, U>) -> Self {
        let cfg = playground.config().clone();
        let shared = Arc::new(Mutex::new(playground));
        let mut background = Vec::new();

        let pump_every = Duration::from_millis(cfg.pump_interval_ms.max(1));
        let pump_shared = shared.clone();
        background.push(tokio::spawn(async move {
            let mut ticker = time::interval(pump_every);
            loop {
                ticker.tick().await;
                lock(&pump_shared).pump();
            }
        }));

        if cfg.autosave_interval_ms > 0 {
            let period = Duration::from_millis(cfg.autosave_interval_ms);
            let save_shared = shared.clone();
            background.push(tokio::spawn(async move {
                let mut ticker = time::interval_at(Instant::now() + period, period);
                loop {
                    ticker.tick().await;
                    if lock(&save_shared).auto_save() {
                        debug!("auto-saved");
                    }
                }
            }));
        }

        Self {
            shared,
            debounce: Debouncer::new(Duration::from_millis(cfg.debounce_ms)),
            background,
        }
    }

    /// Apply an edit and restart the quiet period.
    pub fn edit(&mut self, pane: Pane, text: impl Into<String>) {
        let schedule = lock(&self.shared).edit(pane, text);
        if schedule {
            let shared = self.shared.clone();
            self.debounce.restart(move || lock(&shared).settle());
        }
    }

    /// Run immediately, dropping any pending settle.
    pub fn run_now(&mut self) -> u64 {
        self.debounce.cancel();
        lock(&self.shared).run()
    }

    /// Borrow the playground for one synchronous operation.
    pub fn with<R>(&self, f: impl FnOnce(&mut Playground<H, B, U>) -> R) -> R {
        f(&mut lock(&self.shared))
    }
}

impl<H, B, U> Drop for LivePlayground<H, B, U>
where
    H: ExecutionHost + 'static,
    B: KvBackend + 'static,
    U: HostUi + Send + 'static,
{
    fn drop(&mut self) {
        self.debounce.cancel();
        for handle in self.background.drain(..) {
            handle.abort();
        }
    }
}
