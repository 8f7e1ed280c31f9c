//! Boa-backed isolated execution host.
//!
//! Every render gets a brand-new `boa_engine::Context` on its own worker
//! thread, so no global state survives between runs and a throwing script can
//! never unwind into the host. Workers talk back only through an mpsc channel.

use super::markers::mark_statements;
use super::{Envelope, ExecutionHost, HostEvent, RunOutcome};
use crate::{compose, Error, PlaygroundConfig, Result};
use boa_engine::native_function::{NativeFunction, NativeFunctionPointer};
use boa_engine::{js_string, Context, JsError, JsResult, JsString, JsValue, Script, Source};
use log::{debug, warn};
use scraper::{Html, Selector};
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const PRELUDE: &str = include_str!("prelude.js");

// Upper bound on timer callbacks drained after the scripts finish.
const MAX_TIMER_TASKS: usize = 10_000;

/// Title and body text of the last rendered document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextSnapshot {
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    loop_iterations: u64,
    recursion: usize,
}

// Shim text around the user's code in the composed script block
#[derive(Debug, Clone)]
struct ShimFrame {
    prologue: Arc<str>,
    epilogue: Arc<str>,
}

impl ShimFrame {
    /// The script with statement-line markers in its user section, or the
    /// script unchanged when it is not a shimmed block.
    fn mark<'a>(&self, script: &'a str) -> Cow<'a, str> {
        let Some(user) = script.strip_prefix(&*self.prologue).and_then(|s| s.strip_suffix(&*self.epilogue)) else {
            return Cow::Borrowed(script);
        };
        let first_line = self.prologue.matches('\n').count() as u32 + 1;
        let mut out = String::with_capacity(script.len() * 2);
        out.push_str(&self.prologue);
        out.push_str(&mark_statements(user, first_line));
        out.push_str(&self.epilogue);
        Cow::Owned(out)
    }
}

// Per-worker link back to the host. Posts from a retired generation are dropped here.
#[derive(Clone)]
struct Outbox {
    generation: u64,
    current: Arc<AtomicU64>,
    tx: Sender<Envelope>,
}

impl Outbox {
    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    fn post(&self, event: HostEvent) -> bool {
        if !self.is_current() {
            return false;
        }
        self.tx.send(Envelope { generation: self.generation, event }).is_ok()
    }
}

thread_local! {
    static OUTBOX: RefCell<Option<Outbox>> = const { RefCell::new(None) };
}

fn post_native(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    if let Some(raw) = args.first().and_then(|v| v.as_string()).map(|s| s.to_std_string_escaped()) {
        OUTBOX.with(|o| {
            if let Some(outbox) = o.borrow().as_ref() {
                outbox.post(HostEvent::Message(raw));
            }
        });
    }
    Ok(JsValue::undefined())
}

// The isolated context's own console; stands in for its dev tools.
fn console_native(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let text = |i: usize| {
        args.get(i)
            .and_then(|v| v.as_string())
            .map(|s| s.to_std_string_escaped())
            .unwrap_or_default()
    };
    debug!(target: "livepen::preview", "[{}] {}", text(0), text(1));
    Ok(JsValue::undefined())
}

/// Pull the inline classic scripts out of a composed document, in order.
pub fn extract_scripts(document: &str) -> Result<Vec<String>> {
    let html = Html::parse_document(document);
    let sel = Selector::parse("script").map_err(|e| Error::Render(format!("bad selector: {:?}", e)))?;
    let scripts = html
        .select(&sel)
        .filter(|node| node.value().attr("src").is_none())
        .filter(|node| match node.value().attr("type") {
            None => true,
            Some(t) => {
                let t = t.trim().to_ascii_lowercase();
                t.is_empty() || t == "text/javascript" || t == "application/javascript"
            }
        })
        .map(|node| node.text().collect::<String>())
        .collect();
    Ok(scripts)
}

// Text of `el` without script and style contents
fn visible_text(el: scraper::ElementRef) -> String {
    let mut out = String::new();
    for child in el.children() {
        if let Some(t) = child.value().as_text() {
            out.push_str(t);
        } else if let Some(e) = scraper::ElementRef::wrap(child) {
            if !matches!(e.value().name(), "script" | "style") {
                out.push_str(&visible_text(e));
            }
        }
    }
    out
}

fn text_snapshot(document: &str) -> TextSnapshot {
    let html = Html::parse_document(document);
    let first = |css: &str| Selector::parse(css).ok().and_then(|sel| html.select(&sel).next());
    TextSnapshot {
        title: first("title").map(|n| n.text().collect::<String>()).unwrap_or_default(),
        text: first("body").map(visible_text).unwrap_or_default(),
    }
}

/// Calls `window.onerror` the way a browser would. `Ok(true)` if handled.
fn call_onerror(ctx: &mut Context, err: &JsError, message: &str) -> JsResult<bool> {
    let handler = ctx.global_object().get(js_string!("onerror"), ctx)?;
    let Some(f) = handler.as_callable() else {
        return Ok(false);
    };
    // Errors thrown by script are opaque values; engine-raised ones have no object yet.
    let error_value = err.as_opaque().cloned().unwrap_or_else(JsValue::undefined);
    let line = ctx.global_object().get(js_string!("__livepen_line"), ctx)?.as_number().unwrap_or(0.0);
    let column = if line > 0.0 { 1 } else { 0 };
    let args = [
        JsValue::from(JsString::from(message)),
        JsValue::from(js_string!("<anonymous>")),
        JsValue::from(line),
        JsValue::from(column),
        error_value,
    ];
    let ret = f.call(&JsValue::undefined(), &args, ctx)?;
    Ok(ret.to_boolean())
}

// Route an error that escaped every handler; returns its text.
fn report_uncaught(ctx: &mut Context, err: &JsError, outbox: &Outbox) -> String {
    let message = err.to_string();
    let handled = match call_onerror(ctx, err, &message) {
        Ok(handled) => handled,
        Err(e) => {
            debug!("onerror handler threw: {}", e);
            false
        }
    };
    if !handled {
        let raw = serde_json::json!({ "type": "error", "args": [message.clone(), message.clone()] });
        outbox.post(HostEvent::Message(raw.to_string()));
    }
    message
}

// Marked text of `script` if it still parses, else the original.
fn prepare<'a>(ctx: &mut Context, shim: &ShimFrame, script: &'a str) -> Cow<'a, str> {
    let marked = shim.mark(script);
    if matches!(marked, Cow::Borrowed(_)) {
        return marked;
    }
    match Script::parse(Source::from_bytes(marked.as_bytes()), None, ctx) {
        Ok(_) => marked,
        Err(e) => {
            debug!("running unmarked script: {}", e);
            Cow::Borrowed(script)
        }
    }
}

fn run_document(scripts: Vec<String>, outbox: Outbox, limits: Limits, shim: ShimFrame) {
    let started = Instant::now();
    let mut ctx = Context::default();
    if limits.loop_iterations > 0 {
        ctx.runtime_limits_mut().set_loop_iteration_limit(limits.loop_iterations);
    }
    if limits.recursion < usize::MAX {
        ctx.runtime_limits_mut().set_recursion_limit(limits.recursion);
    }

    OUTBOX.with(|o| *o.borrow_mut() = Some(outbox.clone()));

    let mut uncaught: Option<String> = None;
    let natives: [(&str, NativeFunctionPointer); 2] =
        [("__livepen_post", post_native), ("__livepen_native_console", console_native)];
    for (name, f) in natives {
        if let Err(e) = ctx.register_global_builtin_callable(JsString::from(name), 0usize, NativeFunction::from_fn_ptr(f)) {
            uncaught.get_or_insert(format!("host setup failed: {}", e));
        }
    }
    if uncaught.is_none() {
        if let Err(e) = ctx.eval(Source::from_bytes(PRELUDE)) {
            uncaught = Some(format!("host prelude failed: {}", e));
        }
    }

    if uncaught.is_none() {
        for script in &scripts {
            if !outbox.is_current() {
                break;
            }
            let script = prepare(&mut ctx, &shim, script);
            if let Err(err) = ctx.eval(Source::from_bytes(script.as_bytes())) {
                let message = report_uncaught(&mut ctx, &err, &outbox);
                uncaught.get_or_insert(message);
            }
            ctx.run_jobs();
        }

        let mut ran = 0usize;
        while ran < MAX_TIMER_TASKS && outbox.is_current() {
            match ctx.eval(Source::from_bytes("__livepen_next_timer()")) {
                Ok(v) if v.as_boolean() == Some(true) => {}
                Ok(_) => break,
                Err(err) => {
                    let message = report_uncaught(&mut ctx, &err, &outbox);
                    uncaught.get_or_insert(message);
                }
            }
            ctx.run_jobs();
            ran += 1;
        }
        if ran == MAX_TIMER_TASKS {
            warn!("generation {}: stopped after {} timer callbacks", outbox.generation, ran);
        }
    }

    if let Some(e) = &uncaught {
        debug!(target: "livepen::preview", "uncaught: {}", e);
    }
    let outcome = RunOutcome { uncaught, elapsed_ms: started.elapsed().as_millis() as u64 };
    outbox.post(HostEvent::Settled(outcome));
    OUTBOX.with(|o| *o.borrow_mut() = None);
}

/// Execution host that evaluates each document in a fresh Boa context
pub struct BoaHost {
    limits: Limits,
    shim: ShimFrame,
    tx: Sender<Envelope>,
    rx: Receiver<Envelope>,
    current: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
    pending: VecDeque<Envelope>,
    snapshot: Option<TextSnapshot>,
}

impl BoaHost {
    pub fn new(config: &PlaygroundConfig) -> Self {
        let (tx, rx) = channel();
        let options = config.shim_options();
        Self {
            limits: Limits {
                loop_iterations: config.script_loop_iteration_limit,
                recursion: config.script_recursion_limit,
            },
            shim: ShimFrame {
                prologue: compose::script_prologue(&options).into(),
                epilogue: compose::script_epilogue(&options).into(),
            },
            tx,
            rx,
            current: Arc::new(AtomicU64::new(0)),
            worker: None,
            pending: VecDeque::new(),
            snapshot: None,
        }
    }

    /// Generation of the live isolated context
    pub fn current_generation(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Title and body text of the last rendered document
    pub fn text_snapshot(&self) -> Option<&TextSnapshot> {
        self.snapshot.as_ref()
    }

    fn retire_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                // Stale posts are already rejected; the thread ends at its runtime limit.
                debug!("detaching busy worker for generation replaced by {}", self.current_generation());
            }
        }
    }

    fn collect(&mut self) {
        let current = self.current_generation();
        while let Ok(env) = self.rx.try_recv() {
            if env.generation == current {
                self.pending.push_back(env);
            }
        }
    }
}

impl ExecutionHost for BoaHost {
    fn render(&mut self, document: &str, generation: u64) -> Result<()> {
        self.current.store(generation, Ordering::SeqCst);
        self.retire_worker();
        self.pending.clear();
        while self.rx.try_recv().is_ok() {}

        let scripts = extract_scripts(document)?;
        self.snapshot = Some(text_snapshot(document));
        let outbox = Outbox { generation, current: self.current.clone(), tx: self.tx.clone() };
        let limits = self.limits;
        let shim = self.shim.clone();
        let handle = std::thread::Builder::new()
            .name(format!("livepen-preview-{}", generation))
            .spawn(move || run_document(scripts, outbox, limits, shim))
            .map_err(|e| Error::Render(format!("failed to spawn isolated context: {}", e)))?;
        self.worker = Some(handle);
        debug!("rendered generation {}", generation);
        Ok(())
    }

    fn poll(&mut self) -> Vec<Envelope> {
        self.collect();
        self.pending.drain(..).collect()
    }

    fn wait_settled(&mut self, generation: u64, timeout: Duration) -> Vec<Envelope> {
        let deadline = Instant::now() + timeout;
        let mut out: Vec<Envelope> = self.poll();
        if out.iter().any(|e| e.generation == generation && e.is_settled()) {
            return out;
        }
        loop {
            let now = Instant::now();
            if now >= deadline {
                return out;
            }
            match self.rx.recv_timeout(deadline - now) {
                Ok(env) => {
                    if env.generation != self.current_generation() {
                        continue;
                    }
                    let done = env.generation == generation && env.is_settled();
                    out.push(env);
                    if done {
                        return out;
                    }
                }
                Err(RecvTimeoutError::Timeout) => return out,
                // The host holds a sender itself, so this cannot happen.
                Err(RecvTimeoutError::Disconnected) => return out,
            }
        }
    }
}

impl Drop for BoaHost {
    fn drop(&mut self) {
        // Any in-flight worker sees a generation that no longer exists.
        self.current.store(u64::MAX, Ordering::SeqCst);
    }
}
