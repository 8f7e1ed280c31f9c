//! Livepen playground core
//!
//! The engine behind a three-pane (HTML/CSS/JS) live playground: it composes
//! the user's sources into one runnable document, executes that document in an
//! isolated context, and relays the isolated context's console output back to
//! the host with source-line correlation for errors.
//!
//! # Features
//!
//! - **Document Composer**: pure string transform with an injected console shim
//! - **Isolated Execution**: a fresh Boa context per render (`boa` feature)
//! - **Snapshots & Sharing**: flat key-value snapshots and URL-safe share tokens
//!
//! # Example
//!
//! ```
//! use livepen::{compose, PlaygroundConfig, SourceBundle};
//!
//! let bundle = SourceBundle::new("<h1>Hi</h1>", "h1 { color: red; }", "console.log('hi');");
//! let doc = compose::compose(&bundle, &PlaygroundConfig::default().shim_options());
//! assert!(doc.contains("<h1>Hi</h1>"));
//! ```

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, Result};

pub mod compose;
pub mod host;
pub mod locate;
pub mod playground;
pub mod relay;
pub mod schedule;
pub mod session;
pub mod share;
pub mod store;

pub use compose::ShimOptions;
pub use host::{Envelope, ExecutionHost, HostEvent, RunOutcome};
pub use locate::ErrorLocator;
pub use playground::Playground;
pub use schedule::LivePlayground;
pub use session::{Action, Effect, EditorSession};
pub use share::ShareToken;
pub use store::{FileBackend, KvBackend, MemoryBackend, SnapshotStore};

#[cfg(feature = "boa")]
pub use host::boa::BoaHost;

/// The three editor sources
///
/// All fields are always present; an untouched pane is an empty string. The
/// serialized form uses the short `html`/`css`/`js` keys shared by snapshots
/// and share tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceBundle {
    #[serde(rename = "html", default)]
    pub markup: String,
    #[serde(rename = "css", default)]
    pub styles: String,
    #[serde(rename = "js", default)]
    pub script: String,
}

impl SourceBundle {
    pub fn new(markup: impl Into<String>, styles: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            markup: markup.into(),
            styles: styles.into(),
            script: script.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.markup.is_empty() && self.styles.is_empty() && self.script.is_empty()
    }

    /// Borrow the text of one pane
    pub fn pane(&self, pane: Pane) -> &str {
        match pane {
            Pane::Markup => &self.markup,
            Pane::Styles => &self.styles,
            Pane::Script => &self.script,
        }
    }

    pub fn pane_mut(&mut self, pane: Pane) -> &mut String {
        match pane {
            Pane::Markup => &mut self.markup,
            Pane::Styles => &mut self.styles,
            Pane::Script => &mut self.script,
        }
    }
}

/// One of the three editor panes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pane {
    Markup,
    Styles,
    Script,
}

/// Kind of a console event captured from the isolated context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleKind {
    Log,
    Warn,
    Error,
}

impl ConsoleKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "log" => Some(ConsoleKind::Log),
            "warn" => Some(ConsoleKind::Warn),
            "error" => Some(ConsoleKind::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleKind::Log => "log",
            ConsoleKind::Warn => "warn",
            ConsoleKind::Error => "error",
        }
    }
}

/// Console message relayed from the isolated context
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleEvent {
    /// Which console entry point produced the event
    pub kind: ConsoleKind,
    /// Arguments, already stringified inside the isolated context
    pub payload: Vec<String>,
    /// Time the host received the event
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ConsoleEvent {
    /// Text as the console pane shows it: `> ` followed by space-joined args
    pub fn display_text(&self) -> String {
        format!("> {}", self.payload.join(" "))
    }

    /// Stack text carried by error events (payload[1]), if non-empty
    pub fn stack(&self) -> Option<&str> {
        if self.kind != ConsoleKind::Error {
            return None;
        }
        self.payload.get(1).map(String::as_str).filter(|s| !s.trim().is_empty())
    }
}

/// Zero-based position in the JavaScript pane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorLocation {
    pub line: u32,
    pub column: u32,
}

/// What the failure boundary does after reporting a synchronous exception
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Re-throw so the isolated context's own tooling still sees the error
    #[default]
    Rethrow,
    /// Report and stop
    Swallow,
}

/// User-visible status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub text: String,
    pub is_error: bool,
}

impl Status {
    pub fn ok(text: impl Into<String>) -> Self {
        Self { text: text.into(), is_error: false }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { text: text.into(), is_error: true }
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::ok("Ready")
    }
}

/// Configuration for the playground core
///
/// Defaults follow the behaviour of the hosted playground: errors are
/// re-thrown after reporting, console calls still reach the isolated context's
/// native console, edits settle after one second and an auto-save runs every
/// thirty seconds.
///
/// # Examples
///
/// ```
/// let cfg = livepen::PlaygroundConfig::default();
/// assert_eq!(cfg.debounce_ms, 1000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaygroundConfig {
    /// Re-throw or swallow script errors after reporting them
    pub error_policy: ErrorPolicy,
    /// Whether intercepted console calls also reach the original console
    pub forward_to_native: bool,
    /// Quiet period after the last edit before auto-save + run
    pub debounce_ms: u64,
    /// Fixed auto-save interval (0 => disabled)
    pub autosave_interval_ms: u64,
    /// How often the live session drains boundary messages
    pub pump_interval_ms: u64,
    /// Upper bound for blocking waits on an isolated run
    pub script_timeout_ms: u64,
    /// Maximum loop iterations before Boa throws an error (0 => disabled)
    pub script_loop_iteration_limit: u64,
    /// Maximum recursion depth before Boa throws (usize::MAX => disabled)
    pub script_recursion_limit: usize,
    /// Persistence key prefix
    pub storage_key: String,
}

impl Default for PlaygroundConfig {
    fn default() -> Self {
        Self {
            error_policy: ErrorPolicy::Rethrow,
            forward_to_native: true,
            debounce_ms: 1000,
            autosave_interval_ms: 30000,
            pump_interval_ms: 20,
            script_timeout_ms: 5000,
            script_loop_iteration_limit: 1000000,
            script_recursion_limit: 1024,
            storage_key: "codePortfolio".to_string(),
        }
    }
}

impl PlaygroundConfig {
    /// Load a JSON config file; absent fields keep their defaults
    pub fn from_json_file(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?;
        let cfg: PlaygroundConfig = serde_json::from_str(&text)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage_key.trim().is_empty() {
            return Err(Error::ConfigError("storage_key must not be empty".into()));
        }
        if self.pump_interval_ms == 0 {
            return Err(Error::ConfigError("pump_interval_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn shim_options(&self) -> ShimOptions {
        ShimOptions {
            error_policy: self.error_policy,
            forward_to_native: self.forward_to_native,
        }
    }
}

/// The UI collaborator the core drives
///
/// Tabs, panes and buttons live outside this crate; they receive console
/// output, highlight requests and status changes through this trait.
pub trait HostUi {
    /// Append one console event to the console pane
    fn append_console(&mut self, event: &ConsoleEvent);

    /// Remove all console output
    fn clear_console(&mut self);

    /// Highlight a JS-pane line and move the cursor there
    fn highlight_line(&mut self, location: ErrorLocation);

    /// Remove the active highlight, if any
    fn clear_highlight(&mut self);

    /// Show a status message
    fn set_status(&mut self, status: &Status);
}

/// A `HostUi` that only records what it was asked to show
///
/// Used by tests and by headless callers that inspect state afterwards.
#[derive(Debug, Default, Clone)]
pub struct RecordingUi {
    pub console: Vec<ConsoleEvent>,
    pub highlight: Option<ErrorLocation>,
    pub cursor: Option<ErrorLocation>,
    pub status: Status,
    /// Number of highlight requests seen, including replaced ones
    pub highlight_requests: usize,
}

impl HostUi for RecordingUi {
    fn append_console(&mut self, event: &ConsoleEvent) {
        self.console.push(event.clone());
    }

    fn clear_console(&mut self) {
        self.console.clear();
    }

    fn highlight_line(&mut self, location: ErrorLocation) {
        self.highlight = Some(location);
        self.cursor = Some(location);
        self.highlight_requests += 1;
    }

    fn clear_highlight(&mut self) {
        self.highlight = None;
    }

    fn set_status(&mut self, status: &Status) {
        self.status = status.clone();
    }
}
