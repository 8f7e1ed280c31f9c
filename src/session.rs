//! Editor session state and its reducer.
//!
//! All mutable editor state lives in one [`EditorSession`] value. [`reduce`]
//! is pure: it takes the session and an [`Action`] and returns the next
//! session plus the [`Effect`]s a dispatcher must carry out (render, persist,
//! update the UI, restart the debounce timer).

use crate::compose::{self, ShimOptions};
use crate::host::{Envelope, HostEvent, RunOutcome};
use crate::locate::ErrorLocator;
use crate::relay;
use crate::{ConsoleEvent, ConsoleKind, ErrorLocation, Pane, PlaygroundConfig, SourceBundle, Status};
use log::debug;

/// The explicit editor state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditorSession {
    pub bundle: SourceBundle,
    /// Console output of the current run, in arrival order
    pub console: Vec<ConsoleEvent>,
    /// The single active error highlight
    pub highlight: Option<ErrorLocation>,
    pub status: Status,
    /// Generation of the isolated context whose messages are accepted
    pub generation: u64,
    /// Edits not yet settled into a run
    pub dirty: bool,
    pub last_outcome: Option<RunOutcome>,
}

/// Inputs to the reducer
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// One pane's text changed
    Edit { pane: Pane, text: String },
    /// Replace all three panes (load, share link, template, clear) and run
    Replace(SourceBundle),
    /// Compose and render now
    Run,
    /// The debounce quiet period elapsed: auto-save, then run
    Settle,
    /// Something arrived from the execution host
    Host(Envelope),
    ClearConsole,
    SetStatus(Status),
}

/// Work the dispatcher carries out on the reducer's behalf
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Cancel any pending settle and start the quiet period again
    ScheduleSettle,
    Render { generation: u64, document: String },
    AutoSave(SourceBundle),
    ClearConsole,
    AppendConsole(ConsoleEvent),
    ClearHighlight,
    Highlight(ErrorLocation),
    Status(Status),
}

/// Fixed reducer inputs derived from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEnv {
    pub shim: ShimOptions,
    pub locator: ErrorLocator,
}

impl SessionEnv {
    pub fn new(shim: ShimOptions) -> Self {
        Self { shim, locator: ErrorLocator::for_shim(&shim) }
    }

    pub fn from_config(config: &PlaygroundConfig) -> Self {
        Self::new(config.shim_options())
    }
}

/// Advance the session by one action.
pub fn reduce(mut session: EditorSession, action: Action, env: &SessionEnv) -> (EditorSession, Vec<Effect>) {
    let mut effects = Vec::new();
    match action {
        Action::Edit { pane, text } => {
            *session.bundle.pane_mut(pane) = text;
            session.dirty = true;
            effects.push(Effect::ScheduleSettle);
        }
        Action::Replace(bundle) => {
            session.bundle = bundle;
            session.dirty = false;
            start_run(&mut session, env, &mut effects);
        }
        Action::Run => start_run(&mut session, env, &mut effects),
        Action::Settle => {
            session.dirty = false;
            start_run(&mut session, env, &mut effects);
            // Last, so a save failure outranks the "Running..." status.
            effects.push(Effect::AutoSave(session.bundle.clone()));
        }
        Action::Host(envelope) => {
            if envelope.generation != session.generation {
                debug!(
                    "dropping envelope from generation {} (current {})",
                    envelope.generation, session.generation
                );
            } else {
                match envelope.event {
                    HostEvent::Message(raw) => relay_message(&mut session, &raw, env, &mut effects),
                    HostEvent::Settled(outcome) => {
                        session.last_outcome = Some(outcome);
                        if !session.status.is_error {
                            set_status(&mut session, Status::ok("Ready"), &mut effects);
                        }
                    }
                }
            }
        }
        Action::ClearConsole => {
            session.console.clear();
            effects.push(Effect::ClearConsole);
        }
        Action::SetStatus(status) => set_status(&mut session, status, &mut effects),
    }
    (session, effects)
}

fn set_status(session: &mut EditorSession, status: Status, effects: &mut Vec<Effect>) {
    session.status = status.clone();
    effects.push(Effect::Status(status));
}

// A new run replaces the isolated context: stale highlight and console go first.
fn start_run(session: &mut EditorSession, env: &SessionEnv, effects: &mut Vec<Effect>) {
    session.generation += 1;
    session.console.clear();
    session.highlight = None;
    session.last_outcome = None;
    effects.push(Effect::ClearHighlight);
    effects.push(Effect::ClearConsole);
    set_status(session, Status::ok("Running..."), effects);
    effects.push(Effect::Render {
        generation: session.generation,
        document: compose::compose(&session.bundle, &env.shim),
    });
}

fn relay_message(session: &mut EditorSession, raw: &str, env: &SessionEnv, effects: &mut Vec<Effect>) {
    let Some(routed) = relay::on_boundary_message(raw, &env.locator) else {
        return;
    };
    let is_error = routed.event.kind == ConsoleKind::Error;
    session.console.push(routed.event.clone());
    effects.push(Effect::AppendConsole(routed.event));

    if is_error {
        set_status(session, Status::error("Error"), effects);
    }
    if let Some(location) = routed.location {
        if session.highlight.take().is_some() {
            effects.push(Effect::ClearHighlight);
        }
        session.highlight = Some(location);
        effects.push(Effect::Highlight(location));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> SessionEnv {
        SessionEnv::new(ShimOptions::default())
    }

    fn run(session: EditorSession) -> (EditorSession, Vec<Effect>) {
        reduce(session, Action::Run, &env())
    }

    #[test]
    fn edit_only_schedules() {
        let (s, fx) = reduce(
            EditorSession::default(),
            Action::Edit { pane: Pane::Script, text: "x()".into() },
            &env(),
        );
        assert_eq!(s.bundle.script, "x()");
        assert!(s.dirty);
        assert_eq!(fx, vec![Effect::ScheduleSettle]);
    }

    #[test]
    fn run_bumps_generation_and_renders() {
        let (s, fx) = run(EditorSession::default());
        assert_eq!(s.generation, 1);
        assert_eq!(s.status, Status::ok("Running..."));
        assert_eq!(fx[0], Effect::ClearHighlight);
        assert!(matches!(fx.last(), Some(Effect::Render { generation: 1, .. })));
    }

    #[test]
    fn settle_renders_then_auto_saves() {
        let mut s = EditorSession::default();
        s.bundle.markup = "<p>".into();
        s.dirty = true;
        let (s, fx) = reduce(s, Action::Settle, &env());
        assert!(!s.dirty);
        assert_eq!(fx.last(), Some(&Effect::AutoSave(SourceBundle::new("<p>", "", ""))));
        let render = fx.iter().position(|e| matches!(e, Effect::Render { .. }));
        let status = fx.iter().position(|e| matches!(e, Effect::Status(_)));
        assert!(status < render);
        assert_eq!(render, Some(fx.len() - 2));
    }

    #[test]
    fn stale_generation_is_dropped() {
        let (s, _) = run(EditorSession::default());
        let (s, _) = run(s);
        let stale = Envelope::message(1, r#"{"type":"log","args":["old"]}"#);
        let (s, fx) = reduce(s, Action::Host(stale), &env());
        assert!(s.console.is_empty());
        assert!(fx.is_empty());
    }

    #[test]
    fn messages_append_in_order() {
        let (mut s, _) = run(EditorSession::default());
        for raw in [
            r#"{"type":"log","args":["1"]}"#,
            r#"{"type":"warn","args":["a"]}"#,
            r#"garbage"#,
            r#"{"type":"log","args":["{\"x\":1}"]}"#,
        ] {
            s = reduce(s, Action::Host(Envelope::message(1, raw)), &env()).0;
        }
        let texts: Vec<String> = s.console.iter().map(|e| e.payload.join(" ")).collect();
        assert_eq!(texts, vec!["1", "a", r#"{"x":1}"#]);
    }

    #[test]
    fn error_highlights_once_and_replaces_prior() {
        let e = env();
        let p = e.locator.prologue_lines();
        let (s, _) = run(EditorSession::default());
        let first = format!(r#"{{"type":"error","args":["a","at <anonymous>:{}:1"]}}"#, p + 3);
        let second = format!(r#"{{"type":"error","args":["b","at <anonymous>:{}:1"]}}"#, p + 5);

        let (s, fx) = reduce(s, Action::Host(Envelope::message(1, first)), &e);
        assert_eq!(s.highlight, Some(ErrorLocation { line: 2, column: 0 }));
        assert!(s.status.is_error);
        assert!(!fx.contains(&Effect::ClearHighlight));

        let (s, fx) = reduce(s, Action::Host(Envelope::message(1, second)), &e);
        assert_eq!(s.highlight, Some(ErrorLocation { line: 4, column: 0 }));
        let clear_at = fx.iter().position(|f| *f == Effect::ClearHighlight).unwrap();
        let hl_at = fx.iter().position(|f| matches!(f, Effect::Highlight(_))).unwrap();
        assert!(clear_at < hl_at);
    }

    #[test]
    fn new_run_clears_highlight() {
        let mut s = EditorSession::default();
        s.highlight = Some(ErrorLocation { line: 1, column: 1 });
        let (s, fx) = run(s);
        assert_eq!(s.highlight, None);
        assert!(fx.contains(&Effect::ClearHighlight));
    }

    #[test]
    fn settled_sets_ready_unless_errored() {
        let (s, _) = run(EditorSession::default());
        let (s, _) = reduce(s, Action::Host(Envelope::settled(1, RunOutcome::default())), &env());
        assert_eq!(s.status, Status::ok("Ready"));

        let (s, _) = run(s);
        let (s, _) = reduce(s, Action::Host(Envelope::message(2, r#"{"type":"error","args":["x"]}"#)), &env());
        let (s, _) = reduce(s, Action::Host(Envelope::settled(2, RunOutcome::default())), &env());
        assert_eq!(s.status, Status::error("Error"));
        assert!(s.last_outcome.is_some());
    }
}
