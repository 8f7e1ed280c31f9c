//! The dispatcher: owns the single `EditorSession` and carries out effects.
//!
//! `Playground` is deliberately thin. State transitions live in
//! [`crate::session::reduce`]; this type wires the reducer to an execution
//! host, a snapshot store and the UI, and turns storage and decode failures
//! into status messages instead of propagating them as crashes.

use crate::compose;
use crate::host::{ExecutionHost, HostEvent, RunOutcome};
use crate::session::{self, Action, Effect, EditorSession, SessionEnv};
use crate::share;
use crate::store::{KvBackend, ProjectEntry, Snapshot, SnapshotStore};
use crate::{Error, HostUi, Pane, PlaygroundConfig, Result, SourceBundle, Status};
use log::{info, warn};
use std::time::Duration;

pub struct Playground<H: ExecutionHost, B: KvBackend, U: HostUi> {
    config: PlaygroundConfig,
    env: SessionEnv,
    session: EditorSession,
    host: H,
    store: SnapshotStore<B>,
    ui: U,
}

impl<H: ExecutionHost, B: KvBackend, U: HostUi> Playground<H, B, U> {
    pub fn new(config: PlaygroundConfig, host: H, backend: B, ui: U) -> Self {
        let env = SessionEnv::from_config(&config);
        let store = SnapshotStore::new(backend, config.storage_key.clone());
        Self { config, env, session: EditorSession::default(), host, store, ui }
    }

    pub fn config(&self) -> &PlaygroundConfig {
        &self.config
    }

    pub fn session(&self) -> &EditorSession {
        &self.session
    }

    pub fn bundle(&self) -> &SourceBundle {
        &self.session.bundle
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    pub fn ui_mut(&mut self) -> &mut U {
        &mut self.ui
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn store(&self) -> &SnapshotStore<B> {
        &self.store
    }

    /// Reduce one action and carry out its effects.
    ///
    /// Returns the effects that need a timer (`ScheduleSettle`); a caller
    /// without a scheduler may dispatch `Action::Settle` itself.
    pub fn dispatch(&mut self, action: Action) -> Vec<Effect> {
        let session = std::mem::take(&mut self.session);
        let (session, effects) = session::reduce(session, action, &self.env);
        self.session = session;

        let mut deferred = Vec::new();
        let mut follow_ups = Vec::new();
        for effect in effects {
            match effect {
                Effect::ScheduleSettle => deferred.push(Effect::ScheduleSettle),
                other => follow_ups.extend(self.apply(other)),
            }
        }
        // Failures are reduced only after every effect of this action has run,
        // so a later effect cannot overwrite the status they set.
        for action in follow_ups {
            deferred.extend(self.dispatch(action));
        }
        deferred
    }

    // Carry out one effect; a failure comes back as the action that reports it.
    fn apply(&mut self, effect: Effect) -> Option<Action> {
        match effect {
            Effect::ScheduleSettle => {}
            Effect::Render { generation, document } => {
                if let Err(e) = self.host.render(&document, generation) {
                    warn!("render failed: {}", e);
                    return Some(Action::SetStatus(Status::error(format!("Render failed: {}", e))));
                }
            }
            Effect::AutoSave(bundle) => {
                if let Err(e) = self.store.auto_save(&bundle) {
                    return Some(storage_failure(&e));
                }
            }
            Effect::ClearConsole => self.ui.clear_console(),
            Effect::AppendConsole(event) => self.ui.append_console(&event),
            Effect::ClearHighlight => self.ui.clear_highlight(),
            Effect::Highlight(location) => self.ui.highlight_line(location),
            Effect::Status(status) => self.ui.set_status(&status),
        }
        None
    }

    fn report_storage(&mut self, e: &Error) {
        self.dispatch(storage_failure(e));
    }

    /// Apply an edit; `true` when the caller should (re)start the debounce.
    pub fn edit(&mut self, pane: Pane, text: impl Into<String>) -> bool {
        let deferred = self.dispatch(Action::Edit { pane, text: text.into() });
        deferred.contains(&Effect::ScheduleSettle)
    }

    /// Quiet period over: auto-save and run.
    pub fn settle(&mut self) {
        self.dispatch(Action::Settle);
    }

    /// Compose and render the current bundle now.
    pub fn run(&mut self) -> u64 {
        self.dispatch(Action::Run);
        self.session.generation
    }

    /// Replace all panes and run.
    pub fn replace(&mut self, bundle: SourceBundle) {
        self.dispatch(Action::Replace(bundle));
    }

    pub fn clear_console(&mut self) {
        self.dispatch(Action::ClearConsole);
    }

    /// Relay whatever the host has produced; returns how many envelopes were seen.
    pub fn pump(&mut self) -> usize {
        let envelopes = self.host.poll();
        let n = envelopes.len();
        for envelope in envelopes {
            self.dispatch(Action::Host(envelope));
        }
        n
    }

    /// Block until the current run settles, relaying messages as they come.
    pub fn run_to_settle(&mut self, timeout: Duration) -> Result<RunOutcome> {
        let generation = self.session.generation;
        let envelopes = self.host.wait_settled(generation, timeout);
        let mut outcome = None;
        for envelope in envelopes {
            if envelope.generation == generation {
                if let HostEvent::Settled(o) = &envelope.event {
                    outcome = Some(o.clone());
                }
            }
            self.dispatch(Action::Host(envelope));
        }
        match outcome {
            Some(o) => Ok(o),
            None => {
                let ms = timeout.as_millis() as u64;
                self.dispatch(Action::SetStatus(Status::error(format!("Timed out after {}ms", ms))));
                Err(Error::Timeout(ms))
            }
        }
    }

    /// Save to the single slot or under a project name.
    pub fn save(&mut self, name: Option<&str>) -> Result<Snapshot> {
        match self.store.save(&self.session.bundle, name) {
            Ok(snap) => {
                self.dispatch(Action::SetStatus(Status::ok("Saved!")));
                Ok(snap)
            }
            Err(e) => {
                self.report_storage(&e);
                Err(e)
            }
        }
    }

    /// Load the single slot or a named project and run it. `Ok(false)` when
    /// nothing is stored under that name.
    pub fn load(&mut self, name: Option<&str>) -> Result<bool> {
        match self.store.load(name) {
            Ok(Some(bundle)) => {
                self.replace(bundle);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                self.dispatch(Action::SetStatus(Status::error(format!("Load failed: {}", e))));
                Err(e)
            }
        }
    }

    /// Restore the auto-save slot, if any.
    pub fn restore_auto_save(&mut self) -> Result<bool> {
        match self.store.load_auto() {
            Ok(Some(snap)) => {
                self.replace(snap.bundle);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                self.dispatch(Action::SetStatus(Status::error(format!("Load failed: {}", e))));
                Err(e)
            }
        }
    }

    pub fn list(&self) -> Result<Vec<ProjectEntry>> {
        self.store.list()
    }

    /// Timed auto-save; never touches the named project list.
    pub fn auto_save(&mut self) -> bool {
        match self.store.auto_save(&self.session.bundle) {
            Ok(wrote) => wrote,
            Err(e) => {
                self.report_storage(&e);
                false
            }
        }
    }

    /// Share URL for the current bundle.
    pub fn share_url(&mut self, base: &str) -> Result<String> {
        let token = share::encode(&self.session.bundle);
        let url = share::share_url(base, &token)?;
        self.dispatch(Action::SetStatus(Status::ok("Link Copied!")));
        Ok(url)
    }

    /// Open a share token. A malformed token leaves the bundle untouched.
    pub fn open_shared(&mut self, token: &str) -> bool {
        match share::decode(token) {
            Ok(bundle) => {
                info!("opened shared bundle");
                self.replace(bundle);
                true
            }
            Err(e) => {
                warn!("ignoring share token: {}", e);
                self.dispatch(Action::SetStatus(Status::error("Invalid share link")));
                false
            }
        }
    }

    /// Open the token carried by a page URL, if any.
    pub fn open_shared_url(&mut self, page: &str) -> bool {
        match share::token_from_url(page) {
            Some(token) => self.open_shared(token.as_str()),
            None => false,
        }
    }

    /// The clean export document for the current bundle.
    pub fn export(&self) -> String {
        compose::export(&self.session.bundle)
    }
}

fn storage_failure(e: &Error) -> Action {
    warn!("storage failure: {}", e);
    Action::SetStatus(Status::error(format!("Save failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Envelope, RecordingHost};
    use crate::store::MemoryBackend;
    use crate::{ConsoleKind, RecordingUi};

    type TestPlayground = Playground<RecordingHost, MemoryBackend, RecordingUi>;

    fn playground() -> TestPlayground {
        Playground::new(PlaygroundConfig::default(), RecordingHost::auto_settling(), MemoryBackend::new(), RecordingUi::default())
    }

    #[test]
    fn edit_then_settle_saves_and_renders() {
        let mut p = playground();
        assert!(p.edit(Pane::Script, "console.log(1)"));
        assert_eq!(p.host().render_count(), 0);
        p.settle();
        assert_eq!(p.host().render_count(), 1);
        assert!(p.host().last_document().unwrap().contains("console.log(1)"));
        assert!(p.store().load_auto().unwrap().is_some());
        assert!(p.list().unwrap().is_empty());
    }

    #[test]
    fn relayed_messages_reach_ui() {
        let mut p = playground();
        let g = p.run();
        p.host_mut().push_message(g, r#"{"type":"log","args":["hi"]}"#);
        p.pump();
        assert_eq!(p.ui().console.len(), 1);
        assert_eq!(p.ui().console[0].kind, ConsoleKind::Log);
        assert_eq!(p.ui().status, Status::ok("Ready"));
    }

    #[test]
    fn second_render_drops_first_generation_messages() {
        let mut p = playground();
        let g1 = p.run();
        let g2 = p.run();
        p.host_mut().push(Envelope::message(g1, r#"{"type":"log","args":["stale"]}"#));
        p.host_mut().push(Envelope::message(g2, r#"{"type":"log","args":["fresh"]}"#));
        p.pump();
        let texts: Vec<&str> = p.ui().console.iter().map(|e| e.payload[0].as_str()).collect();
        assert_eq!(texts, vec!["fresh"]);
    }

    #[test]
    fn bad_share_token_keeps_bundle() {
        let mut p = playground();
        p.replace(SourceBundle::new("<b>keep</b>", "", ""));
        assert!(!p.open_shared("%%%not-a-token"));
        assert_eq!(p.bundle().markup, "<b>keep</b>");
        assert!(p.ui().status.is_error);
    }

    #[test]
    fn share_then_open_restores_bundle() {
        let mut p = playground();
        let b = SourceBundle::new("<i>ü</i>", "i{}", "1");
        p.replace(b.clone());
        let url = p.share_url("https://pen.example/").unwrap();
        let mut q = playground();
        assert!(q.open_shared_url(&url));
        assert_eq!(q.bundle(), &b);
    }

    #[test]
    fn storage_failure_becomes_status() {
        let mut p = Playground::new(
            PlaygroundConfig::default(),
            RecordingHost::new(),
            MemoryBackend::with_quota(4),
            RecordingUi::default(),
        );
        p.replace(SourceBundle::new("<p>too big</p>", "", ""));
        assert!(p.save(None).is_err());
        assert!(p.ui().status.is_error);
        assert!(p.ui().status.text.starts_with("Save failed"));
        assert!(!p.auto_save());
    }

    #[test]
    fn failed_auto_save_after_edit_stays_visible() {
        let mut p = Playground::new(
            PlaygroundConfig::default(),
            RecordingHost::auto_settling(),
            MemoryBackend::with_quota(4),
            RecordingUi::default(),
        );
        assert!(p.edit(Pane::Script, "console.log('too big to store')"));
        p.settle();
        p.pump();
        assert_eq!(p.host().render_count(), 1);
        assert!(p.ui().status.is_error);
        assert!(p.ui().status.text.starts_with("Save failed"));
        assert_eq!(p.ui().status, p.session().status);
    }

    #[test]
    fn save_and_load_named() {
        let mut p = playground();
        p.replace(SourceBundle::new("a", "", ""));
        p.save(Some("one")).unwrap();
        p.replace(SourceBundle::new("b", "", ""));
        assert!(p.load(Some("one")).unwrap());
        assert_eq!(p.bundle().markup, "a");
        assert!(!p.load(Some("missing")).unwrap());
    }

    #[test]
    fn run_to_settle_times_out_without_settle() {
        let mut p = Playground::new(PlaygroundConfig::default(), RecordingHost::new(), MemoryBackend::new(), RecordingUi::default());
        p.run();
        let err = p.run_to_settle(Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, Error::Timeout(5)));
        assert!(p.ui().status.is_error);
    }
}
