//! End-to-end runs through the Boa host: compose, execute, relay.
#![cfg(feature = "boa")]

use livepen::{
    BoaHost, ConsoleKind, ErrorLocation, ErrorPolicy, MemoryBackend, Playground, PlaygroundConfig, RecordingUi,
    SourceBundle,
};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

fn playground_with(cfg: PlaygroundConfig) -> Playground<BoaHost, MemoryBackend, RecordingUi> {
    let host = BoaHost::new(&cfg);
    Playground::new(cfg, host, MemoryBackend::new(), RecordingUi::default())
}

fn playground() -> Playground<BoaHost, MemoryBackend, RecordingUi> {
    playground_with(PlaygroundConfig::default())
}

fn payloads(p: &Playground<BoaHost, MemoryBackend, RecordingUi>) -> Vec<Vec<String>> {
    p.ui().console.iter().map(|e| e.payload.clone()).collect()
}

#[test]
fn empty_bundle_runs_clean() {
    let mut p = playground();
    p.replace(SourceBundle::default());
    let outcome = p.run_to_settle(WAIT).expect("settles");
    assert_eq!(outcome.uncaught, None);
    assert!(p.ui().console.is_empty());
    assert_eq!(p.ui().status.text, "Ready");
}

#[test]
fn logs_arrive_in_order_with_json_objects() {
    let mut p = playground();
    p.replace(SourceBundle::new("", "", "console.log(1);\nconsole.log(\"a\");\nconsole.log({x: 1});"));
    p.run_to_settle(WAIT).unwrap();
    assert_eq!(payloads(&p), vec![vec!["1".to_string()], vec!["a".to_string()], vec![r#"{"x":1}"#.to_string()]]);
    assert!(p.ui().console.iter().all(|e| e.kind == ConsoleKind::Log));
}

#[test]
fn multiple_arguments_and_warn() {
    let mut p = playground();
    p.replace(SourceBundle::new("", "", "console.warn('low', 2, null, [1, 2]);"));
    p.run_to_settle(WAIT).unwrap();
    let ev = &p.ui().console[0];
    assert_eq!(ev.kind, ConsoleKind::Warn);
    assert_eq!(ev.payload, vec!["low", "2", "null", "[1,2]"]);
    assert_eq!(ev.display_text(), "> low 2 null [1,2]");
}

#[test]
fn circular_object_is_marked() {
    let mut p = playground();
    p.replace(SourceBundle::new("", "", "var a = {}; a.self = a; console.log('x', a);"));
    p.run_to_settle(WAIT).unwrap();
    assert_eq!(payloads(&p), vec![vec!["x".to_string(), "[Circular]".to_string()]]);
}

#[test]
fn thrown_error_reported_exactly_once() {
    let mut p = playground();
    p.replace(SourceBundle::new("", "", "console.log('before');\nthrow new Error('boom');"));
    let outcome = p.run_to_settle(WAIT).unwrap();

    let errors: Vec<_> = p.ui().console.iter().filter(|e| e.kind == ConsoleKind::Error).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].payload[0], "boom");
    assert!(errors[0].stack().is_some());
    assert!(p.ui().status.is_error);
    // re-thrown by default, so it escapes the boundary
    assert!(outcome.uncaught.is_some());
}

#[test]
fn swallow_policy_stops_at_the_boundary() {
    let cfg = PlaygroundConfig { error_policy: ErrorPolicy::Swallow, ..PlaygroundConfig::default() };
    let mut p = playground_with(cfg);
    p.replace(SourceBundle::new("", "", "throw new TypeError('nope');"));
    let outcome = p.run_to_settle(WAIT).unwrap();

    let errors = p.ui().console.iter().filter(|e| e.kind == ConsoleKind::Error).count();
    assert_eq!(errors, 1);
    assert_eq!(outcome.uncaught, None);
}

#[test]
fn thrown_non_error_value_still_reports() {
    let mut p = playground();
    p.replace(SourceBundle::new("", "", "throw 'plain';"));
    p.run_to_settle(WAIT).unwrap();
    let errors: Vec<_> = p.ui().console.iter().filter(|e| e.kind == ConsoleKind::Error).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].payload[0], "plain");
}

#[test]
fn thrown_undefined_reported_exactly_once() {
    let mut p = playground();
    p.replace(SourceBundle::new("", "", "console.log('before');\nthrow undefined;"));
    let outcome = p.run_to_settle(WAIT).unwrap();
    let errors: Vec<_> = p.ui().console.iter().filter(|e| e.kind == ConsoleKind::Error).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].payload[0], "undefined");
    assert!(outcome.uncaught.is_some());
}

#[test]
fn runtime_throw_highlights_its_line() {
    let mut p = playground();
    p.replace(SourceBundle::new("", "", "var a = 1;\nthrow new Error('boom');"));
    p.run_to_settle(WAIT).unwrap();
    assert_eq!(p.ui().highlight, Some(ErrorLocation { line: 1, column: 0 }));
    assert_eq!(p.ui().cursor, p.ui().highlight);
}

#[test]
fn engine_error_inside_a_function_highlights_the_failing_line() {
    let mut p = playground();
    p.replace(SourceBundle::new(
        "",
        "",
        "function f() {\n  var o = null;\n  return o.x;\n}\nconsole.log('start');\nf();",
    ));
    p.run_to_settle(WAIT).unwrap();
    let errors = p.ui().console.iter().filter(|e| e.kind == ConsoleKind::Error).count();
    assert_eq!(errors, 1);
    assert_eq!(p.ui().highlight.map(|l| l.line), Some(2));
}

#[test]
fn error_in_a_timer_callback_is_located() {
    let cfg = PlaygroundConfig { error_policy: ErrorPolicy::Swallow, ..PlaygroundConfig::default() };
    let mut p = playground_with(cfg);
    p.replace(SourceBundle::new(
        "",
        "",
        "setTimeout(function () {\n  throw new RangeError('late');\n}, 5);\nconsole.log('scheduled');",
    ));
    p.run_to_settle(WAIT).unwrap();
    let errors: Vec<_> = p.ui().console.iter().filter(|e| e.kind == ConsoleKind::Error).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].payload[0], "late");
    assert_eq!(p.ui().highlight.map(|l| l.line), Some(1));
}

#[test]
fn syntax_error_still_produces_one_error_event() {
    let mut p = playground();
    p.replace(SourceBundle::new("", "", "console.log("));
    p.run_to_settle(WAIT).unwrap();
    let errors = p.ui().console.iter().filter(|e| e.kind == ConsoleKind::Error).count();
    assert_eq!(errors, 1);
    assert!(p.ui().status.is_error);
}

#[test]
fn timers_run_after_the_script() {
    let mut p = playground();
    p.replace(SourceBundle::new(
        "",
        "",
        "setTimeout(function () { console.log('later'); }, 10);\nconsole.log('now');",
    ));
    p.run_to_settle(WAIT).unwrap();
    assert_eq!(payloads(&p), vec![vec!["now".to_string()], vec!["later".to_string()]]);
}

#[test]
fn second_render_replaces_a_busy_first() {
    let mut p = playground();
    p.replace(SourceBundle::new("", "", "console.log('first'); while (true) {}"));
    p.replace(SourceBundle::new("", "", "console.log('second');"));
    p.run_to_settle(WAIT).unwrap();

    assert_eq!(payloads(&p), vec![vec!["second".to_string()]]);
    assert_eq!(p.session().generation, 2);
}

#[test]
fn markup_reaches_the_text_snapshot() {
    let mut p = playground();
    p.replace(SourceBundle::new("<h1>Hello pen</h1>", "h1 { color: red; }", ""));
    p.run_to_settle(WAIT).unwrap();
    let snap = p.host().text_snapshot().unwrap();
    assert!(snap.text.contains("Hello pen"));
    assert!(!snap.text.contains("color: red"));
}
