// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end scenarios against a scripted in-process adapter.

use std::{collections::HashSet, fs, time::Duration};

use anyhow::Context;
use liblogosdap::{
    breakpoints::{BreakpointOptions, ToggleOutcome},
    errors::{is_kind, BrokerError},
    launch::LaunchSource,
    service::BrokerEvent,
    session::SessionState,
};
use assert_matches::assert_matches;
use logosdap_protocol::RunInTerminalResponseBody;
use ntest::timeout;

mod support;

use support::{
    count_events,
    mock_adapter::{Behavior, MockAdapter},
    mock_launch_config, service_for_mock, subscribe_channel, wait_for_event,
};

const EVENT_WAIT: Duration = Duration::from_secs(5);

#[test]
#[timeout(30000)]
fn handshake_reaches_running() -> anyhow::Result<()> {
    let workspace = tempfile::tempdir().context("creating tmp dir")?;
    let adapter = MockAdapter::spawn(Behavior::default());
    let service = service_for_mock(adapter.port, None);
    let events = subscribe_channel(&service);

    let info = service.start_session(mock_launch_config("handshake"), workspace.path())?;
    assert_eq!(info.state, SessionState::Running);

    // the adapter saw the DAP-ordered handshake
    let commands = adapter.requested_commands();
    assert_eq!(commands, vec!["initialize", "launch", "configurationDone"]);

    // the fixed client capability payload went out with initialize
    let init = adapter.wait_for_request("initialize", EVENT_WAIT);
    let args = init.arguments.expect("initialize arguments");
    assert_eq!(args["adapterID"], "go");
    assert_eq!(args["pathFormat"], "path");
    assert_eq!(args["linesStartAt1"], true);
    assert_eq!(args["columnsStartAt1"], true);
    assert_eq!(args["supportsRunInTerminalRequest"], true);

    // launch arguments had their variables substituted
    let launch = adapter.wait_for_request("launch", EVENT_WAIT);
    let program = launch.arguments.expect("launch arguments")["program"]
        .as_str()
        .expect("program")
        .to_string();
    assert_eq!(program, format!("{}/main.go", workspace.path().display()));

    // exactly one created and one running transition observed
    let seen = wait_for_event(&events, EVENT_WAIT, |e| {
        matches!(e, BrokerEvent::SessionStateChanged { state: SessionState::Running, .. })
    });
    assert_eq!(count_events(&seen, "sessionCreated"), 1);
    assert_eq!(count_events(&seen, "sessionStateChanged"), 1);

    service.cleanup();
    Ok(())
}

#[test]
#[timeout(30000)]
fn breakpoints_set_before_start_sync_on_startup() -> anyhow::Result<()> {
    let workspace = tempfile::tempdir().context("creating tmp dir")?;
    let adapter = MockAdapter::spawn(Behavior::default());
    let service = service_for_mock(adapter.port, None);

    // no session yet: the mutation stays local
    let bp = service.set_breakpoint("/ws/a.js", 10, BreakpointOptions::default());
    assert!(bp.enabled);
    assert!(!bp.verified);

    service.start_session(mock_launch_config("bp-startup"), workspace.path())?;

    // the registry was reconciled between launch and
    // configurationDone, and the adapter's verification landed
    let commands = adapter.requested_commands();
    assert_eq!(commands, vec!["initialize", "launch", "setBreakpoints", "configurationDone"]);
    let stored = service.get_breakpoints_for_file("/ws/a.js");
    assert!(stored[0].verified);

    service.cleanup();
    Ok(())
}

#[test]
#[timeout(30000)]
fn breakpoint_lifecycle_with_live_session() -> anyhow::Result<()> {
    let workspace = tempfile::tempdir().context("creating tmp dir")?;
    let adapter = MockAdapter::spawn(Behavior::default());
    let service = service_for_mock(adapter.port, None);
    let events = subscribe_channel(&service);

    service.start_session(mock_launch_config("bp-live"), workspace.path())?;

    let bp = service.set_breakpoint("/ws/a.js", 10, BreakpointOptions::default());
    assert!(bp.enabled);
    assert!(bp.verified, "adapter reply should have verified the breakpoint");

    let set_calls = adapter.requests_named("setBreakpoints");
    assert_eq!(set_calls.len(), 1);
    let args = set_calls[0].arguments.as_ref().expect("setBreakpoints arguments");
    assert_eq!(args["source"]["path"], "/ws/a.js");
    assert_eq!(args["breakpoints"][0]["line"], 10);

    let seen = wait_for_event(&events, EVENT_WAIT, |e| {
        matches!(e, BrokerEvent::BreakpointValidated(b) if b.line == 10)
    });
    assert!(count_events(&seen, "breakpointChanged") >= 1);

    // the gutter toggle removes it again and reconciles an empty list
    let outcome = service.toggle_breakpoint_at_line("/ws/a.js", 10);
    assert_matches!(outcome, ToggleOutcome::Removed(_));
    assert!(service.get_breakpoints_for_file("/ws/a.js").is_empty());

    let set_calls = adapter.requests_named("setBreakpoints");
    assert_eq!(set_calls.len(), 2);
    let args = set_calls[1].arguments.as_ref().expect("setBreakpoints arguments");
    assert_eq!(args["breakpoints"].as_array().expect("breakpoints array").len(), 0);

    service.cleanup();
    Ok(())
}

#[test]
#[timeout(30000)]
fn stop_and_inspect() -> anyhow::Result<()> {
    let workspace = tempfile::tempdir().context("creating tmp dir")?;
    let adapter = MockAdapter::spawn(Behavior::default());
    let service = service_for_mock(adapter.port, None);
    let events = subscribe_channel(&service);

    service.start_session(mock_launch_config("inspect"), workspace.path())?;
    service.add_watch("x + 1");

    adapter.send_event(
        "stopped",
        serde_json::json!({"reason": "breakpoint", "threadId": 1}),
    );

    let seen = wait_for_event(&events, EVENT_WAIT, |e| {
        matches!(e, BrokerEvent::WatchUpdated(w) if w.result.is_some())
    });

    // stopped before stackTraceUpdated, both observed
    let stopped_pos = seen
        .iter()
        .position(|e| matches!(e, BrokerEvent::Stopped { reason, .. } if reason == "breakpoint"))
        .expect("a stopped event");
    let stack_pos = seen
        .iter()
        .position(|e| {
            matches!(e, BrokerEvent::StackTraceUpdated { thread_id: 1, frames, .. }
                     if frames.first().map(|f| f.id) == Some(42))
        })
        .expect("a stackTraceUpdated event");
    assert!(stopped_pos < stack_pos);

    let info = service.get_active_session().expect("an active session");
    assert_eq!(info.state, SessionState::Stopped);
    assert_eq!(info.current_thread_id, Some(1));
    assert_eq!(info.current_frame_id, Some(42));

    // exactly one stackTrace request went out for the stop
    assert_eq!(adapter.requests_named("stackTrace").len(), 1);

    // the watch refresh evaluated in the stopped frame
    let evals = adapter.requests_named("evaluate");
    assert_eq!(evals.len(), 1);
    let args = evals[0].arguments.as_ref().expect("evaluate arguments");
    assert_eq!(args["expression"], "x + 1");
    assert_eq!(args["frameId"], 42);
    assert_eq!(args["context"], "watch");
    let watch = &service.get_watch_expressions()[0];
    assert_eq!(watch.result.as_deref(), Some("42"));

    service.cleanup();
    Ok(())
}

#[test]
#[timeout(30000)]
fn request_timeout_leaves_session_usable() -> anyhow::Result<()> {
    let workspace = tempfile::tempdir().context("creating tmp dir")?;
    let mut behavior = Behavior::default();
    behavior.ignore = HashSet::from([String::from("evaluate")]);
    let adapter = MockAdapter::spawn(behavior);
    // a 1 second timeout so the test doesn't sit around for 30
    let service = service_for_mock(adapter.port, Some(1));
    let events = subscribe_channel(&service);

    service.start_session(mock_launch_config("timeout"), workspace.path())?;
    adapter.send_event(
        "stopped",
        serde_json::json!({"reason": "pause", "threadId": 1}),
    );
    wait_for_event(&events, EVENT_WAIT, |e| matches!(e, BrokerEvent::Stopped { .. }));

    let err = service
        .evaluate("sleep_forever()", None, "repl", None)
        .expect_err("evaluate to time out");
    assert!(is_kind(&err, &BrokerError::Timeout), "got: {err:#}");

    // the pending entry is gone and the session still works
    service.continue_execution(None)?;
    adapter.wait_for_request("continue", EVENT_WAIT);
    assert_eq!(
        service.get_active_session().expect("active session").state,
        SessionState::Running
    );

    service.cleanup();
    Ok(())
}

#[test]
#[timeout(30000)]
fn reverse_run_in_terminal() -> anyhow::Result<()> {
    let workspace = tempfile::tempdir().context("creating tmp dir")?;
    let adapter = MockAdapter::spawn(Behavior::default());
    let service = service_for_mock(adapter.port, None);

    let (seen_tx, seen_rx) = crossbeam_channel::bounded(1);
    service.set_run_in_terminal_handler(std::sync::Arc::new(move |args| {
        let _ = seen_tx.try_send(args);
        Ok(RunInTerminalResponseBody { process_id: Some(4242), shell_process_id: None })
    }));

    service.start_session(mock_launch_config("terminal"), workspace.path())?;

    adapter.send_reverse_request(
        7,
        "runInTerminal",
        serde_json::json!({"cwd": "/ws", "args": ["node", "main.js"]}),
    );

    let resp = adapter.wait_for_client_response(7, EVENT_WAIT);
    assert!(resp.success);
    assert_eq!(resp.command, "runInTerminal");
    assert_eq!(resp.request_seq, 7);
    let body = resp.body.expect("a response body");
    assert_eq!(body["processId"], 4242);

    let handled = seen_rx.recv_timeout(EVENT_WAIT).expect("handler to have run");
    assert_eq!(handled.cwd, "/ws");
    assert_eq!(handled.args, ["node", "main.js"]);

    // unknown reverse requests get a refusal rather than silence
    adapter.send_reverse_request(8, "startDebugging", serde_json::json!({}));
    let refusal = adapter.wait_for_client_response(8, EVENT_WAIT);
    assert!(!refusal.success);

    service.cleanup();
    Ok(())
}

#[test]
#[timeout(30000)]
fn jsonc_fallback_and_import() -> anyhow::Result<()> {
    let workspace = tempfile::tempdir().context("creating tmp dir")?;
    fs::create_dir_all(workspace.path().join(".vscode"))?;
    fs::write(
        workspace.path().join(".vscode/launch.json"),
        "{ /* a */ \"version\": \"0.2.0\", // b\n \"configurations\": [] }",
    )?;

    let adapter = MockAdapter::spawn(Behavior::default());
    let service = service_for_mock(adapter.port, None);

    let (file, source) = service
        .read_launch_config(workspace.path())?
        .expect("the vscode fallback to be found");
    assert_eq!(source, LaunchSource::Vscode);
    assert_eq!(file.version, "0.2.0");
    assert!(file.configurations.is_empty());

    service.import_from_vscode(workspace.path())?;
    let imported = fs::read_to_string(workspace.path().join(".logos/launch.json"))?;
    // plain JSON byte for byte: reparses without any stripping
    let reparsed: serde_json::Value = serde_json::from_str(&imported)?;
    assert_eq!(reparsed["version"], "0.2.0");
    assert!(!imported.contains("/*") && !imported.contains("//"));

    Ok(())
}

#[test]
#[timeout(30000)]
fn adapter_crash_terminates_session() -> anyhow::Result<()> {
    let workspace = tempfile::tempdir().context("creating tmp dir")?;
    let adapter = MockAdapter::spawn(Behavior::default());
    let service = service_for_mock(adapter.port, None);
    let events = subscribe_channel(&service);

    service.start_session(mock_launch_config("crash"), workspace.path())?;
    adapter.close();

    wait_for_event(&events, EVENT_WAIT, |e| {
        matches!(e, BrokerEvent::SessionTerminated { .. })
    });
    assert!(service.get_sessions().is_empty());
    assert!(service.get_active_session().is_none());
    Ok(())
}

#[test]
#[timeout(30000)]
fn console_execute_records_history() -> anyhow::Result<()> {
    let workspace = tempfile::tempdir().context("creating tmp dir")?;
    let adapter = MockAdapter::spawn(Behavior::default());
    let service = service_for_mock(adapter.port, None);

    service.start_session(mock_launch_config("console"), workspace.path())?;
    let result = service.execute_in_console("1 + 41")?;
    assert_eq!(result, "42");

    let history = service.console_history();
    assert!(history.iter().any(|e| e.text.contains("1 + 41")));
    assert!(history.iter().any(|e| e.text.contains("42")));

    let evals = adapter.requests_named("evaluate");
    assert_eq!(
        evals[0].arguments.as_ref().expect("evaluate arguments")["context"],
        "repl"
    );

    service.cleanup();
    Ok(())
}
