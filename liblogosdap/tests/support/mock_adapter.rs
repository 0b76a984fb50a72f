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

//! A scripted in-process debug adapter.
//!
//! Listens on a loopback TCP port, accepts exactly one broker
//! connection, and plays the adapter side of the protocol from a
//! small behavior table. Requests the behavior marks as ignored are
//! never answered, which is how the timeout paths get exercised.

use std::{
    collections::HashSet,
    io::Read,
    net::{Shutdown, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex,
    },
    thread, time,
};

use liblogosdap::wire;
use logosdap_protocol::{Payload, ProtocolMessage, Request, Response};
use serde_json::Value;

pub struct Behavior {
    /// The `initialize` response body.
    pub capabilities: Value,
    /// Report requested breakpoints back as verified.
    pub verify_breakpoints: bool,
    /// Commands to swallow without any response.
    pub ignore: HashSet<String>,
    /// The `stackTrace` response body.
    pub stack_trace: Value,
}

impl Default for Behavior {
    fn default() -> Self {
        Behavior {
            capabilities: serde_json::json!({
                "supportsConfigurationDoneRequest": true,
            }),
            verify_breakpoints: true,
            ignore: HashSet::new(),
            stack_trace: serde_json::json!({
                "stackFrames": [
                    {"id": 42, "name": "main", "line": 10, "column": 1,
                     "source": {"path": "/ws/a.js"}}
                ],
                "totalFrames": 1,
            }),
        }
    }
}

/// One inbound request as the mock recorded it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub seq: i64,
    pub command: String,
    pub arguments: Option<Value>,
}

pub struct MockAdapter {
    pub port: u16,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    client_responses: Arc<Mutex<Vec<Response>>>,
    writer: Arc<Mutex<Option<TcpStream>>>,
    next_seq: Arc<AtomicI64>,
}

impl MockAdapter {
    pub fn spawn(behavior: Behavior) -> MockAdapter {
        let listener = TcpListener::bind("127.0.0.1:0").expect("binding mock listener");
        let port = listener.local_addr().expect("local addr").port();

        let requests = Arc::new(Mutex::new(vec![]));
        let client_responses = Arc::new(Mutex::new(vec![]));
        let writer = Arc::new(Mutex::new(None));
        let next_seq = Arc::new(AtomicI64::new(1));

        let adapter = MockAdapter {
            port,
            requests: Arc::clone(&requests),
            client_responses: Arc::clone(&client_responses),
            writer: Arc::clone(&writer),
            next_seq: Arc::clone(&next_seq),
        };

        thread::spawn(move || {
            let Ok((stream, _)) = listener.accept() else {
                return;
            };
            *writer.lock().unwrap() = Some(stream.try_clone().expect("cloning mock stream"));
            serve(stream, behavior, requests, client_responses, writer, next_seq);
        });

        adapter
    }

    /// Commands received so far, in arrival order.
    pub fn requested_commands(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|r| r.command.clone()).collect()
    }

    pub fn requests_named(&self, command: &str) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.command == command)
            .cloned()
            .collect()
    }

    /// Responses the broker has sent us (it only does that for
    /// reverse requests).
    pub fn responses_from_client(&self) -> Vec<Response> {
        self.client_responses.lock().unwrap().clone()
    }

    /// Block until the broker has sent the given command.
    pub fn wait_for_request(&self, command: &str, timeout: time::Duration) -> RecordedRequest {
        let deadline = time::Instant::now() + timeout;
        loop {
            if let Some(hit) = self
                .requests
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.command == command)
            {
                return hit.clone();
            }
            assert!(
                time::Instant::now() < deadline,
                "mock never saw '{command}'; saw {:?}",
                self.requested_commands()
            );
            thread::sleep(time::Duration::from_millis(10));
        }
    }

    pub fn send_event(&self, name: &str, body: Value) {
        self.send(Payload::Event(logosdap_protocol::Event {
            event: String::from(name),
            body: Some(body),
        }));
    }

    /// Fire a reverse request at the broker with an explicit seq.
    pub fn send_reverse_request(&self, seq: i64, command: &str, arguments: Value) {
        let msg = ProtocolMessage {
            seq,
            payload: Payload::Request(Request {
                command: String::from(command),
                arguments: Some(arguments),
            }),
        };
        self.write(msg);
    }

    /// Wait for a broker response to a reverse request.
    pub fn wait_for_client_response(&self, request_seq: i64, timeout: time::Duration) -> Response {
        let deadline = time::Instant::now() + timeout;
        loop {
            if let Some(hit) = self
                .client_responses
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.request_seq == request_seq)
            {
                return hit.clone();
            }
            assert!(
                time::Instant::now() < deadline,
                "no broker response for reverse request {request_seq}"
            );
            thread::sleep(time::Duration::from_millis(10));
        }
    }

    /// Drop the connection, as a crashing adapter would.
    pub fn close(&self) {
        if let Some(stream) = self.writer.lock().unwrap().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn send(&self, payload: Payload) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.write(ProtocolMessage { seq, payload });
    }

    fn write(&self, msg: ProtocolMessage) {
        let mut writer = self.writer.lock().unwrap();
        let stream = writer.as_mut().expect("mock adapter has no connection yet");
        wire::encode_to(&msg, stream).expect("mock write to succeed");
    }
}

fn serve(
    mut stream: TcpStream,
    behavior: Behavior,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    client_responses: Arc<Mutex<Vec<Response>>>,
    writer: Arc<Mutex<Option<TcpStream>>>,
    next_seq: Arc<AtomicI64>,
) {
    let defer_launch = behavior.capabilities["supportsConfigurationDoneRequest"]
        .as_bool()
        .unwrap_or(false);
    let mut deferred_launch: Option<(i64, String)> = None;

    let respond = |request: &RecordedRequest, body: Value| {
        let msg = ProtocolMessage {
            seq: next_seq.fetch_add(1, Ordering::SeqCst),
            payload: Payload::Response(Response {
                request_seq: request.seq,
                success: true,
                command: request.command.clone(),
                message: None,
                body: Some(body),
            }),
        };
        let mut writer = writer.lock().unwrap();
        if let Some(stream) = writer.as_mut() {
            let _ = wire::encode_to(&msg, stream);
        }
    };
    let emit = |name: &str, body: Value| {
        let msg = ProtocolMessage {
            seq: next_seq.fetch_add(1, Ordering::SeqCst),
            payload: Payload::Event(logosdap_protocol::Event {
                event: String::from(name),
                body: Some(body),
            }),
        };
        let mut writer = writer.lock().unwrap();
        if let Some(stream) = writer.as_mut() {
            let _ = wire::encode_to(&msg, stream);
        }
    };

    let mut decoder = wire::FrameDecoder::new();
    let mut buf = [0u8; 16 * 1024];
    'read: loop {
        let Ok(nread) = stream.read(&mut buf) else {
            break;
        };
        if nread == 0 {
            break;
        }
        decoder.feed(&buf[..nread]);

        while let Ok(Some(msg)) = decoder.next_message() {
            match msg.payload {
                Payload::Response(resp) => {
                    client_responses.lock().unwrap().push(resp);
                    continue;
                }
                Payload::Event(_) => continue,
                Payload::Request(req) => {
                    let request = RecordedRequest {
                        seq: msg.seq,
                        command: req.command,
                        arguments: req.arguments,
                    };
                    requests.lock().unwrap().push(request.clone());

                    if behavior.ignore.contains(&request.command) {
                        continue;
                    }

                    match request.command.as_str() {
                        "initialize" => {
                            respond(&request, behavior.capabilities.clone());
                            emit("initialized", serde_json::json!({}));
                        }
                        "launch" | "attach" if defer_launch => {
                            deferred_launch = Some((request.seq, request.command.clone()));
                        }
                        "launch" | "attach" => {
                            respond(&request, serde_json::json!({}));
                        }
                        "configurationDone" => {
                            respond(&request, serde_json::json!({}));
                            if let Some((seq, command)) = deferred_launch.take() {
                                respond(
                                    &RecordedRequest {
                                        seq,
                                        command,
                                        arguments: None,
                                    },
                                    serde_json::json!({}),
                                );
                            }
                        }
                        "setBreakpoints" => {
                            let requested = request
                                .arguments
                                .as_ref()
                                .and_then(|a| a["breakpoints"].as_array().cloned())
                                .unwrap_or_default();
                            let reported: Vec<Value> = requested
                                .iter()
                                .map(|b| {
                                    serde_json::json!({
                                        "verified": behavior.verify_breakpoints,
                                        "line": b["line"],
                                    })
                                })
                                .collect();
                            respond(&request, serde_json::json!({ "breakpoints": reported }));
                        }
                        "setFunctionBreakpoints" => {
                            respond(&request, serde_json::json!({ "breakpoints": [] }));
                        }
                        "setExceptionBreakpoints" => {
                            respond(&request, serde_json::json!({}));
                        }
                        "threads" => {
                            respond(
                                &request,
                                serde_json::json!({
                                    "threads": [{"id": 1, "name": "main"}],
                                }),
                            );
                        }
                        "stackTrace" => {
                            respond(&request, behavior.stack_trace.clone());
                        }
                        "scopes" => {
                            respond(
                                &request,
                                serde_json::json!({
                                    "scopes": [{"name": "Locals",
                                                "variablesReference": 100,
                                                "expensive": false}],
                                }),
                            );
                        }
                        "variables" => {
                            respond(
                                &request,
                                serde_json::json!({
                                    "variables": [{"name": "x", "value": "1",
                                                   "variablesReference": 0}],
                                }),
                            );
                        }
                        "evaluate" => {
                            respond(
                                &request,
                                serde_json::json!({
                                    "result": "42",
                                    "variablesReference": 0,
                                }),
                            );
                        }
                        "continue" => {
                            respond(&request, serde_json::json!({"allThreadsContinued": true}));
                        }
                        "next" | "stepIn" | "stepOut" | "pause" => {
                            respond(&request, serde_json::json!({}));
                        }
                        "terminate" => {
                            respond(&request, serde_json::json!({}));
                            emit("terminated", serde_json::json!({}));
                        }
                        "disconnect" => {
                            respond(&request, serde_json::json!({}));
                            let _ = stream.shutdown(Shutdown::Both);
                            break 'read;
                        }
                        _ => {
                            respond(&request, serde_json::json!({}));
                        }
                    }
                }
            }
        }
    }
}
