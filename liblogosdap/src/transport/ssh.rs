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

use std::thread;

use logosdap_protocol::{Payload, ProtocolMessage};
use serde_json::Value;
use tracing::{instrument, span, Level};

use super::{
    stdio::StdioTransport, SpawnSpec, Transport, TransportEvent, TransportState,
};

/// Where an SSH-tunnelled adapter lives and how local and remote
/// source trees line up.
#[derive(Debug, Clone)]
pub struct SshTunnelConfig {
    /// The ssh destination (`user@host` or a host alias from
    /// ssh_config).
    pub destination: String,
    /// Host the adapter listens on, as seen from the remote side.
    pub remote_host: String,
    pub remote_port: u16,
    /// Workspace root on this machine.
    pub local_root: String,
    /// The same tree as checked out on the remote machine.
    pub remote_root: String,
}

/// A transport that reaches a remote adapter by driving the system
/// `ssh` binary in stdio-forwarding mode (`ssh -W host:port dest`).
///
/// Everything above this layer works in local paths: every
/// `source.path` is rewritten from `local_root` to `remote_root` on
/// the way out and back again on the way in, so neither the client
/// nor the session ever see a remote path. When the SSH session
/// itself drops, the child exits and that surfaces as a normal
/// transport close.
pub struct SshTransport {
    config: SshTunnelConfig,
    inner: StdioTransport,
}

impl SshTransport {
    pub fn new(config: SshTunnelConfig) -> Self {
        let spawn = SpawnSpec {
            command: String::from("ssh"),
            args: vec![
                String::from("-x"),
                String::from("-T"),
                String::from("-o"),
                String::from("BatchMode=yes"),
                String::from("-W"),
                format!("{}:{}", config.remote_host, config.remote_port),
                config.destination.clone(),
            ],
            cwd: None,
            env: vec![],
        };
        SshTransport { config, inner: StdioTransport::new(spawn) }
    }
}

impl Transport for SshTransport {
    #[instrument(skip_all, fields(dest = self.config.destination))]
    fn connect(
        &mut self,
        events: crossbeam_channel::Sender<TransportEvent>,
    ) -> anyhow::Result<()> {
        // Interpose on the inner transport's event stream so inbound
        // messages can be rewritten before anyone else sees them.
        let (raw_tx, raw_rx) = crossbeam_channel::unbounded();
        self.inner.connect(raw_tx)?;

        let remote_root = self.config.remote_root.clone();
        let local_root = self.config.local_root.clone();
        let dest = self.config.destination.clone();
        thread::spawn(move || {
            let _s = span!(Level::INFO, "ssh_rewrite", dest = dest).entered();
            for event in raw_rx.iter() {
                let event = match event {
                    TransportEvent::Message(mut msg) => {
                        rewrite_message(&mut msg, &remote_root, &local_root);
                        TransportEvent::Message(msg)
                    }
                    other => other,
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        });

        Ok(())
    }

    fn disconnect(&mut self) {
        self.inner.disconnect();
    }

    fn send(&self, msg: &ProtocolMessage) -> anyhow::Result<()> {
        let mut msg = msg.clone();
        rewrite_message(&mut msg, &self.config.local_root, &self.config.remote_root);
        self.inner.send(&msg)
    }

    fn state(&self) -> TransportState {
        self.inner.state()
    }

    fn adapter_pid(&self) -> Option<libc::pid_t> {
        self.inner.adapter_pid()
    }
}

/// Rewrite every `source.path` in the message payload from one root
/// to the other.
fn rewrite_message(msg: &mut ProtocolMessage, from_root: &str, to_root: &str) {
    let value = match &mut msg.payload {
        Payload::Request(req) => req.arguments.as_mut(),
        Payload::Response(resp) => resp.body.as_mut(),
        Payload::Event(event) => event.body.as_mut(),
    };
    if let Some(value) = value {
        rewrite_source_paths(value, from_root, to_root);
    }
}

fn rewrite_source_paths(value: &mut Value, from_root: &str, to_root: &str) {
    match value {
        Value::Object(map) => {
            if let Some(Value::Object(source)) = map.get_mut("source") {
                if let Some(Value::String(path)) = source.get_mut("path") {
                    if let Some(rewritten) = swap_root(path, from_root, to_root) {
                        *path = rewritten;
                    }
                }
            }
            for (_, child) in map.iter_mut() {
                rewrite_source_paths(child, from_root, to_root);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                rewrite_source_paths(item, from_root, to_root);
            }
        }
        _ => {}
    }
}

/// Swap `from_root` for `to_root` at the front of `path`, requiring
/// a path-component boundary so `/ws2/a.js` is not mangled by a
/// `/ws` root.
fn swap_root(path: &str, from_root: &str, to_root: &str) -> Option<String> {
    let rest = path.strip_prefix(from_root)?;
    if rest.is_empty() {
        return Some(String::from(to_root));
    }
    if rest.starts_with('/') {
        return Some(format!("{to_root}{rest}"));
    }
    None
}

#[cfg(test)]
mod test {
    use logosdap_protocol::Request;

    use super::*;

    #[test]
    fn swap_root_cases() {
        let cases = vec![
            ("/ws/a.js", "/ws", "/remote/ws", Some("/remote/ws/a.js")),
            ("/ws", "/ws", "/remote/ws", Some("/remote/ws")),
            ("/ws2/a.js", "/ws", "/remote/ws", None),
            ("/other/a.js", "/ws", "/remote/ws", None),
        ];
        for (path, from, to, want) in cases {
            assert_eq!(swap_root(path, from, to), want.map(String::from), "path={path}");
        }
    }

    #[test]
    fn rewrites_nested_sources_both_directions() {
        let mut msg = ProtocolMessage {
            seq: 1,
            payload: Payload::Response(logosdap_protocol::Response {
                request_seq: 1,
                success: true,
                command: String::from("stackTrace"),
                message: None,
                body: Some(serde_json::json!({
                    "stackFrames": [
                        {"id": 1, "name": "main", "line": 3, "column": 1,
                         "source": {"path": "/remote/ws/a.js"}},
                        {"id": 2, "name": "helper", "line": 9, "column": 1,
                         "source": {"path": "/elsewhere/b.js"}}
                    ]
                })),
            }),
        };
        rewrite_message(&mut msg, "/remote/ws", "/ws");

        let Payload::Response(resp) = &msg.payload else { panic!("not a response") };
        let frames = &resp.body.as_ref().expect("a body")["stackFrames"];
        assert_eq!(frames[0]["source"]["path"], "/ws/a.js");
        // paths outside the mapped root pass through untouched
        assert_eq!(frames[1]["source"]["path"], "/elsewhere/b.js");
    }

    #[test]
    fn rewrites_outbound_set_breakpoints() {
        let mut msg = ProtocolMessage {
            seq: 4,
            payload: Payload::Request(Request {
                command: String::from("setBreakpoints"),
                arguments: Some(serde_json::json!({
                    "source": {"path": "/ws/src/main.py"},
                    "breakpoints": [{"line": 10}]
                })),
            }),
        };
        rewrite_message(&mut msg, "/ws", "/home/dev/ws");

        let Payload::Request(req) = &msg.payload else { panic!("not a request") };
        assert_eq!(
            req.arguments.as_ref().expect("arguments")["source"]["path"],
            "/home/dev/ws/src/main.py"
        );
    }
}
