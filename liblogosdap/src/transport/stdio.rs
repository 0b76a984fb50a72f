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

use std::{
    io::{BufRead, BufReader},
    os::unix::process::ExitStatusExt as _,
    process,
    sync::{Arc, Mutex},
    thread,
};

use anyhow::{anyhow, Context};
use logosdap_protocol::ProtocolMessage;
use nix::{sys::signal, unistd::Pid};
use tracing::{error, info, instrument, span, warn, Level};

use super::{
    exit_notify::ExitStatus, pump_frames, ExitNotifier, SpawnSpec, StateCell, Transport,
    TransportEvent, TransportState,
};
use crate::{consts, errors::BrokerError, wire};

/// A transport that spawns the adapter as a child process and
/// speaks DAP over its piped stdio. The child's stderr is drained
/// line by line and surfaced as stderr output events.
pub struct StdioTransport {
    spawn: SpawnSpec,
    state: StateCell,
    stdin: Option<Arc<Mutex<process::ChildStdin>>>,
    child_pid: Option<libc::pid_t>,
    exit_notifier: Arc<ExitNotifier>,
}

impl StdioTransport {
    pub fn new(spawn: SpawnSpec) -> Self {
        StdioTransport {
            spawn,
            state: StateCell::new(),
            stdin: None,
            child_pid: None,
            exit_notifier: Arc::new(ExitNotifier::new()),
        }
    }
}

impl Transport for StdioTransport {
    #[instrument(skip_all, fields(cmd = self.spawn.command))]
    fn connect(
        &mut self,
        events: crossbeam_channel::Sender<TransportEvent>,
    ) -> anyhow::Result<()> {
        if self.state.get() == TransportState::Connected {
            return Ok(());
        }
        self.state.set(TransportState::Connecting);

        let mut cmd = process::Command::new(&self.spawn.command);
        cmd.args(&self.spawn.args)
            .stdin(process::Stdio::piped())
            .stdout(process::Stdio::piped())
            .stderr(process::Stdio::piped());
        if let Some(cwd) = &self.spawn.cwd {
            cmd.current_dir(cwd);
        }
        for (var, val) in &self.spawn.env {
            cmd.env(var, val);
        }

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                self.state.set(TransportState::Error);
                return Err(anyhow!(BrokerError::TransportError(format!(
                    "spawning '{}': {}",
                    self.spawn.command, e
                ))));
            }
        };
        let pid = child.id() as libc::pid_t;
        info!("spawned adapter process pid={}", pid);

        let stdin = child.stdin.take().ok_or(anyhow!("no stdin pipe on child"))?;
        let stdout = child.stdout.take().ok_or(anyhow!("no stdout pipe on child"))?;
        let stderr = child.stderr.take().ok_or(anyhow!("no stderr pipe on child"))?;

        self.stdin = Some(Arc::new(Mutex::new(stdin)));
        self.child_pid = Some(pid);
        self.state.set(TransportState::Connected);

        // stderr is not part of the framed stream, so it gets its
        // own drain thread that forwards whole lines.
        let stderr_events = events.clone();
        thread::spawn(move || {
            let _s = span!(Level::INFO, "adapter_stderr", pid = pid).entered();
            for line in BufReader::new(stderr).lines() {
                match line {
                    Ok(line) => {
                        if stderr_events.send(TransportEvent::Stderr(line)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        info!("stderr drain finished: {:?}", e);
                        break;
                    }
                }
            }
        });

        // The reader thread owns the child handle so it can reap the
        // process once the stdout stream runs dry.
        let state = self.state.clone();
        let exit_notifier = Arc::clone(&self.exit_notifier);
        thread::spawn(move || {
            let _s = span!(Level::INFO, "adapter_stdout", pid = pid).entered();

            let pump_res = pump_frames(stdout, &events);
            if let Err(err) = &pump_res {
                error!("reading adapter stdout: {:?}", err);
                state.set(TransportState::Error);
                let _ = events.send(TransportEvent::Error(format!("{err:?}")));
                // A framing violation leaves the child running with
                // an unusable stream, so take it down before waiting.
                let _ = signal::kill(Pid::from_raw(pid), Some(signal::Signal::SIGKILL));
            } else {
                state.set(TransportState::Disconnected);
            }

            let status = match child.wait() {
                Ok(status) => {
                    info!("adapter exited with {:?}", status);
                    ExitStatus { code: status.code(), signal: status.signal() }
                }
                Err(e) => {
                    warn!("waiting on adapter: {:?}", e);
                    ExitStatus { code: None, signal: None }
                }
            };
            exit_notifier.notify_exit(status);
            let _ =
                events.send(TransportEvent::Closed { code: status.code, signal: status.signal });
        });

        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(pid) = self.child_pid.take() {
            kill_adapter(pid, &self.exit_notifier);
        }
        self.stdin = None;
        if self.state.get() != TransportState::Error {
            self.state.set(TransportState::Disconnected);
        }
    }

    fn send(&self, msg: &ProtocolMessage) -> anyhow::Result<()> {
        self.state.ensure_connected()?;
        let stdin = self.stdin.as_ref().ok_or(anyhow!(BrokerError::NotConnected))?;
        let mut stdin = stdin.lock().unwrap();
        wire::encode_to(msg, &mut *stdin).context("writing frame to adapter stdin")?;
        Ok(())
    }

    fn state(&self) -> TransportState {
        self.state.get()
    }

    fn adapter_pid(&self) -> Option<libc::pid_t> {
        self.child_pid
    }
}

/// Politely stop an adapter process, escalating to SIGKILL if it
/// ignores the SIGTERM.
pub(crate) fn kill_adapter(pid: libc::pid_t, exit_notifier: &ExitNotifier) {
    if exit_notifier.wait(Some(std::time::Duration::ZERO)).is_some() {
        return; // already gone
    }

    if let Err(e) = signal::kill(Pid::from_raw(pid), Some(signal::Signal::SIGTERM)) {
        info!("SIGTERM to adapter {}: {:?} (likely already gone)", pid, e);
        return;
    }
    if exit_notifier.wait(Some(consts::ADAPTER_KILL_TIMEOUT)).is_none() {
        info!("adapter failed to exit within kill timeout, no longer being polite");
        if let Err(e) = signal::kill(Pid::from_raw(pid), Some(signal::Signal::SIGKILL)) {
            warn!("SIGKILL to adapter {}: {:?}", pid, e);
        }
    }
}
