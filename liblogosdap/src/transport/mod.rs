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
    io::Read,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::anyhow;
use logosdap_protocol::ProtocolMessage;

use crate::{consts, errors::BrokerError, wire};

mod exit_notify;
pub mod socket;
pub mod ssh;
pub mod stdio;

pub use exit_notify::{ExitNotifier, ExitStatus};

/// Everything a transport reports back to its owner. Events are
/// delivered on a crossbeam channel so the I/O threads inside a
/// transport never call into broker state directly.
#[derive(Debug)]
pub enum TransportEvent {
    /// One complete inbound DAP message.
    Message(ProtocolMessage),
    /// A line of stderr from a spawned adapter process.
    Stderr(String),
    /// A fatal transport failure (I/O error or framing violation).
    /// Always followed by `Closed`.
    Error(String),
    /// The byte stream is gone. For process-backed transports, the
    /// child's exit code or the signal that killed it.
    Closed { code: Option<i32>, signal: Option<i32> },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// The byte-stream contract every adapter connection satisfies.
///
/// `connect` is idempotent once connected. `disconnect` closes
/// unconditionally and is safe in any state. `send` only works in
/// the connected state and fails with
/// [`BrokerError::NotConnected`] otherwise.
pub trait Transport: Send {
    fn connect(
        &mut self,
        events: crossbeam_channel::Sender<TransportEvent>,
    ) -> anyhow::Result<()>;
    fn disconnect(&mut self);
    fn send(&self, msg: &ProtocolMessage) -> anyhow::Result<()>;
    fn state(&self) -> TransportState;

    /// The pid of the adapter process, for transports that own one.
    /// Used as a last resort when a session needs to make sure the
    /// adapter is really gone.
    fn adapter_pid(&self) -> Option<libc::pid_t> {
        None
    }
}

/// How to spawn an adapter child process.
#[derive(Debug, Clone, Default)]
pub struct SpawnSpec {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

/// Shared connection-state slot. Reader threads flip it on close or
/// error while callers probe it before sending.
#[derive(Clone, Debug)]
pub(crate) struct StateCell(Arc<Mutex<TransportState>>);

impl StateCell {
    pub(crate) fn new() -> Self {
        StateCell(Arc::new(Mutex::new(TransportState::Disconnected)))
    }

    pub(crate) fn get(&self) -> TransportState {
        *self.0.lock().unwrap()
    }

    pub(crate) fn set(&self, state: TransportState) {
        *self.0.lock().unwrap() = state;
    }

    pub(crate) fn ensure_connected(&self) -> anyhow::Result<()> {
        if self.get() != TransportState::Connected {
            return Err(anyhow!(BrokerError::NotConnected));
        }
        Ok(())
    }
}

/// The shared inner loop of every reader thread: read, feed the
/// decoder, emit complete frames. Returns `Ok(())` on a clean EOF
/// (or once the receiving side hangs up) and `Err` on an I/O or
/// framing failure, which the caller must treat as transport-fatal.
pub(crate) fn pump_frames<R>(
    mut r: R,
    events: &crossbeam_channel::Sender<TransportEvent>,
) -> anyhow::Result<()>
where
    R: Read,
{
    let mut decoder = wire::FrameDecoder::new();
    let mut buf = vec![0; consts::BUF_SIZE];
    loop {
        let nread = r.read(&mut buf)?;
        if nread == 0 {
            return Ok(());
        }
        decoder.feed(&buf[..nread]);
        while let Some(msg) = decoder.next_message()? {
            if events.send(TransportEvent::Message(msg)).is_err() {
                return Ok(());
            }
        }
    }
}
