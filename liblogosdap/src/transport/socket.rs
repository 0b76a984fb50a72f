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
    net::{Shutdown, TcpStream, ToSocketAddrs as _},
    sync::{Arc, Mutex},
    thread, time,
};

use anyhow::{anyhow, Context};
use logosdap_protocol::ProtocolMessage;
use tracing::{error, info, instrument, span, Level};

use super::{pump_frames, StateCell, Transport, TransportEvent, TransportState};
use crate::{consts, errors::BrokerError, wire};

/// A transport that dials a debug adapter already listening on a
/// TCP port (delve and friends run in this server mode).
pub struct SocketTransport {
    host: String,
    port: u16,
    connect_timeout: time::Duration,
    state: StateCell,
    stream: Option<Arc<Mutex<TcpStream>>>,
}

impl SocketTransport {
    pub fn new(host: String, port: u16) -> Self {
        SocketTransport {
            host,
            port,
            connect_timeout: consts::CONNECT_TIMEOUT,
            state: StateCell::new(),
            stream: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: time::Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Transport for SocketTransport {
    #[instrument(skip_all, fields(host = self.host, port = self.port))]
    fn connect(
        &mut self,
        events: crossbeam_channel::Sender<TransportEvent>,
    ) -> anyhow::Result<()> {
        if self.state.get() == TransportState::Connected {
            return Ok(());
        }
        self.state.set(TransportState::Connecting);

        let addr = format!("{}:{}", self.host, self.port);
        let mut addrs = addr
            .to_socket_addrs()
            .with_context(|| format!("resolving '{addr}'"))
            .map_err(|e| {
                self.state.set(TransportState::Error);
                e
            })?;
        let sockaddr = addrs.next().ok_or_else(|| {
            self.state.set(TransportState::Error);
            anyhow!(BrokerError::TransportError(format!("'{addr}' resolved to nothing")))
        })?;

        let stream = match TcpStream::connect_timeout(&sockaddr, self.connect_timeout) {
            Ok(s) => s,
            Err(e) => {
                self.state.set(TransportState::Error);
                return Err(anyhow!(BrokerError::TransportError(format!(
                    "dialing '{addr}': {e}"
                ))));
            }
        };
        stream.set_nodelay(true).context("setting TCP_NODELAY")?;
        info!("connected to adapter at {}", addr);

        let read_stream = stream.try_clone().context("cloning read stream")?;
        self.stream = Some(Arc::new(Mutex::new(stream)));
        self.state.set(TransportState::Connected);

        let state = self.state.clone();
        thread::spawn(move || {
            let _s = span!(Level::INFO, "adapter_sock", addr = addr).entered();

            match pump_frames(read_stream, &events) {
                Ok(()) => {
                    info!("adapter closed the connection");
                    state.set(TransportState::Disconnected);
                }
                Err(err) => {
                    error!("reading adapter socket: {:?}", err);
                    state.set(TransportState::Error);
                    let _ = events.send(TransportEvent::Error(format!("{err:?}")));
                }
            }
            let _ = events.send(TransportEvent::Closed { code: None, signal: None });
        });

        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let stream = stream.lock().unwrap();
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                info!("shutting down socket: {:?} (likely already closed)", e);
            }
        }
        if self.state.get() != TransportState::Error {
            self.state.set(TransportState::Disconnected);
        }
    }

    fn send(&self, msg: &ProtocolMessage) -> anyhow::Result<()> {
        self.state.ensure_connected()?;
        let stream = self.stream.as_ref().ok_or(anyhow!(BrokerError::NotConnected))?;
        let mut stream = stream.lock().unwrap();
        wire::encode_to(msg, &mut *stream).context("writing frame to adapter socket")?;
        Ok(())
    }

    fn state(&self) -> TransportState {
        self.state.get()
    }
}
