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

use std::fmt;

/// The error kinds that callers can meaningfully branch on.
///
/// Most errors in the broker travel as `anyhow::Error` with context
/// strings, but some failure modes change caller behavior (a
/// `Timeout` leaves the session usable, a `TransportError` does
/// not), so those are flagged with a typed marker that can be
/// recovered with `downcast_ref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Connect failure, unexpected close, or framing/parse failure.
    /// Always fatal to the client; surfaces as session termination.
    TransportError(String),
    /// A send was attempted on a transport that is not connected.
    NotConnected,
    /// The adapter did not answer a request within the deadline.
    Timeout,
    /// The adapter answered with `success: false`.
    AdapterError(String),
    /// A capability gate rejected an optional command.
    Unsupported(String),
    /// The request was still outstanding when the client was stopped.
    SessionStopped,
    /// launch.json could not be parsed or did not match the schema.
    ConfigError(String),
    /// The adapter type is unknown or its executable is missing.
    AdapterNotFound(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::TransportError(msg) => write!(f, "transport error: {msg}"),
            BrokerError::NotConnected => write!(f, "transport is not connected"),
            BrokerError::Timeout => write!(f, "request timed out"),
            BrokerError::AdapterError(msg) => write!(f, "{msg}"),
            BrokerError::Unsupported(command) => {
                write!(f, "adapter does not support '{command}'")
            }
            BrokerError::SessionStopped => write!(f, "session stopped"),
            BrokerError::ConfigError(msg) => write!(f, "config error: {msg}"),
            BrokerError::AdapterNotFound(adapter) => {
                write!(f, "no usable debug adapter for '{adapter}'")
            }
        }
    }
}

impl std::error::Error for BrokerError {}

/// True if the given dynamic error is, at root, the given broker
/// error kind. Comparison is on the discriminant only so callers
/// don't have to reconstruct message payloads.
pub fn is_kind(err: &anyhow::Error, kind: &BrokerError) -> bool {
    err.downcast_ref::<BrokerError>()
        .map(|e| std::mem::discriminant(e) == std::mem::discriminant(kind))
        .unwrap_or(false)
}
