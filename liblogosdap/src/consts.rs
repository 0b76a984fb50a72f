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

use std::time;

/// How long to wait for an adapter to answer a single request.
pub const REQUEST_TIMEOUT: time::Duration = time::Duration::from_secs(30);

/// How long to wait for a transport to reach the connected state.
pub const CONNECT_TIMEOUT: time::Duration = time::Duration::from_secs(10);

/// How long to wait for an adapter process to exit after a polite
/// shutdown before escalating to SIGKILL.
pub const ADAPTER_KILL_TIMEOUT: time::Duration = time::Duration::from_millis(500);

/// How long to wait for a terminated adapter to deliver its final
/// exited event before tearing the transport down anyway.
pub const TERMINATED_LINGER: time::Duration = time::Duration::from_millis(250);

pub const BUF_SIZE: usize = 1024 * 16;

/// Cap on the header block of a single DAP frame. Real headers are a
/// few dozen bytes, so anything bigger means the peer is not
/// speaking the protocol.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Cap on the body of a single DAP frame.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// How many entries the console history ring retains.
pub const CONSOLE_HISTORY_LIMIT: usize = 10_000;

/// Version stamped into freshly written launch.json files.
pub const LAUNCH_FILE_VERSION: &str = "0.2.0";

/// Directory under the workspace root where the broker persists its
/// launch configurations.
pub const LOGOS_CONFIG_DIR: &str = ".logos";
