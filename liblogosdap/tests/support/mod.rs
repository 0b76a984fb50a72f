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

use std::{collections::HashMap, sync::Arc, time};

use liblogosdap::{
    config::{AdapterOverride, Config},
    launch::LaunchConfiguration,
    service::{BrokerEvent, DebugService},
};

pub mod mock_adapter;

/// Build a service whose `go` adapter dials the mock instead of a
/// real delve.
pub fn service_for_mock(port: u16, request_timeout_secs: Option<u64>) -> Arc<DebugService> {
    let mut adapters = HashMap::new();
    adapters.insert(
        String::from("go"),
        AdapterOverride {
            command: None,
            host: Some(String::from("127.0.0.1")),
            port: Some(port),
        },
    );
    DebugService::new(Config {
        request_timeout_secs,
        connect_timeout_secs: Some(2),
        adapters: Some(adapters),
    })
}

/// A minimal launch configuration routed at the mock adapter.
pub fn mock_launch_config(name: &str) -> LaunchConfiguration {
    let serde_json::Value::Object(rest) = serde_json::json!({
        "program": "${workspaceFolder}/main.go",
    }) else {
        unreachable!()
    };
    LaunchConfiguration {
        adapter_type: String::from("go"),
        request: String::from("launch"),
        name: String::from(name),
        rest,
    }
}

/// Mirror every broker event into a channel the test can block on.
pub fn subscribe_channel(
    service: &Arc<DebugService>,
) -> crossbeam_channel::Receiver<BrokerEvent> {
    let (tx, rx) = crossbeam_channel::unbounded();
    service.subscribe(
        None,
        Box::new(move |event| {
            let _ = tx.send(event.clone());
        }),
    );
    rx
}

/// Drain events until one matches, returning everything seen on the
/// way (matching event included, last).
pub fn wait_for_event(
    rx: &crossbeam_channel::Receiver<BrokerEvent>,
    timeout: time::Duration,
    pred: impl Fn(&BrokerEvent) -> bool,
) -> Vec<BrokerEvent> {
    let deadline = time::Instant::now() + timeout;
    let mut seen = vec![];
    loop {
        let remaining = deadline
            .checked_duration_since(time::Instant::now())
            .unwrap_or_else(|| panic!("timed out waiting for event; saw {seen:?}"));
        match rx.recv_timeout(remaining) {
            Ok(event) => {
                let hit = pred(&event);
                seen.push(event);
                if hit {
                    return seen;
                }
            }
            Err(_) => panic!("timed out waiting for event; saw {seen:?}"),
        }
    }
}

pub fn count_events(seen: &[BrokerEvent], name: &str) -> usize {
    seen.iter().filter(|e| e.name() == name).count()
}
