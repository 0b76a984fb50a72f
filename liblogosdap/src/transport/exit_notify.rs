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
    sync::{Condvar, Mutex},
    time::Duration,
};

/// The final fate of an adapter child process: the exit code if it
/// exited, or the signal that killed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

/// A one-shot slot the reader thread fills in when the adapter
/// process goes away, so that other threads can block on the exit
/// without holding a handle to the child.
#[derive(Debug, Default)]
pub struct ExitNotifier {
    slot: Mutex<Option<ExitStatus>>,
    cond: Condvar,
}

impl ExitNotifier {
    pub fn new() -> Self {
        ExitNotifier { slot: Mutex::new(None), cond: Condvar::new() }
    }

    /// Notify all waiters that the process has exited.
    pub fn notify_exit(&self, status: ExitStatus) {
        let mut slot = self.slot.lock().unwrap();
        *slot = Some(status);
        self.cond.notify_all();
    }

    /// Wait for the process to exit, with an optional timeout to
    /// allow the caller to wake up periodically.
    pub fn wait(&self, timeout: Option<Duration>) -> Option<ExitStatus> {
        let slot = self.slot.lock().unwrap();

        // A thread waiting on an already-exited child should return
        // immediately rather than block on a notify that already
        // happened.
        if slot.is_some() {
            return *slot;
        }

        match timeout {
            Some(t) => {
                // returns a lock result, so we want to unwrap
                // to propagate the lock poisoning
                let (status, wait_res) =
                    self.cond.wait_timeout_while(slot, t, |status| status.is_none()).unwrap();
                if wait_res.timed_out() { None } else { *status }
            }
            None => *self.cond.wait_while(slot, |status| status.is_none()).unwrap(),
        }
    }
}
