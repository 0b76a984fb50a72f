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

use std::{collections::HashMap, sync::Mutex};

use logosdap_protocol::{FunctionBreakpoint, SourceBreakpoint};

use crate::common;

/// What flavor of breakpoint a record is. Derived, never stored: a
/// log message makes it a logpoint, else a condition makes it
/// conditional, else it is a plain line breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointKind {
    Line,
    Conditional,
    Logpoint,
    Function,
    Exception,
    Data,
}

/// The user-settable knobs on a source breakpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BreakpointOptions {
    pub column: Option<i64>,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
}

/// A workspace breakpoint as the broker remembers it. This is the
/// canonical record; whatever the adapter thinks is reconciled from
/// it, never the other way around (except for `verified` and the
/// adapter's final say on `line`).
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceBreakpoint {
    pub id: String,
    pub path: String,
    /// 1-based.
    pub line: i64,
    pub column: Option<i64>,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
    pub enabled: bool,
    pub verified: bool,
}

impl WorkspaceBreakpoint {
    pub fn kind(&self) -> BreakpointKind {
        if self.log_message.is_some() {
            BreakpointKind::Logpoint
        } else if self.condition.is_some() {
            BreakpointKind::Conditional
        } else {
            BreakpointKind::Line
        }
    }

    fn to_source_breakpoint(&self) -> SourceBreakpoint {
        SourceBreakpoint {
            line: self.line,
            column: self.column,
            condition: self.condition.clone(),
            hit_condition: self.hit_condition.clone(),
            log_message: self.log_message.clone(),
        }
    }

    fn apply_options(&mut self, options: BreakpointOptions) {
        self.column = options.column;
        self.condition = options.condition;
        self.hit_condition = options.hit_condition;
        self.log_message = options.log_message;
        // the adapter has not seen this shape yet
        self.verified = false;
    }
}

/// A function breakpoint record, reconciled separately via
/// `setFunctionBreakpoints` on adapters that support them.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceFunctionBreakpoint {
    pub id: String,
    pub name: String,
    pub condition: Option<String>,
    pub enabled: bool,
    pub verified: bool,
}

impl WorkspaceFunctionBreakpoint {
    fn to_function_breakpoint(&self) -> FunctionBreakpoint {
        FunctionBreakpoint {
            name: self.name.clone(),
            condition: self.condition.clone(),
            hit_condition: None,
        }
    }
}

/// The effect a registry mutation had, so the caller knows what to
/// reconcile and what to announce.
#[derive(Debug, Clone, PartialEq)]
pub enum ToggleOutcome {
    Added(WorkspaceBreakpoint),
    Removed(String),
}

/// The workspace-global breakpoint store.
///
/// Breakpoints are keyed by source path and kept in insertion order
/// per file. The registry is pure state: scheduling the reconcile
/// round-trip against live sessions is the facade's job, which keeps
/// mutations cheap and always-local (breakpoints set with no
/// debugger running are simply remembered for the next session).
#[derive(Default)]
pub struct BreakpointRegistry {
    by_file: Mutex<HashMap<String, Vec<WorkspaceBreakpoint>>>,
    functions: Mutex<Vec<WorkspaceFunctionBreakpoint>>,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a breakpoint at `(path, line)`. If one already exists
    /// there it is updated in place (same id) rather than
    /// duplicated.
    pub fn set_line(
        &self,
        path: &str,
        line: i64,
        options: BreakpointOptions,
    ) -> WorkspaceBreakpoint {
        let mut by_file = self.by_file.lock().unwrap();
        let file_breakpoints = by_file.entry(String::from(path)).or_default();

        if let Some(existing) = file_breakpoints.iter_mut().find(|b| b.line == line) {
            existing.apply_options(options);
            return existing.clone();
        }

        let breakpoint = WorkspaceBreakpoint {
            id: common::unique_id(),
            path: String::from(path),
            line,
            column: options.column,
            condition: options.condition,
            hit_condition: options.hit_condition,
            log_message: options.log_message,
            enabled: true,
            verified: false,
        };
        file_breakpoints.push(breakpoint.clone());
        breakpoint
    }

    /// Remove by id, returning the removed record so the caller
    /// knows which file to reconcile.
    pub fn remove(&self, id: &str) -> Option<WorkspaceBreakpoint> {
        let mut by_file = self.by_file.lock().unwrap();
        for (_, file_breakpoints) in by_file.iter_mut() {
            if let Some(idx) = file_breakpoints.iter().position(|b| b.id == id) {
                return Some(file_breakpoints.remove(idx));
            }
        }
        None
    }

    /// Flip the enabled bit, returning the updated record.
    pub fn toggle_enabled(&self, id: &str) -> Option<WorkspaceBreakpoint> {
        let mut by_file = self.by_file.lock().unwrap();
        for (_, file_breakpoints) in by_file.iter_mut() {
            if let Some(b) = file_breakpoints.iter_mut().find(|b| b.id == id) {
                b.enabled = !b.enabled;
                if !b.enabled {
                    b.verified = false;
                }
                return Some(b.clone());
            }
        }
        None
    }

    /// The editor-gutter operation: remove the breakpoint at
    /// `(path, line)` if one exists, otherwise add a plain one.
    pub fn toggle_at_line(&self, path: &str, line: i64) -> ToggleOutcome {
        {
            let mut by_file = self.by_file.lock().unwrap();
            if let Some(file_breakpoints) = by_file.get_mut(path) {
                if let Some(idx) = file_breakpoints.iter().position(|b| b.line == line) {
                    let removed = file_breakpoints.remove(idx);
                    if file_breakpoints.is_empty() {
                        by_file.remove(path);
                    }
                    return ToggleOutcome::Removed(removed.id);
                }
            }
        }
        ToggleOutcome::Added(self.set_line(path, line, BreakpointOptions::default()))
    }

    /// Replace the options on an existing breakpoint.
    pub fn edit(&self, id: &str, options: BreakpointOptions) -> Option<WorkspaceBreakpoint> {
        let mut by_file = self.by_file.lock().unwrap();
        for (_, file_breakpoints) in by_file.iter_mut() {
            if let Some(b) = file_breakpoints.iter_mut().find(|b| b.id == id) {
                b.apply_options(options);
                return Some(b.clone());
            }
        }
        None
    }

    pub fn get_for_file(&self, path: &str) -> Vec<WorkspaceBreakpoint> {
        self.by_file.lock().unwrap().get(path).cloned().unwrap_or_default()
    }

    pub fn get_all(&self) -> Vec<WorkspaceBreakpoint> {
        let by_file = self.by_file.lock().unwrap();
        let mut all: Vec<WorkspaceBreakpoint> =
            by_file.values().flat_map(|v| v.iter().cloned()).collect();
        all.sort_by(|a, b| a.path.cmp(&b.path).then(a.line.cmp(&b.line)));
        all
    }

    /// Every path that has at least one breakpoint. Session startup
    /// reconciles each of these.
    pub fn files(&self) -> Vec<String> {
        self.by_file.lock().unwrap().keys().cloned().collect()
    }

    /// The wire shape for one file: only the enabled breakpoints, in
    /// insertion order.
    pub fn enabled_source_breakpoints(&self, path: &str) -> Vec<SourceBreakpoint> {
        self.by_file
            .lock()
            .unwrap()
            .get(path)
            .map(|file_breakpoints| {
                file_breakpoints
                    .iter()
                    .filter(|b| b.enabled)
                    .map(|b| b.to_source_breakpoint())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fold the adapter's `setBreakpoints` reply back into local
    /// state: `verified` always, and the line when the adapter moved
    /// the breakpoint. The reply lists results in the same order as
    /// the enabled breakpoints we transmitted. Returns the records
    /// that changed.
    pub fn apply_adapter_reply(
        &self,
        path: &str,
        reply: &[logosdap_protocol::Breakpoint],
    ) -> Vec<WorkspaceBreakpoint> {
        let mut by_file = self.by_file.lock().unwrap();
        let Some(file_breakpoints) = by_file.get_mut(path) else {
            return vec![];
        };

        let mut changed = vec![];
        let enabled = file_breakpoints.iter_mut().filter(|b| b.enabled);
        for (local, remote) in enabled.zip(reply.iter()) {
            let mut touched = false;
            if local.verified != remote.verified {
                local.verified = remote.verified;
                touched = true;
            }
            if let Some(line) = remote.line {
                if local.line != line {
                    local.line = line;
                    touched = true;
                }
            }
            if touched {
                changed.push(local.clone());
            }
        }
        changed
    }

    /// Find the record matching an adapter-reported breakpoint by
    /// `(path, line)` and update it in place, for `breakpoint`
    /// events that arrive outside a reconcile.
    pub fn apply_breakpoint_event(
        &self,
        remote: &logosdap_protocol::Breakpoint,
    ) -> Option<WorkspaceBreakpoint> {
        let path = remote.source.as_ref()?.path.as_deref()?;
        let line = remote.line?;
        let mut by_file = self.by_file.lock().unwrap();
        let file_breakpoints = by_file.get_mut(path)?;
        let local = file_breakpoints.iter_mut().find(|b| b.line == line)?;
        local.verified = remote.verified;
        Some(local.clone())
    }

    // ---- function breakpoints ----

    pub fn add_function_breakpoint(
        &self,
        name: &str,
        condition: Option<String>,
    ) -> WorkspaceFunctionBreakpoint {
        let breakpoint = WorkspaceFunctionBreakpoint {
            id: common::unique_id(),
            name: String::from(name),
            condition,
            enabled: true,
            verified: false,
        };
        self.functions.lock().unwrap().push(breakpoint.clone());
        breakpoint
    }

    pub fn remove_function_breakpoint(&self, id: &str) -> Option<WorkspaceFunctionBreakpoint> {
        let mut functions = self.functions.lock().unwrap();
        let idx = functions.iter().position(|b| b.id == id)?;
        Some(functions.remove(idx))
    }

    pub fn function_breakpoints(&self) -> Vec<WorkspaceFunctionBreakpoint> {
        self.functions.lock().unwrap().clone()
    }

    pub fn enabled_function_breakpoints(&self) -> Vec<FunctionBreakpoint> {
        self.functions
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.enabled)
            .map(|b| b.to_function_breakpoint())
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kind_is_derived() {
        let registry = BreakpointRegistry::new();
        let plain = registry.set_line("/ws/a.js", 1, BreakpointOptions::default());
        let conditional = registry.set_line(
            "/ws/a.js",
            2,
            BreakpointOptions { condition: Some(String::from("x > 1")), ..Default::default() },
        );
        let logpoint = registry.set_line(
            "/ws/a.js",
            3,
            BreakpointOptions {
                condition: Some(String::from("x > 1")),
                log_message: Some(String::from("x is {x}")),
                ..Default::default()
            },
        );
        assert_eq!(plain.kind(), BreakpointKind::Line);
        assert_eq!(conditional.kind(), BreakpointKind::Conditional);
        // a log message wins over a condition
        assert_eq!(logpoint.kind(), BreakpointKind::Logpoint);
    }

    #[test]
    fn set_then_toggle_returns_to_empty() {
        let registry = BreakpointRegistry::new();
        registry.set_line("/ws/a.js", 10, BreakpointOptions::default());
        assert_eq!(registry.get_for_file("/ws/a.js").len(), 1);

        let outcome = registry.toggle_at_line("/ws/a.js", 10);
        assert!(matches!(outcome, ToggleOutcome::Removed(_)));
        assert!(registry.get_for_file("/ws/a.js").is_empty());
        assert!(registry.get_all().is_empty());
    }

    #[test]
    fn set_line_never_duplicates_a_location() {
        let registry = BreakpointRegistry::new();
        let first = registry.set_line("/ws/a.js", 10, BreakpointOptions::default());
        let second = registry.set_line(
            "/ws/a.js",
            10,
            BreakpointOptions { condition: Some(String::from("i == 3")), ..Default::default() },
        );
        assert_eq!(first.id, second.id);
        let stored = registry.get_for_file("/ws/a.js");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].condition.as_deref(), Some("i == 3"));
    }

    #[test]
    fn per_file_order_is_insertion_order() {
        let registry = BreakpointRegistry::new();
        for line in [20, 5, 12] {
            registry.set_line("/ws/a.js", line, BreakpointOptions::default());
        }
        let lines: Vec<i64> =
            registry.get_for_file("/ws/a.js").iter().map(|b| b.line).collect();
        assert_eq!(lines, vec![20, 5, 12]);
    }

    #[test]
    fn disabled_breakpoints_stay_local() {
        let registry = BreakpointRegistry::new();
        let a = registry.set_line("/ws/a.js", 1, BreakpointOptions::default());
        registry.set_line("/ws/a.js", 2, BreakpointOptions::default());

        registry.toggle_enabled(&a.id).expect("toggle to find the breakpoint");
        let wire = registry.enabled_source_breakpoints("/ws/a.js");
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].line, 2);
        // still remembered locally
        assert_eq!(registry.get_for_file("/ws/a.js").len(), 2);
    }

    #[test]
    fn adapter_reply_updates_verified_and_line() {
        let registry = BreakpointRegistry::new();
        registry.set_line("/ws/a.js", 10, BreakpointOptions::default());
        registry.set_line("/ws/a.js", 30, BreakpointOptions::default());

        let reply = vec![
            logosdap_protocol::Breakpoint {
                verified: true,
                line: Some(10),
                ..Default::default()
            },
            logosdap_protocol::Breakpoint {
                verified: true,
                // the adapter slid this one to the next statement
                line: Some(31),
                ..Default::default()
            },
        ];
        let changed = registry.apply_adapter_reply("/ws/a.js", &reply);
        assert_eq!(changed.len(), 2);

        let stored = registry.get_for_file("/ws/a.js");
        assert!(stored.iter().all(|b| b.verified));
        assert_eq!(stored[1].line, 31);
    }

    #[test]
    fn breakpoint_event_locates_by_path_and_line() {
        let registry = BreakpointRegistry::new();
        registry.set_line("/ws/a.js", 10, BreakpointOptions::default());

        let updated = registry
            .apply_breakpoint_event(&logosdap_protocol::Breakpoint {
                verified: true,
                line: Some(10),
                source: Some(logosdap_protocol::Source {
                    path: Some(String::from("/ws/a.js")),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .expect("event to find the breakpoint");
        assert!(updated.verified);
    }

    #[test]
    fn function_breakpoints_round_trip() {
        let registry = BreakpointRegistry::new();
        let b = registry.add_function_breakpoint("main", None);
        assert_eq!(registry.enabled_function_breakpoints().len(), 1);
        registry.remove_function_breakpoint(&b.id).expect("removal to find it");
        assert!(registry.function_breakpoints().is_empty());
    }
}
