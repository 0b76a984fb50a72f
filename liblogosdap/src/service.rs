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
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    thread, time,
};

use anyhow::{anyhow, Context};
use logosdap_protocol::{
    ExceptionFilterOptions, RunInTerminalRequestArguments, RunInTerminalResponseBody, Scope,
    StackFrame, Thread, Variable,
};
use tracing::{info, instrument, span, warn, Level};

use crate::{
    adapters::{AdapterDescriptor, AdapterManager, DetectedDebugger},
    breakpoints::{
        BreakpointOptions, BreakpointRegistry, ToggleOutcome, WorkspaceBreakpoint,
        WorkspaceFunctionBreakpoint,
    },
    client::{Client, ClientEvent},
    common, config, consts,
    launch::{self, LaunchConfiguration, LaunchFile, LaunchSource, SubstitutionContext},
    session::{
        ExceptionFilterState, RestartOutcome, Session, SessionInfo, SessionState, SessionUpdate,
    },
    transport::ssh::SshTunnelConfig,
};

/// How a console history entry was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleKind {
    Output,
    Error,
    Command,
    Result,
}

#[derive(Debug, Clone)]
pub struct ConsoleEntry {
    pub session_id: String,
    pub kind: ConsoleKind,
    pub text: String,
    pub source_path: Option<String>,
    pub line: Option<i64>,
    pub at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct WatchExpression {
    pub id: String,
    pub expression: String,
    pub result: Option<String>,
    pub error: Option<String>,
}

/// Everything the front-end can observe. One event per state
/// transition, named stably for subscription filtering.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    SessionCreated(SessionInfo),
    SessionStateChanged { id: String, state: SessionState },
    SessionTerminated { id: String },
    Stopped {
        id: String,
        reason: String,
        thread_id: Option<i64>,
        all_threads_stopped: Option<bool>,
    },
    Continued {
        id: String,
        thread_id: i64,
        all_threads_continued: Option<bool>,
    },
    Output {
        id: String,
        category: String,
        text: String,
        source_path: Option<String>,
        line: Option<i64>,
    },
    BreakpointChanged(WorkspaceBreakpoint),
    BreakpointValidated(WorkspaceBreakpoint),
    BreakpointRemoved { id: String },
    WatchAdded(WatchExpression),
    WatchUpdated(WatchExpression),
    WatchRemoved { id: String },
    ConsoleMessage { id: String, entry: ConsoleEntry },
    StackTraceUpdated { id: String, thread_id: i64, frames: Vec<StackFrame> },
    ThreadsUpdated { id: String, threads: Vec<Thread> },
    ActiveSessionChanged { id: Option<String> },
}

impl BrokerEvent {
    /// The stable wire name used for subscription filters.
    pub fn name(&self) -> &'static str {
        match self {
            BrokerEvent::SessionCreated(_) => "sessionCreated",
            BrokerEvent::SessionStateChanged { .. } => "sessionStateChanged",
            BrokerEvent::SessionTerminated { .. } => "sessionTerminated",
            BrokerEvent::Stopped { .. } => "stopped",
            BrokerEvent::Continued { .. } => "continued",
            BrokerEvent::Output { .. } => "output",
            BrokerEvent::BreakpointChanged(_) => "breakpointChanged",
            BrokerEvent::BreakpointValidated(_) => "breakpointValidated",
            BrokerEvent::BreakpointRemoved { .. } => "breakpointRemoved",
            BrokerEvent::WatchAdded(_) => "watchAdded",
            BrokerEvent::WatchUpdated(_) => "watchUpdated",
            BrokerEvent::WatchRemoved { .. } => "watchRemoved",
            BrokerEvent::ConsoleMessage { .. } => "consoleMessage",
            BrokerEvent::StackTraceUpdated { .. } => "stackTraceUpdated",
            BrokerEvent::ThreadsUpdated { .. } => "threadsUpdated",
            BrokerEvent::ActiveSessionChanged { .. } => "activeSessionChanged",
        }
    }
}

type EventCallback = Box<dyn Fn(&BrokerEvent) + Send + Sync>;
type TerminalHandler = Arc<
    dyn Fn(RunInTerminalRequestArguments) -> anyhow::Result<RunInTerminalResponseBody>
        + Send
        + Sync,
>;

struct Subscriber {
    id: u64,
    /// None subscribes to everything.
    event_name: Option<String>,
    callback: EventCallback,
}

lazy_static::lazy_static! {
    static ref GLOBAL_SERVICE: Mutex<Option<Arc<DebugService>>> = Mutex::new(None);
}

/// The debug broker facade.
///
/// Aggregates every session, the workspace breakpoint registry, the
/// watch list, and the console history, and fans state transitions
/// out to subscribers. All shared state lives behind mutexes and is
/// only mutated by caller threads and each session's dispatcher
/// thread, so within one session everything the adapter does is
/// observed in arrival order.
pub struct DebugService {
    config: config::Config,
    adapters: AdapterManager,
    registry: BreakpointRegistry,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    active_session_id: Mutex<Option<String>>,
    watches: Mutex<Vec<WatchExpression>>,
    console: Mutex<VecDeque<ConsoleEntry>>,
    active_file: Mutex<Option<PathBuf>>,
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
    next_subscriber_id: AtomicU64,
    run_in_terminal: Mutex<Option<TerminalHandler>>,
}

impl DebugService {
    pub fn new(config: config::Config) -> Arc<Self> {
        let adapters = match AdapterManager::new(&config) {
            Ok(adapters) => adapters,
            Err(err) => {
                warn!("bad adapter overrides in config, using builtins: {err:#}");
                AdapterManager::new(&config::Config::default())
                    .expect("builtin adapter registry always builds")
            }
        };
        Arc::new(DebugService {
            config,
            adapters,
            registry: BreakpointRegistry::new(),
            sessions: Mutex::new(HashMap::new()),
            active_session_id: Mutex::new(None),
            watches: Mutex::new(vec![]),
            console: Mutex::new(VecDeque::new()),
            active_file: Mutex::new(None),
            subscribers: Mutex::new(vec![]),
            next_subscriber_id: AtomicU64::new(1),
            run_in_terminal: Mutex::new(None),
        })
    }

    /// The process-wide instance, created on first use. Nothing
    /// stops a caller from holding its own instance instead; the
    /// global is a convenience for embedders with exactly one
    /// workspace.
    pub fn global() -> Arc<DebugService> {
        let mut slot = GLOBAL_SERVICE.lock().unwrap();
        if let Some(service) = slot.as_ref() {
            return Arc::clone(service);
        }
        let config = config::read_config(&None).unwrap_or_else(|err| {
            warn!("reading broker config: {err:#}");
            config::Config::default()
        });
        let service = DebugService::new(config);
        *slot = Some(Arc::clone(&service));
        service
    }

    /// Stop every session and drop them. The instance remains
    /// usable afterwards.
    #[instrument(skip_all)]
    pub fn cleanup(&self) {
        let sessions: Vec<Arc<Session>> =
            self.sessions.lock().unwrap().values().cloned().collect();
        for session in sessions {
            self.stop_session_arc(&session);
        }
    }

    // ---- events ----

    /// Register a callback for one event name, or for everything
    /// when `event_name` is `None`. Delivery is synchronous on the
    /// thread that caused the transition.
    pub fn subscribe(&self, event_name: Option<&str>, callback: EventCallback) -> u64 {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().unwrap().push(Arc::new(Subscriber {
            id,
            event_name: event_name.map(String::from),
            callback,
        }));
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().unwrap().retain(|s| s.id != id);
    }

    fn emit(&self, event: BrokerEvent) {
        // snapshot, then invoke with the lock released: callbacks
        // are allowed to call back into the service
        let subscribers: Vec<Arc<Subscriber>> =
            self.subscribers.lock().unwrap().iter().cloned().collect();
        for subscriber in subscribers {
            let wants = subscriber
                .event_name
                .as_deref()
                .map(|name| name == event.name())
                .unwrap_or(true);
            if wants {
                (subscriber.callback)(&event);
            }
        }
    }

    /// Route `runInTerminal` to the front-end. Without a registered
    /// handler the request is refused, which adapters handle by
    /// falling back to running the debuggee themselves.
    pub fn set_run_in_terminal_handler(&self, handler: TerminalHandler) {
        *self.run_in_terminal.lock().unwrap() = Some(handler);
    }

    fn handle_run_in_terminal(
        &self,
        args: RunInTerminalRequestArguments,
    ) -> anyhow::Result<RunInTerminalResponseBody> {
        let handler = self.run_in_terminal.lock().unwrap().clone();
        match handler {
            Some(handler) => handler(args),
            None => Err(anyhow!("no terminal handler registered")),
        }
    }

    // ---- session lifecycle ----

    #[instrument(skip_all, fields(name = config.name, adapter = config.adapter_type))]
    pub fn start_session(
        self: &Arc<Self>,
        config: LaunchConfiguration,
        workspace_folder: &Path,
    ) -> anyhow::Result<SessionInfo> {
        let transport = match parse_ssh_tunnel(&config) {
            Some(tunnel) => self.adapters.create_ssh_transport(tunnel),
            None => self.adapters.create_transport(&config.adapter_type, workspace_folder)?,
        };

        let id = common::unique_id();
        let request_timeout = self
            .config
            .request_timeout_secs
            .map(time::Duration::from_secs)
            .unwrap_or(consts::REQUEST_TIMEOUT);
        let client =
            Client::new(id.clone(), transport).with_request_timeout(request_timeout);

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let terminal_service = Arc::clone(self);
        client.start(
            events_tx,
            Box::new(move |args| terminal_service.handle_run_in_terminal(args)),
        )?;

        let session = Arc::new(Session::new(
            id.clone(),
            config,
            workspace_folder.to_path_buf(),
            client,
        ));
        self.sessions.lock().unwrap().insert(id.clone(), Arc::clone(&session));
        {
            let mut active = self.active_session_id.lock().unwrap();
            if active.is_none() {
                *active = Some(id.clone());
                self.emit(BrokerEvent::ActiveSessionChanged { id: Some(id.clone()) });
            }
        }
        self.emit(BrokerEvent::SessionCreated(session.info()));

        // one dispatcher thread per session: it observes adapter
        // events in arrival order and is the only place follow-up
        // requests triggered by events are made from
        let dispatch_service = Arc::clone(self);
        let dispatch_session = Arc::clone(&session);
        thread::spawn(move || {
            let _s = span!(Level::INFO, "session_dispatch", s = dispatch_session.id).entered();
            for event in events_rx.iter() {
                let done = matches!(event, ClientEvent::TransportClosed { .. });
                let updates = dispatch_session.handle_event(event);
                dispatch_service.process_updates(&dispatch_session, updates);
                if done {
                    break;
                }
            }
            info!("session dispatcher finished");
        });

        let substitution = SubstitutionContext {
            workspace_folder: workspace_folder.to_path_buf(),
            active_file: self.get_active_file(),
        };
        match session.start(&self.registry, &substitution) {
            Ok(()) => {
                self.emit(BrokerEvent::SessionStateChanged {
                    id: id.clone(),
                    state: SessionState::Running,
                });
                Ok(session.info())
            }
            Err(err) => {
                self.forget_session(&id);
                self.emit(BrokerEvent::SessionTerminated { id });
                Err(err).context("starting debug session")
            }
        }
    }

    pub fn stop_session(&self, session_id: Option<&str>) -> anyhow::Result<()> {
        let session = self.session_or_active(session_id)?;
        self.stop_session_arc(&session);
        Ok(())
    }

    fn stop_session_arc(&self, session: &Arc<Session>) {
        let was_known = self.sessions.lock().unwrap().contains_key(&session.id);
        if session.stop() {
            self.emit(BrokerEvent::SessionStateChanged {
                id: session.id.clone(),
                state: SessionState::Terminated,
            });
        }
        self.forget_session(&session.id);
        if was_known {
            self.emit(BrokerEvent::SessionTerminated { id: session.id.clone() });
        }
    }

    /// Restart in place when the adapter supports it, otherwise a
    /// full stop/start cycle with the same configuration.
    pub fn restart_session(
        self: &Arc<Self>,
        session_id: Option<&str>,
    ) -> anyhow::Result<SessionInfo> {
        let session = self.session_or_active(session_id)?;
        match session.restart()? {
            RestartOutcome::Restarted => {
                self.emit(BrokerEvent::SessionStateChanged {
                    id: session.id.clone(),
                    state: SessionState::Running,
                });
                Ok(session.info())
            }
            RestartOutcome::NeedsFullCycle => {
                let config = session.launch_configuration().clone();
                let workspace_folder = session.workspace_folder.clone();
                self.stop_session_arc(&session);
                self.start_session(config, &workspace_folder)
            }
        }
    }

    pub fn get_sessions(&self) -> Vec<SessionInfo> {
        self.sessions.lock().unwrap().values().map(|s| s.info()).collect()
    }

    pub fn get_active_session(&self) -> Option<SessionInfo> {
        let active = self.active_session_id.lock().unwrap().clone()?;
        self.sessions.lock().unwrap().get(&active).map(|s| s.info())
    }

    pub fn set_active_session(&self, session_id: &str) -> anyhow::Result<()> {
        if !self.sessions.lock().unwrap().contains_key(session_id) {
            return Err(anyhow!("no session '{session_id}'"));
        }
        *self.active_session_id.lock().unwrap() = Some(String::from(session_id));
        self.emit(BrokerEvent::ActiveSessionChanged { id: Some(String::from(session_id)) });
        Ok(())
    }

    // ---- execution control ----

    pub fn continue_execution(&self, session_id: Option<&str>) -> anyhow::Result<()> {
        let session = self.session_or_active(session_id)?;
        let thread_id = session.current_thread_id();
        session.continue_execution()?;
        self.emit_resumed(&session, thread_id);
        Ok(())
    }

    pub fn pause(&self, session_id: Option<&str>) -> anyhow::Result<()> {
        self.session_or_active(session_id)?.pause()
    }

    pub fn step_over(&self, session_id: Option<&str>) -> anyhow::Result<()> {
        let session = self.session_or_active(session_id)?;
        let thread_id = session.current_thread_id();
        session.step_over()?;
        self.emit_resumed(&session, thread_id);
        Ok(())
    }

    pub fn step_into(&self, session_id: Option<&str>) -> anyhow::Result<()> {
        let session = self.session_or_active(session_id)?;
        let thread_id = session.current_thread_id();
        session.step_in()?;
        self.emit_resumed(&session, thread_id);
        Ok(())
    }

    pub fn step_out(&self, session_id: Option<&str>) -> anyhow::Result<()> {
        let session = self.session_or_active(session_id)?;
        let thread_id = session.current_thread_id();
        session.step_out()?;
        self.emit_resumed(&session, thread_id);
        Ok(())
    }

    pub fn restart_frame(
        &self,
        frame_id: i64,
        session_id: Option<&str>,
    ) -> anyhow::Result<()> {
        self.session_or_active(session_id)?.restart_frame(frame_id)
    }

    fn emit_resumed(&self, session: &Arc<Session>, thread_id: Option<i64>) {
        self.emit(BrokerEvent::SessionStateChanged {
            id: session.id.clone(),
            state: SessionState::Running,
        });
        self.emit(BrokerEvent::Continued {
            id: session.id.clone(),
            thread_id: thread_id.unwrap_or(0),
            all_threads_continued: None,
        });
    }

    // ---- breakpoints ----

    pub fn set_breakpoint(
        &self,
        path: &str,
        line: i64,
        options: BreakpointOptions,
    ) -> WorkspaceBreakpoint {
        let breakpoint = self.registry.set_line(path, line, options);
        self.emit(BrokerEvent::BreakpointChanged(breakpoint.clone()));
        self.reconcile_file(path);
        // reconcile may have updated verified/line
        self.registry
            .get_for_file(path)
            .into_iter()
            .find(|b| b.id == breakpoint.id)
            .unwrap_or(breakpoint)
    }

    pub fn remove_breakpoint(&self, breakpoint_id: &str) -> anyhow::Result<()> {
        let removed = self
            .registry
            .remove(breakpoint_id)
            .ok_or_else(|| anyhow!("no breakpoint '{breakpoint_id}'"))?;
        self.emit(BrokerEvent::BreakpointRemoved { id: removed.id.clone() });
        self.reconcile_file(&removed.path);
        Ok(())
    }

    pub fn toggle_breakpoint(&self, breakpoint_id: &str) -> anyhow::Result<WorkspaceBreakpoint> {
        let breakpoint = self
            .registry
            .toggle_enabled(breakpoint_id)
            .ok_or_else(|| anyhow!("no breakpoint '{breakpoint_id}'"))?;
        self.emit(BrokerEvent::BreakpointChanged(breakpoint.clone()));
        self.reconcile_file(&breakpoint.path);
        Ok(breakpoint)
    }

    pub fn toggle_breakpoint_at_line(&self, path: &str, line: i64) -> ToggleOutcome {
        let outcome = self.registry.toggle_at_line(path, line);
        match &outcome {
            ToggleOutcome::Added(breakpoint) => {
                self.emit(BrokerEvent::BreakpointChanged(breakpoint.clone()));
            }
            ToggleOutcome::Removed(id) => {
                self.emit(BrokerEvent::BreakpointRemoved { id: id.clone() });
            }
        }
        self.reconcile_file(path);
        outcome
    }

    pub fn edit_breakpoint(
        &self,
        breakpoint_id: &str,
        options: BreakpointOptions,
    ) -> anyhow::Result<WorkspaceBreakpoint> {
        let breakpoint = self
            .registry
            .edit(breakpoint_id, options)
            .ok_or_else(|| anyhow!("no breakpoint '{breakpoint_id}'"))?;
        self.emit(BrokerEvent::BreakpointChanged(breakpoint.clone()));
        self.reconcile_file(&breakpoint.path);
        Ok(breakpoint)
    }

    pub fn get_all_breakpoints(&self) -> Vec<WorkspaceBreakpoint> {
        self.registry.get_all()
    }

    pub fn get_breakpoints_for_file(&self, path: &str) -> Vec<WorkspaceBreakpoint> {
        self.registry.get_for_file(path)
    }

    pub fn add_function_breakpoint(
        &self,
        name: &str,
        condition: Option<String>,
    ) -> WorkspaceFunctionBreakpoint {
        let breakpoint = self.registry.add_function_breakpoint(name, condition);
        self.reconcile_function_breakpoints();
        breakpoint
    }

    pub fn remove_function_breakpoint(&self, breakpoint_id: &str) -> anyhow::Result<()> {
        self.registry
            .remove_function_breakpoint(breakpoint_id)
            .ok_or_else(|| anyhow!("no function breakpoint '{breakpoint_id}'"))?;
        self.reconcile_function_breakpoints();
        Ok(())
    }

    pub fn get_function_breakpoints(&self) -> Vec<WorkspaceFunctionBreakpoint> {
        self.registry.function_breakpoints()
    }

    pub fn set_exception_breakpoints(
        &self,
        filters: Vec<String>,
        filter_options: Option<Vec<ExceptionFilterOptions>>,
        session_id: Option<&str>,
    ) -> anyhow::Result<()> {
        self.session_or_active(session_id)?.set_exception_filters(filters, filter_options)
    }

    pub fn get_exception_filters(
        &self,
        session_id: Option<&str>,
    ) -> anyhow::Result<Vec<ExceptionFilterState>> {
        Ok(self.session_or_active(session_id)?.exception_filters())
    }

    /// Push one file's breakpoints to the active session.
    ///
    /// Reconcile failures are deliberately soft: the local registry
    /// keeps the breakpoints and they are retried on the next
    /// session start; the failure lands in the console history.
    fn reconcile_file(&self, path: &str) {
        let Some(session) = self.active_session() else {
            return;
        };
        if session.state() == SessionState::Terminated {
            return;
        }

        let wanted = self.registry.enabled_source_breakpoints(path);
        match session.client.set_breakpoints(path, wanted) {
            Ok(reply) => {
                for changed in self.registry.apply_adapter_reply(path, &reply) {
                    if changed.verified {
                        self.emit(BrokerEvent::BreakpointValidated(changed.clone()));
                    }
                    self.emit(BrokerEvent::BreakpointChanged(changed));
                }
            }
            Err(err) => {
                warn!("breakpoint sync for {path} failed: {err:#}");
                self.push_console(
                    &session.id,
                    ConsoleKind::Error,
                    format!("breakpoint sync for {path} failed: {err:#}\n"),
                    None,
                    None,
                );
            }
        }
    }

    fn reconcile_function_breakpoints(&self) {
        let Some(session) = self.active_session() else {
            return;
        };
        if session.state() == SessionState::Terminated {
            return;
        }
        let wanted = self.registry.enabled_function_breakpoints();
        if let Err(err) = session.client.set_function_breakpoints(wanted) {
            warn!("function breakpoint sync failed: {err:#}");
            self.push_console(
                &session.id,
                ConsoleKind::Error,
                format!("function breakpoint sync failed: {err:#}\n"),
                None,
                None,
            );
        }
    }

    // ---- inspection ----

    pub fn get_threads(&self, session_id: Option<&str>) -> anyhow::Result<Vec<Thread>> {
        self.session_or_active(session_id)?.threads()
    }

    pub fn get_stack_trace(
        &self,
        thread_id: i64,
        session_id: Option<&str>,
    ) -> anyhow::Result<Vec<StackFrame>> {
        self.session_or_active(session_id)?.stack_trace(thread_id)
    }

    pub fn get_scopes(
        &self,
        frame_id: i64,
        session_id: Option<&str>,
    ) -> anyhow::Result<Vec<Scope>> {
        self.session_or_active(session_id)?.scopes(frame_id)
    }

    pub fn get_variables(
        &self,
        variables_reference: i64,
        session_id: Option<&str>,
    ) -> anyhow::Result<Vec<Variable>> {
        self.session_or_active(session_id)?.variables(variables_reference)
    }

    pub fn set_variable(
        &self,
        variables_reference: i64,
        name: &str,
        value: &str,
        session_id: Option<&str>,
    ) -> anyhow::Result<logosdap_protocol::SetVariableResponseBody> {
        self.session_or_active(session_id)?.set_variable(variables_reference, name, value)
    }

    pub fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: &str,
        session_id: Option<&str>,
    ) -> anyhow::Result<logosdap_protocol::EvaluateResponseBody> {
        self.session_or_active(session_id)?.evaluate(expression, frame_id, context)
    }

    pub fn select_frame(&self, frame_id: i64, session_id: Option<&str>) -> anyhow::Result<()> {
        self.session_or_active(session_id)?.select_frame(frame_id)
    }

    // ---- watches ----

    pub fn add_watch(&self, expression: &str) -> WatchExpression {
        let watch = WatchExpression {
            id: common::unique_id(),
            expression: String::from(expression),
            result: None,
            error: None,
        };
        self.watches.lock().unwrap().push(watch.clone());
        self.emit(BrokerEvent::WatchAdded(watch.clone()));
        // a fresh watch only has something to show once the
        // debuggee is paused somewhere
        if let Some(session) = self.active_session() {
            if session.state() == SessionState::Stopped {
                self.refresh_watch_against(&session, &watch.id);
            }
        }
        self.watch_by_id(&watch.id).unwrap_or(watch)
    }

    pub fn remove_watch(&self, watch_id: &str) -> anyhow::Result<()> {
        let mut watches = self.watches.lock().unwrap();
        let before = watches.len();
        watches.retain(|w| w.id != watch_id);
        if watches.len() == before {
            return Err(anyhow!("no watch '{watch_id}'"));
        }
        drop(watches);
        self.emit(BrokerEvent::WatchRemoved { id: String::from(watch_id) });
        Ok(())
    }

    pub fn refresh_watch(&self, watch_id: &str) -> anyhow::Result<WatchExpression> {
        let session = self.session_or_active(None)?;
        self.refresh_watch_against(&session, watch_id);
        self.watch_by_id(watch_id).ok_or_else(|| anyhow!("no watch '{watch_id}'"))
    }

    pub fn refresh_all_watches(&self) {
        let Some(session) = self.active_session() else {
            return;
        };
        self.refresh_watches_for(&session);
    }

    pub fn get_watch_expressions(&self) -> Vec<WatchExpression> {
        self.watches.lock().unwrap().clone()
    }

    fn watch_by_id(&self, watch_id: &str) -> Option<WatchExpression> {
        self.watches.lock().unwrap().iter().find(|w| w.id == watch_id).cloned()
    }

    fn refresh_watches_for(&self, session: &Arc<Session>) {
        let ids: Vec<String> =
            self.watches.lock().unwrap().iter().map(|w| w.id.clone()).collect();
        for id in ids {
            self.refresh_watch_against(session, &id);
        }
    }

    /// Evaluate one watch in the session's current frame. The watch
    /// list lock is never held across the evaluate round-trip.
    fn refresh_watch_against(&self, session: &Arc<Session>, watch_id: &str) {
        let Some(expression) = self
            .watches
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.id == watch_id)
            .map(|w| w.expression.clone())
        else {
            return;
        };

        let outcome = session.evaluate(&expression, None, "watch");
        let mut watches = self.watches.lock().unwrap();
        let Some(watch) = watches.iter_mut().find(|w| w.id == watch_id) else {
            return; // removed while we were evaluating
        };
        match outcome {
            Ok(body) => {
                watch.result = Some(body.result);
                watch.error = None;
            }
            Err(err) => {
                watch.result = None;
                watch.error = Some(format!("{err:#}"));
            }
        }
        let updated = watch.clone();
        drop(watches);
        self.emit(BrokerEvent::WatchUpdated(updated));
    }

    // ---- console ----

    /// Run an expression in the adapter's REPL context, recording
    /// both the command and its result in the console history.
    pub fn execute_in_console(&self, command: &str) -> anyhow::Result<String> {
        let session = self.session_or_active(None)?;
        self.push_console(
            &session.id,
            ConsoleKind::Command,
            format!("{command}\n"),
            None,
            None,
        );
        match session.evaluate(command, None, "repl") {
            Ok(body) => {
                self.push_console(
                    &session.id,
                    ConsoleKind::Result,
                    format!("{}\n", body.result),
                    None,
                    None,
                );
                Ok(body.result)
            }
            Err(err) => {
                self.push_console(
                    &session.id,
                    ConsoleKind::Error,
                    format!("{err:#}\n"),
                    None,
                    None,
                );
                Err(err)
            }
        }
    }

    pub fn console_history(&self) -> Vec<ConsoleEntry> {
        self.console.lock().unwrap().iter().cloned().collect()
    }

    fn push_console(
        &self,
        session_id: &str,
        kind: ConsoleKind,
        text: String,
        source_path: Option<String>,
        line: Option<i64>,
    ) {
        let entry = ConsoleEntry {
            session_id: String::from(session_id),
            kind,
            text,
            source_path,
            line,
            at: chrono::Utc::now(),
        };
        {
            let mut console = self.console.lock().unwrap();
            console.push_back(entry.clone());
            while console.len() > consts::CONSOLE_HISTORY_LIMIT {
                console.pop_front();
            }
        }
        self.emit(BrokerEvent::ConsoleMessage { id: String::from(session_id), entry });
    }

    // ---- launch configuration ----

    pub fn read_launch_config(
        &self,
        workspace_folder: &Path,
    ) -> anyhow::Result<Option<(LaunchFile, LaunchSource)>> {
        launch::read_launch_file(workspace_folder)
    }

    pub fn write_launch_config(
        &self,
        workspace_folder: &Path,
        file: &LaunchFile,
    ) -> anyhow::Result<PathBuf> {
        launch::write_launch_file(workspace_folder, file)
    }

    pub fn get_default_launch_config(&self, adapter_type: &str) -> Vec<LaunchConfiguration> {
        launch::default_configurations(adapter_type)
    }

    pub fn auto_generate_configurations(
        &self,
        workspace_folder: &Path,
    ) -> Vec<LaunchConfiguration> {
        launch::auto_generate(workspace_folder)
    }

    pub fn import_from_vscode(&self, workspace_folder: &Path) -> anyhow::Result<LaunchFile> {
        launch::import_from_vscode(workspace_folder)
    }

    // ---- adapters ----

    pub fn get_available_adapters(&self) -> Vec<AdapterDescriptor> {
        self.adapters.available_adapters().to_vec()
    }

    pub fn get_installed_adapters(&self) -> Vec<AdapterDescriptor> {
        self.adapters.installed_adapters().into_iter().cloned().collect()
    }

    pub fn detect_debuggers(&self, workspace_folder: &Path) -> Vec<DetectedDebugger> {
        crate::adapters::detect_debuggers(workspace_folder)
    }

    // ---- active file (variable substitution input) ----

    pub fn set_active_file(&self, path: Option<PathBuf>) {
        *self.active_file.lock().unwrap() = path;
    }

    pub fn get_active_file(&self) -> Option<PathBuf> {
        self.active_file.lock().unwrap().clone()
    }

    // ---- internals ----

    fn active_session(&self) -> Option<Arc<Session>> {
        let active = self.active_session_id.lock().unwrap().clone()?;
        self.sessions.lock().unwrap().get(&active).cloned()
    }

    fn session_or_active(&self, session_id: Option<&str>) -> anyhow::Result<Arc<Session>> {
        match session_id {
            Some(id) => self
                .sessions
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| anyhow!("no session '{id}'")),
            None => self.active_session().ok_or_else(|| anyhow!("no active debug session")),
        }
    }

    /// Drop a session from the table, moving the active pointer to
    /// some other live session (or clearing it). The two locks are
    /// taken strictly one at a time; holding both here would invert
    /// the order the read paths use.
    fn forget_session(&self, session_id: &str) {
        let next = {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.remove(session_id);
            sessions.keys().next().cloned()
        };
        let changed = {
            let mut active = self.active_session_id.lock().unwrap();
            if active.as_deref() == Some(session_id) {
                *active = next.clone();
                true
            } else {
                false
            }
        };
        if changed {
            self.emit(BrokerEvent::ActiveSessionChanged { id: next });
        }
    }

    /// Apply the consequences of one adapter event batch. Runs on
    /// the session's dispatcher thread.
    fn process_updates(self: &Arc<Self>, session: &Arc<Session>, updates: Vec<SessionUpdate>) {
        for update in updates {
            match update {
                SessionUpdate::StateChanged(state) => {
                    self.emit(BrokerEvent::SessionStateChanged {
                        id: session.id.clone(),
                        state,
                    });
                    if state == SessionState::Terminated {
                        self.forget_session(&session.id);
                        self.emit(BrokerEvent::SessionTerminated { id: session.id.clone() });
                    }
                }
                SessionUpdate::Stopped { reason, thread_id, all_threads_stopped } => {
                    self.emit(BrokerEvent::Stopped {
                        id: session.id.clone(),
                        reason,
                        thread_id,
                        all_threads_stopped,
                    });
                }
                SessionUpdate::Continued { thread_id, all_threads_continued } => {
                    self.emit(BrokerEvent::Continued {
                        id: session.id.clone(),
                        thread_id,
                        all_threads_continued,
                    });
                }
                SessionUpdate::Output { category, text, source_path, line } => {
                    let kind = if category == "stderr" {
                        ConsoleKind::Error
                    } else {
                        ConsoleKind::Output
                    };
                    self.emit(BrokerEvent::Output {
                        id: session.id.clone(),
                        category,
                        text: text.clone(),
                        source_path: source_path.clone(),
                        line,
                    });
                    self.push_console(&session.id, kind, text, source_path, line);
                }
                SessionUpdate::BreakpointReported(remote) => {
                    if let Some(local) = self.registry.apply_breakpoint_event(&remote) {
                        if local.verified {
                            self.emit(BrokerEvent::BreakpointValidated(local.clone()));
                        }
                        self.emit(BrokerEvent::BreakpointChanged(local));
                    }
                }
                SessionUpdate::ThreadsChanged(threads) => {
                    self.emit(BrokerEvent::ThreadsUpdated { id: session.id.clone(), threads });
                }
                SessionUpdate::StackTrace { thread_id, frames } => {
                    self.emit(BrokerEvent::StackTraceUpdated {
                        id: session.id.clone(),
                        thread_id,
                        frames,
                    });
                }
                SessionUpdate::RefreshWatches => {
                    let is_active = self.active_session_id.lock().unwrap().as_deref()
                        == Some(session.id.as_str());
                    if is_active {
                        self.refresh_watches_for(session);
                    }
                }
                SessionUpdate::ScheduleStop => {
                    // give the adapter a moment to flush its final
                    // exited event before the transport goes away
                    let session = Arc::clone(session);
                    thread::spawn(move || {
                        thread::sleep(consts::TERMINATED_LINGER);
                        session.finish_termination();
                    });
                }
            }
        }
    }
}

/// An SSH tunnel spec carried inline in a launch configuration
/// under the `remote` key.
fn parse_ssh_tunnel(config: &LaunchConfiguration) -> Option<SshTunnelConfig> {
    let remote = config.rest.get("remote")?;
    Some(SshTunnelConfig {
        destination: remote.get("destination")?.as_str()?.to_string(),
        remote_host: remote
            .get("remoteHost")
            .and_then(|v| v.as_str())
            .unwrap_or("127.0.0.1")
            .to_string(),
        remote_port: remote.get("remotePort")?.as_u64()? as u16,
        local_root: remote.get("localRoot")?.as_str()?.to_string(),
        remote_root: remote.get("remoteRoot")?.as_str()?.to_string(),
    })
}
