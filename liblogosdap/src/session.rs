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

use std::{collections::HashMap, path::PathBuf, sync::Mutex};

use anyhow::{anyhow, Context};
use logosdap_protocol::{
    Capabilities, ExceptionFilterOptions, Scope, StackFrame, Thread, Variable,
};
use tracing::{info, instrument, warn};

use crate::{
    breakpoints::BreakpointRegistry,
    client::{Client, ClientEvent},
    consts,
    errors::BrokerError,
    launch::{self, LaunchConfiguration, SubstitutionContext},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Running,
    Stopped,
    Terminated,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Initializing => "initializing",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
            SessionState::Terminated => "terminated",
        }
    }
}

/// Per-session view of one exception-breakpoint filter, seeded from
/// the adapter's capabilities at session creation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionFilterState {
    pub filter_id: String,
    pub label: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub supports_condition: bool,
    pub condition: Option<String>,
}

/// The caller-facing summary of a session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub name: String,
    pub adapter_type: String,
    pub state: SessionState,
    pub current_thread_id: Option<i64>,
    pub current_frame_id: Option<i64>,
}

/// What a handled adapter event means for the rest of the broker.
/// The session mutates its own state and reports the consequences;
/// the facade turns these into subscriber events and follow-up work.
#[derive(Debug)]
pub enum SessionUpdate {
    StateChanged(SessionState),
    Stopped {
        reason: String,
        thread_id: Option<i64>,
        all_threads_stopped: Option<bool>,
    },
    Continued {
        thread_id: i64,
        all_threads_continued: Option<bool>,
    },
    Output {
        category: String,
        text: String,
        source_path: Option<String>,
        line: Option<i64>,
    },
    BreakpointReported(logosdap_protocol::Breakpoint),
    ThreadsChanged(Vec<Thread>),
    StackTrace {
        thread_id: i64,
        frames: Vec<StackFrame>,
    },
    RefreshWatches,
    /// A terminated event arrived. The transport should be allowed
    /// to deliver a final `exited` event before teardown.
    ScheduleStop,
}

/// The outcome of a restart request.
#[derive(Debug, PartialEq, Eq)]
pub enum RestartOutcome {
    /// The adapter supports in-place restart and did one.
    Restarted,
    /// The adapter can't restart; the caller must run a full
    /// stop/start cycle with the same configuration.
    NeedsFullCycle,
}

struct SessionCore {
    state: SessionState,
    threads: Vec<Thread>,
    current_thread_id: Option<i64>,
    current_frame_id: Option<i64>,
    /// Stack cache per thread, refreshed on every stop.
    stack_frames: HashMap<i64, Vec<StackFrame>>,
    exception_filters: Vec<ExceptionFilterState>,
}

/// One live debug session: a client, the adapter's capabilities,
/// and the state machine the front-end observes.
///
/// `current_frame_id` is only ever non-null while the state is
/// `Stopped`; every transition away from `Stopped` clears it.
/// `Terminated` is sticky: a restart on a dead session produces a
/// brand new session with a new id.
pub struct Session {
    pub id: String,
    pub name: String,
    pub adapter_type: String,
    pub workspace_folder: PathBuf,
    pub(crate) client: Client,
    config: LaunchConfiguration,
    core: Mutex<SessionCore>,
}

impl Session {
    pub fn new(
        id: String,
        config: LaunchConfiguration,
        workspace_folder: PathBuf,
        client: Client,
    ) -> Self {
        Session {
            id,
            name: config.name.clone(),
            adapter_type: config.adapter_type.clone(),
            workspace_folder,
            client,
            config,
            core: Mutex::new(SessionCore {
                state: SessionState::Initializing,
                threads: vec![],
                current_thread_id: None,
                current_frame_id: None,
                stack_frames: HashMap::new(),
                exception_filters: vec![],
            }),
        }
    }

    pub fn info(&self) -> SessionInfo {
        let core = self.core.lock().unwrap();
        SessionInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            adapter_type: self.adapter_type.clone(),
            state: core.state,
            current_thread_id: core.current_thread_id,
            current_frame_id: core.current_frame_id,
        }
    }

    pub fn state(&self) -> SessionState {
        self.core.lock().unwrap().state
    }

    pub fn current_thread_id(&self) -> Option<i64> {
        self.core.lock().unwrap().current_thread_id
    }

    pub fn current_frame_id(&self) -> Option<i64> {
        self.core.lock().unwrap().current_frame_id
    }

    pub fn capabilities(&self) -> Capabilities {
        self.client.capabilities()
    }

    /// Drive the handshake: initialize, launch/attach, breakpoint
    /// sync once the adapter says it is ready, configurationDone.
    /// Any failure tears the client down and fails the whole start.
    #[instrument(skip_all, fields(s = self.id))]
    pub fn start(
        &self,
        registry: &BreakpointRegistry,
        substitution: &SubstitutionContext,
    ) -> anyhow::Result<()> {
        let res = self.start_inner(registry, substitution);
        if let Err(err) = &res {
            warn!("session startup failed, tearing down: {err:?}");
            self.teardown();
        }
        res
    }

    fn start_inner(
        &self,
        registry: &BreakpointRegistry,
        substitution: &SubstitutionContext,
    ) -> anyhow::Result<()> {
        let capabilities =
            self.client.initialize(&self.adapter_type).context("initialize handshake")?;
        info!("adapter initialized, seeding {} exception filters", {
            capabilities.exception_breakpoint_filters.as_ref().map(Vec::len).unwrap_or(0)
        });
        {
            let mut core = self.core.lock().unwrap();
            core.exception_filters = capabilities
                .exception_breakpoint_filters
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(|f| ExceptionFilterState {
                    filter_id: f.filter.clone(),
                    label: f.label.clone(),
                    description: f.description.clone(),
                    enabled: f.default.unwrap_or(false),
                    supports_condition: f.supports_condition.unwrap_or(false),
                    condition: None,
                })
                .collect();
        }

        // Launch (or attach) goes out right away, but the response
        // stays pending: most adapters answer it only after
        // configurationDone. Only launch configs get variable
        // substitution.
        let mut config_value = self.config.to_value()?;
        if !self.config.is_attach() {
            launch::substitute_value(&mut config_value, substitution);
        }
        let launch_reply = if self.config.is_attach() {
            self.client.attach_deferred(config_value).context("sending attach")?
        } else {
            self.client.launch_deferred(config_value).context("sending launch")?
        };

        // Per the protocol, breakpoints may only be configured once
        // the adapter has announced readiness with `initialized`.
        if !self.client.wait_initialized(consts::REQUEST_TIMEOUT) {
            return Err(anyhow!(BrokerError::AdapterError(String::from(
                "adapter never sent the initialized event"
            ))));
        }

        self.sync_breakpoints(registry)?;
        self.sync_exception_filters().context("initial exception filter sync")?;

        if capabilities.supports_configuration_done_request.unwrap_or(false) {
            self.client.configuration_done().context("configurationDone")?;
        }

        launch_reply.wait().context("launch/attach reply")?;

        self.core.lock().unwrap().state = SessionState::Running;
        Ok(())
    }

    /// Reconcile every breakpoint-bearing file from the registry
    /// into the adapter.
    pub fn sync_breakpoints(&self, registry: &BreakpointRegistry) -> anyhow::Result<()> {
        for path in registry.files() {
            let reply = self
                .client
                .set_breakpoints(&path, registry.enabled_source_breakpoints(&path))
                .with_context(|| format!("syncing breakpoints for {path}"))?;
            registry.apply_adapter_reply(&path, &reply);
        }

        let function_breakpoints = registry.enabled_function_breakpoints();
        if !function_breakpoints.is_empty() {
            match self.client.set_function_breakpoints(function_breakpoints) {
                Ok(_) => {}
                Err(err) if crate::errors::is_kind(&err, &unsupported()) => {
                    info!("adapter has no function breakpoint support, keeping them local");
                }
                Err(err) => return Err(err).context("syncing function breakpoints"),
            }
        }
        Ok(())
    }

    /// Push the currently enabled exception filters to the adapter.
    pub fn sync_exception_filters(&self) -> anyhow::Result<()> {
        let (filters, filter_options) = {
            let core = self.core.lock().unwrap();
            if core.exception_filters.is_empty() {
                return Ok(());
            }
            let enabled: Vec<&ExceptionFilterState> =
                core.exception_filters.iter().filter(|f| f.enabled).collect();
            let filters: Vec<String> =
                enabled.iter().map(|f| f.filter_id.clone()).collect();
            let options: Vec<ExceptionFilterOptions> = enabled
                .iter()
                .filter(|f| f.supports_condition)
                .map(|f| ExceptionFilterOptions {
                    filter_id: f.filter_id.clone(),
                    condition: f.condition.clone(),
                })
                .collect();
            (filters, if options.is_empty() { None } else { Some(options) })
        };
        self.client.set_exception_breakpoints(filters, filter_options)
    }

    pub fn exception_filters(&self) -> Vec<ExceptionFilterState> {
        self.core.lock().unwrap().exception_filters.clone()
    }

    /// Enable exactly the given filters (optionally with
    /// conditions) and reconcile.
    pub fn set_exception_filters(
        &self,
        enabled_filter_ids: Vec<String>,
        filter_options: Option<Vec<ExceptionFilterOptions>>,
    ) -> anyhow::Result<()> {
        {
            let mut core = self.core.lock().unwrap();
            for filter in core.exception_filters.iter_mut() {
                filter.enabled = enabled_filter_ids.contains(&filter.filter_id);
                filter.condition = filter_options
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .find(|o| o.filter_id == filter.filter_id)
                    .and_then(|o| o.condition.clone());
            }
        }
        self.sync_exception_filters()
    }

    // ---- execution control ----

    pub fn continue_execution(&self) -> anyhow::Result<()> {
        let thread_id = self.require_thread()?;
        let body = self.client.continue_thread(thread_id)?;
        self.apply_continued(thread_id, body.all_threads_continued);
        Ok(())
    }

    pub fn pause(&self) -> anyhow::Result<()> {
        let thread_id = self.current_thread_id().or_else(|| {
            self.core.lock().unwrap().threads.first().map(|t| t.id)
        });
        self.client.pause(thread_id.unwrap_or(1))
    }

    pub fn step_over(&self) -> anyhow::Result<()> {
        let thread_id = self.require_thread()?;
        self.client.step_over(thread_id)?;
        self.apply_continued(thread_id, None);
        Ok(())
    }

    pub fn step_in(&self) -> anyhow::Result<()> {
        let thread_id = self.require_thread()?;
        self.client.step_in(thread_id)?;
        self.apply_continued(thread_id, None);
        Ok(())
    }

    pub fn step_out(&self) -> anyhow::Result<()> {
        let thread_id = self.require_thread()?;
        self.client.step_out(thread_id)?;
        self.apply_continued(thread_id, None);
        Ok(())
    }

    pub fn restart_frame(&self, frame_id: i64) -> anyhow::Result<()> {
        self.client.restart_frame(frame_id)
    }

    /// In-place restart when the adapter can do one; otherwise tell
    /// the caller to cycle the whole session.
    pub fn restart(&self) -> anyhow::Result<RestartOutcome> {
        if !self.capabilities().supports_restart_request.unwrap_or(false) {
            return Ok(RestartOutcome::NeedsFullCycle);
        }
        self.client.restart(self.config.to_value()?)?;
        {
            let mut core = self.core.lock().unwrap();
            core.state = SessionState::Running;
            core.current_frame_id = None;
            core.current_thread_id = None;
            core.stack_frames.clear();
        }
        Ok(RestartOutcome::Restarted)
    }

    pub fn launch_configuration(&self) -> &LaunchConfiguration {
        &self.config
    }

    // ---- inspection ----

    pub fn threads(&self) -> anyhow::Result<Vec<Thread>> {
        let threads = self.client.threads()?;
        self.core.lock().unwrap().threads = threads.clone();
        Ok(threads)
    }

    pub fn stack_trace(&self, thread_id: i64) -> anyhow::Result<Vec<StackFrame>> {
        let body = self.client.stack_trace(thread_id)?;
        self.core.lock().unwrap().stack_frames.insert(thread_id, body.stack_frames.clone());
        Ok(body.stack_frames)
    }

    pub fn scopes(&self, frame_id: i64) -> anyhow::Result<Vec<Scope>> {
        self.client.scopes(frame_id)
    }

    pub fn variables(&self, variables_reference: i64) -> anyhow::Result<Vec<Variable>> {
        self.client.variables(variables_reference)
    }

    pub fn set_variable(
        &self,
        variables_reference: i64,
        name: &str,
        value: &str,
    ) -> anyhow::Result<logosdap_protocol::SetVariableResponseBody> {
        self.client.set_variable(variables_reference, name, value)
    }

    pub fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: &str,
    ) -> anyhow::Result<logosdap_protocol::EvaluateResponseBody> {
        let frame_id = frame_id.or_else(|| self.current_frame_id());
        self.client.evaluate(expression, frame_id, context)
    }

    /// Point the session at one of the cached frames. Only legal
    /// while stopped.
    pub fn select_frame(&self, frame_id: i64) -> anyhow::Result<()> {
        let mut core = self.core.lock().unwrap();
        if core.state != SessionState::Stopped {
            return Err(anyhow!("cannot select a frame while the debuggee is running"));
        }
        core.current_frame_id = Some(frame_id);
        Ok(())
    }

    // ---- lifecycle ----

    /// Stop policy: try a graceful `terminate` (which itself falls
    /// back to `disconnect`), then drop the client and make sure the
    /// adapter process is really gone. Errors on the way down are
    /// logged and swallowed. Returns false if the session was
    /// already terminated.
    #[instrument(skip_all, fields(s = self.id))]
    pub fn stop(&self) -> bool {
        {
            let core = self.core.lock().unwrap();
            if core.state == SessionState::Terminated {
                return false;
            }
        }
        if let Err(err) = self.client.terminate() {
            info!("graceful terminate failed (continuing teardown): {err:#}");
        }
        self.teardown();
        true
    }

    /// Final teardown once a terminated adapter has had its linger
    /// window to flush a trailing `exited` event.
    pub(crate) fn finish_termination(&self) {
        self.teardown();
    }

    fn teardown(&self) {
        // stopping the client disconnects the transport, and a
        // process-backed transport escalates to SIGKILL on a child
        // that ignores the shutdown
        self.client.stop();
        let mut core = self.core.lock().unwrap();
        core.state = SessionState::Terminated;
        core.current_frame_id = None;
        core.current_thread_id = None;
        core.stack_frames.clear();
    }

    fn require_thread(&self) -> anyhow::Result<i64> {
        self.current_thread_id()
            .or_else(|| self.core.lock().unwrap().threads.first().map(|t| t.id))
            .ok_or_else(|| anyhow!("no thread to operate on"))
    }

    fn apply_continued(&self, _thread_id: i64, _all_threads: Option<bool>) {
        let mut core = self.core.lock().unwrap();
        core.state = SessionState::Running;
        core.current_frame_id = None;
    }

    /// React to one adapter event. Runs on the session's dispatcher
    /// thread, which is allowed to issue follow-up requests (the
    /// client pump completes them independently).
    #[instrument(skip_all, fields(s = self.id))]
    pub fn handle_event(&self, event: ClientEvent) -> Vec<SessionUpdate> {
        match event {
            ClientEvent::Initialized => vec![],
            ClientEvent::Stopped(body) => self.handle_stopped(body),
            ClientEvent::Continued(body) => {
                let mut core = self.core.lock().unwrap();
                if core.state == SessionState::Running {
                    // we already transitioned on the continue
                    // response; nothing new to announce
                    return vec![];
                }
                core.state = SessionState::Running;
                core.current_frame_id = None;
                vec![
                    SessionUpdate::StateChanged(SessionState::Running),
                    SessionUpdate::Continued {
                        thread_id: body.thread_id,
                        all_threads_continued: body.all_threads_continued,
                    },
                ]
            }
            ClientEvent::Terminated(_) => {
                let already_terminated = {
                    let mut core = self.core.lock().unwrap();
                    let was = core.state == SessionState::Terminated;
                    core.state = SessionState::Terminated;
                    core.current_frame_id = None;
                    was
                };
                if already_terminated {
                    vec![]
                } else {
                    vec![
                        SessionUpdate::StateChanged(SessionState::Terminated),
                        SessionUpdate::ScheduleStop,
                    ]
                }
            }
            ClientEvent::Exited(body) => vec![SessionUpdate::Output {
                category: String::from("console"),
                text: format!("debuggee exited with code {}\n", body.exit_code),
                source_path: None,
                line: None,
            }],
            ClientEvent::Output(body) => vec![SessionUpdate::Output {
                category: body.category.unwrap_or_else(|| String::from("console")),
                text: body.output,
                source_path: body.source.and_then(|s| s.path),
                line: body.line,
            }],
            ClientEvent::Breakpoint(body) => {
                vec![SessionUpdate::BreakpointReported(body.breakpoint)]
            }
            ClientEvent::Thread(_) => match self.threads() {
                Ok(threads) => vec![SessionUpdate::ThreadsChanged(threads)],
                Err(err) => {
                    warn!("refreshing threads after thread event: {err:#}");
                    vec![]
                }
            },
            ClientEvent::Capabilities(_body) => {
                // late capability updates exist in the protocol but
                // the broker gates on the initialize-time snapshot
                info!("ignoring late capabilities event");
                vec![]
            }
            ClientEvent::TransportError(err) => vec![SessionUpdate::Output {
                category: String::from("stderr"),
                text: format!("transport error: {err}\n"),
                source_path: None,
                line: None,
            }],
            ClientEvent::TransportClosed { code, signal } => {
                info!("transport closed (code={code:?} signal={signal:?})");
                let was_terminated = self.state() == SessionState::Terminated;
                self.teardown();
                if was_terminated {
                    vec![]
                } else {
                    vec![SessionUpdate::StateChanged(SessionState::Terminated)]
                }
            }
            ClientEvent::Module(_)
            | ClientEvent::LoadedSource(_)
            | ClientEvent::Process(_)
            | ClientEvent::ProgressStart(_)
            | ClientEvent::ProgressUpdate(_)
            | ClientEvent::ProgressEnd(_)
            | ClientEvent::Invalidated(_)
            | ClientEvent::Memory(_)
            | ClientEvent::Other { .. } => vec![],
        }
    }

    fn handle_stopped(
        &self,
        body: logosdap_protocol::StoppedEventBody,
    ) -> Vec<SessionUpdate> {
        {
            let mut core = self.core.lock().unwrap();
            core.state = SessionState::Stopped;
            core.current_thread_id = body.thread_id.or(core.current_thread_id);
        }

        let mut updates = vec![
            SessionUpdate::StateChanged(SessionState::Stopped),
            SessionUpdate::Stopped {
                reason: body.reason,
                thread_id: body.thread_id,
                all_threads_stopped: body.all_threads_stopped,
            },
        ];

        if let Some(thread_id) = body.thread_id {
            match self.stack_trace(thread_id) {
                Ok(frames) => {
                    {
                        let mut core = self.core.lock().unwrap();
                        core.current_frame_id = frames.first().map(|f| f.id);
                    }
                    updates.push(SessionUpdate::StackTrace { thread_id, frames });
                }
                Err(err) => warn!("fetching stack after stop: {err:#}"),
            }
        }

        updates.push(SessionUpdate::RefreshWatches);
        updates
    }
}

fn unsupported() -> BrokerError {
    BrokerError::Unsupported(String::new())
}
