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
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc, Condvar, Mutex,
    },
    thread, time,
};

use anyhow::{anyhow, Context};
use logosdap_protocol::{
    BreakpointEventBody, Breakpoint, Capabilities, CapabilitiesEventBody, ContinueResponseBody,
    ContinuedEventBody, EvaluateArguments, EvaluateResponseBody, Event, ExceptionFilterOptions,
    ExitedEventBody, FunctionBreakpoint, InitializeRequestArguments, OutputEventBody, Payload,
    ProcessEventBody, ProtocolMessage, Request, Response, RunInTerminalRequestArguments,
    RunInTerminalResponseBody, Scope, SetBreakpointsArguments, SetBreakpointsResponseBody,
    SetExceptionBreakpointsArguments, SetFunctionBreakpointsArguments, SetVariableResponseBody,
    ScopesResponseBody, Source, SourceBreakpoint, StackTraceArguments, StackTraceResponseBody,
    StoppedEventBody, TerminatedEventBody, Thread, ThreadEventBody, ThreadsResponseBody,
    VariablesResponseBody, Variable,
};
use serde_json::Value;
use tracing::{debug, info, instrument, span, warn, Level};

use crate::{
    consts,
    errors::BrokerError,
    transport::{Transport, TransportEvent},
};

/// Adapter traffic decoded into the events the session layer cares
/// about. Unknown event names pass through as `Other` rather than
/// being dropped, since adapters routinely ship custom events.
#[derive(Debug)]
pub enum ClientEvent {
    Initialized,
    Stopped(StoppedEventBody),
    Continued(ContinuedEventBody),
    Terminated(TerminatedEventBody),
    Exited(ExitedEventBody),
    Output(OutputEventBody),
    Breakpoint(BreakpointEventBody),
    Thread(ThreadEventBody),
    Module(Value),
    LoadedSource(Value),
    Process(ProcessEventBody),
    Capabilities(CapabilitiesEventBody),
    ProgressStart(Value),
    ProgressUpdate(Value),
    ProgressEnd(Value),
    Invalidated(Value),
    Memory(Value),
    Other { event: String, body: Option<Value> },
    /// Fatal transport failure. Always followed by `TransportClosed`.
    TransportError(String),
    /// The adapter connection is gone for good.
    TransportClosed { code: Option<i32>, signal: Option<i32> },
}

/// Handles `runInTerminal` on behalf of the client. The broker
/// itself has no terminal to offer, so the request is routed out to
/// whoever owns the UI.
pub type RunInTerminalHandler = Box<
    dyn Fn(RunInTerminalRequestArguments) -> anyhow::Result<RunInTerminalResponseBody>
        + Send
        + Sync,
>;

struct PendingRequest {
    command: String,
    reply: crossbeam_channel::Sender<anyhow::Result<Response>>,
    sent_at: time::Instant,
}

/// A request that has been transmitted but not yet awaited. Lets a
/// caller interleave other protocol traffic before collecting the
/// response; the launch handshake needs this because most adapters
/// hold the `launch` response until after `configurationDone`.
pub struct PendingReply {
    seq: i64,
    command: String,
    rx: crossbeam_channel::Receiver<anyhow::Result<Response>>,
    pending: Arc<Mutex<HashMap<i64, PendingRequest>>>,
    timeout: time::Duration,
}

impl PendingReply {
    /// Block until the response arrives, the timeout fires, or the
    /// client is stopped.
    pub fn wait(self) -> anyhow::Result<Response> {
        match self.rx.recv_timeout(self.timeout) {
            Ok(res) => interpret_response(&self.command, res?),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                // nobody is going to complete this entry now, so
                // clean it up ourselves
                self.pending.lock().unwrap().remove(&self.seq);
                Err(anyhow!(BrokerError::Timeout))
                    .with_context(|| format!("request '{}' (seq {})", self.command, self.seq))
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Err(anyhow!(BrokerError::SessionStopped))
            }
        }
    }
}

/// A one-shot flag threads can block on, used to wait out the gap
/// between sending `launch` and the adapter's `initialized` event.
#[derive(Default)]
struct FlagNotifier {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl FlagNotifier {
    fn set(&self) {
        let mut flag = self.flag.lock().unwrap();
        *flag = true;
        self.cond.notify_all();
    }

    fn wait(&self, timeout: time::Duration) -> bool {
        let flag = self.flag.lock().unwrap();
        if *flag {
            return true;
        }
        let (flag, res) =
            self.cond.wait_timeout_while(flag, timeout, |flag| !*flag).unwrap();
        !res.timed_out() && *flag
    }
}

/// The per-adapter request/response multiplexer.
///
/// One client owns one transport. Outbound requests get a sequence
/// number from a single counter and park a one-shot reply channel in
/// the pending map; the pump thread matches inbound responses back
/// to those channels by `request_seq`. A sequence number is in the
/// pending map at most once and leaves it on exactly one of:
/// response matched, caller timed out, client stopped, transport
/// closed.
pub struct Client {
    session_id: String,
    transport: Arc<Mutex<Box<dyn Transport>>>,
    next_seq: Arc<AtomicI64>,
    pending: Arc<Mutex<HashMap<i64, PendingRequest>>>,
    capabilities: Arc<Mutex<Option<Capabilities>>>,
    initialized: Arc<FlagNotifier>,
    stopped: Arc<AtomicBool>,
    request_timeout: time::Duration,
}

impl Client {
    pub fn new(session_id: String, transport: Box<dyn Transport>) -> Self {
        Client {
            session_id,
            transport: Arc::new(Mutex::new(transport)),
            next_seq: Arc::new(AtomicI64::new(1)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            capabilities: Arc::new(Mutex::new(None)),
            initialized: Arc::new(FlagNotifier::default()),
            stopped: Arc::new(AtomicBool::new(false)),
            request_timeout: consts::REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: time::Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Connect the transport and spawn the pump thread that routes
    /// inbound traffic: responses to their pending entries, events
    /// to `events_out`, reverse requests to the handler.
    #[instrument(skip_all, fields(s = self.session_id))]
    pub fn start(
        &self,
        events_out: crossbeam_channel::Sender<ClientEvent>,
        run_in_terminal: RunInTerminalHandler,
    ) -> anyhow::Result<()> {
        let (transport_tx, transport_rx) = crossbeam_channel::unbounded();
        self.transport.lock().unwrap().connect(transport_tx).context("connecting transport")?;

        let session_id = self.session_id.clone();
        let transport = Arc::clone(&self.transport);
        let next_seq = Arc::clone(&self.next_seq);
        let pending = Arc::clone(&self.pending);
        let initialized = Arc::clone(&self.initialized);
        thread::spawn(move || {
            let _s = span!(Level::INFO, "client_pump", s = session_id).entered();

            for event in transport_rx.iter() {
                match event {
                    TransportEvent::Message(msg) => match msg.payload {
                        Payload::Response(resp) => {
                            complete_pending(&pending, resp);
                        }
                        Payload::Event(event) => {
                            if event.event == "initialized" {
                                initialized.set();
                            }
                            if events_out.send(decode_event(event)).is_err() {
                                break;
                            }
                        }
                        Payload::Request(req) => {
                            answer_reverse_request(
                                &transport,
                                &next_seq,
                                msg.seq,
                                req,
                                &run_in_terminal,
                            );
                        }
                    },
                    TransportEvent::Stderr(line) => {
                        let forwarded = events_out.send(ClientEvent::Output(OutputEventBody {
                            category: Some(String::from("stderr")),
                            output: format!("{line}\n"),
                            source: None,
                            line: None,
                        }));
                        if forwarded.is_err() {
                            break;
                        }
                    }
                    TransportEvent::Error(err) => {
                        fail_all_pending(&pending, || {
                            anyhow!(BrokerError::TransportError(err.clone()))
                        });
                        if events_out.send(ClientEvent::TransportError(err)).is_err() {
                            break;
                        }
                    }
                    TransportEvent::Closed { code, signal } => {
                        fail_all_pending(&pending, || {
                            anyhow!(BrokerError::TransportError(String::from(
                                "transport closed"
                            )))
                        });
                        let _ = events_out.send(ClientEvent::TransportClosed { code, signal });
                        break;
                    }
                }
            }
            info!("client pump finished");
        });

        Ok(())
    }

    /// Disconnect and fail every in-flight request. Idempotent.
    #[instrument(skip_all, fields(s = self.session_id))]
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        // drain the pending map before the transport close races us
        // to it, so in-flight callers see SessionStopped and not a
        // transport error
        fail_all_pending(&self.pending, || anyhow!(BrokerError::SessionStopped));
        self.transport.lock().unwrap().disconnect();
    }

    pub fn adapter_pid(&self) -> Option<libc::pid_t> {
        self.transport.lock().unwrap().adapter_pid()
    }

    /// Block until the adapter has sent its `initialized` event.
    pub fn wait_initialized(&self, timeout: time::Duration) -> bool {
        self.initialized.wait(timeout)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities.lock().unwrap().clone().unwrap_or_default()
    }

    /// Issue a request and wait for the matching response.
    pub fn request(&self, command: &str, arguments: Option<Value>) -> anyhow::Result<Response> {
        self.request_deferred(command, arguments)?.wait()
    }

    /// Issue a request without waiting. The caller owns the
    /// [`PendingReply`] and must eventually wait on it.
    pub fn request_deferred(
        &self,
        command: &str,
        arguments: Option<Value>,
    ) -> anyhow::Result<PendingReply> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(anyhow!(BrokerError::SessionStopped));
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        {
            let mut pending = self.pending.lock().unwrap();
            pending.insert(
                seq,
                PendingRequest {
                    command: String::from(command),
                    reply: reply_tx,
                    sent_at: time::Instant::now(),
                },
            );
        }

        let msg = ProtocolMessage {
            seq,
            payload: Payload::Request(Request {
                command: String::from(command),
                arguments,
            }),
        };
        debug!("-> {} (seq {})", command, seq);
        if let Err(err) = self.transport.lock().unwrap().send(&msg) {
            self.pending.lock().unwrap().remove(&seq);
            return Err(err).with_context(|| format!("sending '{command}'"));
        }

        Ok(PendingReply {
            seq,
            command: String::from(command),
            rx: reply_rx,
            pending: Arc::clone(&self.pending),
            timeout: self.request_timeout,
        })
    }

    // ---- the protocol surface, one wrapper per command ----

    /// Send `initialize` with the broker's fixed client capability
    /// payload and record the adapter's capabilities. Must be the
    /// first request on a fresh client.
    pub fn initialize(&self, adapter_type: &str) -> anyhow::Result<Capabilities> {
        let args = InitializeRequestArguments {
            client_id: Some(String::from("logosdap")),
            client_name: Some(String::from("Logos")),
            adapter_id: String::from(adapter_type),
            locale: Some(String::from("en-us")),
            lines_start_at1: true,
            columns_start_at1: true,
            path_format: String::from("path"),
            supports_variable_type: true,
            supports_variable_paging: true,
            supports_run_in_terminal_request: true,
            supports_memory_references: true,
            supports_progress_reporting: true,
            supports_invalidated_event: true,
            supports_memory_event: true,
        };
        let resp = self.request("initialize", Some(serde_json::to_value(args)?))?;
        let caps: Capabilities = parse_body(resp)?;
        *self.capabilities.lock().unwrap() = Some(caps.clone());
        Ok(caps)
    }

    pub fn launch_deferred(&self, config: Value) -> anyhow::Result<PendingReply> {
        self.request_deferred("launch", Some(config))
    }

    pub fn attach_deferred(&self, config: Value) -> anyhow::Result<PendingReply> {
        self.request_deferred("attach", Some(config))
    }

    pub fn configuration_done(&self) -> anyhow::Result<()> {
        self.request("configurationDone", None)?;
        Ok(())
    }

    pub fn disconnect(&self, terminate_debuggee: bool) -> anyhow::Result<()> {
        self.request(
            "disconnect",
            Some(serde_json::json!({ "terminateDebuggee": terminate_debuggee })),
        )?;
        Ok(())
    }

    /// Ask the adapter to terminate the debuggee. Degrades to
    /// `disconnect(terminateDebuggee: true)` when the adapter does
    /// not support the request.
    pub fn terminate(&self) -> anyhow::Result<()> {
        if self.supports(|c| c.supports_terminate_request) {
            self.request("terminate", None)?;
            Ok(())
        } else {
            self.disconnect(true)
        }
    }

    pub fn continue_thread(&self, thread_id: i64) -> anyhow::Result<ContinueResponseBody> {
        let resp =
            self.request("continue", Some(serde_json::json!({ "threadId": thread_id })))?;
        parse_body(resp)
    }

    pub fn pause(&self, thread_id: i64) -> anyhow::Result<()> {
        self.request("pause", Some(serde_json::json!({ "threadId": thread_id })))?;
        Ok(())
    }

    pub fn step_over(&self, thread_id: i64) -> anyhow::Result<()> {
        self.request("next", Some(serde_json::json!({ "threadId": thread_id })))?;
        Ok(())
    }

    pub fn step_in(&self, thread_id: i64) -> anyhow::Result<()> {
        self.request("stepIn", Some(serde_json::json!({ "threadId": thread_id })))?;
        Ok(())
    }

    pub fn step_out(&self, thread_id: i64) -> anyhow::Result<()> {
        self.request("stepOut", Some(serde_json::json!({ "threadId": thread_id })))?;
        Ok(())
    }

    pub fn restart(&self, config: Value) -> anyhow::Result<()> {
        self.gate(|c| c.supports_restart_request, "restart")?;
        self.request("restart", Some(serde_json::json!({ "arguments": config })))?;
        Ok(())
    }

    pub fn restart_frame(&self, frame_id: i64) -> anyhow::Result<()> {
        self.gate(|c| c.supports_restart_frame, "restartFrame")?;
        self.request("restartFrame", Some(serde_json::json!({ "frameId": frame_id })))?;
        Ok(())
    }

    pub fn step_in_targets(&self, frame_id: i64) -> anyhow::Result<Value> {
        self.gate(|c| c.supports_step_in_targets_request, "stepInTargets")?;
        let resp =
            self.request("stepInTargets", Some(serde_json::json!({ "frameId": frame_id })))?;
        Ok(resp.body.unwrap_or_default())
    }

    pub fn completions(
        &self,
        text: &str,
        column: i64,
        frame_id: Option<i64>,
    ) -> anyhow::Result<Value> {
        self.gate(|c| c.supports_completions_request, "completions")?;
        let mut args = serde_json::json!({ "text": text, "column": column });
        if let Some(frame_id) = frame_id {
            args["frameId"] = serde_json::json!(frame_id);
        }
        let resp = self.request("completions", Some(args))?;
        Ok(resp.body.unwrap_or_default())
    }

    pub fn read_memory(
        &self,
        memory_reference: &str,
        offset: i64,
        count: i64,
    ) -> anyhow::Result<Value> {
        self.gate(|c| c.supports_read_memory_request, "readMemory")?;
        let resp = self.request(
            "readMemory",
            Some(serde_json::json!({
                "memoryReference": memory_reference,
                "offset": offset,
                "count": count,
            })),
        )?;
        Ok(resp.body.unwrap_or_default())
    }

    pub fn write_memory(
        &self,
        memory_reference: &str,
        offset: i64,
        data: &str,
    ) -> anyhow::Result<Value> {
        self.gate(|c| c.supports_write_memory_request, "writeMemory")?;
        let resp = self.request(
            "writeMemory",
            Some(serde_json::json!({
                "memoryReference": memory_reference,
                "offset": offset,
                "data": data,
            })),
        )?;
        Ok(resp.body.unwrap_or_default())
    }

    pub fn modules(&self) -> anyhow::Result<Value> {
        self.gate(|c| c.supports_modules_request, "modules")?;
        let resp = self.request("modules", Some(serde_json::json!({})))?;
        Ok(resp.body.unwrap_or_default())
    }

    pub fn exception_info(&self, thread_id: i64) -> anyhow::Result<Value> {
        self.gate(|c| c.supports_exception_info_request, "exceptionInfo")?;
        let resp =
            self.request("exceptionInfo", Some(serde_json::json!({ "threadId": thread_id })))?;
        Ok(resp.body.unwrap_or_default())
    }

    pub fn disassemble(
        &self,
        memory_reference: &str,
        instruction_count: i64,
    ) -> anyhow::Result<Value> {
        self.gate(|c| c.supports_disassemble_request, "disassemble")?;
        let resp = self.request(
            "disassemble",
            Some(serde_json::json!({
                "memoryReference": memory_reference,
                "instructionCount": instruction_count,
            })),
        )?;
        Ok(resp.body.unwrap_or_default())
    }

    pub fn threads(&self) -> anyhow::Result<Vec<Thread>> {
        let resp = self.request("threads", None)?;
        let body: ThreadsResponseBody = parse_body(resp)?;
        Ok(body.threads)
    }

    pub fn stack_trace(&self, thread_id: i64) -> anyhow::Result<StackTraceResponseBody> {
        let args = StackTraceArguments { thread_id, start_frame: None, levels: None };
        let resp = self.request("stackTrace", Some(serde_json::to_value(args)?))?;
        parse_body(resp)
    }

    pub fn scopes(&self, frame_id: i64) -> anyhow::Result<Vec<Scope>> {
        let resp = self.request("scopes", Some(serde_json::json!({ "frameId": frame_id })))?;
        let body: ScopesResponseBody = parse_body(resp)?;
        Ok(body.scopes)
    }

    pub fn variables(&self, variables_reference: i64) -> anyhow::Result<Vec<Variable>> {
        let resp = self.request(
            "variables",
            Some(serde_json::json!({ "variablesReference": variables_reference })),
        )?;
        let body: VariablesResponseBody = parse_body(resp)?;
        Ok(body.variables)
    }

    pub fn set_variable(
        &self,
        variables_reference: i64,
        name: &str,
        value: &str,
    ) -> anyhow::Result<SetVariableResponseBody> {
        let resp = self.request(
            "setVariable",
            Some(serde_json::json!({
                "variablesReference": variables_reference,
                "name": name,
                "value": value,
            })),
        )?;
        parse_body(resp)
    }

    pub fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: &str,
    ) -> anyhow::Result<EvaluateResponseBody> {
        let args = EvaluateArguments {
            expression: String::from(expression),
            frame_id,
            context: String::from(context),
        };
        let resp = self.request("evaluate", Some(serde_json::to_value(args)?))?;
        parse_body(resp)
    }

    pub fn set_breakpoints(
        &self,
        path: &str,
        breakpoints: Vec<SourceBreakpoint>,
    ) -> anyhow::Result<Vec<Breakpoint>> {
        let args = SetBreakpointsArguments {
            source: Source {
                name: None,
                path: Some(String::from(path)),
                source_reference: None,
            },
            breakpoints,
            source_modified: None,
        };
        let resp = self.request("setBreakpoints", Some(serde_json::to_value(args)?))?;
        let body: SetBreakpointsResponseBody = parse_body(resp)?;
        Ok(body.breakpoints)
    }

    pub fn set_function_breakpoints(
        &self,
        breakpoints: Vec<FunctionBreakpoint>,
    ) -> anyhow::Result<Vec<Breakpoint>> {
        self.gate(|c| c.supports_function_breakpoints, "setFunctionBreakpoints")?;
        let args = SetFunctionBreakpointsArguments { breakpoints };
        let resp = self.request("setFunctionBreakpoints", Some(serde_json::to_value(args)?))?;
        let body: SetBreakpointsResponseBody = parse_body(resp)?;
        Ok(body.breakpoints)
    }

    pub fn set_exception_breakpoints(
        &self,
        filters: Vec<String>,
        filter_options: Option<Vec<ExceptionFilterOptions>>,
    ) -> anyhow::Result<()> {
        let filter_options = if self.supports(|c| c.supports_exception_filter_options) {
            filter_options
        } else {
            None
        };
        let args = SetExceptionBreakpointsArguments { filters, filter_options };
        self.request("setExceptionBreakpoints", Some(serde_json::to_value(args)?))?;
        Ok(())
    }

    fn supports(&self, get: impl Fn(&Capabilities) -> Option<bool>) -> bool {
        self.capabilities
            .lock()
            .unwrap()
            .as_ref()
            .map(|caps| get(caps).unwrap_or(false))
            .unwrap_or(false)
    }

    fn gate(
        &self,
        get: impl Fn(&Capabilities) -> Option<bool>,
        command: &str,
    ) -> anyhow::Result<()> {
        if !self.supports(get) {
            return Err(anyhow!(BrokerError::Unsupported(String::from(command))));
        }
        Ok(())
    }
}

/// Resolve a pending entry with the inbound response. Responses with
/// no matching entry are dropped on the floor: the caller has
/// already timed out or been cancelled, and there is nobody left to
/// tell.
fn complete_pending(pending: &Arc<Mutex<HashMap<i64, PendingRequest>>>, resp: Response) {
    let entry = pending.lock().unwrap().remove(&resp.request_seq);
    match entry {
        Some(entry) => {
            debug!(
                "<- {} (request_seq {}, {}ms)",
                entry.command,
                resp.request_seq,
                entry.sent_at.elapsed().as_millis()
            );
            // The receiver may have just timed out; nothing to do
            // then, the entry is gone either way.
            let _ = entry.reply.send(Ok(resp));
        }
        None => {
            debug!("dropping unmatched response for request_seq {}", resp.request_seq);
        }
    }
}

fn fail_all_pending(
    pending: &Arc<Mutex<HashMap<i64, PendingRequest>>>,
    err: impl Fn() -> anyhow::Error,
) {
    let entries: Vec<_> = {
        let mut pending = pending.lock().unwrap();
        pending.drain().collect()
    };
    for (seq, entry) in entries {
        debug!("failing in-flight request '{}' (seq {})", entry.command, seq);
        let _ = entry.reply.send(Err(err()));
    }
}

/// Answer a reverse request from the adapter. `runInTerminal` is
/// routed to the handler; anything else gets a failure response so
/// the adapter is not left waiting on a request we will never
/// understand.
fn answer_reverse_request(
    transport: &Arc<Mutex<Box<dyn Transport>>>,
    next_seq: &AtomicI64,
    request_seq: i64,
    req: Request,
    run_in_terminal: &RunInTerminalHandler,
) {
    let (success, message, body) = if req.command == "runInTerminal" {
        let parsed = req
            .arguments
            .ok_or_else(|| anyhow!("runInTerminal without arguments"))
            .and_then(|args| {
                serde_json::from_value::<RunInTerminalRequestArguments>(args)
                    .context("parsing runInTerminal arguments")
            });
        match parsed.and_then(|args| run_in_terminal(args)) {
            Ok(body) => (true, None, serde_json::to_value(body).ok()),
            Err(err) => {
                warn!("runInTerminal handler failed: {:?}", err);
                (false, Some(format!("{err:#}")), None)
            }
        }
    } else {
        info!("rejecting unknown reverse request '{}'", req.command);
        (false, Some(format!("unsupported reverse request '{}'", req.command)), None)
    };

    let reply = ProtocolMessage {
        seq: next_seq.fetch_add(1, Ordering::SeqCst),
        payload: Payload::Response(Response {
            request_seq,
            success,
            command: req.command,
            message,
            body,
        }),
    };
    if let Err(err) = transport.lock().unwrap().send(&reply) {
        warn!("sending reverse request reply: {:?}", err);
    }
}

fn interpret_response(command: &str, resp: Response) -> anyhow::Result<Response> {
    if resp.success {
        Ok(resp)
    } else {
        let message = resp
            .message
            .clone()
            .unwrap_or_else(|| format!("Request {command} failed"));
        Err(anyhow!(BrokerError::AdapterError(message)))
    }
}

fn parse_body<T>(resp: Response) -> anyhow::Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match resp.body {
        Some(body) => serde_json::from_value(body).context("parsing response body"),
        None => Ok(T::default()),
    }
}

fn decode_event(event: Event) -> ClientEvent {
    let Event { event: name, body } = event;

    fn typed<T: serde::de::DeserializeOwned>(
        name: &str,
        body: Option<Value>,
        wrap: impl Fn(T) -> ClientEvent,
    ) -> ClientEvent {
        match serde_json::from_value(body.clone().unwrap_or(Value::Null)) {
            Ok(parsed) => wrap(parsed),
            Err(err) => {
                warn!("malformed '{}' event body: {:?}", name, err);
                ClientEvent::Other { event: String::from(name), body }
            }
        }
    }

    match name.as_str() {
        "initialized" => ClientEvent::Initialized,
        "stopped" => typed(&name, body, ClientEvent::Stopped),
        "continued" => typed(&name, body, ClientEvent::Continued),
        "terminated" => {
            // terminated is allowed to come with no body at all
            let body = body.unwrap_or_else(|| serde_json::json!({}));
            typed(&name, Some(body), ClientEvent::Terminated)
        }
        "exited" => typed(&name, body, ClientEvent::Exited),
        "output" => typed(&name, body, ClientEvent::Output),
        "breakpoint" => typed(&name, body, ClientEvent::Breakpoint),
        "thread" => typed(&name, body, ClientEvent::Thread),
        "module" => ClientEvent::Module(body.unwrap_or(Value::Null)),
        "loadedSource" => ClientEvent::LoadedSource(body.unwrap_or(Value::Null)),
        "process" => typed(&name, body, ClientEvent::Process),
        "capabilities" => typed(&name, body, ClientEvent::Capabilities),
        "progressStart" => ClientEvent::ProgressStart(body.unwrap_or(Value::Null)),
        "progressUpdate" => ClientEvent::ProgressUpdate(body.unwrap_or(Value::Null)),
        "progressEnd" => ClientEvent::ProgressEnd(body.unwrap_or(Value::Null)),
        "invalidated" => ClientEvent::Invalidated(body.unwrap_or(Value::Null)),
        "memory" => ClientEvent::Memory(body.unwrap_or(Value::Null)),
        _ => ClientEvent::Other { event: name, body },
    }
}
