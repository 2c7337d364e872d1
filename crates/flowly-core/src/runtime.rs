// ── Agent runtime ──
//
// Full lifecycle management for a switch agent. One event-loop task
// owns all store mutation: fabric updates, control commands, and
// operations requested from outside the loop all arrive as messages on
// a single queue, and each event is fully processed -- including every
// handler callback it triggers -- before the next is dequeued.
//
// The runtime is an explicit object whose lifecycle the caller owns:
// construct, register handlers, `start()`, then `run_until_stopped()`
// / `stop()`. No process-wide singleton, no hidden main loop.

use std::collections::{HashMap, VecDeque};
use std::ops::ControlFlow;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use flowly_hal::{
    FabricLink, FabricRequest, FabricUpdate, FlowEntry, FlowState, FlowStatus, IntfId,
    RejectReason,
};

use crate::config::AgentConfig;
use crate::control::{parse_line, ControlCommand};
use crate::error::CoreError;
use crate::handler::{AgentHandler, FaultRecord, FlowHandler, HandlerError, Handlers, IntfHandler};
use crate::status::StatusRegistry;
use crate::store::{FlowTable, IntfTable};

/// How often the loop wakes to check overdue acks.
const ACK_SCAN_PERIOD: Duration = Duration::from_millis(250);

// ── Lifecycle ───────────────────────────────────────────────────────

/// Agent lifecycle states, observable via [`Agent::lifecycle`].
///
/// `on_initialized` fires exactly once, on the `Synchronizing` to
/// `Initialized` transition; mutating operations are valid from
/// `Initialized` onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Lifecycle {
    Uninitialized,
    Synchronizing,
    Initialized,
    Running,
    Terminating,
    Terminated,
}

// ── Events ──────────────────────────────────────────────────────────

enum AgentEvent {
    Fabric(FabricUpdate),
    Control(ControlCommand),
    ControlClosed,
    Op(OpEnvelope),
    Exit,
}

struct OpEnvelope {
    op: AgentOp,
    reply: oneshot::Sender<Result<(), CoreError>>,
}

enum AgentOp {
    SetEntry(FlowEntry),
    DeleteEntry(String),
    SetDescription(IntfId, String),
    ResyncBegin,
    ResyncEnd,
}

/// A request awaiting its fabric ack. A name can have several in
/// flight (an install immediately followed by a remove), so pendings
/// are kept per name in issue order.
struct PendingAck {
    request: FabricRequest,
    deadline: Instant,
    retries_left: u32,
}

// ── Shared state ────────────────────────────────────────────────────

struct AgentShared {
    name: String,
    default_priority: u16,
    ack_timeout: Duration,
    ack_retries: u32,
    fault_log_capacity: usize,

    flows: FlowTable,
    intfs: IntfTable,
    status: StatusRegistry,

    lifecycle: watch::Sender<Lifecycle>,
    requests: mpsc::Sender<FabricRequest>,
    event_tx: mpsc::Sender<AgentEvent>,

    watch_intfs: AtomicBool,
    watch_flows: AtomicBool,
    /// Fallback exit signal for when the event queue is full.
    exit_requested: AtomicBool,

    faults: StdMutex<VecDeque<FaultRecord>>,
    outstanding: StdMutex<HashMap<String, Vec<PendingAck>>>,
}

impl AgentShared {
    fn lifecycle_now(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    fn ensure_ready(&self, operation: &'static str) -> Result<(), CoreError> {
        match self.lifecycle_now() {
            Lifecycle::Initialized | Lifecycle::Running => Ok(()),
            state => Err(CoreError::NotReady { operation, state }),
        }
    }

    /// Validate, store, and forward an install request.
    fn set_entry(&self, entry: FlowEntry) -> Result<(), CoreError> {
        self.ensure_ready("set_entry")?;
        entry
            .validate()
            .map_err(|source| CoreError::InvalidEntry {
                name: entry.name.clone(),
                source,
            })?;

        // Reserve the fabric slot first so a full queue fails the call
        // before the store is touched.
        let permit = self
            .requests
            .try_reserve()
            .map_err(|e| CoreError::FabricUnavailable {
                reason: e.to_string(),
            })?;

        self.flows.upsert(entry.clone());
        let request = FabricRequest::Install(entry);
        self.track_ack(&request);
        permit.send(request);
        Ok(())
    }

    /// Remove from the store and forward the removal.
    fn delete_entry(&self, name: &str) -> Result<(), CoreError> {
        self.ensure_ready("delete_entry")?;
        if !self.flows.exists(name) {
            return Err(CoreError::FlowNotFound {
                name: name.to_owned(),
            });
        }

        let permit = self
            .requests
            .try_reserve()
            .map_err(|e| CoreError::FabricUnavailable {
                reason: e.to_string(),
            })?;

        self.flows.remove(name);
        let request = FabricRequest::Remove {
            name: name.to_owned(),
        };
        self.track_ack(&request);
        permit.send(request);
        Ok(())
    }

    fn set_description(&self, intf: &IntfId, text: &str) -> Result<(), CoreError> {
        self.ensure_ready("set_description")?;
        self.intfs.set_description(intf, text)
    }

    fn resync_begin(&self) -> Result<(), CoreError> {
        self.ensure_ready("resync_begin")?;
        self.flows.resync_begin();
        Ok(())
    }

    fn resync_end(&self) -> Result<(), CoreError> {
        self.ensure_ready("resync_end")?;
        for name in self.flows.resync_end() {
            let request = FabricRequest::Remove { name: name.clone() };
            match self.requests.try_reserve() {
                Ok(permit) => {
                    self.track_ack(&request);
                    permit.send(request);
                }
                Err(e) => warn!(%name, error = %e, "could not forward resync removal"),
            }
        }
        Ok(())
    }

    fn track_ack(&self, request: &FabricRequest) {
        let name = match request {
            FabricRequest::Install(entry) => entry.name.clone(),
            FabricRequest::Remove { name } => name.clone(),
        };
        if let Ok(mut outstanding) = self.outstanding.lock() {
            outstanding.entry(name).or_default().push(PendingAck {
                request: request.clone(),
                deadline: Instant::now() + self.ack_timeout,
                retries_left: self.ack_retries,
            });
        }
    }

    fn no_outstanding(&self) -> bool {
        self.outstanding.lock().map(|o| o.is_empty()).unwrap_or(true)
    }

    fn record_fault(&self, callback: &'static str, event: String, err: &HandlerError) {
        error!(callback, %event, error = %err, "handler fault");
        if let Ok(mut faults) = self.faults.lock() {
            if faults.len() >= self.fault_log_capacity {
                faults.pop_front();
            }
            faults.push_back(FaultRecord {
                at: Utc::now(),
                callback,
                event,
                message: err.to_string(),
            });
        }
    }

    fn request_exit(&self) {
        if self.event_tx.try_send(AgentEvent::Exit).is_err() {
            self.exit_requested.store(true, Ordering::Relaxed);
        }
    }
}

// ── AgentContext ────────────────────────────────────────────────────

/// Handler-facing view of the agent, passed into every callback.
///
/// Operations run inline on the event-loop task, so handlers observe
/// their own mutations immediately.
pub struct AgentContext {
    shared: Arc<AgentShared>,
}

impl AgentContext {
    pub fn agent_name(&self) -> &str {
        &self.shared.name
    }

    /// Priority used for control-stream entries; available to handlers
    /// that build their own.
    pub fn default_priority(&self) -> u16 {
        self.shared.default_priority
    }

    /// Insert or replace a flow entry and program it.
    pub fn set_entry(&self, entry: FlowEntry) -> Result<(), CoreError> {
        self.shared.set_entry(entry)
    }

    /// Delete a flow entry by name.
    pub fn delete_entry(&self, name: &str) -> Result<(), CoreError> {
        self.shared.delete_entry(name)
    }

    /// Open a reconciliation window; see [`Agent::resync_begin`].
    pub fn resync_begin(&self) -> Result<(), CoreError> {
        self.shared.resync_begin()
    }

    /// Close the reconciliation window; see [`Agent::resync_end`].
    pub fn resync_end(&self) -> Result<(), CoreError> {
        self.shared.resync_end()
    }

    /// Overwrite an interface's description.
    pub fn set_description(&self, intf: &IntfId, text: &str) -> Result<(), CoreError> {
        self.shared.set_description(intf, text)
    }

    /// Publish a named status field.
    pub fn status_set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.shared.status.set(key, value);
    }

    /// Gate delivery of `on_oper_status` callbacks.
    pub fn watch_all_intfs(&self, enabled: bool) {
        self.shared.watch_intfs.store(enabled, Ordering::Relaxed);
    }

    /// Gate delivery of `on_flow_status` callbacks.
    pub fn watch_all_flows(&self, enabled: bool) {
        self.shared.watch_flows.store(enabled, Ordering::Relaxed);
    }

    pub fn flows(&self) -> &FlowTable {
        &self.shared.flows
    }

    pub fn intfs(&self) -> &IntfTable {
        &self.shared.intfs
    }

    /// Ask the agent to terminate gracefully.
    pub fn exit(&self) {
        self.shared.request_exit();
    }
}

// ── Agent ───────────────────────────────────────────────────────────

/// Everything handed to the event loop at start.
struct Startup {
    updates: mpsc::Receiver<FabricUpdate>,
    event_rx: mpsc::Receiver<AgentEvent>,
    handlers: Handlers,
}

/// The agent runtime. Cheaply cloneable via `Arc`; all clones drive
/// the same loop.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

struct AgentInner {
    shared: Arc<AgentShared>,
    event_tx: mpsc::Sender<AgentEvent>,
    startup: StdMutex<Option<Startup>>,
    cancel: CancellationToken,
    task_handles: StdMutex<Vec<JoinHandle<()>>>,
}

impl Agent {
    /// Create an agent bound to a fabric link. Does NOT start the event
    /// loop -- register handlers, then call [`start()`](Self::start).
    pub fn new(config: AgentConfig, link: FabricLink) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity);
        let (lifecycle, _) = watch::channel(Lifecycle::Uninitialized);

        let shared = Arc::new(AgentShared {
            name: config.name,
            default_priority: config.default_priority,
            ack_timeout: config.ack_timeout,
            ack_retries: config.ack_retries,
            fault_log_capacity: config.fault_log_capacity,
            flows: FlowTable::new(),
            intfs: IntfTable::new(),
            status: StatusRegistry::new(),
            lifecycle,
            requests: link.requests,
            event_tx: event_tx.clone(),
            watch_intfs: AtomicBool::new(false),
            watch_flows: AtomicBool::new(false),
            exit_requested: AtomicBool::new(false),
            faults: StdMutex::new(VecDeque::new()),
            outstanding: StdMutex::new(HashMap::new()),
        });

        Self {
            inner: Arc::new(AgentInner {
                shared,
                event_tx,
                startup: StdMutex::new(Some(Startup {
                    updates: link.updates,
                    event_rx,
                    handlers: Handlers::default(),
                })),
                cancel: CancellationToken::new(),
                task_handles: StdMutex::new(Vec::new()),
            }),
        }
    }

    // ── Handler registration (before start) ──────────────────────────

    pub fn register_agent_handler(
        &self,
        handler: impl AgentHandler + 'static,
    ) -> Result<(), CoreError> {
        self.with_startup(|s| s.handlers.agent.push(Box::new(handler)))
    }

    pub fn register_intf_handler(
        &self,
        handler: impl IntfHandler + 'static,
    ) -> Result<(), CoreError> {
        self.with_startup(|s| s.handlers.intf.push(Box::new(handler)))
    }

    pub fn register_flow_handler(
        &self,
        handler: impl FlowHandler + 'static,
    ) -> Result<(), CoreError> {
        self.with_startup(|s| s.handlers.flow.push(Box::new(handler)))
    }

    fn with_startup(&self, f: impl FnOnce(&mut Startup)) -> Result<(), CoreError> {
        let mut guard = self
            .inner
            .startup
            .lock()
            .map_err(|_| CoreError::AgentStopped)?;
        match guard.as_mut() {
            Some(startup) => {
                f(startup);
                Ok(())
            }
            None => Err(CoreError::AlreadyStarted),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the event loop and begin synchronizing with the fabric.
    pub fn start(&self) -> Result<(), CoreError> {
        let startup = self
            .inner
            .startup
            .lock()
            .map_err(|_| CoreError::AgentStopped)?
            .take()
            .ok_or(CoreError::AlreadyStarted)?;

        self.inner.shared.lifecycle.send_replace(Lifecycle::Synchronizing);
        info!(agent = %self.inner.shared.name, "agent starting");

        let pump = tokio::spawn(fabric_pump(
            startup.updates,
            self.inner.event_tx.clone(),
            self.inner.cancel.clone(),
        ));
        let event_loop = tokio::spawn(run_event_loop(
            Arc::clone(&self.inner.shared),
            startup.event_rx,
            startup.handlers,
            self.inner.cancel.clone(),
        ));

        if let Ok(mut handles) = self.inner.task_handles.lock() {
            handles.push(pump);
            handles.push(event_loop);
        }
        Ok(())
    }

    /// Attach a control stream; lines are parsed and applied in arrival
    /// order, and end-of-stream begins graceful termination. May be
    /// called before or after `start()`.
    pub fn attach_control(&self, source: impl AsyncBufRead + Send + Unpin + 'static) {
        let task = tokio::spawn(control_task(
            source,
            self.inner.event_tx.clone(),
            self.inner.cancel.clone(),
        ));
        if let Ok(mut handles) = self.inner.task_handles.lock() {
            handles.push(task);
        }
    }

    /// Ask the agent to terminate. Queued like any other event: work
    /// already in the queue completes first.
    pub fn exit(&self) {
        self.inner.shared.request_exit();
    }

    /// Wait until the agent reaches `Terminated`.
    pub async fn run_until_stopped(&self) {
        let mut rx = self.inner.shared.lifecycle.subscribe();
        let _ = rx
            .wait_for(|state| *state == Lifecycle::Terminated)
            .await;
    }

    /// Terminate and join all background tasks.
    pub async fn stop(&self) {
        // Never started: nothing to join, just mark terminal.
        let never_started = self
            .inner
            .startup
            .lock()
            .map(|mut s| s.take().is_some())
            .unwrap_or(false);
        if never_started {
            self.inner.shared.lifecycle.send_replace(Lifecycle::Terminated);
            return;
        }

        self.exit();
        self.run_until_stopped().await;
        self.inner.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = self
            .inner
            .task_handles
            .lock()
            .map(|mut h| h.drain(..).collect())
            .unwrap_or_default();
        for handle in handles {
            let _ = handle.await;
        }
        debug!(agent = %self.inner.shared.name, "agent stopped");
    }

    // ── Operations (routed through the event loop) ───────────────────

    /// Insert or replace a flow entry and program it into the fabric.
    pub async fn set_entry(&self, entry: FlowEntry) -> Result<(), CoreError> {
        self.execute(AgentOp::SetEntry(entry)).await
    }

    /// Delete a flow entry by name.
    pub async fn delete_entry(&self, name: impl Into<String>) -> Result<(), CoreError> {
        self.execute(AgentOp::DeleteEntry(name.into())).await
    }

    /// Overwrite an interface's description.
    pub async fn set_description(
        &self,
        intf: IntfId,
        text: impl Into<String>,
    ) -> Result<(), CoreError> {
        self.execute(AgentOp::SetDescription(intf, text.into()))
            .await
    }

    /// Open a reconciliation window: entries not re-set before
    /// [`resync_end`](Self::resync_end) are removed when it closes.
    pub async fn resync_begin(&self) -> Result<(), CoreError> {
        self.execute(AgentOp::ResyncBegin).await
    }

    /// Close the reconciliation window, removing non-reaffirmed entries.
    pub async fn resync_end(&self) -> Result<(), CoreError> {
        self.execute(AgentOp::ResyncEnd).await
    }

    async fn execute(&self, op: AgentOp) -> Result<(), CoreError> {
        // Without a running loop the reply would never come.
        if self.inner.shared.lifecycle_now() == Lifecycle::Uninitialized {
            return Err(CoreError::NotReady {
                operation: "agent operation",
                state: Lifecycle::Uninitialized,
            });
        }

        let (tx, rx) = oneshot::channel();
        self.inner
            .event_tx
            .send(AgentEvent::Op(OpEnvelope { op, reply: tx }))
            .await
            .map_err(|_| CoreError::AgentStopped)?;
        rx.await.map_err(|_| CoreError::AgentStopped)?
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.inner.shared.lifecycle.subscribe()
    }

    pub fn flows(&self) -> &FlowTable {
        &self.inner.shared.flows
    }

    pub fn intfs(&self) -> &IntfTable {
        &self.inner.shared.intfs
    }

    pub fn status(&self) -> &StatusRegistry {
        &self.inner.shared.status
    }

    /// Publish a named status field.
    pub fn status_set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.shared.status.set(key, value);
    }

    /// Gate delivery of `on_oper_status` callbacks.
    pub fn watch_all_intfs(&self, enabled: bool) {
        self.inner.shared.watch_intfs.store(enabled, Ordering::Relaxed);
    }

    /// Gate delivery of `on_flow_status` callbacks.
    pub fn watch_all_flows(&self, enabled: bool) {
        self.inner.shared.watch_flows.store(enabled, Ordering::Relaxed);
    }

    /// Recent handler faults, oldest first.
    pub fn recent_faults(&self) -> Vec<FaultRecord> {
        self.inner
            .shared
            .faults
            .lock()
            .map(|faults| faults.iter().cloned().collect())
            .unwrap_or_default()
    }
}

// ── Background tasks ────────────────────────────────────────────────

/// Forward fabric updates into the event queue. Cross-thread handoff
/// happens here, by message -- the pump never touches agent state.
async fn fabric_pump(
    mut updates: mpsc::Receiver<FabricUpdate>,
    event_tx: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            update = updates.recv() => {
                let Some(update) = update else { break };
                if event_tx.send(AgentEvent::Fabric(update)).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Read, parse, and forward control lines until EOF or cancellation.
async fn control_task(
    source: impl AsyncBufRead + Send + Unpin + 'static,
    event_tx: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
) {
    let mut lines = source.lines();
    let mut line_no = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    line_no += 1;
                    match parse_line(&line) {
                        Ok(Some(cmd)) => {
                            if event_tx.send(AgentEvent::Control(cmd)).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(line = line_no, content = %line.trim(), error = %e,
                                  "ignoring malformed control line");
                        }
                    }
                }
                Ok(None) => {
                    let _ = event_tx.send(AgentEvent::ControlClosed).await;
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "control stream read failed");
                    let _ = event_tx.send(AgentEvent::ControlClosed).await;
                    break;
                }
            }
        }
    }
}

// ── Event loop ──────────────────────────────────────────────────────

async fn run_event_loop(
    shared: Arc<AgentShared>,
    mut event_rx: mpsc::Receiver<AgentEvent>,
    mut handlers: Handlers,
    cancel: CancellationToken,
) {
    let ctx = AgentContext {
        shared: Arc::clone(&shared),
    };

    let mut scan = tokio::time::interval(ACK_SCAN_PERIOD);
    scan.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Once a termination request is processed the loop drains: it keeps
    // delivering fabric acks for requests already in flight (the ack
    // timeout bounds how long that can take), then exits.
    let mut draining = false;

    loop {
        tokio::select! {
            biased;

            event = event_rx.recv() => {
                let Some(event) = event else { break };
                if process_event(&shared, &ctx, &mut handlers, &mut draining, event).is_break() {
                    break;
                }
            }

            _ = scan.tick() => {
                // Fallback exit path for a saturated event queue.
                if shared.exit_requested.load(Ordering::Relaxed) && !draining {
                    info!("exit requested");
                    shared.lifecycle.send_replace(Lifecycle::Terminating);
                    draining = true;
                }
                expire_outstanding(&shared, &ctx, &mut handlers);
            }
        }

        if draining && shared.no_outstanding() {
            break;
        }
    }

    shared.lifecycle.send_replace(Lifecycle::Terminated);
    cancel.cancel();
    info!(agent = %shared.name, "agent terminated");
}

fn process_event(
    shared: &Arc<AgentShared>,
    ctx: &AgentContext,
    handlers: &mut Handlers,
    draining: &mut bool,
    event: AgentEvent,
) -> ControlFlow<()> {
    match event {
        AgentEvent::Fabric(update) => process_fabric_update(shared, ctx, handlers, update),

        AgentEvent::Control(cmd) => {
            apply_control_command(shared, &cmd);
            ControlFlow::Continue(())
        }

        AgentEvent::ControlClosed => {
            info!("control stream ended; terminating");
            shared.lifecycle.send_replace(Lifecycle::Terminating);
            *draining = true;
            ControlFlow::Continue(())
        }

        AgentEvent::Op(envelope) => {
            let result = apply_op(shared, envelope.op);
            let _ = envelope.reply.send(result);
            ControlFlow::Continue(())
        }

        AgentEvent::Exit => {
            info!("exit requested");
            shared.lifecycle.send_replace(Lifecycle::Terminating);
            *draining = true;
            ControlFlow::Continue(())
        }
    }
}

fn process_fabric_update(
    shared: &Arc<AgentShared>,
    ctx: &AgentContext,
    handlers: &mut Handlers,
    update: FabricUpdate,
) -> ControlFlow<()> {
    match update {
        FabricUpdate::IntfSnapshot(intfs) => {
            debug!(count = intfs.len(), "interface snapshot");
            for (id, status) in intfs {
                shared.intfs.observe(id, status);
            }
        }

        FabricUpdate::FlowSnapshot(entries) => {
            debug!(count = entries.len(), "flow snapshot");
            for entry in entries {
                shared.flows.adopt(entry);
            }
        }

        FabricUpdate::Synced => {
            if shared.lifecycle_now() == Lifecycle::Synchronizing {
                shared.lifecycle.send_replace(Lifecycle::Initialized);
                info!(
                    intfs = shared.intfs.len(),
                    flows = shared.flows.len(),
                    "state synchronized; agent initialized"
                );
                for handler in &mut handlers.agent {
                    if let Err(e) = handler.on_initialized(ctx) {
                        shared.record_fault("on_initialized", "initialization".into(), &e);
                    }
                }
                shared.lifecycle.send_replace(Lifecycle::Running);
            }
        }

        FabricUpdate::FlowAck(status) => {
            deliver_flow_status(shared, ctx, handlers, status);
        }

        FabricUpdate::OperStatus { intf, state } => {
            shared.intfs.apply_oper_status(&intf, state);
            if shared.watch_intfs.load(Ordering::Relaxed) {
                for handler in &mut handlers.intf {
                    if let Err(e) = handler.on_oper_status(ctx, &intf, state) {
                        shared.record_fault("on_oper_status", format!("{intf} -> {state}"), &e);
                    }
                }
            }
        }

        FabricUpdate::Closed => {
            warn!("fabric connection closed; terminating");
            fail_outstanding(shared, ctx, handlers, RejectReason::FabricClosed);
            shared.lifecycle.send_replace(Lifecycle::Terminating);
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

/// Map a parsed control command onto the store. Failures here are
/// operator errors (unknown name, agent not ready), reported and
/// skipped like malformed lines.
fn apply_control_command(shared: &Arc<AgentShared>, cmd: &ControlCommand) {
    match cmd {
        ControlCommand::Add { name, .. } => {
            if let Some(entry) = cmd.flow_entry(shared.default_priority) {
                if let Err(e) = shared.set_entry(entry) {
                    warn!(%name, error = %e, "control add failed");
                }
            }
        }
        ControlCommand::Delete { name } => {
            if let Err(e) = shared.delete_entry(name) {
                warn!(%name, error = %e, "control delete failed");
            }
        }
    }
}

fn apply_op(shared: &Arc<AgentShared>, op: AgentOp) -> Result<(), CoreError> {
    match op {
        AgentOp::SetEntry(entry) => shared.set_entry(entry),
        AgentOp::DeleteEntry(name) => shared.delete_entry(&name),
        AgentOp::SetDescription(intf, text) => shared.set_description(&intf, &text),
        AgentOp::ResyncBegin => shared.resync_begin(),
        AgentOp::ResyncEnd => shared.resync_end(),
    }
}

/// Settle one flow ack: clear the outstanding record, update the
/// store, and deliver `on_flow_status` callbacks.
fn deliver_flow_status(
    shared: &Arc<AgentShared>,
    ctx: &AgentContext,
    handlers: &mut Handlers,
    status: FlowStatus,
) {
    // One ack settles one pending request for that name.
    if let Ok(mut outstanding) = shared.outstanding.lock() {
        if let Some(pendings) = outstanding.get_mut(&status.name) {
            if !pendings.is_empty() {
                pendings.remove(0);
            }
            if pendings.is_empty() {
                outstanding.remove(&status.name);
            }
        }
    }
    if status.state != FlowState::Removed {
        shared.flows.note_state(&status.name, status.state);
    }
    debug!(name = %status.name, state = %status.state, "flow status");

    if shared.watch_flows.load(Ordering::Relaxed) {
        for handler in &mut handlers.flow {
            if let Err(e) = handler.on_flow_status(ctx, &status.name, status.state) {
                shared.record_fault(
                    "on_flow_status",
                    format!("{} -> {}", status.name, status.state),
                    &e,
                );
            }
        }
    }
}

/// Retry or reject requests whose ack deadline has passed.
fn expire_outstanding(shared: &Arc<AgentShared>, ctx: &AgentContext, handlers: &mut Handlers) {
    let now = Instant::now();

    let expired: Vec<(String, PendingAck)> = match shared.outstanding.lock() {
        Ok(mut outstanding) => {
            let mut expired = Vec::new();
            outstanding.retain(|name, pendings| {
                let mut keep = Vec::new();
                for pending in pendings.drain(..) {
                    if pending.deadline <= now {
                        expired.push((name.clone(), pending));
                    } else {
                        keep.push(pending);
                    }
                }
                *pendings = keep;
                !pendings.is_empty()
            });
            expired
        }
        Err(_) => return,
    };

    for (name, mut pending) in expired {
        if pending.retries_left > 0 {
            pending.retries_left -= 1;
            pending.deadline = now + shared.ack_timeout;
            match shared.requests.try_reserve() {
                Ok(permit) => {
                    warn!(%name, retries_left = pending.retries_left, "ack overdue; retrying");
                    permit.send(pending.request.clone());
                }
                Err(e) => {
                    warn!(%name, error = %e, "ack overdue but fabric queue unavailable");
                }
            }
            if let Ok(mut outstanding) = shared.outstanding.lock() {
                outstanding.entry(name).or_default().push(pending);
            }
        } else {
            warn!(%name, "no ack after retries; rejecting");
            // Put the pending back so the synthetic ack settles it --
            // keeps the outstanding count balanced.
            if let Ok(mut outstanding) = shared.outstanding.lock() {
                outstanding.entry(name.clone()).or_default().push(pending);
            }
            deliver_flow_status(
                shared,
                ctx,
                handlers,
                FlowStatus {
                    name,
                    state: FlowState::Rejected(RejectReason::AckTimeout),
                },
            );
        }
    }
}

/// Reject every outstanding request with the given reason. Used when
/// the fabric is gone and no real acks can arrive.
fn fail_outstanding(
    shared: &Arc<AgentShared>,
    ctx: &AgentContext,
    handlers: &mut Handlers,
    reason: RejectReason,
) {
    let names: Vec<String> = match shared.outstanding.lock() {
        Ok(mut outstanding) => outstanding
            .drain()
            .flat_map(|(name, pendings)| std::iter::repeat_n(name, pendings.len()))
            .collect(),
        Err(_) => return,
    };
    for name in names {
        deliver_flow_status(
            shared,
            ctx,
            handlers,
            FlowStatus {
                name,
                state: FlowState::Rejected(reason),
            },
        );
    }
}
