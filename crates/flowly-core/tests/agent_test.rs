//! End-to-end agent runtime tests against the simulated fabric and
//! against a hand-driven fabric endpoint for failure injection.
#![allow(clippy::unwrap_used)]

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use flowly_core::{
    Agent, AgentConfig, AgentContext, AgentHandler, CoreError, FlowHandler, HandlerError,
    IntfHandler, Lifecycle,
};
use flowly_hal::{
    FabricLink, FabricRequest, FabricUpdate, FlowAction, FlowEntry, FlowMatch, FlowState,
    FlowStatus, IntfId, OperStatus, RejectReason, SimConfig, SimFabric,
};

const WAIT: Duration = Duration::from_secs(5);

// ── Helpers ─────────────────────────────────────────────────────────

fn entry(name: &str, last_octet: u8, priority: u16) -> FlowEntry {
    let mut matches = FlowMatch::new();
    matches.set_ip_dst(Ipv4Addr::new(10, 0, 0, last_octet), Ipv4Addr::BROADCAST);
    FlowEntry::new(
        name,
        matches,
        FlowAction::forward([IntfId::from("Ethernet1")]),
        priority,
    )
}

fn eth(n: u8) -> IntfId {
    IntfId::new(format!("Ethernet{n}"))
}

async fn started_agent(config: AgentConfig, sim: SimConfig) -> (Agent, flowly_hal::SimHandle) {
    let (link, handle) = SimFabric::spawn(sim);
    let agent = Agent::new(config, link);
    agent.start().unwrap();
    agent
        .lifecycle()
        .wait_for(|s| matches!(s, Lifecycle::Running))
        .await
        .unwrap();
    (agent, handle)
}

/// Records every flow status callback into a channel.
struct FlowRecorder(mpsc::UnboundedSender<FlowStatus>);

impl FlowHandler for FlowRecorder {
    fn on_flow_status(
        &mut self,
        _ctx: &AgentContext,
        name: &str,
        state: FlowState,
    ) -> Result<(), HandlerError> {
        let _ = self.0.send(FlowStatus {
            name: name.to_owned(),
            state,
        });
        Ok(())
    }
}

/// Records every oper status callback into a channel.
struct IntfRecorder(mpsc::UnboundedSender<(IntfId, OperStatus)>);

impl IntfHandler for IntfRecorder {
    fn on_oper_status(
        &mut self,
        _ctx: &AgentContext,
        intf: &IntfId,
        state: OperStatus,
    ) -> Result<(), HandlerError> {
        let _ = self.0.send((intf.clone(), state));
        Ok(())
    }
}

/// Counts on_initialized invocations.
struct InitCounter(Arc<AtomicUsize>);

impl AgentHandler for InitCounter {
    fn on_initialized(&mut self, _ctx: &AgentContext) -> Result<(), HandlerError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn next_status(rx: &mut mpsc::UnboundedReceiver<FlowStatus>) -> FlowStatus {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn on_initialized_fires_exactly_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (link, _sim) = SimFabric::spawn(SimConfig::default());
    let agent = Agent::new(AgentConfig::default(), link);
    agent
        .register_agent_handler(InitCounter(Arc::clone(&calls)))
        .unwrap();
    agent.start().unwrap();

    agent
        .lifecycle()
        .wait_for(|s| matches!(s, Lifecycle::Running))
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    agent.stop().await;
}

#[tokio::test]
async fn duplicate_synced_does_not_reinitialize() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (link, endpoint) = FabricLink::channel(16, 16);
    let agent = Agent::new(AgentConfig::default(), link);
    agent
        .register_agent_handler(InitCounter(Arc::clone(&calls)))
        .unwrap();
    agent.start().unwrap();

    let updates = endpoint.updates.clone();
    updates
        .send(FabricUpdate::IntfSnapshot(vec![(eth(1), OperStatus::Up)]))
        .await
        .unwrap();
    updates.send(FabricUpdate::FlowSnapshot(vec![])).await.unwrap();
    updates.send(FabricUpdate::Synced).await.unwrap();
    updates.send(FabricUpdate::Synced).await.unwrap();

    agent
        .lifecycle()
        .wait_for(|s| matches!(s, Lifecycle::Running))
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    agent.stop().await;
}

#[tokio::test]
async fn operations_fail_before_start() {
    let (link, _sim) = SimFabric::spawn(SimConfig::default());
    let agent = Agent::new(AgentConfig::default(), link);

    let err = agent.set_entry(entry("f", 1, 100)).await.unwrap_err();
    assert!(matches!(err, CoreError::NotReady { .. }));
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let (link, _sim) = SimFabric::spawn(SimConfig::default());
    let agent = Agent::new(AgentConfig::default(), link);
    agent.start().unwrap();
    assert!(matches!(agent.start(), Err(CoreError::AlreadyStarted)));
    agent.stop().await;
}

#[tokio::test]
async fn registration_after_start_is_rejected() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (link, _sim) = SimFabric::spawn(SimConfig::default());
    let agent = Agent::new(AgentConfig::default(), link);
    agent.start().unwrap();

    let err = agent
        .register_agent_handler(InitCounter(calls))
        .unwrap_err();
    assert!(matches!(err, CoreError::AlreadyStarted));
    agent.stop().await;
}

// ── Flow table operations ───────────────────────────────────────────

#[tokio::test]
async fn set_entry_then_lookup_returns_equal_entry() {
    let (agent, _sim) = started_agent(AgentConfig::default(), SimConfig::default()).await;

    let e = entry("flowA", 5, 100);
    agent.set_entry(e.clone()).await.unwrap();
    assert_eq!(agent.flows().get("flowA").unwrap().entry, e);

    // Upsert is idempotent: setting again replaces in place.
    agent.set_entry(e.clone()).await.unwrap();
    assert_eq!(agent.flows().len(), 1);
    agent.stop().await;
}

#[tokio::test]
async fn invalid_entry_is_rejected_without_mutation() {
    let (agent, _sim) = started_agent(AgentConfig::default(), SimConfig::default()).await;

    let mut bad = entry("bad", 1, 100);
    bad.matches.field_set.ip_dst = false; // populated field, bit cleared

    let err = agent.set_entry(bad).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidEntry { .. }));
    assert!(agent.flows().is_empty());
    agent.stop().await;
}

#[tokio::test]
async fn delete_unknown_entry_fails_without_mutation() {
    let (agent, _sim) = started_agent(AgentConfig::default(), SimConfig::default()).await;
    agent.set_entry(entry("keep", 1, 100)).await.unwrap();

    let err = agent.delete_entry("ghost").await.unwrap_err();
    assert!(matches!(err, CoreError::FlowNotFound { .. }));
    assert_eq!(agent.flows().len(), 1);
    agent.stop().await;
}

#[tokio::test]
async fn install_ack_reaches_flow_handler_and_store() {
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let (link, _sim) = SimFabric::spawn(SimConfig::default());
    let agent = Agent::new(AgentConfig::default(), link);
    agent.register_flow_handler(FlowRecorder(status_tx)).unwrap();
    agent.watch_all_flows(true);
    agent.start().unwrap();
    agent
        .lifecycle()
        .wait_for(|s| matches!(s, Lifecycle::Running))
        .await
        .unwrap();

    agent.set_entry(entry("flowA", 5, 100)).await.unwrap();

    let status = next_status(&mut status_rx).await;
    assert_eq!(status.name, "flowA");
    assert_eq!(status.state, FlowState::Installed);
    assert_eq!(
        agent.flows().get("flowA").unwrap().state,
        FlowState::Installed
    );
    agent.stop().await;
}

// ── Interface tracking ──────────────────────────────────────────────

#[tokio::test]
async fn oper_status_events_arrive_in_order_and_count() {
    let (intf_tx, mut intf_rx) = mpsc::unbounded_channel();
    let (link, sim) = SimFabric::spawn(SimConfig::default());
    let agent = Agent::new(AgentConfig::default(), link);
    agent.register_intf_handler(IntfRecorder(intf_tx)).unwrap();
    agent.watch_all_intfs(true);
    agent.start().unwrap();
    agent
        .lifecycle()
        .wait_for(|s| matches!(s, Lifecycle::Running))
        .await
        .unwrap();

    // Snapshot seeding is observation, not a transition.
    assert_eq!(agent.intfs().len(), 4);
    assert_eq!(agent.intfs().change_count(), 0);

    sim.set_oper_status(eth(1), OperStatus::Down).await;
    sim.set_oper_status(eth(1), OperStatus::Up).await;

    let first = timeout(WAIT, intf_rx.recv()).await.unwrap().unwrap();
    let second = timeout(WAIT, intf_rx.recv()).await.unwrap().unwrap();
    assert_eq!(first, (eth(1), OperStatus::Down));
    assert_eq!(second, (eth(1), OperStatus::Up));

    assert_eq!(agent.intfs().change_count(), 2);
    assert_eq!(
        agent.intfs().get(&eth(1)).unwrap().oper_status,
        OperStatus::Up
    );
    agent.stop().await;
}

#[tokio::test]
async fn unseen_interface_appears_on_first_transition() {
    let (link, sim) = SimFabric::spawn(SimConfig::default());
    let agent = Agent::new(AgentConfig::default(), link);
    agent.start().unwrap();
    agent
        .lifecycle()
        .wait_for(|s| matches!(s, Lifecycle::Running))
        .await
        .unwrap();

    sim.set_oper_status(IntfId::from("Tunnel0"), OperStatus::Up)
        .await;

    let mut sub = agent.intfs().subscribe();
    timeout(WAIT, sub.wait_for(|snap| snap.len() == 5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        agent
            .intfs()
            .get(&IntfId::from("Tunnel0"))
            .unwrap()
            .oper_status,
        OperStatus::Up
    );
    agent.stop().await;
}

#[tokio::test]
async fn set_description_requires_known_interface() {
    let (agent, _sim) = started_agent(AgentConfig::default(), SimConfig::default()).await;

    agent
        .set_description(eth(1), "core uplink")
        .await
        .unwrap();
    assert_eq!(
        agent.intfs().get(&eth(1)).unwrap().description,
        "core uplink"
    );

    let err = agent
        .set_description(IntfId::from("Ethernet99"), "nope")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::UnknownIntf { .. }));
    agent.stop().await;
}

// ── Handler fault isolation ─────────────────────────────────────────

struct FaultyIntfHandler;

impl IntfHandler for FaultyIntfHandler {
    fn on_oper_status(
        &mut self,
        _ctx: &AgentContext,
        _intf: &IntfId,
        _state: OperStatus,
    ) -> Result<(), HandlerError> {
        Err(HandlerError::new("injected failure"))
    }
}

#[tokio::test]
async fn handler_fault_does_not_block_later_events() {
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let (link, sim) = SimFabric::spawn(SimConfig::default());
    let agent = Agent::new(AgentConfig::default(), link);
    agent.register_intf_handler(FaultyIntfHandler).unwrap();
    agent.register_flow_handler(FlowRecorder(status_tx)).unwrap();
    agent.watch_all_intfs(true);
    agent.watch_all_flows(true);
    agent.start().unwrap();
    agent
        .lifecycle()
        .wait_for(|s| matches!(s, Lifecycle::Running))
        .await
        .unwrap();

    // This delivery faults ...
    sim.set_oper_status(eth(1), OperStatus::Down).await;

    // ... and the next queued event is still delivered.
    agent.set_entry(entry("after", 9, 100)).await.unwrap();
    let status = next_status(&mut status_rx).await;
    assert_eq!(status.name, "after");
    assert_eq!(status.state, FlowState::Installed);

    let faults = agent.recent_faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].callback, "on_oper_status");
    assert!(faults[0].message.contains("injected failure"));
    agent.stop().await;
}

// ── Control protocol ────────────────────────────────────────────────

#[tokio::test]
async fn control_stream_drives_flows_and_eof_terminates() {
    let script = b"flowA add 10.0.0.5 Ethernet1\n\
                   bad line\n\
                   flowA delete\n\
                   flowB add 10.0.0.6 Ethernet2\n\
                   ghost delete 1.2.3.4 Ethernet1\n"
        .as_slice();

    let (link, _sim) = SimFabric::spawn(SimConfig::default());
    let agent = Agent::new(AgentConfig::default(), link);
    agent.start().unwrap();
    agent
        .lifecycle()
        .wait_for(|s| matches!(s, Lifecycle::Running))
        .await
        .unwrap();
    agent.attach_control(script);

    // EOF begins graceful termination.
    timeout(WAIT, agent.run_until_stopped()).await.unwrap();

    // The malformed lines ("bad line", two-token delete) were skipped;
    // the valid adds went through with the default priority.
    let flow_a = agent.flows().get("flowA").unwrap();
    assert_eq!(flow_a.entry.priority, 100);
    assert!(flow_a.entry.matches.field_set.ip_dst);
    assert_eq!(flow_a.entry.matches.ip_dst, Ipv4Addr::new(10, 0, 0, 5));
    assert_eq!(flow_a.entry.matches.ip_dst_mask, Ipv4Addr::BROADCAST);
    assert!(
        flow_a
            .entry
            .action
            .output_intfs
            .contains(&IntfId::from("Ethernet1"))
    );

    let flow_b = agent.flows().get("flowB").unwrap();
    assert_eq!(flow_b.entry.matches.ip_dst, Ipv4Addr::new(10, 0, 0, 6));
    assert_eq!(agent.flows().len(), 2);
    agent.stop().await;
}

#[tokio::test]
async fn control_delete_removes_previous_add() {
    let script = b"flowA add 10.0.0.5 Ethernet1\n\
                   flowA delete 10.0.0.5 Ethernet1\n"
        .as_slice();

    let (link, _sim) = SimFabric::spawn(SimConfig::default());
    let agent = Agent::new(AgentConfig::default(), link);
    agent.start().unwrap();
    agent
        .lifecycle()
        .wait_for(|s| matches!(s, Lifecycle::Running))
        .await
        .unwrap();
    agent.attach_control(script);

    timeout(WAIT, agent.run_until_stopped()).await.unwrap();
    assert!(agent.flows().is_empty());
    agent.stop().await;
}

// ── Resync ──────────────────────────────────────────────────────────

struct ResyncOnInit {
    reaffirm: Vec<FlowEntry>,
}

impl AgentHandler for ResyncOnInit {
    fn on_initialized(&mut self, ctx: &AgentContext) -> Result<(), HandlerError> {
        ctx.resync_begin()?;
        for entry in &self.reaffirm {
            ctx.set_entry(entry.clone())?;
        }
        ctx.resync_end()?;
        Ok(())
    }
}

#[tokio::test]
async fn resync_keeps_only_reaffirmed_entries() {
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let preinstalled = vec![
        entry("a", 1, 100),
        entry("b", 2, 100),
        entry("c", 3, 100),
    ];
    let sim_config = SimConfig {
        preinstalled,
        ..SimConfig::default()
    };

    let (link, sim) = SimFabric::spawn(sim_config);
    let agent = Agent::new(AgentConfig::default(), link);
    agent
        .register_agent_handler(ResyncOnInit {
            reaffirm: vec![entry("a", 1, 100), entry("c", 3, 100)],
        })
        .unwrap();
    agent.register_flow_handler(FlowRecorder(status_tx)).unwrap();
    agent.watch_all_flows(true);
    agent.start().unwrap();
    agent
        .lifecycle()
        .wait_for(|s| matches!(s, Lifecycle::Running))
        .await
        .unwrap();

    // The store settles synchronously inside on_initialized.
    assert!(agent.flows().exists("a"));
    assert!(!agent.flows().exists("b"));
    assert!(agent.flows().exists("c"));

    // The stale entry's removal is acknowledged by the fabric.
    loop {
        let status = next_status(&mut status_rx).await;
        if status.name == "b" {
            assert_eq!(status.state, FlowState::Removed);
            break;
        }
    }
    let hw: Vec<String> = sim.flow_states().await.into_iter().map(|(n, _)| n).collect();
    assert_eq!(hw, vec!["a".to_owned(), "c".to_owned()]);
    agent.stop().await;
}

#[tokio::test]
async fn resync_end_on_first_boot_is_noop() {
    let (agent, _sim) = started_agent(AgentConfig::default(), SimConfig::default()).await;
    agent.resync_end().await.unwrap();
    assert!(agent.flows().is_empty());
    agent.stop().await;
}

// ── Fault injection via a hand-driven fabric ────────────────────────

async fn sync_endpoint(updates: &mpsc::Sender<FabricUpdate>) {
    updates
        .send(FabricUpdate::IntfSnapshot(vec![(eth(1), OperStatus::Up)]))
        .await
        .unwrap();
    updates.send(FabricUpdate::FlowSnapshot(vec![])).await.unwrap();
    updates.send(FabricUpdate::Synced).await.unwrap();
}

#[tokio::test]
async fn missing_ack_times_out_and_rejects() {
    let config = AgentConfig {
        ack_timeout: Duration::from_millis(50),
        ack_retries: 1,
        ..AgentConfig::default()
    };

    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let (link, mut endpoint) = FabricLink::channel(16, 16);
    let agent = Agent::new(config, link);
    agent.register_flow_handler(FlowRecorder(status_tx)).unwrap();
    agent.watch_all_flows(true);
    agent.start().unwrap();

    sync_endpoint(&endpoint.updates).await;
    agent
        .lifecycle()
        .wait_for(|s| matches!(s, Lifecycle::Running))
        .await
        .unwrap();

    agent.set_entry(entry("slow", 1, 100)).await.unwrap();

    // The fabric swallows the install and the retry without acking.
    let first = timeout(WAIT, endpoint.requests.recv()).await.unwrap().unwrap();
    assert!(matches!(first, FabricRequest::Install(_)));
    let retry = timeout(WAIT, endpoint.requests.recv()).await.unwrap().unwrap();
    assert!(matches!(retry, FabricRequest::Install(_)));

    let status = next_status(&mut status_rx).await;
    assert_eq!(status.name, "slow");
    assert_eq!(
        status.state,
        FlowState::Rejected(RejectReason::AckTimeout)
    );
    agent.stop().await;
}

#[tokio::test]
async fn fabric_close_rejects_outstanding_and_terminates() {
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let (link, mut endpoint) = FabricLink::channel(16, 16);
    let agent = Agent::new(AgentConfig::default(), link);
    agent.register_flow_handler(FlowRecorder(status_tx)).unwrap();
    agent.watch_all_flows(true);
    agent.start().unwrap();

    sync_endpoint(&endpoint.updates).await;
    agent
        .lifecycle()
        .wait_for(|s| matches!(s, Lifecycle::Running))
        .await
        .unwrap();

    agent.set_entry(entry("orphan", 1, 100)).await.unwrap();
    let _ = timeout(WAIT, endpoint.requests.recv()).await.unwrap();

    endpoint.updates.send(FabricUpdate::Closed).await.unwrap();

    let status = next_status(&mut status_rx).await;
    assert_eq!(status.name, "orphan");
    assert_eq!(
        status.state,
        FlowState::Rejected(RejectReason::FabricClosed)
    );

    timeout(WAIT, agent.run_until_stopped()).await.unwrap();
    agent.stop().await;
}

// ── Status registry ─────────────────────────────────────────────────

struct StatusOnInit;

impl AgentHandler for StatusOnInit {
    fn on_initialized(&mut self, ctx: &AgentContext) -> Result<(), HandlerError> {
        ctx.status_set("Total intf changes", "0");
        Ok(())
    }
}

#[tokio::test]
async fn status_fields_are_published() {
    let (link, _sim) = SimFabric::spawn(SimConfig::default());
    let agent = Agent::new(AgentConfig::default(), link);
    agent.register_agent_handler(StatusOnInit).unwrap();
    agent.start().unwrap();
    agent
        .lifecycle()
        .wait_for(|s| matches!(s, Lifecycle::Running))
        .await
        .unwrap();

    assert_eq!(
        agent.status().get("Total intf changes").as_deref(),
        Some("0")
    );
    agent.status_set("Total intf changes", "7");
    assert_eq!(
        agent.status().get("Total intf changes").as_deref(),
        Some("7")
    );
    agent.stop().await;
}
