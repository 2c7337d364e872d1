//! `flowly run` -- run an agent against the simulated fabric, driven
//! by the control protocol.
//!
//! Bootstraps the way a typical flow agent does: install a default
//! drop-all-IPv4 entry at initialization, watch interface and flow
//! status, and keep running change counters in the status registry.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tracing::info;

use flowly_core::{
    Agent, AgentContext, AgentHandler, FlowHandler, HandlerError, IntfHandler,
};
use flowly_hal::{FlowAction, FlowEntry, FlowMatch, FlowState, IntfId, OperStatus, SimFabric};

use crate::cli::{GlobalOpts, RunArgs};
use crate::error::CliError;
use crate::output;

/// Name of the bootstrap entry that drops unmatched IPv4 traffic.
const DEFAULT_FLOW_NAME: &str = "default-drop";

// ── Handlers ─────────────────────────────────────────────────────────

struct Bootstrap {
    default_flow: bool,
}

impl AgentHandler for Bootstrap {
    fn on_initialized(&mut self, ctx: &AgentContext) -> Result<(), HandlerError> {
        info!("agent initialized");
        ctx.watch_all_intfs(true);
        ctx.watch_all_flows(true);
        ctx.status_set("Total intf changes", "0");
        ctx.status_set("Total flow status changes", "0");

        if self.default_flow {
            // Match any IPv4 destination, drop. Priority 0 so control
            // entries always win.
            let mut matches = FlowMatch::new();
            matches.set_ip_dst(Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED);
            let entry = FlowEntry::new(
                DEFAULT_FLOW_NAME,
                matches,
                FlowAction::drop_traffic(),
                0,
            );
            ctx.set_entry(entry)?;
        }
        Ok(())
    }
}

struct FlowWatcher {
    changes: Arc<AtomicU64>,
    quiet: bool,
    color: bool,
}

impl FlowHandler for FlowWatcher {
    fn on_flow_status(
        &mut self,
        ctx: &AgentContext,
        name: &str,
        state: FlowState,
    ) -> Result<(), HandlerError> {
        let total = self.changes.fetch_add(1, Ordering::Relaxed) + 1;
        ctx.status_set("Total flow status changes", total.to_string());
        if !self.quiet {
            println!(
                "flow {name} status changed to {}",
                output::paint_state(state, self.color)
            );
        }
        Ok(())
    }
}

struct IntfWatcher {
    changes: Arc<AtomicU64>,
    quiet: bool,
}

impl IntfHandler for IntfWatcher {
    fn on_oper_status(
        &mut self,
        ctx: &AgentContext,
        intf: &IntfId,
        state: OperStatus,
    ) -> Result<(), HandlerError> {
        let total = self.changes.fetch_add(1, Ordering::Relaxed) + 1;
        let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");

        ctx.set_description(intf, &format!("Last status change at {stamp}"))?;
        ctx.status_set("Total intf changes", total.to_string());
        ctx.status_set(format!("Last change of {intf}"), state.to_string());

        if !self.quiet {
            println!("interface {intf} is now {state}");
        }
        Ok(())
    }
}

// ── Entry point ──────────────────────────────────────────────────────

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut cfg = flowly_config::load_config(global.config.as_deref())?;

    if let Some(ref control) = args.control {
        cfg.control.endpoint = control.parse().map_err(
            |e: flowly_core::control::ParseEndpointError| CliError::Validation {
                field: "--control".into(),
                reason: e.to_string(),
            },
        )?;
    }
    if let Some(priority) = args.priority {
        cfg.agent.default_priority = priority;
    }

    let color = output::should_color(&global.color);
    let flow_changes = Arc::new(AtomicU64::new(0));
    let intf_changes = Arc::new(AtomicU64::new(0));

    let (link, _sim) = SimFabric::spawn(cfg.sim_config());
    let agent = Agent::new(cfg.agent_config(), link);

    agent.register_agent_handler(Bootstrap {
        default_flow: !args.no_default_flow,
    })?;
    agent.register_flow_handler(FlowWatcher {
        changes: Arc::clone(&flow_changes),
        quiet: global.quiet,
        color,
    })?;
    agent.register_intf_handler(IntfWatcher {
        changes: Arc::clone(&intf_changes),
        quiet: global.quiet,
    })?;

    agent.start()?;
    info!(control = %cfg.control.endpoint, "agent running");

    let source = cfg.control.endpoint.open().await?;
    agent.attach_control(source);

    tokio::select! {
        () = agent.run_until_stopped() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received; terminating");
            agent.exit();
            agent.run_until_stopped().await;
        }
    }

    let summary = output::render_summary(
        &global.output,
        &agent.flows().snapshot(),
        &agent.intfs().snapshot(),
        &agent.status().snapshot(),
    );
    agent.stop().await;

    output::print_output(&summary, global.quiet);
    if !global.quiet {
        println!(
            "Saw {} flow status changes",
            flow_changes.load(Ordering::Relaxed)
        );
    }
    Ok(())
}
