//! Output formatting: tables for interactive use, JSON for scripting.

use std::io::{self, IsTerminal};
use std::sync::Arc;

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use flowly_core::{FlowRecord, IntfState};
use flowly_hal::{FlowAction, FlowMatch, FlowState};

use crate::cli::{ColorMode, OutputFormat};

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: &ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// Render a flow state for live output, colored when enabled.
pub fn paint_state(state: FlowState, color: bool) -> String {
    if !color {
        return state.to_string();
    }
    match state {
        FlowState::Installed => state.to_string().green().to_string(),
        FlowState::Pending => state.to_string().yellow().to_string(),
        FlowState::Shadowed | FlowState::Removed => state.to_string().dimmed().to_string(),
        FlowState::Rejected(_) => state.to_string().red().to_string(),
    }
}

// ── Field summaries ──────────────────────────────────────────────────

/// Compact one-line rendering of a match predicate.
pub fn summarize_match(matches: &FlowMatch) -> String {
    let fs = &matches.field_set;
    let mut parts = Vec::new();

    if fs.input_intfs {
        let intfs: Vec<&str> = matches.input_intfs.iter().map(|i| i.as_str()).collect();
        parts.push(format!("in={}", intfs.join(",")));
    }
    if fs.eth_src {
        parts.push(format!("eth_src={}/{}", matches.eth_src, matches.eth_src_mask));
    }
    if fs.eth_dst {
        parts.push(format!("eth_dst={}/{}", matches.eth_dst, matches.eth_dst_mask));
    }
    if fs.eth_type {
        parts.push(format!("eth_type=0x{:04x}", matches.eth_type));
    }
    if fs.ip_src {
        parts.push(format!("ip_src={}/{}", matches.ip_src, matches.ip_src_mask));
    }
    if fs.ip_dst {
        parts.push(format!("ip_dst={}/{}", matches.ip_dst, matches.ip_dst_mask));
    }

    if parts.is_empty() {
        "any".into()
    } else {
        parts.join(" ")
    }
}

/// Compact one-line rendering of an action set.
pub fn summarize_action(action: &FlowAction) -> String {
    if action.is_drop() {
        return "drop".into();
    }

    let set = &action.action_set;
    let mut parts = Vec::new();

    if set.output_intfs {
        let intfs: Vec<&str> = action.output_intfs.iter().map(|i| i.as_str()).collect();
        parts.push(format!("out={}", intfs.join(",")));
    }
    if set.eth_src {
        parts.push(format!("set_eth_src={}", action.eth_src));
    }
    if set.eth_dst {
        parts.push(format!("set_eth_dst={}", action.eth_dst));
    }
    if set.ip_src {
        parts.push(format!("set_ip_src={}", action.ip_src));
    }
    if set.ip_dst {
        parts.push(format!("set_ip_dst={}", action.ip_dst));
    }

    if parts.is_empty() {
        "none".into()
    } else {
        parts.join(" ")
    }
}

// ── Rows ─────────────────────────────────────────────────────────────

#[derive(Tabled)]
struct FlowRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "PRIORITY")]
    priority: u16,
    #[tabled(rename = "MATCH")]
    matches: String,
    #[tabled(rename = "ACTION")]
    action: String,
}

#[derive(Tabled)]
struct IntfRow {
    #[tabled(rename = "INTERFACE")]
    id: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "DESCRIPTION")]
    description: String,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "FIELD")]
    key: String,
    #[tabled(rename = "VALUE")]
    value: String,
}

// ── Renderers ────────────────────────────────────────────────────────

/// Render the final run summary in the selected format.
pub fn render_summary(
    format: &OutputFormat,
    flows: &Arc<Vec<Arc<FlowRecord>>>,
    intfs: &Arc<Vec<Arc<IntfState>>>,
    status: &[(String, String)],
) -> String {
    match format {
        OutputFormat::Table => {
            let mut out = String::new();

            if !flows.is_empty() {
                let rows: Vec<FlowRow> = flows
                    .iter()
                    .map(|r| FlowRow {
                        name: r.entry.name.clone(),
                        state: r.state.to_string(),
                        priority: r.entry.priority,
                        matches: summarize_match(&r.entry.matches),
                        action: summarize_action(&r.entry.action),
                    })
                    .collect();
                out.push_str("Flow table:\n");
                out.push_str(&render_table(&rows));
                out.push('\n');
            }

            if !intfs.is_empty() {
                let rows: Vec<IntfRow> = intfs
                    .iter()
                    .map(|s| IntfRow {
                        id: s.id.to_string(),
                        status: s.oper_status.to_string(),
                        description: s.description.clone(),
                    })
                    .collect();
                out.push_str("Interfaces:\n");
                out.push_str(&render_table(&rows));
                out.push('\n');
            }

            if !status.is_empty() {
                let rows: Vec<StatusRow> = status
                    .iter()
                    .map(|(key, value)| StatusRow {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .collect();
                out.push_str("Agent status:\n");
                out.push_str(&render_table(&rows));
                out.push('\n');
            }

            out
        }

        OutputFormat::Json => {
            let flows: Vec<serde_json::Value> = flows
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "name": r.entry.name,
                        "state": r.state,
                        "priority": r.entry.priority,
                        "match": r.entry.matches,
                        "action": r.entry.action,
                    })
                })
                .collect();
            let intfs: Vec<serde_json::Value> = intfs
                .iter()
                .map(|s| serde_json::to_value(s.as_ref()).unwrap_or_default())
                .collect();
            let status: serde_json::Map<String, serde_json::Value> = status
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();

            let doc = serde_json::json!({
                "flows": flows,
                "interfaces": intfs,
                "status": status,
            });
            serde_json::to_string_pretty(&doc).unwrap_or_default()
        }
    }
}

fn render_table<R: Tabled>(rows: &[R]) -> String {
    let mut table = Table::new(rows);
    table.with(Style::sharp());
    table.to_string()
}

/// Print rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    println!("{output}");
}
