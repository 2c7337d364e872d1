// ── Reactive state stores ──
//
// The flow table holds desired forwarding state; the interface table
// holds observed operational state. Both are mutated only from the
// runtime's event loop and publish snapshots through `watch` channels.

mod flow_table;
mod intf_table;

pub use flow_table::{FlowRecord, FlowTable};
pub use intf_table::{IntfState, IntfTable};
