//! Report formatters. All three targets share the same summary header and
//! the same basis ordering; each frames it in its own syntax.

pub mod aguri;
pub mod csv;
pub mod json;

use std::mem;

use chrono::{Local, TimeZone};
use hhh::{Basis, Counters, Engine};
use itertools::Itertools;
use odflow::FlowId;

use crate::query::Query;

/// Header fields common to every output format.
pub struct Summary {
    pub start: i64,
    pub end: i64,
    pub total: Counters,
    pub basis: Basis,
    pub threshold: f64,
}

impl Summary {
    pub fn new(query: &Query, total: Counters, start: i64, end: i64) -> Summary {
        Summary {
            start,
            end,
            total,
            basis: query.basis,
            threshold: query.threshold,
        }
    }

    /// Average rate over the window, auto-ranged in decimal steps, plus
    /// packets per second. A degenerate window reads as zero.
    pub fn avg_rate(&self) -> String {
        let sec = (self.end - self.start) as f64;
        if sec <= 0.0 {
            return "0.00bps 0.00pps".to_string();
        }
        let bps = self.total.byte as f64 * 8.0 / sec;
        let pps = self.total.packet as f64 / sec;
        let (value, unit) = if bps > 1_000_000_000.0 {
            (bps / 1_000_000_000.0, "Gbps")
        } else if bps > 1_000_000.0 {
            (bps / 1_000_000.0, "Mbps")
        } else if bps > 1_000.0 {
            (bps / 1_000.0, "Kbps")
        } else {
            (bps, "bps")
        };
        format!("{:.2}{} {:.2}pps", value, unit, pps)
    }

    pub fn criteria(&self) -> &'static str {
        match self.basis {
            Basis::Byte => "byte",
            Basis::Packet => "packet",
            Basis::Combination => "combination",
        }
    }
}

/// Renders a timestamp the way the preamble expects it, with the
/// parenthesised human-friendly duplicate.
pub fn local_stamp(t: i64) -> String {
    match Local.timestamp_opt(t, 0).earliest() {
        Some(dt) => format!(
            "{} ({})",
            dt.format("%a %b %d %H:%M:%S %Y"),
            dt.format("%Y/%m/%d %H:%M:%S")
        ),
        None => format!("@{}", t),
    }
}

fn pct(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

fn basis_value(basis: Basis, total: Counters, byte: u64, packet: u64) -> f64 {
    match basis {
        Basis::Byte => byte as f64,
        Basis::Packet => packet as f64,
        Basis::Combination => {
            let fbyte = pct(byte, total.byte);
            let fpacket = pct(packet, total.packet);
            fbyte.max(fpacket)
        }
    }
}

/// The aggregates to report, ordered by the basis, capped by `-n`, with
/// each aggregate's subflows ordered the same way.
pub fn display_list(engine: &mut Engine, query: &Query, total: Counters) -> Vec<FlowId> {
    let mut ids = engine.aggregates.clone();
    ids.sort_by(|&a, &b| {
        let fa = basis_value(query.basis, total, engine.arena[a].byte, engine.arena[a].packet);
        let fb = basis_value(query.basis, total, engine.arena[b].byte, engine.arena[b].packet);
        fb.total_cmp(&fa)
    });
    if query.nflows > 0 {
        ids.truncate(query.nflows);
    }
    for &id in &ids {
        let mut subs = mem::take(&mut engine.arena[id].subflows);
        subs.sort_by(|&a, &b| {
            let fa = basis_value(query.basis, total, engine.arena[a].byte, engine.arena[a].packet);
            let fb = basis_value(query.basis, total, engine.arena[b].byte, engine.arena[b].packet);
            fb.total_cmp(&fa)
        });
        engine.arena[id].subflows = subs;
    }
    ids
}

/// The `[rank] <spec>: <byte> (<pct>%)\t<packet> (<pct>%)` line.
pub fn flow_label(engine: &Engine, rank: usize, id: FlowId, total: Counters) -> String {
    let flow = &engine.arena[id];
    format!(
        "[{:2}] {}: {} ({:.2}%)\t{} ({:.2}%)",
        rank,
        flow.spec.display(flow.af),
        flow.byte,
        pct(flow.byte, total.byte),
        flow.packet,
        pct(flow.packet, total.packet)
    )
}

/// The secondary-dimension distribution of one aggregate, percentages
/// relative to the aggregate itself. An empty list reads as an unsplit
/// wildcard so the line stays parseable.
pub fn subflow_line(engine: &Engine, id: FlowId) -> String {
    let flow = &engine.arena[id];
    if flow.subflows.is_empty() {
        return "[*:*:*] 100.00% 100.00%".to_string();
    }
    flow.subflows
        .iter()
        .map(|&sub| {
            let sf = &engine.arena[sub];
            format!(
                "[{}] {:.2}% {:.2}%",
                sf.spec.display(sf.af),
                pct(sf.byte, flow.byte),
                pct(sf.packet, flow.packet)
            )
        })
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_auto_range() {
        let s = |byte: u64, sec: i64| Summary {
            start: 0,
            end: sec,
            total: Counters { byte, packet: 100 },
            basis: Basis::Byte,
            threshold: 1.0,
        };
        assert_eq!(s(100, 1).avg_rate(), "800.00bps 100.00pps");
        assert_eq!(s(1_000_000, 1).avg_rate(), "8.00Mbps 100.00pps");
        assert_eq!(s(1_000_000_000, 1).avg_rate(), "8.00Gbps 100.00pps");
        assert_eq!(s(12345, 0).avg_rate(), "0.00bps 0.00pps");
    }
}
