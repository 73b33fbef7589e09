use std::ops::{Index, IndexMut};

use crate::spec::{AddrFamily, FlowSpec};

/// Handle to a flow record in a [`FlowArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowId(u32);

impl FlowId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// A counter attached to a flow for the secondary aggregation dimension:
/// protocol/port entries in address view, address pairs in protocol view.
#[derive(Debug, Clone, Copy)]
pub struct SubCount {
    pub spec: FlowSpec,
    pub af: AddrFamily,
    pub byte: u64,
    pub packet: u64,
}

/// One origin-destination flow record.
///
/// Records are created by the reader on first occurrence of a spec and by
/// the lattice walker when truncating to an aggregate spec. `cache` lists
/// the finer flows that contributed to this record during truncation; the
/// listed records stay owned by the arena.
#[derive(Debug)]
pub struct OdFlow {
    pub spec: FlowSpec,
    pub af: AddrFamily,

    pub byte: u64,
    pub packet: u64,

    /// Counters were folded into an accepted aggregate; the flow no longer
    /// contributes to coarser labels.
    pub consumed: bool,
    /// The record itself entered the accepted aggregate list.
    pub accepted: bool,

    /// Position in the accepted list, assigned once discovery completes.
    pub list_index: usize,

    /// Contributing finer flows, filled during truncation. Non-owning.
    pub cache: Vec<FlowId>,
    /// Heavy hitters of the nested sub-aggregation, attached on acceptance.
    pub subflows: Vec<FlowId>,
    /// Raw secondary-dimension counters attached by the reader.
    pub sub_counts: Vec<SubCount>,
}

impl OdFlow {
    fn new(spec: FlowSpec, af: AddrFamily) -> OdFlow {
        OdFlow {
            spec,
            af,
            byte: 0,
            packet: 0,
            consumed: false,
            accepted: false,
            list_index: 0,
            cache: Vec::new(),
            subflows: Vec::new(),
            sub_counts: Vec::new(),
        }
    }

    /// Accumulates a secondary-dimension counter, merging with an existing
    /// entry of the same spec. The lists stay short (one entry per
    /// protocol seen on the flow), so a linear scan is enough.
    pub fn add_sub_count(&mut self, spec: FlowSpec, af: AddrFamily, byte: u64, packet: u64) {
        if let Some(sub) = self.sub_counts.iter_mut().find(|s| s.spec == spec) {
            sub.byte += byte;
            sub.packet += packet;
            return;
        }
        self.sub_counts.push(SubCount {
            spec,
            af,
            byte,
            packet,
        });
    }
}

/// Append-only arena owning every flow record of an engine run.
///
/// All other structures (hash tables, caches, the accepted list) refer to
/// records by [`FlowId`]. A rejected candidate is simply abandoned; nothing
/// is reclaimed before the engine itself is dropped.
#[derive(Debug, Default)]
pub struct FlowArena {
    flows: Vec<OdFlow>,
}

impl FlowArena {
    pub fn alloc(&mut self, spec: FlowSpec, af: AddrFamily) -> FlowId {
        let id = FlowId(self.flows.len() as u32);
        self.flows.push(OdFlow::new(spec, af));
        id
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

impl Index<FlowId> for FlowArena {
    type Output = OdFlow;

    fn index(&self, id: FlowId) -> &OdFlow {
        &self.flows[id.index()]
    }
}

impl IndexMut<FlowId> for FlowArena {
    fn index_mut(&mut self, id: FlowId) -> &mut OdFlow {
        &mut self.flows[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::parse_proto_spec;

    #[test]
    fn arena_hands_out_stable_ids() {
        let mut arena = FlowArena::default();
        let a = arena.alloc(FlowSpec::default(), AddrFamily::Inet);
        let b = arena.alloc(FlowSpec::default(), AddrFamily::Inet6);
        assert_ne!(a, b);
        arena[a].byte = 7;
        assert_eq!(arena[a].byte, 7);
        assert_eq!(arena[b].byte, 0);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn sub_counts_merge_by_spec() {
        let mut arena = FlowArena::default();
        let id = arena.alloc(FlowSpec::default(), AddrFamily::Inet);
        let tcp = parse_proto_spec("6", "80", "*").unwrap();
        let udp = parse_proto_spec("17", "53", "*").unwrap();
        arena[id].add_sub_count(tcp, AddrFamily::Proto, 100, 1);
        arena[id].add_sub_count(udp, AddrFamily::Proto, 50, 1);
        arena[id].add_sub_count(tcp, AddrFamily::Proto, 100, 1);
        assert_eq!(arena[id].sub_counts.len(), 2);
        let merged = arena[id].sub_counts.iter().find(|s| s.spec == tcp).unwrap();
        assert_eq!((merged.byte, merged.packet), (200, 2));
    }
}
