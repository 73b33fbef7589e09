//! Flow records and the primitives they are aggregated with.
//!
//! An *origin-destination flow* (odflow) pairs a source prefix with a
//! destination prefix and carries byte and packet counters. The same shape
//! describes IPv4 and IPv6 address pairs and protocol/port pairs; the
//! aggregation engine treats all three uniformly through [`FlowSpec`] and
//! [`AddrFamily`].

mod flow;
mod spec;
mod table;

pub use self::flow::{FlowArena, FlowId, OdFlow, SubCount};
pub use self::spec::{
    parse_addr, parse_proto_spec, prefix_eq, prefix_set, AddrFamily, FlowSpec, SpecParseError,
};
pub use self::table::{FlowTable, NBUCKETS};
