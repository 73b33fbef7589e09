//! Hierarchical heavy hitter extraction over two-dimensional prefix
//! lattices.
//!
//! The engine walks prefix-length pairs in non-increasing order of length
//! sum, truncating every live flow to each pair and keeping the aggregates
//! whose counters clear a threshold share of the traffic. Heavy aggregates
//! at interior labels are refined through sub-lattice tasks before the
//! parent is re-tested on what its children left behind. Each accepted
//! aggregate is then re-aggregated along the secondary dimension
//! (protocol/port for address views, addresses for the protocol view).

mod engine;
mod labels;
mod task;

pub use self::engine::{Basis, Counters, Engine, EngineConfig, FlowSample, View};
pub use self::labels::{child_label, labels_for, next_step};
pub use self::task::Task;
