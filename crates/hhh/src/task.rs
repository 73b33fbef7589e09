use std::rc::Rc;

use odflow::{AddrFamily, FlowId};

/// One unit of lattice work: aggregate the flows of `list[..end]` at
/// `label` and harvest the heavy hitters.
///
/// Root tasks share the family's sorted flow list; refinement tasks borrow
/// the cache of the aggregate they refine and carry it as `orig`. A task
/// marked `done` has already been processed and is revisited only to
/// recount and re-test `orig` after its children ran.
#[derive(Debug)]
pub struct Task {
    pub label: (u8, u8),
    pub af: AddrFamily,
    /// Sub-lattice bit-step; 0 for lattice-grid tasks, then 4, 2, 1 along
    /// a refinement chain.
    pub step: u8,
    pub list: Rc<Vec<FlowId>>,
    /// Flows past this index have too short a prefix sum to contribute.
    pub end: usize,
    /// The aggregate this task refines, if any.
    pub orig: Option<FlowId>,
    pub done: bool,
}
