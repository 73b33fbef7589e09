//! The aggregation engine: task-queue walk over the prefix lattices,
//! threshold harvest, refinement, and the nested secondary aggregation.

use std::collections::VecDeque;
use std::mem;
use std::rc::Rc;

use odflow::{AddrFamily, FlowArena, FlowId, FlowSpec, FlowTable};

use crate::labels::{child_label, labels_for, next_step};
use crate::task::Task;

/// Which counter the threshold test and the report ordering run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Basis {
    Byte,
    Packet,
    /// Either counter clearing its threshold qualifies an aggregate.
    Combination,
}

impl Basis {
    pub fn counts_bytes(&self) -> bool {
        matches!(self, Basis::Byte | Basis::Combination)
    }

    pub fn counts_packets(&self) -> bool {
        matches!(self, Basis::Packet | Basis::Combination)
    }
}

/// Primary aggregation dimension. The other dimension becomes the nested
/// sub-aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Address,
    Protocol,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub byte: u64,
    pub packet: u64,
}

impl Counters {
    pub fn add(&mut self, byte: u64, packet: u64) {
        self.byte += byte;
        self.packet += packet;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub basis: Basis,
    pub view: View,
    /// Heavy-hitter threshold in percent of the universe totals.
    pub threshold: f64,
}

/// One parsed flow measurement handed to the engine.
#[derive(Debug, Clone, Copy)]
pub struct FlowSample {
    pub spec: FlowSpec,
    pub af: AddrFamily,
    pub byte: u64,
    pub packet: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Main,
    Sub,
}

/// Absolute counter thresholds derived from a universe total.
#[derive(Debug, Clone, Copy, Default)]
struct Thresh {
    byte: f64,
    packet: f64,
}

impl Thresh {
    fn of(total: Counters, percent: f64) -> Thresh {
        Thresh {
            byte: total.byte as f64 * percent / 100.0,
            packet: total.packet as f64 * percent / 100.0,
        }
    }
}

/// Per-family thresholds; each family is its own universe.
#[derive(Debug, Default)]
struct ThreshSet {
    v4: Thresh,
    v6: Thresh,
    proto: Thresh,
}

impl ThreshSet {
    fn get(&self, af: AddrFamily) -> Thresh {
        match af {
            AddrFamily::Inet => self.v4,
            AddrFamily::Inet6 => self.v6,
            AddrFamily::Proto => self.proto,
        }
    }

    fn set(&mut self, af: AddrFamily, t: Thresh) {
        match af {
            AddrFamily::Inet => self.v4 = t,
            AddrFamily::Inet6 => self.v6 = t,
            AddrFamily::Proto => self.proto = t,
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    v4: FlowTable,
    v6: FlowTable,
    proto: FlowTable,
}

impl Tables {
    fn by_af(&mut self, af: AddrFamily) -> &mut FlowTable {
        match af {
            AddrFamily::Inet => &mut self.v4,
            AddrFamily::Inet6 => &mut self.v6,
            AddrFamily::Proto => &mut self.proto,
        }
    }
}

/// Engine state for one analysis window: the record arena, the primary
/// per-family stores, the running totals, and the accepted aggregate list.
pub struct Engine {
    pub arena: FlowArena,
    cfg: EngineConfig,
    tables: Tables,
    mode: Mode,
    total: Counters,
    thresh: ThreshSet,
    thresh_sub: ThreshSet,
    /// Accepted aggregates in discovery order.
    pub aggregates: Vec<FlowId>,
    pending_sub: Vec<FlowId>,
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> Engine {
        Engine {
            arena: FlowArena::default(),
            cfg,
            tables: Tables::default(),
            mode: Mode::Main,
            total: Counters::default(),
            thresh: ThreshSet::default(),
            thresh_sub: ThreshSet::default(),
            aggregates: Vec::new(),
            pending_sub: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Totals of the primary universe accumulated so far.
    pub fn total(&self) -> Counters {
        self.total
    }

    /// Accounts one input record during discovery. In address view the
    /// address pair is primary and the protocol entries attach to it; the
    /// protocol view flips the two dimensions.
    pub fn record(&mut self, main: FlowSample, subs: &[FlowSample]) {
        match self.cfg.view {
            View::Address => {
                let id = self
                    .tables
                    .by_af(main.af)
                    .find_or_insert(&mut self.arena, main.spec, main.af);
                let flow = &mut self.arena[id];
                flow.byte += main.byte;
                flow.packet += main.packet;
                for s in subs {
                    flow.add_sub_count(s.spec, s.af, s.byte, s.packet);
                }
                self.total.add(main.byte, main.packet);
            }
            View::Protocol => {
                for s in subs {
                    let id = self
                        .tables
                        .by_af(s.af)
                        .find_or_insert(&mut self.arena, s.spec, s.af);
                    let flow = &mut self.arena[id];
                    flow.byte += s.byte;
                    flow.packet += s.packet;
                    flow.add_sub_count(main.spec, main.af, main.byte, main.packet);
                    self.total.add(s.byte, s.packet);
                }
            }
        }
    }

    /// Runs heavy-hitter extraction over everything recorded since the
    /// last reset, filling `aggregates`.
    pub fn aggregate(&mut self) {
        let mut tables = mem::take(&mut self.tables);
        let mut queue = VecDeque::new();
        match self.cfg.view {
            View::Address => {
                self.seed_tasks(&mut tables, AddrFamily::Inet, &mut queue);
                self.seed_tasks(&mut tables, AddrFamily::Inet6, &mut queue);
            }
            View::Protocol => {
                self.seed_tasks(&mut tables, AddrFamily::Proto, &mut queue);
            }
        }
        tracing::debug!(
            tasks = queue.len(),
            byte = self.total.byte,
            packet = self.total.packet,
            "starting lattice walk"
        );
        self.run_queue(&mut queue, &mut tables);
        self.tables = tables;
        tracing::debug!(aggregates = self.aggregates.len(), "lattice walk finished");
    }

    /// Clears totals and the accepted list for the next aggregation
    /// period. Already-arenaed records stay behind untouched.
    pub fn reset_period(&mut self) {
        self.total = Counters::default();
        self.aggregates.clear();
        self.pending_sub.clear();
    }

    /// Pass-2 accumulation: insert-or-add without touching totals or
    /// secondary counters.
    pub fn bin(&mut self, sample: FlowSample) {
        let id = self
            .tables
            .by_af(sample.af)
            .find_or_insert(&mut self.arena, sample.spec, sample.af);
        let flow = &mut self.arena[id];
        flow.byte += sample.byte;
        flow.packet += sample.packet;
    }

    /// Drains the records binned since the previous call, in store order.
    pub fn drain_binned(&mut self) -> Vec<FlowId> {
        match self.cfg.view {
            View::Address => {
                let mut out = self.tables.v4.drain();
                out.extend(self.tables.v6.drain());
                out
            }
            View::Protocol => self.tables.proto.drain(),
        }
    }

    /// Drains one family's store into a sorted flow list and queues a task
    /// per lattice label, gated by binary search on the prefix-length sum.
    /// The family's threshold is fixed here, from the totals of the
    /// drained universe.
    fn seed_tasks(&mut self, tables: &mut Tables, af: AddrFamily, queue: &mut VecDeque<Task>) {
        let table = tables.by_af(af);
        if table.is_empty() {
            return;
        }
        let mut list = table.drain();

        let mut total = Counters::default();
        for &id in &list {
            let flow = &self.arena[id];
            if !flow.consumed {
                total.add(flow.byte, flow.packet);
            }
        }
        let thresh = Thresh::of(total, self.cfg.threshold);
        match self.mode {
            Mode::Main => self.thresh.set(af, thresh),
            Mode::Sub => self.thresh_sub.set(af, thresh),
        }

        let arena = &self.arena;
        list.sort_by(|&a, &b| {
            let (sa, sb) = (&arena[a].spec, &arena[b].spec);
            (sb.len_sum(), sb.srclen, sb.dstlen).cmp(&(sa.len_sum(), sa.srclen, sa.dstlen))
        });
        let list = Rc::new(list);

        for &label in labels_for(af) {
            let sum = label.0 as u16 + label.1 as u16;
            let end = list.partition_point(|&id| arena[id].spec.len_sum() >= sum);
            queue.push_back(Task {
                label,
                af,
                step: 0,
                list: Rc::clone(&list),
                end,
                orig: None,
                done: false,
            });
        }
    }

    /// Drains the task queue. Children land at the head so a refinement
    /// chain completes before the parent, which is then revisited in its
    /// `done` state and recounted on what the children left behind.
    fn run_queue(&mut self, queue: &mut VecDeque<Task>, tables: &mut Tables) {
        while let Some(mut task) = queue.pop_front() {
            if task.done {
                self.refresh(&task);
                continue;
            }
            let contributed = self.create_aggregates(&task, tables);
            let (spawned, new_tasks) = self.harvest(&task, tables, contributed);
            if spawned || !new_tasks.is_empty() {
                task.done = true;
                queue.push_front(task);
                for child in new_tasks {
                    queue.push_front(child);
                }
            } else {
                self.refresh(&task);
            }
        }
    }

    /// Truncates every live, sufficiently-long flow of the task list onto
    /// the task label, accumulating counters and caching contributors.
    /// Returns how many flows contributed.
    fn create_aggregates(&mut self, task: &Task, tables: &mut Tables) -> usize {
        let mut contributed = 0;
        for i in 0..task.end {
            let fid = task.list[i];
            let flow = &self.arena[fid];
            if flow.consumed {
                continue;
            }
            if flow.spec.srclen < task.label.0 || flow.spec.dstlen < task.label.1 {
                continue;
            }
            let (spec, af, byte, packet) = (flow.spec, flow.af, flow.byte, flow.packet);
            let agg = tables
                .by_af(task.af)
                .find_or_insert(&mut self.arena, spec.truncate(task.label), af);
            let aggflow = &mut self.arena[agg];
            aggflow.byte += byte;
            aggflow.packet += packet;
            aggflow.cache.push(fid);
            contributed += 1;
        }
        contributed
    }

    /// Applies the threshold test to every candidate of the task's store,
    /// spawning refinements for heavy aggregates at eligible labels and
    /// accepting the rest. Returns whether any candidate spawned, plus the
    /// tasks to queue.
    fn harvest(&mut self, task: &Task, tables: &mut Tables, contributed: usize) -> (bool, Vec<Task>) {
        let candidates = tables.by_af(task.af).drain();
        let mut new_tasks = Vec::new();
        let mut spawned = false;
        for id in candidates {
            let flow = &self.arena[id];
            if !self.is_heavy(task.af, flow.byte, flow.packet) {
                continue; // abandoned; the arena keeps the husk
            }
            spawned |= self.extract(task, id, contributed, &mut new_tasks);
        }
        if !spawned {
            if let Some(orig) = task.orig {
                if self.eligible(task) {
                    self.push_refinement(task, orig, &mut new_tasks);
                }
            }
        }
        (spawned, new_tasks)
    }

    /// Decides one heavy candidate: refine further, or accept now.
    fn extract(
        &mut self,
        task: &Task,
        id: FlowId,
        contributed: usize,
        new_tasks: &mut Vec<Task>,
    ) -> bool {
        // A refined aggregate absorbing every live flow of its list merely
        // restates the parent; drop it so the parent keeps its coarser
        // label.
        if task.step > 0 && self.arena[id].cache.len() >= contributed {
            return false;
        }
        if self.eligible(task) {
            if task.step == 0 {
                // revisit marker: recount this aggregate once its
                // refinement chain has consumed what it could
                new_tasks.push(Task {
                    label: task.label,
                    af: task.af,
                    step: task.step,
                    list: Rc::clone(&task.list),
                    end: 0,
                    orig: Some(id),
                    done: true,
                });
            }
            self.push_refinement(task, id, new_tasks);
            return true;
        }
        self.accept(id);
        false
    }

    /// Queues the next sub-lattice task over an aggregate's cache.
    fn push_refinement(&mut self, task: &Task, orig: FlowId, new_tasks: &mut Vec<Task>) {
        let step = next_step(task.step);
        let cache = &self.arena[orig].cache;
        if cache.len() > 1 && step > 0 {
            new_tasks.push(Task {
                label: child_label(task.label, task.step, step),
                af: task.af,
                step,
                list: Rc::new(cache.clone()),
                end: cache.len(),
                orig: Some(orig),
                done: false,
            });
        }
    }

    /// Recounts a refined aggregate from its cache and re-tests the
    /// threshold; children may have consumed the traffic that made it
    /// heavy.
    fn refresh(&mut self, task: &Task) {
        let Some(orig) = task.orig else { return };
        if self.arena[orig].accepted {
            // an earlier revisit along the same chain already took it
            return;
        }
        let cache = self.arena[orig].cache.clone();
        let mut count = Counters::default();
        for fid in cache {
            let flow = &self.arena[fid];
            if !flow.consumed {
                count.add(flow.byte, flow.packet);
            }
        }
        let flow = &mut self.arena[orig];
        flow.byte = count.byte;
        flow.packet = count.packet;
        if self.is_heavy(task.af, count.byte, count.packet) {
            self.accept(orig);
        }
    }

    /// Whether a task at this label may spawn sub-lattice refinements.
    fn eligible(&self, task: &Task) -> bool {
        if task.step % 2 != 0 {
            return false;
        }
        let (l0, l1) = task.label;
        if l0 == 0 || l1 == 0 {
            return false;
        }
        match task.af {
            AddrFamily::Inet => (l0, l1) != (32, 32) && l0 > 16 && l1 > 16,
            AddrFamily::Inet6 => (l0, l1) != (128, 128) && l0 > 64 && l1 > 64,
            AddrFamily::Proto => false,
        }
    }

    fn is_heavy(&self, af: AddrFamily, byte: u64, packet: u64) -> bool {
        if self.cfg.threshold == 0.0 {
            return true;
        }
        let thresh = match self.mode {
            Mode::Main => self.thresh.get(af),
            Mode::Sub => self.thresh_sub.get(af),
        };
        (self.cfg.basis.counts_bytes() && byte as f64 > thresh.byte)
            || (self.cfg.basis.counts_packets() && packet as f64 > thresh.packet)
    }

    /// Finalises a heavy aggregate. Main mode runs the nested secondary
    /// aggregation first; sub mode parks the record until the owning
    /// aggregate is accepted.
    fn accept(&mut self, id: FlowId) {
        match self.mode {
            Mode::Main => {
                self.sub_aggregate(id);
                self.consume_cache(id);
                let subflows = mem::take(&mut self.pending_sub);
                let flow = &mut self.arena[id];
                flow.accepted = true;
                flow.subflows = subflows;
                tracing::debug!(
                    spec = %flow.spec.display(flow.af),
                    byte = flow.byte,
                    packet = flow.packet,
                    subflows = flow.subflows.len(),
                    "accepted aggregate"
                );
                self.aggregates.push(id);
            }
            Mode::Sub => {
                self.consume_cache(id);
                self.arena[id].accepted = true;
                self.pending_sub.push(id);
            }
        }
    }

    /// Marks every cache member consumed so it cannot re-contribute to a
    /// coarser label still in the queue. The list itself is retained.
    fn consume_cache(&mut self, id: FlowId) {
        let cache = self.arena[id].cache.clone();
        for fid in cache {
            self.arena[fid].consumed = true;
        }
    }

    /// Heavy-hitter extraction along the secondary dimension of one
    /// accepted aggregate: protocol entries in address view, address pairs
    /// in protocol view. The threshold is recomputed against the totals of
    /// this sub-universe.
    fn sub_aggregate(&mut self, id: FlowId) {
        self.mode = Mode::Sub;
        let mut tables = Tables::default();
        let cache = self.arena[id].cache.clone();
        for fid in cache {
            if self.arena[fid].consumed {
                // already attributed to a finer accepted aggregate
                continue;
            }
            let subs = mem::take(&mut self.arena[fid].sub_counts);
            for s in subs {
                let sid = tables
                    .by_af(s.af)
                    .find_or_insert(&mut self.arena, s.spec, s.af);
                let sub = &mut self.arena[sid];
                sub.byte += s.byte;
                sub.packet += s.packet;
            }
        }

        let mut queue = VecDeque::new();
        match self.cfg.view {
            View::Address => {
                self.seed_tasks(&mut tables, AddrFamily::Proto, &mut queue);
            }
            View::Protocol => {
                self.seed_tasks(&mut tables, AddrFamily::Inet, &mut queue);
                self.seed_tasks(&mut tables, AddrFamily::Inet6, &mut queue);
            }
        }
        self.run_queue(&mut queue, &mut tables);
        self.mode = Mode::Main;
    }
}
