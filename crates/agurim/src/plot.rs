//! Time-series accumulation for the plotting re-scan.

use anyhow::bail;
use hhh::{Basis, Engine};
use odflow::FlowId;

/// Picks a plotting interval from the spanned duration, aiming for a few
/// hundred points:
///
/// | duration | interval       |
/// |----------|----------------|
/// | 1 hour   | 30 s           |
/// | 1 day    | 10 min         |
/// | 1 week   | 60 min         |
/// | 1 month  | 4 h            |
/// | 1 year   | 1 day          |
pub fn interval_for(span: i64) -> i64 {
    let hours = (span as f64 / 3600.0).ceil() as i64;
    if hours <= 24 {
        return (hours * 30).min(600);
    }
    let days = (span as f64 / 3600.0 / 24.0).ceil() as i64;
    if days <= 7 {
        return (days * 600).min(3600);
    }
    if days <= 31 {
        return 14400;
    }
    let months = (span as f64 / 3600.0 / 24.0 / 31.0).ceil() as i64;
    if months <= 12 {
        return (months * 14400).min(86400);
    }
    86400
}

/// Counters binned per accepted aggregate per time slot. Slots are closed
/// in timestamp order as the re-scan crosses bucket boundaries.
#[derive(Debug)]
pub struct PlotGrid {
    basis: Basis,
    times: Vec<i64>,
    totals: Vec<u64>,
    /// counts[aggregate list_index][slot]
    counts: Vec<Vec<u64>>,
    open: Vec<u64>,
}

impl PlotGrid {
    pub fn new(nflows: usize, basis: Basis) -> PlotGrid {
        PlotGrid {
            basis,
            times: Vec::new(),
            totals: Vec::new(),
            counts: vec![Vec::new(); nflows],
            open: vec![0; nflows],
        }
    }

    /// Assigns every flow binned since the previous slot to the first
    /// accepted aggregate it overlaps. A flow no aggregate covers means
    /// the discovery pass and the re-scan disagree; that is fatal.
    pub fn absorb(&mut self, engine: &mut Engine) -> anyhow::Result<()> {
        for id in engine.drain_binned() {
            let flow = &engine.arena[id];
            let hit = engine.aggregates.iter().find(|&&agg| {
                engine.arena[agg].af == flow.af && engine.arena[agg].spec.overlaps(&flow.spec)
            });
            let Some(&agg) = hit else {
                bail!(
                    "flow {} overlaps no accepted aggregate",
                    flow.spec.display(flow.af)
                );
            };
            let count = match self.basis {
                Basis::Packet => flow.packet,
                _ => flow.byte,
            };
            self.open[engine.arena[agg].list_index] += count;
        }
        Ok(())
    }

    /// Closes the open slot at the given timestamp.
    pub fn close_slot(&mut self, stamp: i64) {
        self.times.push(stamp);
        self.totals.push(self.open.iter().sum());
        for (row, open) in self.counts.iter_mut().zip(&self.open) {
            row.push(*open);
        }
        for open in &mut self.open {
            *open = 0;
        }
    }

    pub fn nslots(&self) -> usize {
        self.times.len()
    }

    pub fn times(&self) -> &[i64] {
        &self.times
    }

    pub fn totals(&self) -> &[u64] {
        &self.totals
    }

    /// The slot counters of one aggregate, by its discovery-order index.
    pub fn row(&self, list_index: usize) -> &[u64] {
        &self.counts[list_index]
    }
}

/// Convenience used by the formatters: the row value of an aggregate at a
/// slot, by accepted id.
pub fn slot_count(grid: &PlotGrid, engine: &Engine, id: FlowId, slot: usize) -> u64 {
    grid.row(engine.arena[id].list_index)[slot]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intervals_match_the_duration_table() {
        assert_eq!(interval_for(3600), 30);
        assert_eq!(interval_for(12 * 3600), 360);
        assert_eq!(interval_for(24 * 3600), 600);
        assert_eq!(interval_for(2 * 86400), 1200);
        assert_eq!(interval_for(7 * 86400), 3600);
        assert_eq!(interval_for(30 * 86400), 14400);
        assert_eq!(interval_for(6 * 31 * 86400), 86400);
        assert_eq!(interval_for(3 * 366 * 86400), 86400);
    }

    #[test]
    fn slots_close_in_order_and_reset_the_accumulator() {
        let mut grid = PlotGrid::new(2, Basis::Byte);
        grid.open[0] += 5;
        grid.open[1] += 7;
        grid.close_slot(100);
        grid.open[1] += 1;
        grid.close_slot(200);
        assert_eq!(grid.times(), &[100, 200]);
        assert_eq!(grid.totals(), &[12, 1]);
        assert_eq!(grid.row(0), &[5, 0]);
        assert_eq!(grid.row(1), &[7, 1]);
    }
}
