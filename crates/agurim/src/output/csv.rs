//! CSV debug dump: the summary header as `#` comments, then one
//! `timestamp, total, cnt_0, …` row per slot.

use std::io::Write;

use hhh::Engine;

use crate::output::{display_list, flow_label, local_stamp, subflow_line, Summary};
use crate::plot::{slot_count, PlotGrid};
use crate::query::Query;

pub fn write(
    out: &mut impl Write,
    query: &Query,
    engine: &mut Engine,
    start: i64,
    end: i64,
    grid: &PlotGrid,
) -> anyhow::Result<()> {
    let total = engine.total();
    let summary = Summary::new(query, total, start, end);

    writeln!(out, "# %%StartTime: {}", local_stamp(start))?;
    writeln!(out, "# %%EndTime: {}", local_stamp(end))?;
    writeln!(out, "# %AvgRate: {}", summary.avg_rate())?;
    writeln!(
        out,
        "# criteria: {} counter ({:.0} % for addresses, {:.0} % for protocol data)",
        summary.criteria(),
        summary.threshold,
        summary.threshold
    )?;

    let ids = display_list(engine, query, total);
    for (rank, &id) in ids.iter().enumerate() {
        writeln!(
            out,
            "# {}\t{}",
            flow_label(engine, rank, id, total),
            subflow_line(engine, id)
        )?;
    }

    let mut writer = csv::WriterBuilder::new().from_writer(&mut *out);
    for slot in 0..grid.nslots() {
        let mut record = vec![grid.times()[slot].to_string(), grid.totals()[slot].to_string()];
        for &id in &ids {
            record.push(slot_count(grid, engine, id, slot).to_string());
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}
