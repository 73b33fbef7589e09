//! Re-aggregated Aguri text, parseable back through the reader.

use std::io::Write;

use hhh::Engine;

use crate::output::{display_list, flow_label, local_stamp, subflow_line, Summary};
use crate::query::Query;

pub fn write(
    out: &mut impl Write,
    query: &Query,
    engine: &mut Engine,
    start: i64,
    end: i64,
) -> anyhow::Result<()> {
    let total = engine.total();
    let summary = Summary::new(query, total, start, end);

    writeln!(out)?;
    writeln!(out, "%!AGURI-2.0")?;
    writeln!(out, "%%StartTime: {}", local_stamp(start))?;
    writeln!(out, "%%EndTime: {}", local_stamp(end))?;
    writeln!(out, "%AvgRate: {}", summary.avg_rate())?;
    writeln!(
        out,
        "% criteria: {} counter ({:.0} % for addresses, {:.0} % for protocol data)",
        summary.criteria(),
        summary.threshold,
        summary.threshold
    )?;
    writeln!(out)?;

    let ids = display_list(engine, query, total);
    for (rank, &id) in ids.iter().enumerate() {
        writeln!(out, "{}", flow_label(engine, rank, id, total))?;
        writeln!(out, "\t{}", subflow_line(engine, id))?;
    }
    Ok(())
}
