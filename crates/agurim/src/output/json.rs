//! JSON time-series: one object with the summary header, the labels
//! (TOTAL first), and one `[timestamp, total, cnt_0, …]` row per slot.

use std::io::Write;

use hhh::Engine;
use serde_json::{json, Value};

use crate::output::{display_list, flow_label, subflow_line, Summary};
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
    let ids = display_list(engine, query, total);

    let mut labels = vec![json!("TOTAL")];
    for (rank, &id) in ids.iter().enumerate() {
        labels.push(json!(format!(
            "{}\t{}",
            flow_label(engine, rank, id, total),
            subflow_line(engine, id)
        )));
    }

    let data: Vec<Value> = (0..grid.nslots())
        .map(|slot| {
            let mut row = vec![json!(grid.times()[slot]), json!(grid.totals()[slot])];
            for &id in &ids {
                row.push(json!(slot_count(grid, engine, id, slot)));
            }
            Value::Array(row)
        })
        .collect();

    let doc = json!({
        "StartTime": start,
        "EndTime": end,
        "AvgRate": summary.avg_rate(),
        "criteria": summary.criteria(),
        "threshold": summary.threshold,
        "nflows": ids.len() + 1,
        "labels": labels,
        "data": data,
    });
    serde_json::to_writer_pretty(&mut *out, &doc)?;
    writeln!(out)?;
    Ok(())
}
