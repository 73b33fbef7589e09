//! The two-pass driver: discovery over the input stream, then, for the
//! time-series formats, a re-scan binning every flow onto the frozen
//! aggregate skeleton at plotting resolution.

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use hhh::{Engine, EngineConfig, FlowSample, View};

use crate::output;
use crate::plot::{self, PlotGrid};
use crate::query::{Filter, OutFormat, Query};
use crate::read::{AguriReader, Event};

/// Analysis window bookkeeping: first and last preamble timestamps seen,
/// bounded by `-S`/`-E`.
#[derive(Debug, Default, Clone, Copy)]
struct Window {
    start: i64,
    end: i64,
}

pub fn run(query: &Query, paths: &[PathBuf], out: &mut impl Write) -> Result<()> {
    let engine = Engine::new(EngineConfig {
        basis: query.basis,
        view: query.view,
        threshold: query.threshold,
    });

    if paths.is_empty() && query.outfmt != OutFormat::Reaggregation {
        // the re-scan cannot rewind a pipe
        bail!("time-series output requires input files, not stdin");
    }

    let files = collect_inputs(paths);
    match query.outfmt {
        OutFormat::Reaggregation => run_reaggregation(query, &files, paths.is_empty(), engine, out),
        _ => run_plot(query, &files, engine, out),
    }
}

/// Expands directories one level, alphabetically, skipping dot entries and
/// anything unreadable.
fn collect_inputs(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }
        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "skipping unreadable directory");
                continue;
            }
        };
        let mut found: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        found.sort();
        files.extend(found);
    }
    files
}

fn passes_filter(filter: &Option<Filter>, main: &FlowSample, subs: &[FlowSample]) -> bool {
    let Some(filter) = filter else { return true };
    match filter.af {
        odflow::AddrFamily::Proto => subs.iter().any(|s| s.spec.overlaps(&filter.spec)),
        af => main.af == af && main.spec.overlaps(&filter.spec),
    }
}

/// Re-aggregation: a full Aguri report per aggregation interval, plus one
/// for whatever remains at end of input.
fn run_reaggregation(
    query: &Query,
    files: &[PathBuf],
    use_stdin: bool,
    mut engine: Engine,
    out: &mut impl Write,
) -> Result<()> {
    let mut win = Window::default();

    if use_stdin {
        if atty::is(atty::Stream::Stdin) {
            tracing::info!("reading from stdin");
        }
        let stdin = io::stdin();
        for event in AguriReader::new(stdin.lock()) {
            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    tracing::debug!(error = %err, "stdin read error, stopping");
                    break;
                }
            };
            reagg_event(query, &mut engine, &mut win, event, out)?;
        }
    } else {
        for file in files {
            for event in read_file(file) {
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::debug!(file = %file.display(), error = %err, "read error, skipping rest of file");
                        break;
                    }
                };
                reagg_event(query, &mut engine, &mut win, event, out)?;
            }
        }
    }

    engine.aggregate();
    output::aguri::write(out, query, &mut engine, win.start, win.end)
}

fn reagg_event(
    query: &Query,
    engine: &mut Engine,
    win: &mut Window,
    event: Event,
    out: &mut impl Write,
) -> Result<()> {
    match event {
        Event::Start(t) => {
            if query.start_time > t {
                return Ok(());
            }
            if win.start != 0 && query.aggr_interval > 0 && t - win.start >= query.aggr_interval {
                engine.aggregate();
                output::aguri::write(out, query, engine, win.start, win.end)?;
                engine.reset_period();
                win.start = win.end;
            }
            if win.start == 0 {
                win.start = t;
            }
        }
        Event::End(t) => {
            if win.start == 0 {
                return Ok(());
            }
            if query.end_time != 0 && query.end_time < t {
                return Ok(());
            }
            win.end = t;
        }
        Event::Flow { main, subs } => {
            if win.start == 0 {
                return Ok(());
            }
            if !passes_filter(&query.filter, &main, &subs) {
                return Ok(());
            }
            engine.record(main, &subs);
        }
    }
    Ok(())
}

/// JSON/CSV: pass 1 discovers the aggregate skeleton, pass 2 re-reads the
/// inputs and bins counters per aggregate per plot interval.
fn run_plot(
    query: &Query,
    files: &[PathBuf],
    mut engine: Engine,
    out: &mut impl Write,
) -> Result<()> {
    let mut win = Window::default();
    'discover: for file in files {
        for event in read_file(file) {
            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    tracing::debug!(file = %file.display(), error = %err, "read error, skipping rest of file");
                    break;
                }
            };
            match event {
                Event::Start(t) => {
                    if query.start_time > t {
                        continue;
                    }
                    if win.start == 0 {
                        win.start = t;
                    }
                    if query.aggr_interval > 0 && t - win.start >= query.aggr_interval {
                        break 'discover;
                    }
                    if query.duration > 0 && t - win.start >= query.duration {
                        break 'discover;
                    }
                }
                Event::End(t) => {
                    if win.start != 0 && !(query.end_time != 0 && query.end_time < t) {
                        win.end = t;
                    }
                }
                Event::Flow { main, subs } => {
                    if win.start == 0 {
                        continue;
                    }
                    if !passes_filter(&query.filter, &main, &subs) {
                        continue;
                    }
                    engine.record(main, &subs);
                }
            }
        }
    }

    engine.aggregate();
    for i in 0..engine.aggregates.len() {
        let id = engine.aggregates[i];
        engine.arena[id].list_index = i;
    }
    tracing::info!(
        aggregates = engine.aggregates.len(),
        byte = engine.total().byte,
        "discovery pass complete"
    );

    let span = (win.end - win.start).max(0);
    let interval = plot::interval_for(span).max(30);
    let mut grid = PlotGrid::new(engine.aggregates.len(), query.basis);

    let mut scan_start = 0i64;
    let mut bucket_start = 0i64;
    'rescan: for file in files {
        for event in read_file(file) {
            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    tracing::debug!(file = %file.display(), error = %err, "read error, skipping rest of file");
                    break;
                }
            };
            match event {
                Event::Start(t) => {
                    if query.start_time > t {
                        continue;
                    }
                    if scan_start == 0 {
                        scan_start = t;
                        bucket_start = t;
                    }
                    while t - bucket_start >= interval {
                        grid.absorb(&mut engine)?;
                        grid.close_slot(bucket_start);
                        bucket_start += interval;
                    }
                    if query.duration > 0 && t - scan_start >= query.duration {
                        break 'rescan;
                    }
                }
                Event::End(_) => {}
                Event::Flow { main, subs } => {
                    if scan_start == 0 {
                        continue;
                    }
                    if !passes_filter(&query.filter, &main, &subs) {
                        continue;
                    }
                    match query.view {
                        View::Address => engine.bin(main),
                        View::Protocol => {
                            for s in subs {
                                engine.bin(s);
                            }
                        }
                    }
                }
            }
        }
    }
    if scan_start != 0 {
        grid.absorb(&mut engine)?;
        grid.close_slot(bucket_start);
    }

    match query.outfmt {
        OutFormat::Json => output::json::write(out, query, &mut engine, win.start, win.end, &grid),
        _ => output::csv::write(out, query, &mut engine, win.start, win.end, &grid),
    }
}

/// Opens one input; an unopenable file degrades to an empty stream.
fn read_file(path: &Path) -> AguriReader<BufReader<Box<dyn io::Read>>> {
    match File::open(path) {
        Ok(file) => AguriReader::new(BufReader::new(Box::new(file) as Box<dyn io::Read>)),
        Err(err) => {
            tracing::debug!(file = %path.display(), error = %err, "cannot open input, skipping");
            AguriReader::new(BufReader::new(Box::new(io::empty()) as Box<dyn io::Read>))
        }
    }
}
