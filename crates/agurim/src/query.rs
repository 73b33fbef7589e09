//! Command line surface and its resolution into an immutable query.

use std::path::PathBuf;

use anyhow::{bail, Context};
use hhh::{Basis, View};
use odflow::{parse_addr, parse_proto_spec, AddrFamily, FlowSpec};

/// agurim re-aggregates Aguri flow logs into hierarchical heavy hitters.
#[derive(Debug, clap::Parser)]
#[command(name = "agurim")]
pub struct Cli {
    /// CSV time-series output on the byte basis
    #[arg(short = 'd')]
    pub debug_csv: bool,

    /// Keep only flows overlapping '<src> <dst>' or '<proto>:<sport>:<dport>'
    #[arg(short = 'f', value_name = "flow")]
    pub filter: Option<String>,

    /// Aggregation interval of the discovery pass, in seconds
    #[arg(short = 'i', value_name = "seconds")]
    pub interval: Option<u64>,

    /// Counter basis for thresholds and ordering
    #[arg(short = 'm', value_enum, value_name = "criteria")]
    pub basis: Option<BasisArg>,

    /// Upper bound on reported aggregates
    #[arg(short = 'n', value_name = "nflows")]
    pub nflows: Option<usize>,

    /// JSON time-series output on the byte basis (-d wins if both given)
    #[arg(short = 'p')]
    pub plot_json: bool,

    /// Total analysis duration, in seconds
    #[arg(short = 's', value_name = "duration")]
    pub duration: Option<u64>,

    /// Heavy-hitter threshold, in percent of the traffic
    #[arg(short = 't', value_name = "percent")]
    pub threshold: Option<f64>,

    /// Analysis window start, as a unix timestamp
    #[arg(short = 'S', value_name = "epoch")]
    pub start_time: Option<u64>,

    /// Analysis window end, as a unix timestamp
    #[arg(short = 'E', value_name = "epoch")]
    pub end_time: Option<u64>,

    /// Protocol view: aggregate by protocol/port, addresses nested
    #[arg(short = 'P')]
    pub proto_view: bool,

    /// Input files or directories; stdin when absent (re-aggregation only)
    #[arg(value_name = "path")]
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, clap::ValueEnum, Clone, Copy)]
pub enum BasisArg {
    Byte,
    Packet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutFormat {
    Reaggregation,
    Json,
    Csv,
}

/// A `-f` filter: records are kept when they overlap this spec in its own
/// family.
#[derive(Debug, Clone, Copy)]
pub struct Filter {
    pub spec: FlowSpec,
    pub af: AddrFamily,
}

/// The resolved query a run executes: every default filled in, every
/// option validated.
#[derive(Debug, Clone)]
pub struct Query {
    pub basis: Basis,
    pub outfmt: OutFormat,
    pub view: View,
    pub threshold: f64,
    /// Discovery-pass aggregation interval; 0 means the whole window.
    pub aggr_interval: i64,
    /// Reported-aggregate cap; 0 means unbounded.
    pub nflows: usize,
    pub duration: i64,
    pub start_time: i64,
    pub end_time: i64,
    pub filter: Option<Filter>,
}

impl Query {
    pub fn resolve(cli: &Cli) -> anyhow::Result<Query> {
        let outfmt = if cli.debug_csv {
            OutFormat::Csv
        } else if cli.plot_json {
            OutFormat::Json
        } else {
            OutFormat::Reaggregation
        };
        let plotting = outfmt != OutFormat::Reaggregation;

        let basis = match (cli.basis, plotting) {
            (Some(BasisArg::Byte), _) => Basis::Byte,
            (Some(BasisArg::Packet), _) => Basis::Packet,
            (None, true) => Basis::Byte,
            (None, false) => Basis::Combination,
        };

        let threshold = cli
            .threshold
            .unwrap_or(if plotting { 3.0 } else { 1.0 });
        if !(0.0..=100.0).contains(&threshold) {
            bail!("threshold must be between 0 and 100, got {}", threshold);
        }

        let aggr_interval = match cli.interval {
            Some(i) => i as i64,
            // re-aggregation reports every minute; plotting discovers over
            // the whole analysis window unless told otherwise
            None if plotting => 0,
            None => 60,
        };

        let nflows = cli.nflows.unwrap_or(if plotting { 7 } else { 0 });

        let mut start_time = cli.start_time.unwrap_or(0) as i64;
        let mut end_time = cli.end_time.unwrap_or(0) as i64;
        let mut duration = cli.duration.unwrap_or(0) as i64;
        if plotting {
            if duration == 0 && (start_time == 0 || end_time == 0) {
                duration = 60 * 60 * 24;
            }
            if duration != 0 && end_time != 0 && start_time == 0 {
                start_time = end_time - duration;
            }
            if duration != 0 && start_time != 0 {
                end_time = start_time + duration;
            }
            if start_time != 0 && end_time != 0 {
                if end_time < start_time {
                    bail!("end time precedes start time");
                }
                duration = end_time - start_time;
            }
        }

        let filter = match &cli.filter {
            Some(text) => Some(parse_filter(text).context("bad -f filter")?),
            None => None,
        };

        Ok(Query {
            basis,
            outfmt,
            view: if cli.proto_view {
                View::Protocol
            } else {
                View::Address
            },
            threshold,
            aggr_interval,
            nflows,
            duration,
            start_time,
            end_time,
            filter,
        })
    }
}

fn parse_filter(text: &str) -> anyhow::Result<Filter> {
    let mut addrs = text.split_whitespace();
    match (addrs.next(), addrs.next(), addrs.next()) {
        (Some(src), Some(dst), None) => {
            let (af, src, srclen) = parse_addr(src)?;
            let (daf, dst, dstlen) = parse_addr(dst)?;
            if af != daf {
                bail!("filter mixes address families: {:?}", text);
            }
            Ok(Filter {
                spec: FlowSpec {
                    src,
                    dst,
                    srclen,
                    dstlen,
                },
                af,
            })
        }
        (Some(proto), None, None) => {
            let mut parts = proto.split(':');
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(p), Some(sport), Some(dport), None) => Ok(Filter {
                    spec: parse_proto_spec(p, sport, dport)?,
                    af: AddrFamily::Proto,
                }),
                _ => bail!("expected '<proto>:<sport>:<dport>', got {:?}", text),
            }
        }
        _ => bail!("expected '<src> <dst>' or '<proto>:<sport>:<dport>', got {:?}", text),
    }
}
