//! Line-oriented reader for the Aguri log format.
//!
//! A record is a pair of lines: the address line
//! `[rank] <src> <dst>: <byte> (<pct>%)\t<packet> (<pct>%)` followed by the
//! protocol distribution `[proto:sport:dport]<byte>% <pkt>% …`. Preamble
//! lines start with `%` or `#` or are blank; `%%StartTime:` and
//! `%%EndTime:` carry timestamps. Anything malformed is skipped.

use std::io::{self, BufRead};

use chrono::{Local, NaiveDateTime, TimeZone};
use hhh::FlowSample;
use lazy_static::lazy_static;
use odflow::{parse_addr, parse_proto_spec, AddrFamily, FlowSpec};
use regex::Regex;

lazy_static! {
    static ref FLOW_RE: Regex = Regex::new(
        r"^\s*\[\s*\d+\]\s+(\S+)\s+(\S+):\s+(\d+)\s+\(([0-9.]+)%\)\s+(\d+)\s+\(([0-9.]+)%?\)"
    )
    .unwrap();
    static ref PROTO_RE: Regex =
        Regex::new(r"\[([^:\]\s]+):([^:\]\s]+):([^\]\s]+)\]\s*([0-9.]+)%\s+([0-9.]+)%").unwrap();
}

/// One event of an Aguri log stream.
#[derive(Debug)]
pub enum Event {
    Start(i64),
    End(i64),
    Flow {
        main: FlowSample,
        subs: Vec<FlowSample>,
    },
}

/// Streaming reader over a buffered source.
pub struct AguriReader<R: BufRead> {
    lines: io::Lines<R>,
}

impl<R: BufRead> AguriReader<R> {
    pub fn new(reader: R) -> AguriReader<R> {
        AguriReader {
            lines: reader.lines(),
        }
    }
}

impl<R: BufRead> Iterator for AguriReader<R> {
    type Item = io::Result<Event>;

    fn next(&mut self) -> Option<io::Result<Event>> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => return Some(Err(err)),
            };
            if let Some(first) = line.chars().next() {
                if first == '%' {
                    if let Some(event) = parse_preamble(&line) {
                        return Some(Ok(event));
                    }
                    continue;
                }
                if first != '[' && !line.starts_with(char::is_whitespace) {
                    continue;
                }
            } else {
                continue;
            }

            let Some(main) = parse_flow_line(&line) else {
                continue;
            };

            // the protocol distribution rides on the following line
            let proto_line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(err)) => return Some(Err(err)),
                None => return None,
            };
            let subs = parse_proto_line(&proto_line, main.byte, main.packet);
            if subs.is_empty() {
                tracing::debug!(line = %line, "flow record without protocol entries, skipped");
                continue;
            }
            return Some(Ok(Event::Flow { main, subs }));
        }
    }
}

fn parse_preamble(line: &str) -> Option<Event> {
    if let Some(rest) = line.strip_prefix("%%StartTime:") {
        return parse_timestamp(rest).map(Event::Start);
    }
    if let Some(rest) = line.strip_prefix("%%EndTime:") {
        return parse_timestamp(rest).map(Event::End);
    }
    None
}

/// Parses `%a %b %d %T %Y` in local time, tolerating the parenthesised
/// duplicate the writer appends.
fn parse_timestamp(text: &str) -> Option<i64> {
    let text = text.split(" (").next().unwrap_or(text).trim();
    let parsed = NaiveDateTime::parse_from_str(text, "%a %b %d %H:%M:%S %Y");
    let naive = match parsed {
        Ok(naive) => naive,
        Err(err) => {
            tracing::warn!(text = %text, error = %err, "date format is incorrect");
            return None;
        }
    };
    match Local.from_local_datetime(&naive).earliest() {
        Some(dt) => Some(dt.timestamp()),
        None => {
            tracing::warn!(text = %text, "timestamp does not exist in the local timezone");
            None
        }
    }
}

fn parse_flow_line(line: &str) -> Option<FlowSample> {
    let caps = FLOW_RE.captures(line)?;
    let (af, src, srclen) = parse_addr(&caps[1]).ok()?;
    let (daf, dst, dstlen) = parse_addr(&caps[2]).ok()?;
    if af != daf {
        return None;
    }
    Some(FlowSample {
        spec: FlowSpec {
            src,
            dst,
            srclen,
            dstlen,
        },
        af,
        byte: caps[3].parse().ok()?,
        packet: caps[5].parse().ok()?,
    })
}

/// Expands the per-protocol percentages of one record into absolute
/// counters against the record's own totals.
fn parse_proto_line(line: &str, byte: u64, packet: u64) -> Vec<FlowSample> {
    PROTO_RE
        .captures_iter(line)
        .filter_map(|caps| {
            let spec = parse_proto_spec(&caps[1], &caps[2], &caps[3]).ok()?;
            let fbyte: f64 = caps[4].parse().ok()?;
            let fpacket: f64 = caps[5].parse().ok()?;
            Some(FlowSample {
                spec,
                af: AddrFamily::Proto,
                byte: (fbyte * byte as f64 / 100.0) as u64,
                packet: (fpacket * packet as f64 / 100.0) as u64,
            })
        })
        .collect()
}
