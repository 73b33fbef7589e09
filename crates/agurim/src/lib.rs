//! agurim: hierarchical heavy hitter summarisation of Aguri flow logs.
//!
//! The binary re-aggregates one or more Aguri logs into the coarsest
//! prefix aggregates exceeding a traffic threshold, as Aguri text, a JSON
//! time-series, or a CSV dump. The library surface exists for the
//! integration tests.

pub mod driver;
pub mod output;
pub mod plot;
pub mod query;
pub mod read;

pub use crate::query::{Cli, OutFormat, Query};

use std::io;

/// Runs a fully-parsed command line against its inputs.
pub fn run(cli: &Cli, out: &mut impl io::Write) -> anyhow::Result<()> {
    let query = Query::resolve(cli)?;
    driver::run(&query, &cli.paths, out)
}
