use clap::Parser;

/// Stderr diagnostics, filtered through AGURIM_LOG (env-filter syntax,
/// e.g. `AGURIM_LOG=agurim=debug`). Reports themselves go to stdout.
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("AGURIM_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_target(false)
        .compact()
        .init();
}

fn main() {
    // try_parse so every usage problem (including -h) lands on stderr with
    // exit status 1
    let cli = match agurim::Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            eprint!("{}", err.render());
            std::process::exit(1);
        }
    };
    init_logging();

    let stdout = std::io::stdout();
    if let Err(err) = agurim::run(&cli, &mut stdout.lock()) {
        tracing::error!(error = ?err, "run failed");
        eprintln!("agurim: {:#}", err);
        std::process::exit(1);
    }
}
