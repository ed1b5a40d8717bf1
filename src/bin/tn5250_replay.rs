//! Replay a 5250 debug trace and print the screen it leaves behind
//!
//! Usage: tn5250-replay <trace-file> [--keys] [--config <file>]

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use tn5250_core::config::SessionConfig;
use tn5250_core::lib5250::{parse_trace, DebugStream, NullTerminal, Session, TraceEvent};

struct Args {
    trace: PathBuf,
    keys: bool,
    config: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut trace = None;
    let mut keys = false;
    let mut config = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--keys" | "-k" => keys = true,
            "--config" | "-c" => {
                let Some(path) = args.get(i + 1) else {
                    bail!("--config requires a path");
                };
                config = Some(PathBuf::from(path));
                i += 1; // consume value
            }
            "--help" | "-h" => {
                println!("Usage: {} <trace-file> [--keys] [--config <file>]", args[0]);
                std::process::exit(0);
            }
            other if other.starts_with('-') => bail!("unknown option {other}"),
            other => {
                if trace.is_some() {
                    bail!("only one trace file can be replayed");
                }
                trace = Some(PathBuf::from(other));
            }
        }
        i += 1;
    }

    let Some(trace) = trace else {
        bail!("usage: tn5250-replay <trace-file> [--keys] [--config <file>]");
    };
    Ok(Args { trace, keys, config })
}

fn main() -> Result<()> {
    env_logger::init();
    let args = parse_args()?;

    let config = match &args.config {
        Some(path) => SessionConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => SessionConfig::default(),
    };

    let file = File::open(&args.trace).with_context(|| format!("opening trace {}", args.trace.display()))?;
    let mut events = parse_trace(BufReader::new(file)).context("parsing trace")?;
    if !args.keys {
        events.retain(|event| !matches!(event, TraceEvent::Key(_)));
    }
    log::info!("replaying {} events from {}", events.len(), args.trace.display());

    let mut session = Session::new(DebugStream::from_events(events), config)?;
    session.set_terminal(Box::new(NullTerminal::default()))?;
    session.connect()?;
    session.main_loop().context("replaying trace")?;

    for line in session.display().screen_text() {
        println!("{}", line.trim_end());
    }
    log::info!("{} records sent", session.stream().sent().len());
    Ok(())
}
