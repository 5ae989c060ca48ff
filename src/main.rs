use anyhow::{anyhow, Context};
use clap::Parser;
use datawatch::sim::ScriptedEngine;
use datawatch::watch::address::Address;
use datawatch::watch::backstop::BACKSTOP_HALT_REASON;
use datawatch::watch::config::{WatchConfig, BACKSTOP_ENV};
use datawatch::watch::engine::Engine;
use datawatch::watch::mark::MarkLog;
use datawatch::watch::{RunOutcome, WatchSessionBuilder};
use datawatch::{dw_info, dw_warn};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Recorded execution trace (TOML)
    scenario: PathBuf,

    /// Range to watch, `start:length` (e.g. 0x2000:0x20). May be repeated.
    #[clap(short, long = "range", value_parser = parse_range, required = true)]
    ranges: Vec<(Address, u64)>,

    /// Watch session configuration file (TOML)
    #[clap(long)]
    config: Option<PathBuf>,

    /// Halt on every watched access instead of following data flow,
    /// overrides `break_simulation` of the config file
    #[clap(long)]
    stop_on_access: bool,

    /// Log compare instruction operands at every access
    #[clap(long)]
    show_cmp: bool,

    /// Cycles without a watched access before execution is stopped
    #[clap(long, env = BACKSTOP_ENV)]
    backstop_cycles: Option<u64>,

    /// Disable logging
    #[clap(short, long)]
    quiet: bool,
}

fn parse_range(s: &str) -> Result<(Address, u64), String> {
    fn number(s: &str) -> Result<u64, String> {
        let s = s.trim();
        match s.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => s.parse(),
        }
        .map_err(|e| format!("invalid number `{s}`: {e}"))
    }

    let (start, length) = s
        .split_once(':')
        .ok_or_else(|| format!("expected `start:length`, got `{s}`"))?;
    Ok((Address::from(number(start)?), number(length)?))
}

/// Command line flags win over the config file, absent flags keep its values.
fn apply_args(mut config: WatchConfig, args: &Args) -> WatchConfig {
    if let Some(cycles) = args.backstop_cycles {
        config.backstop_cycles = cycles;
    }
    if args.stop_on_access {
        config.break_simulation = true;
    }
    config
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::init();
    if args.quiet {
        datawatch::log::disable();
    }

    let config = match &args.config {
        Some(path) => WatchConfig::from_file(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => WatchConfig {
            break_simulation: false,
            ..WatchConfig::default()
        },
    };
    let config = apply_args(config, &args);
    let show_cmp = args.show_cmp || config.show_cmp;

    let data = std::fs::read_to_string(&args.scenario)
        .with_context(|| format!("read scenario {}", args.scenario.display()))?;
    let mut engine = ScriptedEngine::from_toml(&data)?;

    let mut session = WatchSessionBuilder::new()
        .with_config(config)
        .with_recorder(MarkLog::default())
        .with_stack_trace(engine.functions().clone())
        .with_function_resolver(engine.functions().clone())
        .with_relocatables(engine.relocatables().clone())
        .build();

    for (start, length) in &args.ranges {
        session.set_range(&mut engine, *start, *length, true);
    }
    if !session.watch(&mut engine, show_cmp, None)? {
        return Err(anyhow!("nothing to watch"));
    }

    loop {
        match session.run(&mut engine)? {
            RunOutcome::Halted { cycle } => {
                dw_info!(
                    target: "watch",
                    "halted at cycle {cycle:#x}: {}",
                    engine.halt_reason().unwrap_or("unknown")
                );
                // no activity for too long
                if engine.halt_reason() == Some(BACKSTOP_HALT_REASON) {
                    break;
                }
                if !session.watch(&mut engine, show_cmp, None)? {
                    dw_warn!(target: "watch", "all watched ranges consumed");
                    break;
                }
            }
            RunOutcome::Exhausted => break,
        }
    }
    session.shutdown(&mut engine);

    let recorder = session.watch_marks();
    for idx in 0..recorder.len() {
        if let Some(mark) = recorder.get(idx) {
            println!(
                "{idx:4} cycle {:#x} ip {} {}",
                mark.origin.cycle, mark.origin.ip, mark.mark
            );
        }
    }
    println!("{} marks, final cycle {:#x}", recorder.len(), engine.cycles());
    Ok(())
}
