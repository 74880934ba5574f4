//! A small exercise driver for the meter API: registers a pile of
//! counters and lets the background publishers run.

use agent::{Agent, Id, Tags};
use clap::Parser;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "atlas-agent", about = "Exercise the metrics agent")]
struct Args {
    /// Console log verbosity (0=error .. 4=trace).
    #[arg(long, default_value_t = 2)]
    verbosity: i32,

    /// Number of one-minute rounds to run.
    #[arg(long, default_value_t = 5)]
    rounds: u32,

    /// Counters registered per round.
    #[arg(long, default_value_t = 50_000)]
    counters: u32,
}

fn test_tags() -> Tags {
    let value = "some.random.value.for.testing";
    (0..10)
        .map(|i| format!("some.random.string.for.testing.{}", i))
        .map(|key| (interner::intern(&key), interner::intern(value)))
        .collect()
}

fn main() {
    let args = Args::parse();

    let atlas = Agent::new();
    atlas.use_console_logger(args.verbosity);
    atlas.start();

    let registry = atlas.registry().clone();
    let tags = test_tags();
    for _round in 0..args.rounds {
        tracing::info!(counters = args.counters, "generating metrics");
        for i in 0..args.counters {
            registry
                .counter(Id::new(&format!("atlas.client.test.{}", i), tags.clone()))
                .increment();
        }
        tracing::info!("sleeping for 40s");
        std::thread::sleep(Duration::from_secs(40));
    }

    atlas.stop();
}
