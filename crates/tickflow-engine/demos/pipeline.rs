//! Runs a source -> stage -> sink pipeline and prints each entity once per
//! hundred ticks.
//!
//! ```text
//! cargo run -p tickflow-engine --example pipeline [config.toml]
//! ```

use std::error::Error;

use tickflow_engine::{Environment, SimConfig, SinkConfig, SourceConfig, StageConfig};
use tracing::{info, Level};

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let config = match std::env::args().nth(1) {
        Some(path) => SimConfig::from_file(path)?,
        None => SimConfig::default(),
    };
    info!(rate = ?config.rate.kind, seed = config.seed, "building pipeline");

    let mut env = Environment::new(config)?;
    let source = env.add_source("source", SourceConfig::default())?;
    let stage = env.add_stage(
        "halver",
        StageConfig {
            ratio_in: 2,
            ratio_out: 1,
            ..StageConfig::default()
        },
    )?;
    let sink = env.add_sink("sink", SinkConfig { ticks_per_item: 2 })?;
    env.connect(source, stage)?;
    env.connect(stage, sink)?;

    for _ in 0..10 {
        env.manual_tick(100);
        println!("── tick {} ──", env.now());
        for view in env.views() {
            println!(
                "{:>8} {:<6} {:<14} mbox={:<3} credit={:<4} buf={:<4} latency={:<4} idle={}",
                view.name,
                view.kind,
                view.state,
                view.mailbox_size,
                view.credit,
                view.buffered,
                view.average_latency,
                view.idle_ticks,
            );
            for line in view.mailbox.iter().take(3) {
                println!("           {line}");
            }
        }
    }

    let m = env.metrics();
    println!(
        "delivered={} events={} steps={} violations={} global latency={} idle={:.1}%",
        m.total.messages_delivered,
        m.total.events_run,
        m.total.entities_stepped,
        m.total.protocol_violations,
        env.average_global_latency(),
        env.average_global_idle_percentage(),
    );
    Ok(())
}
