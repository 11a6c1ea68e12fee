//! Benchmark profiles for the tickflow simulator.
//!
//! - [`chain_profile`]: source -> stage -> sink with default settings
//! - [`fan_out_profile`]: one source broadcasting to `sinks` sinks

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use tickflow_engine::{Environment, SimConfig, SinkConfig, SourceConfig, StageConfig};
use tickflow_flow::{RateConfig, RateKind};

/// Manual-only configuration with the given estimator and seed.
pub fn bench_config(kind: RateKind, seed: u64) -> SimConfig {
    SimConfig {
        ticks_per_second: 0,
        seed,
        rate: RateConfig {
            kind,
            ..RateConfig::default()
        },
        ..SimConfig::default()
    }
}

/// Three-entity chain. Panics on invalid topology, which would be a bug here.
pub fn chain_profile(kind: RateKind, seed: u64) -> Environment {
    let mut env = Environment::new(bench_config(kind, seed)).unwrap();
    let source = env.add_source("source", SourceConfig::default()).unwrap();
    let stage = env.add_stage("stage", StageConfig::default()).unwrap();
    let sink = env.add_sink("sink", SinkConfig::default()).unwrap();
    env.connect(source, stage).unwrap();
    env.connect(stage, sink).unwrap();
    env
}

/// One source feeding `sinks` sinks over separate paths.
pub fn fan_out_profile(kind: RateKind, seed: u64, sinks: usize) -> Environment {
    let mut env = Environment::new(bench_config(kind, seed)).unwrap();
    let source = env.add_source("source", SourceConfig::default()).unwrap();
    for i in 0..sinks {
        let sink = env.add_sink(&format!("sink-{i}"), SinkConfig::default()).unwrap();
        env.connect(source, sink).unwrap();
    }
    env
}
