// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.


//! Dumpbuf CLI Tool
//!
//! Command-line interface for inspecting dump policies and exercising a
//! buffer manager under memory pressure.

use clap::{Parser, Subcommand};
use dumpbuf_core::policy;
use dumpbuf_core::{BufferManager, BufferObject, ByteSize, DumpPolicy, FixedMonitor, ManagerConfig, MemoryMonitor, SystemMonitor, ValveDump};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dumpbuf")]
#[command(about = "Dumpbuf - Dumpable Buffer Manager CLI")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show system and process memory usage
    Info,
    /// List dump policies with their default parameters
    Policies,
    /// Print the default manager configuration as JSON
    Config,
    /// Allocate buffers and lock them at random under a dump policy
    Simulate {
        /// Number of buffers
        #[arg(long, short = 'n', default_value_t = 16)]
        buffers: usize,
        /// Size of each buffer
        #[arg(long, short = 's', default_value = "1 MiB")]
        size: ByteSize,
        /// Dump policy name
        #[arg(long, short = 'p')]
        policy: Option<String>,
        /// Policy parameter as name=value, repeatable
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// Number of random lock rounds
        #[arg(long, short = 'r', default_value_t = 100)]
        rounds: usize,
        /// JSON manager configuration
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
        /// Directory for dumped buffers, overrides the configuration
        #[arg(long, short = 'd')]
        dump_dir: Option<PathBuf>,
        /// Pretend the system has this much memory (valve policy only)
        #[arg(long)]
        simulated_free: Option<ByteSize>,
        /// Seed of the random lock sequence
        #[arg(long)]
        seed: Option<u64>,
    },
}

struct SimulateArgs {
    buffers: usize,
    size: usize,
    rounds: usize,
    simulated_free: Option<u64>,
    seed: Option<u64>,
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    let (name, value) = s.split_once('=').ok_or_else(|| format!("expected name=value, got '{s}'"))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Info => handle_info(),
        Commands::Policies => handle_policies(),
        Commands::Config => handle_config(),
        Commands::Simulate {
            buffers,
            size,
            policy,
            params,
            rounds,
            config,
            dump_dir,
            simulated_free,
            seed,
        } => load_config(config, dump_dir, policy, params).and_then(|config| {
            handle_simulate(
                config,
                SimulateArgs {
                    buffers,
                    size: size.bytes() as usize,
                    rounds,
                    simulated_free: simulated_free.map(ByteSize::bytes),
                    seed,
                },
            )
        }),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn handle_info() -> anyhow::Result<()> {
    let monitor = SystemMonitor::new();
    println!("{}", monitor.report());
    Ok(())
}

fn handle_policies() -> anyhow::Result<()> {
    for name in policy::names() {
        let policy = policy::create(name)?;
        println!("{name}");
        for param in policy.param_names() {
            let value = policy.param(param).unwrap_or_default();
            println!("  {param} = {value}");
        }
    }
    Ok(())
}

fn handle_config() -> anyhow::Result<()> {
    println!("{}", ManagerConfig::default().to_json_string()?);
    Ok(())
}

fn load_config(path: Option<PathBuf>, dump_dir: Option<PathBuf>, policy: Option<String>, params: Vec<(String, String)>) -> anyhow::Result<ManagerConfig> {
    let mut config = match path {
        Some(path) => ManagerConfig::from_file(path)?,
        None => ManagerConfig::default(),
    };
    if let Some(dump_dir) = dump_dir {
        config.dump_dir = dump_dir;
    }
    if let Some(policy) = policy {
        config.policy.name = policy;
        config.policy.params.clear();
    }
    config.policy.params.extend(params);
    Ok(config)
}

fn handle_simulate(config: ManagerConfig, args: SimulateArgs) -> anyhow::Result<()> {
    let manager = BufferManager::new(config.clone())?;

    let monitor = match args.simulated_free {
        Some(budget) => {
            if config.policy.name != "valve" {
                anyhow::bail!("--simulated-free requires the valve policy, got '{}'", config.policy.name);
            }
            let monitor = FixedMonitor::new(budget, budget);
            let mut valve = ValveDump::with_monitor(monitor.clone());
            for (name, value) in &config.policy.params {
                if !valve.set_param(name, value) {
                    anyhow::bail!("Invalid value '{}' for parameter '{}'", value, name);
                }
            }
            manager.set_dump_policy(Box::new(valve)).wait()?;
            Some((monitor, budget))
        }
        None => None,
    };

    // Keep the simulated free memory in line with what the buffers hold
    let update_monitor = |manager: &Arc<BufferManager>| -> anyhow::Result<()> {
        if let Some((monitor, budget)) = &monitor {
            let resident = manager.buffer_stats().wait()?.resident();
            monitor.set_free(budget.saturating_sub(resident));
        }
        Ok(())
    };

    info!("Simulating {} buffers of {} with policy {}", args.buffers, ByteSize(args.size as u64), manager.dump_policy_name().wait()?);

    let mut buffers = Vec::with_capacity(args.buffers);
    for index in 0..args.buffers {
        update_monitor(&manager)?;
        let buffer = BufferObject::with_manager(&manager)?;
        buffer.allocate(args.size)?;
        buffer.lock()?.bytes_mut().fill(pattern(index));
        buffers.push(buffer);
    }

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut restored = 0usize;
    for round in 0..args.rounds {
        if buffers.is_empty() {
            break;
        }
        let index = rng.gen_range(0..buffers.len());
        let buffer = &buffers[index];

        update_monitor(&manager)?;
        if !manager.buffer_info(buffer.id()).wait()?.loaded {
            restored += 1;
        }

        let lock = buffer.lock()?;
        let expected = pattern(index);
        if !lock.bytes().iter().all(|byte| *byte == expected) {
            anyhow::bail!("Buffer {} lost its content in round {}", buffer.id(), round);
        }
        debug!("Round {}: buffer {} verified", round, buffer.id());
    }

    let stats = manager.buffer_stats().wait()?;
    println!("Buffers:        {}", buffers.len());
    println!("Rounds:         {}", args.rounds);
    println!("Restores:       {restored}");
    println!("Total managed:  {}", ByteSize(stats.total_managed));
    println!("Total dumped:   {}", ByteSize(stats.total_dumped));
    println!("Resident:       {}", ByteSize(stats.resident()));
    println!();
    println!("{}", manager.report().wait()?);

    Ok(())
}

fn pattern(index: usize) -> u8 {
    (index % 251) as u8 + 1
}
