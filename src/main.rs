// SPDX-License-Identifier: MIT

use anyhow::{bail, Context as _};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;

use gmf_rs::gmf::config::SimulationConfig;
use gmf_rs::gmf::simulation::Simulator;
use gmf_rs::gmf::workflow::graph::{self, Module};
use gmf_rs::gmf::workflow::loader::ModuleLoader;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check module files and print every structural problem
    Validate {
        /// Module files (JSON or YAML)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Render a module's transition graph as Graphviz DOT
    Graph {
        /// Module file
        file: PathBuf,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Simulate a population through a directory of modules
    Simulate {
        /// Directory of module files; subdirectories hold submodules
        #[arg(short, long)]
        modules: PathBuf,

        /// Settings file (YAML); defaults to $GMF_CONFIG
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of individuals
        #[arg(short, long)]
        population: Option<usize>,

        /// Master seed
        #[arg(short, long)]
        seed: Option<u64>,

        /// Years simulated per individual
        #[arg(short, long)]
        years: Option<u32>,

        /// Year the simulated individuals are born
        #[arg(long, default_value_t = 1950)]
        start_year: i32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Validate { files } => {
            let loader = ModuleLoader::new();
            let mut failed = 0;
            for file in &files {
                let errors = match loader.load_document(file) {
                    Ok(document) => graph::validate(&document),
                    Err(e) => vec![e.to_string()],
                };
                if errors.is_empty() {
                    println!("{}: ok", file.display());
                } else {
                    failed += 1;
                    println!("{}: {} error(s)", file.display(), errors.len());
                    for error in errors {
                        println!("  - {}", error);
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} module(s) failed validation", failed, files.len());
            }
        }
        Commands::Graph { file, output } => {
            let document = ModuleLoader::new()
                .load_document(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let module = Module::from_document(&document)?;
            let dot = graph::to_dot(&module);
            match output {
                Some(path) => {
                    std::fs::write(&path, dot)
                        .with_context(|| format!("writing {}", path.display()))?;
                    log::info!("Wrote graph of '{}' to {}", module.name, path.display());
                }
                None => print!("{}", dot),
            }
        }
        Commands::Simulate {
            modules,
            config,
            population,
            seed,
            years,
            start_year,
        } => {
            let mut settings = match config {
                Some(path) => SimulationConfig::load(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => SimulationConfig::from_env()?,
            };
            if let Some(population) = population {
                settings.population = population;
            }
            if let Some(seed) = seed {
                settings.seed = seed;
            }
            if let Some(years) = years {
                settings.years = years;
            }

            let registry = ModuleLoader::new().load_dir(&modules)?;
            if registry.roots().is_empty() {
                bail!("no top-level modules in {}", modules.display());
            }
            let start = Utc
                .with_ymd_and_hms(start_year, 1, 1, 0, 0, 0)
                .single()
                .with_context(|| format!("invalid start year {}", start_year))?;

            let simulator = Simulator::new(registry, settings);
            let reports = simulator.run(start).await;
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
    }

    Ok(())
}
