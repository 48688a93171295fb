use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use symsearch::config::{ConfigManager, Options, Parallelism, RunSettings};
use symsearch::data::CsvConnector;
use symsearch::engines::search::{distributed, SearchOrchestrator, SearchState};

#[derive(Parser, Debug)]
#[command(name = "symsearch")]
#[command(about = "Symbolic regression by genetic programming over expression trees")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search for expressions fitting one or more CSV datasets
    Search {
        /// TOML or JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// CSV file per output
        #[arg(long, required = true)]
        data: Vec<PathBuf>,
        /// Name of the target column
        #[arg(long, default_value = "y")]
        target: String,
        /// serial, concurrent or distributed
        #[arg(long)]
        parallelism: Option<String>,
        #[arg(long)]
        threads: Option<usize>,
        #[arg(long)]
        workers: Option<usize>,
        /// Address of a running worker; repeat for several
        #[arg(long = "worker-address")]
        worker_addresses: Vec<String>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        verbosity: Option<u32>,
        /// Units of each feature column, in file order, comma separated
        #[arg(long, value_delimiter = ',')]
        feature_units: Option<Vec<String>>,
        #[arg(long)]
        target_units: Option<String>,
        /// Resume from a saved search state
        #[arg(long)]
        resume: Option<PathBuf>,
        /// Write the final search state here
        #[arg(long)]
        save_state: Option<PathBuf>,
    },
    /// Serve search cycles for a distributed controller
    Worker {
        /// Listen on this address instead of stdin/stdout
        #[arg(long)]
        listen: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Worker { listen } => {
            match listen {
                Some(addr) => distributed::listen(addr.as_str())?,
                None => {
                    let stdin = std::io::stdin();
                    distributed::serve(stdin.lock(), std::io::stdout())?;
                }
            }
            Ok(())
        }
        Commands::Search {
            config,
            data,
            target,
            parallelism,
            threads,
            workers,
            worker_addresses,
            seed,
            verbosity,
            feature_units,
            target_units,
            resume,
            save_state,
        } => {
            let manager = ConfigManager::new();
            if let Some(path) = &config {
                manager
                    .load_from_file(path)
                    .with_context(|| format!("loading {}", path.display()))?;
            }
            let search_config = manager.get()?;

            let mut datasets = Vec::with_capacity(data.len());
            for path in &data {
                let dataset = CsvConnector::load_dataset(
                    path,
                    &target,
                    feature_units.as_deref(),
                    target_units.as_deref(),
                )
                .with_context(|| format!("loading {}", path.display()))?
                .with_loss(search_config.population.loss);
                datasets.push(dataset);
            }

            let parallelism = parallelism
                .map(|p| p.parse::<Parallelism>())
                .transpose()?;
            let settings = RunSettings {
                parallelism,
                threads,
                workers,
                worker_addresses: if worker_addresses.is_empty() {
                    None
                } else {
                    Some(worker_addresses)
                },
                verbosity,
                return_state: save_state.as_ref().map(|_| true),
                seed,
                ..Default::default()
            };

            let options = Options::new(search_config)?;
            let mut orchestrator = SearchOrchestrator::new(options.clone()).with_settings(settings);
            if let Some(path) = &resume {
                orchestrator = orchestrator.resume_from(SearchState::load_json(path)?);
            }
            let outcome = orchestrator.run(&datasets)?;

            println!("Stopped: {} after {} evaluations", outcome.stop_reason, outcome.total_evals);
            for (j, front) in outcome.dominating().iter().enumerate() {
                if datasets.len() > 1 {
                    println!("Output {}:", j + 1);
                }
                println!("{:<12}{:<14}Equation", "Complexity", "Loss");
                let names = datasets[j].feature_names();
                for member in front {
                    println!(
                        "{:<12}{:<14.4e}{}",
                        member.complexity,
                        member.loss,
                        member.tree.render(names, &options.operators)
                    );
                }
            }

            if let (Some(path), Some(state)) = (&save_state, &outcome.state) {
                state.save_json(path)?;
                println!("Search state written to {}", path.display());
            }
            Ok(())
        }
    }
}
