//! BioNN command line.
//!
//! Creates, trains, inspects and runs stochastic binary networks stored in
//! the flat binary network format. Datasets are JSON files with `classes`,
//! `training` and `testing` sample lists.

use anyhow::{bail, Context, Result};
use bionn::data::{DataProvider, InMemoryProvider};
use bionn::evaluation::{evaluate, DEFAULT_ATTEMPTS};
use bionn::experiment::{EpochReport, Experiment, ExperimentConfig, Progress};
use bionn::{ConnectionStore, DenseConnections, Network, NetworkConfig};
use clap::{Parser, Subcommand};
use itertools::Itertools;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Samples between two progress log lines.
const PROGRESS_INTERVAL: usize = 1000;

#[derive(Parser, Debug)]
#[command(name = "bionn", about = "Stochastic binary neural networks", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a randomly initialized network and save it
    Create {
        /// Network config (JSON); defaults are used when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output network file
        #[arg(long, default_value = "data/network.bin")]
        output: PathBuf,
    },

    /// Print a summary of a saved network
    Info {
        network: PathBuf,

        /// Also print every unit threshold
        #[arg(long, default_value_t = false)]
        thresholds: bool,
    },

    /// Run an experiment over a JSON dataset and save the trained network
    Train {
        /// Experiment config (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Dataset file (JSON)
        #[arg(long)]
        data: PathBuf,

        /// Continue training this network instead of creating one
        #[arg(long)]
        resume: Option<PathBuf>,

        /// Output network file
        #[arg(long, default_value = "data/network.bin")]
        output: PathBuf,

        /// Per-epoch metrics (JSONL)
        #[arg(long)]
        metrics_file: Option<PathBuf>,

        /// Stop after the current epoch once this many seconds have passed (0 = no limit)
        #[arg(long, default_value_t = 0)]
        time_limit: u64,
    },

    /// Majority-vote classify the testing set of a dataset
    Classify {
        network: PathBuf,

        /// Dataset file (JSON)
        #[arg(long)]
        data: PathBuf,

        /// Classification passes per sample
        #[arg(long, default_value_t = DEFAULT_ATTEMPTS)]
        attempts: usize,
    },

    /// Print the input-layer influence map of one unit
    Reconstruct {
        network: PathBuf,

        /// Layer of the unit
        #[arg(long)]
        layer: usize,

        /// Unit index within the layer
        #[arg(long)]
        unit: usize,

        /// Print the map as rows of this width (0 = one line)
        #[arg(long, default_value_t = 0)]
        width: usize,
    },

    /// Dream visible states from a connection layer, one JSON line per state
    Generate {
        network: PathBuf,

        /// Connection layer to dream from
        #[arg(long, default_value_t = 0)]
        layer: usize,

        /// Backward passes averaged per state
        #[arg(long, default_value_t = 10)]
        samples: usize,

        /// Number of states to print
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    match args.command {
        Command::Create { config, output } => create(config.as_deref(), &output),
        Command::Info {
            network,
            thresholds,
        } => show_info(&network, thresholds),
        Command::Train {
            config,
            data,
            resume,
            output,
            metrics_file,
            time_limit,
        } => train(
            config.as_deref(),
            &data,
            resume.as_deref(),
            &output,
            metrics_file.as_deref(),
            time_limit,
        ),
        Command::Classify {
            network,
            data,
            attempts,
        } => classify(&network, &data, attempts),
        Command::Reconstruct {
            network,
            layer,
            unit,
            width,
        } => reconstruct(&network, layer, unit, width),
        Command::Generate {
            network,
            layer,
            samples,
            count,
        } => generate(&network, layer, samples, count),
    }
}

fn load_network(path: &Path) -> Result<Network> {
    Network::load_from_file(path)
        .with_context(|| format!("failed to load network from {}", path.display()))
}

fn load_dataset(path: &Path) -> Result<InMemoryProvider> {
    InMemoryProvider::from_json_file(path)
        .with_context(|| format!("failed to load dataset from {}", path.display()))
}

fn create(config: Option<&Path>, output: &Path) -> Result<()> {
    let config = match config {
        Some(path) => NetworkConfig::from_json_file(path)
            .with_context(|| format!("failed to read network config {}", path.display()))?,
        None => NetworkConfig::default(),
    };
    let network: Network = Network::new(&config)?;
    network
        .save_to_file(output)
        .with_context(|| format!("failed to save network to {}", output.display()))?;
    println!("Created {}-layer network {:?}", network.layer_count(), network.unit_counts());
    Ok(())
}

fn show_info(path: &Path, thresholds: bool) -> Result<()> {
    let network = load_network(path)?;
    println!("Layers:              {:?}", network.unit_counts());
    println!(
        "Classes:             {} × {} units",
        network.class_count(),
        network.units_per_class()
    );
    println!("Activation threshold: {}", network.activation_threshold());
    println!("Synapse success:     {}", network.synapse_success_probability());
    println!("Max input activations: {}", network.max_input_activations());
    println!("Weight range:        {}..={}", network.min_weight(), network.max_weight());

    for layer in 0..network.connection_count() {
        let store = network.connections(layer)?;
        let histogram: BTreeMap<i32, usize> =
            network.all_weights(layer)?.into_iter().counts().into_iter().collect();
        println!(
            "Connection layer {layer}: {}x{}, {} non-zero, weights {}",
            store.left_count(),
            store.right_count(),
            store.non_zero_count(),
            histogram.iter().map(|(w, n)| format!("{w}:{n}")).join(" ")
        );
    }

    if thresholds {
        print!("{}", network.thresholds_to_string());
    }
    Ok(())
}

fn train(
    config: Option<&Path>,
    data: &Path,
    resume: Option<&Path>,
    output: &Path,
    metrics_file: Option<&Path>,
    time_limit: u64,
) -> Result<()> {
    let config = match config {
        Some(path) => ExperimentConfig::from_json_file(path)
            .with_context(|| format!("failed to read experiment config {}", path.display()))?,
        None => ExperimentConfig::default(),
    };
    let provider = load_dataset(data)?;
    if provider.training_set().is_empty() {
        bail!("dataset {} has no training samples", data.display());
    }

    let cancel = Arc::new(AtomicBool::new(false));
    if time_limit > 0 {
        let flag = Arc::clone(&cancel);
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(time_limit));
            flag.store(true, Ordering::Relaxed);
        });
    }

    let mut log_progress = |progress: Progress| {
        if progress.samples % PROGRESS_INTERVAL == 0 {
            info!(phase = %progress.phase, epoch = progress.epoch, samples = progress.samples, "training");
        }
    };

    let experiment = Experiment::new(config);
    let report = match resume {
        Some(path) => {
            let network = load_network(path)?;
            experiment.continue_training(network, &provider, &cancel, Some(&mut log_progress))?
        }
        None => experiment.run::<DenseConnections, _>(&provider, &cancel, Some(&mut log_progress))?,
    };

    if let Some(path) = metrics_file {
        write_metrics(path, &report.epochs)?;
    }
    report
        .network
        .save_to_file(output)
        .with_context(|| format!("failed to save network to {}", output.display()))?;

    println!("Network: {}", report.name);
    if report.cancelled {
        println!("Training stopped early after {} epochs", report.epochs.len());
    }
    if let Some(evaluation) = &report.evaluation {
        println!(
            "Accuracy: {:.2}% (alternative {:.2}%, mean active output {:.4})",
            evaluation.accuracy * 100.0,
            evaluation.alternative_accuracy * 100.0,
            evaluation.mean_activated_fraction
        );
    }
    println!("Saved to {}", output.display());
    Ok(())
}

fn write_metrics(path: &Path, epochs: &[EpochReport]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
    );
    for epoch in epochs {
        writeln!(writer, "{}", serde_json::to_string(epoch)?)?;
    }
    writer.flush()?;
    Ok(())
}

fn classify(path: &Path, data: &Path, attempts: usize) -> Result<()> {
    let network = load_network(path)?;
    let provider = load_dataset(data)?;
    let evaluation = evaluate(&network, provider.testing_set(), attempts)?;

    println!(
        "Accuracy: {:.2}% over {} samples (alternative {:.2}%)",
        evaluation.accuracy * 100.0,
        evaluation.samples,
        evaluation.alternative_accuracy * 100.0
    );
    println!(
        "Guesses: [{}]",
        evaluation
            .guess_distribution()
            .iter()
            .map(|f| format!("{:.2}%", f * 100.0))
            .join("; ")
    );
    for (class, stats) in evaluation.class_statistics().iter().enumerate() {
        println!(
            "Class {class}: precision {:.2}%, recall {:.2}%, specificity {:.2}%",
            stats.precision * 100.0,
            stats.recall * 100.0,
            stats.specificity * 100.0
        );
    }
    Ok(())
}

fn reconstruct(path: &Path, layer: usize, unit: usize, width: usize) -> Result<()> {
    let network = load_network(path)?;
    let map = network.reconstruct_unit(layer, unit)?;
    if width == 0 {
        println!("{}", serde_json::to_string(&map)?);
    } else {
        for row in map.chunks(width) {
            println!("{}", row.iter().map(|v| format!("{v:>4}")).join(""));
        }
    }
    Ok(())
}

fn generate(path: &Path, layer: usize, samples: usize, count: usize) -> Result<()> {
    let network = load_network(path)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for state in network.generate_visible_states(layer, samples)?.take(count) {
        writeln!(out, "{}", serde_json::to_string(&state?)?)?;
    }
    Ok(())
}
