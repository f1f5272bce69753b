use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tch::Device;

use trainer::{DatasetLoader, LabelEncoding, TrainerConfig};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train on a CSV, resuming from the checkpoint when it exists
    Train {
        /// CSV with the class label in column 0
        #[arg(long)]
        csv: PathBuf,

        /// Checkpoint to resume from and write to
        #[arg(long)]
        model: PathBuf,

        /// Training config (YAML); defaults are used when the file is missing
        #[arg(long, default_value = "configs/training_config.yaml")]
        config: PathBuf,
    },
    /// Report classification error of a saved model on a CSV
    Evaluate {
        #[arg(long)]
        csv: PathBuf,

        #[arg(long)]
        model: PathBuf,

        /// Compare against column 0 as-is instead of one-hot class indices
        #[arg(long)]
        raw_labels: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let device = Device::cuda_if_available();
    println!("Using device: {:?}", device);

    match cli.command {
        Commands::Train { csv, model, config } => {
            let config = TrainerConfig::load_or_default(&config)
                .with_context(|| format!("Failed to load training config {:?}", config))?;
            println!("Starting training with configuration: {:?}", config);

            let trained = trainer::construct_or_load_on(&csv, &model, &config, device)
                .with_context(|| format!("Training on {:?} failed", csv))?;

            let dataset = config.encode_labels(DatasetLoader::load(&csv)?)?;
            let error = trainer::classification_error(&trained, &dataset)?;
            println!(
                "Training complete! Saved {:?} (training error {:.4})",
                model, error
            );
        }
        Commands::Evaluate {
            csv,
            model,
            raw_labels,
        } => {
            let loaded = trainer::load_only_on(&model, device)
                .with_context(|| format!("Failed to load model {:?}", model))?;
            let config = TrainerConfig {
                label_encoding: if raw_labels {
                    LabelEncoding::Raw
                } else {
                    LabelEncoding::OneHot
                },
                num_classes: (!raw_labels).then(|| loaded.output_dim()),
                ..TrainerConfig::default()
            };
            let dataset = config.encode_labels(DatasetLoader::load(&csv)?)?;
            let error = trainer::classification_error(&loaded, &dataset)?;
            println!(
                "{} samples, classification error {:.4}",
                dataset.len(),
                error
            );
        }
    }

    Ok(())
}
