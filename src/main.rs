//! Team goal prediction CLI
//!
//! Builds training bundles from match CSVs, trains the LSTM regressor and
//! renders prediction reports for uploaded CSVs.

use clap::{Parser, Subcommand};
use goalnet::{Config, Result};

#[derive(Parser)]
#[command(name = "goalnet")]
#[command(about = "Team goal prediction with a stacked LSTM", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new project with default config
    Init,
    /// Training data commands
    Data {
        #[command(subcommand)]
        action: DataCommands,
    },
    /// Fit the feature scaler on the training bundle and save it to
    /// data.scaler_path, for `train --reuse-scaler`
    FitScaler {
        /// Output path (defaults to data.scaler_path)
        #[arg(long)]
        output: Option<String>,
    },
    /// Train the model and commit a new run
    Train {
        /// Override number of epochs
        #[arg(long)]
        epochs: Option<usize>,
        /// Override learning rate
        #[arg(long)]
        lr: Option<f64>,
        /// Override batch size
        #[arg(long)]
        batch_size: Option<usize>,
        /// Standardize with the scaler saved by fit-scaler instead of refitting
        #[arg(long)]
        reuse_scaler: bool,
    },
    /// Predict goals for a CSV and write the HTML report
    Predict {
        /// Input CSV
        input: String,
        /// Run to use (defaults to the latest)
        #[arg(long)]
        run: Option<String>,
        /// HTML output path (defaults to service.report_path)
        #[arg(long)]
        output: Option<String>,
        /// Also write the table with predictions as CSV
        #[arg(long)]
        csv: Option<String>,
    },
    /// Model management commands
    Model {
        #[command(subcommand)]
        action: ModelCommands,
    },
}

#[derive(Subcommand)]
enum DataCommands {
    /// Build a training bundle from a per-match CSV
    Build {
        /// Input CSV
        input: String,
        /// Column identifying the team
        #[arg(long, default_value = "Team")]
        entity: String,
        /// Column ordering a team's matches
        #[arg(long, default_value = "Date")]
        time: String,
        /// Goals column
        #[arg(long, default_value = goalnet::LABEL_COLUMN)]
        target: String,
        /// Feature columns (defaults to every other column)
        #[arg(long, value_delimiter = ',')]
        features: Vec<String>,
        /// Matches per window; the target is the following match
        #[arg(long, default_value = "1")]
        sequence_length: usize,
        /// One match per window, target from the same row
        #[arg(long)]
        per_row: bool,
        /// Keep every sample for training
        #[arg(long)]
        no_split: bool,
    },
    /// Hold out a validation split from a bundle that has none
    Split {
        /// Override validation ratio
        #[arg(long)]
        ratio: Option<f32>,
    },
}

#[derive(Subcommand)]
enum ModelCommands {
    /// List committed runs
    List,
    /// Show run information
    Info {
        /// Run id (defaults to the latest)
        run: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load or create config
    let config = if std::path::Path::new(&cli.config).exists() {
        match Config::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    let result = match cli.command {
        Commands::Init => commands::init(&cli.config),
        Commands::Data { action } => match action {
            DataCommands::Build {
                input,
                entity,
                time,
                target,
                features,
                sequence_length,
                per_row,
                no_split,
            } => commands::data_build(
                &config,
                &input,
                commands::BuildOptions {
                    entity,
                    time,
                    target,
                    features,
                    sequence_length,
                    per_row,
                    split: !no_split,
                },
            ),
            DataCommands::Split { ratio } => commands::data_split(&config, ratio),
        },
        Commands::FitScaler { output } => commands::fit_scaler(&config, output),
        Commands::Train {
            epochs,
            lr,
            batch_size,
            reuse_scaler,
        } => commands::train(&config, epochs, lr, batch_size, reuse_scaler),
        Commands::Predict {
            input,
            run,
            output,
            csv,
        } => commands::predict(&config, &input, run, output, csv),
        Commands::Model { action } => match action {
            ModelCommands::List => commands::model_list(&config),
            ModelCommands::Info { run } => commands::model_info(&config, run),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

mod commands {
    use super::*;
    use goalnet::data::bundle::split_samples;
    use goalnet::data::{Table, TrainingBundle};
    use goalnet::features::{ScalerState, SequenceBuilder};
    use goalnet::training::{CheckpointStore, RunSummary};
    use goalnet::GoalError;

    pub struct BuildOptions {
        pub entity: String,
        pub time: String,
        pub target: String,
        pub features: Vec<String>,
        pub sequence_length: usize,
        pub per_row: bool,
        pub split: bool,
    }

    pub fn init(config_path: &str) -> Result<()> {
        let config = Config::default();
        config.save(config_path)?;
        println!("Created default config at {}", config_path);

        std::fs::create_dir_all("data")?;
        std::fs::create_dir_all(&config.data.checkpoint_dir)?;
        println!("Created data/ and {}/ directories", config.data.checkpoint_dir);

        println!("\nNext steps:");
        println!("  1. Edit {} to customize settings", config_path);
        println!("  2. Run 'goalnet data build matches.csv' to build a training bundle");
        println!("  3. Run 'goalnet train' to train the model");
        println!("  4. Run 'goalnet predict upload.csv' to render a prediction report");

        Ok(())
    }

    pub fn data_build(config: &Config, input: &str, options: BuildOptions) -> Result<()> {
        let table = Table::from_path(input)?;
        println!("Loaded {} rows from {}", table.len(), input);

        let features = if options.features.is_empty() {
            SequenceBuilder::default_feature_columns(
                &table,
                &options.entity,
                &options.time,
                &options.target,
            )
        } else {
            options.features
        };

        let builder = if options.per_row {
            SequenceBuilder::per_row(features, &options.entity, &options.time, &options.target)
        } else {
            SequenceBuilder::next_step(
                features,
                &options.entity,
                &options.time,
                &options.target,
                options.sequence_length,
            )
        };
        let samples = builder.build(&table)?;
        if samples.is_empty() {
            return Err(GoalError::Data(format!(
                "no team has more than {} matches; nothing to train on",
                builder.sequence_length
            )));
        }
        println!(
            "Built {} samples ({} features, {} steps)",
            samples.len(),
            builder.feature_columns.len(),
            builder.sequence_length
        );

        let bundle = if options.split {
            let (train, val) = split_samples(
                samples,
                config.training.validation_ratio,
                config.training.seed,
            )?;
            println!("  {} training, {} validation", train.len(), val.len());
            TrainingBundle::from_samples(train, Some(val))
        } else {
            TrainingBundle::from_samples(samples, None)
        };

        bundle.save(&config.data.bundle_path)?;
        println!("Saved bundle to {}", config.data.bundle_path);
        Ok(())
    }

    pub fn data_split(config: &Config, ratio: Option<f32>) -> Result<()> {
        let bundle = TrainingBundle::load(&config.data.bundle_path)?;
        if bundle.has_validation() {
            return Err(GoalError::Config(format!(
                "{} already has a validation split",
                config.data.bundle_path
            )));
        }

        let ratio = ratio.unwrap_or(config.training.validation_ratio);
        let (train, val) = split_samples(bundle.train_samples()?, ratio, config.training.seed)?;
        println!("Split into {} training and {} validation samples", train.len(), val.len());

        TrainingBundle::from_samples(train, Some(val)).save(&config.data.bundle_path)?;
        println!("Saved bundle to {}", config.data.bundle_path);
        Ok(())
    }

    pub fn fit_scaler(config: &Config, output: Option<String>) -> Result<()> {
        let bundle = TrainingBundle::load(&config.data.bundle_path)?;
        let scaler = ScalerState::fit_windows(&bundle.train_windows())?;
        let output = output.unwrap_or_else(|| config.data.scaler_path.clone());

        scaler.save(&output)?;
        println!(
            "Fitted scaler on {} rows x {} features, saved to {}",
            scaler.n_samples,
            scaler.width(),
            output
        );
        for col in (0..scaler.width()).filter(|&c| scaler.is_constant(c)) {
            log::warn!("Feature {} is constant and will scale to 0", col);
        }
        Ok(())
    }

    pub fn train(
        config: &Config,
        epochs: Option<usize>,
        lr: Option<f64>,
        batch_size: Option<usize>,
        reuse_scaler: bool,
    ) -> Result<()> {
        use goalnet::training::run_training;

        let mut config = config.clone();
        if let Some(e) = epochs {
            config.training.epochs = e;
        }
        if let Some(lr) = lr {
            config.training.learning_rate = lr;
        }
        if let Some(b) = batch_size {
            config.training.batch_size = b;
        }

        println!("Initializing training...");

        let bundle = TrainingBundle::load(&config.data.bundle_path)?;
        println!("Loaded bundle from {}", config.data.bundle_path);

        let scaler = if reuse_scaler {
            println!("Using scaler from {}", config.data.scaler_path);
            Some(ScalerState::load(&config.data.scaler_path)?)
        } else {
            None
        };

        println!("Model config:");
        println!("  Input size:    {}", config.model.input_size);
        println!("  Hidden size:   {}", config.model.hidden_size);
        println!("  Layers:        {}", config.model.num_layers);
        println!("  Learning rate: {}", config.training.learning_rate);

        println!("\nStarting training...\n");
        let summary = run_training(&config, &bundle, scaler)?;

        let store = CheckpointStore::new(&config.data.checkpoint_dir);
        println!("\nTraining complete!");
        print_summary(&summary);
        println!("  Saved to:         {}", store.run_dir(&summary.run_id).display());

        Ok(())
    }

    pub fn predict(
        config: &Config,
        input: &str,
        run: Option<String>,
        output: Option<String>,
        csv: Option<String>,
    ) -> Result<()> {
        use goalnet::predict::ServiceContext;

        let context = ServiceContext::load(config, run.as_deref())?;
        if let Some(summary) = context.run() {
            println!("Using run {}", summary.run_id);
        }
        let bytes = std::fs::read(input)?;
        let page = context.service().handle(&bytes);

        let output = output.unwrap_or_else(|| config.service.report_path.clone());
        std::fs::write(&output, page.render_html())?;

        if let Some(message) = &page.error {
            println!("Report written to {} with an error:", output);
            println!("  {}", message);
            return Ok(());
        }

        if let Some(report) = &page.report {
            println!("Predicted goals for {} rows", report.predictions.len());
            for (goals, count) in report.goal_counts() {
                println!("  {:>3} goals: {}", goals, count);
            }
            if let Some(path) = csv {
                report.table.write_csv(&path)?;
                println!("Wrote predictions to {}", path);
            }
        }
        println!("Report written to {}", output);

        Ok(())
    }

    pub fn model_list(config: &Config) -> Result<()> {
        let store = CheckpointStore::new(&config.data.checkpoint_dir);
        let runs = store.list()?;
        if runs.is_empty() {
            println!("No runs in {}", config.data.checkpoint_dir);
            return Ok(());
        }

        println!("{:<28} {:>7} {:>6} {:>12}", "Run", "Epochs", "Best", "Val loss");
        println!("───────────────────────────────────────────────────────");
        for run in runs {
            println!(
                "{:<28} {:>7} {:>6} {:>12}",
                run.run_id,
                run.epochs,
                run.best_epoch.map(|e| e.to_string()).unwrap_or_else(|| "-".to_string()),
                run.best_val_loss
                    .map(|l| format!("{:.4}", l))
                    .unwrap_or_else(|| "-".to_string())
            );
        }
        Ok(())
    }

    pub fn model_info(config: &Config, run: Option<String>) -> Result<()> {
        let store = CheckpointStore::new(&config.data.checkpoint_dir);
        let summary = store.resolve(run.as_deref())?;

        println!("Model Information");
        println!("───────────────────────────────");
        print_summary(&summary);
        println!("  Parameters:       {}.mpk", store.model_path(&summary.run_id).display());
        println!("  Scaler:           {}", store.scaler_path(&summary.run_id).display());
        Ok(())
    }

    fn print_summary(summary: &RunSummary) {
        println!("  Run:              {}", summary.run_id);
        println!("  Created:          {}", summary.created_at);
        println!("  Input size:       {}", summary.input_size);
        println!("  Hidden size:      {}", summary.hidden_size);
        println!("  Layers:           {}", summary.num_layers);
        println!("  Epochs:           {}", summary.epochs);
        println!(
            "  Samples:          {} train, {} val",
            summary.train_samples, summary.val_samples
        );
        match (summary.best_epoch, summary.best_val_loss) {
            (Some(epoch), Some(loss)) => {
                let label = if summary.had_validation { "val" } else { "train" };
                println!("  Best epoch:       {} ({} loss {:.4})", epoch, label, loss);
            }
            _ => println!("  Best epoch:       none (final parameters kept)"),
        }
        println!("  Final train loss: {:.4}", summary.final_train_loss);
    }
}
