//! wordret-rs CLI: layer-wise cross-lingual word retrieval

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use wordret_rs::{
    AccuracySink, DataMode, Experiment, ExperimentConfig, JsonReportSink, MarginVariant,
    ModelArchitecture, PoolingMode, PromptMode, RetrievalModel, WordPairs, DEFAULT_BATCH_SIZE,
    DEFAULT_K,
};

#[derive(Parser)]
#[command(name = "wordret-rs")]
#[command(about = "Layer-wise cross-lingual word retrieval on LLM hidden states")]
#[command(version)]
struct Cli {
    /// Model ID from `HuggingFace` (e.g., "Qwen/Qwen2.5-0.5B")
    #[arg(short, long)]
    model: String,

    /// Override the architecture detected from the model ID
    #[arg(long, value_enum)]
    arch: Option<ModelArchitecture>,

    /// Target language code (gle_Latn, eus_Latn, cmn_Hans)
    #[arg(short, long)]
    target_lang: String,

    /// Word list, JSON array or JSON lines of {lang, word, eng}
    #[arg(short, long, default_value = "data/sla_words.jsonl")]
    dataset: PathBuf,

    /// Keep only the first n pairs of the word list
    #[arg(long)]
    limit: Option<usize>,

    /// Which word pairs to use
    #[arg(long, value_enum, default_value_t = DataMode::Full)]
    data: DataMode,

    /// Zero-shot or few-shot presentation of target words
    #[arg(long, value_enum, default_value_t = PromptMode::Zero)]
    prompt: PromptMode,

    /// Pooling for the English side
    #[arg(long, value_enum, default_value_t = PoolingMode::Mean)]
    hidden_base: PoolingMode,

    /// Pooling for the target side
    #[arg(long, value_enum, default_value_t = PoolingMode::Mean)]
    hidden_target: PoolingMode,

    /// Margin scoring variant
    #[arg(long, value_enum, default_value_t = MarginVariant::Ratio)]
    margin_variant: MarginVariant,

    /// Pairs per run (only used with --data sample)
    #[arg(long, default_value_t = 100)]
    data_sample_size: usize,

    /// Number of sampling runs (only used with --data sample)
    #[arg(long, default_value_t = 1)]
    runs: usize,

    /// Seed of the first sampling run
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Sentences per forward pass
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Neighbourhood size of the margin baseline
    #[arg(short, long, default_value_t = DEFAULT_K)]
    k: usize,

    /// Output directory for results
    #[arg(short, long, default_value = "artifacts")]
    save_folder: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Force CPU mode (slower but avoids CUDA issues)
    #[arg(long)]
    cpu: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    println!("=== wordret-rs: Cross-Lingual Word Retrieval ===");
    println!("Model:   {}", cli.model);
    println!("Target:  {}", cli.target_lang);
    println!("Dataset: {}", cli.dataset.display());
    println!("Output:  {}", cli.save_folder.display());
    if cli.cpu {
        println!("Mode:    CPU (forced)");
    }

    let config = ExperimentConfig {
        model_id: cli.model.clone(),
        target_lang: cli.target_lang.clone(),
        dataset_path: cli.dataset.to_string_lossy().to_string(),
        limit: cli.limit,
        data_mode: cli.data,
        prompt_mode: cli.prompt,
        hidden_base: cli.hidden_base,
        hidden_target: cli.hidden_target,
        margin_variant: cli.margin_variant,
        sample_size: cli.data_sample_size,
        runs: cli.runs,
        seed: cli.seed,
        batch_size: cli.batch_size,
        k: cli.k,
        ..Default::default()
    };

    // Load word pairs before the model so a bad dataset fails fast
    let pairs = WordPairs::load(&config.dataset_path, &config.target_lang, config.limit)?;
    info!("Word pairs: {}", pairs.len());

    // Load model
    info!("Loading model...");
    let architecture = cli
        .arch
        .unwrap_or_else(|| ModelArchitecture::from_model_id(&cli.model));
    let model = RetrievalModel::from_pretrained_with_arch(&cli.model, Some(cli.cpu), architecture)?;
    info!(
        "Model: {} layers, {} hidden",
        model.n_layers(),
        model.d_model()
    );

    let experiment = Experiment::new(model, config);
    let results = experiment.run_on(&pairs)?;

    // Print results
    println!("\n=== Results ===");
    for (run, accuracy) in results.runs.iter().enumerate() {
        if results.runs.len() > 1 {
            println!("\nRun {} ({} pairs)", run + 1, results.data_sizes[run]);
        }
        for (layer, acc) in accuracy.iter() {
            println!("Layer {:2}: {:.1}%", layer, acc * 100.0);
        }
        if let Some((layer, acc)) = accuracy.best_layer() {
            println!("\nBest: layer {} with {:.1}% accuracy", layer, acc * 100.0);
        }
    }

    // Save results
    let note = results.note(experiment.config());
    let sink = JsonReportSink::new(cli.save_folder.clone());
    let path = sink.publish(&results.runs, &note)?;
    println!("\nResults saved to {}", path.display());

    Ok(())
}
