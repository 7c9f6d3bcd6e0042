//! jabber-rs CLI: generate stimuli, audit a model, analyze the results,
//! score sentence metrics and compare models

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jabber_rs::compare::{comparison_csv, format_comparison_table};
use jabber_rs::entropy;
use jabber_rs::report::{
    format_ablation_table, format_condition_metrics, format_contrast_table,
    format_entropy_effect, format_key_findings, format_ordering_checks, format_robustness_table,
    format_summary_table, robustness_csv,
};
use jabber_rs::{
    aggregation_robustness, compare_models, condition_metrics, entropy_effect, key_findings,
    normalize_stimuli, parse_context_lengths, position_split, score_stimuli,
    write_contrast_outputs, AuditConfig, AuditEngine, AuditModel, AuditOutput, Checkpoint,
    Condition, ContextLength, ContrastConfig, ContrastEngine, CueRegistry, CueSearch,
    GenerationConfig, MetricsOutput, NextTokenModel, Normalization, SanityReport,
    SetAggregation, StimulusGenerator, StimulusSet, StrategyKind, DEFAULT_REPLACEMENT,
    DEFAULT_STABLE_WITHIN, ENTROPY_ORDERINGS,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "jabber-rs")]
#[command(about = "Morphosyntax cue audit for causal language models")]
#[command(version)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a locked stimulus file
    Generate {
        /// Output stimulus JSON
        #[arg(short, long, default_value = "stimuli/stimuli_locked.json")]
        output: PathBuf,

        /// Stimulus sets per cue family
        #[arg(long, default_value_t = 30)]
        per_family: usize,

        /// Seed for templates and nonce words
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Nonce word replacing the cue in CUE_DELETED
        #[arg(long, default_value = DEFAULT_REPLACEMENT)]
        replacement: String,

        /// Also write the sanity report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Run the cue audit against a model
    Audit {
        /// Model ID from `HuggingFace` (e.g., "Qwen/Qwen2.5-0.5B")
        #[arg(short, long, default_value = "Qwen/Qwen2.5-0.5B")]
        model: String,

        /// Locked stimulus JSON
        #[arg(short, long, default_value = "stimuli/stimuli_locked.json")]
        stimuli: PathBuf,

        /// Output results JSON
        #[arg(short, long, default_value = "results/audit_results.json")]
        output: PathBuf,

        /// Comma-separated context lengths in words, -1 for the full prefix
        #[arg(long, default_value = "1,2,4,8,-1", allow_hyphen_values = true)]
        context_lengths: String,

        /// Number of top next tokens classified
        #[arg(long, default_value_t = 1000)]
        top_k: usize,

        /// Classification strategy (lexicon or pos)
        #[arg(long, default_value = "lexicon")]
        strategy: String,

        /// Cue location mode (stimulus, first, all)
        #[arg(long, default_value = "stimulus")]
        cue_search: String,

        /// Comma-separated conditions (default: all five)
        #[arg(long, value_delimiter = ',')]
        conditions: Vec<String>,

        /// Comma-separated cue families (default: all)
        #[arg(long, value_delimiter = ',')]
        families: Vec<String>,

        /// Rewrite the output file every N records
        #[arg(long)]
        checkpoint_every: Option<usize>,

        /// Nonce word expected in place of the cue in CUE_DELETED
        #[arg(long, default_value = DEFAULT_REPLACEMENT)]
        replacement: String,

        /// Normalize stimulus texts before scoring (period or strip)
        #[arg(long)]
        normalize: Option<String>,

        /// Force CPU mode (slower but avoids CUDA issues)
        #[arg(long)]
        cpu: bool,
    },

    /// Compute paired contrasts from audit results
    Analyze {
        /// Audit results JSON
        results: PathBuf,

        /// Prefix for output files (default: results path without extension)
        #[arg(long)]
        output_prefix: Option<String>,

        /// Context length to contrast at ("full" or a word count)
        #[arg(long, default_value = "full")]
        context: String,

        /// FDR significance level
        #[arg(long, default_value_t = 0.05)]
        alpha: f64,

        /// Bootstrap resamples for confidence intervals
        #[arg(long, default_value_t = 10_000)]
        bootstrap: usize,

        /// Bootstrap seed
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// How repeated cue occurrences in one set are combined (mean, first, median)
        #[arg(long, default_value = "mean")]
        aggregation: String,

        /// Re-run the contrasts with this set aggregation and report direction changes
        #[arg(long)]
        robustness: Option<String>,
    },

    /// Compare contrast effects across the audit outputs of several models
    Compare {
        /// Audit results JSON, one per model, smallest model first
        #[arg(required = true, num_args = 2..)]
        results: Vec<PathBuf>,

        /// Output comparison JSON (a CSV is written next to it)
        #[arg(short, long, default_value = "results/model_comparison.json")]
        output: PathBuf,

        /// Context length to contrast at ("full" or a word count)
        #[arg(long, default_value = "full")]
        context: String,

        /// FDR significance level
        #[arg(long, default_value_t = 0.05)]
        alpha: f64,

        /// Bootstrap resamples for confidence intervals
        #[arg(long, default_value_t = 10_000)]
        bootstrap: usize,

        /// Change in absolute effect below which an effect counts as stable
        #[arg(long, default_value_t = DEFAULT_STABLE_WITHIN)]
        stable_within: f64,
    },

    /// Score whole stimulus texts: word-aligned surprisal and entropy
    Metrics {
        /// Model ID from `HuggingFace` (e.g., "Qwen/Qwen2.5-0.5B")
        #[arg(short, long, default_value = "Qwen/Qwen2.5-0.5B")]
        model: String,

        /// Locked stimulus JSON
        #[arg(short, long, default_value = "stimuli/stimuli_locked.json")]
        stimuli: PathBuf,

        /// Output sentence-metrics JSON
        #[arg(short, long, default_value = "results/sentence_metrics.json")]
        output: PathBuf,

        /// Comma-separated conditions (default: all six)
        #[arg(long, value_delimiter = ',')]
        conditions: Vec<String>,

        /// Normalize stimulus texts before scoring (period or strip)
        #[arg(long, default_value = "period")]
        normalize: String,

        /// Score the texts as written
        #[arg(long, conflicts_with = "normalize")]
        raw: bool,

        /// Force CPU mode (slower but avoids CUDA issues)
        #[arg(long)]
        cpu: bool,
    },

    /// Entropy effects and aggregation robustness of a sentence-metrics file
    Entropy {
        /// Sentence-metrics JSON
        metrics: PathBuf,
    },

    /// Write a normalized copy of a stimulus file
    Normalize {
        /// Input stimulus JSON
        #[arg(short, long)]
        input: PathBuf,

        /// Output stimulus JSON
        #[arg(short, long)]
        output: PathBuf,

        /// period or strip
        #[arg(long, default_value = "period")]
        mode: String,
    },
}

fn parse_conditions(conditions: &[String]) -> Result<Vec<Condition>> {
    if conditions.is_empty() {
        return Ok(Condition::ALL.to_vec());
    }
    conditions.iter().map(|c| c.parse()).collect()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

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

    match cli.command {
        Commands::Generate {
            output,
            per_family,
            seed,
            replacement,
            report,
        } => run_generate(
            &output,
            GenerationConfig {
                per_family,
                seed,
                replacement,
            },
            report.as_deref(),
        ),
        Commands::Audit {
            model,
            stimuli,
            output,
            context_lengths,
            top_k,
            strategy,
            cue_search,
            conditions,
            families,
            checkpoint_every,
            replacement,
            normalize,
            cpu,
        } => {
            let config = AuditConfig {
                context_lengths: parse_context_lengths(&context_lengths)?,
                top_k,
                conditions: parse_conditions(&conditions)?,
                families,
                strategy: strategy.parse::<StrategyKind>()?,
                cue_search: cue_search.parse::<CueSearch>()?,
                replacement,
                checkpoint: checkpoint_every.map(|every| Checkpoint {
                    path: output.clone(),
                    every,
                }),
                normalization: normalize
                    .as_deref()
                    .map(str::parse::<Normalization>)
                    .transpose()?,
                ..Default::default()
            };
            run_audit(&model, &stimuli, &output, config, cpu)
        }
        Commands::Analyze {
            results,
            output_prefix,
            context,
            alpha,
            bootstrap,
            seed,
            aggregation,
            robustness,
        } => {
            let prefix = output_prefix
                .unwrap_or_else(|| results.with_extension("").to_string_lossy().into_owned());
            let config = ContrastConfig {
                context: context.parse::<ContextLength>()?,
                aggregation: aggregation.parse::<SetAggregation>()?,
                alpha,
                n_bootstrap: bootstrap,
                seed,
                ..Default::default()
            };
            let robustness = robustness
                .as_deref()
                .map(str::parse::<SetAggregation>)
                .transpose()?;
            run_analyze(&results, &prefix, config, robustness)
        }
        Commands::Compare {
            results,
            output,
            context,
            alpha,
            bootstrap,
            stable_within,
        } => {
            let config = ContrastConfig {
                context: context.parse::<ContextLength>()?,
                alpha,
                n_bootstrap: bootstrap,
                ..Default::default()
            };
            run_compare(&results, &output, &config, stable_within)
        }
        Commands::Metrics {
            model,
            stimuli,
            output,
            conditions,
            normalize,
            raw,
            cpu,
        } => {
            let normalization = if raw {
                None
            } else {
                Some(normalize.parse::<Normalization>()?)
            };
            run_metrics(
                &model,
                &stimuli,
                &output,
                &parse_conditions(&conditions)?,
                normalization,
                cpu,
            )
        }
        Commands::Entropy { metrics } => {
            let output = MetricsOutput::load(&metrics)?;
            println!("=== jabber-rs: Entropy Analysis ===");
            println!("Metrics: {} ({})", metrics.display(), output.model);
            print_entropy_analysis(&output)
        }
        Commands::Normalize {
            input,
            output,
            mode,
        } => {
            let mode = mode.parse::<Normalization>()?;
            let stimuli = StimulusSet::load(&input)?;
            normalize_stimuli(&stimuli, mode).save(&output)?;
            info!(
                "Normalized {} stimuli ({mode}) to {}",
                stimuli.len(),
                output.display()
            );
            Ok(())
        }
    }
}

fn run_generate(output: &Path, config: GenerationConfig, report: Option<&Path>) -> Result<()> {
    println!("=== jabber-rs: Stimulus Generation ===");
    println!("Output:     {}", output.display());
    println!("Per family: {}", config.per_family);
    println!("Seed:       {}", config.seed);

    let registry = CueRegistry::standard()?;
    let generator = StimulusGenerator::new(&registry, config.clone());
    let stimuli = generator.generate()?;
    stimuli.save(output)?;
    info!("Saved {} stimuli to {}", stimuli.len(), output.display());

    let sanity = SanityReport::check(&stimuli, &registry, &config);
    let rendered = sanity.render();
    println!("\n{rendered}");
    if let Some(path) = report {
        std::fs::write(path, &rendered)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    if !sanity.passed() {
        anyhow::bail!("Stimulus sanity checks failed");
    }
    Ok(())
}

fn run_audit(
    model_id: &str,
    stimuli_path: &Path,
    output: &Path,
    config: AuditConfig,
    force_cpu: bool,
) -> Result<()> {
    println!("=== jabber-rs: Cue Audit ===");
    println!("Model:   {model_id}");
    println!("Stimuli: {}", stimuli_path.display());
    println!("Output:  {}", output.display());
    if force_cpu {
        println!("Mode:    CPU (forced)");
    }

    let stimuli = StimulusSet::load(stimuli_path)?;
    info!("Loaded {} stimuli", stimuli.len());
    for (family, n) in stimuli.family_counts() {
        info!("  {family}: {n}");
    }

    let registry = CueRegistry::standard()?;
    let model = AuditModel::from_pretrained_with_device(model_id, force_cpu)?;
    info!(
        "Model ready: {} ({})",
        model.model_id(),
        model.architecture().as_str()
    );

    let engine = AuditEngine::new(&model, &registry, config)
        .with_source(stimuli_path.to_string_lossy());
    let run = engine.run(&stimuli)?;
    engine.output(&stimuli, &run).write(output)?;

    println!("\n=== Audit Summary ===");
    println!("{}", run.summary());
    info!("Results saved to {}", output.display());
    Ok(())
}

fn run_analyze(
    results_path: &Path,
    prefix: &str,
    config: ContrastConfig,
    robustness: Option<SetAggregation>,
) -> Result<()> {
    println!("=== jabber-rs: Contrast Analysis ===");
    println!("Results:     {}", results_path.display());
    println!("Context:     {}", config.context);
    println!("Aggregation: {}", config.aggregation);

    let output = AuditOutput::load(results_path)?;
    info!(
        "Loaded {} records from {} ({})",
        output.results.len(),
        output.metadata.model,
        output.metadata.timestamp
    );

    let engine = ContrastEngine::new(config.clone());
    let report = engine.run(&output.results);
    for omitted in &report.omitted {
        warn!("Contrast omitted: {omitted}");
    }
    let summary = engine.summary_table(&output.results);
    let ablation = engine.ablation(&output.results);

    println!("\n=== Class Mass by Condition ===");
    println!("{}", format_summary_table(&summary));
    println!("\n=== Contrasts ===");
    println!("{}", format_contrast_table(&report.results));
    println!("\n=== Key Findings ===");
    println!("{}", format_key_findings(&key_findings(&report.results)));
    println!("\n=== Context Ablation (JABBERWOCKY) ===");
    println!(
        "{}",
        format_ablation_table(&ablation, Condition::Jabberwocky)
    );

    let files = write_contrast_outputs(prefix, &report.results, &summary, &ablation)?;
    info!("Contrasts saved to {}", files.contrasts_csv.display());
    info!("Summary saved to {}", files.summary_csv.display());
    info!("Ablation saved to {}", files.ablation_csv.display());

    if let Some(alternative) = robustness {
        let rows = aggregation_robustness(&output.results, &config, alternative);
        println!("\n=== Set Aggregation Robustness ===");
        println!("{}", format_robustness_table(&rows));
        let path = PathBuf::from(format!("{prefix}_robustness.csv"));
        std::fs::write(&path, robustness_csv(&rows))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Robustness saved to {}", path.display());
    }
    Ok(())
}

fn run_compare(
    paths: &[PathBuf],
    output: &Path,
    config: &ContrastConfig,
    stable_within: f64,
) -> Result<()> {
    println!("=== jabber-rs: Model Comparison ===");
    let outputs = paths
        .iter()
        .map(AuditOutput::load)
        .collect::<Result<Vec<_>>>()?;
    for (i, o) in outputs.iter().enumerate() {
        println!(
            "M{}: {} ({} records)",
            i + 1,
            o.metadata.model,
            o.results.len()
        );
    }

    let comparison = compare_models(&outputs, config, stable_within)?;
    println!("\n{}", format_comparison_table(&comparison));

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, serde_json::to_string_pretty(&comparison)?)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    let csv_path = output.with_extension("csv");
    std::fs::write(&csv_path, comparison_csv(&comparison))
        .with_context(|| format!("Failed to write {}", csv_path.display()))?;
    info!("Comparison saved to {}", output.display());
    Ok(())
}

fn run_metrics(
    model_id: &str,
    stimuli_path: &Path,
    output: &Path,
    conditions: &[Condition],
    normalization: Option<Normalization>,
    force_cpu: bool,
) -> Result<()> {
    println!("=== jabber-rs: Sentence Metrics ===");
    println!("Model:   {model_id}");
    println!("Stimuli: {}", stimuli_path.display());
    println!("Output:  {}", output.display());
    match normalization {
        Some(mode) => println!("Normalization: {mode}"),
        None => println!("Normalization: none"),
    }

    let stimuli = StimulusSet::load(stimuli_path)?;
    let model = AuditModel::from_pretrained_with_device(model_id, force_cpu)?;
    let metrics = score_stimuli(&model, &stimuli, conditions, normalization);
    metrics.write(output)?;
    info!("Sentence metrics saved to {}", output.display());

    print_entropy_analysis(&metrics)
}

fn print_entropy_analysis(metrics: &MetricsOutput) -> Result<()> {
    let registry = CueRegistry::standard()?;

    println!("\n=== Entropy and Surprisal by Condition ===");
    println!("{}", format_condition_metrics(&condition_metrics(&metrics.records)));

    println!("=== Entropy Effects ===");
    for &(a, b) in &ENTROPY_ORDERINGS {
        match entropy_effect(&metrics.records, a, b) {
            Some(effect) => {
                let split = position_split(&metrics.records, &registry, a, b);
                println!("{}", format_entropy_effect(&effect, &split));
            }
            None => warn!("No matched sets for {a} - {b}"),
        }
    }

    println!("=== Aggregation Robustness (word-mean vs word-sum) ===");
    let checks = entropy::aggregation_robustness(&metrics.records, &ENTROPY_ORDERINGS);
    print!("{}", format_ordering_checks(&checks));
    if checks.iter().all(entropy::OrderingCheck::agrees) {
        println!("Key orderings agree under both aggregations");
    } else {
        warn!("Some orderings differ between word-mean and word-sum aggregation");
    }
    Ok(())
}
