use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use predicate_optimizer::{
    advisor, Advisor, AnalysisRun, AnalysisUnit, Classifier, ConditionWalker, SchemaMetadata,
};

#[derive(Parser)]
#[command(name = "predopt")]
#[command(about = "Scans query methods and recommends selectivity-ordered predicates.")]
struct Cli {
    /// Schema metadata (indexes, column type hints, cardinality overrides)
    #[arg(long, global = true)]
    schema: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract predicates from one query and suggest a better order
    Analyze {
        query: String,
        /// Table assumed for unqualified columns
        #[arg(long, default_value = "")]
        table: String,
    },
    /// Analyze every unit in a JSON description, with checkpoint/resume
    Run {
        units: PathBuf,
        #[arg(long, default_value = "predopt-checkpoint.json")]
        checkpoint: PathBuf,
    },
    /// Show the argument-position remapping for a reordered column list
    Mapping {
        #[arg(required = true)]
        current: Vec<String>,
        #[arg(long, required = true, num_args = 1..)]
        recommended: Vec<String>,
        /// Total argument count; trailing arguments keep their position
        #[arg(long)]
        args: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let metadata = load_schema(cli.schema.as_deref())?;
    let classifier = Classifier::from_metadata(&metadata);

    match cli.command {
        Command::Analyze { query, table } => {
            let walker = ConditionWalker::new(&classifier);
            let extraction = walker.extract_sql(&query, &table)?;

            for predicate in &extraction.where_predicates {
                println!(
                    "PREDICATE: {}.{} {} [{}] position={}",
                    predicate.table.as_deref().unwrap_or("?"),
                    predicate.column,
                    predicate.operator,
                    predicate.cardinality,
                    predicate.position,
                );
            }
            for join in &extraction.join_predicates {
                println!(
                    "JOIN: {}.{} {} {}.{} position={}",
                    join.left_table,
                    join.left_column,
                    join.operator,
                    join.right_table,
                    join.right_column,
                    join.position,
                );
            }

            let advisor = Advisor::new(&classifier);
            let conjunctive = !extraction.where_has_or;
            match advisor.advise("cli", "query", &extraction.where_predicates, conjunctive) {
                Some(issue) => {
                    println!("ISSUE[{}]: {}", issue.severity, issue.description);
                    println!("RECOMMENDED: ({})", issue.recommended_order.join(", "));
                }
                None => println!("OK: predicate order is already optimal."),
            }

            let recommended = advisor::recommended_order(&extraction.where_predicates);
            let gaps = advisor.index_gaps(&recommended);
            if gaps.is_empty() {
                println!("OK: no index suggestions.");
            } else {
                for suggestion in gaps {
                    println!(
                        "SUGGESTION: {}({})",
                        suggestion.table,
                        suggestion.columns.join(", ")
                    );
                }
            }
        }
        Command::Run { units, checkpoint } => {
            let contents = fs::read_to_string(&units)
                .with_context(|| format!("failed to read units file {}", units.display()))?;
            let units: Vec<AnalysisUnit> = serde_json::from_str(&contents)
                .context("failed to parse units file as an analysis-unit list")?;

            let report = AnalysisRun::new(&classifier, checkpoint).execute(&units);

            if report.resumed {
                println!("RESUMED: {} unit(s) already processed.", report.units_skipped);
            }
            for advice in &report.advices {
                let issue = &advice.issue;
                println!(
                    "ISSUE[{}] {}.{}: ({}) -> ({})",
                    issue.severity,
                    issue.unit_id,
                    issue.method_id,
                    issue.current_order.join(", "),
                    issue.recommended_order.join(", "),
                );
                if let Some(mapping) = &advice.position_mapping {
                    let mut pairs: Vec<_> = mapping.iter().collect();
                    pairs.sort();
                    let rendered: Vec<String> = pairs
                        .iter()
                        .map(|(new, old)| format!("{new}<-{old}"))
                        .collect();
                    println!("MAPPING {}.{}: {}", issue.unit_id, issue.method_id, rendered.join(" "));
                }
                if let Some(name) = &advice.proposed_name {
                    println!("RENAME {}.{}: {}", issue.unit_id, issue.method_id, name);
                }
                if let Some(body) = &advice.rewritten_where {
                    println!("REWRITE {}.{}: WHERE {}", issue.unit_id, issue.method_id, body);
                }
            }

            if report.suggestions.entries.is_empty() {
                println!("OK: no index suggestions.");
            } else {
                for suggestion in &report.suggestions.entries {
                    println!(
                        "SUGGESTION: {}({})",
                        suggestion.table,
                        suggestion.columns.join(", ")
                    );
                }
            }
            println!(
                "OK: processed {} unit(s), skipped {}.",
                report.units_processed, report.units_skipped
            );
        }
        Command::Mapping {
            current,
            recommended,
            args,
        } => {
            let arg_count = args.unwrap_or(current.len());
            match advisor::build_position_mapping(&current, &recommended, arg_count) {
                Some(mapping) => {
                    let mut pairs: Vec<_> = mapping.into_iter().collect();
                    pairs.sort();
                    for (new_index, old_index) in pairs {
                        println!("{new_index} <- {old_index}");
                    }
                }
                None => println!(
                    "WARNING: orders are not a permutation (or exceed {arg_count} argument(s))."
                ),
            }
        }
    }

    Ok(())
}

fn load_schema(path: Option<&std::path::Path>) -> anyhow::Result<SchemaMetadata> {
    let Some(path) = path else {
        return Ok(SchemaMetadata::default());
    };
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read schema file {}", path.display()))?;
    serde_json::from_str(&contents).context("failed to parse schema metadata")
}
