//! Cheese Grinder CLI
//!
//! Offline tools over storage dumps and tapped payloads: inspect the
//! moderation state, regenerate the CSV log and PDF report, and replay the
//! identity index and chat filter.

mod dump;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};

use cg_core::{filter_chat_text, Artifact, Clock, IdentityIndex, SystemClock};
use cg_export::{CaptureOrder, PdfOptions, TextMode};

#[derive(Parser)]
#[command(name = "cg-cli")]
#[command(about = "Cheese Grinder moderation state tools")]
struct Cli {
    /// Engine config JSON (storage keys, labels)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Order {
    Newest,
    Oldest,
}

impl From<Order> for CaptureOrder {
    fn from(order: Order) -> Self {
        match order {
            Order::Newest => CaptureOrder::NewestFirst,
            Order::Oldest => CaptureOrder::OldestFirst,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a storage dump
    Info {
        /// Storage dump file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Write the combined block/capture CSV log
    Csv {
        /// Storage dump file
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (defaults to the dated log name)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write the capture PDF report
    Pdf {
        /// Storage dump file
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (defaults to the dated report name)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Capture order
        #[arg(long, value_enum, default_value = "newest")]
        order: Order,

        /// Only these comment ids
        #[arg(long, value_delimiter = ',')]
        ids: Option<Vec<String>>,
    },

    /// Print commentId/authorId pairs from a tapped comment feed
    Index {
        /// Feed response body
        #[arg(short, long)]
        feed: PathBuf,
    },

    /// Filter a raw chat frame against blocked author ids
    FilterChat {
        /// Chat frame text
        #[arg(short, long)]
        input: PathBuf,

        /// Blocked author ids
        #[arg(short, long, value_delimiter = ',', required = true)]
        blocked: Vec<String>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Info { input } => cmd_info(&input, cli.config.as_deref()),
        Commands::Csv { input, output } => cmd_csv(&input, output, cli.config.as_deref()),
        Commands::Pdf {
            input,
            output,
            order,
            ids,
        } => cmd_pdf(&input, output, order, ids, cli.config.as_deref()),
        Commands::Index { feed } => cmd_index(&feed),
        Commands::FilterChat { input, blocked } => cmd_filter_chat(&input, &blocked),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn write_artifact(artifact: &Artifact, output: Option<PathBuf>) -> Result<PathBuf, String> {
    let path = output.unwrap_or_else(|| PathBuf::from(&artifact.filename));
    let bytes = artifact
        .to_bytes()
        .ok_or_else(|| format!("'{}' has no decodable payload", artifact.filename))?;
    fs::write(&path, &bytes).map_err(|e| format!("Failed to write '{}': {}", path.display(), e))?;
    println!("Wrote '{}' ({} bytes)", path.display(), bytes.len());
    Ok(path)
}

fn cmd_info(input: &Path, config: Option<&Path>) -> Result<(), String> {
    let config = dump::load_config(config)?;
    let store = dump::load_store(input, &config)?;
    let summary = store.summary();

    println!("Dump: {}", input.display());
    println!("  Blocked:        {}", store.blocked_count());
    println!("  Block records:  {}", store.block_record_count());
    println!("  Captures:       {}", store.capture_count());
    println!("  Capture bytes:  {} ({:.1} KB)", store.capture_bytes(), store.capture_bytes() as f64 / 1024.0);
    println!("  CSV rows:       {}", summary.csv_rows);
    println!("  PDF items:      {}", summary.pdf_items);
    println!();

    let ledger = store.ledger(&config.target_param);
    if !ledger.is_empty() {
        println!("Ledger (newest first):");
        for entry in ledger {
            println!(
                "  {:?}\t{}\t{}\t{}",
                entry.kind, entry.recorded_at, entry.author_id, entry.display_name
            );
        }
    }

    Ok(())
}

fn cmd_csv(input: &Path, output: Option<PathBuf>, config: Option<&Path>) -> Result<(), String> {
    let config = dump::load_config(config)?;
    let store = dump::load_store(input, &config)?;
    let artifact = cg_export::export_csv(&store, &SystemClock.date_stamp()).map_err(|e| e.to_string())?;
    write_artifact(&artifact, output)?;
    Ok(())
}

fn cmd_pdf(
    input: &Path,
    output: Option<PathBuf>,
    order: Order,
    ids: Option<Vec<String>>,
    config: Option<&Path>,
) -> Result<(), String> {
    let config = dump::load_config(config)?;
    let store = dump::load_store(input, &config)?;
    let options = PdfOptions {
        order: order.into(),
        ids,
        text: TextMode::BuiltinFont,
        labels: config.labels.clone(),
    };
    let artifact =
        cg_export::export_pdf(&store, &options, &SystemClock.date_stamp()).map_err(|e| e.to_string())?;
    write_artifact(&artifact, output)?;
    Ok(())
}

fn cmd_index(feed: &Path) -> Result<(), String> {
    let body = dump::read_json(feed)?;
    let mut index = IdentityIndex::new();
    let recorded = index.ingest_feed(&body);
    if recorded == 0 {
        return Err(format!("No comment identities in '{}'", feed.display()));
    }

    let mut pairs: Vec<(&str, &str)> = index.iter().collect();
    pairs.sort_unstable();
    for (comment_id, author_id) in pairs {
        println!("{}\t{}", comment_id, author_id);
    }
    Ok(())
}

fn cmd_filter_chat(input: &Path, blocked: &[String]) -> Result<(), String> {
    let text = fs::read_to_string(input).map_err(|e| format!("Failed to read '{}': {}", input.display(), e))?;
    let blocked: HashSet<&str> = blocked.iter().map(String::as_str).collect();
    match filter_chat_text(&text, &|author: &str| blocked.contains(author)) {
        Some(filtered) => println!("{}", filtered),
        None => print!("{}", text),
    }
    Ok(())
}
