use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facetag_core::{SharedStore, StoreFile};
use std::io::{BufRead, Write};
use std::path::PathBuf;

mod config;
mod import;

#[derive(Parser)]
#[command(name = "facetag", about = "Face embedding store and identification CLI")]
struct Cli {
    /// Encoding store file (default: $FACETAG_DB_PATH or the XDG data dir)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Maximum distance accepted as a match (default: $FACETAG_MATCH_THRESHOLD or 0.6)
    #[arg(long, global = true)]
    threshold: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll one embedding under a name
    Add {
        /// JSON embedding file produced by the encoder
        embedding: PathBuf,
        /// Person name
        name: String,
    },
    /// Import embeddings from <dir>/<person>/*.json
    Import {
        directory: PathBuf,
    },
    /// List enrolled names and how many embeddings each has
    List,
    /// Remove every enrolled embedding
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Identify a probe embedding against the store
    Identify {
        /// JSON embedding file produced by the encoder
        probe: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = config::Config::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(threshold) = cli.threshold {
        config.match_threshold = threshold;
    }

    let store = SharedStore::open(StoreFile::new(&config.db_path));

    match cli.command {
        Commands::Add { embedding, name } => {
            let Some(probe) = import::read_embedding(&embedding)? else {
                bail!("no face embedding in {}", embedding.display());
            };
            store
                .enroll(name.as_str(), probe)
                .with_context(|| format!("enrolling '{name}'"))?;
            println!("Added face for '{}' from {}", name.trim(), embedding.display());
            println!("Database saved with {} faces", store.len());
        }
        Commands::Import { directory } => {
            let batch = import::import_directory(&store, &directory)?;
            for (path, reason) in &batch.skipped {
                println!("Skipped {}: {reason}", path.display());
            }
            println!("Import complete! Added {} faces", batch.records.len());
            println!("Database saved with {} faces", store.len());
        }
        Commands::List => {
            let counts = store.count_by_label();
            if counts.is_empty() {
                println!("Database is empty");
            } else {
                println!("Faces in database ({} total):", store.len());
                for (name, count) in counts {
                    println!("  - {name}: {count} encoding(s)");
                }
            }
        }
        Commands::Clear { yes } => {
            if !yes && !confirm("Are you sure you want to clear the database? (yes/no): ")? {
                println!("Aborted");
                return Ok(());
            }
            store.clear().context("clearing database")?;
            println!("Database cleared");
        }
        Commands::Identify { probe } => match import::read_embedding(&probe)? {
            None => println!("unknown (no face embedding in probe)"),
            Some(embedding) => {
                let id = store.identify(&embedding, config.match_threshold);
                println!("{} (confidence: {:.2})", id.label, id.confidence);
                if let Some(distance) = id.distance {
                    println!("  nearest distance: {distance:.4} (threshold {})", config.match_threshold);
                }
            }
        },
    }

    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("yes"))
}
