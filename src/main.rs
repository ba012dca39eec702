//! kingmove command-line tool
//!
//! Inspect positions and opening books, or run the whole move resolution
//! pipeline in process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use move_dispatch::{
    DispatchClient, DispatchConfig, EngineAdapter, MemoryBroker, MoveRequest,
    PersonalityRegistry, UnavailableEngine, WorkerPool,
};
use polybook::{all_book_moves, book_move, encode_moves, fingerprint_fen, WeightedSelector};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kingmove", version, about = "Opening book and move dispatch tools")]
struct Cli {
    /// Directory holding the Polyglot books (overrides KINGMOVE_BOOK_DIR)
    #[arg(long, global = true)]
    book_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the FEN and Polyglot key of a position
    Fingerprint {
        /// FEN to hash instead of replaying moves
        #[arg(long, conflicts_with = "moves")]
        fen: Option<String>,
        /// Moves from the initial position, any supported notation
        moves: Vec<String>,
    },
    /// List the book moves for a position and draw one
    Book {
        /// Book file name inside the book directory
        #[arg(long)]
        book: String,
        /// Seed for a reproducible draw
        #[arg(long)]
        seed: Option<u64>,
        moves: Vec<String>,
    },
    /// Resolve a move through the book and an in-process worker pool
    Resolve {
        #[arg(long)]
        personality: String,
        #[arg(long, default_value = "cli")]
        game_id: String,
        /// Personality definitions (overrides KINGMOVE_PERSONALITIES)
        #[arg(long)]
        personalities: Option<PathBuf>,
        /// How long to wait for a worker, e.g. `30s`
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
        /// Engine clock override in centiseconds
        #[arg(long)]
        clock_time: Option<u64>,
        #[arg(long)]
        skip_book: bool,
        moves: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = DispatchConfig::from_env().context("invalid KINGMOVE_* environment")?;
    if let Some(dir) = cli.book_dir {
        config.book_dir = dir;
    }

    match cli.command {
        Command::Fingerprint { fen, moves } => fingerprint(fen, &moves),
        Command::Book { book, seed, moves } => list_book(&config, &book, seed, &moves),
        Command::Resolve {
            personality,
            game_id,
            personalities,
            timeout,
            clock_time,
            skip_book,
            moves,
        } => {
            if let Some(path) = personalities {
                config.personalities_path = path;
            }
            if let Some(timeout) = timeout {
                config.resolve_timeout = timeout;
            }

            let mut request = MoveRequest::new(game_id, personality, moves);
            request.clock_time = clock_time;
            request.skip_book = skip_book;
            resolve(config, request).await
        }
    }
}

fn fingerprint(fen: Option<String>, moves: &[String]) -> Result<()> {
    if let Some(fen) = fen {
        let key = fingerprint_fen(&fen)?;
        println!("fen          {fen}");
        println!("fingerprint  {key}");
        return Ok(());
    }

    let encoded = encode_moves(moves)?;
    println!("fen          {}", encoded.fen);
    println!("fingerprint  {}", encoded.fingerprint);
    println!("plies        {}", encoded.plies);
    Ok(())
}

fn list_book(config: &DispatchConfig, book: &str, seed: Option<u64>, moves: &[String]) -> Result<()> {
    let encoded = encode_moves(moves)?;
    let candidates = all_book_moves(&encoded, &config.book_dir, book)
        .with_context(|| format!("looking up {book} in {}", config.book_dir.display()))?;

    if candidates.is_empty() {
        println!("{} is not in {book}", encoded.fingerprint);
        return Ok(());
    }

    println!("{:<8} {:>6} {:>10}", "move", "weight", "learn");
    for candidate in &candidates {
        println!(
            "{:<8} {:>6} {:>10}",
            candidate.uci, candidate.weight, candidate.learn
        );
    }

    let mut selector = match seed {
        Some(seed) => WeightedSelector::seeded(seed),
        None => WeightedSelector::from_entropy(),
    };
    match book_move(moves, &config.book_dir, book, &mut selector) {
        Ok(chosen) => println!("picked   {}", chosen.uci),
        Err(e) if e.is_no_book_move() => println!("picked   - (all weights are zero)"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn resolve(config: DispatchConfig, request: MoveRequest) -> Result<()> {
    if !config.personalities_path.exists() {
        bail!(
            "personality definitions not found at {}",
            config.personalities_path.display()
        );
    }
    let registry = PersonalityRegistry::load(&config.personalities_path, config.clock)?;

    let config = Arc::new(config);
    let broker = Arc::new(MemoryBroker::new());
    let client = DispatchClient::connect(broker.clone(), Arc::clone(&config)).await?;
    let pool = WorkerPool::spawn(
        broker,
        Arc::clone(&config),
        Arc::new(registry),
        |_| Arc::new(UnavailableEngine) as Arc<dyn EngineAdapter>,
    )
    .await?;

    let outcome = client.resolve_default(&request).await;
    pool.shutdown().await;

    let result = outcome?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
