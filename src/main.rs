use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use cratedig::config::AppConfig;
use cratedig::pipeline;
use cratedig::resolver::Resolver;

#[derive(Parser)]
#[command(
    name = "cratedig",
    version,
    about = "SoundCloud playlist scraper and acoustic feature analyzer"
)]
struct Cli {
    /// Directory holding the JSON song stores
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect track metadata from playlists into the song store
    Collect {
        /// Playlist URLs (defaults to config playlists, then the built-in list)
        playlists: Vec<String>,

        /// Output store (default: all_songs.json)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Extract BPM and key for every collected song
    Analyze {
        /// Input store (default: all_songs.json; pass the output file to
        /// resume an interrupted run)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output store (default: analyzed_songs.json)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Re-analyze songs that already have BPM and key
        #[arg(long)]
        force: bool,
    },

    /// Drop songs that never made it through BPM/key analysis
    Clean {
        /// Input store (default: analyzed_songs.json)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output store (default: cleaned_songs.json)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Run deep analysis (energy, rhythm, structure) on cleaned songs
    Deep {
        /// Input store (default: cleaned_songs.json; pass the output file
        /// to resume an interrupted run)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output store (default: deep_analyzed_songs.json)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Re-analyze songs that already have deep features
        #[arg(long)]
        force: bool,
    },

    /// Show song store statistics
    Stats {
        /// Store to summarize (default: all_songs.json)
        #[arg(long)]
        input: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = AppConfig::load();

    // Resolve data dir: CLI > config > current directory
    let data_dir = cli
        .data_dir
        .or_else(|| config.data_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let resolve_path =
        |explicit: Option<PathBuf>, name: &str| explicit.unwrap_or_else(|| data_dir.join(name));

    let pace = Duration::from_millis(config.api.rate_limit_ms);

    match cli.command {
        Commands::Collect { playlists, output } => {
            let playlists: Vec<String> = if !playlists.is_empty() {
                playlists
            } else if !config.playlists.is_empty() {
                config.playlists.clone()
            } else {
                cratedig::DEFAULT_PLAYLISTS
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            };

            let resolver = Resolver::new(config.api.client_id.clone(), &config.api.user_agent)
                .context("Failed to build API client")?;
            let output = resolve_path(output, "all_songs.json");

            let result = pipeline::collect(&resolver, &playlists, &output)
                .context("Collection failed")?;
            println!();
            println!(
                "Collection complete: {} playlists ({} failed), {} tracks seen — {} new, {} updated, {} unchanged, {} errors",
                result.playlists,
                result.playlist_errors,
                result.tracks_seen,
                result.inserted,
                result.updated,
                result.unchanged,
                result.track_errors
            );
            println!("Database saved to {}", output.display());
        }

        Commands::Analyze {
            input,
            output,
            force,
        } => {
            let resolver = Resolver::new(config.api.client_id.clone(), &config.api.user_agent)
                .context("Failed to build API client")?;
            let input = resolve_path(input, "all_songs.json");
            let output = resolve_path(output, "analyzed_songs.json");

            let result = pipeline::analyze_bpm_key(
                &resolver,
                &input,
                &output,
                &config.analysis,
                pace,
                force,
            )
            .context("BPM/key analysis failed")?;
            println!(
                "Analysis complete: {} analyzed, {} failed, {} already done, {} at attempt cap",
                result.analyzed, result.failed, result.skipped_done, result.skipped_attempts
            );
        }

        Commands::Clean { input, output } => {
            let input = resolve_path(input, "analyzed_songs.json");
            let output = resolve_path(output, "cleaned_songs.json");

            let result = pipeline::clean(&input, &output).context("Cleanup failed")?;
            println!(
                "Cleaned data saved to {}. Removed {} incomplete songs, kept {}.",
                output.display(),
                result.dropped,
                result.kept
            );
        }

        Commands::Deep {
            input,
            output,
            force,
        } => {
            let resolver = Resolver::new(config.api.client_id.clone(), &config.api.user_agent)
                .context("Failed to build API client")?;
            let input = resolve_path(input, "cleaned_songs.json");
            let output = resolve_path(output, "deep_analyzed_songs.json");

            let result = pipeline::analyze_deep(
                &resolver,
                &input,
                &output,
                &config.analysis,
                pace,
                force,
            )
            .context("Deep analysis failed")?;
            println!(
                "Deep analysis complete: {} analyzed, {} failed, {} already done, {} at attempt cap",
                result.analyzed, result.failed, result.skipped_done, result.skipped_attempts
            );
        }

        Commands::Stats { input } => {
            let input = resolve_path(input, "all_songs.json");
            let summary = pipeline::summarize(&input).context("Failed to read store")?;

            println!("Song Store Statistics");
            println!("=====================");
            println!("Total songs:        {}", summary.total);
            println!("Metadata only:      {}", summary.metadata_only);
            println!("With BPM/key:       {}", summary.with_bpm_key);
            println!("With deep features: {}", summary.with_features);
            if summary.failed_bpm_key > 0 || summary.failed_deep > 0 {
                println!(
                    "Recorded failures:  {} BPM/key, {} deep",
                    summary.failed_bpm_key, summary.failed_deep
                );
            }

            if !summary.genres.is_empty() {
                println!();
                println!("Genres:");
                for (genre, count) in &summary.genres {
                    println!("  {genre:<30} {count}");
                }
            }
        }
    }

    Ok(())
}
