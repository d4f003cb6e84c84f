//! inkstore command-line tool
//!
//! Inspect, verify and repack stored documents.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use inkstore::container::{self, FileContainer};
use inkstore::store::{extract_thumbnail, open_path, save_path};
use inkstore::{Config, ManifestExtras, RawPayloadCodec, SaveFlags};
use tracing_subscriber::{fmt, EnvFilter};

/// inkstore
#[derive(Parser, Debug)]
#[command(name = "inkstore")]
#[command(about = "Inspect and maintain paged note documents")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show pages, format and block index of a document
    Info {
        /// Document to inspect
        path: PathBuf,
    },

    /// Check every block and the whole-stream checksum of a container
    Verify {
        /// Container to verify
        path: PathBuf,
    },

    /// Load a document and write it out again in full
    Repack {
        /// Source document
        input: PathBuf,

        /// Destination; the format follows its extension
        output: PathBuf,

        /// Deflate level (0-9)
        #[arg(short, long, default_value = "6")]
        level: u32,

        /// Header index capacity in records
        #[arg(long, default_value = "1024")]
        index_records: usize,
    },

    /// Write the saved thumbnail image to a file
    Thumbnail {
        /// Source document
        path: PathBuf,

        /// Where to write the image
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,inkstore=debug"));

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();
    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Info { path } => {
            let loaded = open_path(&path, RawPayloadCodec)?;
            let doc = &loaded.document;
            println!("file:     {}", path.display());
            println!("outcome:  {:?}", loaded.outcome);
            println!("format:   {:?} (version {})", doc.format(), doc.format_version());
            println!("pages:    {}", doc.page_count());
            println!("indexed:  {} records", doc.block_index().len());
            for (idx, page) in doc.pages().iter().enumerate() {
                println!(
                    "  page {:>4}: {} x {}  block {:?}",
                    idx + 1,
                    page.width(),
                    page.height(),
                    page.block_idx()
                );
            }
            for (key, value) in doc.config() {
                println!("  {} = {}", key, value);
            }
        }

        Commands::Verify { path } => {
            let mut file = FileContainer::open(&path)?;
            let report = container::verify(&mut file)?;
            println!("indexed:  {}", report.indexed);
            println!("blocks:   {}/{} ok", report.blocks_ok, report.blocks);
            println!(
                "checksum: stream {:#010x}/{} trailer {:#010x}/{}",
                report.stream_checksum.crc,
                report.stream_checksum.len,
                report.trailer_checksum.crc,
                report.trailer_checksum.len
            );
            for error in &report.errors {
                println!("  error: {}", error);
            }
            if !report.is_ok() {
                return Err(format!("{} failed verification", path.display()).into());
            }
            println!("OK");
        }

        Commands::Repack {
            input,
            output,
            level,
            index_records,
        } => {
            let config = Config::builder()
                .compression_level(level)
                .max_index_records(index_records)
                .build();

            let mut loaded = open_path(&input, RawPayloadCodec)?;
            tracing::info!("loaded {} ({:?})", input.display(), loaded.outcome);

            let thumbnail = extract_thumbnail(&mut FileContainer::open(&input)?)?;
            let extras = ManifestExtras { thumbnail };

            loaded.document.ensure_pages_loaded()?;
            save_path(&mut loaded.document, &output, &extras, SaveFlags::FORCE, &config)
                .map_err(|e| e.error)?;
            tracing::info!("wrote {} pages to {}", loaded.document.page_count(), output.display());
        }

        Commands::Thumbnail { path, output } => {
            let mut file = FileContainer::open(&path)?;
            match extract_thumbnail(&mut file)? {
                Some(image) => {
                    fs::write(&output, &image)?;
                    println!("{} bytes written to {}", image.len(), output.display());
                }
                None => return Err(format!("{} has no thumbnail", path.display()).into()),
            }
        }
    }
    Ok(())
}
