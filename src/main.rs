//! # Media Delivery Optimizer - Main Entry Point
//!
//! Questo è il punto di ingresso principale dell'applicazione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Inizializzazione del sistema di logging con `tracing`
//! - Validazione degli input dell'utente
//! - Scan della libreria, sweep di backfill e modalità rewrite/stats
//!
//! ## Flusso di esecuzione:
//! 1. Parsa gli argomenti CLI (library root, formati, qualità, quote, etc.)
//! 2. Configura il logging (INFO o DEBUG a seconda del flag verbose)
//! 3. Apre l'indice della libreria, ingerisce i nuovi file, pota i rimossi
//! 4. Costruisce la pipeline (probe capability una volta sola)
//! 5. Esegue lo sweep di backfill, oppure riscrive un documento HTML,
//!    oppure stampa le statistiche del ledger
//!
//! ## Esempio di utilizzo:
//! ```bash
//! media-delivery /var/www/uploads --base-url https://x/wp-content/uploads \
//!     --image-quota 500 --verbose
//! media-delivery /var/www/uploads --rewrite page.html
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use media_delivery_optimizer::{
    utils::format_size, BackfillSweeper, Config, ContentRewriter, MediaFormat, MediaLibrary,
    MediaPipeline, StatsFilter,
};

#[derive(Parser)]
#[command(name = "media-delivery")]
#[command(about = "Convert media to modern formats and deliver them with graceful fallback")]
struct Args {
    /// Media library root directory
    library_root: PathBuf,

    /// Public base URL the library root is served under
    #[arg(long, default_value = "http://localhost/uploads")]
    base_url: String,

    /// Target image formats (comma separated: webp,avif)
    #[arg(long, value_delimiter = ',')]
    image_formats: Option<Vec<MediaFormat>>,

    /// Target video formats (comma separated: av1,webm)
    #[arg(long, value_delimiter = ',')]
    video_formats: Option<Vec<MediaFormat>>,

    /// Disable hybrid mode (convert only the legacy-friendly format)
    #[arg(long)]
    no_hybrid: bool,

    /// WebP quality (1-100)
    #[arg(long)]
    webp_quality: Option<u8>,

    /// AVIF quality (1-100)
    #[arg(long)]
    avif_quality: Option<u8>,

    /// AV1 CRF value (0-63, lower = better quality)
    #[arg(long)]
    av1_crf: Option<u8>,

    /// WebM CRF value (0-63)
    #[arg(long)]
    webm_crf: Option<u8>,

    /// Audio bitrate for video targets
    #[arg(long)]
    audio_bitrate: Option<String>,

    /// Image conversions allowed per month (unbounded if omitted)
    #[arg(long)]
    image_quota: Option<u32>,

    /// Video conversions allowed per month (unbounded if omitted)
    #[arg(long)]
    video_quota: Option<u32>,

    /// Convert animated GIFs too instead of skipping them
    #[arg(long)]
    keep_animated: bool,

    /// Batch size for the backfill sweep
    #[arg(long, default_value = "10")]
    batch_size: usize,

    /// Number of workers draining the video queue
    #[arg(long, default_value = "1")]
    video_workers: usize,

    /// Directory for the persistent ledgers (default: ~/.media-delivery)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Rewrite an HTML document for delivery and print it to stdout
    #[arg(long)]
    rewrite: Option<PathBuf>,

    /// Print conversion statistics and exit
    #[arg(long)]
    stats: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Validate arguments
    if !args.library_root.exists() {
        return Err(anyhow::anyhow!(
            "Library root does not exist: {}",
            args.library_root.display()
        ));
    }

    let mut config = Config {
        hybrid: !args.no_hybrid,
        webp_quality: args.webp_quality,
        avif_quality: args.avif_quality,
        av1_crf: args.av1_crf,
        webm_crf: args.webm_crf,
        audio_bitrate: args.audio_bitrate,
        image_quota: args.image_quota,
        video_quota: args.video_quota,
        skip_animated: !args.keep_animated,
        batch_size: args.batch_size,
        video_workers: args.video_workers,
        state_dir: args.state_dir,
        ..Default::default()
    };
    if let Some(image_formats) = args.image_formats {
        config.image_formats = image_formats;
    }
    if let Some(video_formats) = args.video_formats {
        config.video_formats = video_formats;
    }
    config.validate()?;

    // Open the library index, ingest new uploads, prune removed assets
    let mut library =
        MediaLibrary::open(&args.library_root, &args.base_url, config.state_dir.as_deref()).await?;
    let new_assets = library.scan().await?;
    if !new_assets.is_empty() {
        info!("Found {} new asset(s) to consider", new_assets.len());
    }
    let removed = library.prune_missing().await?;

    let pipeline = MediaPipeline::new(library, config).await?;

    // Derived artifacts of deleted assets are cleaned up before any new work
    for asset in &removed {
        pipeline.core().cleanup_removed_asset(asset)?;
    }

    if args.stats {
        print_statistics(&pipeline);
        return Ok(());
    }

    if let Some(ref html_path) = args.rewrite {
        let html = tokio::fs::read_to_string(html_path).await?;
        let rewriter = ContentRewriter::new(pipeline.core().library(), pipeline.core().tracker());
        println!("{}", rewriter.rewrite_document(&html));
        return Ok(());
    }

    // Default mode: backfill sweep over not-yet-converted assets
    let stats = BackfillSweeper::new(&pipeline, !args.verbose).run().await?;
    info!("Sweep complete: {}", stats.format_summary());

    // Wait for the deferred video conversions before reporting
    let core = pipeline.core().clone();
    pipeline.shutdown().await?;

    let totals = core.statistics(&StatsFilter::default());
    info!("=== Conversion Ledger ===");
    info!("Total conversions: {}", totals.total_conversions);
    for (format, count) in &totals.conversions_by_format {
        info!("  {}: {}", format, count);
    }
    info!(
        "Bytes saved: {}",
        format_size(
            totals
                .total_original_bytes
                .saturating_sub(totals.total_converted_bytes)
        )
    );
    info!(
        "Average size reduction: {:.2}%",
        totals.average_reduction * 100.0
    );

    Ok(())
}

fn print_statistics(pipeline: &MediaPipeline) {
    let totals = pipeline.core().statistics(&StatsFilter::default());

    println!("Total conversions: {}", totals.total_conversions);
    for (format, count) in &totals.conversions_by_format {
        println!("  {}: {}", format, count);
    }
    println!(
        "Original bytes: {}",
        format_size(totals.total_original_bytes)
    );
    println!(
        "Converted bytes: {}",
        format_size(totals.total_converted_bytes)
    );
    println!(
        "Average size reduction: {:.2}%",
        totals.average_reduction * 100.0
    );
}
