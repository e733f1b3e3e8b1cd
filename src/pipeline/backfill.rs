//! # Backfill Sweep Module
//!
//! Sweep periodico per gli asset non ancora convertiti, processati in
//! piccoli batch: copre gli asset caricati prima dell'attivazione della
//! pipeline o rimasti indietro per quota esaurita.
//!
//! ## Responsabilità:
//! - Itera gli asset della libreria in batch di dimensione configurabile
//! - Immagini convertite in linea, video accodati alla coda asincrona
//! - Statistiche cumulative e progress bar per l'esecuzione CLI
//!
//! Gli asset già completamente convertiti costano solo il lookup nel
//! ledger; nessun retry automatico per gli errori (responsabilità dello
//! scheduler esterno).

use crate::library::AssetId;
use crate::pipeline::coordinator::{ConversionOutcome, IngestOutcome, MediaPipeline};
use crate::progress::{ProgressManager, SweepStats};
use anyhow::Result;
use tracing::{debug, warn};

/// Batch sweep over not-yet-converted library assets
pub struct BackfillSweeper<'a> {
    pipeline: &'a MediaPipeline,
    show_progress: bool,
}

impl<'a> BackfillSweeper<'a> {
    pub fn new(pipeline: &'a MediaPipeline, show_progress: bool) -> Self {
        Self {
            pipeline,
            show_progress,
        }
    }

    /// Run one full sweep over the library in batches
    pub async fn run(&self) -> Result<SweepStats> {
        let core = self.pipeline.core();
        let ids = core.library().asset_ids();
        let batch_size = core.config().batch_size;

        let progress = if self.show_progress {
            ProgressManager::new(ids.len())
        } else {
            ProgressManager::hidden()
        };

        let mut stats = SweepStats::new();

        for batch in ids.chunks(batch_size) {
            debug!("Backfill batch of {} asset(s)", batch.len());

            // Assets within a batch are processed concurrently; batches
            // stay small so the encoder load is bounded
            let outcomes = futures::future::join_all(
                batch.iter().map(|&asset_id| self.pipeline.ingest(asset_id)),
            )
            .await;

            for (&asset_id, outcome) in batch.iter().zip(outcomes) {
                let name = core
                    .library()
                    .get(asset_id)
                    .map(|a| a.relative_path.display().to_string())
                    .unwrap_or_else(|| asset_id.to_string());

                match outcome {
                    Ok(IngestOutcome::Image(ConversionOutcome::Converted(result))) => {
                        let (original, converted) = self.artifact_sizes(asset_id);
                        if result.success {
                            stats.add_converted(result.converted_formats.len(), original, converted);
                        } else {
                            stats.add_error();
                        }
                    }
                    Ok(IngestOutcome::Image(ConversionOutcome::Skipped(reason))) => {
                        debug!("Asset {} skipped: {}", asset_id, reason);
                        stats.add_skipped();
                    }
                    Ok(IngestOutcome::VideoScheduled(enqueued)) => {
                        if enqueued {
                            stats.add_scheduled();
                        } else {
                            stats.add_skipped();
                        }
                    }
                    Ok(IngestOutcome::Skipped(reason)) => {
                        debug!("Asset {} skipped: {}", asset_id, reason);
                        stats.add_skipped();
                    }
                    Err(e) => {
                        warn!("Backfill failed for asset {}: {}", asset_id, e);
                        stats.add_error();
                    }
                }

                progress.update(&name);
            }
        }

        progress.finish(&stats.format_summary());
        Ok(stats)
    }

    /// Byte totals of the artifacts recorded for an asset, for sweep stats
    fn artifact_sizes(&self, asset_id: AssetId) -> (u64, u64) {
        let core = self.pipeline.core();
        let mut original = 0;
        let mut converted = 0;

        for format in core.tracker().get_converted_formats(asset_id) {
            if let Some(record) = core.tracker().get_record(asset_id, format) {
                original = record.original_size_bytes;
                converted += record.converted_size_bytes;
            }
        }

        (original, converted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::library::MediaLibrary;
    use tempfile::TempDir;
    use tokio::fs;

    #[tokio::test]
    async fn test_sweep_over_empty_library() {
        let root = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        let library = MediaLibrary::open(root.path(), "https://x/u", Some(state.path()))
            .await
            .unwrap();
        let config = Config {
            state_dir: Some(state.path().to_path_buf()),
            ..Default::default()
        };
        let pipeline = MediaPipeline::new(library, config).await.unwrap();

        let stats = BackfillSweeper::new(&pipeline, false).run().await.unwrap();
        assert_eq!(stats.assets_processed, 0);
        pipeline.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_counts_every_asset_once() {
        let root = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        fs::write(root.path().join("a.jpg"), b"img").await.unwrap();
        fs::write(root.path().join("b.mp4"), b"vid").await.unwrap();

        let mut library = MediaLibrary::open(root.path(), "https://x/u", Some(state.path()))
            .await
            .unwrap();
        library.scan().await.unwrap();

        let config = Config {
            batch_size: 1,
            state_dir: Some(state.path().to_path_buf()),
            ..Default::default()
        };
        let pipeline = MediaPipeline::new(library, config).await.unwrap();

        let stats = BackfillSweeper::new(&pipeline, false).run().await.unwrap();
        assert_eq!(stats.assets_processed, 2);
        pipeline.shutdown().await.unwrap();
    }
}
