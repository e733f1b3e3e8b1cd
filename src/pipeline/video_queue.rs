//! # Video Work Queue Module
//!
//! Coda di lavoro asincrona per le conversioni video: l'encoding è
//! long-running e non deve bloccare la richiesta che lo ha innescato.
//!
//! ## Responsabilità:
//! - Accoda job di conversione video per esecuzione near-immediate
//! - Guard di dedup: la stessa coppia (asset, source-path) non viene
//!   accodata due volte finché è ancora pending
//! - Worker pool (default: 1 worker) che drena la coda in ordine FIFO
//!
//! ## Modello:
//! La chiave di dedup protegge l'inserzione; oltre all'atomicità della coda
//! stessa non serve nessuna primitiva di concorrenza in-process. Non esiste
//! cancellazione per i job in-flight: un job completa, fallisce, o viene
//! abbandonato al restart del processo (l'upsert idempotente rende sicuro
//! il retry).

use crate::library::AssetId;
use crate::pipeline::coordinator::{ConversionOutcome, PipelineCore};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct VideoJob {
    asset_id: AssetId,
    source_path: PathBuf,
}

/// Deferred single-shot video conversion queue with a dedup guard
pub struct VideoQueue {
    tx: mpsc::UnboundedSender<VideoJob>,
    pending: Arc<Mutex<HashSet<VideoJob>>>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl VideoQueue {
    /// Spawn the worker pool draining this queue
    pub fn spawn(core: Arc<PipelineCore>, worker_count: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<VideoJob>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let pending: Arc<Mutex<HashSet<VideoJob>>> = Arc::new(Mutex::new(HashSet::new()));

        let mut workers = Vec::with_capacity(worker_count.max(1));
        for worker_id in 0..worker_count.max(1) {
            let core = core.clone();
            let rx = rx.clone();
            let pending = pending.clone();

            workers.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };

                    let job = match job {
                        Some(job) => job,
                        None => break,
                    };

                    debug!(
                        "Video worker {} processing asset {}",
                        worker_id, job.asset_id
                    );

                    match core.convert_asset(job.asset_id).await {
                        Ok(ConversionOutcome::Converted(result)) => {
                            info!(
                                "Video asset {} converted to {:?}",
                                job.asset_id, result.converted_formats
                            );
                        }
                        Ok(ConversionOutcome::Skipped(reason)) => {
                            debug!("Video asset {} skipped: {}", job.asset_id, reason);
                        }
                        Err(e) => {
                            error!("Video conversion failed for asset {}: {}", job.asset_id, e);
                        }
                    }

                    // The job is pending until it finished, so a re-upload
                    // arriving mid-encode is still deduplicated
                    pending
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .remove(&job);
                }
            }));
        }

        Self {
            tx,
            pending,
            workers,
        }
    }

    /// Enqueue a conversion job unless the same (asset, source-path) pair
    /// is already pending. Returns whether the job was actually inserted.
    pub fn enqueue(&self, asset_id: AssetId, source_path: PathBuf) -> bool {
        let job = VideoJob {
            asset_id,
            source_path,
        };

        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if !pending.insert(job.clone()) {
                debug!("Duplicate video job for asset {} ignored", asset_id);
                return false;
            }
        }

        if self.tx.send(job.clone()).is_err() {
            // Queue already closed; roll the guard back
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&job);
            return false;
        }

        true
    }

    /// Number of jobs queued or in flight
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Close the queue and wait for the workers to finish the backlog
    pub async fn drain(self) {
        drop(self.tx);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::library::MediaLibrary;
    use tempfile::TempDir;

    async fn core_fixture() -> (TempDir, TempDir, Arc<PipelineCore>) {
        let root = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();

        let library = MediaLibrary::open(root.path(), "https://x/u", Some(state.path()))
            .await
            .unwrap();
        let config = Config {
            state_dir: Some(state.path().to_path_buf()),
            ..Default::default()
        };
        let core = Arc::new(PipelineCore::new(library, config).await.unwrap());

        (root, state, core)
    }

    #[tokio::test]
    async fn test_dedup_guard_blocks_identical_pending_jobs() {
        // No worker drains the channel here, so every job stays pending
        let (tx, _rx) = mpsc::unbounded_channel();
        let queue = VideoQueue {
            tx,
            pending: Arc::new(Mutex::new(HashSet::new())),
            workers: Vec::new(),
        };

        let path = PathBuf::from("/library/clip.mp4");
        assert!(queue.enqueue(AssetId(1), path.clone()));
        assert!(!queue.enqueue(AssetId(1), path.clone()));

        // A different source path for the same asset is a different dedup key
        assert!(queue.enqueue(AssetId(1), PathBuf::from("/library/clip-v2.mp4")));
        assert_eq!(queue.pending_count(), 2);
    }

    #[tokio::test]
    async fn test_queue_drains_unknown_assets_without_hanging() {
        let (_root, _state, core) = core_fixture().await;
        let queue = VideoQueue::spawn(core, 2);

        assert!(queue.enqueue(AssetId(100), PathBuf::from("/library/a.mp4")));
        assert!(queue.enqueue(AssetId(101), PathBuf::from("/library/b.mp4")));
        // Identical pair while possibly pending: either deduplicated or the
        // first already finished; both are valid
        let _ = queue.enqueue(AssetId(100), PathBuf::from("/library/a.mp4"));

        queue.drain().await;
    }
}
