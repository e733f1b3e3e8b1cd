//! # Pipeline Module
//!
//! Orchestrazione della pipeline di conversione:
//! - `coordinator`: gating di eleggibilità, quota e conversione per asset
//! - `video_queue`: coda di lavoro asincrona con dedup per i video
//! - `backfill`: sweep periodico a batch per gli asset non ancora convertiti

pub mod backfill;
pub mod coordinator;
pub mod video_queue;

pub use backfill::BackfillSweeper;
pub use coordinator::{ConversionOutcome, IngestOutcome, MediaPipeline, PipelineCore, SkipReason};
pub use video_queue::VideoQueue;
