//! # Progress Tracking and Statistics Module
//!
//! Questo modulo gestisce il progress tracking e le statistiche dello sweep
//! di conversione.
//!
//! ## Responsabilità:
//! - Progress bar visual con `indicatif` per feedback real-time
//! - Tracking statistiche cumulative dello sweep (convertiti, saltati,
//!   errori, video schedulati, byte risparmiati)
//! - Report finale aggregato
//!
//! ## Visual feedback:
//! ```text
//! ⠋ [00:00:15] [████████████████░░░░░░░░] 42/60 (70%) photo.jpg
//! ```

use crate::utils::format_size;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Manages progress reporting for a conversion sweep
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    pub fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█░"),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// Hidden progress for non-interactive runs
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn update(&self, message: &str) {
        self.bar.set_message(message.to_string());
        self.bar.inc(1);
    }

    pub fn finish(&self, summary: &str) {
        self.bar.finish_with_message(summary.to_string());
    }
}

/// Cumulative statistics for one conversion sweep
#[derive(Debug, Clone, Default)]
pub struct SweepStats {
    pub assets_processed: usize,
    pub artifacts_converted: usize,
    pub assets_skipped: usize,
    pub videos_scheduled: usize,
    pub errors: usize,
    pub total_original_bytes: u64,
    pub total_converted_bytes: u64,
}

impl SweepStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_converted(&mut self, artifacts: usize, original: u64, converted: u64) {
        self.assets_processed += 1;
        self.artifacts_converted += artifacts;
        self.total_original_bytes += original;
        self.total_converted_bytes += converted;
    }

    pub fn add_skipped(&mut self) {
        self.assets_processed += 1;
        self.assets_skipped += 1;
    }

    pub fn add_scheduled(&mut self) {
        self.assets_processed += 1;
        self.videos_scheduled += 1;
    }

    pub fn add_error(&mut self) {
        self.assets_processed += 1;
        self.errors += 1;
    }

    pub fn bytes_saved(&self) -> u64 {
        self.total_original_bytes
            .saturating_sub(self.total_converted_bytes)
    }

    pub fn format_summary(&self) -> String {
        format!(
            "{} artifacts from {} assets ({} skipped, {} videos scheduled, {} errors, {} saved)",
            self.artifacts_converted,
            self.assets_processed,
            self.assets_skipped,
            self.videos_scheduled,
            self.errors,
            format_size(self.bytes_saved())
        )
    }
}
