//! # Conversion Tracking Module
//!
//! La single source of truth per "l'asset X è già stato convertito nel
//! formato Y, e quanto è costato".
//!
//! ## Responsabilità:
//! - Upsert idempotente dei record di conversione (al massimo un record per
//!   coppia (asset, formato): una riconversione aggiorna timestamp e
//!   dimensioni in place, mai duplicati)
//! - Query di dedup: `has_conversion`, `get_converted_formats`
//! - Cleanup su cancellazione asset: rimuove record E file convertiti
//!   (questo modulo è l'unico deleter degli artefatti derivati)
//! - Statistiche aggregate per formato/data/riduzione dimensioni
//!
//! ## Strategia di persistence:
//! - Un file JSON per libreria media (hash del path root), stile ledger
//! - L'upsert è una singola insert nella mappa sotto lock, non una coppia
//!   read-then-write: resta corretto sotto riconversione concorrente dello
//!   stesso asset
//!
//! ## Esempio struttura ledger:
//! ```json
//! {
//!   "records": {
//!     "7:webp": {
//!       "asset_id": 7,
//!       "format": "webp",
//!       "converted_at": "2026-08-06T10:00:00Z",
//!       "original_size_bytes": 1048576,
//!       "converted_size_bytes": 524288
//!     }
//!   }
//! }
//! ```

use crate::config::Config;
use crate::formats::{converted_sibling, ConvertedFileSet, MediaFormat, MediaType};
use crate::library::AssetId;
use crate::utils::{ledger_file_path, size_reduction};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Persisted fact: asset X has been converted to format Y
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRecord {
    pub asset_id: AssetId,
    pub format: MediaFormat,
    pub converted_at: DateTime<Utc>,
    pub original_size_bytes: u64,
    pub converted_size_bytes: u64,
}

impl ConversionRecord {
    /// Size reduction as a fraction of the original, 0 when undefined
    pub fn size_reduction(&self) -> f64 {
        size_reduction(self.original_size_bytes, self.converted_size_bytes)
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct ConversionLedger {
    records: HashMap<String, ConversionRecord>,
}

/// Filters for aggregate statistics queries
#[derive(Debug, Clone, Default)]
pub struct StatsFilter {
    pub format: Option<MediaFormat>,
    pub media_type: Option<MediaType>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// Aggregate counts over the conversion ledger
#[derive(Debug, Clone, Default)]
pub struct ConversionStatistics {
    pub total_conversions: usize,
    pub conversions_by_format: BTreeMap<MediaFormat, usize>,
    pub total_original_bytes: u64,
    pub total_converted_bytes: u64,
    pub average_reduction: f64,
}

/// Durable, idempotent record of performed conversions
pub struct ConversionTracker {
    ledger_path: PathBuf,
    state: Mutex<ConversionLedger>,
}

fn record_key(asset_id: AssetId, format: MediaFormat) -> String {
    format!("{}:{}", asset_id, format)
}

impl ConversionTracker {
    /// Open (or create) the conversion ledger for a library root
    pub fn open(library_root: &Path, config: &Config) -> Result<Self> {
        let ledger_path = ledger_file_path(
            config.state_dir.as_deref(),
            library_root,
            "conversion_ledger",
        )?;

        let state = if ledger_path.exists() {
            let content = std::fs::read_to_string(&ledger_path)?;
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            ConversionLedger::default()
        };

        Ok(Self {
            ledger_path,
            state: Mutex::new(state),
        })
    }

    /// Upsert a conversion record.
    ///
    /// Inserts a new record, or overwrites timestamp and sizes in place when
    /// one already exists for (asset, format). A single map insert under the
    /// lock, so concurrent re-conversion of the same asset stays correct.
    pub fn record_conversion(
        &self,
        asset_id: AssetId,
        format: MediaFormat,
        original_size: u64,
        converted_size: u64,
    ) -> Result<()> {
        let record = ConversionRecord {
            asset_id,
            format,
            converted_at: Utc::now(),
            original_size_bytes: original_size,
            converted_size_bytes: converted_size,
        };

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.records.insert(record_key(asset_id, format), record);
        self.persist(&state)
    }

    pub fn has_conversion(&self, asset_id: AssetId, format: MediaFormat) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.records.contains_key(&record_key(asset_id, format))
    }

    /// All formats an asset has been converted to
    pub fn get_converted_formats(&self, asset_id: AssetId) -> Vec<MediaFormat> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut formats: Vec<MediaFormat> = state
            .records
            .values()
            .filter(|r| r.asset_id == asset_id)
            .map(|r| r.format)
            .collect();
        formats.sort();
        formats
    }

    pub fn get_record(&self, asset_id: AssetId, format: MediaFormat) -> Option<ConversionRecord> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.records.get(&record_key(asset_id, format)).cloned()
    }

    /// Converted sibling files recorded for an asset's source path
    pub fn converted_files(&self, asset_id: AssetId, source_path: &Path) -> ConvertedFileSet {
        let mut set = ConvertedFileSet::new();
        for format in self.get_converted_formats(asset_id) {
            set.insert(format, converted_sibling(source_path, format));
        }
        set
    }

    /// Remove all conversion records for an asset and delete the converted
    /// sibling files from disk. Used on asset deletion, or when conversion
    /// is explicitly disabled for that asset.
    pub fn delete_attachment_conversions(
        &self,
        asset_id: AssetId,
        source_path: &Path,
    ) -> Result<Vec<MediaFormat>> {
        let removed: Vec<MediaFormat> = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let formats: Vec<MediaFormat> = state
                .records
                .values()
                .filter(|r| r.asset_id == asset_id)
                .map(|r| r.format)
                .collect();

            for format in &formats {
                state.records.remove(&record_key(asset_id, *format));
            }

            if !formats.is_empty() {
                self.persist(&state)?;
            }
            formats
        };

        // The tracker is the sole deleter of converted artifacts: a file
        // exists on disk iff a record names the (asset, format) pair
        for format in &removed {
            let artifact = converted_sibling(source_path, *format);
            if artifact.exists() {
                if let Err(e) = std::fs::remove_file(&artifact) {
                    warn!("Failed to delete converted file {}: {}", artifact.display(), e);
                } else {
                    debug!("Deleted converted file {}", artifact.display());
                }
            }
        }

        Ok(removed)
    }

    /// Aggregate statistics over the ledger, optionally filtered by format,
    /// media class, and conversion date range
    pub fn get_statistics(&self, filter: &StatsFilter) -> ConversionStatistics {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let mut stats = ConversionStatistics::default();
        let mut reduction_sum = 0.0;

        for record in state.records.values() {
            if let Some(format) = filter.format {
                if record.format != format {
                    continue;
                }
            }
            if let Some(media_type) = filter.media_type {
                if record.format.media_type() != media_type {
                    continue;
                }
            }
            if let Some(since) = filter.since {
                if record.converted_at < since {
                    continue;
                }
            }
            if let Some(until) = filter.until {
                if record.converted_at > until {
                    continue;
                }
            }

            stats.total_conversions += 1;
            *stats.conversions_by_format.entry(record.format).or_insert(0) += 1;
            stats.total_original_bytes += record.original_size_bytes;
            stats.total_converted_bytes += record.converted_size_bytes;
            reduction_sum += record.size_reduction();
        }

        if stats.total_conversions > 0 {
            stats.average_reduction = reduction_sum / stats.total_conversions as f64;
        }

        stats
    }

    fn persist(&self, state: &ConversionLedger) -> Result<()> {
        let content = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.ledger_path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tracker() -> (TempDir, TempDir, ConversionTracker) {
        let root = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        let config = Config {
            state_dir: Some(state.path().to_path_buf()),
            ..Default::default()
        };
        let tracker = ConversionTracker::open(root.path(), &config).unwrap();
        (root, state, tracker)
    }

    #[test]
    fn test_record_conversion_is_idempotent_upsert() {
        let (_root, _state, tracker) = tracker();
        let id = AssetId(1);

        tracker
            .record_conversion(id, MediaFormat::Webp, 1000, 600)
            .unwrap();
        tracker
            .record_conversion(id, MediaFormat::Webp, 1000, 450)
            .unwrap();

        // Exactly one record, reflecting the latest sizes
        assert_eq!(tracker.get_converted_formats(id), vec![MediaFormat::Webp]);
        let record = tracker.get_record(id, MediaFormat::Webp).unwrap();
        assert_eq!(record.converted_size_bytes, 450);
    }

    #[test]
    fn test_has_conversion_and_formats() {
        let (_root, _state, tracker) = tracker();
        let id = AssetId(3);

        assert!(!tracker.has_conversion(id, MediaFormat::Webp));

        tracker
            .record_conversion(id, MediaFormat::Webp, 100, 50)
            .unwrap();
        tracker
            .record_conversion(id, MediaFormat::Avif, 100, 40)
            .unwrap();

        assert!(tracker.has_conversion(id, MediaFormat::Webp));
        assert!(tracker.has_conversion(id, MediaFormat::Avif));
        assert!(!tracker.has_conversion(id, MediaFormat::Av1));
        assert_eq!(
            tracker.get_converted_formats(id),
            vec![MediaFormat::Webp, MediaFormat::Avif]
        );
    }

    #[test]
    fn test_ledger_persists_across_reopen() {
        let root = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        let config = Config {
            state_dir: Some(state.path().to_path_buf()),
            ..Default::default()
        };

        {
            let tracker = ConversionTracker::open(root.path(), &config).unwrap();
            tracker
                .record_conversion(AssetId(9), MediaFormat::Webm, 5000, 2000)
                .unwrap();
        }

        let tracker = ConversionTracker::open(root.path(), &config).unwrap();
        assert!(tracker.has_conversion(AssetId(9), MediaFormat::Webm));
    }

    #[test]
    fn test_delete_removes_records_and_files() {
        let (root, _state, tracker) = tracker();
        let id = AssetId(5);

        let source = root.path().join("photo.jpg");
        std::fs::write(&source, b"src").unwrap();
        std::fs::write(root.path().join("photo.webp"), b"webp").unwrap();
        std::fs::write(root.path().join("photo.avif"), b"avif").unwrap();

        tracker.record_conversion(id, MediaFormat::Webp, 3, 2).unwrap();
        tracker.record_conversion(id, MediaFormat::Avif, 3, 2).unwrap();

        let removed = tracker.delete_attachment_conversions(id, &source).unwrap();

        assert_eq!(removed.len(), 2);
        assert!(tracker.get_converted_formats(id).is_empty());
        assert!(!root.path().join("photo.webp").exists());
        assert!(!root.path().join("photo.avif").exists());
        // Original is never touched
        assert!(source.exists());
    }

    #[test]
    fn test_statistics_with_filters() {
        let (_root, _state, tracker) = tracker();

        tracker.record_conversion(AssetId(1), MediaFormat::Webp, 1000, 500).unwrap();
        tracker.record_conversion(AssetId(1), MediaFormat::Avif, 1000, 250).unwrap();
        tracker.record_conversion(AssetId(2), MediaFormat::Webm, 10000, 5000).unwrap();

        let all = tracker.get_statistics(&StatsFilter::default());
        assert_eq!(all.total_conversions, 3);
        assert_eq!(all.conversions_by_format[&MediaFormat::Webp], 1);
        assert_eq!(all.total_original_bytes, 12000);

        let images = tracker.get_statistics(&StatsFilter {
            media_type: Some(MediaType::Image),
            ..Default::default()
        });
        assert_eq!(images.total_conversions, 2);
        assert!((images.average_reduction - 0.625).abs() < 1e-9);

        let webp_only = tracker.get_statistics(&StatsFilter {
            format: Some(MediaFormat::Webp),
            ..Default::default()
        });
        assert_eq!(webp_only.total_conversions, 1);
    }

    #[test]
    fn test_zero_original_size_reduction_is_zero() {
        let (_root, _state, tracker) = tracker();
        tracker.record_conversion(AssetId(1), MediaFormat::Webp, 0, 10).unwrap();

        let record = tracker.get_record(AssetId(1), MediaFormat::Webp).unwrap();
        assert_eq!(record.size_reduction(), 0.0);

        let stats = tracker.get_statistics(&StatsFilter::default());
        assert_eq!(stats.average_reduction, 0.0);
    }
}
