//! # Quota Management Module
//!
//! Admission control: limita il numero di conversioni per periodo per classe
//! di media (image/video), indipendentemente dalla granularità per-formato.
//!
//! ## Responsabilità:
//! - `can_convert()`: gate consultato PRIMA di ogni conversione
//! - `record_usage()`: incremento registrato DOPO ogni artefatto convertito
//!   con successo (hybrid a doppio formato incrementa due volte)
//! - Rollover lazy del periodo (mese di calendario) al primo accesso
//! - Persistenza del contatore nel quota ledger JSON
//!
//! ## Invarianti:
//! - `used_count` cresce solo entro un periodo; al rollover viene azzerato,
//!   mai decrementato
//! - Un limite assente (`None`) è il sentinel "illimitato": `can_convert`
//!   ritorna sempre true
//! - Ogni check e ogni incremento è una singola sezione critica sotto lock;
//!   la coppia check-then-increment attraverso una conversione resta
//!   at-least-bounded come documentato, ma un uso avvenuto non manca mai
//!   di essere registrato
//!
//! ## Formato ledger:
//! ```json
//! { "counters": { "image": { "period_key": "2026-08", "used_count": 42 } } }
//! ```

use crate::config::Config;
use crate::formats::MediaType;
use crate::utils::ledger_file_path;
use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Persisted per-period usage counter
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCounter {
    period_key: String,
    used_count: u32,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct QuotaLedger {
    counters: HashMap<String, StoredCounter>,
}

/// Admission-control gate bounding conversions per period per media class
pub struct QuotaManager {
    ledger_path: PathBuf,
    image_limit: Option<u32>,
    video_limit: Option<u32>,
    state: Mutex<QuotaLedger>,
}

/// Period key for the current calendar month, e.g. `2026-08`
pub fn current_period_key() -> String {
    Utc::now().format("%Y-%m").to_string()
}

impl QuotaManager {
    /// Open (or create) the quota ledger for a library root
    pub fn open(library_root: &Path, config: &Config) -> Result<Self> {
        let ledger_path = ledger_file_path(
            config.state_dir.as_deref(),
            library_root,
            "quota_ledger",
        )?;

        let state = if ledger_path.exists() {
            let content = std::fs::read_to_string(&ledger_path)?;
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            QuotaLedger::default()
        };

        Ok(Self {
            ledger_path,
            image_limit: config.image_quota,
            video_limit: config.video_quota,
            state: Mutex::new(state),
        })
    }

    fn limit(&self, media_type: MediaType) -> Option<u32> {
        match media_type {
            MediaType::Image => self.image_limit,
            MediaType::Video => self.video_limit,
        }
    }

    /// True if another conversion of this media class is admitted in the
    /// current period. An unbounded limit always admits.
    pub fn can_convert(&self, media_type: MediaType) -> bool {
        self.can_convert_in_period(media_type, &current_period_key())
    }

    /// Record one successfully converted artifact of this media class.
    ///
    /// Must be called exactly once per converted format output; a hybrid
    /// dual-format success therefore increments usage twice.
    pub fn record_usage(&self, media_type: MediaType) -> Result<()> {
        self.record_usage_in_period(media_type, &current_period_key())
    }

    /// Current used count for diagnostics and statistics
    pub fn used_count(&self, media_type: MediaType) -> u32 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.counters.get(media_type.to_string().as_str()) {
            Some(counter) if counter.period_key == current_period_key() => counter.used_count,
            _ => 0,
        }
    }

    fn can_convert_in_period(&self, media_type: MediaType, period: &str) -> bool {
        let limit = match self.limit(media_type) {
            Some(limit) => limit,
            None => return true,
        };

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let counter = Self::rolled_counter(&mut state, media_type, period);
        let admitted = counter.used_count < limit;

        if !admitted {
            debug!(
                "Quota exhausted for {} in period {} ({}/{})",
                media_type, period, counter.used_count, limit
            );
        }

        admitted
    }

    fn record_usage_in_period(&self, media_type: MediaType, period: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let counter = Self::rolled_counter(&mut state, media_type, period);
        counter.used_count += 1;
        debug!(
            "Recorded {} conversion usage: {} in period {}",
            media_type, counter.used_count, period
        );

        // Persist under the lock: a conversion that happened must never
        // silently fail to be accounted for
        let content = serde_json::to_string_pretty(&*state)?;
        std::fs::write(&self.ledger_path, content)?;
        Ok(())
    }

    /// Fetch the counter for a media class, lazily resetting it when the
    /// stored period key differs from the current one
    fn rolled_counter<'a>(
        state: &'a mut QuotaLedger,
        media_type: MediaType,
        period: &str,
    ) -> &'a mut StoredCounter {
        let key = media_type.to_string();
        let counter = state.counters.entry(key).or_insert_with(|| StoredCounter {
            period_key: period.to_string(),
            used_count: 0,
        });

        if counter.period_key != period {
            info!(
                "Quota period rollover for {}: {} -> {}",
                media_type, counter.period_key, period
            );
            counter.period_key = period.to_string();
            counter.used_count = 0;
        }

        counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(image_quota: Option<u32>) -> (TempDir, TempDir, QuotaManager) {
        let root = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        let config = Config {
            image_quota,
            video_quota: Some(2),
            state_dir: Some(state.path().to_path_buf()),
            ..Default::default()
        };
        let quota = QuotaManager::open(root.path(), &config).unwrap();
        (root, state, quota)
    }

    #[test]
    fn test_unbounded_limit_always_admits() {
        let (_root, _state, quota) = manager(None);
        for _ in 0..1000 {
            assert!(quota.can_convert(MediaType::Image));
            quota.record_usage(MediaType::Image).unwrap();
        }
        assert!(quota.can_convert(MediaType::Image));
    }

    #[test]
    fn test_quota_monotonicity_and_exhaustion() {
        let (_root, _state, quota) = manager(Some(3));
        let period = current_period_key();

        for n in 1..=3u32 {
            assert!(quota.can_convert_in_period(MediaType::Image, &period));
            quota
                .record_usage_in_period(MediaType::Image, &period)
                .unwrap();
            assert_eq!(quota.used_count(MediaType::Image), n);
        }

        assert!(!quota.can_convert_in_period(MediaType::Image, &period));
    }

    #[test]
    fn test_period_rollover_resets_usage() {
        let (_root, _state, quota) = manager(Some(1));

        quota
            .record_usage_in_period(MediaType::Image, "2026-07")
            .unwrap();
        assert!(!quota.can_convert_in_period(MediaType::Image, "2026-07"));

        // Next period admits again, detected lazily on access
        assert!(quota.can_convert_in_period(MediaType::Image, "2026-08"));
    }

    #[test]
    fn test_media_types_metered_independently() {
        let (_root, _state, quota) = manager(Some(1));

        quota
            .record_usage_in_period(MediaType::Image, "2026-08")
            .unwrap();
        assert!(!quota.can_convert_in_period(MediaType::Image, "2026-08"));
        assert!(quota.can_convert_in_period(MediaType::Video, "2026-08"));
    }

    #[test]
    fn test_usage_persists_across_reopen() {
        let root = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        let config = Config {
            image_quota: Some(5),
            state_dir: Some(state.path().to_path_buf()),
            ..Default::default()
        };

        {
            let quota = QuotaManager::open(root.path(), &config).unwrap();
            quota.record_usage(MediaType::Image).unwrap();
            quota.record_usage(MediaType::Image).unwrap();
        }

        let quota = QuotaManager::open(root.path(), &config).unwrap();
        assert_eq!(quota.used_count(MediaType::Image), 2);
    }
}
