//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione della pipeline.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con tutti i parametri di conversione
//! - Fornisce validazione robusta dei parametri di input
//! - Supporta caricamento/salvataggio configurazione da/verso file JSON
//! - Fornisce valori di default sensati per tutti i parametri
//!
//! ## Parametri di configurazione:
//! - `image_formats` / `video_formats`: formati target abilitati
//! - `hybrid`: converte in entrambi i formati (legacy-friendly + moderno)
//! - `webp_quality` / `avif_quality`: override qualità immagini (1-100)
//! - `av1_crf` / `webm_crf`: override CRF video (0-63)
//! - `image_quota` / `video_quota`: limite conversioni per periodo (None = illimitato)
//! - `skip_animated`: esclude le GIF animate dalla conversione (default: true)
//! - `batch_size`: dimensione batch per lo sweep di backfill
//! - `video_workers`: worker per la coda video asincrona
//!
//! ## Nota di design:
//! Nessun componente legge configurazione da stato globale: la `Config` viene
//! passata esplicitamente a ogni chiamata. Gli override di qualità sono
//! `Option`: un valore assente usa il default per-formato dell'engine,
//! un valore presente sovrascrive solo quella chiave.

use crate::formats::{MediaFormat, MediaType};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the conversion and delivery pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target formats enabled for images
    pub image_formats: Vec<MediaFormat>,
    /// Target formats enabled for videos
    pub video_formats: Vec<MediaFormat>,
    /// Hybrid mode: produce both the legacy-friendly and the modern format
    pub hybrid: bool,
    /// WebP quality override (1-100)
    pub webp_quality: Option<u8>,
    /// AVIF quality override (1-100)
    pub avif_quality: Option<u8>,
    /// AVIF encoder speed override (0-10)
    pub avif_speed: Option<u8>,
    /// AV1 CRF override (0-63, lower = better quality)
    pub av1_crf: Option<u8>,
    /// AV1 encoder preset override (0-13, higher = faster)
    pub av1_preset: Option<u8>,
    /// WebM (VP9) CRF override (0-63)
    pub webm_crf: Option<u8>,
    /// Audio bitrate override for video targets
    pub audio_bitrate: Option<String>,
    /// Conversions allowed per period for images (None = unbounded)
    pub image_quota: Option<u32>,
    /// Conversions allowed per period for videos (None = unbounded)
    pub video_quota: Option<u32>,
    /// Skip animated GIFs instead of converting them
    pub skip_animated: bool,
    /// Batch size for the backfill sweep
    pub batch_size: usize,
    /// Number of workers draining the video queue
    pub video_workers: usize,
    /// Directory for the persistent ledgers (None = ~/.media-delivery)
    pub state_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image_formats: vec![MediaFormat::Webp, MediaFormat::Avif],
            video_formats: vec![MediaFormat::Av1, MediaFormat::Webm],
            hybrid: true,
            webp_quality: None,
            avif_quality: None,
            avif_speed: None,
            av1_crf: None,
            av1_preset: None,
            webm_crf: None,
            audio_bitrate: None,
            image_quota: None,
            video_quota: None,
            skip_animated: true,
            batch_size: 10,
            video_workers: 1,
            state_dir: None,
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        for format in &self.image_formats {
            if format.media_type() != MediaType::Image {
                return Err(anyhow::anyhow!(
                    "{} is not an image format",
                    format
                ));
            }
        }

        for format in &self.video_formats {
            if format.media_type() != MediaType::Video {
                return Err(anyhow::anyhow!(
                    "{} is not a video format",
                    format
                ));
            }
        }

        if let Some(q) = self.webp_quality {
            if q == 0 || q > 100 {
                return Err(anyhow::anyhow!("WebP quality must be between 1 and 100"));
            }
        }

        if let Some(q) = self.avif_quality {
            if q == 0 || q > 100 {
                return Err(anyhow::anyhow!("AVIF quality must be between 1 and 100"));
            }
        }

        if let Some(s) = self.avif_speed {
            if s > 10 {
                return Err(anyhow::anyhow!("AVIF speed must be between 0 and 10"));
            }
        }

        if let Some(crf) = self.av1_crf {
            if crf > 63 {
                return Err(anyhow::anyhow!("AV1 CRF must be between 0 and 63"));
            }
        }

        if let Some(p) = self.av1_preset {
            if p > 13 {
                return Err(anyhow::anyhow!("AV1 preset must be between 0 and 13"));
            }
        }

        if let Some(crf) = self.webm_crf {
            if crf > 63 {
                return Err(anyhow::anyhow!("WebM CRF must be between 0 and 63"));
            }
        }

        if self.batch_size == 0 {
            return Err(anyhow::anyhow!("Batch size must be greater than 0"));
        }

        if self.video_workers == 0 {
            return Err(anyhow::anyhow!("Number of video workers must be greater than 0"));
        }

        // Validate state dir if specified
        if let Some(ref state_dir) = self.state_dir {
            if state_dir.exists() && !state_dir.is_dir() {
                return Err(anyhow::anyhow!(
                    "State path is not a directory: {}",
                    state_dir.display()
                ));
            }
        }

        Ok(())
    }

    /// Enabled formats for a media class
    pub fn enabled_formats(&self, media_type: MediaType) -> &[MediaFormat] {
        match media_type {
            MediaType::Image => &self.image_formats,
            MediaType::Video => &self.video_formats,
        }
    }

    /// Quota limit for a media class (None = unbounded)
    pub fn quota_limit(&self, media_type: MediaType) -> Option<u32> {
        match media_type {
            MediaType::Image => self.image_quota,
            MediaType::Video => self.video_quota,
        }
    }

    /// Load configuration from file
    pub async fn from_file(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &PathBuf) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.webp_quality = Some(0);
        assert!(config.validate().is_err());

        config.webp_quality = Some(80);
        config.av1_crf = Some(64);
        assert!(config.validate().is_err());

        config.av1_crf = Some(32);
        config.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_rejects_mismatched_formats() {
        let mut config = Config::default();
        config.image_formats = vec![MediaFormat::Av1];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.video_formats = vec![MediaFormat::Webp];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.image_formats, vec![MediaFormat::Webp, MediaFormat::Avif]);
        assert_eq!(config.video_formats, vec![MediaFormat::Av1, MediaFormat::Webm]);
        assert!(config.hybrid);
        assert!(config.skip_animated);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.video_workers, 1);
        assert_eq!(config.image_quota, None);
    }

    #[tokio::test]
    async fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let original_config = Config {
            image_formats: vec![MediaFormat::Webp],
            hybrid: false,
            webp_quality: Some(85),
            image_quota: Some(100),
            batch_size: 25,
            ..Default::default()
        };

        // Save config
        original_config.save_to_file(&config_path).await.unwrap();

        // Load config
        let loaded_config = Config::from_file(&config_path).await.unwrap();

        assert_eq!(loaded_config.image_formats, vec![MediaFormat::Webp]);
        assert!(!loaded_config.hybrid);
        assert_eq!(loaded_config.webp_quality, Some(85));
        assert_eq!(loaded_config.image_quota, Some(100));
        assert_eq!(loaded_config.batch_size, 25);
    }
}
