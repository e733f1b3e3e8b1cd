//! # Image Conversion Engine
//!
//! Questo modulo produce gli artefatti immagine nei formati moderni
//! (WebP/AVIF) a partire da un singolo file sorgente, delegando l'encoding
//! esclusivamente a tool esterni.
//!
//! ## Pipeline di conversione:
//! 1. **Validazione fail-fast**: sorgente esistente, estensione riconosciuta,
//!    directory di destinazione esistenti - nessun encoder viene invocato
//!    per chiamate strutturalmente invalide
//! 2. **Per-formato**: ogni formato richiesto viene prodotto in modo
//!    indipendente tramite il backend selezionato dal probe; il fallimento
//!    di un formato non aborta mai i fratelli nella stessa chiamata
//! 3. **Postcondizione**: ogni formato riportato in `converted_formats` ha
//!    il file di destinazione esistente e non vuoto
//!
//! ## Backend:
//! - `magick`: conversione WebP e AVIF (preferito)
//! - `cwebp`: solo WebP (fallback)
//!
//! ## Configurazione qualità:
//! I default per-formato (WebP 80, AVIF 65/speed 6) vengono sovrascritti
//! chiave per chiave dagli override in `Config`, mai sostituiti in blocco.
//!
//! ## Strategia ibrida:
//! Con hybrid mode attivo il chiamante richiede entrambi i formati nella
//! stessa chiamata: `success` è true se almeno uno riesce; il successo
//! parziale viene loggato distintamente dal fallimento totale.

use crate::config::Config;
use crate::conversion::{
    assemble_result, run_encoder, validate_request, verify_output, ConversionResult,
    FormatOutcome,
};
use crate::formats::{ConvertedFileSet, MediaFormat, MediaType};
use crate::platform::PlatformCommands;
use crate::probe::{ProcessorCapability, ProcessorKind};
use crate::utils::to_string_vec;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default WebP quality percentage
const DEFAULT_WEBP_QUALITY: u8 = 80;
/// Default AVIF quality percentage
const DEFAULT_AVIF_QUALITY: u8 = 65;
/// Default AVIF encoder speed (0 = slowest/best, 10 = fastest)
const DEFAULT_AVIF_SPEED: u8 = 6;
/// Per-image encode timeout
const IMAGE_ENCODE_TIMEOUT: Duration = Duration::from_secs(120);

/// Produces WebP/AVIF artifacts from image sources
pub struct ImageConverter {
    capability: Option<ProcessorCapability>,
    config: Config,
}

impl ImageConverter {
    /// Create a converter bound to the probed image capability.
    ///
    /// An absent capability is valid: every conversion attempt is then
    /// reported as "processor unavailable" without invoking anything.
    pub fn new(capability: Option<ProcessorCapability>, config: Config) -> Self {
        Self { capability, config }
    }

    /// Convert a source image into every requested destination format.
    ///
    /// Errors only on structurally invalid calls (missing source,
    /// unsupported source type, missing destination directory); per-format
    /// failures are collected into the result's `errors` list instead.
    pub async fn process(
        &self,
        source: &Path,
        destinations: &ConvertedFileSet,
    ) -> Result<ConversionResult> {
        validate_request(source, destinations, MediaType::Image)?;

        let mut outcomes = Vec::new();
        for (format, dest) in destinations.iter() {
            let outcome = self.convert_one(source, *format, dest).await;
            outcomes.push((*format, outcome));
        }

        Ok(assemble_result(source, outcomes))
    }

    async fn convert_one(&self, source: &Path, format: MediaFormat, dest: &Path) -> FormatOutcome {
        let capability = match &self.capability {
            Some(c) if c.supports(format) => c,
            _ => {
                // Unavailable is a capability fact: no attempt is made
                debug!(
                    "No image processor available for {}, skipping {}",
                    format,
                    source.display()
                );
                return FormatOutcome::Failed(format!("no image processor available for {}", format));
            }
        };

        let input = source.to_string_lossy();
        let output = dest.to_string_lossy();

        let (program, args) = match (capability.kind, format) {
            (ProcessorKind::Magick, MediaFormat::Webp) => (
                "magick",
                to_string_vec([
                    input.as_ref(),
                    "-quality",
                    &self.webp_quality().to_string(),
                    output.as_ref(),
                ]),
            ),
            (ProcessorKind::Magick, MediaFormat::Avif) => (
                "magick",
                to_string_vec([
                    input.as_ref(),
                    "-quality",
                    &self.avif_quality().to_string(),
                    "-define",
                    &format!("heic:speed={}", self.avif_speed()),
                    output.as_ref(),
                ]),
            ),
            (ProcessorKind::Cwebp, MediaFormat::Webp) => (
                "cwebp",
                to_string_vec([
                    "-q",
                    &self.webp_quality().to_string(),
                    "-m",
                    "4",
                    "-mt",
                    input.as_ref(),
                    "-o",
                    output.as_ref(),
                ]),
            ),
            _ => {
                return FormatOutcome::Failed(format!(
                    "{} backend cannot encode {}",
                    capability.kind, format
                ))
            }
        };

        let platform = PlatformCommands::instance();
        let program = PathBuf::from(platform.get_command(program));

        if let Err(reason) = run_encoder(&program, &args, IMAGE_ENCODE_TIMEOUT).await {
            return FormatOutcome::Failed(reason);
        }

        match verify_output(dest).await {
            Ok(_) => FormatOutcome::Converted(dest.to_path_buf()),
            Err(reason) => FormatOutcome::Failed(reason),
        }
    }

    fn webp_quality(&self) -> u8 {
        self.config.webp_quality.unwrap_or(DEFAULT_WEBP_QUALITY)
    }

    fn avif_quality(&self) -> u8 {
        self.config.avif_quality.unwrap_or(DEFAULT_AVIF_QUALITY)
    }

    fn avif_speed(&self) -> u8 {
        self.config.avif_speed.unwrap_or(DEFAULT_AVIF_SPEED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("photo.jpg");
        std::fs::write(&source, b"jpeg bytes").unwrap();
        (dir, source)
    }

    #[tokio::test]
    async fn test_no_processor_reports_unavailable_without_error() {
        let (_dir, source) = fixture();
        let converter = ImageConverter::new(None, Config::default());

        let destinations =
            ConvertedFileSet::for_source(&source, &[MediaFormat::Webp, MediaFormat::Avif]);
        let result = converter.process(&source, &destinations).await.unwrap();

        assert!(!result.success);
        assert!(result.converted_formats.is_empty());
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].contains("no image processor"));
    }

    #[tokio::test]
    async fn test_backend_without_avif_reports_per_format_failure() {
        let (_dir, source) = fixture();
        let capability = ProcessorCapability {
            kind: ProcessorKind::Cwebp,
            supported_formats: BTreeSet::from([MediaFormat::Webp]),
            version: "1.2.4".to_string(),
        };
        let converter = ImageConverter::new(Some(capability), Config::default());

        let destinations = ConvertedFileSet::for_source(&source, &[MediaFormat::Avif]);
        let result = converter.process(&source, &destinations).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_source_fails_fast() {
        let converter = ImageConverter::new(None, Config::default());
        let source = Path::new("/nonexistent/photo.jpg");
        let destinations = ConvertedFileSet::for_source(source, &[MediaFormat::Webp]);

        assert!(converter.process(source, &destinations).await.is_err());
    }

    #[tokio::test]
    async fn test_unsupported_source_fails_fast() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"video").unwrap();

        let converter = ImageConverter::new(None, Config::default());
        let destinations = ConvertedFileSet::for_source(&source, &[MediaFormat::Webp]);

        assert!(converter.process(&source, &destinations).await.is_err());
    }

    #[test]
    fn test_quality_overrides_merge_per_key() {
        let config = Config {
            avif_quality: Some(50),
            ..Default::default()
        };
        let converter = ImageConverter::new(None, config);

        // Only the overridden key changes, other defaults stay in place
        assert_eq!(converter.avif_quality(), 50);
        assert_eq!(converter.webp_quality(), DEFAULT_WEBP_QUALITY);
        assert_eq!(converter.avif_speed(), DEFAULT_AVIF_SPEED);
    }
}
