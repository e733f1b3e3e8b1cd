//! # Video Conversion Engine
//!
//! Questo modulo produce gli artefatti video nei formati moderni (AV1/WebM)
//! a partire da un singolo file sorgente, tramite FFmpeg.
//!
//! ## Responsabilità:
//! - Encoding AV1 (container mp4) con libsvtav1, fallback libaom-av1
//! - Encoding WebM con libvpx-vp9 + audio libopus
//! - Staging su file temporaneo: l'artefatto viene copiato nella
//!   destinazione sibling solo a encode riuscito
//! - Controllo qualità tramite CRF e preset configurabili
//!
//! ## Controllo qualità (CRF AV1/VP9):
//! - 0-20: qualità quasi lossless (file grandi)
//! - 21-32: alta qualità (default AV1: 32)
//! - 33-45: qualità bilanciata (default VP9: 33)
//! - 46+: bassa qualità
//!
//! ## Failure modes per formato:
//! Processor non disponibile (nessun tentativo), invocazione fallita,
//! output vuoto: in tutti i casi il formato è semplicemente assente da
//! `converted_formats` e l'errore è loggato; i formati fratelli procedono.

use crate::config::Config;
use crate::conversion::{
    assemble_result, run_encoder, validate_request, verify_output, ConversionResult,
    FormatOutcome,
};
use crate::formats::{ConvertedFileSet, MediaFormat, MediaType};
use crate::platform::PlatformCommands;
use crate::probe::ProcessorCapability;
use crate::utils::to_string_vec;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Default AV1 constant rate factor
const DEFAULT_AV1_CRF: u8 = 32;
/// Default SVT-AV1 preset (higher = faster)
const DEFAULT_AV1_PRESET: u8 = 8;
/// Default VP9 constant rate factor
const DEFAULT_WEBM_CRF: u8 = 33;
/// Default audio bitrate for both targets
const DEFAULT_AUDIO_BITRATE: &str = "128k";
/// Per-video encode timeout, encoding is long-running
const VIDEO_ENCODE_TIMEOUT: Duration = Duration::from_secs(600);

/// AV1 encoders in preference order; the next one is tried when the
/// previous fails (e.g. the ffmpeg build carries only one of them)
const AV1_ENCODERS: [&str; 2] = ["libsvtav1", "libaom-av1"];

/// Produces AV1/WebM artifacts from video sources
pub struct VideoConverter {
    capability: Option<ProcessorCapability>,
    config: Config,
}

impl VideoConverter {
    pub fn new(capability: Option<ProcessorCapability>, config: Config) -> Self {
        Self { capability, config }
    }

    /// Convert a source video into every requested destination format.
    ///
    /// Same contract as the image engine: structural violations error
    /// immediately, per-format failures land in the result's `errors`.
    pub async fn process(
        &self,
        source: &Path,
        destinations: &ConvertedFileSet,
    ) -> Result<ConversionResult> {
        validate_request(source, destinations, MediaType::Video)?;

        let mut outcomes = Vec::new();
        for (format, dest) in destinations.iter() {
            let outcome = self.convert_one(source, *format, dest).await;
            outcomes.push((*format, outcome));
        }

        Ok(assemble_result(source, outcomes))
    }

    async fn convert_one(&self, source: &Path, format: MediaFormat, dest: &Path) -> FormatOutcome {
        match &self.capability {
            Some(c) if c.supports(format) => {}
            _ => {
                debug!(
                    "No video processor available for {}, skipping {}",
                    format,
                    source.display()
                );
                return FormatOutcome::Failed(format!("no video processor available for {}", format));
            }
        }

        // Stage into a temp file, copy to the sibling destination on success
        let temp_file = match NamedTempFile::with_suffix(format!(".{}", format.extension())) {
            Ok(f) => f,
            Err(e) => return FormatOutcome::Failed(format!("failed to create temp file: {}", e)),
        };
        let temp_path = temp_file.path().to_path_buf();

        let encode = match format {
            MediaFormat::Av1 => self.encode_av1(source, &temp_path).await,
            MediaFormat::Webm => self.encode_webm(source, &temp_path).await,
            _ => Err(format!("{} is not a video target", format)),
        };

        if let Err(reason) = encode {
            return FormatOutcome::Failed(reason);
        }

        if let Err(reason) = verify_output(&temp_path).await {
            return FormatOutcome::Failed(reason);
        }

        if let Err(e) = tokio::fs::copy(&temp_path, dest).await {
            return FormatOutcome::Failed(format!(
                "failed to copy encoded file to {}: {}",
                dest.display(),
                e
            ));
        }

        match verify_output(dest).await {
            Ok(_) => FormatOutcome::Converted(dest.to_path_buf()),
            Err(reason) => FormatOutcome::Failed(reason),
        }
    }

    /// Encode AV1, trying each known encoder in preference order
    async fn encode_av1(&self, source: &Path, output: &Path) -> Result<(), String> {
        let mut last_error = String::new();

        for encoder in AV1_ENCODERS {
            let args = self.av1_args(source, output, encoder);
            match self.run_ffmpeg(&args).await {
                Ok(()) => return Ok(()),
                Err(reason) => {
                    warn!("{} failed for {}, trying next encoder", encoder, source.display());
                    last_error = reason;
                }
            }
        }

        Err(last_error)
    }

    async fn encode_webm(&self, source: &Path, output: &Path) -> Result<(), String> {
        let args = self.webm_args(source, output);
        self.run_ffmpeg(&args).await
    }

    async fn run_ffmpeg(&self, args: &[String]) -> Result<(), String> {
        let platform = PlatformCommands::instance();
        let ffmpeg = PathBuf::from(platform.get_command("ffmpeg"));
        run_encoder(&ffmpeg, args, VIDEO_ENCODE_TIMEOUT).await
    }

    fn av1_args(&self, source: &Path, output: &Path, encoder: &str) -> Vec<String> {
        let input = source.to_string_lossy();
        let out = output.to_string_lossy();
        let crf = self.av1_crf().to_string();
        let audio_bitrate = self.audio_bitrate();

        match encoder {
            "libsvtav1" => to_string_vec([
                "-hide_banner",
                "-loglevel",
                "error",
                "-i",
                input.as_ref(),
                "-c:v",
                "libsvtav1",
                "-preset",
                &self.av1_preset().to_string(),
                "-crf",
                &crf,
                "-c:a",
                "aac",
                "-b:a",
                &audio_bitrate,
                "-movflags",
                "+faststart",
                // The .av1 destination suffix is not known to ffmpeg, the
                // container has to be named explicitly
                "-f",
                "mp4",
                "-y",
                out.as_ref(),
            ]),
            _ => to_string_vec([
                "-hide_banner",
                "-loglevel",
                "error",
                "-i",
                input.as_ref(),
                "-c:v",
                "libaom-av1",
                "-crf",
                &crf,
                "-b:v",
                "0",
                "-cpu-used",
                &self.av1_preset().min(8).to_string(),
                "-row-mt",
                "1",
                "-c:a",
                "aac",
                "-b:a",
                &audio_bitrate,
                "-movflags",
                "+faststart",
                "-f",
                "mp4",
                "-y",
                out.as_ref(),
            ]),
        }
    }

    fn webm_args(&self, source: &Path, output: &Path) -> Vec<String> {
        let input = source.to_string_lossy();
        let out = output.to_string_lossy();

        to_string_vec([
            "-hide_banner",
            "-loglevel",
            "error",
            "-i",
            input.as_ref(),
            "-c:v",
            "libvpx-vp9",
            "-crf",
            &self.webm_crf().to_string(),
            "-b:v",
            "0",
            "-row-mt",
            "1",
            "-c:a",
            "libopus",
            "-b:a",
            &self.audio_bitrate(),
            "-y",
            out.as_ref(),
        ])
    }

    fn av1_crf(&self) -> u8 {
        self.config.av1_crf.unwrap_or(DEFAULT_AV1_CRF)
    }

    fn av1_preset(&self) -> u8 {
        self.config.av1_preset.unwrap_or(DEFAULT_AV1_PRESET)
    }

    fn webm_crf(&self) -> u8 {
        self.config.webm_crf.unwrap_or(DEFAULT_WEBM_CRF)
    }

    fn audio_bitrate(&self) -> String {
        self.config
            .audio_bitrate
            .clone()
            .unwrap_or_else(|| DEFAULT_AUDIO_BITRATE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_no_processor_reports_unavailable_without_error() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"video bytes").unwrap();

        let converter = VideoConverter::new(None, Config::default());
        let destinations =
            ConvertedFileSet::for_source(&source, &[MediaFormat::Av1, MediaFormat::Webm]);
        let result = converter.process(&source, &destinations).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.errors.len(), 2);
    }

    #[tokio::test]
    async fn test_image_source_fails_fast() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("photo.jpg");
        std::fs::write(&source, b"jpeg").unwrap();

        let converter = VideoConverter::new(None, Config::default());
        let destinations = ConvertedFileSet::for_source(&source, &[MediaFormat::Webm]);

        assert!(converter.process(&source, &destinations).await.is_err());
    }

    #[test]
    fn test_crf_defaults_and_overrides() {
        let converter = VideoConverter::new(None, Config::default());
        assert_eq!(converter.av1_crf(), DEFAULT_AV1_CRF);
        assert_eq!(converter.webm_crf(), DEFAULT_WEBM_CRF);

        let converter = VideoConverter::new(
            None,
            Config {
                av1_crf: Some(24),
                ..Default::default()
            },
        );
        assert_eq!(converter.av1_crf(), 24);
        assert_eq!(converter.webm_crf(), DEFAULT_WEBM_CRF);
    }

    #[test]
    fn test_encoder_args_shape() {
        let converter = VideoConverter::new(None, Config::default());
        let args = converter.av1_args(Path::new("in.mp4"), Path::new("out.mp4"), "libsvtav1");
        assert!(args.contains(&"libsvtav1".to_string()));
        assert!(args.contains(&"-crf".to_string()));

        let args = converter.webm_args(Path::new("in.mp4"), Path::new("out.webm"));
        assert!(args.contains(&"libvpx-vp9".to_string()));
        assert!(args.contains(&"libopus".to_string()));
    }
}
