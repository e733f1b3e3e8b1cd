//! # Processor Capability Probe Module
//!
//! Questo modulo determina, senza eseguire alcuna conversione, quale backend
//! encoder è utilizzabile e quali formati target supporta davvero.
//!
//! ## Responsabilità:
//! - Probing del backend immagini preferito (`magick`, supporta webp+avif)
//!   con fallback al backend limitato (`cwebp`, solo webp)
//! - Probing del backend video (`ffmpeg` + `ffprobe`, entrambi richiesti)
//!   con query della lista encoder (av1/webm)
//! - Parsing dell'output dei tool per estrarre i formati scrivibili
//!
//! ## Contratto:
//! L'assenza di un backend NON è un errore: è un capability fact riportato
//! come `None`. Un probe fallito o bloccato viene trattato come
//! "processor unavailable" tramite timeout, mai come crash.
//!
//! ## Strategia di selezione (lista ordinata tipizzata):
//! 1. `magick`: preferito se copre tutti i formati richiesti
//! 2. `cwebp`: fallback se supporta almeno un formato richiesto
//! 3. Nessun backend: `None`
//!
//! Il risultato è calcolato una volta per processo dalla pipeline e trattato
//! come immutabile da quel momento in poi.

use crate::formats::MediaFormat;
use crate::platform::PlatformCommands;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Timeout for a single probe invocation; a hung binary counts as unavailable
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Encoder backend kinds, in preference order per media class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorKind {
    /// ImageMagick `magick` binary, higher fidelity (webp + avif)
    Magick,
    /// `cwebp` binary, webp only
    Cwebp,
    /// External `ffmpeg` binary (requires `ffprobe` alongside)
    Ffmpeg,
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorKind::Magick => write!(f, "magick"),
            ProcessorKind::Cwebp => write!(f, "cwebp"),
            ProcessorKind::Ffmpeg => write!(f, "ffmpeg"),
        }
    }
}

/// What an encoder backend can actually produce.
///
/// Computed once per process lifetime and read-only thereafter.
#[derive(Debug, Clone)]
pub struct ProcessorCapability {
    pub kind: ProcessorKind,
    pub supported_formats: BTreeSet<MediaFormat>,
    pub version: String,
}

impl ProcessorCapability {
    pub fn supports(&self, format: MediaFormat) -> bool {
        self.supported_formats.contains(&format)
    }
}

/// Detect the usable image encoder backend for the requested target formats.
///
/// Prefers `magick` (webp + avif) over `cwebp` (webp only); falls back to the
/// secondary backend when the preferred one lacks a requested format and the
/// secondary supports at least one. Returns `None` when no backend supports
/// any requested format - absence is a normal, reportable outcome.
pub async fn detect_image_processor(requested: &[MediaFormat]) -> Option<ProcessorCapability> {
    let requested: BTreeSet<MediaFormat> = requested.iter().copied().collect();
    if requested.is_empty() {
        return None;
    }

    let magick = probe_magick(&requested).await;
    if let Some(ref capability) = magick {
        if requested.iter().all(|f| capability.supports(*f)) {
            debug!("magick covers all requested image formats");
            return magick;
        }
        warn!(
            "magick lacks some requested image formats (has: {:?}), trying cwebp",
            capability.supported_formats
        );
    }

    // The preferred backend lacks a target format (or is absent entirely):
    // fall back to the secondary only if it supports at least one target
    let cwebp = probe_cwebp(&requested).await;

    match (magick, cwebp) {
        (_, Some(c)) => Some(c),
        (Some(m), None) => Some(m),
        (None, None) => {
            info!("No image processor supports any of the requested formats");
            None
        }
    }
}

/// Detect the usable video encoder backend for the requested target formats.
///
/// Requires both `ffmpeg` and `ffprobe` to be present and invocable
/// (`-version` probe succeeds); returns a capability only if at least one of
/// the requested av1/webm targets is encodable.
pub async fn detect_video_processor(requested: &[MediaFormat]) -> Option<ProcessorCapability> {
    let requested: BTreeSet<MediaFormat> = requested.iter().copied().collect();
    if requested.is_empty() {
        return None;
    }

    let version = match probe_version("ffmpeg").await {
        Some(v) => v,
        None => {
            info!("ffmpeg not available, video conversion disabled");
            return None;
        }
    };

    if probe_version("ffprobe").await.is_none() {
        info!("ffprobe not available, video conversion disabled");
        return None;
    }

    let platform = PlatformCommands::instance();
    let output = run_probe(platform.get_command("ffmpeg"), &["-hide_banner", "-encoders"]).await?;
    let encodable = parse_ffmpeg_encoders(&output);
    let supported: BTreeSet<MediaFormat> = encodable.intersection(&requested).copied().collect();

    if supported.is_empty() {
        info!("ffmpeg has no encoder for any requested video format");
        return None;
    }

    Some(ProcessorCapability {
        kind: ProcessorKind::Ffmpeg,
        supported_formats: supported,
        version,
    })
}

/// Log a diagnostic report of the probed capabilities
pub fn log_capability_report(
    image: &Option<ProcessorCapability>,
    video: &Option<ProcessorCapability>,
) {
    info!("🔧 Processor capability report:");
    match image {
        Some(cap) => info!(
            "  ✅ image: {} {} ({})",
            cap.kind,
            cap.version,
            format_set(&cap.supported_formats)
        ),
        None => info!("  ❌ image: no usable processor"),
    }
    match video {
        Some(cap) => info!(
            "  ✅ video: {} {} ({})",
            cap.kind,
            cap.version,
            format_set(&cap.supported_formats)
        ),
        None => info!("  ❌ video: no usable processor"),
    }
}

fn format_set(formats: &BTreeSet<MediaFormat>) -> String {
    formats
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

async fn probe_magick(requested: &BTreeSet<MediaFormat>) -> Option<ProcessorCapability> {
    let platform = PlatformCommands::instance();
    let magick = platform.get_command("magick");

    let version = probe_version("magick").await?;
    let list_output = run_probe(magick, &["-list", "format"]).await?;

    let writable = parse_magick_formats(&list_output);
    let supported: BTreeSet<MediaFormat> = writable.intersection(requested).copied().collect();

    if supported.is_empty() {
        debug!("magick present but supports none of the requested formats");
        return None;
    }

    Some(ProcessorCapability {
        kind: ProcessorKind::Magick,
        supported_formats: supported,
        version,
    })
}

async fn probe_cwebp(requested: &BTreeSet<MediaFormat>) -> Option<ProcessorCapability> {
    if !requested.contains(&MediaFormat::Webp) {
        return None;
    }

    let version = probe_version("cwebp").await?;

    Some(ProcessorCapability {
        kind: ProcessorKind::Cwebp,
        supported_formats: BTreeSet::from([MediaFormat::Webp]),
        version,
    })
}

/// Run `tool -version` and return the trimmed first line, or None if the
/// binary is missing, fails, or hangs past the probe timeout
async fn probe_version(base_name: &str) -> Option<String> {
    let platform = PlatformCommands::instance();
    let command = platform.get_command(base_name);
    let output = run_probe(command, &["-version"]).await?;
    output.lines().next().map(|l| l.trim().to_string())
}

async fn run_probe(command: &str, args: &[&str]) -> Option<String> {
    let result = tokio::time::timeout(
        PROBE_TIMEOUT,
        Command::new(command).args(args).output(),
    )
    .await;

    match result {
        Ok(Ok(output)) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).to_string())
        }
        Ok(Ok(output)) => {
            debug!(
                "{} probe exited with {}: {}",
                command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            None
        }
        Ok(Err(e)) => {
            debug!("{} probe failed to spawn: {}", command, e);
            None
        }
        Err(_) => {
            warn!("{} probe timed out after {:?}", command, PROBE_TIMEOUT);
            None
        }
    }
}

/// Parse `magick -list format` output into the set of writable target formats.
///
/// Lines look like ` AVIF* rw+   AV1 Image File Format`; the second column is
/// the mode string and a `w` in it means the format is writable.
fn parse_magick_formats(output: &str) -> BTreeSet<MediaFormat> {
    let mut formats = BTreeSet::new();

    for line in output.lines() {
        let mut parts = line.split_whitespace();
        let name = match parts.next() {
            Some(n) => n.trim_end_matches('*').to_uppercase(),
            None => continue,
        };
        let mode = match parts.next() {
            Some(m) => m,
            None => continue,
        };

        if !mode.contains('w') {
            continue;
        }

        match name.as_str() {
            "WEBP" => {
                formats.insert(MediaFormat::Webp);
            }
            "AVIF" => {
                formats.insert(MediaFormat::Avif);
            }
            _ => {}
        }
    }

    formats
}

/// Parse `ffmpeg -encoders` output into the set of encodable target formats
fn parse_ffmpeg_encoders(output: &str) -> BTreeSet<MediaFormat> {
    let mut formats = BTreeSet::new();

    for line in output.lines() {
        if line.contains("libsvtav1") || line.contains("libaom-av1") {
            formats.insert(MediaFormat::Av1);
        }
        if line.contains("libvpx-vp9") {
            formats.insert(MediaFormat::Webm);
        }
    }

    formats
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGICK_LIST: &str = "\
   Format  Mode  Description
-------------------------------------------------------------------------------
      AAI* rw+   AAI Dune image
     AVIF* rw+   AV1 Image File Format (1.11.0)
      BMP* rw-   Microsoft Windows bitmap image
     WEBP* rw+   WebP Image Format (libwebp 1.2.4)
      XPS  r--   Microsoft XML Paper Specification
";

    const MAGICK_LIST_NO_AVIF: &str = "\
   Format  Mode  Description
     AVIF  r--   AV1 Image File Format
     WEBP* rw+   WebP Image Format
";

    const FFMPEG_ENCODERS: &str = "\
 Encoders:
 V....D libaom-av1           libaom AV1 (codec av1)
 V....D libsvtav1            SVT-AV1(Scalable Video Technology for AV1) encoder (codec av1)
 V....D libvpx-vp9           libvpx VP9 (codec vp9)
 A....D libopus              libopus Opus (codec opus)
";

    const FFMPEG_ENCODERS_VP9_ONLY: &str = "\
 Encoders:
 V....D libvpx-vp9           libvpx VP9 (codec vp9)
 A....D aac                  AAC (Advanced Audio Coding)
";

    #[test]
    fn test_parse_magick_formats() {
        let formats = parse_magick_formats(MAGICK_LIST);
        assert!(formats.contains(&MediaFormat::Webp));
        assert!(formats.contains(&MediaFormat::Avif));
        assert_eq!(formats.len(), 2);
    }

    #[test]
    fn test_parse_magick_read_only_is_not_writable() {
        let formats = parse_magick_formats(MAGICK_LIST_NO_AVIF);
        assert!(formats.contains(&MediaFormat::Webp));
        assert!(!formats.contains(&MediaFormat::Avif));
    }

    #[test]
    fn test_parse_ffmpeg_encoders() {
        let formats = parse_ffmpeg_encoders(FFMPEG_ENCODERS);
        assert!(formats.contains(&MediaFormat::Av1));
        assert!(formats.contains(&MediaFormat::Webm));

        let formats = parse_ffmpeg_encoders(FFMPEG_ENCODERS_VP9_ONLY);
        assert!(!formats.contains(&MediaFormat::Av1));
        assert!(formats.contains(&MediaFormat::Webm));
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_magick_formats("").is_empty());
        assert!(parse_ffmpeg_encoders("").is_empty());
    }

    #[tokio::test]
    async fn test_detect_with_no_requested_formats() {
        assert!(detect_image_processor(&[]).await.is_none());
        assert!(detect_video_processor(&[]).await.is_none());
    }
}
