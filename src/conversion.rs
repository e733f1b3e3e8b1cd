//! # Conversion Primitives Module
//!
//! Tipi e helper condivisi dalle due varianti dell'engine di conversione
//! (immagini e video).
//!
//! ## Responsabilità:
//! - Definisce `ConversionResult`, il record tipizzato ritornato da ogni
//!   chiamata `process()`
//! - Validazione fail-fast delle precondizioni (sorgente esistente e
//!   riconosciuta, directory di destinazione esistenti) PRIMA di qualsiasi
//!   invocazione encoder
//! - Aggregazione degli esiti per-formato: il fallimento di un formato non
//!   aborta mai i formati fratelli; `success` è true se almeno un formato
//!   è stato prodotto (hybrid partial success)
//! - Esecuzione degli encoder esterni con cattura degli errori: un encoder
//!   che fallisce o non parte diventa un errore loggato per-formato, mai
//!   un'eccezione fuori dalla chiamata top-level

use crate::error::ConvertError;
use crate::formats::{self, ConvertedFileSet, MediaFormat, MediaType};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Typed result of one logical conversion operation
#[derive(Debug, Clone, Default)]
pub struct ConversionResult {
    /// True if at least one requested format was produced
    pub success: bool,
    /// Formats actually produced, destination file verified non-empty
    pub converted_formats: Vec<MediaFormat>,
    /// Destination paths of the produced artifacts
    pub converted_files: ConvertedFileSet,
    /// Per-format failure diagnostics; never raised as errors
    pub errors: Vec<String>,
}

/// Outcome of a single per-format encode attempt
#[derive(Debug)]
pub(crate) enum FormatOutcome {
    Converted(PathBuf),
    Failed(String),
}

/// Fail-fast precondition check. Returns an error (and guarantees no encoder
/// was invoked) for structurally invalid calls: missing source, unsupported
/// source type for the media class, missing destination directory.
pub(crate) fn validate_request(
    source: &Path,
    destinations: &ConvertedFileSet,
    media_type: MediaType,
) -> Result<()> {
    if !source.exists() {
        return Err(ConvertError::MissingSource(source.display().to_string()).into());
    }

    let recognized = match media_type {
        MediaType::Image => formats::is_supported_image_source(source),
        MediaType::Video => formats::is_supported_video_source(source),
    };
    if !recognized {
        return Err(ConvertError::UnsupportedInput(format!(
            "{} is not a supported {} source",
            source.display(),
            media_type
        ))
        .into());
    }

    for (_, dest) in destinations.iter() {
        let parent = dest.parent().unwrap_or_else(|| Path::new(""));
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(
                ConvertError::MissingDestination(parent.display().to_string()).into(),
            );
        }
    }

    Ok(())
}

/// Aggregate per-format outcomes into the typed result.
///
/// Partial success (some formats produced, some failed) is logged distinctly
/// from total failure but is not an error state for the caller.
pub(crate) fn assemble_result(
    source: &Path,
    outcomes: Vec<(MediaFormat, FormatOutcome)>,
) -> ConversionResult {
    let mut result = ConversionResult::default();

    for (format, outcome) in outcomes {
        match outcome {
            FormatOutcome::Converted(path) => {
                result.converted_formats.push(format);
                result.converted_files.insert(format, path);
            }
            FormatOutcome::Failed(reason) => {
                warn!("{}: {} conversion failed: {}", source.display(), format, reason);
                result.errors.push(format!("{}: {}", format, reason));
            }
        }
    }

    result.success = !result.converted_formats.is_empty();

    if result.success && !result.errors.is_empty() {
        info!(
            "Partial conversion success for {}: produced {:?}, {} format(s) failed",
            source.display(),
            result.converted_formats,
            result.errors.len()
        );
    } else if !result.success {
        error!("All conversions failed for {}", source.display());
    }

    result
}

/// Check the postcondition on a produced artifact: the destination file must
/// exist and be non-empty. An empty output demotes the format to a failure.
pub(crate) async fn verify_output(dest: &Path) -> Result<u64, String> {
    match tokio::fs::metadata(dest).await {
        Ok(meta) if meta.len() > 0 => Ok(meta.len()),
        Ok(_) => Err(format!("encoder produced empty file {}", dest.display())),
        Err(e) => Err(format!("missing output {}: {}", dest.display(), e)),
    }
}

/// Run an external encoder invocation, converting every failure mode
/// (spawn error, non-zero exit, timeout) into a per-format error string
pub(crate) async fn run_encoder(
    program: &Path,
    args: &[String],
    timeout: Duration,
) -> Result<(), String> {
    debug!("Running {} {:?}", program.display(), args);
    let start_time = std::time::Instant::now();

    let output = tokio::time::timeout(timeout, Command::new(program).args(args).output())
        .await
        .map_err(|_| format!("{} timed out after {:?}", program.display(), timeout))?
        .map_err(|e| format!("failed to execute {}: {}", program.display(), e))?;

    let elapsed = start_time.elapsed();

    if output.status.success() {
        debug!("{} completed in {:?}", program.display(), elapsed);
        Ok(())
    } else {
        Err(format!(
            "{} exited with {} after {:?}: {}",
            program.display(),
            output.status,
            elapsed,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}
