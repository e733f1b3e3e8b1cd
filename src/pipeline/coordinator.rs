//! # Pipeline Coordinator Module
//!
//! L'orchestratore della pipeline: collega probe, gate di eleggibilità,
//! quota, engine di conversione e tracker.
//!
//! ## Flusso per asset:
//! 1. Eleggibilità: MIME supportato, gate GIF animate (la policy di skip
//!    vive qui, non nel detector), capability del processor
//! 2. Admission: `QuotaManager::can_convert()` PRIMA di ogni lavoro -
//!    quota esaurita significa skip completo, nessun tentativo parziale
//! 3. Conversione: engine immagini o video sul set di formati effettivo
//!    (abilitati ∩ capability, ridotto al primario se hybrid è off)
//! 4. Bookkeeping: un upsert nel tracker e un incremento quota per OGNI
//!    artefatto prodotto (il successo ibrido doppio incrementa due volte)
//!
//! ## Scheduling:
//! Le immagini convertono in modo sincrono nella chiamata che le ha
//! innescate; i video vengono differiti alla coda asincrona con guard di
//! dedup. Le capability sono calcolate una volta alla costruzione e
//! immutabili per la vita del processo.

use crate::animation;
use crate::config::Config;
use crate::conversion::ConversionResult;
use crate::error::ConvertError;
use crate::formats::{ConvertedFileSet, MediaFormat, MediaType};
use crate::image_converter::ImageConverter;
use crate::library::{AssetId, MediaAsset, MediaLibrary};
use crate::probe::{self, ProcessorCapability};
use crate::quota::QuotaManager;
use crate::tracker::{ConversionStatistics, ConversionTracker, StatsFilter};
use crate::video_converter::VideoConverter;
use anyhow::Result;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::video_queue::VideoQueue;

/// Legacy-friendly primary format per media class, used when hybrid mode
/// is off
const IMAGE_PRIMARY: MediaFormat = MediaFormat::Webp;
const VIDEO_PRIMARY: MediaFormat = MediaFormat::Av1;

/// Why an asset was skipped without any conversion attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Source type is not a convertible media class
    UnsupportedType,
    /// Animated GIFs are excluded by configuration
    AnimatedGif,
    /// No processor supports any enabled format
    NoProcessor,
    /// Every effective format already has a conversion record
    AlreadyConverted,
    /// Admission denied by the quota gate
    QuotaExceeded,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnsupportedType => write!(f, "unsupported source type"),
            SkipReason::AnimatedGif => write!(f, "animated GIF excluded"),
            SkipReason::NoProcessor => write!(f, "no processor available"),
            SkipReason::AlreadyConverted => write!(f, "already converted"),
            SkipReason::QuotaExceeded => write!(f, "quota exceeded"),
        }
    }
}

/// Outcome of one gated conversion attempt
#[derive(Debug)]
pub enum ConversionOutcome {
    Converted(ConversionResult),
    Skipped(SkipReason),
}

/// Outcome of ingesting one upload/update event
#[derive(Debug)]
pub enum IngestOutcome {
    /// Image path: converted synchronously within the triggering call
    Image(ConversionOutcome),
    /// Video path: deferred to the async queue; false when an identical
    /// job was already pending
    VideoScheduled(bool),
    /// Nothing to do for this asset
    Skipped(SkipReason),
}

/// Shared pipeline state: immutable capabilities, converters and ledgers
pub struct PipelineCore {
    config: Config,
    library: MediaLibrary,
    image_capability: Option<ProcessorCapability>,
    video_capability: Option<ProcessorCapability>,
    image_converter: ImageConverter,
    video_converter: VideoConverter,
    quota: QuotaManager,
    tracker: ConversionTracker,
}

impl PipelineCore {
    /// Probe capabilities once and open the ledgers for this library
    pub async fn new(library: MediaLibrary, config: Config) -> Result<Self> {
        config.validate()?;

        let image_capability = probe::detect_image_processor(&config.image_formats).await;
        let video_capability = probe::detect_video_processor(&config.video_formats).await;
        probe::log_capability_report(&image_capability, &video_capability);

        let quota = QuotaManager::open(library.root(), &config)?;
        let tracker = ConversionTracker::open(library.root(), &config)?;

        Ok(Self {
            image_converter: ImageConverter::new(image_capability.clone(), config.clone()),
            video_converter: VideoConverter::new(video_capability.clone(), config.clone()),
            config,
            library,
            image_capability,
            video_capability,
            quota,
            tracker,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn library(&self) -> &MediaLibrary {
        &self.library
    }

    pub fn tracker(&self) -> &ConversionTracker {
        &self.tracker
    }

    pub fn quota(&self) -> &QuotaManager {
        &self.quota
    }

    pub fn statistics(&self, filter: &StatsFilter) -> ConversionStatistics {
        self.tracker.get_statistics(filter)
    }

    /// The format set actually worth attempting for a media class:
    /// enabled formats intersected with the probed capability, reduced to
    /// the legacy-friendly primary when hybrid mode is off
    pub fn effective_formats(&self, media_type: MediaType) -> Vec<MediaFormat> {
        let capability = match media_type {
            MediaType::Image => &self.image_capability,
            MediaType::Video => &self.video_capability,
        };

        select_effective_formats(
            self.config.enabled_formats(media_type),
            capability.as_ref(),
            self.config.hybrid,
            media_type,
        )
    }

    /// Run the full gated conversion for one asset.
    ///
    /// Used by the synchronous image path, the video queue workers and the
    /// backfill sweep. Only structurally invalid calls error; everything
    /// else is an outcome.
    pub async fn convert_asset(&self, asset_id: AssetId) -> Result<ConversionOutcome> {
        let asset = self
            .library
            .get(asset_id)
            .ok_or_else(|| ConvertError::State(format!("unknown asset {}", asset_id)))?;

        let media_type = match asset.media_type() {
            Some(mt) => mt,
            None => return Ok(ConversionOutcome::Skipped(SkipReason::UnsupportedType)),
        };

        let source = self.library.absolute_path(asset);

        if media_type == MediaType::Image
            && asset.mime_type == "image/gif"
            && self.config.skip_animated
            && animation::is_animated(&source)
        {
            debug!("Skipping animated GIF {}", source.display());
            return Ok(ConversionOutcome::Skipped(SkipReason::AnimatedGif));
        }

        let formats = self.effective_formats(media_type);
        if formats.is_empty() {
            return Ok(ConversionOutcome::Skipped(SkipReason::NoProcessor));
        }

        // Dedup against the conversion ledger: only missing formats are
        // attempted, a fully covered asset costs nothing
        let remaining: Vec<MediaFormat> = formats
            .into_iter()
            .filter(|f| !self.tracker.has_conversion(asset_id, *f))
            .collect();
        if remaining.is_empty() {
            return Ok(ConversionOutcome::Skipped(SkipReason::AlreadyConverted));
        }

        // Admission control strictly before any work: a denied asset is
        // skipped entirely, no partial attempt
        if !self.quota.can_convert(media_type) {
            info!("Quota exceeded for {}, skipping asset {}", media_type, asset_id);
            return Ok(ConversionOutcome::Skipped(SkipReason::QuotaExceeded));
        }

        let destinations = ConvertedFileSet::for_source(&source, &remaining);
        let result = match media_type {
            MediaType::Image => self.image_converter.process(&source, &destinations).await?,
            MediaType::Video => self.video_converter.process(&source, &destinations).await?,
        };

        self.record_artifacts(asset_id, media_type, &source, &result).await?;

        Ok(ConversionOutcome::Converted(result))
    }

    /// Persist bookkeeping for every produced artifact: one ledger upsert
    /// and one quota increment per converted format output
    async fn record_artifacts(
        &self,
        asset_id: AssetId,
        media_type: MediaType,
        source: &Path,
        result: &ConversionResult,
    ) -> Result<()> {
        if result.converted_formats.is_empty() {
            return Ok(());
        }

        let original_size = tokio::fs::metadata(source).await?.len();

        for format in &result.converted_formats {
            let converted_size = match result.converted_files.get(*format) {
                Some(dest) => tokio::fs::metadata(dest).await?.len(),
                None => 0,
            };

            self.tracker
                .record_conversion(asset_id, *format, original_size, converted_size)?;
            self.quota.record_usage(media_type)?;
        }

        info!(
            "Converted asset {} to {:?} ({} artifact(s))",
            asset_id,
            result.converted_formats,
            result.converted_formats.len()
        );
        Ok(())
    }

    /// Cleanup hook for assets removed by the host: drops conversion
    /// records and deletes the derived artifacts
    pub fn cleanup_removed_asset(&self, asset: &MediaAsset) -> Result<()> {
        let source = self.library.root().join(&asset.relative_path);
        let removed = self.tracker.delete_attachment_conversions(asset.id, &source)?;
        if !removed.is_empty() {
            info!(
                "Cleaned up {} conversion(s) for removed asset {}",
                removed.len(),
                asset.id
            );
        }
        Ok(())
    }
}

/// Pure selection over the probed capability: the requested formats the
/// backend can actually produce, truncated to the primary without hybrid
fn select_effective_formats(
    enabled: &[MediaFormat],
    capability: Option<&ProcessorCapability>,
    hybrid: bool,
    media_type: MediaType,
) -> Vec<MediaFormat> {
    let capability = match capability {
        Some(c) => c,
        None => return Vec::new(),
    };

    let mut formats: Vec<MediaFormat> = enabled
        .iter()
        .copied()
        .filter(|f| capability.supports(*f))
        .collect();

    if !hybrid && formats.len() > 1 {
        let primary = match media_type {
            MediaType::Image => IMAGE_PRIMARY,
            MediaType::Video => VIDEO_PRIMARY,
        };
        let keep = if formats.contains(&primary) {
            primary
        } else {
            formats[0]
        };
        formats = vec![keep];
    }

    formats
}

/// The pipeline entry point tying the synchronous image path and the
/// deferred video queue together
pub struct MediaPipeline {
    core: Arc<PipelineCore>,
    video_queue: VideoQueue,
}

impl MediaPipeline {
    pub async fn new(library: MediaLibrary, config: Config) -> Result<Self> {
        let video_workers = config.video_workers;
        let core = Arc::new(PipelineCore::new(library, config).await?);
        let video_queue = VideoQueue::spawn(core.clone(), video_workers);

        Ok(Self { core, video_queue })
    }

    pub fn core(&self) -> &Arc<PipelineCore> {
        &self.core
    }

    /// Handle one upload/update event.
    ///
    /// Images convert synchronously because they are fast and must be
    /// visible immediately in delivered content; videos are deferred to the
    /// async queue because encoding is long-running and must not block the
    /// triggering request.
    pub async fn ingest(&self, asset_id: AssetId) -> Result<IngestOutcome> {
        let asset = self
            .core
            .library
            .get(asset_id)
            .ok_or_else(|| ConvertError::State(format!("unknown asset {}", asset_id)))?;

        match asset.media_type() {
            Some(MediaType::Image) => {
                let outcome = self.core.convert_asset(asset_id).await?;
                Ok(IngestOutcome::Image(outcome))
            }
            Some(MediaType::Video) => {
                let source = self.core.library.absolute_path(asset);
                let enqueued = self.video_queue.enqueue(asset_id, source);
                if !enqueued {
                    debug!("Video job for asset {} already pending", asset_id);
                }
                Ok(IngestOutcome::VideoScheduled(enqueued))
            }
            None => Ok(IngestOutcome::Skipped(SkipReason::UnsupportedType)),
        }
    }

    /// Close the video queue and wait for the in-flight jobs to finish
    pub async fn shutdown(self) -> Result<()> {
        self.video_queue.drain().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::fs;

    async fn pipeline_fixture(files: &[&str]) -> (TempDir, TempDir, MediaPipeline) {
        let root = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();

        for file in files {
            let path = root.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).await.unwrap();
            fs::write(&path, b"data").await.unwrap();
        }

        let mut library = MediaLibrary::open(root.path(), "https://x/u", Some(state.path()))
            .await
            .unwrap();
        library.scan().await.unwrap();

        let config = Config {
            state_dir: Some(state.path().to_path_buf()),
            ..Default::default()
        };
        let pipeline = MediaPipeline::new(library, config).await.unwrap();

        (root, state, pipeline)
    }

    #[tokio::test]
    async fn test_unknown_asset_errors() {
        let (_root, _state, pipeline) = pipeline_fixture(&[]).await;
        assert!(pipeline.core().convert_asset(AssetId(999)).await.is_err());
    }

    #[tokio::test]
    async fn test_image_without_processor_skips() {
        // In an environment without magick/cwebp the probe yields no
        // capability and the coordinator reports NoProcessor; with encoders
        // installed the conversion path is exercised instead. Either way no
        // error escapes.
        let (_root, _state, pipeline) = pipeline_fixture(&["img.jpg"]).await;
        let id = pipeline.core().library().asset_ids()[0];

        let outcome = pipeline.core().convert_asset(id).await.unwrap();
        match outcome {
            ConversionOutcome::Skipped(SkipReason::NoProcessor)
            | ConversionOutcome::Converted(_) => {}
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_video_ingest_defers_and_dedups() {
        let (_root, _state, pipeline) = pipeline_fixture(&["clip.mp4"]).await;
        let id = pipeline.core().library().asset_ids()[0];

        let first = pipeline.ingest(id).await.unwrap();
        assert!(matches!(first, IngestOutcome::VideoScheduled(true)));

        // The same (asset, source-path) pair is not enqueued twice while
        // still pending; with no worker stall this may race, so only the
        // type of the outcome is asserted
        let second = pipeline.ingest(id).await.unwrap();
        assert!(matches!(second, IngestOutcome::VideoScheduled(_)));

        pipeline.shutdown().await.unwrap();
    }

    #[test]
    fn test_select_effective_formats() {
        use crate::probe::ProcessorKind;
        use std::collections::BTreeSet;

        let capability = ProcessorCapability {
            kind: ProcessorKind::Magick,
            supported_formats: BTreeSet::from([MediaFormat::Webp, MediaFormat::Avif]),
            version: "7.1".to_string(),
        };
        let enabled = [MediaFormat::Webp, MediaFormat::Avif];

        // Hybrid: both formats attempted in one logical operation
        assert_eq!(
            select_effective_formats(&enabled, Some(&capability), true, MediaType::Image),
            vec![MediaFormat::Webp, MediaFormat::Avif]
        );

        // Hybrid off: only the legacy-friendly primary
        assert_eq!(
            select_effective_formats(&enabled, Some(&capability), false, MediaType::Image),
            vec![MediaFormat::Webp]
        );

        // Capability intersection drops unsupported formats
        let webp_only = ProcessorCapability {
            kind: ProcessorKind::Cwebp,
            supported_formats: BTreeSet::from([MediaFormat::Webp]),
            version: "1.2".to_string(),
        };
        assert_eq!(
            select_effective_formats(&enabled, Some(&webp_only), true, MediaType::Image),
            vec![MediaFormat::Webp]
        );

        // Absent capability means nothing to attempt
        assert!(select_effective_formats(&enabled, None, true, MediaType::Image).is_empty());
    }
}
