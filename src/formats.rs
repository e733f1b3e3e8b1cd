//! # Media Formats Module
//!
//! Questo modulo definisce l'insieme chiuso dei formati di conversione
//! e le convenzioni di naming dei file convertiti.
//!
//! ## Responsabilità:
//! - Definisce `MediaFormat` (webp, avif, av1, webm) e `MediaType` (image/video)
//! - Ordine di fallback per la delivery (più moderno prima)
//! - Convenzione di naming: `name.ext` convertito in formato F diventa `name.F`
//! - Riconoscimento dei formati sorgente supportati per classe di media
//!
//! ## Ordine di fallback:
//! - Immagini: AVIF, poi WebP, poi originale
//! - Video: AV1, poi WebM, poi originale
//!
//! ## Esempio:
//! ```rust
//! use media_delivery_optimizer::formats::{converted_sibling, MediaFormat};
//! use std::path::{Path, PathBuf};
//!
//! let dest = converted_sibling(Path::new("2024/01/img.jpg"), MediaFormat::Avif);
//! assert_eq!(dest, PathBuf::from("2024/01/img.avif"));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Media class a conversion target belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Image => write!(f, "image"),
            MediaType::Video => write!(f, "video"),
        }
    }
}

/// Closed set of conversion target formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    Webp,
    Avif,
    Av1,
    Webm,
}

/// Delivery fallback order for images, most modern first
pub const IMAGE_FALLBACK_ORDER: [MediaFormat; 2] = [MediaFormat::Avif, MediaFormat::Webp];

/// Delivery fallback order for videos, most modern first
pub const VIDEO_FALLBACK_ORDER: [MediaFormat; 2] = [MediaFormat::Av1, MediaFormat::Webm];

impl MediaFormat {
    /// File extension used for converted artifacts.
    ///
    /// The extension is the format name itself so the `name.F` sibling of an
    /// mp4 source never collides with the source file.
    pub fn extension(&self) -> &'static str {
        match self {
            MediaFormat::Webp => "webp",
            MediaFormat::Avif => "avif",
            MediaFormat::Av1 => "av1",
            MediaFormat::Webm => "webm",
        }
    }

    /// MIME type advertised in `<source type=...>` entries.
    ///
    /// AV1 artifacts carry an mp4 container, so that is the type consumers
    /// negotiate on.
    pub fn mime_type(&self) -> &'static str {
        match self {
            MediaFormat::Webp => "image/webp",
            MediaFormat::Avif => "image/avif",
            MediaFormat::Av1 => "video/mp4",
            MediaFormat::Webm => "video/webm",
        }
    }

    /// Media class this format belongs to
    pub fn media_type(&self) -> MediaType {
        match self {
            MediaFormat::Webp | MediaFormat::Avif => MediaType::Image,
            MediaFormat::Av1 | MediaFormat::Webm => MediaType::Video,
        }
    }

    /// All formats of a given media class, in fallback order
    pub fn for_media_type(media_type: MediaType) -> &'static [MediaFormat] {
        match media_type {
            MediaType::Image => &IMAGE_FALLBACK_ORDER,
            MediaType::Video => &VIDEO_FALLBACK_ORDER,
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaFormat::Webp => write!(f, "webp"),
            MediaFormat::Avif => write!(f, "avif"),
            MediaFormat::Av1 => write!(f, "av1"),
            MediaFormat::Webm => write!(f, "webm"),
        }
    }
}

impl FromStr for MediaFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "webp" => Ok(MediaFormat::Webp),
            "avif" => Ok(MediaFormat::Avif),
            "av1" => Ok(MediaFormat::Av1),
            "webm" => Ok(MediaFormat::Webm),
            _ => Err(format!("Unknown media format: {}", s)),
        }
    }
}

/// Path of the converted sibling artifact for a source file.
///
/// A converted artifact for source `name.ext` in format `F` is stored as
/// `name.F` alongside the source. The render-time srcset substitution
/// depends on this convention.
pub fn converted_sibling(source: &Path, format: MediaFormat) -> PathBuf {
    source.with_extension(format.extension())
}

/// Check if a source file extension is a supported image input
pub fn is_supported_image_source(path: &Path) -> bool {
    match lowercase_extension(path) {
        Some(ext) => matches!(ext.as_str(), "jpg" | "jpeg" | "png" | "gif"),
        None => false,
    }
}

/// Check if a source file extension is a supported video input
pub fn is_supported_video_source(path: &Path) -> bool {
    match lowercase_extension(path) {
        Some(ext) => matches!(ext.as_str(), "mp4" | "mov" | "avi" | "mkv"),
        None => false,
    }
}

/// Media class of a source file, if it is a supported input at all
pub fn source_media_type(path: &Path) -> Option<MediaType> {
    if is_supported_image_source(path) {
        Some(MediaType::Image)
    } else if is_supported_video_source(path) {
        Some(MediaType::Video)
    } else {
        None
    }
}

/// MIME type declared for a source file based on its extension
pub fn source_mime_type(path: &Path) -> Option<&'static str> {
    match lowercase_extension(path)?.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "mp4" => Some("video/mp4"),
        "mov" => Some("video/quicktime"),
        "avi" => Some("video/x-msvideo"),
        "mkv" => Some("video/x-matroska"),
        _ => None,
    }
}

/// Derived mapping of format -> destination file path for one asset.
///
/// A path appears here iff a conversion record names the (asset, format)
/// pair; the files are written by the conversion engines, read by the
/// content rewriter, and deleted only by the tracker cleanup path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertedFileSet {
    files: std::collections::BTreeMap<MediaFormat, PathBuf>,
}

impl ConvertedFileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the sibling destination set for a source file and target formats
    pub fn for_source(source: &Path, formats: &[MediaFormat]) -> Self {
        let mut set = Self::new();
        for format in formats {
            set.insert(*format, converted_sibling(source, *format));
        }
        set
    }

    pub fn insert(&mut self, format: MediaFormat, path: PathBuf) {
        self.files.insert(format, path);
    }

    pub fn get(&self, format: MediaFormat) -> Option<&PathBuf> {
        self.files.get(&format)
    }

    pub fn contains(&self, format: MediaFormat) -> bool {
        self.files.contains_key(&format)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn formats(&self) -> Vec<MediaFormat> {
        self.files.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MediaFormat, &PathBuf)> {
        self.files.iter()
    }
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}
