//! # Content Rewriting Module
//!
//! Al momento della delivery trasforma un riferimento media single-format
//! (tag o URL) in una struttura multi-formato con fallback ordinato, senza
//! perdere nessun attributo dell'originale.
//!
//! ## Responsabilità:
//! - Wrapping dei tag `<img>` in `<picture>` con un `<source>` per ogni
//!   formato moderno disponibile (AVIF prima di WebP prima dell'originale)
//! - Riscrittura dei tag `<video>` con `<source>` ordinati (AV1 prima di
//!   WebM prima dell'URL originale)
//! - Derivazione srcset: per ogni candidato width-indexed dell'originale
//!   sostituisce l'estensione del formato e conferma l'esistenza su disco
//!   del file convertito; un width mancante viene scartato solo dalla lista
//!   di quel candidato, mai dall'immagine intera
//! - Riscrittura di interi documenti HTML risolvendo ogni riferimento
//!   tramite l'AttachmentResolver
//!
//! ## Invarianti:
//! - Set di file convertiti vuoto -> riferimento ritornato identico (no-op)
//! - L'elemento originale resta l'ultimo fallback, byte-per-byte intatto
//!   (per i `<video>` il solo attributo `src` migra nell'ultimo `<source>`,
//!   requisito strutturale della negoziazione via source children)
//!
//! Gli attributi vengono estratti via regex su attributi double-quoted;
//! il markup originale non viene mai riscritto, solo avvolto.

use crate::formats::{
    self, ConvertedFileSet, MediaFormat, MediaType, IMAGE_FALLBACK_ORDER, VIDEO_FALLBACK_ORDER,
};
use crate::library::MediaLibrary;
use crate::resolver::AttachmentResolver;
use crate::tracker::ConversionTracker;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

fn src_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?:^|\s)src\s*=\s*"([^"]+)""#).unwrap())
}

fn srcset_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?:^|\s)srcset\s*=\s*"([^"]+)""#).unwrap())
}

fn sizes_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?:^|\s)sizes\s*=\s*"([^"]+)""#).unwrap())
}

fn img_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<img\b[^>]*/?>").unwrap())
}

fn video_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<video\b[^>]*>.*?</video>").unwrap())
}

fn video_open_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<video\b[^>]*>").unwrap())
}

fn src_attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(^|\s)src\s*=\s*"[^"]*""#).unwrap())
}

/// One width-indexed srcset candidate
#[derive(Debug, Clone, PartialEq, Eq)]
struct SrcsetCandidate {
    url: String,
    descriptor: Option<String>,
}

/// Rewrites media references into fallback-ordered multi-format markup
pub struct ContentRewriter<'a> {
    library: &'a MediaLibrary,
    tracker: &'a ConversionTracker,
}

impl<'a> ContentRewriter<'a> {
    pub fn new(library: &'a MediaLibrary, tracker: &'a ConversionTracker) -> Self {
        Self { library, tracker }
    }

    /// Rewrite a single media reference (tag or URL).
    ///
    /// With an empty converted set the reference is returned unmodified -
    /// failure to optimize degrades delivery to the original, never to a
    /// broken reference.
    pub fn render(&self, reference: &str, converted: &ConvertedFileSet) -> String {
        let trimmed = reference.trim_start();
        if trimmed.starts_with("<img") {
            self.render_image(reference, converted)
        } else if trimmed.starts_with("<video") {
            self.render_video(reference, converted)
        } else {
            self.best_url(reference, converted)
        }
    }

    /// Wrap an `<img>` tag into a `<picture>` fallback chain.
    ///
    /// The original tag is kept as the last, most-compatible fallback with
    /// every attribute intact; one `<source>` per available modern format
    /// precedes it, most modern first.
    pub fn render_image(&self, original_tag: &str, converted: &ConvertedFileSet) -> String {
        if converted.is_empty() {
            return original_tag.to_string();
        }

        let src = match extract_attr(src_regex(), original_tag) {
            Some(src) => src,
            None => return original_tag.to_string(),
        };
        let srcset = extract_attr(srcset_regex(), original_tag);
        let sizes = extract_attr(sizes_regex(), original_tag);

        let mut sources = String::new();
        for format in IMAGE_FALLBACK_ORDER {
            if !converted.contains(format) {
                continue;
            }

            let candidate_list = self.candidate_list(&src, srcset.as_deref(), format);
            sources.push_str(&format!(
                "<source type=\"{}\" srcset=\"{}\"{}>",
                format.mime_type(),
                candidate_list,
                sizes
                    .as_deref()
                    .map(|s| format!(" sizes=\"{}\"", s))
                    .unwrap_or_default()
            ));
        }

        if sources.is_empty() {
            return original_tag.to_string();
        }

        format!("<picture>{}{}</picture>", sources, original_tag)
    }

    /// Rewrite a `<video>` tag with ordered `<source>` children.
    ///
    /// Every attribute of the original element is preserved on the
    /// container; the original URL becomes the final, most-compatible
    /// source entry.
    pub fn render_video(&self, original_tag: &str, converted: &ConvertedFileSet) -> String {
        if converted.is_empty() {
            return original_tag.to_string();
        }

        let open_tag = match video_open_regex().find(original_tag) {
            Some(m) => m.as_str().to_string(),
            None => return original_tag.to_string(),
        };
        let src = extract_attr(src_regex(), &open_tag);

        let mut sources = String::new();
        if let Some(ref src) = src {
            for format in VIDEO_FALLBACK_ORDER {
                if !converted.contains(format) {
                    continue;
                }
                sources.push_str(&format!(
                    "<source src=\"{}\" type=\"{}\">",
                    swap_url_extension(src, format.extension()),
                    format.mime_type()
                ));
            }

            if sources.is_empty() {
                return original_tag.to_string();
            }

            // The original reference becomes the last fallback source; its
            // URL has to move off the container for source children to be
            // negotiated at all
            let original_mime = formats::source_mime_type(Path::new(url_path(src)))
                .unwrap_or("video/mp4");
            sources.push_str(&format!(
                "<source src=\"{}\" type=\"{}\">",
                src, original_mime
            ));

            let container = src_attr_regex().replace(&open_tag, "$1").to_string();
            let rest = &original_tag[open_tag.len()..];
            format!("{}{}{}", container, sources, rest)
        } else {
            // Source-children style tag: our candidates go ahead of the
            // existing children, the tag itself is untouched
            let first_child_src = video_tag_regex()
                .find(original_tag)
                .and_then(|m| extract_attr(src_regex(), &m.as_str()[open_tag.len()..]));
            let src = match first_child_src {
                Some(src) => src,
                None => return original_tag.to_string(),
            };

            for format in VIDEO_FALLBACK_ORDER {
                if !converted.contains(format) {
                    continue;
                }
                sources.push_str(&format!(
                    "<source src=\"{}\" type=\"{}\">",
                    swap_url_extension(&src, format.extension()),
                    format.mime_type()
                ));
            }

            if sources.is_empty() {
                return original_tag.to_string();
            }

            let rest = &original_tag[open_tag.len()..];
            format!("{}{}{}", open_tag, sources, rest)
        }
    }

    /// Best delivery URL for a bare URL reference: the most modern converted
    /// format when available, the original otherwise
    pub fn best_url(&self, original_url: &str, converted: &ConvertedFileSet) -> String {
        let media_type = formats::source_media_type(Path::new(url_path(original_url)))
            .unwrap_or(MediaType::Image);

        for format in MediaFormat::for_media_type(media_type) {
            if converted.contains(*format) {
                return swap_url_extension(original_url, format.extension());
            }
        }

        original_url.to_string()
    }

    /// Rewrite every resolvable `<img>` and `<video>` reference in a
    /// document. References that do not resolve to a tracked asset are left
    /// untouched.
    pub fn rewrite_document(&self, html: &str) -> String {
        let resolver = AttachmentResolver::new(self.library);

        let html = img_tag_regex().replace_all(html, |caps: &regex::Captures<'_>| {
            let tag = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            self.rewrite_tag(&resolver, tag)
        });

        video_tag_regex()
            .replace_all(&html, |caps: &regex::Captures<'_>| {
                let tag = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
                self.rewrite_tag(&resolver, tag)
            })
            .to_string()
    }

    fn rewrite_tag(&self, resolver: &AttachmentResolver<'_>, tag: &str) -> String {
        let src = match extract_attr(src_regex(), tag) {
            Some(src) => src,
            None => return tag.to_string(),
        };

        let asset_id = match resolver.resolve(&src) {
            Some(id) => id,
            None => return tag.to_string(),
        };

        let asset = match self.library.get(asset_id) {
            Some(asset) => asset,
            None => return tag.to_string(),
        };

        let source_path = self.library.absolute_path(asset);
        let converted = self.tracker.converted_files(asset_id, &source_path);
        if converted.is_empty() {
            return tag.to_string();
        }

        debug!("Rewriting reference to asset {} ({})", asset_id, src);
        self.render(tag, &converted)
    }

    /// Build the srcset-equivalent candidate list for one modern format.
    ///
    /// Each original width-indexed candidate URL gets the format extension
    /// substituted in; a width whose converted sibling is missing on disk is
    /// dropped from this list only. When no width survives, the primary
    /// converted URL (whose existence the conversion record guarantees) is
    /// used instead.
    fn candidate_list(&self, src: &str, srcset: Option<&str>, format: MediaFormat) -> String {
        if let Some(srcset) = srcset {
            let surviving: Vec<String> = parse_srcset(srcset)
                .into_iter()
                .filter_map(|candidate| {
                    let swapped = swap_url_extension(&candidate.url, format.extension());
                    if !self.exists_on_disk(&swapped) {
                        debug!("Dropping srcset candidate without {} sibling: {}", format, candidate.url);
                        return None;
                    }
                    Some(match candidate.descriptor {
                        Some(d) => format!("{} {}", swapped, d),
                        None => swapped,
                    })
                })
                .collect();

            if !surviving.is_empty() {
                return surviving.join(", ");
            }
        }

        swap_url_extension(src, format.extension())
    }

    /// Confirm a candidate delivery URL has a backing file on disk.
    /// URLs that cannot be mapped under the library root are unverifiable
    /// and treated as missing.
    fn exists_on_disk(&self, url: &str) -> bool {
        match self.library.url_to_relative(url_path(url)) {
            Some(relative) => self.library.root().join(relative).exists(),
            None => false,
        }
    }
}

fn extract_attr(re: &Regex, tag: &str) -> Option<String> {
    re.captures(tag)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// URL without its query suffix
fn url_path(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Substitute the file extension in a URL, preserving any query suffix
fn swap_url_extension(url: &str, extension: &str) -> String {
    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (url, None),
    };

    let swapped = match path.rfind('.') {
        Some(dot) if dot > path.rfind('/').map(|s| s + 1).unwrap_or(0) => {
            format!("{}.{}", &path[..dot], extension)
        }
        _ => format!("{}.{}", path, extension),
    };

    match query {
        Some(query) => format!("{}?{}", swapped, query),
        None => swapped,
    }
}

/// Parse a srcset attribute into (url, descriptor) candidates
fn parse_srcset(srcset: &str) -> Vec<SrcsetCandidate> {
    srcset
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split_whitespace();
            let url = parts.next()?.to_string();
            let descriptor = parts.next().map(|d| d.to_string());
            Some(SrcsetCandidate { url, descriptor })
        })
        .collect()
}
