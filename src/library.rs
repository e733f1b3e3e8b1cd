//! # Media Library Module
//!
//! Questo modulo è lo stand-in minimale del sistema host: l'indice degli
//! asset media con identità, path relativo e metadata di delivery.
//!
//! ## Responsabilità:
//! - Mappa `AssetId -> MediaAsset` (path relativo, MIME, dimensioni, CDN URL)
//! - Persiste l'indice in file JSON per libreria specifica
//! - Ingestione di nuovi file via scan ricorsiva (analogo CLI dell'upload)
//! - Conversioni URL <-> path relativo per resolver e rewriter
//! - Cleanup di entry per file che non esistono più
//!
//! ## Strategia di persistence:
//! - Un file JSON per libreria media (basato su hash del path root)
//! - Salvataggio in `~/.media-delivery/library_index_<hash>.json`
//!
//! ## Nota:
//! Gli asset sono read-only per il core della pipeline: questo modulo non
//! modifica mai i file sorgente, solo il proprio indice.

use crate::formats::{self, MediaType};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Opaque identity of a media asset in the host system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub u64);

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A media asset known to the host system.
///
/// Created on upload/scan, read-only to the conversion core; only derived
/// artifacts are ever deleted, never the asset itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAsset {
    pub id: AssetId,
    /// Storage path relative to the library root, e.g. `2024/01/img.jpg`
    pub relative_path: PathBuf,
    /// Declared MIME type
    pub mime_type: String,
    /// Pixel dimensions, when known (images only)
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Externally rewritten delivery URL, when a CDN fronts this asset
    pub cdn_url: Option<String>,
}

impl MediaAsset {
    /// Media class of this asset, if its source format is supported
    pub fn media_type(&self) -> Option<MediaType> {
        formats::source_media_type(&self.relative_path)
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct LibraryIndex {
    next_id: u64,
    assets: HashMap<u64, MediaAsset>,
}

/// The asset index for one media library root
pub struct MediaLibrary {
    root: PathBuf,
    base_url: String,
    index_path: PathBuf,
    index: LibraryIndex,
}

impl MediaLibrary {
    /// Open (or create) the index for a library root.
    ///
    /// `base_url` is the public URL the root is served under, without a
    /// trailing slash (e.g. `https://x/wp-content/uploads`).
    pub async fn open(root: &Path, base_url: &str, state_dir: Option<&Path>) -> Result<Self> {
        let index_path = crate::utils::ledger_file_path(state_dir, root, "library_index")?;

        let index = if index_path.exists() {
            let content = fs::read_to_string(&index_path).await?;
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            LibraryIndex::default()
        };

        Ok(Self {
            root: root.to_path_buf(),
            base_url: base_url.trim_end_matches('/').to_string(),
            index_path,
            index,
        })
    }

    /// Save the current index to file
    pub async fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.index)?;
        fs::write(&self.index_path, content).await?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn get(&self, id: AssetId) -> Option<&MediaAsset> {
        self.index.assets.get(&id.0)
    }

    pub fn assets(&self) -> impl Iterator<Item = &MediaAsset> {
        self.index.assets.values()
    }

    /// All asset ids, sorted for deterministic sweep order
    pub fn asset_ids(&self) -> Vec<AssetId> {
        let mut ids: Vec<AssetId> = self.index.assets.values().map(|a| a.id).collect();
        ids.sort();
        ids
    }

    /// Absolute filesystem path of an asset's source file
    pub fn absolute_path(&self, asset: &MediaAsset) -> PathBuf {
        self.root.join(&asset.relative_path)
    }

    /// Canonical delivery URL of an asset
    pub fn url_for(&self, asset: &MediaAsset) -> String {
        format!(
            "{}/{}",
            self.base_url,
            asset.relative_path.to_string_lossy().replace('\\', "/")
        )
    }

    /// Convert an absolute URL under the base URL into a relative storage path
    pub fn url_to_relative(&self, url: &str) -> Option<PathBuf> {
        let rest = url.strip_prefix(&self.base_url)?;
        let rest = rest.strip_prefix('/')?;
        if rest.is_empty() {
            return None;
        }
        Some(PathBuf::from(rest))
    }

    /// Convert an absolute filesystem path under the root into a relative path
    pub fn path_to_relative(&self, path: &Path) -> Option<PathBuf> {
        path.strip_prefix(&self.root).ok().map(|p| p.to_path_buf())
    }

    pub fn find_by_relative_path(&self, relative: &Path) -> Option<AssetId> {
        self.index
            .assets
            .values()
            .find(|a| a.relative_path == relative)
            .map(|a| a.id)
    }

    pub fn find_by_url(&self, url: &str) -> Option<AssetId> {
        self.index
            .assets
            .values()
            .find(|a| self.url_for(a) == url)
            .map(|a| a.id)
    }

    /// Scan assets' externally-rewritten-URL metadata for an exact match
    pub fn find_by_cdn_url(&self, url: &str) -> Option<AssetId> {
        self.index
            .assets
            .values()
            .find(|a| a.cdn_url.as_deref() == Some(url))
            .map(|a| a.id)
    }

    /// Ingest new media files under the root, assigning fresh ids.
    ///
    /// This is the CLI analog of the host's upload event. Returns the ids of
    /// newly indexed assets.
    pub async fn scan(&mut self) -> Result<Vec<AssetId>> {
        let mut new_ids = Vec::new();

        for entry in WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if formats::source_media_type(path).is_none() {
                continue;
            }

            let relative = match self.path_to_relative(path) {
                Some(rel) => rel,
                None => continue,
            };

            if self.find_by_relative_path(&relative).is_some() {
                continue;
            }

            let mime_type = formats::source_mime_type(path)
                .unwrap_or("application/octet-stream")
                .to_string();

            // Dimensions are read from the header only, no full decode
            let (width, height) = match image::image_dimensions(path) {
                Ok((w, h)) => (Some(w), Some(h)),
                Err(_) => (None, None),
            };

            let id = AssetId(self.index.next_id);
            self.index.next_id += 1;

            debug!("Indexed asset {}: {}", id, relative.display());
            self.index.assets.insert(
                id.0,
                MediaAsset {
                    id,
                    relative_path: relative,
                    mime_type,
                    width,
                    height,
                    cdn_url: None,
                },
            );
            new_ids.push(id);
        }

        if !new_ids.is_empty() {
            info!("Indexed {} new assets", new_ids.len());
            self.save().await?;
        }

        Ok(new_ids)
    }

    /// Attach an externally-rewritten (CDN) delivery URL to an asset
    pub fn set_cdn_url(&mut self, id: AssetId, url: Option<String>) {
        if let Some(asset) = self.index.assets.get_mut(&id.0) {
            asset.cdn_url = url;
        }
    }

    /// Remove index entries whose source file no longer exists.
    ///
    /// Returns the removed assets so the caller can clean up their derived
    /// conversion records and artifacts.
    pub async fn prune_missing(&mut self) -> Result<Vec<MediaAsset>> {
        let mut removed = Vec::new();

        let missing: Vec<u64> = self
            .index
            .assets
            .values()
            .filter(|a| !self.root.join(&a.relative_path).exists())
            .map(|a| a.id.0)
            .collect();

        for key in missing {
            if let Some(asset) = self.index.assets.remove(&key) {
                removed.push(asset);
            }
        }

        if !removed.is_empty() {
            self.save().await?;
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn library_with_file(rel: &str) -> (TempDir, TempDir, MediaLibrary) {
        let root = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();

        let file_path = root.path().join(rel);
        fs::create_dir_all(file_path.parent().unwrap()).await.unwrap();
        fs::write(&file_path, b"fake image data").await.unwrap();

        let mut library = MediaLibrary::open(
            root.path(),
            "https://x/wp-content/uploads",
            Some(state.path()),
        )
        .await
        .unwrap();
        library.scan().await.unwrap();

        (root, state, library)
    }

    #[tokio::test]
    async fn test_scan_assigns_ids_once() {
        let (_root, _state, mut library) = library_with_file("2024/01/img.jpg").await;

        assert_eq!(library.asset_ids().len(), 1);

        // A second scan must not duplicate the asset
        let new = library.scan().await.unwrap();
        assert!(new.is_empty());
        assert_eq!(library.asset_ids().len(), 1);
    }

    #[tokio::test]
    async fn test_url_round_trip() {
        let (_root, _state, library) = library_with_file("2024/01/img.jpg").await;

        let id = library.find_by_relative_path(Path::new("2024/01/img.jpg")).unwrap();
        let asset = library.get(id).unwrap();

        let url = library.url_for(asset);
        assert_eq!(url, "https://x/wp-content/uploads/2024/01/img.jpg");
        assert_eq!(
            library.url_to_relative(&url).unwrap(),
            PathBuf::from("2024/01/img.jpg")
        );
        assert_eq!(library.find_by_url(&url), Some(id));
    }

    #[tokio::test]
    async fn test_index_persists_across_reopen() {
        let (root, state, library) = library_with_file("a.png").await;
        let id = library.asset_ids()[0];
        drop(library);

        let reopened = MediaLibrary::open(root.path(), "https://x/u", Some(state.path()))
            .await
            .unwrap();
        assert_eq!(reopened.asset_ids(), vec![id]);
    }

    #[tokio::test]
    async fn test_prune_missing() {
        let (root, _state, mut library) = library_with_file("gone.jpg").await;
        let id = library.asset_ids()[0];

        fs::remove_file(root.path().join("gone.jpg")).await.unwrap();
        let removed = library.prune_missing().await.unwrap();

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, id);
        assert!(library.get(id).is_none());
    }

    #[tokio::test]
    async fn test_non_media_files_are_ignored() {
        let root = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        fs::write(root.path().join("notes.txt"), b"text").await.unwrap();

        let mut library = MediaLibrary::open(root.path(), "https://x/u", Some(state.path()))
            .await
            .unwrap();
        library.scan().await.unwrap();

        assert!(library.asset_ids().is_empty());
    }
}
