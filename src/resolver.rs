//! # Attachment Resolution Module
//!
//! Dato un input arbitrario (URL assoluto, URL CDN o path filesystem locale),
//! recupera l'identità logica dell'asset a cui corrisponde.
//!
//! ## Strategia di risoluzione:
//! - Input con prefisso `http(s)://` -> percorso URL:
//!   1. Mapping canonico URL -> id della libreria
//!   2. Lookup derivato: converte il suffisso path dell'URL nel path di
//!      storage relativo e lo confronta con i metadata per-asset
//!   3. Lookup CDN: scan dei metadata externally-rewritten-URL per match
//!      esatto
//! - Altrimenti -> percorso file: rimuove la base directory nota e confronta
//!   il path relativo rimanente
//!
//! Ritorna `None`, mai errore, se nessuno stadio trova un match: l'assenza
//! di mapping è attesa per i file che non sono asset.

use crate::library::{AssetId, MediaLibrary};
use std::path::Path;
use tracing::debug;

/// Maps arbitrary URLs and paths back to asset identities
pub struct AttachmentResolver<'a> {
    library: &'a MediaLibrary,
}

impl<'a> AttachmentResolver<'a> {
    pub fn new(library: &'a MediaLibrary) -> Self {
        Self { library }
    }

    /// Recover the asset id an arbitrary string corresponds to.
    ///
    /// Dispatches by prefix: `http(s)://` goes through URL resolution,
    /// anything else through file-path resolution. Absence of a mapping is
    /// a normal outcome, not an error.
    pub fn resolve(&self, input: &str) -> Option<AssetId> {
        if input.starts_with("http://") || input.starts_with("https://") {
            self.resolve_url(input)
        } else {
            self.resolve_path(Path::new(input))
        }
    }

    fn resolve_url(&self, url: &str) -> Option<AssetId> {
        // Stage 1: canonical URL -> id mapping
        if let Some(id) = self.library.find_by_url(url) {
            debug!("Resolved {} via canonical URL mapping", url);
            return Some(id);
        }

        // Stage 2: derived-path lookup against the known upload root
        if let Some(relative) = self.library.url_to_relative(url) {
            if let Some(id) = self.library.find_by_relative_path(&relative) {
                debug!("Resolved {} via derived path {}", url, relative.display());
                return Some(id);
            }
        }

        // Stage 3: CDN exact match over externally-rewritten URLs
        if let Some(id) = self.library.find_by_cdn_url(url) {
            debug!("Resolved {} via CDN URL metadata", url);
            return Some(id);
        }

        None
    }

    fn resolve_path(&self, path: &Path) -> Option<AssetId> {
        let relative = if path.is_absolute() {
            self.library.path_to_relative(path)?
        } else {
            path.to_path_buf()
        };

        self.library.find_by_relative_path(&relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::fs;

    async fn fixture() -> (TempDir, TempDir, MediaLibrary) {
        let root = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();

        let file_path = root.path().join("2024/01/img.jpg");
        fs::create_dir_all(file_path.parent().unwrap()).await.unwrap();
        fs::write(&file_path, b"jpeg").await.unwrap();

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
    async fn test_url_and_path_resolve_to_same_asset() {
        let (root, _state, library) = fixture().await;
        let resolver = AttachmentResolver::new(&library);

        let by_url = resolver.resolve("https://x/wp-content/uploads/2024/01/img.jpg");
        let absolute = root.path().join("2024/01/img.jpg");
        let by_path = resolver.resolve(&absolute.to_string_lossy());

        assert!(by_url.is_some());
        assert_eq!(by_url, by_path);
    }

    #[tokio::test]
    async fn test_relative_path_resolution() {
        let (_root, _state, library) = fixture().await;
        let resolver = AttachmentResolver::new(&library);

        assert!(resolver.resolve("2024/01/img.jpg").is_some());
    }

    #[tokio::test]
    async fn test_unknown_inputs_return_none() {
        let (_root, _state, library) = fixture().await;
        let resolver = AttachmentResolver::new(&library);

        assert_eq!(resolver.resolve("https://elsewhere.example/img.jpg"), None);
        assert_eq!(resolver.resolve("https://x/wp-content/uploads/missing.jpg"), None);
        assert_eq!(resolver.resolve("/tmp/unrelated/file.jpg"), None);
        assert_eq!(resolver.resolve("not-an-asset.txt"), None);
    }

    #[tokio::test]
    async fn test_cdn_url_resolution() {
        let (_root, _state, mut library) = fixture().await;

        let id = library.asset_ids()[0];
        let cdn = "https://cdn.example/abc/img.jpg".to_string();
        library.set_cdn_url(id, Some(cdn.clone()));

        let resolver = AttachmentResolver::new(&library);
        assert_eq!(resolver.resolve(&cdn), Some(id));
    }
}
