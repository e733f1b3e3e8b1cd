//! # Animation Detection Module
//!
//! Classifica un file raster come animato o statico, perché gli input animati
//! seguono un percorso di conversione diverso (o vengono saltati).
//!
//! ## Strategia:
//! 1. **Primaria**: decodifica via libreria `image` e conta i frame
//!    (più di uno = animato)
//! 2. **Fallback**: scansione binaria raw del file - verifica il magic
//!    `"GIF"` a inizio file, poi conta i byte image-separator `0x2C`;
//!    trovarne più di uno prova la presenza di frame multipli
//!
//! Un file che non è davvero una GIF (magic sbagliato) ritorna `false`
//! senza errore. Nessun side effect: è un puro predicato, la policy per le
//! GIF animate è del chiamante.

use image::codecs::gif::GifDecoder;
use image::AnimationDecoder;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

/// GIF image-separator byte that introduces each frame descriptor
const IMAGE_SEPARATOR: u8 = 0x2C;

/// Check whether a raster file is an animated GIF.
///
/// Never errors: decode failures fall back to the raw byte scan, and a file
/// that is not a GIF at all is simply reported as not animated.
pub fn is_animated(path: &Path) -> bool {
    match count_frames(path) {
        Ok(frames) => frames > 1,
        Err(e) => {
            debug!(
                "GIF decoder unavailable for {} ({}), falling back to byte scan",
                path.display(),
                e
            );
            scan_gif_bytes(path)
        }
    }
}

/// Count frames via the image library decoder, stopping at two -
/// knowing there is more than one frame is enough
fn count_frames(path: &Path) -> Result<usize, image::ImageError> {
    let file = File::open(path).map_err(image::ImageError::IoError)?;
    let decoder = GifDecoder::new(BufReader::new(file))?;

    let mut frames = 0;
    for frame in decoder.into_frames().take(2) {
        frame?;
        frames += 1;
    }

    Ok(frames)
}

/// Raw fallback scan: verify the 3-byte `GIF` magic, then count
/// image-separator bytes in the remainder of the stream
fn scan_gif_bytes(path: &Path) -> bool {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    if bytes.len() < 3 || &bytes[..3] != b"GIF" {
        return false;
    }

    let separators = bytes[3..]
        .iter()
        .filter(|&&b| b == IMAGE_SEPARATOR)
        .count();

    separators > 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn test_two_separators_is_animated() {
        let dir = TempDir::new().unwrap();
        // Not a decodable GIF, so the byte scan fallback kicks in
        let mut bytes = b"GIF89a".to_vec();
        bytes.extend_from_slice(&[0x00, 0x2C, 0x01, 0x02, 0x2C, 0x00]);
        let path = write_file(&dir, "two.gif", &bytes);

        assert!(is_animated(&path));
    }

    #[test]
    fn test_single_separator_is_static() {
        let dir = TempDir::new().unwrap();
        let mut bytes = b"GIF89a".to_vec();
        bytes.extend_from_slice(&[0x00, 0x2C, 0x01, 0x02, 0x00]);
        let path = write_file(&dir, "one.gif", &bytes);

        assert!(!is_animated(&path));
    }

    #[test]
    fn test_wrong_magic_returns_false() {
        let dir = TempDir::new().unwrap();
        let bytes = [0x89, b'P', b'N', b'G', 0x2C, 0x2C, 0x2C];
        let path = write_file(&dir, "not_a.gif", &bytes);

        assert!(!is_animated(&path));
    }

    #[test]
    fn test_missing_file_returns_false() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.gif");

        assert!(!is_animated(&path));
    }

    #[test]
    fn test_empty_file_returns_false() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "empty.gif", &[]);

        assert!(!is_animated(&path));
    }
}
