//! Output classification
//!
//! Execution results that name a file on the shared data volume are turned
//! into displayable payloads. Anything that cannot be displayed yields
//! `None`; classification never fails.

use super::render::{bundle, MimeBundle};
use crate::services::FileContent;
use base64::Engine;
use std::path::{Component, Path, PathBuf};

const JSON_EXTENSION: &str = "json";
const HTML_EXTENSION: &str = "html";

const INVALID_JSON_MESSAGE: &str = "Please check the file, it doesn't seem to be valid JSON.";

/// Image formats recognized by their leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
    Gif,
    Bmp,
    Webp,
    Tiff,
}

impl ImageKind {
    pub fn mime(&self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Gif => "image/gif",
            ImageKind::Bmp => "image/bmp",
            ImageKind::Webp => "image/webp",
            ImageKind::Tiff => "image/tiff",
        }
    }
}

/// Identify an image from its signature.
pub fn sniff_image(bytes: &[u8]) -> Option<ImageKind> {
    const SIGNATURES: &[(&[u8], ImageKind)] = &[
        (b"\x89PNG\r\n\x1a\n", ImageKind::Png),
        (b"\xff\xd8\xff", ImageKind::Jpeg),
        (b"GIF87a", ImageKind::Gif),
        (b"GIF89a", ImageKind::Gif),
        (b"II*\x00", ImageKind::Tiff),
        (b"MM\x00*", ImageKind::Tiff),
    ];

    if let Some((_, kind)) = SIGNATURES.iter().find(|(magic, _)| bytes.starts_with(magic)) {
        return Some(*kind);
    }

    // RIFF container: bytes 8..12 name the format
    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        return Some(ImageKind::Webp);
    }

    // `BM` alone is too weak; also require a plausible header size
    if bytes.len() >= 18 && bytes.starts_with(b"BM") {
        let header = u32::from_le_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]);
        if matches!(header, 12 | 40 | 52 | 56 | 64 | 108 | 124) {
            return Some(ImageKind::Bmp);
        }
    }

    None
}

fn image_bundle(kind: ImageKind, bytes: &[u8]) -> MimeBundle {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    bundle(kind.mime(), serde_json::Value::String(encoded))
}

/// Render a file variable fetched from the registry.
///
/// The registry's content type decides text; otherwise the bytes are
/// sniffed for an image.
pub fn render_file(file: &FileContent) -> Option<MimeBundle> {
    let essence = file
        .content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    if essence == "text/plain" {
        let text = String::from_utf8_lossy(&file.bytes).into_owned();
        return Some(bundle("text/plain", serde_json::Value::String(text)));
    }

    sniff_image(&file.bytes).map(|kind| image_bundle(kind, &file.bytes))
}

/// Maps execution outputs onto the local data volume and renders them
#[derive(Debug, Clone)]
pub struct Classifier {
    data_root: PathBuf,
    data_prefix: String,
}

impl Classifier {
    pub fn new(data_root: impl Into<PathBuf>, data_prefix: impl Into<String>) -> Self {
        Self {
            data_root: data_root.into(),
            data_prefix: data_prefix.into(),
        }
    }

    /// Local path of the file an output refers to, if it refers to one.
    ///
    /// Outputs arrive JSON-quoted (`"/data/result.json"`). Paths that try
    /// to leave the data volume are not resolved.
    pub fn resolve(&self, output: &str) -> Option<PathBuf> {
        let output = output.trim();
        let unquoted = output
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(output);

        let relative = Path::new(unquoted.strip_prefix(self.data_prefix.as_str())?);
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }

        Some(self.data_root.join(relative))
    }

    /// Classify an execution output. `None` means "nothing to display".
    pub async fn classify(&self, output: &str) -> Option<MimeBundle> {
        let path = self.resolve(output)?;
        if !tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false) {
            return None;
        }

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some(JSON_EXTENSION) => {
                let value = match tokio::fs::read(&path).await {
                    Ok(bytes) => serde_json::from_slice(&bytes)
                        .unwrap_or_else(|_| serde_json::json!({ "message": INVALID_JSON_MESSAGE })),
                    Err(e) => {
                        tracing::debug!(path = %path.display(), error = %e, "unreadable output file");
                        return None;
                    }
                };
                Some(bundle("application/json", value))
            }
            Some(HTML_EXTENSION) => {
                let bytes = tokio::fs::read(&path).await.ok()?;
                let html = String::from_utf8_lossy(&bytes).into_owned();
                Some(bundle("text/html", serde_json::Value::String(html)))
            }
            _ => {
                let bytes = tokio::fs::read(&path).await.ok()?;
                sniff_image(&bytes).map(|kind| image_bundle(kind, &bytes))
            }
        }
    }
}
