use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Shown to the user when no image could be produced.
pub const IMAGE_ERROR_TEXT: &str =
    "Failed to generate image. Try a different prompt or check safety settings.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub id: String,
    pub prompt: String,
    pub data_uri: String,
    pub created_at: DateTime<Utc>,
}

impl GeneratedImage {
    pub fn from_bytes(prompt: impl Into<String>, mime_type: &str, bytes: &[u8]) -> Self {
        Self::from_data_uri(prompt, encode_data_uri(mime_type, bytes))
    }

    pub fn from_data_uri(prompt: impl Into<String>, data_uri: String) -> Self {
        let created_at = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{}-{}", created_at.timestamp_millis(), &suffix[..8]),
            prompt: prompt.into(),
            data_uri,
            created_at,
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        let rest = self.data_uri.strip_prefix("data:")?;
        rest.split_once(";base64,").map(|(mime, _)| mime)
    }

    pub fn download_name(&self) -> String {
        let ext = match self.mime_type() {
            Some("image/jpeg") => "jpg",
            Some("image/webp") => "webp",
            _ => "png",
        };
        format!("stellar-ai-{}.{ext}", self.id)
    }

    /// Writes the decoded image into `dir` under [`Self::download_name`].
    pub fn save_to(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        let (_, bytes) = decode_data_uri(&self.data_uri)?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(self.download_name());
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

pub fn encode_data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{mime_type};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

pub fn decode_data_uri(uri: &str) -> anyhow::Result<(String, Vec<u8>)> {
    let Some(rest) = uri.strip_prefix("data:") else {
        bail!("not a data URI");
    };
    let Some((mime, encoded)) = rest.split_once(";base64,") else {
        bail!("data URI is not base64 encoded");
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .context("invalid base64 in data URI")?;
    Ok((mime.to_string(), bytes))
}

/// Session image gallery, newest first.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    images: Vec<GeneratedImage>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepend(&mut self, image: GeneratedImage) {
        self.images.insert(0, image);
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeneratedImage> {
        self.images.iter()
    }

    pub fn get(&self, id: &str) -> Option<&GeneratedImage> {
        self.images.iter().find(|image| image.id == id)
    }

    pub fn latest(&self) -> Option<&GeneratedImage> {
        self.images.first()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_data_uri, encode_data_uri, Gallery, GeneratedImage};

    #[test]
    fn data_uri_keeps_mime_and_bytes() -> anyhow::Result<()> {
        let uri = encode_data_uri("image/png", b"\x89PNG");
        assert!(uri.starts_with("data:image/png;base64,"));
        let (mime, bytes) = decode_data_uri(&uri)?;
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, b"\x89PNG");
        Ok(())
    }

    #[test]
    fn malformed_data_uris_are_rejected() {
        assert!(decode_data_uri("https://example.com/cat.png").is_err());
        assert!(decode_data_uri("data:image/png,rawbytes").is_err());
        assert!(decode_data_uri("data:image/png;base64,***").is_err());
    }

    #[test]
    fn gallery_is_newest_first() {
        let mut gallery = Gallery::new();
        let first = GeneratedImage::from_bytes("a red fox", "image/png", b"one");
        let second = GeneratedImage::from_bytes("a blue fox", "image/png", b"two");
        let second_id = second.id.clone();
        gallery.prepend(first);
        gallery.prepend(second);

        assert_eq!(gallery.len(), 2);
        let prompts: Vec<&str> = gallery.iter().map(|image| image.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["a blue fox", "a red fox"]);
        assert_eq!(
            gallery.latest().map(|image| image.id.as_str()),
            Some(second_id.as_str())
        );
        assert!(gallery.get(&second_id).is_some());
        assert!(gallery.get("missing").is_none());
    }

    #[test]
    fn download_name_follows_mime() {
        let png = GeneratedImage::from_bytes("x", "image/png", b"x");
        assert_eq!(png.download_name(), format!("stellar-ai-{}.png", png.id));
        let jpeg = GeneratedImage::from_bytes("x", "image/jpeg", b"x");
        assert!(jpeg.download_name().ends_with(".jpg"));
    }

    #[test]
    fn save_to_writes_decoded_bytes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image = GeneratedImage::from_bytes("lighthouse", "image/png", b"pixels");
        let path = image.save_to(&temp.path().join("downloads"))?;
        assert_eq!(std::fs::read(&path)?, b"pixels");
        assert_eq!(
            path.file_name().and_then(|name| name.to_str()),
            Some(image.download_name().as_str())
        );
        Ok(())
    }
}
