//! Image storage.
//!
//! Clients submit images inline as `data:<mime>;base64,<payload>` strings.
//! The blob store decodes them, writes the bytes under a fresh id and hands
//! back the public URL that is persisted on the message or group instead.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use huddle_shared::constants::INLINE_DATA_PREFIX;

use crate::error::ServerError;

/// Image types the store accepts, with the file extension they are saved under.
const KNOWN_TYPES: &[(&str, &str)] = &[
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/svg+xml", "svg"),
];

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(base)
        .unwrap_or(target)
        .components()
    {
        match component {
            std::path::Component::Normal(c) => resolved.push(c),
            std::path::Component::ParentDir => {
                return Err(ServerError::Validation("Path traversal detected".to_string()));
            }
            _ => {}
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ServerError::Validation("Path traversal detected".to_string()));
    }
    Ok(resolved)
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    base_path: PathBuf,
    max_size: usize,
    public_base_url: String,
}

impl BlobStore {
    pub async fn new(
        base_path: PathBuf,
        max_size: usize,
        public_base_url: impl Into<String>,
    ) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::Upstream(format!(
                "Failed to create blob directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Blob store initialized");

        Ok(Self {
            base_path,
            max_size,
            public_base_url: public_base_url.into(),
        })
    }

    /// Normalize an image reference from a request body.
    ///
    /// Inline data is uploaded and replaced by its URL; anything else is
    /// assumed to already be a URL and kept as is. Empty strings count as no
    /// image at all.
    pub async fn resolve_reference(
        &self,
        reference: Option<String>,
    ) -> Result<Option<String>, ServerError> {
        match reference {
            None => Ok(None),
            Some(r) if r.trim().is_empty() => Ok(None),
            Some(r) if r.starts_with(INLINE_DATA_PREFIX) => self.upload_inline(&r).await.map(Some),
            Some(r) => Ok(Some(r)),
        }
    }

    /// Decode and store an inline `data:` image, returning its public URL.
    pub async fn upload_inline(&self, data_url: &str) -> Result<String, ServerError> {
        let (ext, bytes) = decode_data_url(data_url)?;
        let name = self.store_blob(&bytes, ext).await?;
        Ok(format!("{}/blobs/{}", self.public_base_url, name))
    }

    /// Write raw bytes under a new id. Returns the stored file name.
    pub async fn store_blob(&self, data: &[u8], ext: &str) -> Result<String, ServerError> {
        if data.is_empty() {
            return Err(ServerError::Validation("Empty image".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::BlobTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let name = format!("{}.{}", Uuid::new_v4(), ext);
        let path = self.safe_blob_path(&name)?;

        fs::write(&path, data)
            .await
            .map_err(|e| ServerError::Upstream(format!("Failed to write blob {}: {}", name, e)))?;

        debug!(name = %name, size = data.len(), "Stored blob");
        Ok(name)
    }

    /// Read a stored blob back, along with its content type.
    pub async fn get_blob(&self, name: &str) -> Result<(Vec<u8>, &'static str), ServerError> {
        let content_type = parse_blob_name(name)
            .ok_or_else(|| ServerError::NotFound("Image not found".to_string()))?;
        let path = self.safe_blob_path(name)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ServerError::NotFound("Image not found".to_string()));
        }

        let data = fs::read(&path)
            .await
            .map_err(|e| ServerError::Upstream(format!("Failed to read blob {}: {}", name, e)))?;

        debug!(name = %name, size = data.len(), "Retrieved blob");
        Ok((data, content_type))
    }

    fn safe_blob_path(&self, name: &str) -> Result<PathBuf, ServerError> {
        let raw = self.base_path.join(name);
        ensure_within(&self.base_path, &raw)
    }
}

/// Split `data:<mime>;base64,<payload>` into an extension and decoded bytes.
fn decode_data_url(data_url: &str) -> Result<(&'static str, Vec<u8>), ServerError> {
    let invalid = || ServerError::Validation("Malformed inline image".to_string());

    let rest = data_url.strip_prefix(INLINE_DATA_PREFIX).ok_or_else(invalid)?;
    let (header, payload) = rest.split_once(',').ok_or_else(invalid)?;
    let mime = header.strip_suffix(";base64").ok_or_else(invalid)?;

    let ext = KNOWN_TYPES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(mime))
        .map(|(_, ext)| *ext)
        .ok_or_else(|| ServerError::Validation(format!("Unsupported image type '{mime}'")))?;

    let bytes = STANDARD.decode(payload.trim()).map_err(|_| invalid())?;
    Ok((ext, bytes))
}

/// Accept only `<uuid>.<known ext>` and return the matching content type.
fn parse_blob_name(name: &str) -> Option<&'static str> {
    let (stem, ext) = name.split_once('.')?;
    Uuid::parse_str(stem).ok()?;
    KNOWN_TYPES
        .iter()
        .find(|(_, known)| *known == ext)
        .map(|(mime, _)| *mime)
}
