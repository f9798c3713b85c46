use std::collections::HashMap;
use std::path::{Path, PathBuf};

use axum::extract::Multipart;

use crate::error::{AppError, AppResult};

pub const MAX_AVATAR_BYTES: usize = 2 * 1024 * 1024;

pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// A `multipart/form-data` body split into text fields and non-empty files.
#[derive(Default)]
pub struct MultipartForm {
    fields: HashMap<String, String>,
    files: HashMap<String, Upload>,
}

impl MultipartForm {
    pub async fn read(mut multipart: Multipart) -> AppResult<Self> {
        let mut form = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?;
                    if !bytes.is_empty() {
                        form.files.insert(
                            name,
                            Upload {
                                file_name,
                                content_type,
                                bytes: bytes.to_vec(),
                            },
                        );
                    }
                }
                None => {
                    let value = field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?;
                    form.fields.insert(name, value);
                }
            }
        }

        Ok(form)
    }

    /// Text value of `name`, empty when the field was not sent.
    pub fn text(&self, name: &str) -> String {
        self.fields.get(name).cloned().unwrap_or_default()
    }

    pub fn take_file(&mut self, name: &str) -> Option<Upload> {
        self.files.remove(name)
    }
}

const KNOWN_IMAGE_EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/svg+xml", "svg"),
    ("image/bmp", "bmp"),
];

/// File extension for an avatar upload. The upload's own extension wins when
/// it agrees with the declared type; anything that is not an image is refused.
pub fn avatar_extension(upload: &Upload) -> Result<String, String> {
    if upload.bytes.len() > MAX_AVATAR_BYTES {
        return Err("Avatar must be at most 2 MB".to_string());
    }

    let own_ext = Path::new(&upload.file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    let mime = upload
        .content_type
        .as_deref()
        .and_then(|ct| ct.parse::<mime_guess::mime::Mime>().ok())
        .filter(|mime| *mime != mime_guess::mime::APPLICATION_OCTET_STREAM)
        .or_else(|| mime_guess::from_path(&upload.file_name).first())
        .ok_or_else(|| "Unknown avatar type".to_string())?;

    if mime.type_() != mime_guess::mime::IMAGE {
        return Err("Avatar must be an image".to_string());
    }

    if let Some(ext) = own_ext {
        if mime_guess::from_ext(&ext)
            .iter()
            .any(|guess| guess.essence_str() == mime.essence_str())
        {
            return Ok(ext);
        }
    }

    KNOWN_IMAGE_EXTENSIONS
        .iter()
        .find(|(essence, _)| *essence == mime.essence_str())
        .map(|(_, ext)| ext.to_string())
        .or_else(|| {
            mime_guess::get_mime_extensions(&mime)
                .and_then(|exts| exts.first())
                .map(|ext| ext.to_string())
        })
        .ok_or_else(|| "Unsupported avatar type".to_string())
}

/// Write an avatar under `uploads_dir` and return its path relative to it.
pub async fn store_avatar(uploads_dir: &Path, upload: &Upload, ext: &str) -> AppResult<String> {
    let relative = format!("avatars/{}.{}", uuid::Uuid::now_v7(), ext);
    let full = uploads_dir.join(&relative);
    if let Some(parent) = full.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;
    }
    tokio::fs::write(&full, &upload.bytes)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(relative)
}

/// Remove an avatar that was stored for a write that did not go through.
pub async fn discard_avatar(uploads_dir: &Path, relative: &str) {
    let full: PathBuf = uploads_dir.join(relative);
    if let Err(e) = tokio::fs::remove_file(&full).await {
        tracing::warn!("Could not remove unused avatar {}: {}", full.display(), e);
    }
}
