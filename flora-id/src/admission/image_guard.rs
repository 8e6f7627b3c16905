//! Upload validation: size, declared type, magic bytes, safe re-decode
//!
//! Checks run in that fixed order and stop at the first failure.

use crate::error::ValidationFailure;
use crate::config::AdmissionSettings;
use axum::body::Bytes;
use image::ImageFormat;
use std::io::Cursor;
use tracing::debug;

/// Markers of script payloads smuggled inside image containers
const SCRIPT_MARKERS: &[&[u8]] = &[b"<?php", b"<script", b"<iframe"];

/// Uploaded image as received from the transport layer
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Bytes,
    /// Content type declared by the client
    pub content_type: Option<String>,
    pub file_name: Option<String>,
    /// Set when the transport body limit stopped the read; the real size is
    /// at least this many bytes
    pub cut_off_at: Option<usize>,
}

impl ImageUpload {
    pub fn new(bytes: impl Into<Bytes>, content_type: Option<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type,
            file_name: None,
            cut_off_at: None,
        }
    }

    /// Upload whose body hit the transport limit before it was fully read
    pub fn cut_off(at_least: usize, content_type: Option<String>) -> Self {
        Self {
            cut_off_at: Some(at_least),
            ..Self::new(Bytes::new(), content_type)
        }
    }

    /// Size used by the admission checks
    pub fn len(&self) -> usize {
        self.cut_off_at.unwrap_or(self.bytes.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Canonical MIME type: lowercase, parameters stripped, JPEG aliases folded
pub fn normalize_content_type(declared: &str) -> String {
    let base = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match base.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        _ => base,
    }
}

fn decoder_format(mime: &str) -> Option<ImageFormat> {
    match mime {
        "image/jpeg" => Some(ImageFormat::Jpeg),
        "image/png" => Some(ImageFormat::Png),
        "image/webp" => Some(ImageFormat::WebP),
        "image/gif" => Some(ImageFormat::Gif),
        "image/bmp" => Some(ImageFormat::Bmp),
        _ => None,
    }
}

/// Stateless upload validator built from admission settings
#[derive(Debug, Clone)]
pub struct ImageGuard {
    max_bytes: usize,
    allowed_types: Vec<String>,
    sanitize: bool,
    max_dimension: u32,
}

impl ImageGuard {
    pub fn new(settings: &AdmissionSettings) -> Self {
        Self {
            max_bytes: settings.max_image_bytes,
            allowed_types: settings
                .allowed_types
                .iter()
                .map(|t| normalize_content_type(t))
                .collect(),
            sanitize: settings.sanitize,
            max_dimension: settings.max_image_dimension,
        }
    }

    pub fn sanitize_enabled(&self) -> bool {
        self.sanitize
    }

    /// Reject empty and oversized payloads
    pub fn check_size(&self, len: usize) -> Result<(), ValidationFailure> {
        if len == 0 {
            return Err(ValidationFailure::EmptyPayload);
        }
        if len > self.max_bytes {
            return Err(ValidationFailure::Oversize {
                size: len,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    /// Check the declared type against the allow-list
    ///
    /// # Returns
    /// * Normalized MIME type
    pub fn check_content_type(&self, declared: Option<&str>) -> Result<String, ValidationFailure> {
        let declared = declared
            .map(normalize_content_type)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ValidationFailure::UnsupportedType(String::new()))?;
        if self.allowed_types.iter().any(|t| *t == declared) {
            Ok(declared)
        } else {
            Err(ValidationFailure::UnsupportedType(declared))
        }
    }

    /// Magic bytes must match the declared type
    pub fn check_signature(&self, bytes: &[u8], declared: &str) -> Result<(), ValidationFailure> {
        let detected = infer::get(bytes).map(|kind| kind.mime_type());
        match detected {
            Some(mime) if mime == declared => Ok(()),
            other => {
                debug!(
                    declared = %declared,
                    detected = ?other,
                    "Upload signature does not match declared type"
                );
                Err(ValidationFailure::SignatureMismatch {
                    declared: declared.to_string(),
                })
            }
        }
    }

    /// Structural pass: script markers, then a bounded full decode
    ///
    /// CPU-bound; call from a blocking task for large uploads.
    pub fn sanitize(&self, bytes: &[u8], declared: &str) -> Result<(), ValidationFailure> {
        if let Some(marker) = find_script_marker(bytes) {
            return Err(ValidationFailure::Malformed(format!(
                "embedded script marker {}",
                String::from_utf8_lossy(marker)
            )));
        }

        let format = decoder_format(declared).ok_or_else(|| {
            ValidationFailure::Malformed(format!("no decoder for {}", declared))
        })?;

        let mut limits = image::io::Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);

        let mut reader = image::io::Reader::new(Cursor::new(bytes));
        reader.set_format(format);
        reader.limits(limits);

        let decoded = reader
            .decode()
            .map_err(|e| ValidationFailure::Malformed(e.to_string()))?;

        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(ValidationFailure::Malformed("zero-sized image".to_string()));
        }
        Ok(())
    }
}

fn find_script_marker(bytes: &[u8]) -> Option<&'static [u8]> {
    SCRIPT_MARKERS.iter().copied().find(|marker| {
        bytes
            .windows(marker.len())
            .any(|window| window.eq_ignore_ascii_case(marker))
    })
}
