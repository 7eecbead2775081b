//! Typed multipart request bodies.
//!
//! Each endpoint accepts a fixed set of form fields. Anything else (unknown
//! fields, repeated fields, a body that is not `multipart/form-data`) is
//! rejected before it reaches the handlers.

use crate::error::{ServiceError, ServiceResult};
use axum::body::Bytes;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::Multipart;
use axum::http::StatusCode;
use faceverify_core::ImagePayload;

pub const FACE_FIELD: &str = "face";
pub const STORED_EMBEDDING_FIELD: &str = "stored_embedding";

/// Body of `POST /generate-embedding`.
#[derive(Debug)]
pub struct GenerateEmbeddingForm {
    pub face: Option<ImagePayload>,
}

impl GenerateEmbeddingForm {
    pub async fn parse(multipart: Result<Multipart, MultipartRejection>, body_limit: usize) -> ServiceResult<Self> {
        let mut fields = FormFields::read(multipart, &[FACE_FIELD], body_limit).await?;
        Ok(Self {
            face: fields.take(FACE_FIELD).map(RawField::into_image_payload),
        })
    }
}

/// Body of `POST /compare-faces`.
#[derive(Debug)]
pub struct CompareFacesForm {
    pub face: Option<ImagePayload>,
    /// JSON-encoded numeric array; blank values count as absent.
    pub stored_embedding: Option<String>,
}

impl CompareFacesForm {
    pub async fn parse(multipart: Result<Multipart, MultipartRejection>, body_limit: usize) -> ServiceResult<Self> {
        let mut fields = FormFields::read(multipart, &[FACE_FIELD, STORED_EMBEDDING_FIELD], body_limit).await?;
        Ok(Self {
            face: fields.take(FACE_FIELD).map(RawField::into_image_payload),
            stored_embedding: fields
                .take(STORED_EMBEDDING_FIELD)
                .map(RawField::into_text)
                .filter(|s| !s.trim().is_empty()),
        })
    }
}

#[derive(Debug)]
struct RawField {
    name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    data: Bytes,
}

impl RawField {
    /// File uploads and binary parts are raw image bytes; plain text parts
    /// carry base64 or a data URI.
    fn into_image_payload(self) -> ImagePayload {
        let is_text = self.file_name.is_none()
            && self
                .content_type
                .as_deref()
                .map_or(true, |ct| ct.starts_with("text/"));
        if !is_text {
            return ImagePayload::Bytes(self.data.to_vec());
        }
        match String::from_utf8(self.data.to_vec()) {
            Ok(text) => ImagePayload::Encoded(text),
            Err(e) => ImagePayload::Bytes(e.into_bytes()),
        }
    }

    fn into_text(self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

struct FormFields(Vec<RawField>);

impl FormFields {
    async fn read(
        multipart: Result<Multipart, MultipartRejection>,
        allowed: &[&str],
        body_limit: usize,
    ) -> ServiceResult<Self> {
        let mut multipart = multipart.map_err(|rejection| {
            ServiceError::MalformedRequest(format!("expected a multipart/form-data body: {}", rejection.body_text()))
        })?;

        let mut fields: Vec<RawField> = Vec::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| multipart_error(e, body_limit))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if !allowed.contains(&name.as_str()) {
                return Err(ServiceError::MalformedRequest(format!("unexpected field '{name}'")));
            }
            if fields.iter().any(|f| f.name == name) {
                return Err(ServiceError::MalformedRequest(format!("field '{name}' given more than once")));
            }

            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let data = field.bytes().await.map_err(|e| multipart_error(e, body_limit))?;
            fields.push(RawField {
                name,
                file_name,
                content_type,
                data,
            });
        }

        Ok(Self(fields))
    }

    fn take(&mut self, name: &str) -> Option<RawField> {
        let idx = self.0.iter().position(|f| f.name == name)?;
        Some(self.0.swap_remove(idx))
    }
}

fn multipart_error(err: MultipartError, body_limit: usize) -> ServiceError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::PayloadTooLarge(body_limit)
    } else {
        ServiceError::MalformedRequest(err.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(file_name: Option<&str>, content_type: Option<&str>, data: &[u8]) -> RawField {
        RawField {
            name: FACE_FIELD.to_string(),
            file_name: file_name.map(str::to_string),
            content_type: content_type.map(str::to_string),
            data: Bytes::copy_from_slice(data),
        }
    }

    #[test]
    fn test_file_upload_is_raw_bytes() {
        let payload = field(Some("face.png"), Some("image/png"), b"\x89PNG").into_image_payload();
        assert!(matches!(payload, ImagePayload::Bytes(b) if b == b"\x89PNG"));
    }

    #[test]
    fn test_binary_part_without_filename_is_raw_bytes() {
        let payload = field(None, Some("application/octet-stream"), b"abc").into_image_payload();
        assert!(matches!(payload, ImagePayload::Bytes(_)));
    }

    #[test]
    fn test_text_part_is_base64() {
        let payload = field(None, None, b"data:image/png;base64,AAAA").into_image_payload();
        assert!(matches!(payload, ImagePayload::Encoded(s) if s.starts_with("data:image")));
        let payload = field(None, Some("text/plain"), b"AAAA").into_image_payload();
        assert!(matches!(payload, ImagePayload::Encoded(_)));
    }

    #[test]
    fn test_non_utf8_text_part_falls_back_to_bytes() {
        let payload = field(None, None, &[0xff, 0xd8, 0xff]).into_image_payload();
        assert!(matches!(payload, ImagePayload::Bytes(b) if b == [0xff, 0xd8, 0xff]));
    }

    #[test]
    fn test_take_removes_field() {
        let mut fields = FormFields(vec![field(None, None, b"x")]);
        assert!(fields.take(FACE_FIELD).is_some());
        assert!(fields.take(FACE_FIELD).is_none());
        assert!(fields.take(STORED_EMBEDDING_FIELD).is_none());
    }
}
