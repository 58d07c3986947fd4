//! DOCX template filling endpoint.

use axum::{
    extract::{Multipart, State},
    http::header,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::docx::{fill_document, DocxError, FillMode};
use crate::AppState;

use super::auth::AuthSession;
use super::error::ApiError;

const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Uploaded templates are capped well below the body limit set on the route
const MAX_TEMPLATE_BYTES: usize = 20 * 1024 * 1024;

fn engine_error(err: DocxError) -> ApiError {
    match err {
        DocxError::MissingDocumentPart | DocxError::Archive(_) | DocxError::Xml(_) => {
            ApiError::bad_request(err.to_string())
        }
        DocxError::Io(_) => ApiError::internal(err.to_string()),
    }
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\' && *c != '/')
        .collect()
}

/// Fill a DOCX template with field values
///
/// POST /api/docx/fill (multipart: `file`, optional `fields` JSON map,
/// optional `mode` = template|vzor|dynamic)
pub async fn fill(
    State(_state): State<Arc<AppState>>,
    auth: AuthSession,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut mode = FillMode::Template;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart payload: {}", e)))?
    {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(sanitize_filename)
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "document.docx".to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read file: {}", e)))?;
                if data.len() > MAX_TEMPLATE_BYTES {
                    return Err(ApiError::bad_request("Template file is too large"));
                }
                file = Some((filename, data.to_vec()));
            }
            Some("fields") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read fields: {}", e)))?;
                fields = serde_json::from_str(&text).map_err(|_| {
                    ApiError::validation_field("fields", "Fields must be a JSON object of strings")
                })?;
            }
            Some("mode") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read mode: {}", e)))?;
                mode = text
                    .trim()
                    .parse()
                    .map_err(|e: String| ApiError::validation_field("mode", e))?;
            }
            _ => {}
        }
    }

    let (filename, data) = file
        .ok_or_else(|| ApiError::validation_field("file", "A .docx template file is required"))?;

    // The ZIP/XML work is synchronous; keep it off the async workers
    let field_count = fields.len();
    let filled = tokio::task::spawn_blocking(move || fill_document(&data, &fields, mode))
        .await
        .map_err(|e| ApiError::internal(format!("Template task failed: {}", e)))?
        .map_err(engine_error)?;

    info!(
        user = %auth.user.username,
        file = %filename,
        fields = field_count,
        mode = ?mode,
        "DOCX template filled"
    );

    let headers = [
        (header::CONTENT_TYPE, DOCX_CONTENT_TYPE.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        ),
    ];
    Ok((headers, filled).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("smlouva.docx"), "smlouva.docx");
        assert_eq!(sanitize_filename("a\"b\\c/d.docx"), "abcd.docx");
        assert_eq!(sanitize_filename("line\nbreak.docx"), "linebreak.docx");
    }

    #[test]
    fn test_engine_error_mapping() {
        let err = engine_error(DocxError::MissingDocumentPart);
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
