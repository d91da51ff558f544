//! HTTP handlers for file upload, listing, download and deletion.
//! Upload bodies are spooled to disk and downloads are streamed, so no file
//! is ever held in memory.

use crate::{
    errors::AppError,
    handlers::actor::Actor,
    models::{file_record::FileRecord, share_ticket::ShareTicket},
    services::{
        object_store::{ObjectReader, SpooledUpload},
        share_service::NewShare,
    },
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, io};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;

/// `?page=&limit=` for list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PageQuery {
    /// 1-based page and a page size clamped to `1..=100`.
    pub fn resolve(&self) -> (i64, i64) {
        let page = self.page.filter(|p| *p > 0).unwrap_or(1);
        let limit = self
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        (page, limit)
    }
}

#[derive(Serialize)]
pub struct FileList {
    pub files: Vec<FileRecord>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

#[derive(Serialize)]
pub struct AnonymousUpload {
    pub file: FileRecord,
    pub share: ShareTicket,
}

/// A multipart upload: the spooled `file` part plus any text fields.
struct UploadForm {
    spooled: SpooledUpload,
    file_name: String,
    content_type: String,
    fields: HashMap<String, String>,
}

/// Read a multipart body, spooling the `file` part with the actor's ceiling.
async fn read_upload_form(
    state: &AppState,
    mut multipart: Multipart,
    actor: Option<Uuid>,
) -> Result<UploadForm, AppError> {
    let mut upload = None;
    let mut fields = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid multipart body: {}", err)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let content_type = field.content_type().unwrap_or_default().to_string();
            let stream = field.map_err(io::Error::other);
            let spooled = state.files.spool(stream, actor).await?;
            upload = Some((spooled, file_name, content_type));
        } else {
            let value = field
                .text()
                .await
                .map_err(|err| AppError::bad_request(format!("invalid form field `{}`: {}", name, err)))?;
            fields.insert(name, value);
        }
    }

    let (spooled, file_name, content_type) =
        upload.ok_or_else(|| AppError::bad_request("missing `file` field"))?;
    Ok(UploadForm {
        spooled,
        file_name,
        content_type,
        fields,
    })
}

/// Parse an optional integer form field; empty means "use the default".
fn int_field(fields: &HashMap<String, String>, name: &str) -> Result<i64, AppError> {
    match fields.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(value) => value
            .parse()
            .map_err(|_| AppError::bad_request(format!("`{}` must be an integer", name))),
        None => Ok(0),
    }
}

/// POST `/api/files`: upload a file as the calling user (or anonymously).
pub async fn upload_file(
    State(state): State<AppState>,
    actor: Actor,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let form = read_upload_form(&state, multipart, actor.0).await?;
    let record = state
        .files
        .upload_spooled(form.spooled, &form.file_name, &form.content_type, actor.0)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// POST `/api/files/anonymous`: anonymous upload and share in one request.
pub async fn upload_anonymous(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let form = read_upload_form(&state, multipart, None).await?;
    let request = NewShare {
        code: form.fields.get("code").cloned(),
        expires_in_hours: int_field(&form.fields, "expires_in")?,
        download_limit: int_field(&form.fields, "download_limit")?,
    };

    let file = state
        .files
        .upload_spooled(form.spooled, &form.file_name, &form.content_type, None)
        .await?;
    let share = match state.shares.create(file.id, request, None).await {
        Ok(share) => share,
        Err(err) => {
            // No ticket means nobody could ever reach the file.
            if let Err(cleanup) = state.files.delete(file.id, None).await {
                tracing::warn!(file_id = %file.id, "failed to roll back anonymous upload: {}", cleanup);
            }
            return Err(err.into());
        }
    };

    Ok((StatusCode::CREATED, Json(AnonymousUpload { file, share })))
}

/// GET `/api/files`: the caller's files, newest first.
pub async fn list_files(
    State(state): State<AppState>,
    actor: Actor,
    Query(q): Query<PageQuery>,
) -> Result<Json<FileList>, AppError> {
    let owner = actor.required()?;
    let (page, limit) = q.resolve();
    let (files, total) = state.files.list_for_owner(owner, page, limit).await?;
    Ok(Json(FileList {
        files,
        total,
        page,
        limit,
    }))
}

/// GET `/api/files/{id}`: file metadata.
pub async fn get_file(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<FileRecord>, AppError> {
    Ok(Json(state.files.get_for_actor(id, actor.0).await?))
}

/// GET `/api/files/{id}/download`: stream the decrypted file.
pub async fn download_file(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let (record, reader) = state.files.open_content(id, actor.0).await?;
    Ok(file_response(&record, reader))
}

/// DELETE `/api/files/{id}`: delete a file and its shares.
pub async fn delete_file(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.files.delete(id, actor.0).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST `/api/files/{id}/share`: issue a share ticket.
pub async fn create_share(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<NewShare>,
) -> Result<impl IntoResponse, AppError> {
    let ticket = state.shares.create(id, request, actor.0).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

/// Build a streaming download response. The reader (and its file handle) is
/// dropped as soon as the body is finished or abandoned.
pub(crate) fn file_response(record: &FileRecord, reader: ObjectReader) -> Response {
    let body = Body::from_stream(ReaderStream::new(reader));
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_file_headers(response.headers_mut(), record);
    response
}

fn set_file_headers(headers: &mut HeaderMap, record: &FileRecord) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&record.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&record.size_bytes.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(&record.name))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", record.content_hash)) {
        headers.insert(header::ETAG, value);
    }
}

/// `attachment` disposition with an ASCII fallback name and an RFC 5987
/// UTF-8 name.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut encoded = String::with_capacity(name.len() * 3);
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'-' | b'_' | b'~') {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    format!("attachment; filename=\"{}\"; filename*=UTF-8''{}", fallback, encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_query_defaults_and_clamps() {
        assert_eq!(PageQuery::default().resolve(), (1, 10));
        let q = PageQuery {
            page: Some(0),
            limit: Some(1000),
        };
        assert_eq!(q.resolve(), (1, 100));
        let q = PageQuery {
            page: Some(3),
            limit: Some(0),
        };
        assert_eq!(q.resolve(), (3, 1));
    }

    #[test]
    fn disposition_escapes_quotes_and_unicode() {
        assert_eq!(
            content_disposition("a \"b\".txt"),
            "attachment; filename=\"a _b_.txt\"; filename*=UTF-8''a%20%22b%22.txt"
        );
        assert_eq!(
            content_disposition("ü.txt"),
            "attachment; filename=\"_.txt\"; filename*=UTF-8''%C3%BC.txt"
        );
    }
}
