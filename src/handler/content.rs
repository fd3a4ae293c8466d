//! Content the preview page displays: uploaded images and a caption text.

use std::io;

use axum::{
    Json,
    extract::{Multipart, Path, State},
    response::Redirect,
};
use serde::Serialize;

use crate::{
    api::AppState,
    handler::{ApiError, ApiJsonResult, ApiResult},
};

pub const TEXT_FILE: &str = "text.txt";

#[derive(Debug, Serialize)]
pub struct FileEntry {
    name: String,
    size: u64,
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    ok: bool,
}

/// Keeps the last path component and replaces whitespace runs with `_`.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let name = base.split_whitespace().collect::<Vec<_>>().join("_");
    match name.as_str() {
        "" | "." | ".." => None,
        _ => Some(name),
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<Redirect> {
    let mut saved = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().map(str::to_owned);
        match field_name.as_deref() {
            Some("images") => {
                let Some(name) = field.file_name().and_then(sanitize_file_name) else {
                    log::warn!("content: skipping upload without a usable file name");
                    continue;
                };
                let data = field.bytes().await?;
                tokio::fs::write(state.content_dir.join(&name), &data).await?;
                saved.push(name);
            }
            Some("text") => {
                let text = field.text().await?;
                if !text.is_empty() {
                    tokio::fs::write(state.content_dir.join(TEXT_FILE), text).await?;
                    saved.push(TEXT_FILE.to_string());
                }
            }
            other => log::debug!("content: ignoring form field {:?}", other),
        }
    }

    log::info!("content: uploaded {:?}", saved);
    Ok(Redirect::to("/manage.html"))
}

pub async fn list_files(State(state): State<AppState>) -> ApiJsonResult<Vec<FileEntry>> {
    let mut entries = tokio::fs::read_dir(state.content_dir.as_path()).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        files.push(FileEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            size: meta.len(),
        });
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(files))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiJsonResult<Deleted> {
    if !is_plain_name(&name) {
        return Err(ApiError::bad_request(format!("invalid file name: {}", name)));
    }
    match tokio::fs::remove_file(state.content_dir.join(&name)).await {
        Ok(()) => log::info!("content: deleted {}", name),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(Json(Deleted { ok: true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("my holiday  photo.jpg").as_deref(), Some("my_holiday_photo.jpg"));
        assert_eq!(sanitize_file_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_file_name("C:\\Users\\me\\logo.png").as_deref(), Some("logo.png"));
        assert_eq!(sanitize_file_name("dir/"), None);
        assert_eq!(sanitize_file_name(".."), None);
        assert_eq!(sanitize_file_name("   "), None);
    }

    #[test]
    fn test_plain_names() {
        assert!(is_plain_name("logo.png"));
        assert!(!is_plain_name("../logo.png"));
        assert!(!is_plain_name(".."));
        assert!(!is_plain_name(""));
    }
}
