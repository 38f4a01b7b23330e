//! Analysis endpoints
//!
//! `GET /analyze?url=` downloads the image into the gateway's store and
//! hands analyzers a local URL; `GET /analyze?file=` passes the path
//! through untouched (zero-copy); `POST /analyze` accepts a multipart
//! upload. All three funnel into the same fan-out + pipeline pass.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path as AxumPath, Query, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::pipeline::{self, AnalyzeResponse};
use crate::services::analyzer_client::ImageRef;
use crate::services::orchestrator::{ImageInput, Orchestrator};
use crate::AppState;

/// MIME types accepted for uploads and downloads, with their extensions.
const ALLOWED_MIME: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
];

fn extension_for(mime: &str) -> Option<&'static str> {
    ALLOWED_MIME
        .iter()
        .find(|(m, _)| *m == mime)
        .map(|(_, ext)| *ext)
}

fn mime_for_extension(ext: &str) -> &'static str {
    ALLOWED_MIME
        .iter()
        .find(|(_, e)| *e == ext)
        .map(|(m, _)| *m)
        .unwrap_or("application/octet-stream")
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeParams {
    url: Option<String>,
    file: Option<String>,
}

/// Build the /analyze and /uploads routes.
pub fn analyze_routes(state: &AppState) -> Router<AppState> {
    let limit = state.config.settings.max_upload_bytes as usize;
    Router::new()
        .route("/analyze", get(analyze_get).post(analyze_upload))
        .route("/uploads/:name", get(serve_upload))
        .layer(DefaultBodyLimit::max(limit + 64 * 1024))
}

/// GET /analyze?url=<u> | GET /analyze?file=<p>
async fn analyze_get(
    State(state): State<AppState>,
    Query(params): Query<AnalyzeParams>,
) -> ApiResult<Json<AnalyzeResponse>> {
    let input = match (params.url, params.file) {
        (Some(url), _) => download_image(&state, &url).await?,
        (None, Some(file)) => {
            let path = PathBuf::from(&file);
            if !path.is_file() {
                return Err(ApiError::BadRequest(format!(
                    "File not found or not readable: {}",
                    file
                )));
            }
            ImageInput::direct_file(path)
        }
        (None, None) => {
            return Err(ApiError::BadRequest(
                "Provide either ?url= or ?file=".to_string(),
            ))
        }
    };

    let response = run_analysis(&state, input).await;
    Ok(Json(response))
}

/// POST /analyze with multipart field `image`
async fn analyze_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<AnalyzeResponse>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some("image") {
            continue;
        }

        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_default();
        let Some(ext) = extension_for(&content_type) else {
            return Err(ApiError::BadRequest(format!(
                "Unsupported content type {:?}; expected one of jpeg/png/gif/webp",
                content_type
            )));
        };

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Cannot read upload: {}", e)))?;
        if bytes.len() as u64 > state.config.settings.max_upload_bytes {
            return Err(ApiError::BadRequest(format!(
                "Upload exceeds the {} byte limit",
                state.config.settings.max_upload_bytes
            )));
        }
        if bytes.is_empty() {
            return Err(ApiError::BadRequest("Empty upload".to_string()));
        }

        let path = store_image(&state, &bytes, ext).await?;
        info!(bytes = bytes.len(), path = %path.display(), "Image uploaded");

        let response = run_analysis(&state, ImageInput::uploaded(path)).await;
        return Ok(Json(response));
    }

    Err(ApiError::BadRequest(
        "Missing multipart field 'image'".to_string(),
    ))
}

/// GET /uploads/:name - lets distributed analyzers fetch stored images.
async fn serve_upload(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
) -> ApiResult<impl IntoResponse> {
    // Stored names are UUID-based; anything else is not ours to serve.
    if name.contains('/') || name.contains("..") {
        return Err(ApiError::BadRequest("Invalid image name".to_string()));
    }

    let path = state.config.settings.upload_dir.join(&name);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::NotFound(format!("No stored image {:?}", name)))?;

    let ext = Path::new(&name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    Ok(([(header::CONTENT_TYPE, mime_for_extension(ext))], bytes))
}

/// Fetch an external image into the upload store.
async fn download_image(state: &AppState, url: &str) -> ApiResult<ImageInput> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ApiError::BadRequest(format!(
            "Unsupported URL scheme: {}",
            url
        )));
    }

    let response = state
        .http
        .get(url)
        .send()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Cannot download {}: {}", url, e)))?;
    if !response.status().is_success() {
        return Err(ApiError::BadRequest(format!(
            "Download of {} failed with HTTP {}",
            url,
            response.status().as_u16()
        )));
    }

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .unwrap_or_default();
    let ext = extension_for(&content_type).unwrap_or("jpg");

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Download interrupted: {}", e)))?;
    if bytes.len() as u64 > state.config.settings.max_upload_bytes {
        return Err(ApiError::BadRequest(format!(
            "Remote image exceeds the {} byte limit",
            state.config.settings.max_upload_bytes
        )));
    }

    let path = store_image(state, &bytes, ext).await?;
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    let local_url = format!("{}/uploads/{}", state.config.settings.public_url, name);
    info!(url = %url, local = %local_url, "External image downloaded");

    Ok(ImageInput::downloaded(
        path.clone(),
        local_url,
        url.to_string(),
    ))
}

async fn store_image(state: &AppState, bytes: &[u8], ext: &str) -> ApiResult<PathBuf> {
    let dir = &state.config.settings.upload_dir;
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}.{}", Uuid::new_v4(), ext));
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

/// One complete pass: fan out, cluster, vote, caption, assemble.
async fn run_analysis(state: &AppState, input: ImageInput) -> AnalyzeResponse {
    let started = Instant::now();

    let orchestrator = Orchestrator::new(
        state.clients.clone(),
        state.config.settings.request_budget(),
    );
    let run = orchestrator.run(&input).await;

    let roster = &state.config.analyzers;
    let index = pipeline::cluster_detections(&run.results, roster, run.dimensions);
    let voting = pipeline::run_voting(&run.results, roster, &index);

    let image_ref = match &input.local_url {
        Some(url) => ImageRef::Url(url),
        None => ImageRef::File(&input.local_path),
    };
    let captions = pipeline::aggregate_captions(
        &run.results,
        roster,
        state.similarity.as_ref().as_ref(),
        image_ref,
    )
    .await;

    let elapsed = started.elapsed().as_secs_f64();
    if !run.all_successful() {
        warn!(
            elapsed_seconds = elapsed,
            "Analysis finished degraded"
        );
    }

    pipeline::assemble(&run, voting, captions, &input, elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_allow_list() {
        assert_eq!(extension_for("image/jpeg"), Some("jpg"));
        assert_eq!(extension_for("image/webp"), Some("webp"));
        assert_eq!(extension_for("image/tiff"), None);
        assert_eq!(extension_for("text/html"), None);
    }

    #[test]
    fn test_mime_for_extension_round_trip() {
        assert_eq!(mime_for_extension("png"), "image/png");
        assert_eq!(mime_for_extension("bin"), "application/octet-stream");
    }
}
