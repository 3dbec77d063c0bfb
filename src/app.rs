use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, Multipart, Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::services::ServeDir;

use crate::access;
use crate::config::{Config, validate_filename};
use crate::error::Error;
use crate::merge::{MergeJob, merge};
use crate::ownership::{JsonFileStore, OwnershipStore};
use crate::saving;
use crate::search::{self, VersionResult};

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

pub struct AppState {
    config: Config,
    owners: Arc<dyn OwnershipStore>,
    // One lock per version so two merges never write the same output file at once
    merge_locks: HashMap<String, Arc<Mutex<()>>>,
}

impl AppState {
    pub fn new(config: Config, owners: Arc<dyn OwnershipStore>) -> Self {
        let merge_locks = config
            .versions
            .iter()
            .map(|version| (version.clone(), Arc::new(Mutex::new(()))))
            .collect();

        AppState {
            config,
            owners,
            merge_locks,
        }
    }
}

/// Address of the caller, resolved once per request by [`resolve_client`].
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    message: Option<String>,
}

#[derive(Serialize)]
struct FileEntry {
    name: String,
    owner: Option<String>,
    owner_name: Option<String>,
    uploaded_at: Option<String>,
}

#[derive(Serialize)]
struct UserInfo {
    ip: String,
    name: String,
}

#[derive(Deserialize)]
struct SearchQuery {
    key: i64,
    version: Option<String>,
}

/// An error on its way to the client as a JSON body and status code.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        AppError {
            status,
            message: message.into(),
        }
    }
}

impl From<Error> for AppError {
    fn from(error: Error) -> Self {
        let status = match &error {
            Error::TemplateNotFound(_) | Error::SourceNotFound(_) => StatusCode::NOT_FOUND,
            Error::MalformedSource { .. }
            | Error::UnreadableFile { .. }
            | Error::HeaderNotMatched(_)
            | Error::MissingTemplateHeader { .. }
            | Error::MissingKey { .. }
            | Error::InvalidFilename(_)
            | Error::UnknownVersion(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!("Request failed: {}", error);
        }
        AppError::new(status, error.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(error: tokio::task::JoinError) -> Self {
        warn!("Worker task failed: {}", error);
        AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "worker task failed")
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = StatusResponse {
            status: "error".to_string(),
            message: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

type AppResult<T> = Result<T, AppError>;

fn ok(message: impl Into<String>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
        message: Some(message.into()),
    })
}

fn xlsx_attachment(filename: &str, bytes: Vec<u8>) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", filename.replace('"', ""));
    (
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.max_upload_bytes;
    let static_dir = state.config.static_dir.clone();

    Router::new()
        .route("/api/versions", get(list_versions))
        .route("/api/files/:version", get(list_bucket))
        .route("/api/user-info", get(user_info))
        .route("/upload_template", post(upload_template))
        .route("/upload/:version", post(upload_data))
        .route("/upload_result/:version", post(upload_result))
        .route("/upload_master/:version", post(upload_master))
        .route("/download/:version/:filename", get(download))
        .route("/delete/:version/:filename", post(delete))
        .route("/merge/:version", post(merge_version))
        .route("/search", get(search_rows))
        .route("/download_my_data/:version/:filename", get(download_my_data))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(middleware::from_fn_with_state(state.clone(), resolve_client))
        .layer(DefaultBodyLimit::max(upload_limit))
        .with_state(state)
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    config.ensure_dirs()?;
    let owners: Arc<dyn OwnershipStore> = Arc::new(JsonFileStore::open(&config.ownership_file)?);
    let bind_addr = config.bind_addr.clone();

    let app = router(Arc::new(AppState::new(config, owners)));

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Listening on http://{}", bind_addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Resolve the caller's IP and enforce the whitelist.
async fn resolve_client(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let headers = request.headers();
    let ip = access::client_ip(
        &state.config.access,
        headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()),
        headers.get("x-real-ip").and_then(|v| v.to_str().ok()),
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0),
    );

    if !access::is_allowed(&state.config.access, &ip) {
        warn!("Rejected request from {}", ip);
        return AppError::new(
            StatusCode::FORBIDDEN,
            format!("Access denied for IP address '{}'", ip),
        )
        .into_response();
    }

    request.extensions_mut().insert(ClientIp(ip));
    next.run(request).await
}

async fn list_versions(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.config.versions.clone())
}

async fn list_bucket(
    Path(version): Path<String>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<Vec<FileEntry>>> {
    let bucket = state.config.bucket_dir(&version)?;
    let owners = state.owners.list(&version)?;

    let files = if bucket.is_dir() {
        saving::list_files(&bucket, "xlsx").map_err(Error::from)?
    } else {
        Vec::new()
    };

    let entries = files
        .iter()
        .map(|path| {
            let name = saving::file_name(path).to_string();
            let record = owners.get(&name);
            FileEntry {
                owner_name: record
                    .map(|r| access::display_name(&state.config.access, &r.owner).to_string()),
                owner: record.map(|r| r.owner.clone()),
                uploaded_at: record.map(|r| r.uploaded_at.to_rfc3339()),
                name,
            }
        })
        .collect();

    Ok(Json(entries))
}

async fn user_info(
    State(state): State<Arc<AppState>>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
) -> Json<UserInfo> {
    let name = access::display_name(&state.config.access, &ip).to_string();
    Json(UserInfo { ip, name })
}

// Browsers may send a full client-side path; only the last component is kept.
fn upload_name(raw: &str) -> Result<String, Error> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    Ok(validate_filename(base)?.to_string())
}

async fn read_upload(multipart: &mut Multipart) -> AppResult<(String, Bytes)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::new(StatusCode::BAD_REQUEST, e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = upload_name(field.file_name().unwrap_or_default())?;
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
        return Ok((filename, data));
    }

    Err(AppError::new(
        StatusCode::BAD_REQUEST,
        "No file data received",
    ))
}

async fn upload_template(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<Json<StatusResponse>> {
    let (_, data) = read_upload(&mut multipart).await?;
    std::fs::create_dir_all(&state.config.uploads_dir).map_err(Error::from)?;
    saving::write_atomic(&state.config.template_path(), &data)?;

    info!("Template replaced ({} bytes)", data.len());
    Ok(ok(state.config.template_filename.clone()))
}

async fn upload_data(
    Path(version): Path<String>,
    State(state): State<Arc<AppState>>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    mut multipart: Multipart,
) -> AppResult<Json<StatusResponse>> {
    let bucket = state.config.bucket_dir(&version)?;
    let (filename, data) = read_upload(&mut multipart).await?;

    if state.config.merge_exclusions(&version).contains(&filename) {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            format!("'{}' is a reserved filename", filename),
        ));
    }

    std::fs::create_dir_all(&bucket).map_err(Error::from)?;
    saving::write_atomic(&bucket.join(&filename), &data)?;
    state.owners.record(&version, &filename, &ip)?;

    info!("{} uploaded {} to {}", ip, filename, version);
    Ok(ok(filename))
}

async fn upload_result(
    Path(version): Path<String>,
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<Json<StatusResponse>> {
    let results = state.config.results_dir(&version)?;
    let (filename, data) = read_upload(&mut multipart).await?;

    std::fs::create_dir_all(&results).map_err(Error::from)?;
    saving::write_atomic(&results.join(&filename), &data)?;

    info!("Result {} uploaded to {}", filename, version);
    Ok(ok(filename))
}

async fn upload_master(
    Path(version): Path<String>,
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<Json<StatusResponse>> {
    let bucket = state.config.bucket_dir(&version)?;
    let (_, data) = read_upload(&mut multipart).await?;

    std::fs::create_dir_all(&bucket).map_err(Error::from)?;
    saving::write_atomic(&bucket.join(&state.config.master_filename), &data)?;

    info!("Master of {} replaced", version);
    Ok(ok(state.config.master_filename.clone()))
}

async fn download(
    Path((version, filename)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    let filename = validate_filename(&filename)?;
    let path = state.config.bucket_dir(&version)?.join(filename);
    if !path.is_file() {
        return Err(AppError::new(StatusCode::NOT_FOUND, "File not found."));
    }

    let bytes = tokio::fs::read(&path).await.map_err(Error::from)?;
    Ok(xlsx_attachment(filename, bytes))
}

async fn delete(
    Path((version, filename)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<StatusResponse>> {
    let filename = validate_filename(&filename)?;
    let path = state.config.bucket_dir(&version)?.join(filename);
    if !path.is_file() {
        return Err(AppError::new(StatusCode::NOT_FOUND, "File not found."));
    }

    tokio::fs::remove_file(&path).await.map_err(Error::from)?;
    state.owners.remove(&version, filename)?;

    info!("Deleted {} from {}", filename, version);
    Ok(ok(filename))
}

async fn merge_version(
    Path(version): Path<String>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    let lock = state
        .merge_locks
        .get(&version)
        .cloned()
        .ok_or_else(|| Error::UnknownVersion(version.clone()))?;
    let _guard = lock.lock().await;

    let job = MergeJob::for_version(&state.config, &version)?;
    let output_filename = job.output_filename.clone();
    let report = tokio::task::spawn_blocking(move || merge(&job)).await??;

    let bytes = tokio::fs::read(&report.output_path)
        .await
        .map_err(Error::from)?;

    let mut response = xlsx_attachment(&output_filename, bytes);
    response
        .headers_mut()
        .insert("x-skipped-files", HeaderValue::from(report.skipped.len()));
    Ok(response)
}

async fn search_rows(
    Query(query): Query<SearchQuery>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<Vec<VersionResult>>> {
    let key = query.key.to_string();

    let results = match query.version {
        Some(version) => {
            let result = tokio::task::spawn_blocking(move || {
                search::search_version(&state.config, &version, &key)
                    .map(|rows| VersionResult { version, rows })
            })
            .await??;
            vec![result]
        }
        None => tokio::task::spawn_blocking(move || search::search_all(&state.config, &key)).await?,
    };

    Ok(Json(results))
}

async fn download_my_data(
    Path((version, filename)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    let extract = tokio::task::spawn_blocking(move || {
        search::extract_for_upload(&state.config, &version, &filename)
    })
    .await??;

    let bytes = tokio::fs::read(&extract.path).await.map_err(Error::from)?;
    Ok(xlsx_attachment(saving::file_name(&extract.path), bytes))
}
