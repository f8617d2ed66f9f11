use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use std::time::{Duration, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use reqwest::blocking::Client;
use reqwest::blocking::multipart::Form;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONTENT_TYPE, HeaderMap, HeaderValue, REFERER,
    USER_AGENT,
};
use scraper::{Html, Selector};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::domain::{CategoryId, ExportFormat};
use crate::error::CatalogError;

pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

pub const ACCEPTED_CONTENT_TYPES: &[&str] = &[
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/zip",
];

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36";

/// True when there is no file at `path` or it was modified before `now - window`.
pub fn should_refetch(path: &Path, now: SystemTime, window: Duration) -> bool {
    let modified = match fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(modified) => modified,
        Err(_) => return true,
    };
    match now.checked_sub(window) {
        Some(threshold) => modified < threshold,
        None => false,
    }
}

pub fn file_age_days(path: &Path, now: SystemTime) -> Option<u64> {
    let modified = fs::metadata(path).and_then(|meta| meta.modified()).ok()?;
    let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
    Some(age.as_secs() / SECONDS_PER_DAY)
}

#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub size_human: String,
    pub modified: DateTime<Local>,
    pub age_days: u64,
    pub needs_refresh: bool,
}

pub fn file_info(path: &Path, now: SystemTime, window: Duration) -> Option<FileInfo> {
    let meta = fs::metadata(path).ok()?;
    if !meta.is_file() {
        return None;
    }
    let modified = meta.modified().ok()?;
    Some(FileInfo {
        path: path.display().to_string(),
        size: meta.len(),
        size_human: format_bytes(meta.len(), 2),
        modified: DateTime::<Local>::from(modified),
        age_days: file_age_days(path, now).unwrap_or(0),
        needs_refresh: should_refetch(path, now, window),
    })
}

pub fn format_bytes(bytes: u64, precision: usize) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        return format!("{bytes} B");
    }
    let rounded = format!("{value:.precision$}");
    let trimmed = if rounded.contains('.') {
        rounded.trim_end_matches('0').trim_end_matches('.')
    } else {
        rounded.as_str()
    };
    format!("{trimmed} {}", UNITS[unit])
}

/// Pulls the one-time security token out of the export page markup.
pub fn extract_token(html: &str, field: &str) -> Result<String, CatalogError> {
    if html.trim().is_empty() {
        return Err(CatalogError::MalformedPage("empty response body".to_string()));
    }
    let document = Html::parse_document(html);
    let selector =
        Selector::parse("input").map_err(|err| CatalogError::MalformedPage(err.to_string()))?;
    document
        .select(&selector)
        .filter(|input| input.value().attr("name") == Some(field))
        .find_map(|input| input.value().attr("value"))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CatalogError::MissingToken(field.to_string()))
}

pub fn is_accepted_content_type(content_type: &str) -> bool {
    ACCEPTED_CONTENT_TYPES
        .iter()
        .any(|accepted| content_type.contains(accepted))
}

/// Multipart fields submitted to the export endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportForm {
    pub token_field: String,
    pub token: String,
    pub categories: Vec<CategoryId>,
    pub format: ExportFormat,
}

impl ExportForm {
    pub fn fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![(self.token_field.clone(), self.token.clone())];
        fields.extend(
            self.categories
                .iter()
                .map(|category| ("categories[]".to_string(), category.to_string())),
        );
        fields.push(("extension".to_string(), self.format.to_string()));
        fields
    }
}

pub struct ExportPayload {
    pub content_type: String,
    pub body: Box<dyn Read + Send>,
}

/// Session-bound access to the vendor's export pages.
///
/// Implementations must reuse the cookies set by `fetch_export_page` when
/// submitting the form, and report non-success statuses as errors.
pub trait ExportTransport {
    fn fetch_export_page(&self) -> Result<String, CatalogError>;
    fn submit_export(&self, form: &ExportForm) -> Result<ExportPayload, CatalogError>;
}

#[derive(Clone)]
pub struct HttpExportTransport {
    client: Client,
    page_url: String,
    export_url: String,
}

impl HttpExportTransport {
    pub fn new(
        base_url: &str,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> Result<Self, CatalogError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .map_err(|err| CatalogError::Http(err.to_string()))?;

        let base = base_url.trim_end_matches('/');
        Ok(Self {
            client,
            page_url: format!("{base}/catalog-export"),
            export_url: format!("{base}/catalog-export/catalog"),
        })
    }
}

fn check_status(
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, CatalogError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .ok()
        .map(|body| body.chars().take(200).collect::<String>())
        .filter(|body| !body.trim().is_empty())
        .unwrap_or_else(|| "export request failed".to_string());
    Err(CatalogError::HttpStatus { status, message })
}

impl ExportTransport for HttpExportTransport {
    fn fetch_export_page(&self) -> Result<String, CatalogError> {
        debug!(url = %self.page_url, "GET export page");
        let response = self
            .client
            .get(&self.page_url)
            .send()
            .map_err(|err| CatalogError::Http(err.to_string()))?;
        check_status(response)?
            .text()
            .map_err(|err| CatalogError::Http(err.to_string()))
    }

    fn submit_export(&self, form: &ExportForm) -> Result<ExportPayload, CatalogError> {
        let multipart = form
            .fields()
            .into_iter()
            .fold(Form::new(), |multipart, (name, value)| multipart.text(name, value));

        debug!(url = %self.export_url, categories = form.categories.len(), "POST export form");
        let response = self
            .client
            .post(&self.export_url)
            .header(REFERER, &self.page_url)
            .header(ACCEPT, "application/json")
            .header(ACCEPT_LANGUAGE, "ru")
            .header(CACHE_CONTROL, "no-cache")
            .multipart(multipart)
            .send()
            .map_err(|err| CatalogError::Http(err.to_string()))?;
        let response = check_status(response)?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Ok(ExportPayload {
            content_type,
            body: Box::new(response),
        })
    }
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Cached(FileInfo),
    Downloaded(FileInfo),
}

impl FetchOutcome {
    pub fn file(&self) -> &FileInfo {
        match self {
            FetchOutcome::Cached(info) | FetchOutcome::Downloaded(info) => info,
        }
    }

    pub fn was_downloaded(&self) -> bool {
        matches!(self, FetchOutcome::Downloaded(_))
    }
}

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub target: Utf8PathBuf,
    pub categories: Vec<CategoryId>,
    pub format: ExportFormat,
    pub token_field: String,
    pub freshness_window: Duration,
}

/// Keeps the cached export at `target` fresh.
pub struct Downloader<T: ExportTransport> {
    transport: T,
    settings: DownloadSettings,
}

impl<T: ExportTransport> Downloader<T> {
    pub fn new(transport: T, settings: DownloadSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn target(&self) -> &Utf8Path {
        &self.settings.target
    }

    pub fn should_refetch(&self) -> bool {
        should_refetch(
            self.settings.target.as_std_path(),
            SystemTime::now(),
            self.settings.freshness_window,
        )
    }

    pub fn file_age_days(&self) -> Option<u64> {
        file_age_days(self.settings.target.as_std_path(), SystemTime::now())
    }

    pub fn file_info(&self) -> Option<FileInfo> {
        file_info(
            self.settings.target.as_std_path(),
            SystemTime::now(),
            self.settings.freshness_window,
        )
    }

    pub fn fetch_if_needed(&self) -> Result<FetchOutcome, CatalogError> {
        if !self.should_refetch() {
            if let Some(info) = self.file_info() {
                debug!(path = %self.settings.target, age_days = info.age_days, "cached export is fresh");
                return Ok(FetchOutcome::Cached(info));
            }
        }
        self.download().map(FetchOutcome::Downloaded)
    }

    pub fn force_refetch(&self) -> Result<FileInfo, CatalogError> {
        self.delete_old_file()?;
        self.download()
    }

    pub fn delete_old_file(&self) -> Result<(), CatalogError> {
        match fs::remove_file(self.settings.target.as_std_path()) {
            Ok(()) => {
                debug!(path = %self.settings.target, "removed cached export");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CatalogError::Filesystem(format!(
                "remove {}: {err}",
                self.settings.target
            ))),
        }
    }

    /// Runs the export protocol; on failure no file is left at the target.
    pub fn download(&self) -> Result<FileInfo, CatalogError> {
        match self.try_download() {
            Ok(info) => {
                info!(path = %info.path, size = %info.size_human, "catalog export downloaded");
                Ok(info)
            }
            Err(err) => {
                error!(error = %err, "catalog download failed");
                let target = self.settings.target.as_std_path();
                if target.exists() {
                    warn!(path = %self.settings.target, "removing export left by failed download");
                    if let Err(remove_err) = fs::remove_file(target) {
                        warn!(error = %remove_err, "failed to remove export");
                    }
                }
                Err(err)
            }
        }
    }

    fn try_download(&self) -> Result<FileInfo, CatalogError> {
        let page = self.transport.fetch_export_page()?;
        let token = extract_token(&page, &self.settings.token_field)?;

        let form = ExportForm {
            token_field: self.settings.token_field.clone(),
            token,
            categories: self.settings.categories.clone(),
            format: self.settings.format,
        };
        let mut payload = self.transport.submit_export(&form)?;
        if !is_accepted_content_type(&payload.content_type) {
            return Err(CatalogError::UnexpectedContentType(payload.content_type));
        }

        self.persist(&mut payload.body)?;
        self.file_info().ok_or_else(|| {
            CatalogError::Filesystem(format!("export missing after write: {}", self.settings.target))
        })
    }

    fn persist(&self, body: &mut dyn Read) -> Result<(), CatalogError> {
        let target = &self.settings.target;
        let parent = target
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CatalogError::Filesystem(format!("create {parent}: {err}")))?;

        let mut temp = tempfile::Builder::new()
            .prefix(".ridan-catalog")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        let written = io::copy(body, temp.as_file_mut())
            .map_err(|err| CatalogError::Filesystem(format!("write {target}: {err}")))?;
        if written == 0 {
            return Err(CatalogError::EmptyDownload(target.as_std_path().to_path_buf()));
        }
        temp.persist(target.as_std_path())
            .map_err(|err| CatalogError::Filesystem(format!("persist {target}: {err}")))?;

        File::options()
            .write(true)
            .open(target.as_std_path())
            .and_then(|file| file.set_modified(SystemTime::now()))
            .map_err(|err| CatalogError::Filesystem(format!("touch {target}: {err}")))?;
        debug!(path = %target, bytes = written, "export written");
        Ok(())
    }
}
