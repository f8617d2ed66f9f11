use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{CategoryAllowList, CategoryId, ExportFormat};
use crate::download::FRESHNESS_WINDOW;
use crate::error::CatalogError;
use crate::ingest::SheetLayout;

pub const CONFIG_FILE: &str = "ridan-catalog.json";
pub const DEFAULT_BASE_DOMAIN: &str = "https://ridan.ru";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub base_domain: Option<String>,
    #[serde(default)]
    pub download_path: Option<Utf8PathBuf>,
    #[serde(default)]
    pub database_path: Option<Utf8PathBuf>,
    #[serde(default)]
    pub categories: Vec<u32>,
    #[serde(default)]
    pub category_allow_list: Option<CategoryAllowList>,
    #[serde(default)]
    pub export_format: Option<ExportFormat>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub token_field: Option<String>,
    #[serde(default)]
    pub sheets: Option<SheetLayout>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub base_domain: String,
    pub download_path: Utf8PathBuf,
    pub database_path: Utf8PathBuf,
    pub categories: Vec<CategoryId>,
    pub allow_list: CategoryAllowList,
    pub export_format: ExportFormat,
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub freshness_window: Duration,
    pub token_field: String,
    pub sheets: SheetLayout,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `ridan-catalog.json` in the working directory when it
    /// exists. Without either, every setting takes its default.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, CatalogError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }
        if !config_path.exists() {
            return Err(CatalogError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CatalogError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| CatalogError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, CatalogError> {
        let base_domain = config
            .base_domain
            .unwrap_or_else(|| DEFAULT_BASE_DOMAIN.to_string())
            .trim()
            .trim_end_matches('/')
            .to_string();
        validate_base_domain(&base_domain)?;

        let download_path = match config.download_path {
            Some(path) => non_empty(path, "download_path")?,
            None => default_download_path()?,
        };
        let database_path = match config.database_path {
            Some(path) => non_empty(path, "database_path")?,
            None => default_database_path()?,
        };

        let allow_list = config.category_allow_list.unwrap_or_default();
        if allow_list.is_empty() {
            return Err(CatalogError::MissingSetting("category_allow_list"));
        }
        let categories = if config.categories.is_empty() {
            allow_list.all()
        } else {
            config
                .categories
                .iter()
                .map(|&id| allow_list.resolve(id))
                .collect::<Result<Vec<_>, _>>()?
        };

        let connect_timeout = timeout(config.connect_timeout_secs, 30, "connect_timeout_secs")?;
        let timeout = timeout(config.timeout_secs, 300, "timeout_secs")?;

        let token_field = config.token_field.unwrap_or_else(|| "_token".to_string());
        if token_field.trim().is_empty() {
            return Err(CatalogError::MissingSetting("token_field"));
        }

        let sheets = config.sheets.unwrap_or_default();
        if sheets.catalog_sheet.is_empty() || sheets.specifications_sheet.is_empty() {
            return Err(CatalogError::MissingSetting("sheets"));
        }

        Ok(ResolvedConfig {
            base_domain,
            download_path,
            database_path,
            categories,
            allow_list,
            export_format: config.export_format.unwrap_or(ExportFormat::Xlsx),
            connect_timeout,
            timeout,
            freshness_window: FRESHNESS_WINDOW,
            token_field,
            sheets,
        })
    }
}

fn hostname_regex() -> &'static Regex {
    static HOSTNAME: OnceLock<Regex> = OnceLock::new();
    HOSTNAME.get_or_init(|| {
        Regex::new(
            r"^(?i)https?://([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)(\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)*(:\d{1,5})?$",
        )
        .expect("hostname regex is valid")
    })
}

pub fn validate_base_domain(value: &str) -> Result<(), CatalogError> {
    if hostname_regex().is_match(value) {
        Ok(())
    } else {
        Err(CatalogError::InvalidDomain(value.to_string()))
    }
}

fn non_empty(path: Utf8PathBuf, name: &'static str) -> Result<Utf8PathBuf, CatalogError> {
    if path.as_str().trim().is_empty() {
        Err(CatalogError::MissingSetting(name))
    } else {
        Ok(path)
    }
}

fn timeout(value: Option<u64>, default: u64, name: &'static str) -> Result<Duration, CatalogError> {
    match value.unwrap_or(default) {
        0 => Err(CatalogError::MissingSetting(name)),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn base_dirs() -> Result<BaseDirs, CatalogError> {
    BaseDirs::new()
        .ok_or_else(|| CatalogError::Filesystem("unable to resolve home directory".to_string()))
}

fn utf8(path: PathBuf) -> Result<Utf8PathBuf, CatalogError> {
    Utf8PathBuf::from_path_buf(path)
        .map_err(|path| CatalogError::Filesystem(format!("non-utf8 path: {}", path.display())))
}

pub fn default_download_path() -> Result<Utf8PathBuf, CatalogError> {
    let dirs = base_dirs()?;
    utf8(dirs.cache_dir().join("ridan-catalog").join("ridan-catalog.zip"))
}

pub fn default_database_path() -> Result<Utf8PathBuf, CatalogError> {
    let dirs = base_dirs()?;
    utf8(dirs.data_dir().join("ridan-catalog").join("catalog.sqlite"))
}
