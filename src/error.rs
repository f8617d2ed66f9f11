use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CatalogError {
    #[error("config file not found")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("required setting is empty: {0}")]
    MissingSetting(&'static str),

    #[error("invalid base domain: {0}")]
    InvalidDomain(String),

    #[error("unknown category: {0}")]
    #[diagnostic(help("categories must be one of the ids in category_allow_list"))]
    UnknownCategory(String),

    #[error("catalog request failed: {0}")]
    Http(String),

    #[error("catalog server returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("export page is not valid markup: {0}")]
    MalformedPage(String),

    #[error("security token `{0}` not found on export page")]
    MissingToken(String),

    #[error("unexpected content type `{0}`, expected a spreadsheet or zip archive")]
    UnexpectedContentType(String),

    #[error("downloaded file is empty: {0}")]
    EmptyDownload(PathBuf),

    #[error("catalog download failed")]
    DownloadFailed(#[source] Box<CatalogError>),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("not a zip archive: {0}")]
    NotAnArchive(PathBuf),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("failed to read spreadsheet: {0}")]
    Spreadsheet(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("failed to save {table} batch, rolled back")]
    BatchWrite {
        table: &'static str,
        #[source]
        source: rusqlite::Error,
    },
}

impl From<rusqlite::Error> for CatalogError {
    fn from(err: rusqlite::Error) -> Self {
        CatalogError::Database(err.to_string())
    }
}
