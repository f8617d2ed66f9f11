use std::path::Path;

use camino::Utf8Path;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ResolvedConfig;
use crate::domain::Product;
use crate::download::{
    DownloadSettings, Downloader, ExportTransport, FetchOutcome, FileInfo, HttpExportTransport,
};
use crate::error::CatalogError;
use crate::fs_util::{is_zip_path, list_files, unzip_to_folder};
use crate::ingest::{CatalogProcessor, DatabaseStats, SqliteCatalogProcessor};
use crate::repository::{ProductRepository, total_pages};

#[derive(Debug, Clone, Serialize)]
pub struct ProductPage {
    pub items: Vec<Product>,
    pub page: usize,
    pub per_page: usize,
    pub total: u64,
    pub total_pages: u64,
}

/// Ties acquisition, ingestion and queries together for one catalog mirror.
pub struct CatalogManager<T: ExportTransport, P: CatalogProcessor> {
    downloader: Downloader<T>,
    processor: P,
    repository: ProductRepository,
}

impl CatalogManager<HttpExportTransport, SqliteCatalogProcessor> {
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, CatalogError> {
        let transport = HttpExportTransport::new(
            &config.base_domain,
            config.connect_timeout,
            config.timeout,
        )?;
        let downloader = Downloader::new(transport, download_settings(config));
        let processor = SqliteCatalogProcessor::open(&config.database_path, config.sheets.clone())?;
        let repository = ProductRepository::open(&config.database_path)?;
        Ok(Self::new(downloader, processor, repository))
    }
}

pub fn download_settings(config: &ResolvedConfig) -> DownloadSettings {
    DownloadSettings {
        target: config.download_path.clone(),
        categories: config.categories.clone(),
        format: config.export_format,
        token_field: config.token_field.clone(),
        freshness_window: config.freshness_window,
    }
}

impl<T: ExportTransport, P: CatalogProcessor> CatalogManager<T, P> {
    pub fn new(downloader: Downloader<T>, processor: P, repository: ProductRepository) -> Self {
        Self {
            downloader,
            processor,
            repository,
        }
    }

    /// Makes sure a fresh export is on disk, then imports it.
    ///
    /// A `.zip` export is extracted and every file in it is imported; a file
    /// that fails is logged and skipped. Any other export is imported as a
    /// single spreadsheet and its failure is returned.
    pub fn update_and_import(
        &mut self,
        force_download: bool,
        reset_database: bool,
    ) -> Result<DatabaseStats, CatalogError> {
        if force_download {
            self.force_download()?;
        } else {
            self.download_if_needed()?;
        }

        if reset_database {
            self.processor.init()?;
        }

        let target = self.downloader.target().to_path_buf();
        if is_zip_path(&target) {
            self.import_archive(&target)?;
        } else {
            self.processor.process_file(target.as_std_path())?;
        }
        self.processor.database_stats()
    }

    pub fn download_if_needed(&self) -> Result<FetchOutcome, CatalogError> {
        self.downloader
            .fetch_if_needed()
            .map_err(|err| CatalogError::DownloadFailed(Box::new(err)))
    }

    pub fn force_download(&self) -> Result<FileInfo, CatalogError> {
        self.downloader
            .force_refetch()
            .map_err(|err| CatalogError::DownloadFailed(Box::new(err)))
    }

    pub fn unzip_and_process(&mut self, reset_database: bool) -> Result<DatabaseStats, CatalogError> {
        if reset_database {
            self.processor.init()?;
        }
        let target = self.downloader.target().to_path_buf();
        self.import_archive(&target)?;
        self.processor.database_stats()
    }

    pub fn process_file(
        &mut self,
        path: &Path,
        reset_database: bool,
    ) -> Result<DatabaseStats, CatalogError> {
        if reset_database {
            self.processor.init()?;
        }
        self.processor.process_file(path)?;
        self.processor.database_stats()
    }

    pub fn database_stats(&self) -> Result<DatabaseStats, CatalogError> {
        self.processor.database_stats()
    }

    pub fn download_file_info(&self) -> Option<FileInfo> {
        self.downloader.file_info()
    }

    pub fn find_product(&self, material: &str) -> Result<Option<Product>, CatalogError> {
        self.repository.find_by_material(material)
    }

    pub fn find_products_excluding(
        &self,
        exclude: &[String],
        page: usize,
        per_page: usize,
    ) -> Result<ProductPage, CatalogError> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let items = self.repository.find_excluding(exclude, page, per_page)?;
        let total = self.repository.count_excluding(exclude)?;
        Ok(ProductPage {
            items,
            page,
            per_page,
            total,
            total_pages: total_pages(total, per_page),
        })
    }

    pub fn unique_series(&self) -> Result<Vec<String>, CatalogError> {
        self.repository.distinct_series()
    }

    pub fn unique_subcategories(&self) -> Result<Vec<String>, CatalogError> {
        self.repository.distinct_subcategories()
    }

    fn import_archive(&mut self, archive: &Utf8Path) -> Result<(), CatalogError> {
        let directory = unzip_to_folder(archive)?;
        let files = list_files(directory.as_std_path())?;
        if files.is_empty() {
            warn!(directory = %directory, "archive contained no files");
        }

        let mut processed = 0usize;
        let mut failed = 0usize;
        for file in files {
            match self.processor.process_file(&file) {
                Ok(_) => processed += 1,
                Err(err) => {
                    let shown = file.display().to_string();
                    warn!(file = %shown, error = %err, "skipping file that failed to import");
                    failed += 1;
                }
            }
        }
        info!(processed, failed, "archive import finished");
        Ok(())
    }
}
