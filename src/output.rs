use std::io::{self, Write};

use serde::Serialize;

use crate::app::ProductPage;
use crate::domain::Product;
use crate::download::{FetchOutcome, FileInfo};
use crate::ingest::DatabaseStats;

#[derive(Debug, Serialize)]
struct DownloadReport<'a> {
    downloaded: bool,
    file: &'a FileInfo,
}

#[derive(Debug, Serialize)]
struct InfoReport<'a> {
    target: &'a str,
    exists: bool,
    file: Option<&'a FileInfo>,
}

#[derive(Debug, Serialize)]
struct ProductReport<'a> {
    material: &'a str,
    found: bool,
    product: Option<&'a Product>,
}

/// Writes command results to stdout as pretty-printed JSON.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_stats(stats: &DatabaseStats) -> io::Result<()> {
        Self::print_json(stats)
    }

    pub fn print_download(outcome: &FetchOutcome) -> io::Result<()> {
        Self::print_json(&DownloadReport {
            downloaded: outcome.was_downloaded(),
            file: outcome.file(),
        })
    }

    pub fn print_file_info(target: &str, info: Option<&FileInfo>) -> io::Result<()> {
        Self::print_json(&InfoReport {
            target,
            exists: info.is_some(),
            file: info,
        })
    }

    pub fn print_product(material: &str, product: Option<&Product>) -> io::Result<()> {
        Self::print_json(&ProductReport {
            material,
            found: product.is_some(),
            product,
        })
    }

    pub fn print_page(page: &ProductPage) -> io::Result<()> {
        Self::print_json(page)
    }

    pub fn print_values(values: &[String]) -> io::Result<()> {
        Self::print_json(&values)
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
