use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use zip::write::SimpleFileOptions;

use ridan_catalog::app::CatalogManager;
use ridan_catalog::domain::{CategoryAllowList, ExportFormat};
use ridan_catalog::download::{
    DownloadSettings, Downloader, ExportForm, ExportPayload, ExportTransport,
};
use ridan_catalog::error::CatalogError;
use ridan_catalog::ingest::{SheetLayout, SqliteCatalogProcessor};
use ridan_catalog::repository::ProductRepository;
use ridan_catalog::spreadsheet::{Row, SheetRows, SpreadsheetReader, Workbook};

struct MockTransport {
    content_type: &'static str,
    body: Vec<u8>,
}

impl ExportTransport for MockTransport {
    fn fetch_export_page(&self) -> Result<String, CatalogError> {
        Ok(r#"<form><input type="hidden" name="_token" value="t"></form>"#.to_string())
    }

    fn submit_export(&self, _form: &ExportForm) -> Result<ExportPayload, CatalogError> {
        Ok(ExportPayload {
            content_type: self.content_type.to_string(),
            body: Box::new(Cursor::new(self.body.clone())),
        })
    }
}

/// Resolves a file to sheets by its text content, so extracted archive
/// entries can be told apart without real spreadsheets.
#[derive(Default)]
struct ContentReader {
    by_content: HashMap<String, Vec<(String, Vec<Row>)>>,
}

struct MockWorkbook {
    sheets: Vec<(String, Vec<Row>)>,
}

impl Workbook for MockWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.clone()).collect()
    }

    fn rows(&mut self, sheet: &str) -> Result<SheetRows<'_>, CatalogError> {
        let rows = self
            .sheets
            .iter()
            .find(|(name, _)| name == sheet)
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default();
        Ok(Box::new(rows.into_iter()))
    }
}

impl SpreadsheetReader for ContentReader {
    fn open(&self, path: &Path) -> Result<Box<dyn Workbook>, CatalogError> {
        let content = fs::read_to_string(path)
            .map_err(|err| CatalogError::Spreadsheet(err.to_string()))?;
        let sheets = self
            .by_content
            .get(content.trim())
            .cloned()
            .ok_or_else(|| CatalogError::Spreadsheet(format!("corrupt: {}", path.display())))?;
        Ok(Box::new(MockWorkbook { sheets }))
    }
}

fn row(cells: &[&str]) -> Row {
    cells.iter().map(|cell| cell.to_string()).collect()
}

fn catalog(materials: &[&str]) -> Vec<(String, Vec<Row>)> {
    let mut rows = vec![row(&["Материал", "Цена", "Серия"])];
    rows.extend(materials.iter().map(|material| row(&[*material, "5", "RLV"])));
    vec![
        ("Каталог".to_string(), rows),
        (
            "Тех.характеристики".to_string(),
            vec![
                row(&["Материал", "Название характеристики", "Значение характеристики"]),
                row(&[materials[0], "Вес", "1 кг"]),
            ],
        ),
    ]
}

fn reader() -> ContentReader {
    let mut by_content = HashMap::new();
    by_content.insert("first".to_string(), catalog(&["A", "B"]));
    by_content.insert("second".to_string(), catalog(&["C", "D", "E"]));
    ContentReader { by_content }
}

fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn manager(
    temp: &tempfile::TempDir,
    target: &str,
    transport: MockTransport,
) -> CatalogManager<MockTransport, SqliteCatalogProcessor<ContentReader>> {
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let settings = DownloadSettings {
        target: root.join("downloads").join(target),
        categories: CategoryAllowList::vendor_default().all(),
        format: ExportFormat::Xlsx,
        token_field: "_token".to_string(),
        freshness_window: Duration::from_secs(7 * 24 * 60 * 60),
    };
    let db = root.join("catalog.sqlite");
    let processor = SqliteCatalogProcessor::with_reader(&db, SheetLayout::default(), reader()).unwrap();
    let repository = ProductRepository::open(&db).unwrap();
    CatalogManager::new(Downloader::new(transport, settings), processor, repository)
}

#[test]
fn archive_import_skips_failing_entries() {
    let temp = tempfile::tempdir().unwrap();
    let transport = MockTransport {
        content_type: "application/zip",
        body: zip_bytes(&[
            ("1.xlsx", "first"),
            ("2.xlsx", "garbage"),
            ("nested/3.xlsx", "second"),
        ]),
    };
    let mut manager = manager(&temp, "export.zip", transport);

    let stats = manager.update_and_import(false, true).unwrap();
    assert_eq!(stats.product_count, 5);
    assert_eq!(stats.specification_count, 2);
    assert!(temp.path().join("downloads/export/nested/3.xlsx").is_file());

    let info = manager.download_file_info().unwrap();
    assert!(!info.needs_refresh);
}

#[test]
fn single_file_failure_propagates() {
    let temp = tempfile::tempdir().unwrap();
    let transport = MockTransport {
        content_type: "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        body: b"garbage".to_vec(),
    };
    let mut manager = manager(&temp, "catalog.xlsx", transport);

    assert_matches!(
        manager.update_and_import(false, false),
        Err(CatalogError::Spreadsheet(_))
    );
}

#[test]
fn download_failure_stops_the_update() {
    let temp = tempfile::tempdir().unwrap();
    let transport = MockTransport {
        content_type: "text/html",
        body: b"<html></html>".to_vec(),
    };
    let mut manager = manager(&temp, "catalog.xlsx", transport);

    let err = manager.update_and_import(true, false).unwrap_err();
    assert_matches!(err, CatalogError::DownloadFailed(ref inner)
        if matches!(**inner, CatalogError::UnexpectedContentType(_)));
    assert!(manager.download_file_info().is_none());
    assert_eq!(manager.database_stats().unwrap().product_count, 0);
}

#[test]
fn queries_after_import() {
    let temp = tempfile::tempdir().unwrap();
    let transport = MockTransport {
        content_type: "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        body: b"second".to_vec(),
    };
    let mut manager = manager(&temp, "catalog.xlsx", transport);
    manager.update_and_import(false, false).unwrap();

    let page = manager
        .find_products_excluding(&["D".to_string()], 2, 1)
        .unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].material, "E");

    let product = manager.find_product("C").unwrap().unwrap();
    assert!(product.characteristics.has("Вес"));
    assert!(manager.find_product("Z").unwrap().is_none());
    assert_eq!(manager.unique_series().unwrap(), vec!["RLV"]);
    assert_eq!(manager.unique_subcategories().unwrap(), vec![""]);
}

#[test]
fn reset_replaces_previous_import() {
    let temp = tempfile::tempdir().unwrap();
    let transport = MockTransport {
        content_type: "application/zip",
        body: zip_bytes(&[("1.xlsx", "first")]),
    };
    let mut manager = manager(&temp, "export.zip", transport);

    let local = temp.path().join("second.xlsx");
    fs::write(&local, "second").unwrap();
    manager.process_file(&local, false).unwrap();
    assert_eq!(manager.database_stats().unwrap().product_count, 3);

    let stats = manager.update_and_import(false, true).unwrap();
    assert_eq!(stats.product_count, 2);

    let stats = manager.unzip_and_process(false).unwrap();
    assert_eq!(stats.product_count, 2);
}
