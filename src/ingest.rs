use std::collections::HashMap;
use std::fs;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::domain::{ProductRecord, SpecificationRecord, parse_price};
use crate::error::CatalogError;
use crate::spreadsheet::{CalamineReader, Row, SheetRows, SpreadsheetReader};

pub const BATCH_SIZE: usize = 1000;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    material TEXT NOT NULL UNIQUE CHECK (material <> ''),
    description TEXT NOT NULL DEFAULT '',
    catalog_name TEXT NOT NULL DEFAULT '',
    price REAL NOT NULL DEFAULT 0 CHECK (price >= 0),
    currency TEXT NOT NULL DEFAULT '',
    series TEXT NOT NULL DEFAULT '',
    subcategory TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL DEFAULT '',
    direction TEXT NOT NULL DEFAULT '',
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
CREATE TABLE IF NOT EXISTS specifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_material TEXT NOT NULL CHECK (product_material <> ''),
    characteristic_name TEXT NOT NULL,
    characteristic_value TEXT NOT NULL DEFAULT '',
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    -- one value per characteristic name; a repeated name keeps the last value read
    UNIQUE (product_material, characteristic_name)
);
CREATE INDEX IF NOT EXISTS idx_products_material ON products(material);
CREATE INDEX IF NOT EXISTS idx_specs_material ON specifications(product_material);
CREATE INDEX IF NOT EXISTS idx_specs_name ON specifications(characteristic_name);
";

/// Sheet and column names of the vendor export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetLayout {
    pub catalog_sheet: String,
    pub specifications_sheet: String,
    pub material: String,
    pub description: String,
    pub catalog_name: String,
    pub price: String,
    pub currency: String,
    pub series: String,
    pub subcategory: String,
    pub category: String,
    pub direction: String,
    pub characteristic_name: String,
    pub characteristic_value: String,
}

impl Default for SheetLayout {
    fn default() -> Self {
        Self {
            catalog_sheet: "Каталог".to_string(),
            specifications_sheet: "Тех.характеристики".to_string(),
            material: "Материал".to_string(),
            description: "Описание".to_string(),
            catalog_name: "Название из каталога".to_string(),
            price: "Цена".to_string(),
            currency: "Валюта".to_string(),
            series: "Серия".to_string(),
            subcategory: "Подкатегория".to_string(),
            category: "Категория".to_string(),
            direction: "Направление".to_string(),
            characteristic_name: "Название характеристики".to_string(),
            characteristic_value: "Значение характеристики".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    pub product_count: u64,
    pub specification_count: u64,
    pub storage_byte_size: u64,
    pub storage_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub products: usize,
    pub specifications: usize,
    pub skipped_sheets: Vec<String>,
}

/// Storage side of an import run.
///
/// `init` resets the store, `process_file` imports one spreadsheet and may be
/// called repeatedly, `database_stats` is a read-only snapshot.
pub trait CatalogProcessor {
    fn init(&mut self) -> Result<(), CatalogError>;
    fn process_file(&mut self, path: &Path) -> Result<ImportSummary, CatalogError>;
    fn database_stats(&self) -> Result<DatabaseStats, CatalogError>;
}

pub struct SqliteCatalogProcessor<R: SpreadsheetReader = CalamineReader> {
    conn: Connection,
    path: Utf8PathBuf,
    reader: R,
    layout: SheetLayout,
}

impl SqliteCatalogProcessor<CalamineReader> {
    pub fn open(path: &Utf8Path, layout: SheetLayout) -> Result<Self, CatalogError> {
        Self::with_reader(path, layout, CalamineReader)
    }
}

impl<R: SpreadsheetReader> SqliteCatalogProcessor<R> {
    pub fn with_reader(path: &Utf8Path, layout: SheetLayout, reader: R) -> Result<Self, CatalogError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| CatalogError::Filesystem(format!("create {parent}: {err}")))?;
        }
        let conn = Connection::open(path.as_std_path())?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            reader,
            layout,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Upserts one batch of products inside a single transaction.
    pub fn save_products(&mut self, batch: &[ProductRecord]) -> Result<(), CatalogError> {
        let result = (|| {
            let tx = self.conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO products
                        (material, description, catalog_name, price, currency, series, subcategory, category, direction)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(material) DO UPDATE SET
                        description = excluded.description,
                        catalog_name = excluded.catalog_name,
                        price = excluded.price,
                        currency = excluded.currency,
                        series = excluded.series,
                        subcategory = excluded.subcategory,
                        category = excluded.category,
                        direction = excluded.direction",
                )?;
                for product in batch {
                    stmt.execute(params![
                        product.material,
                        product.description,
                        product.catalog_name,
                        product.price,
                        product.currency,
                        product.series,
                        product.subcategory,
                        product.category,
                        product.direction,
                    ])?;
                }
            }
            tx.commit()
        })();

        match result {
            Ok(()) => {
                debug!(rows = batch.len(), "saved products batch");
                Ok(())
            }
            Err(source) => {
                error!(error = %source, rows = batch.len(), "products batch rolled back");
                Err(CatalogError::BatchWrite {
                    table: "products",
                    source,
                })
            }
        }
    }

    /// Upserts one batch of characteristics inside a single transaction.
    pub fn save_specifications(
        &mut self,
        batch: &[SpecificationRecord],
    ) -> Result<(), CatalogError> {
        let result = (|| {
            let tx = self.conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO specifications
                        (product_material, characteristic_name, characteristic_value)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(product_material, characteristic_name) DO UPDATE SET
                        characteristic_value = excluded.characteristic_value",
                )?;
                for spec in batch {
                    stmt.execute(params![
                        spec.product_material,
                        spec.characteristic_name,
                        spec.characteristic_value,
                    ])?;
                }
            }
            tx.commit()
        })();

        match result {
            Ok(()) => {
                debug!(rows = batch.len(), "saved specifications batch");
                Ok(())
            }
            Err(source) => {
                error!(error = %source, rows = batch.len(), "specifications batch rolled back");
                Err(CatalogError::BatchWrite {
                    table: "specifications",
                    source,
                })
            }
        }
    }

    fn process_catalog_sheet(&mut self, mut rows: SheetRows<'_>) -> Result<usize, CatalogError> {
        let Some(headers) = rows.next() else {
            return Ok(0);
        };
        let columns = HeaderIndex::new(&headers);
        let layout = self.layout.clone();
        let identity = columns.position(&layout.material).unwrap_or(0);

        let mut batch = Vec::with_capacity(BATCH_SIZE);
        let mut total = 0usize;
        for row in rows {
            if cell(&row, identity).trim().is_empty() {
                continue;
            }
            batch.push(product_from_row(&row, identity, &columns, &layout));
            if batch.len() >= BATCH_SIZE {
                total += batch.len();
                self.save_products(&batch)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            total += batch.len();
            self.save_products(&batch)?;
        }
        Ok(total)
    }

    fn process_specifications_sheet(
        &mut self,
        mut rows: SheetRows<'_>,
    ) -> Result<usize, CatalogError> {
        let Some(headers) = rows.next() else {
            return Ok(0);
        };
        let columns = HeaderIndex::new(&headers);
        let layout = self.layout.clone();
        let identity = columns.position(&layout.material).unwrap_or(0);

        // Continuation rows leave the identity cell blank.
        let mut current: Option<String> = None;
        let mut batch = Vec::with_capacity(BATCH_SIZE);
        let mut total = 0usize;
        for row in rows {
            let material = cell(&row, identity).trim();
            if !material.is_empty() {
                current = Some(material.to_string());
            }
            let Some(material) = current.as_ref() else {
                continue;
            };
            batch.push(SpecificationRecord {
                product_material: material.clone(),
                characteristic_name: columns.value(&row, &layout.characteristic_name),
                characteristic_value: columns.value(&row, &layout.characteristic_value),
            });
            if batch.len() >= BATCH_SIZE {
                total += batch.len();
                self.save_specifications(&batch)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            total += batch.len();
            self.save_specifications(&batch)?;
        }
        Ok(total)
    }

    fn import(&mut self, path: &Path) -> Result<ImportSummary, CatalogError> {
        let mut workbook = self.reader.open(path)?;
        let mut summary = ImportSummary::default();
        for name in workbook.sheet_names() {
            if name == self.layout.catalog_sheet {
                debug!(sheet = %name, "processing catalog sheet");
                let rows = workbook.rows(&name)?;
                summary.products += self.process_catalog_sheet(rows)?;
            } else if name == self.layout.specifications_sheet {
                debug!(sheet = %name, "processing specifications sheet");
                let rows = workbook.rows(&name)?;
                summary.specifications += self.process_specifications_sheet(rows)?;
            } else {
                warn!(sheet = %name, "skipping unrecognized sheet");
                summary.skipped_sheets.push(name);
            }
        }
        Ok(summary)
    }
}

impl<R: SpreadsheetReader> CatalogProcessor for SqliteCatalogProcessor<R> {
    fn init(&mut self) -> Result<(), CatalogError> {
        self.conn.execute_batch(SCHEMA)?;
        self.conn
            .execute_batch("DELETE FROM specifications; DELETE FROM products;")?;
        info!(store = %self.path, "catalog store reset");
        Ok(())
    }

    fn process_file(&mut self, path: &Path) -> Result<ImportSummary, CatalogError> {
        info!(file = %path.display(), "importing spreadsheet");
        match self.import(path) {
            Ok(summary) => {
                info!(
                    file = %path.display(),
                    products = summary.products,
                    specifications = summary.specifications,
                    "spreadsheet imported"
                );
                Ok(summary)
            }
            Err(err) => {
                error!(file = %path.display(), error = %err, "spreadsheet import failed");
                Err(err)
            }
        }
    }

    fn database_stats(&self) -> Result<DatabaseStats, CatalogError> {
        let product_count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))?;
        let specification_count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM specifications", [], |row| row.get(0))?;
        let storage_byte_size = fs::metadata(self.path.as_std_path())
            .map(|meta| meta.len())
            .unwrap_or(0);
        Ok(DatabaseStats {
            product_count: product_count as u64,
            specification_count: specification_count as u64,
            storage_byte_size,
            storage_path: self.path.to_string(),
        })
    }
}

/// Maps header names to column positions; the first occurrence wins.
struct HeaderIndex {
    positions: HashMap<String, usize>,
}

impl HeaderIndex {
    fn new(headers: &Row) -> Self {
        let mut positions = HashMap::new();
        for (index, header) in headers.iter().enumerate() {
            positions.entry(header.trim().to_string()).or_insert(index);
        }
        Self { positions }
    }

    fn position(&self, header: &str) -> Option<usize> {
        self.positions.get(header).copied()
    }

    fn value(&self, row: &Row, header: &str) -> String {
        self.position(header)
            .map(|index| cell(row, index).to_string())
            .unwrap_or_default()
    }
}

fn cell(row: &Row, index: usize) -> &str {
    row.get(index).map(String::as_str).unwrap_or("")
}

fn product_from_row(
    row: &Row,
    identity: usize,
    columns: &HeaderIndex,
    layout: &SheetLayout,
) -> ProductRecord {
    ProductRecord {
        material: cell(row, identity).trim().to_string(),
        description: columns.value(row, &layout.description),
        catalog_name: columns.value(row, &layout.catalog_name),
        price: parse_price(&columns.value(row, &layout.price)),
        currency: columns.value(row, &layout.currency),
        series: columns.value(row, &layout.series),
        subcategory: columns.value(row, &layout.subcategory),
        category: columns.value(row, &layout.category),
        direction: columns.value(row, &layout.direction),
    }
}
