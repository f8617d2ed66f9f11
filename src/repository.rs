use camino::Utf8Path;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params, params_from_iter};
use rusqlite::types::Value;

use crate::domain::{Product, ProductRecord, Specification, SpecificationCollection};
use crate::error::CatalogError;

const PRODUCT_COLUMNS: &str =
    "material, description, catalog_name, price, currency, series, subcategory, category, direction";

/// Read-only queries over the catalog store.
///
/// Every returned product is hydrated with one extra query for its
/// characteristics, so a page of N products costs N + 1 queries.
pub struct ProductRepository {
    conn: Connection,
}

impl ProductRepository {
    pub fn open(path: &Utf8Path) -> Result<Self, CatalogError> {
        let conn = Connection::open_with_flags(
            path.as_std_path(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| CatalogError::Database(format!("open {path}: {err}")))?;
        Ok(Self { conn })
    }

    pub fn find_by_material(&self, material: &str) -> Result<Option<Product>, CatalogError> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE material = ?1"),
                params![material],
                record_from_row,
            )
            .optional()?;
        record.map(|record| self.hydrate(record)).transpose()
    }

    pub fn find_all(&self) -> Result<Vec<Product>, CatalogError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY material"))?;
        let records = stmt
            .query_map([], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        records
            .into_iter()
            .map(|record| self.hydrate(record))
            .collect()
    }

    /// Products whose material is not in `exclude`, ordered by material.
    /// `page` and `per_page` are clamped to at least 1.
    pub fn find_excluding(
        &self,
        exclude: &[String],
        page: usize,
        per_page: usize,
    ) -> Result<Vec<Product>, CatalogError> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let offset = (page - 1).saturating_mul(per_page);

        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products{} ORDER BY material LIMIT ? OFFSET ?",
            exclusion_clause(exclude)
        );
        let mut values = exclusion_params(exclude)?;
        values.push(Value::Integer(to_sql_int(per_page)));
        values.push(Value::Integer(to_sql_int(offset)));

        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(values), record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        records
            .into_iter()
            .map(|record| self.hydrate(record))
            .collect()
    }

    pub fn count_excluding(&self, exclude: &[String]) -> Result<u64, CatalogError> {
        let sql = format!("SELECT COUNT(*) FROM products{}", exclusion_clause(exclude));
        let count: i64 = self.conn.query_row(
            &sql,
            params_from_iter(exclusion_params(exclude)?),
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn distinct_series(&self) -> Result<Vec<String>, CatalogError> {
        self.distinct("series")
    }

    pub fn distinct_subcategories(&self) -> Result<Vec<String>, CatalogError> {
        self.distinct("subcategory")
    }

    fn distinct(&self, column: &'static str) -> Result<Vec<String>, CatalogError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT DISTINCT {column} FROM products
             WHERE {column} IS NOT NULL
             ORDER BY {column}"
        ))?;
        let values = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(values)
    }

    pub fn specifications(&self, material: &str) -> Result<SpecificationCollection, CatalogError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT characteristic_name, characteristic_value
             FROM specifications
             WHERE product_material = ?1
             ORDER BY characteristic_name",
        )?;
        let specs = stmt
            .query_map(params![material], |row| {
                Ok(Specification::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                ))
            })?
            .collect::<Result<SpecificationCollection, _>>()?;
        Ok(specs)
    }

    fn hydrate(&self, record: ProductRecord) -> Result<Product, CatalogError> {
        let characteristics = self.specifications(&record.material)?;
        Ok(Product::from_record(record, characteristics))
    }
}

pub fn total_pages(total: u64, per_page: usize) -> u64 {
    let per_page = per_page.max(1) as u64;
    total.div_ceil(per_page).max(1)
}

// The whole set travels as one JSON array parameter, so its size is not
// bounded by the bound-variable limit.
fn exclusion_clause(exclude: &[String]) -> &'static str {
    if exclude.is_empty() {
        ""
    } else {
        " WHERE material NOT IN (SELECT value FROM json_each(?))"
    }
}

fn exclusion_params(exclude: &[String]) -> Result<Vec<Value>, CatalogError> {
    if exclude.is_empty() {
        return Ok(Vec::new());
    }
    let array =
        serde_json::to_string(exclude).map_err(|err| CatalogError::Database(err.to_string()))?;
    Ok(vec![Value::Text(array)])
}

fn to_sql_int(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ProductRecord> {
    Ok(ProductRecord {
        material: row.get(0)?,
        description: row.get(1)?,
        catalog_name: row.get(2)?,
        price: row.get(3)?,
        currency: row.get(4)?,
        series: row.get(5)?,
        subcategory: row.get(6)?,
        category: row.get(7)?,
        direction: row.get(8)?,
    })
}
