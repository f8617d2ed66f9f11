use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use calamine::{Data, Range, Reader, Sheets, open_workbook_auto};

use crate::error::CatalogError;

/// One spreadsheet row as an ordered list of cell texts.
pub type Row = Vec<String>;

pub type SheetRows<'a> = Box<dyn Iterator<Item = Row> + 'a>;

/// An opened spreadsheet file.
pub trait Workbook {
    fn sheet_names(&self) -> Vec<String>;
    fn rows(&mut self, sheet: &str) -> Result<SheetRows<'_>, CatalogError>;
}

pub trait SpreadsheetReader {
    fn open(&self, path: &Path) -> Result<Box<dyn Workbook>, CatalogError>;
}

/// Reads `.xlsx`, `.xls`, `.xlsb` and `.ods` files through calamine.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalamineReader;

impl SpreadsheetReader for CalamineReader {
    fn open(&self, path: &Path) -> Result<Box<dyn Workbook>, CatalogError> {
        let sheets = open_workbook_auto(path).map_err(|err| {
            CatalogError::Spreadsheet(format!("open {}: {err}", path.display()))
        })?;
        Ok(Box::new(CalamineWorkbook { sheets }))
    }
}

struct CalamineWorkbook {
    sheets: Sheets<BufReader<File>>,
}

impl Workbook for CalamineWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.sheet_names()
    }

    fn rows(&mut self, sheet: &str) -> Result<SheetRows<'_>, CatalogError> {
        let range = self
            .sheets
            .worksheet_range(sheet)
            .map_err(|err| CatalogError::Spreadsheet(format!("sheet {sheet}: {err}")))?;
        Ok(Box::new(RangeRows { range, next: 0 }))
    }
}

struct RangeRows {
    range: Range<Data>,
    next: usize,
}

impl Iterator for RangeRows {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        let (height, width) = self.range.get_size();
        if self.next >= height {
            return None;
        }
        let row = (0..width)
            .map(|col| {
                self.range
                    .get((self.next, col))
                    .map(cell_text)
                    .unwrap_or_default()
            })
            .collect();
        self.next += 1;
        Some(row)
    }
}

pub fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(value) | Data::DateTimeIso(value) | Data::DurationIso(value) => {
            value.clone()
        }
        Data::Int(value) => value.to_string(),
        Data::Float(value) => float_text(*value),
        Data::Bool(value) => value.to_string(),
        Data::DateTime(value) => float_text(value.as_f64()),
    }
}

fn float_text(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}
