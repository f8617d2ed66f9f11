use std::io::{Cursor, Write};
use std::time::Duration;

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

enum Cell<'a> {
    Text(&'a str),
    Number(&'a str),
}

fn sheet_xml(rows: &[Vec<Cell<'_>>]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (r, cells) in rows.iter().enumerate() {
        xml.push_str(&format!(r#"<row r="{}">"#, r + 1));
        for (c, cell) in cells.iter().enumerate() {
            let reference = format!("{}{}", (b'A' + c as u8) as char, r + 1);
            match cell {
                Cell::Text("") => {}
                Cell::Text(text) => xml.push_str(&format!(
                    r#"<c r="{reference}" t="inlineStr"><is><t>{text}</t></is></c>"#
                )),
                Cell::Number(value) => {
                    xml.push_str(&format!(r#"<c r="{reference}"><v>{value}</v></c>"#))
                }
            }
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

fn xlsx_bytes(sheets: &[(&str, String)]) -> Vec<u8> {
    let mut content_types = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
    );
    let mut workbook = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
    );
    let mut rels = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    for (i, (name, _)) in sheets.iter().enumerate() {
        let n = i + 1;
        content_types.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{n}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#
        ));
        workbook.push_str(&format!(r#"<sheet name="{name}" sheetId="{n}" r:id="rId{n}"/>"#));
        rels.push_str(&format!(
            r#"<Relationship Id="rId{n}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{n}.xml"/>"#
        ));
    }
    content_types.push_str("</Types>");
    workbook.push_str("</sheets></workbook>");
    rels.push_str("</Relationships>");

    let root_rels = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

    let mut parts = vec![
        ("[Content_Types].xml".to_string(), content_types),
        ("_rels/.rels".to_string(), root_rels.to_string()),
        ("xl/workbook.xml".to_string(), workbook),
        ("xl/_rels/workbook.xml.rels".to_string(), rels),
    ];
    for (i, (_, xml)) in sheets.iter().enumerate() {
        parts.push((format!("xl/worksheets/sheet{}.xml", i + 1), xml.clone()));
    }
    zip_bytes(&parts)
}

fn zip_bytes<N: AsRef<str>, C: AsRef<[u8]>>(entries: &[(N, C)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(name.as_ref(), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_ref()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn vendor_workbook() -> Vec<u8> {
    use Cell::{Number, Text};
    let catalog = sheet_xml(&[
        vec![
            Text("Материал"),
            Text("Описание"),
            Text("Название из каталога"),
            Text("Цена"),
            Text("Валюта"),
            Text("Серия"),
            Text("Подкатегория"),
            Text("Категория"),
            Text("Направление"),
        ],
        vec![
            Text("009D0005R"),
            Text("Клапан запорный"),
            Text("RLV 1/2"),
            Number("19.5"),
            Text("RUB"),
            Text("RLV"),
            Text("Клапаны"),
            Text("Арматура"),
            Text("Тепло"),
        ],
        vec![
            Text("065B8223"),
            Text("Термостат"),
            Text("RA 2000"),
            Text("по запросу"),
            Text("RUB"),
            Text("RA"),
            Text("Термостаты"),
            Text("Арматура"),
            Text("Тепло"),
        ],
    ]);
    let specifications = sheet_xml(&[
        vec![
            Text("Материал"),
            Text("Название характеристики"),
            Text("Значение характеристики"),
        ],
        vec![Text("009D0005R"), Text("Вес"), Text("0,3 кг")],
        vec![Text(""), Text("DN"), Number("15")],
        vec![Text("065B8223"), Text("Диапазон"), Text("5-26 °C")],
    ]);
    xlsx_bytes(&[
        ("Каталог", catalog),
        ("Тех.характеристики", specifications),
        ("Справка", sheet_xml(&[vec![Text("ignored")]])),
    ])
}

struct ArchiveTransport {
    body: Vec<u8>,
}

impl ExportTransport for ArchiveTransport {
    fn fetch_export_page(&self) -> Result<String, CatalogError> {
        Ok(r#"<html><form><input name="_token" value="e2e"></form></html>"#.to_string())
    }

    fn submit_export(&self, _form: &ExportForm) -> Result<ExportPayload, CatalogError> {
        Ok(ExportPayload {
            content_type: "application/zip".to_string(),
            body: Box::new(Cursor::new(self.body.clone())),
        })
    }
}

#[test]
fn downloaded_archive_is_imported_and_queryable() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let archive = zip_bytes(&[("ridan-catalog.xlsx", vendor_workbook())]);

    let settings = DownloadSettings {
        target: root.join("export.zip"),
        categories: CategoryAllowList::vendor_default().all(),
        format: ExportFormat::Xlsx,
        token_field: "_token".to_string(),
        freshness_window: Duration::from_secs(7 * 24 * 60 * 60),
    };
    let db = root.join("catalog.sqlite");
    let processor = SqliteCatalogProcessor::open(&db, SheetLayout::default()).unwrap();
    let repository = ProductRepository::open(&db).unwrap();
    let mut manager = CatalogManager::new(
        Downloader::new(ArchiveTransport { body: archive }, settings),
        processor,
        repository,
    );

    let stats = manager.update_and_import(false, true).unwrap();
    assert_eq!(stats.product_count, 2);
    assert_eq!(stats.specification_count, 3);

    let valve = manager.find_product("009D0005R").unwrap().unwrap();
    assert_eq!(valve.price, 19.5);
    assert_eq!(valve.catalog_name, "RLV 1/2");
    assert_eq!(valve.direction, "Тепло");
    assert_eq!(valve.characteristics.get("DN").unwrap().value, "15");
    assert_eq!(valve.characteristics.get("Вес").unwrap().value, "0,3 кг");

    let thermostat = manager.find_product("065B8223").unwrap().unwrap();
    assert_eq!(thermostat.price, 0.0);

    let page = manager.find_products_excluding(&[], 1, 20).unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.items[0].material, "009D0005R");
    assert_eq!(manager.unique_series().unwrap(), vec!["RA", "RLV"]);

    let again = manager.update_and_import(false, false).unwrap();
    assert_eq!(again.product_count, 2);
    assert_eq!(again.specification_count, 3);
}
