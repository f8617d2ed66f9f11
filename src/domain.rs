use std::collections::{BTreeMap, HashMap};
use std::fmt;

use clap::ValueEnum;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::CatalogError;

/// Export format requested from the vendor's export endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Xlsx,
    Xls,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Xlsx => write!(f, "xlsx"),
            ExportFormat::Xls => write!(f, "xls"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CategoryId(u32);

impl CategoryId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Known category selectors of the export form, keyed by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryAllowList(BTreeMap<u32, String>);

impl CategoryAllowList {
    pub fn new(entries: BTreeMap<u32, String>) -> Self {
        Self(entries)
    }

    pub fn vendor_default() -> Self {
        let entries = [
            (1, "Тепловая автоматика"),
            (475, "Холодильная техника"),
            (786, "Приводная техника"),
            (825, "Промышленная автоматика"),
            (859, "Теплый пол и снеготаяние"),
            (925, "Насосное оборудование"),
            (957, "Коттеджная автоматика"),
        ];
        Self(
            entries
                .into_iter()
                .map(|(id, name)| (id, name.to_string()))
                .collect(),
        )
    }

    pub fn resolve(&self, raw: u32) -> Result<CategoryId, CatalogError> {
        if self.0.contains_key(&raw) {
            Ok(CategoryId(raw))
        } else {
            Err(CatalogError::UnknownCategory(raw.to_string()))
        }
    }

    pub fn all(&self) -> Vec<CategoryId> {
        self.0.keys().copied().map(CategoryId).collect()
    }

    pub fn label(&self, id: CategoryId) -> Option<&str> {
        self.0.get(&id.0).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for CategoryAllowList {
    fn default() -> Self {
        Self::vendor_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specification {
    pub name: String,
    pub value: String,
}

impl Specification {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Characteristics of one product, keyed by name, in insertion order.
///
/// Adding a name that is already present replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecificationCollection {
    items: Vec<Specification>,
    index: HashMap<String, usize>,
}

impl SpecificationCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, specification: Specification) {
        match self.index.get(&specification.name) {
            Some(&position) => self.items[position] = specification,
            None => {
                self.index
                    .insert(specification.name.clone(), self.items.len());
                self.items.push(specification);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Specification> {
        self.index.get(name).map(|&position| &self.items[position])
    }

    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Specification> {
        self.items.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(|spec| spec.name.as_str()).collect()
    }

    pub fn values(&self) -> Vec<&str> {
        self.items.iter().map(|spec| spec.value.as_str()).collect()
    }

    pub fn filter<F>(&self, mut predicate: F) -> SpecificationCollection
    where
        F: FnMut(&Specification) -> bool,
    {
        self.items
            .iter()
            .filter(|spec| predicate(spec))
            .cloned()
            .collect()
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.items
            .iter()
            .map(|spec| (spec.name.clone(), spec.value.clone()))
            .collect()
    }
}

impl FromIterator<Specification> for SpecificationCollection {
    fn from_iter<I: IntoIterator<Item = Specification>>(iter: I) -> Self {
        let mut collection = SpecificationCollection::new();
        for spec in iter {
            collection.add(spec);
        }
        collection
    }
}

impl Serialize for SpecificationCollection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.items.len()))?;
        for spec in &self.items {
            map.serialize_entry(&spec.name, &spec.value)?;
        }
        map.end()
    }
}

/// A catalog item hydrated with its characteristics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub material: String,
    pub description: String,
    pub catalog_name: String,
    pub price: f64,
    pub currency: String,
    pub series: String,
    pub subcategory: String,
    pub category: String,
    pub direction: String,
    pub characteristics: SpecificationCollection,
}

impl Product {
    pub fn from_record(record: ProductRecord, characteristics: SpecificationCollection) -> Self {
        Self {
            material: record.material,
            description: record.description,
            catalog_name: record.catalog_name,
            price: record.price,
            currency: record.currency,
            series: record.series,
            subcategory: record.subcategory,
            category: record.category,
            direction: record.direction,
            characteristics,
        }
    }
}

/// Flat product row as written to and read from the `products` table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProductRecord {
    pub material: String,
    pub description: String,
    pub catalog_name: String,
    pub price: f64,
    pub currency: String,
    pub series: String,
    pub subcategory: String,
    pub category: String,
    pub direction: String,
}

/// Flat characteristic row as written to the `specifications` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecificationRecord {
    pub product_material: String,
    pub characteristic_name: String,
    pub characteristic_value: String,
}

/// Permissive price parsing: anything that is not a finite, non-negative
/// number becomes zero.
pub fn parse_price(raw: &str) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => value,
        _ => 0.0,
    }
}
