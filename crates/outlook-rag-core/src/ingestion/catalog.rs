use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::documents::Metadata;

/// Metadata attached to every chunk of a catalogued file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub doc_type: String,
    pub doc_name: String,
    pub date_context: String,
}

impl CatalogEntry {
    pub fn to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("doc_type".into(), self.doc_type.clone().into());
        metadata.insert("doc_name".into(), self.doc_name.clone().into());
        metadata.insert("date_context".into(), self.date_context.clone().into());
        metadata
    }
}

/// File name → catalog metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentCatalog(BTreeMap<String, CatalogEntry>);

impl DocumentCatalog {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, file_name: impl Into<String>, entry: CatalogEntry) {
        self.0.insert(file_name.into(), entry);
    }

    pub fn get(&self, file_name: &str) -> Option<&CatalogEntry> {
        self.0.get(file_name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for DocumentCatalog {
    /// The two J.P. Morgan outlook publications.
    fn default() -> Self {
        let mut catalog = Self::empty();
        catalog.insert(
            "outlook-2025-building-on-strength.pdf",
            CatalogEntry {
                doc_type: "forecast".into(),
                doc_name: "J.P. Morgan Outlook 2025".into(),
                date_context: "January 2025".into(),
            },
        );
        catalog.insert(
            "mid-year-outlook-2025.pdf",
            CatalogEntry {
                doc_type: "mid_year".into(),
                doc_name: "J.P. Morgan Mid-Year Outlook 2025".into(),
                date_context: "Mid-2025".into(),
            },
        );
        catalog
    }
}
