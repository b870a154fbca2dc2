//! Catalog abstraction
//!
//! The catalog resolves a (model, experiment, source) triple to a lazily
//! loadable dataset handle, plus the fixer family and source data model
//! recorded in its metadata. Concrete catalogs live outside this crate; an
//! in-memory implementation is provided for tests and embedding.

use crate::dataset::Dataset;
use crate::errors::{ClimNormError, Result};
use log::debug;
use std::collections::HashMap;

/// Deferred access to one dataset
pub trait DatasetHandle {
    /// Names of all variables the handle can provide
    fn variables(&self) -> Result<Vec<String>>;

    /// Load the named variables (all of them for `None`). Unknown names are ignored.
    fn load(&self, variables: Option<&[String]>) -> Result<Dataset>;
}

/// What the catalog returns for one source
pub struct CatalogEntry {
    pub handle: Box<dyn DatasetHandle>,
    /// Fixer family declared in the catalog metadata
    pub fixer_name: Option<String>,
    /// Source coordinate data model declared in the catalog metadata
    pub data_model: Option<String>,
}

impl std::fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("fixer_name", &self.fixer_name)
            .field("data_model", &self.data_model)
            .finish_non_exhaustive()
    }
}

/// Catalog collaborator interface
pub trait Catalog {
    fn open(&self, model: &str, exp: &str, source: &str) -> Result<CatalogEntry>;
}

/// Handle over a dataset already held in memory
#[derive(Debug, Clone)]
pub struct InMemoryHandle {
    data: Dataset,
}

impl InMemoryHandle {
    pub fn new(data: Dataset) -> Self {
        Self { data }
    }
}

impl DatasetHandle for InMemoryHandle {
    fn variables(&self) -> Result<Vec<String>> {
        Ok(self.data.variable_names())
    }

    fn load(&self, variables: Option<&[String]>) -> Result<Dataset> {
        let Some(wanted) = variables else {
            return Ok(self.data.clone());
        };
        let mut ds = self.data.clone();
        ds.fields.retain(|name, _| wanted.contains(name));
        debug!("loaded {} of {} variables", ds.fields.len(), self.data.fields.len());
        Ok(ds)
    }
}

#[derive(Debug, Clone)]
struct InMemorySource {
    data: Dataset,
    fixer_name: Option<String>,
    data_model: Option<String>,
}

/// Catalog backed by a map of in-memory datasets
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    sources: HashMap<(String, String, String), InMemorySource>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        model: &str,
        exp: &str,
        source: &str,
        data: Dataset,
        fixer_name: Option<&str>,
        data_model: Option<&str>,
    ) {
        self.sources.insert(
            (model.to_string(), exp.to_string(), source.to_string()),
            InMemorySource {
                data,
                fixer_name: fixer_name.map(str::to_string),
                data_model: data_model.map(str::to_string),
            },
        );
    }
}

impl Catalog for InMemoryCatalog {
    fn open(&self, model: &str, exp: &str, source: &str) -> Result<CatalogEntry> {
        let key = (model.to_string(), exp.to_string(), source.to_string());
        let entry = self
            .sources
            .get(&key)
            .ok_or_else(|| ClimNormError::Catalog(format!("no source {model}/{exp}/{source}")))?;
        Ok(CatalogEntry {
            handle: Box::new(InMemoryHandle::new(entry.data.clone())),
            fixer_name: entry.fixer_name.clone(),
            data_model: entry.data_model.clone(),
        })
    }
}
