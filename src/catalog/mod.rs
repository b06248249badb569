//! Garment catalog
//!
//! The static list of garments and the exclusive selection over it.

mod loader;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use loader::{load_thumbnail, AssetError, AssetState, GarmentImageLoader};

/// A selectable garment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Garment {
    /// Unique identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Overlay image, relative paths resolve against the catalog asset directory
    pub image: PathBuf,
}

impl Garment {
    pub fn new(id: impl Into<String>, name: impl Into<String>, image: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image: image.into(),
        }
    }
}

/// Catalog section of the configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Directory garment images are looked up in
    pub asset_dir: PathBuf,
    /// Garments in display order
    pub garments: Vec<Garment>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            asset_dir: PathBuf::from("assets"),
            garments: default_garments(),
        }
    }
}

/// The built-in dress collection
pub fn default_garments() -> Vec<Garment> {
    [
        ("dress1", "Golden Leaf Couture Dress"),
        ("dress2", "Crystal Blossom Gown"),
        ("dress3", "Black Royal Cape Gown"),
        ("dress4", "Sculpted Silver Asymmetric Gown"),
        ("dress5", "Chocolate Sequin Ball Gown"),
        ("dress6", "Ivory Floral Lace Couture Dress"),
        ("dress7", "Rose Gold Shimmer Cape Dress"),
        ("dress8", "Golden Regal Mermaid Gown"),
        ("dress9", "Blush Radiance One-Shoulder Dress"),
    ]
    .into_iter()
    .map(|(id, name)| Garment::new(id, name, format!("{}.png", id)))
    .collect()
}

/// Catalog errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("No garment at index {index} (catalog has {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Unknown garment id: {0}")]
    UnknownId(String),
    #[error("Duplicate garment id: {0}")]
    DuplicateId(String),
}

/// Garment list with at most one selected entry
#[derive(Debug, Clone)]
pub struct GarmentCatalog {
    garments: Vec<Garment>,
    selected: Option<usize>,
}

impl GarmentCatalog {
    /// Build a catalog; the first garment starts out selected
    pub fn new(garments: Vec<Garment>) -> Result<Self, CatalogError> {
        for (i, garment) in garments.iter().enumerate() {
            if garments[..i].iter().any(|g| g.id == garment.id) {
                return Err(CatalogError::DuplicateId(garment.id.clone()));
            }
        }

        let selected = if garments.is_empty() { None } else { Some(0) };
        Ok(Self { garments, selected })
    }

    /// Build a catalog from config, resolving image paths against the asset directory
    pub fn from_config(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let garments = config
            .garments
            .iter()
            .map(|g| Garment {
                image: resolve_asset(&config.asset_dir, &g.image),
                ..g.clone()
            })
            .collect();
        Self::new(garments)
    }

    pub fn len(&self) -> usize {
        self.garments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.garments.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Garment> {
        self.garments.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Garment> {
        self.garments.iter()
    }

    /// Currently selected garment
    pub fn selected(&self) -> Option<&Garment> {
        self.selected.and_then(|i| self.garments.get(i))
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    pub fn is_selected(&self, index: usize) -> bool {
        self.selected == Some(index)
    }

    /// Select the garment at `index`, deselecting any other
    pub fn select(&mut self, index: usize) -> Result<&Garment, CatalogError> {
        if index >= self.garments.len() {
            return Err(CatalogError::IndexOutOfRange {
                index,
                len: self.garments.len(),
            });
        }
        self.selected = Some(index);
        Ok(&self.garments[index])
    }

    /// Select a garment by id
    pub fn select_by_id(&mut self, id: &str) -> Result<&Garment, CatalogError> {
        let index = self
            .garments
            .iter()
            .position(|g| g.id == id)
            .ok_or_else(|| CatalogError::UnknownId(id.to_string()))?;
        self.select(index)
    }

    /// Select the following garment, wrapping around
    pub fn select_next(&mut self) -> Option<&Garment> {
        let len = self.garments.len();
        if len == 0 {
            return None;
        }
        let index = self.selected.map(|i| (i + 1) % len).unwrap_or(0);
        self.select(index).ok()
    }

    /// Select the preceding garment, wrapping around
    pub fn select_previous(&mut self) -> Option<&Garment> {
        let len = self.garments.len();
        if len == 0 {
            return None;
        }
        let index = self.selected.map(|i| (i + len - 1) % len).unwrap_or(len - 1);
        self.select(index).ok()
    }

    /// Clear the selection
    pub fn deselect(&mut self) {
        self.selected = None;
    }
}

fn resolve_asset(asset_dir: &Path, image: &Path) -> PathBuf {
    if image.is_absolute() {
        image.to_path_buf()
    } else {
        asset_dir.join(image)
    }
}
