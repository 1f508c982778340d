//! Atlas descriptor table.
//!
//! The descriptor file is written once by the asset import step and read once
//! when the atlas cache starts. It maps every atlas tag to the storage location
//! the atlas is fetched from and the sprite names it contains.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// File name of the descriptor list inside the data directory.
pub const DESCRIPTOR_FILE_NAME: &str = "atlas_descriptors.json";

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("no atlas descriptor file at {}; reimport the sprite atlases", .0.display())]
    ConfigMissing(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed descriptor file: {0}")]
    ConfigParse(#[from] serde_json::Error),
    #[error("invalid descriptor at index {index}: {reason}")]
    InvalidDescriptor { index: usize, reason: String },
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
}

/// One atlas as described by the import step.
///
/// The capitalised aliases are the field names the import tool emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtlasDescriptor {
    #[serde(alias = "AtlasID")]
    pub id: i64,
    #[serde(alias = "AtlasTag")]
    pub tag: String,
    #[serde(alias = "ResourcesPath")]
    pub storage_location: String,
    #[serde(alias = "SpriteNames", default)]
    pub sprite_names: Vec<String>,
}

impl AtlasDescriptor {
    pub fn new(
        id: i64,
        tag: impl Into<String>,
        storage_location: impl Into<String>,
        sprite_names: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id,
            tag: tag.into(),
            storage_location: storage_location.into(),
            sprite_names: sprite_names.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DescriptorList {
    #[serde(alias = "Atlases")]
    atlases: Vec<AtlasDescriptor>,
}

/// Read-only lookup table of atlas descriptors keyed by tag.
#[derive(Debug, Clone, Default)]
pub struct DescriptorTable {
    descriptors: Vec<AtlasDescriptor>,
    by_tag: HashMap<String, usize>,
}

impl DescriptorTable {
    /// Builds a table, rejecting empty tags, empty storage locations and
    /// duplicate tags.
    pub fn new(descriptors: Vec<AtlasDescriptor>) -> Result<Self, DescriptorError> {
        let mut by_tag = HashMap::with_capacity(descriptors.len());

        for (index, descriptor) in descriptors.iter().enumerate() {
            if descriptor.tag.is_empty() {
                return Err(DescriptorError::InvalidDescriptor {
                    index,
                    reason: "tag is empty".to_string(),
                });
            }
            if descriptor.storage_location.is_empty() {
                return Err(DescriptorError::InvalidDescriptor {
                    index,
                    reason: format!("storage location of '{}' is empty", descriptor.tag),
                });
            }
            if by_tag.insert(descriptor.tag.clone(), index).is_some() {
                return Err(DescriptorError::InvalidDescriptor {
                    index,
                    reason: format!("duplicate tag '{}'", descriptor.tag),
                });
            }
        }

        Ok(Self { descriptors, by_tag })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DescriptorError> {
        let path = path.as_ref();
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(DescriptorError::ConfigMissing(path.to_path_buf()));
            }
            Err(err) => return Err(err.into()),
        };

        Self::from_slice(&bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, DescriptorError> {
        let list: DescriptorList = serde_json::from_slice(bytes)?;
        Self::new(list.atlases)
    }

    pub fn from_json_str(json: &str) -> Result<Self, DescriptorError> {
        Self::from_slice(json.as_bytes())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), DescriptorError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let list = DescriptorList { atlases: self.descriptors.clone() };
        let bytes = serde_json::to_vec_pretty(&list)?;
        fs::write(path, bytes)?;
        Ok(())
    }

    pub fn get(&self, tag: &str) -> Option<&AtlasDescriptor> {
        self.by_tag.get(tag).map(|&index| &self.descriptors[index])
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.by_tag.contains_key(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AtlasDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Default location of the descriptor file in the platform data directory.
pub fn default_descriptor_path() -> Result<PathBuf, DescriptorError> {
    let dirs = ProjectDirs::from("dev", "AtlasSleep", "AtlasSleep")
        .ok_or(DescriptorError::NoDataDirectory)?;

    Ok(dirs.data_local_dir().join(DESCRIPTOR_FILE_NAME))
}
