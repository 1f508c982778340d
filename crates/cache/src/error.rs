//! Atlas cache errors

use atlas_sleep_storage::DescriptorError;

/// Errors surfaced by the atlas cache
#[derive(Debug, thiserror::Error)]
pub enum AtlasError {
    /// The descriptor file is missing or malformed
    #[error("atlas descriptors unavailable: {0}")]
    Config(#[from] DescriptorError),

    /// The tag is not in the descriptor table
    #[error("unknown atlas tag '{0}'")]
    UnknownTag(String),

    /// The backend could not materialize a known atlas
    #[error("unable to load atlas '{tag}' from '{storage_location}'")]
    AssetLoadFailure {
        tag: String,
        storage_location: String,
    },
}

pub type AtlasResult<T> = Result<T, AtlasError>;
