use std::path::PathBuf;

use thiserror::Error;

use montage_plugin_sdk::{ClassId, RegistryError};

use crate::metadata::MetadataError;
use crate::module::ModuleError;

/// Errors that can occur while resolving metadata and hosting plugin classes.
#[derive(Debug, Error)]
pub enum HostError {
    #[error(
        "class id '{class_id}' from {} is already provided by {}",
        .path.display(),
        .existing.display()
    )]
    DuplicateClassId {
        class_id: ClassId,
        path: PathBuf,
        existing: PathBuf,
    },
    #[error("no plugin provides class id '{class_id}' (registered: {known_ids})")]
    UnknownClassId { class_id: ClassId, known_ids: String },
    #[error("class '{class_id}' does not implement {interface}")]
    InterfaceNotSupported {
        class_id: ClassId,
        interface: &'static str,
    },
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Module(#[from] ModuleError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
