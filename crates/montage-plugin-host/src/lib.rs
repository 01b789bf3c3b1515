//! Host-side runtime for Montage plugin modules.
//!
//! Plugins reach the host in two pieces: a dynamic library built against
//! `montage-plugin-sdk`, and an XML metadata document describing which
//! library file to load per platform and which class ids it provides. This
//! crate parses and validates those documents, loads the libraries through a
//! single exported entry point, and tracks object lifetimes so a module is
//! only ever unloaded when none of its objects are left alive.
//!
//! [`PluginCatalog`] is the entry point: fold metadata in with
//! [`PluginCatalog::load_metadata`], create objects by class id, and call
//! [`PluginCatalog::evict_idle_modules`] whenever idle modules should be
//! released. Modules load lazily on the first create that needs them and are
//! shared by every class id that maps to the same library.

mod catalog;
pub mod discovery;
mod error;
mod metadata;
mod module;

pub use catalog::PluginCatalog;
pub use error::HostError;
pub use metadata::{
    ClassDescription, METADATA_NAMESPACE, MetadataError, MetadataSchema, PluginMetadata,
};
pub use module::{ModuleError, ModuleReference};
