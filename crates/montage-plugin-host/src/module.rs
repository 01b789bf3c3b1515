//! Loaded plugin modules and their exported registries.

use std::fmt;
use std::path::{Path, PathBuf};

use libloading::Library;
use thiserror::Error;

use montage_plugin_sdk::{ClassRegistry, MODULE_ENTRY_SYMBOL, ModuleEntryFn};

/// Errors raised while loading or unloading a plugin module.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("failed to load plugin module {}: {source}", .path.display())]
    LoadFailure {
        path: PathBuf,
        source: libloading::Error,
    },
    #[error("plugin module {} does not export '{symbol}'", .path.display())]
    SymbolResolution { path: PathBuf, symbol: &'static str },
    #[error("plugin module {} returned no class registry", .path.display())]
    NullRegistry { path: PathBuf },
    #[error("failed to unload plugin module {}: {source}", .path.display())]
    UnloadFailure {
        path: PathBuf,
        source: libloading::Error,
    },
}

enum ModuleBacking {
    Dynamic(Library),
    Static,
}

/// One loaded module: the OS handle (if any) plus its exported registry.
///
/// The registry reference points into the module's static storage, so it is
/// valid exactly as long as the handle stays open. `unload` therefore takes
/// the reference by value; once the handle is released no path through this
/// type can reach the registry again.
pub struct ModuleReference {
    path: PathBuf,
    registry: &'static ClassRegistry,
    backing: ModuleBacking,
}

impl ModuleReference {
    /// Open the library at `path` and resolve its registry accessor.
    ///
    /// A library that loads but lacks the accessor is closed again before
    /// the error returns; the handle never outlives this call on failure.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModuleError> {
        let path = path.as_ref().to_path_buf();
        let library = match unsafe { Library::new(&path) } {
            Ok(library) => library,
            Err(source) => return Err(ModuleError::LoadFailure { path, source }),
        };
        let entry: ModuleEntryFn =
            match unsafe { library.get::<ModuleEntryFn>(MODULE_ENTRY_SYMBOL.as_bytes()) } {
                Ok(symbol) => *symbol,
                Err(_) => {
                    drop(library);
                    return Err(ModuleError::SymbolResolution {
                        path,
                        symbol: MODULE_ENTRY_SYMBOL,
                    });
                }
            };
        let pointer = unsafe { entry() };
        if pointer.is_null() {
            drop(library);
            return Err(ModuleError::NullRegistry { path });
        }
        // Valid while the handle stays open; the catalog never releases the
        // handle before the registry reports zero live instances.
        let registry = unsafe { &*pointer };
        log::debug!(
            "loaded plugin module {} ({} classes)",
            path.display(),
            registry.class_ids().len()
        );
        Ok(Self {
            path,
            registry,
            backing: ModuleBacking::Dynamic(library),
        })
    }

    /// Wrap a registry linked into the running process.
    ///
    /// `name` is the virtual path the catalog files the module under; there
    /// is no OS handle, so unloading is trivially successful.
    pub fn from_static(name: impl AsRef<Path>, registry: &'static ClassRegistry) -> Self {
        Self {
            path: name.as_ref().to_path_buf(),
            registry,
            backing: ModuleBacking::Static,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The module's exported registry, reachable only while loaded.
    pub fn registry(&self) -> &ClassRegistry {
        self.registry
    }

    /// The registry at its true lifetime, for handing out instance guards.
    pub(crate) fn registry_static(&self) -> &'static ClassRegistry {
        self.registry
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.backing, ModuleBacking::Dynamic(_))
    }

    /// Release the OS handle.
    ///
    /// Callers must have observed `registry().status().can_unload()` and
    /// must prevent new creations until this returns; the catalog does both
    /// under its own lock.
    pub fn unload(self) -> Result<(), ModuleError> {
        match self.backing {
            ModuleBacking::Dynamic(library) => {
                if let Err(source) = library.close() {
                    return Err(ModuleError::UnloadFailure {
                        path: self.path,
                        source,
                    });
                }
                log::debug!("unloaded plugin module {}", self.path.display());
                Ok(())
            }
            ModuleBacking::Static => Ok(()),
        }
    }
}

impl fmt::Debug for ModuleReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backing = match self.backing {
            ModuleBacking::Dynamic(_) => "dynamic",
            ModuleBacking::Static => "static",
        };
        f.debug_struct("ModuleReference")
            .field("path", &self.path)
            .field("backing", &backing)
            .finish_non_exhaustive()
    }
}
