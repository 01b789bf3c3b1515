//! The plugin catalog: metadata-driven class lookup over lazily loaded
//! modules.
//!
//! The catalog owns the merged class-id map, the set of currently loaded
//! modules, and the table of in-process registries. Everything sits behind
//! one re-entrant lock; creator functions may call back into the catalog on
//! the thread that is creating them. Where a module registry lock is also
//! needed, the catalog lock is always taken first.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use montage_plugin_sdk::{Capability, ClassId, ClassRegistry, PluginInstance, TypedInstance};

use crate::error::HostError;
use crate::metadata::{MetadataError, MetadataSchema, PluginMetadata};
use crate::module::ModuleReference;

struct CatalogState {
    class_paths: HashMap<ClassId, PathBuf>,
    loaded: HashMap<PathBuf, Arc<ModuleReference>>,
    static_modules: HashMap<PathBuf, &'static ClassRegistry>,
}

/// Host-side entry point for creating plugin objects by class id.
///
/// Modules are loaded on the first `create` that needs them, shared between
/// all ids that map to the same path, and unloaded again by
/// [`evict_idle_modules`](PluginCatalog::evict_idle_modules) once idle.
pub struct PluginCatalog {
    state: ReentrantMutex<RefCell<CatalogState>>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(CatalogState {
                class_paths: HashMap::new(),
                loaded: HashMap::new(),
                static_modules: HashMap::new(),
            })),
        }
    }

    /// Fold the named metadata documents under `base_dir` into the catalog.
    ///
    /// Documents are independent: a document that fails to parse, or whose
    /// class ids collide with another module's, is logged and skipped while
    /// the rest still load. Module file names resolve against `base_dir`.
    /// Re-loading a document the catalog already knows is a no-op. Returns
    /// the number of documents folded in; fails outright only when
    /// `base_dir` itself does not exist.
    pub fn load_metadata(
        &self,
        base_dir: impl AsRef<Path>,
        schema: &MetadataSchema,
        documents: &[impl AsRef<str>],
    ) -> Result<usize, HostError> {
        let base_dir = base_dir.as_ref();
        if !base_dir.is_dir() {
            return Err(MetadataError::FileNotFound(base_dir.to_path_buf()).into());
        }

        let guard = self.state.lock();
        let mut folded = 0;
        for document in documents {
            let document_path = base_dir.join(document.as_ref());
            let metadata = match PluginMetadata::from_file(&document_path, schema) {
                Ok(metadata) => metadata,
                Err(error) => {
                    log::warn!("skipping metadata document: {error}");
                    continue;
                }
            };
            let module_path = base_dir.join(metadata.module_file());
            let result = {
                let mut state = guard.borrow_mut();
                Self::fold_classes(&mut state, &metadata, &module_path)
            };
            match result {
                Ok(added) => {
                    folded += 1;
                    log::debug!(
                        "metadata document {} maps {} class(es) to {}",
                        document_path.display(),
                        added,
                        module_path.display()
                    );
                }
                Err(error) => {
                    log::warn!(
                        "skipping metadata document {}: {error}",
                        document_path.display()
                    );
                }
            }
        }
        Ok(folded)
    }

    /// All-or-nothing fold of one document's classes into the id map.
    fn fold_classes(
        state: &mut CatalogState,
        metadata: &PluginMetadata,
        module_path: &Path,
    ) -> Result<usize, HostError> {
        for class in metadata.classes() {
            if let Some(existing) = state.class_paths.get(&class.id) {
                if existing != module_path {
                    return Err(HostError::DuplicateClassId {
                        class_id: class.id.clone(),
                        path: module_path.to_path_buf(),
                        existing: existing.clone(),
                    });
                }
            }
        }
        let mut added = 0;
        for class in metadata.classes() {
            if state
                .class_paths
                .insert(class.id.clone(), module_path.to_path_buf())
                .is_none()
            {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Make an in-process registry available under the virtual path `name`.
    ///
    /// The registry's current class ids enter the id map and follow the same
    /// duplicate policy as metadata documents; creation and eviction then
    /// treat the module exactly like a dynamic one, minus the OS loader.
    pub fn register_static_module(
        &self,
        name: impl AsRef<Path>,
        registry: &'static ClassRegistry,
    ) -> Result<(), HostError> {
        let path = name.as_ref().to_path_buf();
        let ids = registry.class_ids();

        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        for id in &ids {
            if let Some(existing) = state.class_paths.get(id) {
                if existing != &path {
                    return Err(HostError::DuplicateClassId {
                        class_id: id.clone(),
                        path: path.clone(),
                        existing: existing.clone(),
                    });
                }
            }
        }
        for id in ids {
            state.class_paths.insert(id, path.clone());
        }
        state.static_modules.insert(path, registry);
        Ok(())
    }

    /// Create an object of class `id`, loading its module if necessary.
    pub fn create(&self, id: &str) -> Result<PluginInstance, HostError> {
        let guard = self.state.lock();
        let module_path = {
            let state = guard.borrow();
            match state.class_paths.get(id) {
                Some(path) => path.clone(),
                None => {
                    let mut known: Vec<&str> =
                        state.class_paths.keys().map(ClassId::as_str).collect();
                    known.sort_unstable();
                    return Err(HostError::UnknownClassId {
                        class_id: ClassId::new(id),
                        known_ids: known.join(", "),
                    });
                }
            }
        };
        let module = self.module_at(&guard, &module_path)?;
        let instance = module.registry_static().create(id)?;
        Ok(instance)
    }

    /// Create an object of class `id` and verify it implements `C`.
    ///
    /// A class that does not answer for `C` is dropped again before the
    /// error returns, so the module's instance count is left untouched.
    pub fn create_as<C: Capability + ?Sized>(
        &self,
        id: &str,
    ) -> Result<TypedInstance<C>, HostError> {
        let instance = self.create(id)?;
        instance.into_typed::<C>().map_err(|rejected| {
            let class_id = rejected.class_id().clone();
            drop(rejected);
            HostError::InterfaceNotSupported {
                class_id,
                interface: C::NAME,
            }
        })
    }

    /// The loaded module at `path`, loading and caching it if needed.
    fn module_at(
        &self,
        guard: &ReentrantMutexGuard<'_, RefCell<CatalogState>>,
        path: &Path,
    ) -> Result<Arc<ModuleReference>, HostError> {
        if let Some(module) = guard.borrow().loaded.get(path) {
            return Ok(Arc::clone(module));
        }
        let static_registry = guard.borrow().static_modules.get(path).copied();
        let module = match static_registry {
            Some(registry) => ModuleReference::from_static(path, registry),
            None => ModuleReference::load(path)?,
        };
        let module = Arc::new(module);
        guard
            .borrow_mut()
            .loaded
            .insert(path.to_path_buf(), Arc::clone(&module));
        Ok(module)
    }

    /// Unload every loaded module whose registry reports no live instances.
    ///
    /// Idleness is re-checked under each module's registry lock here, not
    /// trusted from any earlier observation. Once a zero count is seen, it
    /// cannot move: the catalog lock keeps new creations out for the whole
    /// call, and with no guard alive there is nothing left to decrement.
    /// A `create` racing this call blocks on the catalog lock and simply
    /// reloads the module afterwards if it was evicted. Returns the number
    /// of modules dropped from the loaded set.
    pub fn evict_idle_modules(&self) -> usize {
        let guard = self.state.lock();
        let paths: Vec<PathBuf> = guard.borrow().loaded.keys().cloned().collect();

        let mut evicted = 0;
        for path in paths {
            let can_unload = {
                let state = guard.borrow();
                match state.loaded.get(&path) {
                    Some(module) => module.registry().status().can_unload(),
                    None => continue,
                }
            };
            if !can_unload {
                continue;
            }

            let module = match guard.borrow_mut().loaded.remove(&path) {
                Some(module) => module,
                None => continue,
            };
            match Arc::try_unwrap(module) {
                Ok(module) => {
                    if let Err(error) = module.unload() {
                        log::warn!("failed to unload idle module: {error}");
                    }
                    evicted += 1;
                }
                Err(module) => {
                    // A clone is still in flight somewhere; keep the module.
                    log::debug!(
                        "module {} is still referenced, keeping it loaded",
                        path.display()
                    );
                    guard.borrow_mut().loaded.insert(path, module);
                }
            }
        }
        evicted
    }

    /// Every class id the catalog can currently resolve, sorted.
    pub fn registered_classes(&self) -> Vec<ClassId> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let mut ids: Vec<ClassId> = state.class_paths.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// The module path class `id` resolves to, if any.
    pub fn module_for(&self, id: &str) -> Option<PathBuf> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.class_paths.get(id).cloned()
    }

    /// Paths of the modules currently loaded, sorted.
    pub fn loaded_modules(&self) -> Vec<PathBuf> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let mut paths: Vec<PathBuf> = state.loaded.keys().cloned().collect();
        paths.sort_unstable();
        paths
    }
}

impl Default for PluginCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.state.lock();
        let state = guard.borrow();
        f.debug_struct("PluginCatalog")
            .field("registered_classes", &state.class_paths.len())
            .field("loaded_modules", &state.loaded.len())
            .field("static_modules", &state.static_modules.len())
            .finish()
    }
}
