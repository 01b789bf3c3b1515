//! Per-module class registry and live-instance accounting.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use thiserror::Error;

use crate::instance::{CounterTicket, PluginInstance};
use crate::object::PluginObject;

/// Identifier of one pluggable class, unique within a module's registry.
///
/// Case-sensitive and opaque to the runtime; the dotted convention used by
/// the stock modules (`"tone.sine"`) is shared with the metadata documents
/// but not enforced here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(String);

impl ClassId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClassId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ClassId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// Written without importing the trait: with `Borrow` in scope, the
// `guard.borrow()` calls below would resolve on the lock guards through the
// blanket `impl<T> Borrow<T> for T` instead of reaching the inner `RefCell`.
impl std::borrow::Borrow<str> for ClassId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Creator registered under a [`ClassId`]; every call produces a fresh
/// object whose ownership transfers to the caller.
pub type CreatorFn = fn() -> Box<dyn PluginObject>;

/// Errors reported by [`ClassRegistry`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("class id '{0}' is already registered")]
    DuplicateClassId(ClassId),
    #[error("no class registered under id '{0}'")]
    UnknownClassId(ClassId),
    #[error("class registry poisoned by an instance counter underflow")]
    Poisoned,
}

struct RegistryState {
    creators: HashMap<ClassId, CreatorFn>,
    live_instances: i64,
    poisoned: bool,
}

/// Per-module table of class creators plus the live-instance counter.
///
/// One registry lives in each plugin module's static storage and reaches the
/// host only through the module's exported entry point. All operations
/// synchronize on a single re-entrant lock, so a creator function may call
/// back into its own registry while it runs, for example to instantiate a
/// dependency registered in the same module.
///
/// The live-instance counter equals the number of [`PluginInstance`] guards
/// currently alive against this registry; the host's catalog refuses to
/// unload the owning module until it reaches zero.
pub struct ClassRegistry {
    state: ReentrantMutex<RefCell<RegistryState>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(RegistryState {
                creators: HashMap::new(),
                live_instances: 0,
                poisoned: false,
            })),
        }
    }

    /// Register `creator` under `id`.
    ///
    /// Fails with [`RegistryError::DuplicateClassId`] if `id` is already
    /// present; the registered creator stays in effect and nothing changes.
    pub fn register(
        &self,
        id: impl Into<ClassId>,
        creator: CreatorFn,
    ) -> Result<(), RegistryError> {
        let id = id.into();
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if state.poisoned {
            return Err(RegistryError::Poisoned);
        }
        if state.creators.contains_key(&id) {
            return Err(RegistryError::DuplicateClassId(id));
        }
        state.creators.insert(id, creator);
        Ok(())
    }

    /// Remove the creator registered under `id`; does nothing if absent.
    pub fn unregister(&self, id: &str) {
        let guard = self.state.lock();
        guard.borrow_mut().creators.remove(id);
    }

    /// Instantiate the class registered under `id`.
    ///
    /// The counter increment and the creator call happen under the registry
    /// lock, so no other thread can observe the new object without the
    /// counter reflecting it. The returned guard decrements the counter when
    /// it is dropped, on every exit path.
    ///
    /// Takes the registry by `&'static` because registries have
    /// module-static lifetime and the guard carries a non-owning reference
    /// back here for its whole life.
    pub fn create(&'static self, id: &str) -> Result<PluginInstance, RegistryError> {
        let guard = self.state.lock();
        let (class_id, creator) = {
            let state = guard.borrow();
            if state.poisoned {
                return Err(RegistryError::Poisoned);
            }
            match state.creators.get_key_value(id) {
                Some((class_id, creator)) => (class_id.clone(), *creator),
                None => return Err(RegistryError::UnknownClassId(ClassId::new(id))),
            }
        };
        guard.borrow_mut().live_instances += 1;
        // The ticket exists before the creator runs: if the creator unwinds,
        // its drop still rebalances the counter. No RefCell borrow is held
        // here, so the creator may re-enter this registry on this thread.
        let ticket = CounterTicket::new(self);
        let object = creator();
        Ok(PluginInstance::new(class_id, object, ticket))
    }

    /// Take a consistent liveness snapshot; see [`RegistryStatus`].
    pub fn status(&self) -> RegistryStatus<'_> {
        let guard = self.state.lock();
        let (instance_count, poisoned) = {
            let state = guard.borrow();
            (state.live_instances, state.poisoned)
        };
        RegistryStatus {
            instance_count,
            can_unload: instance_count == 0 && !poisoned,
            _guard: guard,
        }
    }

    /// Ids currently registered, in no particular order.
    pub fn class_ids(&self) -> Vec<ClassId> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.creators.keys().cloned().collect()
    }

    /// Balance one guard's increment. Called only from [`CounterTicket`].
    pub(crate) fn release_instance(&self) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if state.live_instances <= 0 {
            state.poisoned = true;
            log::error!(
                "instance counter underflow: a guard released an instance this registry \
                 never counted; poisoning the registry"
            );
            return;
        }
        state.live_instances -= 1;
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.state.lock();
        let state = guard.borrow();
        f.debug_struct("ClassRegistry")
            .field("classes", &state.creators.len())
            .field("live_instances", &state.live_instances)
            .field("poisoned", &state.poisoned)
            .finish()
    }
}

/// Snapshot of a registry's liveness, taken and held under the registry lock.
///
/// While the snapshot is alive no other thread can change the counter, which
/// is what makes [`RegistryStatus::can_unload`] trustworthy at the moment a
/// module is about to be unloaded. The lock is released on drop, so hold the
/// snapshot only briefly.
pub struct RegistryStatus<'a> {
    instance_count: i64,
    can_unload: bool,
    _guard: ReentrantMutexGuard<'a, RefCell<RegistryState>>,
}

impl RegistryStatus<'_> {
    /// Number of guards currently alive against this registry.
    pub fn instance_count(&self) -> i64 {
        self.instance_count
    }

    /// Whether the owning module may be unloaded right now.
    pub fn can_unload(&self) -> bool {
        self.can_unload
    }
}

impl fmt::Debug for RegistryStatus<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryStatus")
            .field("instance_count", &self.instance_count)
            .field("can_unload", &self.can_unload)
            .finish()
    }
}
