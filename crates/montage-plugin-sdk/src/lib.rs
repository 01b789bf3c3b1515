//! Authoring SDK for Montage plugin modules.
//!
//! A plugin module is a dynamic library that exposes exactly one symbol: the
//! registry accessor named by [`MODULE_ENTRY_SYMBOL`]. The accessor hands the
//! host a pointer to the module's [`ClassRegistry`], a table mapping class
//! ids to creator functions plus a counter of instances currently alive. The
//! host refuses to unload a module while that counter is nonzero, which is
//! the whole safety story for dynamic unloading: no object, no running
//! plugin code.
//!
//! Plugin authors implement [`PluginObject`] for their types, answer the
//! capability probes they support ([`MediaSource`], [`MediaFilter`],
//! [`MediaSink`]), and wire the creators up with [`export_plugin_module!`].
//! The same registry types work host-side for modules linked statically into
//! the application.

mod capability;
mod instance;
mod object;
mod registry;

pub use capability::{Capability, TypedInstance};
pub use instance::PluginInstance;
pub use object::{MediaBuffer, MediaFilter, MediaSink, MediaSource, PluginObject};
pub use registry::{ClassId, ClassRegistry, CreatorFn, RegistryError, RegistryStatus};

/// Name of the one symbol every plugin module exports.
pub const MODULE_ENTRY_SYMBOL: &str = "montage_module_registry";

/// Signature of the exported registry accessor.
///
/// The returned registry lives in the module's static storage; the pointer
/// stays valid until the module is unloaded.
pub type ModuleEntryFn = unsafe extern "C" fn() -> *const ClassRegistry;

#[doc(hidden)]
pub mod __private {
    pub use once_cell::sync::Lazy;
}

/// Export this module's class table under [`MODULE_ENTRY_SYMBOL`].
///
/// Builds the module's [`ClassRegistry`] on first access and registers each
/// `id => creator` pair in order. Invoke it exactly once per module; listing
/// the same id twice is a bug in the plugin and panics on first access.
///
/// # Example
///
/// ```ignore
/// use montage_plugin_sdk::prelude::*;
///
/// fn make_sine() -> Box<dyn PluginObject> {
///     Box::new(SineSource::default())
/// }
///
/// export_plugin_module! {
///     "tone.sine" => make_sine,
/// }
/// ```
#[macro_export]
macro_rules! export_plugin_module {
    ($($id:expr => $creator:expr),+ $(,)?) => {
        #[no_mangle]
        pub extern "C" fn montage_module_registry() -> *const $crate::ClassRegistry {
            static REGISTRY: $crate::__private::Lazy<$crate::ClassRegistry> =
                $crate::__private::Lazy::new(|| {
                    let registry = $crate::ClassRegistry::new();
                    $(
                        if let Err(error) = registry.register($id, $creator) {
                            panic!("invalid exported class table: {error}");
                        }
                    )+
                    registry
                });
            $crate::__private::Lazy::force(&REGISTRY) as *const $crate::ClassRegistry
        }
    };
}

pub mod prelude {
    pub use crate::export_plugin_module;
    pub use crate::{
        ClassId, ClassRegistry, CreatorFn, MediaBuffer, MediaFilter, MediaSink, MediaSource,
        PluginInstance, PluginObject,
    };
}
