//! Capability queries over created objects.
//!
//! Interface checks are explicit questions asked of the object's
//! [`PluginObject`] views rather than downcasts, so the host can verify
//! "does this class satisfy X" without any knowledge of the concrete type
//! living inside the plugin module.

use std::fmt;
use std::marker::PhantomData;

use crate::instance::PluginInstance;
use crate::object::{MediaFilter, MediaSink, MediaSource, PluginObject};

/// A framework interface that can be requested from a created object.
///
/// Implemented for the `dyn` form of each capability trait. `NAME` is the
/// identifier reported when a requested interface is not supported.
pub trait Capability: 'static {
    /// Interface name used in diagnostics and errors.
    const NAME: &'static str;

    /// Borrow `object` through this interface, if the class implements it.
    fn probe(object: &mut dyn PluginObject) -> Option<&mut Self>;
}

impl Capability for dyn MediaSource {
    const NAME: &'static str = "MediaSource";

    fn probe(object: &mut dyn PluginObject) -> Option<&mut Self> {
        object.as_source()
    }
}

impl Capability for dyn MediaFilter {
    const NAME: &'static str = "MediaFilter";

    fn probe(object: &mut dyn PluginObject) -> Option<&mut Self> {
        object.as_filter()
    }
}

impl Capability for dyn MediaSink {
    const NAME: &'static str = "MediaSink";

    fn probe(object: &mut dyn PluginObject) -> Option<&mut Self> {
        object.as_sink()
    }
}

/// A [`PluginInstance`] whose interface `C` has been verified.
///
/// The untyped guard stays inside, so the instance keeps counting against its
/// registry until the typed wrapper is dropped.
pub struct TypedInstance<C: Capability + ?Sized> {
    instance: PluginInstance,
    _interface: PhantomData<fn() -> Box<C>>,
}

impl<C: Capability + ?Sized> TypedInstance<C> {
    pub(crate) fn new(instance: PluginInstance) -> Self {
        Self {
            instance,
            _interface: PhantomData,
        }
    }

    /// Access the object through the verified interface.
    pub fn interface(&mut self) -> &mut C {
        // A class's capability set is fixed for the life of the object, so
        // the probe that succeeded when the wrapper was built succeeds here.
        match C::probe(self.instance.object_mut()) {
            Some(view) => view,
            None => unreachable!("verified capability no longer answers"),
        }
    }

    /// Borrow the untyped guard.
    pub fn instance(&self) -> &PluginInstance {
        &self.instance
    }

    /// Give back the untyped guard.
    pub fn into_instance(self) -> PluginInstance {
        self.instance
    }
}

impl<C: Capability + ?Sized> fmt::Debug for TypedInstance<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedInstance")
            .field("class_id", self.instance.class_id())
            .field("interface", &C::NAME)
            .finish()
    }
}
