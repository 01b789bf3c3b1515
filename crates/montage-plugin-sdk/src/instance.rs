//! Owning guards for objects created through a [`ClassRegistry`].

use std::fmt;

use crate::capability::{Capability, TypedInstance};
use crate::object::PluginObject;
use crate::registry::{ClassId, ClassRegistry};

/// Balances one `live_instances` increment when dropped.
///
/// Minted by [`ClassRegistry::create`] before the creator runs and never
/// cloned, so each increment is released exactly once no matter how the
/// owning guard goes away.
pub(crate) struct CounterTicket {
    registry: &'static ClassRegistry,
}

impl CounterTicket {
    pub(crate) fn new(registry: &'static ClassRegistry) -> Self {
        Self { registry }
    }
}

impl Drop for CounterTicket {
    fn drop(&mut self) {
        self.registry.release_instance();
    }
}

/// An object created from a registry, bundled with its counter ticket.
///
/// The guard owns the object outright; dropping it destroys the object and
/// then releases the registry's instance count. That ordering is what lets
/// the host treat a zero counter as "no plugin code can run anymore" when it
/// decides to unload a module.
pub struct PluginInstance {
    class_id: ClassId,
    // Declared before the ticket: the object must be destroyed while its
    // increment is still counted, otherwise the owning module could be
    // unloaded out from under a running destructor.
    object: Box<dyn PluginObject>,
    _ticket: CounterTicket,
}

impl PluginInstance {
    pub(crate) fn new(
        class_id: ClassId,
        object: Box<dyn PluginObject>,
        ticket: CounterTicket,
    ) -> Self {
        Self {
            class_id,
            object,
            _ticket: ticket,
        }
    }

    /// Id of the class this object was created from.
    pub fn class_id(&self) -> &ClassId {
        &self.class_id
    }

    pub fn object(&self) -> &dyn PluginObject {
        self.object.as_ref()
    }

    pub fn object_mut(&mut self) -> &mut dyn PluginObject {
        self.object.as_mut()
    }

    /// Ask the object for interface `C`; `None` if it does not implement it.
    pub fn capability<C: Capability + ?Sized>(&mut self) -> Option<&mut C> {
        C::probe(self.object.as_mut())
    }

    /// Convert into a guard that statically carries interface `C`.
    ///
    /// On failure the original guard comes back unchanged in the `Err` arm,
    /// still counted, so the caller decides whether to keep or drop it.
    pub fn into_typed<C: Capability + ?Sized>(mut self) -> Result<TypedInstance<C>, Self> {
        if self.capability::<C>().is_some() {
            Ok(TypedInstance::new(self))
        } else {
            Err(self)
        }
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("class_id", &self.class_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};

    use once_cell::sync::Lazy;

    use super::*;
    use crate::object::{MediaBuffer, MediaSink};

    struct Inert;

    impl PluginObject for Inert {}

    #[test]
    fn object_is_destroyed_while_still_counted() {
        static REGISTRY: Lazy<ClassRegistry> = Lazy::new(ClassRegistry::new);
        static COUNT_AT_DROP: AtomicI64 = AtomicI64::new(-1);

        struct Probe;

        impl PluginObject for Probe {}

        impl Drop for Probe {
            fn drop(&mut self) {
                COUNT_AT_DROP.store(REGISTRY.status().instance_count(), Ordering::SeqCst);
            }
        }

        fn make_probe() -> Box<dyn PluginObject> {
            Box::new(Probe)
        }

        REGISTRY.register("probe", make_probe).unwrap();
        let instance = REGISTRY.create("probe").unwrap();
        drop(instance);

        assert_eq!(COUNT_AT_DROP.load(Ordering::SeqCst), 1);
        assert_eq!(REGISTRY.status().instance_count(), 0);
    }

    #[test]
    fn failed_typed_conversion_hands_the_guard_back() {
        let registry: &'static ClassRegistry = Box::leak(Box::new(ClassRegistry::new()));
        registry.register("inert", || Box::new(Inert)).unwrap();

        let instance = registry.create("inert").unwrap();
        let rejected = instance.into_typed::<dyn MediaSink>().unwrap_err();
        assert_eq!(rejected.class_id().as_str(), "inert");
        assert_eq!(registry.status().instance_count(), 1);

        drop(rejected);
        assert_eq!(registry.status().instance_count(), 0);
    }

    #[test]
    fn capability_reports_what_the_object_implements() {
        struct Collector(Vec<MediaBuffer>);

        impl PluginObject for Collector {
            fn as_sink(&mut self) -> Option<&mut (dyn MediaSink + 'static)> {
                Some(self)
            }
        }

        impl MediaSink for Collector {
            fn push(&mut self, buffer: MediaBuffer) {
                self.0.push(buffer);
            }
        }

        let registry: &'static ClassRegistry = Box::leak(Box::new(ClassRegistry::new()));
        registry
            .register("sink.collect", || Box::new(Collector(Vec::new())))
            .unwrap();

        let mut instance = registry.create("sink.collect").unwrap();
        let sink = instance.capability::<dyn MediaSink>().expect("sink");
        sink.push(MediaBuffer::from_vec(vec![1, 2, 3]));
        assert!(instance.capability::<dyn crate::object::MediaSource>().is_none());
    }
}
