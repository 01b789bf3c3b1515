//! The object model shared between the host and its plugin modules.

/// Opaque interchange unit passed between media capabilities.
///
/// The runtime only moves buffers around; how the payload is interpreted
/// (sample format, pixel layout, packet framing) is negotiated by the host
/// framework and the classes involved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaBuffer {
    pub data: Vec<u8>,
}

impl MediaBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Base contract implemented by every object a plugin class produces.
///
/// The host never sees the concrete type behind a creator; it asks the object
/// for the interfaces it supports through these capability views. A class
/// answers `Some` for each view it implements and inherits `None` for the
/// rest.
pub trait PluginObject: Send {
    /// View this object as a media source, if the class produces data.
    ///
    /// The views carry a `'static` object bound (only the borrow is tied to
    /// `self`), which lets them serve the `'static` [`crate::Capability`]
    /// probes.
    fn as_source(&mut self) -> Option<&mut (dyn MediaSource + 'static)> {
        None
    }

    /// View this object as a media filter, if the class transforms data.
    fn as_filter(&mut self) -> Option<&mut (dyn MediaFilter + 'static)> {
        None
    }

    /// View this object as a media sink, if the class consumes data.
    fn as_sink(&mut self) -> Option<&mut (dyn MediaSink + 'static)> {
        None
    }
}

/// Produces media buffers: file readers, capture devices, generators.
pub trait MediaSource {
    /// Pull the next buffer, or `None` once the stream is exhausted.
    fn pull(&mut self) -> Option<MediaBuffer>;
}

/// Transforms media buffers in place: effects, converters, resamplers.
pub trait MediaFilter {
    fn apply(&mut self, buffer: &mut MediaBuffer);
}

/// Consumes media buffers: encoders, writers, playback sinks.
pub trait MediaSink {
    fn push(&mut self, buffer: MediaBuffer);
}
