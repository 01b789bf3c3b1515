use montage_plugin_sdk::{
    export_plugin_module, MediaBuffer, MediaFilter, MediaSink, MediaSource, PluginObject,
};

const BLOCK_SAMPLES: usize = 256;
const PHASE_STEP: f32 = std::f32::consts::TAU * 440.0 / 48_000.0;

/// 440 Hz sine, pulled in blocks of 256 little-endian `f32` samples.
#[derive(Default)]
struct SineSource {
    phase: f32,
}

impl PluginObject for SineSource {
    fn as_source(&mut self) -> Option<&mut (dyn MediaSource + 'static)> {
        Some(self)
    }
}

impl MediaSource for SineSource {
    fn pull(&mut self) -> Option<MediaBuffer> {
        let mut data = Vec::with_capacity(BLOCK_SAMPLES * 4);
        for _ in 0..BLOCK_SAMPLES {
            data.extend_from_slice(&self.phase.sin().to_le_bytes());
            self.phase = (self.phase + PHASE_STEP) % std::f32::consts::TAU;
        }
        Some(MediaBuffer::from_vec(data))
    }
}

/// Scales every `f32` sample in place by a constant gain.
struct GainFilter {
    gain: f32,
}

impl PluginObject for GainFilter {
    fn as_filter(&mut self) -> Option<&mut (dyn MediaFilter + 'static)> {
        Some(self)
    }
}

impl MediaFilter for GainFilter {
    fn apply(&mut self, buffer: &mut MediaBuffer) {
        for sample in buffer.data.chunks_exact_mut(4) {
            let value =
                f32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]) * self.gain;
            sample.copy_from_slice(&value.to_le_bytes());
        }
    }
}

/// Swallows buffers, keeping only a byte count.
#[derive(Default)]
struct NullSink {
    consumed: usize,
}

impl PluginObject for NullSink {
    fn as_sink(&mut self) -> Option<&mut (dyn MediaSink + 'static)> {
        Some(self)
    }
}

impl MediaSink for NullSink {
    fn push(&mut self, buffer: MediaBuffer) {
        self.consumed += buffer.len();
    }
}

fn make_sine() -> Box<dyn PluginObject> {
    Box::new(SineSource::default())
}

fn make_gain() -> Box<dyn PluginObject> {
    Box::new(GainFilter { gain: 0.5 })
}

fn make_null() -> Box<dyn PluginObject> {
    Box::new(NullSink::default())
}

export_plugin_module! {
    "tone.sine" => make_sine,
    "filter.gain" => make_gain,
    "sink.null" => make_null,
}
