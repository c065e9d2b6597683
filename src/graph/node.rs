use std::any::Any;

/// Context passed to graph nodes during rendering
///
/// Describes the block being rendered:
/// - sample_rate: Audio sample rate (e.g., 48000.0)
/// - frame: Audio-clock position of the first sample in the block
/// - time: The same position in seconds
pub struct RenderCtx {
    pub sample_rate: f32,
    pub frame: u64,
    pub time: f64,
}

impl RenderCtx {
    pub fn new(sample_rate: f32, frame: u64) -> Self {
        Self {
            sample_rate,
            frame,
            time: frame as f64 / sample_rate as f64,
        }
    }

    /// Audio-clock time of sample `i` within the block.
    #[inline]
    pub fn time_at(&self, i: usize) -> f64 {
        (self.frame + i as u64) as f64 / self.sample_rate as f64
    }

    /// Index of the first sample at or after `time`, clamped to `[0, frames]`.
    pub fn offset_of(&self, time: f64, frames: usize) -> usize {
        let position = time * self.sample_rate as f64 - self.frame as f64;
        (position - 1e-6).ceil().clamp(0.0, frames as f64) as usize
    }
}

/// One block of two-channel audio.
#[derive(Debug, Clone, Default)]
pub struct StereoBuffer {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl StereoBuffer {
    pub fn new(frames: usize) -> Self {
        Self {
            left: vec![0.0; frames],
            right: vec![0.0; frames],
        }
    }

    pub fn frames(&self) -> usize {
        self.left.len()
    }

    /// Resize to `frames` and zero every sample.
    pub fn prepare(&mut self, frames: usize) {
        self.left.clear();
        self.left.resize(frames, 0.0);
        self.right.clear();
        self.right.resize(frames, 0.0);
    }

    /// Mix `other` into this buffer.
    pub fn add(&mut self, other: &StereoBuffer) {
        crate::dsp::mix::sum_in_place(&mut self.left, &other.left);
        crate::dsp::mix::sum_in_place(&mut self.right, &other.right);
    }

    pub fn copy_from(&mut self, other: &StereoBuffer) {
        self.left.copy_from_slice(&other.left);
        self.right.copy_from_slice(&other.right);
    }

    pub fn is_silent(&self) -> bool {
        self.left.iter().chain(self.right.iter()).all(|s| *s == 0.0)
    }

    /// Largest absolute sample across both channels.
    pub fn peak(&self) -> f32 {
        self.left
            .iter()
            .chain(self.right.iter())
            .fold(0.0f32, |acc, s| acc.max(s.abs()))
    }
}

/// Upcast helper so concrete node types can be recovered from the arena.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Core trait for audio graph nodes
///
/// The graph sums every connected input into `input` before calling
/// `process`; the node writes exactly `input.frames()` frames to `output`.
pub trait AudioNode: AsAny + Send {
    fn process(&mut self, input: &StereoBuffer, output: &mut StereoBuffer, ctx: &RenderCtx);

    /// True once a source node will never produce sound again.
    ///
    /// Used by the graph to reclaim finished voices. Default implementation
    /// is never finished (effects, busses).
    fn is_finished(&self, _time: f64) -> bool {
        false
    }
}

/// Recover the concrete node type behind a trait object.
pub fn downcast_ref<T: AudioNode>(node: &dyn AudioNode) -> Option<&T> {
    node.as_any().downcast_ref::<T>()
}

pub fn downcast_mut<T: AudioNode>(node: &mut dyn AudioNode) -> Option<&mut T> {
    node.as_any_mut().downcast_mut::<T>()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silence;

    impl AudioNode for Silence {
        fn process(&mut self, _input: &StereoBuffer, output: &mut StereoBuffer, _ctx: &RenderCtx) {
            output.left.fill(0.0);
            output.right.fill(0.0);
        }
    }

    #[test]
    fn downcast_recovers_concrete_type() {
        let mut boxed: Box<dyn AudioNode> = Box::new(Silence);
        assert!(downcast_mut::<Silence>(&mut *boxed).is_some());
        assert!(downcast_ref::<Silence>(&*boxed).is_some());
    }

    #[test]
    fn offset_of_clamps_to_block() {
        let ctx = RenderCtx::new(1_000.0, 100);
        assert_eq!(ctx.offset_of(0.0, 10), 0);
        assert_eq!(ctx.offset_of(0.105, 10), 5);
        assert_eq!(ctx.offset_of(5.0, 10), 10);
    }

    #[test]
    fn add_sums_channels() {
        let mut a = StereoBuffer::new(2);
        let mut b = StereoBuffer::new(2);
        b.left[0] = 0.5;
        b.right[1] = -0.25;
        a.add(&b);
        a.add(&b);
        assert_eq!(a.left, vec![1.0, 0.0]);
        assert_eq!(a.right, vec![0.0, -0.5]);
        assert_eq!(a.peak(), 1.0);
    }
}
