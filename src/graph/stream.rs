//! Nodes bridging the graph and lock-free frame rings: captured input in,
//! recorded output out.

use rtrb::{Consumer, Producer, RingBuffer};
use super::node::{AudioNode, RenderCtx, StereoBuffer};

/// One interleaved stereo frame as carried by the rings.
pub type Frame = [f32; 2];

/// Frames buffered between a capture device and the graph.
pub const CAPTURE_QUEUE_SIZE: usize = 16_384;

/// Frames buffered between the graph and a recorder.
pub const RECORDING_QUEUE_SIZE: usize = 96_000;

/// Plays frames pushed by a capture thread. Underruns read as silence.
pub struct StreamSourceNode {
    rx: Consumer<Frame>,
    underruns: u64,
}

impl StreamSourceNode {
    pub fn new(rx: Consumer<Frame>) -> Self {
        Self { rx, underruns: 0 }
    }

    pub fn underruns(&self) -> u64 {
        self.underruns
    }
}

impl AudioNode for StreamSourceNode {
    fn process(&mut self, _input: &StereoBuffer, output: &mut StereoBuffer, _ctx: &RenderCtx) {
        for i in 0..output.frames() {
            let [l, r] = match self.rx.pop() {
                Ok(frame) => frame,
                Err(_) => {
                    self.underruns += 1;
                    [0.0, 0.0]
                }
            };
            output.left[i] = l;
            output.right[i] = r;
        }
    }
}

/// Mirrors its input into a ring for a recorder while passing it on
/// unchanged. Frames that do not fit are dropped, never blocking render.
pub struct RecordingTapNode {
    tx: Producer<Frame>,
    dropped: u64,
}

impl RecordingTapNode {
    pub fn new(capacity: usize) -> (Self, Consumer<Frame>) {
        let (tx, rx) = RingBuffer::<Frame>::new(capacity);
        (Self { tx, dropped: 0 }, rx)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl AudioNode for RecordingTapNode {
    fn process(&mut self, input: &StereoBuffer, output: &mut StereoBuffer, _ctx: &RenderCtx) {
        output.copy_from(input);
        for (&l, &r) in input.left.iter().zip(&input.right) {
            if self.tx.push([l, r]).is_err() {
                self.dropped += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_source_reads_frames_then_silence() {
        let (mut tx, rx) = RingBuffer::<Frame>::new(8);
        tx.push([0.5, -0.5]).unwrap();
        let mut node = StreamSourceNode::new(rx);
        let input = StereoBuffer::new(3);
        let mut output = StereoBuffer::new(3);
        node.process(&input, &mut output, &RenderCtx::new(48_000.0, 0));
        assert_eq!(output.left, vec![0.5, 0.0, 0.0]);
        assert_eq!(output.right, vec![-0.5, 0.0, 0.0]);
        assert_eq!(node.underruns(), 2);
    }

    #[test]
    fn tap_mirrors_and_drops_when_full() {
        let (mut node, mut rx) = RecordingTapNode::new(2);
        let mut input = StereoBuffer::new(3);
        input.left.copy_from_slice(&[0.1, 0.2, 0.3]);
        let mut output = StereoBuffer::new(3);
        node.process(&input, &mut output, &RenderCtx::new(48_000.0, 0));
        assert_eq!(output.left, input.left);
        assert_eq!(rx.pop().unwrap(), [0.1, 0.0]);
        assert_eq!(rx.pop().unwrap(), [0.2, 0.0]);
        assert!(rx.pop().is_err());
        assert_eq!(node.dropped(), 1);
    }
}
