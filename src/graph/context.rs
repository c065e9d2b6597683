//! Node arena, connection topology and the shared audio context.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use super::node::{downcast_mut, downcast_ref, AudioNode, RenderCtx, StereoBuffer};
use crate::{EngineConfig, Result, StudioError};

/*
Audio Graph
===========

Nodes live in a generational arena. A `NodeId` is an index plus the
generation of the slot at the time the node was added, so an id that
outlives its node (a disposed channel, a reclaimed voice) simply fails to
resolve instead of aliasing whatever reuses the slot.

Edges are stored on the destination: each node keeps the list of nodes
feeding it. Rendering pulls one block at a time:

    1. recompute the processing order if the topology changed
       (depth-first post-order over inputs, so every input renders first)
    2. for each node: sum its inputs' output blocks, then `process`
    3. the destination node's output is the block handed to the device

    source ──► gain ──► pan ──┐
                              ├──► master ──► ... ──► destination
    source ──► gain ──► pan ──┘

Every live node renders every block, whether or not it reaches the
destination. Taps (analysers, the recording tap) rely on this.

Cycles are rejected at `connect`. Feedback loops that need one (the delay
bus) are built inside a single node instead.


Voices
------

Each triggered sample or synth note adds a short-lived chain of nodes. The
chain is registered as a voice; once its source reports `is_finished`, the
whole chain is removed from the arena, which also detaches it from any
shared busses it fed.
*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    Suspended,
}

struct Entry {
    node: Box<dyn AudioNode>,
    inputs: Vec<NodeId>,
    output: StereoBuffer,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

struct Voice {
    source: NodeId,
    chain: Vec<NodeId>,
}

/// Final summing point; its output is what the device plays.
struct Destination;

impl AudioNode for Destination {
    fn process(&mut self, input: &StereoBuffer, output: &mut StereoBuffer, _ctx: &RenderCtx) {
        output.copy_from(input);
    }
}

pub struct AudioGraph {
    sample_rate: f32,
    block_size: usize,
    frame: u64,
    state: ContextState,
    slots: Vec<Slot>,
    free: Vec<u32>,
    destination: NodeId,
    order: Vec<usize>,
    dirty: bool,
    scratch: StereoBuffer,
    voices: Vec<Voice>,
    /// Last rendered block
    output: StereoBuffer,
    /// Frames of `output` already handed to the device
    output_pos: usize,
}

impl AudioGraph {
    pub fn new(sample_rate: f32, block_size: usize) -> Self {
        let block_size = block_size.clamp(1, crate::MAX_BLOCK_SIZE);
        let mut graph = Self {
            sample_rate,
            block_size,
            frame: 0,
            state: ContextState::Running,
            slots: Vec::new(),
            free: Vec::new(),
            destination: NodeId {
                index: 0,
                generation: 0,
            },
            order: Vec::new(),
            dirty: true,
            scratch: StereoBuffer::new(block_size),
            voices: Vec::new(),
            output: StereoBuffer::new(0),
            output_pos: 0,
        };
        graph.destination = graph.add(Destination);
        graph
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Audio-clock time in seconds of the next frame to be rendered.
    pub fn current_time(&self) -> f64 {
        self.frame as f64 / self.sample_rate as f64
    }

    pub fn current_frame(&self) -> u64 {
        self.frame
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ContextState) {
        self.state = state;
    }

    pub fn destination(&self) -> NodeId {
        self.destination
    }

    /// Number of live nodes, the destination included.
    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn add<N: AudioNode>(&mut self, node: N) -> NodeId {
        self.add_boxed(Box::new(node))
    }

    pub fn add_boxed(&mut self, node: Box<dyn AudioNode>) -> NodeId {
        let entry = Entry {
            node,
            inputs: Vec::new(),
            output: StereoBuffer::new(self.block_size),
        };
        self.dirty = true;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }

        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        NodeId {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entry(id).is_some()
    }

    fn entry(&self, id: NodeId) -> Option<&Entry> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, id: NodeId) -> Option<&mut Entry> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    /// Borrow a node as its concrete type.
    pub fn node<T: AudioNode>(&self, id: NodeId) -> Option<&T> {
        self.entry(id).and_then(|e| downcast_ref::<T>(e.node.as_ref()))
    }

    pub fn node_mut<T: AudioNode>(&mut self, id: NodeId) -> Option<&mut T> {
        self.entry_mut(id)
            .and_then(|e| downcast_mut::<T>(e.node.as_mut()))
    }

    /// Route `from`'s output into `to`. Connecting twice is a no-op.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        if !self.contains(from) {
            return Err(StudioError::UnknownNode(from));
        }
        if !self.contains(to) {
            return Err(StudioError::UnknownNode(to));
        }
        if self.is_upstream(to, from) {
            return Err(StudioError::GraphCycle);
        }

        let added = match self.entry_mut(to) {
            Some(entry) if !entry.inputs.contains(&from) => {
                entry.inputs.push(from);
                true
            }
            _ => false,
        };
        self.dirty |= added;
        Ok(())
    }

    /// Connect a list of nodes in series.
    pub fn chain(&mut self, nodes: &[NodeId]) -> Result<()> {
        for pair in nodes.windows(2) {
            self.connect(pair[0], pair[1])?;
        }
        Ok(())
    }

    /// Remove the edge `from → to`. Missing edges and nodes are ignored.
    pub fn disconnect(&mut self, from: NodeId, to: NodeId) {
        let removed = match self.entry_mut(to) {
            Some(entry) => {
                let before = entry.inputs.len();
                entry.inputs.retain(|&input| input != from);
                entry.inputs.len() != before
            }
            None => false,
        };
        self.dirty |= removed;
    }

    /// Remove every outgoing edge of `from`.
    pub fn disconnect_all(&mut self, from: NodeId) {
        for slot in &mut self.slots {
            if let Some(entry) = slot.entry.as_mut() {
                entry.inputs.retain(|&input| input != from);
            }
        }
        self.dirty = true;
    }

    /// Drop a node and every edge touching it. Unknown ids are ignored.
    pub fn remove(&mut self, id: NodeId) {
        if id == self.destination || !self.contains(id) {
            return;
        }
        self.disconnect_all(id);
        let slot = &mut self.slots[id.index as usize];
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.dirty = true;
    }

    /// Register a per-trigger chain to be removed once `source` finishes.
    pub fn register_voice(&mut self, source: NodeId, chain: Vec<NodeId>) {
        self.voices.push(Voice { source, chain });
    }

    /// True if `target` feeds `node`, directly or transitively.
    fn is_upstream(&self, target: NodeId, node: NodeId) -> bool {
        let mut stack = vec![node];
        let mut seen = vec![false; self.slots.len()];
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            let index = current.index as usize;
            if seen.get(index).copied().unwrap_or(true) {
                continue;
            }
            seen[index] = true;
            if let Some(entry) = self.entry(current) {
                stack.extend(entry.inputs.iter().copied());
            }
        }
        false
    }

    fn rebuild_order(&mut self) {
        let len = self.slots.len();
        let mut visited = vec![false; len];
        self.order.clear();

        for root in 0..len {
            if visited[root] || self.slots[root].entry.is_none() {
                continue;
            }
            // Iterative post-order: (slot, next input to visit)
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            visited[root] = true;
            while let Some(top) = stack.last_mut() {
                let (index, next) = *top;
                top.1 += 1;
                let input = self.slots[index]
                    .entry
                    .as_ref()
                    .and_then(|e| e.inputs.get(next).copied());
                match input {
                    Some(input) => {
                        let i = input.index as usize;
                        if self.entry(input).is_some() && !visited[i] {
                            visited[i] = true;
                            stack.push((i, 0));
                        }
                    }
                    None => {
                        self.order.push(index);
                        stack.pop();
                    }
                }
            }
        }

        self.dirty = false;
        trace!(nodes = self.order.len(), "rebuilt render order");
    }

    /// Render one block of at most `block_size` frames. While suspended the
    /// block is silent and the clock stands still.
    pub fn render_block(&mut self, frames: usize) -> &StereoBuffer {
        let frames = frames.clamp(1, self.block_size);
        self.output.prepare(frames);

        if self.state == ContextState::Suspended {
            return &self.output;
        }

        if self.dirty {
            self.rebuild_order();
        }

        let ctx = RenderCtx::new(self.sample_rate, self.frame);
        let Self {
            slots,
            order,
            scratch,
            ..
        } = self;

        for &index in order.iter() {
            scratch.prepare(frames);
            if let Some(entry) = slots[index].entry.as_ref() {
                for input in &entry.inputs {
                    let source = slots
                        .get(input.index as usize)
                        .filter(|s| s.generation == input.generation)
                        .and_then(|s| s.entry.as_ref());
                    if let Some(source) = source {
                        if source.output.frames() == frames {
                            scratch.add(&source.output);
                        }
                    }
                }
            }
            if let Some(entry) = slots[index].entry.as_mut() {
                entry.output.prepare(frames);
                entry.node.process(scratch, &mut entry.output, &ctx);
            }
        }

        let destination = self.destination;
        if let Some(entry) = self
            .slots
            .get(destination.index as usize)
            .and_then(|s| s.entry.as_ref())
        {
            self.output.copy_from(&entry.output);
        }

        self.frame += frames as u64;
        self.retire_voices();
        &self.output
    }

    fn retire_voices(&mut self) {
        let now = self.current_time();
        let mut finished = Vec::new();
        self.voices.retain(|voice| {
            let done = match self
                .slots
                .get(voice.source.index as usize)
                .filter(|s| s.generation == voice.source.generation)
                .and_then(|s| s.entry.as_ref())
            {
                Some(entry) => entry.node.is_finished(now),
                None => true,
            };
            if done {
                finished.push(voice.source);
                finished.extend(voice.chain.iter().copied());
            }
            !done
        });

        if !finished.is_empty() {
            debug!(nodes = finished.len(), "reclaiming finished voice nodes");
            for id in finished {
                self.remove(id);
            }
        }
    }

    /// Fill an interleaved device buffer, rendering blocks as needed.
    pub fn render_interleaved(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        for frame in out.chunks_mut(channels) {
            if self.output_pos >= self.output.frames() {
                self.render_block(self.block_size);
                self.output_pos = 0;
            }
            let l = self.output.left[self.output_pos];
            let r = self.output.right[self.output_pos];
            self.output_pos += 1;

            match frame.len() {
                1 => frame[0] = 0.5 * (l + r),
                _ => {
                    frame[0] = l;
                    frame[1] = r;
                    for extra in frame.iter_mut().skip(2) {
                        *extra = 0.0;
                    }
                }
            }
        }
    }

    /// Render `frames` frames without a device.
    pub fn render_offline(&mut self, frames: usize) -> StereoBuffer {
        let mut out = StereoBuffer {
            left: Vec::with_capacity(frames),
            right: Vec::with_capacity(frames),
        };
        let mut remaining = frames;
        while remaining > 0 {
            let n = remaining.min(self.block_size);
            let block = self.render_block(n);
            out.left.extend_from_slice(&block.left);
            out.right.extend_from_slice(&block.right);
            remaining -= n;
        }
        out
    }
}

/// Device-side hooks the context drives on suspend/resume.
pub trait ContextBackend: Send {
    fn resume(&mut self) -> Result<()>;
    fn suspend(&mut self) -> Result<()>;
}

struct ContextInner {
    graph: Mutex<AudioGraph>,
    backend: Mutex<Option<Box<dyn ContextBackend>>>,
    sample_rate: f32,
}

/// Shared handle to the one audio graph every component renders into.
///
/// Cloning is cheap; all clones refer to the same graph and clock.
#[derive(Clone)]
pub struct AudioContext {
    inner: Arc<ContextInner>,
}

impl AudioContext {
    pub fn new(config: &EngineConfig) -> Self {
        let graph = AudioGraph::new(config.sample_rate, config.effective_block_size());
        Self {
            inner: Arc::new(ContextInner {
                graph: Mutex::new(graph),
                backend: Mutex::new(None),
                sample_rate: config.sample_rate,
            }),
        }
    }

    /// Lock the graph for building or rendering.
    pub fn graph(&self) -> MutexGuard<'_, AudioGraph> {
        self.inner.graph.lock()
    }

    pub fn sample_rate(&self) -> f32 {
        self.inner.sample_rate
    }

    #[cfg(test)]
    pub(crate) fn is_graph_locked(&self) -> bool {
        self.inner.graph.is_locked()
    }

    pub fn current_time(&self) -> f64 {
        self.graph().current_time()
    }

    pub fn state(&self) -> ContextState {
        self.graph().state()
    }

    pub fn destination(&self) -> NodeId {
        self.graph().destination()
    }

    /// Let a device stream follow suspend/resume.
    pub fn attach_backend(&self, backend: Box<dyn ContextBackend>) {
        *self.inner.backend.lock() = Some(backend);
    }

    pub fn detach_backend(&self) -> Option<Box<dyn ContextBackend>> {
        self.inner.backend.lock().take()
    }

    pub fn resume(&self) -> Result<()> {
        if let Some(backend) = self.inner.backend.lock().as_mut() {
            backend.resume()?;
        }
        self.graph().set_state(ContextState::Running);
        debug!("audio context resumed");
        Ok(())
    }

    pub fn suspend(&self) -> Result<()> {
        if let Some(backend) = self.inner.backend.lock().as_mut() {
            backend.suspend()?;
        }
        self.graph().set_state(ContextState::Suspended);
        debug!("audio context suspended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Emits a constant on both channels.
    struct Dc(f32);

    impl AudioNode for Dc {
        fn process(&mut self, _input: &StereoBuffer, output: &mut StereoBuffer, _ctx: &RenderCtx) {
            output.left.fill(self.0);
            output.right.fill(self.0);
        }
    }

    struct Through;

    impl AudioNode for Through {
        fn process(&mut self, input: &StereoBuffer, output: &mut StereoBuffer, _ctx: &RenderCtx) {
            output.copy_from(input);
        }
    }

    /// Finishes at a fixed time.
    struct Burst {
        until: f64,
    }

    impl AudioNode for Burst {
        fn process(&mut self, _input: &StereoBuffer, output: &mut StereoBuffer, _ctx: &RenderCtx) {
            output.left.fill(1.0);
            output.right.fill(1.0);
        }

        fn is_finished(&self, time: f64) -> bool {
            time >= self.until
        }
    }

    #[test]
    fn inputs_are_summed() {
        let mut graph = AudioGraph::new(1_000.0, 8);
        let a = graph.add(Dc(0.25));
        let b = graph.add(Dc(0.5));
        let dest = graph.destination();
        graph.connect(a, dest).unwrap();
        graph.connect(b, dest).unwrap();
        let block = graph.render_block(8);
        assert!(block.left.iter().all(|s| (*s - 0.75).abs() < 1e-6));
    }

    #[test]
    fn duplicate_connect_is_noop() {
        let mut graph = AudioGraph::new(1_000.0, 4);
        let a = graph.add(Dc(0.5));
        let dest = graph.destination();
        graph.connect(a, dest).unwrap();
        graph.connect(a, dest).unwrap();
        assert_eq!(graph.render_block(4).left[0], 0.5);
    }

    #[test]
    fn cycles_are_rejected() {
        let mut graph = AudioGraph::new(1_000.0, 4);
        let a = graph.add(Through);
        let b = graph.add(Through);
        let c = graph.add(Through);
        graph.chain(&[a, b, c]).unwrap();
        assert!(matches!(graph.connect(c, a), Err(StudioError::GraphCycle)));
        assert!(matches!(graph.connect(a, a), Err(StudioError::GraphCycle)));
    }

    #[test]
    fn disconnect_missing_edge_is_noop() {
        let mut graph = AudioGraph::new(1_000.0, 4);
        let a = graph.add(Through);
        let b = graph.add(Through);
        graph.disconnect(a, b);
        graph.remove(a);
        graph.disconnect(a, b);
        graph.remove(a);
        assert!(!graph.contains(a));
    }

    #[test]
    fn stale_ids_do_not_alias_reused_slots() {
        let mut graph = AudioGraph::new(1_000.0, 4);
        let a = graph.add(Dc(1.0));
        graph.remove(a);
        let b = graph.add(Dc(2.0));
        assert!(!graph.contains(a));
        assert!(graph.contains(b));
        assert!(graph.node_mut::<Dc>(a).is_none());
        assert!(matches!(
            graph.connect(a, graph.destination()),
            Err(StudioError::UnknownNode(_))
        ));
    }

    #[test]
    fn suspended_graph_is_silent_and_clock_stops() {
        let mut graph = AudioGraph::new(1_000.0, 4);
        let a = graph.add(Dc(1.0));
        let dest = graph.destination();
        graph.connect(a, dest).unwrap();
        graph.set_state(ContextState::Suspended);
        assert!(graph.render_block(4).is_silent());
        assert_eq!(graph.current_frame(), 0);
        graph.set_state(ContextState::Running);
        graph.render_block(4);
        assert_eq!(graph.current_frame(), 4);
    }

    #[test]
    fn finished_voices_are_reclaimed() {
        let mut graph = AudioGraph::new(1_000.0, 10);
        let source = graph.add(Burst { until: 0.02 });
        let gain = graph.add(Through);
        let dest = graph.destination();
        graph.chain(&[source, gain, dest]).unwrap();
        graph.register_voice(source, vec![gain]);

        graph.render_block(10);
        assert_eq!(graph.voice_count(), 1);
        graph.render_block(10);
        assert_eq!(graph.voice_count(), 0);
        assert!(!graph.contains(source));
        assert!(!graph.contains(gain));
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn interleaved_render_spans_blocks() {
        let mut graph = AudioGraph::new(1_000.0, 4);
        let a = graph.add(Dc(0.5));
        let dest = graph.destination();
        graph.connect(a, dest).unwrap();
        let mut out = vec![0.0; 20];
        graph.render_interleaved(&mut out, 2);
        assert!(out.iter().all(|s| *s == 0.5));
        assert_eq!(graph.current_frame(), 12);
    }

    #[test]
    fn offline_render_advances_clock() {
        let mut graph = AudioGraph::new(1_000.0, 4);
        let out = graph.render_offline(10);
        assert_eq!(out.frames(), 10);
        assert!((graph.current_time() - 0.01).abs() < 1e-9);
    }
}
