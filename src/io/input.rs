//! Capture from the default input device.

use std::thread::{self, JoinHandle};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam_channel::{bounded, Sender};
use rtrb::{Producer, RingBuffer};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::graph::stream::CAPTURE_QUEUE_SIZE;
use crate::graph::Frame;
use crate::router::{CaptureConstraints, CaptureStream, CaptureTrack, InputProvider};
use crate::{Result, StudioError};

/// Opens the host's default input device for every channel that asks.
///
/// cpal exposes no echo-cancellation, noise-suppression or gain-control
/// switches, so those constraints are only logged. The latency request
/// picks a fixed device buffer when the device's range allows it.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalInputProvider;

#[async_trait]
impl InputProvider for CpalInputProvider {
    async fn acquire(&self, label: &str, constraints: CaptureConstraints) -> Result<CaptureStream> {
        let (producer, consumer) = RingBuffer::<Frame>::new(CAPTURE_QUEUE_SIZE);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let name = format!("capture-{label}");
        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let stream = match open_default_input(producer, constraints) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Blocks until stopped or the track is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| StudioError::Device(e.to_string()))?;

        let opened = ready_rx
            .await
            .map_err(|_| StudioError::Device("capture thread exited during setup".into()))?;
        if let Err(e) = opened {
            let _ = thread.join();
            return Err(e);
        }

        info!(label, latency = constraints.latency, "capture stream opened");
        let track = CpalTrack {
            stop: Some(stop_tx),
            thread: Some(thread),
        };
        let tracks: Vec<Box<dyn CaptureTrack>> = vec![Box::new(track)];
        Ok(CaptureStream::new(consumer, tracks))
    }
}

struct CpalTrack {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureTrack for CpalTrack {
    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("capture thread panicked");
            }
        }
    }
}

fn open_default_input(producer: Producer<Frame>, constraints: CaptureConstraints) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(StudioError::CaptureUnsupported)?;
    let supported = device
        .default_input_config()
        .map_err(|e| StudioError::CaptureDenied(e.to_string()))?;

    debug!(
        echo_cancellation = constraints.echo_cancellation,
        noise_suppression = constraints.noise_suppression,
        auto_gain_control = constraints.auto_gain_control,
        "capture constraints (not switchable through cpal)"
    );

    let mut config: cpal::StreamConfig = supported.config();
    let requested = (constraints.latency * config.sample_rate.0 as f64).round() as u32;
    if let cpal::SupportedBufferSize::Range { min, max } = supported.buffer_size() {
        if (*min..=*max).contains(&requested) {
            config.buffer_size = cpal::BufferSize::Fixed(requested);
        }
    }

    let stream = match supported.sample_format() {
        cpal::SampleFormat::I8 => make_input::<i8>(&device, &config, producer)?,
        cpal::SampleFormat::I16 => make_input::<i16>(&device, &config, producer)?,
        cpal::SampleFormat::I32 => make_input::<i32>(&device, &config, producer)?,
        cpal::SampleFormat::F32 => make_input::<f32>(&device, &config, producer)?,
        other => {
            return Err(StudioError::Device(format!("unsupported sample format: {other:?}")));
        }
    };
    stream.play().map_err(|e| StudioError::Device(e.to_string()))?;
    Ok(stream)
}

fn make_input<T>(device: &cpal::Device, config: &cpal::StreamConfig, mut producer: Producer<Frame>) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels.max(1)) {
                    let left = f32::from_sample(frame[0]);
                    let right = frame.get(1).map_or(left, |s| f32::from_sample(*s));
                    // Full ring: the graph is behind, drop rather than block
                    let _ = producer.push([left, right]);
                }
            },
            |err| error!(error = %err, "input stream error"),
            None,
        )
        .map_err(|e| StudioError::CaptureDenied(e.to_string()))
}
