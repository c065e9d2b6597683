//! Default output device driver.

use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::graph::{AudioContext, ContextBackend, ContextState};
use crate::{Result, StudioError, MAX_BLOCK_SIZE};

/*
Output Driver
=============

cpal streams are not `Send` on every host, so the stream lives on its own
thread for its whole life. Everyone else talks to that thread over a
channel:

  AudioContext::suspend/resume ──► DriverBackend ──► Request ──► device thread
                                                     (reply)  ◄──   pause/play

The device callback locks the graph and pulls interleaved frames straight
out of it, converting to whatever sample format the device wants.
*/

enum Command {
    Play,
    Pause,
    Shutdown,
}

struct Request {
    command: Command,
    reply: Sender<Result<()>>,
}

fn send(requests: &Sender<Request>, command: Command) -> Result<()> {
    let (reply, response) = bounded(1);
    requests
        .send(Request { command, reply })
        .map_err(|_| StudioError::Device("output thread has exited".into()))?;
    response
        .recv()
        .map_err(|_| StudioError::Device("output thread dropped the request".into()))?
}

/// Lets the context pause and play the device stream.
struct DriverBackend {
    requests: Sender<Request>,
}

impl ContextBackend for DriverBackend {
    fn resume(&mut self) -> Result<()> {
        send(&self.requests, Command::Play)
    }

    fn suspend(&mut self) -> Result<()> {
        send(&self.requests, Command::Pause)
    }
}

/// Plays a context on the default output device until dropped.
pub struct OutputDriver {
    context: AudioContext,
    requests: Sender<Request>,
    thread: Option<JoinHandle<()>>,
    sample_rate: f32,
    channels: usize,
}

impl OutputDriver {
    /// Open the default output device and attach it as the context's
    /// backend. The stream starts playing unless the context is suspended.
    pub fn start(context: &AudioContext) -> Result<Self> {
        let (requests, inbox) = unbounded::<Request>();
        let (ready_tx, ready_rx) = bounded(1);

        let device_context = context.clone();
        let thread = thread::Builder::new()
            .name("studio-output".into())
            .spawn(move || run_device(device_context, ready_tx, inbox))
            .map_err(|e| StudioError::Device(e.to_string()))?;

        let (sample_rate, channels) = ready_rx
            .recv()
            .map_err(|_| StudioError::Device("output thread exited during setup".into()))??;

        if sample_rate != context.sample_rate() {
            warn!(
                device = sample_rate,
                context = context.sample_rate(),
                "device sample rate differs from the audio context"
            );
        }

        if context.state() == ContextState::Running {
            send(&requests, Command::Play)?;
        }
        context.attach_backend(Box::new(DriverBackend {
            requests: requests.clone(),
        }));
        info!(sample_rate, channels, "output device running");

        Ok(Self {
            context: context.clone(),
            requests,
            thread: Some(thread),
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

impl Drop for OutputDriver {
    fn drop(&mut self) {
        self.context.detach_backend();
        if let Err(e) = send(&self.requests, Command::Shutdown) {
            debug!(error = %e, "output thread already gone");
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("output thread panicked");
            }
        }
    }
}

/// Sample rate of the default output device, for building a matching
/// `EngineConfig`.
pub fn default_output_sample_rate() -> Result<f32> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| StudioError::Device("no default output device".into()))?;
    let config = device
        .default_output_config()
        .map_err(|e| StudioError::Device(e.to_string()))?;
    Ok(config.sample_rate().0 as f32)
}

fn run_device(context: AudioContext, ready: Sender<Result<(f32, usize)>>, inbox: Receiver<Request>) {
    let stream = match open_default_output(&context) {
        Ok((stream, sample_rate, channels)) => {
            // The caller may have given up waiting; nothing to do then
            let _ = ready.send(Ok((sample_rate, channels)));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    for request in inbox.iter() {
        let result = match request.command {
            Command::Play => stream.play().map_err(|e| StudioError::Device(e.to_string())),
            Command::Pause => stream.pause().map_err(|e| StudioError::Device(e.to_string())),
            Command::Shutdown => {
                let _ = request.reply.send(Ok(()));
                break;
            }
        };
        let _ = request.reply.send(result);
    }
    drop(stream);
    debug!("output stream closed");
}

fn open_default_output(context: &AudioContext) -> Result<(cpal::Stream, f32, usize)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| StudioError::Device("no default output device".into()))?;
    let config = device
        .default_output_config()
        .map_err(|e| StudioError::Device(e.to_string()))?;
    let sample_rate = config.sample_rate().0 as f32;
    let channels = config.channels() as usize;

    let stream = match config.sample_format() {
        cpal::SampleFormat::I8 => make_stream::<i8>(&device, &config.into(), context)?,
        cpal::SampleFormat::I16 => make_stream::<i16>(&device, &config.into(), context)?,
        cpal::SampleFormat::I32 => make_stream::<i32>(&device, &config.into(), context)?,
        cpal::SampleFormat::F32 => make_stream::<f32>(&device, &config.into(), context)?,
        other => {
            return Err(StudioError::Device(format!("unsupported sample format: {other:?}")));
        }
    };
    Ok((stream, sample_rate, channels))
}

fn make_stream<T>(device: &cpal::Device, config: &cpal::StreamConfig, context: &AudioContext) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let context = context.clone();
    let mut scratch = vec![0.0f32; MAX_BLOCK_SIZE * channels.max(1)];

    device
        .build_output_stream(
            config,
            move |output: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut graph = context.graph();
                for chunk in output.chunks_mut(scratch.len()) {
                    let rendered = &mut scratch[..chunk.len()];
                    graph.render_interleaved(rendered, channels);
                    for (out, sample) in chunk.iter_mut().zip(rendered.iter()) {
                        *out = T::from_sample(*sample);
                    }
                }
            },
            |err| error!(error = %err, "output stream error"),
            None,
        )
        .map_err(|e| StudioError::Device(e.to_string()))
}
