//! Microphone capture through cpal.
//!
//! A `MicCapture` holds the input device for exactly one recording. The stream
//! lives on its own thread (cpal streams are not `Send` everywhere) and is
//! dropped when the capture finishes or is dropped.

use std::sync::mpsc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat, SizedSample, Stream};

use crate::pcm::{CapturedAudio, downmix_to_mono};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no input device found")]
    NoInputDevice,

    #[error("input device is not available")]
    DeviceUnavailable,

    #[error("no supported input configuration")]
    UnsupportedConfig,

    #[error("audio backend error: {0}")]
    Backend(String),

    #[error("audio worker startup timeout")]
    WorkerTimeout,

    #[error("recording stop timed out")]
    StopTimeout,

    #[error("internal channel error")]
    Channel,
}

impl From<cpal::DefaultStreamConfigError> for CaptureError {
    fn from(e: cpal::DefaultStreamConfigError) -> Self {
        match e {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => CaptureError::DeviceUnavailable,
            cpal::DefaultStreamConfigError::StreamTypeNotSupported => CaptureError::UnsupportedConfig,
            other => CaptureError::Backend(other.to_string()),
        }
    }
}

impl From<cpal::BuildStreamError> for CaptureError {
    fn from(e: cpal::BuildStreamError) -> Self {
        match e {
            cpal::BuildStreamError::DeviceNotAvailable => CaptureError::DeviceUnavailable,
            cpal::BuildStreamError::StreamConfigNotSupported => CaptureError::UnsupportedConfig,
            other => CaptureError::Backend(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for CaptureError {
    fn from(e: cpal::PlayStreamError) -> Self {
        match e {
            cpal::PlayStreamError::DeviceNotAvailable => CaptureError::DeviceUnavailable,
            other => CaptureError::Backend(other.to_string()),
        }
    }
}

enum Cmd {
    Stop(mpsc::Sender<Vec<f32>>),
}

pub struct MicCapture {
    cmd_tx: Option<mpsc::Sender<Cmd>>,
    worker: Option<std::thread::JoinHandle<()>>,
    sample_rate_hz: u32,
}

impl MicCapture {
    /// Opens the default input device and starts recording right away.
    ///
    /// Blocks until the stream is running or has failed.
    pub fn open_default() -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(CaptureError::NoInputDevice)?;
        if let Ok(name) = device.name() {
            log::info!("using input device: {name}");
        }

        let config = device.default_input_config()?;
        let sample_rate_hz = config.sample_rate().0;

        let (cmd_tx, cmd_rx) = mpsc::channel::<Cmd>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();

        let worker = std::thread::spawn(move || {
            let (sample_tx, sample_rx) = mpsc::channel::<Vec<f32>>();
            let channels = config.channels() as usize;
            let stream_config: cpal::StreamConfig = config.clone().into();

            let stream = match config.sample_format() {
                SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, channels, sample_tx),
                SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, channels, sample_tx),
                SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, channels, sample_tx),
                SampleFormat::F64 => build_stream::<f64>(&device, &stream_config, channels, sample_tx),
                _ => build_stream::<f32>(&device, &stream_config, channels, sample_tx),
            };
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    log::error!("audio stream build failed: {e}");
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                log::error!("audio stream play failed: {e}");
                let _ = ready_tx.send(Err(e.into()));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            collect(sample_rx, cmd_rx);
            drop(stream);
            log::debug!("input device released");
        });

        match ready_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(mpsc::RecvTimeoutError::Timeout) => return Err(CaptureError::WorkerTimeout),
            Err(mpsc::RecvTimeoutError::Disconnected) => return Err(CaptureError::Channel),
        }

        Ok(Self {
            cmd_tx: Some(cmd_tx),
            worker: Some(worker),
            sample_rate_hz,
        })
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    /// Stops recording, releases the device and returns what was captured.
    pub fn finish(mut self) -> Result<CapturedAudio, CaptureError> {
        let cmd_tx = self.cmd_tx.take().ok_or(CaptureError::Channel)?;
        let (resp_tx, resp_rx) = mpsc::channel();
        cmd_tx
            .send(Cmd::Stop(resp_tx))
            .map_err(|_| CaptureError::Channel)?;

        let samples = resp_rx
            .recv_timeout(Duration::from_secs(3))
            .map_err(|e| match e {
                mpsc::RecvTimeoutError::Timeout => CaptureError::StopTimeout,
                mpsc::RecvTimeoutError::Disconnected => CaptureError::Channel,
            })?;

        Ok(CapturedAudio {
            sample_rate_hz: self.sample_rate_hz,
            samples,
        })
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        // Closing the command channel ends the worker, which drops the stream.
        self.cmd_tx.take();
        if let Some(h) = self.worker.take() {
            let _ = h.join();
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    sample_tx: mpsc::Sender<Vec<f32>>,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: Sample + SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let mut scratch: Vec<f32> = Vec::new();
    let cb = move |data: &[T], _: &cpal::InputCallbackInfo| {
        scratch.clear();
        scratch.extend(data.iter().map(|&s| s.to_sample::<f32>()));
        let mut mono = Vec::with_capacity(scratch.len() / channels.max(1));
        downmix_to_mono(&scratch, channels, &mut mono);
        let _ = sample_tx.send(mono);
    };

    device.build_input_stream(
        config,
        cb,
        |err| log::error!("audio stream error: {err}"),
        None,
    )
}

fn collect(sample_rx: mpsc::Receiver<Vec<f32>>, cmd_rx: mpsc::Receiver<Cmd>) {
    let mut captured: Vec<f32> = Vec::new();

    loop {
        match cmd_rx.try_recv() {
            Ok(Cmd::Stop(resp)) => {
                // Take whatever is already queued before answering.
                while let Ok(chunk) = sample_rx.try_recv() {
                    captured.extend_from_slice(&chunk);
                }
                let _ = resp.send(std::mem::take(&mut captured));
                return;
            }
            Err(mpsc::TryRecvError::Disconnected) => return,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        match sample_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(chunk) => captured.extend_from_slice(&chunk),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}
