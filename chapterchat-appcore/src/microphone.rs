//! `Microphone` implementations backed by `chapterchat-audio`.

use async_trait::async_trait;
use chapterchat_engine::traits::{
    ActiveCapture, AudioInput, Microphone, MicrophoneError, MicrophoneErrorKind,
};

/// Picks the input implementation this platform supports.
pub fn default_microphone() -> std::sync::Arc<dyn Microphone> {
    #[cfg(any(windows, target_os = "macos"))]
    {
        std::sync::Arc::new(CpalMicrophone)
    }

    #[cfg(not(any(windows, target_os = "macos")))]
    {
        std::sync::Arc::new(NoMicrophone)
    }
}

/// Used where audio capture is not wired up; every acquire fails with `NoDevice`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMicrophone;

#[async_trait]
impl Microphone for NoMicrophone {
    async fn acquire(&self) -> Result<Box<dyn ActiveCapture>, MicrophoneError> {
        Err(MicrophoneError::new(
            MicrophoneErrorKind::NoDevice,
            "audio capture is not supported on this platform",
        ))
    }
}

/// Classifies a backend error description when the device API gives no better signal.
pub fn classify_backend_message(message: &str) -> MicrophoneErrorKind {
    let m = message.to_lowercase();
    if m.contains("permission") || m.contains("access is denied") || m.contains("not permitted") {
        MicrophoneErrorKind::PermissionDenied
    } else if m.contains("in use") || m.contains("busy") || m.contains("exclusive") {
        MicrophoneErrorKind::DeviceBusy
    } else {
        MicrophoneErrorKind::Other
    }
}

#[cfg(any(windows, target_os = "macos"))]
pub use cpal_impl::{CpalMicrophone, map_capture_error};

#[cfg(any(windows, target_os = "macos"))]
mod cpal_impl {
    use super::*;
    use chapterchat_audio::{CaptureError, MicCapture, TARGET_SAMPLE_RATE_HZ, resample_to_target};

    fn join_failed(e: tokio::task::JoinError) -> MicrophoneError {
        MicrophoneError::new(MicrophoneErrorKind::Aborted, e.to_string())
    }

    pub fn map_capture_error(e: &CaptureError) -> MicrophoneError {
        let kind = match e {
            CaptureError::NoInputDevice => MicrophoneErrorKind::NoDevice,
            CaptureError::DeviceUnavailable => MicrophoneErrorKind::DeviceBusy,
            CaptureError::UnsupportedConfig => MicrophoneErrorKind::ConstraintsUnsatisfiable,
            CaptureError::Backend(m) => classify_backend_message(m),
            CaptureError::WorkerTimeout | CaptureError::StopTimeout | CaptureError::Channel => {
                MicrophoneErrorKind::Aborted
            }
        };
        MicrophoneError::new(kind, e.to_string())
    }

    /// Opens the default input device for each recording.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct CpalMicrophone;

    #[async_trait]
    impl Microphone for CpalMicrophone {
        async fn acquire(&self) -> Result<Box<dyn ActiveCapture>, MicrophoneError> {
            let capture = tokio::task::spawn_blocking(MicCapture::open_default)
                .await
                .map_err(join_failed)?
                .map_err(|e| map_capture_error(&e))?;
            Ok(Box::new(CpalCapture { capture }))
        }
    }

    struct CpalCapture {
        capture: MicCapture,
    }

    #[async_trait]
    impl ActiveCapture for CpalCapture {
        async fn finish(self: Box<Self>) -> Result<AudioInput, MicrophoneError> {
            let capture = self.capture;
            tokio::task::spawn_blocking(move || {
                let captured = capture.finish().map_err(|e| map_capture_error(&e))?;
                let samples = resample_to_target(&captured.samples, captured.sample_rate_hz)
                    .map_err(|e| MicrophoneError::new(MicrophoneErrorKind::Other, format!("{e:#}")))?;
                Ok(AudioInput {
                    sample_rate_hz: TARGET_SAMPLE_RATE_HZ,
                    samples,
                })
            })
            .await
            .map_err(join_failed)?
        }
    }
}
