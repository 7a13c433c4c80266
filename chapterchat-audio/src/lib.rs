pub mod pcm;
pub mod resample;

#[cfg(any(windows, target_os = "macos"))]
pub mod capture;

#[cfg(any(windows, target_os = "macos"))]
pub use capture::{CaptureError, MicCapture};

pub use pcm::CapturedAudio;
pub use resample::{TARGET_SAMPLE_RATE_HZ, resample_mono_f32, resample_to_target};
