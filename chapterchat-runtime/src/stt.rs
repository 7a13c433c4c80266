use crate::backend::HttpBackend;
use async_trait::async_trait;
use chapterchat_engine::traits::{AudioInput, BackendError, TranscriptionBackend};
use chapterchat_providers::multipart::AudioFile;

/// Encodes mono samples as a 16-bit PCM WAV file.
pub fn encode_wav_mono_pcm16(samples: &[f32], sample_rate_hz: u32) -> Vec<u8> {
    let num_channels: u16 = 1;
    let bits_per_sample: u16 = 16;
    let audio_format: u16 = 1; // integer PCM

    let byte_rate = sample_rate_hz * num_channels as u32 * (bits_per_sample as u32 / 8);
    let block_align = num_channels * (bits_per_sample / 8);
    let data_bytes_len = samples.len() as u32 * 2;

    let mut out = Vec::with_capacity((44 + data_bytes_len) as usize);

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_bytes_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&audio_format.to_le_bytes());
    out.extend_from_slice(&num_channels.to_le_bytes());
    out.extend_from_slice(&sample_rate_hz.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_bytes_len.to_le_bytes());
    for s in samples {
        out.extend_from_slice(&to_pcm16(*s).to_le_bytes());
    }

    out
}

fn to_pcm16(s: f32) -> i16 {
    if s.is_nan() {
        return 0;
    }
    (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

#[async_trait]
impl TranscriptionBackend for HttpBackend {
    async fn transcribe(&self, audio: &AudioInput) -> Result<String, BackendError> {
        if audio.samples.is_empty() {
            return Ok(String::new());
        }
        let wav = encode_wav_mono_pcm16(&audio.samples, audio.sample_rate_hz);
        log::debug!(
            "uploading {} bytes of audio (~{}ms) for transcription",
            wav.len(),
            audio.duration_ms()
        );
        Ok(self.transcribe_file(&AudioFile::wav(wav)).await?)
    }
}
