use anyhow::Context;
use rubato::Resampler;

/// Rate the transcription backend expects.
pub const TARGET_SAMPLE_RATE_HZ: u32 = 16_000;

/// Resample mono f32 audio to a target sample rate.
pub fn resample_mono_f32(
    input_samples: &[f32],
    input_sample_rate_hz: u32,
    target_sample_rate_hz: u32,
) -> anyhow::Result<Vec<f32>> {
    if input_sample_rate_hz == target_sample_rate_hz || input_samples.is_empty() {
        return Ok(input_samples.to_vec());
    }
    if input_sample_rate_hz == 0 || target_sample_rate_hz == 0 {
        anyhow::bail!("sample rate must be non-zero");
    }

    let params = rubato::SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: rubato::SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window: rubato::WindowFunction::BlackmanHarris2,
    };

    let mut resampler = rubato::SincFixedIn::<f32>::new(
        target_sample_rate_hz as f64 / input_sample_rate_hz as f64,
        2.0,
        params,
        input_samples.len(),
        1,
    )
    .context("create resampler")?;

    let input = vec![input_samples.to_vec()];
    let out = resampler.process(&input, None).context("resample")?;
    Ok(out.into_iter().next().unwrap_or_default())
}

pub fn resample_to_target(input_samples: &[f32], input_sample_rate_hz: u32) -> anyhow::Result<Vec<f32>> {
    resample_mono_f32(input_samples, input_sample_rate_hz, TARGET_SAMPLE_RATE_HZ)
}
