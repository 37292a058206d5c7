//! WAV input: decode, downmix to mono, resample.

use std::path::Path;

use anyhow::Context;
use rubato::{FftFixedInOut, Resampler};

/// Frames per rubato processing block.
const CHUNK_SIZE: usize = 1024;

/// Reads a WAV file as mono `f32` samples at `sample_rate`.
pub fn read_mono(path: &Path, sample_rate: u32) -> anyhow::Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };
    tracing::debug!(
        rate = spec.sample_rate,
        channels = spec.channels,
        bits = spec.bits_per_sample,
        frames = interleaved.len() / spec.channels.max(1) as usize,
        "wav decoded"
    );
    let mono = downmix(&interleaved, spec.channels as usize);
    resample(mono, spec.sample_rate, sample_rate)
}

/// Averages interleaved channels.
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let scale = 1.0 / channels as f32;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

/// Converts mono samples from `from` Hz to `to` Hz, compensating the
/// resampler delay so the output lines up with the input.
fn resample(mono: Vec<f32>, from: u32, to: u32) -> anyhow::Result<Vec<f32>> {
    if from == to {
        return Ok(mono);
    }
    let mut resampler = FftFixedInOut::<f32>::new(from as usize, to as usize, CHUNK_SIZE, 1)
        .with_context(|| format!("resampler {from} Hz -> {to} Hz"))?;
    let delay = resampler.output_delay();
    let expected = (mono.len() as u64 * to as u64 / from as u64) as usize;

    let mut out = Vec::with_capacity(expected + delay + CHUNK_SIZE);
    let mut chunk = Vec::with_capacity(resampler.input_frames_max());
    let mut pos = 0;
    while out.len() < expected + delay {
        let need = resampler.input_frames_next();
        let end = (pos + need).min(mono.len());
        chunk.clear();
        chunk.extend_from_slice(&mono[pos.min(end)..end]);
        chunk.resize(need, 0.0);
        pos += need;

        let frames = resampler.process(&[&chunk], None)?;
        out.extend_from_slice(&frames[0]);
    }
    out.drain(..delay);
    out.truncate(expected);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("birdnet-cli-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("clip.wav")
    }

    fn write_wav(path: &Path, rate: u32, channels: u16, frames: &[Vec<i16>]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for frame in frames {
            for &s in frame {
                writer.write_sample(s).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn downmix_averages_channels() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2), vec![0.5, 0.5, 0.0]);
        assert_eq!(downmix(&[0.25, 0.75], 1), vec![0.25, 0.75]);
    }

    #[test]
    fn reads_native_rate_stereo() {
        let path = scratch("stereo");
        let frames: Vec<Vec<i16>> = (0..480).map(|_| vec![16384, 0]).collect();
        write_wav(&path, 48_000, 2, &frames);

        let pcm = read_mono(&path, 48_000).unwrap();
        assert_eq!(pcm.len(), 480);
        assert!(pcm.iter().all(|&v| (v - 0.25).abs() < 1e-6));
    }

    #[test]
    fn resamples_to_target_rate() {
        let path = scratch("resample");
        // One second of a 440 Hz tone at 16 kHz.
        let frames: Vec<Vec<i16>> = (0..16_000)
            .map(|i| {
                let t = i as f32 / 16_000.0;
                vec![((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 16384.0) as i16]
            })
            .collect();
        write_wav(&path, 16_000, 1, &frames);

        let pcm = read_mono(&path, 48_000).unwrap();
        assert_eq!(pcm.len(), 48_000);
        let peak = pcm[4_800..43_200].iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!((peak - 0.5).abs() < 0.05, "peak {peak}");
    }
}
