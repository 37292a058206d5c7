//! Sliding-window framing of a mono sample buffer.
//!
//! A clip is cut into fixed-length windows that overlap by a whole number of
//! half seconds. The last window is zero-padded past the end of the clip, and
//! even an empty clip yields one (all-zero) window.

/// Sample rate the acoustic model expects, in Hz.
pub const SAMPLE_RATE: usize = 48_000;

/// Window length the acoustic model expects: 3 s at [`SAMPLE_RATE`].
pub const WINDOW_SIZE: usize = 144_000;

/// Largest accepted window overlap, in seconds.
pub const MAX_OVERLAP_SECS: f32 = 2.5;

/// Rounds an overlap to the nearest 0.5 s and clamps it to `[0, 2.5]`.
///
/// Non-finite input (NaN) is treated as no overlap.
pub fn round_overlap(overlap_secs: f32) -> f32 {
    if overlap_secs.is_nan() {
        return 0.0;
    }
    ((overlap_secs * 2.0).round() / 2.0).clamp(0.0, MAX_OVERLAP_SECS)
}

/// Window length and hop used to cut a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing {
    /// Samples per window.
    pub window_size: usize,
    /// Distance between consecutive window starts, always >= 1.
    pub hop: usize,
}

impl Framing {
    /// Creates a framing with an explicit hop.
    ///
    /// The hop is clamped to `[1, window_size]` so consecutive windows never
    /// leave a gap in the clip.
    pub fn new(window_size: usize, hop: usize) -> Self {
        Self {
            window_size,
            hop: hop.clamp(1, window_size.max(1)),
        }
    }

    /// Derives the hop from an overlap in seconds.
    ///
    /// The overlap goes through [`round_overlap`] first, then
    /// `hop = window_size - round(overlap * sample_rate)`, floored to 1.
    pub fn from_overlap(overlap_secs: f32, sample_rate: usize, window_size: usize) -> Self {
        let overlap = round_overlap(overlap_secs);
        let overlap_samples = (overlap as f64 * sample_rate as f64).round() as usize;
        Self::new(window_size, window_size.saturating_sub(overlap_samples))
    }

    /// Number of windows produced for a clip of `total` samples:
    /// `max(1, ceil(max(0, total - window_size) / hop) + 1)`.
    pub fn count(&self, total: usize) -> usize {
        let excess = total.saturating_sub(self.window_size);
        excess.div_ceil(self.hop) + 1
    }

    /// Cuts `buffer` into windows, in order.
    pub fn frame(&self, buffer: &[f32]) -> Vec<Window> {
        let count = self.count(buffer.len());
        let mut windows = Vec::with_capacity(count);
        for f in 0..count {
            let start = f * self.hop;
            let mut samples = vec![0.0f32; self.window_size];
            let src_end = (start + self.window_size).min(buffer.len());
            let valid = src_end.saturating_sub(start);
            if valid > 0 {
                samples[..valid].copy_from_slice(&buffer[start..src_end]);
            }
            windows.push(Window {
                index: f,
                start,
                valid,
                samples,
            });
        }
        windows
    }
}

/// One fixed-length slice of a clip.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    index: usize,
    start: usize,
    valid: usize,
    samples: Vec<f32>,
}

impl Window {
    /// Position of this window in the clip's window sequence.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Offset of the first sample in the source buffer.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Number of samples copied from the source; the rest is zero padding.
    pub fn valid_len(&self) -> usize {
        self.valid
    }

    /// Window samples, always `window_size` long.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}
