//! Mel filterbank generation.

/// Converts frequency in Hz to the HTK mel scale, `1127 · ln(1 + f / 700)`.
fn hz_to_mel(hz: f64) -> f64 {
    1127.0 * (1.0 + hz / 700.0).ln()
}

/// Converts an HTK mel value back to Hz.
#[cfg(test)]
fn mel_to_hz(mel: f64) -> f64 {
    700.0 * ((mel / 1127.0).exp() - 1.0)
}

/// Builds a `[bins][mel_bins]` linear-to-mel weight matrix.
///
/// Triangular filters are spaced evenly on the HTK mel scale between `fmin`
/// and `fmax`, with slopes computed in the mel domain. The DC bin carries no
/// weight. `bins` is the one-sided FFT size, `frame_length / 2 + 1`.
pub fn linear_to_mel_weight_matrix(
    mel_bins: usize,
    bins: usize,
    sample_rate: f64,
    fmin: f64,
    fmax: f64,
) -> Vec<Vec<f32>> {
    let mut weights = vec![vec![0.0f32; mel_bins]; bins];
    if mel_bins == 0 || bins < 2 {
        return weights;
    }

    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);
    let edges: Vec<f64> = (0..mel_bins + 2)
        .map(|i| mel_min + (mel_max - mel_min) * i as f64 / (mel_bins + 1) as f64)
        .collect();

    let nyquist = sample_rate / 2.0;
    for (b, row) in weights.iter_mut().enumerate().skip(1) {
        let mel = hz_to_mel(b as f64 * nyquist / (bins - 1) as f64);
        for (m, w) in row.iter_mut().enumerate() {
            let (lower, center, upper) = (edges[m], edges[m + 1], edges[m + 2]);
            let rising = if center > lower { (mel - lower) / (center - lower) } else { 0.0 };
            let falling = if upper > center { (upper - mel) / (upper - center) } else { 0.0 };
            *w = rising.min(falling).max(0.0) as f32;
        }
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hz_mel_roundtrip() {
        for &hz in &[0.0, 100.0, 440.0, 1000.0, 4000.0, 15000.0] {
            let back = mel_to_hz(hz_to_mel(hz));
            assert!((hz - back).abs() < 1e-6, "roundtrip failed for {hz} Hz");
        }
    }

    #[test]
    fn shape_and_dc() {
        let fb = linear_to_mel_weight_matrix(96, 1025, 48_000.0, 0.0, 3000.0);
        assert_eq!(fb.len(), 1025);
        assert!(fb.iter().all(|row| row.len() == 96));
        assert!(fb[0].iter().all(|&w| w == 0.0), "DC bin must be zeroed");
        assert!(fb.iter().flatten().all(|&w| (0.0..=1.0).contains(&w)));
    }

    #[test]
    fn every_filter_has_support() {
        let fb = linear_to_mel_weight_matrix(96, 513, 48_000.0, 500.0, 15_000.0);
        for m in 0..96 {
            assert!(fb.iter().any(|row| row[m] > 0.0), "mel bin {m} is empty");
        }
    }

    #[test]
    fn bins_above_fmax_are_unused() {
        let fb = linear_to_mel_weight_matrix(32, 1025, 48_000.0, 0.0, 3000.0);
        // 3000 Hz sits at bin 128 of 1025 over 24 kHz.
        for row in &fb[130..] {
            assert!(row.iter().all(|&w| w == 0.0));
        }
    }
}
