//! Real-input radix-2 FFT via a half-length complex transform.
//!
//! A frame of `n` real samples is viewed as `n / 2` complex samples (even
//! samples on the real lane, odd samples on the imaginary lane). One complex
//! FFT of length `n / 2` then yields the `n / 2 + 1` one-sided bins of the
//! real FFT after a conjugate-symmetry reconstruction pass.
//!
//! The three stages mirror how a data-parallel backend dispatches them:
//!
//! 1. [`RealFftPlan::pack`]: Hann window + bit-reversal gather into
//!    `[re lane | im lane]`
//! 2. [`RealFftPlan::butterflies`]: `log2(n / 2)` decimation-in-time stages
//! 3. [`RealFftPlan::reconstruct`]: recover the real FFT bins

use std::f64::consts::PI;

use crate::error::KernelError;

/// Precomputed tables for one frame length.
#[derive(Debug, Clone)]
pub(crate) struct RealFftPlan {
    frame_length: usize,
    inner_dim: usize,
    /// Periodic Hann window over the frame.
    hann: Vec<f32>,
    /// `bitrev[p]` is `p` with its `log2(inner_dim)` bits reversed.
    bitrev: Vec<usize>,
    /// `exp(-2πi·j / inner_dim)` for `j < inner_dim / 2`.
    twiddle_re: Vec<f32>,
    twiddle_im: Vec<f32>,
    /// `cos` / `sin` of `-2π·i / frame_length` for `i <= inner_dim`.
    recon_cos: Vec<f32>,
    recon_sin: Vec<f32>,
}

impl RealFftPlan {
    pub(crate) fn new(frame_length: usize) -> Result<Self, KernelError> {
        if frame_length < 2 || !frame_length.is_power_of_two() {
            return Err(KernelError::FrameLength(frame_length));
        }
        let inner_dim = frame_length / 2;
        let bits = inner_dim.trailing_zeros();

        let hann = (0..frame_length)
            .map(|q| (0.5 - 0.5 * (2.0 * PI * q as f64 / frame_length as f64).cos()) as f32)
            .collect();

        let bitrev = (0..inner_dim)
            .map(|p| if bits == 0 { 0 } else { p.reverse_bits() >> (usize::BITS - bits) })
            .collect();

        let half = inner_dim / 2;
        let mut twiddle_re = Vec::with_capacity(half);
        let mut twiddle_im = Vec::with_capacity(half);
        for j in 0..half {
            let t = 2.0 * PI * j as f64 / inner_dim as f64;
            twiddle_re.push(t.cos() as f32);
            twiddle_im.push(-t.sin() as f32);
        }

        let mut recon_cos = Vec::with_capacity(inner_dim + 1);
        let mut recon_sin = Vec::with_capacity(inner_dim + 1);
        for i in 0..=inner_dim {
            let t = -2.0 * PI * i as f64 / frame_length as f64;
            recon_cos.push(t.cos() as f32);
            recon_sin.push(t.sin() as f32);
        }

        Ok(Self {
            frame_length,
            inner_dim,
            hann,
            bitrev,
            twiddle_re,
            twiddle_im,
            recon_cos,
            recon_sin,
        })
    }

    pub(crate) fn frame_length(&self) -> usize {
        self.frame_length
    }

    /// Number of one-sided bins, `frame_length / 2 + 1`.
    pub(crate) fn bins(&self) -> usize {
        self.inner_dim + 1
    }

    /// Scratch length for one frame: the two `inner_dim` lanes.
    pub(crate) fn lanes(&self) -> usize {
        2 * self.inner_dim
    }

    /// Runs all three stages on one frame.
    ///
    /// `frame` holds `frame_length` raw samples, `lanes` is scratch of
    /// [`Self::lanes`] length, `re`/`im` receive [`Self::bins`] values each.
    pub(crate) fn process(&self, frame: &[f32], lanes: &mut [f32], re: &mut [f32], im: &mut [f32]) {
        self.pack(frame, lanes);
        self.butterflies(lanes);
        self.reconstruct(lanes, re, im);
    }

    /// Windows the frame and gathers it in bit-reversed order: lane 0 gets
    /// the even samples, lane 1 the odd samples.
    pub(crate) fn pack(&self, frame: &[f32], lanes: &mut [f32]) {
        let n = self.inner_dim;
        let (re, im) = lanes.split_at_mut(n);
        for p in 0..n {
            let even = 2 * self.bitrev[p];
            re[p] = frame[even] * self.hann[even];
            im[p] = frame[even + 1] * self.hann[even + 1];
        }
    }

    /// Iterative radix-2 decimation-in-time over the packed lanes.
    ///
    /// Stage `len` combines entries `len` apart with twiddle
    /// `(cos(π·k/len), -sin(π·k/len))`, `k` being the index inside the block.
    pub(crate) fn butterflies(&self, lanes: &mut [f32]) {
        let n = self.inner_dim;
        let (re, im) = lanes.split_at_mut(n);
        let mut len = 1;
        while len < n {
            let stride = n / (2 * len);
            let mut base = 0;
            while base < n {
                for k in 0..len {
                    let w_re = self.twiddle_re[k * stride];
                    let w_im = self.twiddle_im[k * stride];
                    let even = base + k;
                    let odd = even + len;

                    let t_re = re[odd] * w_re - im[odd] * w_im;
                    let t_im = re[odd] * w_im + im[odd] * w_re;

                    re[odd] = re[even] - t_re;
                    im[odd] = im[even] - t_im;
                    re[even] += t_re;
                    im[even] += t_im;
                }
                base += 2 * len;
            }
            len *= 2;
        }
    }

    /// Recovers the one-sided spectrum of the real frame from the
    /// half-length complex result `Z`.
    ///
    /// For bin `i`, `Z[i mod n]` is combined with `conj(Z[(n - i) mod n])`
    /// and rotated by `exp(-2πi·i / frame_length)`.
    pub(crate) fn reconstruct(&self, lanes: &[f32], out_re: &mut [f32], out_im: &mut [f32]) {
        let n = self.inner_dim;
        let (re, im) = lanes.split_at(n);
        for i in 0..=n {
            let z = i % n;
            let conj = (n - i) % n;

            let zk_re = re[z];
            let zk_im = im[z];
            let zc_re = re[conj];
            let zc_im = -im[conj];

            let diff_re = zk_re - zc_re;
            let diff_im = zk_im - zc_im;
            let c = self.recon_cos[i];
            let s = self.recon_sin[i];

            out_re[i] = (zk_re + zc_re + c * diff_im + s * diff_re) * 0.5;
            out_im[i] = (zk_im + zc_im + s * diff_im - c * diff_re) * 0.5;
        }
    }
}
