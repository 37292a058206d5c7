use super::plan::RealFftPlan;
use super::{FrameBatch, SpectralKernel, Spectrum};
use crate::error::KernelError;

/// Portable kernel: frames are transformed one after another on the calling
/// thread, reusing a single scratch buffer.
#[derive(Debug, Clone)]
pub struct CpuKernel {
    plan: RealFftPlan,
}

impl CpuKernel {
    /// Plans a kernel for `frame_length`, which must be a power of two.
    pub fn new(frame_length: usize) -> Result<Self, KernelError> {
        Ok(Self {
            plan: RealFftPlan::new(frame_length)?,
        })
    }
}

impl SpectralKernel for CpuKernel {
    fn frame_length(&self) -> usize {
        self.plan.frame_length()
    }

    fn transform(&self, batch: &FrameBatch<'_>) -> Result<Spectrum, KernelError> {
        if batch.frame_length() != self.plan.frame_length() {
            return Err(KernelError::DimensionMismatch {
                expected: self.plan.frame_length(),
                got: batch.frame_length(),
            });
        }

        let bins = self.plan.bins();
        let mut spectrum = Spectrum::zeros(batch.len(), bins);
        let mut lanes = vec![0.0f32; self.plan.lanes()];
        let (re, im) = spectrum.rows_mut();
        for (b, (re, im)) in re.chunks_exact_mut(bins).zip(im.chunks_exact_mut(bins)).enumerate() {
            self.plan.process(batch.frame(b), &mut lanes, re, im);
        }
        Ok(spectrum)
    }
}
