use rayon::prelude::*;
use rayon::ThreadPool;

use super::plan::RealFftPlan;
use super::{FrameBatch, SpectralKernel, Spectrum};
use crate::error::KernelError;

/// Data-parallel kernel: every frame of a batch is an independent work item
/// on a dedicated rayon pool.
///
/// Each dispatch blocks until the whole batch is done, so callers see the
/// same stage-by-stage ordering as with [`super::CpuKernel`].
pub struct ParallelKernel {
    plan: RealFftPlan,
    pool: ThreadPool,
}

impl ParallelKernel {
    /// Plans a kernel for `frame_length` on a pool of `threads` workers
    /// (available parallelism when `None`).
    pub fn new(frame_length: usize, threads: Option<usize>) -> Result<Self, KernelError> {
        let plan = RealFftPlan::new(frame_length)?;
        let threads = threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|v| v.get())
                .unwrap_or(2)
        });
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|idx| format!("birdnet-fft-{idx}"))
            .build()
            .map_err(|e| KernelError::ThreadPool(e.to_string()))?;
        tracing::debug!(frame_length, threads, "parallel spectral kernel ready");
        Ok(Self { plan, pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl SpectralKernel for ParallelKernel {
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
        let lanes = self.plan.lanes();
        let plan = &self.plan;
        let mut spectrum = Spectrum::zeros(batch.len(), bins);
        let (re, im) = spectrum.rows_mut();
        self.pool.install(|| {
            re.par_chunks_exact_mut(bins)
                .zip(im.par_chunks_exact_mut(bins))
                .enumerate()
                .for_each_init(
                    || vec![0.0f32; lanes],
                    |scratch, (b, (re, im))| plan.process(batch.frame(b), scratch, re, im),
                );
        });
        Ok(spectrum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_size_is_honoured() {
        let kernel = ParallelKernel::new(256, Some(3)).unwrap();
        assert_eq!(kernel.threads(), 3);
        assert_eq!(kernel.bins(), 129);
    }

    #[test]
    fn rejects_bad_frame_length() {
        assert_eq!(
            ParallelKernel::new(300, Some(1)).err(),
            Some(KernelError::FrameLength(300))
        );
    }
}
