//! Per-call phase timing.

use std::time::Instant;

/// Time spent in the phases of one operator call, in seconds.
///
/// Filled when the caller passes `Some(&mut profile)` to an operator.
/// Callers passing `None` incur no timing overhead at all — the clock is
/// never read on that path.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Profile {
    /// Time spent inside the call, including validation and allocation.
    pub total: f64,
    /// Transformation of the input (or input gradient) tensor.
    pub input_transform: f64,
    /// Transformation of the kernel (or kernel gradient) tensor.
    pub kernel_transform: f64,
    /// Transformation of the output (or output gradient) tensor.
    pub output_transform: f64,
    /// Multiplication-accumulation of transformed coefficients.
    pub block_multiplication: f64,
}

/// Pipeline phase a measured section is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    InputTransform,
    KernelTransform,
    OutputTransform,
    BlockMultiplication,
}

/// Accumulating stopwatch over an optional [`Profile`].
///
/// Phase times accumulate (`+=`) because pipeline stages repeat once per
/// reduction block; `total` is measured from construction to
/// [`PhaseClock::stop`].
pub(crate) struct PhaseClock<'a> {
    inner: Option<(&'a mut Profile, Instant)>,
}

impl<'a> PhaseClock<'a> {
    /// Start the total clock. Resets the profile record if one is given.
    pub(crate) fn start(profile: Option<&'a mut Profile>) -> Self {
        Self {
            inner: profile.map(|p| {
                *p = Profile::default();
                (p, Instant::now())
            }),
        }
    }

    /// Run `f`, attributing its elapsed time to `phase`.
    pub(crate) fn run<R>(&mut self, phase: Phase, f: impl FnOnce() -> R) -> R {
        match &mut self.inner {
            None => f(),
            Some((profile, _)) => {
                let started = Instant::now();
                let result = f();
                let elapsed = started.elapsed().as_secs_f64();
                match phase {
                    Phase::InputTransform => profile.input_transform += elapsed,
                    Phase::KernelTransform => profile.kernel_transform += elapsed,
                    Phase::OutputTransform => profile.output_transform += elapsed,
                    Phase::BlockMultiplication => profile.block_multiplication += elapsed,
                }
                result
            }
        }
    }

    /// Stop the total clock, recording the full call duration.
    pub(crate) fn stop(self) {
        if let Some((profile, started)) = self.inner {
            profile.total = started.elapsed().as_secs_f64();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untimed_path_runs_closure() {
        let mut clock = PhaseClock::start(None);
        let value = clock.run(Phase::BlockMultiplication, || 42);
        assert_eq!(value, 42);
        clock.stop();
    }

    #[test]
    fn test_phases_accumulate_under_total() {
        let mut profile = Profile::default();
        let mut clock = PhaseClock::start(Some(&mut profile));
        for _ in 0..3 {
            clock.run(Phase::InputTransform, || std::hint::black_box(0u64));
            clock.run(Phase::BlockMultiplication, || std::hint::black_box(0u64));
        }
        clock.stop();

        assert!(profile.total >= 0.0);
        assert!(
            profile.total
                >= profile.input_transform
                    + profile.kernel_transform
                    + profile.output_transform
                    + profile.block_multiplication
        );
    }

    #[test]
    fn test_start_resets_record() {
        let mut profile = Profile {
            total: 1.0,
            input_transform: 1.0,
            kernel_transform: 1.0,
            output_transform: 1.0,
            block_multiplication: 1.0,
        };
        let clock = PhaseClock::start(Some(&mut profile));
        clock.stop();
        assert_eq!(profile.input_transform, 0.0);
        assert_eq!(profile.block_multiplication, 0.0);
    }
}
