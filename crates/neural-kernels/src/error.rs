//! Status codes for kernel calls.

use thiserror::Error;

/// Status returned by every operator entry point.
///
/// Three distinct categories share this channel:
///
/// - `Invalid*` — programmer error, detectable from the shape arguments
///   alone, always reported before any allocation or computation.
/// - `Unsupported*` — a structurally valid request this build cannot
///   execute (e.g. an algorithm whose transform family is not compiled in).
/// - `Uninitialized` / `UnsupportedHardware` / `OutOfMemory` — environment
///   failures.
///
/// No failure is retried internally; retry (e.g. with a different
/// algorithm) is the caller's decision.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The call was made with `batch_size == 0`.
    #[error("batch size must be non-zero")]
    InvalidBatchSize,

    /// The call was made with `channels == 0`.
    #[error("channel count must be non-zero")]
    InvalidChannels,

    /// The call was made with `input_channels == 0`.
    #[error("input channel count must be non-zero")]
    InvalidInputChannels,

    /// The call was made with `output_channels == 0`.
    #[error("output channel count must be non-zero")]
    InvalidOutputChannels,

    /// The call was made with a zero input width or height.
    #[error("input size must be non-zero in both dimensions")]
    InvalidInputSize,

    /// A padding side is not smaller than the respective kernel
    /// (or pooling) dimension.
    #[error("input padding must be smaller than the kernel or pooling size")]
    InvalidInputPadding,

    /// The call was made with a zero kernel width or height.
    #[error("kernel size must be non-zero in both dimensions")]
    InvalidKernelSize,

    /// The call was made with a zero pooling width or height.
    #[error("pooling size must be non-zero in both dimensions")]
    InvalidPoolingSize,

    /// The pooling stride is zero or exceeds the pooling size.
    #[error("pooling stride must be non-zero and no larger than the pooling size")]
    InvalidPoolingStride,

    /// The kernel does not fit in the padded input.
    #[error("kernel size is not supported for this input size")]
    UnsupportedKernelSize,

    /// A structurally valid pooling size this build does not implement.
    #[error("pooling size is not supported")]
    UnsupportedPoolingSize,

    /// A structurally valid pooling stride this build does not implement.
    #[error("pooling stride is not supported")]
    UnsupportedPoolingStride,

    /// A structurally valid algorithm choice this build does not implement.
    #[error("algorithm is not supported by this build")]
    UnsupportedAlgorithm,

    /// The library was used before [`initialize`](crate::initialize).
    #[error("library is not initialized")]
    Uninitialized,

    /// No microkernel family covers the requested shape on this CPU.
    #[error("operation is not supported on this hardware")]
    UnsupportedHardware,

    /// Scratch memory allocation failed.
    #[error("failed to allocate scratch memory")]
    OutOfMemory,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::InvalidBatchSize.to_string(),
            "batch size must be non-zero"
        );
        assert_eq!(
            Error::Uninitialized.to_string(),
            "library is not initialized"
        );
    }

    #[test]
    fn test_is_std_error() {
        fn takes_error<E: std::error::Error>(_e: E) {}
        takes_error(Error::OutOfMemory);
    }

    #[test]
    fn test_eq() {
        assert_eq!(Error::InvalidChannels, Error::InvalidChannels);
        assert_ne!(Error::InvalidChannels, Error::InvalidInputChannels);
    }
}
