//! Structural argument validation.
//!
//! The pass/fail gate in front of every engine run: detects invalid (but
//! not unsupported) parameters from the caller-supplied shape fields
//! alone, before any allocation or computation.

use crate::error::{Error, Result};
use crate::geometry::{Padding, Size};

pub(crate) fn validate_fully_connected(
    batch_size: usize,
    input_channels: usize,
    output_channels: usize,
) -> Result<()> {
    if batch_size == 0 {
        return Err(Error::InvalidBatchSize);
    }
    if input_channels == 0 {
        return Err(Error::InvalidInputChannels);
    }
    if output_channels == 0 {
        return Err(Error::InvalidOutputChannels);
    }
    Ok(())
}

pub(crate) fn validate_fully_connected_inference(
    input_channels: usize,
    output_channels: usize,
) -> Result<()> {
    if input_channels == 0 {
        return Err(Error::InvalidInputChannels);
    }
    if output_channels == 0 {
        return Err(Error::InvalidOutputChannels);
    }
    Ok(())
}

pub(crate) fn validate_convolution(
    batch_size: usize,
    input_channels: usize,
    output_channels: usize,
    input_size: Size,
    input_padding: Padding,
    kernel_size: Size,
) -> Result<()> {
    if batch_size == 0 {
        return Err(Error::InvalidBatchSize);
    }
    if input_channels == 0 {
        return Err(Error::InvalidInputChannels);
    }
    if output_channels == 0 {
        return Err(Error::InvalidOutputChannels);
    }
    if input_size.width == 0 || input_size.height == 0 {
        return Err(Error::InvalidInputSize);
    }
    if kernel_size.width == 0 || kernel_size.height == 0 {
        return Err(Error::InvalidKernelSize);
    }
    if input_padding.left >= kernel_size.width
        || input_padding.right >= kernel_size.width
        || input_padding.top >= kernel_size.height
        || input_padding.bottom >= kernel_size.height
    {
        return Err(Error::InvalidInputPadding);
    }
    let padded = input_padding.apply(input_size);
    if kernel_size.width > padded.width || kernel_size.height > padded.height {
        return Err(Error::UnsupportedKernelSize);
    }
    Ok(())
}

pub(crate) fn validate_pooling(
    batch_size: usize,
    channels: usize,
    input_size: Size,
    input_padding: Padding,
    pooling_size: Size,
    pooling_stride: Size,
) -> Result<()> {
    if batch_size == 0 {
        return Err(Error::InvalidBatchSize);
    }
    if channels == 0 {
        return Err(Error::InvalidChannels);
    }
    if input_size.width == 0 || input_size.height == 0 {
        return Err(Error::InvalidInputSize);
    }
    if pooling_size.width == 0 || pooling_size.height == 0 {
        return Err(Error::InvalidPoolingSize);
    }
    if pooling_stride.width == 0
        || pooling_stride.height == 0
        || pooling_stride.width > pooling_size.width
        || pooling_stride.height > pooling_size.height
    {
        return Err(Error::InvalidPoolingStride);
    }
    if input_padding.left >= pooling_size.width
        || input_padding.right >= pooling_size.width
        || input_padding.top >= pooling_size.height
        || input_padding.bottom >= pooling_size.height
    {
        return Err(Error::InvalidInputPadding);
    }
    Ok(())
}

pub(crate) fn validate_channelwise(batch_size: usize, channels: usize) -> Result<()> {
    if batch_size == 0 {
        return Err(Error::InvalidBatchSize);
    }
    if channels == 0 {
        return Err(Error::InvalidChannels);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fully_connected_zero_fields() {
        assert_eq!(
            validate_fully_connected(0, 5, 2),
            Err(Error::InvalidBatchSize)
        );
        assert_eq!(
            validate_fully_connected(3, 0, 2),
            Err(Error::InvalidInputChannels)
        );
        assert_eq!(
            validate_fully_connected(3, 5, 0),
            Err(Error::InvalidOutputChannels)
        );
        assert!(validate_fully_connected(3, 5, 2).is_ok());
    }

    #[test]
    fn test_convolution_padding_bounds() {
        let input = Size::new(8, 8);
        let kernel = Size::new(3, 3);
        assert!(validate_convolution(1, 1, 1, input, Padding::uniform(2), kernel).is_ok());
        assert_eq!(
            validate_convolution(1, 1, 1, input, Padding::uniform(3), kernel),
            Err(Error::InvalidInputPadding)
        );
    }

    #[test]
    fn test_convolution_oversized_kernel() {
        assert_eq!(
            validate_convolution(
                1,
                1,
                1,
                Size::new(2, 2),
                Padding::default(),
                Size::new(3, 3)
            ),
            Err(Error::UnsupportedKernelSize)
        );
    }

    #[test]
    fn test_pooling_stride_bounds() {
        let input = Size::new(4, 4);
        assert_eq!(
            validate_pooling(
                1,
                1,
                input,
                Padding::default(),
                Size::new(2, 2),
                Size::new(0, 2)
            ),
            Err(Error::InvalidPoolingStride)
        );
        assert_eq!(
            validate_pooling(
                1,
                1,
                input,
                Padding::default(),
                Size::new(2, 2),
                Size::new(3, 2)
            ),
            Err(Error::InvalidPoolingStride)
        );
    }
}
