//! Sizes and paddings of images, kernels, and pooling filters.

/// Width and height of an image, kernel, or pooling filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    /// Horizontal extent.
    pub width: usize,
    /// Vertical extent.
    pub height: usize,
}

impl Size {
    /// Create a size from width and height.
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Number of elements in one plane of this size.
    pub const fn area(&self) -> usize {
        self.width * self.height
    }
}

/// Implicit zero-padding around image data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Padding {
    /// Padding above the image data.
    pub top: usize,
    /// Padding on the right of the image data.
    pub right: usize,
    /// Padding below the image data.
    pub bottom: usize,
    /// Padding on the left of the image data.
    pub left: usize,
}

impl Padding {
    /// Create a padding from the four sides.
    pub const fn new(top: usize, right: usize, bottom: usize, left: usize) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    /// Uniform padding on all four sides.
    pub const fn uniform(amount: usize) -> Self {
        Self::new(amount, amount, amount, amount)
    }

    /// Size of an image after implicit padding is applied.
    pub const fn apply(&self, size: Size) -> Size {
        Size {
            width: self.left + size.width + self.right,
            height: self.top + size.height + self.bottom,
        }
    }
}

/// Output size of a stride-1 convolution over a padded input.
pub(crate) fn convolution_output_size(input: Size, padding: Padding, kernel: Size) -> Size {
    let padded = padding.apply(input);
    Size {
        width: padded.width - (kernel.width - 1),
        height: padded.height - (kernel.height - 1),
    }
}

/// Output size of a pooling filter over a padded input (ceil mode: a
/// window that only partially covers the padded input still produces an
/// output element).
pub(crate) fn pooling_output_size(
    input: Size,
    padding: Padding,
    pooling: Size,
    stride: Size,
) -> Size {
    let padded = padding.apply(input);
    Size {
        width: (padded.width - pooling.width).div_ceil(stride.width) + 1,
        height: (padded.height - pooling.height).div_ceil(stride.height) + 1,
    }
}
