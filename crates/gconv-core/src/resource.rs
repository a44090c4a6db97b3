use crate::RawBuffer;

/// Trained resources of a convolution layer.
///
/// Filter layout is `[output_channel, input_channel / group, kernel_h, kernel_w]`,
/// so the filter of group `g` is the `g`-th contiguous `1 / group` of the bytes.
/// `scale` holds per-output-channel requantization scales for `I8` kernels.
#[derive(Debug, Clone)]
pub struct ConvResource {
    pub filter: RawBuffer,
    pub bias: Option<RawBuffer>,
    pub scale: Option<RawBuffer>,
}

impl ConvResource {
    pub fn new(filter: RawBuffer) -> Self {
        Self {
            filter,
            bias: None,
            scale: None,
        }
    }

    pub fn with_bias(mut self, bias: RawBuffer) -> Self {
        self.bias = Some(bias);
        self
    }

    pub fn with_scale(mut self, scale: RawBuffer) -> Self {
        self.scale = Some(scale);
        self
    }
}
