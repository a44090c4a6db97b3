//! Convolution layer parameters.

use serde::{Deserialize, Serialize};

use crate::{GconvError, Result};

/// Fused post-activation applied to every output element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    None,
    Relu,
    Relu6,
}

impl Activation {
    #[inline]
    pub fn apply(&self, v: f32) -> f32 {
        match self {
            Activation::None => v,
            Activation::Relu => v.max(0.0),
            Activation::Relu6 => v.clamp(0.0, 6.0),
        }
    }
}

/// Parameters of a (possibly grouped) 2D convolution.
///
/// Spatial pairs are `[h, w]`. Padding is symmetric. The input channel
/// count is taken from the input tensor, not from the parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvParams {
    pub output_channel: usize,
    pub kernel: [usize; 2],
    pub stride: [usize; 2],
    pub dilation: [usize; 2],
    pub pad: [usize; 2],
    pub group: usize,
    pub bias: bool,
    pub activation: Activation,
}

impl Default for ConvParams {
    fn default() -> Self {
        Self {
            output_channel: 0,
            kernel: [1, 1],
            stride: [1, 1],
            dilation: [1, 1],
            pad: [0, 0],
            group: 1,
            bias: false,
            activation: Activation::None,
        }
    }
}

impl ConvParams {
    /// Square-kernel convolution with unit stride/dilation and no padding.
    pub fn new(output_channel: usize, kernel: usize) -> Self {
        Self {
            output_channel,
            kernel: [kernel, kernel],
            ..Self::default()
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = [stride, stride];
        self
    }

    pub fn with_dilation(mut self, dilation: usize) -> Self {
        self.dilation = [dilation, dilation];
        self
    }

    pub fn with_pad(mut self, pad: usize) -> Self {
        self.pad = [pad, pad];
        self
    }

    pub fn with_group(mut self, group: usize) -> Self {
        self.group = group;
        self
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Parse parameters from a JSON object; missing fields take defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let params: ConvParams = serde_json::from_str(text)
            .map_err(|e| GconvError::InvalidParam(format!("conv params: {e}")))?;
        params.validate()?;
        Ok(params)
    }

    /// Reject parameters no kernel can run.
    pub fn validate(&self) -> Result<()> {
        if self.group == 0 {
            return Err(GconvError::InvalidParam("group must be >= 1".into()));
        }
        if self.output_channel == 0 {
            return Err(GconvError::InvalidParam("output_channel must be >= 1".into()));
        }
        for (name, pair) in [
            ("kernel", self.kernel),
            ("stride", self.stride),
            ("dilation", self.dilation),
        ] {
            if pair.contains(&0) {
                return Err(GconvError::InvalidParam(format!(
                    "{name} must be >= 1, got {pair:?}"
                )));
            }
        }
        Ok(())
    }

    /// Output spatial size for an `in_h x in_w` input.
    pub fn output_hw(&self, in_h: usize, in_w: usize) -> Result<(usize, usize)> {
        let out_h = output_extent(in_h, self.kernel[0], self.stride[0], self.dilation[0], self.pad[0]);
        let out_w = output_extent(in_w, self.kernel[1], self.stride[1], self.dilation[1], self.pad[1]);
        match (out_h, out_w) {
            (Some(h), Some(w)) => Ok((h, w)),
            _ => Err(GconvError::InvalidParam(format!(
                "kernel {:?} (dilation {:?}) larger than padded input {}x{}",
                self.kernel, self.dilation, in_h, in_w
            ))),
        }
    }
}

fn output_extent(input: usize, kernel: usize, stride: usize, dilation: usize, pad: usize) -> Option<usize> {
    if kernel == 0 || stride == 0 || dilation == 0 {
        return None;
    }
    let span = dilation * (kernel - 1) + 1;
    let padded = input + 2 * pad;
    if padded < span {
        return None;
    }
    Some((padded - span) / stride + 1)
}
