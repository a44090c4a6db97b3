//! Per-group shapes and parameters derived from the aggregate layer.

use gconv_core::{ConvParams, GconvError, Result, TensorDesc};

/// Flatten aggregate parameters into the parameters of one group.
///
/// Every group runs an ordinary convolution with `output_channel / group`
/// outputs and `group == 1`.
pub fn group_params(params: &ConvParams) -> Result<ConvParams> {
    params.validate()?;
    let group = params.group;
    let output_channel = channels_per_group("output_channel", params.output_channel, group)?;
    let mut flat = params.clone();
    flat.output_channel = output_channel;
    flat.group = 1;
    Ok(flat)
}

/// Descriptor of one group's slice of `desc`: same batch, height, width and
/// lane width, `channels / group` channels.
pub fn split_desc(desc: &TensorDesc, group: usize, what: &'static str) -> Result<TensorDesc> {
    let channels = channels_per_group(what, desc.channels(), group)?;
    desc.with_channels(channels)
}

/// `channels / group`, rejecting uneven splits.
pub fn channels_per_group(what: &'static str, channels: usize, group: usize) -> Result<usize> {
    if group == 0 {
        return Err(GconvError::InvalidParam("group must be >= 1".into()));
    }
    if channels % group != 0 {
        return Err(GconvError::IndivisibleGroup { what, channels, group });
    }
    Ok(channels / group)
}

/// Group descriptors for one input/output pair.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupGeometry {
    pub group: usize,
    pub input: TensorDesc,
    pub output: TensorDesc,
}

impl GroupGeometry {
    pub fn plan(group: usize, input: &TensorDesc, output: &TensorDesc) -> Result<Self> {
        Ok(Self {
            group,
            input: split_desc(input, group, "input channels")?,
            output: split_desc(output, group, "output channels")?,
        })
    }

    /// Bytes of one group's packed input slot.
    pub fn input_slot_bytes(&self) -> usize {
        self.input.packed_bytes()
    }

    /// Bytes of one group's packed output slot.
    pub fn output_slot_bytes(&self) -> usize {
        self.output.packed_bytes()
    }

    /// Scratch needed for all input and output slots.
    pub fn scratch_bytes(&self) -> usize {
        self.group * (self.input_slot_bytes() + self.output_slot_bytes())
    }
}
