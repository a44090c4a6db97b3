//! Zero-copy partitioning of trained resources across groups.

use gconv_core::{ConvParams, ConvResource, GconvError, RawBuffer, Result};

/// Split `buf` into `group` equal, contiguous views.
///
/// View `g` covers bytes `[g * size, (g + 1) * size)` with
/// `size = buf.bytes_size() / group`. Only float buffers can be split.
pub fn split_buffer(buf: &RawBuffer, group: usize, what: &'static str) -> Result<Vec<RawBuffer>> {
    if buf.dtype().is_quantized() {
        return Err(GconvError::Unsupported(format!("split int8 {what} resource not supported")));
    }
    if !buf.dtype().is_float() {
        return Err(GconvError::Unsupported(format!(
            "split {} {what} resource not supported",
            buf.dtype()
        )));
    }
    if group == 0 || buf.numel() % group != 0 {
        return Err(GconvError::IndivisibleGroup {
            what,
            channels: buf.numel(),
            group,
        });
    }
    let size = buf.bytes_size() / group;
    (0..group).map(|g| buf.view(g * size, size)).collect()
}

/// Per-group filter/bias resources for `params.group` groups.
///
/// The bias is split only when the layer has one; a missing bias for a
/// biased layer is an error.
pub fn split_resource(resource: &ConvResource, params: &ConvParams) -> Result<Vec<ConvResource>> {
    let group = params.group;
    let filters = split_buffer(&resource.filter, group, "filter")?;
    let mut biases: Vec<Option<RawBuffer>> = if params.bias {
        let bias = resource.bias.as_ref().ok_or(GconvError::MissingResource("bias"))?;
        split_buffer(bias, group, "bias")?.into_iter().map(Some).collect()
    } else {
        vec![None; group]
    };
    let mut scales: Vec<Option<RawBuffer>> = match &resource.scale {
        Some(scale) => split_buffer(scale, group, "scale")?.into_iter().map(Some).collect(),
        None => vec![None; group],
    };

    Ok(filters
        .into_iter()
        .enumerate()
        .map(|(g, filter)| ConvResource {
            filter,
            bias: biases[g].take(),
            scale: scales[g].take(),
        })
        .collect())
}
