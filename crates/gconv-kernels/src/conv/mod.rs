//! Convolution sub-kernels.
//!
//! Every kernel runs an ordinary (`group == 1`) convolution between one
//! lane-packed input and one lane-packed output. Kernels are a closed set,
//! dispatched through [`ConvImpl`].

pub mod conv_1x1;
pub mod conv_3x3;
pub mod conv_common;
pub mod conv_int8_common;

use std::fmt;

use gconv_core::{
    ConvParams, ConvResource, DType, GconvError, PackedView, PackedViewMut, RawBuffer, Result,
    TensorDesc,
};

use tracing::trace;

use crate::lane;

pub use conv_1x1::Conv1x1;
pub use conv_3x3::Conv3x3;
pub use conv_common::ConvCommon;
pub use conv_int8_common::ConvInt8Common;

/// Tag of a sub-kernel variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImplKind {
    Conv3x3,
    Conv1x1,
    Common,
    Int8Common,
}

impl ImplKind {
    pub fn name(&self) -> &'static str {
        match self {
            ImplKind::Conv3x3 => "conv3x3",
            ImplKind::Conv1x1 => "conv1x1",
            ImplKind::Common => "conv_common",
            ImplKind::Int8Common => "conv_int8_common",
        }
    }
}

impl fmt::Display for ImplKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Capability shared by every sub-kernel.
pub trait ConvAcc {
    /// Bind parameters, trained resources and tensor shapes.
    fn init(
        &mut self,
        params: &ConvParams,
        resource: &ConvResource,
        input: &TensorDesc,
        output: &TensorDesc,
    ) -> Result<()>;

    /// Convolve one packed input into one packed output.
    ///
    /// Spatial size and batch may differ from the shapes seen at `init`;
    /// channel counts may not.
    fn forward(&self, input: PackedView<'_>, output: PackedViewMut<'_>) -> Result<()>;
}

/// Closed set of sub-kernel implementations.
#[derive(Debug, Clone)]
pub enum ConvImpl {
    Conv3x3(Conv3x3),
    Conv1x1(Conv1x1),
    Common(ConvCommon),
    Int8Common(ConvInt8Common),
}

impl ConvImpl {
    /// Fresh, unbound instance of `kind`.
    pub fn new(kind: ImplKind) -> Self {
        match kind {
            ImplKind::Conv3x3 => ConvImpl::Conv3x3(Conv3x3::default()),
            ImplKind::Conv1x1 => ConvImpl::Conv1x1(Conv1x1::default()),
            ImplKind::Common => ConvImpl::Common(ConvCommon::default()),
            ImplKind::Int8Common => ConvImpl::Int8Common(ConvInt8Common::default()),
        }
    }

    pub fn kind(&self) -> ImplKind {
        match self {
            ConvImpl::Conv3x3(_) => ImplKind::Conv3x3,
            ConvImpl::Conv1x1(_) => ImplKind::Conv1x1,
            ConvImpl::Common(_) => ImplKind::Common,
            ConvImpl::Int8Common(_) => ImplKind::Int8Common,
        }
    }
}

impl ConvAcc for ConvImpl {
    fn init(
        &mut self,
        params: &ConvParams,
        resource: &ConvResource,
        input: &TensorDesc,
        output: &TensorDesc,
    ) -> Result<()> {
        trace!(
            kernel = self.kind().name(),
            in_c = input.channels(),
            out_c = params.output_channel,
            "binding sub-kernel"
        );
        match self {
            ConvImpl::Conv3x3(k) => k.init(params, resource, input, output),
            ConvImpl::Conv1x1(k) => k.init(params, resource, input, output),
            ConvImpl::Common(k) => k.init(params, resource, input, output),
            ConvImpl::Int8Common(k) => k.init(params, resource, input, output),
        }
    }

    fn forward(&self, input: PackedView<'_>, output: PackedViewMut<'_>) -> Result<()> {
        match self {
            ConvImpl::Conv3x3(k) => k.forward(input, output),
            ConvImpl::Conv1x1(k) => k.forward(input, output),
            ConvImpl::Common(k) => k.forward(input, output),
            ConvImpl::Int8Common(k) => k.forward(input, output),
        }
    }
}

/// Resolved sizes of one ungrouped convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub batch: usize,
    pub in_c: usize,
    pub in_h: usize,
    pub in_w: usize,
    pub out_c: usize,
    pub out_h: usize,
    pub out_w: usize,
}

impl ConvGeometry {
    /// Check `input`/`output` against `params` and resolve the sizes.
    pub fn resolve(params: &ConvParams, input: &TensorDesc, output: &TensorDesc) -> Result<Self> {
        params.validate()?;
        if params.group != 1 {
            return Err(GconvError::Unsupported(format!(
                "sub-kernels run ungrouped convolutions, got group {}",
                params.group
            )));
        }
        if input.lane() != output.lane() {
            return Err(GconvError::InvalidParam(format!(
                "input lane {} differs from output lane {}",
                input.lane(),
                output.lane()
            )));
        }
        let (out_h, out_w) = params.output_hw(input.height(), input.width())?;
        let expected = [input.batch(), params.output_channel, out_h, out_w];
        if output.dims() != &expected[..] {
            return Err(GconvError::ShapeMismatch {
                expected: expected.to_vec(),
                got: output.dims().to_vec(),
            });
        }
        Ok(Self {
            batch: input.batch(),
            in_c: input.channels(),
            in_h: input.height(),
            in_w: input.width(),
            out_c: params.output_channel,
            out_h,
            out_w,
        })
    }

    pub fn in_plane(&self) -> usize {
        self.in_h * self.in_w
    }

    pub fn out_plane(&self) -> usize {
        self.out_h * self.out_w
    }
}

/// Parameters and weights bound to a float kernel by `init`.
#[derive(Debug, Clone)]
pub(crate) struct FloatBinding {
    params: ConvParams,
    in_c: usize,
    filter: RawBuffer,
    bias: Option<RawBuffer>,
}

impl FloatBinding {
    pub(crate) fn bind(
        params: &ConvParams,
        resource: &ConvResource,
        input: &TensorDesc,
        output: &TensorDesc,
    ) -> Result<Self> {
        for desc in [input, output] {
            if desc.dtype() != DType::F32 {
                return Err(GconvError::UnsupportedDType(desc.dtype()));
            }
        }
        let geom = ConvGeometry::resolve(params, input, output)?;
        let filter = check_weights(&resource.filter, DType::F32, filter_len(params, geom.in_c), "filter")?;
        let bias = if params.bias {
            let bias = resource.bias.as_ref().ok_or(GconvError::MissingResource("bias"))?;
            Some(check_weights(bias, DType::F32, params.output_channel, "bias")?)
        } else {
            None
        };
        Ok(Self {
            params: params.clone(),
            in_c: geom.in_c,
            filter,
            bias,
        })
    }

    pub(crate) fn params(&self) -> &ConvParams {
        &self.params
    }

    /// Run `body` on every batch in flat channel-major layout.
    ///
    /// `body` accumulates `[out_c][out_plane]` into a zeroed buffer; bias and
    /// the fused activation are applied afterwards. The scratch vector is
    /// shared by every batch of one forward.
    pub(crate) fn run<F>(&self, input: PackedView<'_>, mut output: PackedViewMut<'_>, body: F) -> Result<()>
    where
        F: Fn(&ConvGeometry, &[f32], &[f32], &mut [f32], &mut Vec<f32>),
    {
        let geom = ConvGeometry::resolve(&self.params, input.desc(), output.desc())?;
        if geom.in_c != self.in_c {
            return Err(GconvError::ShapeMismatch {
                expected: vec![geom.batch, self.in_c, geom.in_h, geom.in_w],
                got: input.desc().dims().to_vec(),
            });
        }
        let filter = self
            .filter
            .as_f32_slice()
            .ok_or_else(|| GconvError::StorageError("filter is not f32-aligned".into()))?;
        let bias = match &self.bias {
            Some(b) => Some(
                b.as_f32_slice()
                    .ok_or_else(|| GconvError::StorageError("bias is not f32-aligned".into()))?,
            ),
            None => None,
        };

        let lane_w = input.desc().lane();
        let in_pb = input.desc().packed_count_per_batch();
        let out_pb = output.desc().packed_count_per_batch();
        let src = input.as_f32()?;
        let dst = output.as_f32_mut()?;

        let mut flat_in = vec![0.0f32; geom.in_c * geom.in_plane()];
        let mut flat_out = vec![0.0f32; geom.out_c * geom.out_plane()];
        let mut scratch = Vec::new();
        for b in 0..geom.batch {
            lane::unpack_f32(&mut flat_in, &src[b * in_pb..(b + 1) * in_pb], geom.in_plane(), geom.in_c, lane_w);
            flat_out.fill(0.0);
            body(&geom, &flat_in, filter, &mut flat_out, &mut scratch);
            finish_rows(&mut flat_out, bias, self.params.activation, geom.out_plane());
            lane::pack_f32(&mut dst[b * out_pb..(b + 1) * out_pb], &flat_out, geom.out_plane(), geom.out_c, lane_w);
        }
        Ok(())
    }
}

/// Fused bias + activation over `[channels][plane]` rows.
fn finish_rows(out: &mut [f32], bias: Option<&[f32]>, activation: gconv_core::Activation, plane: usize) {
    for (oc, row) in out.chunks_mut(plane).enumerate() {
        let b = bias.map_or(0.0, |b| b[oc]);
        for v in row.iter_mut() {
            *v = activation.apply(*v + b);
        }
    }
}

/// Filter element count for `in_c` input channels.
pub(crate) fn filter_len(params: &ConvParams, in_c: usize) -> usize {
    params.output_channel * in_c * params.kernel[0] * params.kernel[1]
}

/// Check dtype and element count of a trained buffer.
pub(crate) fn check_weights(buf: &RawBuffer, dtype: DType, numel: usize, what: &'static str) -> Result<RawBuffer> {
    if buf.dtype() != dtype {
        return Err(GconvError::UnsupportedDType(buf.dtype()));
    }
    if buf.numel() != numel {
        return Err(GconvError::StorageError(format!(
            "{what} holds {} elements, expected {numel}",
            buf.numel()
        )));
    }
    Ok(buf.clone())
}
