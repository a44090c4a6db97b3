//! Pointwise (1x1) convolution as a single GEMM per batch.

use gconv_core::{ConvParams, ConvResource, DType, GconvError, PackedView, PackedViewMut, Result, TensorDesc};

use super::{ConvAcc, FloatBinding};
use crate::gemm::sgemm;

/// Pointwise kernel: `out[oc, p] = sum_ic w[oc, ic] * x[ic, p]`.
#[derive(Debug, Clone, Default)]
pub struct Conv1x1 {
    binding: Option<FloatBinding>,
}

impl Conv1x1 {
    /// Unit kernel, unit stride, no padding, f32 tensors.
    pub fn is_preferred(params: &ConvParams, input: &TensorDesc, output: &TensorDesc) -> bool {
        input.dtype() == DType::F32
            && output.dtype() == DType::F32
            && params.kernel == [1, 1]
            && params.stride == [1, 1]
            && params.pad == [0, 0]
    }
}

impl ConvAcc for Conv1x1 {
    fn init(
        &mut self,
        params: &ConvParams,
        resource: &ConvResource,
        input: &TensorDesc,
        output: &TensorDesc,
    ) -> Result<()> {
        if params.kernel != [1, 1] {
            return Err(GconvError::Unsupported(format!(
                "conv1x1 cannot run kernel {:?}",
                params.kernel
            )));
        }
        self.binding = Some(FloatBinding::bind(params, resource, input, output)?);
        Ok(())
    }

    fn forward(&self, input: PackedView<'_>, output: PackedViewMut<'_>) -> Result<()> {
        let binding = self.binding.as_ref().ok_or(GconvError::NoImplementation)?;
        binding.run(input, output, |geom, x, w, out, _| {
            sgemm(w, x, out, geom.out_c, geom.out_plane(), geom.in_c);
        })
    }
}
