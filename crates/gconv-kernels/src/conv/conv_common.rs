//! General convolution: im2col followed by GEMM.

use gconv_core::{ConvParams, ConvResource, DType, GconvError, PackedView, PackedViewMut, Result, TensorDesc};

use super::{ConvAcc, ConvGeometry, FloatBinding};
use crate::gemm::sgemm;

/// Fallback float kernel for any kernel size, stride, dilation and padding.
#[derive(Debug, Clone, Default)]
pub struct ConvCommon {
    binding: Option<FloatBinding>,
}

impl ConvCommon {
    /// Any f32 convolution.
    pub fn is_preferred(_params: &ConvParams, input: &TensorDesc, output: &TensorDesc) -> bool {
        input.dtype() == DType::F32 && output.dtype() == DType::F32
    }
}

impl ConvAcc for ConvCommon {
    fn init(
        &mut self,
        params: &ConvParams,
        resource: &ConvResource,
        input: &TensorDesc,
        output: &TensorDesc,
    ) -> Result<()> {
        self.binding = Some(FloatBinding::bind(params, resource, input, output)?);
        Ok(())
    }

    fn forward(&self, input: PackedView<'_>, output: PackedViewMut<'_>) -> Result<()> {
        let binding = self.binding.as_ref().ok_or(GconvError::NoImplementation)?;
        let params = binding.params();
        binding.run(input, output, |geom, x, w, out, cols| {
            im2col_into(geom, params, x, cols);
            let k = geom.in_c * params.kernel[0] * params.kernel[1];
            sgemm(w, cols, out, geom.out_c, geom.out_plane(), k);
        })
    }
}

/// Expand `[in_c][in_h][in_w]` into `[in_c * kh * kw][out_plane]` columns,
/// overwriting `cols`.
pub(crate) fn im2col_into(geom: &ConvGeometry, params: &ConvParams, x: &[f32], cols: &mut Vec<f32>) {
    let [kh, kw] = params.kernel;
    let out_plane = geom.out_plane();
    cols.clear();
    cols.resize(geom.in_c * kh * kw * out_plane, 0.0);
    let (h, w) = (geom.in_h as isize, geom.in_w as isize);

    for ic in 0..geom.in_c {
        let src = &x[ic * geom.in_plane()..(ic + 1) * geom.in_plane()];
        for ky in 0..kh {
            for kx in 0..kw {
                let row = (ic * kh + ky) * kw + kx;
                let dst = &mut cols[row * out_plane..(row + 1) * out_plane];
                for oy in 0..geom.out_h {
                    let iy = (oy * params.stride[0] + ky * params.dilation[0]) as isize - params.pad[0] as isize;
                    if iy < 0 || iy >= h {
                        continue;
                    }
                    for ox in 0..geom.out_w {
                        let ix = (ox * params.stride[1] + kx * params.dilation[1]) as isize - params.pad[1] as isize;
                        if ix < 0 || ix >= w {
                            continue;
                        }
                        dst[oy * geom.out_w + ox] = src[iy as usize * geom.in_w + ix as usize];
                    }
                }
            }
        }
    }
}
