//! 3x3 stride-1 convolution with unrolled taps over a padded plane.

use gconv_core::{ConvParams, ConvResource, DType, GconvError, PackedView, PackedViewMut, Result, TensorDesc};

use super::{ConvAcc, ConvGeometry, FloatBinding};

/// Specialized 3x3 kernel, stride 1, dilation 1, any symmetric padding.
#[derive(Debug, Clone, Default)]
pub struct Conv3x3 {
    binding: Option<FloatBinding>,
}

impl Conv3x3 {
    /// 3x3 kernel, unit stride and dilation, f32 tensors.
    pub fn is_preferred(params: &ConvParams, input: &TensorDesc, output: &TensorDesc) -> bool {
        input.dtype() == DType::F32
            && output.dtype() == DType::F32
            && params.kernel == [3, 3]
            && params.stride == [1, 1]
            && params.dilation == [1, 1]
    }
}

impl ConvAcc for Conv3x3 {
    fn init(
        &mut self,
        params: &ConvParams,
        resource: &ConvResource,
        input: &TensorDesc,
        output: &TensorDesc,
    ) -> Result<()> {
        if params.kernel != [3, 3] || params.stride != [1, 1] || params.dilation != [1, 1] {
            return Err(GconvError::Unsupported(format!(
                "conv3x3 cannot run kernel {:?} stride {:?} dilation {:?}",
                params.kernel, params.stride, params.dilation
            )));
        }
        self.binding = Some(FloatBinding::bind(params, resource, input, output)?);
        Ok(())
    }

    fn forward(&self, input: PackedView<'_>, output: PackedViewMut<'_>) -> Result<()> {
        let binding = self.binding.as_ref().ok_or(GconvError::NoImplementation)?;
        let pad = binding.params().pad;
        binding.run(input, output, |geom, x, w, out, padded| {
            conv3x3_plane(geom, pad, x, w, out, padded)
        })
    }
}

fn conv3x3_plane(
    geom: &ConvGeometry,
    pad: [usize; 2],
    x: &[f32],
    w: &[f32],
    out: &mut [f32],
    padded: &mut Vec<f32>,
) {
    let ph = geom.in_h + 2 * pad[0];
    let pw = geom.in_w + 2 * pad[1];

    // Zero-padded copy of every input channel
    padded.clear();
    padded.resize(geom.in_c * ph * pw, 0.0);
    for ic in 0..geom.in_c {
        let src = &x[ic * geom.in_plane()..(ic + 1) * geom.in_plane()];
        let dst = &mut padded[ic * ph * pw..(ic + 1) * ph * pw];
        for y in 0..geom.in_h {
            let row = (y + pad[0]) * pw + pad[1];
            dst[row..row + geom.in_w].copy_from_slice(&src[y * geom.in_w..(y + 1) * geom.in_w]);
        }
    }

    let out_plane = geom.out_plane();
    for (oc, out_row) in out.chunks_mut(out_plane).enumerate().take(geom.out_c) {
        for ic in 0..geom.in_c {
            let k = &w[(oc * geom.in_c + ic) * 9..(oc * geom.in_c + ic + 1) * 9];
            let src = &padded[ic * ph * pw..(ic + 1) * ph * pw];
            for oy in 0..geom.out_h {
                let r0 = &src[oy * pw..];
                let r1 = &src[(oy + 1) * pw..];
                let r2 = &src[(oy + 2) * pw..];
                let dst = &mut out_row[oy * geom.out_w..(oy + 1) * geom.out_w];
                for (ox, v) in dst.iter_mut().enumerate() {
                    *v += k[0] * r0[ox] + k[1] * r0[ox + 1] + k[2] * r0[ox + 2]
                        + k[3] * r1[ox] + k[4] * r1[ox + 1] + k[5] * r1[ox + 2]
                        + k[6] * r2[ox] + k[7] * r2[ox + 1] + k[8] * r2[ox + 2];
                }
            }
        }
    }
}
