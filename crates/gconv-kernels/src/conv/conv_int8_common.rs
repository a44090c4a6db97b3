//! Quantized 8-bit convolution.
//!
//! Inputs, filter and outputs are `i8`; products accumulate in `i32`.
//! Each output channel is requantized with its own `f32` scale:
//! `out = saturate(round(activation((acc + bias) * scale)))`.

use gconv_core::{ConvParams, ConvResource, DType, GconvError, PackedView, PackedViewMut, RawBuffer, Result, TensorDesc};

use super::{check_weights, filter_len, ConvAcc, ConvGeometry};
use crate::lane;

#[derive(Debug, Clone)]
struct Int8Binding {
    params: ConvParams,
    in_c: usize,
    filter: RawBuffer,
    bias: Option<RawBuffer>,
    scale: RawBuffer,
}

/// Direct i8 convolution for any geometry.
#[derive(Debug, Clone, Default)]
pub struct ConvInt8Common {
    binding: Option<Int8Binding>,
}

impl ConvInt8Common {
    /// Any convolution over quantized tensors.
    pub fn is_preferred(_params: &ConvParams, input: &TensorDesc, output: &TensorDesc) -> bool {
        input.dtype() == DType::I8 && output.dtype() == DType::I8
    }
}

impl ConvAcc for ConvInt8Common {
    fn init(
        &mut self,
        params: &ConvParams,
        resource: &ConvResource,
        input: &TensorDesc,
        output: &TensorDesc,
    ) -> Result<()> {
        for desc in [input, output] {
            if desc.dtype() != DType::I8 {
                return Err(GconvError::UnsupportedDType(desc.dtype()));
            }
        }
        let geom = ConvGeometry::resolve(params, input, output)?;
        let filter = check_weights(&resource.filter, DType::I8, filter_len(params, geom.in_c), "filter")?;
        let bias = if params.bias {
            let bias = resource.bias.as_ref().ok_or(GconvError::MissingResource("bias"))?;
            Some(check_weights(bias, DType::I32, params.output_channel, "bias")?)
        } else {
            None
        };
        let scale = resource.scale.as_ref().ok_or(GconvError::MissingResource("scale"))?;
        let scale = check_weights(scale, DType::F32, params.output_channel, "scale")?;
        self.binding = Some(Int8Binding {
            params: params.clone(),
            in_c: geom.in_c,
            filter,
            bias,
            scale,
        });
        Ok(())
    }

    fn forward(&self, input: PackedView<'_>, mut output: PackedViewMut<'_>) -> Result<()> {
        let binding = self.binding.as_ref().ok_or(GconvError::NoImplementation)?;
        let params = &binding.params;
        let geom = ConvGeometry::resolve(params, input.desc(), output.desc())?;
        if geom.in_c != binding.in_c {
            return Err(GconvError::ShapeMismatch {
                expected: vec![geom.batch, binding.in_c, geom.in_h, geom.in_w],
                got: input.desc().dims().to_vec(),
            });
        }
        let filter = binding
            .filter
            .as_i8_slice()
            .ok_or_else(|| GconvError::StorageError("filter is not i8".into()))?;
        let scale = binding
            .scale
            .as_f32_slice()
            .ok_or_else(|| GconvError::StorageError("scale is not f32-aligned".into()))?;
        let bias = match &binding.bias {
            Some(b) => Some(
                b.as_i32_slice()
                    .ok_or_else(|| GconvError::StorageError("bias is not i32-aligned".into()))?,
            ),
            None => None,
        };

        let lane_w = input.desc().lane();
        let in_pb = input.desc().packed_count_per_batch();
        let out_pb = output.desc().packed_count_per_batch();
        let src = input.as_i8()?;
        let dst = output.as_i8_mut()?;

        let mut flat_in = vec![0i8; geom.in_c * geom.in_plane()];
        let mut flat_out = vec![0i8; geom.out_c * geom.out_plane()];
        for b in 0..geom.batch {
            lane::unpack_lanes(&mut flat_in, &src[b * in_pb..(b + 1) * in_pb], geom.in_plane(), geom.in_c, lane_w);
            conv_i8_plane(&geom, params, &flat_in, filter, bias, scale, &mut flat_out);
            lane::pack_lanes(&mut dst[b * out_pb..(b + 1) * out_pb], &flat_out, geom.out_plane(), geom.out_c, lane_w);
        }
        Ok(())
    }
}

fn conv_i8_plane(
    geom: &ConvGeometry,
    params: &ConvParams,
    x: &[i8],
    w: &[i8],
    bias: Option<&[i32]>,
    scale: &[f32],
    out: &mut [i8],
) {
    let [kh, kw] = params.kernel;
    let (h, wd) = (geom.in_h as isize, geom.in_w as isize);
    let out_plane = geom.out_plane();

    for oc in 0..geom.out_c {
        let row = &mut out[oc * out_plane..(oc + 1) * out_plane];
        let acc0 = bias.map_or(0, |b| b[oc]);
        for oy in 0..geom.out_h {
            for ox in 0..geom.out_w {
                let mut acc = acc0;
                for ic in 0..geom.in_c {
                    let src = &x[ic * geom.in_plane()..(ic + 1) * geom.in_plane()];
                    let k = &w[(oc * geom.in_c + ic) * kh * kw..(oc * geom.in_c + ic + 1) * kh * kw];
                    for ky in 0..kh {
                        let iy = (oy * params.stride[0] + ky * params.dilation[0]) as isize - params.pad[0] as isize;
                        if iy < 0 || iy >= h {
                            continue;
                        }
                        for kx in 0..kw {
                            let ix = (ox * params.stride[1] + kx * params.dilation[1]) as isize - params.pad[1] as isize;
                            if ix < 0 || ix >= wd {
                                continue;
                            }
                            acc += src[iy as usize * geom.in_w + ix as usize] as i32 * k[ky * kw + kx] as i32;
                        }
                    }
                }
                row[oy * geom.out_w + ox] = requantize(acc, scale[oc], params.activation);
            }
        }
    }
}

#[inline]
fn requantize(acc: i32, scale: f32, activation: gconv_core::Activation) -> i8 {
    let v = activation.apply(acc as f32 * scale).round();
    v.clamp(i8::MIN as f32, i8::MAX as f32) as i8
}

#[cfg(test)]
mod tests {
    use super::*;
    use gconv_core::{Activation, PackedTensor};

    fn packed_i8(values: &[i8], dims: [usize; 4]) -> PackedTensor {
        let desc = TensorDesc::new(dims, DType::I8, 4).unwrap();
        let mut data = vec![0i8; desc.packed_count()];
        let plane = dims[2] * dims[3];
        let pb = desc.packed_count_per_batch();
        let per_batch = dims[1] * plane;
        for b in 0..dims[0] {
            lane::pack_lanes(&mut data[b * pb..(b + 1) * pb], &values[b * per_batch..(b + 1) * per_batch], plane, dims[1], 4);
        }
        PackedTensor::from_packed(desc, bytemuck::cast_slice::<i8, u8>(data.as_slice()).to_vec()).unwrap()
    }

    fn unpacked_i8(t: &PackedTensor) -> Vec<i8> {
        let d = t.desc();
        let src = t.view().as_i8().unwrap();
        let mut out = vec![0i8; d.channels() * d.plane()];
        lane::unpack_lanes(&mut out, &src[..d.packed_count_per_batch()], d.plane(), d.channels(), d.lane());
        out
    }

    #[test]
    fn test_preferred() {
        let q = TensorDesc::new([1, 4, 4, 4], DType::I8, 4).unwrap();
        let f = TensorDesc::new([1, 4, 4, 4], DType::F32, 4).unwrap();
        assert!(ConvInt8Common::is_preferred(&ConvParams::new(4, 3), &q, &q));
        assert!(!ConvInt8Common::is_preferred(&ConvParams::new(4, 3), &f, &f));
    }

    #[test]
    fn test_requantize_saturates() {
        assert_eq!(requantize(1000, 1.0, Activation::None), 127);
        assert_eq!(requantize(-1000, 1.0, Activation::None), -128);
        assert_eq!(requantize(-5, 1.0, Activation::Relu), 0);
        assert_eq!(requantize(7, 0.5, Activation::None), 4);
    }

    #[test]
    fn test_pointwise_identity() {
        // Identity filter with scale 1 reproduces the input.
        let dims = [1, 3, 2, 2];
        let x: Vec<i8> = (0..12).map(|i| i as i8 - 6).collect();
        let mut w = vec![0i8; 9];
        for c in 0..3 {
            w[c * 3 + c] = 1;
        }
        let params = ConvParams::new(3, 1);
        let resource = ConvResource::new(RawBuffer::from_i8(&w)).with_scale(RawBuffer::from_f32(&[1.0; 3]));
        let input = packed_i8(&x, dims);
        let out_desc = TensorDesc::new(dims, DType::I8, 4).unwrap();
        let mut output = PackedTensor::zeros(out_desc.clone());

        let mut k = ConvInt8Common::default();
        k.init(&params, &resource, input.desc(), &out_desc).unwrap();
        k.forward(input.view(), output.view_mut()).unwrap();
        assert_eq!(unpacked_i8(&output), x);
    }

    #[test]
    fn test_3x3_with_bias_and_scale() {
        let dims = [1, 1, 3, 3];
        let x = vec![1i8; 9];
        let w = vec![2i8; 9];
        let params = ConvParams::new(2, 3).with_pad(1).with_bias(true);
        let w2: Vec<i8> = w.iter().chain(w.iter()).copied().collect();
        let resource = ConvResource::new(RawBuffer::from_i8(&w2))
            .with_bias(RawBuffer::from_i32(&[2, -100]))
            .with_scale(RawBuffer::from_f32(&[0.5, 1.0]));
        let input = packed_i8(&x, dims);
        let out_desc = TensorDesc::new([1, 2, 3, 3], DType::I8, 4).unwrap();
        let mut output = PackedTensor::zeros(out_desc.clone());

        let mut k = ConvInt8Common::default();
        k.init(&params, &resource, input.desc(), &out_desc).unwrap();
        k.forward(input.view(), output.view_mut()).unwrap();
        let out = unpacked_i8(&output);

        // Corner sees 4 taps, edge 6, center 9.
        let taps = [4, 6, 4, 6, 9, 6, 4, 6, 4];
        for (p, &t) in taps.iter().enumerate() {
            assert_eq!(out[p] as i32, (2 * t + 2) / 2);
            assert_eq!(out[9 + p] as i32, (2 * t - 100).max(-128));
        }
    }

    #[test]
    fn test_missing_scale() {
        let desc = TensorDesc::new([1, 4, 2, 2], DType::I8, 4).unwrap();
        let resource = ConvResource::new(RawBuffer::from_i8(&[1; 16]));
        let mut k = ConvInt8Common::default();
        assert!(matches!(
            k.init(&ConvParams::new(4, 1), &resource, &desc, &desc),
            Err(GconvError::MissingResource("scale"))
        ));
    }

    #[test]
    fn test_rejects_float_tensors() {
        let desc = TensorDesc::new([1, 4, 2, 2], DType::F32, 4).unwrap();
        let resource = ConvResource::new(RawBuffer::from_i8(&[1; 16])).with_scale(RawBuffer::from_f32(&[1.0; 4]));
        let mut k = ConvInt8Common::default();
        assert!(matches!(
            k.init(&ConvParams::new(4, 1), &resource, &desc, &desc),
            Err(GconvError::UnsupportedDType(DType::F32))
        ));
    }
}
