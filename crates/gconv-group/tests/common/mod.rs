#![allow(dead_code)]

use gconv_core::{ConvParams, DType, PackedTensor, TensorDesc};
use gconv_kernels::lane;
use rand::Rng;

/// Direct grouped convolution over NCHW data. Filter layout is
/// `[out_c, in_c / group, kh, kw]`.
pub fn reference_group_conv(
    x: &[f32],
    w: &[f32],
    bias: Option<&[f32]>,
    dims: [usize; 4],
    params: &ConvParams,
) -> (Vec<f32>, [usize; 4]) {
    let [batch, in_c, h, wd] = dims;
    let out_c = params.output_channel;
    let (out_h, out_w) = params.output_hw(h, wd).unwrap();
    let (icg, ocg) = (in_c / params.group, out_c / params.group);
    let [kh, kw] = params.kernel;
    let mut out = vec![0.0f32; batch * out_c * out_h * out_w];

    for b in 0..batch {
        for oc in 0..out_c {
            let g = oc / ocg;
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let mut acc = bias.map_or(0.0, |bv| bv[oc]);
                    for i in 0..icg {
                        let ic = g * icg + i;
                        for ky in 0..kh {
                            for kx in 0..kw {
                                let iy = (oy * params.stride[0] + ky * params.dilation[0]) as isize - params.pad[0] as isize;
                                let ix = (ox * params.stride[1] + kx * params.dilation[1]) as isize - params.pad[1] as isize;
                                if iy < 0 || ix < 0 || iy >= h as isize || ix >= wd as isize {
                                    continue;
                                }
                                let xv = x[((b * in_c + ic) * h + iy as usize) * wd + ix as usize];
                                let wv = w[((oc * icg + i) * kh + ky) * kw + kx];
                                acc += xv * wv;
                            }
                        }
                    }
                    out[((b * out_c + oc) * out_h + oy) * out_w + ox] = params.activation.apply(acc);
                }
            }
        }
    }
    (out, [batch, out_c, out_h, out_w])
}

pub fn packed_from_nchw(x: &[f32], dims: [usize; 4]) -> PackedTensor {
    let desc = TensorDesc::new(dims, DType::F32, 4).unwrap();
    let plane = dims[2] * dims[3];
    let per_batch = dims[1] * plane;
    let pb = desc.packed_count_per_batch();
    let mut packed = vec![0.0f32; desc.packed_count()];
    for b in 0..dims[0] {
        lane::pack_f32(&mut packed[b * pb..(b + 1) * pb], &x[b * per_batch..(b + 1) * per_batch], plane, dims[1], 4);
    }
    PackedTensor::from_packed_f32(desc, &packed).unwrap()
}

pub fn nchw_from_packed(t: &PackedTensor) -> Vec<f32> {
    let d = t.desc();
    let plane = d.plane();
    let per_batch = d.channels() * plane;
    let pb = d.packed_count_per_batch();
    let src = t.as_f32_slice().unwrap();
    let mut out = vec![0.0f32; d.batch() * per_batch];
    for b in 0..d.batch() {
        lane::unpack_f32(&mut out[b * per_batch..(b + 1) * per_batch], &src[b * pb..(b + 1) * pb], plane, d.channels(), d.lane());
    }
    out
}

pub fn random_vec(n: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

pub fn assert_close(a: &[f32], b: &[f32], tol: f32) {
    assert_eq!(a.len(), b.len(), "length mismatch: {} vs {}", a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        assert!((x - y).abs() < tol, "element {} differs: {} vs {} (tol={})", i, x, y, tol);
    }
}
