mod common;

use std::thread;

use common::*;
use gconv_core::{Activation, ConvParams, ConvResource, DType, GconvError, PackedTensor, RawBuffer, TensorDesc};
use gconv_group::{ExecConfig, ExecContext, GroupConv, LayerState, SharedGroupConv};
use gconv_kernels::ImplKind;

struct Case {
    dims: [usize; 4],
    params: ConvParams,
    x: Vec<f32>,
    w: Vec<f32>,
    bias: Vec<f32>,
}

impl Case {
    fn random(dims: [usize; 4], params: ConvParams) -> Self {
        let wlen = params.output_channel * dims[1] / params.group * params.kernel[0] * params.kernel[1];
        Self {
            x: random_vec(dims.iter().product()),
            w: random_vec(wlen),
            bias: random_vec(params.output_channel),
            dims,
            params,
        }
    }

    fn resource(&self) -> ConvResource {
        let r = ConvResource::new(RawBuffer::from_f32(&self.w));
        if self.params.bias {
            r.with_bias(RawBuffer::from_f32(&self.bias))
        } else {
            r
        }
    }

    fn expected(&self) -> (Vec<f32>, [usize; 4]) {
        let bias = self.params.bias.then_some(self.bias.as_slice());
        reference_group_conv(&self.x, &self.w, bias, self.dims, &self.params)
    }

    fn layer(&self, ctx: &ExecContext) -> GroupConv {
        let (_, out_dims) = self.expected();
        let mut layer = GroupConv::new();
        layer
            .init(
                ctx,
                Some(&self.params),
                Some(&self.resource()),
                &ctx.desc(self.dims, DType::F32).unwrap(),
                &ctx.desc(out_dims, DType::F32).unwrap(),
            )
            .unwrap();
        layer
    }

    fn run(&self, ctx: &ExecContext) -> (GroupConv, Vec<f32>) {
        let (_, out_dims) = self.expected();
        let mut layer = self.layer(ctx);
        let input = packed_from_nchw(&self.x, self.dims);
        let mut output = ctx.alloc_packed(out_dims, DType::F32).unwrap();
        layer.forward(&input, &mut output).unwrap();
        (layer, nchw_from_packed(&output))
    }

    fn check(&self, ctx: &ExecContext) -> GroupConv {
        let (layer, got) = self.run(ctx);
        assert_close(&got, &self.expected().0, 1e-4);
        layer
    }
}

#[test]
fn test_two_groups_hand_weights() {
    // (1, 8, 4, 4) input, group 2, 8 outputs, 3x3 same padding.
    let dims = [1, 8, 4, 4];
    let params = ConvParams::new(8, 3).with_pad(1).with_group(2).with_bias(true);
    let x: Vec<f32> = (0..128).map(|i| (i % 9) as f32 - 4.0).collect();
    let w: Vec<f32> = (0..8 * 4 * 9).map(|i| ((i % 5) as f32 - 2.0) * 0.5).collect();
    let bias = vec![0.5, -0.5, 1.0, 0.0, 0.25, -1.0, 2.0, 0.75];
    let case = Case { dims, params, x, w, bias };

    let ctx = ExecContext::default();
    let layer = case.check(&ctx);
    assert_eq!(layer.kernel_kinds(), vec![ImplKind::Conv3x3; 2]);

    // Same result as two independent 4-in/4-out convolutions on the slices.
    let (full, out_dims) = case.expected();
    assert_eq!(out_dims, [1, 8, 4, 4]);
    let half = ConvParams::new(4, 3).with_pad(1).with_bias(true);
    for g in 0..2 {
        let (part, _) = reference_group_conv(
            &case.x[g * 64..(g + 1) * 64],
            &case.w[g * 144..(g + 1) * 144],
            Some(&case.bias[g * 4..(g + 1) * 4]),
            [1, 4, 4, 4],
            &half,
        );
        assert_close(&full[g * 64..(g + 1) * 64], &part, 1e-5);
    }
}

#[test]
fn test_pointwise_groups() {
    let case = Case::random([2, 12, 3, 5], ConvParams::new(6, 1).with_group(3).with_bias(true));
    let layer = case.check(&ExecContext::default());
    assert_eq!(layer.kernel_kinds(), vec![ImplKind::Conv1x1; 3]);
}

#[test]
fn test_generic_groups() {
    let params = ConvParams::new(8, 5)
        .with_pad(2)
        .with_stride(2)
        .with_group(4)
        .with_activation(Activation::Relu);
    let case = Case::random([1, 8, 7, 6], params);
    let layer = case.check(&ExecContext::default());
    assert_eq!(layer.kernel_kinds(), vec![ImplKind::Common; 4]);
}

#[test]
fn test_unaligned_group_channels() {
    // 3 channels per group: group boundaries fall inside lanes.
    let case = Case::random([2, 9, 4, 4], ConvParams::new(6, 3).with_pad(1).with_group(3).with_bias(true));
    case.check(&ExecContext::default());
}

#[test]
fn test_depthwise() {
    let case = Case::random([1, 8, 5, 5], ConvParams::new(8, 3).with_pad(1).with_group(8));
    case.check(&ExecContext::default());
}

#[test]
fn test_parallel_matches_sequential() {
    let case = Case::random([2, 16, 6, 6], ConvParams::new(16, 3).with_pad(1).with_group(4).with_bias(true));
    let (_, seq) = case.run(&ExecContext::default());
    let par_ctx = ExecContext::new(ExecConfig::default().parallel()).unwrap();
    let (_, par) = case.run(&par_ctx);
    assert_eq!(seq, par);
    assert_close(&par, &case.expected().0, 1e-4);
}

#[test]
fn test_shape_change_between_forwards() {
    let ctx = ExecContext::default();
    let case = Case::random([1, 8, 4, 4], ConvParams::new(8, 3).with_pad(1).with_group(2));
    let mut layer = case.layer(&ctx);
    let grows = layer.scratch_grows();

    // Larger spatial size and batch.
    let big = Case {
        dims: [3, 8, 6, 7],
        x: random_vec(3 * 8 * 6 * 7),
        params: case.params.clone(),
        w: case.w.clone(),
        bias: case.bias.clone(),
    };
    let (expected, out_dims) = big.expected();
    let mut output = ctx.alloc_packed(out_dims, DType::F32).unwrap();
    layer.forward(&packed_from_nchw(&big.x, big.dims), &mut output).unwrap();
    assert_close(&nchw_from_packed(&output), &expected, 1e-4);
    assert!(layer.scratch_grows() > grows);
    assert_eq!(layer.group_geometry().unwrap().input.dims(), &[3, 4, 6, 7]);

    // Back to the smaller shape: the arenas are reused.
    let grows = layer.scratch_grows();
    let capacity = layer.scratch_bytes();
    let (expected, out_dims) = case.expected();
    let mut output = ctx.alloc_packed(out_dims, DType::F32).unwrap();
    layer.forward(&packed_from_nchw(&case.x, case.dims), &mut output).unwrap();
    assert_close(&nchw_from_packed(&output), &expected, 1e-4);
    assert_eq!(layer.scratch_grows(), grows);
    assert_eq!(layer.scratch_bytes(), capacity);
}

#[test]
fn test_repeated_forward_is_stable() {
    let ctx = ExecContext::default();
    let case = Case::random([1, 8, 4, 4], ConvParams::new(8, 1).with_group(2).with_bias(true));
    let mut layer = case.layer(&ctx);
    let input = packed_from_nchw(&case.x, case.dims);
    let mut first = ctx.alloc_packed([1, 8, 4, 4], DType::F32).unwrap();
    layer.forward(&input, &mut first).unwrap();
    let grows = layer.scratch_grows();
    for _ in 0..3 {
        let mut again = ctx.alloc_packed([1, 8, 4, 4], DType::F32).unwrap();
        layer.forward(&input, &mut again).unwrap();
        assert_eq!(again.as_bytes(), first.as_bytes());
    }
    assert_eq!(layer.scratch_grows(), grows);
}

#[test]
fn test_group_resources_are_views() {
    let case = Case::random([1, 8, 4, 4], ConvParams::new(8, 3).with_group(2).with_bias(true));
    let resource = case.resource();
    let ctx = ExecContext::default();
    let mut layer = GroupConv::new();
    layer
        .init(
            &ctx,
            Some(&case.params),
            Some(&resource),
            &ctx.desc(case.dims, DType::F32).unwrap(),
            &ctx.desc([1, 8, 2, 2], DType::F32).unwrap(),
        )
        .unwrap();

    let parts = layer.group_resources();
    let mut filter = Vec::new();
    let mut bias = Vec::new();
    for part in parts {
        assert!(part.filter.shares_storage(&resource.filter));
        filter.extend_from_slice(part.filter.as_bytes());
        bias.extend_from_slice(part.bias.as_ref().unwrap().as_bytes());
    }
    assert_eq!(filter, resource.filter.as_bytes());
    assert_eq!(bias, resource.bias.as_ref().unwrap().as_bytes());
}

#[test]
fn test_int8_layer_rejected() {
    let ctx = ExecContext::default();
    let input = ctx.desc([1, 8, 4, 4], DType::I8).unwrap();
    let params = ConvParams::new(8, 1).with_group(2);
    let resource = ConvResource::new(RawBuffer::from_i8(&[1; 32])).with_scale(RawBuffer::from_f32(&[1.0; 8]));
    let mut layer = GroupConv::new();
    let err = layer
        .init(&ctx, Some(&params), Some(&resource), &input, &input)
        .unwrap_err();
    assert!(matches!(err, GconvError::Unsupported(_)), "{err}");
    assert!(err.is_config_error());
    assert_eq!(layer.state(), LayerState::Failed);
}

#[test]
fn test_indivisible_channels_rejected() {
    let ctx = ExecContext::default();
    let mut layer = GroupConv::new();
    let input = ctx.desc([1, 6, 4, 4], DType::F32).unwrap();
    let output = ctx.desc([1, 8, 4, 4], DType::F32).unwrap();
    let params = ConvParams::new(8, 1).with_group(4);
    let err = layer
        .init(&ctx, Some(&params), Some(&ConvResource::new(RawBuffer::from_f32(&[0.0; 8]))), &input, &output)
        .unwrap_err();
    assert!(matches!(err, GconvError::IndivisibleGroup { channels: 6, group: 4, .. }));
}

#[test]
fn test_indivisible_runtime_shape() {
    let ctx = ExecContext::default();
    let case = Case::random([1, 8, 4, 4], ConvParams::new(8, 1).with_group(2));
    let mut layer = case.layer(&ctx);
    let x = ctx.alloc_packed([1, 7, 4, 4], DType::F32).unwrap();
    let mut y = ctx.alloc_packed([1, 8, 4, 4], DType::F32).unwrap();
    assert!(matches!(
        layer.forward(&x, &mut y),
        Err(GconvError::IndivisibleGroup { .. })
    ));
    assert_eq!(layer.state(), LayerState::Ready);
}

#[test]
fn test_missing_inputs() {
    let ctx = ExecContext::default();
    let desc = ctx.desc([1, 8, 4, 4], DType::F32).unwrap();
    let params = ConvParams::new(8, 1).with_group(2);

    let mut layer = GroupConv::new();
    assert!(matches!(
        layer.init(&ctx, Some(&params), None, &desc, &desc),
        Err(GconvError::MissingResource(_))
    ));

    let mut layer = GroupConv::new();
    let resource = ConvResource::new(RawBuffer::from_f32(&[0.0; 32]));
    assert!(matches!(
        layer.init(&ctx, Some(&params.clone().with_bias(true)), Some(&resource), &desc, &desc),
        Err(GconvError::MissingResource("bias"))
    ));
}

#[test]
fn test_group_failure_names_group() {
    let ctx = ExecContext::default();
    let case = Case::random([1, 8, 4, 4], ConvParams::new(8, 1).with_group(2));
    let mut layer = case.layer(&ctx);

    // Divisible input channels, but each group now sees 8 instead of 4.
    let x = ctx.alloc_packed([1, 16, 4, 4], DType::F32).unwrap();
    let mut y = ctx.alloc_packed([1, 8, 4, 4], DType::F32).unwrap();
    let err = layer.forward(&x, &mut y).unwrap_err();
    match &err {
        GconvError::GroupForward { group, source } => {
            assert_eq!(*group, 0);
            assert!(matches!(**source, GconvError::ShapeMismatch { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_runtime_error());
    assert_eq!(layer.state(), LayerState::Ready);

    // The layer still works with the original shape.
    let mut y = ctx.alloc_packed([1, 8, 4, 4], DType::F32).unwrap();
    layer.forward(&packed_from_nchw(&case.x, case.dims), &mut y).unwrap();
}

#[test]
fn test_shared_layer_across_threads() {
    let ctx = ExecContext::default();
    let case = Case::random([1, 8, 4, 4], ConvParams::new(8, 3).with_pad(1).with_group(2).with_bias(true));
    let shared = SharedGroupConv::new(case.layer(&ctx));
    let (expected, out_dims) = case.expected();
    let input = packed_from_nchw(&case.x, case.dims);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let shared = shared.clone();
            let input = input.clone();
            let expected = expected.clone();
            thread::spawn(move || {
                for _ in 0..5 {
                    let mut output = PackedTensor::zeros(TensorDesc::new(out_dims, DType::F32, 4).unwrap());
                    shared.forward(&input, &mut output).unwrap();
                    assert_close(&nchw_from_packed(&output), &expected, 1e-4);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(shared.state(), LayerState::Ready);
}
