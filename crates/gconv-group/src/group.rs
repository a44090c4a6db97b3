//! Grouped convolution layer.
//!
//! A layer with `G` groups runs `G` independent ordinary convolutions. Each
//! forward scatters the aggregate input into per-group slots of an input
//! arena, runs one sub-kernel per group into an output arena, and gathers
//! the group outputs back into the aggregate output.

use std::fmt;

use rayon::prelude::*;
use tracing::{debug, trace, warn};

use gconv_core::{
    ConvParams, ConvResource, GconvError, PackedTensor, PackedView, PackedViewMut, Result, TensorDesc,
};
use gconv_kernels::{ConvAcc, ConvImpl, ImplKind};

use crate::arena::Arena;
use crate::config::ExecConfig;
use crate::context::ExecContext;
use crate::geometry::{self, GroupGeometry};
use crate::partition;
use crate::selector;
use crate::transcode::Transcoder;

/// Lifecycle of a [`GroupConv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerState {
    /// Created, `init` or `plan` not called yet.
    Unconfigured,
    /// Geometry and resources planned, kernels not bound yet.
    Initialized,
    /// Kernels bound; `forward` may be called repeatedly.
    Ready,
    /// `plan` or `bind` failed. Terminal.
    Failed,
}

impl LayerState {
    pub fn name(&self) -> &'static str {
        match self {
            LayerState::Unconfigured => "unconfigured",
            LayerState::Initialized => "initialized",
            LayerState::Ready => "ready",
            LayerState::Failed => "failed",
        }
    }
}

impl fmt::Display for LayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Grouped convolution over lane-packed tensors.
#[derive(Debug)]
pub struct GroupConv {
    state: LayerState,
    config: ExecConfig,
    group: usize,
    group_params: Option<ConvParams>,
    resources: Vec<ConvResource>,
    impls: Vec<ConvImpl>,
    geometry: Option<GroupGeometry>,
    input_slots: Arena,
    output_slots: Arena,
    transcoder: Transcoder,
}

impl Default for GroupConv {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupConv {
    pub fn new() -> Self {
        Self {
            state: LayerState::Unconfigured,
            config: ExecConfig::default(),
            group: 0,
            group_params: None,
            resources: Vec::new(),
            impls: Vec::new(),
            geometry: None,
            input_slots: Arena::new("group input"),
            output_slots: Arena::new("group output"),
            transcoder: Transcoder::new(),
        }
    }

    /// Plan groups, partition resources and bind one sub-kernel per group.
    ///
    /// Same as [`plan`](Self::plan) followed by [`bind`](Self::bind). Any
    /// failure moves the layer to [`LayerState::Failed`] for good.
    pub fn init(
        &mut self,
        ctx: &ExecContext,
        params: Option<&ConvParams>,
        resource: Option<&ConvResource>,
        input: &TensorDesc,
        output: &TensorDesc,
    ) -> Result<()> {
        self.plan(ctx, params, resource, input, output)?;
        self.bind()
    }

    /// Check parameters, plan group shapes and partition resources.
    ///
    /// Leaves the layer [`LayerState::Initialized`]: no kernel is bound yet
    /// and `forward` is refused until [`bind`](Self::bind) succeeds.
    pub fn plan(
        &mut self,
        ctx: &ExecContext,
        params: Option<&ConvParams>,
        resource: Option<&ConvResource>,
        input: &TensorDesc,
        output: &TensorDesc,
    ) -> Result<()> {
        if self.state == LayerState::Failed {
            return Err(GconvError::InvalidState {
                state: self.state.name(),
                expected: "unconfigured",
            });
        }
        let planned = self.try_plan(ctx, params, resource, input, output);
        self.settle(planned, LayerState::Initialized)
    }

    /// Select and initialize one sub-kernel per planned group.
    pub fn bind(&mut self) -> Result<()> {
        if self.state != LayerState::Initialized {
            return Err(GconvError::InvalidState {
                state: self.state.name(),
                expected: "initialized",
            });
        }
        let bound = self.try_bind();
        self.settle(bound, LayerState::Ready)
    }

    fn settle(&mut self, result: Result<()>, next: LayerState) -> Result<()> {
        match result {
            Ok(()) => {
                self.state = next;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, state = %self.state, "group conv init failed");
                self.state = LayerState::Failed;
                Err(e)
            }
        }
    }

    fn try_plan(
        &mut self,
        ctx: &ExecContext,
        params: Option<&ConvParams>,
        resource: Option<&ConvResource>,
        input: &TensorDesc,
        output: &TensorDesc,
    ) -> Result<()> {
        let params = params.ok_or(GconvError::MissingParam("conv params"))?;
        let resource = resource.ok_or(GconvError::MissingResource("filter"))?;
        for desc in [input, output] {
            if desc.lane() != ctx.lane_width() {
                return Err(GconvError::InvalidParam(format!(
                    "tensor lane width {} differs from context lane width {}",
                    desc.lane(),
                    ctx.lane_width()
                )));
            }
        }

        let group_params = geometry::group_params(params)?;
        let geom = GroupGeometry::plan(params.group, input, output)?;
        let resources = partition::split_resource(resource, params)?;
        debug!(
            group = params.group,
            input = %geom.input.shape(),
            output = %geom.output.shape(),
            simd = ctx.simd().best_tier(),
            "planned group conv"
        );

        self.input_slots.reserve(params.group * geom.input_slot_bytes());
        self.output_slots.reserve(params.group * geom.output_slot_bytes());
        self.config = ctx.config().clone();
        self.group = params.group;
        self.group_params = Some(group_params);
        self.resources = resources;
        self.geometry = Some(geom);
        Ok(())
    }

    fn try_bind(&mut self) -> Result<()> {
        let (Some(group_params), Some(geom)) = (self.group_params.as_ref(), self.geometry.as_ref()) else {
            return Err(GconvError::MissingParam("planned group geometry"));
        };
        let mut slots: Vec<Option<ConvImpl>> = std::mem::take(&mut self.impls).into_iter().map(Some).collect();
        slots.resize_with(self.group, || None);
        for (g, slot) in slots.iter_mut().enumerate() {
            let kernel = selector::select_into(slot, group_params, &geom.input, &geom.output)?;
            kernel.init(group_params, &self.resources[g], &geom.input, &geom.output)?;
            debug!(group = g, kernel = %kernel.kind(), "bound group kernel");
        }
        self.impls = slots.into_iter().flatten().collect();
        Ok(())
    }

    /// Run the layer on one aggregate input, writing one aggregate output.
    ///
    /// Shapes may differ from `init` in batch and spatial size. On error the
    /// output contents are unspecified and the layer stays ready.
    pub fn forward(&mut self, input: &PackedTensor, output: &mut PackedTensor) -> Result<()> {
        self.forward_view(input.view(), output.view_mut())
    }

    /// [`forward`](Self::forward) over borrowed packed views.
    pub fn forward_view(&mut self, input: PackedView<'_>, output: PackedViewMut<'_>) -> Result<()> {
        if self.state != LayerState::Ready {
            return Err(GconvError::InvalidState {
                state: self.state.name(),
                expected: "ready",
            });
        }
        if self.impls.is_empty() {
            return Err(GconvError::NoImplementation);
        }

        let group = self.group;
        let geom = GroupGeometry::plan(group, input.desc(), output.desc())?;
        let (in_slot, out_slot) = (geom.input_slot_bytes(), geom.output_slot_bytes());

        self.transcoder
            .split(input, &geom.input, group, self.input_slots.reserve(group * in_slot))?;

        let src = self.input_slots.bytes(group * in_slot);
        let dst = self.output_slots.reserve(group * out_slot);
        let run = |g: usize, kernel: &ConvImpl, src: &[u8], dst: &mut [u8]| -> Result<()> {
            trace!(group = g, kernel = %kernel.kind(), "group forward");
            let x = PackedView::new(&geom.input, src)?;
            let y = PackedViewMut::new(&geom.output, dst)?;
            kernel.forward(x, y).map_err(|e| GconvError::GroupForward {
                group: g,
                source: Box::new(e),
            })
        };
        if self.config.runs_parallel(group) {
            self.impls
                .par_iter()
                .zip(src.par_chunks(in_slot))
                .zip(dst.par_chunks_mut(out_slot))
                .enumerate()
                .try_for_each(|(g, ((kernel, src), dst))| run(g, kernel, src, dst))?;
        } else {
            for (g, ((kernel, src), dst)) in self
                .impls
                .iter()
                .zip(src.chunks(in_slot))
                .zip(dst.chunks_mut(out_slot))
                .enumerate()
            {
                run(g, kernel, src, dst)?;
            }
        }

        self.transcoder
            .merge(self.output_slots.bytes(group * out_slot), &geom.output, group, output)?;
        self.geometry = Some(geom);
        Ok(())
    }

    pub fn state(&self) -> LayerState {
        self.state
    }

    /// Group count, 0 before `init`.
    pub fn group(&self) -> usize {
        self.group
    }

    /// Flattened parameters every group runs with.
    pub fn group_params(&self) -> Option<&ConvParams> {
        self.group_params.as_ref()
    }

    /// Group descriptors of the latest `init` or `forward`.
    pub fn group_geometry(&self) -> Option<&GroupGeometry> {
        self.geometry.as_ref()
    }

    /// Selected kernel per group, in group order.
    pub fn kernel_kinds(&self) -> Vec<ImplKind> {
        self.impls.iter().map(ConvImpl::kind).collect()
    }

    /// Per-group views of the trained resources.
    pub fn group_resources(&self) -> &[ConvResource] {
        &self.resources
    }

    /// Scratch bytes held by the layer's arenas.
    pub fn scratch_bytes(&self) -> usize {
        self.input_slots.capacity() + self.output_slots.capacity() + self.transcoder.staging_bytes()
    }

    /// Number of times any scratch arena had to grow.
    pub fn scratch_grows(&self) -> usize {
        self.input_slots.grows() + self.output_slots.grows()
    }
}
