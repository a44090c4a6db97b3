//! Sub-kernel selection.
//!
//! Selection is a pure function of element type, shapes and parameters, so
//! a layer selects once per group at `init`.

use gconv_core::{ConvParams, DType, GconvError, Result, TensorDesc};
use gconv_kernels::conv::{Conv1x1, Conv3x3, ConvCommon, ConvInt8Common};
use gconv_kernels::{ConvImpl, ImplKind};

/// Float kernels in priority order; the first whose predicate accepts wins.
pub const FP_PRIORITY: [ImplKind; 3] = [ImplKind::Conv3x3, ImplKind::Conv1x1, ImplKind::Common];

fn accepts(kind: ImplKind, params: &ConvParams, input: &TensorDesc, output: &TensorDesc) -> bool {
    match kind {
        ImplKind::Conv3x3 => Conv3x3::is_preferred(params, input, output),
        ImplKind::Conv1x1 => Conv1x1::is_preferred(params, input, output),
        ImplKind::Common => ConvCommon::is_preferred(params, input, output),
        ImplKind::Int8Common => ConvInt8Common::is_preferred(params, input, output),
    }
}

/// Kernel variant for one group, or `None` if no kernel handles the input type.
pub fn select_kind(params: &ConvParams, input: &TensorDesc, output: &TensorDesc) -> Option<ImplKind> {
    match input.dtype() {
        dtype if dtype.is_quantized() => Some(ImplKind::Int8Common),
        DType::F32 => FP_PRIORITY
            .iter()
            .copied()
            .find(|&kind| accepts(kind, params, input, output)),
        _ => None,
    }
}

/// Make `slot` hold the variant the policy picks.
///
/// An instance already of that variant is kept as is; anything else is
/// replaced by a fresh, unbound instance.
pub fn select_into<'a>(
    slot: &'a mut Option<ConvImpl>,
    params: &ConvParams,
    input: &TensorDesc,
    output: &TensorDesc,
) -> Result<&'a mut ConvImpl> {
    let kind = select_kind(params, input, output).ok_or(GconvError::UnsupportedDType(input.dtype()))?;
    if slot.as_ref().map(ConvImpl::kind) != Some(kind) {
        *slot = Some(ConvImpl::new(kind));
    }
    slot.as_mut().ok_or(GconvError::NoImplementation)
}
