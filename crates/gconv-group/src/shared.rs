//! Thread-shareable handle to one grouped convolution layer.

use std::sync::Arc;

use parking_lot::Mutex;

use gconv_core::{ConvParams, ConvResource, PackedTensor, Result, TensorDesc};

use crate::context::ExecContext;
use crate::group::{GroupConv, LayerState};

/// A [`GroupConv`] behind a mutex, so several threads can drive one layer.
///
/// Calls are serialized: the layer's scratch arenas are reused by every
/// forward.
#[derive(Debug, Clone, Default)]
pub struct SharedGroupConv {
    inner: Arc<Mutex<GroupConv>>,
}

impl SharedGroupConv {
    pub fn new(layer: GroupConv) -> Self {
        Self {
            inner: Arc::new(Mutex::new(layer)),
        }
    }

    pub fn init(
        &self,
        ctx: &ExecContext,
        params: Option<&ConvParams>,
        resource: Option<&ConvResource>,
        input: &TensorDesc,
        output: &TensorDesc,
    ) -> Result<()> {
        self.inner.lock().init(ctx, params, resource, input, output)
    }

    pub fn forward(&self, input: &PackedTensor, output: &mut PackedTensor) -> Result<()> {
        self.inner.lock().forward(input, output)
    }

    pub fn state(&self) -> LayerState {
        self.inner.lock().state()
    }

    /// Run `f` with exclusive access to the layer.
    pub fn with_layer<R>(&self, f: impl FnOnce(&mut GroupConv) -> R) -> R {
        f(&mut self.inner.lock())
    }
}
