//! Fill-once host mirror
//!
//! Each tensor handle owns one [`LocalMirror`] slot for a host copy of its value.
//! The slot is written at most once and never invalidated; handles are immutable so
//! the mirror cannot go stale.

use crate::tensor::Tensor;
use std::sync::OnceLock;

/// Single-slot, write-once cache of a host-resident tensor
#[derive(Default)]
pub struct LocalMirror {
    slot: OnceLock<Tensor>,
}

impl LocalMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&Tensor> {
        self.slot.get()
    }

    pub fn is_filled(&self) -> bool {
        self.slot.get().is_some()
    }

    /// Store `tensor` unless the slot is already filled, returning the retained value
    ///
    /// Concurrent first fillers race; exactly one value is kept and every caller
    /// gets that value back.
    pub fn fill(&self, tensor: Tensor) -> &Tensor {
        let mut stored = false;
        let retained = self.slot.get_or_init(|| {
            stored = true;
            tensor
        });
        if !stored {
            tracing::trace!("local_mirror_already_filled");
        }
        retained
    }
}

impl std::fmt::Debug for LocalMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMirror").field("filled", &self.is_filled()).finish()
    }
}
