//! Explicit resource-state bookkeeping.
//!
//! wgpu inserts the hardware barriers itself, but the passes in this crate
//! still declare every transition they depend on: a pass calls
//! [`StateTracker::set_state`] for each subresource it is about to touch and
//! [`StateTracker::flush`] before recording the dispatch that needs them.
//! The tracker keeps the logical state per (resource, mip) and a log of the
//! flushed batches, so ordering rules like "Hi-Z mip m is readable before
//! mip m+1 is built" are observable and testable.

use std::collections::HashMap;
use std::ops::Range;

use crate::core::resources::{ResourceId, TrackedTexture};

/// Logical access state of a subresource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Never written or contents discarded
    Undefined,
    /// Sampled or loaded by a shader
    ShaderRead,
    /// Written through a storage binding
    StorageWrite,
    /// Source of a copy
    CopySrc,
    /// Destination of a copy or queue write
    CopyDst,
    /// Color or depth attachment of a render pass
    RenderTarget,
}

impl ResourceState {
    pub fn is_read(self) -> bool {
        matches!(self, ResourceState::ShaderRead | ResourceState::CopySrc)
    }
}

/// A single state change of one mip of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub resource: ResourceId,
    pub mip: u32,
    pub from: ResourceState,
    pub to: ResourceState,
}

/// Transitions flushed together ahead of one dependent operation.
#[derive(Debug, Clone)]
pub struct BarrierBatch {
    pub label: String,
    pub transitions: Vec<Transition>,
}

impl BarrierBatch {
    /// True if the batch moves `mip` of `resource` into `state`.
    pub fn contains(&self, resource: ResourceId, mip: u32, state: ResourceState) -> bool {
        self.transitions
            .iter()
            .any(|t| t.resource == resource && t.mip == mip && t.to == state)
    }
}

/// Per-subresource state with pending and flushed transitions.
#[derive(Debug, Default)]
pub struct StateTracker {
    states: HashMap<(ResourceId, u32), ResourceState>,
    pending: Vec<(ResourceId, u32, ResourceState)>,
    log: Vec<BarrierBatch>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a subresource; untracked ones are [`ResourceState::Undefined`].
    pub fn state(&self, resource: ResourceId, mip: u32) -> ResourceState {
        self.states
            .get(&(resource, mip))
            .copied()
            .unwrap_or(ResourceState::Undefined)
    }

    /// Queue a transition of `mips` of `texture` into `state`.
    pub fn set_state(&mut self, texture: &TrackedTexture, mips: Range<u32>, state: ResourceState) {
        for mip in mips {
            self.pending.push((texture.id(), mip, state));
        }
    }

    /// Queue a transition of every mip of `texture`.
    pub fn set_state_all(&mut self, texture: &TrackedTexture, state: ResourceState) {
        self.set_state(texture, 0..texture.mip_count(), state);
    }

    /// Apply all queued transitions and record them as one batch.
    ///
    /// Transitions into the state a subresource already holds are dropped.
    /// Returns the number of transitions that were applied.
    pub fn flush(&mut self, label: &str) -> usize {
        let mut transitions = Vec::new();
        for (resource, mip, to) in self.pending.drain(..) {
            let from = self
                .states
                .get(&(resource, mip))
                .copied()
                .unwrap_or(ResourceState::Undefined);
            if from == to {
                continue;
            }
            self.states.insert((resource, mip), to);
            transitions.push(Transition {
                resource,
                mip,
                from,
                to,
            });
        }
        let count = transitions.len();
        if count > 0 {
            log::trace!("barrier batch '{label}': {count} transitions");
            self.log.push(BarrierBatch {
                label: label.to_string(),
                transitions,
            });
        }
        count
    }

    /// Record that an operation left a subresource in `state` without a
    /// separate barrier (e.g. a queue write or a render pass the caller ran).
    pub fn assume_state(&mut self, texture: &TrackedTexture, mips: Range<u32>, state: ResourceState) {
        for mip in mips {
            self.states.insert((texture.id(), mip), state);
        }
    }

    /// Debug check that a subresource was flushed into `state` before use.
    pub fn require(&self, texture: &TrackedTexture, mip: u32, state: ResourceState) {
        debug_assert!(
            self.pending.is_empty(),
            "unflushed transitions before use of '{}'",
            texture.label()
        );
        debug_assert_eq!(
            self.state(texture.id(), mip),
            state,
            "'{}' mip {} used in the wrong state",
            texture.label(),
            mip
        );
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Flushed batches in recording order.
    pub fn log(&self) -> &[BarrierBatch] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Forget everything about `resource` (after it is dropped or recreated).
    pub fn forget(&mut self, resource: ResourceId) {
        self.states.retain(|(id, _), _| *id != resource);
        self.pending.retain(|(id, _, _)| *id != resource);
    }
}
