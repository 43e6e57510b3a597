// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Hand-off of live inputs from a producer thread to the render loop.
//!
//! The producer publishes whole values into a `SnapshotCell`; the render
//! loop takes whatever is there, if anything, once per frame.  A newer
//! publish replaces an unread one, so the loop always sees the latest
//! value and never waits.  The loop's own copy lives in `LiveInputs` and
//! stays untouched for the whole frame.

use std::sync::Arc;

use crossbeam::atomic::AtomicCell;

use crate::colormap::Colormap;
use crate::kernel::FractalParameters;

/// A last-write-wins mailbox holding at most one value.
pub struct SnapshotCell<T> {
    slot: AtomicCell<Option<Box<T>>>,
}

impl<T> Default for SnapshotCell<T> {
    fn default() -> Self {
        SnapshotCell {
            slot: AtomicCell::new(None),
        }
    }
}

impl<T> SnapshotCell<T> {
    /// An empty cell.
    pub fn new() -> Self {
        SnapshotCell::default()
    }

    /// True when swaps are single atomic pointer operations on this
    /// platform.
    pub fn is_lock_free() -> bool {
        AtomicCell::<Option<Box<T>>>::is_lock_free()
    }

    /// Replaces the pending value.  Returns true if an unread value was
    /// dropped.
    pub fn publish(&self, value: T) -> bool {
        self.slot.swap(Some(Box::new(value))).is_some()
    }

    /// Takes the pending value, leaving the cell empty.
    pub fn take(&self) -> Option<T> {
        self.slot.take().map(|boxed| *boxed)
    }
}

/// The cells a producer writes and the render loop reads.
#[derive(Default)]
pub struct SharedInputs {
    /// Pending fractal parameters.
    pub parameters: SnapshotCell<FractalParameters>,
    /// Pending colormap.
    pub colormap: SnapshotCell<Colormap>,
}

impl SharedInputs {
    /// Empty cells, ready to share.
    pub fn new() -> Arc<Self> {
        Arc::new(SharedInputs::default())
    }
}

/// What changed in the last `LiveInputs::refresh`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Refresh {
    /// New parameters arrived.
    pub parameters: bool,
    /// A new colormap arrived.
    pub colormap: bool,
}

/// The render loop's view of the live inputs.
pub struct LiveInputs {
    shared: Arc<SharedInputs>,
    parameters: FractalParameters,
    colormap: Colormap,
}

impl LiveInputs {
    /// Starts from the given values until the producer sends others.
    pub fn new(shared: Arc<SharedInputs>, parameters: FractalParameters, colormap: Colormap) -> Self {
        LiveInputs {
            shared,
            parameters,
            colormap,
        }
    }

    /// The producer's end.
    pub fn shared(&self) -> &Arc<SharedInputs> {
        &self.shared
    }

    /// Parameters for the current frame.
    pub fn parameters(&self) -> &FractalParameters {
        &self.parameters
    }

    /// Colormap for the current frame.
    pub fn colormap(&self) -> &Colormap {
        &self.colormap
    }

    /// Pulls in anything published since the last call.
    pub fn refresh(&mut self) -> Refresh {
        let mut refresh = Refresh::default();
        if let Some(parameters) = self.shared.parameters.take() {
            self.parameters = parameters;
            refresh.parameters = true;
        }
        if let Some(colormap) = self.shared.colormap.take() {
            self.colormap = colormap;
            refresh.colormap = true;
        }
        refresh
    }
}
