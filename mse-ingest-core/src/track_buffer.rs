// mse-ingest-core
// Copyright (c) 2019-2026 The Project MSE Ingest Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `track_buffer` module implements the transient queue of frames
//! displaced from a `SourceBufferStream`'s selected range by an overlapping
//! append (§4.2.1/§4.2.2, glossary "Track buffer").
//!
//! This is distinct from `frame_processor::MseTrackBuffer`, which is the
//! Frame Processor's per-track *append-side* bookkeeping; this type is the
//! Source Buffer Stream's *read-side* displaced-frame queue.

use std::collections::VecDeque;

use crate::frame::Frame;
use crate::units::Timestamp;

/// Holds frames pulled out of the selected range by an overlapping append,
/// so that reads already in flight can continue returning the original
/// sequence up to the next keyframe the new data provides.
#[derive(Debug, Default)]
pub struct TrackBuffer {
    frames: VecDeque<Frame>,
}

impl TrackBuffer {
    pub fn new() -> Self {
        TrackBuffer { frames: VecDeque::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Appends frames displaced by `remove_internal`'s truncation, in their
    /// original DTS order. Callers must not append frames at or before the
    /// current back's DTS.
    pub fn extend_from_removal(&mut self, removed: impl IntoIterator<Item = Frame>) {
        self.frames.extend(removed);
    }

    pub fn front_timestamp(&self) -> Option<Timestamp> {
        self.frames.front().map(|f| f.dts())
    }

    pub fn front_config_id(&self) -> Option<u32> {
        self.frames.front().map(|f| f.config_id())
    }

    pub fn front(&self) -> Option<&Frame> {
        self.frames.front()
    }

    /// Pops and returns the front frame, updating nothing else; the caller
    /// is responsible for `last_output_DTS` bookkeeping (§4.2.2).
    pub fn pop_front(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    /// Prunes frames whose DTS is at-or-past `boundary`, per §4.2.1's final
    /// step: once a range provides fresh data at or after the track
    /// buffer's displaced frames, the track buffer's job of "bridging the
    /// gap" is done for that portion.
    pub fn prune_at_or_after(&mut self, boundary: Timestamp) {
        while let Some(back) = self.frames.back() {
            if back.dts() >= boundary {
                self.frames.pop_back();
            }
            else {
                break;
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }
}
