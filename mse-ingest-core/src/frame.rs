// mse-ingest-core
// Copyright (c) 2019-2026 The Project MSE Ingest Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `frame` module defines `Frame`, the reference-counted, largely
//! immutable coded frame shared between `Range`s, the track buffer, and
//! callers reading out buffered frames.
//!
//! A `Frame` is frozen at construction with one exception: the append-window
//! partial-trimming step (§4.1 step 7) may shrink a frame's effective PTS,
//! DTS, and duration in place once, after it has already been shared behind
//! an `Arc`. That narrow exception is modeled with interior-mutable atomics
//! rather than a `Mutex`, so ordinary reads stay lock-free.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use crate::units::{Duration, Timestamp};

/// Which kind of media a `Frame` carries. Determines which `ConfigTable`
/// variant and trimming/splice rules (§4.1, §4.2.4) apply.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
    Text,
}

/// Audio discard padding, in ticks, to drop from the start/end of a decoded
/// frame's output. Carried through unmodified; the core never interprets it
/// beyond propagating it on trimmed/spliced frames.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DiscardPadding {
    pub front: Duration,
    pub back: Duration,
}

impl DiscardPadding {
    pub const NONE: DiscardPadding = DiscardPadding { front: Duration::ZERO, back: Duration::ZERO };
}

/// The frozen fields of a `Frame`, plus the narrow interior-mutable slice
/// used by partial append-window trimming.
#[derive(Debug)]
struct FrameData {
    track_id: u32,
    kind: TrackKind,
    config_id: u32,
    // Stored as raw ticks so trimming can use atomic stores; accessors wrap
    // them back into `Timestamp`/`Duration`.
    pts_ticks: AtomicI64,
    dts_ticks: AtomicI64,
    duration_ticks: AtomicU64,
    is_keyframe: bool,
    discard_padding: DiscardPadding,
    payload: Vec<u8>,
    /// A decode-only predecessor primed ahead of this frame when playback
    /// starts mid-window (§4.1 step 7, §4.2.2 "preroll dispatch").
    preroll: Option<Frame>,
    /// Pre-splice frames captured from previously buffered data at this
    /// frame's PTS, crossfaded against this frame's payload (§4.2.4).
    splice_payload: Vec<Frame>,
}

/// A single coded frame, and the unit of storage in a `Range`'s frame list.
///
/// `Frame` is cheap to clone (an `Arc` bump) and safe to share across the
/// append-side and read-side of a `SourceBufferStream` guarded by its
/// `Mutex` (§5).
#[derive(Clone, Debug)]
pub struct Frame(Arc<FrameData>);

impl Frame {
    pub fn track_id(&self) -> u32 {
        self.0.track_id
    }

    pub fn kind(&self) -> TrackKind {
        self.0.kind
    }

    pub fn config_id(&self) -> u32 {
        self.0.config_id
    }

    pub fn pts(&self) -> Timestamp {
        Timestamp::new(self.0.pts_ticks.load(Ordering::Acquire))
    }

    pub fn dts(&self) -> Timestamp {
        Timestamp::new(self.0.dts_ticks.load(Ordering::Acquire))
    }

    pub fn duration(&self) -> Duration {
        Duration::new(self.0.duration_ticks.load(Ordering::Acquire))
    }

    /// The frame's presentation interval end, `pts + duration`.
    pub fn presentation_end(&self) -> Timestamp {
        self.pts().saturating_add(self.duration())
    }

    pub fn is_keyframe(&self) -> bool {
        self.0.is_keyframe
    }

    pub fn discard_padding(&self) -> DiscardPadding {
        self.0.discard_padding
    }

    pub fn payload(&self) -> &[u8] {
        &self.0.payload
    }

    pub fn payload_len(&self) -> usize {
        self.0.payload.len()
    }

    pub fn preroll(&self) -> Option<&Frame> {
        self.0.preroll.as_ref()
    }

    pub fn has_preroll(&self) -> bool {
        self.0.preroll.is_some()
    }

    pub fn splice_payload(&self) -> &[Frame] {
        &self.0.splice_payload
    }

    pub fn has_splice_payload(&self) -> bool {
        !self.0.splice_payload.is_empty()
    }

    /// `true` if two `Arc`s refer to the very same frame allocation. Used by
    /// the track buffer to detect when the read head has caught up to a
    /// frame already delivered via the splice path (§4.2.3).
    pub fn is_same_allocation(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Shrink this frame's PTS forward to `new_pts`, shortening its duration
    /// by the same amount, and set discard-front padding to
    /// `new_pts - old_pts`. Used for partial append-window trimming of a
    /// frame that starts before `append_window_start` (§4.1 step 7, first
    /// bullet).
    ///
    /// No-op if `new_pts` does not actually advance the frame's start.
    pub fn trim_start_to(&self, new_pts: Timestamp) {
        let old_pts = self.pts();
        if new_pts <= old_pts {
            return;
        }
        let shrink = new_pts.delta(old_pts).max(0) as u64;
        let old_dur = self.0.duration_ticks.load(Ordering::Acquire);
        let new_dur = old_dur.saturating_sub(shrink);
        self.0.pts_ticks.store(new_pts.ticks(), Ordering::Release);
        self.0.duration_ticks.store(new_dur, Ordering::Release);
        // DTS is trimmed by the same amount as PTS so dts <= pts continues
        // to hold after a start trim (Design Notes: "logged, not rejected"
        // covers the inverted case only when it arises from trimming, not
        // DTS exceeding PTS on an untrimmed frame).
        let old_dts = self.dts();
        self.0.dts_ticks.store(old_dts.saturating_add(Duration::new(shrink)).ticks(), Ordering::Release);
    }

}

/// Marker types for `FrameBuilder`'s typestate, mirroring
/// `symphonia_core::packet::PacketBuilder`'s `Has*`/`No*` pattern so that a
/// `Frame` can never be built missing a required field.
pub mod builder {
    pub struct NoTrackId;
    pub struct HasTrackId(pub(super) u32);

    pub struct NoTimestamps;
    pub struct HasTimestamps {
        pub(super) pts: super::Timestamp,
        pub(super) dts: super::Timestamp,
        pub(super) duration: super::Duration,
    }

    pub struct NoPayload;
    pub struct HasPayload(pub(super) Vec<u8>);
}

use builder::{HasPayload, HasTimestamps, HasTrackId, NoPayload, NoTimestamps, NoTrackId};

/// A typestate builder for `Frame`. Track id, timestamps, and payload must
/// each be supplied exactly once before `build()` becomes callable; this is
/// enforced at compile time rather than by a runtime check, following
/// `symphonia_core::packet::PacketBuilder`.
pub struct FrameBuilder<T, D, B> {
    track: T,
    timestamps: D,
    payload: B,
    kind: TrackKind,
    config_id: u32,
    is_keyframe: bool,
    discard_padding: DiscardPadding,
    preroll: Option<Frame>,
    splice_payload: Vec<Frame>,
}

impl FrameBuilder<NoTrackId, NoTimestamps, NoPayload> {
    pub fn new(kind: TrackKind) -> Self {
        FrameBuilder {
            track: NoTrackId,
            timestamps: NoTimestamps,
            payload: NoPayload,
            kind,
            config_id: 0,
            is_keyframe: false,
            discard_padding: DiscardPadding::NONE,
            preroll: None,
            splice_payload: Vec::new(),
        }
    }
}

impl<D, B> FrameBuilder<NoTrackId, D, B> {
    pub fn track_id(self, track_id: u32) -> FrameBuilder<HasTrackId, D, B> {
        FrameBuilder {
            track: HasTrackId(track_id),
            timestamps: self.timestamps,
            payload: self.payload,
            kind: self.kind,
            config_id: self.config_id,
            is_keyframe: self.is_keyframe,
            discard_padding: self.discard_padding,
            preroll: self.preroll,
            splice_payload: self.splice_payload,
        }
    }
}

impl<T, B> FrameBuilder<T, NoTimestamps, B> {
    pub fn timestamps(
        self,
        pts: Timestamp,
        dts: Timestamp,
        duration: Duration,
    ) -> FrameBuilder<T, HasTimestamps, B> {
        FrameBuilder {
            track: self.track,
            timestamps: HasTimestamps { pts, dts, duration },
            payload: self.payload,
            kind: self.kind,
            config_id: self.config_id,
            is_keyframe: self.is_keyframe,
            discard_padding: self.discard_padding,
            preroll: self.preroll,
            splice_payload: self.splice_payload,
        }
    }
}

impl<T, D> FrameBuilder<T, D, NoPayload> {
    pub fn payload(self, payload: Vec<u8>) -> FrameBuilder<T, D, HasPayload> {
        FrameBuilder {
            track: self.track,
            timestamps: self.timestamps,
            payload: HasPayload(payload),
            kind: self.kind,
            config_id: self.config_id,
            is_keyframe: self.is_keyframe,
            discard_padding: self.discard_padding,
            preroll: self.preroll,
            splice_payload: self.splice_payload,
        }
    }
}

impl<T, D, B> FrameBuilder<T, D, B> {
    pub fn config_id(mut self, config_id: u32) -> Self {
        self.config_id = config_id;
        self
    }

    pub fn keyframe(mut self, is_keyframe: bool) -> Self {
        self.is_keyframe = is_keyframe;
        self
    }

    pub fn discard_padding(mut self, discard_padding: DiscardPadding) -> Self {
        self.discard_padding = discard_padding;
        self
    }

    pub fn preroll(mut self, preroll: Frame) -> Self {
        self.preroll = Some(preroll);
        self
    }

    pub fn splice_payload(mut self, splice_payload: Vec<Frame>) -> Self {
        self.splice_payload = splice_payload;
        self
    }
}

impl FrameBuilder<HasTrackId, HasTimestamps, HasPayload> {
    pub fn build(self) -> Frame {
        Frame(Arc::new(FrameData {
            track_id: self.track.0,
            kind: self.kind,
            config_id: self.config_id,
            pts_ticks: AtomicI64::new(self.timestamps.pts.ticks()),
            dts_ticks: AtomicI64::new(self.timestamps.dts.ticks()),
            duration_ticks: AtomicU64::new(self.timestamps.duration.ticks()),
            is_keyframe: self.is_keyframe,
            discard_padding: self.discard_padding,
            payload: self.payload.0,
            preroll: self.preroll,
            splice_payload: self.splice_payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_frame(pts: i64, dur: u64, keyframe: bool) -> Frame {
        FrameBuilder::new(TrackKind::Video)
            .track_id(1)
            .timestamps(Timestamp::new(pts), Timestamp::new(pts), Duration::new(dur))
            .payload(vec![0xAA; 4])
            .keyframe(keyframe)
            .build()
    }

    #[test]
    fn builder_produces_expected_fields() {
        let frame = build_frame(100, 50, true);
        assert_eq!(frame.pts(), Timestamp::new(100));
        assert_eq!(frame.dts(), Timestamp::new(100));
        assert_eq!(frame.duration(), Duration::new(50));
        assert_eq!(frame.presentation_end(), Timestamp::new(150));
        assert!(frame.is_keyframe());
        assert_eq!(frame.payload_len(), 4);
    }

    #[test]
    fn trim_start_to_shrinks_pts_and_duration() {
        let frame = build_frame(100, 50, true);
        frame.trim_start_to(Timestamp::new(120));
        assert_eq!(frame.pts(), Timestamp::new(120));
        assert_eq!(frame.duration(), Duration::new(30));
        assert_eq!(frame.dts(), Timestamp::new(120));
    }

    #[test]
    fn trim_start_to_is_noop_when_not_advancing() {
        let frame = build_frame(100, 50, true);
        frame.trim_start_to(Timestamp::new(90));
        assert_eq!(frame.pts(), Timestamp::new(100));
        assert_eq!(frame.duration(), Duration::new(50));
    }

    #[test]
    fn cloned_frame_shares_allocation() {
        let frame = build_frame(100, 50, true);
        let clone = frame.clone();
        assert!(frame.is_same_allocation(&clone));
        clone.trim_start_to(Timestamp::new(120));
        // Trimming through the clone is visible through the original, since
        // both share the same underlying atomics.
        assert_eq!(frame.pts(), Timestamp::new(120));
        assert_eq!(frame.duration(), Duration::new(30));
    }
}
