// mse-ingest-core
// Copyright (c) 2019-2026 The Project MSE Ingest Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `range` module implements `Range`, a contiguous run of buffered
//! frames ordered by decode timestamp, with a keyframe index that supports
//! GOP-aligned seek, split, truncate, and garbage collection.
//!
//! A `SourceBufferStream` holds a sorted list of non-overlapping `Range`s.
//! `Range` itself never communicates with other ranges; `SourceBufferStream`
//! is responsible for merging, splitting, and splicing between them (§4.2).

use std::collections::BTreeMap;

use crate::frame::Frame;
use crate::units::{Duration, Timestamp};

/// A contiguous, gapless-enough run of frames in decode timestamp order.
///
/// "Gapless enough" means every adjacent pair of frames is within
/// `fudge_room` of abutting; `SourceBufferStream` decides where range
/// boundaries fall when appending (§4.2.1/§4.2.2).
#[derive(Debug)]
pub struct Range {
    frames: Vec<Frame>,
    /// Maps a keyframe's DTS to its index in `frames`, for O(log n) seek and
    /// split. An index-base is subtracted from physical indices so that
    /// front-truncation (`delete_gop_from_front`) never has to rewrite every
    /// entry: only the base advances.
    keyframe_index: BTreeMap<Timestamp, usize>,
    /// Offset such that frame `keyframe_index[ts]` lives at
    /// `frames[keyframe_index[ts] - index_base]`.
    index_base: usize,
    /// The read cursor, as a physical index into `frames`, or `None` if this
    /// range has not been seeked into (`HasNextBufferPosition() == false`).
    next_buffer_index: Option<usize>,
}

impl Range {
    /// Creates a new range from `frames`, which must be non-empty and start
    /// with a keyframe.
    pub fn new(frames: Vec<Frame>) -> Self {
        debug_assert!(!frames.is_empty(), "a Range cannot be created empty");
        debug_assert!(frames[0].is_keyframe(), "a Range must start with a keyframe");
        let mut range =
            Range { frames, keyframe_index: BTreeMap::new(), index_base: 0, next_buffer_index: None };
        range.reindex_keyframes();
        range
    }

    fn reindex_keyframes(&mut self) {
        self.keyframe_index.clear();
        for (i, frame) in self.frames.iter().enumerate() {
            if frame.is_keyframe() {
                self.keyframe_index.insert(frame.dts(), i + self.index_base);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn start_timestamp(&self) -> Timestamp {
        self.frames.first().expect("range is never empty while alive").dts()
    }

    pub fn end_timestamp(&self) -> Timestamp {
        self.frames.last().expect("range is never empty while alive").dts()
    }

    /// The end of the buffered region, i.e. `end_timestamp + last frame's
    /// duration`. This is what `buffered()`/`buffered_duration()` report,
    /// as distinct from `end_timestamp()` which is the last frame's DTS.
    pub fn buffered_end_timestamp(&self) -> Timestamp {
        let last = self.frames.last().expect("range is never empty while alive");
        last.presentation_end()
    }

    /// `true` if a frame starting at `timestamp` belongs in this range, i.e.
    /// falls within `[start, buffered_end + fudge_room]`.
    pub fn belongs_to_range(&self, timestamp: Timestamp, fudge_room: Duration) -> bool {
        timestamp >= self.start_timestamp() && timestamp <= self.buffered_end_timestamp().saturating_add(fudge_room)
    }

    /// `true` if `other`'s first frame starts within `fudge_room` of this
    /// range's last frame, so `other`'s frames may be appended directly.
    pub fn can_append_range_to_end(&self, other: &Range, fudge_room: Duration) -> bool {
        other.start_timestamp() <= self.buffered_end_timestamp().saturating_add(fudge_room)
    }

    /// Appends `frames` (already known to belong at the end of this range)
    /// and updates the keyframe index incrementally.
    pub fn append_frames_to_end(&mut self, frames: impl IntoIterator<Item = Frame>) {
        for frame in frames {
            let idx = self.frames.len() + self.index_base;
            if frame.is_keyframe() {
                self.keyframe_index.insert(frame.dts(), idx);
            }
            self.frames.push(frame);
        }
    }

    /// Appends all of `other`'s frames to the end of this range, consuming
    /// `other`. If `transfer_read_position` is set and `other` had an active
    /// read cursor, it is transferred onto this range at the equivalent
    /// frame.
    pub fn append_range_to_end(&mut self, other: Range, transfer_read_position: bool) {
        let other_cursor_frame =
            if transfer_read_position { other.next_buffer_index.map(|i| other.frames[i].dts()) } else { None };

        self.append_frames_to_end(other.frames);

        if let Some(dts) = other_cursor_frame {
            self.next_buffer_index = self.frames.iter().position(|f| f.dts() == dts);
        }
    }

    /// Splits this range at the first keyframe at-or-after (`is_exclusive =
    /// false`) or strictly after (`is_exclusive = true`) `timestamp`,
    /// returning a new `Range` built from that keyframe onward, and leaving
    /// this range truncated to what precedes it. Returns `None` (and leaves
    /// this range unmodified) if no such keyframe exists.
    pub fn split(&mut self, timestamp: Timestamp, is_exclusive: bool) -> Option<Range> {
        let split_index = self.find_keyframe_index_at_or_after(timestamp, is_exclusive)?;
        let physical = split_index - self.index_base;
        if physical == 0 {
            return None;
        }

        let tail = self.frames.split_off(physical);
        let had_cursor_in_tail = self.next_buffer_index.map_or(false, |i| i >= physical);

        let mut new_range = Range::new(tail);
        if had_cursor_in_tail {
            let old_cursor = self.next_buffer_index.unwrap();
            new_range.next_buffer_index = Some(old_cursor - physical);
            self.next_buffer_index = None;
        }

        self.reindex_keyframes();
        Some(new_range)
    }

    fn find_keyframe_index_at_or_after(&self, timestamp: Timestamp, is_exclusive: bool) -> Option<usize> {
        let bound = if is_exclusive {
            std::ops::Bound::Excluded(timestamp)
        }
        else {
            std::ops::Bound::Included(timestamp)
        };
        self.keyframe_index.range((bound, std::ops::Bound::Unbounded)).next().map(|(_, &idx)| idx)
    }

    /// Returns the timestamp of the keyframe at-or-after `timestamp`, or
    /// `None` if no such keyframe exists in this range.
    pub fn next_keyframe_timestamp(&self, timestamp: Timestamp) -> Option<Timestamp> {
        if timestamp < self.start_timestamp() {
            return Some(self.start_timestamp());
        }
        self.keyframe_index.range(timestamp..).next().map(|(&ts, _)| ts)
    }

    /// Returns the timestamp of the closest keyframe at-or-before
    /// `timestamp`, or `None` if there is none or `timestamp` is outside
    /// this range.
    pub fn keyframe_before_timestamp(&self, timestamp: Timestamp) -> Option<Timestamp> {
        if timestamp < self.start_timestamp() || timestamp > self.end_timestamp() {
            return None;
        }
        self.keyframe_index.range(..=timestamp).next_back().map(|(&ts, _)| ts)
    }

    /// Returns the start timestamp of this range's last GOP, i.e. the GOP
    /// `delete_gop_from_back` would remove next.
    pub fn last_keyframe_timestamp(&self) -> Option<Timestamp> {
        self.keyframe_index.keys().next_back().copied()
    }

    /// `true` if this range contains enough data to seek to `timestamp`,
    /// i.e. has a keyframe at-or-before it.
    pub fn can_seek_to(&self, timestamp: Timestamp) -> bool {
        self.keyframe_before_timestamp(timestamp).is_some()
    }

    /// Seeks the read cursor to the frame at `timestamp`, which must equal
    /// some keyframe's timestamp already validated by `can_seek_to`.
    pub fn seek(&mut self, timestamp: Timestamp) {
        if let Some(physical) = self.frames.iter().position(|f| f.dts() == timestamp) {
            self.next_buffer_index = Some(physical);
        }
    }

    pub fn seek_to_start(&mut self) {
        self.next_buffer_index = Some(0);
    }

    pub fn reset_read_position(&mut self) {
        self.next_buffer_index = None;
    }

    pub fn has_read_position(&self) -> bool {
        self.next_buffer_index.is_some()
    }

    /// The timestamp of the frame that will be returned by `next_frame()`,
    /// if any.
    pub fn next_frame_timestamp(&self) -> Option<Timestamp> {
        self.next_buffer_index.and_then(|i| self.frames.get(i)).map(|f| f.dts())
    }

    pub fn has_next_frame(&self) -> bool {
        self.next_buffer_index.map_or(false, |i| i < self.frames.len())
    }

    /// Returns the frame that `next_frame()` would return, without
    /// advancing the read cursor.
    pub fn peek_next_frame(&self) -> Option<Frame> {
        self.next_buffer_index.and_then(|i| self.frames.get(i)).cloned()
    }

    /// The config-version id of the frame `next_frame()` would return.
    pub fn next_config_id(&self) -> Option<u32> {
        self.peek_next_frame().map(|f| f.config_id())
    }

    /// `true` if a frame with decode timestamp `dts` and keyframe-ness
    /// `is_keyframe` is "next in sequence" after this range's last frame:
    /// within `fudge_room` of the end, and if exactly at the same DTS as
    /// the last frame, only permitted in the (keyframe → non-keyframe) or
    /// (non-keyframe → non-keyframe) direction (§4.2.1 monotonicity rule).
    pub fn is_next_in_sequence(&self, dts: Timestamp, is_keyframe: bool, fudge_room: Duration) -> bool {
        let last = match self.frames.last() {
            Some(f) => f,
            None => return true,
        };
        if dts < last.dts() {
            return false;
        }
        if dts == last.dts() {
            return last.is_keyframe() || !is_keyframe;
        }
        dts <= last.dts().saturating_add(fudge_room)
    }

    /// `true` if this range's buffered timespan completely contains
    /// `other`'s.
    pub fn completely_overlaps(&self, other: &Range) -> bool {
        self.start_timestamp() <= other.start_timestamp() && self.buffered_end_timestamp() >= other.buffered_end_timestamp()
    }

    /// `true` if the end of this range overlaps the beginning of `other`.
    pub fn end_overlaps(&self, other: &Range) -> bool {
        other.start_timestamp() > self.start_timestamp()
            && other.start_timestamp() < self.buffered_end_timestamp()
            && other.buffered_end_timestamp() > self.buffered_end_timestamp()
    }

    /// Collects every frame whose DTS lies in `[start, end)`, for buffered-
    /// range reporting and test assertions.
    pub fn frames_in_range(&self, start: Timestamp, end: Timestamp) -> Vec<Frame> {
        self.frames.iter().filter(|f| f.dts() >= start && f.dts() < end).cloned().collect()
    }

    /// Moves the read cursor to the first frame at-or-after `ts`, not
    /// necessarily a keyframe. Used to resume reads from a range once the
    /// track buffer that was bridging a gap has drained (§4.2.2).
    pub fn seek_ahead_to_frame(&mut self, ts: Timestamp) -> bool {
        match self.frames.iter().position(|f| f.dts() >= ts) {
            Some(physical) => {
                self.next_buffer_index = Some(physical);
                true
            }
            None => false,
        }
    }

    /// `true` if the GOP containing the read cursor is the first GOP in the
    /// range (§4.2.5, used to decide whether deleting the front GOP would
    /// disturb playback).
    pub fn first_gop_contains_read_position(&self) -> bool {
        match self.next_buffer_index {
            Some(i) => {
                let first_gop_end = self.second_keyframe_physical_index().unwrap_or(self.frames.len());
                i < first_gop_end
            }
            None => false,
        }
    }

    pub fn last_gop_contains_read_position(&self) -> bool {
        match self.next_buffer_index {
            Some(i) => {
                let last_gop_start = self.last_keyframe_physical_index().unwrap_or(0);
                i >= last_gop_start
            }
            None => false,
        }
    }

    fn second_keyframe_physical_index(&self) -> Option<usize> {
        let mut keyframes = self.keyframe_index.values();
        keyframes.next();
        keyframes.next().map(|&idx| idx - self.index_base)
    }

    fn last_keyframe_physical_index(&self) -> Option<usize> {
        self.keyframe_index.values().next_back().map(|&idx| idx - self.index_base)
    }

    /// Returns the next frame in decode order and advances the cursor, or
    /// `None` if the cursor has caught up to the end of buffered data.
    pub fn next_frame(&mut self) -> Option<Frame> {
        let i = self.next_buffer_index?;
        let frame = self.frames.get(i)?.clone();
        self.next_buffer_index = Some(i + 1);
        Some(frame)
    }

    /// Deletes and returns the first GOP (from the first frame through, but
    /// not including, the second keyframe) as a `(deleted_frames,
    /// bytes_freed)` pair. Used by the garbage collector (§4.2.5) and range
    /// front-truncation.
    pub fn delete_gop_from_front(&mut self) -> (Vec<Frame>, u64) {
        let split_at = self.second_keyframe_physical_index().unwrap_or(self.frames.len());
        let deleted: Vec<Frame> = self.frames.drain(0..split_at).collect();
        let bytes_freed = deleted.iter().map(|f| f.payload_len() as u64).sum();

        self.index_base += split_at;
        if let Some(i) = self.next_buffer_index {
            self.next_buffer_index = i.checked_sub(split_at);
        }
        self.reindex_keyframes();
        (deleted, bytes_freed)
    }

    /// Deletes and returns the last GOP (from the last keyframe through the
    /// end of the range).
    pub fn delete_gop_from_back(&mut self) -> (Vec<Frame>, u64) {
        let split_at = self.last_keyframe_physical_index().unwrap_or(0);
        let deleted: Vec<Frame> = self.frames.drain(split_at..).collect();
        let bytes_freed = deleted.iter().map(|f| f.payload_len() as u64).sum();

        if let Some(i) = self.next_buffer_index {
            if i >= split_at {
                self.next_buffer_index = None;
            }
        }
        self.reindex_keyframes();
        (deleted, bytes_freed)
    }

    /// Deletes all frames starting at `timestamp` (exclusive if
    /// `is_exclusive`, inclusive otherwise) through the end of the range.
    /// Returns the deleted frames; the caller is responsible for discarding
    /// this range entirely if it becomes empty.
    pub fn truncate_at(&mut self, timestamp: Timestamp, is_exclusive: bool) -> Vec<Frame> {
        let split_physical = self
            .frames
            .iter()
            .position(|f| if is_exclusive { f.dts() > timestamp } else { f.dts() >= timestamp })
            .unwrap_or(self.frames.len());

        let deleted: Vec<Frame> = self.frames.drain(split_physical..).collect();
        if let Some(i) = self.next_buffer_index {
            if i >= split_physical {
                self.next_buffer_index = None;
            }
        }
        self.reindex_keyframes();
        deleted
    }

    /// Consumes this range, returning every frame it held.
    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    /// Total payload bytes buffered in this range.
    pub fn size_in_bytes(&self) -> u64 {
        self.frames.iter().map(|f| f.payload_len() as u64).sum()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameBuilder, TrackKind};

    fn frame(dts: i64, dur: u64, keyframe: bool) -> Frame {
        FrameBuilder::new(TrackKind::Video)
            .track_id(1)
            .timestamps(Timestamp::new(dts), Timestamp::new(dts), Duration::new(dur))
            .payload(vec![0u8; 10])
            .keyframe(keyframe)
            .build()
    }

    fn sample_range() -> Range {
        // Two GOPs: [0,10,20) keyframe at 0, and [30,40) keyframe at 30.
        Range::new(vec![
            frame(0, 10, true),
            frame(10, 10, false),
            frame(20, 10, false),
            frame(30, 10, true),
            frame(40, 10, false),
        ])
    }

    #[test]
    fn start_and_end_timestamps() {
        let range = sample_range();
        assert_eq!(range.start_timestamp(), Timestamp::new(0));
        assert_eq!(range.end_timestamp(), Timestamp::new(40));
        assert_eq!(range.buffered_end_timestamp(), Timestamp::new(50));
    }

    #[test]
    fn keyframe_queries() {
        let range = sample_range();
        assert_eq!(range.next_keyframe_timestamp(Timestamp::new(5)), Some(Timestamp::new(30)));
        assert_eq!(range.keyframe_before_timestamp(Timestamp::new(25)), Some(Timestamp::new(0)));
        assert_eq!(range.keyframe_before_timestamp(Timestamp::new(100)), None);
        assert!(range.can_seek_to(Timestamp::new(15)));
    }

    #[test]
    fn split_moves_trailing_gop_into_new_range() {
        let mut range = sample_range();
        let tail = range.split(Timestamp::new(30), false).expect("keyframe exists at 30");
        assert_eq!(range.len(), 3);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail.start_timestamp(), Timestamp::new(30));
    }

    #[test]
    fn split_returns_none_without_a_later_keyframe() {
        let mut range = sample_range();
        assert!(range.split(Timestamp::new(35), false).is_none());
        assert_eq!(range.len(), 5);
    }

    #[test]
    fn seek_and_next_frame_walk_in_order() {
        let mut range = sample_range();
        range.seek(Timestamp::new(10));
        assert_eq!(range.next_frame().unwrap().dts(), Timestamp::new(10));
        assert_eq!(range.next_frame().unwrap().dts(), Timestamp::new(20));
        assert!(range.has_next_frame());
    }

    #[test]
    fn delete_gop_from_front_shifts_index_base() {
        let mut range = sample_range();
        let (deleted, bytes) = range.delete_gop_from_front();
        assert_eq!(deleted.len(), 3);
        assert_eq!(bytes, 30);
        assert_eq!(range.len(), 2);
        assert_eq!(range.start_timestamp(), Timestamp::new(30));
        assert!(range.can_seek_to(Timestamp::new(35)));
    }

    #[test]
    fn delete_gop_from_back_removes_last_keyframe_group() {
        let mut range = sample_range();
        let (deleted, bytes) = range.delete_gop_from_back();
        assert_eq!(deleted.len(), 2);
        assert_eq!(bytes, 20);
        assert_eq!(range.len(), 3);
        assert_eq!(range.end_timestamp(), Timestamp::new(20));
    }

    #[test]
    fn truncate_at_clears_read_position_when_cursor_deleted() {
        let mut range = sample_range();
        range.seek(Timestamp::new(30));
        let deleted = range.truncate_at(Timestamp::new(20), false);
        assert_eq!(deleted.len(), 3);
        assert!(!range.has_read_position());
    }

    #[test]
    fn append_frames_to_end_updates_keyframe_index() {
        let mut range = sample_range();
        range.append_frames_to_end(vec![frame(50, 10, true)]);
        assert_eq!(range.len(), 6);
        assert!(range.can_seek_to(Timestamp::new(55)));
    }

    #[test]
    fn is_next_in_sequence_respects_fudge_room_and_keyframe_rule() {
        let range = sample_range();
        let fudge = Duration::new(25);
        assert!(range.is_next_in_sequence(Timestamp::new(60), true, fudge));
        assert!(!range.is_next_in_sequence(Timestamp::new(200), true, fudge));
        // Same DTS as last frame (40, non-keyframe): a later keyframe at the
        // same instant is rejected, a later non-keyframe is accepted.
        assert!(!range.is_next_in_sequence(Timestamp::new(40), true, fudge));
        assert!(range.is_next_in_sequence(Timestamp::new(40), false, fudge));
    }

    #[test]
    fn completely_overlaps_detects_full_containment() {
        let outer = sample_range();
        let inner = Range::new(vec![frame(10, 10, true), frame(20, 10, false)]);
        assert!(outer.completely_overlaps(&inner));
        assert!(!inner.completely_overlaps(&outer));
    }

    #[test]
    fn frames_in_range_filters_by_half_open_interval() {
        let range = sample_range();
        let selected = range.frames_in_range(Timestamp::new(10), Timestamp::new(30));
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].dts(), Timestamp::new(10));
        assert_eq!(selected[1].dts(), Timestamp::new(20));
    }
}
