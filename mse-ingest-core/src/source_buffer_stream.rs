// mse-ingest-core
// Copyright (c) 2019-2026 The Project MSE Ingest Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `source_buffer_stream` module implements `SourceBufferStream`, the
//! per-track buffered-range container: insertion with overlap resolution,
//! the read state machine with config-change and splice/preroll dispatch,
//! seeking, and memory-bounded garbage collection (§4.2).
//!
//! Everything here is single-threaded; the `Mutex<SourceBufferStream>`
//! that makes it safe to share between an append thread and a read thread
//! lives one level up, in whatever owns a track's stream (§5).

use std::collections::VecDeque;

use log::{debug, trace, warn};

use crate::config::{AudioConfig, ConfigTable, SourceBufferStreamOptions, TextConfig, VideoConfig};
use crate::errors::{self, Result};
use crate::frame::{Frame, FrameBuilder, TrackKind};
use crate::track_buffer::TrackBuffer;
use crate::units::{Duration, PresentationDuration, Timestamp};

use crate::range::Range;

/// A default interbuffer distance assumed before any frame has been
/// appended, matching Chromium's `kDefaultBufferDurationInMs`.
const DEFAULT_INTERBUFFER_DISTANCE: Duration = Duration::new(125);

/// The window, at the very start of the timeline, within which a seek
/// target "close enough" to zero snaps to the first range's start even if
/// it doesn't exactly match (§4.2.3).
const SEEK_TO_START_FUDGE_ROOM: Duration = Duration::new(1000);

/// The outcome of `get_next_buffer`.
#[derive(Debug)]
pub enum ReadStatus {
    /// A frame is ready.
    Success(Frame),
    /// The consumer must fetch the new current config before the next read.
    ConfigChange,
    /// Not enough buffered data to continue; the caller should wait for
    /// more `append`s.
    NeedBuffer,
    /// No more data will ever arrive.
    EndOfStream,
    /// The in-flight read was cancelled by `abort_reads`.
    Aborted,
}

/// One step of an audio splice's pre-splice frame walk (§4.2.4).
#[derive(Debug)]
enum SpliceStep {
    Deliver(Frame),
    /// Emit one `ConfigChange`; the given config id becomes current once
    /// acknowledged.
    ConfigChange(u32),
}

/// Tracks an in-progress multi-call dispatch of a splice or preroll frame.
#[derive(Debug)]
enum PendingBuffer {
    Splice { steps: VecDeque<SpliceStep>, final_frame: Frame },
    Preroll { frame: Frame, delivered_preroll: bool },
}

/// The per-track buffered-range container described by §4.2.
pub struct SourceBufferStream {
    kind: TrackKind,
    options: SourceBufferStreamOptions,
    ranges: Vec<Range>,
    configs: ConfigTable,
    current_config_index: u32,
    append_config_index: u32,
    pending_config_to_adopt: Option<u32>,
    pending_seek: Option<Timestamp>,
    end_of_stream: bool,
    reads_aborted: bool,
    shut_down: bool,
    selected_range: Option<usize>,
    media_segment_start_time: Option<Timestamp>,
    track_buffer: TrackBuffer,
    last_appended_dts: Option<Timestamp>,
    last_appended_is_keyframe: bool,
    last_output_dts: Option<Timestamp>,
    max_interbuffer_distance: Duration,
    pending_buffer: Option<PendingBuffer>,
    duration: PresentationDuration,
}

impl SourceBufferStream {
    pub fn new_audio(config: AudioConfig, options: SourceBufferStreamOptions) -> Self {
        Self::new(TrackKind::Audio, ConfigTable::new_audio(config), options)
    }

    pub fn new_video(config: VideoConfig, options: SourceBufferStreamOptions) -> Self {
        Self::new(TrackKind::Video, ConfigTable::new_video(config), options)
    }

    pub fn new_text(config: TextConfig, options: SourceBufferStreamOptions) -> Self {
        Self::new(TrackKind::Text, ConfigTable::new_text(config), options)
    }

    fn new(kind: TrackKind, configs: ConfigTable, options: SourceBufferStreamOptions) -> Self {
        SourceBufferStream {
            kind,
            options,
            ranges: Vec::new(),
            configs,
            current_config_index: 0,
            append_config_index: 0,
            pending_config_to_adopt: None,
            pending_seek: None,
            end_of_stream: false,
            reads_aborted: false,
            shut_down: false,
            selected_range: None,
            media_segment_start_time: None,
            track_buffer: TrackBuffer::new(),
            last_appended_dts: None,
            last_appended_is_keyframe: false,
            last_output_dts: None,
            max_interbuffer_distance: DEFAULT_INTERBUFFER_DISTANCE,
            pending_buffer: None,
            duration: PresentationDuration::Infinite,
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn configs(&self) -> &ConfigTable {
        &self.configs
    }

    fn fudge_room(&self) -> Duration {
        self.max_interbuffer_distance.doubled()
    }

    // ---- config updates -------------------------------------------------

    pub fn update_audio_config(&mut self, config: AudioConfig) -> Result<()> {
        let idx = self.configs.update_audio(config)?;
        self.append_config_index = idx;
        Ok(())
    }

    pub fn update_video_config(&mut self, config: VideoConfig) -> Result<()> {
        let idx = self.configs.update_video(config)?;
        self.append_config_index = idx;
        Ok(())
    }

    pub fn current_config_index(&self) -> u32 {
        self.current_config_index
    }

    /// The config index newly appended frames are stamped with, as distinct
    /// from `current_config_index` (what the reader is currently receiving).
    pub fn append_config_index(&self) -> u32 {
        self.append_config_index
    }

    // ---- coded frame group boundary --------------------------------------

    /// Declares that subsequent appended frames belong to a group starting
    /// at `start_dts` (§4.2.1).
    pub fn on_new_coded_frame_group(&mut self, start_dts: Timestamp) {
        let adjacent = self.last_appended_dts.is_some_and(|last| {
            start_dts >= last && start_dts <= last.saturating_add(self.fudge_room())
        });
        if !adjacent {
            self.last_appended_dts = None;
        }
        self.media_segment_start_time = Some(start_dts);
    }

    // ---- append -----------------------------------------------------------

    /// Appends a batch of frames already ordered and offset by the frame
    /// processor. Frames must be monotonically non-decreasing in DTS.
    pub fn append(&mut self, mut frames: Vec<Frame>) -> Result<()> {
        if self.shut_down {
            return errors::shutdown_error();
        }
        if frames.is_empty() {
            return Ok(());
        }

        self.validate_monotonicity(&frames)?;
        self.update_max_interbuffer_distance(&frames);
        self.try_generate_splice(&mut frames);

        let frame_count = frames.len();
        let first = frames.first().expect("checked non-empty above");
        let last = frames.last().expect("checked non-empty above");
        let ns = first.dts();
        let ne = last.dts();
        let nd = last.duration();
        let end_excl = if !nd.is_zero() { ne.saturating_add(nd) } else { ne.saturating_add(Duration::new(1)) };

        let is_exclusive = self.last_appended_dts == Some(ns)
            && (self.last_appended_is_keyframe || !first.is_keyframe());

        if !first.is_keyframe() {
            let fudge = self.fudge_room();
            let continues_existing_range = self.ranges.iter().any(|r| ns >= r.start_timestamp() && r.is_next_in_sequence(ns, false, fudge));
            if !continues_existing_range {
                return errors::group_missing_keyframe_error();
            }
        }

        let saved = self.remove_internal(ns, end_excl, is_exclusive);
        self.track_buffer.extend_from_removal(saved);

        let last_is_keyframe = last.is_keyframe();
        self.insert_frames(frames);

        self.last_appended_dts = Some(ne);
        self.last_appended_is_keyframe = last_is_keyframe;

        if let Some(seek_ts) = self.pending_seek {
            if self.try_seek(seek_ts) {
                self.pending_seek = None;
            }
        }

        if let Some(front_ts) = self.track_buffer.front_timestamp() {
            if let Some(boundary) = self.first_keyframe_after(front_ts) {
                self.track_buffer.prune_at_or_after(boundary);
            }
        }

        trace!("append accepted {frame_count} frames, last DTS {ne}");
        Ok(())
    }

    fn validate_monotonicity(&self, frames: &[Frame]) -> Result<()> {
        let mut prev: Option<&Frame> = None;
        for f in frames {
            if let Some(p) = prev {
                let same_ts_ok = p.is_keyframe() || !f.is_keyframe();
                if f.dts() < p.dts() || (f.dts() == p.dts() && !same_ts_ok) {
                    return errors::non_monotonic_dts_error(p.dts(), f.dts());
                }
            }
            prev = Some(f);
        }
        Ok(())
    }

    fn update_max_interbuffer_distance(&mut self, frames: &[Frame]) {
        let mut prev_dts = self.last_appended_dts;
        for f in frames {
            if let Some(p) = prev_dts {
                let delta = f.dts().delta(p);
                if delta > 0 {
                    let d = Duration::new(delta as u64);
                    if d > self.max_interbuffer_distance {
                        self.max_interbuffer_distance = d;
                    }
                }
            }
            prev_dts = Some(f.dts());
        }
    }

    /// Audio-only splice synthesis (§4.2.4): if the new batch's first frame
    /// starts strictly inside an existing range, attach the overlapped tail
    /// of that range to it as a crossfade splice payload.
    fn try_generate_splice(&mut self, frames: &mut [Frame]) {
        if self.kind != TrackKind::Audio || !self.options.enable_audio_splice_and_preroll {
            return;
        }
        let Some(first) = frames.first() else { return };
        let ps = first.pts();

        for range in &self.ranges {
            if ps <= range.start_timestamp() || ps >= range.buffered_end_timestamp() {
                continue;
            }

            let crossfade = self.splice_crossfade_duration();
            let collected = range.frames_in_range(ps, ps.saturating_add(crossfade));
            if collected.len() < 2 {
                return;
            }
            if collected.iter().any(|f| f.has_splice_payload() || f.has_preroll()) {
                return;
            }
            let span = collected.last().unwrap().presentation_end().delta(collected.first().unwrap().pts());
            if span < self.min_splice_span_ticks() {
                return;
            }

            debug!("splicing {} pre-existing frames at PTS {ps}", collected.len());
            let rebuilt = FrameBuilder::new(TrackKind::Audio)
                .track_id(first.track_id())
                .timestamps(first.pts(), first.dts(), first.duration())
                .payload(first.payload().to_vec())
                .keyframe(first.is_keyframe())
                .config_id(first.config_id())
                .discard_padding(first.discard_padding())
                .splice_payload(collected)
                .build();
            frames[0] = rebuilt;
            return;
        }
    }

    fn splice_crossfade_duration(&self) -> Duration {
        match &self.configs {
            ConfigTable::Audio(configs) => {
                let sample_dur = configs.last().map_or(1, |c| c.sample_duration_ticks(1000).max(1));
                Duration::new(sample_dur.saturating_mul(8))
            }
            _ => Duration::new(8),
        }
    }

    fn min_splice_span_ticks(&self) -> i64 {
        match &self.configs {
            ConfigTable::Audio(configs) => configs.last().map_or(2, |c| (c.sample_duration_ticks(1000).max(1) * 2) as i64),
            _ => 2,
        }
    }

    /// Removes buffered frames overlapping `[start, end_excl)`, returning
    /// frames displaced from the selected range's read position so the
    /// caller can feed them into the track buffer (§4.2.1).
    fn remove_internal(&mut self, start: Timestamp, end_excl: Timestamp, is_exclusive: bool) -> Vec<Frame> {
        let mut saved = Vec::new();
        let mut i = 0;
        while i < self.ranges.len() {
            let range_start = self.ranges[i].start_timestamp();
            if range_start >= end_excl {
                break;
            }
            if self.ranges[i].buffered_end_timestamp() <= start {
                i += 1;
                continue;
            }

            if let Some(tail) = self.ranges[i].split(end_excl, false) {
                let moved_selected = self.selected_range == Some(i) && tail.has_read_position();
                self.ranges.insert(i + 1, tail);
                if let Some(sel) = self.selected_range {
                    if sel > i {
                        self.selected_range = Some(sel + 1);
                    }
                }
                if moved_selected {
                    self.selected_range = Some(i + 1);
                }
            }

            let was_selected = self.selected_range == Some(i);
            let deleted = self.ranges[i].truncate_at(start, is_exclusive);
            if was_selected && !self.ranges[i].has_read_position() && !deleted.is_empty() {
                saved.extend(deleted);
            }

            if self.ranges[i].is_empty() {
                if self.selected_range == Some(i) {
                    self.selected_range = None;
                }
                self.ranges.remove(i);
                if let Some(sel) = self.selected_range {
                    if sel > i {
                        self.selected_range = Some(sel - 1);
                    }
                }
                continue;
            }

            i += 1;
        }
        saved
    }

    fn insert_frames(&mut self, frames: Vec<Frame>) {
        let first = frames.first().expect("append() rejects empty batches");
        let ns = first.dts();
        let is_keyframe = first.is_keyframe();
        let fudge = self.fudge_room();

        let target = self
            .ranges
            .iter()
            .position(|r| ns >= r.start_timestamp() && r.is_next_in_sequence(ns, is_keyframe, fudge));

        match target {
            Some(i) => {
                self.ranges[i].append_frames_to_end(frames);
                self.try_merge_with_next(i);
            }
            None => {
                let new_range = Range::new(frames);
                let pos = self.ranges.partition_point(|r| r.start_timestamp() < ns);
                self.ranges.insert(pos, new_range);
                if let Some(sel) = self.selected_range {
                    if sel >= pos {
                        self.selected_range = Some(sel + 1);
                    }
                }
                self.try_merge_with_next(pos);
            }
        }
    }

    fn try_merge_with_next(&mut self, i: usize) {
        if i + 1 >= self.ranges.len() {
            return;
        }
        let fudge = self.fudge_room();
        let can_merge = {
            let (left, right) = self.ranges.split_at(i + 1);
            left[i].can_append_range_to_end(&right[0], fudge)
        };
        if !can_merge {
            return;
        }
        let next = self.ranges.remove(i + 1);
        let transfer_cursor = self.selected_range == Some(i + 1);
        self.ranges[i].append_range_to_end(next, transfer_cursor);
        if transfer_cursor {
            self.selected_range = Some(i);
        }
        else if let Some(sel) = self.selected_range {
            if sel > i + 1 {
                self.selected_range = Some(sel - 1);
            }
        }
    }

    fn first_keyframe_after(&self, ts: Timestamp) -> Option<Timestamp> {
        self.ranges.iter().filter_map(|r| r.next_keyframe_timestamp(ts.saturating_add(Duration::new(1)))).min()
    }

    // ---- removal ------------------------------------------------------

    /// Removes frames in `[start, end)`, rounded outward to full GOPs
    /// (§4.2).
    pub fn remove(&mut self, start: Timestamp, end: Timestamp) {
        let aligned_end = if self.duration.is_at_or_past(end) {
            Timestamp::MAX
        }
        else {
            self.ranges.iter().filter_map(|r| r.next_keyframe_timestamp(end)).min().unwrap_or(end)
        };
        self.remove_internal(start, aligned_end, false);
        self.track_buffer.clear();
        self.pending_buffer = None;
    }

    /// Truncates any range ending after `d`, splitting if necessary.
    pub fn on_set_duration(&mut self, d: Timestamp) {
        self.duration = PresentationDuration::Finite(d);
        let mut i = 0;
        while i < self.ranges.len() {
            if self.ranges[i].start_timestamp() >= d {
                if self.selected_range == Some(i) {
                    self.selected_range = None;
                }
                self.ranges.remove(i);
                if let Some(sel) = self.selected_range {
                    if sel > i {
                        self.selected_range = Some(sel - 1);
                    }
                }
                continue;
            }
            if self.ranges[i].buffered_end_timestamp() > d {
                self.ranges[i].truncate_at(d, false);
                if self.ranges[i].is_empty() {
                    if self.selected_range == Some(i) {
                        self.selected_range = None;
                    }
                    self.ranges.remove(i);
                    continue;
                }
            }
            i += 1;
        }
    }

    // ---- seek -----------------------------------------------------------

    pub fn seek(&mut self, t: Timestamp) {
        self.track_buffer.clear();
        self.pending_buffer = None;
        for r in &mut self.ranges {
            r.reset_read_position();
        }
        self.selected_range = None;
        self.pending_seek = None;

        if !self.try_seek(t) {
            self.pending_seek = Some(t);
        }
    }

    fn try_seek(&mut self, t: Timestamp) -> bool {
        if let Some(first_start) = self.ranges.first().map(|r| r.start_timestamp()) {
            if first_start.ticks() <= SEEK_TO_START_FUDGE_ROOM.ticks() as i64 && t <= first_start {
                self.ranges[0].seek_to_start();
                self.selected_range = Some(0);
                return true;
            }
        }

        let fudge = self.fudge_room();
        for i in 0..self.ranges.len() {
            let start = self.ranges[i].start_timestamp();
            let end = self.ranges[i].buffered_end_timestamp();
            if start.saturating_sub(fudge) <= t && t < end {
                let target = self.ranges[i].keyframe_before_timestamp(t).unwrap_or(start);
                self.ranges[i].seek(target);
                self.selected_range = Some(i);
                return true;
            }
        }
        false
    }

    fn set_selected_range_if_needed(&mut self, ts: Timestamp) {
        if self.selected_range.is_some() {
            return;
        }
        for i in 0..self.ranges.len() {
            if ts < self.ranges[i].start_timestamp() || ts >= self.ranges[i].buffered_end_timestamp() {
                continue;
            }
            if self.ranges[i].seek_ahead_to_frame(ts) {
                self.selected_range = Some(i);
                return;
            }
        }
    }

    // ---- end of stream --------------------------------------------------

    pub fn mark_end_of_stream(&mut self) {
        self.end_of_stream = true;
    }

    pub fn unmark_end_of_stream(&mut self) {
        self.end_of_stream = false;
    }

    pub fn shutdown(&mut self) {
        self.shut_down = true;
        self.pending_buffer = None;
    }

    pub fn abort_reads(&mut self) {
        if self.pending_buffer.take().is_some() {
            self.reads_aborted = true;
        }
    }

    // ---- read state machine ---------------------------------------------

    pub fn get_next_buffer(&mut self) -> ReadStatus {
        if self.reads_aborted {
            self.reads_aborted = false;
            return ReadStatus::Aborted;
        }
        if self.shut_down {
            return ReadStatus::EndOfStream;
        }

        if let Some(status) = self.resume_pending() {
            return status;
        }

        if !self.track_buffer.is_empty() {
            let front_cfg = self.track_buffer.front_config_id().expect("checked non-empty");
            if self.config_update_needed(front_cfg) {
                return ReadStatus::ConfigChange;
            }
            self.adopt_pending_config_if_matches(front_cfg);
            let frame = self.track_buffer.pop_front().expect("checked non-empty");
            self.last_output_dts = Some(frame.dts());
            if self.track_buffer.is_empty() {
                let resume_at = frame.dts().saturating_add(Duration::new(1));
                self.set_selected_range_if_needed(resume_at);
            }
            return ReadStatus::Success(frame);
        }

        // A range can lose its read position without losing its selected-range
        // slot (e.g. an overlapping append truncated it out from under the
        // cursor). Re-resolve from the last frame actually handed to the
        // reader before giving up.
        if self.selected_range.map_or(true, |i| !self.ranges[i].has_read_position()) {
            if let Some(resume_at) = self.last_output_dts.map(|d| d.saturating_add(Duration::new(1))) {
                self.selected_range = None;
                self.set_selected_range_if_needed(resume_at);
            }
        }

        let Some(range_idx) = self.selected_range
        else {
            return if self.end_of_stream { ReadStatus::EndOfStream } else { ReadStatus::NeedBuffer };
        };

        let Some(peeked) = self.ranges[range_idx].peek_next_frame()
        else {
            return if self.end_of_stream { ReadStatus::EndOfStream } else { ReadStatus::NeedBuffer };
        };

        if self.config_update_needed(peeked.config_id()) {
            return ReadStatus::ConfigChange;
        }
        self.adopt_pending_config_if_matches(peeked.config_id());

        let frame = self.ranges[range_idx].next_frame().expect("peeked frame must still be present");
        self.last_output_dts = Some(frame.dts());
        self.begin_dispatch(frame)
    }

    fn resume_pending(&mut self) -> Option<ReadStatus> {
        let pending = self.pending_buffer.take()?;
        match pending {
            PendingBuffer::Splice { mut steps, final_frame } => {
                if let Some(step) = steps.pop_front() {
                    let result = match step {
                        SpliceStep::ConfigChange(next_cfg) => {
                            self.pending_config_to_adopt = Some(next_cfg);
                            ReadStatus::ConfigChange
                        }
                        SpliceStep::Deliver(f) => {
                            self.adopt_pending_config_if_matches(f.config_id());
                            self.last_output_dts = Some(f.dts());
                            ReadStatus::Success(f)
                        }
                    };
                    self.pending_buffer = Some(PendingBuffer::Splice { steps, final_frame });
                    Some(result)
                }
                else {
                    Some(self.begin_dispatch(final_frame))
                }
            }
            PendingBuffer::Preroll { frame, delivered_preroll } => {
                if !delivered_preroll {
                    let preroll = frame.preroll().cloned().expect("Preroll dispatch requires a preroll frame");
                    self.pending_buffer = Some(PendingBuffer::Preroll { frame, delivered_preroll: true });
                    Some(ReadStatus::Success(preroll))
                }
                else {
                    self.adopt_pending_config_if_matches(frame.config_id());
                    self.last_output_dts = Some(frame.dts());
                    self.pending_buffer = None;
                    Some(ReadStatus::Success(frame))
                }
            }
        }
    }

    /// Begins (or completes, if neither splice nor preroll apply)
    /// dispatch of a frame freshly popped from the track buffer or a
    /// range.
    fn begin_dispatch(&mut self, frame: Frame) -> ReadStatus {
        if frame.has_splice_payload() {
            let payload = frame.splice_payload();
            let mut steps = VecDeque::new();
            steps.push_back(SpliceStep::Deliver(payload[0].clone()));
            for w in payload.windows(2) {
                if w[1].config_id() != w[0].config_id() {
                    steps.push_back(SpliceStep::ConfigChange(w[1].config_id()));
                }
                steps.push_back(SpliceStep::Deliver(w[1].clone()));
            }
            steps.push_back(SpliceStep::ConfigChange(frame.config_id()));
            self.pending_buffer = Some(PendingBuffer::Splice { steps, final_frame: frame });
            self.resume_pending().expect("just populated pending_buffer")
        }
        else if frame.has_preroll() {
            self.pending_buffer = Some(PendingBuffer::Preroll { frame, delivered_preroll: false });
            self.resume_pending().expect("just populated pending_buffer")
        }
        else {
            ReadStatus::Success(frame)
        }
    }

    fn config_update_needed(&mut self, candidate: u32) -> bool {
        if self.pending_config_to_adopt == Some(candidate) {
            return false;
        }
        if candidate != self.current_config_index {
            self.pending_config_to_adopt = Some(candidate);
            return true;
        }
        false
    }

    fn adopt_pending_config_if_matches(&mut self, candidate: u32) {
        if self.pending_config_to_adopt == Some(candidate) {
            self.current_config_index = candidate;
            self.pending_config_to_adopt = None;
        }
    }

    // ---- garbage collection ---------------------------------------------

    pub fn total_buffered_bytes(&self) -> u64 {
        self.ranges.iter().map(|r| r.size_in_bytes()).sum()
    }

    pub fn set_memory_limit(&mut self, bytes: u64) {
        self.options.memory_limit_bytes = bytes;
    }

    /// Frees buffered data down to the memory limit without evicting the
    /// GOP containing the current playback position or the most recently
    /// appended GOP. `media_time` drives both: it is clamped to the
    /// buffered region, then used directly to find the playback GOP when
    /// no range is currently selected for reading (§4.2.5).
    pub fn garbage_collect_if_needed(&mut self, media_time: Timestamp, extra_bytes: u64) -> bool {
        let total = self.total_buffered_bytes();
        let limit = self.options.memory_limit_bytes;
        if total + extra_bytes <= limit {
            return true;
        }
        let mut bytes_over = total + extra_bytes - limit;
        let media_time = self.clamp_to_buffered_region(media_time);

        bytes_over = bytes_over.saturating_sub(self.remove_gops_forward_of_last_appended(media_time, bytes_over));
        if bytes_over > 0 {
            bytes_over = bytes_over.saturating_sub(self.remove_gops_from_front(media_time, bytes_over));
        }
        if bytes_over > 0 {
            bytes_over = bytes_over.saturating_sub(self.remove_gops_from_back(media_time, bytes_over));
        }

        if bytes_over > 0 {
            warn!("garbage collection could only free {} of {} bytes needed", total + extra_bytes - limit - bytes_over, total + extra_bytes - limit);
        }
        bytes_over == 0
    }

    /// Clamps `t` to the currently buffered region (§4.2.5 step 1).
    fn clamp_to_buffered_region(&self, t: Timestamp) -> Timestamp {
        match (self.ranges.first(), self.ranges.last()) {
            (Some(first), Some(last)) => t.max(first.start_timestamp()).min(last.buffered_end_timestamp()),
            _ => t,
        }
    }

    /// The range protecting the current playback position: the selected
    /// range if it still has somewhere to read from, otherwise whichever
    /// range actually contains `media_time`. Falling back to `media_time`
    /// is what lets GC protect live playback when no `seek`/read has run
    /// yet on this stream.
    fn current_position_range_index(&self, media_time: Timestamp) -> Option<usize> {
        if let Some(sel) = self.selected_range {
            if self.ranges[sel].has_read_position() {
                return Some(sel);
            }
        }
        self.ranges.iter().position(|r| media_time >= r.start_timestamp() && media_time < r.buffered_end_timestamp())
    }

    fn last_appended_range_index(&self) -> Option<usize> {
        self.last_appended_dts.and_then(|dts| {
            self.ranges.iter().position(|r| dts >= r.start_timestamp() && dts <= r.buffered_end_timestamp())
        })
    }

    /// Phase A (§4.2.5 step 3): when playback has moved into a range ahead
    /// of the one most recently appended to, reclaims whatever lies
    /// between them — whole ranges strictly in between, then the leading
    /// GOPs of the current range up to (not including) the GOP holding the
    /// playback position. Ranges are this collector's unit of eviction
    /// elsewhere too, so a last-appended range's own trailing GOPs are left
    /// alone: that range's last GOP is by construction its final one, so
    /// there is nothing "forward" of it to trim without touching the
    /// protected GOP itself.
    fn remove_gops_forward_of_last_appended(&mut self, media_time: Timestamp, bytes_to_free: u64) -> u64 {
        let Some(last_idx) = self.last_appended_range_index() else { return 0 };
        let Some(mut current_idx) = self.current_position_range_index(media_time) else { return 0 };
        if current_idx <= last_idx {
            return 0;
        }

        let mut freed = 0u64;
        while current_idx > last_idx + 1 && freed < bytes_to_free {
            let victim = last_idx + 1;
            freed += self.ranges[victim].size_in_bytes();
            self.ranges.remove(victim);
            if let Some(sel) = self.selected_range {
                if sel > last_idx {
                    self.selected_range = sel.checked_sub(1);
                }
            }
            current_idx -= 1;
        }

        if freed >= bytes_to_free || current_idx == last_idx {
            return freed;
        }

        let position_ts = self.ranges[current_idx].next_frame_timestamp().unwrap_or(media_time);
        if let Some(current_gop_start) = self.ranges[current_idx].keyframe_before_timestamp(position_ts) {
            while freed < bytes_to_free && self.ranges[current_idx].start_timestamp() < current_gop_start {
                let (_, bytes) = self.ranges[current_idx].delete_gop_from_front();
                freed += bytes;
            }
        }

        freed
    }

    fn remove_gops_from_front(&mut self, media_time: Timestamp, bytes_to_free: u64) -> u64 {
        let mut freed = 0u64;
        while freed < bytes_to_free && !self.ranges.is_empty() {
            let current = self.current_position_range_index(media_time);
            let last_appended = self.last_appended_range_index();
            if current == Some(0) || last_appended == Some(0) {
                break;
            }
            let (_, bytes) = self.ranges[0].delete_gop_from_front();
            freed += bytes;
            if self.ranges[0].is_empty() {
                self.ranges.remove(0);
                if let Some(sel) = self.selected_range {
                    self.selected_range = sel.checked_sub(1);
                }
            }
        }
        freed
    }

    fn remove_gops_from_back(&mut self, media_time: Timestamp, bytes_to_free: u64) -> u64 {
        let mut freed = 0u64;
        while freed < bytes_to_free && !self.ranges.is_empty() {
            let last = self.ranges.len() - 1;
            let current = self.current_position_range_index(media_time);
            let last_appended = self.last_appended_range_index();
            if current == Some(last) || last_appended == Some(last) {
                break;
            }
            let (_, bytes) = self.ranges[last].delete_gop_from_back();
            freed += bytes;
            if self.ranges[last].is_empty() {
                self.ranges.remove(last);
                if self.selected_range == Some(last) {
                    self.selected_range = None;
                }
            }
        }
        freed
    }

    // ---- queries ----------------------------------------------------------

    /// A normalized, sorted, disjoint sequence of `[start, end)` intervals,
    /// clamped to the current duration.
    pub fn buffered_ranges(&self) -> Vec<(Timestamp, Timestamp)> {
        if self.kind == TrackKind::Text {
            let end = match self.duration {
                PresentationDuration::Finite(d) => d,
                PresentationDuration::Infinite => Timestamp::MAX,
            };
            return vec![(Timestamp::ZERO, end)];
        }
        let clamp_end = |t: Timestamp| match self.duration {
            PresentationDuration::Finite(d) => t.min(d),
            PresentationDuration::Infinite => t,
        };
        self.ranges.iter().map(|r| (r.start_timestamp(), clamp_end(r.buffered_end_timestamp()))).collect()
    }

    /// Total buffered duration across all ranges, per Chromium's
    /// `GetBufferedDuration()`.
    pub fn buffered_duration(&self) -> Duration {
        self.buffered_ranges()
            .into_iter()
            .fold(Duration::ZERO, |acc, (s, e)| acc.saturating_add(e.duration_since(s).unwrap_or(Duration::ZERO)))
    }

    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CodecId;
    use crate::frame::{FrameBuilder, TrackKind};

    fn video_frame(dts: i64, dur: u64, keyframe: bool) -> Frame {
        FrameBuilder::new(TrackKind::Video)
            .track_id(1)
            .timestamps(Timestamp::new(dts), Timestamp::new(dts), Duration::new(dur))
            .payload(vec![0u8; 8])
            .keyframe(keyframe)
            .build()
    }

    fn new_video_stream() -> SourceBufferStream {
        SourceBufferStream::new_video(VideoConfig::new(CodecId::new(1)), SourceBufferStreamOptions::default())
    }

    #[test]
    fn s1_complete_overlap_yields_one_contiguous_range() {
        let mut sbs = new_video_stream();
        sbs.append(vec![video_frame(5, 10, true), video_frame(6, 10, false), video_frame(7, 10, false), video_frame(8, 10, false), video_frame(9, 10, false)])
            .unwrap();
        let mut second = vec![video_frame(0, 10, true)];
        for ts in 1..15i64 {
            second.push(video_frame(ts, 10, ts == 5));
        }
        sbs.append(second).unwrap();

        assert_eq!(sbs.range_count(), 1);
        let ranges = sbs.buffered_ranges();
        assert_eq!(ranges, vec![(Timestamp::new(0), Timestamp::new(24))]);

        sbs.seek(Timestamp::new(0));
        let mut last = None;
        for expected in 0..15i64 {
            match sbs.get_next_buffer() {
                ReadStatus::Success(f) => {
                    assert_eq!(f.dts(), Timestamp::new(expected));
                    last = Some(f.dts());
                }
                other => panic!("unexpected status at frame {expected}: {other:?}"),
            }
        }
        assert_eq!(last, Some(Timestamp::new(14)));
    }

    #[test]
    fn s5_pending_seek_resolved_by_later_append() {
        let mut sbs = new_video_stream();
        sbs.seek(Timestamp::new(15));
        assert!(matches!(sbs.get_next_buffer(), ReadStatus::NeedBuffer));

        sbs.append(vec![video_frame(0, 10, true), video_frame(10, 10, true), video_frame(20, 10, false)]).unwrap();

        match sbs.get_next_buffer() {
            ReadStatus::Success(f) => assert_eq!(f.dts(), Timestamp::new(10)),
            other => panic!("expected the pending seek to resolve, got {other:?}"),
        }
    }

    #[test]
    fn s6_sequence_mode_offset_produces_expected_buffered_range() {
        // This exercises only the SBS half of S6: a frame already offset
        // by the frame processor to PTS=DTS=50 with group_end at 60.
        let mut sbs = new_video_stream();
        sbs.append(vec![video_frame(50, 10, true)]).unwrap();
        assert_eq!(sbs.buffered_ranges(), vec![(Timestamp::new(50), Timestamp::new(60))]);
    }

    #[test]
    fn remove_empties_overlapping_range() {
        let mut sbs = new_video_stream();
        sbs.append(vec![video_frame(0, 10, true), video_frame(10, 10, false), video_frame(20, 10, false)]).unwrap();
        sbs.remove(Timestamp::ZERO, Timestamp::MAX);
        assert_eq!(sbs.range_count(), 0);
    }

    #[test]
    fn on_set_duration_truncates_trailing_range() {
        let mut sbs = new_video_stream();
        sbs.append(vec![video_frame(0, 10, true), video_frame(10, 10, false), video_frame(20, 10, false)]).unwrap();
        sbs.on_set_duration(Timestamp::new(10));
        assert_eq!(sbs.buffered_ranges(), vec![(Timestamp::new(0), Timestamp::new(10))]);
    }

    #[test]
    fn garbage_collection_evicts_front_range_but_protects_last_appended() {
        let mut sbs = new_video_stream();
        sbs.set_memory_limit(16);
        // Two ranges far enough apart that they never merge: 2 frames each at
        // 8 bytes apiece, so each range holds 16 bytes and the total (32)
        // exceeds the limit.
        sbs.append(vec![video_frame(0, 10, true), video_frame(10, 10, false)]).unwrap();
        sbs.append(vec![video_frame(10_000, 10, true), video_frame(10_010, 10, false)]).unwrap();
        assert_eq!(sbs.range_count(), 2);

        // Playback is live in the back (most recently appended) range, not
        // at time zero, so the front range is free to be evicted.
        assert!(sbs.garbage_collect_if_needed(Timestamp::new(10_005), 0));

        assert_eq!(sbs.range_count(), 1);
        assert_eq!(sbs.buffered_ranges(), vec![(Timestamp::new(10_000), Timestamp::new(10_020))]);
    }

    #[test]
    fn garbage_collection_protects_media_time_position_without_a_selected_range() {
        // No seek/read has happened on this stream (selected_range stays
        // None throughout), but playback is live at media_time=5, inside
        // the front range. GC must not evict it just because nothing has
        // been selected for reading yet.
        let mut sbs = new_video_stream();
        sbs.set_memory_limit(16);
        sbs.append(vec![video_frame(0, 10, true), video_frame(10, 10, false)]).unwrap();
        sbs.append(vec![video_frame(10_000, 10, true), video_frame(10_010, 10, false)]).unwrap();
        assert_eq!(sbs.range_count(), 2);

        assert!(!sbs.garbage_collect_if_needed(Timestamp::new(5), 0));

        assert_eq!(sbs.range_count(), 2);
        assert_eq!(sbs.buffered_ranges(), vec![(Timestamp::new(0), Timestamp::new(20)), (Timestamp::new(10_000), Timestamp::new(10_020))]);
    }

    #[test]
    fn garbage_collection_phase_a_reclaims_stale_range_ahead_of_last_append() {
        // Three well-separated ranges; then an overlapping re-append of the
        // first range's exact span makes it the most recently appended
        // range again, even though it's not the last one in buffer order.
        // With playback live in the third (forward) range and nothing
        // selected, phase A should reclaim the now-stale middle range.
        let mut sbs = new_video_stream();
        sbs.append(vec![video_frame(0, 10, true), video_frame(10, 10, false)]).unwrap();
        sbs.append(vec![video_frame(10_000, 10, true), video_frame(10_010, 10, false)]).unwrap();
        sbs.append(vec![video_frame(20_000, 10, true), video_frame(20_010, 10, false)]).unwrap();
        sbs.append(vec![video_frame(0, 10, true), video_frame(10, 10, false)]).unwrap();
        assert_eq!(sbs.range_count(), 3);

        sbs.set_memory_limit(32);
        assert!(sbs.garbage_collect_if_needed(Timestamp::new(20_005), 0));

        assert_eq!(sbs.range_count(), 2);
        assert_eq!(sbs.buffered_ranges(), vec![(Timestamp::new(0), Timestamp::new(20)), (Timestamp::new(20_000), Timestamp::new(20_020))]);
    }

    #[test]
    fn append_rejects_non_keyframe_start_of_a_non_adjacent_group() {
        let mut sbs = new_video_stream();
        sbs.append(vec![video_frame(0, 10, true), video_frame(10, 10, false)]).unwrap();

        // Far enough from the last-appended DTS (20) to not be "adjacent in
        // sequence", and the first frame isn't a keyframe.
        let err = sbs.append(vec![video_frame(10_000, 10, false)]).unwrap_err();
        assert!(matches!(err, crate::errors::IngestError::GroupDoesNotStartWithKeyframe));
        assert_eq!(sbs.range_count(), 1);
    }

    #[test]
    fn config_change_is_signalled_before_new_config_frame() {
        let mut sbs =
            SourceBufferStream::new_audio(AudioConfig::new(CodecId::new(1), 44_100), SourceBufferStreamOptions::default());

        let audio_frame = |dts: i64, config_id: u32| {
            FrameBuilder::new(TrackKind::Audio)
                .track_id(2)
                .timestamps(Timestamp::new(dts), Timestamp::new(dts), Duration::new(10))
                .payload(vec![0u8; 4])
                .keyframe(true)
                .config_id(config_id)
                .build()
        };

        sbs.append(vec![audio_frame(0, 0)]).unwrap();
        sbs.update_audio_config(AudioConfig::new(CodecId::new(1), 48_000)).unwrap();
        sbs.append(vec![audio_frame(10, 1)]).unwrap();

        sbs.seek(Timestamp::ZERO);
        assert!(matches!(sbs.get_next_buffer(), ReadStatus::Success(_)));
        assert!(matches!(sbs.get_next_buffer(), ReadStatus::ConfigChange));
        match sbs.get_next_buffer() {
            ReadStatus::Success(f) => assert_eq!(f.config_id(), 1),
            other => panic!("expected the new-config frame after acknowledgement, got {other:?}"),
        }
        assert_eq!(sbs.current_config_index(), 1);
    }
}
