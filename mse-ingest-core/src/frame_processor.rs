// mse-ingest-core
// Copyright (c) 2019-2026 The Project MSE Ingest Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `frame_processor` module implements the MSE coded frame processing
//! algorithm (§4.1): discontinuity detection, `timestampOffset` application,
//! append-window trimming, audio preroll attachment, random-access-point
//! gating, and per-track group bookkeeping, driving one or more
//! `SourceBufferStream`s.
//!
//! This is grounded directly on Chromium's `media::FrameProcessor` —
//! `ProcessFrames`/`ProcessFrame`, `SetSequenceMode`,
//! `group_start_timestamp_`/`group_end_timestamp_` all correspond to methods
//! and fields of that class.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{trace, warn};

use crate::config::AudioConfig;
use crate::errors::{self, Result};
use crate::frame::{DiscardPadding, Frame, FrameBuilder, TrackKind};
use crate::source_buffer_stream::SourceBufferStream;
use crate::units::{Duration, Timestamp};

/// One incoming coded frame as handed to the processor by the parser,
/// before `timestampOffset` and discontinuity handling have resolved its
/// final (PTS, DTS).
#[derive(Clone, Debug)]
pub struct RawFrame {
    pub track_id: u32,
    pub kind: TrackKind,
    pub pts: Option<Timestamp>,
    pub dts: Option<Timestamp>,
    pub duration: Option<Duration>,
    pub is_keyframe: bool,
    pub payload: Vec<u8>,
    pub discard_padding: DiscardPadding,
}

impl RawFrame {
    pub fn new(track_id: u32, kind: TrackKind, pts: Timestamp, dts: Timestamp, duration: Duration, is_keyframe: bool, payload: Vec<u8>) -> Self {
        RawFrame { track_id, kind, pts: Some(pts), dts: Some(dts), duration: Some(duration), is_keyframe, payload, discard_padding: DiscardPadding::NONE }
    }
}

/// Per-track append-side bookkeeping (§3 "MseTrackBuffer"). Holds a handle
/// to its track's `SourceBufferStream` but never the reverse — the stream
/// itself has no notion of a frame processor.
pub struct MseTrackBuffer {
    stream: Arc<Mutex<SourceBufferStream>>,
    last_decode_timestamp: Option<Timestamp>,
    last_frame_duration: Duration,
    highest_presentation_timestamp: Timestamp,
    needs_random_access_point: bool,
}

impl MseTrackBuffer {
    pub fn new(stream: Arc<Mutex<SourceBufferStream>>) -> Self {
        MseTrackBuffer {
            stream,
            last_decode_timestamp: None,
            last_frame_duration: Duration::ZERO,
            highest_presentation_timestamp: Timestamp::ZERO,
            needs_random_access_point: true,
        }
    }

    pub fn highest_presentation_timestamp(&self) -> Timestamp {
        self.highest_presentation_timestamp
    }

    fn reset(&mut self) {
        self.last_decode_timestamp = None;
        self.last_frame_duration = Duration::ZERO;
        self.highest_presentation_timestamp = Timestamp::ZERO;
        self.needs_random_access_point = true;
    }

    fn record_appended(&mut self, dts: Timestamp, duration: Duration, frame_end_pts: Timestamp) {
        self.last_decode_timestamp = Some(dts);
        self.last_frame_duration = duration;
        if frame_end_pts > self.highest_presentation_timestamp {
            self.highest_presentation_timestamp = frame_end_pts;
        }
    }
}

/// Implements the stateful MSE coded-frame algorithm (§4.1) across one or
/// more tracks sharing a single `timestampOffset`.
pub struct FrameProcessor {
    sequence_mode: bool,
    group_start_dts: Option<Timestamp>,
    group_end_dts: Timestamp,
    tracks: HashMap<u32, MseTrackBuffer>,
    audio_preroll_candidate: Option<(u32, Frame)>,
    current_audio_config: Option<AudioConfig>,
    audio_sample_duration: Duration,
}

impl Default for FrameProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameProcessor {
    pub fn new() -> Self {
        FrameProcessor {
            sequence_mode: false,
            group_start_dts: None,
            group_end_dts: Timestamp::ZERO,
            tracks: HashMap::new(),
            audio_preroll_candidate: None,
            current_audio_config: None,
            audio_sample_duration: Duration::ZERO,
        }
    }

    /// Must not be called mid-append. Switching from segments to sequence
    /// mode carries the running group end forward as the new group start.
    pub fn set_sequence_mode(&mut self, sequence_mode: bool) {
        if sequence_mode && !self.sequence_mode {
            self.group_start_dts = Some(self.group_end_dts);
        }
        self.sequence_mode = sequence_mode;
    }

    /// In sequence mode, records the start of the next coded frame group
    /// and invalidates any pending audio preroll candidate (its abutment
    /// assumption no longer holds once the group start moves).
    pub fn set_group_start_timestamp_if_in_sequence_mode(&mut self, t: Timestamp) {
        if self.sequence_mode {
            self.group_start_dts = Some(t);
            self.audio_preroll_candidate = None;
        }
    }

    pub fn add_track(&mut self, track_id: u32, stream: Arc<Mutex<SourceBufferStream>>) {
        self.tracks.insert(track_id, MseTrackBuffer::new(stream));
    }

    pub fn update_track(&mut self, old_id: u32, new_id: u32) {
        if let Some(track) = self.tracks.remove(&old_id) {
            self.tracks.insert(new_id, track);
        }
    }

    pub fn all_tracks_need_random_access_point(&self) -> bool {
        self.tracks.values().all(|t| t.needs_random_access_point)
    }

    pub fn reset(&mut self) {
        self.group_start_dts = None;
        self.group_end_dts = Timestamp::ZERO;
        self.audio_preroll_candidate = None;
        for track in self.tracks.values_mut() {
            track.reset();
        }
    }

    /// If `config` differs from the currently tracked audio config, adopts
    /// it, recomputes the per-sample duration, and invalidates any pending
    /// preroll candidate (§4.1, `on_possible_audio_config_update`).
    pub fn on_possible_audio_config_update(&mut self, config: AudioConfig, ticks_per_second: u64) {
        if self.current_audio_config != Some(config) {
            self.audio_sample_duration = Duration::new(config.sample_duration_ticks(ticks_per_second));
            self.current_audio_config = Some(config);
            self.audio_preroll_candidate = None;
        }
    }

    pub fn highest_presentation_timestamp(&self) -> Timestamp {
        self.tracks.values().map(|t| t.highest_presentation_timestamp).max().unwrap_or(Timestamp::ZERO)
    }

    /// Processes one append's worth of frames, already merged by ascending
    /// DTS (audio before video on ties) by the caller. `timestamp_offset` is
    /// read and written in place, matching the in/out parameter in the
    /// parser contract (§6).
    ///
    /// Invokes `possible_duration_increase` at most once, after every frame
    /// in the batch has been processed, iff at least one frame was emitted.
    pub fn process_frames(
        &mut self,
        frames: Vec<RawFrame>,
        append_window_start: Timestamp,
        append_window_end: Timestamp,
        timestamp_offset: &mut i64,
        possible_duration_increase: impl FnOnce(Timestamp),
    ) -> Result<()> {
        let mut emitted_any = false;
        let mut new_group_pending: HashMap<u32, bool> =
            self.tracks.keys().map(|&id| (id, true)).collect();

        for raw in frames {
            if self.process_one_frame(raw, append_window_start, append_window_end, timestamp_offset, &mut new_group_pending)? {
                emitted_any = true;
            }
        }

        if emitted_any {
            possible_duration_increase(self.group_end_dts);
        }
        Ok(())
    }

    /// Runs the full inner loop (§4.1 steps 1-13) for a single frame,
    /// including the discontinuity-triggered restart at step 5. Returns
    /// `Ok(true)` iff the frame was ultimately emitted to its stream.
    fn process_one_frame(
        &mut self,
        raw: RawFrame,
        append_window_start: Timestamp,
        append_window_end: Timestamp,
        timestamp_offset: &mut i64,
        new_group_pending: &mut HashMap<u32, bool>,
    ) -> Result<bool> {
        // Step 1.
        let (Some(pts), Some(dts), Some(duration)) = (raw.pts, raw.dts, raw.duration)
        else {
            return errors::missing_timestamp_error();
        };

        loop {
            // Step 2.
            if self.sequence_mode {
                if let Some(group_start) = self.group_start_dts {
                    *timestamp_offset = group_start.delta(pts);
                    self.group_end_dts = group_start;
                    for track in self.tracks.values_mut() {
                        track.needs_random_access_point = true;
                    }
                    self.group_start_dts = None;
                }
            }

            // Step 3: apply timestamp_offset locally; only committed to the
            // frame if it survives discontinuity and window filtering.
            let offset_pts = pts.offset(*timestamp_offset);
            let offset_dts = dts.offset(*timestamp_offset);

            // Step 4.
            let Some(track) = self.tracks.get_mut(&raw.track_id)
            else {
                return errors::unknown_track_error(raw.track_id);
            };

            // Step 5: discontinuity test.
            if let Some(last_dts) = track.last_decode_timestamp {
                let delta = offset_dts.delta(last_dts);
                let discontinuous = offset_dts < last_dts || delta > 2 * track.last_frame_duration.ticks() as i64;
                if discontinuous {
                    warn!("discontinuity on track {}: DTS {offset_dts} after last DTS {last_dts}", raw.track_id);
                    if self.sequence_mode {
                        self.group_start_dts = Some(self.group_end_dts);
                    }
                    else {
                        self.group_end_dts = offset_pts;
                        new_group_pending.insert(raw.track_id, true);
                    }
                    for t in self.tracks.values_mut() {
                        t.reset();
                    }
                    continue;
                }
            }

            // Steps 6-13 happen outside the discontinuity-restart loop.
            return self.finish_frame(raw, offset_pts, offset_dts, duration, append_window_start, append_window_end, new_group_pending);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_frame(
        &mut self,
        mut raw: RawFrame,
        mut pts: Timestamp,
        mut dts: Timestamp,
        mut duration: Duration,
        append_window_start: Timestamp,
        append_window_end: Timestamp,
        new_group_pending: &mut HashMap<u32, bool>,
    ) -> Result<bool> {
        // Step 6.
        let mut frame_end_pts = pts.saturating_add(duration);

        let mut preroll_to_attach = None;

        // Step 7: partial append-window trimming, audio only.
        if raw.kind == TrackKind::Audio {
            if frame_end_pts > append_window_start && pts < append_window_start && raw.is_keyframe {
                let front_discard = append_window_start.duration_since(pts).unwrap_or(Duration::ZERO);
                let trimmed = FrameBuilder::new(raw.kind)
                    .track_id(raw.track_id)
                    .timestamps(pts, dts, duration)
                    .payload(raw.payload.clone())
                    .keyframe(raw.is_keyframe)
                    .discard_padding(DiscardPadding { front: front_discard, ..raw.discard_padding })
                    .build();
                trimmed.trim_start_to(append_window_start);

                pts = trimmed.pts();
                dts = trimmed.dts();
                duration = trimmed.duration();
                frame_end_pts = pts.saturating_add(duration);
                raw.discard_padding = trimmed.discard_padding();

                if let Some((candidate_track, candidate)) = &self.audio_preroll_candidate {
                    if *candidate_track == raw.track_id {
                        let gap = pts.delta(candidate.presentation_end());
                        if gap.unsigned_abs() as u64 <= self.audio_sample_duration.ticks() {
                            preroll_to_attach = Some(candidate.clone());
                        }
                    }
                }
            }
            else if frame_end_pts <= append_window_start {
                let track_id = raw.track_id;
                let saved = FrameBuilder::new(raw.kind)
                    .track_id(raw.track_id)
                    .timestamps(pts, dts, duration)
                    .payload(raw.payload)
                    .keyframe(raw.is_keyframe)
                    .discard_padding(raw.discard_padding)
                    .build();
                self.audio_preroll_candidate = Some((track_id, saved));
                return Ok(false);
            }
        }

        // Step 8: append-window filter.
        if pts < append_window_start || frame_end_pts > append_window_end {
            if let Some(track) = self.tracks.get_mut(&raw.track_id) {
                track.needs_random_access_point = true;
            }
            new_group_pending.insert(raw.track_id, true);
            trace!("dropping frame on track {} outside append window", raw.track_id);
            return Ok(false);
        }

        // Step 9.
        if dts.is_negative() {
            return errors::negative_dts_error(dts);
        }
        if dts > pts {
            warn!("DTS {dts} exceeds PTS {pts} on track {} after append window trimming", raw.track_id);
        }

        // Step 10.
        let track = self.tracks.get_mut(&raw.track_id).expect("track existence checked in process_one_frame");
        if track.needs_random_access_point {
            if !raw.is_keyframe {
                trace!("dropping non-keyframe on track {} awaiting random access point", raw.track_id);
                return Ok(false);
            }
            track.needs_random_access_point = false;
        }

        let config_id = {
            let stream = track.stream.lock().expect("SourceBufferStream mutex poisoned");
            stream.append_config_index()
        };

        let mut frame = FrameBuilder::new(raw.kind)
            .track_id(raw.track_id)
            .timestamps(pts, dts, duration)
            .payload(raw.payload)
            .keyframe(raw.is_keyframe)
            .config_id(config_id)
            .discard_padding(raw.discard_padding)
            .build();

        if let Some(preroll) = preroll_to_attach {
            frame = FrameBuilder::new(frame.kind())
                .track_id(frame.track_id())
                .timestamps(frame.pts(), frame.dts(), frame.duration())
                .payload(frame.payload().to_vec())
                .keyframe(frame.is_keyframe())
                .config_id(frame.config_id())
                .discard_padding(frame.discard_padding())
                .preroll(preroll)
                .build();
            self.audio_preroll_candidate = None;
        }

        // Step 11: emit.
        let is_first_of_group = new_group_pending.remove(&raw.track_id).unwrap_or(false);
        {
            let stream = track.stream.clone();
            let mut stream = stream.lock().expect("SourceBufferStream mutex poisoned");
            if is_first_of_group {
                stream.on_new_coded_frame_group(dts);
            }
            stream.append(vec![frame])?;
        }

        // Step 12.
        track.record_appended(dts, duration, frame_end_pts);

        // Step 13.
        if frame_end_pts > self.group_end_dts {
            self.group_end_dts = frame_end_pts;
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CodecId, VideoConfig};
    use crate::units::Duration;

    fn new_stream() -> Arc<Mutex<SourceBufferStream>> {
        Arc::new(Mutex::new(SourceBufferStream::new_video(
            VideoConfig::new(CodecId::new(1)),
            crate::config::SourceBufferStreamOptions::default(),
        )))
    }

    #[test]
    fn accepts_a_keyframe_and_buffers_it() {
        let mut fp = FrameProcessor::new();
        let stream = new_stream();
        fp.add_track(1, stream.clone());

        let frames = vec![RawFrame::new(1, TrackKind::Video, Timestamp::new(0), Timestamp::new(0), Duration::new(10), true, vec![1, 2, 3])];
        let mut offset = 0i64;
        let mut called_with = None;
        fp.process_frames(frames, Timestamp::ZERO, Timestamp::MAX, &mut offset, |t| called_with = Some(t)).unwrap();

        assert_eq!(called_with, Some(Timestamp::new(10)));
        let buffered = stream.lock().unwrap().buffered_ranges();
        assert_eq!(buffered, vec![(Timestamp::new(0), Timestamp::new(10))]);
    }

    #[test]
    fn drops_leading_non_keyframe_awaiting_random_access_point() {
        let mut fp = FrameProcessor::new();
        let stream = new_stream();
        fp.add_track(1, stream.clone());

        let frames = vec![
            RawFrame::new(1, TrackKind::Video, Timestamp::new(0), Timestamp::new(0), Duration::new(10), false, vec![0]),
            RawFrame::new(1, TrackKind::Video, Timestamp::new(10), Timestamp::new(10), Duration::new(10), true, vec![1]),
        ];
        let mut offset = 0i64;
        fp.process_frames(frames, Timestamp::ZERO, Timestamp::MAX, &mut offset, |_| {}).unwrap();

        let buffered = stream.lock().unwrap().buffered_ranges();
        assert_eq!(buffered, vec![(Timestamp::new(10), Timestamp::new(20))]);
    }

    #[test]
    fn append_window_drops_frames_outside_window() {
        let mut fp = FrameProcessor::new();
        let stream = new_stream();
        fp.add_track(1, stream.clone());

        let frames = vec![
            RawFrame::new(1, TrackKind::Video, Timestamp::new(0), Timestamp::new(0), Duration::new(10), true, vec![0]),
            RawFrame::new(1, TrackKind::Video, Timestamp::new(10), Timestamp::new(10), Duration::new(10), true, vec![1]),
        ];
        let mut offset = 0i64;
        fp.process_frames(frames, Timestamp::new(10), Timestamp::MAX, &mut offset, |_| {}).unwrap();

        let buffered = stream.lock().unwrap().buffered_ranges();
        assert_eq!(buffered, vec![(Timestamp::new(10), Timestamp::new(20))]);
    }

    #[test]
    fn sequence_mode_rewrites_offset_from_group_start() {
        let mut fp = FrameProcessor::new();
        let stream = new_stream();
        fp.add_track(1, stream.clone());
        fp.set_sequence_mode(true);
        fp.set_group_start_timestamp_if_in_sequence_mode(Timestamp::new(50));

        let frames = vec![RawFrame::new(1, TrackKind::Video, Timestamp::new(0), Timestamp::new(0), Duration::new(10), true, vec![0])];
        let mut offset = 0i64;
        fp.process_frames(frames, Timestamp::ZERO, Timestamp::MAX, &mut offset, |_| {}).unwrap();

        assert_eq!(offset, 50);
        let buffered = stream.lock().unwrap().buffered_ranges();
        assert_eq!(buffered, vec![(Timestamp::new(50), Timestamp::new(60))]);
    }

    #[test]
    fn rejects_unknown_track() {
        let mut fp = FrameProcessor::new();
        let frames = vec![RawFrame::new(99, TrackKind::Video, Timestamp::new(0), Timestamp::new(0), Duration::new(10), true, vec![0])];
        let mut offset = 0i64;
        let err = fp.process_frames(frames, Timestamp::ZERO, Timestamp::MAX, &mut offset, |_| {}).unwrap_err();
        assert!(matches!(err, crate::errors::IngestError::UnknownTrack(99)));
    }
}
