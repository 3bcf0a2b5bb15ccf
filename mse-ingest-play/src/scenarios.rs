// mse-ingest-play
// Copyright (c) 2019-2026 The Project MSE Ingest Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The named S1-S6 scenarios, runnable standalone and logged step by step.

use std::sync::{Arc, Mutex};

use log::info;

use mse_ingest_core::config::{CodecId, SourceBufferStreamOptions, VideoConfig};
use mse_ingest_core::frame::{Frame, FrameBuilder, TrackKind};
use mse_ingest_core::frame_processor::{FrameProcessor, RawFrame};
use mse_ingest_core::source_buffer_stream::{ReadStatus, SourceBufferStream};
use mse_ingest_core::units::{Duration, Timestamp};

pub struct Scenario {
    pub name: &'static str,
    run: Box<dyn FnOnce()>,
}

impl Scenario {
    pub fn run(self) {
        (self.run)();
    }
}

fn video_frame(dts: i64, duration: i64, is_keyframe: bool) -> Frame {
    FrameBuilder::new(TrackKind::Video)
        .track_id(1)
        .timestamps(Timestamp::new(dts), Timestamp::new(dts), Duration::new(duration as u64))
        .payload(vec![0u8; 4])
        .keyframe(is_keyframe)
        .build()
}

fn new_video_stream() -> SourceBufferStream {
    SourceBufferStream::new_video(VideoConfig::new(CodecId::new(1)), SourceBufferStreamOptions::default())
}

fn log_buffered_ranges(sbs: &SourceBufferStream) {
    info!("buffered ranges: {:?}", sbs.buffered_ranges());
}

fn log_read(sbs: &mut SourceBufferStream) -> ReadStatus {
    let status = sbs.get_next_buffer();
    info!("read: {status:?}");
    status
}

impl Scenario {
    /// An overlapping append that completely subsumes a previously buffered
    /// range collapses to a single merged range, and a read from the start
    /// plays every frame back in order.
    pub fn s1_complete_overlap() -> Scenario {
        Scenario {
            name: "S1 complete overlap",
            run: Box::new(|| {
                let mut sbs = new_video_stream();

                sbs.append(vec![
                    video_frame(5, 1, true),
                    video_frame(6, 1, false),
                    video_frame(7, 1, false),
                    video_frame(8, 1, false),
                    video_frame(9, 1, false),
                ])
                .unwrap();
                log_buffered_ranges(&sbs);

                let mut overlapping = vec![video_frame(0, 1, true)];
                for dts in 1..15 {
                    overlapping.push(video_frame(dts, 1, dts == 5));
                }
                sbs.append(overlapping).unwrap();
                log_buffered_ranges(&sbs);

                sbs.seek(Timestamp::ZERO);
                loop {
                    match log_read(&mut sbs) {
                        ReadStatus::Success(_) => {}
                        _ => break,
                    }
                }
            }),
        }
    }

    /// An overlapping append that lands on the read cursor displaces the
    /// unread remainder of the range into the track buffer; reads stall
    /// once that buffer drains until a bridging keyframe arrives.
    pub fn s2_track_buffer_exhaustion() -> Scenario {
        Scenario {
            name: "S2 track buffer exhaustion",
            run: Box::new(|| {
                let mut sbs = new_video_stream();

                sbs.append(vec![
                    video_frame(10, 1, true),
                    video_frame(11, 1, false),
                    video_frame(12, 1, false),
                    video_frame(13, 1, false),
                    video_frame(14, 1, false),
                ])
                .unwrap();
                log_buffered_ranges(&sbs);

                sbs.seek(Timestamp::new(10));
                log_read(&mut sbs);

                sbs.append(vec![video_frame(11, 1, false), video_frame(12, 1, false), video_frame(13, 1, false), video_frame(14, 1, false)])
                    .unwrap();
                log_buffered_ranges(&sbs);

                for _ in 0..4 {
                    log_read(&mut sbs);
                }
                log_read(&mut sbs);

                sbs.append(vec![video_frame(15, 1, true)]).unwrap();
                log_buffered_ranges(&sbs);
                log_read(&mut sbs);
            }),
        }
    }

    /// A seek issued before any data has been appended stays pending until
    /// an append covering the seek target arrives.
    pub fn s5_pending_seek() -> Scenario {
        Scenario {
            name: "S5 pending seek",
            run: Box::new(|| {
                let mut sbs = new_video_stream();

                sbs.seek(Timestamp::new(15));
                log_read(&mut sbs);

                sbs.append(vec![video_frame(0, 10, true), video_frame(10, 10, true), video_frame(20, 10, false)]).unwrap();
                log_buffered_ranges(&sbs);
                log_read(&mut sbs);
            }),
        }
    }

    /// In sequence append mode, the first frame of a new group is retimed
    /// to the group start timestamp, and the running timestamp offset
    /// shifts every subsequent frame in the group by the same amount.
    pub fn s6_sequence_mode_offset() -> Scenario {
        Scenario {
            name: "S6 sequence mode offset",
            run: Box::new(|| {
                let stream = Arc::new(Mutex::new(new_video_stream()));
                let mut processor = FrameProcessor::new();
                processor.add_track(1, stream.clone());
                processor.set_sequence_mode(true);
                processor.set_group_start_timestamp_if_in_sequence_mode(Timestamp::new(50));

                let mut offset = 0i64;
                let frame = RawFrame::new(1, TrackKind::Video, Timestamp::new(20), Timestamp::new(20), Duration::new(10), true, vec![0u8; 4]);

                processor
                    .process_frames(vec![frame], Timestamp::ZERO, Timestamp::MAX, &mut offset, |t| {
                        info!("group end reached: {t:?}");
                    })
                    .unwrap();
                info!("sequence offset now: {offset}");

                log_buffered_ranges(&stream.lock().unwrap());
            }),
        }
    }
}
