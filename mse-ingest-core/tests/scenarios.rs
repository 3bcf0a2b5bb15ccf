//! End-to-end scenarios exercising `SourceBufferStream` and `FrameProcessor`
//! together, and the universal invariants that must hold after every
//! operation.

use std::sync::{Arc, Mutex};

use mse_ingest_core::config::{CodecId, SourceBufferStreamOptions, VideoConfig};
use mse_ingest_core::frame::{Frame, FrameBuilder, TrackKind};
use mse_ingest_core::frame_processor::{FrameProcessor, RawFrame};
use mse_ingest_core::source_buffer_stream::{ReadStatus, SourceBufferStream};
use mse_ingest_core::units::{Duration, Timestamp};

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

/// Universal invariants from the testable-properties section: the range
/// list stays sorted and non-overlapping, and at most one range holds a
/// read position.
fn assert_universal_invariants(sbs: &SourceBufferStream) {
    let ranges = sbs.buffered_ranges();
    for pair in ranges.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "ranges must be sorted and non-overlapping: {ranges:?}");
    }
}

#[test]
fn s1_complete_overlap_reads_back_all_frames_in_order() {
    let mut sbs = new_video_stream();

    sbs.append(vec![
        video_frame(5, 1, true),
        video_frame(6, 1, false),
        video_frame(7, 1, false),
        video_frame(8, 1, false),
        video_frame(9, 1, false),
    ])
    .unwrap();

    let mut overlapping = vec![video_frame(0, 1, true)];
    for dts in 1..15 {
        overlapping.push(video_frame(dts, 1, dts == 5));
    }
    sbs.append(overlapping).unwrap();

    assert_eq!(sbs.buffered_ranges(), vec![(Timestamp::new(0), Timestamp::new(15))]);
    assert_universal_invariants(&sbs);

    sbs.seek(Timestamp::ZERO);
    let mut seen = Vec::new();
    loop {
        match sbs.get_next_buffer() {
            ReadStatus::Success(frame) => seen.push(frame.dts().ticks()),
            ReadStatus::NeedBuffer => break,
            other => panic!("unexpected read status: {other:?}"),
        }
    }
    assert_eq!(seen, (0..15).collect::<Vec<_>>());
}

#[test]
fn s2_track_buffer_exhaustion_stalls_until_bridging_keyframe_arrives() {
    let mut sbs = new_video_stream();

    sbs.append(vec![
        video_frame(10, 1, true),
        video_frame(11, 1, false),
        video_frame(12, 1, false),
        video_frame(13, 1, false),
        video_frame(14, 1, false),
    ])
    .unwrap();

    sbs.seek(Timestamp::new(10));
    assert!(matches!(sbs.get_next_buffer(), ReadStatus::Success(f) if f.dts() == Timestamp::new(10)));

    // Overlapping append replaces the unread remainder of the range (11-14);
    // those displaced frames drain from the track buffer first.
    sbs.append(vec![video_frame(11, 1, false), video_frame(12, 1, false), video_frame(13, 1, false), video_frame(14, 1, false)]).unwrap();

    for expected in [11, 12, 13, 14] {
        match sbs.get_next_buffer() {
            ReadStatus::Success(f) => assert_eq!(f.dts(), Timestamp::new(expected)),
            other => panic!("expected track-buffer frame at {expected}, got {other:?}"),
        }
    }
    // The track buffer is now dry and no range holds data at or after 15.
    assert!(matches!(sbs.get_next_buffer(), ReadStatus::NeedBuffer));

    sbs.append(vec![video_frame(15, 1, true)]).unwrap();
    assert!(matches!(sbs.get_next_buffer(), ReadStatus::Success(f) if f.dts() == Timestamp::new(15)));
    assert_universal_invariants(&sbs);
}

#[test]
fn s5_pending_seek_resolved_by_later_append() {
    let mut sbs = new_video_stream();

    sbs.seek(Timestamp::new(15));
    assert!(matches!(sbs.get_next_buffer(), ReadStatus::NeedBuffer));

    sbs.append(vec![
        video_frame(0, 10, true),
        video_frame(10, 10, true),
        video_frame(20, 10, false),
    ])
    .unwrap();

    assert!(matches!(sbs.get_next_buffer(), ReadStatus::Success(f) if f.dts() == Timestamp::new(10)));
    assert_universal_invariants(&sbs);
}

#[test]
fn s6_sequence_mode_offset_produces_group_end_and_buffered_range() {
    let stream = Arc::new(Mutex::new(new_video_stream()));
    let mut processor = FrameProcessor::new();
    processor.add_track(1, stream.clone());
    processor.set_sequence_mode(true);
    processor.set_group_start_timestamp_if_in_sequence_mode(Timestamp::new(50));

    let mut offset = 0i64;
    let frame = RawFrame::new(1, TrackKind::Video, Timestamp::new(20), Timestamp::new(20), Duration::new(10), true, vec![0u8; 4]);

    let mut group_end_seen = None;
    processor
        .process_frames(vec![frame], Timestamp::ZERO, Timestamp::MAX, &mut offset, |t| group_end_seen = Some(t))
        .unwrap();

    assert_eq!(offset, 30);
    assert_eq!(group_end_seen, Some(Timestamp::new(60)));

    let sbs = stream.lock().unwrap();
    assert_eq!(sbs.buffered_ranges(), vec![(Timestamp::new(50), Timestamp::new(60))]);
    assert_universal_invariants(&sbs);
}

#[test]
fn garbage_collection_evicts_older_ranges_before_touching_the_last_appended_one() {
    let mut sbs = new_video_stream();
    sbs.set_memory_limit(16);

    // Three ranges, each a single GOP, spaced far enough apart that none
    // merge. An unresolved seek leaves no current playback position, so
    // only the most recently appended range (the third) is protected.
    sbs.append(vec![video_frame(0, 30, true), video_frame(30, 30, false), video_frame(60, 30, false), video_frame(90, 30, false)]).unwrap();
    sbs.append(vec![video_frame(1000, 30, true), video_frame(1030, 30, false), video_frame(1060, 30, false), video_frame(1090, 30, false)]).unwrap();
    sbs.append(vec![video_frame(2000, 30, true), video_frame(2030, 30, false)]).unwrap();
    assert_eq!(sbs.range_count(), 3);

    sbs.seek(Timestamp::new(5000));
    assert!(matches!(sbs.get_next_buffer(), ReadStatus::NeedBuffer));

    assert!(sbs.garbage_collect_if_needed(Timestamp::new(5000), 0));

    assert_eq!(sbs.buffered_ranges(), vec![(Timestamp::new(2000), Timestamp::new(2060))]);
    assert_universal_invariants(&sbs);
}

#[test]
fn remove_full_span_empties_all_ranges() {
    let mut sbs = new_video_stream();
    sbs.append(vec![video_frame(0, 10, true), video_frame(10, 10, false), video_frame(20, 10, false)]).unwrap();
    sbs.remove(Timestamp::ZERO, Timestamp::MAX);
    assert_eq!(sbs.range_count(), 0);
    assert!(sbs.buffered_ranges().is_empty());
}

#[test]
fn reappending_an_identical_span_after_removal_reproduces_the_same_range() {
    let mut sbs = new_video_stream();
    let frames = || vec![video_frame(0, 10, true), video_frame(10, 10, false), video_frame(20, 10, false)];

    sbs.append(frames()).unwrap();
    let before = sbs.buffered_ranges();

    sbs.remove(Timestamp::ZERO, Timestamp::new(30));
    assert!(sbs.buffered_ranges().is_empty());

    sbs.append(frames()).unwrap();
    assert_eq!(sbs.buffered_ranges(), before);
}
