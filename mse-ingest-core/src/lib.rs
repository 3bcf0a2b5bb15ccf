// mse-ingest-core
// Copyright (c) 2019-2026 The Project MSE Ingest Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Media Source Extensions coded-frame processing and source-buffer-stream
//! ingest core.
//!
//! A caller feeds demuxed, timestamped frames to a [`frame_processor`],
//! which runs the coded frame processing algorithm and appends the result
//! into one [`source_buffer_stream`] per track. Each stream is a sequence of
//! non-overlapping, gap-separated [`range`]s of frames; callers read frames
//! back out track-by-track via `SourceBufferStream::get_next_buffer`.
//!
//! Track configuration (codec, encryption, sample rate, ...) is tracked
//! separately from frame data in [`config`], so that a config change can be
//! signalled to a reader exactly once, immediately before the first frame
//! that depends on it.

pub mod config;
pub mod errors;
pub mod frame;
pub mod frame_processor;
pub mod range;
pub mod source_buffer_stream;
pub mod track_buffer;
pub mod units;

pub use config::{AudioConfig, CodecId, ConfigTable, EncryptionScheme, SourceBufferStreamOptions, TextConfig, VideoConfig};
pub use errors::{IngestError, Result};
pub use frame::{DiscardPadding, Frame, FrameBuilder, TrackKind};
pub use frame_processor::{FrameProcessor, MseTrackBuffer, RawFrame};
pub use source_buffer_stream::{ReadStatus, SourceBufferStream};
pub use units::{Duration, PresentationDuration, TimeBase, Timestamp};
