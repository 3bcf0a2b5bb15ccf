// mse-ingest-core
// Copyright (c) 2019-2026 The Project MSE Ingest Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type returned by `append`
//! and configuration updates.
//!
//! Read-completion statuses (`ReadStatus`) and the garbage collector's
//! success flag are *not* part of this error channel: they are ordinary
//! return values, not failure modes. Only conditions that abort an `append`
//! or reject a configuration update are represented here.

use std::error::Error as StdError;
use std::fmt;

use crate::units::Timestamp;

/// `IngestError` enumerates every fatal condition the coded frame processor
/// or source buffer stream can report.
#[derive(Debug)]
pub enum IngestError {
    /// A frame carried no timestamp or a negative duration (§4.1 step 1).
    MissingTimestampOrDuration,
    /// A frame referenced a track id with no registered `MseTrackBuffer`
    /// (§4.1 step 4).
    UnknownTrack(u32),
    /// After offset application and append-window trimming, a frame's
    /// decode timestamp was still negative (§4.1 step 9).
    NegativeDecodeTimestamp(Timestamp),
    /// Frames within one append, or across appends in the same coded frame
    /// group, were not monotonically non-decreasing in DTS (§4.2.1).
    NonMonotonicDecodeTimestamp { previous: Timestamp, next: Timestamp },
    /// The first frame of a new coded frame group was not a keyframe, and
    /// the group did not continue adjacent to the previous append (§4.2.1).
    GroupDoesNotStartWithKeyframe,
    /// `update_audio_config`/`update_video_config` was called with a config
    /// whose codec differs from every config already registered.
    CodecMismatch,
    /// `update_audio_config`/`update_video_config` was called with a config
    /// whose encryption scheme differs from every config already
    /// registered.
    EncryptionMismatch,
    /// The stream has been shut down; no further mutation is permitted.
    ShutDown,
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::MissingTimestampOrDuration => {
                write!(f, "frame carried no timestamp or a negative duration")
            }
            IngestError::UnknownTrack(id) => {
                write!(f, "no track buffer registered for track id {id}")
            }
            IngestError::NegativeDecodeTimestamp(dts) => {
                write!(f, "decode timestamp {dts} is negative after offset and trimming")
            }
            IngestError::NonMonotonicDecodeTimestamp { previous, next } => {
                write!(
                    f,
                    "decode timestamp {next} is not monotonically non-decreasing after {previous}"
                )
            }
            IngestError::GroupDoesNotStartWithKeyframe => {
                write!(f, "first frame of a new coded frame group is not a keyframe")
            }
            IngestError::CodecMismatch => {
                write!(f, "config update changes codec, which is not permitted")
            }
            IngestError::EncryptionMismatch => {
                write!(f, "config update changes encryption scheme, which is not permitted")
            }
            IngestError::ShutDown => {
                write!(f, "source buffer stream has been shut down")
            }
        }
    }
}

impl StdError for IngestError {}

pub type Result<T> = core::result::Result<T, IngestError>;

/// Convenience constructor for a missing timestamp/duration parse error.
pub fn missing_timestamp_error<T>() -> Result<T> {
    Err(IngestError::MissingTimestampOrDuration)
}

/// Convenience constructor for an unknown-track parse error.
pub fn unknown_track_error<T>(track_id: u32) -> Result<T> {
    Err(IngestError::UnknownTrack(track_id))
}

/// Convenience constructor for a negative decode timestamp error.
pub fn negative_dts_error<T>(dts: Timestamp) -> Result<T> {
    Err(IngestError::NegativeDecodeTimestamp(dts))
}

/// Convenience constructor for a non-monotonic decode timestamp error.
pub fn non_monotonic_dts_error<T>(previous: Timestamp, next: Timestamp) -> Result<T> {
    Err(IngestError::NonMonotonicDecodeTimestamp { previous, next })
}

/// Convenience constructor for a missing-leading-keyframe parse error.
pub fn group_missing_keyframe_error<T>() -> Result<T> {
    Err(IngestError::GroupDoesNotStartWithKeyframe)
}

/// Convenience constructor for a rejected config update.
pub fn config_rejected_error<T>(reason: IngestError) -> Result<T> {
    Err(reason)
}

/// Convenience constructor for a mutation attempted after shutdown.
pub fn shutdown_error<T>() -> Result<T> {
    Err(IngestError::ShutDown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_non_empty() {
        let errs = [
            IngestError::MissingTimestampOrDuration,
            IngestError::UnknownTrack(3),
            IngestError::NegativeDecodeTimestamp(Timestamp::new(-5)),
            IngestError::NonMonotonicDecodeTimestamp {
                previous: Timestamp::new(10),
                next: Timestamp::new(5),
            },
            IngestError::GroupDoesNotStartWithKeyframe,
            IngestError::CodecMismatch,
            IngestError::EncryptionMismatch,
            IngestError::ShutDown,
        ];
        for err in errs {
            assert!(!err.to_string().is_empty());
        }
    }
}
