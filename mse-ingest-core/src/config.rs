// mse-ingest-core
// Copyright (c) 2019-2026 The Project MSE Ingest Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `config` module defines the opaque, comparable decoder configuration
//! types the ingest core tracks per append, plus the per-stream options
//! surface (`SourceBufferStreamOptions`).
//!
//! Codec-specific config matching (the actual decision of whether two
//! `AudioCodecId`s are "the same codec" beyond equality) is explicitly out
//! of scope (§1); the core only ever compares these for equality and
//! tracks which config index is current vs. pending.

use std::fmt;

/// An opaque codec identifier. The core never interprets this beyond
/// equality comparison.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CodecId(u32);

impl CodecId {
    pub const fn new(id: u32) -> Self {
        CodecId(id)
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "codec#{:#x}", self.0)
    }
}

/// An opaque encryption scheme identifier. `None` means "not encrypted".
/// Like `CodecId`, the core only ever compares this for equality.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EncryptionScheme(Option<u32>);

impl EncryptionScheme {
    pub const UNENCRYPTED: EncryptionScheme = EncryptionScheme(None);

    pub const fn new(scheme_id: u32) -> Self {
        EncryptionScheme(Some(scheme_id))
    }

    pub fn is_encrypted(self) -> bool {
        self.0.is_some()
    }
}

impl Default for EncryptionScheme {
    fn default() -> Self {
        EncryptionScheme::UNENCRYPTED
    }
}

/// An audio decoder configuration. Two configs are config-compatible for
/// `update_audio_config` purposes iff `codec` and `encryption` match;
/// `samples_per_second` may change freely and only affects preroll/sample
/// duration bookkeeping in the frame processor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AudioConfig {
    pub codec: CodecId,
    pub encryption: EncryptionScheme,
    pub samples_per_second: u32,
}

impl AudioConfig {
    pub fn new(codec: CodecId, samples_per_second: u32) -> Self {
        AudioConfig { codec, encryption: EncryptionScheme::UNENCRYPTED, samples_per_second }
    }

    pub fn with_encryption(mut self, scheme: EncryptionScheme) -> Self {
        self.encryption = scheme;
        self
    }

    /// Duration, in ticks of `time_base`, of a single sample. Used for the
    /// audio preroll-abutment test (§4.1 step 7) and splice minimum-span
    /// test (§4.2.4).
    pub fn sample_duration_ticks(&self, ticks_per_second: u64) -> u64 {
        if self.samples_per_second == 0 {
            0
        }
        else {
            ticks_per_second / u64::from(self.samples_per_second)
        }
    }

    /// `true` if `other` is an acceptable in-place config update: same
    /// codec, same encryption scheme.
    pub fn is_compatible_update(&self, other: &AudioConfig) -> bool {
        self.incompatibility(other).is_none()
    }

    fn incompatibility(&self, other: &AudioConfig) -> Option<crate::errors::IngestError> {
        if self.codec != other.codec {
            Some(crate::errors::IngestError::CodecMismatch)
        }
        else if self.encryption != other.encryption {
            Some(crate::errors::IngestError::EncryptionMismatch)
        }
        else {
            None
        }
    }
}

/// A video decoder configuration. Same compatibility rule as `AudioConfig`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VideoConfig {
    pub codec: CodecId,
    pub encryption: EncryptionScheme,
}

impl VideoConfig {
    pub fn new(codec: CodecId) -> Self {
        VideoConfig { codec, encryption: EncryptionScheme::UNENCRYPTED }
    }

    pub fn with_encryption(mut self, scheme: EncryptionScheme) -> Self {
        self.encryption = scheme;
        self
    }

    pub fn is_compatible_update(&self, other: &VideoConfig) -> bool {
        self.incompatibility(other).is_none()
    }

    fn incompatibility(&self, other: &VideoConfig) -> Option<crate::errors::IngestError> {
        if self.codec != other.codec {
            Some(crate::errors::IngestError::CodecMismatch)
        }
        else if self.encryption != other.encryption {
            Some(crate::errors::IngestError::EncryptionMismatch)
        }
        else {
            None
        }
    }
}

/// A text track configuration. Text tracks carry a single, unversioned
/// config for their lifetime (§3, "text_config").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextConfig {
    pub kind: String,
    pub label: String,
    pub language: String,
}

/// The set of decoder configs tracked by one `SourceBufferStream`, indexed
/// by config-version id. Only one of the three variants is populated for a
/// given stream, matching the per-track-kind `audio_configs`/
/// `video_configs`/`text_config` split in §3.
#[derive(Clone, Debug)]
pub enum ConfigTable {
    Audio(Vec<AudioConfig>),
    Video(Vec<VideoConfig>),
    Text(TextConfig),
}

impl ConfigTable {
    pub fn new_audio(initial: AudioConfig) -> Self {
        ConfigTable::Audio(vec![initial])
    }

    pub fn new_video(initial: VideoConfig) -> Self {
        ConfigTable::Video(vec![initial])
    }

    pub fn new_text(config: TextConfig) -> Self {
        ConfigTable::Text(config)
    }

    /// Resolve or register an audio config update, returning its index.
    /// Fails if the codec or encryption scheme differs from every
    /// registered config (§4.2 `update_audio_config`).
    pub fn update_audio(&mut self, config: AudioConfig) -> Result<u32, crate::errors::IngestError> {
        match self {
            ConfigTable::Audio(configs) => update_config_list(configs, config, |a, b| match a.incompatibility(b) {
                Some(reason) => crate::errors::config_rejected_error(reason),
                None => Ok(()),
            }),
            _ => unreachable!("update_audio called on a non-audio config table"),
        }
    }

    /// Resolve or register a video config update, returning its index.
    pub fn update_video(&mut self, config: VideoConfig) -> Result<u32, crate::errors::IngestError> {
        match self {
            ConfigTable::Video(configs) => update_config_list(configs, config, |a, b| match a.incompatibility(b) {
                Some(reason) => crate::errors::config_rejected_error(reason),
                None => Ok(()),
            }),
            _ => unreachable!("update_video called on a non-video config table"),
        }
    }

    pub fn audio(&self, index: u32) -> &AudioConfig {
        match self {
            ConfigTable::Audio(configs) => &configs[index as usize],
            _ => unreachable!("audio() called on a non-audio config table"),
        }
    }

    pub fn video(&self, index: u32) -> &VideoConfig {
        match self {
            ConfigTable::Video(configs) => &configs[index as usize],
            _ => unreachable!("video() called on a non-video config table"),
        }
    }
}

/// Shared update logic for `audio_configs`/`video_configs`: adopt an
/// existing matching index, or reject/append.
fn update_config_list<C: PartialEq + Copy>(
    configs: &mut Vec<C>,
    new_config: C,
    check_compatible: impl Fn(&C, &C) -> Result<(), crate::errors::IngestError>,
) -> Result<u32, crate::errors::IngestError> {
    // The most recently appended config is the natural compatibility anchor:
    // it is what `update_*_config` is actually being compared against.
    let anchor = configs.last().expect("config table is never empty");
    check_compatible(anchor, &new_config)?;

    if let Some(pos) = configs.iter().position(|c| *c == new_config) {
        Ok(pos as u32)
    }
    else {
        configs.push(new_config);
        Ok((configs.len() - 1) as u32)
    }
}

/// Per-stream options, analogous to `symphonia_core::formats::FormatOptions`.
#[derive(Clone, Debug)]
pub struct SourceBufferStreamOptions {
    /// Maximum number of bytes of frame payload the stream will retain
    /// before `garbage_collect_if_needed` must free space.
    pub memory_limit_bytes: u64,
    /// Whether partial append-window trimming and audio preroll/splice
    /// synthesis are enabled for this stream. Only meaningful for audio
    /// streams; ignored for video/text.
    pub enable_audio_splice_and_preroll: bool,
}

impl Default for SourceBufferStreamOptions {
    fn default() -> Self {
        // 150 MB, matching Chromium's SourceBufferStream default memory
        // budget for an audio/video track.
        SourceBufferStreamOptions {
            memory_limit_bytes: 150 * 1024 * 1024,
            enable_audio_splice_and_preroll: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_audio_config_adopts_existing_index() {
        let codec = CodecId::new(1);
        let mut table = ConfigTable::new_audio(AudioConfig::new(codec, 44_100));
        let idx = table.update_audio(AudioConfig::new(codec, 48_000)).unwrap();
        assert_eq!(idx, 1);
        // Re-adopting the original config must return index 0, not push a
        // third entry.
        let idx2 = table.update_audio(AudioConfig::new(codec, 44_100)).unwrap();
        assert_eq!(idx2, 0);
    }

    #[test]
    fn update_audio_config_rejects_codec_change() {
        let mut table = ConfigTable::new_audio(AudioConfig::new(CodecId::new(1), 44_100));
        let err = table.update_audio(AudioConfig::new(CodecId::new(2), 44_100)).unwrap_err();
        assert!(matches!(err, crate::errors::IngestError::CodecMismatch));
    }

    #[test]
    fn update_audio_config_rejects_encryption_change() {
        let mut table = ConfigTable::new_audio(AudioConfig::new(CodecId::new(1), 44_100));
        let encrypted =
            AudioConfig::new(CodecId::new(1), 44_100).with_encryption(EncryptionScheme::new(7));
        let err = table.update_audio(encrypted).unwrap_err();
        assert!(matches!(err, crate::errors::IngestError::EncryptionMismatch));
    }

    #[test]
    fn sample_duration_ticks_matches_rate() {
        let config = AudioConfig::new(CodecId::new(1), 1000);
        assert_eq!(config.sample_duration_ticks(1000), 1);
    }
}
