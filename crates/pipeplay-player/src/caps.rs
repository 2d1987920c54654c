//! Capability registry.
//!
//! An explicit value the composing application creates, queries, and drops —
//! there is no ambient library-wide init state. `detect_with` reports which
//! features are usable on this machine (tool on PATH, output device present)
//! so callers can branch on "feature unavailable" up front instead of
//! inspecting operation errors later.

use std::collections::BTreeSet;
use std::process::{Command, Stdio};

use cpal::traits::HostTrait;

/// A feature the playback stack may or may not be able to provide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Feature {
    /// Metadata probing (probe tool available).
    Probe,
    /// Streaming decode (decode tool available).
    Decode,
    /// Audio output (an output device exists).
    Playback,
}

/// Set of enabled features.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    enabled: BTreeSet<Feature>,
}

impl Capabilities {
    /// Empty registry; enable features explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Detect capabilities with the default tool names.
    pub fn detect() -> Self {
        Self::detect_with("ffprobe", "ffmpeg")
    }

    /// Detect capabilities for specific probe/decode tool binaries.
    pub fn detect_with(probe_tool: &str, decode_tool: &str) -> Self {
        let mut caps = Self::new();
        if tool_available(probe_tool) {
            caps.enable(Feature::Probe);
        }
        if tool_available(decode_tool) {
            caps.enable(Feature::Decode);
        }
        if cpal::default_host().default_output_device().is_some() {
            caps.enable(Feature::Playback);
        }
        tracing::debug!(?caps, "capabilities detected");
        caps
    }

    /// Enable a feature; returns `true` if it was newly enabled.
    pub fn enable(&mut self, feature: Feature) -> bool {
        self.enabled.insert(feature)
    }

    /// Disable a feature; returns `true` if it was enabled before.
    pub fn disable(&mut self, feature: Feature) -> bool {
        self.enabled.remove(&feature)
    }

    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.enabled.contains(&feature)
    }

    /// Enabled features in a stable order.
    pub fn enabled(&self) -> impl Iterator<Item = Feature> + '_ {
        self.enabled.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }
}

/// Whether `tool -version` runs successfully.
fn tool_available(tool: &str) -> bool {
    Command::new(tool)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
