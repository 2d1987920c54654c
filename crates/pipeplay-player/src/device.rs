//! Output device enumeration and selection.
//!
//! Devices are addressed by their position in the host's enumeration order,
//! mirroring the index-based device API of the platform audio layer. The
//! registry only tracks a selection; it hands out fresh snapshots so device
//! hot-plugging between calls cannot leave stale capability data behind.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::PlayerError;
use pipeplay_types::DeviceInfo;

/// Tracks which output device new playback sessions will use.
///
/// Changing the selection never affects a session that is already running;
/// the engine snapshots the index when it spawns a worker.
pub struct DeviceRegistry {
    host: cpal::Host,
    selected: Option<usize>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
            selected: None,
        }
    }

    /// Number of devices the host currently reports.
    pub fn count(&self) -> usize {
        self.host.devices().map(|it| it.count()).unwrap_or(0)
    }

    /// Metadata for the device at `index`, or for the currently selected
    /// (falling back to the host default) device when `index` is `None`.
    pub fn info(&self, index: Option<usize>) -> Result<DeviceInfo, PlayerError> {
        match index.or(self.selected) {
            Some(i) => self.info_at(i),
            None => self.default_info(),
        }
    }

    /// Select the output device for sessions created after this call.
    ///
    /// `None` re-affirms the current default selection and changes nothing.
    pub fn set_output(&mut self, index: Option<usize>) -> Result<(), PlayerError> {
        let Some(index) = index else {
            return Ok(());
        };
        let count = self.count();
        if index >= count {
            return Err(PlayerError::InvalidDevice { index, count });
        }
        tracing::info!(index, "output device selected");
        self.selected = Some(index);
        Ok(())
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    fn info_at(&self, index: usize) -> Result<DeviceInfo, PlayerError> {
        let count = self.count();
        let device = self
            .host
            .devices()
            .ok()
            .and_then(|mut it| it.nth(index))
            .ok_or(PlayerError::InvalidDevice { index, count })?;
        Ok(describe(&self.host, &device, index))
    }

    fn default_info(&self) -> Result<DeviceInfo, PlayerError> {
        let default = self
            .host
            .default_output_device()
            .ok_or_else(|| PlayerError::OutputDevice("no default output device".into()))?;
        let index = self.position_of(&default).unwrap_or(0);
        Ok(describe(&self.host, &default, index))
    }

    fn position_of(&self, device: &cpal::Device) -> Option<usize> {
        let devices = self.host.devices().ok()?;
        for (i, d) in devices.enumerate() {
            if same_device(&d, device) {
                return Some(i);
            }
        }
        None
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve the device new sessions should open: an explicit index, or the
/// host default.
pub(crate) fn output_device_at(
    host: &cpal::Host,
    index: Option<usize>,
) -> Result<cpal::Device, PlayerError> {
    match index {
        Some(index) => {
            let count = host.devices().map(|it| it.count()).unwrap_or(0);
            host.devices()
                .ok()
                .and_then(|mut it| it.nth(index))
                .ok_or(PlayerError::InvalidDevice { index, count })
        }
        None => host
            .default_output_device()
            .ok_or_else(|| PlayerError::OutputDevice("no default output device".into())),
    }
}

fn describe(host: &cpal::Host, device: &cpal::Device, index: usize) -> DeviceInfo {
    let name = device
        .description()
        .map(|d| d.to_string())
        .unwrap_or_else(|_| format!("device #{index}"));

    let max_output_channels = max_channels(device.supported_output_configs().ok());
    let max_input_channels = max_channels(device.supported_input_configs().ok());
    let default_sample_rate = device.default_output_config().ok().map(|c| c.sample_rate());

    let is_default = host
        .default_output_device()
        .map(|d| same_device(&d, device))
        .unwrap_or(false);

    DeviceInfo {
        index,
        name,
        max_input_channels,
        max_output_channels,
        default_sample_rate,
        is_default,
    }
}

fn max_channels<I>(ranges: Option<I>) -> u16
where
    I: Iterator<Item = cpal::SupportedStreamConfigRange>,
{
    ranges
        .map(|it| it.map(|r| r.channels()).max().unwrap_or(0))
        .unwrap_or(0)
}

fn same_device(a: &cpal::Device, b: &cpal::Device) -> bool {
    match (a.id(), b.id()) {
        (Ok(ia), Ok(ib)) => ia.to_string() == ib.to_string(),
        _ => match (a.description(), b.description()) {
            (Ok(da), Ok(db)) => da.to_string() == db.to_string(),
            _ => false,
        },
    }
}

/// Choose the best output config for a target sample rate.
///
/// Prefers rates at or below the target (exact match first), then higher
/// rates, then the friendlier sample format.
pub(crate) fn pick_output_config(
    device: &cpal::Device,
    target_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig, PlayerError> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| PlayerError::OutputDevice(format!("supported configs: {e}")))?
        .collect();
    if ranges.is_empty() {
        return Err(PlayerError::OutputDevice("no supported output configs".into()));
    }

    let mut best: Option<(bool, u32, u8, cpal::SupportedStreamConfig)> = None;

    for range in ranges {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let below = target_rate.map(|t| rate <= t).unwrap_or(true);
        let format_rank = sample_format_rank(range.sample_format());
        let cfg = range.with_sample_rate(rate);
        let replace = match &best {
            None => true,
            Some((b_below, b_rate, b_rank, _)) => {
                is_better_candidate(below, rate, format_rank, *b_below, *b_rate, *b_rank)
            }
        };
        if replace {
            best = Some((below, rate, format_rank, cfg));
        }
    }

    Ok(best.unwrap().3)
}

/// Prefer a fixed buffer size if the device advertises a range.
///
/// Returns `None` when the device only supports its default buffer size.
pub(crate) fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            const MAX_FRAMES: u32 = 16_384;
            let chosen = if *max > MAX_FRAMES {
                if *min > MAX_FRAMES { *min } else { MAX_FRAMES }
            } else {
                *max
            };
            Some(cpal::BufferSize::Fixed(chosen))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn pick_rate_for_range(min: u32, max: u32, target_rate: Option<u32>) -> u32 {
    match target_rate {
        Some(target) => {
            if target >= min && target <= max {
                target
            } else if target < min {
                min
            } else {
                max
            }
        }
        None => max,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn is_better_candidate(
    below: bool,
    rate: u32,
    format_rank: u8,
    best_below: bool,
    best_rate: u32,
    best_rank: u8,
) -> bool {
    if below != best_below {
        below && !best_below
    } else if rate != best_rate {
        rate > best_rate
    } else {
        format_rank < best_rank
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_rate_for_range_prefers_target_when_in_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(48_000)), 48_000);
    }

    #[test]
    fn pick_rate_for_range_clamps_below_min() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(22_050)), 44_100);
    }

    #[test]
    fn pick_rate_for_range_clamps_above_max() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(192_000)), 96_000);
    }

    #[test]
    fn pick_rate_for_range_defaults_to_max() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, None), 96_000);
    }

    #[test]
    fn is_better_candidate_prefers_below_target() {
        assert!(is_better_candidate(true, 48_000, 1, false, 48_000, 1));
    }

    #[test]
    fn is_better_candidate_prefers_higher_rate() {
        assert!(is_better_candidate(true, 96_000, 2, true, 48_000, 2));
    }

    #[test]
    fn is_better_candidate_prefers_lower_rank() {
        assert!(is_better_candidate(true, 48_000, 0, true, 48_000, 2));
    }

    #[test]
    fn sample_format_ranking_order() {
        assert!(sample_format_rank(cpal::SampleFormat::F32) < sample_format_rank(cpal::SampleFormat::I16));
        assert!(sample_format_rank(cpal::SampleFormat::I16) < sample_format_rank(cpal::SampleFormat::U16));
    }
}
