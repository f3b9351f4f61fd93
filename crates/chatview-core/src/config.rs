use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};

use crate::normalization::CharWidthMeasure;

pub const DEFAULT_MAX_WIDTH_FRACTION: f32 = 0.8;
pub const DEFAULT_FROM_LABEL_MAX_LEN: usize = 40;
pub const DEFAULT_FROM_LABEL_KEEP: usize = 8;
pub const DEFAULT_TOOLTIP_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";
pub const DEFAULT_COPY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DEFAULT_PX_PER_CHAR: u32 = 7;

/// Tuning values for display-fact derivation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ViewConfig {
    /// Share of the list width a message body may occupy.
    pub max_width_fraction: f32,
    /// Bare addresses longer than this are shortened in from labels.
    pub from_label_max_len: usize,
    /// Characters kept when shortening a from label.
    pub from_label_keep: usize,
    /// `chrono` format for tooltip times.
    pub tooltip_time_format: String,
    /// `chrono` format for the copy action.
    pub copy_time_format: String,
    /// Advance used by the default text measure.
    pub px_per_char: u32,
}

impl ViewConfig {
    pub fn default_measure(&self) -> CharWidthMeasure {
        CharWidthMeasure {
            px_per_char: self.px_per_char.max(1),
        }
    }

    /// Clamp a preferred content width against the list width.
    pub fn clamp_width(&self, preferred: u32, list_width: u32) -> u32 {
        let fraction = self.max_width_fraction.clamp(0.0, 1.0);
        let max_width = (list_width as f32 * fraction) as u32;
        preferred.min(max_width)
    }
}

/// Whether `format` parses as a `chrono` strftime format.
pub fn is_valid_time_format(format: &str) -> bool {
    StrftimeItems::new(format).all(|item| !matches!(item, Item::Error))
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            max_width_fraction: DEFAULT_MAX_WIDTH_FRACTION,
            from_label_max_len: DEFAULT_FROM_LABEL_MAX_LEN,
            from_label_keep: DEFAULT_FROM_LABEL_KEEP,
            tooltip_time_format: DEFAULT_TOOLTIP_TIME_FORMAT.to_owned(),
            copy_time_format: DEFAULT_COPY_TIME_FORMAT.to_owned(),
            px_per_char: DEFAULT_PX_PER_CHAR,
        }
    }
}
