//! Built-in EQ Presets

use crate::error::DspError;

/// Named EQ preset with 5 band gains (60Hz, 250Hz, 1kHz, 4kHz, 16kHz)
pub type Preset = (&'static str, [f32; 5]);

/// Name reported once a band has been edited by hand
pub const CUSTOM_PRESET: &str = "Custom";

/// List of built-in presets
pub const PRESETS: &[Preset] = &[
    ("Flat", [0.0; 5]),
    ("Bass Boost", [6.0, 4.0, 0.0, 0.0, 0.0]),
    ("Treble Boost", [0.0, 0.0, 0.0, 4.0, 6.0]),
    ("Vocal Boost", [-2.0, 0.0, 4.0, 3.0, 0.0]),
    ("Loudness", [5.0, 2.0, -1.0, 2.0, 5.0]),
];

/// Look up a built-in preset by name (case-insensitive)
pub fn find_preset(name: &str) -> Result<&'static Preset, DspError> {
    PRESETS
        .iter()
        .find(|(preset_name, _)| preset_name.eq_ignore_ascii_case(name))
        .ok_or_else(|| DspError::UnknownPreset(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_is_first_and_neutral() {
        assert_eq!(PRESETS[0].0, "Flat");
        assert_eq!(PRESETS[0].1, [0.0; 5]);
    }

    #[test]
    fn test_presets_within_gain_range() {
        for (name, gains) in PRESETS {
            for gain in gains {
                assert!((-12.0..=12.0).contains(gain), "{name} has out-of-range gain {gain}");
            }
        }
    }

    #[test]
    fn test_find_preset_ignores_case() {
        let (name, gains) = find_preset("bass boost").unwrap();
        assert_eq!(*name, "Bass Boost");
        assert_eq!(gains[0], 6.0);

        assert!(matches!(
            find_preset("Nonexistent"),
            Err(DspError::UnknownPreset(_))
        ));
    }
}
