//! Engine configuration.
//!
//! Stored as a flat `key=value` text file, one setting per line.  Unknown keys
//! are ignored and values that fail to parse keep their defaults, so an old or
//! hand-edited file never prevents the engine from starting.

use std::path::Path;

#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    /// Magic-wand colour tolerance (Manhattan RGB distance, 0–765).
    pub wand_tolerance: u32,
    /// Bucket-fill colour tolerance (same metric as the wand).
    pub fill_tolerance: u32,
    /// Douglas–Peucker threshold for traced contours, in pixels.
    pub simplify_epsilon: f64,
    /// World-space offset applied to both axes when duplicating a layer.
    pub duplicate_offset: f64,
    /// Longest edge of the display proxy built for oversized images.
    pub max_display_size: u32,
    /// Longest edge of the low-resolution interaction proxy.
    pub low_res_proxy_size: u32,
    /// Longest edge of layer thumbnails.
    pub thumbnail_size: u32,
    /// Maximum entries kept per history timeline.
    pub max_history_steps: usize,
    /// DPI assumed when a source carries no resolution metadata.
    pub default_dpi: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            wand_tolerance: 30,
            fill_tolerance: 30,
            simplify_epsilon: 1.5,
            duplicate_offset: 20.0,
            max_display_size: 8192,
            low_res_proxy_size: 1000,
            thumbnail_size: 128,
            max_history_steps: 50,
            default_dpi: 96.0,
        }
    }
}

impl EngineSettings {
    /// Parse settings from `key=value` lines on top of the defaults.
    pub fn from_config_str(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "wand_tolerance" => {
                    if let Ok(v) = val.parse() {
                        s.wand_tolerance = v;
                    }
                }
                "fill_tolerance" => {
                    if let Ok(v) = val.parse() {
                        s.fill_tolerance = v;
                    }
                }
                "simplify_epsilon" => {
                    if let Ok(v) = val.parse::<f64>()
                        && v >= 0.0
                    {
                        s.simplify_epsilon = v;
                    }
                }
                "duplicate_offset" => {
                    if let Ok(v) = val.parse() {
                        s.duplicate_offset = v;
                    }
                }
                "max_display_size" => {
                    if let Ok(v) = val.parse::<u32>()
                        && v > 0
                    {
                        s.max_display_size = v;
                    }
                }
                "low_res_proxy_size" => {
                    if let Ok(v) = val.parse::<u32>()
                        && v > 0
                    {
                        s.low_res_proxy_size = v;
                    }
                }
                "thumbnail_size" => {
                    if let Ok(v) = val.parse::<u32>()
                        && v > 0
                    {
                        s.thumbnail_size = v;
                    }
                }
                "max_history_steps" => {
                    if let Ok(v) = val.parse::<usize>()
                        && v > 0
                    {
                        s.max_history_steps = v;
                    }
                }
                "default_dpi" => {
                    if let Ok(v) = val.parse::<f64>()
                        && v > 0.0
                    {
                        s.default_dpi = v;
                    }
                }
                _ => {}
            }
        }
        s
    }

    /// Load settings from disk, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_config_str(&content),
            Err(e) => {
                log_warn!("settings: using defaults, cannot read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "wand_tolerance={}\n\
             fill_tolerance={}\n\
             simplify_epsilon={}\n\
             duplicate_offset={}\n\
             max_display_size={}\n\
             low_res_proxy_size={}\n\
             thumbnail_size={}\n\
             max_history_steps={}\n\
             default_dpi={}\n",
            self.wand_tolerance,
            self.fill_tolerance,
            self.simplify_epsilon,
            self.duplicate_offset,
            self.max_display_size,
            self.low_res_proxy_size,
            self.thumbnail_size,
            self.max_history_steps,
            self.default_dpi,
        )
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_keys_and_ignores_the_rest() {
        let s = EngineSettings::from_config_str(
            "# engine\nwand_tolerance=12\nsimplify_epsilon = 0.75\nfoo=bar\nmax_history_steps=abc\n",
        );
        assert_eq!(s.wand_tolerance, 12);
        assert_eq!(s.simplify_epsilon, 0.75);
        assert_eq!(s.max_history_steps, EngineSettings::default().max_history_steps);
    }

    #[test]
    fn config_string_reloads_to_same_settings() {
        let mut s = EngineSettings::default();
        s.fill_tolerance = 5;
        s.duplicate_offset = 8.5;
        s.default_dpi = 300.0;
        assert_eq!(EngineSettings::from_config_str(&s.to_config_string()), s);
    }

    #[test]
    fn rejects_non_positive_sizes() {
        let s = EngineSettings::from_config_str("max_display_size=0\ndefault_dpi=-3\n");
        assert_eq!(s.max_display_size, 8192);
        assert_eq!(s.default_dpi, 96.0);
    }
}
