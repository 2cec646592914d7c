use crate::error::ConfigError;
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which hardware model to emulate for a loaded cartridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ModelSelect {
    /// Use CGB when the cartridge header advertises CGB support.
    #[default]
    Auto,
    Dmg,
    Cgb,
}

/// Source of elapsed time for cartridge clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TimeMode {
    /// Clocks advance with emulated cycles.
    #[default]
    Cycle,
    /// Clocks advance with the host wall clock.
    Wall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RtcConfig {
    pub mode: TimeMode,
    /// Signed adjustment added to the 0x400000 cycles-per-second divisor.
    pub divisor_offset: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub model: ModelSelect,
    pub multicart_compat: bool,
    pub rtc: RtcConfig,
    /// Cycles (single speed) before an undriven cartridge bus floats to 0xFF.
    pub cart_bus_pull_up_time: u64,
    pub save_dir: Option<PathBuf>,
    pub dmg_bootrom_path: Option<PathBuf>,
    pub cgb_bootrom_path: Option<PathBuf>,
}

pub const DEFAULT_CART_BUS_PULL_UP_TIME: u64 = 8;

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            model: ModelSelect::Auto,
            multicart_compat: false,
            rtc: RtcConfig::default(),
            cart_bus_pull_up_time: DEFAULT_CART_BUS_PULL_UP_TIME,
            save_dir: None,
            dmg_bootrom_path: None,
            cgb_bootrom_path: None,
        }
    }
}

impl CoreConfig {
    /// Read a TOML configuration. Missing or malformed files yield the defaults.
    pub fn load_from_file(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(_) => return Self::default(),
        };

        match toml::from_str::<CoreConfig>(&text) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(
                    "Failed to parse core config {}: {e}; using defaults",
                    path.display()
                );
                Self::default()
            }
        }
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let cfg: CoreConfig = toml::from_str("model = \"cgb\"\n[rtc]\nmode = \"wall\"\n").unwrap();
        assert_eq!(cfg.model, ModelSelect::Cgb);
        assert_eq!(cfg.rtc.mode, TimeMode::Wall);
        assert_eq!(cfg.rtc.divisor_offset, 0);
        assert_eq!(cfg.cart_bus_pull_up_time, DEFAULT_CART_BUS_PULL_UP_TIME);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.toml");
        std::fs::write(&path, "model = [").unwrap();
        assert_eq!(CoreConfig::load_from_file(&path), CoreConfig::default());
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("core.toml");
        let cfg = CoreConfig {
            model: ModelSelect::Dmg,
            multicart_compat: true,
            rtc: RtcConfig {
                mode: TimeMode::Wall,
                divisor_offset: -12,
            },
            cart_bus_pull_up_time: 16,
            save_dir: Some(PathBuf::from("saves")),
            ..CoreConfig::default()
        };
        cfg.save_to_file(&path).unwrap();
        assert_eq!(CoreConfig::load_from_file(&path), cfg);
    }
}
