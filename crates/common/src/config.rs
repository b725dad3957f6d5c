//! Application configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Export defaults.
    pub export: ExportDefaults,

    /// Caption rendering defaults.
    pub captions: CaptionDefaults,

    /// Narration sync tuning.
    pub sync: SyncDefaults,

    /// Font files used by the raster canvas.
    pub fonts: FontConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default export parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportDefaults {
    /// Frames per second of the render loop.
    pub fps: u32,

    /// Aspect preset name: `landscape`, `portrait`, `square` or `original`.
    pub aspect: String,

    /// Recording mime types in order of preference.
    pub mime_preferences: Vec<String>,

    /// How long priming waits for both media to load metadata.
    pub metadata_timeout_secs: f64,

    /// Primary time within this distance of the end counts as finished.
    pub end_epsilon_secs: f64,

    /// Extension used for the download name when `match_container` is off.
    pub file_extension: String,

    /// Name the download after the negotiated container instead.
    pub match_container: bool,

    /// Canvas fill behind the source frame (`#RRGGBB`).
    pub background_color: String,

    /// Directory exports are written to when no path is given.
    pub output_dir: PathBuf,
}

/// Default caption parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionDefaults {
    /// Whether captions are burned in.
    pub enabled: bool,

    /// Name of the active style preset.
    pub style: String,

    /// Multiplier applied to the computed font size.
    pub font_scale: f64,

    /// Caption bottom edge, in percent of canvas height from the bottom.
    pub vertical_position: f64,

    /// Render caption text uppercased.
    pub uppercase: bool,

    /// How long a cue stays on screen after its start (seconds).
    pub display_window_secs: f64,

    /// Optional JSON file with additional style presets.
    pub style_file: Option<PathBuf>,
}

/// Narration sync tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncDefaults {
    /// Drift beyond which a seek hard-resyncs the narration (seconds).
    pub drift_threshold_secs: f64,
}

/// Font lookup configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FontConfig {
    /// Font used when a family has no mapping.
    pub default_font: Option<PathBuf>,

    /// Family name (optionally suffixed `:bold`) to font file.
    pub families: BTreeMap<String, PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "dubline=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            fps: 30,
            aspect: "landscape".to_string(),
            mime_preferences: vec![
                "video/webm;codecs=vp9,opus".to_string(),
                "video/webm;codecs=vp8,opus".to_string(),
                "video/webm".to_string(),
                "video/mp4".to_string(),
            ],
            metadata_timeout_secs: 10.0,
            end_epsilon_secs: 0.05,
            file_extension: "mp4".to_string(),
            match_container: false,
            background_color: "#000000".to_string(),
            output_dir: dirs_default_exports(),
        }
    }
}

impl Default for CaptionDefaults {
    fn default() -> Self {
        Self {
            enabled: true,
            style: "Classic".to_string(),
            font_scale: 1.0,
            vertical_position: 10.0,
            uppercase: false,
            display_window_secs: 5.0,
            style_file: None,
        }
    }
}

impl Default for SyncDefaults {
    fn default() -> Self {
        Self {
            drift_threshold_secs: 0.5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from an explicit path, falling back to defaults.
    pub fn load_from(config_path: &std::path::Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("dubline").join("config.json")
}

/// Default export directory.
fn dirs_default_exports() -> PathBuf {
    let base = std::env::var("XDG_VIDEOS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join("Videos")
        });
    base.join("dubline")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"export": {"fps": 24}, "sync": {}}"#).unwrap();
        assert_eq!(config.export.fps, 24);
        assert_eq!(config.export.mime_preferences.len(), 4);
        assert_eq!(config.captions.display_window_secs, 5.0);
        assert_eq!(config.sync.drift_threshold_secs, 0.5);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = AppConfig::load_from(std::path::Path::new("/nonexistent/dubline.json"));
        assert_eq!(config.export.file_extension, "mp4");
        assert!(!config.export.match_container);
    }
}
