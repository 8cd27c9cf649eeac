use serde::Deserialize;
use smartlock_core::{MatchPolicy, DEFAULT_TOLERANCE};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming an optional TOML config file.
pub const CONFIG_PATH_VAR: &str = "SMARTLOCK_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config file {}: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },
}

/// Daemon configuration.
///
/// Built from defaults, then the TOML file named by `SMARTLOCK_CONFIG`
/// (if any), then `SMARTLOCK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    pub frame_rate: u32,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Enrolled gallery (JSON).
    pub gallery_path: PathBuf,
    /// Abort startup when the gallery cannot be loaded.
    pub gallery_required: bool,
    /// Maximum signature distance for a match (inclusive).
    pub tolerance: f32,
    /// Evaluate every Nth captured frame.
    pub recognize_every: u32,
    pub match_policy: MatchPolicy,
    /// Frames to discard at startup (camera AGC/AE stabilization).
    pub warmup_frames: u32,
    /// A camera that delivers no frame for this long is treated as failed.
    pub capture_timeout_ms: u64,
    /// Claim the bus name on the system bus instead of the session bus.
    pub system_bus: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            frame_width: 640,
            frame_height: 480,
            frame_rate: 30,
            model_dir: smartlock_core::default_model_dir(),
            gallery_path: data_dir().join("approved_faces.json"),
            gallery_required: false,
            tolerance: DEFAULT_TOLERANCE,
            recognize_every: 10,
            match_policy: MatchPolicy::First,
            warmup_frames: 4,
            capture_timeout_ms: smartlock_hw::DEFAULT_CAPTURE_TIMEOUT.as_millis() as u64,
            system_bus: false,
        }
    }
}

impl Config {
    /// Load configuration from the optional file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_PATH_VAR) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML file; keys it omits keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if !valid_tolerance(config.tolerance) {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                reason: format!("tolerance {} must be a non-negative number", config.tolerance),
            });
        }
        tracing::debug!(path = %path.display(), "read config file");
        Ok(config)
    }

    /// Apply `SMARTLOCK_*` overrides read through `var`.
    ///
    /// Values that fail to parse are logged and ignored.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(device) = var("SMARTLOCK_CAMERA_DEVICE") {
            self.camera_device = device;
        }
        if let Some(dir) = var("SMARTLOCK_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(path) = var("SMARTLOCK_GALLERY_PATH") {
            self.gallery_path = PathBuf::from(path);
        }

        env_parse(&var, "SMARTLOCK_FRAME_WIDTH", &mut self.frame_width);
        env_parse(&var, "SMARTLOCK_FRAME_HEIGHT", &mut self.frame_height);
        env_parse(&var, "SMARTLOCK_FRAME_RATE", &mut self.frame_rate);
        env_parse(&var, "SMARTLOCK_RECOGNIZE_EVERY", &mut self.recognize_every);
        env_parse(&var, "SMARTLOCK_WARMUP_FRAMES", &mut self.warmup_frames);
        env_parse(&var, "SMARTLOCK_CAPTURE_TIMEOUT_MS", &mut self.capture_timeout_ms);
        env_parse(&var, "SMARTLOCK_MATCH_POLICY", &mut self.match_policy);
        env_bool(&var, "SMARTLOCK_GALLERY_REQUIRED", &mut self.gallery_required);
        env_bool(&var, "SMARTLOCK_SYSTEM_BUS", &mut self.system_bus);

        let mut tolerance = self.tolerance;
        env_parse(&var, "SMARTLOCK_TOLERANCE", &mut tolerance);
        if valid_tolerance(tolerance) {
            self.tolerance = tolerance;
        } else {
            tracing::warn!(tolerance, kept = self.tolerance, "tolerance must be a non-negative number");
        }
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace signature model.
    pub fn extractor_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }
}

fn valid_tolerance(tolerance: f32) -> bool {
    tolerance.is_finite() && tolerance >= 0.0
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("smartlock")
}

fn env_parse<T>(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = var(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(e) => tracing::warn!(key, value = %raw, error = %e, "ignoring invalid setting"),
    }
}

fn env_bool(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut bool) {
    if let Some(raw) = var(key) {
        *slot = !matches!(raw.trim(), "" | "0" | "false" | "no" | "off");
    }
}
