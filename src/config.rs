//! Configuration management for uop-emu.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (`UOP_EMU_TRACE`/`TRACE`, `EMULATE_METAL`, `EMULATE_HIP`, `UOP_EMU_MANIFEST_DIR`)
//! 2. Project-local config file (`./uop-emu.toml`)
//! 3. User config file (`~/.config/uop-emu/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # uop-emu.toml
//!
//! # Log every executed instruction
//! trace = false
//!
//! # Emulated hardware target: "metal" or "hip"
//! emulate = "metal"
//!
//! # Directory searched by `uop-emu suite`
//! manifest_dir = "manifests"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Hardware target whose launch options are emulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmulatedTarget {
    #[default]
    Generic,
    Metal,
    Hip,
}

impl EmulatedTarget {
    pub fn device(self) -> &'static str {
        match self {
            EmulatedTarget::Generic => "GENERIC",
            EmulatedTarget::Metal => "METAL",
            EmulatedTarget::Hip => "HIP",
        }
    }

    pub fn has_tensor_cores(self) -> bool {
        !matches!(self, EmulatedTarget::Generic)
    }

    /// Tag a code generator would attach to this target's WMMA instructions.
    pub fn wmma_tag(self) -> Option<&'static str> {
        match self {
            EmulatedTarget::Generic => None,
            EmulatedTarget::Metal => Some("__metal_wmma<float2,float2,float2>"),
            EmulatedTarget::Hip => Some("__builtin_amdgcn_wmma_f32_16x16x16_f16_w32"),
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "metal" => Some(EmulatedTarget::Metal),
            "hip" => Some(EmulatedTarget::Hip),
            "" | "generic" => Some(EmulatedTarget::Generic),
            _ => None,
        }
    }
}

/// uop-emu configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Log every executed instruction at trace level.
    pub trace: Option<bool>,

    /// Emulated hardware target (`"metal"` or `"hip"`).
    pub emulate: Option<String>,

    /// Directory of kernel manifests run by `uop-emu suite`.
    pub manifest_dir: Option<String>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `uop-emu.toml`
    /// 3. User config `~/.config/uop-emu/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        config.apply_env_overrides(|key| std::env::var(key).ok());

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    pub fn trace(&self) -> bool {
        self.trace.unwrap_or(false)
    }

    /// Emulated target; unknown names fall back to generic.
    pub fn target(&self) -> EmulatedTarget {
        let Some(name) = self.emulate.as_deref() else {
            return EmulatedTarget::Generic;
        };
        EmulatedTarget::parse(name).unwrap_or_else(|| {
            log::warn!("Unknown emulated target '{}', using generic", name);
            EmulatedTarget::Generic
        })
    }

    /// Manifest directory, with fallback to `./manifests`.
    pub fn manifest_dir(&self) -> PathBuf {
        self.manifest_dir
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("manifests"))
    }

    /// Load user configuration from ~/.config/uop-emu/config.toml
    fn load_user_config() -> Option<Self> {
        Self::load_from_file(&Self::user_config_path()?)
    }

    /// Load project-local configuration from ./uop-emu.toml
    fn load_local_config() -> Option<Self> {
        let local_path = Path::new("uop-emu.toml");
        if let Some(config) = Self::load_from_file(local_path) {
            return Some(config);
        }

        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let project_path = Path::new(&manifest_dir).join("uop-emu.toml");
            if let Some(config) = Self::load_from_file(&project_path) {
                return Some(config);
            }
        }

        None
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        if other.trace.is_some() {
            self.trace = other.trace;
        }
        if other.emulate.is_some() {
            self.emulate = other.emulate;
        }
        if other.manifest_dir.is_some() {
            self.manifest_dir = other.manifest_dir;
        }
    }

    /// Apply environment variable overrides read through `var`.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let flag = |key: &str| var(key).map(|v| !matches!(v.trim(), "" | "0" | "false"));

        if let Some(trace) = flag("UOP_EMU_TRACE").or_else(|| flag("TRACE")) {
            log::info!("Using trace={} from environment", trace);
            self.trace = Some(trace);
        }
        if flag("EMULATE_METAL") == Some(true) {
            log::info!("Using EMULATE_METAL from environment");
            self.emulate = Some("metal".to_string());
        } else if flag("EMULATE_HIP") == Some(true) {
            log::info!("Using EMULATE_HIP from environment");
            self.emulate = Some("hip".to_string());
        }
        if let Some(dir) = var("UOP_EMU_MANIFEST_DIR") {
            log::info!("Using UOP_EMU_MANIFEST_DIR from environment: {}", dir);
            self.manifest_dir = Some(dir);
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("uop-emu").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# uop-emu configuration
# Place this file at ~/.config/uop-emu/config.toml or ./uop-emu.toml

# Log every executed instruction (same as TRACE=1)
trace = false

# Emulated hardware target: "metal" or "hip" (same as EMULATE_METAL=1 / EMULATE_HIP=1)
# emulate = "metal"

# Directory of kernel manifests run by `uop-emu suite`
# manifest_dir = "manifests"
"#
        .to_string()
    }
}
