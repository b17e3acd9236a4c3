//! Compiler configuration and the `[macro]` section of `rayzor.toml`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// `[macro]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MacroSettings {
    /// Standard library root used by the macro context
    pub std_root: PathBuf,
    /// Where decode and exception reports are written
    pub dump_dir: PathBuf,
    /// Reuse a live runtime across compilation runs
    pub reuse_runtime: bool,
}

impl Default for MacroSettings {
    fn default() -> Self {
        Self {
            std_root: PathBuf::from("std/macro"),
            dump_dir: PathBuf::from("dump"),
            reuse_runtime: true,
        }
    }
}

/// `[build]` section, restricted to what the macro engine reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct BuildSection {
    #[serde(default)]
    class_paths: Vec<String>,
    std_root: Option<String>,
    defines: Option<IndexMap<String, toml::Value>>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    build: Option<BuildSection>,
    #[serde(rename = "macro")]
    macro_section: Option<MacroSettings>,
}

/// Binary cache writer configuration, readable and writable by macros.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BinaryCacheConfig {
    pub enabled: bool,
    pub path: Option<PathBuf>,
    pub compress: bool,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read rayzor.toml: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse rayzor.toml: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

/// Configuration of one compilation context.
#[derive(Debug, Clone, PartialEq)]
pub struct CompilerConfig {
    /// Typing for a display/completion query
    pub display_mode: bool,
    /// Type every field, not only the ones reached
    pub full_typing: bool,
    pub std_root: PathBuf,
    pub class_paths: Vec<PathBuf>,
    pub defines: IndexMap<String, String>,
    pub macros: MacroSettings,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            display_mode: false,
            full_typing: false,
            std_root: PathBuf::from("std"),
            class_paths: Vec::new(),
            defines: IndexMap::new(),
            macros: MacroSettings::default(),
        }
    }
}

impl CompilerConfig {
    /// Parse a `rayzor.toml` string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut config = CompilerConfig::default();
        if let Some(build) = raw.build {
            config.class_paths = build.class_paths.into_iter().map(PathBuf::from).collect();
            if let Some(root) = build.std_root {
                config.std_root = PathBuf::from(root);
            }
            for (name, value) in build.defines.unwrap_or_default() {
                let value = match value {
                    toml::Value::String(s) => s,
                    toml::Value::Boolean(true) => "1".to_string(),
                    other => other.to_string(),
                };
                config.defines.insert(name, value);
            }
        }
        if let Some(macros) = raw.macro_section {
            config.macros = macros;
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Configuration for the macro context derived from a primary one.
    pub fn for_macro_context(&self) -> Self {
        let mut config = self.clone();
        config.std_root = self.macros.std_root.clone();
        config.display_mode = false;
        config.full_typing = true;
        config.defines.insert("macro".to_string(), "1".to_string());
        config
    }

    pub fn dump_dir(&self) -> &Path {
        &self.macros.dump_dir
    }
}
