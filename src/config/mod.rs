//! Configuration management for naclbox.
//!
//! # Configuration File Location
//!
//! The configuration file is stored at:
//! - Linux: `~/.config/naclbox/config.yml`
//!
//! # Example Configuration
//!
//! ```yaml
//! sandbox:
//!   base_address: 0x100000000
//!   region_size: 0xffffffff
//!   stack_headroom: 16
//!   stack_size: 65536
//! server:
//!   bind: "0.0.0.0"
//!   port: 8080
//!   library_dir: "build/lib"
//!   verify_on_start: true
//!   images:
//!     - name: "a.out"
//!       path: "native_client_bin/a.out"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::sandbox::layout::{
    SandboxLayout, DEFAULT_BASE_ADDRESS, DEFAULT_REGION_SIZE, DEFAULT_STACK_HEADROOM,
    DEFAULT_STACK_SIZE,
};

const DEFAULT_BIND: &str = "0.0.0.0";

const DEFAULT_PORT: u16 = 8080;

const DEFAULT_LIBRARY_DIR: &str = "build/lib";

const DEFAULT_IMAGE_NAME: &str = "a.out";

const DEFAULT_IMAGE_PATH: &str = "native_client_bin/a.out";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxSettings,

    #[serde(default)]
    pub server: ServerSettings,
}

/// Geometry of every sandbox region created by this process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxSettings {
    #[serde(default = "default_base_address")]
    pub base_address: usize,

    #[serde(default = "default_region_size")]
    pub region_size: usize,

    /// Gap between the initial stack pointer and the trampoline.
    #[serde(default = "default_stack_headroom")]
    pub stack_headroom: usize,

    /// Stack reserved for the entry function; sections may not reach into it.
    #[serde(default = "default_stack_size")]
    pub stack_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory of shared libraries exporting `http_main`, one page each.
    #[serde(default = "default_library_dir")]
    pub library_dir: PathBuf,

    /// Call every sandbox once at start-up and log what it returns.
    #[serde(default = "default_verify_on_start")]
    pub verify_on_start: bool,

    #[serde(default = "default_images")]
    pub images: Vec<ImageEntry>,
}

/// A sandboxed page: requests for `name` call the entry point of `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub name: String,
    pub path: PathBuf,

    /// Region base for this image. Regions are fixed-address, so two images
    /// loaded side by side need different bases.
    #[serde(default)]
    pub base_address: Option<usize>,
}

fn default_base_address() -> usize {
    DEFAULT_BASE_ADDRESS
}

fn default_region_size() -> usize {
    DEFAULT_REGION_SIZE
}

fn default_stack_headroom() -> usize {
    DEFAULT_STACK_HEADROOM
}

fn default_stack_size() -> usize {
    DEFAULT_STACK_SIZE
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_library_dir() -> PathBuf {
    PathBuf::from(DEFAULT_LIBRARY_DIR)
}

fn default_verify_on_start() -> bool {
    true
}

fn default_images() -> Vec<ImageEntry> {
    vec![ImageEntry {
        name: DEFAULT_IMAGE_NAME.to_string(),
        path: PathBuf::from(DEFAULT_IMAGE_PATH),
        base_address: None,
    }]
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            base_address: DEFAULT_BASE_ADDRESS,
            region_size: DEFAULT_REGION_SIZE,
            stack_headroom: DEFAULT_STACK_HEADROOM,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: DEFAULT_PORT,
            library_dir: default_library_dir(),
            verify_on_start: true,
            images: default_images(),
        }
    }
}

impl SandboxSettings {
    /// Validated layout for these settings.
    pub fn layout(&self) -> Result<SandboxLayout> {
        self.layout_at(self.base_address)
    }

    /// Same geometry, placed at a different base.
    pub fn layout_at(&self, base_address: usize) -> Result<SandboxLayout> {
        SandboxLayout::new(
            base_address,
            self.region_size,
            self.stack_headroom,
            self.stack_size,
        )
    }
}

impl Config {
    /// Returns the default configuration file path for the current platform.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("naclbox").join("config.yml"))
    }

    /// Loads configuration from the default location.
    ///
    /// Returns `Ok(Config::default())` if no config file exists.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Config::default()),
        }
    }

    /// Loads configuration from a specific file path.
    ///
    /// Returns `Ok(Config::default())` if the file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to read config file: {}\n\n\
                     File path: {}\n\n\
                     Suggestions:\n\
                     • Check file permissions: ls -la {}\n\
                     • Try recreating with: naclbox config init --force",
                    e,
                    path.display(),
                    path.display()
                ),
            ))
        })?;

        let config: Config = serde_yaml::from_str(&contents).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file: {}\n\n\
                 File path: {}\n\n\
                 Suggestions:\n\
                 • Check YAML syntax in the config file\n\
                 • Verify indentation uses spaces, not tabs\n\
                 • Backup and recreate: mv {} {}.bak && naclbox config init",
                e,
                path.display(),
                path.display(),
                path.display()
            ))
        })?;

        config.sandbox.layout()?;
        Ok(config)
    }

    /// Saves configuration to the default location.
    pub fn save(&self) -> Result<()> {
        match Self::default_path() {
            Some(path) => self.save_to(&path),
            None => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine config directory\n\n\
                 Suggestions:\n\
                 • Check HOME environment variable is set\n\
                 • Verify XDG_CONFIG_HOME is accessible",
            ))),
        }
    }

    /// Saves configuration to a specific file path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create config directory: {}\n\n\
                         Directory: {}\n\n\
                         Suggestions:\n\
                         • Check write permissions for parent directory\n\
                         • Create directory manually: mkdir -p {}",
                        e,
                        parent.display(),
                        parent.display()
                    ),
                ))
            })?;
        }

        let contents = serde_yaml::to_string(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, contents)?;
        Ok(())
    }

    pub fn image(&self, name: &str) -> Option<&ImageEntry> {
        self.server.images.iter().find(|image| image.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.sandbox.base_address, 0x1_0000_0000);
        assert_eq!(config.sandbox.region_size, 0xffff_ffff);
        assert_eq!(config.sandbox.stack_headroom, 16);
        assert_eq!(config.server.port, 8080);
        assert!(config.image("a.out").is_some());
        assert!(config.sandbox.layout().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "sandbox:\n  stack_size: 4096\nserver:\n  port: 9000\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.sandbox.stack_size, 4096);
        assert_eq!(config.sandbox.base_address, DEFAULT_BASE_ADDRESS);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.images.len(), 1);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yml");

        let mut config = Config::default();
        config.server.images.push(ImageEntry {
            name: "fib".to_string(),
            path: PathBuf::from("images/fib.elf"),
            base_address: Some(0x2_0000_0000),
        });
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.image("fib").unwrap().base_address, Some(0x2_0000_0000));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("absent.yml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_layout_is_rejected_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(&path, "sandbox:\n  base_address: 4097\n").unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(Error::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_oversized_headroom_is_rejected_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(
            &path,
            "sandbox:\n  region_size: 1048576\n  stack_headroom: 999999999\n",
        )
        .unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(Error::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(&path, "sandbox: [unterminated").unwrap();

        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_layout_at_keeps_geometry() {
        let settings = SandboxSettings::default();
        let layout = settings.layout_at(0x2_0000_0000).unwrap();
        assert_eq!(layout.base_address(), 0x2_0000_0000);
        assert_eq!(layout.region_size(), settings.region_size);
    }
}
