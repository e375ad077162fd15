//! Lock configuration and its persistence.
//!
//! The controller reads a [`LockConfig`] from a [`ConfigStore`] and writes
//! it back whenever it had to replace an invalid value with a default.
//! [`JsonFileStore`] keeps it as JSON at
//! `$XDG_CONFIG_HOME/input-locker/config.json`:
//!
//! ```json
//! {
//!   "hotkey": "Ctrl+Alt+L",
//!   "unlock_pattern": "arrows",
//!   "trigger_mode": "release",
//!   "block_kinds": ["keyboard", "mouse", "touchpad"],
//!   "whitelist": [],
//!   "global_hotkey": true
//! }
//! ```
//!
//! Missing fields take their defaults, so older files keep loading.

use crate::device::DeviceKind;
use crate::error::{Error, Result};
use crate::hotkey::{Hotkey, TriggerMode};
use crate::pattern::UnlockPattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Directory name under the user's config directory.
pub const CONFIG_DIR_NAME: &str = "input-locker";
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Settings the lock engine reads from its collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Unlock (and, while unlocked, lock) chord, e.g. `"Ctrl+Alt+L"`.
    pub hotkey: String,
    /// Id of the unlock pattern: `"arrows"` or `"wasd"`.
    pub unlock_pattern: String,
    pub trigger_mode: TriggerMode,
    /// Device kinds a plain `lock()` blocks.
    pub block_kinds: BTreeSet<DeviceKind>,
    /// Device paths that are never grabbed.
    pub whitelist: BTreeSet<PathBuf>,
    /// Listen for the hotkey while unlocked.
    pub global_hotkey: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            hotkey: Hotkey::DEFAULT.to_string(),
            unlock_pattern: UnlockPattern::default().id().to_string(),
            trigger_mode: TriggerMode::default(),
            block_kinds: [DeviceKind::Keyboard, DeviceKind::Mouse, DeviceKind::Touchpad].into(),
            whitelist: BTreeSet::new(),
            global_hotkey: true,
        }
    }
}

/// Fields rewritten by [`LockConfig::normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Normalized {
    pub hotkey: bool,
    pub unlock_pattern: bool,
}

impl Normalized {
    /// Whether anything changed and should be written back.
    pub fn any(&self) -> bool {
        self.hotkey || self.unlock_pattern
    }
}

impl LockConfig {
    /// Replace invalid values with defaults and canonicalize the hotkey.
    pub fn normalize(&mut self) -> Normalized {
        let (hotkey, hotkey_changed) = Hotkey::parse_or_default(&self.hotkey);
        if hotkey_changed {
            self.hotkey = hotkey.to_string();
        }

        let (pattern, pattern_changed) = UnlockPattern::from_id_or_default(&self.unlock_pattern);
        let pattern_changed = pattern_changed || pattern.id() != self.unlock_pattern;
        if pattern_changed {
            self.unlock_pattern = pattern.id().to_string();
        }

        Normalized {
            hotkey: hotkey_changed,
            unlock_pattern: pattern_changed,
        }
    }

    /// The hotkey, falling back to the default if the string is invalid.
    pub fn hotkey(&self) -> Hotkey {
        Hotkey::parse_or_default(&self.hotkey).0
    }

    /// The unlock pattern, falling back to the default for unknown ids.
    pub fn pattern(&self) -> UnlockPattern {
        UnlockPattern::from_id_or_default(&self.unlock_pattern).0
    }

    pub fn is_whitelisted(&self, path: &Path) -> bool {
        self.whitelist.contains(path)
    }

    /// Returns `false` if the path was already listed.
    pub fn add_to_whitelist(&mut self, path: impl Into<PathBuf>) -> bool {
        self.whitelist.insert(path.into())
    }

    /// Returns `false` if the path was not listed.
    pub fn remove_from_whitelist(&mut self, path: &Path) -> bool {
        self.whitelist.remove(path)
    }

    /// Copy the configuration to an arbitrary file.
    pub fn export(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    /// Read a configuration from an arbitrary file and normalize it.
    pub fn import(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config: LockConfig = serde_json::from_str(&content)?;
        config.normalize();
        Ok(config)
    }
}

/// Where configuration is read from and written back to.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<LockConfig>;

    fn save(&self, config: &LockConfig) -> Result<()>;
}

/// Resolves the default config file path.
pub fn default_config_path() -> Result<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .ok_or_else(|| Error::Config("neither XDG_CONFIG_HOME nor HOME is set".into()))?;
    Ok(base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn write_json_atomic(path: &Path, config: &LockConfig) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let content = serde_json::to_string_pretty(config)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// JSON file persistence.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at [`default_config_path`].
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(default_config_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for JsonFileStore {
    /// Loads the file, returning defaults if it does not exist yet.
    fn load(&self) -> Result<LockConfig> {
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                Error::Config(format!("{}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(LockConfig::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, config: &LockConfig) -> Result<()> {
        write_json_atomic(&self.path, config)?;
        log::debug!("Saved configuration to {}", self.path.display());
        Ok(())
    }
}

/// In-memory store, mostly for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    config: Mutex<LockConfig>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new(config: LockConfig) -> Self {
        Self {
            config: Mutex::new(config),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of times [`save`](ConfigStore::save) was called.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> LockConfig {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<LockConfig> {
        Ok(self.current())
    }

    fn save(&self, config: &LockConfig) -> Result<()> {
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
