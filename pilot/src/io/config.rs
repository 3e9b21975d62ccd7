//! Pilot configuration stored as TOML (default `pilot.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::action::{ActionDefaults, NavTarget};
use crate::error::ConfigError;

/// Environment variable that overrides `api.api_key`.
pub const API_KEY_ENV: &str = "PILOT_API_KEY";

/// Pilot configuration (TOML).
///
/// Missing fields default to values calibrated for an 850x720 chat client
/// window pinned to the top-left corner of the screen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PilotConfig {
    /// Directory with `<name>.md` files overriding the built-in prompts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts_dir: Option<PathBuf>,
    pub api: ApiConfig,
    pub pacing: PacingConfig,
    pub limits: LimitsConfig,
    pub layout: LayoutConfig,
    pub safety: SafetyConfig,
    pub desktop: DesktopConfig,
    pub planning: PlanningConfig,
}

/// OpenAI-compatible chat-completions endpoint used for vision and planning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Send screenshots as bare base64 instead of a `data:` URL.
    pub raw_base64_images: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://open.bigmodel.cn/api/paas/v4/chat/completions".to_string(),
            api_key: None,
            model: "glm-4v".to_string(),
            temperature: None,
            raw_base64_images: false,
        }
    }
}

/// Fixed waits that let the target's UI settle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PacingConfig {
    /// Pause after every successful step.
    pub step_delay_ms: u64,
    pub search_delay_ms: u64,
    pub page_load_delay_ms: u64,
    pub scroll_render_delay_ms: u64,
    pub feed_read_delay_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            step_delay_ms: 1000,
            search_delay_ms: 1500,
            page_load_delay_ms: 1500,
            scroll_render_delay_ms: 2000,
            feed_read_delay_ms: 1000,
        }
    }
}

impl PacingConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Upper bound for any single perception, actuation or planning call.
    pub call_timeout_secs: u64,
    pub browse_count_default: u32,
    pub unread_limit_default: u32,
    pub scroll_magnitude_default: u32,
    pub feed_scroll_magnitude: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 60,
            browse_count_default: 3,
            unread_limit_default: 5,
            scroll_magnitude_default: 500,
            feed_scroll_magnitude: 1000,
        }
    }
}

impl LimitsConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn action_defaults(&self) -> ActionDefaults {
        ActionDefaults {
            browse_count: self.browse_count_default,
            unread_limit: self.unread_limit_default,
            scroll_magnitude: self.scroll_magnitude_default,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Window geometry and on-screen positions of the target's controls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LayoutConfig {
    pub window_title: String,
    pub window_width: u32,
    pub window_height: u32,
    pub nav_chat: Point,
    pub nav_contacts: Point,
    pub nav_moments: Point,
    pub nav_favorites: Point,
    pub search_bar: Point,
    pub search_result_first: Point,
    pub chat_input: Point,
    pub send_button: Point,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            window_title: "WeChat".to_string(),
            window_width: 850,
            window_height: 720,
            nav_chat: Point::new(36, 90),
            nav_contacts: Point::new(36, 140),
            nav_moments: Point::new(36, 240),
            nav_favorites: Point::new(36, 190),
            search_bar: Point::new(180, 40),
            search_result_first: Point::new(180, 120),
            chat_input: Point::new(500, 650),
            send_button: Point::new(770, 680),
        }
    }
}

impl LayoutConfig {
    pub fn nav_point(&self, target: NavTarget) -> Point {
        match target {
            NavTarget::Chat => self.nav_chat,
            NavTarget::Contacts => self.nav_contacts,
            NavTarget::Moments => self.nav_moments,
            NavTarget::Favorites => self.nav_favorites,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SafetyConfig {
    /// Abort actuation when the pointer moved further than `threshold_px`
    /// since the last controlled position.
    pub enabled: bool,
    pub threshold_px: u32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_px: 50,
        }
    }
}

/// Argv templates for the desktop helper commands.
///
/// Every element is rendered with minijinja before spawning; available
/// variables are `x`, `y`, `text`, `direction`, `button`, `amount`,
/// `window_title`, `width` and `height`. Arguments are passed to the program
/// directly, never through a shell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DesktopConfig {
    pub capture: Vec<String>,
    pub click: Vec<String>,
    pub type_text: Vec<String>,
    pub scroll: Vec<String>,
    pub normalize: Vec<String>,
    pub pointer: Vec<String>,
    /// Regex with two capture groups (x, y) applied to the pointer command output.
    pub pointer_pattern: String,
    pub command_timeout_secs: u64,
    pub capture_limit_bytes: usize,
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            capture: argv(&[
                "import",
                "-window",
                "root",
                "-crop",
                "{{ width }}x{{ height }}+0+0",
                "png:-",
            ]),
            click: argv(&["xdotool", "mousemove", "{{ x }}", "{{ y }}", "click", "1"]),
            type_text: argv(&["xdotool", "type", "--delay", "10", "--", "{{ text }}"]),
            scroll: argv(&["xdotool", "click", "--repeat", "{{ amount }}", "{{ button }}"]),
            normalize: argv(&[
                "xdotool",
                "search",
                "--name",
                "{{ window_title }}",
                "windowactivate",
                "--sync",
                "%1",
                "windowmove",
                "%1",
                "0",
                "0",
                "windowsize",
                "%1",
                "{{ width }}",
                "{{ height }}",
            ]),
            pointer: argv(&["xdotool", "getmouselocation", "--shell"]),
            pointer_pattern: r"X=(-?\d+)\s+Y=(-?\d+)".to_string(),
            command_timeout_secs: 10,
            capture_limit_bytes: 32 * 1024 * 1024,
        }
    }
}

impl DesktopConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// How the initial plan is produced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanningMode {
    /// Start from a single perceive-and-reason step and let the oracle drive.
    #[default]
    Observe,
    /// Ask the language model for a full step list up front.
    Llm,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PlanningConfig {
    pub mode: PlanningMode,
}

impl PilotConfig {
    /// Structural checks. The API key is checked separately by [`Self::api_key`]
    /// so a freshly written default config still validates.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.api.endpoint.trim().is_empty() {
            return invalid("api.endpoint must be non-empty");
        }
        if self.api.model.trim().is_empty() {
            return invalid("api.model must be non-empty");
        }
        if self.limits.call_timeout_secs == 0 {
            return invalid("limits.call_timeout_secs must be > 0");
        }
        if self.limits.browse_count_default == 0 || self.limits.unread_limit_default == 0 {
            return invalid("limits defaults must be > 0");
        }
        if self.layout.window_width == 0 || self.layout.window_height == 0 {
            return invalid("layout window size must be > 0");
        }
        if self.safety.enabled && self.safety.threshold_px == 0 {
            return invalid("safety.threshold_px must be > 0");
        }
        if self.desktop.command_timeout_secs == 0 {
            return invalid("desktop.command_timeout_secs must be > 0");
        }
        let commands = [
            ("desktop.capture", &self.desktop.capture),
            ("desktop.click", &self.desktop.click),
            ("desktop.type_text", &self.desktop.type_text),
            ("desktop.scroll", &self.desktop.scroll),
            ("desktop.normalize", &self.desktop.normalize),
            ("desktop.pointer", &self.desktop.pointer),
        ];
        for (name, cmd) in commands {
            if cmd.is_empty() || cmd[0].trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a non-empty array"
                )));
            }
        }
        if let Err(err) = regex::Regex::new(&self.desktop.pointer_pattern) {
            return Err(ConfigError::Invalid(format!(
                "desktop.pointer_pattern: {err}"
            )));
        }
        Ok(())
    }

    /// The API key, required before any task can start.
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.api
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                ConfigError::Invalid(format!("api.api_key missing (set it or {API_KEY_ENV})"))
            })
    }
}

/// Load config from a TOML file, applying the `PILOT_API_KEY` override.
///
/// Unlike most settings a missing file is an error: the pilot refuses to
/// drive a live UI without an explicit configuration.
pub fn load_config(path: &Path) -> Result<PilotConfig, ConfigError> {
    load_config_with_env(path, std::env::var(API_KEY_ENV).ok())
}

fn load_config_with_env(path: &Path, env_key: Option<String>) -> Result<PilotConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::Missing(path.display().to_string()));
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let mut cfg: PilotConfig = toml::from_str(&contents).map_err(|err| ConfigError::Parse {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    if let Some(key) = env_key.filter(|k| !k.trim().is_empty()) {
        cfg.api.api_key = Some(key);
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PilotConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_config_with_env(&temp.path().join("missing.toml"), None).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("pilot.toml");
        let mut cfg = PilotConfig::default();
        cfg.api.api_key = Some("sk-test".to_string());
        cfg.pacing.step_delay_ms = 250;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config_with_env(&path, None).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("pilot.toml");
        fs::write(&path, "[api]\nmodel = \"glm-4v-plus\"\n\n[layout]\nwindow_width = 900\n")
            .expect("write");
        let cfg = load_config_with_env(&path, None).expect("load");
        assert_eq!(cfg.api.model, "glm-4v-plus");
        assert_eq!(cfg.layout.window_width, 900);
        assert_eq!(cfg.layout.send_button, Point::new(770, 680));
        assert_eq!(cfg.planning.mode, PlanningMode::Observe);
    }

    #[test]
    fn env_key_overrides_file_key() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("pilot.toml");
        fs::write(&path, "[api]\napi_key = \"from-file\"\n").expect("write");
        let cfg = load_config_with_env(&path, Some("from-env".to_string())).expect("load");
        assert_eq!(cfg.api_key().expect("key"), "from-env");
    }

    #[test]
    fn missing_api_key_is_reported() {
        let err = PilotConfig::default().api_key().unwrap_err();
        assert!(err.to_string().contains(API_KEY_ENV));
    }

    #[test]
    fn rejects_zero_timeout_and_bad_pattern() {
        let mut cfg = PilotConfig::default();
        cfg.limits.call_timeout_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PilotConfig::default();
        cfg.desktop.pointer_pattern = "(".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("pointer_pattern"));
    }

    #[test]
    fn parse_errors_name_the_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("pilot.toml");
        fs::write(&path, "[pacing]\nstep_delay_ms = \"soon\"\n").expect("write");
        let err = load_config_with_env(&path, None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("pilot.toml"));
    }
}
