// Configuration loading and parsing (live.toml, local.toml).

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
    pub animation: AnimationConfig,
}

// ---------------------------------------------------------------------------
// live.toml sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP base of the simulation server, e.g. `http://localhost:8000`.
    pub base_url: String,
    #[serde(default = "default_stream_path")]
    pub stream_path: String,
    #[serde(default = "default_status_path")]
    pub status_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    /// Seconds between PING frames. Zero disables the heartbeat entirely.
    pub interval_secs: u64,
    /// Seconds without any inbound frame before the stream is considered dead.
    pub stale_after_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnimationConfig {
    pub window_ms: u64,
}

fn default_stream_path() -> String {
    "/ws/simulation/live".into()
}

fn default_status_path() -> String {
    "/api/simulation/status".into()
}

// ---------------------------------------------------------------------------
// local.toml
// ---------------------------------------------------------------------------

/// Optional per-machine overrides. Every field is optional.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LocalOverrides {
    pub base_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Derived values
// ---------------------------------------------------------------------------

/// Fully-resolved server addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// `ws://` or `wss://` address of the live stream.
    pub stream_url: String,
    /// `http://` or `https://` address of the status snapshot.
    pub status_url: String,
}

impl Config {
    /// Resolve the stream and status URLs from `server.base_url`.
    ///
    /// The stream URL swaps the scheme (`http` → `ws`, `https` → `wss`).
    pub fn endpoints(&self) -> Result<Endpoints, ConfigError> {
        let base = parse_base_url(&self.server.base_url)?;

        let status = base
            .join(&self.server.status_path)
            .map_err(|e| invalid("server.status_path", e.to_string()))?;

        let mut stream = base
            .join(&self.server.stream_path)
            .map_err(|e| invalid("server.stream_path", e.to_string()))?;
        let ws_scheme = if base.scheme() == "https" { "wss" } else { "ws" };
        stream
            .set_scheme(ws_scheme)
            .map_err(|_| invalid("server.base_url", format!("cannot derive {ws_scheme} URL")))?;

        Ok(Endpoints {
            stream_url: stream.to_string(),
            status_url: status.to_string(),
        })
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect.base_delay_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect.max_delay_ms)
    }

    pub fn animation_window(&self) -> Duration {
        Duration::from_millis(self.animation.window_ms)
    }

    /// `(interval, stale_after)` when the heartbeat is enabled.
    pub fn heartbeat(&self) -> Option<(Duration, Duration)> {
        if self.heartbeat.interval_secs == 0 {
            return None;
        }
        Some((
            Duration::from_secs(self.heartbeat.interval_secs),
            Duration::from_secs(self.heartbeat.stale_after_secs),
        ))
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/live.toml` and (optionally)
/// `config/local.toml`, both relative to the given `base_dir`.
///
/// Does not copy defaults; prefer `load_config()` for that.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- live.toml (required) ---
    let live_path = config_dir.join("live.toml");
    let live_text = read_file(&live_path)?;
    let mut config: Config = toml::from_str(&live_text).map_err(|e| ConfigError::ParseError {
        path: live_path.clone(),
        source: e,
    })?;

    // --- local.toml (optional) ---
    let local_path = config_dir.join("local.toml");
    let local = if local_path.exists() {
        let local_text = read_file(&local_path)?;
        toml::from_str(&local_text).map_err(|e| ConfigError::ParseError {
            path: local_path.clone(),
            source: e,
        })?
    } else {
        LocalOverrides::default()
    };

    if let Some(base_url) = local.base_url {
        config.server.base_url = base_url;
    }

    validate(&config)?;

    Ok(config)
}

/// Copy `defaults/live.toml` to `config/live.toml` unless the latter already
/// exists. Returns the written path, or `None` when nothing was copied.
/// `local.toml` is never created; it stays an opt-in override.
pub fn ensure_live_config(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join("live.toml");
    if target.exists() {
        return Ok(None);
    }

    let source = base_dir.join("defaults").join("live.toml");
    if !source.exists() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "{} is missing and there is no {} to start from",
                target.display(),
                source.display()
            ),
        });
    }

    let copy_error = |e: std::io::Error| ConfigError::DefaultsCopyError {
        message: format!("failed to write {}: {e}", target.display()),
    };
    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir).map_err(copy_error)?;
    }
    std::fs::copy(&source, &target).map_err(copy_error)?;
    Ok(Some(target))
}

/// Load config relative to the current working directory, seeding
/// `config/live.toml` from `defaults/` on first run.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_live_config(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| invalid("server.base_url", e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(
            "server.base_url",
            format!("scheme must be http or https, got {other}"),
        )),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    parse_base_url(&config.server.base_url)?;

    let reconnect = &config.reconnect;
    if reconnect.base_delay_ms == 0 {
        return Err(invalid("reconnect.base_delay_ms", "must be > 0"));
    }
    if reconnect.max_delay_ms < reconnect.base_delay_ms {
        return Err(invalid(
            "reconnect.max_delay_ms",
            format!(
                "must be >= base_delay_ms ({}), got {}",
                reconnect.base_delay_ms, reconnect.max_delay_ms
            ),
        ));
    }

    let heartbeat = &config.heartbeat;
    if heartbeat.interval_secs > 0 && heartbeat.stale_after_secs <= heartbeat.interval_secs {
        return Err(invalid(
            "heartbeat.stale_after_secs",
            format!(
                "must be greater than interval_secs ({}), got {}",
                heartbeat.interval_secs, heartbeat.stale_after_secs
            ),
        ));
    }

    if config.animation.window_ms == 0 {
        return Err(invalid("animation.window_ms", "must be > 0"));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Helper: returns the workspace root holding `defaults/` (works whether
    /// `cargo test` runs from the crate directory or the workspace root).
    fn project_root() -> PathBuf {
        let cwd = std::env::current_dir().unwrap();
        if cwd.join("defaults").exists() {
            cwd
        } else if cwd.join("../../defaults").exists() {
            cwd.join("../..")
        } else {
            panic!("Cannot locate defaults/ directory from CWD {:?}", cwd);
        }
    }

    /// Fresh temp dir with `config/live.toml` copied from defaults.
    fn temp_with_defaults(name: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&tmp);
        let config_dir = tmp.join("config");
        fs::create_dir_all(&config_dir).unwrap();
        fs::copy(
            project_root().join("defaults/live.toml"),
            config_dir.join("live.toml"),
        )
        .unwrap();
        tmp
    }

    fn patch_live(tmp: &Path, from: &str, to: &str) {
        let path = tmp.join("config/live.toml");
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains(from), "fixture does not contain {from:?}");
        fs::write(&path, text.replace(from, to)).unwrap();
    }

    #[test]
    fn load_valid_config_from_defaults() {
        let tmp = temp_with_defaults("gridiron_config_defaults");
        let config = load_config_from(&tmp).expect("should load valid config");

        assert_eq!(config.server.base_url, "http://localhost:8000");
        assert_eq!(config.server.stream_path, "/ws/simulation/live");
        assert_eq!(config.server.status_path, "/api/simulation/status");
        assert_eq!(config.reconnect_base(), Duration::from_secs(1));
        assert_eq!(config.reconnect_max(), Duration::from_secs(30));
        assert_eq!(config.animation_window(), Duration::from_millis(3000));
        assert_eq!(
            config.heartbeat(),
            Some((Duration::from_secs(15), Duration::from_secs(45)))
        );

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn endpoints_swap_scheme_for_stream() {
        let tmp = temp_with_defaults("gridiron_config_endpoints");
        let config = load_config_from(&tmp).unwrap();
        let endpoints = config.endpoints().unwrap();
        assert_eq!(endpoints.stream_url, "ws://localhost:8000/ws/simulation/live");
        assert_eq!(
            endpoints.status_url,
            "http://localhost:8000/api/simulation/status"
        );

        let mut secure = config.clone();
        secure.server.base_url = "https://sim.example.com".into();
        let endpoints = secure.endpoints().unwrap();
        assert_eq!(endpoints.stream_url, "wss://sim.example.com/ws/simulation/live");
        assert_eq!(
            endpoints.status_url,
            "https://sim.example.com/api/simulation/status"
        );

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn local_toml_overrides_base_url() {
        let tmp = temp_with_defaults("gridiron_config_local");
        fs::write(
            tmp.join("config/local.toml"),
            "base_url = \"http://10.0.0.5:9000\"\n",
        )
        .unwrap();

        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.server.base_url, "http://10.0.0.5:9000");
        assert_eq!(
            config.endpoints().unwrap().stream_url,
            "ws://10.0.0.5:9000/ws/simulation/live"
        );

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn zero_interval_disables_heartbeat() {
        let tmp = temp_with_defaults("gridiron_config_no_heartbeat");
        patch_live(&tmp, "interval_secs = 15", "interval_secs = 0");

        let config = load_config_from(&tmp).unwrap();
        assert!(config.heartbeat().is_none());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_non_http_base_url() {
        let tmp = temp_with_defaults("gridiron_config_bad_scheme");
        patch_live(&tmp, "http://localhost:8000", "ftp://localhost:8000");

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "server.base_url"),
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_base_delay() {
        let tmp = temp_with_defaults("gridiron_config_zero_delay");
        patch_live(&tmp, "base_delay_ms = 1000", "base_delay_ms = 0");

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "reconnect.base_delay_ms")
            }
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_max_delay_below_base() {
        let tmp = temp_with_defaults("gridiron_config_max_below_base");
        patch_live(&tmp, "max_delay_ms = 30000", "max_delay_ms = 500");

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "reconnect.max_delay_ms")
            }
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_stale_timeout_not_above_interval() {
        let tmp = temp_with_defaults("gridiron_config_stale");
        patch_live(&tmp, "stale_after_secs = 45", "stale_after_secs = 15");

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "heartbeat.stale_after_secs")
            }
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_animation_window() {
        let tmp = temp_with_defaults("gridiron_config_zero_window");
        patch_live(&tmp, "window_ms = 3000", "window_ms = 0");

        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn file_not_found_for_missing_live_toml() {
        let tmp = std::env::temp_dir().join("gridiron_config_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::FileNotFound { path } => assert!(path.ends_with("live.toml")),
            other => panic!("expected FileNotFound, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        let tmp = std::env::temp_dir().join("gridiron_config_invalid");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config/live.toml"), "this is not valid [[[ toml").unwrap();

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ParseError { path, .. } => assert!(path.ends_with("live.toml")),
            other => panic!("expected ParseError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_live_config_seeds_once() {
        let tmp = std::env::temp_dir().join("gridiron_config_ensure");
        let _ = fs::remove_dir_all(&tmp);
        let defaults_dir = tmp.join("defaults");
        fs::create_dir_all(&defaults_dir).unwrap();
        fs::copy(
            project_root().join("defaults/live.toml"),
            defaults_dir.join("live.toml"),
        )
        .unwrap();
        fs::write(defaults_dir.join("local.toml.example"), "base_url = \"x\"\n").unwrap();

        let copied = ensure_live_config(&tmp).unwrap();
        assert_eq!(copied, Some(tmp.join("config").join("live.toml")));
        assert!(!tmp.join("config/local.toml").exists());
        assert!(!tmp.join("config/local.toml.example").exists());
        assert!(load_config_from(&tmp).is_ok());

        // An edited live.toml is never overwritten.
        patch_live(&tmp, "window_ms = 3000", "window_ms = 1200");
        assert_eq!(ensure_live_config(&tmp).unwrap(), None);
        assert_eq!(
            load_config_from(&tmp).unwrap().animation_window(),
            Duration::from_millis(1200)
        );

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_live_config_errors_without_defaults() {
        let tmp = std::env::temp_dir().join("gridiron_config_no_dirs");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        let err = ensure_live_config(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::DefaultsCopyError { .. }));

        // An existing live.toml is enough on its own.
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config/live.toml"), "").unwrap();
        assert_eq!(ensure_live_config(&tmp).unwrap(), None);

        let _ = fs::remove_dir_all(&tmp);
    }
}
