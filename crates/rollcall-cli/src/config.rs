use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime, Utc};
use rollcall_core::AttendanceWindow;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Clock used to stamp records and to pick their calendar day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayClock {
    #[default]
    Local,
    Utc,
}

impl DayClock {
    pub fn now(self) -> NaiveDateTime {
        match self {
            Self::Local => Local::now().naive_local(),
            Self::Utc => Utc::now().naive_utc(),
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "utc" => Some(Self::Utc),
            _ => None,
        }
    }
}

/// On-disk `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    roster: Vec<String>,
    gallery_dir: Option<PathBuf>,
    audit_dir: Option<PathBuf>,
    audit_enabled: Option<bool>,
    db_path: Option<PathBuf>,
    day_clock: Option<DayClock>,
    matcher_command: Vec<String>,
    attendance_window: AttendanceWindow,
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Registered identities; empty means every gallery subdirectory.
    pub roster: Vec<String>,
    /// One subdirectory of reference photos per identity.
    pub gallery_dir: PathBuf,
    /// Where authorized captures are archived; `None` disables archiving.
    pub audit_dir: Option<PathBuf>,
    /// Path to the SQLite attendance ledger.
    pub db_path: PathBuf,
    pub day_clock: DayClock,
    /// External matcher program and leading arguments.
    pub matcher_command: Vec<String>,
    pub window: AttendanceWindow,
    /// File the settings came from, if any.
    pub source: Option<PathBuf>,
}

impl Config {
    /// Load the config file (if present) and apply `ROLLCALL_*` overrides.
    pub fn load() -> Result<Self> {
        let path = config_path();
        let file = match &path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read config {}", p.display()))?;
                parse_file(&raw).with_context(|| format!("invalid config {}", p.display()))?
            }
            _ => FileConfig::default(),
        };
        let source = path.filter(|p| p.exists());
        Ok(Self::resolve(file, source, |key| std::env::var(key).ok()))
    }

    /// Parse config TOML with no environment overrides.
    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(Self::resolve(parse_file(raw)?, None, |_| None))
    }

    fn resolve(file: FileConfig, source: Option<PathBuf>, env: impl Fn(&str) -> Option<String>) -> Self {
        let gallery_dir = env("ROLLCALL_GALLERY_DIR")
            .map(PathBuf::from)
            .or(file.gallery_dir)
            .unwrap_or_else(|| PathBuf::from("known_faces"));

        let audit_enabled = env_bool(&env, "ROLLCALL_AUDIT_ENABLED")
            .or(file.audit_enabled)
            .unwrap_or(true);
        let audit_dir = env("ROLLCALL_AUDIT_DIR")
            .map(PathBuf::from)
            .or(file.audit_dir)
            .unwrap_or_else(|| PathBuf::from("recognized_faces"));

        let db_path = env("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| data_dir(&env).join("attendance.db"));

        let day_clock = match env("ROLLCALL_DAY_CLOCK") {
            Some(raw) => DayClock::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "unrecognized ROLLCALL_DAY_CLOCK; using config value");
                file.day_clock.unwrap_or_default()
            }),
            None => file.day_clock.unwrap_or_default(),
        };

        let mut window = file.attendance_window;
        if let Some(enabled) = env_bool(&env, "ROLLCALL_WINDOW_ENABLED") {
            window.enabled = enabled;
        }
        if window.enabled && window.days.is_empty() {
            tracing::warn!("attendance window enabled with no allowed days; every attempt will be refused");
        }

        Self {
            roster: file.roster,
            gallery_dir,
            audit_dir: audit_enabled.then_some(audit_dir),
            db_path,
            day_clock,
            matcher_command: file.matcher_command,
            window,
            source,
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.day_clock.now()
    }
}

fn parse_file(raw: &str) -> Result<FileConfig> {
    toml::from_str(raw).context("failed to parse config TOML")
}

/// `$ROLLCALL_CONFIG`, else `$XDG_CONFIG_HOME/rollcall/config.toml`,
/// else `~/.config/rollcall/config.toml`.
fn config_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("ROLLCALL_CONFIG") {
        return Some(PathBuf::from(p));
    }
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|h| Path::new(&h).join(".config")))
        .ok()?;
    Some(base.join("rollcall").join("config.toml"))
}

fn data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

/// Unrecognized values are ignored with a warning.
fn env_bool(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let raw = env(key)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(key, value = %raw, "unrecognized boolean override; ignored");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use std::collections::HashMap;

    fn resolve_with(raw: &str, vars: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::resolve(parse_file(raw).unwrap(), None, |k| env.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = resolve_with("", &[("HOME", "/home/u")]);
        assert!(c.roster.is_empty());
        assert_eq!(c.gallery_dir, PathBuf::from("known_faces"));
        assert_eq!(c.audit_dir, Some(PathBuf::from("recognized_faces")));
        assert_eq!(c.db_path, PathBuf::from("/home/u/.local/share/rollcall/attendance.db"));
        assert_eq!(c.day_clock, DayClock::Local);
        assert!(!c.window.enabled);
    }

    #[test]
    fn test_full_file() {
        let c = Config::from_toml(
            r#"
            roster = ["Areeba", "Ramsha"]
            gallery_dir = "/srv/faces"
            db_path = "/var/lib/rollcall/attendance.db"
            day_clock = "utc"
            matcher_command = ["deepface-find", "--model", "ArcFace"]

            [attendance_window]
            enabled = true
            days = ["Mon", "Wed"]
            hours = [14, 22]
            "#,
        )
        .unwrap();
        assert_eq!(c.roster, vec!["Areeba", "Ramsha"]);
        assert_eq!(c.gallery_dir, PathBuf::from("/srv/faces"));
        assert_eq!(c.day_clock, DayClock::Utc);
        assert_eq!(c.matcher_command.len(), 3);
        assert!(c.window.enabled);
        assert!(c.window.days.contains(&Weekday::Wed));
        assert!(!c.window.days.contains(&Weekday::Sat));
        assert_eq!(c.window.hours.start(), 14);
    }

    #[test]
    fn test_partial_window_keeps_defaults() {
        let c = Config::from_toml("[attendance_window]\nenabled = true\n").unwrap();
        assert!(c.window.enabled);
        assert_eq!(c.window.days.len(), 6);
        assert_eq!(c.window.hours.end(), 22);
    }

    #[test]
    fn test_inverted_hours_rejected() {
        assert!(Config::from_toml("[attendance_window]\nhours = [22, 14]\n").is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Config::from_toml("galery_dir = \"typo\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let c = resolve_with(
            "gallery_dir = \"from-file\"\n[attendance_window]\nenabled = true\n",
            &[
                ("ROLLCALL_GALLERY_DIR", "/env/faces"),
                ("ROLLCALL_WINDOW_ENABLED", "0"),
                ("ROLLCALL_AUDIT_ENABLED", "false"),
                ("ROLLCALL_DAY_CLOCK", "UTC"),
                ("ROLLCALL_DB_PATH", "/tmp/a.db"),
            ],
        );
        assert_eq!(c.gallery_dir, PathBuf::from("/env/faces"));
        assert!(!c.window.enabled);
        assert!(c.audit_dir.is_none());
        assert_eq!(c.day_clock, DayClock::Utc);
        assert_eq!(c.db_path, PathBuf::from("/tmp/a.db"));
    }

    #[test]
    fn test_env_bool_words() {
        let window = "[attendance_window]\nenabled = true\n";
        assert!(!resolve_with(window, &[("ROLLCALL_WINDOW_ENABLED", "off")]).window.enabled);
        assert!(!resolve_with(window, &[("ROLLCALL_WINDOW_ENABLED", "No")]).window.enabled);
        assert!(resolve_with("", &[("ROLLCALL_WINDOW_ENABLED", "on")]).window.enabled);
        // Unrecognized values leave the file setting alone.
        assert!(resolve_with(window, &[("ROLLCALL_WINDOW_ENABLED", "maybe")]).window.enabled);
        assert!(!resolve_with("", &[("ROLLCALL_WINDOW_ENABLED", "maybe")]).window.enabled);
    }
}
