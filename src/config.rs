// src/config.rs

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use dotenvy::dotenv;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub rust_log: String,
    pub bind_addr: String,
    pub simulado: SimuladoSettings,
}

/// Knobs of the attempt session. Packages may override the time limit and
/// the variation count with their own columns.
#[derive(Debug, Clone)]
pub struct SimuladoSettings {
    pub time_limit_minutes: u32,
    pub variations: u32,
    pub autosave_interval: Duration,
    pub exit_save_timeout: Duration,
    pub backup_dir: PathBuf,
}

impl Default for SimuladoSettings {
    fn default() -> Self {
        Self {
            time_limit_minutes: 180,
            variations: 3,
            autosave_interval: Duration::from_secs(30),
            exit_save_timeout: Duration::from_millis(2000),
            backup_dir: PathBuf::from("backups"),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://simulado.db?mode=rwc".to_string());

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let defaults = SimuladoSettings::default();
        let simulado = SimuladoSettings {
            time_limit_minutes: parse_or(
                "SIMULADO_TIME_LIMIT_MINUTES",
                env::var("SIMULADO_TIME_LIMIT_MINUTES").ok(),
                defaults.time_limit_minutes,
            ),
            variations: parse_or(
                "SIMULADO_VARIATIONS",
                env::var("SIMULADO_VARIATIONS").ok(),
                defaults.variations,
            ),
            autosave_interval: Duration::from_secs(parse_or(
                "SIMULADO_AUTOSAVE_SECS",
                env::var("SIMULADO_AUTOSAVE_SECS").ok(),
                defaults.autosave_interval.as_secs(),
            )),
            exit_save_timeout: Duration::from_millis(parse_or(
                "SIMULADO_EXIT_SAVE_TIMEOUT_MS",
                env::var("SIMULADO_EXIT_SAVE_TIMEOUT_MS").ok(),
                defaults.exit_save_timeout.as_millis() as u64,
            )),
            backup_dir: env::var("SIMULADO_BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.backup_dir),
        };

        Self {
            database_url,
            rust_log,
            bind_addr,
            simulado,
        }
    }
}

/// Parses an optional raw value, keeping the default on absence or garbage.
fn parse_or<T: FromStr + Copy>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(value) => value.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid value {:?} for {}", value, key);
            default
        }),
    }
}
