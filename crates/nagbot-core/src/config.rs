use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

pub const DEFAULT_INTERVAL_MINUTES: u32 = 45;
pub const DEFAULT_SESSION_TTL_MINUTES: u64 = 10;

/// Typed configuration, loaded from the environment (with `.env` support).
#[derive(Clone, Debug)]
pub struct Config {
    pub telegram_bot_token: String,
    pub store_file: PathBuf,
    pub default_interval_minutes: u32,
    pub session_ttl: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let store_file = PathBuf::from(
            env_str("STORE_FILE").unwrap_or("/tmp/nagbot-users.json".to_string()),
        );

        let default_interval_minutes =
            env_u32("DEFAULT_INTERVAL_MINUTES").unwrap_or(DEFAULT_INTERVAL_MINUTES);
        if default_interval_minutes == 0 {
            return Err(Error::Config(
                "DEFAULT_INTERVAL_MINUTES must be positive".to_string(),
            ));
        }

        let ttl_minutes = env_u64("SESSION_TTL_MINUTES").unwrap_or(DEFAULT_SESSION_TTL_MINUTES);
        if ttl_minutes == 0 {
            return Err(Error::Config(
                "SESSION_TTL_MINUTES must be positive".to_string(),
            ));
        }
        let session_ttl = Duration::from_secs(ttl_minutes * 60);

        Ok(Self {
            telegram_bot_token,
            store_file,
            default_interval_minutes,
            session_ttl,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}
