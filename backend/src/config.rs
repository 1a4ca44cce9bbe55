//! Runtime settings read from the environment.
//!
//! | Variable                        | Default  |
//! |---------------------------------|----------|
//! | `CLINICLOAD_PORT`               | 3000     |
//! | `CLINICLOAD_RETRY_DELAY_SECS`   | 30       |
//! | `CLINICLOAD_MAX_ATTEMPTS`       | unset    |
//! | `CLINICLOAD_PROBE_TIMEOUT_SECS` | 10       |
//! | `CLINICLOAD_FETCH_TIMEOUT_SECS` | 120      |
//! | `CLINICLOAD_WORKERS`            | 4        |
//! | `CLINICLOAD_HEADER_ROWS`        | 1        |
//! | `CLINICLOAD_XML_LINES`          | `record` |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::parser::XmlLineMode;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 3000;

/// Default delay between probes of an unreachable object
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub port: u16,
    pub retry_delay: Duration,
    /// Cap on probes; unbounded when `None`.
    pub max_attempts: Option<u32>,
    pub probe_timeout: Duration,
    pub fetch_timeout: Duration,
    pub workers: usize,
    /// Spreadsheet rows skipped at the top of every sheet.
    pub header_rows: u32,
    pub xml_lines: XmlLineMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            max_attempts: None,
            probe_timeout: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(120),
            workers: 4,
            header_rows: 1,
            xml_lines: XmlLineMode::Record,
        }
    }
}

impl Settings {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(read::<u64, _>(&lookup, name)?.map_or(default, Duration::from_secs))
        };

        let workers = read::<usize, _>(&lookup, "CLINICLOAD_WORKERS")?.unwrap_or(defaults.workers);
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                name: "CLINICLOAD_WORKERS",
                value: "0".into(),
            });
        }

        Ok(Self {
            port: read(&lookup, "CLINICLOAD_PORT")?.unwrap_or(defaults.port),
            retry_delay: secs("CLINICLOAD_RETRY_DELAY_SECS", defaults.retry_delay)?,
            max_attempts: read(&lookup, "CLINICLOAD_MAX_ATTEMPTS")?,
            probe_timeout: secs("CLINICLOAD_PROBE_TIMEOUT_SECS", defaults.probe_timeout)?,
            fetch_timeout: secs("CLINICLOAD_FETCH_TIMEOUT_SECS", defaults.fetch_timeout)?,
            workers,
            header_rows: read(&lookup, "CLINICLOAD_HEADER_ROWS")?.unwrap_or(defaults.header_rows),
            xml_lines: read(&lookup, "CLINICLOAD_XML_LINES")?.unwrap_or(defaults.xml_lines),
        })
    }
}

/// Parse one optional variable; blank counts as unset.
fn read<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        _ => Ok(None),
    }
}
