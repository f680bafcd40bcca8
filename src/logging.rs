use anyhow::anyhow;
use tracing_subscriber::filter::LevelFilter;

use crate::config::{Config, LogFormat};

const DEFAULT_LOG_LEVEL: &str = "info";
pub const LOG_LEVEL_ENV: &str = "INTAKE_LOG_LEVEL";

/// Installs the global subscriber. Level precedence: CLI flag, then
/// `INTAKE_LOG_LEVEL`, then `[logging].level`, then `info`.
pub fn init(config: &Config, cli_level_override: Option<&str>) -> anyhow::Result<()> {
    let env_level = std::env::var(LOG_LEVEL_ENV).ok();
    let log_level = resolve_log_level(config, cli_level_override, env_level.as_deref())?;

    let builder = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true);
    let installed = match resolve_log_format(config) {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    installed.map_err(|err| anyhow!("initialize logging subscriber: {err}"))
}

fn resolve_log_level(
    config: &Config,
    cli_level_override: Option<&str>,
    env_level: Option<&str>,
) -> anyhow::Result<LevelFilter> {
    let raw_level = cli_level_override
        .or(env_level.filter(|level| !level.trim().is_empty()))
        .or_else(|| {
            config
                .logging
                .as_ref()
                .and_then(|logging| logging.level.as_deref())
        })
        .unwrap_or(DEFAULT_LOG_LEVEL);

    raw_level
        .trim()
        .to_ascii_lowercase()
        .parse::<LevelFilter>()
        .map_err(|_| {
            anyhow!(
                "invalid log level `{raw_level}`; expected one of trace, debug, info, warn, error, off"
            )
        })
}

fn resolve_log_format(config: &Config) -> LogFormat {
    config
        .logging
        .as_ref()
        .and_then(|logging| logging.format)
        .unwrap_or(LogFormat::Json)
}
