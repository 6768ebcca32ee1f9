use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use toolscan_core::{BackendSettings, OutputFormat, PollSettings};

/// Optional settings file (`--config`). Any format the `config` crate
/// recognises by extension works; TOML is the documented one.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    /// Human-readable interval such as `"2s"` or `"500ms"`.
    pub poll_interval: Option<String>,
    pub max_ticks: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .and_then(|cfg| cfg.try_deserialize::<Self>())
            .with_context(|| format!("failed to read config file {}", path.display()))
    }

    fn poll_interval(&self) -> Result<Option<Duration>> {
        self.poll_interval
            .as_deref()
            .map(|raw| {
                humantime::parse_duration(raw.trim())
                    .with_context(|| format!("invalid poll_interval `{raw}` in config file"))
            })
            .transpose()
    }
}

/// Command-line values that take precedence over everything else.
#[derive(Debug, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub interval: Option<Duration>,
    pub max_ticks: Option<u64>,
    /// Poll until every task settles, ignoring any tick bound.
    pub unbounded: bool,
}

#[derive(Debug, Clone)]
pub struct RunContext {
    pub backend: BackendSettings,
    pub poll: PollSettings,
    pub format: OutputFormat,
}

impl RunContext {
    /// Layer settings: flags over the config file over the environment over defaults.
    pub fn resolve(
        config_path: Option<&Path>,
        overrides: Overrides,
        format: OutputFormat,
    ) -> Result<Self> {
        let file = match config_path {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::layer(BackendSettings::from_env()?, file, overrides, format)
    }

    fn layer(
        mut backend: BackendSettings,
        file: FileConfig,
        overrides: Overrides,
        format: OutputFormat,
    ) -> Result<Self> {
        let mut poll = PollSettings::default();
        if let Some(interval) = file.poll_interval()? {
            poll.interval = interval;
        }
        if let Some(ticks) = file.max_ticks {
            poll.max_ticks = Some(ticks);
        }
        if let Some(url) = file.base_url {
            backend.base_url = url;
        }
        if let Some(secs) = file.timeout_secs.filter(|secs| *secs > 0) {
            backend.timeout_secs = secs;
        }

        if let Some(url) = overrides.base_url {
            backend.base_url = url;
        }
        if let Some(interval) = overrides.interval {
            poll.interval = interval;
        }
        if let Some(ticks) = overrides.max_ticks {
            poll.max_ticks = Some(ticks);
        }
        if overrides.unbounded {
            poll.max_ticks = None;
        }

        Ok(Self {
            backend,
            poll,
            format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn file_values_override_defaults() {
        let file = write_config(
            "base_url = \"http://scanner.internal:9000\"\npoll_interval = \"500ms\"\nmax_ticks = 12\n",
        );
        let cfg = FileConfig::load(file.path()).unwrap();
        let ctx = RunContext::layer(
            BackendSettings::default(),
            cfg,
            Overrides::default(),
            OutputFormat::Human,
        )
        .unwrap();
        assert_eq!(ctx.backend.base_url, "http://scanner.internal:9000");
        assert_eq!(ctx.poll.interval, Duration::from_millis(500));
        assert_eq!(ctx.poll.max_ticks, Some(12));
    }

    #[test]
    fn flags_beat_the_file() {
        let cfg = FileConfig {
            base_url: Some("http://from-file".into()),
            max_ticks: Some(12),
            ..FileConfig::default()
        };
        let ctx = RunContext::layer(
            BackendSettings::default(),
            cfg,
            Overrides {
                base_url: Some("http://from-flag".into()),
                interval: Some(Duration::from_secs(5)),
                unbounded: true,
                ..Overrides::default()
            },
            OutputFormat::Json,
        )
        .unwrap();
        assert_eq!(ctx.backend.base_url, "http://from-flag");
        assert_eq!(ctx.poll.interval, Duration::from_secs(5));
        assert_eq!(ctx.poll.max_ticks, None);
    }

    #[test]
    fn missing_file_values_keep_defaults() {
        let ctx = RunContext::layer(
            BackendSettings::default(),
            FileConfig::default(),
            Overrides::default(),
            OutputFormat::Human,
        )
        .unwrap();
        assert_eq!(ctx.poll, PollSettings::default());
        assert_eq!(ctx.backend, BackendSettings::default());
    }

    #[test]
    fn unparsable_interval_is_an_error() {
        let cfg = FileConfig {
            poll_interval: Some("soon".into()),
            ..FileConfig::default()
        };
        let err = RunContext::layer(
            BackendSettings::default(),
            cfg,
            Overrides::default(),
            OutputFormat::Human,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid poll_interval `soon`"));
    }
}
