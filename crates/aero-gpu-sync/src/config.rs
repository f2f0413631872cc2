use crate::error::ConfigError;

/// Env var toggling batched host command reads (`0`/`false`/`no`/`off` to disable).
pub const BATCH_READS_ENV: &str = "AERO_GPU_SYNC_BATCH_READS";
pub const MAX_TIMELINES_ENV: &str = "AERO_GPU_SYNC_MAX_TIMELINES";
pub const MAX_FENCES_PER_TIMELINE_ENV: &str = "AERO_GPU_SYNC_MAX_FENCES_PER_TIMELINE";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncDeviceConfig {
    /// Whether the device can hand out several host commands per interrupt. Devices that cannot
    /// are drained one command per interrupt, with an ACK after every read.
    pub can_read_multiple_commands: bool,
    pub max_timelines: usize,
    pub max_fences_per_timeline: usize,
    pub interrupt_thread_name: String,
}

impl Default for SyncDeviceConfig {
    fn default() -> Self {
        Self {
            can_read_multiple_commands: true,
            max_timelines: 4096,
            max_fences_per_timeline: 65536,
            interrupt_thread_name: "aero-gpu-sync-irq".to_string(),
        }
    }
}

impl SyncDeviceConfig {
    /// Defaults overridden by the `AERO_GPU_SYNC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(BATCH_READS_ENV) {
            config.can_read_multiple_commands = parse_bool(BATCH_READS_ENV, &raw)?;
        }
        if let Some(raw) = lookup(MAX_TIMELINES_ENV) {
            config.max_timelines = parse_limit(MAX_TIMELINES_ENV, &raw)?;
        }
        if let Some(raw) = lookup(MAX_FENCES_PER_TIMELINE_ENV) {
            config.max_fences_per_timeline = parse_limit(MAX_FENCES_PER_TIMELINE_ENV, &raw)?;
        }

        Ok(config)
    }
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    let v = raw.trim();
    if v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
    {
        return Ok(true);
    }
    if v == "0"
        || v.eq_ignore_ascii_case("false")
        || v.eq_ignore_ascii_case("no")
        || v.eq_ignore_ascii_case("off")
    {
        return Ok(false);
    }
    Err(ConfigError::InvalidValue {
        var,
        value: raw.to_string(),
    })
}

fn parse_limit(var: &'static str, raw: &str) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: raw.to_string(),
        }),
    }
}
