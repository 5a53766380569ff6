use crate::model::RetryPolicy;
use schemaless_mapping::{ArrayPolicy, FingerprintOptions};
use std::time::Duration;

pub const DEFAULT_FANOUT_CAP: usize = 50;
const MAX_FANOUT_CAP: usize = 1_000;

pub const DEFAULT_FANOUT_CONCURRENCY: usize = 8;
const MAX_FANOUT_CONCURRENCY: usize = 64;

pub const DEFAULT_MAX_INPUT_CHARS: usize = 4_000;
const MAX_INPUT_CHARS_CEILING: usize = 1_000_000;

/// Learned mappings stay cached for 60 days unless read again.
pub const DEFAULT_MAPPING_TTL_MINUTES: u64 = 86_400;
const MAX_MAPPING_TTL_MINUTES: u64 = 525_600;

pub const DEFAULT_QUERY_TTL_MINUTES: u64 = 30;

/// Tunables for [`crate::Translator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Items beyond this index of a list input are dropped
    pub fanout_cap: usize,

    /// Sub-document translations running at once
    pub fanout_concurrency: usize,

    /// Largest skeleton (in characters) sent to the model
    pub max_input_chars: usize,

    pub skip_numbered_keys: bool,
    pub array_policy: ArrayPolicy,

    /// Serialize mapping generation per cache key
    pub single_flight: bool,

    pub mapping_ttl: Duration,
    pub query_ttl: Duration,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fanout_cap: DEFAULT_FANOUT_CAP,
            fanout_concurrency: DEFAULT_FANOUT_CONCURRENCY,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            skip_numbered_keys: false,
            array_policy: ArrayPolicy::Collapse,
            single_flight: true,
            mapping_ttl: minutes(DEFAULT_MAPPING_TTL_MINUTES),
            query_ttl: minutes(DEFAULT_QUERY_TTL_MINUTES),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `SCHEMALESS_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |name: &str| lookup(name);

        let mapping_ttl_minutes = parse_bounded(
            var("SCHEMALESS_MAPPING_TTL_MINUTES").as_deref(),
            DEFAULT_MAPPING_TTL_MINUTES,
            1,
            MAX_MAPPING_TTL_MINUTES,
        );

        Self {
            fanout_cap: parse_bounded(
                var("SCHEMALESS_FANOUT_CAP").as_deref(),
                defaults.fanout_cap,
                1,
                MAX_FANOUT_CAP,
            ),
            fanout_concurrency: parse_bounded(
                var("SCHEMALESS_FANOUT_CONCURRENCY").as_deref(),
                defaults.fanout_concurrency,
                1,
                MAX_FANOUT_CONCURRENCY,
            ),
            max_input_chars: parse_bounded(
                var("SCHEMALESS_MAX_INPUT_CHARS").as_deref(),
                defaults.max_input_chars,
                1,
                MAX_INPUT_CHARS_CEILING,
            ),
            skip_numbered_keys: parse_flag(
                var("SCHEMALESS_SKIP_NUMBERED_KEYS").as_deref(),
                defaults.skip_numbered_keys,
            ),
            single_flight: parse_flag(
                var("SCHEMALESS_SINGLE_FLIGHT").as_deref(),
                defaults.single_flight,
            ),
            mapping_ttl: minutes(mapping_ttl_minutes),
            ..defaults
        }
    }

    /// Pulls the list and input limits back into the range the environment
    /// parser accepts. Applied after command line overrides.
    pub fn clamped(mut self) -> Self {
        self.fanout_cap = self.fanout_cap.clamp(1, MAX_FANOUT_CAP);
        self.fanout_concurrency = self.fanout_concurrency.clamp(1, MAX_FANOUT_CONCURRENCY);
        self.max_input_chars = self.max_input_chars.clamp(1, MAX_INPUT_CHARS_CEILING);
        self
    }

    pub fn fingerprint_options(&self) -> FingerprintOptions {
        FingerprintOptions {
            array_policy: self.array_policy,
            skip_numbered_keys: self.skip_numbered_keys,
            ..FingerprintOptions::default()
        }
    }
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.saturating_mul(60))
}

pub(crate) fn parse_bounded<T>(raw: Option<&str>, default_value: T, min: T, max: T) -> T
where
    T: std::str::FromStr + Ord + Copy,
{
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default_value)
        .clamp(min, max)
}

pub(crate) fn parse_flag(raw: Option<&str>, default_value: bool) -> bool {
    match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default_value,
    }
}
