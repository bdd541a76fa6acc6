//! Settings resolution with environment variable overrides.
//!
//! Each variable has strict parsing rules:
//! - Integers must be valid and within the specified range
//! - Strings must be non-empty after trimming
//! - Invalid values are ignored (the default stays in place) and logged

use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{LogFormat, ParleySettings};

/// Defaults plus `PARLEY_*` environment overrides, validated.
pub fn load_settings() -> Result<ParleySettings> {
    let mut settings = ParleySettings::default();
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Apply overrides read from the process environment.
pub fn apply_env_overrides(settings: &mut ParleySettings) {
    apply_overrides_from(settings, |key| std::env::var(key).ok());
}

/// Apply overrides using `lookup` to resolve variable names.
pub fn apply_overrides_from(settings: &mut ParleySettings, lookup: impl Fn(&str) -> Option<String>) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_string(&lookup, "PARLEY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_u64(&lookup, "PARLEY_PORT", 0, u64::from(u16::MAX)) {
        settings.server.port = v as u16;
    }
    if let Some(v) = read_u64(&lookup, "PARLEY_MAX_SEND_QUEUE", 1, 65_536) {
        settings.server.max_send_queue = v as usize;
    }
    if let Some(v) = read_u64(&lookup, "PARLEY_HEARTBEAT_INTERVAL_MS", 1_000, 600_000) {
        settings.server.heartbeat_interval_ms = v;
    }

    // ── Generation backend ──────────────────────────────────────────
    if let Some(v) = read_string(&lookup, "PARLEY_BACKEND_URL") {
        settings.generation.backend_url = v;
    }
    if let Some(v) = read_string(&lookup, "PARLEY_MODEL") {
        settings.generation.model = v;
    }
    if let Some(v) = read_u64(&lookup, "PARLEY_GENERATION_TIMEOUT_MS", 100, 3_600_000) {
        settings.generation.timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_string(&lookup, "PARLEY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_string(&lookup, "PARLEY_LOG_FORMAT") {
        match v.parse::<LogFormat>() {
            Ok(format) => settings.logging.format = format,
            Err(e) => warn!(key = "PARLEY_LOG_FORMAT", error = %e, "ignoring override"),
        }
    }
}

fn read_string(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    let value = lookup(key)?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    debug!(key, "applying environment override");
    Some(trimmed.to_string())
}

fn read_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str, min: u64, max: u64) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(v) if (min..=max).contains(&v) => {
            debug!(key, value = v, "applying environment override");
            Some(v)
        }
        Ok(v) => {
            warn!(key, value = v, min, max, "ignoring out-of-range override");
            None
        }
        Err(_) => {
            warn!(key, raw = %raw, "ignoring non-numeric override");
            None
        }
    }
}
