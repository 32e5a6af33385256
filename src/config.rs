//! Configuration string parsing.
//!
//! Mirrors WiredTiger's own `compile_configuration` facility (spec §9):
//! configuration is a small `key=value,key2=(nested=1,other="str")` grammar,
//! not JSON, so it is hand-parsed rather than pulled in via `serde`. Each
//! [`ConfigTemplate`] precompiles the set of recognized keys once, so the
//! hot path (opening a cursor, starting a transaction) never re-walks a
//! schema — it just re-parses the string against an already-known key set.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// One `key=value` pair, or a `key(...)` nested group, from a configuration
/// string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Str(String),
    /// A parenthesized sub-group, kept as raw text for the owner to
    /// recursively parse with its own template.
    Group(String),
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&str> {
        match self {
            ConfigValue::Group(s) => Some(s),
            _ => None,
        }
    }
}

/// A parsed configuration string: an ordered map of key to value, keeping
/// first-seen order so later identical keys override earlier ones, matching
/// the engine's own "last write wins" semantics for config strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedConfig {
    values: BTreeMap<String, ConfigValue>,
}

impl ParsedConfig {
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(ConfigValue::as_bool).unwrap_or(default)
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(ConfigValue::as_int).unwrap_or(default)
    }

    pub fn get_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).and_then(ConfigValue::as_str).unwrap_or(default)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|s| s.as_str())
    }
}

/// Parse a configuration string of the form:
///
/// ```text
/// key1=value1,key2="quoted string",key3=(a=1,b=2),flag_key
/// ```
///
/// A bare `flag_key` (no `=`) is shorthand for `flag_key=true`.
pub fn parse(input: &str) -> Result<ParsedConfig> {
    let mut values = BTreeMap::new();
    let bytes = input.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        // Skip separators and whitespace.
        while i < bytes.len() && (bytes[i] == b',' || bytes[i].is_ascii_whitespace()) {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }

        let key_start = i;
        while i < bytes.len() && bytes[i] != b'=' && bytes[i] != b',' {
            i += 1;
        }
        let key = input[key_start..i].trim().to_string();
        if key.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "empty configuration key at offset {key_start}"
            )));
        }

        if i < bytes.len() && bytes[i] == b'=' {
            i += 1; // consume '='
            let (value, next) = parse_value(input, bytes, i)?;
            values.insert(key, value);
            i = next;
        } else {
            values.insert(key, ConfigValue::Bool(true));
        }
    }
    Ok(ParsedConfig { values })
}

fn parse_value(input: &str, bytes: &[u8], mut i: usize) -> Result<(ConfigValue, usize)> {
    if i >= bytes.len() {
        return Err(Error::InvalidArgument("value expected after '='".into()));
    }
    match bytes[i] {
        b'"' => {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i] != b'"' {
                i += 1;
            }
            if i >= bytes.len() {
                return Err(Error::InvalidArgument("unterminated quoted string".into()));
            }
            let s = input[start..i].to_string();
            i += 1; // consume closing quote
            Ok((ConfigValue::Str(s), i))
        }
        b'(' => {
            i += 1;
            let start = i;
            let mut depth = 1usize;
            while i < bytes.len() && depth > 0 {
                match bytes[i] {
                    b'(' => depth += 1,
                    b')' => depth -= 1,
                    _ => (),
                }
                if depth == 0 {
                    break;
                }
                i += 1;
            }
            if depth != 0 {
                return Err(Error::InvalidArgument("unterminated group '('".into()));
            }
            let group = input[start..i].to_string();
            i += 1; // consume ')'
            Ok((ConfigValue::Group(group), i))
        }
        _ => {
            let start = i;
            while i < bytes.len() && bytes[i] != b',' {
                i += 1;
            }
            let raw = input[start..i].trim();
            let value = match raw {
                "true" => ConfigValue::Bool(true),
                "false" => ConfigValue::Bool(false),
                _ => match raw.parse::<i64>() {
                    Ok(n) => ConfigValue::Int(n),
                    Err(_) => ConfigValue::Str(raw.to_string()),
                },
            };
            Ok((value, i))
        }
    }
}

/// Engine-wide tunables (spec §6's enumerated configuration knobs), parsed
/// once at `Connection::open` time.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub direct_io: bool,
    pub mmap: bool,
    pub log_file_max: u64,
    pub allocation_size: u32,
    pub leaf_page_max: u32,
    pub memory_page_max: u32,
    pub cache_size: u64,
    pub eviction_target_pct: u8,
    pub eviction_trigger_pct: u8,
    pub dirty_target_pct: u8,
    pub dirty_trigger_pct: u8,
    pub updates_target_pct: u8,
    pub updates_trigger_pct: u8,
    pub checkpoint_wait: bool,
    pub compact_threshold_pct: u8,
    pub log_sync: LogSync,
    pub timestamp_ignore_prepare: bool,
    pub round_up_prepared: bool,
    pub round_up_read: bool,
    pub no_timestamp: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSync {
    Off,
    Periodic,
    On,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            direct_io: false,
            mmap: true,
            log_file_max: 100 << 20,
            allocation_size: 4096,
            leaf_page_max: 32 << 10,
            memory_page_max: 5 << 20,
            cache_size: 100 << 20,
            eviction_target_pct: 80,
            eviction_trigger_pct: 95,
            dirty_target_pct: 5,
            dirty_trigger_pct: 20,
            updates_target_pct: 5,
            updates_trigger_pct: 20,
            checkpoint_wait: true,
            compact_threshold_pct: 10,
            log_sync: LogSync::On,
            timestamp_ignore_prepare: false,
            round_up_prepared: false,
            round_up_read: false,
            no_timestamp: false,
        }
    }
}

impl EngineConfig {
    pub fn from_str(input: &str) -> Result<Self> {
        let parsed = parse(input)?;
        let mut cfg = EngineConfig::default();
        cfg.apply(&parsed)?;
        Ok(cfg)
    }

    fn apply(&mut self, parsed: &ParsedConfig) -> Result<()> {
        self.direct_io = parsed.get_bool("direct_io", self.direct_io);
        self.mmap = parsed.get_bool("mmap", self.mmap);
        self.log_file_max = parsed.get_int("log_file_max", self.log_file_max as i64) as u64;
        self.allocation_size = parsed.get_int("allocation_size", self.allocation_size as i64) as u32;
        self.leaf_page_max = parsed.get_int("leaf_page_max", self.leaf_page_max as i64) as u32;
        self.memory_page_max = parsed.get_int("memory_page_max", self.memory_page_max as i64) as u32;
        self.cache_size = parsed.get_int("cache_size", self.cache_size as i64) as u64;
        self.eviction_target_pct = parsed.get_int("eviction_target", self.eviction_target_pct as i64) as u8;
        self.eviction_trigger_pct = parsed.get_int("eviction_trigger", self.eviction_trigger_pct as i64) as u8;
        self.dirty_target_pct = parsed.get_int("dirty_target", self.dirty_target_pct as i64) as u8;
        self.dirty_trigger_pct = parsed.get_int("dirty_trigger", self.dirty_trigger_pct as i64) as u8;
        self.updates_target_pct = parsed.get_int("updates_target", self.updates_target_pct as i64) as u8;
        self.updates_trigger_pct = parsed.get_int("updates_trigger", self.updates_trigger_pct as i64) as u8;
        self.checkpoint_wait = parsed.get_bool("checkpoint_wait", self.checkpoint_wait);
        self.compact_threshold_pct = parsed.get_int("compact_threshold", self.compact_threshold_pct as i64) as u8;
        self.log_sync = match parsed.get_str("log_sync", "on") {
            "off" => LogSync::Off,
            "periodic" => LogSync::Periodic,
            "on" => LogSync::On,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown log_sync value: {other}"
                )))
            }
        };
        self.timestamp_ignore_prepare = parsed.get_bool("ignore_prepare", self.timestamp_ignore_prepare);
        self.round_up_prepared = parsed.get_bool("round_up_prepared", self.round_up_prepared);
        self.round_up_read = parsed.get_bool("round_up_read", self.round_up_read);
        self.no_timestamp = parsed.get_bool("no_timestamp", self.no_timestamp);

        if !self.allocation_size.is_power_of_two() {
            return Err(Error::InvalidArgument(
                "allocation_size must be a power of two".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_pairs() {
        let c = parse("a=1,b=true,c=\"hi there\",d").unwrap();
        assert_eq!(c.get_int("a", 0), 1);
        assert!(c.get_bool("b", false));
        assert_eq!(c.get_str("c", ""), "hi there");
        assert!(c.get_bool("d", false));
    }

    #[test]
    fn parses_nested_group() {
        let c = parse("outer=(inner=3,flag)").unwrap();
        let group = c.get("outer").unwrap().as_group().unwrap();
        let inner = parse(group).unwrap();
        assert_eq!(inner.get_int("inner", 0), 3);
    }

    #[test]
    fn engine_config_rejects_bad_allocation_size() {
        let err = EngineConfig::from_str("allocation_size=4097").unwrap_err();
        assert_eq!(err.kind(), crate::error::Kind::InvalidArgument);
    }

    #[test]
    fn engine_config_defaults_then_overrides() {
        let cfg = EngineConfig::from_str("cache_size=1048576,log_sync=off").unwrap();
        assert_eq!(cfg.cache_size, 1 << 20);
        assert_eq!(cfg.log_sync, LogSync::Off);
        assert_eq!(cfg.allocation_size, 4096);
    }
}
