//! Parsing of the kernel command line handed to us by the bootloader.
//!
//! Unlike the Linux-derived command line grammar this framework once parsed,
//! the surface this kernel actually consumes is narrow: a handful of
//! `itests.*` keys controlling the fault-injection harness (see
//! `crate::test_harness`) plus a `log.level` override. The parser is a small
//! hand-rolled tokenizer rather than a regex engine, since the crate is
//! `#![no_std]` and the grammar has no need for one.

use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
};
use log::debug;

/// The parsed kernel command line.
///
/// Keys are lower-cased at parse time, so lookups are case-insensitive.
/// Values are stored verbatim (case is preserved) since some (like suite
/// names) are matched case-insensitively by their consumer instead.
#[derive(Debug, Default)]
pub struct KCmdlineArg {
    options: BTreeMap<String, Option<String>>,
}

impl KCmdlineArg {
    /// Returns whether a bare or valued option was present.
    pub fn has(&self, key: &str) -> bool {
        self.options.contains_key(&key.to_ascii_lowercase())
    }

    /// Returns the value of an option, if it had one.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options
            .get(&key.to_ascii_lowercase())
            .and_then(|v| v.as_deref())
    }

    /// Looks up `key`, falling back to `alias` if `key` is absent.
    ///
    /// Used for the `itests.*` / `interrupt_tests.*` alias pair.
    pub fn get_aliased(&self, key: &str, alias: &str) -> Option<&str> {
        self.get(key).or_else(|| self.get(alias))
    }

    fn has_aliased(&self, key: &str, alias: &str) -> bool {
        self.has(key) || self.has(alias)
    }
}

impl From<&str> for KCmdlineArg {
    fn from(cmdline: &str) -> Self {
        let mut options = BTreeMap::new();

        for token in cmdline.split_whitespace() {
            if token.is_empty() {
                continue;
            }
            let (key, value) = match token.split_once('=') {
                Some((k, v)) => (k, Some(v.to_string())),
                None => (token, None),
            };
            if key.is_empty() {
                debug!("kcmdline: ignoring malformed token {:?}", token);
                continue;
            }
            options.insert(key.to_ascii_lowercase(), value);
        }

        debug!("kcmdline: parsed {} option(s)", options.len());
        KCmdlineArg { options }
    }
}

/// Typed view over the `itests.*` command-line surface (see SPEC_FULL.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItestsMode {
    Off,
    All,
    Suite(ItestsSuite),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItestsSuite {
    pub basic: bool,
    pub memory: bool,
    pub control: bool,
}

impl ItestsSuite {
    pub const NONE: Self = ItestsSuite {
        basic: false,
        memory: false,
        control: false,
    };
    pub const ALL: Self = ItestsSuite {
        basic: true,
        memory: true,
        control: true,
    };

    fn from_tokens(s: &str) -> Self {
        let mut suite = Self::NONE;
        for tok in s.split('+') {
            match tok.trim().to_ascii_lowercase().as_str() {
                "basic" => suite.basic = true,
                "memory" => suite.memory = true,
                "control" | "control-flow" | "control_flow" => suite.control = true,
                "all" => suite = Self::ALL,
                other if !other.is_empty() => debug!("kcmdline: unknown itests suite {:?}", other),
                _ => {}
            }
        }
        suite
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Summary,
    Verbose,
}

/// Fully resolved configuration for the fault-injection harness, derived
/// from the command line.
#[derive(Debug, Clone, Copy)]
pub struct ItestsConfig {
    pub mode: ItestsMode,
    pub verbosity: Verbosity,
    pub timeout_ms: Option<u64>,
    pub shutdown_after: bool,
    pub stacktrace_demo: bool,
}

impl Default for ItestsConfig {
    fn default() -> Self {
        ItestsConfig {
            mode: ItestsMode::Off,
            verbosity: Verbosity::Summary,
            timeout_ms: None,
            shutdown_after: false,
            stacktrace_demo: false,
        }
    }
}

impl KCmdlineArg {
    /// Resolves the `itests.*` (and `interrupt_tests.*`-aliased) options into
    /// a harness configuration.
    pub fn itests_config(&self) -> ItestsConfig {
        let mut cfg = ItestsConfig::default();

        match self.get_aliased("itests", "interrupt_tests") {
            None => {}
            Some("") | Some("on") => cfg.mode = ItestsMode::All,
            Some("off") => cfg.mode = ItestsMode::Off,
            Some(name) => cfg.mode = ItestsMode::Suite(ItestsSuite::from_tokens(name)),
        }

        if let Some(suite) = self.get_aliased("itests.suite", "interrupt_tests.suite") {
            cfg.mode = ItestsMode::Suite(ItestsSuite::from_tokens(suite));
        }

        if let Some(v) = self.get_aliased("itests.verbosity", "interrupt_tests.verbosity") {
            cfg.verbosity = match v.to_ascii_lowercase().as_str() {
                "quiet" => Verbosity::Quiet,
                "verbose" => Verbosity::Verbose,
                _ => Verbosity::Summary,
            };
        }

        if let Some(t) = self.get_aliased("itests.timeout", "interrupt_tests.timeout") {
            cfg.timeout_ms = parse_timeout(t);
        }

        if let Some(s) = self.get_aliased("itests.shutdown", "interrupt_tests.shutdown") {
            cfg.shutdown_after = is_truthy(s);
        }

        if self.has_aliased("itests.stacktrace_demo", "interrupt_tests.stacktrace_demo") {
            let v = self
                .get_aliased("itests.stacktrace_demo", "interrupt_tests.stacktrace_demo")
                .unwrap_or("on");
            cfg.stacktrace_demo = is_truthy(v);
        }

        cfg
    }

    /// Resolves `log.level=`, if present, to a `log::LevelFilter`.
    pub fn log_level(&self) -> Option<log::LevelFilter> {
        self.get("log.level").and_then(|v| match v.to_ascii_lowercase().as_str() {
            "off" => Some(log::LevelFilter::Off),
            "error" => Some(log::LevelFilter::Error),
            "warn" => Some(log::LevelFilter::Warn),
            "info" => Some(log::LevelFilter::Info),
            "debug" => Some(log::LevelFilter::Debug),
            "trace" => Some(log::LevelFilter::Trace),
            _ => None,
        })
    }
}

fn is_truthy(s: &str) -> bool {
    matches!(s.to_ascii_lowercase().as_str(), "on" | "true" | "1" | "yes")
}

fn parse_timeout(s: &str) -> Option<u64> {
    let s = s.trim();
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let n: u64 = digits.parse().ok()?;
    let rest = &s[digits.len()..];
    match rest.trim().to_ascii_lowercase().as_str() {
        "" | "ms" => Some(n),
        "s" => Some(n.saturating_mul(1000)),
        _ => Some(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test_case]
    fn parses_basic_tokens() {
        let cmd = KCmdlineArg::from("itests=memory itests.timeout=500ms log.level=debug");
        assert_eq!(cmd.get("itests"), Some("memory"));
        assert_eq!(cmd.get("itests.timeout"), Some("500ms"));
        let cfg = cmd.itests_config();
        assert_eq!(cfg.timeout_ms, Some(500));
        assert_eq!(cmd.log_level(), Some(log::LevelFilter::Debug));
    }

    #[test_case]
    fn case_insensitive_keys() {
        let cmd = KCmdlineArg::from("ITESTS=ON Itests.Shutdown=on");
        assert!(cmd.has("itests"));
        assert!(matches!(cmd.itests_config().mode, ItestsMode::All));
        assert!(cmd.itests_config().shutdown_after);
    }

    #[test_case]
    fn unknown_tokens_ignored() {
        let cmd = KCmdlineArg::from("quiet loglevel=5 unknown.key=value");
        assert_eq!(cmd.log_level(), None);
        assert!(cmd.has("unknown.key"));
    }

    #[test_case]
    fn suite_bitmask_union() {
        let suite = ItestsSuite::from_tokens("basic+memory");
        assert!(suite.basic);
        assert!(suite.memory);
        assert!(!suite.control);
    }
}
