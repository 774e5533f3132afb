//! Runtime settings of the verification suite.
//!
//! | variable               | effect                                   |
//! |------------------------|------------------------------------------|
//! | `BRINY_VERIFY_SEED`    | seed of the random test data generator   |
//! | `BRINY_VERIFY_VERBOSE` | log every verification at `info` level   |
//! | `BRINY_ENGINE_TYPE`    | `threaded` or `naive` global engine      |
//!
//! Unparsable values are logged and replaced by the defaults.

use std::str::FromStr;

use crate::approx::{Tolerance, DEFAULT_ATOL, DEFAULT_RTOL};
use crate::engine::EngineKind;

/// Environment variable holding the data seed.
pub const SEED_VAR: &str = "BRINY_VERIFY_SEED";

/// Environment variable enabling verbose verification messages.
pub const VERBOSE_VAR: &str = "BRINY_VERIFY_VERBOSE";

/// Seed used when none is configured.
pub const DEFAULT_SEED: u64 = 0x5eed;

/// Settings shared by every driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuiteConfig {
    /// Bound used by [`crate::testing::verify::assert_equal`] comparisons.
    pub tolerance: Tolerance,
    /// Seed of the random data generator.
    pub seed: u64,
    /// Log verification messages at `info` instead of `debug`.
    pub verbose: bool,
    /// Kind of the global engine.
    pub engine: EngineKind,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            tolerance: Tolerance::new(DEFAULT_RTOL, DEFAULT_ATOL),
            seed: DEFAULT_SEED,
            verbose: false,
            engine: EngineKind::Threaded,
        }
    }
}

fn env_or<T: FromStr>(var: &str, default: T) -> T {
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("ignoring {var}={raw:?}: not a valid value");
            default
        }),
        Err(_) => default,
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

impl SuiteConfig {
    /// Defaults overridden by the environment.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let verbose = match std::env::var(VERBOSE_VAR) {
            Ok(raw) => parse_flag(&raw).unwrap_or_else(|| {
                log::warn!("ignoring {VERBOSE_VAR}={raw:?}: expected a boolean");
                defaults.verbose
            }),
            Err(_) => defaults.verbose,
        };
        Self {
            seed: env_or(SEED_VAR, defaults.seed),
            verbose,
            engine: EngineKind::from_env(),
            ..defaults
        }
    }

    /// The configuration read once from the environment.
    pub fn get() -> &'static Self {
        &CONFIG
    }
}

lazy_static::lazy_static! {
    static ref CONFIG: SuiteConfig = SuiteConfig::from_env();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_common_spellings() {
        assert_eq!(parse_flag("ON"), Some(true));
        assert_eq!(parse_flag(" 0 "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn defaults_match_reference_tolerance() {
        let cfg = SuiteConfig::default();
        assert_eq!(cfg.tolerance.rtol, 1e-5);
        assert_eq!(cfg.tolerance.atol, 1e-8);
        assert_eq!(cfg.engine, EngineKind::Threaded);
    }
}
