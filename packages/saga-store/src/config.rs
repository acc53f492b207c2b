use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use crate::bus::DEFAULT_CAPACITY;

/// Default bound used by [`Store::dispatch_and_await`](crate::Store::dispatch_and_await).
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Store tuning, loadable from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Actions buffered on the broadcast channel before slow observers
    /// (`take`, `subscribe_actions`) start lagging. Effect routing is not
    /// bounded by it.
    pub bus_capacity: usize,
    /// Bound applied by `dispatch_and_await`.
    pub dispatch_timeout: Duration,
}

impl StoreConfig {
    /// Load configuration from environment variables
    ///
    /// Reads `SAGA_STORE_BUS_CAPACITY` and `SAGA_STORE_DISPATCH_TIMEOUT_MS`.
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let bus_capacity = match lookup("SAGA_STORE_BUS_CAPACITY") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .context("SAGA_STORE_BUS_CAPACITY must be a valid number")?,
            None => defaults.bus_capacity,
        };
        if bus_capacity == 0 {
            anyhow::bail!("SAGA_STORE_BUS_CAPACITY must be greater than zero");
        }

        let dispatch_timeout = match lookup("SAGA_STORE_DISPATCH_TIMEOUT_MS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .context("SAGA_STORE_DISPATCH_TIMEOUT_MS must be a number of milliseconds")?,
            None => defaults.dispatch_timeout,
        };

        Ok(Self {
            bus_capacity,
            dispatch_timeout,
        })
    }

    /// Set the channel capacity.
    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity;
        self
    }

    /// Set the `dispatch_and_await` bound.
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            bus_capacity: DEFAULT_CAPACITY,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.bus_capacity, 10000);
        assert_eq!(config.dispatch_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_unset_variables_keep_defaults() {
        let config = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_reads_variables() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("SAGA_STORE_BUS_CAPACITY", "64"),
            ("SAGA_STORE_DISPATCH_TIMEOUT_MS", " 250 "),
        ]))
        .unwrap();

        assert_eq!(config.bus_capacity, 64);
        assert_eq!(config.dispatch_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_rejects_bad_numbers() {
        let err = StoreConfig::from_lookup(lookup(&[("SAGA_STORE_BUS_CAPACITY", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("SAGA_STORE_BUS_CAPACITY"));

        let err = StoreConfig::from_lookup(lookup(&[("SAGA_STORE_DISPATCH_TIMEOUT_MS", "-1")]))
            .unwrap_err();
        assert!(err.to_string().contains("SAGA_STORE_DISPATCH_TIMEOUT_MS"));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let err =
            StoreConfig::from_lookup(lookup(&[("SAGA_STORE_BUS_CAPACITY", "0")])).unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }

    #[test]
    fn test_builders() {
        let config = StoreConfig::default()
            .with_bus_capacity(8)
            .with_dispatch_timeout(Duration::from_millis(5));
        assert_eq!(config.bus_capacity, 8);
        assert_eq!(config.dispatch_timeout, Duration::from_millis(5));
    }
}
