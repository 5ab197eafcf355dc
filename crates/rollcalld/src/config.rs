use rollcall_store::config::parse_var;
use rollcall_store::{Config, ConfigError};

const DEFAULT_QUEUE_DEPTH: usize = 16;

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bus {
    Session,
    System,
}

/// Daemon configuration: the shared store settings plus IPC knobs.
pub struct DaemonConfig {
    pub store: Config,
    /// `ROLLCALL_BUS`: `session` (default) or `system`.
    pub bus: Bus,
    /// Pending requests the engine queue holds before callers wait.
    pub queue_depth: usize,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let store = Config::from_lookup(&lookup)?;
        let bus = match lookup("ROLLCALL_BUS") {
            Some(v) if v.eq_ignore_ascii_case("system") => Bus::System,
            Some(v) if v.eq_ignore_ascii_case("session") || v.is_empty() => Bus::Session,
            Some(v) => {
                return Err(ConfigError::Invalid {
                    key: "ROLLCALL_BUS",
                    value: v,
                    reason: "expected \"session\" or \"system\"".into(),
                })
            }
            None => Bus::Session,
        };

        let queue_depth =
            parse_var::<usize, _>(&lookup, "ROLLCALL_QUEUE_DEPTH")?.unwrap_or(DEFAULT_QUEUE_DEPTH);
        if queue_depth == 0 {
            return Err(ConfigError::Invalid {
                key: "ROLLCALL_QUEUE_DEPTH",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            store,
            bus,
            queue_depth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = DaemonConfig::from_lookup(lookup(&[("ROLLCALL_DATA_DIR", "/srv/rollcall")])).unwrap();
        assert_eq!(cfg.bus, Bus::Session);
        assert_eq!(cfg.queue_depth, DEFAULT_QUEUE_DEPTH);
    }

    #[test]
    fn test_overrides() {
        let cfg = DaemonConfig::from_lookup(lookup(&[
            ("ROLLCALL_DATA_DIR", "/srv/rollcall"),
            ("ROLLCALL_BUS", "System"),
            ("ROLLCALL_QUEUE_DEPTH", "4"),
        ]))
        .unwrap();
        assert_eq!(cfg.bus, Bus::System);
        assert_eq!(cfg.queue_depth, 4);
    }

    #[test]
    fn test_bad_queue_depth_is_an_error() {
        for bad in ["lots", "-3", "0"] {
            let res = DaemonConfig::from_lookup(lookup(&[
                ("ROLLCALL_DATA_DIR", "/srv"),
                ("ROLLCALL_QUEUE_DEPTH", bad),
            ]));
            assert!(
                matches!(res, Err(ConfigError::Invalid { key: "ROLLCALL_QUEUE_DEPTH", .. })),
                "{bad} accepted"
            );
        }
    }

    #[test]
    fn test_bad_bus_is_an_error() {
        let res = DaemonConfig::from_lookup(lookup(&[
            ("ROLLCALL_DATA_DIR", "/srv"),
            ("ROLLCALL_BUS", "tcp"),
        ]));
        assert!(matches!(res, Err(ConfigError::Invalid { key: "ROLLCALL_BUS", .. })));
    }
}
