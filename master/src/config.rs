use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}: valor inválido {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Configuración del master, leída una vez al arrancar.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub node_id: String,
    /// Dirección que se anuncia como dueña de las tareas
    pub advertised_address: String,
    pub data_root: PathBuf,
    pub sweep_interval: Duration,
    pub hook_timeout: Duration,
    pub hook_workers: usize,
    /// Reglas `local:externo` para el mapper estático
    pub port_mappings: Vec<(u16, u16)>,
    pub external_address: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let opt = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            bind_addr: parse_or(&opt, "MASTER_BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            node_id: opt("NODE_ID").unwrap_or_else(common::new_id),
            advertised_address: opt("ADVERTISED_ADDRESS").unwrap_or_else(|| "127.0.0.1".to_string()),
            data_root: opt("DATA_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/data")),
            sweep_interval: Duration::from_secs(parse_or(&opt, "TTL_SWEEP_INTERVAL_SECS", 5u64)?.max(1)),
            hook_timeout: Duration::from_millis(parse_or(&opt, "HOOK_TIMEOUT_MS", 5000u64)?),
            hook_workers: parse_or(&opt, "HOOK_WORKERS", 4usize)?,
            port_mappings: match opt("PORT_MAPPINGS") {
                Some(raw) => parse_port_mappings(&raw)?,
                None => Vec::new(),
            },
            external_address: opt("EXTERNAL_ADDRESS"),
        })
    }
}

fn parse_or<T: FromStr>(
    opt: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match opt(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

/// `"8080:18080,9000:19000"` → `[(8080, 18080), (9000, 19000)]`
fn parse_port_mappings(raw: &str) -> Result<Vec<(u16, u16)>, ConfigError> {
    let invalid = || ConfigError::Invalid {
        key: "PORT_MAPPINGS",
        value: raw.to_string(),
    };

    raw.split(',')
        .map(str::trim)
        .filter(|rule| !rule.is_empty())
        .map(|rule| -> Result<(u16, u16), ConfigError> {
            let (local, external) = rule.split_once(':').ok_or_else(invalid)?;
            let local = local.trim().parse().map_err(|_| invalid())?;
            let external = external.trim().parse().map_err(|_| invalid())?;
            Ok((local, external))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = load(&[]).unwrap();

        assert_eq!(cfg.bind_addr.port(), 8080);
        assert_eq!(cfg.advertised_address, "127.0.0.1");
        assert_eq!(cfg.data_root, PathBuf::from("/data"));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(5));
        assert_eq!(cfg.hook_timeout, Duration::from_millis(5000));
        assert_eq!(cfg.hook_workers, 4);
        assert!(cfg.port_mappings.is_empty());
        assert!(cfg.external_address.is_none());
        assert!(!cfg.node_id.is_empty());
    }

    #[test]
    fn values_are_read_from_the_environment() {
        let cfg = load(&[
            ("MASTER_BIND_ADDR", "127.0.0.1:9090"),
            ("NODE_ID", "nodo-1"),
            ("TTL_SWEEP_INTERVAL_SECS", "2"),
            ("PORT_MAPPINGS", "9090:19090, 9091:19091"),
            ("EXTERNAL_ADDRESS", "203.0.113.7"),
        ])
        .unwrap();

        assert_eq!(cfg.bind_addr.port(), 9090);
        assert_eq!(cfg.node_id, "nodo-1");
        assert_eq!(cfg.sweep_interval, Duration::from_secs(2));
        assert_eq!(cfg.port_mappings, vec![(9090, 19090), (9091, 19091)]);
        assert_eq!(cfg.external_address.as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn invalid_numbers_are_errors() {
        let err = load(&[("HOOK_WORKERS", "muchos")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "HOOK_WORKERS", .. }));

        let err = load(&[("PORT_MAPPINGS", "8080-18080")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT_MAPPINGS", .. }));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = load(&[("DATA_ROOT", "  "), ("HOOK_TIMEOUT_MS", "")]).unwrap();

        assert_eq!(cfg.data_root, PathBuf::from("/data"));
        assert_eq!(cfg.hook_timeout, Duration::from_millis(5000));
    }
}
