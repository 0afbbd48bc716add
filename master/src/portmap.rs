//! Mapeo de puertos hacia afuera del NAT.
//!
//! `PortMapperManager` prueba los mappers en orden y se queda con el primero
//! que encuentra un dispositivo. Los errores de los mappers se loguean y no
//! se propagan: sin mapeo el nodo sigue funcionando con su puerto local.

use std::{collections::HashMap, fmt};

use anyhow::bail;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("TCP"),
            Protocol::Udp => f.write_str("UDP"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkInfo {
    pub local_ip_address: Option<String>,
    pub external_ip_address: Option<String>,
    pub connection_type: Option<String>,
    pub status_info: Option<String>,
}

/// Un mapeo existente: dirección interna, puerto interno, habilitado.
pub type Mapping = (String, u16, bool);

pub trait PortMapper: Send {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    fn network(&self) -> NetworkInfo;

    /// Busca el dispositivo; devuelve su descripción.
    fn discover(&mut self) -> anyhow::Result<String>;

    fn get_mapping(&self, external_port: u16, protocol: Protocol) -> anyhow::Result<Option<Mapping>>;

    /// Devuelve el puerto externo asignado.
    fn create_mapping(
        &mut self,
        local_port: u16,
        external_port: Option<u16>,
        protocol: Protocol,
        lease_duration: Option<u32>,
    ) -> anyhow::Result<u16>;

    fn remove_mapping(
        &mut self,
        local_port: u16,
        external_port: u16,
        protocol: Protocol,
    ) -> anyhow::Result<bool>;
}

pub struct PortMapperManager {
    mappers: Vec<Box<dyn PortMapper>>,
    active: Option<usize>,
    mapping: HashMap<Protocol, HashMap<u16, u16>>,
}

impl PortMapperManager {
    pub fn new(mappers: Vec<Box<dyn PortMapper>>) -> Self {
        Self {
            mappers,
            active: None,
            mapping: HashMap::new(),
        }
    }

    fn active(&self) -> Option<&dyn PortMapper> {
        self.active.map(|i| self.mappers[i].as_ref())
    }

    pub fn available(&self) -> bool {
        self.active.is_some()
    }

    pub fn network(&self) -> NetworkInfo {
        self.active().map(|m| m.network()).unwrap_or_default()
    }

    /// Mapeos creados hasta ahora: protocolo → (local → externo).
    pub fn mapping(&self) -> &HashMap<Protocol, HashMap<u16, u16>> {
        &self.mapping
    }

    pub fn discover(&mut self) -> Option<String> {
        for (i, mapper) in self.mappers.iter_mut().enumerate() {
            info!("{}: iniciando descubrimiento", mapper.name());

            let device = match mapper.discover() {
                Ok(device) => device,
                Err(e) => {
                    warn!("{}: error de descubrimiento: {}", mapper.name(), e);
                    continue;
                }
            };

            if mapper.available() {
                info!("{}: descubrimiento completo: {}", mapper.name(), device);
                debug!("{}: red {:?}", mapper.name(), mapper.network());
                self.active = Some(i);
                return Some(device);
            }
            warn!("{}: no se encontró dispositivo compatible", mapper.name());
        }
        None
    }

    pub fn get_mapping(&self, external_port: u16, protocol: Protocol) -> Option<Mapping> {
        let mapper = self.active()?;
        match mapper.get_mapping(external_port, protocol) {
            Ok(mapping) => mapping,
            Err(e) => {
                info!(
                    "{}: no se pudo leer el mapeo de {} ({}): {}",
                    mapper.name(),
                    external_port,
                    protocol,
                    e
                );
                None
            }
        }
    }

    pub fn create_mapping(
        &mut self,
        local_port: u16,
        external_port: Option<u16>,
        protocol: Protocol,
        lease_duration: Option<u32>,
    ) -> Option<u16> {
        let mapper = self.mappers.get_mut(self.active?)?;
        match mapper.create_mapping(local_port, external_port, protocol, lease_duration) {
            Ok(port) => {
                info!(
                    "{}: mapeado {} -> {} ({})",
                    mapper.name(),
                    local_port,
                    port,
                    protocol
                );
                self.mapping
                    .entry(protocol)
                    .or_default()
                    .insert(local_port, port);
                Some(port)
            }
            Err(e) => {
                warn!(
                    "{}: no se pudo mapear {} ({}): {}",
                    mapper.name(),
                    local_port,
                    protocol,
                    e
                );
                None
            }
        }
    }

    pub fn remove_mapping(&mut self, local_port: u16, external_port: u16, protocol: Protocol) -> bool {
        let Some(mapper) = self.active.and_then(|i| self.mappers.get_mut(i)) else {
            return false;
        };
        match mapper.remove_mapping(local_port, external_port, protocol) {
            Ok(removed) => {
                if removed {
                    if let Some(m) = self.mapping.get_mut(&protocol) {
                        m.remove(&local_port);
                    }
                }
                info!(
                    "{}: quitado el mapeo externo {} ({})",
                    mapper.name(),
                    external_port,
                    protocol
                );
                true
            }
            Err(e) => {
                warn!(
                    "{}: no se pudo quitar el mapeo {} ({}): {}",
                    mapper.name(),
                    external_port,
                    protocol,
                    e
                );
                false
            }
        }
    }

    /// Puerto externo para un puerto local TCP, o el mismo si no hay mapeo.
    pub fn external_port(&self, local_port: u16) -> u16 {
        self.mapping
            .get(&Protocol::Tcp)
            .and_then(|m| m.get(&local_port))
            .copied()
            .unwrap_or(local_port)
    }

    /// Quita todos los mapeos creados. Se llama al apagar el nodo.
    pub fn quit(&mut self) {
        if !self.available() {
            return;
        }
        let created: Vec<(Protocol, u16, u16)> = self
            .mapping
            .iter()
            .flat_map(|(&proto, m)| m.iter().map(move |(&l, &e)| (proto, l, e)))
            .collect();
        for (protocol, local, external) in created {
            self.remove_mapping(local, external, protocol);
        }
    }
}

/// Mapper de reglas fijas, para nodos detrás de un NAT configurado a mano
/// (reenvío de puertos en el router, docker `-p`, etc).
pub struct StaticPortMapper {
    rules: HashMap<u16, u16>,
    external_address: Option<String>,
    local_address: String,
    active: HashMap<(Protocol, u16), u16>,
    discovered: bool,
}

impl StaticPortMapper {
    pub fn new(rules: &[(u16, u16)], local_address: &str, external_address: Option<String>) -> Self {
        Self {
            rules: rules.iter().copied().collect(),
            external_address,
            local_address: local_address.to_string(),
            active: HashMap::new(),
            discovered: false,
        }
    }
}

impl PortMapper for StaticPortMapper {
    fn name(&self) -> &str {
        "static"
    }

    fn available(&self) -> bool {
        self.discovered
    }

    fn network(&self) -> NetworkInfo {
        NetworkInfo {
            local_ip_address: Some(self.local_address.clone()),
            external_ip_address: self.external_address.clone(),
            connection_type: Some("static".to_string()),
            status_info: None,
        }
    }

    fn discover(&mut self) -> anyhow::Result<String> {
        if self.rules.is_empty() {
            bail!("no hay reglas de PORT_MAPPINGS");
        }
        self.discovered = true;
        Ok(format!("{} reglas estáticas", self.rules.len()))
    }

    fn get_mapping(&self, external_port: u16, protocol: Protocol) -> anyhow::Result<Option<Mapping>> {
        Ok(self
            .active
            .iter()
            .find(|(&(proto, _), &ext)| proto == protocol && ext == external_port)
            .map(|(&(_, local), _)| (self.local_address.clone(), local, true)))
    }

    fn create_mapping(
        &mut self,
        local_port: u16,
        external_port: Option<u16>,
        protocol: Protocol,
        _lease_duration: Option<u32>,
    ) -> anyhow::Result<u16> {
        let Some(&port) = self.rules.get(&local_port) else {
            bail!("sin regla para el puerto {local_port}");
        };
        if let Some(wanted) = external_port {
            if wanted != port {
                bail!("el puerto {local_port} está fijo a {port}, no a {wanted}");
            }
        }
        self.active.insert((protocol, local_port), port);
        Ok(port)
    }

    fn remove_mapping(
        &mut self,
        local_port: u16,
        _external_port: u16,
        protocol: Protocol,
    ) -> anyhow::Result<bool> {
        Ok(self.active.remove(&(protocol, local_port)).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl PortMapper for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn available(&self) -> bool {
            false
        }
        fn network(&self) -> NetworkInfo {
            NetworkInfo::default()
        }
        fn discover(&mut self) -> anyhow::Result<String> {
            bail!("sin gateway")
        }
        fn get_mapping(&self, _: u16, _: Protocol) -> anyhow::Result<Option<Mapping>> {
            bail!("sin gateway")
        }
        fn create_mapping(&mut self, _: u16, _: Option<u16>, _: Protocol, _: Option<u32>) -> anyhow::Result<u16> {
            bail!("sin gateway")
        }
        fn remove_mapping(&mut self, _: u16, _: u16, _: Protocol) -> anyhow::Result<bool> {
            bail!("sin gateway")
        }
    }

    fn manager() -> PortMapperManager {
        PortMapperManager::new(vec![
            Box::new(Broken),
            Box::new(StaticPortMapper::new(&[(8080, 18080)], "10.0.0.2", None)),
        ])
    }

    #[test]
    fn discovery_skips_failing_mappers() {
        let mut pm = manager();

        assert_eq!(pm.discover().as_deref(), Some("1 reglas estáticas"));
        assert!(pm.available());
        assert_eq!(pm.network().local_ip_address.as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn nothing_works_before_discovery() {
        let mut pm = manager();

        assert_eq!(pm.create_mapping(8080, None, Protocol::Tcp, None), None);
        assert!(!pm.remove_mapping(8080, 18080, Protocol::Tcp));
        assert_eq!(pm.external_port(8080), 8080);
        pm.quit();
    }

    #[test]
    fn created_mappings_are_tracked_and_removed_on_quit() {
        let mut pm = manager();
        pm.discover();

        assert_eq!(pm.create_mapping(8080, None, Protocol::Tcp, None), Some(18080));
        assert_eq!(pm.create_mapping(9000, None, Protocol::Tcp, None), None);
        assert_eq!(pm.external_port(8080), 18080);
        assert_eq!(
            pm.get_mapping(18080, Protocol::Tcp),
            Some(("10.0.0.2".to_string(), 8080, true))
        );

        pm.quit();

        assert!(pm.mapping().values().all(|m| m.is_empty()));
        assert_eq!(pm.get_mapping(18080, Protocol::Tcp), None);
        assert_eq!(pm.external_port(8080), 8080);
    }

    #[test]
    fn no_mapper_found_leaves_manager_unavailable() {
        let mut pm = PortMapperManager::new(vec![Box::new(Broken)]);

        assert!(pm.discover().is_none());
        assert!(!pm.available());
        assert!(pm.network().external_ip_address.is_none());
    }
}
