// master/src/state.rs

use std::sync::Arc;

use serde::Serialize;

use crate::manager::SharedTaskManager;
use crate::portmap::NetworkInfo;

#[derive(Clone)]
pub struct AppState {
    pub manager: SharedTaskManager,
    pub node: Arc<NodeInfo>,
}

/// Cómo ven este nodo los proveedores. Se arma al arrancar, después del
/// descubrimiento de puertos.
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub address: String,
    pub port: u16,
    pub network: NetworkInfo,
}
