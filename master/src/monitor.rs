use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::manager::SharedTaskManager;

/// Barrido periódico de TTL. El período es nominal: cada pasada descuenta
/// el tiempo real transcurrido, así que un tick atrasado no corre los plazos.
pub async fn sweep_expired(manager: SharedTaskManager, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        // cada pasada en su propia tarea: si una falla, la siguiente corre igual
        let pass = tokio::spawn({
            let manager = manager.clone();
            async move {
                let report = manager.lock().await.remove_expired();
                report
            }
        });
        let report = match pass.await {
            Ok(report) => report,
            Err(e) => {
                error!("pasada de TTL abortada: {}", e);
                continue;
            }
        };
        if report.is_empty() {
            debug!("barrido de TTL sin novedades");
            continue;
        }
        info!(
            "barrido de TTL: {} tareas vencidas, {} subtareas fallidas",
            report.expired_tasks.len(),
            report.failed_subtasks.len()
        );
    }
}
