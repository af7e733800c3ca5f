use anyhow::Result;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::api::rest::create_router;
use crate::shared::models::AppState;

pub async fn run_rest_server(host: &str, port: u16, state: Arc<AppState>) -> Result<()> {
    // Ctrl-C ends the accept loop; in-flight turns are allowed to finish
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let shutdown_tx = Mutex::new(Some(shutdown_tx));
    ctrlc::set_handler(move || {
        info!("Shutting down nbagent API...");
        if let Ok(mut slot) = shutdown_tx.lock() {
            if let Some(tx) = slot.take() {
                let _ = tx.send(());
            }
        }
    })?;

    // Log startup banner
    info!(
        r#"
       _                          _
 _ __ | |__   __ _  __ _  ___ _ __ | |_
| '_ \| '_ \ / _` |/ _` |/ _ \ '_ \| __|
| | | | |_) | (_| | (_| |  __/ | | | |_
|_| |_|_.__/ \__,_|\__, |\___|_| |_|\__|
                   |___/
Starting nbagent REST API service...
PID: {}
"#,
        std::process::id()
    );

    // Build REST router
    info!("Building REST API routes...");
    let capabilities = state.controller.registry().capability_names();
    let app = create_router(state);

    // Start server
    let bind_addr = format!("{host}:{port}");
    info!("Binding to: {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("API started successfully!");
    info!("Conversation endpoint: http://{}:{}/app", host, port);
    info!("Executor capabilities: {}", capabilities.join(", "));
    info!("Ready to accept requests...");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await?;

    info!("REST API stopped");
    Ok(())
}
