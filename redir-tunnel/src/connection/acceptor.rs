//! Accept loop for redirected connections

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::handler::TunnelHandler;
use crate::redirect::RedirectListener;

/// Pause after a failed accept so fd exhaustion does not spin the loop
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Accept connections forever, one task per connection.
///
/// An accept error is logged and the loop continues; the listener is never
/// torn down by a single failure.
pub async fn run_accept_loop(listener: RedirectListener, handler: Arc<TunnelHandler>) {
    info!("Starting accept loop on {}", listener.local_addr());

    loop {
        match listener.accept().await {
            Ok((stream, client_addr)) => {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    handler.handle(stream, client_addr).await;
                });
            }
            Err(e) => {
                warn!("Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}
