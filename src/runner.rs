/*!
 * Wiring of the connection subsystem for the `run` and `probe` commands
 */

use crate::config::KioskConfig;
use crate::error::{KioskError, Result};
use kiosklink_connect::network::is_reachable;
use kiosklink_connect::{
    ConnectionManager, ConnectivitySource, InitialOutcome, SocketTransport,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Options of `kiosklink run`
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Stop after the initial connection phase
    pub once: bool,
}

/// Print one JSON line on stdout
pub fn emit_line<T: Serialize>(kind: &str, data: &T) {
    let line = json!({ "type": kind, "data": data });
    println!("{}", line);
}

/// Connect, then stream diagnostics changes and backend events as JSON lines
/// until Ctrl-C.
pub async fn run(config: &KioskConfig, options: RunOptions) -> Result<()> {
    config.validate()?;
    let identity = config.identity()?;

    let transport = Arc::new(SocketTransport::new(config.transport_config())?);
    let manager = ConnectionManager::new(
        transport.clone(),
        Arc::new(config.connectivity()),
        config.manager_config(),
    )?;
    let mut reporter = manager.reporter();
    let mut messages = transport.messages();

    info!(
        endpoint = %config.endpoint,
        device = %identity.device_id,
        authenticated = identity.is_authenticated(),
        "Starting kiosk link"
    );

    let outcome = manager
        .connect_with_initial_retry(identity, config.initial_retry())
        .await?;
    emit_line("diagnostics", &manager.diagnostics());

    match outcome {
        InitialOutcome::Connected { attempts } => info!(attempts, "Display online"),
        InitialOutcome::Degraded { attempts } => {
            warn!(attempts, "Display degraded, reconnecting in the background")
        }
        InitialOutcome::Aborted => info!("Initial connection aborted"),
    }

    if options.once {
        manager.dispose().await;
        return match outcome {
            InitialOutcome::Degraded { attempts } => Err(KioskError::Degraded { attempts }),
            _ => Ok(()),
        };
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    warn!(error = %e, "Signal handler failed");
                }
                info!("Shutting down");
                break;
            }
            snapshot = reporter.changed() => match snapshot {
                Some(snapshot) => emit_line("diagnostics", &snapshot),
                None => break,
            },
            message = messages.recv() => match message {
                Ok(message) => emit_line("event", &message),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event output fell behind, messages dropped")
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    manager.dispose().await;
    Ok(())
}

/// One reachability query, as the network monitor seeds itself
pub async fn probe(config: &KioskConfig) {
    let source = config.connectivity();
    let interfaces = source.check().await;
    let reachable = is_reachable(&interfaces);

    emit_line(
        "network",
        &json!({ "reachable": reachable, "interfaces": interfaces }),
    );
}
