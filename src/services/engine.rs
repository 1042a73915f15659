//! Market-event pump: the single writer for all detector state.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info};

use crate::metrics::Metrics;
use crate::models::setup::{SetupAction, SetupEvent};
use crate::services::stream::messages::MarketEvent;
use crate::signals::SetupEngine;

/// Drain upstream market events into the engine and publish the
/// resulting setup lifecycle events. Runs until the stream closes.
pub async fn run_engine(
    mut events_rx: mpsc::UnboundedReceiver<MarketEvent>,
    engine: Arc<RwLock<SetupEngine>>,
    setups_tx: broadcast::Sender<SetupEvent>,
    metrics: Arc<Metrics>,
) {
    info!("setup engine running");
    while let Some(event) = events_rx.recv().await {
        let produced = {
            let mut engine = engine.write().await;
            match event {
                MarketEvent::Bar(bar) => {
                    metrics.bars_processed.inc();
                    engine.process_bar(bar)
                }
                MarketEvent::Trade(trade) => engine.process_trade(trade),
                MarketEvent::Quote(quote) => {
                    engine.process_quote(quote);
                    Vec::new()
                }
            }
        };

        for event in produced {
            if event.action == SetupAction::Created {
                metrics.setups_created.inc();
                info!(
                    symbol = %event.setup.symbol,
                    setup = %event.setup.id,
                    rule = event.setup.setup_type.label(),
                    confidence = event.setup.confidence,
                    "setup detected"
                );
            } else {
                debug!(
                    setup = %event.setup.id,
                    action = ?event.action,
                    "setup lifecycle event"
                );
            }
            // No receivers is fine; events are only for live clients.
            let _ = setups_tx.send(event);
        }
    }
    info!("market event stream ended; setup engine stopping");
}
