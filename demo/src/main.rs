use anyhow::{Context, Result};
use futures_util::StreamExt;
use relay_application::command::CommandHandler;
use relay_application::context::AppContext;
use relay_application::{CreateSubscription, SubscriptionService};
use relay_domain::config::EventManagerConfig;
use relay_domain::event::LedgerEvent;
use relay_domain::eventing::{
    EventManager, InMemoryTransport, LedgerCallbacks, LedgerPlugin, TransportRegistry,
};
use relay_domain::persist::InMemoryStorage;
use relay_domain::subscription::SubscriptionFilter;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// 模拟账本：周期性产生区块事件
struct SimulatedLedger;

impl LedgerPlugin for SimulatedLedger {
    fn name(&self) -> &str {
        "simulated"
    }
}

fn load_config(path: &Path) -> Result<EventManagerConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: EventManagerConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}

async fn simulate_ledger(events: Arc<EventManager>, token: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    let mut block = 0u64;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        block += 1;

        let topic = if block % 3 == 0 { "BatchPin" } else { "TokenTransfer" };
        let event = LedgerEvent::builder()
            .namespace("default")
            .name(topic)
            .payload_ref(format!("ipfs://block-{block}"))
            .protocol_id(format!("{block:012}/000000"))
            .build();

        // 同步确认失败时由账本侧决定何时重试，这里等待下一个区块
        if let Err(err) = events.ledger_event(event).await {
            warn!(block, error = %err, "ledger event rejected");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("relay_domain=info".parse()?)
                .add_directive("relay_application=info".parse()?)
                .add_directive("demo=info".parse()?),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => load_config(Path::new(&path))?,
        None => EventManagerConfig::default(),
    };

    let storage = Arc::new(InMemoryStorage::new());
    let transport = Arc::new(InMemoryTransport::default());
    let mut registry = TransportRegistry::new();
    registry.register_instance("memory", transport.clone());

    let events = Arc::new(
        EventManager::builder()
            .ledger(Arc::new(SimulatedLedger))
            .storage(storage.clone())
            .registry(registry)
            .config(config)
            .build()?,
    );
    storage.add_callbacks(Arc::new(events.new_events()));
    events.start().await?;

    let service = SubscriptionService::new(storage.clone(), events.clone());
    let ctx = AppContext::builder().actor("demo").build();
    let create = CreateSubscription::builder()
        .namespace("default")
        .name("token-transfers")
        .transport("memory")
        .filter(SubscriptionFilter::topic("^Token"))
        .build();
    CommandHandler::<CreateSubscription>::handle(&service, &ctx, create).await?;

    let mut deliveries = transport.deliveries();
    let printer = tokio::spawn(async move {
        while let Some(delivery) = deliveries.next().await {
            match delivery {
                Ok(d) => info!(
                    subscription = %d.subscription_name,
                    sequence = d.event.sequence(),
                    topic = d.event.topic(),
                    payload = d.event.payload_ref(),
                    "delivered"
                ),
                Err(err) => warn!(error = %err, "delivery stream lagged"),
            }
        }
    });
    let ledger = tokio::spawn(simulate_ledger(
        events.clone(),
        events.cancellation_token().clone(),
    ));

    info!(
        transports = ?events.transports().collect::<Vec<_>>(),
        "running, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    events.shutdown();
    events.wait_stop().await;
    let _ = ledger.await;
    printer.abort();
    Ok(())
}
