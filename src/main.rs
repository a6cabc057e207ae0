use std::sync::Arc;

use anyhow::Context;
use plugbus::{init_logging, payload, Event, EventBus, EventBusConfig, SubscriptionOptions};
use serde_json::json;

const ORDERS: &str = "com.example.orders";
const RULES: &str = "com.example.rules";

/// Wires an orders plugin and a rules plugin together over one bus.
///
/// An optional first argument names a TOML file with bus configuration.
fn main() -> anyhow::Result<()> {
    init_logging()?;
    tracing::info!("plugbus {} (built {})", plugbus::VERSION, plugbus::BUILD_DATE);

    let config = match std::env::args().nth(1) {
        Some(path) => EventBusConfig::load(&path)
            .with_context(|| format!("loading bus configuration from {}", path))?,
        None => EventBusConfig::default(),
    };
    let bus = Arc::new(EventBus::with_config(config)?);

    bus.add_listener(Arc::new(|event: &Event| {
        tracing::info!("[listener] {}", event);
    }));

    bus.subscribe(
        "orders/**",
        RULES,
        |event| {
            tracing::info!(
                "[rules] checking {} for order {}",
                event.topic,
                event.get("orderId").cloned().unwrap_or_default()
            );
        },
        SubscriptionOptions::default().with_priority(10),
    );
    bus.subscribe(
        "orders/*",
        ORDERS,
        |event| tracing::info!("[orders] saw {}", event.topic),
        SubscriptionOptions::default(),
    );

    bus.register_handler("rules/check", RULES, |event| {
        let amount = event
            .get("totalAmount")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| anyhow::anyhow!("totalAmount missing"))?;
        Ok(payload(json!({"valid": amount < 1000.0})))
    });

    let order = payload(json!({"orderId": "abc123", "totalAmount": 299.99}));
    let verdict = bus.request("rules/check", order.clone(), ORDERS, None);
    tracing::info!("rules/check answered {:?}", verdict);

    let notified = bus.publish("orders/created", order.clone(), ORDERS);
    tracing::info!("orders/created notified {} subscribers", notified);

    let notified = bus.publish_sync("orders/items/added", order, ORDERS);
    tracing::info!("orders/items/added notified {} subscribers", notified);

    bus.flush();

    for pattern in bus.active_topics() {
        tracing::info!("active pattern {}", pattern);
    }
    tracing::info!("stats {:?}", bus.topic_stats("orders/created").to_data());

    bus.unsubscribe_all(RULES);
    bus.unregister_all_handlers(RULES);
    tracing::info!("{} subscriptions remain", bus.total_subscribers());

    Ok(())
}
