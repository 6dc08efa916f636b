//! Session lifecycle and risk balancer against the simulated exchange

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arachne_core::{Side, SymbolRules};
use arachne_engine::{FlattenGuard, RiskBalancer, Session, SessionConfig};
use arachne_exchange_sim::SimExchange;
use arachne_gateway::{ExchangeGateway, GatewayError, OrderType, RetryPolicy};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;

const SYMBOL: &str = "BTCUSDT";

fn test_rules() -> SymbolRules {
    SymbolRules::new(SYMBOL, dec!(0.01), dec!(0.001), dec!(0.001), dec!(5)).unwrap()
}

fn test_config() -> SessionConfig {
    SessionConfig {
        symbol: SYMBOL.to_string(),
        limit_on_position: dec!(1000),
        limit_on_transaction: dec!(0.25),
        up_bound: Some(dec!(0.10)),
        low_bound: Some(dec!(0.10)),
        delta_price: dec!(0.02),
        delta_quantity: dec!(0.05),
        min_steps: 3,
        leverage: 10,
        liquidation_guard: dec!(0.05),
        // Keep the periodic balancer quiet unless a test drives it
        balancer_interval: Duration::from_secs(3600),
        retry: RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(1),
        },
        ..SessionConfig::default()
    }
}

/// Poll until `probe` returns true or the deadline passes
async fn wait_until<F, Fut>(what: &str, mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if probe().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_session_enters_seeds_and_stop_flattens() {
    let _ = env_logger::try_init();
    let exchange = Arc::new(SimExchange::new(SYMBOL, dec!(100), dec!(10000)));
    let session = Session::new(test_config(), test_rules(), exchange.clone()).unwrap();
    let handle = session.handle();
    let run = tokio::spawn(session.run());

    wait_until("grid seeding", || {
        let exchange = exchange.clone();
        async move { exchange.open_order_count().await == 2 }
    })
    .await;

    // Entry market buy opened the position
    assert!(exchange.position_amt().await > Decimal::ZERO);
    assert_eq!(exchange.leverage().await, 10);

    // First rung on each side of the entry
    let sell_seed = exchange.order_at_price(dec!(102.00)).await.unwrap();
    assert_eq!(sell_seed.side, Side::Sell);
    let buy_seed = exchange.order_at_price(dec!(98.00)).await.unwrap();
    assert_eq!(buy_seed.side, Side::Buy);
    // The lower rung accumulates a grown quantity
    assert!(buy_seed.quantity > sell_seed.quantity);

    handle.stop();
    run.await.unwrap().unwrap();

    assert_eq!(exchange.cancel_all_calls().await, 1);
    assert_eq!(exchange.open_order_count().await, 0);
}

#[tokio::test]
async fn test_fills_drive_the_grid_and_duplicates_are_ignored() {
    let _ = env_logger::try_init();
    let exchange = Arc::new(SimExchange::new(SYMBOL, dec!(100), dec!(10000)));
    let session = Session::new(test_config(), test_rules(), exchange.clone()).unwrap();
    let handle = session.handle();
    let run = tokio::spawn(session.run());

    wait_until("grid seeding", || {
        let exchange = exchange.clone();
        async move { exchange.open_order_count().await == 2 }
    })
    .await;

    // The market trades through the sell rung
    let sell_seed = exchange.order_at_price(dec!(102.00)).await.unwrap();
    let filled = exchange.fill_order(sell_seed.order_id).await;

    // Reaction: extension sell above, replenishment buy at the entry rung
    wait_until("fill reaction", || {
        let exchange = exchange.clone();
        async move { exchange.open_order_count().await == 3 }
    })
    .await;
    let extension = exchange.order_at_price(dec!(104.04)).await.unwrap();
    assert_eq!(extension.side, Side::Sell);
    let replenish = exchange.order_at_price(dec!(100.00)).await.unwrap();
    assert_eq!(replenish.side, Side::Buy);
    assert_eq!(replenish.quantity, filled.quantity);

    // At-least-once upstream delivery: a duplicate changes nothing
    exchange.redeliver(&filled);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(exchange.open_order_count().await, 3);

    handle.stop();
    run.await.unwrap().unwrap();
    assert_eq!(exchange.open_order_count().await, 0);
}

#[tokio::test]
async fn test_structural_error_flattens_and_terminates() {
    let _ = env_logger::try_init();
    let exchange = Arc::new(SimExchange::new(SYMBOL, dec!(100), dec!(10000)));
    let session = Session::new(test_config(), test_rules(), exchange.clone()).unwrap();
    let run = tokio::spawn(session.run());

    wait_until("grid seeding", || {
        let exchange = exchange.clone();
        async move { exchange.open_order_count().await == 2 }
    })
    .await;

    exchange
        .inject_create_error(GatewayError::Exchange {
            code: -1000,
            message: "internal error".into(),
        })
        .await;
    let sell_seed = exchange.order_at_price(dec!(102.00)).await.unwrap();
    exchange.fill_order(sell_seed.order_id).await;

    let result = run.await.unwrap();
    assert!(result.is_err());
    // Fail-safe-by-flattening: nothing left unmanaged
    assert_eq!(exchange.cancel_all_calls().await, 1);
    assert_eq!(exchange.open_order_count().await, 0);
}

#[tokio::test]
async fn test_infeasible_sizing_stops_the_session() {
    let exchange = Arc::new(SimExchange::new(SYMBOL, dec!(100), dec!(10000)));
    let config = SessionConfig {
        limit_on_position: dec!(1),
        ..test_config()
    };
    let session = Session::new(config, test_rules(), exchange.clone()).unwrap();

    let result = session.run().await;
    assert!(result.is_err());
    assert_eq!(exchange.cancel_all_calls().await, 1);
}

#[tokio::test]
async fn test_cancel_all_fires_exactly_once_under_contention() {
    let exchange = Arc::new(SimExchange::new(SYMBOL, dec!(100), dec!(10000)));
    let guard = Arc::new(FlattenGuard::new());
    let retry = RetryPolicy::default();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let exchange = exchange.clone();
        let guard = guard.clone();
        tasks.push(tokio::spawn(async move {
            guard.cancel_all(exchange.as_ref(), SYMBOL, retry).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert!(guard.has_fired());
    assert_eq!(exchange.cancel_all_calls().await, 1);
}

// -- balancer ------------------------------------------------------------

struct BalancerFixture {
    exchange: Arc<SimExchange>,
    balancer: RiskBalancer,
    shutdown_rx: watch::Receiver<bool>,
}

async fn balancer_fixture(config: SessionConfig, open_position: bool) -> BalancerFixture {
    let exchange = Arc::new(SimExchange::new(SYMBOL, dec!(100), dec!(10000)));
    if open_position {
        exchange
            .create_order(&arachne_gateway::OrderRequest::market(
                SYMBOL,
                Side::Buy,
                dec!(1),
            ))
            .await
            .unwrap();
    }
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let balancer = RiskBalancer::new(
        config,
        exchange.clone(),
        Arc::new(FlattenGuard::new()),
        dec!(100),
        Arc::new(shutdown_tx),
    );
    BalancerFixture {
        exchange,
        balancer,
        shutdown_rx,
    }
}

#[tokio::test]
async fn test_balancer_tops_up_isolated_margin() {
    let f = balancer_fixture(test_config(), true).await;

    let flattened = f.balancer.tick().await.unwrap();
    assert!(!flattened);

    // Half of free balance became isolated margin
    assert_eq!(f.exchange.margin_additions().await, vec![dec!(5000)]);

    // Already at target: the next tick adds nothing
    f.balancer.tick().await.unwrap();
    assert_eq!(f.exchange.margin_additions().await.len(), 1);
}

#[tokio::test]
async fn test_balancer_never_touches_margin_when_flat() {
    let f = balancer_fixture(test_config(), false).await;

    let flattened = f.balancer.tick().await.unwrap();
    assert!(!flattened);
    assert!(f.exchange.margin_additions().await.is_empty());
}

#[tokio::test]
async fn test_balancer_flattens_on_upper_bound_cross() {
    let f = balancer_fixture(test_config(), true).await;
    f.exchange.set_price(dec!(111)).await;

    let flattened = f.balancer.tick().await.unwrap();
    assert!(flattened);
    assert_eq!(f.exchange.cancel_all_calls().await, 1);
    // Reduce-only close brought the position flat
    assert_eq!(f.exchange.position_amt().await, Decimal::ZERO);
    // And the session was asked to wind down
    assert!(*f.shutdown_rx.borrow());
}

#[tokio::test]
async fn test_balancer_flattens_on_runaway_unrealized_pnl() {
    let f = balancer_fixture(test_config(), true).await;
    // |PnL| above free * leverage
    f.exchange.set_unrealized_profit(dec!(-200000)).await;

    let flattened = f.balancer.tick().await.unwrap();
    assert!(flattened);
    assert_eq!(f.exchange.position_amt().await, Decimal::ZERO);
}

#[tokio::test]
async fn test_balancer_uses_trailing_stop_close_when_configured() {
    let config = SessionConfig {
        callback_rate: Some(dec!(0.005)),
        ..test_config()
    };
    let f = balancer_fixture(config, true).await;
    let mut fills = f.exchange.subscribe_fills();
    f.exchange.set_price(dec!(111)).await;

    let flattened = f.balancer.tick().await.unwrap();
    assert!(flattened);

    let close = fills.recv().await.unwrap();
    assert_eq!(close.order_type, OrderType::TrailingStopMarket);
    assert_eq!(close.side, Side::Sell);
    assert!(close.reduce_only);
}
