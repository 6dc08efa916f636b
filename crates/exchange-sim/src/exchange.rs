use std::collections::{BTreeMap, VecDeque};

use arachne_core::{OrderId, PositionRisk, Side};
use arachne_gateway::{
    AccountBalance, ExchangeGateway, GatewayError, MarginAction, MarginType, OrderRequest,
    OrderStatus, OrderUpdate,
};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use rust_decimal::Decimal;
use tokio::sync::{RwLock, broadcast};

/// Capacity of the fill broadcast channel
const FILL_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
struct SimState {
    price: Decimal,
    next_order_id: OrderId,
    open: BTreeMap<OrderId, OrderUpdate>,
    position_amt: Decimal,
    entry_price: Decimal,
    isolated_margin: Decimal,
    unrealized_profit: Decimal,
    liquidation_price: Decimal,
    free: Decimal,
    locked: Decimal,
    leverage: u32,
    margin_type: Option<MarginType>,
    fill_next_create: bool,
    create_errors: VecDeque<GatewayError>,
    cancel_all_calls: u32,
    margin_additions: Vec<Decimal>,
}

/// Scriptable in-memory exchange
///
/// All mutation goes through one async lock; each gateway call is atomic,
/// which is all the contract asks for. Fills are pushed on a broadcast
/// channel exactly like a live exchange's user-data stream.
pub struct SimExchange {
    symbol: String,
    state: RwLock<SimState>,
    fills_tx: broadcast::Sender<OrderUpdate>,
}

impl SimExchange {
    pub fn new(symbol: impl Into<String>, price: Decimal, free_balance: Decimal) -> Self {
        let (fills_tx, _) = broadcast::channel(FILL_CHANNEL_CAPACITY);
        Self {
            symbol: symbol.into(),
            state: RwLock::new(SimState {
                price,
                next_order_id: 1,
                open: BTreeMap::new(),
                position_amt: Decimal::ZERO,
                entry_price: Decimal::ZERO,
                isolated_margin: Decimal::ZERO,
                unrealized_profit: Decimal::ZERO,
                liquidation_price: Decimal::ZERO,
                free: free_balance,
                locked: Decimal::ZERO,
                leverage: 1,
                margin_type: None,
                fill_next_create: false,
                create_errors: VecDeque::new(),
                cancel_all_calls: 0,
                margin_additions: Vec::new(),
            }),
            fills_tx,
        }
    }

    // -- scripting -------------------------------------------------------

    pub async fn set_price(&self, price: Decimal) {
        self.state.write().await.price = price;
    }

    pub async fn set_balance(&self, free: Decimal, locked: Decimal) {
        let mut state = self.state.write().await;
        state.free = free;
        state.locked = locked;
    }

    pub async fn set_liquidation_price(&self, price: Decimal) {
        self.state.write().await.liquidation_price = price;
    }

    pub async fn set_unrealized_profit(&self, pnl: Decimal) {
        self.state.write().await.unrealized_profit = pnl;
    }

    /// Queue an error for the next `create_order` call
    pub async fn inject_create_error(&self, error: GatewayError) {
        self.state.write().await.create_errors.push_back(error);
    }

    /// Make the next created order report an immediate full fill
    pub async fn fill_next_create(&self) {
        self.state.write().await.fill_next_create = true;
    }

    /// Fill a resting order and push the notification
    ///
    /// Panics if the order is unknown; tests own the script.
    pub async fn fill_order(&self, order_id: OrderId) -> OrderUpdate {
        let mut state = self.state.write().await;
        let mut update = state
            .open
            .remove(&order_id)
            .unwrap_or_else(|| panic!("no resting order {order_id}"));
        update.status = OrderStatus::Filled;
        update.executed_qty = update.quantity;
        update.avg_price = update.price;
        update.timestamp = Utc::now();
        apply_fill(&mut *state, &update);
        drop(state);

        let _ = self.fills_tx.send(update.clone());
        update
    }

    /// Re-deliver a notification (at-least-once upstream semantics)
    pub fn redeliver(&self, update: &OrderUpdate) {
        let _ = self.fills_tx.send(update.clone());
    }

    // -- inspection ------------------------------------------------------

    pub async fn open_order_count(&self) -> usize {
        self.state.read().await.open.len()
    }

    /// The resting order at an exact price, if any
    pub async fn order_at_price(&self, price: Decimal) -> Option<OrderUpdate> {
        self.state
            .read()
            .await
            .open
            .values()
            .find(|o| o.price == price)
            .cloned()
    }

    pub async fn cancel_all_calls(&self) -> u32 {
        self.state.read().await.cancel_all_calls
    }

    pub async fn position_amt(&self) -> Decimal {
        self.state.read().await.position_amt
    }

    pub async fn margin_additions(&self) -> Vec<Decimal> {
        self.state.read().await.margin_additions.clone()
    }

    pub async fn leverage(&self) -> u32 {
        self.state.read().await.leverage
    }
}

/// Position bookkeeping for a fill
fn apply_fill(state: &mut SimState, update: &OrderUpdate) {
    let qty = update.executed_qty;
    let price = if update.avg_price.is_zero() {
        state.price
    } else {
        update.avg_price
    };
    match update.side {
        Side::Buy => {
            let old_notional = state.position_amt * state.entry_price;
            state.position_amt += qty;
            if state.position_amt > Decimal::ZERO {
                state.entry_price = (old_notional + qty * price) / state.position_amt;
            }
        }
        Side::Sell => {
            state.position_amt -= qty;
            if state.position_amt <= Decimal::ZERO {
                state.entry_price = if state.position_amt.is_zero() {
                    Decimal::ZERO
                } else {
                    price
                };
            }
        }
    }
    debug!(
        "[SIM] fill {} {} @ {} -> position {}",
        update.side.as_str(),
        qty,
        price,
        state.position_amt
    );
}

fn build_update(state: &mut SimState, request: &OrderRequest, status: OrderStatus) -> OrderUpdate {
    let order_id = state.next_order_id;
    state.next_order_id += 1;
    let filled = status.is_fill();
    let price = request.price.unwrap_or(Decimal::ZERO);
    OrderUpdate {
        order_id,
        client_order_id: request.client_order_id.clone(),
        symbol: request.symbol.clone(),
        side: request.side,
        order_type: request.order_type,
        status,
        price,
        avg_price: if filled {
            if price.is_zero() { state.price } else { price }
        } else {
            Decimal::ZERO
        },
        quantity: request.quantity,
        executed_qty: if filled { request.quantity } else { Decimal::ZERO },
        reduce_only: request.reduce_only,
        timestamp: Utc::now(),
    }
}

#[async_trait]
impl ExchangeGateway for SimExchange {
    async fn current_price(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        self.check_symbol(symbol)?;
        Ok(self.state.read().await.price)
    }

    async fn position_risk(&self, symbol: &str) -> Result<PositionRisk, GatewayError> {
        self.check_symbol(symbol)?;
        let state = self.state.read().await;
        Ok(PositionRisk {
            symbol: self.symbol.clone(),
            entry_price: state.entry_price,
            break_even_price: state.entry_price,
            position_amt: state.position_amt,
            liquidation_price: state.liquidation_price,
            unrealized_profit: state.unrealized_profit,
            leverage: Decimal::from(state.leverage),
            isolated_margin: state.isolated_margin,
        })
    }

    async fn account_balance(&self) -> Result<AccountBalance, GatewayError> {
        let state = self.state.read().await;
        Ok(AccountBalance::new("USDT", state.free, state.locked))
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OrderUpdate>, GatewayError> {
        self.check_symbol(symbol)?;
        Ok(self.state.read().await.open.values().cloned().collect())
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderUpdate, GatewayError> {
        self.check_symbol(&request.symbol)?;
        let mut state = self.state.write().await;
        if let Some(error) = state.create_errors.pop_front() {
            return Err(error);
        }

        let status = if state.fill_next_create || request.price.is_none() {
            OrderStatus::Filled
        } else {
            OrderStatus::New
        };
        state.fill_next_create = false;

        let update = build_update(&mut *state, request, status);
        if status.is_fill() {
            apply_fill(&mut *state, &update);
        } else {
            state.open.insert(update.order_id, update.clone());
        }
        drop(state);

        // Marketable orders also hit the user-data stream
        if status.is_fill() {
            let _ = self.fills_tx.send(update.clone());
        }
        Ok(update)
    }

    async fn cancel_order(&self, symbol: &str, order_id: OrderId) -> Result<(), GatewayError> {
        self.check_symbol(symbol)?;
        let mut state = self.state.write().await;
        state
            .open
            .remove(&order_id)
            .map(|_| ())
            .ok_or(GatewayError::OrderNotFound(order_id))
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), GatewayError> {
        self.check_symbol(symbol)?;
        let mut state = self.state.write().await;
        state.cancel_all_calls += 1;
        state.open.clear();
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError> {
        self.check_symbol(symbol)?;
        self.state.write().await.leverage = leverage;
        Ok(())
    }

    async fn set_margin_type(
        &self,
        symbol: &str,
        margin_type: MarginType,
    ) -> Result<(), GatewayError> {
        self.check_symbol(symbol)?;
        let mut state = self.state.write().await;
        if state.margin_type == Some(margin_type) {
            return Err(GatewayError::MarginUnchanged);
        }
        state.margin_type = Some(margin_type);
        Ok(())
    }

    async fn set_position_margin(
        &self,
        symbol: &str,
        amount: Decimal,
        action: MarginAction,
    ) -> Result<(), GatewayError> {
        self.check_symbol(symbol)?;
        let mut state = self.state.write().await;
        match action {
            MarginAction::Add => {
                if amount > state.free {
                    return Err(GatewayError::InsufficientMargin);
                }
                state.free -= amount;
                state.isolated_margin += amount;
                state.margin_additions.push(amount);
            }
            MarginAction::Reduce => {
                state.isolated_margin -= amount;
                state.free += amount;
            }
        }
        Ok(())
    }

    fn subscribe_fills(&self) -> broadcast::Receiver<OrderUpdate> {
        self.fills_tx.subscribe()
    }
}

impl SimExchange {
    fn check_symbol(&self, symbol: &str) -> Result<(), GatewayError> {
        if symbol != self.symbol {
            return Err(GatewayError::UnknownSymbol(symbol.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arachne_gateway::OrderRequest;
    use rust_decimal_macros::dec;

    fn sim() -> SimExchange {
        SimExchange::new("BTCUSDT", dec!(100), dec!(10000))
    }

    #[tokio::test]
    async fn test_limit_order_rests_until_filled() {
        let exchange = sim();
        let mut fills = exchange.subscribe_fills();

        let request = OrderRequest::limit("BTCUSDT", Side::Sell, dec!(1), dec!(102));
        let update = exchange.create_order(&request).await.unwrap();
        assert_eq!(update.status, OrderStatus::New);
        assert_eq!(exchange.open_order_count().await, 1);

        let filled = exchange.fill_order(update.order_id).await;
        assert_eq!(filled.status, OrderStatus::Filled);
        assert_eq!(exchange.open_order_count().await, 0);
        assert_eq!(exchange.position_amt().await, dec!(-1));

        let notified = fills.recv().await.unwrap();
        assert_eq!(notified.order_id, update.order_id);
    }

    #[tokio::test]
    async fn test_market_order_fills_immediately() {
        let exchange = sim();
        let request = OrderRequest::market("BTCUSDT", Side::Buy, dec!(2));
        let update = exchange.create_order(&request).await.unwrap();

        assert_eq!(update.status, OrderStatus::Filled);
        assert_eq!(update.avg_price, dec!(100));
        assert_eq!(exchange.position_amt().await, dec!(2));
    }

    #[tokio::test]
    async fn test_injected_error_surfaces_once() {
        let exchange = sim();
        exchange
            .inject_create_error(GatewayError::InsufficientMargin)
            .await;

        let request = OrderRequest::limit("BTCUSDT", Side::Buy, dec!(1), dec!(98));
        assert_eq!(
            exchange.create_order(&request).await.unwrap_err(),
            GatewayError::InsufficientMargin
        );
        assert!(exchange.create_order(&request).await.is_ok());
    }

    #[tokio::test]
    async fn test_margin_type_unchanged_rejection() {
        let exchange = sim();
        exchange
            .set_margin_type("BTCUSDT", MarginType::Isolated)
            .await
            .unwrap();
        assert_eq!(
            exchange
                .set_margin_type("BTCUSDT", MarginType::Isolated)
                .await
                .unwrap_err(),
            GatewayError::MarginUnchanged
        );
    }

    #[tokio::test]
    async fn test_position_margin_moves_balance() {
        let exchange = sim();
        exchange
            .set_position_margin("BTCUSDT", dec!(1000), MarginAction::Add)
            .await
            .unwrap();

        let balance = exchange.account_balance().await.unwrap();
        assert_eq!(balance.free, dec!(9000));
        let risk = exchange.position_risk("BTCUSDT").await.unwrap();
        assert_eq!(risk.isolated_margin, dec!(1000));
        assert_eq!(exchange.margin_additions().await, vec![dec!(1000)]);
    }

    #[tokio::test]
    async fn test_cancel_order() {
        let exchange = sim();
        let request = OrderRequest::limit("BTCUSDT", Side::Buy, dec!(1), dec!(98));
        let update = exchange.create_order(&request).await.unwrap();

        exchange.cancel_order("BTCUSDT", update.order_id).await.unwrap();
        assert_eq!(exchange.open_order_count().await, 0);

        assert_eq!(
            exchange.cancel_order("BTCUSDT", update.order_id).await,
            Err(GatewayError::OrderNotFound(update.order_id))
        );
    }

    #[tokio::test]
    async fn test_unknown_symbol_rejected() {
        let exchange = sim();
        assert!(matches!(
            exchange.current_price("ETHUSDT").await,
            Err(GatewayError::UnknownSymbol(_))
        ));
    }
}
