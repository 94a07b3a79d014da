//! Backtesting broker

use super::commission::{Commission, NoCommission, TradePercentage};
use super::fill::{DefaultFillStrategy, FillStrategy};
use crate::bar::{Bar, Bars};
use crate::broker::{Broker, BrokerError};
use crate::config::BacktestConfig;
use crate::order::{
    ExecutionInfo, Order, OrderError, OrderEvent, OrderKey, OrderSpec, OrderState,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Broker that fills orders against historical bars
///
/// Orders are accepted on the next [`Broker::dispatch`] and matched starting
/// with the first bar set passed to [`BacktestingBroker::on_bars`] after
/// that. Nothing here touches the network, so submission never fails for
/// venue reasons.
pub struct BacktestingBroker<F: FillStrategy = DefaultFillStrategy> {
    cash: Decimal,
    shares: HashMap<String, Decimal>,
    last_close: HashMap<String, Decimal>,
    orders: BTreeMap<OrderKey, Order>,
    /// Session date of the first bar each order was matched against
    first_session: HashMap<OrderKey, NaiveDate>,
    next_key: u64,
    pending: Vec<OrderEvent>,
    fill_strategy: F,
    commission: Box<dyn Commission>,
    now: Option<DateTime<Utc>>,
}

impl BacktestingBroker<DefaultFillStrategy> {
    pub fn from_config(config: &BacktestConfig) -> Self {
        let commission: Box<dyn Commission> = if config.commission_pct.is_zero() {
            Box::new(NoCommission)
        } else {
            Box::new(TradePercentage {
                fraction: config.commission_pct,
            })
        };
        Self::new(
            config.initial_cash,
            DefaultFillStrategy::new(config.fill_market_on_close, config.volume_limit),
            commission,
        )
    }
}

impl<F: FillStrategy> BacktestingBroker<F> {
    pub fn new(cash: Decimal, fill_strategy: F, commission: Box<dyn Commission>) -> Self {
        Self {
            cash,
            shares: HashMap::new(),
            last_close: HashMap::new(),
            orders: BTreeMap::new(),
            first_session: HashMap::new(),
            next_key: 1,
            pending: Vec::new(),
            fill_strategy,
            commission,
            now: None,
        }
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    /// Signed holdings for `instrument`
    pub fn shares(&self, instrument: &str) -> Decimal {
        self.shares.get(instrument).copied().unwrap_or_default()
    }

    /// Cash plus holdings marked at the last seen close
    pub fn equity(&self) -> Decimal {
        self.shares.iter().fold(self.cash, |acc, (instrument, qty)| {
            acc + *qty * self.last_close.get(instrument).copied().unwrap_or_default()
        })
    }

    /// Timestamp of the bar set being processed
    pub fn current_time(&self) -> Option<DateTime<Utc>> {
        self.now
    }

    /// Match every accepted order against `bars`
    pub fn on_bars(&mut self, bars: &Bars) {
        let Some(now) = bars.date_time() else {
            return;
        };
        self.now = Some(now);
        self.fill_strategy.on_bars(bars);

        let keys: Vec<OrderKey> = self
            .orders
            .iter()
            .filter(|(_, order)| order.is_accepted() || order.is_partially_filled())
            .map(|(key, _)| *key)
            .collect();

        for key in keys {
            let Some(bar) = self
                .orders
                .get(&key)
                .and_then(|order| bars.get(order.instrument()))
            else {
                continue;
            };
            if self.expired(key, now) {
                self.expire(key);
                continue;
            }
            self.try_fill(key, bar);
        }

        for bar in bars.iter() {
            self.last_close.insert(bar.instrument().to_string(), bar.close());
        }
    }

    /// Day orders lapse once a later session starts than the one they were
    /// first matched in
    fn expired(&mut self, key: OrderKey, now: DateTime<Utc>) -> bool {
        let session = *self.first_session.entry(key).or_insert(now.date_naive());
        self.orders
            .get(&key)
            .is_some_and(|order| !order.good_till_canceled() && session < now.date_naive())
    }

    fn expire(&mut self, key: OrderKey) {
        if let Some(order) = self.orders.get_mut(&key) {
            if order.switch_state(OrderState::Canceled).is_ok() {
                info!(%key, instrument = %order.instrument(), "Day order expired");
                self.pending.push(OrderEvent::canceled(
                    key,
                    order.clone(),
                    Some("Expired".to_string()),
                ));
            }
        }
    }

    fn try_fill(&mut self, key: OrderKey, bar: &Bar) {
        let Some(order) = self.orders.get_mut(&key) else {
            return;
        };
        let Some(fill) = self.fill_strategy.fill(order, bar) else {
            return;
        };

        let commission = self.commission.calculate(order, fill.price, fill.quantity);
        let signed = if order.is_buy() {
            fill.quantity
        } else {
            -fill.quantity
        };
        let cost = signed * fill.price + commission;
        if order.is_buy() && cost > self.cash {
            debug!(%key, cost = %cost, cash = %self.cash, "Not enough cash to fill order");
            return;
        }

        let execution = ExecutionInfo {
            price: fill.price,
            quantity: fill.quantity,
            commission,
            date_time: bar.date_time(),
        };
        if let Err(e) = order.add_execution_info(execution.clone()) {
            tracing::error!(%key, error = %e, "Fill rejected by order");
            return;
        }

        self.cash -= cost;
        *self
            .shares
            .entry(order.instrument().to_string())
            .or_default() += signed;
        self.fill_strategy.on_order_filled(order, &fill);

        debug!(
            %key,
            price = %fill.price,
            quantity = %fill.quantity,
            state = %order.state(),
            "Backtest fill"
        );
        self.pending
            .push(OrderEvent::fill(key, order.clone(), execution));
    }

    fn active(&self, key: OrderKey) -> Result<&Order, BrokerError> {
        let order = self.orders.get(&key).ok_or(BrokerError::UnknownOrder(key))?;
        if order.is_filled() {
            return Err(BrokerError::AlreadyFilled(key));
        }
        if !order.is_active() {
            return Err(BrokerError::NotActive(key));
        }
        Ok(order)
    }
}

#[async_trait]
impl<F: FillStrategy> Broker for BacktestingBroker<F> {
    async fn submit_order(&mut self, mut order: Order) -> Result<OrderKey, BrokerError> {
        if !order.is_initial() {
            return Err(BrokerError::NotInitial(order.state()));
        }
        let key = OrderKey::new(self.next_key);
        self.next_key += 1;

        let at = self.now.unwrap_or_else(Utc::now);
        order.mark_submitted(format!("BT-{}", key.value()), at)?;
        debug!(%key, instrument = %order.instrument(), action = ?order.action(), "Backtest order submitted");
        self.orders.insert(key, order);
        Ok(key)
    }

    async fn cancel_order(&mut self, key: OrderKey) -> Result<(), BrokerError> {
        self.active(key)?;
        if let Some(order) = self.orders.get_mut(&key) {
            order.switch_state(OrderState::Canceled)?;
            self.pending.push(OrderEvent::canceled(
                key,
                order.clone(),
                Some("User requested cancellation".to_string()),
            ));
        }
        Ok(())
    }

    async fn modify_order(&mut self, key: OrderKey, spec: OrderSpec) -> Result<(), BrokerError> {
        for price in [spec.limit_price(), spec.stop_price()].into_iter().flatten() {
            if price <= Decimal::ZERO {
                return Err(OrderError::InvalidPrice(price).into());
            }
        }
        self.active(key)?;
        if let Some(order) = self.orders.get_mut(&key) {
            order.apply_modification(spec)?;
        }
        Ok(())
    }

    fn order(&self, key: OrderKey) -> Option<&Order> {
        self.orders.get(&key)
    }

    fn active_orders(&self) -> Vec<OrderKey> {
        self.orders
            .iter()
            .filter(|(_, order)| order.is_active())
            .map(|(key, _)| *key)
            .collect()
    }

    async fn dispatch(&mut self) -> Vec<OrderEvent> {
        let mut events = Vec::new();
        for (key, order) in self.orders.iter_mut() {
            if order.is_submitted() && order.switch_state(OrderState::Accepted).is_ok() {
                events.push(OrderEvent::accepted(*key, order.clone()));
            }
        }
        events.append(&mut self.pending);
        events
    }
}
