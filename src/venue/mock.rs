//! In-memory brokerage for tests
//!
//! Keeps an order book in memory and lets tests drive status changes, fills,
//! rejections and transport failures without network access. Order ids are
//! generated sequentially as `MOCK-1`, `MOCK-2`, ...

use super::{BrokerageClient, BrokerageOrder, PlaceOrder, VenueError, VenueStatus};
use crate::order::BrokerOrderId;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct MockState {
    book: Vec<BrokerageOrder>,
    requests: HashMap<BrokerOrderId, PlaceOrder>,
    placed: Vec<PlaceOrder>,
    modifications: Vec<(BrokerOrderId, PlaceOrder)>,
    cancellations: Vec<BrokerOrderId>,
    last_prices: HashMap<String, Decimal>,
    reject_reason: Option<String>,
    failing_submissions: usize,
    replace_on_modify: bool,
    book_unavailable: bool,
    book_requests: usize,
}

impl MockState {
    fn entry_mut(&mut self, id: &str) -> Result<&mut BrokerageOrder, VenueError> {
        self.book
            .iter_mut()
            .find(|order| order.id == id)
            .ok_or_else(|| VenueError::OrderNotFound(id.to_string()))
    }
}

fn is_terminal(status: VenueStatus) -> bool {
    matches!(
        status,
        VenueStatus::Canceled | VenueStatus::Rejected | VenueStatus::Complete
    )
}

/// Mock brokerage client
#[derive(Debug, Default)]
pub struct MockBrokerage {
    order_counter: AtomicU64,
    state: Mutex<MockState>,
}

impl MockBrokerage {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> BrokerOrderId {
        format!("MOCK-{}", self.order_counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Overwrite the book entry for `id`
    pub async fn set_status(
        &self,
        id: &str,
        status: VenueStatus,
        filled_quantity: Decimal,
        average_price: Option<Decimal>,
        status_message: Option<&str>,
    ) {
        let mut state = self.state.lock().await;
        if let Ok(entry) = state.entry_mut(id) {
            entry.status = status;
            entry.raw_status = format!("{:?}", status).to_uppercase();
            entry.filled_quantity = filled_quantity;
            entry.average_price = average_price;
            entry.status_message = status_message.map(str::to_string);
            entry.updated_at = Utc::now();
        }
    }

    /// Execute `quantity` more of `id` at `price`
    ///
    /// Moves the order to COMPLETE once its full quantity has been executed.
    pub async fn fill(&self, id: &str, quantity: Decimal, price: Decimal) {
        let mut state = self.state.lock().await;
        let requested = state.requests.get(id).map(|r| r.quantity);
        let Ok(entry) = state.entry_mut(id) else {
            return;
        };

        let notional = entry.average_price.unwrap_or_default() * entry.filled_quantity
            + price * quantity;
        entry.filled_quantity += quantity;
        entry.average_price = Some(notional / entry.filled_quantity);
        if requested.is_some_and(|q| entry.filled_quantity >= q) {
            entry.status = VenueStatus::Complete;
            entry.raw_status = "COMPLETE".to_string();
        }
        entry.updated_at = Utc::now();
    }

    pub async fn set_last_price(&self, instrument: &str, price: Decimal) {
        self.state
            .lock()
            .await
            .last_prices
            .insert(instrument.to_string(), price);
    }

    /// Reject every new order with `reason` (None to accept again)
    pub async fn reject_new_orders(&self, reason: Option<&str>) {
        self.state.lock().await.reject_reason = reason.map(str::to_string);
    }

    /// Fail the next `count` placements with a transport-style error
    pub async fn fail_next_submissions(&self, count: usize) {
        self.state.lock().await.failing_submissions = count;
    }

    /// Assign a fresh id on every modify instead of keeping the old one
    pub async fn replace_ids_on_modify(&self, enabled: bool) {
        self.state.lock().await.replace_on_modify = enabled;
    }

    /// Make `order_book` fail until re-enabled
    pub async fn set_order_book_unavailable(&self, unavailable: bool) {
        self.state.lock().await.book_unavailable = unavailable;
    }

    /// Number of order book reads so far, failed ones included
    pub async fn book_requests(&self) -> usize {
        self.state.lock().await.book_requests
    }

    pub async fn placed(&self) -> Vec<PlaceOrder> {
        self.state.lock().await.placed.clone()
    }

    pub async fn modifications(&self) -> Vec<(BrokerOrderId, PlaceOrder)> {
        self.state.lock().await.modifications.clone()
    }

    pub async fn cancellations(&self) -> Vec<BrokerOrderId> {
        self.state.lock().await.cancellations.clone()
    }

    pub async fn order(&self, id: &str) -> Option<BrokerageOrder> {
        let state = self.state.lock().await;
        state.book.iter().find(|order| order.id == id).cloned()
    }

    /// Current request terms for `id`
    pub async fn request(&self, id: &str) -> Option<PlaceOrder> {
        self.state.lock().await.requests.get(id).cloned()
    }
}

#[async_trait]
impl BrokerageClient for MockBrokerage {
    async fn place_order(&self, request: &PlaceOrder) -> Result<BrokerOrderId, VenueError> {
        let mut state = self.state.lock().await;
        if state.failing_submissions > 0 {
            state.failing_submissions -= 1;
            return Err(VenueError::Api {
                status: 503,
                message: "simulated submission failure".to_string(),
            });
        }

        let id = self.next_id();
        let (status, message) = match &state.reject_reason {
            Some(reason) => (VenueStatus::Rejected, Some(reason.clone())),
            None => (VenueStatus::Open, None),
        };

        state.placed.push(request.clone());
        state.requests.insert(id.clone(), request.clone());
        state.book.push(BrokerageOrder {
            id: id.clone(),
            status,
            raw_status: format!("{:?}", status).to_uppercase(),
            status_message: message,
            filled_quantity: Decimal::ZERO,
            average_price: None,
            updated_at: Utc::now(),
        });

        Ok(id)
    }

    async fn modify_order(
        &self,
        id: &str,
        request: &PlaceOrder,
    ) -> Result<BrokerOrderId, VenueError> {
        let mut state = self.state.lock().await;
        let entry = state.entry_mut(id)?;
        if is_terminal(entry.status) {
            return Err(VenueError::Api {
                status: 400,
                message: format!("order {} can no longer be modified", id),
            });
        }
        entry.updated_at = Utc::now();

        state.modifications.push((id.to_string(), request.clone()));
        if !state.replace_on_modify {
            state.requests.insert(id.to_string(), request.clone());
            return Ok(id.to_string());
        }

        let new_id = self.next_id();
        if let Some(position) = state.book.iter().position(|order| order.id == id) {
            let mut replacement = state.book.remove(position);
            replacement.id = new_id.clone();
            state.book.push(replacement);
        }
        state.requests.remove(id);
        state.requests.insert(new_id.clone(), request.clone());
        Ok(new_id)
    }

    async fn cancel_order(&self, id: &str) -> Result<(), VenueError> {
        let mut state = self.state.lock().await;
        let entry = state.entry_mut(id)?;
        if is_terminal(entry.status) {
            return Err(VenueError::Api {
                status: 400,
                message: format!("order {} can no longer be cancelled", id),
            });
        }
        entry.status = VenueStatus::Canceled;
        entry.raw_status = "CANCELLED".to_string();
        entry.status_message = None;
        entry.updated_at = Utc::now();
        state.cancellations.push(id.to_string());
        Ok(())
    }

    async fn order_book(&self) -> Result<Vec<BrokerageOrder>, VenueError> {
        let mut state = self.state.lock().await;
        state.book_requests += 1;
        if state.book_unavailable {
            return Err(VenueError::Api {
                status: 503,
                message: "order book unavailable".to_string(),
            });
        }
        Ok(state.book.clone())
    }

    async fn last_traded_price(&self, instrument: &str) -> Result<Decimal, VenueError> {
        self.state
            .lock()
            .await
            .last_prices
            .get(instrument)
            .copied()
            .ok_or_else(|| VenueError::Decode(format!("no quote for {}", instrument)))
    }
}
