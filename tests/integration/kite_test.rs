//! Kite REST adapter against a mock HTTP server

use exec_core::order::{Action, Order, OrderSpec};
use exec_core::venue::{
    BrokerageClient, InstrumentSpec, InstrumentTable, KiteClient, KiteConfig, PlaceOrder,
    VenueError, VenueStatus,
};
use rust_decimal_macros::dec;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> KiteClient {
    let mut infy = InstrumentSpec::new("NSE:INFY", "NSE", "INFY");
    infy.token = Some(408065);
    let config = KiteConfig {
        base_url: server.uri(),
        api_key: "key".to_string(),
        access_token: "secret".to_string(),
        instruments: InstrumentTable::new([infy]),
        ..KiteConfig::default()
    };
    KiteClient::new(config).unwrap()
}

fn limit_buy(limit: rust_decimal::Decimal) -> PlaceOrder {
    let order = Order::new(
        Action::Buy,
        "NSE:INFY",
        OrderSpec::Limit { limit },
        dec!(10),
    )
    .unwrap();
    PlaceOrder::from_order(&order)
}

#[tokio::test]
async fn test_place_order_posts_form() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders/regular"))
        .and(header("X-Kite-Version", "3"))
        .and(header("Authorization", "token key:secret"))
        .and(body_string_contains("tradingsymbol=INFY"))
        .and(body_string_contains("transaction_type=BUY"))
        .and(body_string_contains("order_type=LIMIT"))
        .and(body_string_contains("price=1500.05"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": { "order_id": "240304000000001" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    // 1500.03 rounds to the 0.05 tick
    let id = client(&server)
        .place_order(&limit_buy(dec!(1500.03)))
        .await
        .unwrap();
    assert_eq!(id, "240304000000001");
}

#[tokio::test]
async fn test_error_envelope_maps_to_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders/regular"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "status": "error",
            "message": "Insufficient funds",
            "error_type": "MarginException"
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .place_order(&limit_buy(dec!(1500)))
        .await
        .unwrap_err();
    match err {
        VenueError::Api { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "Insufficient funds");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_instrument_never_hits_the_wire() {
    let server = MockServer::start().await;
    let order = Order::new(Action::Sell, "NSE:TCS", OrderSpec::Market, dec!(1)).unwrap();

    let err = client(&server)
        .place_order(&PlaceOrder::from_order(&order))
        .await
        .unwrap_err();
    assert!(matches!(err, VenueError::UnknownInstrument(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_order_book_classifies_statuses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": [
                {
                    "order_id": "1",
                    "status": "OPEN",
                    "filled_quantity": 4,
                    "average_price": 1500.5,
                    "order_timestamp": "2024-03-04 09:30:00"
                },
                {
                    "order_id": "2",
                    "status": "REJECTED",
                    "status_message": "RMS: Margin exceeds",
                    "filled_quantity": 0,
                    "average_price": 0
                },
                { "order_id": "3", "status": "TRIGGER PENDING" },
                { "order_id": "4", "status": "VALIDATION PENDING" },
                { "order_id": "5", "status": "SOMETHING NEW" }
            ]
        })))
        .mount(&server)
        .await;

    let book = client(&server).order_book().await.unwrap();
    assert_eq!(book.len(), 4);

    assert_eq!(book[0].status, VenueStatus::Open);
    assert_eq!(book[0].filled_quantity, dec!(4));
    assert_eq!(book[0].average_price, Some(dec!(1500.5)));
    assert_eq!(book[0].updated_at.to_rfc3339(), "2024-03-04T04:00:00+00:00");

    assert_eq!(book[1].status, VenueStatus::Rejected);
    assert_eq!(book[1].status_message.as_deref(), Some("RMS: Margin exceeds"));
    assert_eq!(book[1].average_price, None);

    assert_eq!(book[2].status, VenueStatus::TriggerPending);
    assert_eq!(book[3].status, VenueStatus::Pending);
}

#[tokio::test]
async fn test_last_traded_price() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/quote/ltp"))
        .and(query_param("i", "NSE:INFY"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": { "NSE:INFY": { "instrument_token": 408065, "last_price": 1498.35 } }
        })))
        .mount(&server)
        .await;

    let ltp = client(&server).last_traded_price("NSE:INFY").await.unwrap();
    assert_eq!(ltp, dec!(1498.35));
}

#[tokio::test]
async fn test_modify_and_cancel_paths() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/orders/regular/77"))
        .and(body_string_contains("order_type=MARKET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": { "order_id": "77" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/orders/regular/77"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": { "order_id": "77" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let kite = client(&server);
    let request = limit_buy(dec!(1500)).with_spec(OrderSpec::Market);
    assert_eq!(kite.modify_order("77", &request).await.unwrap(), "77");
    kite.cancel_order("77").await.unwrap();
}
