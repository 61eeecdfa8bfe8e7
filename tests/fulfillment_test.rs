//! Fulfillment engine semantics: idempotency per order id, partial
//! delivery handling, verbatim failure messages, and key normalization.

mod common;

use assert_matches::assert_matches;
use common::{FulfillmentScript, MockFulfillmentBackend};
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

use giftcard_checkout::clients::fulfillment::FulfillmentApi;
use giftcard_checkout::errors::CheckoutError;
use giftcard_checkout::models::{
    BuyerContext, CheckoutSession, LineItem, PaymentIntent, PaymentRail, RailDetails,
};
use giftcard_checkout::services::fulfillment::{FulfillmentService, PaymentRecord};

fn crypto_session(order_id: &str) -> CheckoutSession {
    CheckoutSession::new(
        order_id,
        BuyerContext {
            buyer_id: "u1".to_string(),
            email: "buyer@example.com".to_string(),
        },
        RailDetails::Crypto {
            currency: "USDC".to_string(),
        },
        vec![
            LineItem {
                product_id: Uuid::new_v4(),
                external_id: "EXT-1".to_string(),
                name: "Steam Gift Card 25 EUR".to_string(),
                quantity: 1,
                unit_price: dec!(24.25),
            },
            LineItem {
                product_id: Uuid::new_v4(),
                external_id: "EXT-2".to_string(),
                name: "PSN Card 20 EUR".to_string(),
                quantity: 1,
                unit_price: dec!(19.99),
            },
        ],
        dec!(44.24),
        dec!(44.24),
    )
}

fn crypto_payment() -> PaymentRecord {
    PaymentRecord::from_intent(
        PaymentRail::Crypto,
        &PaymentIntent {
            intent_id: "0xabc".to_string(),
            destination: "0xabc".to_string(),
            network: "base".to_string(),
            expires_at: None,
        },
    )
}

#[tokio::test]
async fn repeated_registration_allocates_keys_once() {
    let backend = Arc::new(MockFulfillmentBackend::succeeding());
    let service = FulfillmentService::new(Arc::clone(&backend) as Arc<dyn FulfillmentApi>);
    let session = crypto_session("ORD-1");
    let payment = crypto_payment();

    let first = service
        .register_order(&session, &payment)
        .await
        .expect("first call");
    let second = service
        .register_order(&session, &payment)
        .await
        .expect("second call");

    assert!(first.success && second.success);
    let first_codes: Vec<_> = first.keys.iter().map(|k| k.code.clone()).collect();
    let second_codes: Vec<_> = second.keys.iter().map(|k| k.code.clone()).collect();
    assert_eq!(first_codes, second_codes);
    assert_eq!(backend.allocation_count(), 1);
    assert_eq!(backend.request_count(), 2);
}

#[tokio::test]
async fn distinct_order_ids_allocate_distinct_keys() {
    let backend = Arc::new(MockFulfillmentBackend::succeeding());
    let service = FulfillmentService::new(Arc::clone(&backend) as Arc<dyn FulfillmentApi>);
    let payment = crypto_payment();

    let first = service
        .register_order(&crypto_session("ORD-1"), &payment)
        .await
        .expect("first order");
    let second = service
        .register_order(&crypto_session("ORD-2"), &payment)
        .await
        .expect("second order");

    assert_ne!(first.keys[0].code, second.keys[0].code);
    assert_eq!(backend.allocation_count(), 2);
}

#[tokio::test]
async fn partial_delivery_is_still_success() {
    let backend = Arc::new(MockFulfillmentBackend::scripted(FulfillmentScript::Success {
        email_sent: false,
        email_error: Some("smtp connection refused".to_string()),
        message: None,
    }));
    let service = FulfillmentService::new(Arc::clone(&backend) as Arc<dyn FulfillmentApi>);

    let result = service
        .register_order(&crypto_session("ORD-1"), &crypto_payment())
        .await
        .expect("register");

    assert!(result.success);
    assert!(result.is_partial_delivery());
    assert_eq!(result.keys.len(), 2);
    assert_eq!(result.email_error.as_deref(), Some("smtp connection refused"));
    assert_eq!(result.delivery_message, "Your gift card keys are ready below");
}

#[tokio::test]
async fn backend_failure_keeps_the_exact_message_and_is_safe_to_repeat() {
    let backend = Arc::new(MockFulfillmentBackend::scripted(FulfillmentScript::Failure {
        error: "insufficient inventory".to_string(),
    }));
    let service = FulfillmentService::new(Arc::clone(&backend) as Arc<dyn FulfillmentApi>);
    let session = crypto_session("ORD-1");
    let payment = crypto_payment();

    let first = service
        .register_order(&session, &payment)
        .await
        .expect("first call");
    assert!(!first.success);
    assert_eq!(first.error.as_deref(), Some("insufficient inventory"));

    // Retrying with the same order id must not allocate anything.
    let second = service
        .register_order(&session, &payment)
        .await
        .expect("second call");
    assert!(!second.success);
    assert_eq!(backend.allocation_count(), 0);
}

#[tokio::test]
async fn bare_keys_normalize_into_structured_records() {
    let backend = Arc::new(MockFulfillmentBackend::succeeding());
    let service = FulfillmentService::new(backend);

    let result = service
        .register_order(&crypto_session("ORD-1"), &crypto_payment())
        .await
        .expect("register");

    for key in &result.keys {
        assert!(key.code.starts_with("KEY-ORD-1-"));
        assert_eq!(key.product_id, Uuid::nil());
        assert_eq!(key.product_name, "Gift Card");
    }
}

#[tokio::test]
async fn precondition_failures_never_reach_the_backend() {
    let backend = Arc::new(MockFulfillmentBackend::succeeding());
    let service = FulfillmentService::new(Arc::clone(&backend) as Arc<dyn FulfillmentApi>);
    let payment = crypto_payment();

    let mut empty_cart = crypto_session("ORD-1");
    empty_cart.line_items.clear();
    let err = service
        .register_order(&empty_cart, &payment)
        .await
        .expect_err("empty cart");
    assert_matches!(err, CheckoutError::Validation(_));

    let mut bad_email = crypto_session("ORD-2");
    bad_email.buyer.email = "not-an-email".to_string();
    let err = service
        .register_order(&bad_email, &payment)
        .await
        .expect_err("bad email");
    assert_matches!(err, CheckoutError::Validation(_));

    assert_eq!(backend.request_count(), 0);
}
