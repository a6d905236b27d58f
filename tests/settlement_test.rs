mod common;

use chrono::Duration;
use common::{FailingLedger, Harness, PROVIDER, admin, customer};
use deposit_escrow::application::settlement::SettlementEngine;
use deposit_escrow::application::orders::CompletionAction;
use deposit_escrow::domain::ledger::{EscrowStatus, PaymentType};
use deposit_escrow::domain::order::{Order, OrderStatus};
use deposit_escrow::domain::ports::{LedgerStore, Notification, PayoutDestination};
use deposit_escrow::error::{GatewayError, PaymentError};
use deposit_escrow::infrastructure::gateway::{GatewayCall, GatewayOperation};
use rust_decimal_macros::dec;
use std::sync::Arc;

async fn completed_order(h: &Harness) -> Order {
    completed_order_for(h, dec!(1000)).await
}

async fn completed_order_for(h: &Harness, total: rust_decimal::Decimal) -> Order {
    let order = h.captured_order(total, Duration::days(2)).await;
    let service = h.service();
    service.start(&customer(), order.id).await.unwrap();
    service
        .complete(&customer(), order.id, CompletionAction::ConfirmCompletion)
        .await
        .unwrap();
    let rest = format!("pi_rest_{}", order.id.simple());
    h.gateway.register_authorization(&rest, order.remaining_amount);
    service
        .complete(
            &customer(),
            order.id,
            CompletionAction::PayRemaining {
                external_payment_reference: rest,
            },
        )
        .await
        .unwrap()
}

fn transfers(h: &Harness) -> Vec<(String, rust_decimal::Decimal, String)> {
    h.gateway
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            GatewayCall::Transfer {
                destination,
                amount,
                idempotency_key,
            } => Some((destination, amount, idempotency_key)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_settlement_pays_provider_net_of_fee() {
    let h = Harness::new().await;
    let order = completed_order(&h).await;

    let outcome = h.settlement().settle(&admin(), order.id).await.unwrap();

    assert_eq!(outcome.order.status, OrderStatus::Settled);
    assert_eq!(outcome.payout.amount, dec!(900.00));
    assert_eq!(outcome.payout.platform_fee, dec!(100.00));
    assert_eq!(outcome.payout.amount + outcome.payout.platform_fee, order.total_amount);
    assert_eq!(outcome.payout.period, "2026-03");
    assert_eq!(outcome.payout.provider_id, PROVIDER);
    assert_eq!(
        transfers(&h),
        vec![(
            "acct_prov_1".to_string(),
            dec!(900.00),
            format!("transfer:{}", order.id)
        )]
    );

    let payouts = h.ledger.payouts_for(PROVIDER).await.unwrap();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].transfer_ids, outcome.payout.transfer_ids);
    assert_eq!(payouts[0].order_ids, vec![order.id]);
    let transfer_rows = h
        .ledger
        .payments_for(order.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|p| p.r#type == PaymentType::Transfer)
        .count();
    assert_eq!(transfer_rows, 1);

    // Already released at service start; settlement leaves it released.
    let escrow = h.ledger.get_escrow(order.id).await.unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::ReleasedToProvider);
    assert!(h.notifier.sent().iter().any(|(to, n)| to == PROVIDER
        && matches!(n, Notification::Settled { amount, .. } if *amount == dec!(900.00))));
}

#[tokio::test]
async fn test_settlement_is_admin_only() {
    let h = Harness::new().await;
    let order = completed_order(&h).await;

    let result = h.settlement().settle(&customer(), order.id).await;

    assert!(matches!(result, Err(PaymentError::AuthorizationError(_))));
    assert!(transfers(&h).is_empty());
    assert_eq!(h.order(order.id).await.status, OrderStatus::Completed);
}

#[tokio::test]
async fn test_settlement_requires_completed_order() {
    let h = Harness::new().await;
    let order = h.captured_order(dec!(1000), Duration::days(2)).await;

    let err = h.settlement().settle(&admin(), order.id).await.unwrap_err();

    assert!(matches!(
        err,
        PaymentError::InvalidTransition {
            current: OrderStatus::Captured,
            ..
        }
    ));
    assert!(transfers(&h).is_empty());
}

#[tokio::test]
async fn test_settlement_requires_verified_destination() {
    let h = Harness::new().await;
    let order = completed_order(&h).await;
    h.providers
        .register(PayoutDestination {
            provider_id: PROVIDER.to_string(),
            account_reference: "acct_prov_1".to_string(),
            verified: false,
        })
        .await;

    let result = h.settlement().settle(&admin(), order.id).await;

    assert!(matches!(result, Err(PaymentError::ValidationError(_))));
    assert!(transfers(&h).is_empty());
    assert_eq!(h.order(order.id).await.status, OrderStatus::Completed);
}

#[tokio::test]
async fn test_failed_transfer_leaves_order_completed() {
    let h = Harness::new().await;
    let order = completed_order(&h).await;
    h.gateway.fail_next(
        GatewayOperation::Transfer,
        GatewayError::Unavailable("maintenance".to_string()),
    );

    let result = h.settlement().settle(&admin(), order.id).await;

    assert!(matches!(result, Err(PaymentError::GatewayError(_))));
    let reverted = h.order(order.id).await;
    assert_eq!(reverted.status, OrderStatus::Completed);
    assert_eq!(reverted.settled_at, None);
    assert!(h.ledger.payouts_for(PROVIDER).await.unwrap().is_empty());

    h.settlement().settle(&admin(), order.id).await.unwrap();
    assert_eq!(h.ledger.payouts_for(PROVIDER).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_second_settlement_is_rejected() {
    let h = Harness::new().await;
    let order = completed_order(&h).await;
    h.settlement().settle(&admin(), order.id).await.unwrap();

    let result = h.settlement().settle(&admin(), order.id).await;

    assert!(matches!(
        result,
        Err(PaymentError::InvalidTransition {
            current: OrderStatus::Settled,
            ..
        })
    ));
    assert_eq!(transfers(&h).len(), 1);
    assert_eq!(h.ledger.payouts_for(PROVIDER).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_settlements_in_one_month_share_a_payout() {
    let h = Harness::new().await;
    let first = completed_order_for(&h, dec!(1000)).await;
    let second = completed_order_for(&h, dec!(500)).await;
    let engine = h.settlement();

    let a = engine.settle(&admin(), first.id).await.unwrap();
    h.clock.advance(Duration::days(3));
    let b = engine.settle(&admin(), second.id).await.unwrap();

    assert_eq!(a.payout.id, b.payout.id);
    let payouts = h.ledger.payouts_for(PROVIDER).await.unwrap();
    assert_eq!(payouts.len(), 1);
    let payout = &payouts[0];
    assert_eq!(payout.period, "2026-03");
    assert_eq!(payout.amount, dec!(1350.00));
    assert_eq!(payout.platform_fee, dec!(150.00));
    assert_eq!(payout.order_ids, vec![first.id, second.id]);
    assert_eq!(payout.transfer_ids.len(), 2);
    assert_ne!(payout.transfer_ids[0], payout.transfer_ids[1]);
}

#[tokio::test]
async fn test_next_month_opens_a_new_payout() {
    let h = Harness::new().await;
    let first = completed_order_for(&h, dec!(1000)).await;
    let second = completed_order_for(&h, dec!(500)).await;
    let engine = h.settlement();

    engine.settle(&admin(), first.id).await.unwrap();
    h.clock.advance(Duration::days(31));
    engine.settle(&admin(), second.id).await.unwrap();

    let periods: Vec<String> = h
        .ledger
        .payouts_for(PROVIDER)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.period)
        .collect();
    assert_eq!(periods, vec!["2026-03", "2026-04"]);
}

#[tokio::test]
async fn test_failed_bookkeeping_is_finished_by_settling_again() {
    let h = Harness::new().await;
    let order = completed_order(&h).await;
    let ledger = Arc::new(FailingLedger::new(h.ledger.clone()));
    let engine = SettlementEngine::new(h.deps_with_ledger(ledger.clone()));
    ledger.fail_next_payouts(1);

    let result = engine.settle(&admin(), order.id).await;

    assert!(matches!(result, Err(PaymentError::StorageError(_))));
    assert_eq!(h.order(order.id).await.status, OrderStatus::Settled);
    assert!(h.ledger.payouts_for(PROVIDER).await.unwrap().is_empty());

    let outcome = engine.settle(&admin(), order.id).await.unwrap();

    assert_eq!(outcome.order.status, OrderStatus::Settled);
    assert_eq!(outcome.payout.order_ids, vec![order.id]);
    assert_eq!(outcome.payout.amount, dec!(900.00));
    let transfer_rows: Vec<String> = h
        .ledger
        .payments_for(order.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|p| p.r#type == PaymentType::Transfer)
        .map(|p| p.external_reference)
        .collect();
    assert_eq!(transfer_rows, outcome.payout.transfer_ids);
    // The replayed transfer reuses the key, so the provider is paid once.
    let keys: Vec<String> = transfers(&h).into_iter().map(|(_, _, key)| key).collect();
    assert_eq!(keys, vec![format!("transfer:{}", order.id); 2]);

    let again = engine.settle(&admin(), order.id).await;
    assert!(matches!(
        again,
        Err(PaymentError::InvalidTransition {
            current: OrderStatus::Settled,
            ..
        })
    ));
    assert_eq!(transfers(&h).len(), 2);
}
