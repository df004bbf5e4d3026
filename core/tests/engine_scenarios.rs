//! End-to-end engine scenarios.
//!
//! Drives the two-phase protocol against the in-memory durable writer:
//! happy paths, expiry, quota caps, durable-failure rollbacks, and the
//! sell-out pre-check.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration as StdDuration;

use flashsale_core::{
    ItemStatus, ReservationState, SaleConfig, SaleEngine, SaleError,
};
use flashsale_testing::{test_clock, FailingDurableWriter, MemoryDurableWriter, SteppingClock};

fn config(item_count: i64, per_user_limit: i64) -> SaleConfig {
    SaleConfig {
        item_count,
        per_user_limit,
        ..SaleConfig::default()
    }
}

fn engine_with(
    item_count: i64,
    per_user_limit: i64,
) -> (Arc<SaleEngine>, Arc<SteppingClock>, Arc<MemoryDurableWriter>) {
    let clock = Arc::new(test_clock());
    let writer = Arc::new(MemoryDurableWriter::new());
    let engine = Arc::new(
        SaleEngine::new(config(item_count, per_user_limit), 1, clock.clone(), writer.clone())
            .expect("valid config"),
    );
    engine.set_accepting(true);
    (engine, clock, writer)
}

#[tokio::test]
async fn reserve_then_purchase_confirms_the_sale() {
    let (engine, _clock, writer) = engine_with(10, 2);

    let code = engine.reserve(1, 0).await.expect("reserve");
    assert_eq!(engine.item_status(0), Ok(ItemStatus::Reserved));
    assert_eq!(writer.reservation_count(), 1);

    engine.purchase(code).await.expect("purchase");
    assert_eq!(engine.item_status(0), Ok(ItemStatus::Sold));
    assert_eq!(engine.purchase_count(1), Some(1));
    assert_eq!(engine.sold_total(), 1);
    assert_eq!(writer.purchase_count(), 1);
    // The confirmed record is removed.
    assert_eq!(engine.reservation_state(&code), None);
}

#[tokio::test]
async fn out_of_range_item_ids_are_invalid() {
    let (engine, _clock, _writer) = engine_with(10, 2);

    assert_eq!(engine.reserve(1, -1).await, Err(SaleError::InvalidItemId));
    assert_eq!(engine.reserve(1, 10).await, Err(SaleError::InvalidItemId));
}

#[tokio::test]
async fn second_reserve_of_the_same_item_conflicts() {
    let (engine, _clock, _writer) = engine_with(10, 2);

    engine.reserve(1, 5).await.expect("first wins");
    assert_eq!(engine.reserve(2, 5).await, Err(SaleError::ItemAlreadyReserved));
}

#[tokio::test]
async fn expired_reservation_cannot_be_purchased() {
    let clock = Arc::new(test_clock());
    let writer = Arc::new(MemoryDurableWriter::new());
    let engine = SaleEngine::new(
        SaleConfig {
            item_count: 10,
            per_user_limit: 2,
            hold_duration: StdDuration::from_secs(3),
            ..SaleConfig::default()
        },
        1,
        clock.clone(),
        writer,
    )
    .expect("valid config");
    engine.set_accepting(true);

    let code = engine.reserve(3, 7).await.expect("reserve");
    clock.advance(chrono::Duration::seconds(9));
    engine.sweep();

    assert_eq!(engine.purchase(code).await, Err(SaleError::ReservationExpired));
    assert_eq!(engine.item_status(7), Ok(ItemStatus::Available));
    assert_eq!(engine.purchase_count(3), None);
}

#[tokio::test]
async fn purchase_of_an_expired_code_cancels_even_without_the_sweeper() {
    let clock = Arc::new(test_clock());
    let writer = Arc::new(MemoryDurableWriter::new());
    let engine = SaleEngine::new(config(10, 2), 1, clock.clone(), writer).expect("valid config");
    engine.set_accepting(true);

    let code = engine.reserve(3, 7).await.expect("reserve");
    clock.advance(chrono::Duration::seconds(4));

    // The purchase path itself detects the expiry and cancels.
    assert_eq!(engine.purchase(code).await, Err(SaleError::ReservationExpired));
    assert_eq!(engine.item_status(7), Ok(ItemStatus::Available));
    assert_eq!(engine.reservation_state(&code), Some(ReservationState::Cancelled));
}

#[tokio::test]
async fn reserve_cancel_reserve_round_trips() {
    let (engine, clock, _writer) = engine_with(10, 2);

    let first = engine.reserve(4, 2).await.expect("reserve");
    clock.advance(chrono::Duration::seconds(4));
    engine.sweep();
    assert_eq!(engine.item_status(2), Ok(ItemStatus::Available));

    let second = engine.reserve(4, 2).await.expect("second reserve succeeds");
    assert_ne!(first, second);
    assert_eq!(engine.item_status(2), Ok(ItemStatus::Reserved));
}

#[tokio::test]
async fn quota_cap_blocks_the_last_purchase() {
    let (engine, _clock, _writer) = engine_with(10, 2);

    // Bring user 9 to one below the cap.
    let warmup = engine.reserve(9, 0).await.expect("reserve");
    engine.purchase(warmup).await.expect("purchase");

    let code_a = engine.reserve(9, 1).await.expect("reserve a");
    let code_b = engine.reserve(9, 2).await.expect("reserve b");

    engine.purchase(code_a).await.expect("purchase under cap");
    assert_eq!(engine.purchase(code_b).await, Err(SaleError::UserLimitExceeded));

    assert_eq!(engine.purchase_count(9), Some(2));
    assert_eq!(engine.item_status(1), Ok(ItemStatus::Sold));
    // The blocked item stays reserved until its hold expires.
    assert_eq!(engine.item_status(2), Ok(ItemStatus::Reserved));
}

#[tokio::test]
async fn reserve_pre_check_rejects_a_capped_user() {
    let (engine, _clock, _writer) = engine_with(10, 1);

    let code = engine.reserve(5, 0).await.expect("reserve");
    engine.purchase(code).await.expect("purchase");

    assert_eq!(engine.reserve(5, 1).await, Err(SaleError::UserLimitExceeded));
}

#[tokio::test]
async fn duplicate_purchase_of_a_confirmed_code_is_not_found() {
    let (engine, _clock, _writer) = engine_with(10, 2);

    let code = engine.reserve(1, 0).await.expect("reserve");
    engine.purchase(code).await.expect("purchase");

    assert_eq!(engine.purchase(code).await, Err(SaleError::ReservationNotFound));
    assert_eq!(engine.purchase_count(1), Some(1));
    assert_eq!(engine.sold_total(), 1);
}

#[tokio::test]
async fn unknown_codes_are_not_found() {
    let (engine, _clock, _writer) = engine_with(10, 2);
    assert_eq!(
        engine.purchase(uuid::Uuid::new_v4()).await,
        Err(SaleError::ReservationNotFound)
    );
}

#[tokio::test]
async fn failed_reservation_append_rolls_back_completely() {
    let clock = Arc::new(test_clock());
    let writer = Arc::new(FailingDurableWriter::new());
    let engine = SaleEngine::new(config(10, 2), 1, clock, writer.clone()).expect("valid config");
    engine.set_accepting(true);

    writer.fail_reservations(true);
    let result = engine.reserve(1, 0).await;
    assert!(matches!(result, Err(SaleError::Durable(_))));
    assert_eq!(engine.item_status(0), Ok(ItemStatus::Available));
    assert_eq!(engine.active_reservations(), 0);
    assert_eq!(writer.inner().reservation_count(), 0);

    // The slot is usable again once the store recovers.
    writer.fail_reservations(false);
    engine.reserve(1, 0).await.expect("reserve after recovery");
}

#[tokio::test]
async fn failed_purchase_append_restores_all_three_tiers() {
    let clock = Arc::new(test_clock());
    let writer = Arc::new(FailingDurableWriter::new());
    let engine = SaleEngine::new(config(10, 2), 1, clock, writer.clone()).expect("valid config");
    engine.set_accepting(true);

    let code = engine.reserve(1, 0).await.expect("reserve");

    writer.fail_purchases(true);
    let result = engine.purchase(code).await;
    assert!(matches!(result, Err(SaleError::Durable(_))));

    // Reservation back to Active, item back to Reserved, counter unchanged.
    assert_eq!(engine.reservation_state(&code), Some(ReservationState::Active));
    assert_eq!(engine.item_status(0), Ok(ItemStatus::Reserved));
    assert_eq!(engine.purchase_count(1), None);
    assert_eq!(engine.sold_total(), 0);

    // The same code purchases successfully once the store recovers.
    writer.fail_purchases(false);
    engine.purchase(code).await.expect("purchase after recovery");
    assert_eq!(engine.item_status(0), Ok(ItemStatus::Sold));
    assert_eq!(engine.purchase_count(1), Some(1));
    assert_eq!(engine.sold_total(), 1);
}

#[tokio::test]
async fn sell_out_rejects_new_reserves() {
    let (engine, _clock, _writer) = engine_with(1, 2);

    let code = engine.reserve(1, 0).await.expect("reserve");
    engine.purchase(code).await.expect("purchase");
    assert_eq!(engine.sold_total(), 1);

    assert_eq!(engine.reserve(2, 0).await, Err(SaleError::AllItemsPurchased));
}

#[tokio::test]
async fn sell_out_precheck_is_permissive() {
    // The pre-check reads the confirmed-purchase counter only. With one of
    // two items confirmed and the other still mid-flight (reserved, not
    // yet purchased), a third party's reserve attempt is judged by slot
    // contention, not by the sell-out check.
    let (engine, _clock, _writer) = engine_with(2, 2);

    let sold = engine.reserve(1, 0).await.expect("reserve");
    engine.purchase(sold).await.expect("purchase");
    engine.reserve(2, 1).await.expect("reserve in flight");

    assert_eq!(engine.reserve(3, 1).await, Err(SaleError::ItemAlreadyReserved));
}

#[tokio::test]
async fn draining_engine_rejects_both_operations() {
    let (engine, _clock, _writer) = engine_with(10, 2);

    let code = engine.reserve(1, 0).await.expect("reserve");
    engine.set_accepting(false);

    assert_eq!(engine.reserve(1, 1).await, Err(SaleError::Draining));
    assert_eq!(engine.purchase(code).await, Err(SaleError::Draining));
}

#[tokio::test]
async fn quiescent_totals_agree() {
    let (engine, _clock, _writer) = engine_with(20, 5);

    for user in 0..4_i64 {
        for item in 0..3_i64 {
            let code = engine.reserve(user, user * 3 + item).await.expect("reserve");
            engine.purchase(code).await.expect("purchase");
        }
    }

    let counts = engine.item_counts();
    assert_eq!(engine.sold_total(), 12);
    assert_eq!(counts.sold, 12);
    assert_eq!(engine.quota_total(), 12);
}
