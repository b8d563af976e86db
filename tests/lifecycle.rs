use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use tableside::clients::{
    CatalogClient, FulfillmentClient, NotificationClient, PaymentClient, ValidationIssue,
};
use tableside::domain::order::{
    CartLine, Fulfillment, FulfillmentDetails, FulfillmentStatus, NewOrder, Order, OrderStatus,
    ServiceType,
};
use tableside::metrics::Metrics;
use tableside::repository::{MemoryOrderRepository, OrderRepository};
use tableside::service::{CancelRequest, LifecycleService};

// ============================================================================
// Lifecycle Integration Tests
// ============================================================================
//
// Full orchestrator against the in-memory store, with scriptable collaborator
// doubles. The recurring assertion: whatever goes wrong after acquisition,
// the order ends the request unlocked.
//
// ============================================================================

#[derive(Default)]
struct ScriptedCatalog {
    issues: Mutex<Vec<ValidationIssue>>,
    unavailable: AtomicBool,
}

#[async_trait]
impl CatalogClient for ScriptedCatalog {
    async fn validate(
        &self,
        _cart: &[CartLine],
        _fulfillment: &Fulfillment,
    ) -> Result<Vec<ValidationIssue>> {
        if self.unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("catalog timed out");
        }
        Ok(self.issues.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct ScriptedPayments {
    fail_capture: AtomicBool,
    captures: AtomicU32,
    refunds: Mutex<Vec<i64>>,
}

#[async_trait]
impl PaymentClient for ScriptedPayments {
    async fn capture(&self, _order: &Order) -> Result<()> {
        if self.fail_capture.load(Ordering::SeqCst) {
            anyhow::bail!("gateway declined");
        }
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn refund(&self, _order: &Order, amount_cents: i64) -> Result<()> {
        self.refunds.lock().unwrap().push(amount_cents);
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedNotifications {
    confirmed: AtomicU32,
    canceled: AtomicU32,
}

#[async_trait]
impl NotificationClient for ScriptedNotifications {
    async fn order_confirmed(&self, _order: &Order) -> Result<()> {
        self.confirmed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn order_canceled(&self, _order: &Order, _reason: &str) -> Result<()> {
        self.canceled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedFulfillment {
    fail_dispatch: AtomicBool,
    dispatches: AtomicU32,
}

#[async_trait]
impl FulfillmentClient for ScriptedFulfillment {
    async fn dispatch(&self, _order: &Order) -> Result<()> {
        if self.fail_dispatch.load(Ordering::SeqCst) {
            anyhow::bail!("printer offline");
        }
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    repo: Arc<MemoryOrderRepository>,
    service: LifecycleService,
    catalog: Arc<ScriptedCatalog>,
    payments: Arc<ScriptedPayments>,
    notifications: Arc<ScriptedNotifications>,
    fulfillment: Arc<ScriptedFulfillment>,
}

fn harness() -> Harness {
    let repo = Arc::new(MemoryOrderRepository::new());
    let catalog = Arc::new(ScriptedCatalog::default());
    let payments = Arc::new(ScriptedPayments::default());
    let notifications = Arc::new(ScriptedNotifications::default());
    let fulfillment = Arc::new(ScriptedFulfillment::default());
    let service = LifecycleService::new(
        repo.clone(),
        catalog.clone(),
        payments.clone(),
        notifications.clone(),
        fulfillment.clone(),
        Arc::new(Metrics::new().unwrap()),
    );
    Harness {
        repo,
        service,
        catalog,
        payments,
        notifications,
        fulfillment,
    }
}

fn pickup_order(date: NaiveDate, time: NaiveTime) -> NewOrder {
    NewOrder {
        fulfillment: Fulfillment {
            service_type: ServiceType::Pickup,
            status: FulfillmentStatus::Pending,
            selected_date: date,
            selected_time: time,
            details: FulfillmentDetails::default(),
        },
        cart: vec![CartLine {
            item_id: Uuid::new_v4(),
            name: "Pad Thai".into(),
            quantity: 2,
            unit_price_cents: 1200,
            modifiers: vec![],
        }],
        discounts: vec![],
        taxes: vec![],
        tip_cents: None,
        metadata: HashMap::new(),
    }
}

fn tomorrow_order() -> NewOrder {
    pickup_order(
        Utc::now().date_naive() + chrono::Duration::days(1),
        NaiveTime::from_hms_opt(12, 30, 0).unwrap(),
    )
}

/// Spawned side effects are fire-and-forget; poll until they land.
async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..50 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within timeout");
}

// ----------------------------------------------------------------------------
// Creation
// ----------------------------------------------------------------------------

#[tokio::test]
async fn create_persists_an_open_unlocked_order() {
    let h = harness();
    let resp = h.service.create(tomorrow_order()).await;

    assert_eq!(resp.status, 201);
    let order = resp.result.unwrap();
    assert_eq!(order.status, OrderStatus::Open);
    assert!(order.lock.is_none());
}

#[tokio::test]
async fn create_rejects_empty_cart_before_any_collaborator() {
    let h = harness();
    let mut new = tomorrow_order();
    new.cart.clear();

    let resp = h.service.create(new).await;
    assert_eq!(resp.status, 422);
    assert_eq!(resp.errors[0].code, "invalid_cart");
}

#[tokio::test]
async fn create_surfaces_catalog_rejections() {
    let h = harness();
    h.catalog.issues.lock().unwrap().push(ValidationIssue {
        field: "cart[0]".into(),
        message: "item is sold out".into(),
    });

    let resp = h.service.create(tomorrow_order()).await;
    assert_eq!(resp.status, 422);
    assert_eq!(resp.errors[0].code, "catalog_rejected");
}

#[tokio::test]
async fn create_maps_catalog_outage_to_bad_gateway() {
    let h = harness();
    h.catalog.unavailable.store(true, Ordering::SeqCst);

    let resp = h.service.create(tomorrow_order()).await;
    assert_eq!(resp.status, 502);
    assert_eq!(resp.errors[0].code, "catalog_unavailable");
}

#[tokio::test]
async fn ingest_creates_a_whole_batch() {
    let h = harness();
    let resp = h
        .service
        .ingest(vec![tomorrow_order(), tomorrow_order()])
        .await;

    assert_eq!(resp.status, 201);
    assert_eq!(resp.result.unwrap().len(), 2);
}

// ----------------------------------------------------------------------------
// Confirm
// ----------------------------------------------------------------------------

#[tokio::test]
async fn confirm_commits_status_payment_and_release_in_one_write() {
    let h = harness();
    let order = h.service.create(tomorrow_order()).await.result.unwrap();

    let resp = h.service.confirm(order.id, Some("req-1")).await;
    assert_eq!(resp.status, 200);

    let confirmed = resp.result.unwrap();
    assert_eq!(confirmed.status, OrderStatus::Confirmed);
    assert_eq!(confirmed.fulfillment.status, FulfillmentStatus::Confirmed);
    assert!(confirmed.lock.is_none());
    assert_eq!(confirmed.payments.len(), 1);
    assert!(confirmed.payments[0].captured);
    assert_eq!(h.payments.captures.load(Ordering::SeqCst), 1);

    eventually(|| h.notifications.confirmed.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn confirm_without_token_fails_before_touching_the_order() {
    let h = harness();
    let order = h.service.create(tomorrow_order()).await.result.unwrap();

    let resp = h.service.confirm(order.id, None).await;
    assert_eq!(resp.status, 400);
    assert_eq!(resp.errors[0].code, "missing_idempotency_token");

    let current = h.repo.find_by_id(order.id).await.unwrap().unwrap();
    assert!(current.lock.is_none());
    assert_eq!(h.payments.captures.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn confirm_under_contention_is_ambiguous_404() {
    let h = harness();
    let order = h.service.create(tomorrow_order()).await.result.unwrap();
    h.repo.try_acquire_lock(order.id, "other").await.unwrap();

    let held = h.service.confirm(order.id, Some("req-1")).await;
    let absent = h.service.confirm(Uuid::new_v4(), Some("req-1")).await;

    assert_eq!(held.status, 404);
    assert_eq!(absent.status, 404);
    assert_eq!(held.errors[0].code, absent.errors[0].code);
}

#[tokio::test]
async fn confirm_is_only_legal_from_open() {
    let h = harness();
    let order = h.service.create(tomorrow_order()).await.result.unwrap();
    h.service.confirm(order.id, Some("req-1")).await;

    // Second confirm: the status side of the CAS misses.
    let resp = h.service.confirm(order.id, Some("req-2")).await;
    assert_eq!(resp.status, 404);
    assert_eq!(h.payments.captures.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_capture_releases_the_lock_and_leaves_order_open() {
    let h = harness();
    let order = h.service.create(tomorrow_order()).await.result.unwrap();
    h.payments.fail_capture.store(true, Ordering::SeqCst);

    let resp = h.service.confirm(order.id, Some("req-1")).await;
    assert_eq!(resp.status, 502);
    assert_eq!(resp.errors[0].code, "payment_capture_failed");

    let current = h.repo.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(current.status, OrderStatus::Open);
    assert!(current.lock.is_none(), "lock must be released on failure");

    // The order is immediately retryable once the gateway recovers.
    h.payments.fail_capture.store(false, Ordering::SeqCst);
    let retry = h.service.confirm(order.id, Some("req-2")).await;
    assert_eq!(retry.status, 200);
}

// ----------------------------------------------------------------------------
// Cancel
// ----------------------------------------------------------------------------

#[tokio::test]
async fn cancel_refunds_and_notifies_after_commit() {
    let h = harness();
    let order = h.service.create(tomorrow_order()).await.result.unwrap();
    h.service.confirm(order.id, Some("req-1")).await;

    let resp = h
        .service
        .cancel(
            order.id,
            Some("req-2"),
            CancelRequest {
                reason: Some("guest called in".into()),
                notify_customer: true,
                refund: true,
            },
        )
        .await;
    assert_eq!(resp.status, 200);

    let canceled = resp.result.unwrap();
    assert_eq!(canceled.status, OrderStatus::Canceled);
    assert!(canceled.lock.is_none());
    assert_eq!(
        canceled.metadata.get("cancel_reason").map(String::as_str),
        Some("guest called in")
    );

    eventually(|| h.notifications.canceled.load(Ordering::SeqCst) == 1).await;
    eventually(|| !h.payments.refunds.lock().unwrap().is_empty()).await;
    assert_eq!(h.payments.refunds.lock().unwrap()[0], order.total_cents());
}

#[tokio::test]
async fn cancel_without_flags_stays_silent() {
    let h = harness();
    let order = h.service.create(tomorrow_order()).await.result.unwrap();

    let resp = h
        .service
        .cancel(order.id, Some("req-1"), CancelRequest::default())
        .await;
    assert_eq!(resp.status, 200);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.notifications.canceled.load(Ordering::SeqCst), 0);
    assert!(h.payments.refunds.lock().unwrap().is_empty());
}

#[tokio::test]
async fn terminal_orders_reject_cancellation_and_release_the_lock() {
    let h = harness();
    let order = h.service.create(tomorrow_order()).await.result.unwrap();
    h.service
        .cancel(order.id, Some("req-1"), CancelRequest::default())
        .await;

    let resp = h
        .service
        .cancel(order.id, Some("req-2"), CancelRequest::default())
        .await;
    assert_eq!(resp.status, 422);
    assert_eq!(resp.errors[0].code, "illegal_transition");

    let current = h.repo.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(current.status, OrderStatus::Canceled);
    assert!(current.lock.is_none());
}

// ----------------------------------------------------------------------------
// Reschedule and operational overrides
// ----------------------------------------------------------------------------

#[tokio::test]
async fn reschedule_moves_the_slot_under_lock() {
    let h = harness();
    let order = h.service.create(tomorrow_order()).await.result.unwrap();

    let new_date = Utc::now().date_naive() + chrono::Duration::days(2);
    let new_time = NaiveTime::from_hms_opt(18, 0, 0).unwrap();
    let resp = h
        .service
        .reschedule(order.id, Some("req-1"), new_date, new_time)
        .await;
    assert_eq!(resp.status, 200);

    let moved = resp.result.unwrap();
    assert_eq!(moved.fulfillment.selected_date, new_date);
    assert_eq!(moved.fulfillment.selected_time, new_time);
    assert_eq!(moved.status, OrderStatus::Open);
    assert!(moved.lock.is_none());
}

#[tokio::test]
async fn reschedule_into_unavailable_slot_releases_and_rejects() {
    let h = harness();
    let order = h.service.create(tomorrow_order()).await.result.unwrap();
    h.catalog.issues.lock().unwrap().push(ValidationIssue {
        field: "fulfillment.selected_time".into(),
        message: "kitchen closed".into(),
    });

    let resp = h
        .service
        .reschedule(
            order.id,
            Some("req-1"),
            order.fulfillment.selected_date,
            NaiveTime::from_hms_opt(3, 0, 0).unwrap(),
        )
        .await;
    assert_eq!(resp.status, 422);

    let current = h.repo.find_by_id(order.id).await.unwrap().unwrap();
    assert!(current.lock.is_none());
    assert_eq!(
        current.fulfillment.selected_time,
        order.fulfillment.selected_time
    );
}

#[tokio::test]
async fn resend_redispatches_without_any_domain_change() {
    let h = harness();
    let order = h.service.create(tomorrow_order()).await.result.unwrap();
    h.service.confirm(order.id, Some("req-1")).await;

    let resp = h.service.resend(order.id, Some("req-2")).await;
    assert_eq!(resp.status, 200);
    assert_eq!(h.fulfillment.dispatches.load(Ordering::SeqCst), 1);

    let current = h.repo.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(current.status, OrderStatus::Confirmed);
    assert!(current.lock.is_none());
}

#[tokio::test]
async fn force_send_marks_fulfillment_sent() {
    let h = harness();
    let order = h.service.create(tomorrow_order()).await.result.unwrap();
    h.service.confirm(order.id, Some("req-1")).await;

    let resp = h.service.force_send(order.id, Some("req-2")).await;
    assert_eq!(resp.status, 200);

    let sent = resp.result.unwrap();
    assert_eq!(sent.fulfillment.status, FulfillmentStatus::Sent);
    assert!(sent.lock.is_none());
}

#[tokio::test]
async fn dispatch_failure_during_resend_releases_the_lock() {
    let h = harness();
    let order = h.service.create(tomorrow_order()).await.result.unwrap();
    h.fulfillment.fail_dispatch.store(true, Ordering::SeqCst);

    let resp = h.service.resend(order.id, Some("req-1")).await;
    assert_eq!(resp.status, 502);

    let current = h.repo.find_by_id(order.id).await.unwrap().unwrap();
    assert!(current.lock.is_none());
}

// ----------------------------------------------------------------------------
// Complete
// ----------------------------------------------------------------------------

#[tokio::test]
async fn complete_is_only_legal_from_processing() {
    let h = harness();
    let order = h.service.create(tomorrow_order()).await.result.unwrap();

    let premature = h.service.complete(order.id, Some("req-1")).await;
    assert_eq!(premature.status, 404);

    // Drive the order to PROCESSING through the ready path.
    h.service.confirm(order.id, Some("req-2")).await;
    h.repo
        .update_with_lock(
            order.id,
            None,
            tableside::repository::OrderPatch {
                status: Some(OrderStatus::Processing),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let resp = h.service.complete(order.id, Some("req-3")).await;
    assert_eq!(resp.status, 200);
    let done = resp.result.unwrap();
    assert_eq!(done.status, OrderStatus::Completed);
    assert_eq!(done.fulfillment.status, FulfillmentStatus::Fulfilled);
    assert!(done.lock.is_none());
}

// ----------------------------------------------------------------------------
// Ready-scan
// ----------------------------------------------------------------------------

#[tokio::test]
async fn ready_scan_promotes_due_confirmed_orders() {
    let h = harness();
    // Due: today at 00:00, so always at or before the sweep cutoff.
    let due = pickup_order(
        Utc::now().date_naive(),
        NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
    );
    let order = h.service.create(due).await.result.unwrap();
    h.service.confirm(order.id, Some("req-1")).await;
    // Not due: tomorrow.
    let later = h.service.create(tomorrow_order()).await.result.unwrap();
    h.service.confirm(later.id, Some("req-2")).await;

    let resp = h.service.ready_scan().await;
    assert_eq!(resp.status, 200);
    let summary = resp.result.unwrap();
    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.promoted, 1);
    assert_eq!(summary.failed, 0);

    let promoted = h.repo.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(promoted.status, OrderStatus::Processing);
    assert_eq!(promoted.fulfillment.status, FulfillmentStatus::Sent);
    assert!(promoted.lock.is_none());

    let untouched = h.repo.find_by_id(later.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, OrderStatus::Confirmed);
    assert!(untouched.lock.is_none());
}

#[tokio::test]
async fn ready_scan_releases_orders_whose_dispatch_failed() {
    let h = harness();
    let due = pickup_order(
        Utc::now().date_naive(),
        NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
    );
    let order = h.service.create(due).await.result.unwrap();
    h.service.confirm(order.id, Some("req-1")).await;
    h.fulfillment.fail_dispatch.store(true, Ordering::SeqCst);

    let summary = h.service.ready_scan().await.result.unwrap();
    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.promoted, 0);
    assert_eq!(summary.failed, 1);

    // Claim was handed back; the next sweep can retry.
    let current = h.repo.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(current.status, OrderStatus::Confirmed);
    assert!(current.lock.is_none());

    h.fulfillment.fail_dispatch.store(false, Ordering::SeqCst);
    let retry = h.service.ready_scan().await.result.unwrap();
    assert_eq!(retry.promoted, 1);
}

#[tokio::test]
async fn ready_scan_skips_orders_held_by_live_requests() {
    let h = harness();
    let due = pickup_order(
        Utc::now().date_naive(),
        NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
    );
    let order = h.service.create(due).await.result.unwrap();
    h.service.confirm(order.id, Some("req-1")).await;
    h.repo.try_acquire_lock(order.id, "live").await.unwrap();

    let summary = h.service.ready_scan().await.result.unwrap();
    assert_eq!(summary.claimed, 0);

    let current = h.repo.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(current.lock.as_deref(), Some("live"));
}

// ----------------------------------------------------------------------------
// Administrative
// ----------------------------------------------------------------------------

#[tokio::test]
async fn unlock_all_recovers_stuck_orders() {
    let h = harness();
    let order = h.service.create(tomorrow_order()).await.result.unwrap();
    h.repo.try_acquire_lock(order.id, "crashed").await.unwrap();

    let resp = h.service.unlock_all().await;
    assert_eq!(resp.result, Some(1));

    let confirm = h.service.confirm(order.id, Some("req-1")).await;
    assert_eq!(confirm.status, 200);
}

#[tokio::test]
async fn reads_use_the_plain_envelope() {
    let h = harness();
    let order = h.service.create(tomorrow_order()).await.result.unwrap();

    let found = h.service.get(order.id).await;
    assert_eq!(found.status, 200);
    assert_eq!(found.result.unwrap().id, order.id);

    let missing = h.service.get(Uuid::new_v4()).await;
    assert_eq!(missing.status, 404);
    assert_eq!(missing.errors[0].code, "not_found");

    let open = h.service.list_by_status(OrderStatus::Open).await;
    assert_eq!(open.result.unwrap().len(), 1);

    let by_date = h
        .service
        .list_by_fulfillment_date(order.fulfillment.selected_date)
        .await;
    assert_eq!(by_date.result.unwrap().len(), 1);
}
