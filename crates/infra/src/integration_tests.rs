//! End-to-end tests through `QualityInventoryService` on the in-memory store.
//!
//! Service → component → StoreTx (commit) → EventBus

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use serde_json::Value as JsonValue;

    use lotkeeper_core::{ActorId, BatchId, DomainError, FixedClock, ProductId, WarehouseId};
    use lotkeeper_events::{EventBus, EventEnvelope, InMemoryEventBus};
    use lotkeeper_inventory::{MovementRequest, MovementType, QcStatus};
    use lotkeeper_quality::{Decision, InspectionStatus, InspectionType, NewDefect, Severity};

    use crate::error::ServiceError;
    use crate::inspections::NewInspection;
    use crate::ledger::NewBatch;
    use crate::services::QualityInventoryService;
    use crate::store::{InMemoryStore, InspectionFilter, MovementFilter, Pagination};

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type Service = QualityInventoryService<InMemoryStore, Bus>;

    struct Harness {
        service: Service,
        store: InMemoryStore,
        bus: Bus,
        clock: Arc<FixedClock>,
        product: ProductId,
        warehouse: WarehouseId,
    }

    async fn harness() -> Harness {
        let store = InMemoryStore::new();
        let product = ProductId::new();
        let warehouse = WarehouseId::new();
        store.register_product(product).await;
        store.register_warehouse(warehouse).await;

        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 1, 5, 9, 0, 0).unwrap(),
        ));
        let service =
            QualityInventoryService::with_clock(store.clone(), bus.clone(), clock.clone());
        Harness {
            service,
            store,
            bus,
            clock,
            product,
            warehouse,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    impl Harness {
        fn request(&self, qty: i64) -> MovementRequest {
            MovementRequest::new(self.product, self.warehouse, qty, ActorId::new(42))
        }

        /// Receive a batch and pass it through a defect-free inspection.
        async fn passed_batch(&self, qty: i64, expiry: Option<NaiveDate>) -> BatchId {
            let mut input = NewBatch::new(self.product, qty);
            input.expiry_date = expiry;
            let batch = self.service.receive_batch(input).await.unwrap();

            let inspection = self
                .service
                .create_inspection(NewInspection::new(InspectionType::Input, batch.id))
                .await
                .unwrap();
            let submitted = self
                .service
                .submit_inspection(inspection.id, None, None)
                .await
                .unwrap();
            assert_eq!(submitted.decision, Some(Decision::Accept));
            batch.id
        }

        async fn on_hand(&self) -> i64 {
            self.service
                .get_stock_summary(Some(self.product))
                .await
                .unwrap()
                .first()
                .map(|s| s.total_quantity)
                .unwrap_or(0)
        }
    }

    #[tokio::test]
    async fn two_major_defects_reject_and_fail_the_batch() {
        let h = harness().await;
        let batch = h
            .service
            .receive_batch(NewBatch::new(h.product, 120))
            .await
            .unwrap();

        let inspection = h
            .service
            .create_inspection(NewInspection::new(InspectionType::Input, batch.id).with_lot_size(120))
            .await
            .unwrap();
        assert_eq!(inspection.sampling.sample_size, Some(20));

        h.service
            .add_defects(
                inspection.id,
                vec![NewDefect::new(Severity::Major, 1), NewDefect::new(Severity::Major, 1)],
            )
            .await
            .unwrap();
        let submitted = h
            .service
            .submit_inspection(inspection.id, None, None)
            .await
            .unwrap();

        assert_eq!(submitted.decision, Some(Decision::Reject));
        let batch = h.service.get_batch(batch.id).await.unwrap();
        assert_eq!(batch.qc_status, QcStatus::Failed);
    }

    #[tokio::test]
    async fn minor_defects_at_threshold_hold_the_batch_pending() {
        let h = harness().await;
        let batch = h
            .service
            .receive_batch(NewBatch::new(h.product, 40))
            .await
            .unwrap();
        let inspection = h
            .service
            .create_inspection(NewInspection::new(InspectionType::Output, batch.id))
            .await
            .unwrap();
        h.service
            .add_defects(inspection.id, vec![NewDefect::new(Severity::Minor, 4)])
            .await
            .unwrap();

        let submitted = h
            .service
            .submit_inspection(inspection.id, None, Some("re-check after sorting".into()))
            .await
            .unwrap();
        assert_eq!(submitted.decision, Some(Decision::Hold));

        let batch = h.service.get_batch(batch.id).await.unwrap();
        assert_eq!(batch.qc_status, QcStatus::Pending);
        assert_eq!(batch.qc_note.as_deref(), Some("re-check after sorting"));
    }

    #[tokio::test]
    async fn export_beyond_stock_is_rejected_and_leaves_stock() {
        let h = harness().await;
        h.passed_batch(200, None).await;
        h.service.import_stock(h.request(100)).await.unwrap();

        let err = h.service.export_stock(h.request(150)).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Domain(DomainError::InsufficientStock {
                requested: 150,
                available: 100
            })
        ));
        assert_eq!(h.on_hand().await, 100);
    }

    #[tokio::test]
    async fn export_draws_from_earliest_expiry_first() {
        let h = harness().await;
        let early = h.passed_batch(5, Some(date(2025, 1, 10))).await;
        let late = h.passed_batch(50, Some(date(2025, 2, 1))).await;
        h.service.import_stock(h.request(55)).await.unwrap();

        let first = h.service.export_stock(h.request(5)).await.unwrap();
        assert_eq!(first.batch_id, Some(early));
        assert_eq!(h.service.get_batch(early).await.unwrap().current_quantity, 0);
        assert_eq!(h.service.get_batch(late).await.unwrap().current_quantity, 50);

        // The emptied batch is no longer eligible.
        let second = h.service.export_stock(h.request(10)).await.unwrap();
        assert_eq!(second.batch_id, Some(late));
        assert_eq!(h.service.get_batch(late).await.unwrap().current_quantity, 40);
        assert_eq!(h.on_hand().await, 40);
    }

    #[tokio::test]
    async fn eligible_batches_follow_expiry_with_undated_last() {
        let h = harness().await;
        let undated = h.passed_batch(10, None).await;
        let e3 = h.passed_batch(10, Some(date(2025, 9, 1))).await;
        let e1 = h.passed_batch(10, Some(date(2025, 3, 1))).await;
        let e2 = h.passed_batch(10, Some(date(2025, 6, 1))).await;
        // Pending and deactivated batches never qualify.
        h.service
            .receive_batch(NewBatch::new(h.product, 10).with_expiry(date(2025, 1, 20)))
            .await
            .unwrap();
        let retired = h.passed_batch(10, Some(date(2025, 2, 1))).await;
        h.service.deactivate_batch(retired).await.unwrap();

        let order: Vec<BatchId> = h
            .service
            .eligible_batches(h.product)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(order, vec![e1, e2, e3, undated]);

        let pending = h
            .service
            .batches_by_product(h.product, Some(QcStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn second_submission_is_rejected_and_keeps_first_outcome() {
        let h = harness().await;
        let batch = h
            .service
            .receive_batch(NewBatch::new(h.product, 10))
            .await
            .unwrap();
        let inspection = h
            .service
            .create_inspection(NewInspection::new(InspectionType::Input, batch.id))
            .await
            .unwrap();
        let first = h
            .service
            .submit_inspection(inspection.id, None, None)
            .await
            .unwrap();

        h.clock.advance(Duration::hours(1));
        let err = h
            .service
            .submit_inspection(inspection.id, Some(Decision::Reject), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_state");

        let err = h
            .service
            .add_defects(inspection.id, vec![NewDefect::new(Severity::Critical, 1)])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_state");

        let detail = h
            .service
            .get_inspection_detail(inspection.id)
            .await
            .unwrap();
        assert_eq!(detail.inspection.status, InspectionStatus::Submitted);
        assert_eq!(detail.inspection.decision, Some(Decision::Accept));
        assert_eq!(detail.inspection.completed_at, first.completed_at);
        assert!(detail.defects.is_empty());
        assert_eq!(
            h.service.get_batch(batch.id).await.unwrap().qc_status,
            QcStatus::Passed
        );
    }

    #[tokio::test]
    async fn a_single_critical_defect_rejects() {
        let h = harness().await;
        let batch = h
            .service
            .receive_batch(NewBatch::new(h.product, 10))
            .await
            .unwrap();
        let inspection = h
            .service
            .create_inspection(NewInspection::new(InspectionType::InProcess, batch.id))
            .await
            .unwrap();
        h.service
            .add_defects(inspection.id, vec![NewDefect::new(Severity::Critical, 1)])
            .await
            .unwrap();

        let submitted = h
            .service
            .submit_inspection(inspection.id, None, None)
            .await
            .unwrap();
        assert_eq!(submitted.decision, Some(Decision::Reject));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_exports_never_overdraw() {
        let h = harness().await;
        h.passed_batch(100, Some(date(2025, 12, 31))).await;
        h.service.import_stock(h.request(10)).await.unwrap();

        let service = Arc::new(h.service);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let service = Arc::clone(&service);
            let request = MovementRequest::new(h.product, h.warehouse, 1, ActorId::new(1));
            handles.push(tokio::spawn(async move { service.export_stock(request).await }));
        }

        let mut numbers = HashSet::new();
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(movement) => assert!(numbers.insert(movement.movement_number)),
                Err(e) => {
                    assert_eq!(e.code(), "insufficient_stock");
                    rejected += 1;
                }
            }
        }
        assert_eq!(numbers.len(), 10);
        assert_eq!(rejected, 10);

        let summary = service.get_stock_summary(Some(h.product)).await.unwrap();
        assert_eq!(summary[0].total_quantity, 0);
        let filter = MovementFilter {
            movement_type: Some(MovementType::Export),
            ..MovementFilter::default()
        };
        let page = service
            .list_movements(&filter, Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 10);
    }

    #[tokio::test]
    async fn read_paths_do_not_change_state_or_publish() {
        let h = harness().await;
        h.passed_batch(30, None).await;
        h.service.import_stock(h.request(30)).await.unwrap();

        let subscription = h.bus.subscribe();
        let filter = InspectionFilter::default();
        let inspections = h.service.list_inspections(&filter).await.unwrap();
        let summary = h.service.get_stock_summary(None).await.unwrap();
        let movements = h
            .service
            .list_movements(&MovementFilter::default(), Pagination::default())
            .await
            .unwrap();

        assert_eq!(h.service.list_inspections(&filter).await.unwrap(), inspections);
        assert_eq!(h.service.get_stock_summary(None).await.unwrap(), summary);
        assert_eq!(
            h.service
                .list_movements(&MovementFilter::default(), Pagination::default())
                .await
                .unwrap(),
            movements
        );
        assert!(subscription.drain().is_empty());
    }

    #[tokio::test]
    async fn committed_events_are_published_in_order() {
        let h = harness().await;
        let subscription = h.bus.subscribe();

        let batch = h
            .service
            .receive_batch(NewBatch::new(h.product, 10))
            .await
            .unwrap();
        let inspection = h
            .service
            .create_inspection(NewInspection::new(InspectionType::Input, batch.id))
            .await
            .unwrap();
        h.service
            .submit_inspection(inspection.id, None, None)
            .await
            .unwrap();
        h.service
            .import_stock(h.request(10).with_batch(batch.id))
            .await
            .unwrap();

        let published = subscription.drain();
        let types: Vec<&str> = published.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            vec![
                "inventory.batch.received",
                "quality.inspection.opened",
                "quality.inspection.submitted",
                "inventory.batch.qc_recorded",
                "inventory.stock.moved",
                "inventory.batch.quantity_increased",
            ]
        );

        let batch_seqs: Vec<u64> = published
            .iter()
            .filter(|e| e.aggregate_id() == *batch.id.as_uuid())
            .map(|e| e.sequence_number())
            .collect();
        assert_eq!(batch_seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn failed_operations_publish_nothing() {
        let h = harness().await;
        let subscription = h.bus.subscribe();

        assert!(h.service.export_stock(h.request(1)).await.is_err());
        assert!(
            h.service
                .receive_batch(NewBatch::new(ProductId::new(), 1))
                .await
                .is_err()
        );
        assert!(subscription.drain().is_empty());
    }

    #[tokio::test]
    async fn submit_leaves_inspection_open_when_batch_update_fails() {
        let h = harness().await;
        let batch = h
            .service
            .receive_batch(NewBatch::new(h.product, 50))
            .await
            .unwrap();
        let inspection = h
            .service
            .create_inspection(NewInspection::new(InspectionType::Input, batch.id))
            .await
            .unwrap();
        h.service
            .add_defects(inspection.id, vec![NewDefect::new(Severity::Critical, 1)])
            .await
            .unwrap();

        h.store.freeze_batch(batch.id).await;
        let subscription = h.bus.subscribe();
        let err = h
            .service
            .submit_inspection(inspection.id, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "conflict");

        let detail = h.service.get_inspection_detail(inspection.id).await.unwrap();
        assert_eq!(detail.inspection.status, InspectionStatus::InProgress);
        assert_eq!(detail.inspection.decision, None);
        assert_eq!(detail.defects.len(), 1);
        let batch = h.service.get_batch(batch.id).await.unwrap();
        assert_eq!(batch.qc_status, QcStatus::Pending);
        assert!(subscription.drain().is_empty());
    }

    #[tokio::test]
    async fn import_leaves_stock_and_ledger_alone_when_batch_update_fails() {
        let h = harness().await;
        let batch = h.passed_batch(20, None).await;
        h.service.import_stock(h.request(20)).await.unwrap();

        h.store.freeze_batch(batch).await;
        let err = h
            .service
            .import_stock(h.request(5).with_batch(batch))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "conflict");

        assert_eq!(h.on_hand().await, 20);
        assert_eq!(h.service.get_batch(batch).await.unwrap().current_quantity, 20);
        let page = h
            .service
            .list_movements(&MovementFilter::default(), Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn overflowing_import_is_rejected_without_panicking() {
        let h = harness().await;
        h.service.import_stock(h.request(i64::MAX)).await.unwrap();

        let err = h.service.import_stock(h.request(1)).await.unwrap_err();
        assert_eq!(err.code(), "validation_error");
        assert_eq!(h.on_hand().await, i64::MAX);
    }
}
