//! Waste record store.
//!
//! Holds two independent append-only boxes, collection events and breakdown
//! reports, and drives the deferred sync of both to the remote store.
//!
//! Sync moves through two states, Idle and Syncing:
//!
//! 1. Snapshot both boxes and take the records with `is_synced == false`.
//! 2. Nothing pending: return 0 without touching the transport.
//! 3. Push every pending record as one batch.
//! 4. On success, flip exactly the pushed records (matched by id) to synced.
//!    Records saved while the push was in flight are kept and stay pending.
//! 5. On failure, leave both boxes untouched and return the error.
//!
//! Each box mutation is one storage transaction, so concurrent saves and the
//! post-push update never overwrite each other. The post-push update covers
//! both boxes in a single transaction.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info};

use crate::error::Result;
use crate::model::{BreakdownRecord, CollectionRecord, CollectionStatus, SyncRecord};
use crate::storage::Storage;
use crate::sync::{PushBatch, SyncTransport};

/// Storage key of the collection box.
pub const COLLECTION_BOX: &str = "civicloop_waste_box";

/// Storage key of the breakdown box.
pub const BREAKDOWN_BOX: &str = "civicloop_breakdown_box";

/// Buffered events per subscriber before the oldest are dropped.
const EVENT_BUFFER: usize = 64;

/// A change to the record store, delivered to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A collection record was appended.
    CollectionSaved {
        /// Id of the new record.
        collection_id: String,
    },
    /// A breakdown report was appended.
    BreakdownSaved {
        /// Id of the new report.
        id: String,
    },
    /// Pending records were acknowledged by the remote store.
    Synced {
        /// Number of records flipped to synced.
        count: usize,
    },
    /// Synced records were pruned from the device.
    Pruned {
        /// Number of records removed.
        removed: usize,
    },
}

/// Record counts across both boxes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordStats {
    /// Collection records on the device.
    pub collections: usize,
    /// Collection records not yet synced.
    pub pending_collections: usize,
    /// Breakdown reports on the device.
    pub breakdowns: usize,
    /// Breakdown reports not yet synced.
    pub pending_breakdowns: usize,
    /// Collections recorded as segregated.
    pub segregated: usize,
    /// Collections recorded as mixed.
    pub mixed: usize,
    /// Collections recorded as rejected.
    pub rejected: usize,
    /// Collections where the bin was locked.
    pub locked: usize,
}

impl RecordStats {
    /// Unsynced records across both boxes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending_collections + self.pending_breakdowns
    }
}

/// Local store for collection and breakdown records.
#[derive(Debug)]
pub struct WasteStore {
    storage: Arc<Storage>,
    transport: Arc<dyn SyncTransport>,
    /// Held for the whole of a sync attempt.
    sync_gate: Mutex<()>,
    events: broadcast::Sender<StoreEvent>,
}

impl WasteStore {
    /// Create a store over `storage` that pushes through `transport`.
    #[must_use]
    pub fn new(storage: Arc<Storage>, transport: Arc<dyn SyncTransport>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            storage,
            transport,
            sync_gate: Mutex::new(()),
            events,
        }
    }

    /// Receive an event for every subsequent write.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Append a collection record. The record is stored as given.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be persisted.
    pub fn save_collection(&self, record: CollectionRecord) -> Result<()> {
        let collection_id = record.collection_id.clone();
        self.storage
            .update_json(COLLECTION_BOX, |records: &mut Vec<CollectionRecord>| {
                records.push(record);
            })?;

        info!("Saved record {} to local box", collection_id);
        self.notify(StoreEvent::CollectionSaved { collection_id });
        Ok(())
    }

    /// Append a breakdown report. The report is stored as given.
    ///
    /// # Errors
    ///
    /// Returns an error if the report could not be persisted.
    pub fn save_breakdown(&self, record: BreakdownRecord) -> Result<()> {
        let id = record.id.clone();
        self.storage
            .update_json(BREAKDOWN_BOX, |records: &mut Vec<BreakdownRecord>| {
                records.push(record);
            })?;

        info!("Saved breakdown {} locally", id);
        self.notify(StoreEvent::BreakdownSaved { id });
        Ok(())
    }

    /// All collection records, oldest first.
    #[must_use]
    pub fn all_records(&self) -> Vec<CollectionRecord> {
        self.load(COLLECTION_BOX)
    }

    /// All breakdown reports, oldest first.
    #[must_use]
    pub fn all_breakdowns(&self) -> Vec<BreakdownRecord> {
        self.load(BREAKDOWN_BOX)
    }

    /// Collection records newest first, for history listings.
    #[must_use]
    pub fn recent_records(&self) -> Vec<CollectionRecord> {
        let mut records = self.all_records();
        records.reverse();
        records
    }

    /// Breakdown reports newest first.
    #[must_use]
    pub fn recent_breakdowns(&self) -> Vec<BreakdownRecord> {
        let mut records = self.all_breakdowns();
        records.reverse();
        records
    }

    /// Unsynced records across both boxes.
    #[must_use]
    pub fn unsynced_count(&self) -> usize {
        self.stats().pending()
    }

    /// Totals, pending counts and per-status collection counts.
    #[must_use]
    pub fn stats(&self) -> RecordStats {
        let collections = self.all_records();
        let breakdowns = self.all_breakdowns();
        let mut stats = RecordStats {
            collections: collections.len(),
            pending_collections: count_pending(&collections),
            breakdowns: breakdowns.len(),
            pending_breakdowns: count_pending(&breakdowns),
            ..RecordStats::default()
        };

        for record in &collections {
            match record.status {
                CollectionStatus::Segregated => stats.segregated += 1,
                CollectionStatus::Mixed => stats.mixed += 1,
                CollectionStatus::Rejected => stats.rejected += 1,
                CollectionStatus::Locked => stats.locked += 1,
            }
        }
        stats
    }

    /// Whether a sync attempt is in flight.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.sync_gate.try_lock().is_err()
    }

    /// Push every pending record and mark the pushed ones as synced.
    ///
    /// Returns the number of records that moved to synced. Concurrent calls
    /// run one after another; a caller that waited finds nothing pending.
    ///
    /// # Errors
    ///
    /// Returns the transport error unchanged if the push fails, with both
    /// boxes exactly as they were. Also fails if the acknowledged records
    /// could not be marked locally. Both boxes are marked in one transaction,
    /// so they all stay pending and are pushed again under the same batch id.
    pub async fn sync_pending(&self) -> Result<usize> {
        let _syncing = self.sync_gate.lock().await;

        let collections: Vec<CollectionRecord> = self
            .all_records()
            .into_iter()
            .filter(|r| !r.is_synced())
            .collect();
        let breakdowns: Vec<BreakdownRecord> = self
            .all_breakdowns()
            .into_iter()
            .filter(|r| !r.is_synced())
            .collect();

        let batch = PushBatch::new(collections, breakdowns);
        if batch.is_empty() {
            debug!("Nothing pending, skipping sync");
            return Ok(0);
        }

        info!(
            "Syncing {} records ({} collections, {} breakdowns) via {}",
            batch.len(),
            batch.collections.len(),
            batch.breakdowns.len(),
            self.transport.name()
        );
        if let Err(e) = self.transport.push(&batch).await {
            error!("Sync failed: {}", e);
            return Err(e);
        }

        self.mark_pushed(&batch)?;

        let count = batch.len();
        info!("Sync complete, {} records uploaded", count);
        self.notify(StoreEvent::Synced { count });
        Ok(count)
    }

    /// Drop synced records from both boxes; unsynced records are kept.
    ///
    /// Returns the number of records removed.
    ///
    /// # Errors
    ///
    /// Returns an error if either box could not be rewritten.
    pub fn clear_synced_records(&self) -> Result<usize> {
        let removed = self.prune::<CollectionRecord>(COLLECTION_BOX)?
            + self.prune::<BreakdownRecord>(BREAKDOWN_BOX)?;

        if removed > 0 {
            info!("Cleared {} synced records", removed);
        }
        self.notify(StoreEvent::Pruned { removed });
        Ok(removed)
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        self.storage.read_json(key).unwrap_or_default()
    }

    fn mark_pushed(&self, batch: &PushBatch) -> Result<()> {
        let collection_ids: HashSet<&str> =
            batch.collections.iter().map(SyncRecord::record_id).collect();
        let breakdown_ids: HashSet<&str> =
            batch.breakdowns.iter().map(SyncRecord::record_id).collect();

        let marked = self.storage.update_json_pair(
            COLLECTION_BOX,
            BREAKDOWN_BOX,
            |collections: &mut Vec<CollectionRecord>, breakdowns: &mut Vec<BreakdownRecord>| {
                mark_ids_synced(collections, &collection_ids)
                    + mark_ids_synced(breakdowns, &breakdown_ids)
            },
        )?;

        debug!("Marked {} of {} pushed records", marked, batch.len());
        Ok(())
    }

    fn prune<T>(&self, key: &str) -> Result<usize>
    where
        T: SyncRecord + Serialize + DeserializeOwned,
    {
        self.storage.update_json(key, |records: &mut Vec<T>| {
            let before = records.len();
            records.retain(|r| !r.is_synced());
            before - records.len()
        })
    }

    fn notify(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn mark_ids_synced<T: SyncRecord>(records: &mut [T], ids: &HashSet<&str>) -> usize {
    let mut marked = 0;
    for record in records.iter_mut().filter(|r| ids.contains(r.record_id())) {
        if !record.is_synced() {
            record.mark_synced();
            marked += 1;
        }
    }
    marked
}

fn count_pending<T: SyncRecord>(records: &[T]) -> usize {
    records.iter().filter(|r| !r.is_synced()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::model::GeoLocation;
    use crate::sync::SimulatedTransport;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn create_test_store() -> (WasteStore, Arc<SimulatedTransport>) {
        crate::logging::init_test_logging();
        let storage = Arc::new(Storage::open_in_memory().expect("failed to create test storage"));
        let transport = Arc::new(SimulatedTransport::instant());
        (WasteStore::new(storage, transport.clone()), transport)
    }

    fn collection(household: &str) -> CollectionRecord {
        CollectionRecord::new(
            "DRV-101",
            household,
            CollectionStatus::Segregated,
            GeoLocation::unknown(),
        )
    }

    fn breakdown(details: &str) -> BreakdownRecord {
        BreakdownRecord::new("DRV-101", details, GeoLocation::unknown())
    }

    /// Transport that parks inside `push` until released.
    #[derive(Debug, Default)]
    struct GatedTransport {
        entered: Notify,
        release: Notify,
    }

    #[async_trait::async_trait]
    impl SyncTransport for GatedTransport {
        fn name(&self) -> &'static str {
            "gated"
        }

        async fn push(&self, _batch: &PushBatch) -> Result<()> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    #[test]
    fn test_save_preserves_call_order() {
        let (store, _) = create_test_store();
        for i in 0..5 {
            store.save_collection(collection(&format!("HH-{i}"))).unwrap();
        }

        let households: Vec<String> = store
            .all_records()
            .into_iter()
            .map(|r| r.household_id)
            .collect();
        assert_eq!(households, vec!["HH-0", "HH-1", "HH-2", "HH-3", "HH-4"]);
        assert_eq!(store.unsynced_count(), 5);
    }

    #[test]
    fn test_recent_lists_are_newest_first() {
        let (store, _) = create_test_store();
        for i in 0..3 {
            store.save_collection(collection(&format!("HH-{i}"))).unwrap();
        }
        store.save_breakdown(breakdown("Flat tire")).unwrap();
        store.save_breakdown(breakdown("Engine smoke")).unwrap();

        let households: Vec<String> = store
            .recent_records()
            .into_iter()
            .map(|r| r.household_id)
            .collect();
        assert_eq!(households, vec!["HH-2", "HH-1", "HH-0"]);

        let details: Vec<String> = store
            .recent_breakdowns()
            .into_iter()
            .map(|r| r.details)
            .collect();
        assert_eq!(details, vec!["Engine smoke", "Flat tire"]);
    }

    #[test]
    fn test_unsynced_count_spans_both_boxes() {
        let (store, _) = create_test_store();
        store.save_collection(collection("HH-1")).unwrap();
        store.save_breakdown(breakdown("Flat tire")).unwrap();
        store.save_breakdown(breakdown("Engine smoke")).unwrap();

        let mut synced = collection("HH-2");
        synced.is_synced = true;
        store.save_collection(synced).unwrap();

        assert_eq!(store.unsynced_count(), 3);
        let stats = store.stats();
        assert_eq!(stats.collections, 2);
        assert_eq!(stats.pending_collections, 1);
        assert_eq!(stats.breakdowns, 2);
        assert_eq!(stats.pending_breakdowns, 2);
    }

    #[test]
    fn test_stats_count_collections_by_status() {
        let (store, _) = create_test_store();
        let statuses = [
            CollectionStatus::Segregated,
            CollectionStatus::Mixed,
            CollectionStatus::Segregated,
            CollectionStatus::Rejected,
            CollectionStatus::Mixed,
            CollectionStatus::Segregated,
        ];
        for (i, status) in statuses.into_iter().enumerate() {
            let record =
                CollectionRecord::new("DRV-101", format!("HH-{i}"), status, GeoLocation::unknown());
            store.save_collection(record).unwrap();
        }
        store.save_breakdown(breakdown("Flat tire")).unwrap();

        let stats = store.stats();
        assert_eq!(stats.collections, 6);
        assert_eq!(stats.segregated, 3);
        assert_eq!(stats.mixed, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.locked, 0);
        assert_eq!(stats.pending(), 7);
    }

    #[test]
    fn test_store_does_not_validate() {
        let (store, _) = create_test_store();
        store.save_breakdown(breakdown("")).unwrap();
        assert_eq!(store.all_breakdowns().len(), 1);
    }

    #[test]
    fn test_empty_store() {
        let (store, _) = create_test_store();
        assert!(store.all_records().is_empty());
        assert!(store.all_breakdowns().is_empty());
        assert_eq!(store.unsynced_count(), 0);
    }

    #[tokio::test]
    async fn test_sync_scenario() {
        let (store, transport) = create_test_store();
        store.save_collection(collection("HH-1")).unwrap();
        store.save_collection(collection("HH-2")).unwrap();
        let mut already = collection("HH-3");
        already.is_synced = true;
        store.save_collection(already).unwrap();

        assert_eq!(store.unsynced_count(), 2);
        assert_eq!(store.sync_pending().await.unwrap(), 2);
        assert_eq!(transport.pushes(), 1);
        assert_eq!(store.unsynced_count(), 0);
        assert!(store.all_records().iter().all(SyncRecord::is_synced));

        assert_eq!(store.clear_synced_records().unwrap(), 3);
        assert!(store.all_records().is_empty());
        assert_eq!(store.unsynced_count(), 0);
    }

    #[tokio::test]
    async fn test_sync_includes_breakdowns() {
        let (store, _) = create_test_store();
        store.save_collection(collection("HH-1")).unwrap();
        store.save_breakdown(breakdown("Flat tire")).unwrap();

        assert_eq!(store.sync_pending().await.unwrap(), 2);
        assert!(store.all_records().iter().all(SyncRecord::is_synced));
        assert!(store.all_breakdowns().iter().all(SyncRecord::is_synced));
        assert_eq!(store.stats().pending(), 0);
    }

    #[tokio::test]
    async fn test_sync_nothing_pending_skips_transport() {
        let (store, transport) = create_test_store();

        assert_eq!(store.sync_pending().await.unwrap(), 0);
        assert_eq!(transport.pushes(), 0);
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let (store, transport) = create_test_store();
        store.save_collection(collection("HH-1")).unwrap();

        assert_eq!(store.sync_pending().await.unwrap(), 1);
        let after_first = store.all_records();

        assert_eq!(store.sync_pending().await.unwrap(), 0);
        assert_eq!(store.all_records(), after_first);
        assert_eq!(transport.pushes(), 1);
    }

    #[tokio::test]
    async fn test_sync_failure_leaves_records_untouched() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let transport = Arc::new(SimulatedTransport::failing(Duration::ZERO, "offline"));
        let store = WasteStore::new(storage, transport);

        store.save_collection(collection("HH-1")).unwrap();
        store.save_breakdown(breakdown("Flat tire")).unwrap();
        let before = (store.all_records(), store.all_breakdowns());

        let err = store.sync_pending().await.unwrap_err();
        assert!(matches!(err, Error::Sync { .. }));
        assert_eq!((store.all_records(), store.all_breakdowns()), before);
        assert_eq!(store.unsynced_count(), 2);
    }

    #[tokio::test]
    async fn test_records_saved_during_push_stay_pending() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let transport = Arc::new(GatedTransport::default());
        let store = Arc::new(WasteStore::new(storage, transport.clone()));

        store.save_collection(collection("HH-before")).unwrap();

        let syncing = {
            let store = store.clone();
            tokio::spawn(async move { store.sync_pending().await })
        };
        transport.entered.notified().await;
        assert!(store.is_syncing());

        store.save_collection(collection("HH-during")).unwrap();
        store.save_breakdown(breakdown("Stuck in mud")).unwrap();
        transport.release.notify_one();

        assert_eq!(syncing.await.unwrap().unwrap(), 1);
        assert!(!store.is_syncing());

        let records = store.all_records();
        assert_eq!(records.len(), 2);
        assert!(records[0].is_synced);
        assert_eq!(records[1].household_id, "HH-during");
        assert!(!records[1].is_synced);
        assert_eq!(store.unsynced_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_syncs_push_once() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let transport = Arc::new(SimulatedTransport::new(Duration::from_millis(30)));
        let store = Arc::new(WasteStore::new(storage, transport.clone()));
        store.save_collection(collection("HH-1")).unwrap();

        let (a, b) = tokio::join!(store.sync_pending(), store.sync_pending());
        let mut counts = [a.unwrap(), b.unwrap()];
        counts.sort_unstable();

        assert_eq!(counts, [0, 1]);
        assert_eq!(transport.pushes(), 1);
    }

    #[tokio::test]
    async fn test_clear_synced_keeps_unsynced() {
        let (store, _) = create_test_store();
        store.save_collection(collection("HH-1")).unwrap();
        store.save_breakdown(breakdown("Flat tire")).unwrap();
        store.sync_pending().await.unwrap();

        store.save_collection(collection("HH-2")).unwrap();
        store.save_breakdown(breakdown("Engine smoke")).unwrap();
        let pending_before = store.unsynced_count();

        assert_eq!(store.clear_synced_records().unwrap(), 2);
        assert_eq!(store.unsynced_count(), pending_before);
        assert_eq!(store.all_records()[0].household_id, "HH-2");
        assert_eq!(store.all_breakdowns()[0].details, "Engine smoke");
    }

    #[test]
    fn test_clear_with_nothing_synced_removes_nothing() {
        let (store, _) = create_test_store();
        store.save_collection(collection("HH-1")).unwrap();

        assert_eq!(store.clear_synced_records().unwrap(), 0);
        assert_eq!(store.all_records().len(), 1);
    }

    #[tokio::test]
    async fn test_every_write_is_observable() {
        let (store, _) = create_test_store();
        let mut events = store.subscribe();

        let record = collection("HH-1");
        let collection_id = record.collection_id.clone();
        store.save_collection(record).unwrap();
        let report = breakdown("Flat tire");
        let report_id = report.id.clone();
        store.save_breakdown(report).unwrap();
        store.sync_pending().await.unwrap();
        store.clear_synced_records().unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::CollectionSaved { collection_id }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::BreakdownSaved { id: report_id }
        );
        assert_eq!(events.recv().await.unwrap(), StoreEvent::Synced { count: 2 });
        assert_eq!(events.recv().await.unwrap(), StoreEvent::Pruned { removed: 2 });
    }

    #[test]
    fn test_corrupt_box_reads_as_empty() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        storage.put_raw(COLLECTION_BOX, "not json").unwrap();
        let store = WasteStore::new(storage, Arc::new(SimulatedTransport::instant()));

        assert!(store.all_records().is_empty());
        assert_eq!(store.unsynced_count(), 0);
    }

    #[test]
    fn test_stores_are_isolated() {
        let (a, _) = create_test_store();
        let (b, _) = create_test_store();
        a.save_collection(collection("HH-1")).unwrap();

        assert_eq!(a.unsynced_count(), 1);
        assert_eq!(b.unsynced_count(), 0);
    }
}
