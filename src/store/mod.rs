//! In-memory aggregation store.
//!
//! Keeps per-device and per-measurement-kind counters plus a grand total of
//! all accepted documents. One coarse mutex guards the whole store: the only
//! writer is the message processor, so the lock chiefly serializes report
//! readers against that single writer. Records live for the lifetime of the
//! process and are never deleted.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use parking_lot::Mutex;
use tracing::error;

use crate::document::{MeasurementDocument, MeasurementKind};
use crate::hash::fnv64a;

/// FNV id of a device name.
pub type DeviceId = u64;

/// FNV id of a measurement-kind name.
pub type KindId = u64;

/// Per-(device, kind) aggregate.
#[derive(Debug)]
pub struct MeasurementRecord {
    /// Kind display name, kept for the report.
    pub name: &'static str,
    /// Number of documents that carried this kind for this device.
    pub count: u64,
}

/// Per-device aggregate.
#[derive(Debug)]
pub struct DeviceRecord {
    /// Device display name as first seen.
    pub name: String,
    /// Number of accepted documents naming this device.
    pub message_count: u64,
    /// Per-kind counters, keyed by the kind-name hash.
    pub measurements: BTreeMap<KindId, MeasurementRecord>,
}

impl DeviceRecord {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            message_count: 1,
            measurements: BTreeMap::new(),
        }
    }
}

#[derive(Default)]
struct StoreInner {
    devices: BTreeMap<DeviceId, DeviceRecord>,
    total_count: u64,
}

/// Concurrent map of device ids to aggregate counters.
pub struct AggregationStore {
    inner: Mutex<StoreInner>,
}

impl AggregationStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
        }
    }

    /// Folds one document into the aggregates.
    ///
    /// The grand total is incremented before the document's fields are read:
    /// a document whose device name cannot be extracted still counts toward
    /// the total while its device breakdown is abandoned. That partial
    /// effect is deliberate; per-record faults are logged and never
    /// propagate to the caller.
    pub fn add_record(&self, document: &MeasurementDocument) {
        let mut inner = self.inner.lock();
        inner.total_count += 1;

        let name = match document.device_name() {
            Ok(name) => name,
            Err(e) => {
                error!(error = %e, "unable to add new record to storage");
                return;
            }
        };

        let device = match inner.devices.entry(fnv64a(name.as_bytes())) {
            Entry::Occupied(entry) => {
                let device = entry.into_mut();
                device.message_count += 1;
                device
            }
            Entry::Vacant(entry) => entry.insert(DeviceRecord::new(name)),
        };

        for kind in MeasurementKind::all() {
            if !document.has_measurement(*kind) {
                continue;
            }
            match device.measurements.entry(kind.id()) {
                Entry::Occupied(mut entry) => entry.get_mut().count += 1,
                Entry::Vacant(entry) => {
                    entry.insert(MeasurementRecord {
                        name: kind.as_str(),
                        count: 1,
                    });
                }
            }
        }
    }

    /// Renders a snapshot of every counter as the plain-text report.
    ///
    /// Holds the store lock for the whole iteration: the snapshot is stable,
    /// though possibly stale relative to an in-flight `add_record`.
    pub fn render_report(&self) -> String {
        let inner = self.inner.lock();
        let mut report = String::new();

        for device in inner.devices.values() {
            let _ = write!(
                report,
                "{}: deviceTotal: {}; ",
                device.name, device.message_count
            );
            for measurement in device.measurements.values() {
                let _ = write!(report, "{}: {}; ", measurement.name, measurement.count);
            }
            report.push('\n');
        }

        let _ = writeln!(report, "grandTotal: {}", inner.total_count);
        report
    }

    /// Count of all accepted documents since start.
    pub fn grand_total(&self) -> u64 {
        self.inner.lock().total_count
    }

    /// Number of distinct devices seen so far.
    pub fn device_count(&self) -> usize {
        self.inner.lock().devices.len()
    }

    /// Message count for a device name, if it has been seen.
    pub fn device_message_count(&self, name: &str) -> Option<u64> {
        self.inner
            .lock()
            .devices
            .get(&fnv64a(name.as_bytes()))
            .map(|d| d.message_count)
    }
}

impl Default for AggregationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(raw: &str) -> MeasurementDocument {
        MeasurementDocument::from_slice(raw.as_bytes()).expect("valid document")
    }

    #[test]
    fn test_single_document_with_current() {
        let store = AggregationStore::new();
        store.add_record(&doc(
            r#"{"name":"dev-1","timestamp":"t","current":{"value":1.2,"unit":"A","fault":""}}"#,
        ));

        let report = store.render_report();
        assert!(report.contains("dev-1: deviceTotal: 1; current: 1; "));
        assert!(report.contains("grandTotal: 1"));
        assert_eq!(store.grand_total(), 1);
        assert_eq!(store.device_count(), 1);
    }

    #[test]
    fn test_per_kind_counts() {
        let store = AggregationStore::new();
        store.add_record(&doc(r#"{"name":"dev-1","timestamp":"t","voltage":{}}"#));
        store.add_record(&doc(r#"{"name":"dev-1","timestamp":"t","voltage":{}}"#));
        store.add_record(&doc(r#"{"name":"dev-1","timestamp":"t","temperature":{}}"#));

        let report = store.render_report();
        assert!(report.contains("dev-1: deviceTotal: 3; "));
        assert!(report.contains("voltage: 2; "));
        assert!(report.contains("temperature: 1; "));
        assert!(!report.contains("current"));
        assert_eq!(store.device_message_count("dev-1"), Some(3));
    }

    #[test]
    fn test_multiple_devices() {
        let store = AggregationStore::new();
        store.add_record(&doc(r#"{"name":"dev-1","timestamp":"t"}"#));
        store.add_record(&doc(r#"{"name":"dev-2","timestamp":"t","current":{}}"#));
        store.add_record(&doc(r#"{"name":"dev-2","timestamp":"t"}"#));

        assert_eq!(store.device_count(), 2);
        assert_eq!(store.device_message_count("dev-1"), Some(1));
        assert_eq!(store.device_message_count("dev-2"), Some(2));
        assert_eq!(store.grand_total(), 3);
    }

    #[test]
    fn test_unknown_measurement_kinds_ignored() {
        let store = AggregationStore::new();
        store.add_record(&doc(
            r#"{"name":"dev-1","timestamp":"t","humidity":{"value":55},"current":{}}"#,
        ));

        let report = store.render_report();
        assert!(report.contains("current: 1; "));
        assert!(!report.contains("humidity"));
    }

    #[test]
    fn test_document_without_name_counts_toward_total_only() {
        let store = AggregationStore::new();
        store.add_record(&doc(r#"{"timestamp":"t","current":{}}"#));

        assert_eq!(store.grand_total(), 1);
        assert_eq!(store.device_count(), 0);
        let report = store.render_report();
        assert!(report.contains("grandTotal: 1"));
    }

    #[test]
    fn test_empty_store_report() {
        let store = AggregationStore::new();
        assert_eq!(store.render_report(), "grandTotal: 0\n");
    }

    #[test]
    fn test_report_lines_end_with_newline() {
        let store = AggregationStore::new();
        store.add_record(&doc(r#"{"name":"dev-1","timestamp":"t"}"#));
        let report = store.render_report();
        assert!(report.ends_with("grandTotal: 1\n"));
        assert_eq!(report.lines().count(), 2);
    }
}
