#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use tempfile::TempDir;
use tally::contracts::CountStore;
use tally::metrics::PersistenceMetrics;
use tally::storage::{parse_count, FileCountStore};

fuzz_target!(|data: &[u8]| {
    // Parsing arbitrary snapshot bytes must never panic
    let parsed = parse_count(data);

    // Opening a store over the same bytes recovers the value or starts at zero
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("count");
    std::fs::write(&path, data).unwrap();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let current = rt.block_on(async {
        let store = FileCountStore::open(&path, Arc::new(PersistenceMetrics::default()));
        let current = store.current();
        store.shutdown().await;
        current
    });

    assert_eq!(current, parsed.unwrap_or(0));
});
