//! Property-based tests for snapshot encoding and recovery.
//! Run with: cargo test --test property_tests

use std::sync::Arc;

use proptest::prelude::*;
use tempfile::TempDir;
use tally::contracts::CountStore;
use tally::metrics::PersistenceMetrics;
use tally::storage::{encode_count, parse_count, FileCountStore, MAX_SNAPSHOT_LEN};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// =============================================================================
// Snapshot format
// =============================================================================

proptest! {
    /// Property: every u64 encodes to a snapshot the parser accepts as-is.
    #[test]
    fn prop_encoded_value_parses_back(value in any::<u64>()) {
        let encoded = encode_count(value);
        prop_assert!(encoded.len() <= MAX_SNAPSHOT_LEN);
        prop_assert_eq!(parse_count(encoded.as_bytes()), Ok(value));
    }

    /// Property: the parser never panics, and anything it accepts is plain digits.
    #[test]
    fn prop_parser_total_on_arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..32)) {
        if let Ok(value) = parse_count(&bytes) {
            prop_assert!(!bytes.is_empty());
            prop_assert!(bytes.iter().all(u8::is_ascii_digit));
            prop_assert_eq!(value, std::str::from_utf8(&bytes).unwrap().parse::<u64>().unwrap());
        }
    }

    /// Property: any trailing non-digit byte makes the snapshot corrupt.
    #[test]
    fn prop_trailing_junk_is_rejected(value in any::<u64>(), junk in any::<u8>().prop_filter("non-digit", |b| !b.is_ascii_digit())) {
        let mut bytes = encode_count(value).into_bytes();
        bytes.push(junk);
        prop_assert!(parse_count(&bytes).is_err());
    }
}

// =============================================================================
// Recovery
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: a value persisted before shutdown is exactly the value recovered.
    #[test]
    fn prop_persisted_value_is_recovered(start in 0u64..1_000_000, increments in 0usize..50) {
        let rt = runtime();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("count");
        std::fs::write(&path, encode_count(start)).unwrap();

        let expected = start + increments as u64;
        rt.block_on(async {
            let store = FileCountStore::open(&path, Arc::new(PersistenceMetrics::default()));
            for _ in 0..increments {
                store.increment().unwrap();
            }
            store.shutdown().await;
        });

        let recovered = rt.block_on(async {
            let store = FileCountStore::open(&path, Arc::new(PersistenceMetrics::default()));
            let value = store.current();
            store.shutdown().await;
            value
        });
        prop_assert_eq!(recovered, expected);
    }

    /// Property: opening any file contents yields either its exact value or zero.
    #[test]
    fn prop_open_never_fails_on_garbage(bytes in proptest::collection::vec(any::<u8>(), 0..32)) {
        let rt = runtime();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("count");
        std::fs::write(&path, &bytes).unwrap();

        let current = rt.block_on(async {
            let store = FileCountStore::open(&path, Arc::new(PersistenceMetrics::default()));
            store.current()
        });

        match parse_count(&bytes) {
            Ok(value) => prop_assert_eq!(current, value),
            Err(_) => prop_assert_eq!(current, 0),
        }
    }
}
