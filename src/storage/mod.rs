mod counter;
pub mod snapshot;

pub use counter::FileCountStore;
pub use snapshot::{encode_count, parse_count, read_snapshot, ParseCountError, MAX_SNAPSHOT_LEN};
