pub mod counter;
pub mod error;
pub mod upstream;

pub use counter::CountStore;
pub use error::{CounterError, ServerError, TallyError, UpstreamError};
pub use upstream::Upstream;
