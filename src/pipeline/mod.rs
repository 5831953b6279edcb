pub mod convert;
pub mod publisher;
pub mod record;

pub use publisher::{read_latest, Publisher};
pub use record::{RecordEncoder, WireRecord};
