pub mod message;
pub mod router;
pub mod transport;

pub use message::{JobMessage, JobRequest, Message, MessageTag, Rank};
pub use transport::{LocalFabric, Transport};
