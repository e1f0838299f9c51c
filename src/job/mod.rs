pub mod demand;
pub mod job;
pub mod state;
pub mod tree;

pub use job::Job;
pub use state::JobState;
