pub mod job;
pub mod measurement;
pub mod station;
pub mod window;

pub use job::*;
pub use measurement::*;
pub use station::*;
pub use window::TimeWindow;
