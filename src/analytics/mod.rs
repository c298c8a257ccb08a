//! Derived products computed from cached station series.

pub mod aggregate;
pub mod calendar;
pub mod generation;
pub mod math;
pub mod playback;
pub mod summary;
pub mod timeframes;
pub mod wind_rose;

pub use aggregate::aggregate;
pub use generation::{estimate_generation_mwh, WindFarmParams};
pub use playback::{FrameQuality, PlaybackFrame, QualityCounts};
pub use summary::{build_summary, expected_points, FeasibilitySummary, SummaryContext};
pub use timeframes::{ComparisonDelta, TimeframeBucket, TimeframeGroupBy};
pub use wind_rose::{build_wind_rose, WindRoseSummary};
