mod backend;
mod backends;
pub mod labels;
mod nms;

pub use backend::Detector;
pub use backends::{ScriptedDetector, StubDetector};
pub use nms::non_max_suppression;

#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;
