pub mod frame;
pub mod sensor;
pub mod synthetic;
pub mod v4l2;

pub use frame::{ColourFrame, ColourMode, FrameMetadata, StreamGeometry};
pub use sensor::{ColourSensor, FrameDelivery};
pub use synthetic::{SyntheticFeed, SyntheticSensor};
pub use v4l2::V4l2Sensor;
