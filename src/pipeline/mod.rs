pub mod configurator;
pub mod copier;
pub mod session;

pub use configurator::{ColourBuffers, PixelStagingBuffer, StreamConfigurator};
pub use copier::{CopyStats, FrameCopier};
pub use session::ColourSession;
