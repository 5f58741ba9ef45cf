use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device, FourCC};

use crate::capture::v4l2::{BGR32_FOURCC, BGR32_FOURCC_LEGACY};

// Detected capture device info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub card: String,
}

impl FoundDevice {
    pub fn new(path: String, card: String) -> Self {
        Self { path, card }
    }
}

/// Auto-detect a capture node that can deliver 32-bit BGR frames
pub fn auto_detect_device() -> Result<FoundDevice> {
    use std::path::Path;

    info!("Auto-detecting colour capture devices...");

    let wanted = [FourCC::new(&BGR32_FOURCC), FourCC::new(&BGR32_FOURCC_LEGACY)];

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }

        if let Ok(formats) = dev.enum_formats() {
            if formats.iter().any(|fmt| wanted.contains(&fmt.fourcc)) {
                debug!("{} offers BGR32", path);
                return Ok(FoundDevice::new(path, caps.card));
            }
        }
    }

    Err(eyre!("No capture device offering 32-bit BGR found"))
}
