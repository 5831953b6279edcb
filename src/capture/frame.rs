use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sensor resolutions the device can be asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Low,
    Medium,
    High,
}

impl Resolution {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Resolution::Low => (320, 240),
            Resolution::Medium => (640, 480),
            Resolution::High => (1280, 1024),
        }
    }
}

/// Element types a record can carry.
///
/// The discriminants are the codes written to the `type=` header line and
/// follow OpenCV's matrix type numbering, so a reader can dispatch on them
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    /// 8-bit single channel
    Gray8 = 0,
    /// 16-bit unsigned single channel
    Depth16U = 2,
    /// 16-bit signed single channel, carries 11-bit depth samples
    Depth16S = 3,
    /// 8-bit triple channel
    Rgb8 = 16,
}

impl ElementType {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(ElementType::Gray8),
            2 => Some(ElementType::Depth16U),
            3 => Some(ElementType::Depth16S),
            16 => Some(ElementType::Rgb8),
            _ => None,
        }
    }

    pub fn bytes_per_element(self) -> usize {
        match self {
            ElementType::Gray8 => 1,
            ElementType::Depth16U | ElementType::Depth16S => 2,
            ElementType::Rgb8 => 3,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModeError {
    #[error("frame dimensions must be non-zero, got {width}x{height}")]
    ZeroSized { width: u32, height: u32 },
    #[error("depth stream cannot carry {0:?} elements")]
    DepthElement(ElementType),
    #[error("depth stream does not support {0:?} resolution")]
    DepthResolution(Resolution),
    #[error("color stream cannot carry {0:?} elements")]
    ColorElement(ElementType),
}

/// Geometry and element type of one stream's frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMode {
    pub width: u32,
    pub height: u32,
    pub element: ElementType,
}

impl FrameMode {
    pub fn new(width: u32, height: u32, element: ElementType) -> Result<Self, ModeError> {
        if width == 0 || height == 0 {
            return Err(ModeError::ZeroSized { width, height });
        }
        Ok(Self {
            width,
            height,
            element,
        })
    }

    /// Depth mode: 11-bit samples carried in 16-bit signed words
    pub fn depth(resolution: Resolution) -> Result<Self, ModeError> {
        if resolution == Resolution::High {
            return Err(ModeError::DepthResolution(resolution));
        }
        let (width, height) = resolution.dimensions();
        Self::new(width, height, ElementType::Depth16S)
    }

    /// Color mode: packed RGB, three bytes per pixel
    pub fn color(resolution: Resolution) -> Result<Self, ModeError> {
        let (width, height) = resolution.dimensions();
        Self::new(width, height, ElementType::Rgb8)
    }

    /// Same geometry, different element type
    pub fn with_element(self, element: ElementType) -> Self {
        Self { element, ..self }
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Row stride in bytes
    pub fn step(&self) -> usize {
        self.width as usize * self.element.bytes_per_element()
    }

    pub fn payload_len(&self) -> usize {
        self.step() * self.height as usize
    }
}

/// Frame metadata
#[derive(Debug, Clone, Copy)]
pub struct FrameMeta {
    pub mode: FrameMode,
    /// Device timestamp as reported by the driver
    pub timestamp: u32,
    pub sequence: u64,
}
