//! Payload geometry negotiated between a sink and its sources.

use std::fmt;
use std::str::FromStr;

use crate::layout::LayoutError;
use crate::record::Position2D;

/// Pixel layout of a frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum PixelColor {
    /// 8-bit greyscale.
    Mono = 1,
    /// 8-bit, 3-channel BGR.
    #[default]
    Bgr = 2,
    /// 8-bit, 3-channel RGB.
    Rgb = 3,
    /// 8-bit, 3-channel HSV.
    Hsv = 4,
}

impl PixelColor {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Mono => 1,
            Self::Bgr | Self::Rgb | Self::Hsv => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Mono => "mono",
            Self::Bgr => "bgr",
            Self::Rgb => "rgb",
            Self::Hsv => "hsv",
        }
    }

    fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(Self::Mono),
            2 => Some(Self::Bgr),
            3 => Some(Self::Rgb),
            4 => Some(Self::Hsv),
            _ => None,
        }
    }
}

impl fmt::Display for PixelColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unknown pixel color name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown pixel color `{0}` (expected mono, bgr, rgb or hsv)")]
pub struct ParseColorError(pub String);

impl FromStr for PixelColor {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mono" | "grey" | "gray" => Ok(Self::Mono),
            "bgr" => Ok(Self::Bgr),
            "rgb" => Ok(Self::Rgb),
            "hsv" => Ok(Self::Hsv),
            _ => Err(ParseColorError(s.to_string())),
        }
    }
}

/// Shape of the payload carried by a channel. Fixed for the channel's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Geometry {
    /// An image of `rows` x `cols` pixels.
    Frame {
        rows: u32,
        cols: u32,
        color: PixelColor,
    },
    /// A fixed-size record identified by a layout tag.
    Record { layout: u32, size: u32 },
}

const KIND_FRAME: u32 = 1;
const KIND_RECORD: u32 = 2;

impl Geometry {
    pub fn frame(rows: u32, cols: u32, color: PixelColor) -> Self {
        Self::Frame { rows, cols, color }
    }

    /// Geometry of a channel carrying [`Position2D`] records.
    pub fn position2d() -> Self {
        Self::Record {
            layout: Position2D::LAYOUT_ID,
            size: Position2D::SIZE as u32,
        }
    }

    /// Number of payload bytes in one sample, `None` on overflow.
    pub fn payload_size(&self) -> Option<usize> {
        match *self {
            Self::Frame { rows, cols, color } => (rows as usize)
                .checked_mul(cols as usize)?
                .checked_mul(color.bytes_per_pixel()),
            Self::Record { size, .. } => Some(size as usize),
        }
    }

    /// Encode into the four header words.
    pub(crate) fn to_words(self) -> [u32; 4] {
        match self {
            Self::Frame { rows, cols, color } => [KIND_FRAME, rows, cols, color as u32],
            Self::Record { layout, size } => [KIND_RECORD, layout, size, 0],
        }
    }

    /// Decode from the four header words.
    pub(crate) fn from_words(words: [u32; 4]) -> Result<Self, LayoutError> {
        match words[0] {
            KIND_FRAME => {
                let color =
                    PixelColor::from_tag(words[3]).ok_or(LayoutError::InvalidGeometry(words))?;
                Ok(Self::Frame {
                    rows: words[1],
                    cols: words[2],
                    color,
                })
            }
            KIND_RECORD => Ok(Self::Record {
                layout: words[1],
                size: words[2],
            }),
            _ => Err(LayoutError::InvalidGeometry(words)),
        }
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frame { rows, cols, color } => write!(f, "{rows}x{cols} {color} frame"),
            Self::Record { layout, size } => {
                write!(f, "record layout {layout:#010x} ({size} bytes)")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_payload_size() {
        let g = Geometry::frame(480, 640, PixelColor::Bgr);
        assert_eq!(g.payload_size(), Some(480 * 640 * 3));
        let g = Geometry::frame(2, 3, PixelColor::Mono);
        assert_eq!(g.payload_size(), Some(6));
    }

    #[test]
    fn header_words_survive_decoding() {
        for g in [
            Geometry::frame(480, 640, PixelColor::Hsv),
            Geometry::position2d(),
        ] {
            assert_eq!(Geometry::from_words(g.to_words()).unwrap(), g);
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = Geometry::from_words([9, 0, 0, 0]).unwrap_err();
        assert_eq!(err, LayoutError::InvalidGeometry([9, 0, 0, 0]));
        assert!(Geometry::from_words([KIND_FRAME, 1, 1, 77]).is_err());
    }

    #[test]
    fn color_names_parse() {
        assert_eq!("BGR".parse::<PixelColor>(), Ok(PixelColor::Bgr));
        assert_eq!("mono".parse::<PixelColor>(), Ok(PixelColor::Mono));
        assert!("cmyk".parse::<PixelColor>().is_err());
    }

    #[test]
    fn display_is_readable() {
        assert_eq!(
            Geometry::frame(4, 8, PixelColor::Mono).to_string(),
            "4x8 mono frame"
        );
    }
}
