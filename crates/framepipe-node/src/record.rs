//! Fixed-layout records carried by record channels.

/// Error decoding a record from a payload buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("record buffer too short: need {needed} bytes, got {found}")]
    Truncated { needed: usize, found: usize },
}

/// A detected object position in image coordinates.
///
/// Wire layout (little-endian, 40 bytes):
///
/// ```text
/// 0..4    flags (bit 0: position valid, bit 1: velocity valid)
/// 4..8    reserved
/// 8..16   x (f64)
/// 16..24  y (f64)
/// 24..32  velocity x (f64)
/// 32..40  velocity y (f64)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position2D {
    pub position_valid: bool,
    pub x: f64,
    pub y: f64,
    pub velocity: Option<(f64, f64)>,
}

const FLAG_POSITION: u32 = 1 << 0;
const FLAG_VELOCITY: u32 = 1 << 1;

impl Position2D {
    /// Layout tag stored in the channel header ("POS2").
    pub const LAYOUT_ID: u32 = u32::from_le_bytes(*b"POS2");
    pub const SIZE: usize = 40;

    pub fn at(x: f64, y: f64) -> Self {
        Self {
            position_valid: true,
            x,
            y,
            velocity: None,
        }
    }

    pub fn write_to(&self, buf: &mut [u8]) -> Result<(), RecordError> {
        if buf.len() < Self::SIZE {
            return Err(RecordError::Truncated {
                needed: Self::SIZE,
                found: buf.len(),
            });
        }
        let mut flags = 0;
        if self.position_valid {
            flags |= FLAG_POSITION;
        }
        let (vx, vy) = match self.velocity {
            Some(v) => {
                flags |= FLAG_VELOCITY;
                v
            }
            None => (0.0, 0.0),
        };
        buf[0..4].copy_from_slice(&flags.to_le_bytes());
        buf[4..8].fill(0);
        buf[8..16].copy_from_slice(&self.x.to_le_bytes());
        buf[16..24].copy_from_slice(&self.y.to_le_bytes());
        buf[24..32].copy_from_slice(&vx.to_le_bytes());
        buf[32..40].copy_from_slice(&vy.to_le_bytes());
        Ok(())
    }

    pub fn read_from(buf: &[u8]) -> Result<Self, RecordError> {
        if buf.len() < Self::SIZE {
            return Err(RecordError::Truncated {
                needed: Self::SIZE,
                found: buf.len(),
            });
        }
        let word = |range: core::ops::Range<usize>| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[range]);
            f64::from_le_bytes(bytes)
        };
        let mut flag_bytes = [0u8; 4];
        flag_bytes.copy_from_slice(&buf[0..4]);
        let flags = u32::from_le_bytes(flag_bytes);

        Ok(Self {
            position_valid: flags & FLAG_POSITION != 0,
            x: word(8..16),
            y: word(16..24),
            velocity: (flags & FLAG_VELOCITY != 0).then(|| (word(24..32), word(32..40))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_flag_controls_decoding() {
        let mut buf = [0xFFu8; Position2D::SIZE];
        let pos = Position2D {
            velocity: Some((1.5, -2.0)),
            ..Position2D::at(10.0, 20.0)
        };
        pos.write_to(&mut buf).unwrap();
        assert_eq!(Position2D::read_from(&buf).unwrap(), pos);

        Position2D::at(3.0, 4.0).write_to(&mut buf).unwrap();
        let decoded = Position2D::read_from(&buf).unwrap();
        assert!(decoded.position_valid);
        assert_eq!(decoded.velocity, None);
    }

    #[test]
    fn short_buffers_are_rejected() {
        let mut buf = [0u8; 16];
        assert_eq!(
            Position2D::default().write_to(&mut buf),
            Err(RecordError::Truncated {
                needed: 40,
                found: 16
            })
        );
        assert!(Position2D::read_from(&buf).is_err());
    }
}
