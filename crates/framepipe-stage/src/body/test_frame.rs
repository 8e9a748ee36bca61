use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use framepipe_node::{Geometry, PixelColor};

use crate::error::StageError;

/// Serves the same frame every iteration.
#[derive(Debug, Clone)]
pub struct TestFrame {
    geometry: Geometry,
    frame: Vec<u8>,
    origin: Option<PathBuf>,
}

impl TestFrame {
    /// A synthetic diagonal gradient.
    pub fn gradient(rows: u32, cols: u32, color: PixelColor) -> Result<Self, StageError> {
        let geometry = Geometry::frame(rows, cols, color);
        let size = frame_size(geometry)?;
        let channels = color.bytes_per_pixel();
        let mut frame = Vec::with_capacity(size);
        for r in 0..rows as usize {
            for c in 0..cols as usize {
                let base = r * 255 / rows as usize + c * 255 / cols as usize;
                frame.extend((0..channels).map(|k| ((base + k * 85) % 256) as u8));
            }
        }
        Ok(Self {
            geometry,
            frame,
            origin: None,
        })
    }

    /// A frame read from a raw pixel file of exactly the geometry's size.
    pub fn load(
        path: impl AsRef<Path>,
        rows: u32,
        cols: u32,
        color: PixelColor,
    ) -> Result<Self, StageError> {
        let path = path.as_ref();
        let geometry = Geometry::frame(rows, cols, color);
        let size = frame_size(geometry)?;
        let frame = fs::read(path).map_err(|source| StageError::Payload {
            resource: path.to_path_buf(),
            source,
        })?;
        if frame.len() != size {
            return Err(StageError::Payload {
                resource: path.to_path_buf(),
                source: io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "{geometry} needs {size} bytes, file has {}",
                        frame.len()
                    ),
                ),
            });
        }
        tracing::debug!(path = %path.display(), %geometry, "loaded test frame");
        Ok(Self {
            geometry,
            frame,
            origin: Some(path.to_path_buf()),
        })
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    /// File the frame was loaded from, if any.
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    pub(crate) fn process(&mut self, output: Option<&mut [u8]>) -> Result<bool, StageError> {
        let Some(output) = output else {
            return Ok(false);
        };
        if output.len() != self.frame.len() {
            return Err(StageError::config(format!(
                "output slot holds {} bytes, test frame has {}",
                output.len(),
                self.frame.len()
            )));
        }
        output.copy_from_slice(&self.frame);
        Ok(true)
    }
}

fn frame_size(geometry: Geometry) -> Result<usize, StageError> {
    match geometry.payload_size() {
        Some(size) if size > 0 => Ok(size),
        _ => Err(StageError::config(format!("cannot serve a {geometry}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_fills_the_geometry() {
        let body = TestFrame::gradient(4, 6, PixelColor::Bgr).unwrap();
        assert_eq!(body.frame().len(), 4 * 6 * 3);
        assert_eq!(&body.frame()[..3], &[0, 85, 170]);
        assert_eq!(TestFrame::gradient(4, 6, PixelColor::Bgr).unwrap().frame(), body.frame());
    }

    #[test]
    fn empty_frames_are_rejected() {
        assert!(matches!(
            TestFrame::gradient(0, 6, PixelColor::Mono),
            Err(StageError::Config(_))
        ));
    }

    #[test]
    fn raw_file_must_match_geometry() {
        let path = std::env::temp_dir().join(format!("framepipe-frame-{}.raw", std::process::id()));
        fs::write(&path, vec![7u8; 12]).unwrap();

        let body = TestFrame::load(&path, 3, 4, PixelColor::Mono).unwrap();
        assert_eq!(body.frame(), &[7u8; 12][..]);
        assert_eq!(body.origin(), Some(path.as_path()));

        match TestFrame::load(&path, 3, 4, PixelColor::Bgr) {
            Err(StageError::Payload { resource, source }) => {
                assert_eq!(resource, path);
                assert_eq!(source.kind(), io::ErrorKind::InvalidData);
            }
            other => panic!("expected payload error, got {other:?}"),
        }
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_names_the_path() {
        let path = Path::new("/nonexistent/framepipe/test.raw");
        let err = TestFrame::load(path, 1, 1, PixelColor::Mono).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/framepipe/test.raw"));
    }

    #[test]
    fn copies_frame_into_output() {
        let mut body = TestFrame::gradient(2, 2, PixelColor::Mono).unwrap();
        let mut out = [0u8; 4];
        assert!(body.process(Some(&mut out[..])).unwrap());
        assert_eq!(&out[..], body.frame());
        assert!(!body.process(None).unwrap());
        assert!(body.process(Some(&mut [0u8; 3][..])).is_err());
    }
}
