//! Raw byte image reader.

use super::catalog::name_components;
use super::{ImageParams, ImageReader, ImageTensor};
use crate::error::{Result, SweepError};
use std::path::Path;

/// Treats a file's bytes as row-major 8-bit samples and copies a
/// `target_height × target_width × channels` window into a float tensor.
///
/// With cropping enabled the window starts at the crop offset of a source
/// image `crop_offset` pixels larger than the target in each dimension.
/// Missing bytes read as zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawImageReader;

impl RawImageReader {
    fn label_index(path: &Path, params: &ImageParams) -> Result<usize> {
        let (_, label) = name_components(path, 0, params.label_position).ok_or_else(|| {
            SweepError::dataset(format!("{}: no label in file name", path.display()))
        })?;
        params
            .class_names
            .iter()
            .position(|c| *c == label)
            .ok_or_else(|| {
                SweepError::dataset(format!(
                    "{}: label '{label}' is not one of {:?}",
                    path.display(),
                    params.class_names
                ))
            })
    }
}

impl ImageReader for RawImageReader {
    fn parse(&self, path: &Path, params: &ImageParams) -> Result<(ImageTensor, usize)> {
        let label = Self::label_index(path, params)?;
        let bytes = std::fs::read(path)?;
        if bytes.is_empty() {
            return Err(SweepError::dataset(format!("{}: empty image", path.display())));
        }

        let (off_h, off_w) = if params.do_crop {
            (params.crop_offset_height, params.crop_offset_width)
        } else {
            (0, 0)
        };
        let source_width = params.target_width + off_w;
        let channels = params.channels.max(1);

        let mut data = Vec::with_capacity(params.target_height * params.target_width * channels);
        for y in 0..params.target_height {
            for x in 0..params.target_width {
                for c in 0..channels {
                    let index = ((y + off_h) * source_width + (x + off_w)) * channels + c;
                    let sample = bytes.get(index).copied().unwrap_or(0);
                    data.push(f32::from(sample) / 255.0);
                }
            }
        }

        Ok((
            ImageTensor {
                height: params.target_height,
                width: params.target_width,
                channels,
                data,
            },
            label,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn params(do_crop: bool) -> ImageParams {
        ImageParams {
            class_names: vec!["healthy".into(), "sick".into()],
            channels: 1,
            do_crop,
            crop_offset_height: 1,
            crop_offset_width: 1,
            target_height: 2,
            target_width: 2,
            label_position: 1,
        }
    }

    #[test]
    fn test_parse_with_and_without_crop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("A_sick_1.raw");
        // 3x3 source image.
        std::fs::write(&path, [0u8, 51, 102, 153, 204, 255, 0, 51, 102]).unwrap();

        let (plain, label) = RawImageReader.parse(&path, &params(false)).unwrap();
        assert_eq!(label, 1);
        assert_eq!(plain.data, vec![0.0, 0.2, 102.0 / 255.0, 0.6]);

        let (cropped, _) = RawImageReader.parse(&path, &params(true)).unwrap();
        assert_eq!(cropped.data, vec![0.8, 1.0, 0.2, 0.4]);
    }

    #[test]
    fn test_unknown_label_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("A_unknown_1.raw");
        std::fs::write(&path, [1u8]).unwrap();
        assert!(RawImageReader.parse(&path, &params(false)).is_err());
    }
}
