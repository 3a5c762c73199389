//! Stock preprocessing steps.

use image::{GenericImageView, imageops::FilterType};
use ndarray::{ArrayD, IxDyn};

use crate::{
    callback::{CallbackError, Transform},
    payload::{ArrayError, NdArray, Payload},
};

/// Decodes image bytes into a `(1, height, width, 3)` float array of RGB
/// intensities in `0..=255`, resizing to the requested dimensions.
#[derive(Clone, Copy, Debug)]
pub struct ImageBytes {
    height: u32,
    width: u32,
}

impl ImageBytes {
    pub fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }
}

impl Transform for ImageBytes {
    fn apply(&self, input: Payload) -> Result<Payload, CallbackError> {
        let bytes = match input {
            Payload::Bytes(bytes) => bytes,
            other => {
                return Err(CallbackError::UnexpectedPayload {
                    expected: "bytes",
                    found: other.kind(),
                });
            }
        };

        let mut decoded = image::load_from_memory(&bytes)?;
        if decoded.dimensions() != (self.width, self.height) {
            decoded = decoded.resize_exact(self.width, self.height, FilterType::CatmullRom);
        }
        let rgb = decoded.into_rgb8();
        let data: Vec<f64> = rgb.into_raw().into_iter().map(f64::from).collect();
        let shape = [1, self.height as usize, self.width as usize, 3];
        let array = ArrayD::from_shape_vec(IxDyn(&shape), data).map_err(ArrayError::from)?;
        Ok(Payload::Array(NdArray::Float(array)))
    }
}

/// Multiplies every element of a numeric array by a constant, e.g. `1/255`.
#[derive(Clone, Copy, Debug)]
pub struct Scale(pub f64);

impl Transform for Scale {
    fn apply(&self, input: Payload) -> Result<Payload, CallbackError> {
        let array = match input {
            Payload::Array(array) => array.to_f64()?,
            other => {
                return Err(CallbackError::UnexpectedPayload {
                    expected: "array",
                    found: other.kind(),
                });
            }
        };
        let factor = self.0;
        Ok(Payload::Array(NdArray::Float(array.mapv(|value| value * factor))))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use ndarray::arr1;

    use super::*;

    fn png(width: u32, height: u32, pixel: [u8; 3]) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb(pixel));
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    #[test]
    fn image_bytes_resize_to_requested_shape() {
        for (height, width) in [(224, 224), (128, 96)] {
            let payload = ImageBytes::new(height, width)
                .apply(Payload::bytes(png(40, 30, [10, 20, 30])))
                .unwrap();
            let array = payload.as_array().unwrap();
            assert_eq!(array.shape(), &[1, height as usize, width as usize, 3]);
        }
    }

    #[test]
    fn image_bytes_keep_channel_order() {
        let payload = ImageBytes::new(2, 2)
            .apply(Payload::bytes(png(2, 2, [10, 20, 30])))
            .unwrap();
        let NdArray::Float(array) = payload.as_array().unwrap() else {
            panic!("expected float array");
        };
        assert_eq!(array[&[0, 1, 1, 0][..]], 10.0);
        assert_eq!(array[&[0, 1, 1, 2][..]], 30.0);
    }

    #[test]
    fn image_bytes_reject_garbage() {
        let err = ImageBytes::new(8, 8)
            .apply(Payload::bytes(b"not an image".to_vec()))
            .unwrap_err();
        assert_eq!(err.kind(), "ImageError");
    }

    #[test]
    fn image_bytes_need_bytes() {
        let err = ImageBytes::new(8, 8)
            .apply(Payload::from("text"))
            .unwrap_err();
        assert_eq!(err.kind(), "UnexpectedPayload");
    }

    #[test]
    fn scale_multiplies_elements() {
        let payload = Scale(0.5)
            .apply(Payload::from(arr1(&[2_i64, 4]).into_dyn()))
            .unwrap();
        assert_eq!(
            payload.as_array(),
            Some(&NdArray::Float(arr1(&[1.0, 2.0]).into_dyn()))
        );
    }
}
