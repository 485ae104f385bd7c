use crate::traits::DetectorError;
use image::GrayImage;
use ndarray::{Array2, Zip};

/// Running-average background of one zone.
///
/// Slow global changes (daylight, auto exposure) fold into the model instead of
/// showing up as foreground.
#[derive(Clone)]
pub struct BackgroundModel {
    background: Array2<f32>,
    width: u32,
    height: u32,
}

impl BackgroundModel {
    /// Seeds the model with the first frame.
    pub fn new(initial_frame: &GrayImage) -> Result<Self, DetectorError> {
        let (width, height) = initial_frame.dimensions();
        Ok(BackgroundModel {
            background: to_array(initial_frame)?,
            width,
            height,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Returns the foreground mask of `frame` against the model, then blends
    /// `frame` into the model with weight `alpha`.
    pub fn apply(
        &mut self,
        frame: &GrayImage,
        alpha: f32,
        cutoff: u8,
    ) -> Result<GrayImage, DetectorError> {
        if frame.dimensions() != self.dimensions() {
            return Err(DetectorError::ShapeMismatch {
                expected: self.dimensions(),
                actual: frame.dimensions(),
            });
        }

        let frame_array = to_array(frame)?;

        // diff = abs(frame - background)
        let mut diff = frame_array.clone();
        Zip::from(&mut diff)
            .and(&self.background)
            .par_for_each(|d, &bg| {
                *d = (*d - bg).abs();
            });

        Zip::from(&mut self.background)
            .and(&frame_array)
            .par_for_each(|bg, &fa| {
                *bg = fa * alpha + *bg * (1.0 - alpha);
            });

        let cutoff = cutoff as f32;
        let mask: Vec<u8> = diff
            .iter()
            .map(|&v| if v > cutoff { 255 } else { 0 })
            .collect();

        GrayImage::from_raw(self.width, self.height, mask)
            .ok_or_else(|| DetectorError::Buffer("foreground mask has the wrong length".into()))
    }
}

fn to_array(image: &GrayImage) -> Result<Array2<f32>, DetectorError> {
    let (width, height) = image.dimensions();
    let values: Vec<f32> = image.as_raw().iter().map(|&p| p as f32).collect();
    Array2::from_shape_vec((height as usize, width as usize), values)
        .map_err(|e| DetectorError::Buffer(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn new_object_is_foreground_until_absorbed() {
        let empty = GrayImage::from_pixel(8, 8, Luma([50]));
        let mut model = BackgroundModel::new(&empty).unwrap();

        let mut with_object = empty.clone();
        with_object.put_pixel(3, 3, Luma([200]));

        let mask = model.apply(&with_object, 0.5, 25).unwrap();
        assert_eq!(mask.get_pixel(3, 3).0[0], 255);
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);

        // After enough updates the object becomes part of the background.
        let mut last = mask;
        for _ in 0..10 {
            last = model.apply(&with_object, 0.5, 25).unwrap();
        }
        assert_eq!(last.get_pixel(3, 3).0[0], 0);
    }

    #[test]
    fn resized_input_is_rejected() {
        let mut model = BackgroundModel::new(&GrayImage::new(8, 8)).unwrap();
        assert!(model.apply(&GrayImage::new(8, 9), 0.05, 25).is_err());
    }
}
