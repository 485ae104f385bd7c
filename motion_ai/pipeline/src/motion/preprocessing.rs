use crate::traits::DetectorError;
use crate::zone::Rect;
use image::{imageops, GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology;
use imageproc::region_labelling::{connected_components, Connectivity};
use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use std::collections::BTreeMap;

/// Converts a crop to grayscale and smooths it so sensor noise does not read as change.
pub fn grayscale_blurred(crop: &RgbImage, sigma: f32) -> GrayImage {
    let gray = imageops::grayscale(crop);
    gaussian_blur_f32(&gray, sigma)
}

/// Binary mask (0/255) of the pixels whose absolute difference exceeds `cutoff`.
pub fn threshold_difference(
    current: &GrayImage,
    previous: &GrayImage,
    cutoff: u8,
) -> Result<GrayImage, DetectorError> {
    if current.dimensions() != previous.dimensions() {
        return Err(DetectorError::ShapeMismatch {
            expected: previous.dimensions(),
            actual: current.dimensions(),
        });
    }

    let mask: Vec<u8> = current
        .as_raw()
        .par_iter()
        .zip(previous.as_raw().par_iter())
        .map(|(&c, &p)| if c.abs_diff(p) > cutoff { 255 } else { 0 })
        .collect();

    let (width, height) = current.dimensions();
    GrayImage::from_raw(width, height, mask)
        .ok_or_else(|| DetectorError::Buffer("difference mask has the wrong length".into()))
}

/// Removes speckle, fills small holes, then grows what is left.
///
/// Open and close use a square element of side `2 * radius + 1`; the same element
/// is used for each of the `dilations` rounds of dilation.
pub fn clean_mask(mask: &GrayImage, radius: u8, dilations: usize) -> GrayImage {
    let opened = morphology::open(mask, Norm::LInf, radius);
    let closed = morphology::close(&opened, Norm::LInf, radius);
    (0..dilations).fold(closed, |m, _| morphology::dilate(&m, Norm::LInf, radius))
}

/// One 8-connected region of foreground pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blob {
    pub area: u64,
    pub bounds: Rect,
}

/// Labels the foreground of `mask` and returns each region's area and bounding box,
/// ordered by label.
pub fn find_blobs(mask: &GrayImage) -> Vec<Blob> {
    // Eight-way connectivity, so diagonal neighbours join the same region
    let labeled = connected_components(mask, Connectivity::Eight, Luma([0u8]));

    // label -> (area, min_x, min_y, max_x, max_y)
    let mut extents: BTreeMap<u32, (u64, u32, u32, u32, u32)> = BTreeMap::new();
    for (x, y, pixel) in labeled.enumerate_pixels() {
        let label = pixel.0[0];
        if label == 0 {
            continue;
        }
        let entry = extents.entry(label).or_insert((0, x, y, x, y));
        entry.0 += 1;
        entry.1 = entry.1.min(x);
        entry.2 = entry.2.min(y);
        entry.3 = entry.3.max(x);
        entry.4 = entry.4.max(y);
    }

    extents
        .into_values()
        .map(|(area, min_x, min_y, max_x, max_y)| Blob {
            area,
            bounds: Rect {
                x: min_x,
                y: min_y,
                width: max_x - min_x + 1,
                height: max_y - min_y + 1,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(mask: &mut GrayImage, x0: u32, y0: u32, side: u32) {
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
    }

    #[test]
    fn blobs_report_area_and_bounds() {
        let mut mask = GrayImage::new(100, 100);
        square(&mut mask, 10, 10, 5);
        square(&mut mask, 50, 60, 20);

        let blobs = find_blobs(&mask);
        assert_eq!(blobs.len(), 2);

        let mut areas: Vec<u64> = blobs.iter().map(|b| b.area).collect();
        areas.sort();
        assert_eq!(areas, vec![25, 400]);

        let big = blobs.iter().find(|b| b.area == 400).unwrap();
        assert_eq!(
            big.bounds,
            Rect {
                x: 50,
                y: 60,
                width: 20,
                height: 20
            }
        );
    }

    #[test]
    fn diagonal_pixels_form_one_blob() {
        let mut mask = GrayImage::new(10, 10);
        mask.put_pixel(2, 2, Luma([255]));
        mask.put_pixel(3, 3, Luma([255]));
        assert_eq!(find_blobs(&mask).len(), 1);
    }

    #[test]
    fn difference_threshold_is_strict() {
        let previous = GrayImage::from_pixel(4, 1, Luma([100]));
        let current = GrayImage::from_raw(4, 1, vec![100, 130, 131, 60]).unwrap();

        let mask = threshold_difference(&current, &previous, 30).unwrap();
        assert_eq!(mask.as_raw(), &vec![0, 0, 255, 255]);
    }

    #[test]
    fn difference_rejects_mismatched_shapes() {
        let previous = GrayImage::new(4, 4);
        let current = GrayImage::new(4, 5);
        assert!(matches!(
            threshold_difference(&current, &previous, 30),
            Err(DetectorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn cleaning_drops_isolated_pixels() {
        let mut mask = GrayImage::new(60, 60);
        mask.put_pixel(5, 5, Luma([255]));
        square(&mut mask, 20, 20, 12);

        let cleaned = clean_mask(&mask, 2, 2);
        assert_eq!(cleaned.get_pixel(5, 5).0[0], 0);

        let blobs = find_blobs(&cleaned);
        assert_eq!(blobs.len(), 1);
        // 12x12 survives the open and grows by 2 px per side on each dilation.
        assert_eq!(blobs[0].area, 20 * 20);
    }
}
