use crate::traits::{DetectorError, PresenceDetector};
use crate::zone::Rect;
use image::RgbImage;

/// Runs two detectors on the same crop and concatenates their boxes, dropping
/// any box from the second that overlaps one already found.
pub struct CombinedPresenceDetector<A, B> {
    first: A,
    second: B,
}

impl<A: PresenceDetector, B: PresenceDetector> CombinedPresenceDetector<A, B> {
    pub fn new(first: A, second: B) -> Self {
        CombinedPresenceDetector { first, second }
    }
}

impl<A: PresenceDetector, B: PresenceDetector> PresenceDetector for CombinedPresenceDetector<A, B> {
    fn detect(&mut self, crop: &RgbImage) -> Result<Vec<Rect>, DetectorError> {
        let mut boxes = self.first.detect(crop)?;
        for candidate in self.second.detect(crop)? {
            if !boxes.iter().any(|b| b.overlaps(&candidate)) {
                boxes.push(candidate);
            }
        }
        Ok(boxes)
    }

    fn reset(&mut self) {
        self.first.reset();
        self.second.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Rect>, usize);

    impl PresenceDetector for Fixed {
        fn detect(&mut self, _crop: &RgbImage) -> Result<Vec<Rect>, DetectorError> {
            Ok(self.0.clone())
        }

        fn reset(&mut self) {
            self.1 += 1;
        }
    }

    fn rect(x: u32, y: u32, width: u32, height: u32) -> Rect {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn overlapping_second_boxes_are_dropped() {
        let mut combined = CombinedPresenceDetector::new(
            Fixed(vec![rect(0, 0, 20, 40)], 0),
            Fixed(vec![rect(10, 10, 20, 20), rect(100, 0, 20, 20)], 0),
        );

        let boxes = combined.detect(&RgbImage::new(200, 100)).unwrap();
        assert_eq!(boxes, vec![rect(0, 0, 20, 40), rect(100, 0, 20, 20)]);
    }

    #[test]
    fn reset_reaches_both() {
        let mut combined = CombinedPresenceDetector::new(Fixed(vec![], 0), Fixed(vec![], 0));
        combined.reset();
        assert_eq!((combined.first.1, combined.second.1), (1, 1));
    }
}
