use std::cmp::Ordering;

use crate::frame::Detection;

/// Greedy non-maximum suppression.
///
/// Sorts by confidence (highest first) and drops every detection whose box
/// overlaps an already kept detection of the same label by more than
/// `iou_threshold`.
pub fn non_max_suppression(detections: &mut Vec<Detection>, iou_threshold: f32) {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept = 0;
    for index in 0..detections.len() {
        let suppressed = (0..kept).any(|prev| {
            detections[prev].label == detections[index].label
                && detections[prev].bbox.iou(&detections[index].bbox) > iou_threshold
        });
        if !suppressed {
            detections.swap(kept, index);
            kept += 1;
        }
    }
    detections.truncate(kept);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::BoundingBox;

    #[test]
    fn overlapping_same_label_is_suppressed() {
        let mut dets = vec![
            Detection::new("dog", 0.6, BoundingBox::new(0.0, 0.0, 10.0, 10.0)),
            Detection::new("dog", 0.9, BoundingBox::new(1.0, 1.0, 10.0, 10.0)),
            Detection::new("cat", 0.5, BoundingBox::new(1.0, 1.0, 10.0, 10.0)),
            Detection::new("dog", 0.4, BoundingBox::new(50.0, 50.0, 10.0, 10.0)),
        ];
        non_max_suppression(&mut dets, 0.45);

        let summary: Vec<(&str, f32)> = dets
            .iter()
            .map(|d| (d.label.as_str(), d.confidence))
            .collect();
        assert_eq!(summary, vec![("dog", 0.9), ("cat", 0.5), ("dog", 0.4)]);
    }
}
