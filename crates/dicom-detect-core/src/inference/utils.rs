//! Shared inference utilities.

/// Sigmoid activation function.
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// A scored box `[x_min, y_min, x_max, y_max]` awaiting suppression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Corner-format box.
    pub bbox: [f32; 4],
    /// Detection confidence.
    pub score: f32,
}

/// Intersection over Union for two corner-format boxes.
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);

    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);

    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Greedy non-maximum suppression.
///
/// Keeps at most `max_keep` candidates in descending score order, dropping
/// any whose IoU with an already kept box reaches `threshold`.
pub fn nms(mut candidates: Vec<Candidate>, threshold: f32, max_keep: usize) -> Vec<Candidate> {
    // Sort by score descending (NaN scores treated as equal)
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Candidate> = Vec::new();

    for candidate in candidates {
        if keep.len() >= max_keep {
            break;
        }
        if keep
            .iter()
            .all(|kept| iou(&kept.bbox, &candidate.bbox) < threshold)
        {
            keep.push(candidate);
        }
    }

    keep
}
