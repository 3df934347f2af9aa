//! Beat-by-beat comparison of detected peaks against reference annotations.

use serde::Serialize;

/// Matching summary between reference and detected beat positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Agreement {
    pub reference: usize,
    pub detected: usize,
    pub matched: usize,
    pub tolerance_samples: usize,
    /// matched / reference; `None` without reference beats.
    pub sensitivity: Option<f64>,
    /// matched / detected; `None` without detections.
    pub ppv: Option<f64>,
}

/// Count one-to-one matches between reference beats and detections within
/// `tol` samples. Candidate pairs are taken nearest first, and each detection
/// and each reference beat is used at most once. Both slices must be sorted
/// ascending.
pub fn count_matches(reference: &[usize], detected: &[usize], tol: usize) -> usize {
    let mut pairs: Vec<(usize, usize, usize)> = Vec::new();
    for (r, &ann) in reference.iter().enumerate() {
        let start = detected.partition_point(|&d| d + tol < ann);
        for (offset, &d) in detected[start..].iter().enumerate() {
            if d > ann + tol {
                break;
            }
            pairs.push((d.abs_diff(ann), r, start + offset));
        }
    }
    pairs.sort_unstable();

    let mut ref_used = vec![false; reference.len()];
    let mut det_used = vec![false; detected.len()];
    let mut matches = 0;
    for (_, r, d) in pairs {
        if !ref_used[r] && !det_used[d] {
            ref_used[r] = true;
            det_used[d] = true;
            matches += 1;
        }
    }
    matches
}

pub fn agreement(reference: &[usize], detected: &[usize], tol: usize) -> Agreement {
    let matched = count_matches(reference, detected, tol);
    let ratio = |n: usize| (n > 0).then(|| matched as f64 / n as f64);
    Agreement {
        reference: reference.len(),
        detected: detected.len(),
        matched,
        tolerance_samples: tol,
        sensitivity: ratio(reference.len()),
        ppv: ratio(detected.len()),
    }
}
