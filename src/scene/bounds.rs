//! Bounding-box propagation across an animated hierarchy.
//!
//! When a location has no explicitly written bound channel, its bound is
//! computed at finalize time by merging, over time, the bounds of its
//! object samples and of each child (transformed by that child's
//! transform samples). All series are treated as held before their first
//! and after their last sample, and linearly interpolated between
//! samples; the merged result at any time is the union of both series
//! evaluated at that time, so linear interpolation of the merged samples
//! never under-covers either input.

use glam::DVec3;

use crate::util::{lerp_matrix, Box3d, DMat4};

/// Interpolation fractions probed per interval by the conservative
/// expansion step. The midpoint captures the worst case of a quadratic
/// trajectory; the outer fractions cover corner-dominance switches.
const EXPANSION_FRACTIONS: [f64; 5] = [0.1, 0.25, 0.5, 0.75, 0.9];

/// Interpolate between two boxes, holding across empty endpoints.
fn lerp_box(a: &Box3d, b: &Box3d, x: f64) -> Box3d {
    if a.is_empty() {
        *b
    } else if b.is_empty() {
        *a
    } else {
        Box3d::lerp(a, b, x)
    }
}

/// Evaluate a box series at `t`: held outside the sampled range,
/// interpolated inside it.
pub(crate) fn sample_box_series(times: &[f64], boxes: &[Box3d], t: f64) -> Box3d {
    debug_assert_eq!(times.len(), boxes.len());
    if times.is_empty() {
        return Box3d::EMPTY;
    }
    if t <= times[0] {
        return boxes[0];
    }
    let last = times.len() - 1;
    if t >= times[last] {
        return boxes[last];
    }
    let mut ceil = 1;
    while times[ceil] < t {
        ceil += 1;
    }
    let floor = ceil - 1;
    let x = (t - times[floor]) / (times[ceil] - times[floor]);
    lerp_box(&boxes[floor], &boxes[ceil], x)
}

/// Evaluate a matrix series at `t`, identity when the series is empty.
pub(crate) fn sample_matrix_series(times: &[f64], matrices: &[DMat4], t: f64) -> DMat4 {
    debug_assert_eq!(times.len(), matrices.len());
    if times.is_empty() {
        return DMat4::IDENTITY;
    }
    if t <= times[0] {
        return matrices[0];
    }
    let last = times.len() - 1;
    if t >= times[last] {
        return matrices[last];
    }
    let mut ceil = 1;
    while times[ceil] < t {
        ceil += 1;
    }
    let floor = ceil - 1;
    let x = (t - times[floor]) / (times[ceil] - times[floor]);
    lerp_matrix(&matrices[floor], &matrices[ceil], x)
}

/// Merge two ascending time vectors, dropping exact duplicates.
fn union_times(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        let next = match (a.get(i), b.get(j)) {
            (Some(&x), Some(&y)) => {
                if x < y {
                    i += 1;
                    x
                } else if y < x {
                    j += 1;
                    y
                } else {
                    i += 1;
                    j += 1;
                    x
                }
            }
            (Some(&x), None) => {
                i += 1;
                x
            }
            (None, Some(&y)) => {
                j += 1;
                y
            }
            (None, None) => break,
        };
        out.push(next);
    }
    out
}

/// Merge a new box series into an accumulated one.
///
/// The result samples the union of both time sets; at each time the box
/// is the union of both series evaluated there. Sample times earlier or
/// later than a series' range see that series' first or last box held,
/// which covers the four ordered phases of the merge: pre-extrapolate,
/// prepend, mix and append/post-extrapolate.
pub(crate) fn merge_box_samples(
    acc_times: &mut Vec<f64>,
    acc_boxes: &mut Vec<Box3d>,
    new_times: &[f64],
    new_boxes: &[Box3d],
) {
    debug_assert_eq!(new_times.len(), new_boxes.len());
    if new_times.is_empty() {
        return;
    }
    if acc_times.is_empty() {
        acc_times.extend_from_slice(new_times);
        acc_boxes.extend_from_slice(new_boxes);
        return;
    }

    let merged_times = union_times(acc_times, new_times);
    let merged_boxes: Vec<Box3d> = merged_times
        .iter()
        .map(|&t| {
            sample_box_series(acc_times, acc_boxes, t)
                .union(&sample_box_series(new_times, new_boxes, t))
        })
        .collect();

    *acc_times = merged_times;
    *acc_boxes = merged_boxes;
}

/// Compute the bound samples a child contributes to its parent: the
/// child's own bound series carried through its transform series.
///
/// With an animated transform the stored samples are additionally run
/// through a conservative expansion so that linear interpolation of the
/// stored samples contains the true (non-linear, rotation-swept)
/// trajectory between them.
pub(crate) fn transformed_child_samples(
    bound_times: &[f64],
    bound_boxes: &[Box3d],
    transform_times: &[f64],
    transform_samples: &[DMat4],
) -> (Vec<f64>, Vec<Box3d>) {
    if bound_times.is_empty() && transform_times.is_empty() {
        return (Vec::new(), Vec::new());
    }

    match transform_samples.len() {
        0 => (bound_times.to_vec(), bound_boxes.to_vec()),
        1 => {
            // A constant transform applies to every bound sample. A child
            // with no bound samples contributes nothing.
            let m = &transform_samples[0];
            (
                bound_times.to_vec(),
                bound_boxes.iter().map(|b| b.transformed(m)).collect(),
            )
        }
        _ => {
            let times = union_times(bound_times, transform_times);
            let mut boxes: Vec<Box3d> = times
                .iter()
                .map(|&t| {
                    sample_box_series(bound_times, bound_boxes, t)
                        .transformed(&sample_matrix_series(transform_times, transform_samples, t))
                })
                .collect();
            expand_for_interpolation(
                &times,
                &mut boxes,
                bound_times,
                bound_boxes,
                transform_times,
                transform_samples,
            );
            (times, boxes)
        }
    }
}

/// Enlarge stored samples so linear interpolation between them contains
/// the true transformed trajectory.
///
/// For each adjacent pair of stored samples, the true box (interpolated
/// bound carried through the interpolated transform) is probed at several
/// fractions; wherever it exceeds the linear interpolation of the stored
/// endpoints, both endpoints grow by the worst-case excess.
fn expand_for_interpolation(
    times: &[f64],
    boxes: &mut [Box3d],
    bound_times: &[f64],
    bound_boxes: &[Box3d],
    transform_times: &[f64],
    transform_samples: &[DMat4],
) {
    for i in 0..times.len().saturating_sub(1) {
        if boxes[i].is_empty() || boxes[i + 1].is_empty() {
            continue;
        }
        let (t0, t1) = (times[i], times[i + 1]);
        let mut grow_min = DVec3::ZERO;
        let mut grow_max = DVec3::ZERO;
        for &f in &EXPANSION_FRACTIONS {
            let t = t0 + (t1 - t0) * f;
            let true_box = sample_box_series(bound_times, bound_boxes, t)
                .transformed(&sample_matrix_series(transform_times, transform_samples, t));
            if true_box.is_empty() {
                continue;
            }
            let lin = Box3d::lerp(&boxes[i], &boxes[i + 1], f);
            grow_min = grow_min.max((lin.min - true_box.min).max(DVec3::ZERO));
            grow_max = grow_max.max((true_box.max - lin.max).max(DVec3::ZERO));
        }
        if grow_min != DVec3::ZERO || grow_max != DVec3::ZERO {
            boxes[i].min -= grow_min;
            boxes[i].max += grow_max;
            boxes[i + 1].min -= grow_min;
            boxes[i + 1].max += grow_max;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> Box3d {
        Box3d::new(DVec3::splat(-0.5), DVec3::splat(0.5))
    }

    #[test]
    fn test_merge_into_empty() {
        let mut times = Vec::new();
        let mut boxes = Vec::new();
        merge_box_samples(&mut times, &mut boxes, &[1.0, 2.0], &[unit_box(), unit_box()]);
        assert_eq!(times, vec![1.0, 2.0]);
        assert_eq!(boxes.len(), 2);
    }

    #[test]
    fn test_merge_exact_match_unions() {
        let a = Box3d::new(DVec3::splat(-1.0), DVec3::splat(0.0));
        let b = Box3d::new(DVec3::splat(0.0), DVec3::splat(1.0));
        let mut times = vec![0.0, 1.0];
        let mut boxes = vec![a, a];
        merge_box_samples(&mut times, &mut boxes, &[0.0, 1.0], &[b, b]);
        assert_eq!(times, vec![0.0, 1.0]);
        for bx in &boxes {
            assert_eq!(*bx, a.union(&b));
        }
    }

    #[test]
    fn test_merge_prepend_and_append_hold() {
        let small = unit_box();
        let big = Box3d::new(DVec3::splat(-2.0), DVec3::splat(2.0));
        let mut times = vec![1.0];
        let mut boxes = vec![small];
        merge_box_samples(&mut times, &mut boxes, &[0.0, 2.0], &[big, big]);
        assert_eq!(times, vec![0.0, 1.0, 2.0]);
        // The held accumulated box is unioned outside its range, and the
        // held new box is unioned at the accumulated sample.
        assert_eq!(boxes[0], big.union(&small));
        assert_eq!(boxes[1], big.union(&small));
        assert_eq!(boxes[2], big.union(&small));
    }

    #[test]
    fn test_merge_interleaved_interpolates() {
        let zero = Box3d::new(DVec3::ZERO, DVec3::ZERO);
        let two = Box3d::new(DVec3::ZERO, DVec3::splat(2.0));
        // New series grows from 0 to 2 across [0, 2]; at the accumulated
        // sample at t=1 it contributes its midpoint, extent 1.
        let mut times = vec![1.0];
        let mut boxes = vec![zero];
        merge_box_samples(&mut times, &mut boxes, &[0.0, 2.0], &[zero, two]);
        assert_eq!(times, vec![0.0, 1.0, 2.0]);
        assert!((boxes[1].max.x - 1.0).abs() < 1e-12);
        assert_eq!(boxes[2].max, DVec3::splat(2.0));
    }

    #[test]
    fn test_static_transform_applies() {
        let m = DMat4::from_translation(DVec3::new(5.0, 0.0, 0.0));
        let (times, boxes) =
            transformed_child_samples(&[0.0], &[unit_box()], &[0.0], &[m]);
        assert_eq!(times, vec![0.0]);
        assert!((boxes[0].center().x - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_transform_passthrough() {
        let (times, boxes) = transformed_child_samples(&[0.0, 1.0], &[unit_box(); 2], &[], &[]);
        assert_eq!(times, vec![0.0, 1.0]);
        assert_eq!(boxes[0], unit_box());
    }

    #[test]
    fn test_animated_rotation_containment() {
        // Unit box swinging 90 degrees about Z between t=0 and t=1. The
        // stored samples must contain the true transformed box at any
        // interpolated time.
        let bound_times = [0.0, 1.0];
        let bound_boxes = [unit_box(), unit_box()];
        let transform_times = [0.0, 1.0];
        let transforms = [
            DMat4::IDENTITY,
            DMat4::from_rotation_z(std::f64::consts::FRAC_PI_2),
        ];
        let (times, boxes) = transformed_child_samples(
            &bound_times,
            &bound_boxes,
            &transform_times,
            &transforms,
        );
        assert_eq!(times, vec![0.0, 1.0]);
        for &f in &EXPANSION_FRACTIONS {
            let t = f;
            let true_box = sample_box_series(&bound_times, &bound_boxes, t)
                .transformed(&sample_matrix_series(&transform_times, &transforms, t));
            // Linear interpolation of the stored samples, as a downstream
            // consumer would do.
            let stored = sample_box_series(&times, &boxes, t);
            assert!(
                stored.contains_box(&true_box, 1e-9),
                "at t={t}: {stored:?} misses {true_box:?}"
            );
        }
    }

    #[test]
    fn test_animated_translation_needs_no_expansion() {
        // A pure translation interpolates linearly, so the stored endpoint
        // boxes match the true trajectory exactly.
        let transforms = [
            DMat4::IDENTITY,
            DMat4::from_translation(DVec3::new(4.0, 0.0, 0.0)),
        ];
        let (times, boxes) = transformed_child_samples(
            &[0.0, 1.0],
            &[unit_box(), unit_box()],
            &[0.0, 1.0],
            &transforms,
        );
        assert_eq!(times, vec![0.0, 1.0]);
        assert!((boxes[0].center().x).abs() < 1e-9);
        assert!((boxes[1].center().x - 4.0).abs() < 1e-9);
    }
}
