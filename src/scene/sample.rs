//! Sample-time interval lookup shared by every channel read path.

/// Snap tolerance: interpolation fractions this close to an exact sample
/// collapse onto it, so reads at stored times return stored values.
const SNAP_EPSILON: f64 = 1e-9;

/// Locate `time` within an ascending sample-time vector.
///
/// Returns `(floor, ceil, x)`: `x == 0` means the floor sample applies
/// exactly, `x == 1` the ceil sample; anything between calls for
/// interpolation. Times before the first or after the last sample clamp
/// to it.
pub(crate) fn sample_interval(times: &[f64], time: f64) -> (usize, usize, f64) {
    if times.is_empty() {
        return (0, 0, 0.0);
    }
    if time <= times[0] {
        return (0, 0, 0.0);
    }
    let last = times.len() - 1;
    if time >= times[last] {
        return (last, last, 0.0);
    }
    // Linear scan; channel sample vectors are short and the scan is
    // branch-predictable.
    let mut ceil = 1;
    while times[ceil] < time {
        ceil += 1;
    }
    let floor = ceil - 1;
    let span = times[ceil] - times[floor];
    let mut x = (time - times[floor]) / span;
    if x < SNAP_EPSILON {
        x = 0.0;
    } else if x > 1.0 - SNAP_EPSILON {
        x = 1.0;
    }
    if x == 0.0 {
        (floor, floor, 0.0)
    } else if x == 1.0 {
        (ceil, ceil, 0.0)
    } else {
        (floor, ceil, x)
    }
}
