//! Viridis colormap.
//!
//! Piecewise-linear interpolation between anchor colors sampled from the
//! standard viridis table. Close enough for distance shading; not a
//! byte-exact reproduction of the 256-entry table.

use crate::cloud::Rgb;

const VIRIDIS: [(f64, [f64; 3]); 10] = [
    (0.0, [0.267004, 0.004874, 0.329415]),
    (0.125, [0.282623, 0.140926, 0.457517]),
    (0.25, [0.253935, 0.265254, 0.529983]),
    (0.375, [0.206756, 0.371758, 0.553117]),
    (0.5, [0.163625, 0.471133, 0.558148]),
    (0.625, [0.127568, 0.566949, 0.550556]),
    (0.75, [0.134692, 0.658636, 0.517649]),
    (0.875, [0.266941, 0.748751, 0.440573]),
    (0.9375, [0.565498, 0.842430, 0.262877]),
    (1.0, [0.993248, 0.906157, 0.143936]),
];

/// Map `t` (clamped to `[0, 1]`; NaN counts as 0) to a viridis color.
pub fn viridis(t: f64) -> Rgb {
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    for pair in VIRIDIS.windows(2) {
        let (t0, c0) = pair[0];
        let (t1, c1) = pair[1];
        if t <= t1 {
            let f = (t - t0) / (t1 - t0);
            let lerp = |i: usize| c0[i] + (c1[i] - c0[i]) * f;
            return Rgb::new(lerp(0), lerp(1), lerp(2));
        }
    }
    let [r, g, b] = VIRIDIS[VIRIDIS.len() - 1].1;
    Rgb::new(r, g, b)
}
