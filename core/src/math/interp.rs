//! One-dimensional interpolants used for trace restoration and resampling.

/// Linear interpolation of `(xs, ys)` at `x`, clamped to the end samples.
///
/// `xs` must be strictly increasing and as long as `ys`.
pub fn linear_clamped(xs: &[f64], ys: &[f32], x: f64) -> f32 {
    match xs.len() {
        0 => return f32::NAN,
        1 => return ys[0],
        _ => {}
    }
    if x <= xs[0] {
        return ys[0];
    }
    let last = xs.len() - 1;
    if x >= xs[last] {
        return ys[last];
    }
    let upper = xs.partition_point(|&v| v <= x).min(last);
    let lower = upper - 1;
    let t = (x - xs[lower]) / (xs[upper] - xs[lower]);
    (ys[lower] as f64 + t * (ys[upper] as f64 - ys[lower] as f64)) as f32
}

/// Akima piecewise-cubic interpolant.
///
/// Slopes come from a weighted mean of neighbouring secants, which keeps the
/// curve from oscillating next to flat or abruptly changing stretches.
/// Outside the knot range the end values are held.
#[derive(Debug, Clone)]
pub struct Akima {
    xs: Vec<f32>,
    ys: Vec<f32>,
    slopes: Vec<f32>,
}

impl Akima {
    /// Needs at least two knots with strictly increasing `xs`.
    pub fn new(xs: &[f32], ys: &[f32]) -> Option<Self> {
        let n = xs.len();
        if n < 2 || ys.len() != n || xs.windows(2).any(|w| w[1] <= w[0]) {
            return None;
        }

        let secants: Vec<f32> = (0..n - 1)
            .map(|i| (ys[i + 1] - ys[i]) / (xs[i + 1] - xs[i]))
            .collect();

        let slopes = if n == 2 {
            vec![secants[0]; 2]
        } else {
            // Two extrapolated secants on each side: ext[k + 2] = m_k.
            let mut ext = Vec::with_capacity(n + 3);
            let m0 = secants[0];
            let m1 = secants[1];
            let before = 2.0 * m0 - m1;
            ext.push(2.0 * before - m0);
            ext.push(before);
            ext.extend_from_slice(&secants);
            let last = secants[n - 2];
            let prev = secants[n - 3];
            let after = 2.0 * last - prev;
            ext.push(after);
            ext.push(2.0 * after - last);

            (0..n)
                .map(|i| {
                    let w1 = (ext[i + 3] - ext[i + 2]).abs();
                    let w2 = (ext[i + 1] - ext[i]).abs();
                    if w1 + w2 > f32::EPSILON {
                        (w1 * ext[i + 1] + w2 * ext[i + 2]) / (w1 + w2)
                    } else {
                        0.5 * (ext[i + 1] + ext[i + 2])
                    }
                })
                .collect()
        };

        Some(Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            slopes,
        })
    }

    pub fn evaluate(&self, x: f32) -> f32 {
        let last = self.xs.len() - 1;
        if x <= self.xs[0] {
            return self.ys[0];
        }
        if x >= self.xs[last] {
            return self.ys[last];
        }
        let i = self.xs.partition_point(|&v| v <= x).min(last) - 1;
        hermite(
            self.xs[i],
            self.xs[i + 1],
            self.ys[i],
            self.ys[i + 1],
            self.slopes[i],
            self.slopes[i + 1],
            x,
        )
    }
}

fn hermite(x0: f32, x1: f32, y0: f32, y1: f32, d0: f32, d1: f32, x: f32) -> f32 {
    let h = x1 - x0;
    let s = (x - x0) / h;
    let s2 = s * s;
    let s3 = s2 * s;
    let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
    let h10 = s3 - 2.0 * s2 + s;
    let h01 = -2.0 * s3 + 3.0 * s2;
    let h11 = s3 - s2;
    h00 * y0 + h10 * h * d0 + h01 * y1 + h11 * h * d1
}

/// Natural cubic spline, extended linearly beyond its end knots.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    xs: Vec<f32>,
    ys: Vec<f32>,
    second: Vec<f32>,
}

impl CubicSpline {
    /// Needs at least three knots with strictly increasing `xs`.
    pub fn natural(xs: &[f32], ys: &[f32]) -> Option<Self> {
        let n = xs.len();
        if n < 3 || ys.len() != n || xs.windows(2).any(|w| w[1] <= w[0]) {
            return None;
        }

        // Tridiagonal system for the interior second derivatives (Thomas algorithm).
        let mut second = vec![0.0f32; n];
        let mut diag = vec![0.0f32; n];
        let mut rhs = vec![0.0f32; n];
        for i in 1..n - 1 {
            let h0 = xs[i] - xs[i - 1];
            let h1 = xs[i + 1] - xs[i];
            diag[i] = 2.0 * (h0 + h1);
            rhs[i] = 6.0 * ((ys[i + 1] - ys[i]) / h1 - (ys[i] - ys[i - 1]) / h0);
        }
        for i in 2..n - 1 {
            let h0 = xs[i] - xs[i - 1];
            let factor = h0 / diag[i - 1];
            diag[i] -= factor * h0;
            rhs[i] -= factor * rhs[i - 1];
        }
        for i in (1..n - 1).rev() {
            let h1 = xs[i + 1] - xs[i];
            second[i] = (rhs[i] - h1 * second[i + 1]) / diag[i];
        }

        Some(Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            second,
        })
    }

    pub fn evaluate(&self, x: f32) -> f32 {
        let last = self.xs.len() - 1;
        if x < self.xs[0] {
            return self.ys[0] + self.end_slope(0) * (x - self.xs[0]);
        }
        if x > self.xs[last] {
            return self.ys[last] + self.end_slope(last - 1) * (x - self.xs[last]);
        }
        let i = self.xs.partition_point(|&v| v <= x).clamp(1, last) - 1;
        self.segment(i, x)
    }

    fn segment(&self, i: usize, x: f32) -> f32 {
        let h = self.xs[i + 1] - self.xs[i];
        let a = (self.xs[i + 1] - x) / h;
        let b = (x - self.xs[i]) / h;
        a * self.ys[i]
            + b * self.ys[i + 1]
            + ((a * a * a - a) * self.second[i] + (b * b * b - b) * self.second[i + 1]) * h * h
                / 6.0
    }

    /// First derivative at the outer knot of end segment `i`.
    fn end_slope(&self, i: usize) -> f32 {
        let h = self.xs[i + 1] - self.xs[i];
        let secant = (self.ys[i + 1] - self.ys[i]) / h;
        if i == 0 {
            secant - h * (2.0 * self.second[0] + self.second[1]) / 6.0
        } else {
            secant + h * (self.second[i] + 2.0 * self.second[i + 1]) / 6.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_clamped_holds_ends() {
        let xs = [0.0, 1.0, 3.0];
        let ys = [0.0, 2.0, 6.0];
        assert_eq!(linear_clamped(&xs, &ys, -1.0), 0.0);
        assert_eq!(linear_clamped(&xs, &ys, 0.5), 1.0);
        assert_eq!(linear_clamped(&xs, &ys, 2.0), 4.0);
        assert_eq!(linear_clamped(&xs, &ys, 3.0), 6.0);
        assert_eq!(linear_clamped(&xs, &ys, 10.0), 6.0);
    }

    #[test]
    fn akima_passes_through_knots() {
        let xs = [0.0, 1.0, 2.0, 4.0, 5.0];
        let ys = [1.0, 3.0, 2.0, 2.0, 0.0];
        let akima = Akima::new(&xs, &ys).unwrap();
        for (x, y) in xs.iter().zip(&ys) {
            assert!((akima.evaluate(*x) - y).abs() < 1e-6);
        }
    }

    #[test]
    fn akima_reproduces_straight_lines() {
        let xs = [0.0, 1.0, 3.0, 4.0, 7.0];
        let ys: Vec<f32> = xs.iter().map(|x| 2.0 * x - 1.0).collect();
        let akima = Akima::new(&xs, &ys).unwrap();
        for x in [0.5f32, 2.0, 5.5] {
            assert!((akima.evaluate(x) - (2.0 * x - 1.0)).abs() < 1e-5);
        }
    }

    #[test]
    fn akima_needs_two_knots() {
        assert!(Akima::new(&[1.0], &[1.0]).is_none());
        let two = Akima::new(&[0.0, 2.0], &[0.0, 4.0]).unwrap();
        assert!((two.evaluate(1.0) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn natural_spline_interpolates_and_is_linear_outside() {
        let xs = [0.0, 1.0, 2.0, 3.0];
        let ys = [0.0, 1.0, 0.0, 1.0];
        let spline = CubicSpline::natural(&xs, &ys).unwrap();
        for (x, y) in xs.iter().zip(&ys) {
            assert!((spline.evaluate(*x) - y).abs() < 1e-5);
        }
        let beyond = spline.evaluate(4.0) - spline.evaluate(3.5);
        let further = spline.evaluate(4.5) - spline.evaluate(4.0);
        assert!((beyond - further).abs() < 1e-5);
    }
}
