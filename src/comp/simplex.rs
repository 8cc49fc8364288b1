//
// vestool - Vesicle modeling and subtraction for cryo-EM micrographs
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Nelder-Mead downhill simplex minimization.
//!

#[derive(Copy, Clone, Debug)]
pub struct SimplexOptions {
    /// Absolute tolerance of parameter values (all vertices must lie within it from the best one).
    pub x_tol: f64,
    /// Absolute tolerance of objective values (all vertices must lie within it from the best one).
    pub f_tol: f64,
    pub max_iterations: usize,
    pub max_evaluations: usize
}

impl Default for SimplexOptions {
    fn default() -> SimplexOptions {
        SimplexOptions{ x_tol: 1.0, f_tol: 100.0, max_iterations: 2000, max_evaluations: 2000 }
    }
}

#[derive(Clone, Debug)]
pub struct SimplexResult {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub evaluations: usize,
    /// False if iteration or evaluation limits were reached before the tolerances were met.
    pub converged: bool
}

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Minimizes `f` starting from `x0`.
///
/// The initial simplex consists of `x0` and vertices with one coordinate enlarged by 5%
/// (or set to 0.00025 if it is zero). Non-finite objective values are treated as +∞.
///
pub fn minimize<F: FnMut(&[f64]) -> f64>(mut f: F, x0: &[f64], options: &SimplexOptions) -> SimplexResult {
    let n = x0.len();
    assert!(n > 0);

    let mut objective = CountedObjective{ f: &mut f, evaluations: 0 };

    let mut vertices: Vec<Vec<f64>> = vec![x0.to_vec()];
    for k in 0..n {
        let mut v = x0.to_vec();
        v[k] = if v[k] != 0.0 { 1.05 * v[k] } else { 0.00025 };
        vertices.push(v);
    }
    let mut values: Vec<f64> = vertices.iter().map(|v| objective.eval(v)).collect();
    sort_simplex(&mut vertices, &mut values);

    let mut iterations = 1;
    let mut converged = false;

    loop {
        if within_tolerances(&vertices, &values, options) {
            converged = true;
            break;
        }
        if iterations >= options.max_iterations || objective.evaluations >= options.max_evaluations {
            break;
        }

        // centroid of all vertices except the worst
        let mut centroid = vec![0.0; n];
        for v in &vertices[..n] {
            for (c, x) in centroid.iter_mut().zip(v.iter()) { *c += x / n as f64; }
        }
        let worst = vertices[n].clone();
        let along = |t: f64| -> Vec<f64> {
            centroid.iter().zip(worst.iter()).map(|(c, w)| (1.0 + t) * c - t * w).collect()
        };

        let reflected = along(REFLECTION);
        let f_reflected = objective.eval(&reflected);
        let mut shrink = false;

        if f_reflected < values[0] {
            let expanded = along(REFLECTION * EXPANSION);
            let f_expanded = objective.eval(&expanded);
            if f_expanded < f_reflected {
                vertices[n] = expanded;
                values[n] = f_expanded;
            } else {
                vertices[n] = reflected;
                values[n] = f_reflected;
            }
        } else if f_reflected < values[n - 1] {
            vertices[n] = reflected;
            values[n] = f_reflected;
        } else if f_reflected < values[n] {
            let contracted = along(CONTRACTION * REFLECTION);
            let f_contracted = objective.eval(&contracted);
            if f_contracted <= f_reflected {
                vertices[n] = contracted;
                values[n] = f_contracted;
            } else {
                shrink = true;
            }
        } else {
            let contracted = along(-CONTRACTION);
            let f_contracted = objective.eval(&contracted);
            if f_contracted < values[n] {
                vertices[n] = contracted;
                values[n] = f_contracted;
            } else {
                shrink = true;
            }
        }

        if shrink {
            let best = vertices[0].clone();
            for j in 1..=n {
                for (x, b) in vertices[j].iter_mut().zip(best.iter()) {
                    *x = b + SHRINK * (*x - b);
                }
                values[j] = objective.eval(&vertices[j]);
            }
        }

        sort_simplex(&mut vertices, &mut values);
        iterations += 1;
    }

    SimplexResult{
        x: vertices.swap_remove(0),
        value: values[0],
        iterations,
        evaluations: objective.evaluations,
        converged
    }
}

struct CountedObjective<'a, F: FnMut(&[f64]) -> f64> {
    f: &'a mut F,
    evaluations: usize
}

impl<'a, F: FnMut(&[f64]) -> f64> CountedObjective<'a, F> {
    fn eval(&mut self, x: &[f64]) -> f64 {
        self.evaluations += 1;
        let value = (self.f)(x);
        if value.is_finite() { value } else { std::f64::INFINITY }
    }
}

fn within_tolerances(vertices: &[Vec<f64>], values: &[f64], options: &SimplexOptions) -> bool {
    let x_spread = vertices[1..].iter()
        .flat_map(|v| v.iter().zip(vertices[0].iter()).map(|(x, b)| (x - b).abs()))
        .fold(0.0, f64::max);
    let f_spread = values[1..].iter().map(|v| (v - values[0]).abs()).fold(0.0, f64::max);

    x_spread <= options.x_tol && f_spread <= options.f_tol
}

/// Sorts vertices by ascending objective value (stable).
fn sort_simplex(vertices: &mut Vec<Vec<f64>>, values: &mut Vec<f64>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(std::cmp::Ordering::Equal));
    *vertices = order.iter().map(|&i| vertices[i].clone()).collect();
    *values = order.iter().map(|&i| values[i]).collect();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tight() -> SimplexOptions {
        SimplexOptions{ x_tol: 1.0e-6, f_tol: 1.0e-10, max_iterations: 5000, max_evaluations: 5000 }
    }

    #[test]
    fn finds_minimum_of_quadratic_bowl() {
        let result = minimize(
            |p| (p[0] - 3.0).powi(2) + 2.0 * (p[1] + 1.0).powi(2) + 0.5 * (p[2] - 10.0).powi(2),
            &[1.0, 1.0, 8.0],
            &tight()
        );
        assert!(result.converged);
        assert!((result.x[0] - 3.0).abs() < 1.0e-4);
        assert!((result.x[1] + 1.0).abs() < 1.0e-4);
        assert!((result.x[2] - 10.0).abs() < 1.0e-4);
    }

    #[test]
    fn finds_minimum_of_rosenbrock_function() {
        let result = minimize(
            |p| 100.0 * (p[1] - p[0] * p[0]).powi(2) + (1.0 - p[0]).powi(2),
            &[-1.2, 1.0],
            &tight()
        );
        assert!((result.x[0] - 1.0).abs() < 1.0e-3);
        assert!((result.x[1] - 1.0).abs() < 1.0e-3);
    }

    #[test]
    fn evaluation_limit_is_respected() {
        let options = SimplexOptions{ max_evaluations: 20, ..tight() };
        let result = minimize(|p| (p[0] - 100.0).powi(2) + p[1].powi(2), &[1.0, 1.0], &options);
        assert!(!result.converged);
        // the last iteration may need up to n + 2 evaluations
        assert!(result.evaluations <= 20 + 4);
    }

    #[test]
    fn non_finite_values_are_avoided() {
        let result = minimize(
            |p| if p[0] < 0.0 { std::f64::NAN } else { (p[0] - 2.0).powi(2) },
            &[5.0],
            &tight()
        );
        assert!((result.x[0] - 2.0).abs() < 1.0e-4);
    }
}
