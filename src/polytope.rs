//! Convex polytopes and the hit-and-run sampler.
//!
//! A [`Polytope`] is the intersection of finitely many half-spaces
//! `a·x <= b` over `n` real coordinates. The coordinates follow the variable
//! order of the automaton the polytope was built for.
//!
//! # Hit-and-run
//!
//! Starting from an interior point `x`, each step:
//!
//! 1. draws a direction `d` uniformly on the unit sphere (a normalised
//!    standard-normal vector),
//! 2. intersects the line `x + t·d` with every half-space, which yields the
//!    chord `t ∈ [neg, pos]`,
//! 3. moves to `x + t·d` for `t` drawn uniformly from the chord.
//!
//! The chain's stationary distribution is uniform over the polytope. All
//! randomness comes from the caller's [`Rng`]; a seeded generator makes the
//! walk reproducible.
//!
//! ```
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//! use stagen::polytope::{hit_and_run, HalfSpace, Polytope};
//!
//! // Triangle x >= 0, y >= 0, x + y <= 1.
//! let mut p = Polytope::new(2);
//! p.push(HalfSpace::new(vec![-1.0, 0.0], 0.0));
//! p.push(HalfSpace::new(vec![0.0, -1.0], 0.0));
//! p.push(HalfSpace::new(vec![1.0, 1.0], 1.0));
//!
//! let mut rng = ChaCha8Rng::seed_from_u64(7);
//! let samples = hit_and_run(&p, &[0.2, 0.2], 100, &mut rng).unwrap();
//! assert_eq!(samples.len(), 100);
//! assert!(samples.iter().all(|x| p.contains(x, 1e-9)));
//! ```

use std::fmt;

use log::{debug, trace};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::config::SamplerConfig;
use crate::error::{Error, Result};
use crate::types::Domain;

const PROPAGATION_ROUNDS: usize = 64;

/// The half-space `coeffs · x <= bound`.
#[derive(Debug, Clone, PartialEq)]
pub struct HalfSpace {
    pub coeffs: Vec<f64>,
    pub bound: f64,
}

impl HalfSpace {
    pub fn new(coeffs: Vec<f64>, bound: f64) -> Self {
        HalfSpace { coeffs, bound }
    }

    /// `bound - coeffs · x`; negative when `x` lies outside.
    pub fn slack(&self, x: &[f64]) -> f64 {
        self.bound - dot(&self.coeffs, x)
    }

    /// Index of the only non-zero coefficient, if there is exactly one.
    pub fn axis(&self) -> Option<usize> {
        let mut nonzero = self.coeffs.iter().enumerate().filter(|(_, &c)| c != 0.0);
        match (nonzero.next(), nonzero.next()) {
            (Some((i, _)), None) => Some(i),
            _ => None,
        }
    }
}

impl fmt::Display for HalfSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (i, &c) in self.coeffs.iter().enumerate() {
            if c == 0.0 {
                continue;
            }
            if !first {
                write!(f, " + ")?;
            }
            write!(f, "{}*x{}", c, i)?;
            first = false;
        }
        if first {
            write!(f, "0")?;
        }
        write!(f, " <= {}", self.bound)
    }
}

/// Intersection of half-spaces in `dim` dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct Polytope {
    dim: usize,
    halfspaces: Vec<HalfSpace>,
}

impl Polytope {
    pub fn new(dim: usize) -> Self {
        Polytope {
            dim,
            halfspaces: Vec::new(),
        }
    }

    /// The axis-aligned box `lo_i <= x_i <= hi_i`.
    pub fn from_box(domains: &[Domain]) -> Self {
        let mut p = Polytope::new(domains.len());
        for (i, d) in domains.iter().enumerate() {
            let mut upper = vec![0.0; domains.len()];
            upper[i] = 1.0;
            p.push(HalfSpace::new(upper, d.hi()));
            let mut lower = vec![0.0; domains.len()];
            lower[i] = -1.0;
            p.push(HalfSpace::new(lower, -d.lo()));
        }
        p
    }

    /// Adds a half-space.
    ///
    /// # Panics
    ///
    /// Panics if the half-space dimension differs from the polytope's.
    pub fn push(&mut self, halfspace: HalfSpace) {
        assert_eq!(
            halfspace.coeffs.len(),
            self.dim,
            "Half-space dimension must match polytope dimension"
        );
        self.halfspaces.push(halfspace);
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn halfspaces(&self) -> &[HalfSpace] {
        &self.halfspaces
    }

    /// Whether every half-space is of the form `±x_i <= b`.
    pub fn is_axis_aligned(&self) -> bool {
        self.halfspaces
            .iter()
            .all(|h| h.axis().is_some() || h.coeffs.iter().all(|&c| c == 0.0))
    }

    pub fn contains(&self, x: &[f64], tol: f64) -> bool {
        self.halfspaces.iter().all(|h| h.slack(x) >= -tol)
    }

    /// Rewrites the polytope in coordinates `y` with `x = lo + width * y`, so
    /// that `bbox` becomes the unit cube.
    ///
    /// Hit-and-run mixes poorly in elongated regions; sampling in the
    /// normalised space and mapping back with [`denormalize`] avoids that.
    pub fn normalized(&self, bbox: &[Domain]) -> Polytope {
        let halfspaces = self
            .halfspaces
            .iter()
            .map(|h| {
                let coeffs = h.coeffs.iter().zip(bbox).map(|(a, d)| a * d.width()).collect();
                let shift: f64 = h.coeffs.iter().zip(bbox).map(|(a, d)| a * d.lo()).sum();
                HalfSpace::new(coeffs, h.bound - shift)
            })
            .collect();
        Polytope {
            dim: self.dim,
            halfspaces,
        }
    }

    /// Tightens `bounds` by interval bound propagation over all half-spaces.
    ///
    /// For `a·x <= b`, each coordinate with `a_j != 0` is bounded by
    /// `(b - min Σ_{k≠j} a_k x_k) / a_j`, with the minimum taken over the
    /// current box. Rounds repeat until no bound moves.
    ///
    /// Fails with [`Error::InvalidRegion`] when the region is found empty.
    pub fn propagate_bounds(&self, bounds: &[Domain], tol: f64) -> Result<Vec<Domain>> {
        let mut lo: Vec<f64> = bounds.iter().map(|d| d.lo()).collect();
        let mut hi: Vec<f64> = bounds.iter().map(|d| d.hi()).collect();

        for round in 0..PROPAGATION_ROUNDS {
            let mut changed = false;
            for h in &self.halfspaces {
                if h.coeffs.iter().all(|&c| c == 0.0) {
                    if h.bound < -tol {
                        return Err(Error::InvalidRegion(format!("constraint `{}` is unsatisfiable", h)));
                    }
                    continue;
                }
                let min_terms: Vec<f64> = h
                    .coeffs
                    .iter()
                    .enumerate()
                    .map(|(k, &a)| if a > 0.0 { a * lo[k] } else { a * hi[k] })
                    .collect();
                let min_total: f64 = min_terms.iter().sum();
                for (j, &a) in h.coeffs.iter().enumerate() {
                    if a == 0.0 {
                        continue;
                    }
                    let rest = min_total - min_terms[j];
                    let limit = (h.bound - rest) / a;
                    if a > 0.0 && limit < hi[j] - tol {
                        hi[j] = limit;
                        changed = true;
                    } else if a < 0.0 && limit > lo[j] + tol {
                        lo[j] = limit;
                        changed = true;
                    }
                }
            }
            for j in 0..self.dim {
                if lo[j] > hi[j] + tol {
                    return Err(Error::InvalidRegion(format!(
                        "coordinate x{} has empty range [{}, {}]",
                        j, lo[j], hi[j]
                    )));
                }
                if lo[j] > hi[j] {
                    hi[j] = lo[j];
                }
            }
            if !changed {
                debug!("bound propagation converged after {} rounds", round + 1);
                break;
            }
        }

        lo.iter().zip(&hi).map(|(&l, &h)| Domain::new(l, h).map_err(|e| Error::InvalidRegion(e.to_string()))).collect()
    }

    /// Finds a point strictly inside the polytope.
    ///
    /// Draws uniformly from `bbox` and averages the first
    /// `config.interior_samples` draws with positive slack on every
    /// half-space; by convexity the average is interior as well.
    pub fn find_interior_point<R: Rng + ?Sized>(
        &self,
        bbox: &[Domain],
        config: &SamplerConfig,
        rng: &mut R,
    ) -> Result<Vec<f64>> {
        if let Some((i, d)) = bbox.iter().enumerate().find(|(_, d)| d.width() <= config.tolerance) {
            return Err(Error::InvalidRegion(format!(
                "coordinate x{} is pinned to {}, the region has no interior",
                i, d
            )));
        }

        let wanted = config.interior_samples.max(1);
        let mut sum = vec![0.0; self.dim];
        let mut found = 0;
        for _ in 0..config.max_rejections {
            let x = sample_box(bbox, rng);
            if self.halfspaces.iter().all(|h| h.slack(&x) > config.tolerance) {
                for (s, v) in sum.iter_mut().zip(&x) {
                    *s += v;
                }
                found += 1;
                if found == wanted {
                    break;
                }
            }
        }
        if found == 0 {
            return Err(Error::InvalidRegion(format!(
                "no interior point found in {} attempts",
                config.max_rejections
            )));
        }
        Ok(sum.into_iter().map(|s| s / found as f64).collect())
    }

    /// Fraction of uniform draws from `bbox` that fall inside the polytope.
    pub fn acceptance_fraction<R: Rng + ?Sized>(&self, bbox: &[Domain], samples: usize, tol: f64, rng: &mut R) -> f64 {
        if samples == 0 {
            return 0.0;
        }
        let hits = (0..samples)
            .filter(|_| {
                let x = sample_box(bbox, rng);
                self.contains(&x, tol)
            })
            .count();
        hits as f64 / samples as f64
    }
}

/// Runs `k` hit-and-run steps from `start` and returns every visited point.
///
/// Fails with [`Error::InvalidRegion`] when `start` lies outside the
/// polytope, or when some chord is unbounded or improper (`neg > pos`).
pub fn hit_and_run<R: Rng + ?Sized>(polytope: &Polytope, start: &[f64], k: usize, rng: &mut R) -> Result<Vec<Vec<f64>>> {
    let mut samples = Vec::with_capacity(k);
    hit_and_run_with(polytope, start, k, rng, |x| samples.push(x.to_vec()))?;
    Ok(samples)
}

/// Runs `k` hit-and-run steps from `start` and returns only the final point.
pub fn hit_and_run_last<R: Rng + ?Sized>(polytope: &Polytope, start: &[f64], k: usize, rng: &mut R) -> Result<Vec<f64>> {
    hit_and_run_with(polytope, start, k, rng, |_| {})
}

fn hit_and_run_with<R, F>(polytope: &Polytope, start: &[f64], k: usize, rng: &mut R, mut visit: F) -> Result<Vec<f64>>
where
    R: Rng + ?Sized,
    F: FnMut(&[f64]),
{
    if start.len() != polytope.dim {
        return Err(Error::InvalidRegion(format!(
            "start point has dimension {}, polytope has {}",
            start.len(),
            polytope.dim
        )));
    }
    if let Some(h) = polytope.halfspaces.iter().find(|h| h.slack(start) <= 0.0) {
        return Err(Error::InvalidRegion(format!(
            "start point {:?} is not strictly inside `{}`",
            start, h
        )));
    }

    let mut x = start.to_vec();
    for step in 0..k {
        let d = random_direction(polytope.dim, rng);

        let mut pos = f64::INFINITY;
        let mut neg = f64::NEG_INFINITY;
        for h in &polytope.halfspaces {
            let slack = h.slack(&x).max(0.0);
            let rate = dot(&h.coeffs, &d);
            if rate > 0.0 {
                pos = pos.min(slack / rate);
            } else if rate < 0.0 {
                neg = neg.max(slack / rate);
            }
        }

        if !pos.is_finite() || !neg.is_finite() {
            return Err(Error::InvalidRegion(format!(
                "region is unbounded along direction {:?}",
                d
            )));
        }
        if neg > pos {
            return Err(Error::InvalidRegion(format!(
                "improper chord [{}, {}] at {:?}",
                neg, pos, x
            )));
        }

        let t = rng.gen_range(neg..=pos);
        trace!("hit-and-run step {}: chord [{}, {}], t = {}", step, neg, pos, t);
        for (xi, di) in x.iter_mut().zip(&d) {
            *xi += t * di;
        }
        visit(&x);
    }
    Ok(x)
}

/// Maps a point of the unit cube back into `bbox`.
pub fn denormalize(bbox: &[Domain], y: &[f64]) -> Vec<f64> {
    bbox.iter().zip(y).map(|(d, &v)| d.lo() + d.width() * v).collect()
}

/// Uniformly random unit vector in `dim` dimensions.
pub fn random_direction<R: Rng + ?Sized>(dim: usize, rng: &mut R) -> Vec<f64> {
    loop {
        let d: Vec<f64> = (0..dim).map(|_| rng.sample(StandardNormal)).collect();
        let norm = dot(&d, &d).sqrt();
        if norm > f64::EPSILON {
            return d.into_iter().map(|v| v / norm).collect();
        }
    }
}

/// Uniform draw from an axis-aligned box.
pub fn sample_box<R: Rng + ?Sized>(bbox: &[Domain], rng: &mut R) -> Vec<f64> {
    bbox.iter()
        .map(|d| {
            if d.width() > 0.0 {
                rng.gen_range(d.lo()..=d.hi())
            } else {
                d.lo()
            }
        })
        .collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
