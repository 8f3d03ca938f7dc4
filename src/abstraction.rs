//! Sampleable approximations of guard feasible regions.
//!
//! An [`Abstraction`] wraps the feasible region of a [`Guard`] inside the
//! box of variable domains and offers two things:
//!
//! - [`Abstraction::uniform_sample`]: an assignment drawn (approximately)
//!   uniformly from the region, which always satisfies the guard;
//! - [`Abstraction::relative_volume`]: the measure of the region divided by
//!   the measure of the domain box, used to weight transitions.
//!
//! Two representations are available, chosen by [`AbstractionKind`]:
//!
//! - **Hyperrectangle**: the bounding box found by bound propagation. Guard
//!   conjuncts involving several variables are kept as residual half-spaces
//!   and enforced by rejection, so samples never violate the guard.
//! - **Polytope**: the exact half-space description, sampled by hit-and-run
//!   from an interior point (see [`crate::polytope`]).
//!
//! Only conjunctions of linear comparisons are accepted; anything else fails
//! with [`Error::UnsupportedGuard`] and must be split by the caller.

use std::collections::{BTreeMap, HashMap};

use log::debug;
use rand::Rng;

use crate::config::SamplerConfig;
use crate::error::{Error, Result};
use crate::expr::{CmpOp, Guard};
use crate::polytope::{denormalize, hit_and_run_last, sample_box, HalfSpace, Polytope};
use crate::types::{to_assignment, Assignment, Domain, Variable};

/// Which representation to build for a guard.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum AbstractionKind {
    Hyperrectangle,
    #[default]
    Polytope,
}

/// Axis-aligned bounding box of a guard region, plus residual constraints.
#[derive(Debug, Clone)]
pub struct Hyperrectangle {
    vars: Vec<Variable>,
    bounds: Vec<Domain>,
    residual: Polytope,
    volume: f64,
    max_rejections: usize,
    tolerance: f64,
}

impl Hyperrectangle {
    pub fn bounds(&self) -> &[Domain] {
        &self.bounds
    }

    /// Whether the box coincides with the guard region.
    pub fn is_exact(&self) -> bool {
        self.residual.halfspaces().is_empty()
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<f64>> {
        if self.is_exact() {
            return Ok(sample_box(&self.bounds, rng));
        }
        for _ in 0..self.max_rejections {
            let x = sample_box(&self.bounds, rng);
            if self.residual.contains(&x, self.tolerance) {
                return Ok(x);
            }
        }
        Err(Error::InvalidRegion(format!(
            "rejection sampling found no point in {} attempts",
            self.max_rejections
        )))
    }
}

/// Convex polytope of a guard region with an interior starting point.
///
/// The walk runs in the normalised copy `unit`, where the bounding box is
/// the unit cube; `interior` lives in that space too.
#[derive(Debug, Clone)]
pub struct PolytopeRegion {
    vars: Vec<Variable>,
    polytope: Polytope,
    unit: Polytope,
    bbox: Vec<Domain>,
    interior: Vec<f64>,
    volume: f64,
    mixing_steps: usize,
}

impl PolytopeRegion {
    pub fn polytope(&self) -> &Polytope {
        &self.polytope
    }

    pub fn bounding_box(&self) -> &[Domain] {
        &self.bbox
    }

    /// Interior starting point, in the original coordinates.
    pub fn interior_point(&self) -> Vec<f64> {
        denormalize(&self.bbox, &self.interior)
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<f64>> {
        let y = hit_and_run_last(&self.unit, &self.interior, self.mixing_steps, rng)?;
        Ok(denormalize(&self.bbox, &y))
    }
}

/// Sampleable feasible region of one guard.
#[derive(Debug, Clone)]
pub enum Abstraction {
    Hyperrectangle(Hyperrectangle),
    Polytope(PolytopeRegion),
}

impl Abstraction {
    /// Builds an abstraction of `guard` over `vars`.
    ///
    /// The random source is used for the interior point search and for
    /// Monte-Carlo volume estimates.
    pub fn build<R: Rng + ?Sized>(
        guard: &Guard,
        vars: &[Variable],
        kind: AbstractionKind,
        config: &SamplerConfig,
        rng: &mut R,
    ) -> Result<Abstraction> {
        let constraints = guard_halfspaces(guard, vars)?;
        let domains: Vec<Domain> = vars.iter().map(|v| v.domain()).collect();

        let mut region = Polytope::from_box(&domains);
        for (h, _) in &constraints {
            region.push(h.clone());
        }
        let bounds = region.propagate_bounds(&domains, config.tolerance)?;
        let box_fraction = box_fraction(&bounds, &domains);

        let abstraction = match kind {
            AbstractionKind::Hyperrectangle => {
                let mut residual = Polytope::new(vars.len());
                for (h, _) in constraints.into_iter().filter(|(h, _)| h.axis().is_none()) {
                    residual.push(h);
                }
                let mut volume = box_fraction;
                if !residual.halfspaces().is_empty() {
                    let acceptance =
                        residual.acceptance_fraction(&bounds, config.volume_samples, config.tolerance, rng);
                    if acceptance == 0.0 {
                        return Err(Error::InvalidRegion(format!(
                            "`{}` has no measurable volume inside its bounding box",
                            guard
                        )));
                    }
                    volume *= acceptance;
                }
                Abstraction::Hyperrectangle(Hyperrectangle {
                    vars: vars.to_vec(),
                    bounds,
                    residual,
                    volume,
                    max_rejections: config.max_rejections,
                    tolerance: config.tolerance,
                })
            }
            AbstractionKind::Polytope => {
                if constraints.iter().any(|(_, op)| *op == CmpOp::Eq) {
                    return Err(Error::InvalidRegion(format!(
                        "equality in `{}` leaves the polytope without interior",
                        guard
                    )));
                }
                if let Some((v, d)) = vars.iter().zip(&bounds).find(|(_, d)| d.width() <= config.tolerance) {
                    return Err(Error::InvalidRegion(format!(
                        "`{}` pins {} to {}, the polytope has no interior",
                        guard,
                        v.name(),
                        d
                    )));
                }
                let unit = region.normalized(&bounds);
                let unit_box = vec![Domain::new(0.0, 1.0)?; vars.len()];
                let interior = unit.find_interior_point(&unit_box, config, rng)?;
                let volume = if region.is_axis_aligned() {
                    box_fraction
                } else {
                    box_fraction * region.acceptance_fraction(&bounds, config.volume_samples, config.tolerance, rng)
                };
                Abstraction::Polytope(PolytopeRegion {
                    vars: vars.to_vec(),
                    polytope: region,
                    unit,
                    bbox: bounds,
                    interior,
                    volume,
                    mixing_steps: config.mixing_steps.max(1),
                })
            }
        };
        debug!(
            "abstraction of `{}`: {:?}, relative volume {}",
            guard,
            kind,
            abstraction.relative_volume()
        );
        Ok(abstraction)
    }

    pub fn kind(&self) -> AbstractionKind {
        match self {
            Abstraction::Hyperrectangle(_) => AbstractionKind::Hyperrectangle,
            Abstraction::Polytope(_) => AbstractionKind::Polytope,
        }
    }

    pub fn variables(&self) -> &[Variable] {
        match self {
            Abstraction::Hyperrectangle(h) => &h.vars,
            Abstraction::Polytope(p) => &p.vars,
        }
    }

    /// Region measure relative to the domain box, in `[0, 1]`.
    pub fn relative_volume(&self) -> f64 {
        match self {
            Abstraction::Hyperrectangle(h) => h.volume,
            Abstraction::Polytope(p) => p.volume,
        }
    }

    /// Draws an assignment from the region, keyed by variable name.
    pub fn uniform_sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Assignment> {
        let point = match self {
            Abstraction::Hyperrectangle(h) => h.sample(rng)?,
            Abstraction::Polytope(p) => p.sample(rng)?,
        };
        Ok(to_assignment(self.variables(), &point))
    }
}

/// Converts a guard into half-spaces over `vars`, remembering each source operator.
fn guard_halfspaces(guard: &Guard, vars: &[Variable]) -> Result<Vec<(HalfSpace, CmpOp)>> {
    let unsupported = |reason: String| Error::UnsupportedGuard {
        guard: guard.to_string(),
        reason,
    };
    let index: HashMap<&str, usize> = vars.iter().enumerate().map(|(i, v)| (v.name(), i)).collect();

    let mut out = Vec::new();
    for c in guard.linear_conjuncts().map_err(unsupported)? {
        let mut coeffs = vec![0.0; vars.len()];
        for (name, &a) in &c.form.coeffs {
            let &i = index
                .get(name.as_str())
                .ok_or_else(|| unsupported(format!("unknown variable `{}`", name)))?;
            coeffs[i] = a;
        }
        let negated: Vec<f64> = coeffs.iter().map(|a| -a).collect();
        let k = c.form.constant;
        // form = coeffs·x + k, compared against zero
        match c.op {
            CmpOp::Lt | CmpOp::Le => out.push((HalfSpace::new(coeffs, -k), c.op)),
            CmpOp::Gt | CmpOp::Ge => out.push((HalfSpace::new(negated, k), c.op)),
            CmpOp::Eq => {
                out.push((HalfSpace::new(coeffs, -k), c.op));
                out.push((HalfSpace::new(negated, k), c.op));
            }
        }
    }
    Ok(out)
}

fn box_fraction(bounds: &[Domain], domains: &[Domain]) -> f64 {
    bounds
        .iter()
        .zip(domains)
        .filter(|(_, d)| d.width() > 0.0)
        .map(|(b, d)| b.width() / d.width())
        .product()
}

/// A registered abstraction together with the guard text it came from.
#[derive(Debug, Clone)]
pub struct Entry {
    pub abstraction: Abstraction,
    pub guard: String,
}

/// Label-indexed abstractions shared by all generation calls.
///
/// Labels without an abstraction may map to a table of fixed values
/// instead. Postpone and release labels carry only an encoding weight.
#[derive(Debug, Clone, Default)]
pub struct AbstractionRegistry {
    entries: BTreeMap<String, Entry>,
    fixed: BTreeMap<String, Assignment>,
    weights: BTreeMap<String, f64>,
}

impl AbstractionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, abstraction: Abstraction, guard: impl Into<String>) {
        self.entries.insert(
            label.into(),
            Entry {
                abstraction,
                guard: guard.into(),
            },
        );
    }

    /// Registers fixed values emitted for `label` when it has no abstraction.
    pub fn insert_fixed(&mut self, label: impl Into<String>, values: Assignment) {
        self.fixed.insert(label.into(), values);
    }

    /// Registers the encoding weight of a label that has no abstraction of its own.
    pub fn insert_weight(&mut self, label: impl Into<String>, weight: f64) {
        self.weights.insert(label.into(), weight);
    }

    pub fn get(&self, label: &str) -> Option<&Entry> {
        self.entries.get(label)
    }

    pub fn fixed(&self, label: &str) -> Option<&Assignment> {
        self.fixed.get(label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.entries.contains_key(label) || self.fixed.contains_key(label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Relative volume of every registered abstraction, plus the weights
    /// from [`insert_weight`][Self::insert_weight].
    pub fn volumes(&self) -> BTreeMap<String, f64> {
        self.entries
            .iter()
            .map(|(label, e)| (label.clone(), e.abstraction.relative_volume()))
            .chain(self.weights.iter().map(|(label, w)| (label.clone(), *w)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
