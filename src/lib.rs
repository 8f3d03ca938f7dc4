//! # stagen: trajectory generation from symbolic timed automata
//!
//! **`stagen`** produces randomized timed event sequences that satisfy the guards of a
//! **symbolic timed automaton (STA)**. It is meant for falsification and robustness testing:
//! the generated trajectories drive a simulation under test.
//!
//! ## How it works
//!
//! An STA has clocks, locations, and transitions guarded by linear constraints over
//! real-valued variables. Generation runs in two phases:
//!
//! 1. **Abstract**: every guard is replaced by the relative volume of its feasible region,
//!    and an external word generator (`wordgen`) draws label/delay sequences from the
//!    resulting weighted timed automaton.
//! 2. **Concrete**: each label is mapped back to its guard's region, and values are sampled
//!    uniformly from it. Axis-aligned regions are sampled directly; general convex polytopes use
//!    a hit-and-run random walk.
//!
//! ## Key Features
//!
//! - **Linear guards**: conjunctions of `<`, `<=`, `=`, `>=`, `>` over linear terms, see [`expr`].
//! - **Two abstractions**: hyperrectangles and polytopes, see [`abstraction`].
//! - **Postponed bindings**: a value sampled at one step can be released at a later one, see [`concretize`].
//! - **Reproducible**: every random draw comes from a caller-seeded [`GenerationContext`][crate::context::GenerationContext].
//!
//! ## Basic Usage
//!
//! ```rust
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//! use stagen::abstraction::{Abstraction, AbstractionKind};
//! use stagen::config::SamplerConfig;
//! use stagen::expr::{Guard, Term};
//! use stagen::types::{Domain, Variable};
//!
//! let vars = vec![
//!     Variable::new("x", Domain::new(0.0, 10.0).unwrap()),
//!     Variable::new("y", Domain::new(0.0, 10.0).unwrap()),
//! ];
//! // x + y <= 5, x >= 1
//! let guard = Guard::and(Guard::le(Term::var("x") + Term::var("y"), 5.0), Guard::ge("x", 1.0));
//!
//! let mut rng = ChaCha8Rng::seed_from_u64(42);
//! let region = Abstraction::build(&guard, &vars, AbstractionKind::Polytope, &SamplerConfig::default(), &mut rng).unwrap();
//!
//! let sample = region.uniform_sample(&mut rng).unwrap();
//! assert_eq!(guard.eval_with_tolerance(&sample, 1e-9), Some(true));
//! assert!(region.relative_volume() > 0.0 && region.relative_volume() < 0.125);
//! ```
//!
//! ## Core Components
//!
//! - **[`automaton`]**: the STA and its weighted encoding for the word generator.
//! - **[`wordgen`]**: running the word generator and repairing its output.
//! - **[`generator`]**: the end-to-end [`TrajectoryGenerator`][crate::generator::TrajectoryGenerator].

pub mod abstraction;
pub mod automaton;
pub mod concretize;
pub mod config;
pub mod context;
pub mod error;
pub mod expr;
pub mod generator;
pub mod polytope;
pub mod trajectory;
pub mod types;
pub mod wordgen;
