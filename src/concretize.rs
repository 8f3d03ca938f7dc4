//! Concretization: sampling variable values for abstract trajectories.
//!
//! Every step's label is looked up in an [`AbstractionRegistry`] and a fresh
//! assignment is drawn from the matching abstraction. Two label forms couple
//! steps with each other:
//!
//! - `<sub>_PL_<post>_PV_<v1>_v_<v2>...` (*postpone*) samples the abstraction
//!   of `<sub>`, emits the values of every variable except `v1, v2, ...` and
//!   keeps the rest pending under `<post>`;
//! - `<sub>_PL_<post>` (*release*) emits the values pending under `<post>`.
//!   Its `<sub>` part is ignored.
//!
//! At most one postponement may be pending per post-label. Pending values
//! live in a map owned by a single [`Concretizer::concretize_one`] call.

use std::collections::HashMap;
use std::fmt;

use log::{debug, info};
use rand::Rng;

use crate::abstraction::{Abstraction, AbstractionRegistry};
use crate::error::{Error, Result};
use crate::trajectory::{AbstractTrajectory, ConcreteStep, ConcreteTrajectory};
use crate::types::Assignment;

const POST_LABEL: &str = "_PL_";
const POST_VARS: &str = "_PV_";
const VAR_SEP: &str = "_v_";

/// Values of the first step of every concrete trajectory.
#[derive(Debug, Clone)]
pub enum InitialValues {
    Fixed(Assignment),
    Sampled { abstraction: Abstraction, guard: Option<String> },
}

impl InitialValues {
    fn step<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<ConcreteStep> {
        match self {
            InitialValues::Fixed(values) => Ok(ConcreteStep::initial(values.clone(), None)),
            InitialValues::Sampled { abstraction, guard } => {
                Ok(ConcreteStep::initial(abstraction.uniform_sample(rng)?, guard.clone()))
            }
        }
    }
}

/// A label in postpone or release form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostponeLabel<'a> {
    Postpone {
        sub: &'a str,
        post: &'a str,
        vars: Vec<&'a str>,
    },
    Release {
        sub: &'a str,
        post: &'a str,
    },
}

impl<'a> PostponeLabel<'a> {
    /// Returns `None` for labels without a `_PL_` part.
    pub fn parse(label: &'a str) -> Option<Self> {
        let (sub, rest) = label.split_once(POST_LABEL)?;
        match rest.split_once(POST_VARS) {
            Some((post, vars)) => Some(PostponeLabel::Postpone {
                sub,
                post,
                vars: vars.split(VAR_SEP).filter(|v| !v.is_empty()).collect(),
            }),
            None => Some(PostponeLabel::Release { sub, post: rest }),
        }
    }

    pub fn post_label(&self) -> &'a str {
        match self {
            PostponeLabel::Postpone { post, .. } | PostponeLabel::Release { post, .. } => post,
        }
    }
}

impl fmt::Display for PostponeLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostponeLabel::Postpone { sub, post, vars } => {
                write!(f, "{}{}{}{}{}", sub, POST_LABEL, post, POST_VARS, vars.join(VAR_SEP))
            }
            PostponeLabel::Release { sub, post } => write!(f, "{}{}{}", sub, POST_LABEL, post),
        }
    }
}

struct Pending {
    values: Assignment,
    guard: String,
}

/// Turns abstract trajectories into concrete ones.
///
/// Holds only shared, read-only state, so one concretizer may serve any
/// number of calls.
#[derive(Debug, Clone, Copy)]
pub struct Concretizer<'a> {
    registry: &'a AbstractionRegistry,
    initial: &'a InitialValues,
}

impl<'a> Concretizer<'a> {
    pub fn new(registry: &'a AbstractionRegistry, initial: &'a InitialValues) -> Self {
        Concretizer { registry, initial }
    }

    /// Concretizes every trajectory; fails on the first error.
    pub fn concretize<R: Rng + ?Sized>(
        &self,
        trajectories: &[AbstractTrajectory],
        rng: &mut R,
    ) -> Result<Vec<ConcreteTrajectory>> {
        let concrete = trajectories
            .iter()
            .enumerate()
            .map(|(i, t)| self.concretize_one(i, t, rng))
            .collect::<Result<Vec<_>>>()?;
        info!("concretized {} trajectories", concrete.len());
        Ok(concrete)
    }

    /// Concretizes trajectory number `index`.
    pub fn concretize_one<R: Rng + ?Sized>(
        &self,
        index: usize,
        trajectory: &AbstractTrajectory,
        rng: &mut R,
    ) -> Result<ConcreteTrajectory> {
        let mut pending: HashMap<String, Pending> = HashMap::new();
        let mut word = Vec::with_capacity(trajectory.len() + 1);
        word.push(self.initial.step(rng)?);

        for (step_index, step) in trajectory.iter().enumerate() {
            let Some(action) = step.action.as_deref() else {
                break;
            };
            if !step.delay.is_finite() || step.delay < 0.0 {
                return Err(Error::MalformedTrajectory {
                    trajectory: index,
                    step: step_index,
                    reason: format!("invalid delay {}", step.delay),
                });
            }

            let mut concrete = ConcreteStep {
                delay: step.delay,
                vars: Assignment::new(),
                action: Some(action.to_string()),
                constraint: None,
                post_label: None,
            };

            if let Some(entry) = self.registry.get(action) {
                concrete.vars = entry.abstraction.uniform_sample(rng)?;
                concrete.constraint = Some(entry.guard.clone());
            } else if let Some(label) = PostponeLabel::parse(action) {
                let post = label.post_label();
                match label {
                    PostponeLabel::Postpone { sub, vars, .. } => {
                        if pending.contains_key(post) {
                            return Err(Error::UnresolvedPostpone {
                                post_label: post.to_string(),
                                action: action.to_string(),
                            });
                        }
                        let entry = self.registry.get(sub).ok_or_else(|| Error::UnknownLabel(sub.to_string()))?;
                        let mut values = entry.abstraction.uniform_sample(rng)?;
                        let mut postponed = Assignment::new();
                        for var in vars {
                            let value = values.remove(var).ok_or_else(|| Error::MalformedTrajectory {
                                trajectory: index,
                                step: step_index,
                                reason: format!("`{}` postpones unknown variable `{}`", action, var),
                            })?;
                            postponed.insert(var.to_string(), value);
                        }
                        debug!("postponing {:?} under `{}`", postponed, post);
                        pending.insert(
                            post.to_string(),
                            Pending {
                                values: postponed,
                                guard: entry.guard.clone(),
                            },
                        );
                        concrete.vars = values;
                        concrete.constraint = Some(entry.guard.clone());
                    }
                    PostponeLabel::Release { .. } => {
                        let released = pending.remove(post).ok_or_else(|| Error::MissingPostpone {
                            post_label: post.to_string(),
                            action: action.to_string(),
                        })?;
                        debug!("releasing {:?} from `{}`", released.values, post);
                        concrete.vars = released.values;
                        concrete.constraint = Some(released.guard);
                    }
                }
                concrete.post_label = Some(post.to_string());
            } else if let Some(values) = self.registry.fixed(action) {
                concrete.vars = values.clone();
            } else {
                return Err(Error::UnknownLabel(action.to_string()));
            }
            word.push(concrete);
        }

        if !pending.is_empty() {
            debug!(
                "trajectory {} ended with {} unreleased postponement(s)",
                index,
                pending.len()
            );
        }
        Ok(word)
    }
}

/// Concretizes `trajectories` against `registry`.
pub fn concretize<R: Rng + ?Sized>(
    trajectories: &[AbstractTrajectory],
    registry: &AbstractionRegistry,
    initial: &InitialValues,
    rng: &mut R,
) -> Result<Vec<ConcreteTrajectory>> {
    Concretizer::new(registry, initial).concretize(trajectories, rng)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use test_log::test;

    use crate::abstraction::AbstractionKind;
    use crate::config::SamplerConfig;
    use crate::expr::{Guard, Term};
    use crate::trajectory::AbstractStep;
    use crate::types::{Domain, Variable};

    fn variables() -> Vec<Variable> {
        vec![
            Variable::new("m", Domain::new(0.0, 110.0).unwrap()),
            Variable::new("m1", Domain::new(0.0, 25.0).unwrap()),
            Variable::new("m2", Domain::new(0.0, 25.0).unwrap()),
        ]
    }

    fn registry(rng: &mut ChaCha8Rng) -> AbstractionRegistry {
        let vars = variables();
        let config = SamplerConfig::default();
        let mut registry = AbstractionRegistry::new();
        let guards = [
            ("to_lunch", Guard::and(Guard::within("m", 15.0, 75.0), Guard::ge("m2", 5.0))),
            (
                "snack",
                Guard::all([
                    Guard::within("m", 0.0, 1.0),
                    Guard::ge("m1", 5.0),
                    Guard::ge("m2", 5.0),
                    Guard::le(Term::var("m1") + Term::var("m2"), 40.0),
                ]),
            ),
        ];
        for (label, guard) in guards {
            let a = Abstraction::build(&guard, &vars, AbstractionKind::Polytope, &config, rng).unwrap();
            registry.insert(label, a, guard.to_string());
        }
        registry.insert_fixed("idle", Assignment::from([("m".to_string(), 0.0)]));
        registry
    }

    fn initial() -> InitialValues {
        InitialValues::Fixed(Assignment::from([
            ("m".to_string(), 0.0),
            ("m1".to_string(), 0.0),
            ("m2".to_string(), 0.0),
        ]))
    }

    #[test]
    fn test_parse_postpone_label() {
        assert_eq!(
            PostponeLabel::parse("to_lunch_PL_snack2_PV_m2"),
            Some(PostponeLabel::Postpone {
                sub: "to_lunch",
                post: "snack2",
                vars: vec!["m2"],
            })
        );
        assert_eq!(
            PostponeLabel::parse("x_PL_p_PV_m1_v_m2").unwrap(),
            PostponeLabel::Postpone {
                sub: "x",
                post: "p",
                vars: vec!["m1", "m2"],
            }
        );
        assert_eq!(
            PostponeLabel::parse("_PL_snack2"),
            Some(PostponeLabel::Release { sub: "", post: "snack2" })
        );
        assert_eq!(PostponeLabel::parse("to_lunch"), None);
    }

    #[test]
    fn test_postpone_label_display() {
        for label in ["a_PL_p_PV_m1_v_m2", "b_PL_p"] {
            assert_eq!(PostponeLabel::parse(label).unwrap().to_string(), label);
        }
    }

    #[test]
    fn test_plain_steps() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let registry = registry(&mut rng);
        let initial = initial();
        let trajectory = vec![AbstractStep::new("to_lunch", 6.0), AbstractStep::new("idle", 1.5)];
        let word = Concretizer::new(&registry, &initial)
            .concretize_one(0, &trajectory, &mut rng)
            .unwrap();
        assert_eq!(word.len(), 3);
        assert_eq!(word[0].delay, 0.0);
        assert_eq!(word[0].action, None);
        assert_eq!(word[1].action.as_deref(), Some("to_lunch"));
        assert_eq!(word[1].delay, 6.0);
        assert!((15.0..=75.0).contains(&word[1].vars["m"]));
        assert!(word[1].vars["m2"] >= 5.0);
        assert_eq!(word[1].constraint.as_deref(), Some("m >= 15 && m <= 75 && m2 >= 5"));
        assert_eq!(word[2].vars, Assignment::from([("m".to_string(), 0.0)]));
        assert_eq!(word[2].constraint, None);
    }

    #[test]
    fn test_postpone_release_round_trip() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let registry = registry(&mut rng);
        let initial = initial();
        let trajectory = vec![
            AbstractStep::new("to_lunch_PL_s2_PV_m2", 6.0),
            AbstractStep::new("snack", 1.0),
            AbstractStep::new("_PL_s2", 2.0),
        ];
        let word = Concretizer::new(&registry, &initial)
            .concretize_one(0, &trajectory, &mut rng)
            .unwrap();
        assert_eq!(word.len(), 4);

        let postponed = &word[1];
        assert!(postponed.vars.contains_key("m"));
        assert!(!postponed.vars.contains_key("m2"));
        assert_eq!(postponed.post_label.as_deref(), Some("s2"));

        let released = &word[3];
        assert_eq!(released.post_label.as_deref(), Some("s2"));
        assert_eq!(released.vars.len(), 1);
        assert!(released.vars["m2"] >= 5.0);
        assert_eq!(released.constraint, postponed.constraint);
        assert_eq!(released.delay, 2.0);
    }

    #[test]
    fn test_release_returns_committed_values() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let registry = registry(&mut rng);
        let initial = initial();
        let trajectory = vec![
            AbstractStep::new("to_lunch_PL_s2_PV_m2", 6.0),
            AbstractStep::new("idle", 1.0),
            AbstractStep::new("_PL_s2", 2.0),
        ];
        let word = Concretizer::new(&registry, &initial)
            .concretize_one(0, &trajectory, &mut ChaCha8Rng::seed_from_u64(30))
            .unwrap();

        // Fixed initial values draw nothing, so the postpone step consumed the first sample.
        let full = registry
            .get("to_lunch")
            .unwrap()
            .abstraction
            .uniform_sample(&mut ChaCha8Rng::seed_from_u64(30))
            .unwrap();
        assert_eq!(word[1].vars["m"], full["m"]);
        assert_eq!(word[1].vars["m1"], full["m1"]);
        assert_eq!(word[3].vars["m2"], full["m2"]);
    }

    #[test]
    fn test_missing_postpone() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let registry = registry(&mut rng);
        let initial = initial();
        let trajectory = vec![AbstractStep::new("idle", 1.0), AbstractStep::new("_PL_s2", 1.0)];
        let err = concretize(&[trajectory], &registry, &initial, &mut rng).unwrap_err();
        assert!(matches!(err, Error::MissingPostpone { post_label, .. } if post_label == "s2"));
    }

    #[test]
    fn test_unresolved_postpone() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let registry = registry(&mut rng);
        let initial = initial();
        let trajectory = vec![
            AbstractStep::new("to_lunch_PL_s2_PV_m2", 1.0),
            AbstractStep::new("to_lunch_PL_s2_PV_m2", 1.0),
        ];
        let err = concretize(&[trajectory], &registry, &initial, &mut rng).unwrap_err();
        assert!(matches!(err, Error::UnresolvedPostpone { post_label, .. } if post_label == "s2"));
    }

    #[test]
    fn test_postpone_is_per_trajectory() {
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let registry = registry(&mut rng);
        let initial = initial();
        let t1 = vec![AbstractStep::new("to_lunch_PL_s2_PV_m2", 1.0)];
        let t2 = vec![AbstractStep::new("_PL_s2", 1.0)];
        concretize(&[t1.clone(), t1], &registry, &initial, &mut rng).unwrap();
        let err = concretize(&[t2], &registry, &initial, &mut rng).unwrap_err();
        assert!(matches!(err, Error::MissingPostpone { .. }));
    }

    #[test]
    fn test_unknown_labels() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let registry = registry(&mut rng);
        let initial = initial();
        for label in ["nope", "nope_PL_p_PV_m"] {
            let err = concretize(&[vec![AbstractStep::new(label, 1.0)]], &registry, &initial, &mut rng).unwrap_err();
            assert!(matches!(err, Error::UnknownLabel(_)), "{}", label);
        }
        let err = concretize(
            &[vec![AbstractStep::new("to_lunch_PL_p_PV_zz", 1.0)]],
            &registry,
            &initial,
            &mut rng,
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedTrajectory { .. }));
    }

    #[test]
    fn test_stops_at_terminal_step() {
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let registry = registry(&mut rng);
        let initial = initial();
        let trajectory = vec![
            AbstractStep::new("idle", 1.0),
            AbstractStep::end(),
            AbstractStep::new("unknown", 1.0),
        ];
        let words = concretize(&[trajectory], &registry, &initial, &mut rng).unwrap();
        assert_eq!(words[0].len(), 2);
    }

    #[test]
    fn test_negative_delay() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let registry = registry(&mut rng);
        let initial = initial();
        let trajectories = vec![vec![], vec![AbstractStep::new("idle", -1.0)]];
        let err = concretize(&trajectories, &registry, &initial, &mut rng).unwrap_err();
        assert!(matches!(err, Error::MalformedTrajectory { trajectory: 1, step: 0, .. }));
    }

    #[test]
    fn test_sampled_initial_values() {
        let mut rng = ChaCha8Rng::seed_from_u64(10);
        let registry = registry(&mut rng);
        let guard = Guard::within("m", 50.0, 60.0);
        let abstraction = Abstraction::build(
            &guard,
            &variables(),
            AbstractionKind::Hyperrectangle,
            &SamplerConfig::default(),
            &mut rng,
        )
        .unwrap();
        let initial = InitialValues::Sampled {
            abstraction,
            guard: Some(guard.to_string()),
        };
        let words = concretize(&[vec![], vec![]], &registry, &initial, &mut rng).unwrap();
        for word in &words {
            assert_eq!(word.len(), 1);
            assert!((50.0..=60.0).contains(&word[0].vars["m"]));
            assert_eq!(word[0].constraint.as_deref(), Some("m >= 50 && m <= 60"));
        }
    }

    #[test]
    fn test_seeded_determinism() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let registry = registry(&mut rng);
        let initial = initial();
        let trajectories = vec![vec![
            AbstractStep::new("to_lunch_PL_s2_PV_m2", 6.0),
            AbstractStep::new("snack", 1.0),
            AbstractStep::new("_PL_s2", 2.0),
        ]];
        let a = concretize(&trajectories, &registry, &initial, &mut ChaCha8Rng::seed_from_u64(99)).unwrap();
        let b = concretize(&trajectories, &registry, &initial, &mut ChaCha8Rng::seed_from_u64(99)).unwrap();
        assert_eq!(a, b);
    }
}
