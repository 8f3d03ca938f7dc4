//! End-to-end generation tests.
//!
//! The word generator is replaced by in-process fakes; the real process
//! adapter is covered in `wordgen_process.rs`.

use std::path::Path;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use stagen::abstraction::AbstractionKind;
use stagen::automaton::{Automaton, Location, Transition};
use stagen::concretize::{concretize, InitialValues};
use stagen::config::SamplerConfig;
use stagen::context::{GenerationContext, OutputPaths};
use stagen::error::{Error, GenerationFailure, Result};
use stagen::expr::{Guard, Term};
use stagen::generator::{ElapsedTime, TrajectoryGenerator};
use stagen::trajectory::{self, AbstractStep, AbstractTrajectory};
use stagen::types::Assignment;
use stagen::wordgen::{GenerationRequest, Replay, WordGenerator, Wordgen, WordgenConfig};

/// Returns the stored trajectories, cut to the requested shape.
struct Fixed(Vec<AbstractTrajectory>);

impl WordGenerator for Fixed {
    fn generate(&self, model: &Path, request: GenerationRequest, output: &Path) -> Result<Vec<AbstractTrajectory>> {
        assert!(model.exists(), "model must be written before generation");
        let trajectories: Vec<AbstractTrajectory> = self
            .0
            .iter()
            .take(request.count)
            .map(|t| t.iter().take(request.length).cloned().collect())
            .collect();
        trajectory::save_json(&trajectories, output)?;
        Ok(trajectories)
    }
}

fn meal_automaton(kind: AbstractionKind) -> Automaton {
    let mut sta = Automaton::new("meals", ["h", "d", "t"]);
    sta.add_variable("m", 0.0, 110.0).unwrap();
    sta.add_variable("m1", 0.0, 25.0).unwrap();
    sta.add_variable("m2", 0.0, 25.0).unwrap();
    sta.add_location(Location::new("B").initial().accepting()).unwrap();
    for name in ["S1", "L", "S2", "D"] {
        sta.add_location(Location::new(name)).unwrap();
    }
    let no_snack = Guard::le(Term::var("m1") + Term::var("m2"), 1.0);
    sta.add_transition(
        Transition::new("B", "S1", "to_snack_1")
            .with_guard(Guard::and(Guard::within("m", 15.0, 75.0), no_snack.clone()))
            .with_time_constraint(Guard::within("h", 5.0, 9.0))
            .with_resets(["d", "t"])
            .with_abstraction(kind),
    )
    .unwrap();
    sta.add_transition(
        Transition::new("B", "L", "to_lunch")
            .with_guard(Guard::all([
                Guard::within("m", 15.0, 75.0),
                Guard::le("m1", 1.0),
                Guard::ge("m2", 5.0),
            ]))
            .with_time_constraint(Guard::within("h", 5.0, 9.0))
            .with_resets(["d", "t"])
            .with_abstraction(kind),
    )
    .unwrap();
    sta.add_transition(
        Transition::new("L", "D", "to_dinner")
            .with_guard(Guard::and(Guard::within("m", 40.0, 100.0), no_snack))
            .with_time_constraint(Guard::within("h", 12.0, 15.0))
            .with_resets(["d", "t"])
            .with_abstraction(kind),
    )
    .unwrap();
    sta
}

fn zero_initial() -> InitialValues {
    InitialValues::Fixed(Assignment::from([
        ("m".to_string(), 0.0),
        ("m1".to_string(), 0.0),
        ("m2".to_string(), 0.0),
    ]))
}

// ─── End-to-end ────────────────────────────────────────────────────────────────

#[test]
fn single_step_from_breakfast() {
    for kind in [AbstractionKind::Hyperrectangle, AbstractionKind::Polytope] {
        let dir = tempfile::tempdir().unwrap();
        let words = Fixed(vec![vec![AbstractStep::new("to_snack_1", 6.5)]]);
        let gen =
            TrajectoryGenerator::new(meal_automaton(kind), zero_initial(), words, &SamplerConfig::default(), 0).unwrap();
        let mut ctx = GenerationContext::seeded(7, OutputPaths::new(dir.path()));

        let concrete = gen.generate(GenerationRequest::new(1, 1), &mut ctx).unwrap();
        assert_eq!(concrete.len(), 1);
        assert_eq!(concrete[0].len(), 2);
        let step = &concrete[0][1];
        assert_eq!(step.action.as_deref(), Some("to_snack_1"));
        assert_eq!(step.delay, 6.5);
        assert!((15.0..=75.0).contains(&step.vars["m"]), "{:?}: m = {}", kind, step.vars["m"]);
        assert!(step.vars["m1"] + step.vars["m2"] <= 1.0 + 1e-9);
    }
}

#[test]
fn encoded_model_weights_follow_volumes() {
    let gen = TrajectoryGenerator::new(
        meal_automaton(AbstractionKind::Polytope),
        zero_initial(),
        Fixed(vec![]),
        &SamplerConfig::default(),
        0,
    )
    .unwrap();
    let volumes = gen.registry().volumes();
    // m1 + m2 <= 1 covers half of [0,1]^2, m1 <= 1 and m2 >= 5 are boxes.
    let snack = volumes["to_snack_1"];
    let lunch = volumes["to_lunch"];
    let expected_snack = (60.0 / 110.0) * (0.5 / 625.0);
    let expected_lunch = (60.0 / 110.0) * (1.0 / 25.0) * (20.0 / 25.0);
    assert!((snack - expected_snack).abs() < 0.05 * expected_snack, "{} vs {}", snack, expected_snack);
    assert!((lunch - expected_lunch).abs() < 1e-12);

    let model = &gen.encodings().model;
    let weights: Vec<f64> = model.outgoing(0).map(|t| t.weight).collect();
    assert_eq!(weights, vec![snack, lunch]);
}

#[test]
fn length_zero_yields_initial_step_only() {
    let dir = tempfile::tempdir().unwrap();
    // No such executable: a length-0 request must not try to run it.
    let wordgen = Wordgen::new(WordgenConfig::default().with_program(dir.path().join("missing-wordgen")));
    let gen = TrajectoryGenerator::new(
        meal_automaton(AbstractionKind::Polytope),
        zero_initial(),
        wordgen,
        &SamplerConfig::default(),
        0,
    )
    .unwrap();
    let mut ctx = GenerationContext::seeded(1, OutputPaths::new(dir.path()));
    let concrete = gen.generate(GenerationRequest::new(2, 0), &mut ctx).unwrap();
    assert_eq!(concrete.len(), 2);
    for t in &concrete {
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].delay, 0.0);
        assert_eq!(t[0].action, None);
    }

    let err = gen.generate(GenerationRequest::new(1, 1), &mut ctx).unwrap_err();
    assert!(matches!(err, Error::GenerationFailed(GenerationFailure::NotFound { .. })));
}

#[test]
fn seeded_generation_is_reproducible() {
    let words = vec![vec![
        AbstractStep::new("to_lunch", 6.0),
        AbstractStep::new("to_dinner", 6.0),
    ]];
    let run = |dir: &Path| {
        let gen = TrajectoryGenerator::new(
            meal_automaton(AbstractionKind::Polytope),
            zero_initial(),
            Fixed(words.clone()),
            &SamplerConfig::default(),
            0,
        )
        .unwrap();
        let mut ctx = GenerationContext::seeded(123, OutputPaths::new(dir));
        gen.generate(GenerationRequest::new(1, 2), &mut ctx).unwrap()
    };
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    assert_eq!(run(a.path()), run(b.path()));
}

#[test]
fn replay_saved_abstract_trajectories() {
    let dir = tempfile::tempdir().unwrap();
    let gen = TrajectoryGenerator::new(
        meal_automaton(AbstractionKind::Polytope),
        zero_initial(),
        Fixed(vec![vec![AbstractStep::new("to_lunch", 6.0), AbstractStep::new("to_dinner", 6.0)]]),
        &SamplerConfig::default(),
        0,
    )
    .unwrap();
    let mut ctx = GenerationContext::seeded(5, OutputPaths::new(dir.path().join("first")));
    let first = gen.generate(GenerationRequest::new(1, 2), &mut ctx).unwrap();

    let replay = TrajectoryGenerator::new(
        meal_automaton(AbstractionKind::Polytope),
        zero_initial(),
        Replay::new(ctx.paths.abstract_trajectories()),
        &SamplerConfig::default(),
        0,
    )
    .unwrap();
    let mut ctx = GenerationContext::seeded(5, OutputPaths::new(dir.path().join("second")));
    let second = replay.generate(GenerationRequest::new(1, 2), &mut ctx).unwrap();
    assert_eq!(first, second);
}

#[test]
fn elapsed_time_events() {
    let dir = tempfile::tempdir().unwrap();
    let gen = TrajectoryGenerator::new(
        meal_automaton(AbstractionKind::Hyperrectangle),
        zero_initial(),
        Fixed(vec![vec![AbstractStep::new("to_lunch", 7.0), AbstractStep::new("to_dinner", 5.5)]]),
        &SamplerConfig::default(),
        0,
    )
    .unwrap();
    let mut ctx = GenerationContext::seeded(2, OutputPaths::new(dir.path()));
    let events = gen
        .generate_events(GenerationRequest::new(1, 2), &mut ctx, &ElapsedTime)
        .unwrap();
    let times: Vec<f64> = events[0].iter().map(|(t, _)| *t).collect();
    assert_eq!(times, vec![0.0, 7.0, 12.5]);
    assert!((40.0..=100.0).contains(&events[0][2].1["m"]));
}

// ─── Postponed bindings ────────────────────────────────────────────────────────

/// The meal automaton where lunch may defer snack 2 to a later release step.
fn meal_automaton_with_deferred_snack() -> Automaton {
    let mut sta = meal_automaton(AbstractionKind::Polytope);
    sta.add_transition(
        Transition::new("B", "L", "to_lunch_PL_s2_PV_m2")
            .with_guard(Guard::all([
                Guard::within("m", 15.0, 75.0),
                Guard::le("m1", 1.0),
                Guard::ge("m2", 5.0),
            ]))
            .with_time_constraint(Guard::within("h", 5.0, 9.0))
            .with_resets(["d", "t"]),
    )
    .unwrap();
    sta.add_transition(
        Transition::new("L", "S2", "_PL_s2")
            .with_guard(Guard::within("m", 0.0, 11.0))
            .with_time_constraint(Guard::within("h", 12.0, 15.0)),
    )
    .unwrap();
    sta
}

#[test]
fn generator_defers_and_releases_snack() {
    let dir = tempfile::tempdir().unwrap();
    let words = Fixed(vec![vec![
        AbstractStep::new("to_lunch_PL_s2_PV_m2", 6.0),
        AbstractStep::new("_PL_s2", 3.0),
    ]]);
    let gen = TrajectoryGenerator::new(
        meal_automaton_with_deferred_snack(),
        zero_initial(),
        words,
        &SamplerConfig::default(),
        0,
    )
    .unwrap();

    let volumes = gen.registry().volumes();
    assert_eq!(volumes["to_lunch_PL_s2_PV_m2"], volumes["to_lunch"]);
    assert!((volumes["_PL_s2"] - 0.1).abs() < 1e-12);
    let labels: Vec<&str> = gen.encodings().model.transitions.iter().map(|t| t.label.as_str()).collect();
    assert!(labels.contains(&"to_lunch_PL_s2_PV_m2"));
    assert!(labels.contains(&"_PL_s2"));

    let mut ctx = GenerationContext::seeded(11, OutputPaths::new(dir.path()));
    let concrete = gen.generate(GenerationRequest::new(1, 2), &mut ctx).unwrap();
    let word = &concrete[0];
    assert_eq!(word.len(), 3);

    let deferred = &word[1];
    assert_eq!(deferred.vars.keys().collect::<Vec<_>>(), vec!["m", "m1"]);
    assert!((15.0..=75.0).contains(&deferred.vars["m"]));
    assert_eq!(deferred.post_label.as_deref(), Some("s2"));

    let released = &word[2];
    assert_eq!(released.vars.keys().collect::<Vec<_>>(), vec!["m2"]);
    assert!((5.0..=25.0).contains(&released.vars["m2"]));
    assert_eq!(released.post_label.as_deref(), Some("s2"));
    assert_eq!(released.constraint, deferred.constraint);
}

#[test]
fn postponed_snack_is_released_later() {
    let sta = meal_automaton(AbstractionKind::Polytope);
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let registry = sta.estimate_volumes(&SamplerConfig::default(), &mut rng).unwrap();
    let trajectories = vec![vec![
        AbstractStep::new("to_lunch_PL_snack2_PV_m2", 6.0),
        AbstractStep::new("to_dinner", 6.0),
        AbstractStep::new("_PL_snack2", 2.0),
    ]];
    let words = concretize(&trajectories, &registry, &zero_initial(), &mut rng).unwrap();
    let word = &words[0];
    assert_eq!(word.len(), 4);
    assert!(!word[1].vars.contains_key("m2"));
    assert!((15.0..=75.0).contains(&word[1].vars["m"]));
    assert_eq!(word[3].vars.keys().collect::<Vec<_>>(), vec!["m2"]);
    assert!((5.0..=25.0).contains(&word[3].vars["m2"]));
    assert_eq!(word[3].post_label.as_deref(), Some("snack2"));
}

#[test]
fn postpone_errors_abort_the_request() {
    let sta = meal_automaton(AbstractionKind::Polytope);
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let registry = sta.estimate_volumes(&SamplerConfig::default(), &mut rng).unwrap();

    let release_first = vec![vec![AbstractStep::new("_PL_snack2", 1.0)]];
    let err = concretize(&release_first, &registry, &zero_initial(), &mut rng).unwrap_err();
    assert!(matches!(err, Error::MissingPostpone { .. }));

    let twice = vec![vec![
        AbstractStep::new("to_lunch_PL_snack2_PV_m2", 1.0),
        AbstractStep::new("to_lunch_PL_snack2_PV_m2", 1.0),
    ]];
    let err = concretize(&twice, &registry, &zero_initial(), &mut rng).unwrap_err();
    assert!(matches!(err, Error::UnresolvedPostpone { .. }));

    // The registry is untouched by failed requests.
    let ok = vec![vec![AbstractStep::new("to_lunch", 1.0)]];
    assert_eq!(concretize(&ok, &registry, &zero_initial(), &mut rng).unwrap()[0].len(), 2);
}
