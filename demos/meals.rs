//! Daily meal schedules from a symbolic timed automaton.
//!
//! Five locations (`b`: before breakfast, `s1`: before snack 1, `l`: before
//! lunch, `s2`: before snack 2, `d`: before dinner) and three meal-size
//! variables: `m` for the main meal, `m1`, `m2` for the snacks. Snacks are
//! decided together when leaving a main meal, so the total snack intake per
//! half-day stays bounded.
//!
//! Requires the `wordgen` executable (see `--wordgen`).

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;

use stagen::automaton::{Automaton, Location, Transition};
use stagen::concretize::InitialValues;
use stagen::config::SamplerConfig;
use stagen::context::{GenerationContext, OutputPaths};
use stagen::error::Result;
use stagen::expr::{Guard, Term};
use stagen::generator::{DomainAdapter, TrajectoryGenerator};
use stagen::trajectory::{self, ConcreteTrajectory};
use stagen::types::Assignment;
use stagen::wordgen::{GenerationRequest, Wordgen, WordgenConfig};

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// Number of trajectories to generate.
    #[arg(short = 'n', long, value_name = "INT", default_value = "1")]
    number: usize,

    /// Number of events per trajectory.
    #[arg(short = 'l', long, value_name = "INT", default_value = "6")]
    length: usize,

    /// Output directory.
    #[arg(short = 'o', long, value_name = "DIR", default_value = "output")]
    out_dir: PathBuf,

    /// File name of the encoded automaton (PRISM format).
    #[arg(short = 's', long, value_name = "FILE", default_value = "sta.prism")]
    sta: String,

    /// File name of the abstract trajectories.
    #[arg(short = 'a', long = "abstract", value_name = "FILE", default_value = "abstract_trajectories.json")]
    abstract_out: String,

    /// File name of the concrete trajectories.
    #[arg(short = 'c', long = "concrete", value_name = "FILE", default_value = "concrete_trajectories.json")]
    concrete_out: String,

    /// Path of the wordgen executable.
    #[arg(short = 'w', long, value_name = "PATH", default_value = "wordgen")]
    wordgen: PathBuf,

    /// Kill wordgen after this many seconds.
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Seed for reproducible output; random if absent.
    #[arg(long, value_name = "INT")]
    seed: Option<u64>,

    /// Seed for the volume estimates.
    #[arg(long, value_name = "INT", default_value = "0")]
    volume_seed: u64,
}

const MAX_SUM_SNACKS: f64 = 40.0;

fn build_automaton() -> Result<Automaton> {
    let mut sta = Automaton::new("meals", ["h", "d", "t"]);

    sta.add_variable("m", 0.0, 110.0)?;
    sta.add_variable("m1", 0.0, 25.0)?;
    sta.add_variable("m2", 0.0, 25.0)?;

    sta.add_location(Location::new("b").initial().accepting())?;
    sta.add_location(Location::new("s1"))?;
    sta.add_location(Location::new("l"))?;
    sta.add_location(Location::new("s2"))?;
    sta.add_location(Location::new("d"))?;

    let snacks = || Term::var("m1") + Term::var("m2");
    let no_snack = || Guard::le(snacks(), 1.0);
    let only_snack_2 = || Guard::and(Guard::le("m1", 1.0), Guard::ge("m2", 5.0));
    let both_snacks = || {
        Guard::all([
            Guard::le(snacks(), MAX_SUM_SNACKS),
            Guard::ge("m1", 5.0),
            Guard::ge("m2", 5.0),
        ])
    };
    // Snack steps carry no main meal.
    let no_meal = || Guard::within("m", 0.0, 1.0);

    sta.add_transition(
        Transition::new("b", "s1", "to_snack_1")
            .with_guard(Guard::and(Guard::within("m", 15.0, 75.0), no_snack()))
            .with_time_constraint(Guard::within("h", 5.0, 9.0))
            .with_resets(["d", "t"]),
    )?;
    sta.add_transition(
        Transition::new("b", "l", "to_lunch")
            .with_guard(Guard::and(Guard::within("m", 15.0, 75.0), only_snack_2()))
            .with_time_constraint(Guard::within("h", 5.0, 9.0))
            .with_resets(["d", "t"]),
    )?;
    sta.add_transition(
        Transition::new("s1", "l", "snack_to_lunch")
            .with_guard(Guard::and(both_snacks(), no_meal()))
            .with_time_constraint(Guard::within("h", 9.0, 11.0))
            .with_resets(["t"]),
    )?;
    for (target, label) in [("s2", "to_snack_2"), ("d", "to_dinner")] {
        sta.add_transition(
            Transition::new("l", target, label)
                .with_guard(Guard::and(Guard::within("m", 40.0, 100.0), no_snack()))
                .with_time_constraint(Guard::and(Guard::within("h", 12.0, 15.0), Guard::within("d", 4.0, 6.0)))
                .with_resets(["d", "t"]),
        )?;
    }
    sta.add_transition(
        Transition::new("s2", "d", "snack_to_dinner")
            .with_guard(Guard::and(both_snacks(), no_meal()))
            .with_time_constraint(Guard::within("h", 15.0, 18.0))
            .with_resets(["t"]),
    )?;
    sta.add_transition(
        Transition::new("d", "b", "to_breakfast")
            .with_guard(Guard::and(Guard::within("m", 50.0, 110.0), no_snack()))
            .with_time_constraint(Guard::and(Guard::within("h", 19.0, 22.0), Guard::within("d", 5.0, 7.0)))
            .with_resets(["d", "t", "h"]),
    )?;

    Ok(sta)
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Need {
    Breakfast,
    Snack1,
    Lunch,
    Snack2,
    Dinner,
}

/// A meal at an absolute time (hours since the start).
#[derive(Debug, Clone, PartialEq)]
struct Meal {
    name: &'static str,
    grams: f64,
}

/// Replays the automaton on a concrete trajectory and emits one meal per step.
///
/// Snack 2 is decided when leaving breakfast or snack 1 and served later.
/// After dinner the clock jumps to the next midnight.
struct MealSchedule;

fn round_to(x: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (x * scale).round() / scale
}

impl DomainAdapter for MealSchedule {
    type Event = Meal;

    fn events(&self, trajectory: &ConcreteTrajectory) -> Result<Vec<(f64, Meal)>> {
        let value = |vars: &Assignment, name: &str| round_to(vars.get(name).copied().unwrap_or(0.0), 1);

        let mut meals = Vec::new();
        let mut time = 0.0;
        let mut need = Need::Breakfast;
        let mut snack_2 = 0.0;

        for step in trajectory {
            let Some(action) = step.action.as_deref() else {
                continue;
            };
            let (name, grams) = match need {
                Need::Breakfast => {
                    snack_2 = 0.0;
                    if action == "to_lunch" {
                        need = Need::Lunch;
                        snack_2 = value(&step.vars, "m2");
                    } else {
                        need = Need::Snack1;
                    }
                    ("Breakfast", value(&step.vars, "m"))
                }
                Need::Snack1 => {
                    snack_2 = value(&step.vars, "m2");
                    need = Need::Lunch;
                    ("Snack 1", value(&step.vars, "m1"))
                }
                Need::Lunch => {
                    need = if action == "to_snack_2" { Need::Snack2 } else { Need::Dinner };
                    ("Lunch", value(&step.vars, "m"))
                }
                Need::Snack2 => {
                    need = Need::Dinner;
                    ("Snack 2", snack_2)
                }
                Need::Dinner => {
                    need = Need::Breakfast;
                    ("Dinner", value(&step.vars, "m"))
                }
            };
            time += round_to(step.delay, 2);
            meals.push((time, Meal { name, grams }));
            if need == Need::Breakfast {
                time = (time + (24.0 - time % 24.0)).floor();
            }
        }
        Ok(meals)
    }
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let time_total = Instant::now();

    let args = Cli::parse();
    println!("args = {:?}", args);

    let mut config = WordgenConfig::default().with_program(&args.wordgen);
    if let Some(secs) = args.timeout {
        config = config.with_timeout(Duration::from_secs(secs));
    }

    let sta = build_automaton()?;
    let initial = InitialValues::Fixed(Assignment::from([
        ("m".to_string(), 0.0),
        ("m1".to_string(), 0.0),
        ("m2".to_string(), 0.0),
    ]));
    let generator =
        TrajectoryGenerator::new(sta, initial, Wordgen::new(config), &SamplerConfig::default(), args.volume_seed)?;
    for (label, volume) in generator.registry().volumes() {
        println!("volume({}) = {:.6}", label, volume);
    }

    let paths = OutputPaths::new(&args.out_dir)
        .with_model(&args.sta)
        .with_abstract_trajectories(&args.abstract_out)
        .with_concrete_trajectories(&args.concrete_out);
    let mut ctx = match args.seed {
        Some(seed) => GenerationContext::seeded(seed, paths),
        None => GenerationContext::from_entropy(paths),
    };

    let request = GenerationRequest::new(args.number, args.length);
    let schedules = generator.generate_events(request, &mut ctx, &MealSchedule)?;

    let mut rows = Vec::new();
    for (i, schedule) in schedules.iter().enumerate() {
        println!("Scenario #{}:", i + 1);
        for (time, meal) in schedule {
            println!("  day {} at {:5.2}h: {:<9} {:5.1} g", (time / 24.0).floor() as u64 + 1, time % 24.0, meal.name, meal.grams);
        }
        rows.push(schedule.iter().map(|(t, meal)| (*t, meal.grams)).collect::<Vec<_>>());
    }
    let meals_path = ctx.paths.dir().join("meals.json");
    trajectory::save_json(&rows, &meals_path)?;
    println!("Meal schedules written to {}", meals_path.display());

    println!("Total time: {:.3} s", time_total.elapsed().as_secs_f64());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use stagen::trajectory::ConcreteStep;
    use test_log::test;

    fn step(action: &str, delay: f64, m: f64, m1: f64, m2: f64) -> ConcreteStep {
        ConcreteStep {
            delay,
            vars: Assignment::from([("m".to_string(), m), ("m1".to_string(), m1), ("m2".to_string(), m2)]),
            action: Some(action.to_string()),
            constraint: None,
            post_label: None,
        }
    }

    #[test]
    fn test_automaton_builds() {
        let sta = build_automaton().unwrap();
        assert_eq!(sta.locations().len(), 5);
        assert_eq!(sta.transitions().len(), 7);
    }

    #[test]
    fn test_meal_schedule() {
        let trajectory = vec![
            ConcreteStep::initial(Assignment::new(), None),
            step("to_lunch", 7.0, 40.0, 0.5, 12.0),
            step("to_snack_2", 6.0, 70.0, 0.2, 0.3),
            step("snack_to_dinner", 3.0, 0.5, 10.0, 20.0),
            step("to_breakfast", 4.0, 80.0, 0.1, 0.1),
            step("to_snack_1", 7.5, 45.0, 0.0, 0.0),
        ];
        let meals = MealSchedule.events(&trajectory).unwrap();
        let got: Vec<(f64, &str, f64)> = meals.iter().map(|(t, m)| (*t, m.name, m.grams)).collect();
        assert_eq!(
            got,
            vec![
                (7.0, "Breakfast", 40.0),
                (13.0, "Lunch", 70.0),
                (16.0, "Snack 2", 12.0),
                (20.0, "Dinner", 80.0),
                (31.5, "Breakfast", 45.0),
            ]
        );
    }
}
