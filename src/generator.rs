//! End-to-end trajectory generation.
//!
//! [`TrajectoryGenerator`] is built once per automaton: it abstracts every
//! guard, encodes the automaton and keeps the result read-only. Each call to
//! [`TrajectoryGenerator::generate`] then writes the encoded model, asks the
//! word generator for abstract trajectories and concretizes them using the
//! caller's [`GenerationContext`].

use std::fs;

use log::info;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::abstraction::AbstractionRegistry;
use crate::automaton::{Automaton, Encodings};
use crate::concretize::{Concretizer, InitialValues};
use crate::config::SamplerConfig;
use crate::context::{GenerationContext, OutputPaths};
use crate::error::Result;
use crate::trajectory::{self, AbstractTrajectory, ConcreteTrajectory};
use crate::types::Assignment;
use crate::wordgen::{GenerationRequest, WordGenerator};

/// Maps a concrete trajectory to timed events for the system under test.
pub trait DomainAdapter {
    type Event;

    fn events(&self, trajectory: &ConcreteTrajectory) -> Result<Vec<(f64, Self::Event)>>;
}

/// Emits every step's values at its absolute time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElapsedTime;

impl DomainAdapter for ElapsedTime {
    type Event = Assignment;

    fn events(&self, trajectory: &ConcreteTrajectory) -> Result<Vec<(f64, Assignment)>> {
        let mut time = 0.0;
        Ok(trajectory
            .iter()
            .map(|step| {
                time += step.delay;
                (time, step.vars.clone())
            })
            .collect())
    }
}

/// Automaton-driven trajectory generator.
#[derive(Debug)]
pub struct TrajectoryGenerator<W> {
    automaton: Automaton,
    registry: AbstractionRegistry,
    encodings: Encodings,
    initial: InitialValues,
    word_generator: W,
}

impl<W: WordGenerator> TrajectoryGenerator<W> {
    /// Abstracts and encodes `automaton`.
    ///
    /// Volumes are estimated with a random stream seeded by `volume_seed`,
    /// so the encoded weights do not depend on any generation context.
    pub fn new(
        automaton: Automaton,
        initial: InitialValues,
        word_generator: W,
        config: &SamplerConfig,
        volume_seed: u64,
    ) -> Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(volume_seed);
        let registry = automaton.estimate_volumes(config, &mut rng)?;
        let encodings = automaton.encode_for_generation(&registry.volumes())?;
        Ok(TrajectoryGenerator {
            automaton,
            registry,
            encodings,
            initial,
            word_generator,
        })
    }

    /// Values emitted for `label` when it has no abstraction.
    pub fn with_fixed_values(mut self, label: impl Into<String>, values: Assignment) -> Self {
        self.registry.insert_fixed(label, values);
        self
    }

    pub fn automaton(&self) -> &Automaton {
        &self.automaton
    }

    pub fn registry(&self) -> &AbstractionRegistry {
        &self.registry
    }

    pub fn encodings(&self) -> &Encodings {
        &self.encodings
    }

    /// Writes the encoded model and its guard-visible companion.
    pub fn write_models(&self, paths: &OutputPaths) -> Result<()> {
        fs::create_dir_all(paths.dir())?;
        self.encodings.model.save(paths.model())?;
        self.encodings.audit.save(paths.model_constraints())?;
        info!("encoded model written to {}", paths.model().display());
        Ok(())
    }

    /// Obtains `request.count` abstract trajectories.
    ///
    /// A request of length 0 does not run the word generator.
    pub fn abstract_trajectories(
        &self,
        request: GenerationRequest,
        ctx: &GenerationContext,
    ) -> Result<Vec<AbstractTrajectory>> {
        let output = ctx.paths.abstract_trajectories();
        let trajectories = if request.length == 0 {
            let empty = vec![AbstractTrajectory::new(); request.count];
            trajectory::save_json(&empty, &output)?;
            empty
        } else {
            self.write_models(&ctx.paths)?;
            self.word_generator.generate(&ctx.paths.model(), request, &output)?
        };
        trajectory::validate(&trajectories)?;
        Ok(trajectories)
    }

    /// Concretizes `trajectories` with the context's random source.
    pub fn concretize(
        &self,
        trajectories: &[AbstractTrajectory],
        ctx: &mut GenerationContext,
    ) -> Result<Vec<ConcreteTrajectory>> {
        Concretizer::new(&self.registry, &self.initial).concretize(trajectories, &mut ctx.rng)
    }

    /// Generates and saves `request.count` concrete trajectories.
    pub fn generate(&self, request: GenerationRequest, ctx: &mut GenerationContext) -> Result<Vec<ConcreteTrajectory>> {
        fs::create_dir_all(ctx.paths.dir())?;
        let abstract_trajectories = self.abstract_trajectories(request, ctx)?;
        let concrete = self.concretize(&abstract_trajectories, ctx)?;
        trajectory::save_json(&concrete, ctx.paths.concrete_trajectories())?;
        info!(
            "{} concrete trajectories written to {}",
            concrete.len(),
            ctx.paths.concrete_trajectories().display()
        );
        Ok(concrete)
    }

    /// Generates trajectories and maps each through `adapter`.
    pub fn generate_events<A: DomainAdapter>(
        &self,
        request: GenerationRequest,
        ctx: &mut GenerationContext,
        adapter: &A,
    ) -> Result<Vec<Vec<(f64, A::Event)>>> {
        self.generate(request, ctx)?
            .iter()
            .map(|t| adapter.events(t))
            .collect()
    }
}
