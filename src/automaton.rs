//! Symbolic timed automata.
//!
//! An [`Automaton`] has real-valued [`Variable`]s, clocks, [`Location`]s and
//! labelled [`Transition`]s. Each transition carries a guard over the
//! variables (which values the step may emit), a time constraint over the
//! clocks (when it may fire) and a set of clocks it resets.
//!
//! The automaton is mutated only during a build phase
//! ([`Automaton::add_variable`], [`Automaton::add_location`],
//! [`Automaton::add_transition`]); every addition is validated, so a built
//! automaton always satisfies:
//!
//! - location names and transition labels are unique,
//! - transition endpoints are declared locations,
//! - guards mention only declared variables,
//! - time constraints, invariants and resets mention only declared clocks.
//!
//! After building, the automaton is shared read-only. The external word
//! generator cannot reason about variable guards, so
//! [`Automaton::encode_for_generation`] replaces every guard by the relative
//! volume of its feasible region.
//!
//! ```
//! use stagen::automaton::{Automaton, Location, Transition};
//! use stagen::expr::Guard;
//!
//! let mut sta = Automaton::new("toy", ["h"]);
//! sta.add_variable("x", 0.0, 10.0).unwrap();
//! sta.add_location(Location::new("a").initial()).unwrap();
//! sta.add_location(Location::new("b")).unwrap();
//! sta.add_transition(
//!     Transition::new("a", "b", "go")
//!         .with_guard(Guard::le("x", 5.0))
//!         .with_time_constraint(Guard::ge("h", 1.0))
//!         .with_resets(["h"]),
//! )
//! .unwrap();
//! assert_eq!(sta.transitions().len(), 1);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as FmtWrite};
use std::fs;
use std::path::Path;

use log::{debug, info};
use rand::Rng;

use crate::abstraction::{Abstraction, AbstractionKind, AbstractionRegistry};
use crate::concretize::PostponeLabel;
use crate::config::SamplerConfig;
use crate::error::{Error, Result};
use crate::expr::Guard;
use crate::types::{Domain, Variable};

/// A discrete state of the automaton.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    name: String,
    initial: bool,
    accepting: bool,
    invariant: Guard,
}

impl Location {
    pub fn new(name: impl Into<String>) -> Self {
        Location {
            name: name.into(),
            initial: false,
            accepting: false,
            invariant: Guard::True,
        }
    }

    /// Marks the location as initial.
    pub fn initial(mut self) -> Self {
        self.initial = true;
        self
    }

    /// Marks the location as final.
    pub fn accepting(mut self) -> Self {
        self.accepting = true;
        self
    }

    /// Clock invariant that must hold while the location is active.
    pub fn with_invariant(mut self, invariant: Guard) -> Self {
        self.invariant = invariant;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_initial(&self) -> bool {
        self.initial
    }

    pub fn is_final(&self) -> bool {
        self.accepting
    }

    pub fn invariant(&self) -> &Guard {
        &self.invariant
    }
}

/// A labelled, guarded edge between two locations.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    source: String,
    target: String,
    label: String,
    guard: Guard,
    time_constraint: Guard,
    resets: Vec<String>,
    abstraction: AbstractionKind,
}

impl Transition {
    /// A transition with guard and time constraint `true` and no resets.
    pub fn new(source: impl Into<String>, target: impl Into<String>, label: impl Into<String>) -> Self {
        Transition {
            source: source.into(),
            target: target.into(),
            label: label.into(),
            guard: Guard::True,
            time_constraint: Guard::True,
            resets: Vec::new(),
            abstraction: AbstractionKind::default(),
        }
    }

    pub fn with_guard(mut self, guard: Guard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_time_constraint(mut self, time_constraint: Guard) -> Self {
        self.time_constraint = time_constraint;
        self
    }

    pub fn with_resets<S: Into<String>>(mut self, clocks: impl IntoIterator<Item = S>) -> Self {
        self.resets = clocks.into_iter().map(Into::into).collect();
        self
    }

    /// Selects how the guard region is abstracted (default: polytope).
    pub fn with_abstraction(mut self, kind: AbstractionKind) -> Self {
        self.abstraction = kind;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn guard(&self) -> &Guard {
        &self.guard
    }

    pub fn time_constraint(&self) -> &Guard {
        &self.time_constraint
    }

    pub fn resets(&self) -> &[String] {
        &self.resets
    }

    pub fn abstraction_kind(&self) -> AbstractionKind {
        self.abstraction
    }
}

/// Symbolic timed automaton.
#[derive(Debug, Clone)]
pub struct Automaton {
    name: String,
    variables: Vec<Variable>,
    clocks: Vec<String>,
    locations: Vec<Location>,
    transitions: Vec<Transition>,
}

impl Automaton {
    pub fn new<S: Into<String>>(name: impl Into<String>, clocks: impl IntoIterator<Item = S>) -> Self {
        Automaton {
            name: name.into(),
            variables: Vec::new(),
            clocks: clocks.into_iter().map(Into::into).collect(),
            locations: Vec::new(),
            transitions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn clocks(&self) -> &[String] {
        &self.clocks
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn location(&self, name: &str) -> Option<&Location> {
        self.locations.iter().find(|l| l.name == name)
    }

    pub fn transition(&self, label: &str) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.label == label)
    }

    pub fn initial_locations(&self) -> impl Iterator<Item = &Location> {
        self.locations.iter().filter(|l| l.initial)
    }

    /// Transitions leaving `location`, in insertion order.
    pub fn outgoing<'a>(&'a self, location: &'a str) -> impl Iterator<Item = &'a Transition> + 'a {
        self.transitions.iter().filter(move |t| t.source == location)
    }

    /// Declares a variable with domain `[lo, hi]`.
    pub fn add_variable(&mut self, name: impl Into<String>, lo: f64, hi: f64) -> Result<()> {
        let name = name.into();
        if self.variables.iter().any(|v| v.name() == name) || self.clocks.contains(&name) {
            return Err(Error::InvalidAutomaton(format!("name `{}` is already declared", name)));
        }
        let domain = Domain::new(lo, hi)?;
        debug!("variable {} ∈ {}", name, domain);
        self.variables.push(Variable::new(name, domain));
        Ok(())
    }

    pub fn add_location(&mut self, location: Location) -> Result<()> {
        if self.location(&location.name).is_some() {
            return Err(Error::InvalidAutomaton(format!(
                "location `{}` is already declared",
                location.name
            )));
        }
        self.check_clocks(&location.invariant, &format!("invariant of `{}`", location.name))?;
        self.locations.push(location);
        Ok(())
    }

    pub fn add_transition(&mut self, transition: Transition) -> Result<()> {
        let label = &transition.label;
        if label.is_empty() {
            return Err(Error::InvalidAutomaton("transition label must not be empty".to_string()));
        }
        if self.transition(label).is_some() {
            return Err(Error::InvalidAutomaton(format!("label `{}` is already used", label)));
        }
        for endpoint in [&transition.source, &transition.target] {
            if self.location(endpoint).is_none() {
                return Err(Error::InvalidAutomaton(format!(
                    "transition `{}` refers to undeclared location `{}`",
                    label, endpoint
                )));
            }
        }
        let declared: BTreeSet<&str> = self.variables.iter().map(|v| v.name()).collect();
        if let Some(unknown) = transition.guard.variables().iter().find(|v| !declared.contains(v.as_str())) {
            return Err(Error::InvalidAutomaton(format!(
                "guard of `{}` refers to undeclared variable `{}`",
                label, unknown
            )));
        }
        self.check_clocks(&transition.time_constraint, &format!("time constraint of `{}`", label))?;
        if let Some(unknown) = transition.resets.iter().find(|c| !self.clocks.contains(c)) {
            return Err(Error::InvalidAutomaton(format!(
                "transition `{}` resets undeclared clock `{}`",
                label, unknown
            )));
        }
        self.transitions.push(transition);
        Ok(())
    }

    fn check_clocks(&self, guard: &Guard, what: &str) -> Result<()> {
        match guard.variables().into_iter().find(|c| !self.clocks.contains(c)) {
            Some(unknown) => Err(Error::InvalidAutomaton(format!(
                "{} refers to undeclared clock `{}`",
                what, unknown
            ))),
            None => Ok(()),
        }
    }

    /// Abstracts every transition guard and registers it under the label.
    ///
    /// Postpone and release transitions are resolved by the concretizer, so
    /// they only get an encoding weight: a postpone weighs as much as its
    /// `<sub>` abstraction, a release as much as its own guard. A postpone
    /// whose `<sub>` is not a transition label registers its own guard under
    /// `<sub>`.
    ///
    /// Fails with [`Error::DanglingTransition`] naming the first transition
    /// whose guard could not be abstracted.
    pub fn estimate_volumes<R: Rng + ?Sized>(&self, config: &SamplerConfig, rng: &mut R) -> Result<AbstractionRegistry> {
        let build = |t: &Transition, rng: &mut R| {
            Abstraction::build(&t.guard, &self.variables, t.abstraction, config, rng).map_err(|e| {
                Error::DanglingTransition {
                    label: t.label.clone(),
                    source: Box::new(e),
                }
            })
        };

        let mut registry = AbstractionRegistry::new();
        let mut coupled = Vec::new();
        for t in &self.transitions {
            match PostponeLabel::parse(&t.label) {
                Some(label) => coupled.push((t, label)),
                None => registry.insert(t.label.clone(), build(t, rng)?, t.guard.to_string()),
            }
        }
        for (t, label) in coupled {
            let weight = match label {
                PostponeLabel::Postpone { sub, .. } => match registry.get(sub) {
                    Some(entry) => entry.abstraction.relative_volume(),
                    None => {
                        let abstraction = build(t, rng)?;
                        let volume = abstraction.relative_volume();
                        registry.insert(sub, abstraction, t.guard.to_string());
                        volume
                    }
                },
                PostponeLabel::Release { .. } => build(t, rng)?.relative_volume(),
            };
            debug!("`{}` resolves through `{}`, weight {}", t.label, label.post_label(), weight);
            registry.insert_weight(t.label.clone(), weight);
        }
        info!(
            "abstracted {} transition guards of automaton `{}`",
            registry.len(),
            self.name
        );
        Ok(registry)
    }

    /// Encodes the automaton with guards replaced by `volumes[label]`.
    ///
    /// Fails with [`Error::InvalidAutomaton`] when no location is initial.
    pub fn encode(&self, volumes: &BTreeMap<String, f64>, visibility: GuardVisibility) -> Result<EncodedModel> {
        if !self.locations.iter().any(|l| l.initial) {
            return Err(Error::InvalidAutomaton(format!(
                "automaton `{}` has no initial location",
                self.name
            )));
        }
        let index: BTreeMap<&str, usize> = self
            .locations
            .iter()
            .enumerate()
            .map(|(i, l)| (l.name.as_str(), i))
            .collect();

        let mut transitions = Vec::with_capacity(self.transitions.len());
        for t in &self.transitions {
            let weight = *volumes.get(&t.label).ok_or_else(|| Error::DanglingTransition {
                label: t.label.clone(),
                source: Box::new(Error::UnknownLabel(t.label.clone())),
            })?;
            transitions.push(EncodedTransition {
                source: index[t.source.as_str()],
                target: index[t.target.as_str()],
                label: t.label.clone(),
                time_constraint: t.time_constraint.clone(),
                resets: t.resets.clone(),
                weight,
                guard: match visibility {
                    GuardVisibility::Hidden => None,
                    GuardVisibility::Visible => Some(t.guard.to_string()),
                },
            });
        }

        Ok(EncodedModel {
            name: self.name.clone(),
            clocks: self.clocks.clone(),
            locations: self.locations.iter().map(|l| l.name.clone()).collect(),
            initial: self.locations.iter().enumerate().filter(|(_, l)| l.initial).map(|(i, _)| i).collect(),
            finals: self.locations.iter().enumerate().filter(|(_, l)| l.accepting).map(|(i, _)| i).collect(),
            invariants: self.locations.iter().map(|l| l.invariant.clone()).collect(),
            transitions,
        })
    }

    /// Produces the default (guards elided) and audit (guards shown) encodings.
    pub fn encode_for_generation(&self, volumes: &BTreeMap<String, f64>) -> Result<Encodings> {
        Ok(Encodings {
            model: self.encode(volumes, GuardVisibility::Hidden)?,
            audit: self.encode(volumes, GuardVisibility::Visible)?,
        })
    }
}

/// Whether guard text is kept in an encoding.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum GuardVisibility {
    Hidden,
    Visible,
}

/// A transition as seen by the word generator.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedTransition {
    pub source: usize,
    pub target: usize,
    pub label: String,
    pub time_constraint: Guard,
    pub resets: Vec<String>,
    pub weight: f64,
    pub guard: Option<String>,
}

/// Guard-free description of an automaton for the word generator.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedModel {
    pub name: String,
    pub clocks: Vec<String>,
    pub locations: Vec<String>,
    pub initial: Vec<usize>,
    pub finals: Vec<usize>,
    pub invariants: Vec<Guard>,
    pub transitions: Vec<EncodedTransition>,
}

/// Both encodings of one automaton.
#[derive(Debug, Clone, PartialEq)]
pub struct Encodings {
    /// Guards elided; handed to the word generator.
    pub model: EncodedModel,
    /// Guard text kept as comments; written for audit.
    pub audit: EncodedModel,
}

impl EncodedModel {
    pub fn outgoing(&self, location: usize) -> impl Iterator<Item = &EncodedTransition> {
        self.transitions.iter().filter(move |t| t.source == location)
    }

    /// Renders the model in the PRISM timed-automaton language.
    pub fn to_prism(&self) -> String {
        self.to_string()
    }

    fn write_prism<W: FmtWrite>(&self, out: &mut W) -> fmt::Result {
        let module = sanitize(&self.name);
        writeln!(out, "// {}: transition weights are relative guard volumes", self.name)?;
        writeln!(out, "pta")?;
        writeln!(out)?;
        writeln!(out, "module {}", module)?;
        let last = self.locations.len().saturating_sub(1);
        write!(out, "  loc : [0..{}]", last)?;
        if let [init] = self.initial.as_slice() {
            write!(out, " init {}", init)?;
        }
        writeln!(out, "; // {}", self.locations.join(" "))?;
        for clock in &self.clocks {
            writeln!(out, "  {} : clock;", clock)?;
        }

        if self.invariants.iter().any(|g| *g != Guard::True) {
            writeln!(out)?;
            writeln!(out, "  invariant")?;
            let parts: Vec<String> = self
                .invariants
                .iter()
                .enumerate()
                .map(|(i, g)| format!("(loc={} => {})", i, g.to_prism()))
                .collect();
            writeln!(out, "    {}", parts.join(" &\n    "))?;
            writeln!(out, "  endinvariant")?;
        }

        writeln!(out)?;
        for t in &self.transitions {
            if let Some(guard) = &t.guard {
                writeln!(out, "  // {}: {}", t.label, guard)?;
            }
            let mut update = vec![format!("(loc'={})", t.target)];
            update.extend(t.resets.iter().map(|c| format!("({}'=0)", c)));
            write!(out, "  [{}] loc={}", t.label, t.source)?;
            if t.time_constraint != Guard::True {
                write!(out, " & {}", t.time_constraint.to_prism())?;
            }
            writeln!(out, " -> {} : {};", t.weight, update.join(" & "))?;
        }
        writeln!(out, "endmodule")?;

        if self.initial.len() > 1 {
            let cond: Vec<String> = self.initial.iter().map(|i| format!("loc={}", i)).collect();
            writeln!(out)?;
            writeln!(out, "init")?;
            writeln!(out, "  {}", cond.join(" | "))?;
            writeln!(out, "endinit")?;
        }
        if !self.finals.is_empty() {
            let cond: Vec<String> = self.finals.iter().map(|i| format!("loc={}", i)).collect();
            writeln!(out)?;
            writeln!(out, "label \"final\" = {};", cond.join(" | "))?;
        }
        Ok(())
    }

    /// Writes the PRISM rendering to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path.as_ref(), self.to_prism())?;
        debug!("encoded model written to {}", path.as_ref().display());
        Ok(())
    }
}

impl fmt::Display for EncodedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_prism(f)
    }
}

fn sanitize(name: &str) -> String {
    let s: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if s.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        format!("m_{}", s)
    } else {
        s
    }
}
