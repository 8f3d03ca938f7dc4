//! Guard expressions over real-valued variables.
//!
//! A [`Guard`] is a boolean formula whose atoms compare two arithmetic
//! [`Term`]s. Terms are built from variables and constants with `+`, `-`,
//! unary negation and `*`; the usual operators are overloaded so that guards
//! read close to the mathematics:
//!
//! ```
//! use stagen::expr::{Guard, Term};
//!
//! let m1 = Term::var("m1");
//! let m2 = Term::var("m2");
//! let no_snack = Guard::le(m1 + m2, 1.0);
//! assert_eq!(no_snack.to_string(), "m1 + m2 <= 1");
//! ```
//!
//! The same type also expresses clock constraints on transitions; there the
//! variables are clock names.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

use crate::types::Assignment;

/// Arithmetic expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Var(String),
    Const(f64),
    Neg(Box<Term>),
    Add(Box<Term>, Box<Term>),
    Sub(Box<Term>, Box<Term>),
    Mul(Box<Term>, Box<Term>),
}

impl Term {
    pub fn var(name: impl Into<String>) -> Self {
        Term::Var(name.into())
    }

    pub fn constant(value: f64) -> Self {
        Term::Const(value)
    }

    /// Evaluates the term, or returns `None` if a variable is unbound.
    pub fn eval(&self, env: &Assignment) -> Option<f64> {
        match self {
            Term::Var(name) => env.get(name).copied(),
            Term::Const(c) => Some(*c),
            Term::Neg(a) => a.eval(env).map(|v| -v),
            Term::Add(a, b) => Some(a.eval(env)? + b.eval(env)?),
            Term::Sub(a, b) => Some(a.eval(env)? - b.eval(env)?),
            Term::Mul(a, b) => Some(a.eval(env)? * b.eval(env)?),
        }
    }

    /// Rewrites the term as `Σ cᵢ·xᵢ + k`.
    ///
    /// Fails when two non-constant factors are multiplied.
    pub fn linearize(&self) -> Result<LinearForm, String> {
        match self {
            Term::Var(name) => Ok(LinearForm::var(name)),
            Term::Const(c) => Ok(LinearForm::constant(*c)),
            Term::Neg(a) => Ok(a.linearize()?.scale(-1.0)),
            Term::Add(a, b) => Ok(a.linearize()?.add(&b.linearize()?, 1.0)),
            Term::Sub(a, b) => Ok(a.linearize()?.add(&b.linearize()?, -1.0)),
            Term::Mul(a, b) => {
                let lhs = a.linearize()?;
                let rhs = b.linearize()?;
                if lhs.is_constant() {
                    Ok(rhs.scale(lhs.constant))
                } else if rhs.is_constant() {
                    Ok(lhs.scale(rhs.constant))
                } else {
                    Err(format!("non-linear product `{}`", self))
                }
            }
        }
    }

    fn collect_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Term::Var(name) => {
                out.insert(name.clone());
            }
            Term::Const(_) => {}
            Term::Neg(a) => a.collect_vars(out),
            Term::Add(a, b) | Term::Sub(a, b) | Term::Mul(a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Term::Add(..) | Term::Sub(..) => 1,
            Term::Mul(..) => 2,
            Term::Neg(..) => 3,
            Term::Var(_) | Term::Const(_) => 4,
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, min_precedence: u8) -> fmt::Result {
        if self.precedence() < min_precedence {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(name) => write!(f, "{}", name),
            Term::Const(c) => write!(f, "{}", c),
            Term::Neg(a) => {
                write!(f, "-")?;
                a.fmt_operand(f, 3)
            }
            Term::Add(a, b) => {
                a.fmt_operand(f, 1)?;
                write!(f, " + ")?;
                b.fmt_operand(f, 2)
            }
            Term::Sub(a, b) => {
                a.fmt_operand(f, 1)?;
                write!(f, " - ")?;
                b.fmt_operand(f, 2)
            }
            Term::Mul(a, b) => {
                a.fmt_operand(f, 2)?;
                write!(f, "*")?;
                b.fmt_operand(f, 3)
            }
        }
    }
}

impl From<f64> for Term {
    fn from(value: f64) -> Self {
        Term::Const(value)
    }
}

impl From<&str> for Term {
    fn from(name: &str) -> Self {
        Term::Var(name.to_string())
    }
}

impl<T: Into<Term>> Add<T> for Term {
    type Output = Term;

    fn add(self, rhs: T) -> Self::Output {
        Term::Add(Box::new(self), Box::new(rhs.into()))
    }
}

impl<T: Into<Term>> Sub<T> for Term {
    type Output = Term;

    fn sub(self, rhs: T) -> Self::Output {
        Term::Sub(Box::new(self), Box::new(rhs.into()))
    }
}

impl<T: Into<Term>> Mul<T> for Term {
    type Output = Term;

    fn mul(self, rhs: T) -> Self::Output {
        Term::Mul(Box::new(self), Box::new(rhs.into()))
    }
}

impl Neg for Term {
    type Output = Term;

    fn neg(self) -> Self::Output {
        Term::Neg(Box::new(self))
    }
}

/// A linear form `Σ cᵢ·xᵢ + constant`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearForm {
    pub coeffs: BTreeMap<String, f64>,
    pub constant: f64,
}

impl LinearForm {
    pub fn var(name: &str) -> Self {
        LinearForm {
            coeffs: BTreeMap::from([(name.to_string(), 1.0)]),
            constant: 0.0,
        }
    }

    pub fn constant(value: f64) -> Self {
        LinearForm {
            coeffs: BTreeMap::new(),
            constant: value,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.coeffs.values().all(|&c| c == 0.0)
    }

    pub fn scale(mut self, factor: f64) -> Self {
        for c in self.coeffs.values_mut() {
            *c *= factor;
        }
        self.constant *= factor;
        self
    }

    /// Returns `self + factor * other`.
    pub fn add(mut self, other: &LinearForm, factor: f64) -> Self {
        for (name, c) in &other.coeffs {
            *self.coeffs.entry(name.clone()).or_insert(0.0) += factor * c;
        }
        self.constant += factor * other.constant;
        self.coeffs.retain(|_, c| *c != 0.0);
        self
    }
}

/// Comparison operator of a guard atom.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CmpOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl CmpOp {
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ge => lhs >= rhs,
            CmpOp::Gt => lhs > rhs,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "==",
            CmpOp::Ge => ">=",
            CmpOp::Gt => ">",
        }
    }

    fn prism_symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            op => op.symbol(),
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// A linear comparison normalised to `form op 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    pub form: LinearForm,
    pub op: CmpOp,
}

/// Boolean formula over comparisons of terms.
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    True,
    False,
    Cmp(Term, CmpOp, Term),
    And(Box<Guard>, Box<Guard>),
    Or(Box<Guard>, Box<Guard>),
}

impl Guard {
    pub fn cmp(lhs: impl Into<Term>, op: CmpOp, rhs: impl Into<Term>) -> Self {
        Guard::Cmp(lhs.into(), op, rhs.into())
    }

    pub fn lt(lhs: impl Into<Term>, rhs: impl Into<Term>) -> Self {
        Guard::cmp(lhs, CmpOp::Lt, rhs)
    }

    pub fn le(lhs: impl Into<Term>, rhs: impl Into<Term>) -> Self {
        Guard::cmp(lhs, CmpOp::Le, rhs)
    }

    pub fn eq(lhs: impl Into<Term>, rhs: impl Into<Term>) -> Self {
        Guard::cmp(lhs, CmpOp::Eq, rhs)
    }

    pub fn ge(lhs: impl Into<Term>, rhs: impl Into<Term>) -> Self {
        Guard::cmp(lhs, CmpOp::Ge, rhs)
    }

    pub fn gt(lhs: impl Into<Term>, rhs: impl Into<Term>) -> Self {
        Guard::cmp(lhs, CmpOp::Gt, rhs)
    }

    /// `lo <= var <= hi`
    pub fn within(var: &str, lo: f64, hi: f64) -> Self {
        Guard::and(Guard::ge(var, lo), Guard::le(var, hi))
    }

    pub fn and(lhs: Self, rhs: Self) -> Self {
        match (lhs, rhs) {
            (Guard::True, g) | (g, Guard::True) => g,
            (lhs, rhs) => Guard::And(Box::new(lhs), Box::new(rhs)),
        }
    }

    pub fn or(lhs: Self, rhs: Self) -> Self {
        Guard::Or(Box::new(lhs), Box::new(rhs))
    }

    /// Conjunction of all guards; `True` for an empty iterator.
    pub fn all(guards: impl IntoIterator<Item = Guard>) -> Self {
        guards.into_iter().fold(Guard::True, Guard::and)
    }

    /// Evaluates the guard, or returns `None` if a variable is unbound.
    pub fn eval(&self, env: &Assignment) -> Option<bool> {
        self.eval_with_tolerance(env, 0.0)
    }

    /// Like [`Guard::eval`], but each comparison may be violated by up to `tol`.
    pub fn eval_with_tolerance(&self, env: &Assignment, tol: f64) -> Option<bool> {
        match self {
            Guard::True => Some(true),
            Guard::False => Some(false),
            Guard::Cmp(lhs, op, rhs) => {
                let l = lhs.eval(env)?;
                let r = rhs.eval(env)?;
                if tol > 0.0 {
                    Some(match op {
                        CmpOp::Lt | CmpOp::Le => l <= r + tol,
                        CmpOp::Gt | CmpOp::Ge => l + tol >= r,
                        CmpOp::Eq => (l - r).abs() <= tol,
                    })
                } else {
                    Some(op.apply(l, r))
                }
            }
            Guard::And(a, b) => Some(a.eval_with_tolerance(env, tol)? && b.eval_with_tolerance(env, tol)?),
            Guard::Or(a, b) => Some(a.eval_with_tolerance(env, tol)? || b.eval_with_tolerance(env, tol)?),
        }
    }

    /// All variable names referenced by the guard.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Guard::True | Guard::False => {}
            Guard::Cmp(lhs, _, rhs) => {
                lhs.collect_vars(out);
                rhs.collect_vars(out);
            }
            Guard::And(a, b) | Guard::Or(a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
        }
    }

    /// Flattens a conjunction of linear comparisons.
    ///
    /// `False` becomes the unsatisfiable constraint `1 <= 0`. Disjunctions
    /// and non-linear terms are rejected with a reason.
    pub fn linear_conjuncts(&self) -> Result<Vec<LinearConstraint>, String> {
        let mut out = Vec::new();
        self.push_conjuncts(&mut out)?;
        Ok(out)
    }

    fn push_conjuncts(&self, out: &mut Vec<LinearConstraint>) -> Result<(), String> {
        match self {
            Guard::True => Ok(()),
            Guard::False => {
                out.push(LinearConstraint {
                    form: LinearForm::constant(1.0),
                    op: CmpOp::Le,
                });
                Ok(())
            }
            Guard::Cmp(lhs, op, rhs) => {
                let form = lhs.linearize()?.add(&rhs.linearize()?, -1.0);
                out.push(LinearConstraint { form, op: *op });
                Ok(())
            }
            Guard::And(a, b) => {
                a.push_conjuncts(out)?;
                b.push_conjuncts(out)
            }
            Guard::Or(..) => Err(format!("disjunction `{}` must be decomposed by the caller", self)),
        }
    }

    /// Renders the guard in the PRISM-style syntax, e.g. `(h>=5)&(h<=9)`.
    pub fn to_prism(&self) -> String {
        match self {
            Guard::True => "true".to_string(),
            Guard::False => "false".to_string(),
            Guard::Cmp(lhs, op, rhs) => {
                let lhs = lhs.to_string().replace(' ', "");
                let rhs = rhs.to_string().replace(' ', "");
                format!("({}{}{})", lhs, op.prism_symbol(), rhs)
            }
            Guard::And(a, b) => format!("{}&{}", a.to_prism(), b.to_prism()),
            Guard::Or(a, b) => format!("({}|{})", a.to_prism(), b.to_prism()),
        }
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guard::True => write!(f, "true"),
            Guard::False => write!(f, "false"),
            Guard::Cmp(lhs, op, rhs) => write!(f, "{} {} {}", lhs, op, rhs),
            Guard::And(a, b) => {
                for (i, side) in [a, b].into_iter().enumerate() {
                    if i > 0 {
                        write!(f, " && ")?;
                    }
                    match side.as_ref() {
                        Guard::Or(..) => write!(f, "({})", side)?,
                        _ => write!(f, "{}", side)?,
                    }
                }
                Ok(())
            }
            Guard::Or(a, b) => write!(f, "{} || {}", a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    fn env(pairs: &[(&str, f64)]) -> Assignment {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_term_eval() {
        let t = Term::var("x") * 2.0 + Term::var("y") - 1.0;
        assert_eq!(t.eval(&env(&[("x", 3.0), ("y", 4.0)])), Some(9.0));
        assert_eq!(t.eval(&env(&[("x", 3.0)])), None);
        assert_eq!((-Term::var("x")).eval(&env(&[("x", 3.0)])), Some(-3.0));
    }

    #[test]
    fn test_term_display() {
        let t = (Term::var("a") + Term::var("b")) * 2.0 - Term::var("c");
        assert_eq!(t.to_string(), "(a + b)*2 - c");
        let t = Term::var("a") - (Term::var("b") - Term::var("c"));
        assert_eq!(t.to_string(), "a - (b - c)");
    }

    #[test]
    fn test_linearize() {
        let t = (Term::var("x") + 1.0) * 3.0 - Term::var("y") * 2.0 + Term::var("x");
        let form = t.linearize().unwrap();
        assert_eq!(form.coeffs["x"], 4.0);
        assert_eq!(form.coeffs["y"], -2.0);
        assert_eq!(form.constant, 3.0);
    }

    #[test]
    fn test_linearize_cancels_terms() {
        let t = Term::var("x") - Term::var("x") + 5.0;
        let form = t.linearize().unwrap();
        assert!(form.is_constant());
        assert_eq!(form.constant, 5.0);
    }

    #[test]
    fn test_linearize_rejects_product_of_vars() {
        let t = Term::var("x") * Term::var("y");
        let err = t.linearize().unwrap_err();
        assert!(err.contains("non-linear"));
    }

    #[test]
    fn test_guard_eval() {
        let g = Guard::and(Guard::within("m", 15.0, 75.0), Guard::le(Term::var("m1") + Term::var("m2"), 1.0));
        assert_eq!(g.eval(&env(&[("m", 20.0), ("m1", 0.5), ("m2", 0.2)])), Some(true));
        assert_eq!(g.eval(&env(&[("m", 80.0), ("m1", 0.5), ("m2", 0.2)])), Some(false));
        assert_eq!(g.eval(&env(&[("m", 20.0), ("m1", 0.9), ("m2", 0.2)])), Some(false));
        assert_eq!(g.eval(&env(&[("m", 20.0)])), None);
    }

    #[test]
    fn test_guard_eval_strict_and_tolerance() {
        let g = Guard::lt("x", 1.0);
        assert_eq!(g.eval(&env(&[("x", 1.0)])), Some(false));
        assert_eq!(g.eval_with_tolerance(&env(&[("x", 1.0 + 1e-12)]), 1e-9), Some(true));
        let g = Guard::eq("x", 2.0);
        assert_eq!(g.eval(&env(&[("x", 2.0)])), Some(true));
        assert_eq!(g.eval(&env(&[("x", 2.1)])), Some(false));
    }

    #[test]
    fn test_guard_or_eval() {
        let g = Guard::or(Guard::lt("x", 0.0), Guard::gt("x", 10.0));
        assert_eq!(g.eval(&env(&[("x", -1.0)])), Some(true));
        assert_eq!(g.eval(&env(&[("x", 5.0)])), Some(false));
    }

    #[test]
    fn test_guard_variables() {
        let g = Guard::and(Guard::within("m", 0.0, 1.0), Guard::le(Term::var("m1") + Term::var("m2"), 40.0));
        let vars: Vec<_> = g.variables().into_iter().collect();
        assert_eq!(vars, vec!["m", "m1", "m2"]);
    }

    #[test]
    fn test_linear_conjuncts() {
        let g = Guard::and(Guard::within("m", 15.0, 75.0), Guard::le(Term::var("m1") + Term::var("m2"), 1.0));
        let cs = g.linear_conjuncts().unwrap();
        assert_eq!(cs.len(), 3);
        // m - 15 >= 0
        assert_eq!(cs[0].op, CmpOp::Ge);
        assert_eq!(cs[0].form.coeffs["m"], 1.0);
        assert_eq!(cs[0].form.constant, -15.0);
        // m1 + m2 - 1 <= 0
        assert_eq!(cs[2].op, CmpOp::Le);
        assert_eq!(cs[2].form.constant, -1.0);
    }

    #[test]
    fn test_linear_conjuncts_rejects_disjunction() {
        let g = Guard::and(Guard::True, Guard::or(Guard::lt("x", 0.0), Guard::gt("x", 1.0)));
        let err = g.linear_conjuncts().unwrap_err();
        assert!(err.contains("disjunction"));
    }

    #[test]
    fn test_guard_display() {
        let g = Guard::and(
            Guard::within("m", 15.0, 75.0),
            Guard::or(Guard::le("m1", 1.0), Guard::ge("m2", 5.0)),
        );
        assert_eq!(g.to_string(), "m >= 15 && m <= 75 && (m1 <= 1 || m2 >= 5)");
    }

    #[test]
    fn test_guard_to_prism() {
        let g = Guard::and(Guard::within("h", 5.0, 9.0), Guard::eq("d", 0.0));
        assert_eq!(g.to_prism(), "(h>=5)&(h<=9)&(d=0)");
        assert_eq!(Guard::True.to_prism(), "true");
    }

    #[test]
    fn test_and_simplifies_true() {
        assert_eq!(Guard::and(Guard::True, Guard::True), Guard::True);
        assert_eq!(Guard::all(vec![]), Guard::True);
        assert_eq!(Guard::all(vec![Guard::le("x", 1.0)]), Guard::le("x", 1.0));
    }
}
