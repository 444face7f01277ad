//! Declarative curves: pure functions from a numeric context to a scalar.
//!
//! Curves drive cost scaling and production scaling. They are registered as
//! named presets in the [`CurveEvaluator`] and referenced from content by
//! [`CurveRef`]; a literal number may stand in for a preset wherever a flat
//! value is enough.
//!
//! Evaluation is a pure function of `(curve, context)`. The offline
//! recomputation path relies on this to agree with the live tick engine.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::EvalMode;
use crate::expr::{Expr, ExprError};
use crate::id::CurveId;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while evaluating a curve.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CurveError {
    #[error("unknown curve preset '{0}'")]
    UnknownCurve(CurveId),
    #[error("formula '{expression}' failed: {source}")]
    Formula {
        expression: String,
        #[source]
        source: ExprError,
    },
    #[error("curve produced a non-finite value")]
    NonFinite,
    #[error("compound curves nest deeper than {0} levels")]
    TooDeep(usize),
}

/// Maximum nesting of compound curves and preset references.
const MAX_DEPTH: usize = 32;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Named numeric inputs to a curve (`owned`, `tier`, `distance`, ...).
///
/// Missing variables read as zero for the built-in curve shapes; formula
/// curves treat a missing variable as an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurveContext(BTreeMap<String, f64>);

impl CurveContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context holding a single `owned` value, the common case for costs.
    pub fn owned(owned: f64) -> Self {
        Self::new().with("owned", owned)
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.0.insert(name.to_string(), value);
        self
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.0.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    fn var(&self, name: &str) -> f64 {
        self.get(name).unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Curve definitions
// ---------------------------------------------------------------------------

fn owned_var() -> String {
    "owned".to_string()
}

/// One threshold of a step curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepThreshold {
    pub at: f64,
    pub value: f64,
}

/// How a compound curve folds its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompoundOp {
    Multiply,
    Add,
    Subtract,
    Min,
    Max,
}

/// A formula curve. The expression text is kept for diagnostics and
/// serialization; the parsed tree is what gets evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    parsed: Result<Expr, ExprError>,
}

impl Formula {
    /// Parse a formula. A malformed expression is kept and reported when
    /// evaluated so that one bad content entry cannot stop a load.
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let parsed = Expr::parse(&source);
        Self { source, parsed }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The parse error, if the expression is malformed.
    pub fn parse_error(&self) -> Option<&ExprError> {
        self.parsed.as_ref().err()
    }

    fn eval(&self, ctx: &CurveContext) -> Result<f64, CurveError> {
        let wrap = |source: ExprError| CurveError::Formula {
            expression: self.source.clone(),
            source,
        };
        let expr = self.parsed.as_ref().map_err(|e| wrap(e.clone()))?;
        expr.eval(&|name: &str| ctx.get(name)).map_err(wrap)
    }
}

impl Serialize for Formula {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Formula {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Ok(Formula::new(source))
    }
}

/// A declarative curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Curve {
    /// `base * rate ^ x`
    Exponential {
        base: f64,
        rate: f64,
        #[serde(default = "owned_var")]
        count_var: String,
    },
    /// `base + rate * x`
    Linear {
        base: f64,
        rate: f64,
        #[serde(default = "owned_var")]
        count_var: String,
    },
    /// `coefficient * x ^ power`
    Polynomial {
        coefficient: f64,
        power: f64,
        #[serde(default = "owned_var")]
        value_var: String,
    },
    /// `coefficient * log_base(x + offset)`
    Logarithmic {
        coefficient: f64,
        log_base: f64,
        #[serde(default)]
        offset: f64,
        #[serde(default = "owned_var")]
        value_var: String,
    },
    /// `max / (1 + e^(-steepness * (x - midpoint)))`
    Sigmoid {
        max: f64,
        midpoint: f64,
        steepness: f64,
        #[serde(default = "owned_var")]
        input_var: String,
    },
    /// Value of the highest threshold not above the input.
    Step {
        #[serde(default = "owned_var")]
        input_var: String,
        thresholds: Vec<StepThreshold>,
        #[serde(default)]
        default: f64,
    },
    Constant {
        value: f64,
    },
    Formula {
        expression: Formula,
    },
    /// Children folded left-to-right under `operation`.
    Compound {
        operation: CompoundOp,
        curves: Vec<CurveRef>,
    },
}

/// Reference to a curve: a named preset, a literal, or an inline curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CurveRef {
    Literal(f64),
    Preset(CurveId),
    Inline(Box<Curve>),
}

impl CurveRef {
    pub fn preset(id: &str) -> Self {
        CurveRef::Preset(CurveId::from(id))
    }
}

impl Default for CurveRef {
    fn default() -> Self {
        CurveRef::Literal(1.0)
    }
}

impl From<f64> for CurveRef {
    fn from(v: f64) -> Self {
        CurveRef::Literal(v)
    }
}

impl From<Curve> for CurveRef {
    fn from(c: Curve) -> Self {
        CurveRef::Inline(Box::new(c))
    }
}

/// Neutral value returned when a lenient evaluation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neutral {
    /// 1.0, for values used as factors.
    Multiplicative,
    /// 0.0, for values used as addends.
    Additive,
}

impl Neutral {
    pub fn value(self) -> f64 {
        match self {
            Neutral::Multiplicative => 1.0,
            Neutral::Additive => 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Evaluates curve references against registered presets.
#[derive(Debug, Clone, Default)]
pub struct CurveEvaluator {
    presets: HashMap<CurveId, Curve>,
    mode: EvalMode,
}

impl CurveEvaluator {
    pub fn new(mode: EvalMode) -> Self {
        Self {
            presets: HashMap::new(),
            mode,
        }
    }

    pub fn with_presets(presets: HashMap<CurveId, Curve>, mode: EvalMode) -> Self {
        Self { presets, mode }
    }

    pub fn register(&mut self, id: CurveId, curve: Curve) {
        self.presets.insert(id, curve);
    }

    pub fn contains(&self, id: &CurveId) -> bool {
        self.presets.contains_key(id)
    }

    pub fn mode(&self) -> EvalMode {
        self.mode
    }

    /// Evaluate a curve reference, surfacing every failure.
    pub fn try_evaluate(&self, curve: &CurveRef, ctx: &CurveContext) -> Result<f64, CurveError> {
        self.eval_ref(curve, ctx, 0)
    }

    /// Evaluate a curve reference under the configured [`EvalMode`].
    ///
    /// Lenient: a failure is logged and replaced by the neutral value.
    /// Strict: the failure is returned so the caller fails loudly.
    pub fn evaluate(
        &self,
        curve: &CurveRef,
        ctx: &CurveContext,
        neutral: Neutral,
    ) -> Result<f64, CurveError> {
        match self.try_evaluate(curve, ctx) {
            Ok(v) => Ok(v),
            Err(err) => match self.mode {
                EvalMode::Strict => Err(err),
                EvalMode::Lenient => {
                    tracing::warn!(error = %err, ?curve, "curve evaluation failed; using neutral value");
                    Ok(neutral.value())
                }
            },
        }
    }

    fn eval_ref(&self, curve: &CurveRef, ctx: &CurveContext, depth: usize) -> Result<f64, CurveError> {
        if depth > MAX_DEPTH {
            return Err(CurveError::TooDeep(MAX_DEPTH));
        }
        match curve {
            CurveRef::Literal(v) => Ok(*v),
            CurveRef::Preset(id) => {
                let preset = self
                    .presets
                    .get(id)
                    .ok_or_else(|| CurveError::UnknownCurve(id.clone()))?;
                self.eval_curve(preset, ctx, depth + 1)
            }
            CurveRef::Inline(c) => self.eval_curve(c, ctx, depth + 1),
        }
    }

    fn eval_curve(&self, curve: &Curve, ctx: &CurveContext, depth: usize) -> Result<f64, CurveError> {
        let value = match curve {
            Curve::Exponential {
                base,
                rate,
                count_var,
            } => base * rate.powf(ctx.var(count_var)),
            Curve::Linear {
                base,
                rate,
                count_var,
            } => base + rate * ctx.var(count_var),
            Curve::Polynomial {
                coefficient,
                power,
                value_var,
            } => coefficient * ctx.var(value_var).powf(*power),
            Curve::Logarithmic {
                coefficient,
                log_base,
                offset,
                value_var,
            } => coefficient * (ctx.var(value_var) + offset).log(*log_base),
            Curve::Sigmoid {
                max,
                midpoint,
                steepness,
                input_var,
            } => max / (1.0 + (-steepness * (ctx.var(input_var) - midpoint)).exp()),
            Curve::Step {
                input_var,
                thresholds,
                default,
            } => step_value(thresholds, ctx.var(input_var), *default),
            Curve::Constant { value } => *value,
            Curve::Formula { expression } => expression.eval(ctx)?,
            Curve::Compound { operation, curves } => {
                let mut acc: Option<f64> = None;
                for child in curves {
                    let v = self.eval_ref(child, ctx, depth + 1)?;
                    acc = Some(match acc {
                        None => v,
                        Some(a) => match operation {
                            CompoundOp::Multiply => a * v,
                            CompoundOp::Add => a + v,
                            CompoundOp::Subtract => a - v,
                            CompoundOp::Min => a.min(v),
                            CompoundOp::Max => a.max(v),
                        },
                    });
                }
                acc.unwrap_or(match operation {
                    CompoundOp::Multiply => 1.0,
                    _ => 0.0,
                })
            }
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(CurveError::NonFinite)
        }
    }
}

/// Highest threshold `<= input`. Thresholds need not be sorted; when two
/// entries share the winning `at`, the later one wins.
fn step_value(thresholds: &[StepThreshold], input: f64, default: f64) -> f64 {
    let mut best: Option<&StepThreshold> = None;
    for t in thresholds {
        if t.at <= input && best.is_none_or(|b| t.at >= b.at) {
            best = Some(t);
        }
    }
    best.map_or(default, |t| t.value)
}

// ===========================================================================
// Tests
// ===========================================================================
