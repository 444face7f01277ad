//! The simulation context handed to systems that span several components.

use crate::curve::CurveEvaluator;
use crate::multiplier::MultiplierSystem;
use crate::state::StateManager;

/// Borrowed view of the mutable simulation components.
///
/// Systems receive their collaborators through this context instead of
/// owning them, so the engine stays the single owner of every component.
pub struct SimContext<'a> {
    pub state: &'a mut StateManager,
    pub multipliers: &'a mut MultiplierSystem,
    pub curves: &'a CurveEvaluator,
}

impl<'a> SimContext<'a> {
    pub fn new(
        state: &'a mut StateManager,
        multipliers: &'a mut MultiplierSystem,
        curves: &'a CurveEvaluator,
    ) -> Self {
        Self {
            state,
            multipliers,
            curves,
        }
    }

    /// Shared view for queries.
    pub fn view(&self) -> SimView<'_> {
        SimView {
            state: &*self.state,
            multipliers: &*self.multipliers,
            curves: self.curves,
        }
    }
}

/// Read-only counterpart of [`SimContext`] for price and availability
/// queries.
#[derive(Clone, Copy)]
pub struct SimView<'a> {
    pub state: &'a StateManager,
    pub multipliers: &'a MultiplierSystem,
    pub curves: &'a CurveEvaluator,
}

impl<'a> SimView<'a> {
    pub fn new(
        state: &'a StateManager,
        multipliers: &'a MultiplierSystem,
        curves: &'a CurveEvaluator,
    ) -> Self {
        Self {
            state,
            multipliers,
            curves,
        }
    }
}
