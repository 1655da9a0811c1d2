//! Numeric range splitting.

use ab_types::{CsResult, DomainError, ParamValue, RefinementConfig};

/// Result of refining one numeric parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SplitOutcome {
    /// Already a single point, or no admissible value remains.
    Exhausted,
    /// Too narrow to split: fixed to this midpoint.
    Collapsed(f64),
    /// Adjacent sub-ranges sharing their boundaries, covering the range.
    Pieces(Vec<(f64, f64)>),
}

/// A numeric value about to be refined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericSplit {
    pub min: f64,
    pub max: f64,
    pub integer: bool,
}

impl NumericSplit {
    pub fn new(min: f64, max: f64, integer: bool) -> Self {
        Self { min, max, integer }
    }

    pub fn from_value(value: &ParamValue, integer: bool) -> CsResult<Self> {
        let (min, max) = value.bounds().ok_or_else(|| DomainError::KindMismatch {
            left: "numeric".to_string(),
            right: format!("{} {value}", value.kind()),
        })?;
        Ok(Self::new(min, max, integer))
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    /// Centre of the range. For integer domains this is the rounded centre
    /// clamped into the range, and `None` when no integer lies in it.
    pub fn midpoint(&self) -> Option<f64> {
        let centre = self.min + self.width() / 2.0;
        if !self.integer {
            return Some(centre);
        }
        let (lo, hi) = (self.min.ceil(), self.max.floor());
        (lo <= hi).then(|| centre.round().clamp(lo, hi))
    }

    fn collapse(&self) -> SplitOutcome {
        match self.midpoint() {
            Some(mid) => SplitOutcome::Collapsed(mid),
            None => SplitOutcome::Exhausted,
        }
    }

    /// Refine the range under `config`.
    ///
    /// Ranges narrower than `min_split_size` collapse to their midpoint.
    /// Otherwise the range is cut into `k` equal pieces, starting from
    /// `refinements_per_step` and reducing `k` until every piece is at least
    /// `min_split_size` wide (integer cut points are rounded and must stay
    /// strictly increasing). When no `k >= 2` works the range collapses.
    pub fn split(&self, config: &RefinementConfig) -> SplitOutcome {
        let width = self.width();
        if width <= 0.0 {
            return SplitOutcome::Exhausted;
        }
        if self.integer && self.min.ceil() >= self.max.floor() {
            return self.collapse();
        }
        if width < config.min_split_size {
            return self.collapse();
        }

        let min_piece = config.min_split_size.max(f64::EPSILON);
        let most = (width / min_piece).floor() as usize;
        let mut k = config.refinements_per_step.max(2).min(most);
        while k >= 2 {
            if let Some(pieces) = self.pieces(k, config.min_split_size) {
                return SplitOutcome::Pieces(pieces);
            }
            k -= 1;
        }
        self.collapse()
    }

    fn pieces(&self, k: usize, min_size: f64) -> Option<Vec<(f64, f64)>> {
        let step = self.width() / k as f64;
        let mut bounds = Vec::with_capacity(k + 1);
        bounds.push(self.min);
        for i in 1..k {
            let cut = self.min + step * i as f64;
            bounds.push(if self.integer { cut.round() } else { cut });
        }
        bounds.push(self.max);

        let pieces: Vec<(f64, f64)> = bounds.windows(2).map(|w| (w[0], w[1])).collect();
        pieces
            .iter()
            .all(|(lo, hi)| hi > lo && hi - lo >= min_size)
            .then_some(pieces)
    }

    /// Midpoints of the pieces `split` would produce, used when grounding
    /// draws from split means rather than uniformly.
    pub fn split_means(&self, config: &RefinementConfig) -> Vec<f64> {
        match self.split(config) {
            SplitOutcome::Exhausted => Vec::new(),
            SplitOutcome::Collapsed(mid) => vec![mid],
            SplitOutcome::Pieces(pieces) => pieces
                .into_iter()
                .filter_map(|(lo, hi)| NumericSplit::new(lo, hi, self.integer).midpoint())
                .collect(),
        }
    }
}
