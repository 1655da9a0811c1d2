//! Root-level candidates and their refinement phase.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use ab_types::ParamValue;

use crate::report::{EvalReport, Witness};
use crate::tree::{format_path, InstanceTree, ParamSlot};

/// Unique candidate identifier.
pub type CandidateId = Uuid;

/// Refinement phase. Only ever advances from interface resolution to
/// parameter tuning.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    InterfaceResolution,
    ParameterTuning {
        /// Round-robin order, fixed when the phase is entered.
        order: Arc<[ParamSlot]>,
        /// Next slot to try.
        cursor: usize,
    },
}

impl Phase {
    /// Enter parameter tuning with the tree's round-robin order.
    pub fn tuning(tree: &InstanceTree) -> Self {
        Self::ParameterTuning {
            order: tree.parameter_order().into(),
            cursor: 0,
        }
    }

    pub fn is_tuning(&self) -> bool {
        matches!(self, Self::ParameterTuning { .. })
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InterfaceResolution => write!(f, "interface-resolution"),
            Self::ParameterTuning { order, cursor } => {
                write!(f, "parameter-tuning({cursor}/{})", order.len())
            }
        }
    }
}

/// One step in a candidate's derivation.
#[derive(Debug, Clone, PartialEq)]
pub enum RefinementRecord {
    Interface {
        path: Vec<String>,
        interface: String,
        provider: String,
    },
    Parameter {
        path: Vec<String>,
        parameter: String,
        value: ParamValue,
    },
    Promotion,
}

impl fmt::Display for RefinementRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interface {
                path,
                interface,
                provider,
            } => write!(f, "{}{interface} <- {provider}", format_path(path)),
            Self::Parameter {
                path,
                parameter,
                value,
            } => write!(f, "{}:{parameter} = {value}", format_path(path)),
            Self::Promotion => write!(f, "promote to parameter tuning"),
        }
    }
}

/// A node of the search: one instance tree plus its search bookkeeping.
#[derive(Debug, Clone)]
pub struct Candidate {
    id: CandidateId,
    tree: InstanceTree,
    phase: Phase,
    report: Option<EvalReport>,
    first_generation: bool,
    history: Vec<RefinementRecord>,
    created_at: DateTime<Utc>,
}

impl Candidate {
    /// A first-generation root in interface resolution.
    pub fn root(tree: InstanceTree) -> Self {
        Self {
            id: Uuid::new_v4(),
            tree,
            phase: Phase::InterfaceResolution,
            report: None,
            first_generation: true,
            history: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// A refined child of `self`. The child starts without a report.
    pub fn derive(&self, tree: InstanceTree, phase: Phase, record: RefinementRecord) -> Self {
        let mut history = self.history.clone();
        history.push(record);
        Self {
            id: Uuid::new_v4(),
            tree,
            phase,
            report: None,
            first_generation: false,
            history,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> CandidateId {
        self.id
    }

    pub fn tree(&self) -> &InstanceTree {
        &self.tree
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn report(&self) -> Option<&EvalReport> {
        self.report.as_ref()
    }

    pub fn is_first_generation(&self) -> bool {
        self.first_generation
    }

    pub fn history(&self) -> &[RefinementRecord] {
        &self.history
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Aggregate score of the report, if any witness scored.
    pub fn score(&self) -> Option<f64> {
        self.report.as_ref().and_then(EvalReport::score)
    }

    /// True once any report is attached.
    pub fn is_closed(&self) -> bool {
        self.report.is_some()
    }

    /// Number of witnesses already recorded.
    pub fn witness_count(&self) -> usize {
        self.report.as_ref().map_or(0, EvalReport::len)
    }

    /// Attach a report or extend the existing one.
    pub fn record_results(&mut self, witnesses: Vec<InstanceTree>, scores: Vec<Option<f64>>) {
        match &mut self.report {
            Some(report) => report.extend(witnesses, scores),
            None => self.report = Some(EvalReport::from_results(witnesses, scores)),
        }
    }

    /// Seed the report with witnesses inherited from a parent. An empty
    /// list leaves the candidate without a report.
    pub fn inherit_witnesses(&mut self, witnesses: Vec<Witness>) {
        if witnesses.is_empty() {
            return;
        }
        let report = self.report.get_or_insert_with(EvalReport::new);
        for witness in witnesses {
            report.push(witness);
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.id, self.phase, self.tree)
    }
}
