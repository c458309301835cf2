//! Calibrated Yule and birth-death tree priors.
//!
//! - **Time trees**: [`TimeTree`] with Newick reading and writing, and the
//!   [`RankedTree`] view the priors score
//! - **Calibrations**: [`CalibrationPoint`] and the inclusion-ordered
//!   [`OrderedCalibrationSet`]
//! - **Branching densities**: [`yule_log_likelihood`] and
//!   [`birth_death_log_likelihood`]
//! - **Marginals**: closed forms for one and two nested calibrations, and
//!   trajectory enumeration through [`LineageIterator`] for everything else
//! - **Calibrated prior**: [`CalibratedTreePrior`], base density plus
//!   correction

pub mod branching;
pub mod calibration;
pub mod lineages;
pub mod marginal;
pub mod newick;
pub mod ordering;
pub mod prior;
pub mod tables;
pub mod tree;

pub use branching::{birth_death_log_likelihood, yule_log_likelihood, BirthDeathParams};
pub use calibration::{CalibrationPoint, Clade};
pub use lineages::LineageIterator;
pub use ordering::OrderedCalibrationSet;
pub use prior::{CalibratedTreePrior, CorrectionKind, MarginalStrategy, PriorConfig, Process, UserMarginal};
pub use tables::NumericTables;
pub use tree::{Node, NodeId, RankedTree, TimeTree};
