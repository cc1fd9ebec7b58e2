//! Analyzer capability contract
//!
//! The pipeline never computes statistics itself: statistics and invalid-detection
//! nodes ask an injected [`AnalyzerService`] for an [`Analyzer`] over a set of columns,
//! feed it ordered cell values, and adapt its mergeable [`ColumnAnalysis`] results back
//! into [`Column::statistics`](crate::models::Column).
//!
//! [`BasicAnalyzerService`] is a self-contained implementation covering every
//! [`AnalysisKind`], so the engine runs without an external analysis library.

mod basic;
mod error;
mod result;

pub use basic::{BasicAnalyzerService, conforms, detect_type, value_pattern};
pub use error::{AnalyzerError, AnalyzerResult};
pub use result::{ColumnAnalysis, NumericSummary};

use serde::{Deserialize, Serialize};

use crate::models::Column;

/// Kind of analysis an analyzer performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisKind {
    /// Type detection
    Type,
    /// Valid/invalid/empty counts against the column type
    Quality,
    /// Character-class pattern frequencies
    Pattern,
    /// Value frequencies
    Frequency,
}

impl AnalysisKind {
    /// Every analysis kind, in scheduling order
    pub fn all() -> Vec<AnalysisKind> {
        vec![
            AnalysisKind::Type,
            AnalysisKind::Quality,
            AnalysisKind::Pattern,
            AnalysisKind::Frequency,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            AnalysisKind::Type => "type",
            AnalysisKind::Quality => "quality",
            AnalysisKind::Pattern => "pattern",
            AnalysisKind::Frequency => "frequency",
        }
    }
}

impl std::fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Stateful analyzer over a fixed, ordered set of columns
pub trait Analyzer: Send {
    /// Feed one record: one value per analyzed column, in column order
    fn analyze(&mut self, record: &[Option<&str>]) -> AnalyzerResult<()>;

    /// Current results, one per analyzed column, in column order
    fn results(&self) -> &[ColumnAnalysis];

    /// Feed several records
    fn analyze_batch(&mut self, records: &[Vec<Option<String>>]) -> AnalyzerResult<()> {
        for record in records {
            let values: Vec<Option<&str>> = record.iter().map(|v| v.as_deref()).collect();
            self.analyze(&values)?;
        }
        Ok(())
    }
}

/// Factory for analyzers, injected into the pipeline build context
pub trait AnalyzerService: Send + Sync {
    /// Build an analyzer for `columns` computing the requested kinds
    fn build(&self, columns: &[Column], kinds: &[AnalysisKind]) -> AnalyzerResult<Box<dyn Analyzer>>;
}
