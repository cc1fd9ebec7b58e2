//! Mergeable per-column analysis results

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::AnalysisKind;
use super::basic::conforms;
use crate::models::{Column, ColumnType, Frequency, HistogramRange, SemanticDomain};

/// Number of values (or patterns) kept in a column's frequency table
pub const TOP_FREQUENCIES: usize = 15;

/// Number of histogram buckets
pub const HISTOGRAM_BUCKETS: usize = 10;

/// Share of non-empty values a type or domain must cover to be suggested
const SUGGESTION_THRESHOLD: f64 = 0.5;

/// Running numeric summary
///
/// Keeps sums rather than a mean so that partial summaries merge exactly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumericSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub sum_sq: f64,
}

impl NumericSummary {
    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.sum += value;
        self.sum_sq += value * value;
        self.count += 1;
    }

    pub fn merge(&mut self, other: &NumericSummary) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.count += other.count;
    }

    pub fn mean(&self) -> Option<f64> {
        if self.count > 0 {
            Some(self.sum / self.count as f64)
        } else {
            None
        }
    }

    /// Population variance
    pub fn variance(&self) -> Option<f64> {
        let mean = self.mean()?;
        Some((self.sum_sq / self.count as f64 - mean * mean).max(0.0))
    }
}

/// Analysis result for one column
///
/// Every field is a count, a min/max or a set union, so [`ColumnAnalysis::merge`] is
/// associative and commutative: partial results from any partitioning of the rows
/// merge into the same totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnAnalysis {
    pub column_id: String,
    /// Type validity was measured against
    pub column_type: ColumnType,
    pub count: u64,
    pub empty: u64,
    pub valid: u64,
    pub invalid: u64,
    /// Distinct values not conforming to `column_type`
    pub invalid_values: BTreeSet<String>,
    /// Detected type of every non-empty value
    pub type_counts: BTreeMap<ColumnType, u64>,
    /// Detected semantic domain ids of non-empty values
    pub domain_counts: BTreeMap<String, u64>,
    pub numeric: NumericSummary,
    pub patterns: BTreeMap<String, u64>,
    pub frequencies: BTreeMap<String, u64>,
}

impl ColumnAnalysis {
    pub fn new(column_id: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            column_id: column_id.into(),
            column_type,
            ..Self::default()
        }
    }

    pub fn non_empty(&self) -> u64 {
        self.count - self.empty
    }

    /// Number of non-empty values conforming to `column_type`
    pub fn conforming(&self, column_type: ColumnType) -> u64 {
        self.type_counts
            .iter()
            .filter(|(detected, _)| conforms(**detected, column_type))
            .map(|(_, n)| n)
            .sum()
    }

    /// Most specific type covering a majority of the non-empty values
    pub fn suggested_type(&self) -> ColumnType {
        let non_empty = self.non_empty();
        if non_empty == 0 {
            return ColumnType::String;
        }
        let mut best = (ColumnType::String, 0);
        for candidate in [
            ColumnType::Integer,
            ColumnType::Double,
            ColumnType::Boolean,
            ColumnType::Date,
        ] {
            let covered = self.conforming(candidate);
            if covered > best.1 {
                best = (candidate, covered);
            }
        }
        if best.1 as f64 / non_empty as f64 > SUGGESTION_THRESHOLD {
            best.0
        } else {
            ColumnType::String
        }
    }

    /// Most frequent detected domain covering a majority of the non-empty values
    pub fn suggested_domain(&self) -> Option<SemanticDomain> {
        let non_empty = self.non_empty();
        let (id, occurrences) = self
            .domain_counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))?;
        let share = *occurrences as f64 / non_empty.max(1) as f64;
        (share > SUGGESTION_THRESHOLD).then(|| SemanticDomain {
            id: id.clone(),
            label: id.to_lowercase(),
            frequency: (share * 100.0).min(100.0),
            base_type: Some(ColumnType::String),
        })
    }

    /// Fold another partial result for the same column into this one
    pub fn merge(&mut self, other: &ColumnAnalysis) {
        debug_assert_eq!(self.column_id, other.column_id);
        self.count += other.count;
        self.empty += other.empty;
        self.valid += other.valid;
        self.invalid += other.invalid;
        self.invalid_values.extend(other.invalid_values.iter().cloned());
        merge_counts(&mut self.type_counts, &other.type_counts);
        merge_counts(&mut self.domain_counts, &other.domain_counts);
        self.numeric.merge(&other.numeric);
        merge_counts(&mut self.patterns, &other.patterns);
        merge_counts(&mut self.frequencies, &other.frequencies);
    }

    /// Write the result into `column`'s type, domain and statistics
    ///
    /// Only the parts backed by `kinds` are written; statistics of other kinds are kept.
    pub fn apply_to(&self, column: &mut Column, kinds: &[AnalysisKind]) {
        let has = |kind| kinds.contains(&kind);

        if has(AnalysisKind::Type) {
            if !column.type_forced {
                column.column_type = self.suggested_type();
            }
            if !column.domain_forced {
                column.domain = self.suggested_domain();
            }
        }

        let column_type = column.column_type;
        let statistics = &mut column.statistics;

        if has(AnalysisKind::Type) || has(AnalysisKind::Quality) {
            statistics.count = self.count;
            statistics.empty = self.empty;
            statistics.valid = self.conforming(column_type);
            statistics.invalid = self.non_empty() - statistics.valid;
            if column_type.is_numeric() && self.numeric.count > 0 {
                statistics.min = Some(self.numeric.min);
                statistics.max = Some(self.numeric.max);
                statistics.mean = self.numeric.mean();
                statistics.variance = self.numeric.variance();
            } else {
                statistics.min = None;
                statistics.max = None;
                statistics.mean = None;
                statistics.variance = None;
            }
        }

        if has(AnalysisKind::Frequency) {
            statistics.value_frequencies = top_frequencies(&self.frequencies);
            statistics.distinct_count = self.frequencies.len() as u64;
            statistics.duplicate_count = self
                .frequencies
                .values()
                .filter(|n| **n > 1)
                .map(|n| n - 1)
                .sum();
            statistics.histogram = if column_type.is_numeric() {
                self.histogram()
            } else {
                Vec::new()
            };
        }

        if has(AnalysisKind::Pattern) {
            statistics.pattern_frequencies = top_frequencies(&self.patterns);
        }
    }

    /// Write only the count/empty/valid/invalid figures, as computed by the analyzer
    pub fn apply_validity(&self, column: &mut Column) {
        let statistics = &mut column.statistics;
        statistics.count = self.count;
        statistics.empty = self.empty;
        statistics.valid = self.valid;
        statistics.invalid = self.invalid;
    }

    /// Equal-width histogram of the numeric values, built from the frequency table
    pub fn histogram(&self) -> Vec<HistogramRange> {
        if self.numeric.count == 0 {
            return Vec::new();
        }
        let (min, max) = (self.numeric.min, self.numeric.max);
        let width = (max - min) / HISTOGRAM_BUCKETS as f64;
        if width <= 0.0 {
            let occurrences = self.numeric_occurrences().map(|(_, n)| n).sum();
            return vec![HistogramRange { min, max, occurrences }];
        }

        let mut buckets: Vec<HistogramRange> = (0..HISTOGRAM_BUCKETS)
            .map(|i| HistogramRange {
                min: min + width * i as f64,
                max: if i + 1 == HISTOGRAM_BUCKETS {
                    max
                } else {
                    min + width * (i + 1) as f64
                },
                occurrences: 0,
            })
            .collect();
        for (value, occurrences) in self.numeric_occurrences() {
            if !(min..=max).contains(&value) {
                continue;
            }
            let index = (((value - min) / width) as usize).min(HISTOGRAM_BUCKETS - 1);
            buckets[index].occurrences += occurrences;
        }
        buckets
    }

    fn numeric_occurrences(&self) -> impl Iterator<Item = (f64, u64)> + '_ {
        self.frequencies.iter().filter_map(|(value, n)| {
            value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(|v| (v, *n))
        })
    }
}

fn merge_counts<K: Ord + Clone>(into: &mut BTreeMap<K, u64>, from: &BTreeMap<K, u64>) {
    for (key, n) in from {
        *into.entry(key.clone()).or_insert(0) += n;
    }
}

/// Most frequent entries, ties broken by value
fn top_frequencies(counts: &BTreeMap<String, u64>) -> Vec<Frequency> {
    let mut entries: Vec<Frequency> = counts
        .iter()
        .map(|(value, occurrences)| Frequency {
            value: value.clone(),
            occurrences: *occurrences,
        })
        .collect();
    entries.sort_by(|a, b| b.occurrences.cmp(&a.occurrences).then_with(|| a.value.cmp(&b.value)));
    entries.truncate(TOP_FREQUENCIES);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(values: &[(&str, ColumnType)]) -> ColumnAnalysis {
        let mut result = ColumnAnalysis::new("0000", ColumnType::String);
        for (value, detected) in values {
            result.count += 1;
            *result.type_counts.entry(*detected).or_insert(0) += 1;
            *result.frequencies.entry(value.to_string()).or_insert(0) += 1;
            if let Ok(n) = value.parse::<f64>() {
                result.numeric.add(n);
            }
        }
        result
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a = partial(&[("1", ColumnType::Integer), ("2", ColumnType::Integer)]);
        let b = partial(&[("x", ColumnType::String)]);
        let c = partial(&[("2", ColumnType::Integer), ("3.5", ColumnType::Double)]);

        let mut left = a.clone();
        left.merge(&b);
        left.merge(&c);

        let mut bc = c.clone();
        bc.merge(&b);
        let mut right = bc;
        right.merge(&a);

        assert_eq!(left.count, right.count);
        assert_eq!(left.type_counts, right.type_counts);
        assert_eq!(left.frequencies, right.frequencies);
        assert_eq!(left.numeric.min, right.numeric.min);
        assert_eq!(left.numeric.max, right.numeric.max);
        assert!((left.numeric.sum - right.numeric.sum).abs() < 1e-9);
    }

    #[test]
    fn test_suggested_type_prefers_integer() {
        let result = partial(&[
            ("1", ColumnType::Integer),
            ("2", ColumnType::Integer),
            ("x", ColumnType::String),
        ]);
        assert_eq!(result.suggested_type(), ColumnType::Integer);

        let mixed = partial(&[
            ("1", ColumnType::Integer),
            ("2.5", ColumnType::Double),
            ("3.5", ColumnType::Double),
        ]);
        assert_eq!(mixed.suggested_type(), ColumnType::Double);
    }

    #[test]
    fn test_apply_numeric_statistics() {
        let result = partial(&[
            ("2", ColumnType::Integer),
            ("4", ColumnType::Integer),
            ("4", ColumnType::Integer),
            ("abc", ColumnType::String),
        ]);
        let mut column = Column::new("0000", "n");
        result.apply_to(&mut column, &AnalysisKind::all());

        assert_eq!(column.column_type, ColumnType::Integer);
        let stats = &column.statistics;
        assert_eq!(stats.valid, 3);
        assert_eq!(stats.invalid, 1);
        assert_eq!(stats.min, Some(2.0));
        assert_eq!(stats.max, Some(4.0));
        assert!((stats.mean.unwrap() - 10.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.distinct_count, 3);
        assert_eq!(stats.duplicate_count, 1);
        assert_eq!(stats.mode(), Some("4"));
        assert_eq!(stats.histogram.len(), HISTOGRAM_BUCKETS);
        let total: u64 = stats.histogram.iter().map(|b| b.occurrences).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_forced_type_is_kept() {
        let result = partial(&[("1", ColumnType::Integer), ("2", ColumnType::Integer)]);
        let mut column = Column::new("0000", "code");
        column.type_forced = true;
        result.apply_to(&mut column, &[AnalysisKind::Type]);
        assert_eq!(column.column_type, ColumnType::String);
        assert_eq!(column.statistics.valid, 2);
    }

    #[test]
    fn test_variance() {
        let mut summary = NumericSummary::default();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            summary.add(v);
        }
        assert_eq!(summary.mean(), Some(5.0));
        assert!((summary.variance().unwrap() - 4.0).abs() < 1e-9);
    }
}
