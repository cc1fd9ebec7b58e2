//! Built-in analyzer: type detection, quality, patterns and frequencies

use std::collections::BTreeSet;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use super::error::{AnalyzerError, AnalyzerResult};
use super::result::ColumnAnalysis;
use super::{AnalysisKind, Analyzer, AnalyzerService};
use crate::models::{Column, ColumnType};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y", "%d.%m.%Y"];

static DOMAIN_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        (
            "UUID",
            r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
        ),
        ("EMAIL", r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$"),
        ("URL", r"^(https?|ftp)://[^\s/$.?#].[^\s]*$"),
        (
            "IPV4",
            r"^((25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)$",
        ),
    ]
    .into_iter()
    .filter_map(|(domain, pattern)| Regex::new(pattern).ok().map(|regex| (domain, regex)))
    .collect()
});

/// Detect the most specific type of a non-empty value
pub fn detect_type(value: &str) -> ColumnType {
    let value = value.trim();
    if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false") {
        return ColumnType::Boolean;
    }
    if value.parse::<i64>().is_ok() {
        return ColumnType::Integer;
    }
    if value.parse::<f64>().is_ok_and(f64::is_finite) {
        return ColumnType::Double;
    }
    if DATE_FORMATS
        .iter()
        .any(|format| NaiveDate::parse_from_str(value, format).is_ok())
    {
        return ColumnType::Date;
    }
    ColumnType::String
}

/// Whether a value detected as `detected` is a valid value of a `target` column
pub fn conforms(detected: ColumnType, target: ColumnType) -> bool {
    match target {
        ColumnType::String => true,
        ColumnType::Double => detected.is_numeric(),
        _ => detected == target,
    }
}

/// Character-class pattern of a value: `A` upper-case, `a` lower-case, `9` digit
pub fn value_pattern(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_digit() {
                '9'
            } else if c.is_uppercase() {
                'A'
            } else if c.is_alphabetic() {
                'a'
            } else {
                c
            }
        })
        .collect()
}

fn detect_domain(value: &str) -> Option<&'static str> {
    DOMAIN_PATTERNS
        .iter()
        .find(|(_, regex)| regex.is_match(value))
        .map(|(domain, _)| *domain)
}

/// Analyzer service backed by [`detect_type`] and [`value_pattern`]
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicAnalyzerService;

impl BasicAnalyzerService {
    pub fn new() -> Self {
        Self
    }
}

impl AnalyzerService for BasicAnalyzerService {
    fn build(&self, columns: &[Column], kinds: &[AnalysisKind]) -> AnalyzerResult<Box<dyn Analyzer>> {
        if kinds.is_empty() {
            return Err(AnalyzerError::Build("no analysis kind requested".to_string()));
        }
        Ok(Box::new(BasicAnalyzer {
            kinds: kinds.iter().copied().collect(),
            results: columns
                .iter()
                .map(|c| ColumnAnalysis::new(&c.id, c.column_type))
                .collect(),
        }))
    }
}

struct BasicAnalyzer {
    kinds: BTreeSet<AnalysisKind>,
    results: Vec<ColumnAnalysis>,
}

impl BasicAnalyzer {
    fn detects_types(&self) -> bool {
        self.kinds.contains(&AnalysisKind::Type) || self.kinds.contains(&AnalysisKind::Quality)
    }
}

impl Analyzer for BasicAnalyzer {
    fn analyze(&mut self, record: &[Option<&str>]) -> AnalyzerResult<()> {
        if record.len() != self.results.len() {
            return Err(AnalyzerError::ArityMismatch {
                expected: self.results.len(),
                actual: record.len(),
            });
        }
        let detects_types = self.detects_types();
        let domains = self.kinds.contains(&AnalysisKind::Type);
        let patterns = self.kinds.contains(&AnalysisKind::Pattern);
        let frequencies = self.kinds.contains(&AnalysisKind::Frequency);

        for (result, value) in self.results.iter_mut().zip(record.iter().copied()) {
            result.count += 1;
            let Some(raw) = value.filter(|v| !v.trim().is_empty()) else {
                result.empty += 1;
                continue;
            };

            if detects_types {
                let detected = detect_type(raw);
                *result.type_counts.entry(detected).or_insert(0) += 1;
                if conforms(detected, result.column_type) {
                    result.valid += 1;
                } else {
                    result.invalid += 1;
                    result.invalid_values.insert(raw.to_string());
                }
                if detected.is_numeric() {
                    if let Ok(n) = raw.trim().parse::<f64>() {
                        result.numeric.add(n);
                    }
                }
            }
            if domains {
                if let Some(domain) = detect_domain(raw.trim()) {
                    *result.domain_counts.entry(domain.to_string()).or_insert(0) += 1;
                }
            }
            if patterns {
                *result.patterns.entry(value_pattern(raw)).or_insert(0) += 1;
            }
            if frequencies {
                *result.frequencies.entry(raw.to_string()).or_insert(0) += 1;
            }
        }
        Ok(())
    }

    fn results(&self) -> &[ColumnAnalysis] {
        &self.results
    }
}
