//! Evaluates user-defined derived PEG formulas against a window's aggregated
//! averages, independently per window.

use std::collections::HashMap;

use crate::formula;
use crate::models::{AggregatedPeg, DerivedFormula, WindowTag};

/// Evaluates each formula against `{peg_name -> avg}` bindings drawn from
/// `aggregated`. A formula whose evaluation fails (unknown reference or
/// syntax error) is omitted; a human-readable warning line is returned
/// alongside it for the caller to attach to result metadata.
pub fn evaluate(
    aggregated: &[AggregatedPeg],
    formulas: &[DerivedFormula],
    tag: WindowTag,
) -> (Vec<AggregatedPeg>, Vec<String>) {
    let bindings: HashMap<String, f64> =
        aggregated.iter().map(|p| (p.peg_name.clone(), p.avg)).collect();

    let mut derived = Vec::new();
    let mut warnings = Vec::new();

    for formula in formulas {
        match formula::eval(&formula.expression, &bindings) {
            Ok(value) => {
                if formula::divides_by_zero(&formula.expression, &bindings) {
                    warnings.push(format!("derived {}: division by zero, value set to 0", formula.name));
                }
                derived.push(AggregatedPeg {
                    peg_name: formula.name.clone(),
                    window_tag: tag,
                    avg: value,
                    count: 0,
                    rsd: 0.0,
                })
            },
            Err(crate::error::AnalysisError::FormulaUnknownRef { name }) => {
                warnings.push(format!("derived {}: unknown ref {name}", formula.name));
            },
            Err(_) => warnings.push(format!("derived {}: invalid formula", formula.name)),
        }
    }

    (derived, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peg(name: &str, avg: f64) -> AggregatedPeg {
        AggregatedPeg { peg_name: name.to_string(), window_tag: WindowTag::N, avg, count: 5, rsd: 1.0 }
    }

    #[test]
    fn evaluates_formula_against_averages() {
        let aggregated = vec![peg("A", 10.0), peg("B", 4.0)];
        let formulas = vec![DerivedFormula { name: "ratio".to_string(), expression: "A/B*100".to_string() }];
        let (derived, omitted) = evaluate(&aggregated, &formulas, WindowTag::N);
        assert!(omitted.is_empty());
        assert_eq!(derived[0].avg, 250.0);
        assert_eq!(derived[0].count, 0);
        assert_eq!(derived[0].rsd, 0.0);
    }

    #[test]
    fn unknown_reference_is_omitted_not_errored() {
        let aggregated = vec![peg("A", 10.0)];
        let formulas = vec![DerivedFormula { name: "bad".to_string(), expression: "A/C".to_string() }];
        let (derived, warnings) = evaluate(&aggregated, &formulas, WindowTag::N);
        assert!(derived.is_empty());
        assert_eq!(warnings, vec!["derived bad: unknown ref C".to_string()]);
    }

    #[test]
    fn division_by_zero_yields_zero_with_a_warning() {
        let aggregated = vec![peg("A", 5.0), peg("B", 0.0)];
        let formulas = vec![DerivedFormula { name: "ratio".to_string(), expression: "A/B".to_string() }];
        let (derived, warnings) = evaluate(&aggregated, &formulas, WindowTag::N);
        assert_eq!(derived[0].avg, 0.0);
        assert_eq!(warnings, vec!["derived ratio: division by zero, value set to 0".to_string()]);
    }

    #[test]
    fn windows_are_independent() {
        let n1 = vec![peg("A", 5.0)];
        let n = vec![peg("A", 10.0)];
        let formulas = vec![DerivedFormula { name: "double".to_string(), expression: "A*2".to_string() }];
        let (d1, _) = evaluate(&n1, &formulas, WindowTag::NMinus1);
        let (d2, _) = evaluate(&n, &formulas, WindowTag::N);
        assert_eq!(d1[0].avg, 10.0);
        assert_eq!(d2[0].avg, 20.0);
    }
}
