//! Results output formatting (CSV).

use crate::error::Result;
use crate::solver::{SolveResult, SplineInterpolator, SplineSample};
use std::io::Write;

/// Write a relaxation solution as CSV, optionally beside a reference
/// solution of the same length.
///
/// Format:
/// ```csv
/// Index,Value
/// 0,1.5
/// 1,1.0
/// ```
/// With a reference, two more columns `Reference,AbsError` are added.
pub fn write_solution_csv<W: Write>(
    result: &SolveResult,
    reference: Option<&[f64]>,
    writer: &mut W,
) -> Result<()> {
    match reference {
        Some(reference) => {
            writeln!(writer, "Index,Value,Reference,AbsError")?;
            for (i, (value, expected)) in result.values.iter().zip(reference).enumerate() {
                writeln!(writer, "{},{},{},{}", i, value, expected, (value - expected).abs())?;
            }
        }
        None => {
            writeln!(writer, "Index,Value")?;
            for (i, value) in result.values.iter().enumerate() {
                writeln!(writer, "{},{}", i, value)?;
            }
        }
    }
    Ok(())
}

/// Write per-segment spline coefficients as CSV.
///
/// Format:
/// ```csv
/// Knot,a,b,c
/// 0,0,0,0
/// 1,0.25,2.1,-3.0
/// ```
pub fn write_coefficients_csv<W: Write>(spline: &SplineInterpolator, writer: &mut W) -> Result<()> {
    writeln!(writer, "Knot,a,b,c")?;
    for (i, ((a, b), c)) in spline.a().iter().zip(spline.b()).zip(spline.c()).enumerate() {
        writeln!(writer, "{},{},{},{}", i, a, b, c)?;
    }
    Ok(())
}

/// Write sampled spline points as CSV.
///
/// Format:
/// ```csv
/// x,y
/// 0.0,0.0
/// 0.05,0.071
/// ```
pub fn write_samples_csv<W: Write>(samples: &[SplineSample], writer: &mut W) -> Result<()> {
    writeln!(writer, "x,y")?;
    for sample in samples {
        writeln!(writer, "{},{}", sample.x, sample.y)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> SolveResult {
        SolveResult {
            values: vec![1.5, 1.0],
            iterations_used: 12,
            converged: true,
            final_residual: 1e-6,
        }
    }

    #[test]
    fn solution_csv() {
        let mut out = Vec::new();
        write_solution_csv(&result(), None, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Index,Value\n0,1.5\n1,1\n");
    }

    #[test]
    fn solution_csv_with_reference() {
        let mut out = Vec::new();
        write_solution_csv(&result(), Some(&[1.5, 1.25]), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Index,Value,Reference,AbsError");
        assert_eq!(lines[2], "1,1,1.25,0.25");
    }

    #[test]
    fn samples_csv() {
        let samples = [SplineSample { x: 0.0, y: 0.0 }, SplineSample { x: 0.5, y: 2.0 }];
        let mut out = Vec::new();
        write_samples_csv(&samples, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "x,y\n0,0\n0.5,2\n");
    }

    #[test]
    fn coefficients_csv() {
        let spline =
            SplineInterpolator::from_coefficients(vec![0.0, 0.5], vec![0.0, 1.0], vec![0.0; 2], 1.0)
                .unwrap();
        let mut out = Vec::new();
        write_coefficients_csv(&spline, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Knot,a,b,c\n0,0,0,0\n1,0.5,1,0\n");
    }
}
