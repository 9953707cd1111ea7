//! Measurement tables: `time,<name>...` CSV into [`MeasurementData`].
//!
//! Empty cells are missing samples; each variable is interpolated over the
//! rows where it has a value.

use crate::error::{ResultFileError, ResultFileResult};
use dopt_core::{LinearInterpolation, MeasurementData};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

pub fn read_measurements<R: Read>(reader: R) -> ResultFileResult<MeasurementData> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader.headers()?.clone();
    match headers.get(0) {
        Some(first) if first.eq_ignore_ascii_case("time") => {}
        other => {
            return Err(ResultFileError::parse(
                1,
                format!("first column must be 'time', found {other:?}"),
            ))
        }
    }
    let names: Vec<&str> = headers.iter().skip(1).collect();
    if names.is_empty() {
        return Err(ResultFileError::parse(1, "no measured variables after 'time'"));
    }

    let mut columns: Vec<(Vec<f64>, Vec<f64>)> = vec![(Vec::new(), Vec::new()); names.len()];
    let mut last_time = f64::NEG_INFINITY;
    let mut missing = 0usize;
    for record in reader.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line() as usize);
        let number = |field: &str| {
            field
                .parse::<f64>()
                .map_err(|e| ResultFileError::parse(line, format!("bad number '{field}': {e}")))
        };

        let t = number(record.get(0).unwrap_or_default())?;
        if t < last_time {
            return Err(ResultFileError::parse(
                line,
                format!("time {t} comes after {last_time}"),
            ));
        }
        last_time = t;

        for (j, (times, values)) in columns.iter_mut().enumerate() {
            match record.get(j + 1) {
                Some(field) if !field.is_empty() => {
                    times.push(t);
                    values.push(number(field)?);
                }
                _ => missing += 1,
            }
        }
    }

    let mut data = MeasurementData::new();
    for (name, (times, values)) in names.iter().zip(columns) {
        let series = LinearInterpolation::new(times, values)
            .map_err(|e| ResultFileError::parse(1, format!("column '{name}': {e}")))?;
        data.insert(*name, series);
    }
    if missing > 0 {
        debug!(missing, "measurement table has empty cells");
    }
    Ok(data)
}

pub fn load_measurements(path: impl AsRef<Path>) -> ResultFileResult<MeasurementData> {
    let path = path.as_ref();
    let data = read_measurements(File::open(path)?)?;
    info!(path = %path.display(), variables = data.names().len(), "measurements loaded");
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_columns_as_interpolants() {
        let csv = "time, y1, y2\n0.0, 1.0, 10.0\n1.0, 3.0, 20.0\n2.0, 5.0, 40.0\n";
        let data = read_measurements(csv.as_bytes()).unwrap();
        assert_eq!(data.names(), ["y1", "y2"]);
        assert!((data.get("y1").unwrap().eval(0.5) - 2.0).abs() < 1e-12);
        assert!((data.get("y2").unwrap().eval(1.5) - 30.0).abs() < 1e-12);
        assert_eq!(data.get("y2").unwrap().domain(), (0.0, 2.0));
    }

    #[test]
    fn test_empty_cells_are_skipped() {
        let csv = "time,y1,y2\n0,1,\n1,,4\n2,5,6\n";
        let data = read_measurements(csv.as_bytes()).unwrap();
        assert_eq!(data.get("y1").unwrap().domain(), (0.0, 2.0));
        assert!((data.get("y1").unwrap().eval(1.0) - 3.0).abs() < 1e-12);
        assert_eq!(data.get("y2").unwrap().domain(), (1.0, 2.0));
    }

    #[test]
    fn test_first_column_must_be_time() {
        let csv = "t,y\n0,1\n";
        assert!(matches!(
            read_measurements(csv.as_bytes()),
            Err(ResultFileError::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn test_bad_number_reports_line() {
        let csv = "time,y\n0,1\n1,oops\n";
        assert!(matches!(
            read_measurements(csv.as_bytes()),
            Err(ResultFileError::Parse { line: 3, .. })
        ));
    }

    #[test]
    fn test_decreasing_time_rejected() {
        let csv = "time,y\n1,1\n0,2\n";
        assert!(matches!(
            read_measurements(csv.as_bytes()),
            Err(ResultFileError::Parse { line: 3, .. })
        ));
    }

    #[test]
    fn test_column_without_values_rejected() {
        let csv = "time,y,z\n0,1,\n1,2,\n";
        assert!(matches!(
            read_measurements(csv.as_bytes()),
            Err(ResultFileError::Parse { .. })
        ));
    }
}
