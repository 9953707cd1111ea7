//! Dymola textual trajectory files.
//!
//! ```text
//! #1
//! char Aclass(3,11)
//! Atrajectory
//! 1.1
//!
//! char name(n+1,len)          time, then every variable (aliases follow their target)
//! char description(n+1,len)
//! int dataInfo(n+1,4)         block  ±column  0  -1
//! float data_1(2,np+1)        parameters at t0 and tf
//! float data_2(N,nv+1)        time and trajectory values
//! ```
//!
//! `dataInfo` columns are 1-based into `data_1` (block 1) or `data_2`
//! (block 2), column 1 being time. A negative column marks a negated alias.

use crate::error::{ResultFileError, ResultFileResult};
use dopt_core::{
    AliasKind, DoptResult, ModelDescription, TrajectorySource, Trajectories, VarKind, VarRef,
    Variable,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

const TIME_DESCRIPTION: &str = "Time in [s]";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    /// Values are in decision-vector units; multiply by nominals on the way out.
    pub rescale: bool,
}

/// One `name` / `dataInfo` row.
struct Entry<'a> {
    var: &'a Variable,
    block: u8,
    column: i64,
}

fn layout(description: &ModelDescription) -> Vec<Entry<'_>> {
    let mut aliases: HashMap<VarRef, Vec<&Variable>> = HashMap::new();
    for var in description.variables().iter().filter(|v| v.is_alias()) {
        aliases.entry(var.var_ref).or_default().push(var);
    }

    let (mut cnt_1, mut cnt_2) = (1i64, 1i64);
    let mut entries = Vec::with_capacity(description.variables().len());
    for var in description.variables().iter().filter(|v| !v.is_alias()) {
        let (block, column) = if var.kind == VarKind::Parameter {
            cnt_1 += 1;
            (1, cnt_1)
        } else {
            cnt_2 += 1;
            (2, cnt_2)
        };
        entries.push(Entry { var, block, column });
        for alias in aliases.get(&var.var_ref).into_iter().flatten() {
            let column = if alias.alias == AliasKind::Negated {
                -column
            } else {
                column
            };
            entries.push(Entry {
                var: alias,
                block,
                column,
            });
        }
    }
    entries
}

/// `%.14E` with a signed, two-digit exponent.
fn sci(v: f64) -> String {
    let s = format!("{v:.14E}");
    match s.split_once('E') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exp),
            };
            format!("{mantissa}E{sign}{digits:0>2}")
        }
        None => s,
    }
}

fn single_line(text: &str) -> String {
    text.replace(['\n', '\r'], " ")
}

fn parameter_value(
    description: &ModelDescription,
    trajectories: &Trajectories,
    var: &Variable,
    options: &WriteOptions,
) -> ResultFileResult<f64> {
    match description.position(var.var_ref) {
        Some((VarKind::Parameter, i)) => {
            let v = trajectories.p_opt.get(i).copied().ok_or_else(|| {
                ResultFileError::Inconsistent(format!(
                    "p_opt has {} entries, '{}' is free parameter {i}",
                    trajectories.p_opt.len(),
                    var.name
                ))
            })?;
            Ok(if options.rescale { v * var.nominal } else { v })
        }
        _ => Ok(var.value.or(var.start).unwrap_or(0.0)),
    }
}

/// Write `trajectories` of the model described by `description`.
pub fn write_result<W: Write>(
    out: W,
    description: &ModelDescription,
    trajectories: &Trajectories,
    options: &WriteOptions,
) -> ResultFileResult<()> {
    let n_points = trajectories.len();
    let (Some(&t0), Some(&tf)) = (trajectories.time.first(), trajectories.time.last()) else {
        return Err(ResultFileError::Inconsistent("no time points to write".into()));
    };

    let entries = layout(description);
    let mut parameters = Vec::new();
    let mut columns: Vec<(&Vec<Vec<f64>>, usize, f64)> = Vec::new();
    for entry in entries.iter().filter(|e| !e.var.is_alias()) {
        if entry.block == 1 {
            parameters.push(parameter_value(description, trajectories, entry.var, options)?);
            continue;
        }
        let name = &entry.var.name;
        let (kind, index) = description
            .position(entry.var.var_ref)
            .ok_or_else(|| ResultFileError::VariableNotFound { name: name.clone() })?;
        let rows = trajectories
            .rows(kind)
            .ok_or_else(|| ResultFileError::VariableNotFound { name: name.clone() })?;
        if rows.len() != n_points || rows.iter().any(|row| row.len() <= index) {
            return Err(ResultFileError::Inconsistent(format!(
                "{kind:?} rows do not cover '{name}' at {n_points} time points"
            )));
        }
        let scale = if options.rescale { entry.var.nominal } else { 1.0 };
        columns.push((rows, index, scale));
    }

    let mut out = BufWriter::new(out);
    writeln!(out, "#1")?;
    writeln!(out, "char Aclass(3,11)")?;
    writeln!(out, "Atrajectory")?;
    writeln!(out, "1.1")?;
    writeln!(out)?;

    let name_len = entries
        .iter()
        .map(|e| e.var.name.chars().count())
        .max()
        .unwrap_or(0)
        .max("time".len());
    writeln!(out, "char name({},{})", entries.len() + 1, name_len)?;
    writeln!(out, "time")?;
    for entry in &entries {
        writeln!(out, "{}", entry.var.name)?;
    }
    writeln!(out)?;

    let descriptions: Vec<String> = entries.iter().map(|e| single_line(&e.var.description)).collect();
    let description_len = descriptions
        .iter()
        .map(|d| d.chars().count())
        .max()
        .unwrap_or(0)
        .max(TIME_DESCRIPTION.len());
    writeln!(out, "char description({},{})", entries.len() + 1, description_len)?;
    writeln!(out, "{TIME_DESCRIPTION}")?;
    for text in &descriptions {
        writeln!(out, "{text}")?;
    }
    writeln!(out)?;

    writeln!(out, "int dataInfo({},4)", entries.len() + 1)?;
    writeln!(out, "0 1 0 -1 # time")?;
    for entry in &entries {
        writeln!(out, "{} {} 0 -1 # {}", entry.block, entry.column, entry.var.name)?;
    }
    writeln!(out)?;

    writeln!(out, "float data_1(2,{})", parameters.len() + 1)?;
    for t in [t0, tf] {
        write!(out, "{}", sci(t))?;
        for &p in &parameters {
            write!(out, " {}", sci(p))?;
        }
        writeln!(out)?;
    }
    writeln!(out)?;

    writeln!(out, "float data_2({},{})", n_points, columns.len() + 1)?;
    for (i, &t) in trajectories.time.iter().enumerate() {
        write!(out, "{}", sci(t))?;
        for &(rows, index, scale) in &columns {
            write!(out, " {}", sci(rows[i][index] * scale))?;
        }
        writeln!(out)?;
    }
    writeln!(out)?;
    out.flush()?;

    debug!(
        variables = entries.len(),
        parameters = parameters.len(),
        points = n_points,
        "wrote Dymola result"
    );
    Ok(())
}

pub fn write_result_file(
    path: impl AsRef<Path>,
    description: &ModelDescription,
    trajectories: &Trajectories,
    options: &WriteOptions,
) -> ResultFileResult<()> {
    let path = path.as_ref();
    write_result(File::create(path)?, description, trajectories, options)?;
    info!(path = %path.display(), points = trajectories.len(), "result file written");
    Ok(())
}

#[derive(Debug, Clone, Default)]
struct Matrix {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

impl Matrix {
    fn column(&self, c: usize) -> ResultFileResult<Vec<f64>> {
        if c >= self.cols {
            return Err(ResultFileError::Inconsistent(format!(
                "column {} outside a matrix of {} columns",
                c + 1,
                self.cols
            )));
        }
        (0..self.rows)
            .map(|r| {
                self.values.get(r * self.cols + c).copied().ok_or_else(|| {
                    ResultFileError::Inconsistent(format!(
                        "matrix holds {} values, expected {}x{}",
                        self.values.len(),
                        self.rows,
                        self.cols
                    ))
                })
            })
            .collect()
    }
}

struct Header<'a> {
    kind: &'a str,
    name: &'a str,
    rows: usize,
    cols: usize,
}

/// Line cursor with 1-based line numbers for error messages.
struct Cursor<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().collect(),
            pos: 0,
        }
    }

    /// Number of the line returned last.
    fn line_no(&self) -> usize {
        self.pos
    }

    fn next_line(&mut self) -> Option<&'a str> {
        let line = self.lines.get(self.pos).copied();
        if line.is_some() {
            self.pos += 1;
        }
        line
    }

    /// Next non-blank line that is not a `#` format marker.
    fn next_header(&mut self) -> Option<&'a str> {
        while let Some(line) = self.next_line() {
            let trimmed = line.trim();
            if !trimmed.is_empty() && !trimmed.starts_with('#') {
                return Some(trimmed);
            }
        }
        None
    }

    fn char_block(&mut self, header: &Header<'_>) -> ResultFileResult<Vec<String>> {
        (0..header.rows)
            .map(|_| {
                self.next_line().map(|l| l.trim().to_string()).ok_or_else(|| {
                    ResultFileError::parse(self.line_no(), format!("unexpected end of file in '{}'", header.name))
                })
            })
            .collect()
    }

    fn numeric_block(&mut self, header: &Header<'_>) -> ResultFileResult<Matrix> {
        let wanted = header.rows * header.cols;
        let mut values = Vec::with_capacity(wanted);
        while values.len() < wanted {
            let line = self.next_line().ok_or_else(|| {
                ResultFileError::parse(
                    self.line_no(),
                    format!("'{}' ended after {} of {wanted} values", header.name, values.len()),
                )
            })?;
            let data = line.split('#').next().unwrap_or_default();
            for token in data.split_whitespace() {
                if values.len() == wanted {
                    return Err(ResultFileError::parse(
                        self.line_no(),
                        format!("'{}' has more than {wanted} values", header.name),
                    ));
                }
                let value = token.parse::<f64>().map_err(|e| {
                    ResultFileError::parse(self.line_no(), format!("bad number '{token}': {e}"))
                })?;
                values.push(value);
            }
        }
        Ok(Matrix {
            rows: header.rows,
            cols: header.cols,
            values,
        })
    }
}

fn parse_header(line: &str, line_no: usize) -> ResultFileResult<Header<'_>> {
    let malformed = || ResultFileError::parse(line_no, format!("expected a matrix declaration, found '{line}'"));
    let (decl, dims) = line.split_once('(').ok_or_else(malformed)?;
    let (rows, cols) = dims
        .strip_suffix(')')
        .and_then(|d| d.split_once(','))
        .ok_or_else(malformed)?;
    let dim = |s: &str| {
        s.trim()
            .parse::<usize>()
            .map_err(|e| ResultFileError::parse(line_no, format!("bad dimension '{s}': {e}")))
    };
    let mut parts = decl.split_whitespace();
    let (Some(kind), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(malformed());
    };
    Ok(Header {
        kind,
        name,
        rows: dim(rows)?,
        cols: dim(cols)?,
    })
}

/// A parsed Dymola textual result file.
#[derive(Debug, Clone)]
pub struct ResultDymolaTextual {
    names: Vec<String>,
    descriptions: Vec<String>,
    /// `(block, signed 1-based column)` per name.
    data_info: Vec<(i64, i64)>,
    index: HashMap<String, usize>,
    data_1: Matrix,
    data_2: Matrix,
}

impl ResultDymolaTextual {
    pub fn from_path(path: impl AsRef<Path>) -> ResultFileResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let result = Self::parse(&text)?;
        info!(path = %path.display(), variables = result.names.len(), points = result.n_points(), "result file loaded");
        Ok(result)
    }

    pub fn parse(text: &str) -> ResultFileResult<Self> {
        let mut cursor = Cursor::new(text);
        let mut names = None;
        let mut descriptions = None;
        let mut data_info = None;
        let mut data_1 = None;
        let mut data_2 = None;

        while let Some(line) = cursor.next_header() {
            let line_no = cursor.line_no();
            let header = parse_header(line, line_no)?;
            match (header.kind, header.name) {
                ("char", "Aclass") => {
                    let class = cursor.char_block(&header)?;
                    if class.get(2).is_some_and(|c| c == "binTrans") {
                        return Err(ResultFileError::parse(
                            line_no,
                            "transposed (binTrans) result files are not supported",
                        ));
                    }
                }
                ("char", "name") => names = Some(cursor.char_block(&header)?),
                ("char", "description") => descriptions = Some(cursor.char_block(&header)?),
                ("char", _) => {
                    cursor.char_block(&header)?;
                }
                (_, "dataInfo") => {
                    if header.cols < 2 {
                        return Err(ResultFileError::parse(line_no, "dataInfo needs at least 2 columns"));
                    }
                    data_info = Some((line_no, cursor.numeric_block(&header)?));
                }
                (_, "data_1") => data_1 = Some(cursor.numeric_block(&header)?),
                (_, "data_2") => data_2 = Some(cursor.numeric_block(&header)?),
                _ => {
                    cursor.numeric_block(&header)?;
                }
            }
        }

        let end = cursor.line_no();
        let names = names.ok_or_else(|| ResultFileError::parse(end, "missing 'name' block"))?;
        let (info_line, info) =
            data_info.ok_or_else(|| ResultFileError::parse(end, "missing 'dataInfo' block"))?;
        let data_2 = data_2.ok_or_else(|| ResultFileError::parse(end, "missing 'data_2' block"))?;
        let data_1 = data_1.unwrap_or_default();
        let descriptions = descriptions.unwrap_or_else(|| vec![String::new(); names.len()]);

        if info.rows != names.len() || descriptions.len() != names.len() {
            return Err(ResultFileError::parse(
                info_line,
                format!(
                    "{} names, {} descriptions and {} dataInfo rows",
                    names.len(),
                    descriptions.len(),
                    info.rows
                ),
            ));
        }

        let mut data_info = Vec::with_capacity(info.rows);
        for row in 0..info.rows {
            let block = info.values[row * info.cols] as i64;
            let column = info.values[row * info.cols + 1] as i64;
            let available = match block {
                0 | 2 => data_2.cols,
                1 => data_1.cols,
                _ => 0,
            };
            if column == 0 || column.unsigned_abs() as usize > available {
                return Err(ResultFileError::parse(
                    info_line + 1 + row,
                    format!("'{}' refers to column {column} of data block {block}", names[row]),
                ));
            }
            data_info.push((block, column));
        }

        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            index.entry(name.clone()).or_insert(i);
        }
        Ok(Self {
            names,
            descriptions,
            data_info,
            index,
            data_1,
            data_2,
        })
    }

    fn lookup(&self, name: &str) -> ResultFileResult<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| ResultFileError::VariableNotFound { name: name.to_string() })
    }

    /// Time and values of `name`; parameters come back at `[t0, tf]`.
    pub fn variable_data(&self, name: &str) -> ResultFileResult<(Vec<f64>, Vec<f64>)> {
        let (block, column) = self.data_info[self.lookup(name)?];
        let matrix = if block == 1 { &self.data_1 } else { &self.data_2 };
        let sign = if column < 0 { -1.0 } else { 1.0 };
        let index = (column.unsigned_abs() as usize).checked_sub(1).ok_or_else(|| {
            ResultFileError::Inconsistent(format!("{name} has data column 0"))
        })?;
        let values = matrix.column(index)?.into_iter().map(|v| sign * v).collect();
        Ok((matrix.column(0)?, values))
    }

    /// `true` for trajectories, `false` for parameters and constants.
    pub fn is_variable(&self, name: &str) -> ResultFileResult<bool> {
        Ok(self.data_info[self.lookup(name)?].0 != 1)
    }

    pub fn description(&self, name: &str) -> ResultFileResult<&str> {
        Ok(&self.descriptions[self.lookup(name)?])
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn n_points(&self) -> usize {
        self.data_2.rows
    }
}

impl TrajectorySource for ResultDymolaTextual {
    fn variable_data(&self, name: &str) -> DoptResult<(Vec<f64>, Vec<f64>)> {
        ResultDymolaTextual::variable_data(self, name).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_column_is_checked() {
        let matrix = Matrix {
            rows: 2,
            cols: 2,
            values: vec![0.0, 1.0, 2.0],
        };
        assert_eq!(matrix.column(0).unwrap(), vec![0.0, 2.0]);
        assert!(matches!(matrix.column(1), Err(ResultFileError::Inconsistent(_))));
        assert!(matches!(matrix.column(2), Err(ResultFileError::Inconsistent(_))));
    }

    const SMALL: &str = "#1
char Aclass(3,11)
Atrajectory
1.1

char name(5,8)
time
k
x
x_alias
minus_x

char description(5,11)
Time in [s]
gain
state
alias


int dataInfo(5,4)
0 1 0 -1 # time
1 2 0 -1 # k
2 2 0 -1 # x
2 2 0 -1 # x_alias
2 -2 0 -1 # minus_x

float data_1(2,2)
0.0 4.5
2.0 4.5

float data_2(3,2)
 0.0 1.0
 1.0 3.0
 2.0
 5.0
";

    #[test]
    fn test_sci_matches_printf() {
        assert_eq!(sci(1.0), "1.00000000000000E+00");
        assert_eq!(sci(-0.00125), "-1.25000000000000E-03");
        assert_eq!(sci(6.02e23), "6.02000000000000E+23");
        assert_eq!(sci(0.0), "0.00000000000000E+00");
    }

    #[test]
    fn test_parse_header() {
        let h = parse_header("float data_2(101,7)", 3).unwrap();
        assert_eq!((h.kind, h.name, h.rows, h.cols), ("float", "data_2", 101, 7));
        assert!(matches!(
            parse_header("float data_2 101 7", 3),
            Err(ResultFileError::Parse { line: 3, .. })
        ));
    }

    #[test]
    fn test_reads_aliases_parameters_and_wrapped_rows() {
        let result = ResultDymolaTextual::parse(SMALL).unwrap();
        assert_eq!(result.n_points(), 3);
        assert_eq!(result.names()[2], "x");
        assert_eq!(result.description("x").unwrap(), "state");
        assert_eq!(result.description("k").unwrap(), "gain");
        assert_eq!(result.description("x_alias").unwrap(), "alias");
        assert_eq!(result.description("minus_x").unwrap(), "");

        let (t, x) = result.variable_data("x").unwrap();
        assert_eq!(t, vec![0.0, 1.0, 2.0]);
        assert_eq!(x, vec![1.0, 3.0, 5.0]);
        assert_eq!(result.variable_data("x_alias").unwrap().1, x);
        assert_eq!(result.variable_data("minus_x").unwrap().1, vec![-1.0, -3.0, -5.0]);

        let (t, k) = result.variable_data("k").unwrap();
        assert_eq!(t, vec![0.0, 2.0]);
        assert_eq!(k, vec![4.5, 4.5]);
        assert!(!result.is_variable("k").unwrap());
        assert!(result.is_variable("x").unwrap());
        assert_eq!(result.variable_data("time").unwrap().1, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_unknown_variable() {
        let result = ResultDymolaTextual::parse(SMALL).unwrap();
        assert!(matches!(
            result.variable_data("y"),
            Err(ResultFileError::VariableNotFound { name }) if name == "y"
        ));
    }

    #[test]
    fn test_column_out_of_range_reports_line() {
        let broken = SMALL.replace("2 -2 0 -1 # minus_x", "2 -3 0 -1 # minus_x");
        match ResultDymolaTextual::parse(&broken) {
            Err(ResultFileError::Parse { line, message }) => {
                assert_eq!(line, 25);
                assert!(message.contains("minus_x"));
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_data() {
        let truncated = SMALL.trim_end().trim_end_matches("5.0");
        assert!(matches!(
            ResultDymolaTextual::parse(truncated),
            Err(ResultFileError::Parse { .. })
        ));
    }

    #[test]
    fn test_bad_number() {
        let broken = SMALL.replace(" 1.0 3.0", " 1.0 three");
        assert!(matches!(
            ResultDymolaTextual::parse(&broken),
            Err(ResultFileError::Parse { line: 33, .. })
        ));
    }
}
