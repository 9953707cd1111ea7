use dopt_core::DoptError;
use thiserror::Error;

/// Failures reading or writing result files and measurement tables.
#[derive(Error, Debug)]
pub enum ResultFileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Variable not found in result file: '{name}'")]
    VariableNotFound { name: String },

    /// The data handed to the writer does not match the model description.
    #[error("Inconsistent result data: {0}")]
    Inconsistent(String),
}

pub type ResultFileResult<T> = Result<T, ResultFileError>;

impl ResultFileError {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        ResultFileError::Parse {
            line,
            message: message.into(),
        }
    }
}

impl From<ResultFileError> for DoptError {
    fn from(err: ResultFileError) -> Self {
        match err {
            ResultFileError::Io(e) => DoptError::Io(e),
            ResultFileError::VariableNotFound { name } => DoptError::VariableNotFound { name },
            other => DoptError::Parse(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_keeps_its_kind() {
        let err: DoptError = ResultFileError::VariableNotFound { name: "x9".into() }.into();
        assert!(matches!(err, DoptError::VariableNotFound { name } if name == "x9"));
    }

    #[test]
    fn test_parse_error_mentions_line() {
        let err = ResultFileError::parse(12, "expected 4 values");
        assert_eq!(err.to_string(), "Parse error at line 12: expected 4 values");
        assert!(matches!(DoptError::from(err), DoptError::Parse(_)));
    }
}
