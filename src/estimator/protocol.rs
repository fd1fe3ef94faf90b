//! Line protocol spoken with the learning server.
//!
//! Every message is one UTF-8 line terminated by `\n`.
//!
//! | direction | line                                  |
//! |-----------|---------------------------------------|
//! | request   | `PREDICT <linker_id> <final|possible>` |
//! | request   | `ADD <linker_id>`                     |
//! | reply     | `<float>`                             |
//! | reply     | `ERR <reason>`                        |
//!
//! `PREDICT` is answered with the estimate. `ADD` asks the server to load the
//! linker's feature and property files into its training set, refit, and
//! answer with the new training set size.

use std::fmt;

use super::error::EstimatorError;

/// Which feature file the server should read: the accepted linker's, or a
/// speculative closing candidate's under `possible/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Final,
    Possible,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Final => write!(f, "final"),
            Scope::Possible => write!(f, "possible"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictRequest<'a> {
    pub linker_id: &'a str,
    pub scope: Scope,
}

impl PredictRequest<'_> {
    pub fn to_line(&self) -> String {
        format!("PREDICT {} {}", self.linker_id, self.scope)
    }
}

/// A finished linker whose property is now on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct AddRequest<'a> {
    pub linker_id: &'a str,
}

impl AddRequest<'_> {
    pub fn to_line(&self) -> String {
        format!("ADD {}", self.linker_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Value(f64),
    Error(String),
}

impl Reply {
    pub fn parse(line: &str) -> Result<Self, EstimatorError> {
        let line = line.trim();
        if let Some(reason) = line.strip_prefix("ERR") {
            return Ok(Reply::Error(reason.trim().to_string()));
        }
        match line.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(Reply::Value(value)),
            _ => Err(EstimatorError::Parse(line.to_string())),
        }
    }

    /// Training set size from an `ADD` reply.
    pub fn into_count(self) -> Result<usize, EstimatorError> {
        match self {
            Reply::Value(value) if value >= 0.0 && value.fract() == 0.0 => Ok(value as usize),
            Reply::Value(value) => Err(EstimatorError::Parse(value.to_string())),
            Reply::Error(reason) => Err(EstimatorError::Server(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line_format() {
        let req = PredictRequest {
            linker_id: "PhCH2_COO",
            scope: Scope::Possible,
        };
        assert_eq!(req.to_line(), "PREDICT PhCH2_COO possible");
    }

    #[test]
    fn add_line_format_and_count() {
        let req = AddRequest { linker_id: "PhCH2_COO" };
        assert_eq!(req.to_line(), "ADD PhCH2_COO");

        assert_eq!(Reply::parse("12").unwrap().into_count().unwrap(), 12);
        assert!(matches!(Reply::parse("2.5").unwrap().into_count(), Err(EstimatorError::Parse(_))));
        assert!(matches!(Reply::parse("-1").unwrap().into_count(), Err(EstimatorError::Parse(_))));
        assert!(matches!(
            Reply::parse("ERR no property file").unwrap().into_count(),
            Err(EstimatorError::Server(reason)) if reason == "no property file"
        ));
    }

    #[test]
    fn parses_value_and_error_replies() {
        assert_eq!(Reply::parse("0.731\n").unwrap(), Reply::Value(0.731));
        assert_eq!(
            Reply::parse("ERR missing feature file").unwrap(),
            Reply::Error("missing feature file".into())
        );
    }

    #[test]
    fn rejects_garbage_and_non_finite() {
        assert!(matches!(Reply::parse("hello"), Err(EstimatorError::Parse(_))));
        assert!(matches!(Reply::parse("NaN"), Err(EstimatorError::Parse(_))));
        assert!(matches!(Reply::parse("inf"), Err(EstimatorError::Parse(_))));
    }
}
