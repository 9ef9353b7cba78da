use indexmap::IndexMap;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("`{0}` is not defined")]
    Undefined(String),
    #[error("{0}")]
    Failed(String),
}

pub trait MacroEvaluator {
    fn evaluate(&mut self, payload: &str) -> Result<String, EvalError>;
}

impl<F> MacroEvaluator for F
where
    F: FnMut(&str) -> Result<String, EvalError>,
{
    fn evaluate(&mut self, payload: &str) -> Result<String, EvalError> {
        self(payload)
    }
}

/// Plain `NAME -> text` substitution, as filled by `-D NAME=VALUE`.
#[derive(Clone, Debug, Default)]
pub struct DefineTable {
    values: IndexMap<String, String>,
}

impl DefineTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }
}

impl FromIterator<(String, String)> for DefineTable {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl MacroEvaluator for DefineTable {
    fn evaluate(&mut self, payload: &str) -> Result<String, EvalError> {
        let name = payload.trim();
        if name.is_empty() {
            return Err(EvalError::Failed("empty escape".to_string()));
        }
        self.values
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::Undefined(name.to_string()))
    }
}
