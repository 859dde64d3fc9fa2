//! Non-fatal findings.
//!
//! Resolution and graph construction return their value together with any
//! warnings they produced. Whether a warning stops the invocation is decided
//! once, at the top level, by [`Checked::into_strict`].

use crate::error::{Error, Result};
use std::fmt;

/// Category of a non-fatal finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningKind {
    /// Questionable declarative input (unknown names, undeclared volumes).
    Validation,
    /// A dependency edge had to be dropped to obtain an order.
    Dependency,
    /// Live runtime state disagrees with what bay expects.
    RuntimeState,
}

impl WarningKind {
    /// Runtime-state findings describe the outside world and never escalate.
    pub fn escalates(&self) -> bool {
        !matches!(self, WarningKind::RuntimeState)
    }
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningKind::Validation => write!(f, "validation"),
            WarningKind::Dependency => write!(f, "dependency"),
            WarningKind::RuntimeState => write!(f, "runtime"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::Validation,
            message: message.into(),
        }
    }

    pub fn dependency(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::Dependency,
            message: message.into(),
        }
    }

    pub fn runtime_state(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::RuntimeState,
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// A value plus the warnings collected while producing it.
#[derive(Debug, Clone)]
pub struct Checked<T> {
    pub value: T,
    pub warnings: Vec<Warning>,
}

impl<T> Checked<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(value: T, warnings: Vec<Warning>) -> Self {
        Self { value, warnings }
    }

    pub fn warn(&mut self, warning: Warning) {
        tracing::debug!("{}", warning);
        self.warnings.push(warning);
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Checked<U> {
        Checked {
            value: f(self.value),
            warnings: self.warnings,
        }
    }

    /// Move this value's warnings into `sink` and return the bare value.
    pub fn drain_into(self, sink: &mut Vec<Warning>) -> T {
        sink.extend(self.warnings);
        self.value
    }

    /// In strict mode, the first escalating warning becomes an error.
    ///
    /// Non-strict mode passes everything through unchanged.
    pub fn into_strict(self, strict: bool) -> Result<Checked<T>> {
        if strict {
            if let Some(w) = self.warnings.iter().find(|w| w.kind.escalates()) {
                return Err(Error::Strict(w.to_string()));
            }
        }
        Ok(self)
    }
}
