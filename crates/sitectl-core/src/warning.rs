use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningKind {
    /// A non-fatal step failed and the workflow carried on.
    RecoverableStep,
    /// An external inventory reported something malformed; the unit was skipped.
    DataInconsistency,
    /// An addon was left out of a plan rather than guessed about.
    PlanningAmbiguity,
    DependencyLoop,
}

impl WarningKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RecoverableStep => "recoverable-step",
            Self::DataInconsistency => "data-inconsistency",
            Self::PlanningAmbiguity => "planning-ambiguity",
            Self::DependencyLoop => "dependency-loop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(WarningKind::DataInconsistency, message)
    }

    pub fn recoverable(message: impl Into<String>) -> Self {
        Self::new(WarningKind::RecoverableStep, message)
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}
