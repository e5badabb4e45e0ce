use serde::Serialize;

/// Ordered, append-only trail of human-readable decision reasons.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DecisionReasons {
    reasons: Vec<String>,
}

impl DecisionReasons {
    pub fn new() -> DecisionReasons {
        DecisionReasons::default()
    }

    /// Append a reason and mirror it to the debug log.
    pub fn push(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        log::debug!(target: "decision_engine", "{reason}");
        self.reasons.push(reason);
    }

    pub fn extend(&mut self, other: DecisionReasons) {
        self.reasons.extend(other.reasons);
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.reasons.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.reasons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.reasons
    }

    /// Returns `true` if any reason contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.reasons.iter().any(|it| it.contains(needle))
    }
}

/// A value paired with the reasons that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionResponse<T> {
    pub result: T,
    pub reasons: DecisionReasons,
}

impl<T> DecisionResponse<T> {
    pub fn new(result: T, reasons: DecisionReasons) -> DecisionResponse<T> {
        DecisionResponse { result, reasons }
    }

    /// Map `DecisionResponse.result` using the `f` function.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> DecisionResponse<U> {
        DecisionResponse {
            result: f(self.result),
            reasons: self.reasons,
        }
    }
}
