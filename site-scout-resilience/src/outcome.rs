//! Tri-state result for calls that may be served by a fallback.
//!
//! Callers match on the variant instead of inspecting whether an error was
//! raised, so a degraded value is never mistaken for a failure and vice versa.

use std::fmt;

/// Why a fallback value was returned instead of the primary result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradeReason {
    /// The circuit was open; the primary operation was not invoked.
    CircuitOpen { dependency: String },
    /// The primary failed and its failure tripped the circuit.
    CircuitTripped { dependency: String, error: String },
    /// Every retry attempt failed.
    RetriesExhausted { attempts: u32, error: String },
}

impl fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradeReason::CircuitOpen { dependency } => {
                write!(f, "circuit open for {}", dependency)
            }
            DegradeReason::CircuitTripped { dependency, error } => {
                write!(f, "circuit tripped for {}: {}", dependency, error)
            }
            DegradeReason::RetriesExhausted { attempts, error } => {
                write!(f, "gave up after {} attempts: {}", attempts, error)
            }
        }
    }
}

#[derive(Debug)]
pub enum Outcome<T, E> {
    Success(T),
    Degraded { value: T, reason: DegradeReason },
    Fatal(E),
}

impl<T, E> Outcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Outcome::Fatal(_))
    }

    /// The value, whether primary or fallback.
    pub fn value(self) -> Option<T> {
        match self {
            Outcome::Success(value) | Outcome::Degraded { value, .. } => Some(value),
            Outcome::Fatal(_) => None,
        }
    }

    pub fn map<U, F>(self, f: F) -> Outcome<U, E>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::Degraded { value, reason } => Outcome::Degraded {
                value: f(value),
                reason,
            },
            Outcome::Fatal(e) => Outcome::Fatal(e),
        }
    }

    pub fn map_err<F2, M>(self, f: M) -> Outcome<T, F2>
    where
        M: FnOnce(E) -> F2,
    {
        match self {
            Outcome::Success(value) => Outcome::Success(value),
            Outcome::Degraded { value, reason } => Outcome::Degraded { value, reason },
            Outcome::Fatal(e) => Outcome::Fatal(f(e)),
        }
    }

    /// Collapse into a `Result`, treating a degraded value as success.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Outcome::Success(value) | Outcome::Degraded { value, .. } => Ok(value),
            Outcome::Fatal(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_of_each_variant() {
        let ok: Outcome<i32, ()> = Outcome::Success(1);
        assert_eq!(ok.value(), Some(1));

        let degraded: Outcome<i32, ()> = Outcome::Degraded {
            value: 2,
            reason: DegradeReason::CircuitOpen {
                dependency: "x".to_string(),
            },
        };
        assert!(degraded.is_degraded());
        assert_eq!(degraded.value(), Some(2));

        let fatal: Outcome<i32, &str> = Outcome::Fatal("boom");
        assert!(fatal.is_fatal());
        assert_eq!(fatal.value(), None);
    }

    #[test]
    fn test_map_keeps_reason() {
        let degraded: Outcome<i32, ()> = Outcome::Degraded {
            value: 2,
            reason: DegradeReason::RetriesExhausted {
                attempts: 3,
                error: "503".to_string(),
            },
        };
        match degraded.map(|v| v * 10) {
            Outcome::Degraded { value, reason } => {
                assert_eq!(value, 20);
                assert!(reason.to_string().contains("3 attempts"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
