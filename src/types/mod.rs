use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest value the feed can emit. Draws are single digits 0-9.
pub const RANGE_MAX: u8 = 9;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("digit out of range: {0} (expected 0..={RANGE_MAX})")]
    DigitOutOfRange(i64),
    #[error("model not ready: call init() before predicting")]
    ModelNotReady,
}

/// A single observed draw value, validated into [0, RANGE_MAX].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digit(u8);

impl Digit {
    pub fn new(value: impl Into<i64>) -> Result<Self, EngineError> {
        let value = value.into();
        if (0..=RANGE_MAX as i64).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(EngineError::DigitOutOfRange(value))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Big/small bucket used by the feed's own correctness metric.
    pub fn is_big(&self) -> bool {
        self.0 >= 5
    }
}

impl std::fmt::Display for Digit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The last three accepted draws, oldest first. Both the regression
/// feature input and the Markov lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Context {
    pub n1: Digit,
    pub n2: Digit,
    pub n3: Digit,
}

impl Context {
    pub fn new(n1: Digit, n2: Digit, n3: Digit) -> Self {
        Self { n1, n2, n3 }
    }

    pub fn from_values(n1: i64, n2: i64, n3: i64) -> Result<Self, EngineError> {
        Ok(Self::new(Digit::new(n1)?, Digit::new(n2)?, Digit::new(n3)?))
    }

    pub fn values(&self) -> [u8; 3] {
        [self.n1.value(), self.n2.value(), self.n3.value()]
    }
}

/// One draw as stored in the history table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawRecord {
    pub issue: String,
    pub num: u8,
    pub predicted: Option<u8>,
    pub created_at: DateTime<Utc>,
}

/// Confidence label derived from rolling accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
