use serde::{Deserialize, Serialize};

use crate::types::{Context, RANGE_MAX};

/// Fixed-size feature vector derived from a three-digit context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextFeatures {
    pub n1_norm: f64,
    pub n2_norm: f64,
    pub n3_norm: f64,
    pub delta_12: f64,
    pub delta_23: f64,
    pub n1_parity: f64,
    pub n2_parity: f64,
    pub n3_parity: f64,
}

impl ContextFeatures {
    pub const NUM_FEATURES: usize = 8;

    pub fn to_array(&self) -> [f64; Self::NUM_FEATURES] {
        [
            self.n1_norm,
            self.n2_norm,
            self.n3_norm,
            self.delta_12,
            self.delta_23,
            self.n1_parity,
            self.n2_parity,
            self.n3_parity,
        ]
    }
}

/// Extract features from a context. Pure and deterministic: values
/// normalized to [0,1], absolute normalized deltas between consecutive
/// values, and one parity flag per value.
pub fn extract_features(context: &Context) -> ContextFeatures {
    let [n1, n2, n3] = context.values().map(|v| v as f64);
    let max = RANGE_MAX as f64;

    ContextFeatures {
        n1_norm: n1 / max,
        n2_norm: n2 / max,
        n3_norm: n3 / max,
        delta_12: (n2 - n1).abs() / max,
        delta_23: (n3 - n2).abs() / max,
        n1_parity: (n1 as u8 % 2) as f64,
        n2_parity: (n2 as u8 % 2) as f64,
        n3_parity: (n3 as u8 % 2) as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_is_deterministic() {
        let ctx = Context::from_values(2, 4, 6).unwrap();
        let a = extract_features(&ctx);
        let b = extract_features(&ctx);
        assert_eq!(a.to_array(), b.to_array());
    }

    #[test]
    fn test_feature_values() {
        let ctx = Context::from_values(1, 3, 9).unwrap();
        let f = extract_features(&ctx);
        assert!((f.n1_norm - 1.0 / 9.0).abs() < 1e-12);
        assert!((f.n3_norm - 1.0).abs() < 1e-12);
        assert!((f.delta_12 - 2.0 / 9.0).abs() < 1e-12);
        assert!((f.delta_23 - 6.0 / 9.0).abs() < 1e-12);
        assert_eq!(f.n1_parity, 1.0);
        assert_eq!(f.n2_parity, 1.0);
        assert_eq!(f.n3_parity, 1.0);
    }

    #[test]
    fn test_fixed_length() {
        let ctx = Context::from_values(0, 0, 0).unwrap();
        assert_eq!(extract_features(&ctx).to_array().len(), ContextFeatures::NUM_FEATURES);
    }
}
