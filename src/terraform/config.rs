//! Terraform tool settings

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;

/// Sphere-cast attempts a caller should make when probing for a hit
pub const CAST_STEPS: usize = 5;

/// Brush settings for the terraform tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Brush radius in world units
    pub radius: f32,
    /// Edit weight per second
    pub strength: f32,
    /// Whether the add mode does anything
    pub allow_adding: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            radius: 5.0,
            strength: 100.0,
            allow_adding: true,
        }
    }
}

impl ToolConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(Error::Config(format!("Tool radius must be positive, got {}", self.radius)));
        }
        if !(self.strength.is_finite() && self.strength >= 0.0) {
            return Err(Error::Config(format!("Tool strength must be non-negative, got {}", self.strength)));
        }
        Ok(())
    }

    /// Growing cast radii for hit detection, thinnest first.
    ///
    /// A thin ray misses grazing terrain; each retry widens the cast up to
    /// the full brush radius.
    pub fn cast_radii(&self) -> [f32; CAST_STEPS] {
        std::array::from_fn(|i| {
            let t = i as f32 / (CAST_STEPS - 1) as f32;
            self.radius * (0.01 + (1.0 - 0.01) * t)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ToolConfig::default();
        assert_eq!(config.radius, 5.0);
        assert!(config.allow_adding);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        assert!(ToolConfig { radius: 0.0, ..Default::default() }.validate().is_err());
        assert!(ToolConfig { strength: -1.0, ..Default::default() }.validate().is_err());
        assert!(ToolConfig { strength: 0.0, ..Default::default() }.validate().is_ok());
    }

    #[test]
    fn test_cast_radii_grow_to_full_radius() {
        let radii = ToolConfig { radius: 2.0, ..Default::default() }.cast_radii();
        assert!((radii[0] - 0.02).abs() < 1e-6);
        assert!((radii[CAST_STEPS - 1] - 2.0).abs() < 1e-6);
        assert!(radii.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_partial_json() {
        let config: ToolConfig = serde_json::from_str(r#"{ "allow_adding": false }"#).unwrap();
        assert!(!config.allow_adding);
        assert_eq!(config.strength, 100.0);
    }
}
