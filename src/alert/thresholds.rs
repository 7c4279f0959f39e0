//! PM2.5 alert level classification.
//!
//! Levels, colours and health guidance are a static lookup table. Band
//! lower bounds are inclusive and upper bounds exclusive; the top band
//! is open-ended.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Alert levels, in ascending order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Low,
    Moderate,
    High,
    VeryHigh,
    Extreme,
}

/// Static metadata for one alert level band.
#[derive(Debug)]
pub struct LevelInfo {
    pub level: AlertLevel,
    pub name: &'static str,
    /// Lower bound in µg/m³, inclusive.
    pub min_pm25: f64,
    pub hex: &'static str,
    pub text_color: &'static str,
    pub health: &'static str,
}

/// All alert levels in ascending order of `min_pm25`.
pub static ALERT_LEVELS: &[LevelInfo] = &[
    LevelInfo {
        level: AlertLevel::Low,
        name: "LOW",
        min_pm25: 0.0,
        hex: "#22c55e",
        text_color: "black",
        health: "No significant risk. No action required.",
    },
    LevelInfo {
        level: AlertLevel::Moderate,
        name: "MODERATE",
        min_pm25: 20.0,
        hex: "#eab308",
        text_color: "black",
        health: "Sensitive groups (children, elderly, respiratory conditions) \
                 should reduce outdoor activity.",
    },
    LevelInfo {
        level: AlertLevel::High,
        name: "HIGH",
        min_pm25: 60.0,
        hex: "#f97316",
        text_color: "black",
        health: "General population affected. Reduce prolonged outdoor exertion. \
                 Use N95/KN95 mask outdoors.",
    },
    LevelInfo {
        level: AlertLevel::VeryHigh,
        name: "VERY HIGH",
        min_pm25: 80.0,
        hex: "#ef4444",
        text_color: "white",
        health: "Significant risk for all. Avoid outdoor exertion. \
                 Keep doors and windows closed.",
    },
    LevelInfo {
        level: AlertLevel::Extreme,
        name: "EXTREME",
        min_pm25: 120.0,
        hex: "#7f1d1d",
        text_color: "white",
        health: "Emergency conditions. Stay indoors. Close windows. Run HEPA filter. \
                 No indoor pollution sources.",
    },
];

impl AlertLevel {
    /// Classifies a predicted PM2.5 value in µg/m³.
    ///
    /// Anything below the first band (including NaN) is `Low`.
    pub fn from_pm25(pm25: f64) -> AlertLevel {
        ALERT_LEVELS
            .iter()
            .rev()
            .find(|info| pm25 >= info.min_pm25)
            .map(|info| info.level)
            .unwrap_or(AlertLevel::Low)
    }

    pub fn info(&self) -> &'static LevelInfo {
        // ALERT_LEVELS is indexed in enum declaration order.
        &ALERT_LEVELS[*self as usize]
    }

    pub fn name(&self) -> &'static str {
        self.info().name
    }

    pub fn hex(&self) -> &'static str {
        self.info().hex
    }

    pub fn text_color(&self) -> &'static str {
        self.info().text_color
    }

    pub fn health(&self) -> &'static str {
        self.info().health
    }

    /// Integer level used by the public API, 1 (LOW) to 5 (EXTREME).
    pub fn rank(&self) -> u8 {
        *self as u8 + 1
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
