//! Traffic classes
//!
//! Outbound calls are partitioned into classes, each with its own rate
//! budget and concurrency ceiling.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Class of an outbound API call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficClass {
    /// Metadata and enumeration calls
    #[default]
    Standard,
    /// High-volume content transfer
    Bulk,
}

impl TrafficClass {
    /// All classes, in a stable order.
    pub const ALL: [TrafficClass; 2] = [TrafficClass::Standard, TrafficClass::Bulk];

    /// Lowercase name used in metrics labels and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficClass::Standard => "standard",
            TrafficClass::Bulk => "bulk",
        }
    }
}

impl Display for TrafficClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_standard() {
        assert_eq!(TrafficClass::default(), TrafficClass::Standard);
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&TrafficClass::Bulk).unwrap();
        assert_eq!(json, "\"bulk\"");
        let parsed: TrafficClass = serde_json::from_str("\"standard\"").unwrap();
        assert_eq!(parsed, TrafficClass::Standard);
    }
}
