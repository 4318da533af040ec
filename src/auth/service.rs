use std::fmt;

use serde::{Deserialize, Serialize};

/// Access service selected on the campus portal, mapping the label shown to
/// users onto the value the backend protocol expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    CampusNet,
    ChinaTelecom,
    ChinaMobile,
    ChinaUnicom,
}

impl ServiceType {
    pub const ALL: [ServiceType; 4] = [
        Self::CampusNet,
        Self::ChinaTelecom,
        Self::ChinaMobile,
        Self::ChinaUnicom,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            Self::CampusNet => "校园网",
            Self::ChinaTelecom => "中国电信",
            Self::ChinaMobile => "中国移动",
            Self::ChinaUnicom => "中国联通",
        }
    }

    pub fn backend_value(self) -> &'static str {
        match self {
            Self::CampusNet => "EDUNET",
            Self::ChinaTelecom => "CHINATELECOM",
            Self::ChinaMobile => "CHINAMOBILE",
            Self::ChinaUnicom => "CHINAUNICOM",
        }
    }

    pub fn from_display_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.display_name() == name)
    }

    pub fn from_backend_value(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.backend_value() == value)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Backend value for a label that may be a display name, a backend value, or
/// something this build has never heard of. Unknown labels pass through
/// unchanged; the backend is versioned independently and may know newer ones.
pub fn backend_value_for(label: &str) -> &str {
    ServiceType::from_display_name(label)
        .map(ServiceType::backend_value)
        .unwrap_or(label)
}
