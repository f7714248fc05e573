//! Construction stages for acceptance checks.
//!
//! Storage and fingerprints always use the canonical `S00`..`S05` codes.
//! Older app builds still send legacy stage names; those are mapped here
//! and nowhere else.

use serde::{Deserialize, Serialize};

/// A renovation construction stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Material,
    Plumbing,
    Carpentry,
    Woodwork,
    Painting,
    Installation,
}

impl Stage {
    /// Canonical stage code used in storage and fingerprints.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Material => "S00",
            Self::Plumbing => "S01",
            Self::Carpentry => "S02",
            Self::Woodwork => "S03",
            Self::Painting => "S04",
            Self::Installation => "S05",
        }
    }

    /// Stable English name, used in API responses.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Material => "material",
            Self::Plumbing => "plumbing",
            Self::Carpentry => "carpentry",
            Self::Woodwork => "woodwork",
            Self::Painting => "painting",
            Self::Installation => "installation",
        }
    }

    /// Chinese display name, used in checklist prompts and findings.
    pub fn name_zh(&self) -> &'static str {
        match self {
            Self::Material => "材料进场",
            Self::Plumbing => "水电改造",
            Self::Carpentry => "泥瓦工程",
            Self::Woodwork => "木工工程",
            Self::Painting => "油漆工程",
            Self::Installation => "安装收尾",
        }
    }

    /// All stages in construction order.
    pub fn all() -> &'static [Stage] {
        &[
            Self::Material,
            Self::Plumbing,
            Self::Carpentry,
            Self::Woodwork,
            Self::Painting,
            Self::Installation,
        ]
    }

    /// Parse a stage from a canonical code, current name, or legacy
    /// alias. This is the only place legacy names are interpreted.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "s00" | "material" => Some(Self::Material),
            "s01" | "plumbing" => Some(Self::Plumbing),
            "s02" | "carpentry" | "flooring" => Some(Self::Carpentry),
            "s03" | "woodwork" => Some(Self::Woodwork),
            "s04" | "painting" => Some(Self::Painting),
            "s05" | "installation" | "soft_furnishing" => Some(Self::Installation),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_codes() {
        assert_eq!(Stage::parse("S00"), Some(Stage::Material));
        assert_eq!(Stage::parse("s03"), Some(Stage::Woodwork));
        assert_eq!(Stage::parse("S05"), Some(Stage::Installation));
        assert_eq!(Stage::parse("S06"), None);
    }

    #[test]
    fn test_parse_legacy_aliases() {
        assert_eq!(Stage::parse("flooring"), Some(Stage::Carpentry));
        assert_eq!(Stage::parse("soft_furnishing"), Some(Stage::Installation));
        assert_eq!(Stage::parse("woodwork"), Some(Stage::Woodwork));
    }

    #[test]
    fn test_alias_and_code_agree() {
        assert_eq!(
            Stage::parse("flooring").map(|s| s.code()),
            Stage::parse("S02").map(|s| s.code())
        );
    }

    #[test]
    fn test_codes_cover_all_stages() {
        for stage in Stage::all() {
            assert_eq!(Stage::parse(stage.code()), Some(*stage));
            assert_eq!(Stage::parse(stage.name()), Some(*stage));
        }
    }
}
