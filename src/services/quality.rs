//! Quality assessment from file names
//!
//! Resolution and source are parsed from release naming conventions and
//! ranked so the duplicate resolver can order copies deterministically.

use once_cell::sync::Lazy;
use regex::Regex;

static RESOLUTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{3,4})[pi]\b").expect("valid resolution regex"));

static DIMENSIONS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b\d{3,4}x(\d{3,4})\b").expect("valid dimensions regex"));

/// Vertical resolution parsed from a file name, if present
pub fn parse_resolution(file_name: &str) -> Option<u32> {
    if let Some(caps) = RESOLUTION_RE.captures(file_name) {
        return caps[1].parse().ok();
    }
    if let Some(caps) = DIMENSIONS_RE.captures(file_name) {
        return caps[1].parse().ok();
    }
    if file_name.to_ascii_lowercase().contains("4k") {
        return Some(2160);
    }
    None
}

/// Rank a vertical resolution; higher is better, unknown is lowest
pub fn resolution_rank(resolution: Option<u32>) -> u32 {
    resolution.unwrap_or(0)
}

/// Source medium parsed from a file name
pub fn parse_source(file_name: &str) -> Option<&'static str> {
    let lower = file_name.to_ascii_lowercase();
    if lower.contains("remux") || lower.contains("bluray") || lower.contains("blu-ray") || lower.contains("bdrip") || lower.contains("bd ") || lower.contains("[bd]") {
        Some("bluray")
    } else if lower.contains("web-dl") || lower.contains("webdl") || lower.contains("webrip") || lower.contains("web ") {
        Some("web")
    } else if lower.contains("dvdrip") || lower.contains("dvd") {
        Some("dvd")
    } else if lower.contains("hdtv") || lower.contains("tvrip") {
        Some("tv")
    } else {
        None
    }
}

/// Rank a source medium; higher is better, unknown is lowest
pub fn source_rank(source: Option<&str>) -> u32 {
    match source {
        Some("bluray") => 4,
        Some("web") => 3,
        Some("dvd") => 2,
        Some("tv") => 1,
        _ => 0,
    }
}

/// Quality assessment of one copy of an episode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityProfile {
    pub resolution: Option<u32>,
    pub source_rank: u32,
}

impl QualityProfile {
    /// Assess a file name
    pub fn from_file_name(file_name: &str) -> Self {
        Self {
            resolution: parse_resolution(file_name),
            source_rank: source_rank(parse_source(file_name)),
        }
    }

    /// Build from already-persisted video attributes
    pub fn from_stored(resolution: Option<&str>, source: Option<&str>) -> Self {
        Self {
            resolution: resolution.and_then(|r| r.trim_end_matches(['p', 'i']).parse().ok()),
            source_rank: source_rank(source),
        }
    }

    /// Ordering key: resolution dominates, source breaks ties
    pub fn rank(&self) -> (u32, u32) {
        (resolution_rank(self.resolution), self.source_rank)
    }
}
