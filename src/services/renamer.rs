//! Destination naming for relocated files
//!
//! A pattern with `{anime}`, `{episode}`, `{title}` and `{ext}` tokens is
//! expanded from episode metadata, then every path component is sanitized
//! so metadata titles can never escape the library folder.

use std::path::PathBuf;

use anyhow::{Result, bail};

/// Metadata a rename decision is made from
#[derive(Debug, Clone)]
pub struct RenameInput {
    pub anime_title: String,
    pub episode_number: i64,
    pub episode_title: Option<String>,
    pub extension: String,
}

/// Decides the library-relative destination path for an identified file
pub trait RenameEvaluator: Send + Sync {
    fn destination(&self, input: &RenameInput) -> Result<PathBuf>;
}

/// Token-pattern evaluator, e.g. `{anime}/{anime} - {episode} - {title}.{ext}`
pub struct PatternRenamer {
    pattern: String,
}

impl PatternRenamer {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }
}

impl RenameEvaluator for PatternRenamer {
    fn destination(&self, input: &RenameInput) -> Result<PathBuf> {
        if input.anime_title.trim().is_empty() {
            bail!("cannot name a file without an anime title");
        }

        let episode = format!("{:02}", input.episode_number);
        let title = input
            .episode_title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("Episode");

        let expanded = self
            .pattern
            .replace("{anime}", &input.anime_title)
            .replace("{episode}", &episode)
            .replace("{title}", title)
            .replace("{ext}", &input.extension);

        // Sanitize per component so separators in the pattern survive but
        // separators inside titles do not
        let mut path = PathBuf::new();
        for component in expanded.split('/') {
            let clean = sanitize_filename::sanitize(component);
            if clean.is_empty() {
                bail!("naming pattern produced an empty path component");
            }
            path.push(clean);
        }

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> RenameInput {
        RenameInput {
            anime_title: "Serial Experiments Lain".to_string(),
            episode_number: 1,
            episode_title: Some("Weird".to_string()),
            extension: "mkv".to_string(),
        }
    }

    #[test]
    fn expands_the_default_pattern() {
        let renamer = PatternRenamer::new("{anime}/{anime} - {episode} - {title}.{ext}");
        let path = renamer.destination(&input()).unwrap();
        assert_eq!(
            path,
            PathBuf::from("Serial Experiments Lain/Serial Experiments Lain - 01 - Weird.mkv")
        );
    }

    #[test]
    fn sanitizes_separators_inside_titles() {
        let renamer = PatternRenamer::new("{anime}/{episode} - {title}.{ext}");
        let mut input = input();
        input.episode_title = Some("Part 1/2: Chaos".to_string());
        let path = renamer.destination(&input).unwrap();

        // The slash in the episode title must not create a directory
        assert_eq!(path.components().count(), 2);
    }

    #[test]
    fn missing_episode_title_falls_back() {
        let renamer = PatternRenamer::new("{anime}/{episode} - {title}.{ext}");
        let mut input = input();
        input.episode_title = None;
        let path = renamer.destination(&input).unwrap();
        assert_eq!(
            path,
            PathBuf::from("Serial Experiments Lain/01 - Episode.mkv")
        );
    }

    #[test]
    fn empty_anime_title_is_rejected() {
        let renamer = PatternRenamer::new("{anime}/{episode}.{ext}");
        let mut input = input();
        input.anime_title = "  ".to_string();
        assert!(renamer.destination(&input).is_err());
    }
}
