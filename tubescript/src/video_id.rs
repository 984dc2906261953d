use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{Error, Result};

/// Longest id we accept. Real YouTube ids are 11 characters.
pub const MAX_VIDEO_ID_LEN: usize = 64;

/// A syntactically valid video identifier.
///
/// Parsing accepts a bare id or a watch/short/embed URL and extracts the id
/// from it. Validation happens here, before anything touches the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let candidate = extract_from_url(trimmed).unwrap_or(trimmed);

        if is_valid_id(candidate) {
            Ok(VideoId(candidate.to_string()))
        } else {
            Err(Error::InvalidVideoId(input.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical watch page URL for this video.
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.0)
    }
}

impl FromStr for VideoId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        VideoId::parse(s)
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VideoId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_VIDEO_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Pull the id out of a YouTube URL. Returns `None` for anything that is not one.
fn extract_from_url(input: &str) -> Option<&str> {
    let rest = input
        .strip_prefix("https://")
        .or_else(|| input.strip_prefix("http://"))
        .unwrap_or(input);
    let rest = rest
        .strip_prefix("www.")
        .or_else(|| rest.strip_prefix("m."))
        .unwrap_or(rest);

    if let Some(path) = rest.strip_prefix("youtu.be/") {
        return Some(until_delimiter(path));
    }

    let path = rest.strip_prefix("youtube.com/")?;
    if let Some(query) = path.strip_prefix("watch?") {
        return query
            .split('&')
            .find_map(|pair| pair.strip_prefix("v="))
            .map(until_delimiter);
    }

    ["shorts/", "embed/", "live/"]
        .iter()
        .find_map(|prefix| path.strip_prefix(prefix))
        .map(until_delimiter)
}

fn until_delimiter(s: &str) -> &str {
    s.split(['?', '&', '#', '/']).next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_id() {
        let id = VideoId::parse("dQw4w9WgXcQ").unwrap();
        assert_eq!(id.as_str(), "dQw4w9WgXcQ");
        assert_eq!(id.watch_url(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn test_parse_short_opaque_id() {
        assert!(VideoId::parse("XYZ").is_ok());
    }

    #[test]
    fn test_parse_trims_whitespace() {
        assert_eq!(VideoId::parse("  abc_-1 \n").unwrap().as_str(), "abc_-1");
    }

    #[test]
    fn test_rejects_empty() {
        assert!(matches!(VideoId::parse(""), Err(Error::InvalidVideoId(_))));
        assert!(matches!(VideoId::parse("   "), Err(Error::InvalidVideoId(_))));
    }

    #[test]
    fn test_rejects_bad_characters() {
        assert!(VideoId::parse("abc def").is_err());
        assert!(VideoId::parse("$(whoami)").is_err());
        assert!(VideoId::parse("../../etc/passwd").is_err());
        assert!(VideoId::parse("abc;rm").is_err());
    }

    #[test]
    fn test_rejects_too_long() {
        let long = "a".repeat(MAX_VIDEO_ID_LEN + 1);
        assert!(VideoId::parse(&long).is_err());
    }

    #[test]
    fn test_parse_watch_url() {
        let id = VideoId::parse("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42s").unwrap();
        assert_eq!(id.as_str(), "dQw4w9WgXcQ");

        let id =
            VideoId::parse("https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ").unwrap();
        assert_eq!(id.as_str(), "dQw4w9WgXcQ");
    }

    #[test]
    fn test_parse_short_links() {
        assert_eq!(
            VideoId::parse("https://youtu.be/dQw4w9WgXcQ?si=xyz").unwrap().as_str(),
            "dQw4w9WgXcQ"
        );
        assert_eq!(
            VideoId::parse("youtube.com/shorts/abcDEF12345").unwrap().as_str(),
            "abcDEF12345"
        );
        assert_eq!(
            VideoId::parse("https://m.youtube.com/embed/abcDEF12345/").unwrap().as_str(),
            "abcDEF12345"
        );
    }

    #[test]
    fn test_rejects_url_without_id() {
        assert!(VideoId::parse("https://www.youtube.com/watch?list=PL123").is_err());
        assert!(VideoId::parse("https://example.com/watch?v=abc").is_err());
    }
}
