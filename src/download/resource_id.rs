//! Video ID extraction from URLs.

use crate::{HuginnError, Result};

const ID_LEN: usize = 11;

/// Extract the 11-character video ID from a URL or bare ID.
///
/// Accepts `youtube.com/watch?v=`, `youtu.be/`, `youtube.com/embed/` and
/// `youtube.com/shorts/` forms, with or without scheme and `www.`/`m.`.
///
/// ```rust
/// # use huginn::extract_resource_id;
/// assert_eq!(extract_resource_id("https://youtu.be/dQw4w9WgXcQ?t=42").unwrap(), "dQw4w9WgXcQ");
/// assert!(extract_resource_id("not a video").is_err());
/// ```
pub fn extract_resource_id(input: &str) -> Result<String> {
    let input = input.trim();
    if is_video_id(input) {
        return Ok(input.to_string());
    }

    let candidate = from_path_prefix(input, "youtu.be/")
        .or_else(|| from_path_prefix(input, "youtube.com/embed/"))
        .or_else(|| from_path_prefix(input, "youtube.com/shorts/"))
        .or_else(|| from_watch_query(input));

    match candidate {
        Some(id) if is_video_id(id) => Ok(id.to_string()),
        _ => Err(HuginnError::InvalidInput(format!(
            "could not extract video ID from {input:?}"
        ))),
    }
}

/// Whether `s` looks like a video ID: 11 chars of `[A-Za-z0-9_-]`.
pub fn is_video_id(s: &str) -> bool {
    s.len() == ID_LEN
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn from_path_prefix<'a>(url: &'a str, prefix: &str) -> Option<&'a str> {
    let start = url.find(prefix)? + prefix.len();
    let rest = &url[start..];
    let end = rest.find(['?', '&', '#', '/']).unwrap_or(rest.len());
    Some(&rest[..end])
}

fn from_watch_query(url: &str) -> Option<&str> {
    let start = url.find("youtube.com/watch")?;
    let query = url[start..].split_once('?')?.1;
    let query = query.split('#').next().unwrap_or(query);
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("v="))
}
