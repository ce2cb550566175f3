//! Filename sanitization and path derivation for exported nodes.
//!
//! Remote node names are free text; everything that lands on disk goes
//! through [`clean_filename`] first so a name can never introduce a path
//! separator or a character the local filesystem rejects.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Characters replaced with an underscore before the whitelist filter runs.
const REPLACED_CHARS: [char; 7] = ['\\', ' ', ':', '/', '?', '*', '\n'];

/// Anything that is not a word character, hyphen, or dot.
#[allow(clippy::expect_used)]
static NOT_PERMITTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^-\w.]").expect("static filename pattern is valid"));

/// Maps an arbitrary node name to a filesystem-safe path segment.
///
/// `\ : / ? *`, space and newline become `_`; surrounding whitespace is then
/// trimmed and every character outside `[-\w.]` is dropped. The function is
/// total and idempotent: `clean_filename(&clean_filename(x)) == clean_filename(x)`.
///
/// # Example
///
/// ```
/// use harvester_core::download::clean_filename;
///
/// assert_eq!(clean_filename("Q3 report: final?.docx"), "Q3_report__final_.docx");
/// assert_eq!(clean_filename(""), "");
/// ```
#[must_use]
pub fn clean_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if REPLACED_CHARS.contains(&c) { '_' } else { c })
        .collect();
    NOT_PERMITTED.replace_all(replaced.trim(), "").into_owned()
}

/// Same as [`clean_filename`] but accepts an absent name.
#[must_use]
pub fn clean_optional_filename(name: Option<&str>) -> String {
    clean_filename(name.unwrap_or_default())
}

/// Splits `name` at its last dot and returns the part before it.
///
/// Names without a dot are returned unchanged.
#[must_use]
pub fn strip_extension(name: &str) -> &str {
    name.rsplit_once('.').map_or(name, |(stem, _)| stem)
}

/// Returns the text after the last dot of `name`, or `None` when there is no dot.
#[must_use]
pub fn extension_of(name: &str) -> Option<&str> {
    name.rsplit_once('.').map(|(_, ext)| ext)
}

/// Joins sanitized ancestor names under `root`.
///
/// Ancestors that sanitize to an empty string are skipped so an unnamed
/// folder cannot collapse two levels into one `//`.
#[must_use]
pub fn sanitized_path<'a, I>(root: &Path, ancestors: I) -> PathBuf
where
    I: IntoIterator<Item = &'a str>,
{
    ancestors
        .into_iter()
        .map(clean_filename)
        .filter(|segment| !segment.is_empty())
        .fold(root.to_path_buf(), |path, segment| path.join(segment))
}

/// Filename for a fallback download: the URL's last path segment.
///
/// The query string is ignored, percent-escapes are decoded and the result is
/// sanitized. Returns `None` when the URL has no usable tail.
#[must_use]
pub fn filename_from_url(url: &str) -> Option<String> {
    let tail = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string)),
        Err(_) => url
            .split('?')
            .next()
            .and_then(|path| path.rsplit('/').next())
            .map(str::to_string),
    }?;
    let decoded = urlencoding::decode(&tail).map_or(tail.clone(), |d| d.into_owned());
    let cleaned = clean_filename(&decoded);
    (!cleaned.is_empty() && cleaned != "." && cleaned != "..").then_some(cleaned)
}
