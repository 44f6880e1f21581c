//! Segment file naming helpers.

use std::path::Path;

/// Parse the segment index from a segment file name.
///
/// The index is the run of trailing ASCII digits in the file stem, so
/// `12.ts`, `index12.ts` and `segment_012.ts` all map to `12`.
///
/// # Examples
/// ```
/// use admute_models::segment::parse_segment_index;
/// assert_eq!(parse_segment_index("12.ts"), Some(12));
/// assert_eq!(parse_segment_index("segment_003.ts"), Some(3));
/// assert_eq!(parse_segment_index("index.m3u8"), None);
/// ```
pub fn parse_segment_index(file_name: &str) -> Option<u64> {
    let stem = Path::new(file_name).file_stem()?.to_str()?;
    let digits_start = stem
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    stem[digits_start..].parse().ok()
}

/// File name component of a path as an owned string.
pub fn file_name_of(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

/// Whether `path` has the given extension (case-insensitive, without dot).
pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}
