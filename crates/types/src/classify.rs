//! Filename based classification used when a peer agent indexes a file.

use std::path::Path;

/// Category for files whose extension is not recognised.
pub const OTHER_CATEGORY: &str = "other";

const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "document",
        &["txt", "doc", "docx", "pdf", "xls", "xlsx", "ppt", "pptx"],
    ),
    ("image", &["jpg", "jpeg", "png", "gif", "bmp"]),
    ("video", &["mp4", "avi", "mkv", "mov", "wmv"]),
    ("audio", &["mp3", "wav", "flac", "aac", "ogg"]),
    ("archive", &["zip", "rar", "7z", "tar", "gz"]),
];

const TAG_RULES: &[(&[&str], &str)] = &[
    (&["music", "song"], "music"),
    (&["video", "movie"], "video"),
    (&["photo", "image"], "photo"),
    (&["document", "doc"], "document"),
];

/// Map a filename to a coarse category by extension.
pub fn categorize(filename: &str) -> String {
    let ext = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    ext.and_then(|ext| {
        CATEGORIES
            .iter()
            .find(|(_, exts)| exts.contains(&ext.as_str()))
            .map(|(category, _)| category.to_string())
    })
    .unwrap_or_else(|| OTHER_CATEGORY.to_string())
}

/// Derive descriptive tags from keywords appearing in the filename.
pub fn extract_tags(filename: &str) -> Vec<String> {
    let name = filename.to_lowercase();
    TAG_RULES
        .iter()
        .filter(|(keywords, _)| keywords.iter().any(|kw| name.contains(*kw)))
        .map(|(_, tag)| tag.to_string())
        .collect()
}
