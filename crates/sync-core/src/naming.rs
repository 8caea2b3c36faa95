//! File names derived from collection names.

/// Keep alphanumerics, `-` and `_`; everything else becomes `_`.
///
/// Collection names come from configuration and must never address a file
/// outside the directory they are joined onto.
pub fn sanitize_file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "default".to_string()
    } else {
        stem
    }
}
