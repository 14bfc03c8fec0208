//! MIME sniffing, layered on top of `mime_guess` with the handful of
//! registrations the source system needs that the platform database lacks.

pub fn guess(path: &std::path::Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "md" | "markdown" => "text/markdown".to_string(),
        "htz" => "application/html+zip".to_string(),
        "maff" => "application/x-maff".to_string(),
        _ => mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

pub fn is_archive_mime(mime: &str) -> bool {
    matches!(mime, "application/html+zip" | "application/x-maff")
}

pub fn is_htz(mime: &str) -> bool {
    mime == "application/html+zip"
}

pub fn is_maff(mime: &str) -> bool {
    mime == "application/x-maff"
}

pub fn is_markdown(mime: &str) -> bool {
    mime == "text/markdown"
}

pub fn is_html(mime: &str) -> bool {
    matches!(mime, "text/html" | "application/xhtml+xml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn registers_scrapbook_specific_types() {
        assert_eq!(guess(Path::new("a.htz")), "application/html+zip");
        assert_eq!(guess(Path::new("a.maff")), "application/x-maff");
        assert_eq!(guess(Path::new("a.md")), "text/markdown");
    }

    #[test]
    fn falls_back_to_platform_guess() {
        assert_eq!(guess(Path::new("a.txt")), "text/plain");
    }
}
