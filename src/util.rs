//! Shared helpers for the Huddle crate.

use std::time::Duration;

/// Extract the outermost JSON object from agent output that may be wrapped
/// in prose or markdown. Uses brace counting rather than a parser so that
/// partial or trailing text never confuses extraction.
pub fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0;
    let mut end = start;

    for (i, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = start + i + 1;
                    break;
                }
            }
            _ => {}
        }
    }

    if depth == 0 && end > start {
        Some(text[start..end].to_string())
    } else {
        None
    }
}

/// Render a duration as a compact human string for huddle records:
/// "42s", "3m12s", "1h04m".
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_object_simple() {
        let text = r#"{"issues": []}"#;
        assert_eq!(extract_json_object(text), Some(r#"{"issues": []}"#.to_string()));
    }

    #[test]
    fn test_extract_json_object_with_prose() {
        let text = r#"Here is the plan: {"issues": [{"number": 4}]} - done."#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"issues": [{"number": 4}]}"#.to_string())
        );
    }

    #[test]
    fn test_extract_json_object_nested() {
        let text = r#"{"outer": {"inner": [1, 2]}}"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"outer": {"inner": [1, 2]}}"#.to_string())
        );
    }

    #[test]
    fn test_extract_json_object_unbalanced() {
        assert_eq!(extract_json_object(r#"{"open": true"#), None);
    }

    #[test]
    fn test_extract_json_object_no_json() {
        assert_eq!(extract_json_object("no braces here"), None);
    }

    #[test]
    fn test_format_duration_ranges() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(192)), "3m12s");
        assert_eq!(format_duration(Duration::from_secs(3840)), "1h04m");
    }
}
