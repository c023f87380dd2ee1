use crate::error::TaskError;
use std::fs;
use std::path::Path;

/// One URL per line; blank lines and `#` comments are skipped.
pub fn parse_targets(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect()
}

pub fn load_targets(path: &Path) -> Result<Vec<String>, TaskError> {
    let text = fs::read_to_string(path).map_err(|e| {
        TaskError::config(format!("cannot read target list {:?}: {e}", path).as_str())
    })?;
    Ok(parse_targets(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_targets() {
        let text = "# news\nhttps://example.com/\n\n   https://example.org/a  \r\n#https://skipped.net\nhttps://example.net\n";
        assert_eq!(
            parse_targets(text),
            vec![
                "https://example.com/",
                "https://example.org/a",
                "https://example.net"
            ]
        );
        assert!(parse_targets("\n# only comments\n").is_empty());
    }

    #[test]
    fn test_missing_list() {
        assert!(load_targets(Path::new("/nonexistent/targets.txt")).is_err());
    }
}
