use sha2::{Digest, Sha256};

const TRUNCATION_MARKER: &str = "\n... (output truncated)";

/// Cap `output` at `max_bytes`, cutting on a char boundary
pub fn truncate_output(mut output: String, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output;
    }

    let mut cut = max_bytes;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
    output.push_str(TRUNCATION_MARKER);
    output
}

/// Short hex digest used to correlate log lines for one snippet
pub fn short_digest(content: &str) -> String {
    let hash = Sha256::digest(content.as_bytes());
    hash.iter().take(6).map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_output_short_input_untouched() {
        assert_eq!(truncate_output("hello\n".to_string(), 64), "hello\n");
    }

    #[test]
    fn test_truncate_output_respects_char_boundary() {
        // '●' is three bytes; a cut at 4 would split the second one
        let out = truncate_output("●●●".to_string(), 4);
        assert_eq!(out, format!("●{}", TRUNCATION_MARKER));
    }

    #[test]
    fn test_short_digest_is_stable() {
        let a = short_digest("print('hi')");
        assert_eq!(a.len(), 12);
        assert_eq!(a, short_digest("print('hi')"));
        assert_ne!(a, short_digest("print('ho')"));
    }
}
