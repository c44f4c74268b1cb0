//! Brace-aware delimiting of a JSON object embedded in a larger text buffer.
//!
//! A regex cannot find the end of an embedded object: string values may
//! contain literal braces or escaped quotes. This scanner tracks lexical
//! context exactly, in a single pass.

/// Outcome of scanning from an opening brace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanResult {
    /// Byte offset one past the matching closing brace.
    Complete(usize),
    /// The buffer ended before brace depth returned to zero. Expected
    /// mid-stream; not a parse failure.
    Incomplete,
}

/// Scan `text` from `start`, which must be the byte offset of a `{`, and
/// find the matching `}` while skipping braces inside string literals and
/// honoring backslash escapes. Offsets are byte offsets into `text`, so the
/// result can be used to slice or splice the original buffer directly.
pub fn scan_object(text: &str, start: usize) -> ScanResult {
    debug_assert_eq!(text.as_bytes().get(start), Some(&b'{'));

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return ScanResult::Complete(start + offset + 1);
                }
            }
            _ => {}
        }
    }

    ScanResult::Incomplete
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(text: &str, start: usize) -> usize {
        match scan_object(text, start) {
            ScanResult::Complete(end) => end,
            ScanResult::Incomplete => panic!("expected complete object in {:?}", text),
        }
    }

    #[test]
    fn empty_object_closes_immediately() {
        assert_eq!(complete("{}", 0), 2);
        assert_eq!(complete("x{}y", 1), 3);
    }

    #[test]
    fn nested_objects() {
        let text = r#"{"a":{"b":{"c":1}}}"#;
        assert_eq!(complete(text, 0), text.len());
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let text = r#"{"a":"}{}{","b":"{{"}"#;
        assert_eq!(complete(text, 0), text.len());
    }

    #[test]
    fn escaped_quotes_do_not_end_strings() {
        let text = r#"{"a":"he said \"}\" and left"}"#;
        assert_eq!(complete(text, 0), text.len());
    }

    #[test]
    fn double_backslash_before_closing_quote() {
        let text = r#"{"path":"C:\\"}"#;
        assert_eq!(complete(text, 0), text.len());
    }

    #[test]
    fn unicode_content_yields_byte_offsets() {
        let text = r#"前缀{"name":"检查机油压力"}后缀"#;
        let start = text.find('{').unwrap();
        let end = complete(text, start);
        assert_eq!(&text[start..end], r#"{"name":"检查机油压力"}"#);
    }

    #[test]
    fn truncated_object_is_incomplete() {
        assert_eq!(scan_object(r#"{"a":1"#, 0), ScanResult::Incomplete);
        assert_eq!(scan_object(r#"{"a":"unterminated }"#, 0), ScanResult::Incomplete);
        assert_eq!(scan_object("{", 0), ScanResult::Incomplete);
    }

    #[test]
    fn boundary_is_independent_of_trailing_noise() {
        let core = r#"{"type":"tasks","data":[{"id":"1","name":"a{b}","desc":"\"x\""}]}"#;
        let end_alone = complete(core, 0);
        for noise in ["", "}", "{\"type\":", core, "随机 text {{{"] {
            let text = format!("{core}{noise}");
            assert_eq!(complete(&text, 0), end_alone);
        }
    }

    #[test]
    fn serialized_values_scan_to_their_own_length() {
        let values = [
            serde_json::json!({}),
            serde_json::json!({"k": "v"}),
            serde_json::json!({"a": {"b": [1, 2, {"c": "}"}]}, "q": "say \"hi\""}),
            serde_json::json!({"中文": "值 { 带括号 }", "esc": "back\\slash"}),
        ];
        for value in values {
            let json = value.to_string();
            let doubled = format!("{json}{json} trailing");
            assert_eq!(complete(&doubled, 0), json.len());
        }
    }
}
