//! Output trimming for action logs.

/// Trim action output for inclusion in a log line.
///
/// Keeps at most `max_lines` lines, cuts long lines, and caps the total
/// length.
pub fn sanitize_output(output: &str, max_lines: usize) -> String {
    const MAX_LINE_LENGTH: usize = 200;
    const MAX_TOTAL_LENGTH: usize = 1000;

    let mut result = String::new();

    for line in output.lines().take(max_lines) {
        let truncated = if line.chars().count() > MAX_LINE_LENGTH {
            let cut: String = line.chars().take(MAX_LINE_LENGTH).collect();
            format!("{}...", cut)
        } else {
            line.to_string()
        };

        if result.len() + truncated.len() > MAX_TOTAL_LENGTH {
            result.push_str("...[truncated]");
            return result;
        }

        if !result.is_empty() {
            result.push('\n');
        }
        result.push_str(&truncated);
    }

    if output.lines().count() > max_lines {
        result.push_str("\n...[additional output truncated]");
    }

    result
}
