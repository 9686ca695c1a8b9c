//! Solver output parsing.
//!
//! The solver reports progress and errors as localized plain-text lines on
//! its combined output stream. This module classifies those lines. It is
//! stateless: each call looks at exactly the text it is given, and the
//! caller is responsible for ordering.
//!
//! Classification runs twice per task: [`parse_line`] incrementally drives
//! the live progress display, while [`parse_error`] / [`has_error_markers`]
//! scan the full captured output at process exit to make the authoritative
//! success/failure call. The two passes share one pattern table so they can
//! never disagree about what counts as an error.

use regex::Regex;
use std::sync::LazyLock;

/// Classification of one solver output line.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressSignal {
    /// A progress report with a percentage and a step description.
    Progress { percentage: f64, step: String },

    /// An explicit completion marker; callers treat it as a 100% update.
    CompletionMarker,

    /// A recognized error marker with the best message we could extract.
    ErrorMarker { message: String },

    /// The line matched no known pattern.
    None,
}

/// Fallback when an error pattern matches but captures no message text.
const GENERIC_ERROR_MESSAGE: &str = "simulation error detected in solver output";

/// Progress template: `当前进度: XX % - step description`.
static PROGRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"当前进度:\s*(\d+)\s*%\s*-\s*(.+)").expect("valid progress regex")
});

/// Error-marker family shared by the per-line and full-output passes.
///
/// Patterns with a capture group yield the captured text as the error
/// message; the rest fall back to [`GENERIC_ERROR_MESSAGE`]. A match by any
/// entry marks the run as failed regardless of exit code.
static ERROR_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)错误[:：]\s*(.+)",
        r"(?i)Error[:：]\s*(.+)",
        r"(?i)失败[:：]\s*(.+)",
        r"(?i)Failed[:：]\s*(.+)",
        // Error block delimiters like /*****错误********/
        r"/\*+错误\*+/",
        // "The following features encountered problems"
        r"以下特征遇到问题",
        // "Required material property ... is not defined"
        r"未定义.*所需的材料属性",
        r"(?i)ERROR",
        r"(?i)FAILED",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid error regex"))
    .collect()
});

/// Classify one output line.
///
/// Progress classification wins when a line could be read both ways: live
/// updates observed before a later failure are still legitimate, and the
/// final success/failure decision belongs to the full-output scan at exit.
pub fn parse_line(line: &str) -> ProgressSignal {
    if let Some(caps) = PROGRESS_RE.captures(line) {
        if let Some(percentage) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) {
            let step = caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            return ProgressSignal::Progress { percentage, step };
        }
    }

    // Completion trailer: "当前进度: 100 % - 完成" and close variants
    if line.contains("完成") && line.contains("100") {
        return ProgressSignal::CompletionMarker;
    }

    for pattern in ERROR_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(line) {
            let message = caps
                .get(1)
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string());
            return ProgressSignal::ErrorMarker { message };
        }
    }

    ProgressSignal::None
}

/// Extract the most useful error message from the full captured output.
///
/// Returns the first capture-group text among the error patterns, the
/// generic fallback when only a capture-less marker matched, or `None`
/// when the output contains no recognized error at all.
pub fn parse_error(output: &str) -> Option<String> {
    let mut marker_seen = false;
    for pattern in ERROR_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(output) {
            if let Some(text) = caps.get(1).map(|m| m.as_str().trim()).filter(|s| !s.is_empty()) {
                return Some(text.to_string());
            }
            marker_seen = true;
        }
    }
    marker_seen.then(|| GENERIC_ERROR_MESSAGE.to_string())
}

/// Whether the full captured output contains any recognized error marker.
///
/// A zero exit code is not trusted when this returns true.
pub fn has_error_markers(output: &str) -> bool {
    ERROR_PATTERNS.iter().any(|p| p.is_match(output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress_line() {
        let signal = parse_line("当前进度: 10 % - 网格划分");
        assert_eq!(
            signal,
            ProgressSignal::Progress {
                percentage: 10.0,
                step: "网格划分".to_string()
            }
        );
    }

    #[test]
    fn test_parse_progress_line_loose_spacing() {
        let signal = parse_line("当前进度:55% - 求解中");
        assert_eq!(
            signal,
            ProgressSignal::Progress {
                percentage: 55.0,
                step: "求解中".to_string()
            }
        );
    }

    #[test]
    fn test_full_progress_template_beats_completion_marker() {
        // The 100% trailer still matches the progress template first.
        let signal = parse_line("当前进度: 100 % - 完成");
        assert_eq!(
            signal,
            ProgressSignal::Progress {
                percentage: 100.0,
                step: "完成".to_string()
            }
        );
    }

    #[test]
    fn test_completion_marker_without_template() {
        let signal = parse_line("求解 100 已完成");
        assert_eq!(signal, ProgressSignal::CompletionMarker);
    }

    #[test]
    fn test_error_line_with_capture() {
        match parse_line("错误: 矩阵奇异") {
            ProgressSignal::ErrorMarker { message } => assert_eq!(message, "矩阵奇异"),
            other => panic!("unexpected signal: {other:?}"),
        }
    }

    #[test]
    fn test_error_block_delimiter_is_generic() {
        match parse_line("/*****错误********/") {
            ProgressSignal::ErrorMarker { message } => {
                assert_eq!(message, GENERIC_ERROR_MESSAGE);
            }
            other => panic!("unexpected signal: {other:?}"),
        }
    }

    #[test]
    fn test_error_tokens_case_insensitive() {
        assert!(matches!(
            parse_line("Solver reported: error"),
            ProgressSignal::ErrorMarker { .. }
        ));
        assert!(matches!(
            parse_line("Step FAILED after 3 iterations"),
            ProgressSignal::ErrorMarker { .. }
        ));
    }

    #[test]
    fn test_progress_wins_over_error_on_one_line() {
        // A progressing step whose label happens to contain an error token
        // still drives the live display; the exit-time scan decides.
        let signal = parse_line("当前进度: 40 % - retrying after ERROR");
        assert!(matches!(signal, ProgressSignal::Progress { percentage, .. } if percentage == 40.0));
    }

    #[test]
    fn test_unrecognized_line_is_none() {
        assert_eq!(parse_line("Loading model file ..."), ProgressSignal::None);
        assert_eq!(parse_line(""), ProgressSignal::None);
    }

    #[test]
    fn test_parse_error_prefers_captured_text() {
        let output = "当前进度: 10 % - 网格划分\n错误: 未收敛\n/*****错误********/";
        assert_eq!(parse_error(output).as_deref(), Some("未收敛"));
    }

    #[test]
    fn test_parse_error_generic_for_bare_markers() {
        let output = "以下特征遇到问题:\n- 固体力学";
        assert_eq!(parse_error(output).as_deref(), Some(GENERIC_ERROR_MESSAGE));
    }

    #[test]
    fn test_parse_error_none_for_clean_output() {
        let output = "当前进度: 10 % - 网格划分\n当前进度: 100 % - 完成";
        assert_eq!(parse_error(output), None);
        assert!(!has_error_markers(output));
    }

    #[test]
    fn test_has_error_markers_material_property_phrase() {
        assert!(has_error_markers("未定义固体力学所需的材料属性 杨氏模量"));
    }
}
