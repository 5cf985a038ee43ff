//! Error classifier: maps a raw tool failure to a category and one fix.
//!
//! Rules are tried in order over the error text and the first match wins;
//! exit-status rules only apply when no text rule matched. The category
//! fixes the suggested fix; severity starts from the category baseline and
//! is raised to Critical for runtime failures that carry an unrecoverable
//! marker (fatal error, segfault, panic, core dump).

use conductor_core::classification::{
    Ecosystem, ErrorCategory, ErrorClassification, ErrorDetails, Severity,
};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

struct Rule {
    name: &'static str,
    category: ErrorCategory,
    pattern: Regex,
    /// Ecosystem implied by a match, for dependency rules.
    ecosystem: Option<Ecosystem>,
}

fn rule(name: &'static str, category: ErrorCategory, ecosystem: Option<Ecosystem>, pattern: &str) -> Rule {
    Rule {
        name,
        category,
        pattern: Regex::new(pattern).expect("classifier rule regex should be valid"),
        ecosystem,
    }
}

// Order matters: specific dependency and path rules come before the broad
// families. Language exceptions are tried before the loose network rule so
// a line number or an identifier such as `setTimeout` is not read as a
// network fault.
static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    use ErrorCategory::*;
    vec![
        rule(
            "python_module_not_found",
            MissingDependency,
            Some(Ecosystem::Python),
            r#"ModuleNotFoundError:\s*(?:No module named\s*)?['"]?(?P<pkg>[A-Za-z0-9_.\-]+)"#,
        ),
        rule(
            "pip_no_distribution",
            MissingDependency,
            Some(Ecosystem::Python),
            r"No matching distribution found for (?P<pkg>[A-Za-z0-9_.\-]+)",
        ),
        rule(
            "node_relative_module",
            FileNotFound,
            None,
            r#"Cannot find module ['"](?P<path>\.{1,2}/[^'"]+|/[^'"]+)['"]"#,
        ),
        rule(
            "node_module_not_found",
            MissingDependency,
            Some(Ecosystem::Node),
            r#"(?:Cannot find module|Module not found: Error: Can't resolve|Cannot find package) ['"](?P<pkg>[^'"]+)['"]"#,
        ),
        rule(
            "command_not_found",
            MissingDependency,
            Some(Ecosystem::System),
            r"(?P<pkg>[A-Za-z0-9_.\-]+): (?:command )?not found",
        ),
        rule(
            "permission_denied",
            PermissionDenied,
            None,
            r"(?i)permission denied|\bEACCES\b|\bEPERM\b|operation not permitted|access is denied|\bunauthorized\b|\bforbidden\b|authentication failed|invalid api key",
        ),
        rule(
            "resource_limit",
            ResourceLimitExceeded,
            None,
            r"(?i)out of memory|\bMemoryError\b|\bOOM\b|\bkilled\b|no space left on device|\bENOSPC\b|\bENOMEM\b|too many open files|\bEMFILE\b|quota exceeded|resource temporarily unavailable",
        ),
        rule(
            "network_connection",
            NetworkTransient,
            None,
            r"(?i)\bETIMEDOUT\b|\bECONNRESET\b|\bECONNREFUSED\b|\bEAI_AGAIN\b|connection (?:reset|refused|aborted|closed)|temporary failure in name resolution|network is unreachable|could not resolve host",
        ),
        rule(
            "syntax_error",
            SyntaxError,
            None,
            r"(?i)\bSyntaxError\b|\bIndentationError\b|\bTabError\b|unexpected token|parse error|unexpected eof|unexpected end of (?:input|file)|invalid syntax",
        ),
        rule(
            "import_error",
            ImportError,
            None,
            r"(?i)\bImportError\b|cannot import name|is not exported|has no exported member|ERR_PACKAGE_PATH_NOT_EXPORTED|unresolved import",
        ),
        rule(
            "file_not_found",
            FileNotFound,
            None,
            r"(?i)\bFileNotFoundError\b|no such file or directory|\bENOENT\b|cannot find the (?:file|path)|file not found",
        ),
        rule(
            "division_by_zero",
            DivisionByZero,
            None,
            r"(?i)\bZeroDivisionError\b|division by zero|divide by zero",
        ),
        rule(
            "index_or_key",
            IndexOrKeyError,
            None,
            r"(?i)\bIndexError\b|\bKeyError\b|index out of (?:range|bounds)|no such key|key not found|undefined index",
        ),
        rule(
            "type_error",
            TypeError,
            None,
            r"(?i)\bTypeError\b|\bAttributeError\b|is not a function|is not callable|cannot read propert(?:y|ies) of (?:undefined|null)|mismatched types",
        ),
        rule(
            "network_transient",
            NetworkTransient,
            None,
            r"(?i)\btimed out\b|\btimeout\b|\b(?:TimeoutError|ReadTimeout|ConnectTimeout)\b|rate limit|too many requests|service unavailable|bad gateway|gateway time-?out|\bHTTP(?:/[\d.]+)?(?: Error)?:?\s+(?:429|5\d\d)\b|\bstatus(?: code)?:?\s*(?:429|50[234])\b",
        ),
        rule(
            "runtime_error",
            RuntimeError,
            None,
            r"(?i)\bRuntimeError\b|\bValueError\b|\bAssertionError\b|panicked at|segmentation fault|segfault|core dumped|fatal error|uncaught|unhandled (?:exception|rejection)|traceback \(most recent call last\)",
        ),
    ]
});

static UNRECOVERABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bfatal\b|segmentation fault|segfault|\bpanic|core dumped")
        .expect("unrecoverable marker regex should be valid")
});

/// `File "app.py", line 3` or `src/main.rs:10:5` / `index.js:42`.
static LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"File "(?P<pyfile>[^"]+)", line (?P<pyline>\d+)|(?P<file>[\w./\-]+\.[A-Za-z]{1,5}):(?P<line>\d+)"#)
        .expect("location regex should be valid")
});

static QUOTED_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"](?P<path>[^'"\s]*[/.][^'"\s]*)['"]"#).expect("quoted path regex should be valid")
});

/// Import names whose install name differs.
const PYTHON_PACKAGE_ALIASES: &[(&str, &str)] = &[
    ("yaml", "pyyaml"),
    ("cv2", "opencv-python"),
    ("PIL", "pillow"),
    ("sklearn", "scikit-learn"),
    ("bs4", "beautifulsoup4"),
    ("dotenv", "python-dotenv"),
    ("jwt", "pyjwt"),
];

/// Stateless; classification depends only on its inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, raw_error: &str, exit_code: Option<i32>) -> ErrorClassification {
        for rule in RULES.iter() {
            let Some(caps) = rule.pattern.captures(raw_error) else {
                continue;
            };
            let Some(matched) = caps.get(0) else {
                continue;
            };

            let mut details = ErrorDetails {
                ecosystem: rule.ecosystem,
                ..ErrorDetails::default()
            };
            if let Some(pkg) = caps.name("pkg") {
                details.package = Some(install_name(pkg.as_str(), rule.ecosystem));
            }
            if let Some(path) = caps.name("path") {
                details.path = Some(path.as_str().to_string());
            }
            fill_location(raw_error, rule.category, &mut details);

            let severity = match rule.category {
                ErrorCategory::RuntimeError if UNRECOVERABLE.is_match(raw_error) => Severity::Critical,
                other => other.base_severity(),
            };

            debug!(rule = rule.name, category = %rule.category, %severity, "Error classified");
            return build(rule.category, severity, line_of(raw_error, matched.start()), rule.name, details);
        }

        if let Some(code) = exit_code
            && let Some(category) = category_for_exit(code)
        {
            let mut details = ErrorDetails::default();
            if category == ErrorCategory::MissingDependency {
                details.ecosystem = Some(Ecosystem::System);
            }
            debug!(exit_code = code, %category, "Error classified by exit status");
            let message = first_line(raw_error).unwrap_or_else(|| format!("exit status {code}"));
            return build(category, category.base_severity(), message, "exit_status", details);
        }

        let message = first_line(raw_error).unwrap_or_else(|| match exit_code {
            Some(code) => format!("exit status {code}"),
            None => "unknown error".into(),
        });
        build(ErrorCategory::Unknown, ErrorCategory::Unknown.base_severity(), message, "fallback", ErrorDetails::default())
    }
}

fn build(
    category: ErrorCategory,
    severity: Severity,
    message: String,
    rule: &str,
    details: ErrorDetails,
) -> ErrorClassification {
    ErrorClassification {
        category,
        severity,
        suggested_fix: category.suggested_fix(),
        message,
        rule: rule.to_string(),
        details,
    }
}

fn category_for_exit(code: i32) -> Option<ErrorCategory> {
    match code {
        124 => Some(ErrorCategory::NetworkTransient),
        126 => Some(ErrorCategory::PermissionDenied),
        127 => Some(ErrorCategory::MissingDependency),
        137 => Some(ErrorCategory::ResourceLimitExceeded),
        _ => None,
    }
}

/// The full line of `text` containing byte offset `at`, trimmed.
fn line_of(text: &str, at: usize) -> String {
    let start = text[..at].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let end = text[at..].find('\n').map(|i| at + i).unwrap_or(text.len());
    text[start..end].trim().to_string()
}

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(String::from)
}

fn fill_location(raw: &str, category: ErrorCategory, details: &mut ErrorDetails) {
    // Python tracebacks list the innermost frame last
    if let Some(caps) = LOCATION.captures_iter(raw).last() {
        let (file, line) = match (caps.name("pyfile"), caps.name("file")) {
            (Some(f), _) => (f.as_str(), caps.name("pyline")),
            (None, Some(f)) => (f.as_str(), caps.name("line")),
            (None, None) => return,
        };
        if details.path.is_none() {
            details.path = Some(file.to_string());
        }
        details.line = line.and_then(|l| l.as_str().parse().ok());
    }

    if details.path.is_none()
        && matches!(category, ErrorCategory::FileNotFound | ErrorCategory::PermissionDenied)
        && let Some(caps) = QUOTED_PATH.captures(raw)
        && let Some(path) = caps.name("path")
    {
        details.path = Some(path.as_str().to_string());
    }
}

/// Installable package name for an import/module name.
fn install_name(name: &str, ecosystem: Option<Ecosystem>) -> String {
    match ecosystem {
        Some(Ecosystem::Python) => {
            let top = name.split('.').next().unwrap_or(name);
            PYTHON_PACKAGE_ALIASES
                .iter()
                .find(|(import, _)| *import == top)
                .map(|(_, pkg)| pkg.to_string())
                .unwrap_or_else(|| top.to_string())
        }
        Some(Ecosystem::Node) => {
            let mut parts = name.split('/');
            match (parts.next(), parts.next()) {
                (Some(scope), Some(pkg)) if scope.starts_with('@') => format!("{scope}/{pkg}"),
                (Some(pkg), _) => pkg.to_string(),
                _ => name.to_string(),
            }
        }
        _ => name.to_string(),
    }
}
