//! JUnit XML result extraction.
//!
//! Parses a JUnit-style report into flat per-`<testcase>` records, resolves the
//! record a webhook refers to, and turns it into enrichment for the incoming
//! result. Only the subset of JUnit that pytest emits is interpreted:
//! `testsuite(s)/testcase` with `failure`, `error`, `skipped`, `system-out`
//! and `system-err` children.

use crate::error::{Error, Result};
use crate::model::{FailureInfo, TestStatus};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Framework reported for every enrichment. Not detected from content.
pub const FRAMEWORK: &str = "pytest";

/// Sentinel file location when nothing could be derived.
pub const NO_FILE_LOCATION: &str = "N/A";

pub const DEFAULT_FAILURE_TYPE: &str = "TestFailure";
pub const DEFAULT_ERROR_TYPE: &str = "ExecutionError";

const PARSING_SOURCE: &str = "junit-xml";
const PARSING_CONFIDENCE: &str = "high";

/// One `<testcase>` element, flattened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedXmlTest {
    pub name: String,
    pub classname: String,
    /// Seconds.
    pub time: f64,
    pub status: TestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
    pub system_out: String,
    pub system_err: String,
    pub file: String,
}

/// How a requested identifier was resolved against a parsed report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchResolution<'a> {
    Exact(&'a ParsedXmlTest),
    Fuzzy(&'a ParsedXmlTest),
    NoMatch,
}

impl<'a> MatchResolution<'a> {
    #[must_use]
    pub const fn test(self) -> Option<&'a ParsedXmlTest> {
        match self {
            Self::Exact(test) | Self::Fuzzy(test) => Some(test),
            Self::NoMatch => None,
        }
    }

    #[must_use]
    pub const fn kind(self) -> MatchKind {
        match self {
            Self::Exact(_) => MatchKind::Exact,
            Self::Fuzzy(_) => MatchKind::Fuzzy,
            Self::NoMatch => MatchKind::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Exact,
    Fuzzy,
    None,
}

/// Canonical enrichment derived from a matched `<testcase>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JunitEnrichment {
    pub status: TestStatus,
    /// Milliseconds.
    pub duration: f64,
    pub logs: String,
    pub raw_output: String,
    pub framework: String,
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
    pub matched_by: MatchKind,
}

// ────────────────────────────────────────────────────────────────────────────
// Parsing
// ────────────────────────────────────────────────────────────────────────────

/// Parse `xml`, refusing documents larger than `max_bytes`.
pub fn parse_junit_xml_bounded(xml: &str, max_bytes: usize) -> Result<Vec<ParsedXmlTest>> {
    if xml.len() > max_bytes {
        return Err(Error::parse(format!(
            "JUnit XML is {} bytes, limit is {max_bytes}",
            xml.len()
        )));
    }
    parse_junit_xml(xml)
}

/// Parse a JUnit report into one record per `<testcase>`, in document order.
///
/// Fails with [`Error::Parse`] when the document is not well-formed.
pub fn parse_junit_xml(xml: &str) -> Result<Vec<ParsedXmlTest>> {
    let mut reader = Reader::from_str(xml);
    let mut tests = Vec::new();
    let mut current: Option<TestcaseBuilder> = None;
    let mut capture: Option<Capture> = None;
    let mut depth = 0usize;
    let mut saw_root = false;

    loop {
        let event = reader.read_event().map_err(|err| {
            Error::parse(format!(
                "malformed XML at byte {}: {err}",
                reader.buffer_position()
            ))
        })?;
        match event {
            Event::Start(start) => {
                depth += 1;
                saw_root = true;
                let name = start.local_name();
                match (name.as_ref(), current.as_mut()) {
                    (b"testcase", None) => current = Some(TestcaseBuilder::from_start(&start)?),
                    (b"failure", Some(builder)) => {
                        builder.failure = Some(FailureBody::from_start(&start)?);
                        capture = Some(Capture::Failure);
                    }
                    (b"error", Some(builder)) => {
                        builder.error = Some(FailureBody::from_start(&start)?);
                        capture = Some(Capture::Error);
                    }
                    (b"skipped", Some(builder)) => builder.skipped = true,
                    (b"system-out", Some(_)) => capture = Some(Capture::SystemOut),
                    (b"system-err", Some(_)) => capture = Some(Capture::SystemErr),
                    _ => {}
                }
            }
            Event::Empty(start) => {
                saw_root = true;
                let name = start.local_name();
                match (name.as_ref(), current.as_mut()) {
                    (b"testcase", None) => {
                        tests.push(TestcaseBuilder::from_start(&start)?.finish());
                    }
                    (b"failure", Some(builder)) => {
                        builder.failure = Some(FailureBody::from_start(&start)?);
                    }
                    (b"error", Some(builder)) => {
                        builder.error = Some(FailureBody::from_start(&start)?);
                    }
                    (b"skipped", Some(builder)) => builder.skipped = true,
                    _ => {}
                }
            }
            Event::End(end) => {
                depth = depth.saturating_sub(1);
                match end.local_name().as_ref() {
                    b"testcase" => {
                        if let Some(builder) = current.take() {
                            tests.push(builder.finish());
                        }
                        capture = None;
                    }
                    b"failure" | b"error" | b"system-out" | b"system-err" => capture = None,
                    _ => {}
                }
            }
            Event::Text(text) => {
                if let (Some(target), Some(builder)) = (capture, current.as_mut()) {
                    let text = text.unescape()?;
                    builder.capture_text(target, &text);
                }
            }
            Event::CData(data) => {
                if let (Some(target), Some(builder)) = (capture, current.as_mut()) {
                    builder.capture_text(target, &String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(Error::parse("document has no root element"));
    }
    if depth != 0 {
        return Err(Error::parse(format!(
            "unexpected end of document with {depth} unclosed element(s)"
        )));
    }

    Ok(tests)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    Failure,
    Error,
    SystemOut,
    SystemErr,
}

#[derive(Debug, Default)]
struct FailureBody {
    kind: Option<String>,
    message: String,
    text: String,
}

impl FailureBody {
    fn from_start(start: &BytesStart<'_>) -> Result<Self> {
        Ok(Self {
            kind: attribute(start, b"type")?.filter(|kind| !kind.is_empty()),
            message: attribute(start, b"message")?.unwrap_or_default(),
            text: String::new(),
        })
    }
}

#[derive(Debug, Default)]
struct TestcaseBuilder {
    name: String,
    classname: String,
    time: f64,
    failure: Option<FailureBody>,
    error: Option<FailureBody>,
    skipped: bool,
    system_out: String,
    system_err: String,
}

impl TestcaseBuilder {
    fn from_start(start: &BytesStart<'_>) -> Result<Self> {
        let time = attribute(start, b"time")?
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .unwrap_or(0.0);
        Ok(Self {
            name: attribute(start, b"name")?.unwrap_or_default(),
            classname: attribute(start, b"classname")?.unwrap_or_default(),
            time,
            ..Self::default()
        })
    }

    fn capture_text(&mut self, target: Capture, text: &str) {
        let buffer = match target {
            Capture::Failure => self.failure.as_mut().map(|body| &mut body.text),
            Capture::Error => self.error.as_mut().map(|body| &mut body.text),
            Capture::SystemOut => Some(&mut self.system_out),
            Capture::SystemErr => Some(&mut self.system_err),
        };
        if let Some(buffer) = buffer {
            buffer.push_str(text);
        }
    }

    fn finish(self) -> ParsedXmlTest {
        // <failure> wins over <error> when a report carries both.
        let (status, failure) = match (self.failure, self.error) {
            (Some(body), _) => (TestStatus::Failed, Some((body, DEFAULT_FAILURE_TYPE))),
            (None, Some(body)) => (TestStatus::Failed, Some((body, DEFAULT_ERROR_TYPE))),
            (None, None) if self.skipped => (TestStatus::Skipped, None),
            (None, None) => (TestStatus::Passed, None),
        };

        let failure = failure.map(|(body, default_kind)| {
            let stack_trace = body.text.trim().to_string();
            FailureInfo {
                kind: body.kind.unwrap_or_else(|| default_kind.to_string()),
                message: body.message,
                file: extract_file_location(Some(&stack_trace), &self.classname),
                stack_trace,
                classname: self.classname.clone(),
                method: self.name.clone(),
                parsing_source: PARSING_SOURCE.to_string(),
                parsing_confidence: PARSING_CONFIDENCE.to_string(),
            }
        });

        let file = failure.as_ref().map_or_else(
            || extract_file_location(None, &self.classname),
            |failure| failure.file.clone(),
        );

        ParsedXmlTest {
            name: self.name,
            classname: self.classname,
            time: self.time,
            status,
            failure,
            system_out: self.system_out,
            system_err: self.system_err,
            file,
        }
    }
}

fn attribute(start: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in start.attributes() {
        let attr = attr.map_err(|err| Error::parse(format!("malformed attribute: {err}")))?;
        if attr.key.local_name().as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

// ────────────────────────────────────────────────────────────────────────────
// File location heuristic
// ────────────────────────────────────────────────────────────────────────────

fn tests_path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(tests/[^\s:'\x22]+):(\d+)").expect("tests path regex"))
}

fn python_file_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([\w.-]+\.py):(\d+)").expect("python file regex"))
}

/// Best-effort guess at the source location of a test.
///
/// Tries, in order: a `tests/<path>:<line>` reference in the stack trace, any
/// `<file>.py:<line>` reference in the stack trace, a pseudo filename from the
/// second dotted segment of `classname` (`tests.test_login.TestLogin` gives
/// `test_login.py`), and finally [`NO_FILE_LOCATION`]. The result is a hint for
/// humans, not a guaranteed path.
#[must_use]
pub fn extract_file_location(stack_trace: Option<&str>, classname: &str) -> String {
    if let Some(trace) = stack_trace.filter(|trace| !trace.trim().is_empty()) {
        for re in [tests_path_regex(), python_file_regex()] {
            if let Some(caps) = re.captures(trace) {
                return format!("{}:{}", &caps[1], &caps[2]);
            }
        }
    }

    classname
        .split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .map_or_else(|| NO_FILE_LOCATION.to_string(), |segment| format!("{segment}.py"))
}

// ────────────────────────────────────────────────────────────────────────────
// Resolution + transform
// ────────────────────────────────────────────────────────────────────────────

/// Resolve `test_id` against parsed tests.
///
/// An exact `name` match always wins. Otherwise the first test in document
/// order whose name or classname contains the id, or whose name is contained
/// in the id, is returned as a fuzzy match.
#[must_use]
pub fn resolve_test<'a>(tests: &'a [ParsedXmlTest], test_id: &str) -> MatchResolution<'a> {
    if test_id.is_empty() {
        return MatchResolution::NoMatch;
    }

    if let Some(test) = tests.iter().find(|test| test.name == test_id) {
        return MatchResolution::Exact(test);
    }

    tests
        .iter()
        .find(|test| {
            let name_in_id = !test.name.is_empty() && test_id.contains(test.name.as_str());
            test.name.contains(test_id)
                || test.classname.contains(test_id)
                || name_in_id
                || (test.name.starts_with("test_") && name_in_id)
        })
        .map_or(MatchResolution::NoMatch, MatchResolution::Fuzzy)
}

impl ParsedXmlTest {
    /// Concatenated STDOUT / STDERR / FAILURE sections, or a synthesized line
    /// when the report captured nothing.
    #[must_use]
    pub fn build_logs(&self) -> String {
        let mut sections = Vec::new();
        if !self.system_out.is_empty() {
            sections.push(format!("STDOUT:\n{}", self.system_out));
        }
        if !self.system_err.is_empty() {
            sections.push(format!("STDERR:\n{}", self.system_err));
        }
        if let Some(failure) = &self.failure {
            let body = if failure.stack_trace.is_empty() {
                &failure.message
            } else {
                &failure.stack_trace
            };
            sections.push(format!("FAILURE:\n{body}"));
        }

        if sections.is_empty() {
            format!(
                "Test {} finished with status {} (no output captured)",
                self.name, self.status
            )
        } else {
            sections.join("\n\n")
        }
    }

    #[must_use]
    pub fn to_enrichment(&self, matched_by: MatchKind) -> JunitEnrichment {
        let logs = self.build_logs();
        JunitEnrichment {
            status: self.status,
            duration: self.time * 1000.0,
            raw_output: logs.clone(),
            logs,
            framework: FRAMEWORK.to_string(),
            file: self.file.clone(),
            failure: self.failure.clone(),
            matched_by,
        }
    }
}

/// Parse `xml` and produce enrichment for `test_id`.
///
/// `Ok(None)` means the report has no corresponding test; callers skip
/// enrichment rather than treating it as an error.
pub fn extract_test_result(
    xml: &str,
    test_id: &str,
    max_bytes: usize,
) -> Result<Option<JunitEnrichment>> {
    let tests = parse_junit_xml_bounded(xml, max_bytes)?;
    let resolution = resolve_test(&tests, test_id);
    tracing::debug!(
        event = "junit.resolve",
        test_id,
        parsed = tests.len(),
        matched_by = ?resolution.kind(),
        "Resolved JUnit test case"
    );
    Ok(resolution
        .test()
        .map(|test| test.to_enrichment(resolution.kind())))
}
