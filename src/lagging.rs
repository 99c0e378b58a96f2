//! Lagging feature counts.
//!
//! For every distinct release date of the target and reference browsers in
//! a window, count the features that every reference browser shipped on or
//! before that date while the target browser had not.
//!
//! A browser has shipped a feature by date D when the release carrying the
//! feature's availability version came out on or before D. An availability
//! row whose version has no release never counts.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::engine::{FromQueryRow, Page, QueryRow, SortKey};
use crate::error::{LagError, LagResult, TemplateError};
use crate::statement::{ParamName, ParamValue, Statement};
use crate::template::{CompiledTemplate, FieldKind, TemplateData, TemplateSchema, compile};

const TARGET_BROWSER_FIELD: &str = "TargetBrowserParam";
const OTHER_BROWSERS_FIELD: &str = "OtherBrowserParams";
const RELEASE_DATE_CURSOR_FIELD: &str = "ReleaseDateCursorParam";

const TARGET_BROWSER_PARAM: &str = "targetBrowserParam";
const RELEASE_DATE_CURSOR_PARAM: &str = "releaseDateCursor";
const START_AT_PARAM: &str = "startAt";
const END_AT_PARAM: &str = "endAt";
const LIMIT_PARAM: &str = "limit";

/// Availability joins each availability row to the release of the same
/// browser and version.
pub const LAGGING_FEATURE_COUNT_SKELETON: &str = r#"
SELECT releases.release_date AS release_date,
       (
           SELECT COUNT(DISTINCT wf.feature_key)
           FROM web_features wf
           WHERE
           -- Available in every reference browser on or before this release date
             {{range $browser := .OtherBrowserParams}}
               EXISTS (
                 SELECT 1
                 FROM browser_feature_availabilities bfa
                 JOIN browser_releases br
                   ON bfa.browser_name = br.browser_name
                  AND bfa.browser_version = br.browser_version
                 WHERE bfa.web_feature_id = wf.id
                   AND bfa.browser_name = @{{ $browser }}
                   AND br.release_date <= releases.release_date
               )
               AND
             {{end}}
             NOT EXISTS ( -- Not yet available in the target browser
               SELECT 1
               FROM browser_feature_availabilities bfa_target
               JOIN browser_releases br_target
                 ON bfa_target.browser_name = br_target.browser_name
                AND bfa_target.browser_version = br_target.browser_version
               WHERE bfa_target.web_feature_id = wf.id
                 AND br_target.browser_name = @{{ .TargetBrowserParam }}
                 AND br_target.release_date <= releases.release_date
             )
       ) AS count
FROM (
    SELECT DISTINCT release_date
    FROM browser_releases
    WHERE browser_name IN ({{range $param := .OtherBrowserParams}}@{{ $param }}, {{end}}@{{ .TargetBrowserParam }})
) releases
WHERE releases.release_date >= @startAt
  AND releases.release_date < @endAt
  {{if .ReleaseDateCursorParam}}
  AND releases.release_date < @{{ .ReleaseDateCursorParam }}
  {{end}}
ORDER BY releases.release_date DESC
LIMIT @limit
"#;

fn lagging_feature_count_schema() -> TemplateSchema {
    TemplateSchema::new()
        .field(TARGET_BROWSER_FIELD, FieldKind::Scalar)
        .field(OTHER_BROWSERS_FIELD, FieldKind::List)
        .field(RELEASE_DATE_CURSOR_FIELD, FieldKind::Optional)
}

static LAGGING_FEATURE_COUNT_TEMPLATE: LazyLock<Result<CompiledTemplate, TemplateError>> =
    LazyLock::new(|| compile(LAGGING_FEATURE_COUNT_SKELETON, &lagging_feature_count_schema()));

/// The process-wide compiled lagging feature count template.
///
/// Compiled on first use; call during startup so a bad skeleton aborts the
/// process before any request is served.
pub fn lagging_feature_count_template() -> Result<&'static CompiledTemplate, TemplateError> {
    LAGGING_FEATURE_COUNT_TEMPLATE.as_ref().map_err(Clone::clone)
}

/// A half-open time range: `start` inclusive, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> LagResult<Self> {
        let window = Self { start, end };
        window.validate()?;
        Ok(window)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    fn validate(&self) -> LagResult<()> {
        if self.start >= self.end {
            return Err(LagError::invalid_argument(format!(
                "window start {} must be before end {}",
                self.start.to_rfc3339(),
                self.end.to_rfc3339()
            )));
        }
        Ok(())
    }
}

/// One page request.
///
/// A page token is only meaningful for the same target, reference set and
/// window it was issued for. Tokens carry no request fingerprint, so reuse
/// with a different request is unsupported; a token dated outside the
/// window is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaggingFeatureCountRequest {
    pub target_browser: String,
    pub other_browsers: Vec<String>,
    pub window: TimeWindow,
    pub page_size: u32,
    pub page_token: Option<String>,
}

impl LaggingFeatureCountRequest {
    pub fn new(
        target_browser: impl Into<String>,
        other_browsers: impl IntoIterator<Item = impl Into<String>>,
        window: TimeWindow,
        page_size: u32,
    ) -> Self {
        Self {
            target_browser: target_browser.into(),
            other_browsers: other_browsers.into_iter().map(Into::into).collect(),
            window,
            page_size,
            page_token: None,
        }
    }

    pub fn with_page_token(mut self, token: Option<String>) -> Self {
        self.page_token = token;
        self
    }

    fn validate(&self, max_page_size: u32) -> LagResult<()> {
        if self.target_browser.is_empty() {
            return Err(LagError::invalid_argument("target browser must not be empty"));
        }
        if self.other_browsers.is_empty() {
            return Err(LagError::invalid_argument(
                "at least one reference browser is required",
            ));
        }
        let mut seen = HashSet::new();
        for browser in &self.other_browsers {
            if browser.is_empty() {
                return Err(LagError::invalid_argument(
                    "reference browser names must not be empty",
                ));
            }
            if !seen.insert(browser.as_str()) {
                return Err(LagError::invalid_argument(format!(
                    "reference browser '{browser}' is listed more than once"
                )));
            }
        }
        if seen.contains(self.target_browser.as_str()) {
            return Err(LagError::invalid_argument(format!(
                "target browser '{}' is also a reference browser",
                self.target_browser
            )));
        }
        if self.page_size == 0 {
            return Err(LagError::invalid_argument("page size must be positive"));
        }
        if self.page_size > max_page_size {
            return Err(LagError::invalid_argument(format!(
                "page size {} exceeds the maximum of {max_page_size}",
                self.page_size
            )));
        }
        self.window.validate()
    }
}

/// Build the parameterized statement for one page.
///
/// Arguments are validated and the page token decoded before anything is
/// rendered.
pub fn build_statement(
    request: &LaggingFeatureCountRequest,
    max_page_size: u32,
) -> LagResult<Statement> {
    request.validate(max_page_size)?;

    let cursor = match &request.page_token {
        Some(token) => {
            let cursor = Cursor::decode(token)?;
            if !request.window.contains(cursor.release_date) {
                return Err(LagError::invalid_cursor(
                    "page token lies outside the requested window",
                ));
            }
            Some(cursor)
        }
        None => None,
    };

    let template = lagging_feature_count_template()?;
    let mut params: BTreeMap<String, ParamValue> = BTreeMap::new();

    let target_param = ParamName::new(TARGET_BROWSER_PARAM)?;
    params.insert(target_param.to_string(), request.target_browser.as_str().into());

    let mut other_params = Vec::with_capacity(request.other_browsers.len());
    for (i, browser) in request.other_browsers.iter().enumerate() {
        let name = ParamName::new(format!("otherBrowser{i}"))?;
        params.insert(name.to_string(), browser.as_str().into());
        other_params.push(name);
    }

    let cursor_param = match cursor {
        Some(cursor) => {
            let name = ParamName::new(RELEASE_DATE_CURSOR_PARAM)?;
            params.insert(name.to_string(), cursor.release_date.into());
            Some(name)
        }
        None => None,
    };

    params.insert(START_AT_PARAM.to_string(), request.window.start.into());
    params.insert(END_AT_PARAM.to_string(), request.window.end.into());
    params.insert(LIMIT_PARAM.to_string(), request.page_size.into());

    let data = TemplateData::new()
        .scalar(TARGET_BROWSER_FIELD, target_param)
        .list(OTHER_BROWSERS_FIELD, other_params)
        .optional(RELEASE_DATE_CURSOR_FIELD, cursor_param);
    let sql = template.render(&data)?;

    Statement::new(sql, params)
}

/// Features supported by every reference browser but not the target, as of
/// one release date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaggingFeatureCount {
    pub release_date: DateTime<Utc>,
    pub count: i64,
}

impl FromQueryRow for LaggingFeatureCount {
    fn from_row<R: QueryRow + ?Sized>(row: &R) -> LagResult<Self> {
        Ok(Self {
            release_date: row.get_timestamp("release_date")?,
            count: row.get_i64("count")?,
        })
    }
}

impl SortKey for LaggingFeatureCount {
    fn sort_key(&self) -> DateTime<Utc> {
        self.release_date
    }
}

pub type LaggingFeatureCountPage = Page<LaggingFeatureCount>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn window() -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn request(others: &[&str]) -> LaggingFeatureCountRequest {
        LaggingFeatureCountRequest::new("fooBrowser", others.iter().copied(), window(), 100)
    }

    fn assert_invalid_argument(result: LagResult<Statement>) {
        assert!(
            matches!(result, Err(LagError::InvalidArgument(_))),
            "expected InvalidArgument, got {result:?}"
        );
    }

    #[test]
    fn test_template_compiles() {
        let template = lagging_feature_count_template().unwrap();
        assert!(!template.nodes().is_empty());
    }

    #[test]
    fn test_statement_without_cursor() {
        let stmt = build_statement(&request(&["barBrowser", "bazBrowser"]), 1000).unwrap();
        let sql = stmt.sql();

        assert_eq!(sql.matches("bfa.browser_name = @otherBrowser").count(), 2);
        assert!(sql.contains("bfa.browser_name = @otherBrowser0"));
        assert!(sql.contains("bfa.browser_name = @otherBrowser1"));
        assert!(sql.contains("IN (@otherBrowser0, @otherBrowser1, @targetBrowserParam)"));
        assert!(sql.contains("br_target.browser_name = @targetBrowserParam"));
        assert!(!sql.contains("releaseDateCursor"));
        assert!(!sql.contains("{{"));
        assert!(sql.contains("AND bfa.browser_version = br.browser_version"));
        assert!(sql.contains("AND bfa_target.browser_version = br_target.browser_version"));

        assert_eq!(stmt.param("targetBrowserParam"), Some(&ParamValue::from("fooBrowser")));
        assert_eq!(stmt.param("otherBrowser0"), Some(&ParamValue::from("barBrowser")));
        assert_eq!(stmt.param("otherBrowser1"), Some(&ParamValue::from("bazBrowser")));
        assert_eq!(stmt.param("limit"), Some(&ParamValue::Int(100)));
        assert_eq!(stmt.param("startAt"), Some(&ParamValue::from(window().start)));
        assert_eq!(stmt.param("endAt"), Some(&ParamValue::from(window().end)));
        assert_eq!(stmt.param("releaseDateCursor"), None);
        assert_eq!(stmt.params().len(), 6);
    }

    #[test]
    fn test_statement_with_cursor() {
        let date = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let req = request(&["barBrowser"]).with_page_token(Some(Cursor::new(date).encode()));
        let stmt = build_statement(&req, 1000).unwrap();

        assert!(stmt.sql().contains("AND releases.release_date < @releaseDateCursor"));
        assert_eq!(stmt.param("releaseDateCursor"), Some(&ParamValue::from(date)));
    }

    #[test]
    fn test_values_never_reach_sql() {
        let hostile = "x'); DROP TABLE web_features; --";
        let req = LaggingFeatureCountRequest::new(hostile, [hostile.to_string() + "2"], window(), 10);
        let stmt = build_statement(&req, 1000).unwrap();
        assert!(!stmt.sql().contains("DROP TABLE"));
        assert_eq!(stmt.param("targetBrowserParam"), Some(&ParamValue::from(hostile)));
    }

    #[test]
    fn test_reference_order_only_reorders_clauses() {
        let a = build_statement(&request(&["barBrowser", "bazBrowser"]), 1000).unwrap();
        let b = build_statement(&request(&["bazBrowser", "barBrowser"]), 1000).unwrap();
        assert_eq!(a.sql(), b.sql());
        assert_eq!(b.param("otherBrowser0"), Some(&ParamValue::from("bazBrowser")));
    }

    #[test]
    fn test_positional_form_binds_every_placeholder() {
        let stmt = build_statement(&request(&["barBrowser", "bazBrowser"]), 1000).unwrap();
        assert!(!stmt.positional_sql().contains('@'));
        assert_eq!(stmt.positional_params().count(), 6);
    }

    #[test]
    fn test_rejects_bad_arguments() {
        assert_invalid_argument(build_statement(&request(&[]), 1000));
        assert_invalid_argument(build_statement(&request(&["barBrowser", "barBrowser"]), 1000));
        assert_invalid_argument(build_statement(&request(&["fooBrowser"]), 1000));
        assert_invalid_argument(build_statement(&request(&[""]), 1000));

        let mut zero = request(&["barBrowser"]);
        zero.page_size = 0;
        assert_invalid_argument(build_statement(&zero, 1000));

        assert_invalid_argument(build_statement(&request(&["barBrowser"]), 50));

        let mut inverted = request(&["barBrowser"]);
        inverted.window = TimeWindow {
            start: window().end,
            end: window().start,
        };
        assert_invalid_argument(build_statement(&inverted, 1000));

        let mut empty_target = request(&["barBrowser"]);
        empty_target.target_browser.clear();
        assert_invalid_argument(build_statement(&empty_target, 1000));
    }

    #[test]
    fn test_rejects_bad_cursor() {
        let req = request(&["barBrowser"]).with_page_token(Some("garbage!".into()));
        assert!(matches!(build_statement(&req, 1000), Err(LagError::InvalidCursor(_))));

        let outside = Cursor::new(Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap());
        let req = request(&["barBrowser"]).with_page_token(Some(outside.encode()));
        assert!(matches!(build_statement(&req, 1000), Err(LagError::InvalidCursor(_))));
    }

    #[test]
    fn test_window() {
        assert!(TimeWindow::new(window().end, window().start).is_err());
        assert!(window().contains(window().start));
        assert!(!window().contains(window().end));
    }
}
