//! `{{ execution_time }}` rendering for prefixes, glob filters and folders.
//!
//! Two expressions are understood:
//!
//! * `{{ execution_time }}` renders as `%Y-%m-%dT%H:%M:%SZ`
//! * `{{ execution_time.strftime('<fmt>') }}` renders with a chrono format
//!
//! When no execution time is set, both render as the wildcard (`*` by
//! default) so that a templated glob matches every run.

use std::fmt::Write as _;
use std::sync::LazyLock;

use blockline_types::ConnectorError;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use regex::Regex;

pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
pub const DEFAULT_WILDCARD: &str = "*";

static EXPR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(.*?)\s*\}\}").expect("valid template regex"));

static STRFTIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^execution_time\s*\.\s*strftime\(\s*(?:'([^']*)'|"([^"]*)")\s*\)$"#)
        .expect("valid strftime regex")
});

/// Values available to templates during one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
    pub execution_time: Option<DateTime<Utc>>,
    pub wildcard: String,
}

impl Default for RenderContext {
    fn default() -> Self {
        Self {
            execution_time: None,
            wildcard: DEFAULT_WILDCARD.to_string(),
        }
    }
}

impl RenderContext {
    #[must_use]
    pub fn at(execution_time: DateTime<Utc>) -> Self {
        Self {
            execution_time: Some(execution_time),
            ..Self::default()
        }
    }

    /// Render every `{{ ... }}` expression in `template`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` for unknown expressions or invalid format strings.
    pub fn render(&self, template: &str) -> Result<String, ConnectorError> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for cap in EXPR_RE.captures_iter(template) {
            let whole = cap.get(0).map_or(0..0, |m| m.range());
            out.push_str(&template[last..whole.start]);
            out.push_str(&self.eval(&cap[1])?);
            last = whole.end;
        }
        out.push_str(&template[last..]);
        Ok(out)
    }

    fn eval(&self, expr: &str) -> Result<String, ConnectorError> {
        let format = if expr == "execution_time" {
            DEFAULT_TIME_FORMAT
        } else if let Some(cap) = STRFTIME_RE.captures(expr) {
            cap.get(1)
                .or_else(|| cap.get(2))
                .map_or(DEFAULT_TIME_FORMAT, |m| m.as_str())
        } else {
            return Err(ConnectorError::config(format!(
                "unsupported template expression '{{{{ {expr} }}}}'"
            )));
        };

        let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
        if items.iter().any(|item| matches!(item, Item::Error)) {
            return Err(ConnectorError::config(format!(
                "invalid time format '{format}' in template"
            )));
        }

        match self.execution_time {
            Some(ts) => {
                let mut rendered = String::new();
                write!(rendered, "{}", ts.format_with_items(items.iter()))
                    .map_err(|_| ConnectorError::config(format!("cannot render '{format}'")))?;
                Ok(rendered)
            }
            None => Ok(self.wildcard.clone()),
        }
    }
}

/// Render an optional template, leaving `None` untouched.
///
/// # Errors
///
/// See [`RenderContext::render`].
pub fn render_opt(ctx: &RenderContext, template: Option<&str>) -> Result<Option<String>, ConnectorError> {
    template.map(|t| ctx.render(t)).transpose()
}
