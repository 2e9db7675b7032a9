//! Label and field selector builders, and the REST client's query-parameter bag
//! (component F's "Query parameters" table).
use std::collections::BTreeMap;

/// One `matchExpressions` entry of a [`LabelSelector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelExpression {
    /// `key in (v1, v2, ...)`
    In { key: String, values: Vec<String> },
    /// `key notin (v1, v2, ...)`
    NotIn { key: String, values: Vec<String> },
    /// Bare `key` — the label must be present, any value.
    Exists { key: String },
    /// `!key` — the label must be absent.
    DoesNotExist { key: String },
}

/// A Kubernetes label selector: `matchLabels` plus `matchExpressions`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    /// Exact-match labels, serialized sorted by key.
    pub match_labels: BTreeMap<String, String>,
    /// Set-based expressions, serialized in the order given.
    pub match_expressions: Vec<LabelExpression>,
}

impl LabelSelector {
    /// Start from a single exact-match label.
    pub fn matching(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut s = Self::default();
        s.match_labels.insert(key.into(), value.into());
        s
    }

    /// Add an exact-match label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    /// Add a set-based expression.
    pub fn with_expression(mut self, expr: LabelExpression) -> Self {
        self.match_expressions.push(expr);
        self
    }

    /// Render to the wire form used in the `labelSelector` query parameter:
    /// `matchLabels` sorted by key (`key=value`), then expressions in input order.
    pub fn to_query_value(&self) -> String {
        let mut parts: Vec<String> = self
            .match_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        for expr in &self.match_expressions {
            parts.push(match expr {
                LabelExpression::In { key, values } => format!("{key} in ({})", values.join(",")),
                LabelExpression::NotIn { key, values } => format!("{key} notin ({})", values.join(",")),
                LabelExpression::Exists { key } => key.clone(),
                LabelExpression::DoesNotExist { key } => format!("!{key}"),
            });
        }
        parts.join(",")
    }
}

/// A field selector comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// `field=value`
    Eq,
    /// `field!=value`
    Ne,
}

/// One `field op value` term of a [`FieldSelector`]. Multiple terms join with `,`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelector {
    terms: Vec<(String, FieldOp, String)>,
}

impl FieldSelector {
    /// Start a selector with one equality term.
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            terms: vec![(field.into(), FieldOp::Eq, value.into())],
        }
    }

    /// Start a selector with one inequality term.
    pub fn ne(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            terms: vec![(field.into(), FieldOp::Ne, value.into())],
        }
    }

    /// Add another term, ANDed with the rest.
    pub fn and(mut self, field: impl Into<String>, op: FieldOp, value: impl Into<String>) -> Self {
        self.terms.push((field.into(), op, value.into()));
        self
    }

    /// Render to the wire form used in the `fieldSelector` query parameter.
    pub fn to_query_value(&self) -> String {
        self.terms
            .iter()
            .map(|(field, op, value)| {
                let op_str = match op {
                    FieldOp::Eq => "=",
                    FieldOp::Ne => "!=",
                };
                format!("{field}{op_str}{value}")
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Either a pre-built selector or a literal, already-serialized selector string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorValue {
    /// A literal `labelSelector`/`fieldSelector` string, passed through verbatim.
    Literal(String),
    /// A structured label selector.
    Label(LabelSelector),
    /// A structured field selector.
    Field(FieldSelector),
}

impl From<LabelSelector> for SelectorValue {
    fn from(s: LabelSelector) -> Self {
        SelectorValue::Label(s)
    }
}

impl From<FieldSelector> for SelectorValue {
    fn from(s: FieldSelector) -> Self {
        SelectorValue::Field(s)
    }
}

impl From<String> for SelectorValue {
    fn from(s: String) -> Self {
        SelectorValue::Literal(s)
    }
}

impl From<&str> for SelectorValue {
    fn from(s: &str) -> Self {
        SelectorValue::Literal(s.to_string())
    }
}

impl SelectorValue {
    fn to_query_value(&self) -> String {
        match self {
            SelectorValue::Literal(s) => s.clone(),
            SelectorValue::Label(s) => s.to_query_value(),
            SelectorValue::Field(s) => s.to_query_value(),
        }
    }
}

/// `dryRun` values accepted by the API server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DryRun {
    /// Validate the request but do not persist the change.
    All,
}

/// `propagationPolicy` values for delete calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationPolicy {
    /// Owner and dependents are deleted together, in the foreground.
    Foreground,
    /// The owner is deleted immediately; dependents are garbage-collected in the background.
    Background,
    /// Dependents become orphaned; only the owner is deleted.
    Orphan,
}

impl PropagationPolicy {
    fn as_str(self) -> &'static str {
        match self {
            PropagationPolicy::Foreground => "Foreground",
            PropagationPolicy::Background => "Background",
            PropagationPolicy::Orphan => "Orphan",
        }
    }
}

/// The full set of query parameters the REST client (component F) understands.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    /// Pass-through pretty-printing hint.
    pub pretty: Option<String>,
    /// Pagination cursor from a previous truncated list response.
    pub continue_token: Option<String>,
    /// Maximum number of items to return from a list call.
    pub limit: Option<i64>,
    /// Optimistic-concurrency cursor.
    pub resource_version: Option<String>,
    /// Server-side call timeout, in seconds.
    pub timeout_seconds: Option<u32>,
    /// Set by watch calls; not normally set directly by callers.
    pub watch: bool,
    /// Request bookmark events on a watch.
    pub allow_watch_bookmarks: bool,
    /// Delete grace period, in seconds.
    pub grace_period_seconds: Option<u32>,
    /// Delete propagation policy.
    pub propagation_policy: Option<PropagationPolicy>,
    /// Validate-only dry run.
    pub dry_run: Option<DryRun>,
    /// Field manager identity for server-side apply / conflict attribution.
    pub field_manager: Option<String>,
    /// Force a conflicting write through.
    pub force: bool,
    /// Field selector.
    pub field_selector: Option<SelectorValue>,
    /// Label selector.
    pub label_selector: Option<SelectorValue>,
    /// HTTP statuses that should come back as an `Outcome::ApiException` envelope
    /// rather than an `Err`. A local directive to the facade, never sent to the server.
    pub return_api_exceptions: Vec<u16>,
}

impl QueryParams {
    /// Render to the `(name, value)` pairs sent as the URL query string.
    pub fn to_http_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(v) = &self.pretty {
            params.push(("pretty", v.clone()));
        }
        if let Some(v) = &self.continue_token {
            params.push(("continue", v.clone()));
        }
        if let Some(v) = self.limit {
            params.push(("limit", v.to_string()));
        }
        if let Some(v) = &self.resource_version {
            params.push(("resourceVersion", v.clone()));
        }
        if let Some(v) = self.timeout_seconds {
            params.push(("timeoutSeconds", v.to_string()));
        }
        if self.watch {
            params.push(("watch", "true".to_string()));
        }
        if self.allow_watch_bookmarks {
            params.push(("allowWatchBookmarks", "true".to_string()));
        }
        if let Some(v) = self.grace_period_seconds {
            params.push(("gracePeriodSeconds", v.to_string()));
        }
        if let Some(v) = self.propagation_policy {
            params.push(("propagationPolicy", v.as_str().to_string()));
        }
        if self.dry_run.is_some() {
            params.push(("dryRun", "All".to_string()));
        }
        if let Some(v) = &self.field_manager {
            params.push(("fieldManager", v.clone()));
        }
        if self.force {
            params.push(("force", "true".to_string()));
        }
        if let Some(v) = &self.field_selector {
            params.push(("fieldSelector", v.to_query_value()));
        }
        if let Some(v) = &self.label_selector {
            params.push(("labelSelector", v.to_query_value()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // S4
    #[test]
    fn label_selector_serialization_scenario() {
        let selector = LabelSelector::matching("app", "nginx")
            .with_expression(LabelExpression::In {
                key: "env".into(),
                values: vec!["prod".into(), "staging".into()],
            })
            .with_expression(LabelExpression::DoesNotExist { key: "debug".into() });
        assert_eq!(selector.to_query_value(), "app=nginx,env in (prod,staging),!debug");
    }

    #[test]
    fn label_selector_empty_is_empty_string() {
        assert_eq!(LabelSelector::default().to_query_value(), "");
    }

    #[test]
    fn field_selector_eq_and_ne() {
        assert_eq!(FieldSelector::eq("metadata.name", "foo").to_query_value(), "metadata.name=foo");
        assert_eq!(
            FieldSelector::ne("status.phase", "Running").to_query_value(),
            "status.phase!=Running"
        );
        assert_eq!(
            FieldSelector::eq("a", "1").and("b", FieldOp::Ne, "2").to_query_value(),
            "a=1,b!=2"
        );
    }

    #[test]
    fn query_params_empty_produces_no_pairs() {
        assert!(QueryParams::default().to_http_params().is_empty());
    }

    #[test]
    fn return_api_exceptions_is_a_local_directive_not_a_query_pair() {
        let query = QueryParams {
            return_api_exceptions: vec![404, 409],
            ..Default::default()
        };
        assert!(query.to_http_params().is_empty());
    }

    #[test]
    fn query_params_full_set() {
        let params = QueryParams {
            return_api_exceptions: Vec::new(),
            pretty: Some("true".into()),
            continue_token: Some("abc".into()),
            limit: Some(50),
            resource_version: Some("123".into()),
            timeout_seconds: Some(30),
            watch: true,
            allow_watch_bookmarks: true,
            grace_period_seconds: Some(0),
            propagation_policy: Some(PropagationPolicy::Foreground),
            dry_run: Some(DryRun::All),
            field_manager: Some("vaultkube".into()),
            force: true,
            field_selector: Some(FieldSelector::eq("metadata.name", "foo").into()),
            label_selector: Some(LabelSelector::matching("app", "nginx").into()),
        };
        let pairs = params.to_http_params();
        assert!(pairs.contains(&("limit", "50".to_string())));
        assert!(pairs.contains(&("propagationPolicy", "Foreground".to_string())));
        assert!(pairs.contains(&("dryRun", "All".to_string())));
        assert!(pairs.contains(&("force", "true".to_string())));
        assert!(pairs.contains(&("fieldSelector", "metadata.name=foo".to_string())));
        assert!(pairs.contains(&("labelSelector", "app=nginx".to_string())));
    }

    #[test]
    fn selectors_accept_plain_strings() {
        let params = QueryParams {
            label_selector: Some("app=nginx".into()),
            ..Default::default()
        };
        assert_eq!(params.to_http_params(), vec![("labelSelector", "app=nginx".to_string())]);
    }
}
