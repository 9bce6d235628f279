//! Query intents and the fluent builder that assembles them.
//!
//! A [`QueryIntent`] is a one-shot description of a database operation:
//! built by the caller, compiled once, executed, discarded. The
//! [`QueryBuilder`] offers a chainable surface over the raw structure.

use super::filter::{CompareOp, DateField, FilterNode, SearchAnchor};
use super::value::SqlValue;

/// The kind of database operation requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Find,
    List,
    Count,
    Check,
    Insert,
    Update,
    Remove,
    Drop,
    Truncate,
    /// Caller-supplied statement executed for its side effect.
    Command,
    Scalar,
    /// Caller-supplied SELECT with optional `{where}` substitution.
    RawQuery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Avg,
    Min,
    Sum,
    Max,
    Count,
    Group,
}

impl ScalarKind {
    pub fn as_sql(self) -> &'static str {
        match self {
            ScalarKind::Avg => "AVG",
            ScalarKind::Min => "MIN",
            ScalarKind::Sum => "SUM",
            ScalarKind::Max => "MAX",
            ScalarKind::Count => "COUNT",
            ScalarKind::Group => "GROUP",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalarSpec {
    pub kind: ScalarKind,
    pub key: String,
    pub key2: Option<String>,
}

/// A complete, compilable description of one database operation.
#[derive(Debug, Clone)]
pub struct QueryIntent {
    pub intent: Intent,
    /// Target table, optionally schema-qualified.
    pub table: String,
    /// Output projection; empty means `*`.
    pub fields: Vec<String>,
    /// Language tag substituted into localized field names.
    pub language: Option<String>,
    pub filter: Vec<FilterNode>,
    /// Sort tokens: field name with optional `_asc`/`_desc` suffix.
    pub sort: Vec<String>,
    pub take: Option<u64>,
    pub skip: Option<u64>,
    /// Insert/update payload in declaration order.
    pub payload: Vec<(String, SqlValue)>,
    pub primary_key: Option<String>,
    pub returning: Vec<String>,
    pub scalar: Option<ScalarSpec>,
    /// Caller-supplied SQL for `Command`/`RawQuery`.
    pub raw_sql: Option<String>,
    /// Passthrough parameters for `Command`/`RawQuery`.
    pub raw_params: Vec<SqlValue>,
    /// Shape single-row results as the first row instead of a row set.
    pub first: bool,
    pub debug: bool,
}

/// Fluent assembly of a [`QueryIntent`].
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    intent: QueryIntent,
}

impl QueryBuilder {
    pub fn table(table: impl Into<String>) -> Self {
        QueryBuilder {
            intent: QueryIntent {
                intent: Intent::Find,
                table: table.into(),
                fields: Vec::new(),
                language: None,
                filter: Vec::new(),
                sort: Vec::new(),
                take: None,
                skip: None,
                payload: Vec::new(),
                primary_key: None,
                returning: Vec::new(),
                scalar: None,
                raw_sql: None,
                raw_params: Vec::new(),
                first: false,
                debug: false,
            },
        }
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.intent.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn language(mut self, tag: impl Into<String>) -> Self {
        self.intent.language = Some(tag.into());
        self
    }

    /// Append an arbitrary filter node.
    pub fn filter(mut self, node: FilterNode) -> Self {
        self.intent.filter.push(node);
        self
    }

    pub fn where_(self, field: impl Into<String>, op: CompareOp, value: impl Into<SqlValue>) -> Self {
        self.filter(FilterNode::Compare {
            field: field.into(),
            op,
            value: value.into(),
        })
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.where_(field, CompareOp::Eq, value)
    }

    pub fn where_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.filter(FilterNode::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn where_not_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.filter(FilterNode::NotIn {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn between(
        self,
        field: impl Into<String>,
        low: impl Into<SqlValue>,
        high: impl Into<SqlValue>,
    ) -> Self {
        self.filter(FilterNode::Between {
            field: field.into(),
            low: low.into(),
            high: high.into(),
        })
    }

    pub fn search(
        self,
        field: impl Into<String>,
        pattern: impl Into<String>,
        anchor: SearchAnchor,
    ) -> Self {
        self.filter(FilterNode::Search {
            field: field.into(),
            pattern: pattern.into(),
            anchor,
        })
    }

    pub fn date_part(
        self,
        field: impl Into<String>,
        part: DateField,
        op: CompareOp,
        value: impl Into<SqlValue>,
    ) -> Self {
        self.filter(FilterNode::DatePart {
            field: field.into(),
            part,
            op,
            value: value.into(),
        })
    }

    /// OR-joined group of conditions.
    pub fn or_where(self, nodes: Vec<FilterNode>) -> Self {
        self.filter(FilterNode::Or(nodes))
    }

    /// Append a sort token (`"name"`, `"created_desc"`, ...).
    pub fn sort(mut self, token: impl Into<String>) -> Self {
        self.intent.sort.push(token.into());
        self
    }

    pub fn sort_desc(self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.sort(format!("{field}_desc"))
    }

    pub fn take(mut self, take: u64) -> Self {
        self.intent.take = Some(take);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.intent.skip = Some(skip);
        self
    }

    /// 1-based page combined with a page size.
    pub fn page(self, page: u64, size: u64) -> Self {
        self.take(size).skip(page.saturating_sub(1) * size)
    }

    /// Append a payload entry. The key may carry a mutation-mode prefix.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.intent.payload.push((key.into(), value.into()));
        self
    }

    pub fn payload<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<SqlValue>,
    {
        self.intent
            .payload
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn primary_key(mut self, key: impl Into<String>) -> Self {
        self.intent.primary_key = Some(key.into());
        self
    }

    pub fn returning<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.intent.returning = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn first(mut self) -> Self {
        self.intent.first = true;
        self
    }

    /// Log the compiled statement and parameters at debug level.
    pub fn debug(mut self) -> Self {
        self.intent.debug = true;
        self
    }

    // Terminal methods: fix the intent kind and hand back the finished
    // description.

    pub fn find(self) -> QueryIntent {
        self.into_intent(Intent::Find)
    }

    pub fn list(self) -> QueryIntent {
        self.into_intent(Intent::List)
    }

    pub fn count(self) -> QueryIntent {
        self.into_intent(Intent::Count)
    }

    pub fn check(self) -> QueryIntent {
        self.into_intent(Intent::Check)
    }

    pub fn insert(self) -> QueryIntent {
        self.into_intent(Intent::Insert)
    }

    pub fn update(self) -> QueryIntent {
        self.into_intent(Intent::Update)
    }

    pub fn remove(self) -> QueryIntent {
        self.into_intent(Intent::Remove)
    }

    pub fn drop_table(self) -> QueryIntent {
        self.into_intent(Intent::Drop)
    }

    pub fn truncate(self) -> QueryIntent {
        self.into_intent(Intent::Truncate)
    }

    pub fn scalar(mut self, kind: ScalarKind, key: impl Into<String>) -> QueryIntent {
        self.intent.scalar = Some(ScalarSpec {
            kind,
            key: key.into(),
            key2: None,
        });
        self.into_intent(Intent::Scalar)
    }

    /// Grouped aggregate: one row per distinct `key`, aggregating `key2`
    /// (SUM) or counting rows when `key2` is absent.
    pub fn scalar_group(
        mut self,
        key: impl Into<String>,
        key2: Option<String>,
    ) -> QueryIntent {
        self.intent.scalar = Some(ScalarSpec {
            kind: ScalarKind::Group,
            key: key.into(),
            key2,
        });
        self.into_intent(Intent::Scalar)
    }

    pub fn command(mut self, sql: impl Into<String>, params: Vec<SqlValue>) -> QueryIntent {
        self.intent.raw_sql = Some(sql.into());
        self.intent.raw_params = params;
        self.into_intent(Intent::Command)
    }

    pub fn raw_query(mut self, sql: impl Into<String>, params: Vec<SqlValue>) -> QueryIntent {
        self.intent.raw_sql = Some(sql.into());
        self.intent.raw_params = params;
        self.into_intent(Intent::RawQuery)
    }

    fn into_intent(mut self, intent: Intent) -> QueryIntent {
        self.intent.intent = intent;
        self.intent
    }
}
