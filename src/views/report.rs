//! Ad-hoc report building and two-phase execution.
//!
//! A report request is validated against a fixed schema, projected against
//! the view's catalog, and compiled into one SELECT. Unknown field ids are
//! dropped silently so stale client catalogs keep working. When the
//! request paginates, a COUNT query runs first on the same connection and
//! the response carries page metadata.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::driver::{Connection, Driver, Record};
use crate::db::executor::Database;
use crate::error::PgError;
use crate::query::{escape, SqlValue};

use super::{FieldKind, View};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    Min,
    Max,
    Sum,
    Count,
}

impl Aggregate {
    fn as_sql(self) -> &'static str {
        match self {
            Aggregate::Min => "MIN",
            Aggregate::Max => "MAX",
            Aggregate::Sum => "SUM",
            Aggregate::Count => "COUNT",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportField {
    pub id: String,
    #[serde(default)]
    pub aggregate: Option<Aggregate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportFilter {
    pub id: String,
    pub operator: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportSort {
    pub id: String,
    #[serde(default)]
    pub direction: SortDir,
}

/// A client-supplied report request. Top-level shape is strict; leaf
/// field ids are tolerated and dropped when unknown.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ReportRequest {
    pub fields: Vec<ReportField>,
    pub group: Vec<String>,
    pub filter: Vec<ReportFilter>,
    pub sort: Vec<ReportSort>,
    pub take: Option<u64>,
    pub skip: Option<u64>,
    /// 1-based page; combined with `take` it derives `skip`.
    pub page: Option<u64>,
    /// Alias for `take`; wins when both are present.
    pub limit: Option<u64>,
}

impl ReportRequest {
    /// Validate a raw JSON request against the report schema.
    pub fn from_value(value: serde_json::Value) -> Result<Self, PgError> {
        serde_json::from_value(value).map_err(|e| PgError::Validation(e.to_string()))
    }
}

/// A compiled report: projection, statement body, ordering, paging.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ReportPlan {
    pub select: String,
    /// FROM + joins + WHERE + GROUP BY + HAVING, shared by the count and
    /// data queries.
    pub body: String,
    pub order: String,
    pub take: Option<u64>,
    pub skip: Option<u64>,
}

pub(crate) fn build_plan(view: &View, request: &ReportRequest) -> Result<ReportPlan, PgError> {
    let grouped = !request.group.is_empty();

    // Projection. Under grouping: group fields project bare, requested
    // fields need an aggregate or are dropped. Ungrouped: requested
    // fields, or the whole catalog.
    let mut projected_ids: Vec<String> = Vec::new();
    let mut select_parts: Vec<String> = Vec::new();
    let mut aggregates: HashMap<String, String> = HashMap::new();

    if grouped {
        for id in &request.group {
            if let Some(f) = view.field(id) {
                projected_ids.push(f.id.clone());
                select_parts.push(format!("{}{}", f.column, f.alias_suffix()));
            }
        }
        for m in &request.fields {
            let Some(f) = view.field(&m.id) else { continue };
            let Some(agg) = m.aggregate else { continue };
            let expr = format!("{}({})", agg.as_sql(), f.column);
            projected_ids.push(f.id.clone());
            select_parts.push(format!("{}{}", expr, f.alias_suffix()));
            aggregates.insert(f.id.clone(), expr);
        }
    } else if !request.fields.is_empty() {
        for m in &request.fields {
            if let Some(f) = view.field(&m.id) {
                projected_ids.push(f.id.clone());
                select_parts.push(format!("{}{}", f.column, f.alias_suffix()));
            }
        }
    } else {
        for f in &view.definition().fields {
            projected_ids.push(f.id.clone());
            select_parts.push(format!("{}{}", f.column, f.alias_suffix()));
        }
    }

    if select_parts.is_empty() {
        return Err(PgError::Validation(
            "report projects no known fields".to_string(),
        ));
    }

    // Filters. Conditions on aggregate projections route to HAVING.
    let mut where_parts: Vec<String> = Vec::new();
    let mut having_parts: Vec<String> = Vec::new();

    for m in &request.filter {
        let Some(f) = view.field(&m.id) else { continue };
        let op = if m.operator == "!=" {
            "<>"
        } else {
            m.operator.as_str()
        };

        match op {
            "search" => {
                let pattern = format!("%{}%", plain_text(&parse_value(f.kind, &m.value)));
                where_parts.push(format!(
                    "{} ILIKE {}",
                    f.column,
                    escape(&SqlValue::Text(pattern))
                ));
            }
            "in" => {
                let items: Vec<String> = m
                    .value
                    .split(',')
                    .map(|part| escape(&parse_value(f.kind, part.trim())))
                    .collect();
                if !items.is_empty() {
                    where_parts.push(format!("{} IN ({})", f.column, items.join(",")));
                }
            }
            "between" => {
                let (low_raw, high_raw) = match m.value.split_once(" - ") {
                    Some((a, b)) => (a, b),
                    None => (m.value.as_str(), ""),
                };
                let low = escape(&parse_value(f.kind, low_raw));
                let high = escape(&parse_value(f.kind, high_raw));
                match aggregates.get(&m.id) {
                    Some(expr) if grouped => having_parts
                        .push(format!("({expr} BETWEEN {low} AND {high})")),
                    _ => where_parts.push(format!(
                        "({} BETWEEN {} AND {})",
                        f.column, low, high
                    )),
                }
            }
            "=" | ">" | "<" | ">=" | "<>" | "<=" => {
                let value = escape(&parse_value(f.kind, &m.value));
                match aggregates.get(&m.id) {
                    Some(expr) if grouped => having_parts.push(format!("{expr}{op}{value}")),
                    _ => where_parts.push(format!("{}{}{}", f.column, op, value)),
                }
            }
            _ => continue,
        }
    }

    let group_cols: Vec<String> = request
        .group
        .iter()
        .filter_map(|id| view.field(id).map(|f| f.column.clone()))
        .collect();

    // Every declared relation joins unconditionally.
    let joins: Vec<String> = view
        .definition()
        .relations
        .iter()
        .map(|r| r.join_clause())
        .collect();

    let mut body = format!(" FROM {}", view.definition().from);
    if !joins.is_empty() {
        body.push(' ');
        body.push_str(&joins.join(" "));
    }
    if !where_parts.is_empty() {
        body.push_str(" WHERE ");
        body.push_str(&where_parts.join(" AND "));
    }
    if !group_cols.is_empty() {
        body.push_str(" GROUP BY ");
        body.push_str(&group_cols.join(","));
    }
    if !having_parts.is_empty() {
        body.push_str(" HAVING ");
        body.push_str(&having_parts.join(" AND "));
    }

    // Aggregate expressions have no stable name to re-reference, so sort
    // entries resolve to the 1-based ordinal of the projected field.
    let sort_parts: Vec<String> = request
        .sort
        .iter()
        .filter_map(|s| {
            projected_ids.iter().position(|id| id == &s.id).map(|i| {
                let dir = match s.direction {
                    SortDir::Desc => "DESC",
                    SortDir::Asc => "ASC",
                };
                format!("{} {}", i + 1, dir)
            })
        })
        .collect();
    let order = if sort_parts.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", sort_parts.join(","))
    };

    let take = request.limit.or(request.take);
    let mut skip = request.skip;
    if let Some(page) = request.page {
        let size = take.ok_or_else(|| {
            PgError::Validation("page requires take or limit".to_string())
        })?;
        skip = Some(page.saturating_sub(1) * size);
    }
    if skip.is_some() && take.is_none() {
        return Err(PgError::Validation(
            "paginated report requires take or limit".to_string(),
        ));
    }

    Ok(ReportPlan {
        select: select_parts.join(","),
        body,
        order,
        take,
        skip,
    })
}

/// Coerce a client-supplied filter value per the field's declared kind.
fn parse_value(kind: FieldKind, raw: &str) -> SqlValue {
    match kind {
        FieldKind::String => SqlValue::Text(raw.to_string()),
        FieldKind::Boolean => {
            let t = raw.trim().to_lowercase();
            SqlValue::Bool(matches!(t.as_str(), "1" | "true" | "yes" | "ok" | "on"))
        }
        FieldKind::Number => SqlValue::Float(parse_leading_float(raw)),
        FieldKind::Date => parse_date(raw),
    }
}

/// Longest numeric prefix, the way lenient client input is usually meant.
fn parse_leading_float(raw: &str) -> f64 {
    let trimmed = raw.trim();
    let mut end = 0;
    let mut seen_dot = false;
    for (i, c) in trimmed.char_indices() {
        match c {
            '+' | '-' if i == 0 => end = i + 1,
            '0'..='9' => end = i + 1,
            '.' if !seen_dot => {
                seen_dot = true;
                end = i + 1;
            }
            _ => break,
        }
    }
    trimmed[..end].parse().unwrap_or(f64::NAN)
}

fn parse_date(raw: &str) -> SqlValue {
    let trimmed = raw.trim();
    if let Ok(ts) = chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return SqlValue::Timestamp(ts);
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(ts) = date.and_hms_opt(0, 0, 0) {
            return SqlValue::Timestamp(ts);
        }
    }
    if let Ok(millis) = trimmed.parse::<i64>() {
        if let Some(ts) = chrono::DateTime::from_timestamp_millis(millis) {
            return SqlValue::Timestamp(ts.naive_utc());
        }
    }
    SqlValue::Null
}

/// Unquoted text of a value, for embedding inside a LIKE pattern.
fn plain_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Text(s) => s.clone(),
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) if f.is_finite() => f.to_string(),
        SqlValue::Bool(b) => b.to_string(),
        SqlValue::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => String::new(),
    }
}

/// Items with pagination metadata, from a paginated report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PagedReport {
    pub items: Vec<Record>,
    pub count: i64,
    pub limit: u64,
    pub page: u64,
    pub pages: u64,
}

/// Result of one report execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReportOutput {
    Rows(Vec<Record>),
    Paged(PagedReport),
}

impl<D: Driver> Database<D> {
    /// Execute a report against a view. A paginated request runs its
    /// count and data queries sequentially on one acquired connection.
    pub async fn report(
        &self,
        view: &View,
        request: &ReportRequest,
    ) -> Result<ReportOutput, PgError> {
        let plan = build_plan(view, request)?;
        let conn = self.driver().acquire().await?;

        if let Some(skip) = plan.skip {
            let take = plan.take.unwrap_or(1);
            let count_sql = format!("SELECT COUNT(1)::int4 AS count{}", plan.body);
            tracing::debug!(target: "pglayer::sql", sql = %count_sql);
            let rows = conn.query(&count_sql, &[]).await?;
            let count = rows
                .first()
                .and_then(|r| r.get("count"))
                .and_then(|v| v.as_i64())
                .unwrap_or(0);

            let data_sql = format!(
                "SELECT {}{}{} LIMIT {} OFFSET {}",
                plan.select, plan.body, plan.order, take, skip
            );
            tracing::debug!(target: "pglayer::sql", sql = %data_sql);
            let items = conn.query(&data_sql, &[]).await?;

            Ok(ReportOutput::Paged(PagedReport {
                items,
                count,
                limit: take,
                page: skip / take + 1,
                pages: (count.max(0) as u64).div_ceil(take),
            }))
        } else {
            let mut sql = format!("SELECT {}{}{}", plan.select, plan.body, plan.order);
            if let Some(take) = plan.take {
                sql.push_str(&format!(" LIMIT {take}"));
            }
            tracing::debug!(target: "pglayer::sql", sql = %sql);
            let items = conn.query(&sql, &[]).await?;
            Ok(ReportOutput::Rows(items))
        }
    }
}
