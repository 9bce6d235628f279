//! Intent → SQL compilation.
//!
//! [`compile`] turns a [`QueryIntent`] into final statement text plus a
//! positional parameter list. Write payload values travel as `$n`
//! parameters; filter literals are inlined through the escaper. Malformed
//! intents fail here, before any connection is touched.

use crate::error::CompileError;

use super::builder::{Intent, QueryIntent, ScalarKind};
use super::fields::{resolve_field, FieldContext, FragmentCache, FragmentKind};
use super::filter::compile_filter;
use super::payload::{compile_insert, compile_update, parse_payload};
use super::value::SqlValue;

/// A compiled statement. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl CompiledQuery {
    fn text(sql: String) -> Self {
        CompiledQuery {
            sql,
            params: Vec::new(),
        }
    }
}

/// Compile an intent into SQL using its own intent kind.
pub fn compile(intent: &QueryIntent, cache: &FragmentCache) -> Result<CompiledQuery, CompileError> {
    compile_as(intent, intent.intent, cache)
}

/// Compile an intent as a different kind; `List` pairs its data query with
/// a `Count` compile over the same filter this way.
pub fn compile_as(
    intent: &QueryIntent,
    kind: Intent,
    cache: &FragmentCache,
) -> Result<CompiledQuery, CompileError> {
    let language = intent.language.as_deref();
    let where_text = compile_filter(&intent.filter, language);

    let mut compiled = match kind {
        Intent::Find | Intent::List => {
            let table = table_of(intent)?;
            let fields = projection(intent, cache);
            CompiledQuery::text(format!(
                "SELECT {} FROM {}{}",
                fields,
                table,
                where_clause(&where_text)
            ))
        }
        Intent::Count => {
            let table = table_of(intent)?;
            CompiledQuery::text(format!(
                "SELECT COUNT(1)::int AS count FROM {}{}",
                table,
                where_clause(&where_text)
            ))
        }
        Intent::Check => {
            let table = table_of(intent)?;
            CompiledQuery::text(format!(
                "SELECT 1 AS count FROM {}{}",
                table,
                where_clause(&where_text)
            ))
        }
        Intent::Scalar => compile_scalar(intent, &where_text)?,
        Intent::Insert => {
            let table = table_of(intent)?;
            let parts = compile_insert(&parse_payload(&intent.payload));
            if parts.columns.is_empty() {
                return Err(CompileError::EmptyPayload);
            }
            let mut sql = format!(
                "INSERT INTO {} ({}) VALUES({})",
                table,
                parts.columns.join(","),
                parts.values.join(",")
            );
            sql.push_str(&returning_clause(intent));
            CompiledQuery {
                sql,
                params: parts.params,
            }
        }
        Intent::Update => {
            let table = table_of(intent)?;
            let parts = compile_update(&parse_payload(&intent.payload));
            if parts.assignments.is_empty() {
                return Err(CompileError::EmptyPayload);
            }
            let body = format!(
                "UPDATE {} SET {}{}",
                table,
                parts.assignments.join(","),
                where_clause(&where_text)
            );
            let sql = if intent.returning.is_empty() {
                // Uniform affected-row count regardless of what the
                // statement touched.
                format!("WITH rows AS ({body} RETURNING 1) SELECT COUNT(1)::int AS count FROM rows")
            } else {
                format!("{}{}", body, returning_clause(intent))
            };
            CompiledQuery {
                sql,
                params: parts.params,
            }
        }
        Intent::Remove => {
            let table = table_of(intent)?;
            let mut sql = format!("DELETE FROM {}{}", table, where_clause(&where_text));
            sql.push_str(&returning_clause(intent));
            CompiledQuery::text(sql)
        }
        Intent::Drop => CompiledQuery::text(format!("DROP TABLE {}", table_of(intent)?)),
        Intent::Truncate => CompiledQuery::text(format!(
            "TRUNCATE TABLE {} RESTART IDENTITY",
            table_of(intent)?
        )),
        Intent::Command => {
            let sql = intent
                .raw_sql
                .clone()
                .ok_or(CompileError::MissingRawSql)?;
            CompiledQuery {
                sql,
                params: intent.raw_params.clone(),
            }
        }
        Intent::RawQuery => {
            let raw = intent
                .raw_sql
                .as_deref()
                .ok_or(CompileError::MissingRawSql)?;
            let sql = if raw.contains("{where}") {
                let cond = if where_text.is_empty() {
                    "1=1"
                } else {
                    where_text.as_str()
                };
                raw.replace("{where}", cond)
            } else {
                format!("{}{}", raw, where_clause(&where_text))
            };
            CompiledQuery {
                sql,
                params: intent.raw_params.clone(),
            }
        }
    };

    if is_read_shape(kind) {
        let order = order_clause(intent, cache);
        compiled.sql.push_str(&order);
        compiled.sql.push_str(&paging_clause(intent));
    }

    Ok(compiled)
}

/// Sort and pagination apply only to row-returning shapes.
fn is_read_shape(kind: Intent) -> bool {
    matches!(
        kind,
        Intent::Find | Intent::List | Intent::Check | Intent::RawQuery
    )
}

fn table_of(intent: &QueryIntent) -> Result<&str, CompileError> {
    if intent.table.is_empty() {
        return Err(CompileError::MissingTable);
    }
    Ok(&intent.table)
}

/// Build the `RETURNING` clause for a mutation. An explicit returning list
/// wins; otherwise an insert's named primary key returns itself. Empty when
/// neither is present.
fn returning_clause(intent: &QueryIntent) -> String {
    if !intent.returning.is_empty() {
        let cols = intent
            .returning
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(",");
        format!(" RETURNING {cols}")
    } else if let Some(pk) = &intent.primary_key {
        format!(" RETURNING \"{pk}\"")
    } else {
        String::new()
    }
}

fn where_clause(where_text: &str) -> String {
    if where_text.is_empty() {
        String::new()
    } else {
        format!(" WHERE {where_text}")
    }
}

fn projection(intent: &QueryIntent, cache: &FragmentCache) -> String {
    if intent.fields.is_empty() {
        return "*".to_string();
    }
    let source = intent.fields.join(",");
    cache.compute_or_get(
        FragmentKind::Fields,
        intent.language.as_deref(),
        &source,
        || {
            intent
                .fields
                .iter()
                .map(|f| resolve_field(f, intent.language.as_deref(), FieldContext::Projection))
                .collect::<Vec<_>>()
                .join(",")
        },
    )
}

fn order_clause(intent: &QueryIntent, cache: &FragmentCache) -> String {
    if intent.sort.is_empty() {
        return String::new();
    }
    let source = intent.sort.join(",");
    cache.compute_or_get(
        FragmentKind::Sort,
        intent.language.as_deref(),
        &source,
        || {
            let items: Vec<String> = intent
                .sort
                .iter()
                .map(|token| {
                    let (field, dir) = split_sort_token(token);
                    format!(
                        "{} {}",
                        resolve_field(field, intent.language.as_deref(), FieldContext::Reference),
                        dir
                    )
                })
                .collect();
            format!(" ORDER BY {}", items.join(", "))
        },
    )
}

/// Split a sort token on its trailing direction suffix. A token with no
/// recognized suffix sorts ascending under its full name.
fn split_sort_token(token: &str) -> (&str, &'static str) {
    if let Some((field, suffix)) = token.rsplit_once('_') {
        if suffix.eq_ignore_ascii_case("desc") {
            return (field, "DESC");
        }
        if suffix.eq_ignore_ascii_case("asc") {
            return (field, "ASC");
        }
    }
    (token, "ASC")
}

fn paging_clause(intent: &QueryIntent) -> String {
    match (intent.take, intent.skip) {
        (Some(take), Some(skip)) => format!(" LIMIT {take} OFFSET {skip}"),
        (Some(take), None) => format!(" LIMIT {take}"),
        (None, Some(skip)) => format!(" OFFSET {skip}"),
        (None, None) => String::new(),
    }
}

fn compile_scalar(intent: &QueryIntent, where_text: &str) -> Result<CompiledQuery, CompileError> {
    let table = table_of(intent)?;
    let spec = intent.scalar.as_ref().ok_or(CompileError::MissingScalarKey)?;
    let language = intent.language.as_deref();

    let sql = match spec.kind {
        ScalarKind::Group => {
            if spec.key.is_empty() {
                return Err(CompileError::MissingScalarKey);
            }
            let key = resolve_field(&spec.key, language, FieldContext::Reference);
            let agg = match &spec.key2 {
                Some(key2) => format!(
                    "SUM({})::numeric",
                    resolve_field(key2, language, FieldContext::Reference)
                ),
                None => "COUNT(1)::int".to_string(),
            };
            format!(
                "SELECT {}, {} AS value FROM {}{} GROUP BY {}",
                key,
                agg,
                table,
                where_clause(where_text),
                key
            )
        }
        kind => {
            let agg = if kind == ScalarKind::Count || spec.key == "*" {
                format!("{}(1)", kind.as_sql())
            } else {
                format!(
                    "{}({})",
                    kind.as_sql(),
                    resolve_field(&spec.key, language, FieldContext::Reference)
                )
            };
            format!(
                "SELECT {}::numeric AS value FROM {}{}",
                agg,
                table,
                where_clause(where_text)
            )
        }
    };

    Ok(CompiledQuery::text(sql))
}
