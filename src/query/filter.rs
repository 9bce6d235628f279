//! Filter trees and their compilation into WHERE/HAVING text.
//!
//! A filter is a list of [`FilterNode`]s joined by AND, with OR expressed
//! through nested groups. Every operand is rendered through
//! [`escape`](super::value::escape); field names go through the resolver so
//! localized columns and raw expressions behave the same here as in
//! projections.

use super::fields::{resolve_field, FieldContext};
use super::value::{escape, SqlValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        }
    }

    /// Parse an operator token; `!=` normalizes to `<>`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "=" | "==" => Some(CompareOp::Eq),
            "<>" | "!=" => Some(CompareOp::Ne),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchAnchor {
    Begin,
    End,
    Contains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    Year,
    Month,
    Day,
    Hour,
    Minute,
}

impl DateField {
    fn as_sql(self) -> &'static str {
        match self {
            DateField::Year => "year",
            DateField::Month => "month",
            DateField::Day => "day",
            DateField::Hour => "hour",
            DateField::Minute => "minute",
        }
    }
}

/// One condition in a filter tree.
#[derive(Debug, Clone)]
pub enum FilterNode {
    Compare {
        field: String,
        op: CompareOp,
        value: SqlValue,
    },
    In {
        field: String,
        values: Vec<SqlValue>,
    },
    NotIn {
        field: String,
        values: Vec<SqlValue>,
    },
    /// `field <op> ARRAY[...]`, e.g. the `&&` overlap operator.
    ArrayOverlap {
        field: String,
        op: String,
        values: Vec<SqlValue>,
    },
    Between {
        field: String,
        low: SqlValue,
        high: SqlValue,
    },
    Search {
        field: String,
        pattern: String,
        anchor: SearchAnchor,
    },
    /// Non-empty text probe: `LENGTH(field::text)>0`.
    Contains { field: String },
    /// Null-or-empty probe.
    Empty { field: String },
    DatePart {
        field: String,
        part: DateField,
        op: CompareOp,
        value: SqlValue,
    },
    /// Verbatim SQL fragment, parenthesized as-is. The explicit escape
    /// hatch; never built from an ordinary value.
    Raw(String),
    /// Permission-array check: the field must overlap the allowed values.
    /// When `required` is false a null/empty field also passes. An owner
    /// column/value pair may be ORed in.
    Permit {
        field: String,
        values: Vec<SqlValue>,
        required: bool,
        owner: Option<(String, SqlValue)>,
    },
    /// OR-joined group of child conditions.
    Or(Vec<FilterNode>),
}

/// Compile a filter tree into a WHERE/HAVING fragment.
///
/// Returns an empty string for an empty tree; callers omit the clause
/// keyword entirely in that case.
pub fn compile_filter(nodes: &[FilterNode], language: Option<&str>) -> String {
    let mut parts = Vec::new();
    compile_into(&mut parts, nodes, language, "AND");
    parts.join(" ")
}

fn compile_into(parts: &mut Vec<String>, nodes: &[FilterNode], language: Option<&str>, op: &str) {
    for node in nodes {
        let fragment = compile_node(node, language);
        if !parts.is_empty() {
            parts.push(op.to_string());
        }
        parts.push(fragment);
    }
}

fn compile_node(node: &FilterNode, language: Option<&str>) -> String {
    let col = |name: &str| resolve_field(name, language, FieldContext::Reference);

    match node {
        FilterNode::Compare { field, op, value } => {
            if value.is_null() {
                let suffix = if *op == CompareOp::Eq {
                    " IS NULL"
                } else {
                    " IS NOT NULL"
                };
                format!("{}{}", col(field), suffix)
            } else {
                format!("{}{}{}", col(field), op.as_sql(), escape(value))
            }
        }
        FilterNode::In { field, values } => in_list(&col(field), values, false),
        FilterNode::NotIn { field, values } => in_list(&col(field), values, true),
        FilterNode::ArrayOverlap { field, op, values } => {
            format!(
                "({} {} {})",
                col(field),
                op,
                escape(&SqlValue::Array(values.clone()))
            )
        }
        FilterNode::Between { field, low, high } => {
            format!(
                "({} BETWEEN {} AND {})",
                col(field),
                escape(low),
                escape(high)
            )
        }
        FilterNode::Search {
            field,
            pattern,
            anchor,
        } => {
            let cleaned: String = pattern.chars().filter(|&c| c != '%').collect();
            let like = match anchor {
                SearchAnchor::Begin => format!("%{cleaned}"),
                SearchAnchor::End => format!("{cleaned}%"),
                SearchAnchor::Contains => format!("%{cleaned}%"),
            };
            format!("{} ILIKE {}", col(field), escape(&SqlValue::Text(like)))
        }
        FilterNode::Contains { field } => format!("LENGTH({}::text)>0", col(field)),
        FilterNode::Empty { field } => {
            let c = col(field);
            format!("({c} IS NULL OR LENGTH({c}::text)=0)")
        }
        FilterNode::DatePart {
            field,
            part,
            op,
            value,
        } => {
            format!(
                "EXTRACT({} FROM {}){}{}",
                part.as_sql(),
                col(field),
                op.as_sql(),
                escape(value)
            )
        }
        FilterNode::Raw(sql) => format!("({sql})"),
        FilterNode::Permit {
            field,
            values,
            required,
            owner,
        } => {
            let c = col(field);
            let overlap = format!("{} && {}", c, escape(&SqlValue::Array(values.clone())));
            let mut alts = Vec::new();
            if !*required {
                alts.push(format!("{c} IS NULL"));
            }
            alts.push(overlap);
            if let Some((owner_field, owner_value)) = owner {
                alts.push(format!("{}={}", col(owner_field), escape(owner_value)));
            }
            format!("({})", alts.join(" OR "))
        }
        FilterNode::Or(children) => {
            let mut inner = Vec::new();
            compile_into(&mut inner, children, language, "OR");
            format!("({})", inner.join(" "))
        }
    }
}

fn in_list(column: &str, values: &[SqlValue], negated: bool) -> String {
    let mut items: Vec<String> = values
        .iter()
        .filter(|v| !v.is_null() && !v.is_absent())
        .map(escape)
        .collect();
    if items.is_empty() {
        items.push("null".to_string());
    }
    let keyword = if negated { " NOT IN " } else { " IN " };
    format!("{}{}({})", column, keyword, items.join(","))
}
