//! Mutation payload parsing and compilation.
//!
//! Payload keys carry a one-character prefix selecting a mutation mode
//! (`+score` increments, `!active` toggles, `=created` inlines raw SQL on
//! insert, ...). The prefix is parsed exactly once at the boundary into an
//! [`Assignment`]; the compilers below dispatch on the mode enum instead of
//! re-slicing strings.

use super::value::SqlValue;

/// How a payload field mutates its column.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignMode {
    /// Ordinary parameterized assignment.
    Set,
    /// `+ - * /`: arithmetic against the current value on update
    /// (`COALESCE(col,0) <op> $n`), plain value on insert.
    Arith(char),
    /// `>` / `<`: `GREATEST(col,$n)` / `LEAST(col,$n)` on update, plain
    /// value on insert.
    Clamp(char),
    /// `!`: `NOT col` on update, literal `FALSE` on insert.
    Toggle,
    /// `=`: raw SQL inlined verbatim, insert-only.
    RawInsert,
    /// `#`: raw SQL inlined verbatim, update-only.
    RawUpdate,
}

/// A parsed payload entry: plain column name, mode, and value.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub mode: AssignMode,
    pub value: SqlValue,
}

/// Parse raw payload entries. Absent values are dropped here, so an entry
/// that survives always contributes to the statement.
pub fn parse_payload(payload: &[(String, SqlValue)]) -> Vec<Assignment> {
    let mut out = Vec::with_capacity(payload.len());
    for (key, value) in payload {
        if value.is_absent() {
            continue;
        }
        let (column, mode) = parse_key(key);
        out.push(Assignment {
            column: column.to_string(),
            mode,
            value: value.clone(),
        });
    }
    out
}

fn parse_key(key: &str) -> (&str, AssignMode) {
    let mut chars = key.chars();
    let mode = match chars.next() {
        Some(c @ ('+' | '-' | '*' | '/')) if key.len() > 1 => AssignMode::Arith(c),
        Some(c @ ('>' | '<')) if key.len() > 1 => AssignMode::Clamp(c),
        Some('!') if key.len() > 1 => AssignMode::Toggle,
        Some('=') if key.len() > 1 => AssignMode::RawInsert,
        Some('#') if key.len() > 1 => AssignMode::RawUpdate,
        _ => return (key, AssignMode::Set),
    };
    (chars.as_str(), mode)
}

#[derive(Debug, Default)]
pub struct InsertParts {
    pub columns: Vec<String>,
    pub values: Vec<String>,
    pub params: Vec<SqlValue>,
}

/// Compile assignments into INSERT column/value lists plus parameters.
pub fn compile_insert(assignments: &[Assignment]) -> InsertParts {
    let mut parts = InsertParts::default();
    for a in assignments {
        match &a.mode {
            AssignMode::Set => {
                parts.params.push(a.value.clone());
                parts.columns.push(quote(&a.column));
                parts.values.push(format!("${}", parts.params.len()));
            }
            AssignMode::Arith(_) | AssignMode::Clamp(_) => {
                parts.params.push(zero_if_null(&a.value));
                parts.columns.push(quote(&a.column));
                parts.values.push(format!("${}", parts.params.len()));
            }
            AssignMode::Toggle => {
                parts.columns.push(quote(&a.column));
                parts.values.push("FALSE".to_string());
            }
            AssignMode::RawInsert => {
                parts.columns.push(quote(&a.column));
                parts.values.push(raw_text(&a.value));
            }
            AssignMode::RawUpdate => {}
        }
    }
    parts
}

#[derive(Debug, Default)]
pub struct UpdateParts {
    pub assignments: Vec<String>,
    pub params: Vec<SqlValue>,
}

/// Compile assignments into an UPDATE SET list plus parameters.
pub fn compile_update(assignments: &[Assignment]) -> UpdateParts {
    let mut parts = UpdateParts::default();
    for a in assignments {
        let col = quote(&a.column);
        match &a.mode {
            AssignMode::Set => {
                parts.params.push(a.value.clone());
                parts
                    .assignments
                    .push(format!("{}=${}", col, parts.params.len()));
            }
            AssignMode::Arith(op) => {
                parts.params.push(zero_if_null(&a.value));
                parts.assignments.push(format!(
                    "{}=COALESCE({},0){}${}",
                    col,
                    col,
                    op,
                    parts.params.len()
                ));
            }
            AssignMode::Clamp(op) => {
                parts.params.push(zero_if_null(&a.value));
                let func = if *op == '>' { "GREATEST" } else { "LEAST" };
                parts.assignments.push(format!(
                    "{}={}({},${})",
                    col,
                    func,
                    col,
                    parts.params.len()
                ));
            }
            AssignMode::Toggle => {
                parts.assignments.push(format!("{col}=NOT {col}"));
            }
            AssignMode::RawUpdate => {
                parts.assignments.push(format!("{}={}", col, raw_text(&a.value)));
            }
            AssignMode::RawInsert => {}
        }
    }
    parts
}

fn quote(column: &str) -> String {
    format!("\"{column}\"")
}

fn zero_if_null(value: &SqlValue) -> SqlValue {
    if value.is_null() {
        SqlValue::Int(0)
    } else {
        value.clone()
    }
}

/// Verbatim text for the raw-SQL modes. No escaping happens here; the
/// caller owns the content.
fn raw_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Text(s) => s.clone(),
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) => f.to_string(),
        SqlValue::Bool(b) => b.to_string(),
        SqlValue::Null | SqlValue::Absent => "null".to_string(),
        other => other.clone().into_json().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(entries: &[(&str, SqlValue)]) -> Vec<(String, SqlValue)> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_parse_strips_prefixes() {
        let parsed = parse_payload(&payload(&[
            ("name", SqlValue::from("a")),
            ("+score", SqlValue::Int(5)),
            (">best", SqlValue::Int(10)),
            ("!active", SqlValue::Bool(true)),
            ("=created", SqlValue::from("NOW()")),
            ("#updated", SqlValue::from("NOW()")),
        ]));
        assert_eq!(parsed.len(), 6);
        assert_eq!(parsed[0].mode, AssignMode::Set);
        assert_eq!(parsed[1].column, "score");
        assert_eq!(parsed[1].mode, AssignMode::Arith('+'));
        assert_eq!(parsed[2].mode, AssignMode::Clamp('>'));
        assert_eq!(parsed[3].mode, AssignMode::Toggle);
        assert_eq!(parsed[4].mode, AssignMode::RawInsert);
        assert_eq!(parsed[5].mode, AssignMode::RawUpdate);
    }

    #[test]
    fn test_absent_values_are_skipped() {
        let parsed = parse_payload(&payload(&[
            ("kept", SqlValue::Int(1)),
            ("skipped", SqlValue::Absent),
        ]));
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].column, "kept");
    }

    #[test]
    fn test_single_char_key_is_ordinary() {
        let parsed = parse_payload(&payload(&[("+", SqlValue::Int(1))]));
        assert_eq!(parsed[0].column, "+");
        assert_eq!(parsed[0].mode, AssignMode::Set);
    }

    #[test]
    fn test_insert_arith_is_plain_value() {
        let parsed = parse_payload(&payload(&[("+score", SqlValue::Int(5))]));
        let parts = compile_insert(&parsed);
        assert_eq!(parts.columns, vec!["\"score\""]);
        assert_eq!(parts.values, vec!["$1"]);
        assert_eq!(parts.params, vec![SqlValue::Int(5)]);
    }

    #[test]
    fn test_update_arith_coalesces() {
        let parsed = parse_payload(&payload(&[("+score", SqlValue::Int(5))]));
        let parts = compile_update(&parsed);
        assert_eq!(
            parts.assignments,
            vec!["\"score\"=COALESCE(\"score\",0)+$1"]
        );
        assert_eq!(parts.params, vec![SqlValue::Int(5)]);
    }

    #[test]
    fn test_update_clamp() {
        let parsed = parse_payload(&payload(&[
            (">best", SqlValue::Int(10)),
            ("<floor", SqlValue::Int(2)),
        ]));
        let parts = compile_update(&parsed);
        assert_eq!(
            parts.assignments,
            vec![
                "\"best\"=GREATEST(\"best\",$1)",
                "\"floor\"=LEAST(\"floor\",$2)"
            ]
        );
    }

    #[test]
    fn test_toggle_has_no_parameter() {
        let parsed = parse_payload(&payload(&[("!active", SqlValue::Null)]));
        let insert = compile_insert(&parsed);
        assert_eq!(insert.values, vec!["FALSE"]);
        assert!(insert.params.is_empty());

        let update = compile_update(&parsed);
        assert_eq!(update.assignments, vec!["\"active\"=NOT \"active\""]);
        assert!(update.params.is_empty());
    }

    #[test]
    fn test_raw_insert_only_applies_on_insert() {
        let parsed = parse_payload(&payload(&[("=created", SqlValue::from("NOW()"))]));
        let insert = compile_insert(&parsed);
        assert_eq!(insert.columns, vec!["\"created\""]);
        assert_eq!(insert.values, vec!["NOW()"]);
        assert!(insert.params.is_empty());

        let update = compile_update(&parsed);
        assert!(update.assignments.is_empty());
    }

    #[test]
    fn test_raw_update_only_applies_on_update() {
        let parsed = parse_payload(&payload(&[("#updated", SqlValue::from("NOW()"))]));
        let update = compile_update(&parsed);
        assert_eq!(update.assignments, vec!["\"updated\"=NOW()"]);
        assert!(update.params.is_empty());

        let insert = compile_insert(&parsed);
        assert!(insert.columns.is_empty());
    }

    #[test]
    fn test_null_arith_operand_becomes_zero() {
        let parsed = parse_payload(&payload(&[("+score", SqlValue::Null)]));
        let parts = compile_update(&parsed);
        assert_eq!(parts.params, vec![SqlValue::Int(0)]);
    }

    #[test]
    fn test_parameter_numbering_is_positional() {
        let parsed = parse_payload(&payload(&[
            ("a", SqlValue::Int(1)),
            ("!flag", SqlValue::Null),
            ("b", SqlValue::Int(2)),
        ]));
        let parts = compile_update(&parsed);
        assert_eq!(
            parts.assignments,
            vec!["\"a\"=$1", "\"flag\"=NOT \"flag\"", "\"b\"=$2"]
        );
        assert_eq!(parts.params.len(), 2);
    }
}
