/// Query description and SQL compilation.
///
/// The compilation pipeline:
///
/// ```text
/// Caller intent (QueryBuilder)
///       ↓
/// QueryIntent              (builder.rs)
///       ↓
/// Filter/field resolution  (filter.rs, fields.rs, payload.rs)
///       ↓
/// SQL + parameters         (compiler.rs)
///       ↓
/// Execution                (db/ module)
/// ```
///
/// Filter literals are inlined through the escaper in `value.rs`; write
/// payload values become positional `$n` parameters. Compiled projection
/// and ORDER BY fragments are memoized in the `FragmentCache`.
pub mod builder;
pub mod compiler;
pub mod fields;
pub mod filter;
pub mod payload;
pub mod value;

// Re-export key types for convenience
pub use builder::{Intent, QueryBuilder, QueryIntent, ScalarKind, ScalarSpec};
pub use compiler::{compile, compile_as, CompiledQuery};
pub use fields::{resolve_field, FieldContext, FragmentCache, FragmentKind, LANG_MARKER};
pub use filter::{compile_filter, CompareOp, DateField, FilterNode, SearchAnchor};
pub use payload::{parse_payload, AssignMode, Assignment};
pub use value::{escape, SqlValue};
