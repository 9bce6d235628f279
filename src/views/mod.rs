//! Reportable view catalogs.
//!
//! A view names a FROM clause, a set of reportable fields, and the
//! relations that always join in. Clients build ad-hoc aggregate reports
//! against a view through [`report::ReportRequest`]; the catalog is the
//! whitelist that keeps those requests inside known columns.

pub mod report;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

pub use report::{ReportOutput, ReportRequest};

/// Data type of a reportable field, used to coerce client-supplied filter
/// values before escaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Boolean,
    Number,
    Date,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewField {
    pub id: String,
    /// Column or SQL expression the field projects.
    pub column: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub alias: Option<String>,
}

impl ViewField {
    /// `AS` suffix when the field carries an alias.
    pub(crate) fn alias_suffix(&self) -> String {
        match &self.alias {
            Some(alias) => format!(" AS {alias}"),
            None => String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    fn as_sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL JOIN",
        }
    }
}

/// A relation joined into every report over the view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewRelation {
    /// Target table.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: JoinKind,
    /// Join condition text.
    pub on: String,
}

impl ViewRelation {
    pub(crate) fn join_clause(&self) -> String {
        format!("{} {} ON {}", self.kind.as_sql(), self.id, self.on)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    pub fields: Vec<ViewField>,
    #[serde(default)]
    pub relations: Vec<ViewRelation>,
    /// FROM clause body (table name, optionally aliased).
    pub from: String,
}

/// Catalog summary safe to hand to clients: display metadata only, no
/// column or SQL internals.
#[derive(Debug, Clone, Serialize)]
pub struct ViewSummary {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub fields: Vec<FieldSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldSummary {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    pub color: Option<String>,
    #[serde(rename = "type")]
    pub kind: FieldKind,
}

/// A registered view: its definition plus the derived field index.
#[derive(Debug)]
pub struct View {
    def: ViewDefinition,
    index: HashMap<String, usize>,
}

impl View {
    pub fn new(def: ViewDefinition) -> Self {
        let index = def
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.id.clone(), i))
            .collect();
        View { def, index }
    }

    pub fn definition(&self) -> &ViewDefinition {
        &self.def
    }

    pub fn field(&self, id: &str) -> Option<&ViewField> {
        self.index.get(id).map(|&i| &self.def.fields[i])
    }

    pub fn export(&self) -> ViewSummary {
        ViewSummary {
            id: self.def.id.clone(),
            name: self.def.name.clone(),
            icon: self.def.icon.clone(),
            color: self.def.color.clone(),
            fields: self
                .def
                .fields
                .iter()
                .map(|f| FieldSummary {
                    id: f.id.clone(),
                    name: f.name.clone(),
                    icon: f.icon.clone(),
                    color: f.color.clone(),
                    kind: f.kind,
                })
                .collect(),
        }
    }
}

/// Process-wide registry of views, keyed by id.
#[derive(Debug, Default)]
pub struct ViewRegistry {
    views: RwLock<HashMap<String, Arc<View>>>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a view by id. Replacing rebuilds the derived
    /// field index.
    pub fn upsert(&self, def: ViewDefinition) -> Arc<View> {
        let view = Arc::new(View::new(def));
        let mut views = self.views.write().expect("view registry poisoned");
        views.insert(view.def.id.clone(), view.clone());
        view
    }

    pub fn read(&self, id: &str) -> Option<Arc<View>> {
        self.views
            .read()
            .expect("view registry poisoned")
            .get(id)
            .cloned()
    }

    /// Remove a view; its derived index goes with it.
    pub fn remove(&self, id: &str) -> bool {
        self.views
            .write()
            .expect("view registry poisoned")
            .remove(id)
            .is_some()
    }

    /// Client-facing catalog export.
    pub fn export(&self) -> Vec<ViewSummary> {
        let views = self.views.read().expect("view registry poisoned");
        let mut out: Vec<ViewSummary> = views.values().map(|v| v.export()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn len(&self) -> usize {
        self.views.read().expect("view registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub(crate) fn sample_view() -> View {
    View::new(
        serde_json::from_value(serde_json::json!({
            "id": "orders",
            "name": "Orders",
            "from": "orders o",
            "fields": [
                { "id": "region", "column": "o.region", "name": "Region", "type": "string" },
                { "id": "amount", "column": "o.amount", "name": "Amount", "type": "number" },
                { "id": "paid", "column": "o.paid", "name": "Paid", "type": "boolean" },
                { "id": "created", "column": "o.created", "name": "Created", "type": "date",
                  "alias": "created_at" }
            ],
            "relations": [
                { "id": "customers c", "type": "left", "on": "c.id = o.customer_id" }
            ]
        }))
        .unwrap(),
    )
}
