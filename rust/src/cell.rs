//! Field and field-array cells and their identities.

use crate::ids::RowId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use ts_rs::TS;

/// `{ values, extraInfos }` pair handed to validators, submit callbacks and watchers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormValues {
    pub values: Value,
    pub extra_infos: Value,
}

impl Default for FormValues {
    fn default() -> Self {
        Self {
            values: Value::Object(Map::new()),
            extra_infos: Value::Object(Map::new()),
        }
    }
}

/// Per-field validator: `(value, dependency values) -> error`.
///
/// `None` or an empty string means valid.
pub type FieldValidator = Rc<dyn Fn(Option<&Value>, &FormValues) -> Option<String>>;

/// Whole-array validator, called with the assembled row data.
pub type ArrayValidator = Rc<dyn Fn(&[Value]) -> Option<String>>;

pub(crate) fn non_empty(error: Option<String>) -> Option<String> {
    error.filter(|e| !e.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "kebab-case")]
pub enum FieldKind {
    #[default]
    Field,
    FieldArray,
}

/// One enclosing field array and the row the cell lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct Ancestor {
    pub name: String,
    pub row_id: RowId,
}

impl Ancestor {
    pub fn new(name: impl Into<String>, row_id: RowId) -> Self {
        Self {
            name: name.into(),
            row_id,
        }
    }
}

/// Identity of a cell inside one form instance. The kind is implied by which
/// map of the registry the key lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CellKey {
    pub name: String,
    pub ancestors: Vec<Ancestor>,
}

impl CellKey {
    pub fn new(name: impl Into<String>, ancestors: Vec<Ancestor>) -> Self {
        Self {
            name: name.into(),
            ancestors,
        }
    }

    pub fn top_level(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn is_top_level(&self) -> bool {
        self.ancestors.is_empty()
    }

    /// Ancestor chain for the children of row `row_id` when `self` is a field array.
    pub fn row_ancestors(&self, row_id: RowId) -> Vec<Ancestor> {
        let mut ancestors = Vec::with_capacity(self.ancestors.len() + 1);
        ancestors.extend(self.ancestors.iter().cloned());
        ancestors.push(Ancestor::new(self.name.clone(), row_id));
        ancestors
    }

    /// Key of child `name` inside row `row_id` of the field array `self`.
    pub fn child(&self, name: &str, row_id: RowId) -> CellKey {
        CellKey::new(name, self.row_ancestors(row_id))
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ancestor in &self.ancestors {
            write!(f, "{}{{{}}}/", ancestor.name, ancestor.row_id)?;
        }
        f.write_str(&self.name)
    }
}

/// A typed reference to a field or field array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct FieldRef {
    pub name: String,
    #[serde(default)]
    pub ancestors: Vec<Ancestor>,
    #[serde(rename = "type", default)]
    pub kind: FieldKind,
}

impl FieldRef {
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ancestors: Vec::new(),
            kind: FieldKind::Field,
        }
    }

    pub fn field_array(name: impl Into<String>) -> Self {
        Self {
            kind: FieldKind::FieldArray,
            ..Self::field(name)
        }
    }

    pub fn within(mut self, ancestors: Vec<Ancestor>) -> Self {
        self.ancestors = ancestors;
        self
    }

    pub fn key(&self) -> CellKey {
        CellKey::new(self.name.clone(), self.ancestors.clone())
    }
}

impl From<&str> for FieldRef {
    fn from(name: &str) -> Self {
        FieldRef::field(name)
    }
}

/// Declared child of a field array. Nested arrays carry their own children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FieldDeclRepr", into = "FieldDeclRepr")]
pub enum FieldDecl {
    Field(String),
    FieldArray {
        name: String,
        field_names: Vec<FieldDecl>,
    },
}

impl FieldDecl {
    pub fn field(name: impl Into<String>) -> Self {
        FieldDecl::Field(name.into())
    }

    pub fn field_array(name: impl Into<String>, field_names: Vec<FieldDecl>) -> Self {
        FieldDecl::FieldArray {
            name: name.into(),
            field_names,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FieldDecl::Field(name) | FieldDecl::FieldArray { name, .. } => name,
        }
    }
}

impl From<&str> for FieldDecl {
    fn from(name: &str) -> Self {
        FieldDecl::Field(name.to_owned())
    }
}

/// Wire shape: a bare string or `{ name, type, fieldNames? }`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FieldDeclRepr {
    Name(String),
    Typed {
        name: String,
        #[serde(rename = "type")]
        kind: FieldKind,
        #[serde(rename = "fieldNames", default, skip_serializing_if = "Vec::is_empty")]
        field_names: Vec<FieldDecl>,
    },
}

impl From<FieldDeclRepr> for FieldDecl {
    fn from(repr: FieldDeclRepr) -> Self {
        match repr {
            FieldDeclRepr::Name(name) => FieldDecl::Field(name),
            FieldDeclRepr::Typed {
                name,
                kind: FieldKind::Field,
                ..
            } => FieldDecl::Field(name),
            FieldDeclRepr::Typed {
                name,
                kind: FieldKind::FieldArray,
                field_names,
            } => FieldDecl::FieldArray { name, field_names },
        }
    }
}

impl From<FieldDecl> for FieldDeclRepr {
    fn from(decl: FieldDecl) -> Self {
        match decl {
            FieldDecl::Field(name) => FieldDeclRepr::Name(name),
            FieldDecl::FieldArray { name, field_names } => FieldDeclRepr::Typed {
                name,
                kind: FieldKind::FieldArray,
                field_names,
            },
        }
    }
}

/// State of one leaf input.
#[derive(Clone, Default)]
pub struct FieldCell {
    /// `None` is an undefined value; `Some(Value::Null)` is an explicit null.
    pub data: Option<Value>,
    pub extra_info: Option<Value>,
    pub error: Option<String>,
    pub touched: bool,
    pub validate: Option<FieldValidator>,
    /// Initial-values version this cell was last seeded from.
    pub init_ver: u64,
}

impl fmt::Debug for FieldCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldCell")
            .field("data", &self.data)
            .field("extra_info", &self.extra_info)
            .field("error", &self.error)
            .field("touched", &self.touched)
            .field("validate", &self.validate.as_ref().map(|_| "<fn>"))
            .field("init_ver", &self.init_ver)
            .finish()
    }
}

/// State of one repeatable group.
#[derive(Clone, Default)]
pub struct FieldArrayCell {
    /// Live rows in display order. Membership is existence.
    pub row_ids: Vec<RowId>,
    pub field_names: Vec<FieldDecl>,
    pub error: Option<String>,
    pub validate: Option<ArrayValidator>,
    pub init_ver: u64,
    pub skip_unregister: bool,
    /// Ids handed out earlier and removed since; never allocated again.
    pub retired_row_ids: HashSet<RowId>,
}

impl FieldArrayCell {
    pub fn row_index(&self, row_id: RowId) -> Option<usize> {
        self.row_ids.iter().position(|id| *id == row_id)
    }
}

impl fmt::Debug for FieldArrayCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldArrayCell")
            .field("row_ids", &self.row_ids)
            .field("field_names", &self.field_names)
            .field("error", &self.error)
            .field("validate", &self.validate.as_ref().map(|_| "<fn>"))
            .field("init_ver", &self.init_ver)
            .field("skip_unregister", &self.skip_unregister)
            .finish()
    }
}

/// A validation failure for one field or field array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub error: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    pub ancestors: Vec<Ancestor>,
}

impl FieldError {
    pub fn key(&self) -> CellKey {
        CellKey::new(self.name.clone(), self.ancestors.clone())
    }
}
