// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Typed per-kind settings payloads and their structural validation.
//!
//! Each node kind carries exactly one of these payloads. Validation is
//! structural only (required fields, value domains); it produces
//! `SettingsError { path, reason }` entries and never mutates the graph.
//! Semantic errors (a predicate referencing a missing column, say) are a
//! run-time concern and surface as node failures instead.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::node::NodeKind;
use crate::errors::SettingsError;
use crate::fingerprint::{canonical_bytes, CanonicalError, FileStamp};

/// File formats the read/output kinds understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Csv,
    Parquet,
    Json,
    Excel,
}

/// A column declaration for readers that carry an explicit schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub dtype: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualInputSettings {
    /// Raw rows as JSON objects; the embedder's transform turns them into
    /// a table.
    pub data: Vec<serde_json::Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadSettings {
    pub path: String,
    pub format: FileFormat,
    #[serde(default = "default_true")]
    pub has_headers: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    /// Declared schema; folded into the fingerprint so a schema edit
    /// invalidates downstream caches.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schema: Vec<ColumnSchema>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSettings {
    pub predicate: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectColumn {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename: Option<String>,
    #[serde(default = "default_true")]
    pub keep: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectSettings {
    pub columns: Vec<SelectColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortColumn {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSettings {
    pub by: Vec<SortColumn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggKind {
    Sum,
    Mean,
    Median,
    Min,
    Max,
    Count,
    First,
    Last,
    NUnique,
    Concat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub column: String,
    pub agg: AggKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupBySettings {
    pub group_columns: Vec<String>,
    pub aggregations: Vec<Aggregation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinHow {
    Inner,
    Left,
    Right,
    Outer,
    Semi,
    Anti,
    Cross,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSettings {
    pub how: JoinHow,
    #[serde(default)]
    pub left_on: Vec<String>,
    #[serde(default)]
    pub right_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CrossJoinSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnionMode {
    /// Align columns by name, filling gaps with nulls.
    #[default]
    Relaxed,
    /// Require identical schemas.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UnionSettings {
    #[serde(default)]
    pub mode: UnionMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotSettings {
    #[serde(default)]
    pub index_columns: Vec<String>,
    pub pivot_column: String,
    pub value_column: String,
    pub aggregations: Vec<AggKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnpivotSettings {
    #[serde(default)]
    pub index_columns: Vec<String>,
    /// Empty means every non-index column.
    #[serde(default)]
    pub value_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordIdSettings {
    #[serde(default = "default_record_id_column")]
    pub output_column: String,
    #[serde(default = "default_record_id_offset")]
    pub offset: i64,
    #[serde(default)]
    pub group_by: Vec<String>,
}

fn default_record_id_column() -> String {
    "record_id".to_string()
}

fn default_record_id_offset() -> i64 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaSettings {
    pub column: String,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolarsCodeSettings {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PythonScriptSettings {
    pub code: String,
    /// Kernel that hosts this script; artifact visibility is scoped to it.
    pub kernel_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    Overwrite,
    Append,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSettings {
    pub path: String,
    pub format: FileFormat,
    #[serde(default)]
    pub write_mode: WriteMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CacheSettings {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDefinedSettings {
    pub component: String,
    #[serde(default)]
    pub options: Value,
}

/// A node's settings payload, one variant per kind.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeSettings {
    ManualInput(ManualInputSettings),
    Read(ReadSettings),
    Filter(FilterSettings),
    Select(SelectSettings),
    Sort(SortSettings),
    GroupBy(GroupBySettings),
    Join(JoinSettings),
    CrossJoin(CrossJoinSettings),
    Union(UnionSettings),
    Pivot(PivotSettings),
    Unpivot(UnpivotSettings),
    RecordId(RecordIdSettings),
    Formula(FormulaSettings),
    PolarsCode(PolarsCodeSettings),
    PythonScript(PythonScriptSettings),
    Output(OutputSettings),
    Cache(CacheSettings),
    UserDefined(UserDefinedSettings),
}

impl NodeSettings {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeSettings::ManualInput(_) => NodeKind::ManualInput,
            NodeSettings::Read(_) => NodeKind::Read,
            NodeSettings::Filter(_) => NodeKind::Filter,
            NodeSettings::Select(_) => NodeKind::Select,
            NodeSettings::Sort(_) => NodeKind::Sort,
            NodeSettings::GroupBy(_) => NodeKind::GroupBy,
            NodeSettings::Join(_) => NodeKind::Join,
            NodeSettings::CrossJoin(_) => NodeKind::CrossJoin,
            NodeSettings::Union(_) => NodeKind::Union,
            NodeSettings::Pivot(_) => NodeKind::Pivot,
            NodeSettings::Unpivot(_) => NodeKind::Unpivot,
            NodeSettings::RecordId(_) => NodeKind::RecordId,
            NodeSettings::Formula(_) => NodeKind::Formula,
            NodeSettings::PolarsCode(_) => NodeKind::PolarsCode,
            NodeSettings::PythonScript(_) => NodeKind::PythonScript,
            NodeSettings::Output(_) => NodeKind::Output,
            NodeSettings::Cache(_) => NodeKind::Cache,
            NodeSettings::UserDefined(_) => NodeKind::UserDefined,
        }
    }

    /// Deserialize a raw payload for the given kind.
    ///
    /// Serde errors are reported as a single `SettingsError` rooted at the
    /// payload; domain checks run afterwards via [`NodeSettings::validate`].
    pub fn from_value(kind: NodeKind, value: Value) -> Result<Self, Vec<SettingsError>> {
        fn de<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, Vec<SettingsError>> {
            serde_json::from_value(value)
                .map_err(|e| vec![SettingsError::new("$", e.to_string())])
        }

        let settings = match kind {
            NodeKind::ManualInput => NodeSettings::ManualInput(de(value)?),
            NodeKind::Read => NodeSettings::Read(de(value)?),
            NodeKind::Filter => NodeSettings::Filter(de(value)?),
            NodeKind::Select => NodeSettings::Select(de(value)?),
            NodeKind::Sort => NodeSettings::Sort(de(value)?),
            NodeKind::GroupBy => NodeSettings::GroupBy(de(value)?),
            NodeKind::Join => NodeSettings::Join(de(value)?),
            NodeKind::CrossJoin => NodeSettings::CrossJoin(de(value)?),
            NodeKind::Union => NodeSettings::Union(de(value)?),
            NodeKind::Pivot => NodeSettings::Pivot(de(value)?),
            NodeKind::Unpivot => NodeSettings::Unpivot(de(value)?),
            NodeKind::RecordId => NodeSettings::RecordId(de(value)?),
            NodeKind::Formula => NodeSettings::Formula(de(value)?),
            NodeKind::PolarsCode => NodeSettings::PolarsCode(de(value)?),
            NodeKind::PythonScript => NodeSettings::PythonScript(de(value)?),
            NodeKind::Output => NodeSettings::Output(de(value)?),
            NodeKind::Cache => NodeSettings::Cache(de(value)?),
            NodeKind::UserDefined => NodeSettings::UserDefined(de(value)?),
        };

        let errors = settings.validate();
        if errors.is_empty() {
            Ok(settings)
        } else {
            Err(errors)
        }
    }

    /// Serialize back to the raw payload form used in flow files.
    pub fn to_value(&self) -> Value {
        match self {
            NodeSettings::ManualInput(s) => serde_json::to_value(s),
            NodeSettings::Read(s) => serde_json::to_value(s),
            NodeSettings::Filter(s) => serde_json::to_value(s),
            NodeSettings::Select(s) => serde_json::to_value(s),
            NodeSettings::Sort(s) => serde_json::to_value(s),
            NodeSettings::GroupBy(s) => serde_json::to_value(s),
            NodeSettings::Join(s) => serde_json::to_value(s),
            NodeSettings::CrossJoin(s) => serde_json::to_value(s),
            NodeSettings::Union(s) => serde_json::to_value(s),
            NodeSettings::Pivot(s) => serde_json::to_value(s),
            NodeSettings::Unpivot(s) => serde_json::to_value(s),
            NodeSettings::RecordId(s) => serde_json::to_value(s),
            NodeSettings::Formula(s) => serde_json::to_value(s),
            NodeSettings::PolarsCode(s) => serde_json::to_value(s),
            NodeSettings::PythonScript(s) => serde_json::to_value(s),
            NodeSettings::Output(s) => serde_json::to_value(s),
            NodeSettings::Cache(s) => serde_json::to_value(s),
            NodeSettings::UserDefined(s) => serde_json::to_value(s),
        }
        .unwrap_or(Value::Null)
    }

    /// Structural validation. Empty result means the payload is valid.
    pub fn validate(&self) -> Vec<SettingsError> {
        let mut errors = Vec::new();
        match self {
            NodeSettings::ManualInput(_) => {}
            NodeSettings::Read(s) => {
                require_non_empty(&mut errors, "read.path", &s.path);
                if let Some(delim) = &s.delimiter {
                    if delim.chars().count() != 1 {
                        errors.push(SettingsError::new(
                            "read.delimiter",
                            "must be a single character",
                        ));
                    }
                }
            }
            NodeSettings::Filter(s) => {
                require_non_empty(&mut errors, "filter.predicate", &s.predicate);
            }
            NodeSettings::Select(s) => {
                if s.columns.is_empty() {
                    errors.push(SettingsError::new("select.columns", "must not be empty"));
                }
                let mut seen = std::collections::HashSet::new();
                for (i, col) in s.columns.iter().enumerate() {
                    require_non_empty(&mut errors, format!("select.columns[{i}].name"), &col.name);
                    let out = col.rename.as_deref().unwrap_or(&col.name);
                    if col.keep && !seen.insert(out.to_string()) {
                        errors.push(SettingsError::new(
                            format!("select.columns[{i}]"),
                            format!("duplicate output column '{out}'"),
                        ));
                    }
                }
            }
            NodeSettings::Sort(s) => {
                if s.by.is_empty() {
                    errors.push(SettingsError::new("sort.by", "must not be empty"));
                }
                for (i, col) in s.by.iter().enumerate() {
                    require_non_empty(&mut errors, format!("sort.by[{i}].column"), &col.column);
                }
            }
            NodeSettings::GroupBy(s) => {
                if s.aggregations.is_empty() {
                    errors.push(SettingsError::new(
                        "group_by.aggregations",
                        "must not be empty",
                    ));
                }
                for (i, agg) in s.aggregations.iter().enumerate() {
                    require_non_empty(
                        &mut errors,
                        format!("group_by.aggregations[{i}].column"),
                        &agg.column,
                    );
                }
            }
            NodeSettings::Join(s) => {
                if s.how == JoinHow::Cross {
                    if !s.left_on.is_empty() || !s.right_on.is_empty() {
                        errors.push(SettingsError::new(
                            "join.how",
                            "cross join must not declare key columns",
                        ));
                    }
                } else {
                    if s.left_on.is_empty() {
                        errors.push(SettingsError::new("join.left_on", "must not be empty"));
                    }
                    if s.left_on.len() != s.right_on.len() {
                        errors.push(SettingsError::new(
                            "join.right_on",
                            format!(
                                "expected {} key column(s), got {}",
                                s.left_on.len(),
                                s.right_on.len()
                            ),
                        ));
                    }
                }
            }
            NodeSettings::CrossJoin(_) => {}
            NodeSettings::Union(_) => {}
            NodeSettings::Pivot(s) => {
                require_non_empty(&mut errors, "pivot.pivot_column", &s.pivot_column);
                require_non_empty(&mut errors, "pivot.value_column", &s.value_column);
                if s.aggregations.is_empty() {
                    errors.push(SettingsError::new("pivot.aggregations", "must not be empty"));
                }
            }
            NodeSettings::Unpivot(_) => {}
            NodeSettings::RecordId(s) => {
                require_non_empty(&mut errors, "record_id.output_column", &s.output_column);
            }
            NodeSettings::Formula(s) => {
                require_non_empty(&mut errors, "formula.column", &s.column);
                require_non_empty(&mut errors, "formula.expression", &s.expression);
            }
            NodeSettings::PolarsCode(s) => {
                require_non_empty(&mut errors, "polars_code.code", &s.code);
            }
            NodeSettings::PythonScript(s) => {
                require_non_empty(&mut errors, "python_script.code", &s.code);
                require_non_empty(&mut errors, "python_script.kernel_id", &s.kernel_id);
            }
            NodeSettings::Output(s) => {
                require_non_empty(&mut errors, "output.path", &s.path);
            }
            NodeSettings::Cache(_) => {}
            NodeSettings::UserDefined(s) => {
                require_non_empty(&mut errors, "user_defined.component", &s.component);
            }
        }
        errors
    }

    /// Canonical bytes folded into the node fingerprint.
    ///
    /// Root kinds additionally fold live file metadata so an external file
    /// change invalidates the chain on the next fingerprint recompute.
    pub fn fingerprint_bytes(&self) -> Result<Vec<u8>, CanonicalError> {
        let mut payload = self.to_value();
        if let NodeSettings::Read(s) = self {
            let stamp = FileStamp::from_path(&s.path)
                .map(|s| s.to_key())
                .unwrap_or_else(|| format!("{}:missing", s.path));
            if let Value::Object(map) = &mut payload {
                map.insert("__file".to_string(), Value::String(stamp));
            }
        }
        canonical_bytes(&payload)
    }
}

fn require_non_empty(
    errors: &mut Vec<SettingsError>,
    path: impl Into<String>,
    value: &str,
) {
    if value.trim().is_empty() {
        errors.push(SettingsError::new(path, "must not be empty"));
    }
}
