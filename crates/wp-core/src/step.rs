//! Migration step documents.
//!
//! A step file is a multi-document YAML stream. Every document describes one
//! versioned step and is tagged `!Migration` (an untagged mapping is accepted
//! as the same format). Documents are decoded against an explicit field
//! table before the immutable [`StepDescriptor`] is built, and the resulting
//! list is sorted by version, which is the execution order.

use crate::error::{CoreError, CoreResult};
use crate::module_name::ModuleName;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::path::{Path, PathBuf};

/// Tag binding a YAML document to the step format.
pub const STEP_TAG: &str = "Migration";

/// Example document attached to every parse error.
pub const USAGE_EXAMPLE: &str = r#"
--- !Migration
version: 0.0.1
app_version: 10.0
upgrade:
- account
install:
- document
uninstall:
- project
remove:
- removed_code

--- !Migration
version: 0.0.2  # nothing to do, only bumps the ledger
app_version: 10.0

--- !Migration
version: 0.9.9  # prepare for the upgrade service
app_version: 10.0
pre_scripts:
- ./migrate/prepare.sql
upgrade:
- document

--- !Migration
version: 1.0.0
app_version: 11.0
service: odoo  # one of: odoo, oca
upgrade:  # runs once the service result is restored
- document
post_scripts:
- ./migrate/cleanup.sql
"#;

/// Remote upgrade services a step may delegate to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceName {
    /// The vendor's hosted upgrade platform
    Odoo,
    /// The community upgrade pipeline
    Oca,
}

impl ServiceName {
    /// Every accepted service, in documentation order.
    pub const ALL: [ServiceName; 2] = [ServiceName::Odoo, ServiceName::Oca];

    /// Lowercase identifier as written in step documents and the ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::Odoo => "odoo",
            ServiceName::Oca => "oca",
        }
    }

    /// Look up a service by its identifier.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations requested by a step.
///
/// This is also the snapshot recorded in the ledger when a step finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operations {
    /// Modules to mark for upgrade
    #[serde(default)]
    pub upgrade: Vec<ModuleName>,

    /// Modules to mark for installation
    #[serde(default)]
    pub install: Vec<ModuleName>,

    /// Modules to mark for removal
    #[serde(default)]
    pub uninstall: Vec<ModuleName>,

    /// Modules whose code is gone and must be purged from the registry
    #[serde(default)]
    pub remove: Vec<ModuleName>,

    /// Remote upgrade service handling this step
    #[serde(default)]
    pub service: Option<ServiceName>,

    /// Scripts executed before module reconciliation
    #[serde(default)]
    pub pre_scripts: Vec<PathBuf>,

    /// Scripts executed after module reconciliation
    #[serde(default)]
    pub post_scripts: Vec<PathBuf>,
}

impl Operations {
    /// True when nothing at all is requested.
    pub fn is_noop(&self) -> bool {
        self.upgrade.is_empty()
            && self.install.is_empty()
            && self.uninstall.is_empty()
            && self.remove.is_empty()
            && self.service.is_none()
            && self.pre_scripts.is_empty()
            && self.post_scripts.is_empty()
    }

    /// True when the module installer has marks to apply.
    pub fn reconciles_modules(&self) -> bool {
        !(self.upgrade.is_empty() && self.install.is_empty() && self.uninstall.is_empty())
    }
}

/// One validated, versioned migration step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDescriptor {
    version: Version,
    app_version: String,
    operations: Operations,
}

impl StepDescriptor {
    /// Build a step directly, bypassing document decoding.
    pub fn new(version: Version, app_version: impl Into<String>, operations: Operations) -> Self {
        Self {
            version,
            app_version: app_version.into(),
            operations,
        }
    }

    /// Step version.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Application release the step targets.
    pub fn app_version(&self) -> &str {
        &self.app_version
    }

    /// Requested operations.
    pub fn operations(&self) -> &Operations {
        &self.operations
    }

    /// Remote service, if the step delegates.
    pub fn service(&self) -> Option<ServiceName> {
        self.operations.service
    }

    /// True when the step declares no operation at all.
    pub fn is_noop(&self) -> bool {
        self.operations.is_noop()
    }
}

/// Shape a field value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Version,
    Text,
    Modules,
    Service,
    Scripts,
}

/// Fields accepted by the `!Migration` format.
const STEP_FIELDS: &[(&str, FieldKind)] = &[
    ("version", FieldKind::Version),
    ("app_version", FieldKind::Text),
    ("upgrade", FieldKind::Modules),
    ("install", FieldKind::Modules),
    ("uninstall", FieldKind::Modules),
    ("remove", FieldKind::Modules),
    ("service", FieldKind::Service),
    ("pre_scripts", FieldKind::Scripts),
    ("post_scripts", FieldKind::Scripts),
];

fn parse_error(field: &str, message: impl Into<String>) -> CoreError {
    CoreError::Parse {
        field: field.to_string(),
        message: message.into(),
        example: USAGE_EXAMPLE,
    }
}

/// Parse every step in a multi-document YAML source.
///
/// Returns the steps sorted by ascending version. A version declared twice
/// is rejected rather than silently collapsed.
pub fn parse_all(document: &str) -> CoreResult<Vec<StepDescriptor>> {
    let mut steps = Vec::new();
    let mut seen = HashSet::new();

    for doc in serde_yaml::Deserializer::from_str(document) {
        let value = Value::deserialize(doc)?;
        let Some(step) = decode_document(value)? else {
            continue;
        };
        if !seen.insert(step.version.clone()) {
            return Err(CoreError::DuplicateStep {
                version: step.version.to_string(),
            });
        }
        steps.push(step);
    }

    steps.sort_by(|a, b| a.version.cmp(&b.version));
    log::debug!("Parsed {} migration steps", steps.len());
    Ok(steps)
}

/// Read and parse a step file.
pub fn load_file(path: &Path) -> CoreResult<Vec<StepDescriptor>> {
    let content = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_all(&content)
}

/// Dispatch one document to the decoder for its format.
fn decode_document(value: Value) -> CoreResult<Option<StepDescriptor>> {
    match value {
        Value::Null => Ok(None),
        Value::Tagged(tagged) => {
            let tag = tagged.tag.to_string();
            if tag.trim_start_matches('!') == STEP_TAG {
                decode_v1(tagged.value).map(Some)
            } else {
                Err(parse_error(
                    "tag",
                    format!("unknown document tag `{tag}`, expected `!{STEP_TAG}`"),
                ))
            }
        }
        Value::Mapping(mapping) => decode_v1_mapping(&mapping).map(Some),
        _ => Err(parse_error(
            "document",
            "each document must be a mapping describing one migration step",
        )),
    }
}

fn decode_v1(value: Value) -> CoreResult<StepDescriptor> {
    match value {
        Value::Mapping(mapping) => decode_v1_mapping(&mapping),
        _ => Err(parse_error(
            "document",
            format!("a `!{STEP_TAG}` document must be a mapping"),
        )),
    }
}

fn decode_v1_mapping(mapping: &Mapping) -> CoreResult<StepDescriptor> {
    for key in mapping.keys() {
        let Some(name) = key.as_str() else {
            return Err(parse_error("document", "field names must be strings"));
        };
        if !STEP_FIELDS.iter().any(|(field, _)| *field == name) {
            let accepted: Vec<&str> = STEP_FIELDS.iter().map(|(f, _)| *f).collect();
            return Err(parse_error(
                name,
                format!("unknown key, accepted keys are: {}", accepted.join(", ")),
            ));
        }
    }

    let mut version = None;
    let mut app_version = String::new();
    let mut operations = Operations::default();

    for (field, kind) in STEP_FIELDS {
        let value = mapping.get(*field).unwrap_or(&Value::Null);
        match kind {
            FieldKind::Version => version = decode_version(field, value)?,
            FieldKind::Text => app_version = decode_text(field, value)?.unwrap_or_default(),
            FieldKind::Modules => {
                let modules = decode_modules(field, value)?;
                match *field {
                    "upgrade" => operations.upgrade = modules,
                    "install" => operations.install = modules,
                    "uninstall" => operations.uninstall = modules,
                    _ => operations.remove = modules,
                }
            }
            FieldKind::Service => operations.service = decode_service(field, value)?,
            FieldKind::Scripts => {
                let scripts = decode_scripts(field, value)?;
                if *field == "pre_scripts" {
                    operations.pre_scripts = scripts;
                } else {
                    operations.post_scripts = scripts;
                }
            }
        }
    }

    let version = version.ok_or_else(|| {
        parse_error(
            "version",
            "`version` key is required and must be a semantic version such as 0.1.0",
        )
    })?;

    Ok(StepDescriptor {
        version,
        app_version,
        operations,
    })
}

/// Render a scalar as it was written in the document.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn decode_version(field: &str, value: &Value) -> CoreResult<Option<Version>> {
    if value.is_null() {
        return Ok(None);
    }
    let text = scalar_text(value).ok_or_else(|| {
        parse_error(field, "`version` key accepts a semantic version string")
    })?;
    Version::parse(&text)
        .map(Some)
        .map_err(|e| parse_error(field, e.to_string()))
}

fn decode_text(field: &str, value: &Value) -> CoreResult<Option<String>> {
    if value.is_null() {
        return Ok(None);
    }
    scalar_text(value)
        .map(Some)
        .ok_or_else(|| parse_error(field, format!("`{field}` key accepts a string")))
}

/// Decode a non-empty list of non-empty strings.
fn decode_string_list(value: &Value) -> Option<Vec<String>> {
    let items = value.as_sequence()?;
    if items.is_empty() {
        return None;
    }
    items
        .iter()
        .map(|item| {
            item.as_str()
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
        })
        .collect()
}

fn decode_modules(field: &str, value: &Value) -> CoreResult<Vec<ModuleName>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    let names = decode_string_list(value).ok_or_else(|| {
        parse_error(
            field,
            format!("`{field}` key accepts a non-empty list of module names present in the addons paths"),
        )
    })?;
    Ok(dedup_preserving(
        names.into_iter().filter_map(ModuleName::try_new).collect(),
    ))
}

fn decode_scripts(field: &str, value: &Value) -> CoreResult<Vec<PathBuf>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    let paths = decode_string_list(value).ok_or_else(|| {
        parse_error(
            field,
            format!("`{field}` key accepts a non-empty list of script paths"),
        )
    })?;
    Ok(dedup_preserving(
        paths.into_iter().map(PathBuf::from).collect(),
    ))
}

fn decode_service(field: &str, value: &Value) -> CoreResult<Option<ServiceName>> {
    if value.is_null() {
        return Ok(None);
    }
    let accepted: Vec<&str> = ServiceName::ALL.iter().map(|s| s.as_str()).collect();
    value
        .as_str()
        .and_then(ServiceName::from_name)
        .map(Some)
        .ok_or_else(|| {
            parse_error(
                field,
                format!("`service` key accepts one of as string: {}", accepted.join(", ")),
            )
        })
}

/// Drop repeated items, keeping the first occurrence of each.
fn dedup_preserving<T: Eq + Hash + Clone>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
#[path = "step_test.rs"]
mod tests;
