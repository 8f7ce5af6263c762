//! Avro IDL compilation
//!
//! Schemas in the message type registry are written in Avro IDL. [`IdlLoader`]
//! parses an `.avdl` file, follows its imports through a search path and emits
//! the equivalent JSON protocol document. All named types are emitted with an
//! explicit namespace and references are written as full names, so the document
//! can be fed straight into `apache_avro::Schema::parse_list`.

pub mod lexer;
pub mod parser;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use tracing::{debug, trace};

use crate::error::IdlError;
use parser::{Declaration, Field, ImportKind, Message, NamedBody, NamedSchema, Protocol, TypeExpr};

/// Compiles IDL files into JSON protocol documents
#[derive(Debug, Clone, Default)]
pub struct IdlLoader {
    search_path: Vec<PathBuf>,
}

/// A named schema waiting to be emitted, with the namespace it was declared in
struct PendingSchema {
    schema: NamedSchema,
    namespace: Option<String>,
    file: PathBuf,
}

enum TypeEntry {
    Idl(PendingSchema),
    Json(Value),
}

#[derive(Default)]
struct Compilation {
    imported: HashSet<PathBuf>,
    names: HashSet<String>,
    types: Vec<TypeEntry>,
    messages: Map<String, Value>,
}

impl IdlLoader {
    /// Create a loader resolving imports against `search_path` after the importing file's directory
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        Self { search_path }
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// Compile `file` and everything it imports into a JSON protocol
    pub fn load(&self, file: &Path) -> Result<Value, IdlError> {
        debug!(file = %file.display(), "compiling avro idl");
        let mut compilation = Compilation::default();
        if let Ok(canonical) = file.canonicalize() {
            compilation.imported.insert(canonical);
        }
        let protocol = self.parse_idl(file, &mut compilation)?;

        let mut types = Vec::with_capacity(compilation.types.len());
        let mut messages = Map::new();
        for entry in &compilation.types {
            match entry {
                TypeEntry::Idl(pending) => types.push(emit_named(pending, &compilation.names)?),
                TypeEntry::Json(value) => types.push(value.clone()),
            }
        }
        for (name, message) in &compilation.messages {
            messages.insert(name.clone(), message.clone());
        }

        let mut document = Map::new();
        document.insert("protocol".into(), Value::String(protocol.name.clone()));
        if let Some(namespace) = &protocol.namespace {
            document.insert("namespace".into(), Value::String(namespace.clone()));
        }
        if let Some(doc) = &protocol.doc {
            document.insert("doc".into(), Value::String(doc.clone()));
        }
        for (key, value) in &protocol.properties {
            document.insert(key.clone(), value.clone());
        }
        document.insert("types".into(), Value::Array(types));
        document.insert("messages".into(), Value::Object(messages));
        Ok(Value::Object(document))
    }

    fn parse_idl(&self, file: &Path, compilation: &mut Compilation) -> Result<Protocol, IdlError> {
        let source = read(file)?;
        let tokens = lexer::tokenize(&source).map_err(|e| IdlError::Syntax {
            file: file.to_path_buf(),
            line: e.line,
            column: e.column,
            message: e.message,
        })?;
        let protocol = parser::parse(&tokens).map_err(|e| IdlError::Syntax {
            file: file.to_path_buf(),
            line: e.line,
            column: e.column,
            message: e.message,
        })?;

        for declaration in &protocol.declarations {
            match declaration {
                Declaration::Import { kind, path } => {
                    let resolved = self.resolve_import(path, file)?;
                    let canonical = resolved.canonicalize().map_err(|source| IdlError::Io {
                        file: resolved.clone(),
                        source,
                    })?;
                    if !compilation.imported.insert(canonical) {
                        trace!(import = %path, "already imported");
                        continue;
                    }
                    match kind {
                        ImportKind::Idl => {
                            self.parse_idl(&resolved, compilation)?;
                        }
                        ImportKind::Schema => import_schema(&resolved, compilation)?,
                        ImportKind::Protocol => import_protocol(&resolved, compilation)?,
                    }
                }
                Declaration::Named(schema) => {
                    let namespace = schema.namespace.clone().or_else(|| protocol.namespace.clone());
                    register(&mut compilation.names, qualify(&schema.name, namespace.as_deref()))?;
                    compilation.types.push(TypeEntry::Idl(PendingSchema {
                        schema: schema.clone(),
                        namespace,
                        file: file.to_path_buf(),
                    }));
                }
                Declaration::Message(_) => {}
            }
        }

        // Messages reference types, so they are emitted once all imports are registered
        for declaration in &protocol.declarations {
            if let Declaration::Message(message) = declaration {
                let value = emit_message(message, &compilation.names, file)?;
                compilation.messages.insert(message.name.clone(), value);
            }
        }

        Ok(protocol)
    }

    fn resolve_import(&self, import: &str, from: &Path) -> Result<PathBuf, IdlError> {
        let local = from.parent().map(|dir| dir.join(import));
        local
            .into_iter()
            .chain(self.search_path.iter().map(|dir| dir.join(import)))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| IdlError::ImportNotFound {
                import: import.to_string(),
                from: from.to_path_buf(),
            })
    }
}

fn read(file: &Path) -> Result<String, IdlError> {
    fs::read_to_string(file).map_err(|source| IdlError::Io {
        file: file.to_path_buf(),
        source,
    })
}

fn read_json(file: &Path) -> Result<Value, IdlError> {
    serde_json::from_str(&read(file)?).map_err(|e| IdlError::InvalidImport {
        file: file.to_path_buf(),
        reason: e.to_string(),
    })
}

fn qualify(name: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) if !name.contains('.') && !ns.is_empty() => format!("{ns}.{name}"),
        _ => name.to_string(),
    }
}

fn register(names: &mut HashSet<String>, fullname: String) -> Result<(), IdlError> {
    if names.insert(fullname.clone()) {
        Ok(())
    } else {
        Err(IdlError::DuplicateType { name: fullname })
    }
}

/// `.avsc` import: a single schema or a list of schemas
fn import_schema(file: &Path, compilation: &mut Compilation) -> Result<(), IdlError> {
    let value = read_json(file)?;
    let schemas = match value {
        Value::Array(items) => items,
        other => vec![other],
    };
    for schema in schemas {
        if !schema.get("name").is_some_and(Value::is_string) {
            return Err(IdlError::InvalidImport {
                file: file.to_path_buf(),
                reason: "imported schema must be a named type".into(),
            });
        }
        collect_json_names(&schema, None, &mut compilation.names)?;
        compilation.types.push(TypeEntry::Json(schema));
    }
    Ok(())
}

/// `.avpr` import: types and messages of a JSON protocol
fn import_protocol(file: &Path, compilation: &mut Compilation) -> Result<(), IdlError> {
    let value = read_json(file)?;
    let namespace = value.get("namespace").and_then(Value::as_str).map(String::from);
    let types = value.get("types").and_then(Value::as_array).cloned().unwrap_or_default();
    for mut schema in types {
        if let (Some(object), Some(ns)) = (schema.as_object_mut(), namespace.as_ref()) {
            let qualified = object.get("name").and_then(Value::as_str).is_some_and(|n| n.contains('.'));
            if !qualified && !object.contains_key("namespace") {
                object.insert("namespace".into(), Value::String(ns.clone()));
            }
        }
        collect_json_names(&schema, namespace.as_deref(), &mut compilation.names)?;
        compilation.types.push(TypeEntry::Json(schema));
    }
    if let Some(messages) = value.get("messages").and_then(Value::as_object) {
        for (name, message) in messages {
            compilation.messages.insert(name.clone(), message.clone());
        }
    }
    Ok(())
}

/// Register every named type defined inside a JSON schema
fn collect_json_names(schema: &Value, enclosing: Option<&str>, names: &mut HashSet<String>) -> Result<(), IdlError> {
    match schema {
        Value::Array(branches) => {
            for branch in branches {
                collect_json_names(branch, enclosing, names)?;
            }
        }
        Value::Object(object) => {
            let mut namespace = enclosing.map(String::from);
            if let Some(name) = object.get("name").and_then(Value::as_str) {
                let own = object.get("namespace").and_then(Value::as_str).or(enclosing);
                let fullname = qualify(name, own);
                namespace = fullname.rsplit_once('.').map(|(ns, _)| ns.to_string());
                register(names, fullname)?;
            }
            if let Some(fields) = object.get("fields").and_then(Value::as_array) {
                for field in fields {
                    if let Some(ty) = field.get("type") {
                        collect_json_names(ty, namespace.as_deref(), names)?;
                    }
                }
            }
            for key in ["items", "values"] {
                if let Some(inner) = object.get(key) {
                    collect_json_names(inner, namespace.as_deref(), names)?;
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn resolve_reference(
    name: &str,
    namespace: Option<&str>,
    names: &HashSet<String>,
    file: &Path,
) -> Result<String, IdlError> {
    let candidates = [qualify(name, namespace), name.to_string()];
    candidates
        .into_iter()
        .find(|candidate| names.contains(candidate))
        .ok_or_else(|| IdlError::UndefinedType {
            name: name.to_string(),
            file: file.to_path_buf(),
        })
}

fn emit_type(ty: &TypeExpr, names: &HashSet<String>, file: &Path, null_last: bool) -> Result<Value, IdlError> {
    Ok(match ty {
        TypeExpr::Primitive { name, properties } if properties.is_empty() => Value::String(name.clone()),
        TypeExpr::Primitive { name, properties } => {
            let mut object = properties.clone();
            object.insert("type".into(), Value::String(name.clone()));
            Value::Object(object)
        }
        TypeExpr::Reference { name, namespace } => {
            Value::String(resolve_reference(name, namespace.as_deref(), names, file)?)
        }
        TypeExpr::Array(items) => json!({ "type": "array", "items": emit_type(items, names, file, false)? }),
        TypeExpr::Map(values) => json!({ "type": "map", "values": emit_type(values, names, file, false)? }),
        TypeExpr::Union(branches) => Value::Array(
            branches
                .iter()
                .map(|branch| emit_type(branch, names, file, false))
                .collect::<Result<_, _>>()?,
        ),
        TypeExpr::Nullable(inner) => {
            let inner = emit_type(inner, names, file, false)?;
            let null = Value::String("null".into());
            if null_last {
                Value::Array(vec![inner, null])
            } else {
                Value::Array(vec![null, inner])
            }
        }
        TypeExpr::Decimal { precision, scale } => json!({
            "type": "bytes",
            "logicalType": "decimal",
            "precision": precision,
            "scale": scale,
        }),
        TypeExpr::Logical { base, logical_type } => json!({ "type": base, "logicalType": logical_type }),
    })
}

fn emit_field(field: &Field, names: &HashSet<String>, file: &Path) -> Result<Value, IdlError> {
    // A nullable field with a non-null default lists the value type first
    let null_last = field.default.as_ref().is_some_and(|d| !d.is_null());
    let mut object = Map::new();
    object.insert("name".into(), Value::String(field.name.clone()));
    object.insert("type".into(), emit_type(&field.ty, names, file, null_last)?);
    if let Some(doc) = &field.doc {
        object.insert("doc".into(), Value::String(doc.clone()));
    }
    if let Some(default) = &field.default {
        object.insert("default".into(), default.clone());
    }
    if !field.aliases.is_empty() {
        object.insert("aliases".into(), json!(field.aliases));
    }
    if let Some(order) = &field.order {
        object.insert("order".into(), Value::String(order.clone()));
    }
    for (key, value) in &field.properties {
        object.insert(key.clone(), value.clone());
    }
    Ok(Value::Object(object))
}

fn emit_named(pending: &PendingSchema, names: &HashSet<String>) -> Result<Value, IdlError> {
    let schema = &pending.schema;
    let mut object = Map::new();
    let kind = match &schema.body {
        NamedBody::Record { error: true, .. } => "error",
        NamedBody::Record { .. } => "record",
        NamedBody::Enum { .. } => "enum",
        NamedBody::Fixed { .. } => "fixed",
    };
    object.insert("type".into(), Value::String(kind.into()));
    object.insert("name".into(), Value::String(schema.name.clone()));
    if let Some(namespace) = &pending.namespace {
        object.insert("namespace".into(), Value::String(namespace.clone()));
    }
    if let Some(doc) = &schema.doc {
        object.insert("doc".into(), Value::String(doc.clone()));
    }
    if !schema.aliases.is_empty() {
        object.insert("aliases".into(), json!(schema.aliases));
    }

    match &schema.body {
        NamedBody::Record { fields, .. } => {
            let fields = fields
                .iter()
                .map(|field| emit_field(field, names, &pending.file))
                .collect::<Result<Vec<_>, _>>()?;
            object.insert("fields".into(), Value::Array(fields));
        }
        NamedBody::Enum { symbols, default } => {
            object.insert("symbols".into(), json!(symbols));
            if let Some(default) = default {
                object.insert("default".into(), Value::String(default.clone()));
            }
        }
        NamedBody::Fixed { size } => {
            object.insert("size".into(), json!(size));
        }
    }
    for (key, value) in &schema.properties {
        object.insert(key.clone(), value.clone());
    }
    Ok(Value::Object(object))
}

fn emit_message(message: &Message, names: &HashSet<String>, file: &Path) -> Result<Value, IdlError> {
    let request = message
        .request
        .iter()
        .map(|param| {
            let null_last = param.default.as_ref().is_some_and(|d| !d.is_null());
            let mut object = Map::new();
            object.insert("name".into(), Value::String(param.name.clone()));
            object.insert("type".into(), emit_type(&param.ty, names, file, null_last)?);
            if let Some(default) = &param.default {
                object.insert("default".into(), default.clone());
            }
            Ok(Value::Object(object))
        })
        .collect::<Result<Vec<_>, IdlError>>()?;

    let mut object = Map::new();
    if let Some(doc) = &message.doc {
        object.insert("doc".into(), Value::String(doc.clone()));
    }
    object.insert("request".into(), Value::Array(request));
    let response = match &message.response {
        Some(ty) => emit_type(ty, names, file, false)?,
        None => Value::String("null".into()),
    };
    object.insert("response".into(), response);
    if !message.errors.is_empty() {
        let errors = message
            .errors
            .iter()
            .map(|e| emit_type(e, names, file, false))
            .collect::<Result<Vec<_>, _>>()?;
        object.insert("errors".into(), Value::Array(errors));
    }
    if message.one_way {
        object.insert("one-way".into(), Value::Bool(true));
    }
    for (key, value) in &message.properties {
        object.insert(key.clone(), value.clone());
    }
    Ok(Value::Object(object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_resolves_references_to_full_names() {
        let dir = tempdir().unwrap();
        let file = write(
            dir.path(),
            "Zone.avdl",
            r#"
            @namespace("ch.example.zone")
            protocol ZoneProtocol {
                enum Kind { A, B }
                record Payload { Kind kind; string? label = "x"; }
            }
            "#,
        );

        let protocol = IdlLoader::new(vec![]).load(&file).unwrap();
        assert_eq!(protocol["protocol"], "ZoneProtocol");
        let types = protocol["types"].as_array().unwrap();
        assert_eq!(types.len(), 2);
        assert_eq!(types[0]["namespace"], "ch.example.zone");
        let fields = types[1]["fields"].as_array().unwrap();
        assert_eq!(fields[0]["type"], "ch.example.zone.Kind");
        assert_eq!(fields[1]["type"], json!(["string", "null"]));
        assert_eq!(fields[1]["default"], "x");
    }

    #[test]
    fn test_imports_from_search_path() {
        let dir = tempdir().unwrap();
        let common = dir.path().join("_common");
        let types = dir.path().join("types");
        fs::create_dir_all(&common).unwrap();
        fs::create_dir_all(&types).unwrap();
        write(
            &common,
            "Base.avdl",
            r#"@namespace("ch.common") protocol Base { record Identity { string id; } }"#,
        );
        write(
            &common,
            "Ref.avsc",
            r#"{"type": "record", "name": "Ref", "namespace": "ch.common", "fields": [{"name": "value", "type": "string"}]}"#,
        );
        let file = write(
            &types,
            "Event.avdl",
            r#"
            @namespace("ch.event")
            protocol EventProtocol {
                import idl "Base.avdl";
                import schema "Ref.avsc";
                import idl "Base.avdl";
                record Event { ch.common.Identity identity; ch.common.Ref reference; }
            }
            "#,
        );

        let protocol = IdlLoader::new(vec![common]).load(&file).unwrap();
        let types = protocol["types"].as_array().unwrap();
        let names: Vec<_> = types.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Identity", "Ref", "Event"]);
    }

    #[test]
    fn test_missing_import_and_undefined_type() {
        let dir = tempdir().unwrap();
        let missing = write(dir.path(), "A.avdl", r#"protocol A { import idl "Nope.avdl"; }"#);
        let err = IdlLoader::new(vec![]).load(&missing).unwrap_err();
        assert!(matches!(err, IdlError::ImportNotFound { ref import, .. } if import == "Nope.avdl"));

        let undefined = write(dir.path(), "B.avdl", "protocol B { record R { Unknown u; } }");
        let err = IdlLoader::new(vec![]).load(&undefined).unwrap_err();
        assert!(matches!(err, IdlError::UndefinedType { ref name, .. } if name == "Unknown"));
    }

    #[test]
    fn test_duplicate_type_rejected() {
        let dir = tempdir().unwrap();
        let file = write(dir.path(), "D.avdl", "protocol D { record R { int a; } record R { int b; } }");
        let err = IdlLoader::new(vec![]).load(&file).unwrap_err();
        assert!(matches!(err, IdlError::DuplicateType { .. }));
    }

    #[test]
    fn test_syntax_error_names_file() {
        let dir = tempdir().unwrap();
        let file = write(dir.path(), "Bad.avdl", "protocol Bad { record }");
        let err = IdlLoader::new(vec![]).load(&file).unwrap_err();
        assert!(err.to_string().contains("Bad.avdl"));
    }
}
