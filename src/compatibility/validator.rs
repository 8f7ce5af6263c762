//! Reader/writer schema compatibility
//!
//! Decides whether data written with one Avro schema can be read with another,
//! following the Avro schema resolution rules:
//!
//! - numeric promotion `int → long → float → double`, and `string ↔ bytes`
//! - named types match on their unqualified name or a reader alias
//! - fixed types must agree on size
//! - writer enum symbols must be known to the reader unless the reader enum has a default
//! - reader fields missing in the writer need a default value
//! - every writer union branch must be readable
//!
//! Schemas come from JSON protocol documents as produced by the registry.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use apache_avro::schema::{EnumSchema, FixedSchema, RecordSchema};
use apache_avro::Schema;
use serde::Serialize;
use serde_json::Value;

use crate::error::ValidationError;

const DURATION: &str = "duration";
const DURATION_SIZE: usize = 12;

/// Kind of a schema incompatibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum IncompatibilityKind {
    NameMismatch,
    FixedSizeMismatch,
    MissingEnumSymbols,
    ReaderFieldMissingDefaultValue,
    TypeMismatch,
    MissingUnionBranch,
}

impl fmt::Display for IncompatibilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IncompatibilityKind::NameMismatch => "NAME_MISMATCH",
            IncompatibilityKind::FixedSizeMismatch => "FIXED_SIZE_MISMATCH",
            IncompatibilityKind::MissingEnumSymbols => "MISSING_ENUM_SYMBOLS",
            IncompatibilityKind::ReaderFieldMissingDefaultValue => "READER_FIELD_MISSING_DEFAULT_VALUE",
            IncompatibilityKind::TypeMismatch => "TYPE_MISMATCH",
            IncompatibilityKind::MissingUnionBranch => "MISSING_UNION_BRANCH",
        };
        f.write_str(name)
    }
}

/// One reason why a writer schema cannot be read with a reader schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaIncompatibility {
    pub kind: IncompatibilityKind,
    pub message: String,
    /// Path into the reader schema, e.g. `/fields/0/type`
    pub location: String,
    /// JSON of the reader sub-schema involved
    #[serde(skip)]
    pub reader_fragment: Option<String>,
    /// JSON of the writer sub-schema involved
    #[serde(skip)]
    pub writer_fragment: Option<String>,
}

/// Named types of a parsed protocol document
#[derive(Debug)]
pub struct ProtocolSchemas {
    pub protocol: String,
    pub namespace: Option<String>,
    names: HashMap<String, Schema>,
}

impl ProtocolSchemas {
    /// Parse the `types` of a JSON protocol document
    pub fn parse(document: &str) -> Result<Self, ValidationError> {
        let value: Value =
            serde_json::from_str(document).map_err(|e| ValidationError::InvalidProtocol(e.to_string()))?;
        let protocol = value
            .get("protocol")
            .and_then(Value::as_str)
            .ok_or_else(|| ValidationError::InvalidProtocol("missing protocol name".into()))?
            .to_string();
        let namespace = value.get("namespace").and_then(Value::as_str).map(String::from);
        let types = value
            .get("types")
            .and_then(Value::as_array)
            .ok_or_else(|| ValidationError::InvalidProtocol(format!("protocol {protocol} has no types")))?;

        let mut sources = Vec::with_capacity(types.len());
        for ty in types {
            let mut ty = ty.clone();
            if let Some(object) = ty.as_object_mut() {
                // error types read like records
                if object.get("type").and_then(Value::as_str) == Some("error") {
                    object.insert("type".into(), Value::String("record".into()));
                }
                if let (Some(ns), false) = (&namespace, object.contains_key("namespace")) {
                    object.insert("namespace".into(), Value::String(ns.clone()));
                }
            }
            sources.push(ty.to_string());
        }
        let refs: Vec<&str> = sources.iter().map(String::as_str).collect();
        let schemas = Schema::parse_list(&refs)?;

        let mut names = HashMap::new();
        for schema in &schemas {
            collect_names(schema, &mut names);
        }
        Ok(Self {
            protocol,
            namespace,
            names,
        })
    }

    /// Named type by full name, or by name within the protocol namespace
    pub fn find(&self, type_name: &str) -> Result<&Schema, ValidationError> {
        let qualified = match &self.namespace {
            Some(ns) if !type_name.contains('.') => Some(format!("{ns}.{type_name}")),
            _ => None,
        };
        self.names
            .get(type_name)
            .or_else(|| qualified.and_then(|q| self.names.get(&q)))
            .ok_or_else(|| ValidationError::TypeNotFound {
                type_name: type_name.to_string(),
                protocol: self.protocol.clone(),
            })
    }
}

fn collect_names(schema: &Schema, names: &mut HashMap<String, Schema>) {
    match schema {
        Schema::Record(RecordSchema { name, fields, .. }) => {
            names.insert(name.fullname(None), schema.clone());
            for field in fields {
                collect_names(&field.schema, names);
            }
        }
        Schema::Enum(EnumSchema { name, .. }) | Schema::Fixed(FixedSchema { name, .. }) => {
            names.insert(name.fullname(None), schema.clone());
        }
        Schema::Array(inner) | Schema::Map(inner) => collect_names(inner, names),
        Schema::Decimal(decimal) => collect_names(&decimal.inner, names),
        Schema::Union(union) => {
            for variant in union.variants() {
                collect_names(variant, names);
            }
        }
        _ => {}
    }
}

/// Validates reader/writer compatibility of message type schemas
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaCompatibilityValidator;

impl SchemaCompatibilityValidator {
    pub fn new() -> Self {
        Self
    }

    /// Incompatibilities of reading `writer_type` from `writer_doc` as `reader_type` from `reader_doc`.
    /// Empty when compatible.
    pub fn validate(
        &self,
        reader_doc: &str,
        reader_type: &str,
        writer_doc: &str,
        writer_type: &str,
    ) -> Result<Vec<SchemaIncompatibility>, ValidationError> {
        let reader = ProtocolSchemas::parse(reader_doc)?;
        let writer = ProtocolSchemas::parse(writer_doc)?;
        Ok(self.check(&reader, reader.find(reader_type)?, &writer, writer.find(writer_type)?))
    }

    /// Compare two schemas whose references resolve against the given protocols
    pub fn check(
        &self,
        reader_protocol: &ProtocolSchemas,
        reader: &Schema,
        writer_protocol: &ProtocolSchemas,
        writer: &Schema,
    ) -> Vec<SchemaIncompatibility> {
        let mut checker = Checker {
            reader_names: &reader_protocol.names,
            writer_names: &writer_protocol.names,
            in_progress: HashSet::new(),
            location: Vec::new(),
            found: Vec::new(),
        };
        checker.check(reader, writer);
        checker.found
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    Array,
    Map,
    Union,
    Record,
    Enum,
    Fixed,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Null => "NULL",
            Kind::Boolean => "BOOLEAN",
            Kind::Int => "INT",
            Kind::Long => "LONG",
            Kind::Float => "FLOAT",
            Kind::Double => "DOUBLE",
            Kind::Bytes => "BYTES",
            Kind::String => "STRING",
            Kind::Array => "ARRAY",
            Kind::Map => "MAP",
            Kind::Union => "UNION",
            Kind::Record => "RECORD",
            Kind::Enum => "ENUM",
            Kind::Fixed => "FIXED",
        };
        f.write_str(name)
    }
}

/// Logical types are compared by their underlying type
fn kind(schema: &Schema) -> Kind {
    match schema {
        Schema::Null => Kind::Null,
        Schema::Boolean => Kind::Boolean,
        Schema::Int | Schema::Date | Schema::TimeMillis => Kind::Int,
        Schema::Long
        | Schema::TimeMicros
        | Schema::TimestampMillis
        | Schema::TimestampMicros
        | Schema::LocalTimestampMillis
        | Schema::LocalTimestampMicros => Kind::Long,
        Schema::Float => Kind::Float,
        Schema::Double => Kind::Double,
        Schema::Bytes => Kind::Bytes,
        Schema::String | Schema::Uuid => Kind::String,
        Schema::Array(_) => Kind::Array,
        Schema::Map(_) => Kind::Map,
        Schema::Union(_) => Kind::Union,
        Schema::Record(_) => Kind::Record,
        Schema::Enum(_) => Kind::Enum,
        Schema::Fixed(_) | Schema::Duration => Kind::Fixed,
        Schema::Decimal(decimal) => kind(&decimal.inner),
        // big-decimal, and references left unresolved
        _ => Kind::Bytes,
    }
}

/// Size of a fixed schema; `duration` is a fixed of 12 bytes
fn fixed_size(schema: &Schema) -> Option<usize> {
    match schema {
        Schema::Fixed(FixedSchema { size, .. }) => Some(*size),
        Schema::Duration => Some(DURATION_SIZE),
        _ => None,
    }
}

fn fragment(schema: &Schema) -> Option<String> {
    serde_json::to_string(schema).ok()
}

/// Aliases declared on a named schema, unqualified
fn aliases(schema: &Schema) -> Vec<String> {
    let json = serde_json::to_value(schema).unwrap_or(Value::Null);
    json.get("aliases")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|alias| alias.rsplit('.').next().unwrap_or(alias).to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn named(schema: &Schema) -> Option<&apache_avro::schema::Name> {
    match schema {
        Schema::Record(RecordSchema { name, .. })
        | Schema::Enum(EnumSchema { name, .. })
        | Schema::Fixed(FixedSchema { name, .. }) => Some(name),
        _ => None,
    }
}

/// Unqualified and full name of a named schema
fn type_name(schema: &Schema) -> Option<(String, String)> {
    match schema {
        Schema::Duration => Some((DURATION.to_string(), DURATION.to_string())),
        _ => named(schema).map(|name| (name.name.clone(), name.fullname(None))),
    }
}

/// A decimal reads and writes like the bytes or fixed it is stored in
fn storage(schema: &Schema) -> &Schema {
    match schema {
        Schema::Decimal(decimal) => storage(&decimal.inner),
        _ => schema,
    }
}

struct Checker<'a> {
    reader_names: &'a HashMap<String, Schema>,
    writer_names: &'a HashMap<String, Schema>,
    /// Named type pairs currently being compared
    in_progress: HashSet<(String, String)>,
    location: Vec<String>,
    found: Vec<SchemaIncompatibility>,
}

impl<'a> Checker<'a> {
    fn resolve(names: &'a HashMap<String, Schema>, schema: &'a Schema) -> &'a Schema {
        match schema {
            Schema::Ref { name } => names.get(&name.fullname(None)).unwrap_or(schema),
            _ => schema,
        }
    }

    fn report(&mut self, kind: IncompatibilityKind, message: String, reader: &Schema, writer: &Schema) {
        self.found.push(SchemaIncompatibility {
            kind,
            message,
            location: format!("/{}", self.location.join("/")),
            reader_fragment: fragment(reader),
            writer_fragment: fragment(writer),
        });
    }

    fn check_at(&mut self, token: impl Into<String>, reader: &'a Schema, writer: &'a Schema) {
        self.location.push(token.into());
        self.check(reader, writer);
        self.location.pop();
    }

    fn check(&mut self, reader: &'a Schema, writer: &'a Schema) {
        let reader = Self::resolve(self.reader_names, storage(reader));
        let writer = Self::resolve(self.writer_names, storage(writer));

        let pair = match (named(reader), named(writer)) {
            (Some(r), Some(w)) => Some((r.fullname(None), w.fullname(None))),
            _ => None,
        };
        if let Some(pair) = &pair {
            // recursive types: the pair is assumed compatible while it is being compared
            if !self.in_progress.insert(pair.clone()) {
                return;
            }
        }

        let reader_kind = kind(reader);
        let writer_kind = kind(writer);
        if reader_kind == writer_kind {
            self.check_same_kind(reader, writer, reader_kind);
        } else {
            self.check_different_kinds(reader, writer, reader_kind, writer_kind);
        }

        if let Some(pair) = pair {
            self.in_progress.remove(&pair);
        }
    }

    fn check_same_kind(&mut self, reader: &'a Schema, writer: &'a Schema, kind: Kind) {
        match (reader, writer) {
            (Schema::Array(r), Schema::Array(w)) => self.check_at("items", r, w),
            (Schema::Map(r), Schema::Map(w)) => self.check_at("values", r, w),
            (Schema::Enum(r), Schema::Enum(w)) => {
                self.check_names(reader, writer);
                let missing: BTreeSet<&String> = w.symbols.iter().filter(|s| !r.symbols.contains(s)).collect();
                let default_known = r.default.as_ref().is_some_and(|d| r.symbols.contains(d));
                if !missing.is_empty() && !default_known {
                    self.location.push("symbols".into());
                    let listed: Vec<&str> = missing.iter().map(|s| s.as_str()).collect();
                    let message = format!("[{}]", listed.join(", "));
                    self.report(IncompatibilityKind::MissingEnumSymbols, message, reader, writer);
                    self.location.pop();
                }
            }
            (Schema::Record(r), Schema::Record(w)) => {
                self.check_names(reader, writer);
                self.check_record_fields(reader, writer, r, w);
            }
            (_, Schema::Union(w)) if kind == Kind::Union => {
                for (index, branch) in w.variants().iter().enumerate() {
                    self.check_at(index.to_string(), reader, branch);
                }
            }
            _ if kind == Kind::Fixed => {
                self.check_names(reader, writer);
                if let (Some(reader_size), Some(writer_size)) = (fixed_size(reader), fixed_size(writer)) {
                    if reader_size != writer_size {
                        self.location.push("size".into());
                        let message = format!("expected: {writer_size}, found: {reader_size}");
                        self.report(IncompatibilityKind::FixedSizeMismatch, message, reader, writer);
                        self.location.pop();
                    }
                }
            }
            // primitives and logical types over the same underlying type
            _ => {}
        }
    }

    fn check_names(&mut self, reader: &Schema, writer: &Schema) {
        let (Some((reader_name, _)), Some((writer_name, writer_full))) = (type_name(reader), type_name(writer)) else {
            return;
        };
        if reader_name == writer_name || aliases(reader).contains(&writer_name) {
            return;
        }
        self.location.push("name".into());
        let message = format!("expected: {writer_full}");
        self.report(IncompatibilityKind::NameMismatch, message, reader, writer);
        self.location.pop();
    }

    fn check_record_fields(
        &mut self,
        reader: &'a Schema,
        writer: &'a Schema,
        reader_record: &'a RecordSchema,
        writer_record: &'a RecordSchema,
    ) {
        self.location.push("fields".into());
        for (position, reader_field) in reader_record.fields.iter().enumerate() {
            self.location.push(position.to_string());
            let writer_field = writer_record
                .fields
                .iter()
                .find(|w| w.name == reader_field.name)
                .or_else(|| {
                    let aliases = reader_field.aliases.as_deref().unwrap_or_default();
                    aliases
                        .iter()
                        .find_map(|alias| writer_record.fields.iter().find(|w| &w.name == alias))
                });
            match writer_field {
                Some(writer_field) => self.check_at("type", &reader_field.schema, &writer_field.schema),
                None if reader_field.default.is_none() => {
                    self.report(
                        IncompatibilityKind::ReaderFieldMissingDefaultValue,
                        reader_field.name.clone(),
                        reader,
                        writer,
                    );
                }
                None => {}
            }
            self.location.pop();
        }
        self.location.pop();
    }

    fn check_different_kinds(&mut self, reader: &'a Schema, writer: &'a Schema, reader_kind: Kind, writer_kind: Kind) {
        if let Schema::Union(union) = writer {
            for branch in union.variants() {
                self.check(reader, branch);
            }
            return;
        }

        let promotable = match reader_kind {
            Kind::Long => writer_kind == Kind::Int,
            Kind::Float => matches!(writer_kind, Kind::Int | Kind::Long),
            Kind::Double => matches!(writer_kind, Kind::Int | Kind::Long | Kind::Float),
            Kind::Bytes => writer_kind == Kind::String,
            Kind::String => writer_kind == Kind::Bytes,
            _ => false,
        };
        if promotable {
            return;
        }

        if let Schema::Union(union) = reader {
            if union.variants().iter().any(|branch| self.is_compatible(branch, writer)) {
                return;
            }
            let message = format!("reader union lacking writer type: {writer_kind}");
            self.report(IncompatibilityKind::MissingUnionBranch, message, reader, writer);
            return;
        }

        let message = format!("reader type: {reader_kind} not compatible with writer type: {writer_kind}");
        self.report(IncompatibilityKind::TypeMismatch, message, reader, writer);
    }

    /// Trial comparison that leaves no findings behind
    fn is_compatible(&mut self, reader: &'a Schema, writer: &'a Schema) -> bool {
        let before = self.found.len();
        self.check(reader, writer);
        let compatible = self.found.len() == before;
        self.found.truncate(before);
        compatible
    }
}
