//! Recursive descent parser turning Avro IDL tokens into a protocol syntax tree

use serde_json::{Map, Number, Value};

use super::lexer::{Spanned, Token};

/// A parse error at a token position
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// `protocol Name { ... }`
#[derive(Debug, Clone)]
pub struct Protocol {
    pub name: String,
    pub namespace: Option<String>,
    pub doc: Option<String>,
    pub properties: Map<String, Value>,
    pub declarations: Vec<Declaration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Idl,
    Schema,
    Protocol,
}

#[derive(Debug, Clone)]
pub enum Declaration {
    Import { kind: ImportKind, path: String },
    Named(NamedSchema),
    Message(Message),
}

/// A record, error, enum or fixed declaration
#[derive(Debug, Clone)]
pub struct NamedSchema {
    pub name: String,
    /// Namespace from a `@namespace` annotation; otherwise inherited
    pub namespace: Option<String>,
    pub doc: Option<String>,
    pub aliases: Vec<String>,
    pub properties: Map<String, Value>,
    pub body: NamedBody,
}

#[derive(Debug, Clone)]
pub enum NamedBody {
    Record { error: bool, fields: Vec<Field> },
    Enum { symbols: Vec<String>, default: Option<String> },
    Fixed { size: u64 },
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub doc: Option<String>,
    pub ty: TypeExpr,
    pub default: Option<Value>,
    pub aliases: Vec<String>,
    pub order: Option<String>,
    pub properties: Map<String, Value>,
}

/// A type as written at a use site
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Primitive { name: String, properties: Map<String, Value> },
    /// Named type reference, resolved against `namespace` when unqualified
    Reference { name: String, namespace: Option<String> },
    Array(Box<TypeExpr>),
    Map(Box<TypeExpr>),
    Union(Vec<TypeExpr>),
    /// `T?`, a union of null and `T`
    Nullable(Box<TypeExpr>),
    Decimal { precision: u64, scale: u64 },
    Logical { base: &'static str, logical_type: &'static str },
}

#[derive(Debug, Clone)]
pub struct Message {
    pub name: String,
    pub doc: Option<String>,
    pub properties: Map<String, Value>,
    pub request: Vec<Param>,
    /// `None` for `void`
    pub response: Option<TypeExpr>,
    pub errors: Vec<TypeExpr>,
    pub one_way: bool,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: TypeExpr,
    pub default: Option<Value>,
}

const PRIMITIVES: &[&str] = &[
    "null", "boolean", "int", "long", "float", "double", "bytes", "string",
];

fn logical(name: &str) -> Option<(&'static str, &'static str)> {
    match name {
        "date" => Some(("int", "date")),
        "time_ms" => Some(("int", "time-millis")),
        "timestamp_ms" => Some(("long", "timestamp-millis")),
        "local_timestamp_ms" => Some(("long", "local-timestamp-millis")),
        "uuid" => Some(("string", "uuid")),
        _ => None,
    }
}

/// Parse a complete IDL file
pub fn parse(tokens: &[Spanned]) -> Result<Protocol, ParseError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        namespaces: Vec::new(),
    };
    parser.protocol()
}

struct Parser<'t> {
    tokens: &'t [Spanned],
    pos: usize,
    /// Namespaces in effect, innermost last
    namespaces: Vec<Option<String>>,
}

struct Annotations {
    namespace: Option<String>,
    aliases: Vec<String>,
    order: Option<String>,
    properties: Map<String, Value>,
}

impl<'t> Parser<'t> {
    fn current(&self) -> &'t Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &'t Token {
        &self.current().token
    }

    fn peek_at(&self, offset: usize) -> &'t Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].token
    }

    fn advance(&mut self) -> &'t Spanned {
        let token = self.current();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let token = self.current();
        ParseError {
            line: token.line,
            column: token.column,
            message: message.into(),
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        self.error(format!("expected {expected}, found {}", describe(self.peek())))
    }

    fn is_punct(&self, c: char) -> bool {
        matches!(self.peek(), Token::Punct(p) if *p == c)
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Token::Ident(i) if i == keyword)
    }

    fn expect_punct(&mut self, c: char) -> Result<(), ParseError> {
        if self.is_punct(c) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{c}'")))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.is_keyword(keyword) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{keyword}'")))
        }
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Token::Ident(name) => {
                self.advance();
                Ok(name.clone())
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn string(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Token::Str(value) => {
                self.advance();
                Ok(value.clone())
            }
            _ => Err(self.unexpected("string literal")),
        }
    }

    fn unsigned(&mut self) -> Result<u64, ParseError> {
        match self.peek() {
            Token::Number(n) => {
                let value = n
                    .parse::<u64>()
                    .map_err(|_| self.error(format!("expected non-negative integer, found {n}")))?;
                self.advance();
                Ok(value)
            }
            _ => Err(self.unexpected("integer")),
        }
    }

    fn current_namespace(&self) -> Option<String> {
        self.namespaces.iter().rev().flatten().next().cloned()
    }

    fn doc(&self) -> Option<String> {
        self.current().doc.clone()
    }

    fn annotations(&mut self) -> Result<Annotations, ParseError> {
        let mut annotations = Annotations {
            namespace: None,
            aliases: Vec::new(),
            order: None,
            properties: Map::new(),
        };
        while let Token::Annotation(name) = self.peek() {
            self.advance();
            self.expect_punct('(')?;
            let value = self.json_value()?;
            self.expect_punct(')')?;
            match (name.as_str(), value) {
                ("namespace", Value::String(ns)) => annotations.namespace = Some(ns),
                ("aliases", Value::Array(items)) => {
                    for item in items {
                        match item {
                            Value::String(alias) => annotations.aliases.push(alias),
                            _ => return Err(self.error("@aliases must contain strings")),
                        }
                    }
                }
                ("order", Value::String(order)) => annotations.order = Some(order.to_lowercase()),
                ("namespace", _) | ("aliases", _) | ("order", _) => {
                    return Err(self.error(format!("invalid value for @{name}")));
                }
                (_, value) => {
                    annotations.properties.insert(name.clone(), value);
                }
            }
        }
        Ok(annotations)
    }

    fn protocol(&mut self) -> Result<Protocol, ParseError> {
        let doc = self.doc();
        let annotations = self.annotations()?;
        let doc = doc.or_else(|| self.doc());
        self.expect_keyword("protocol")?;
        let name = self.ident()?;
        self.namespaces.push(annotations.namespace.clone());
        self.expect_punct('{')?;

        let mut declarations = Vec::new();
        while !self.is_punct('}') {
            if matches!(self.peek(), Token::Eof) {
                return Err(self.unexpected("'}'"));
            }
            declarations.push(self.declaration()?);
        }
        self.expect_punct('}')?;
        if !matches!(self.peek(), Token::Eof) {
            return Err(self.unexpected("end of file"));
        }

        Ok(Protocol {
            name,
            namespace: annotations.namespace,
            doc,
            properties: annotations.properties,
            declarations,
        })
    }

    fn declaration(&mut self) -> Result<Declaration, ParseError> {
        if self.is_keyword("import") {
            self.advance();
            let kind = match self.ident()?.as_str() {
                "idl" => ImportKind::Idl,
                "schema" => ImportKind::Schema,
                "protocol" => ImportKind::Protocol,
                other => return Err(self.error(format!("unknown import kind '{other}'"))),
            };
            let path = self.string()?;
            self.expect_punct(';')?;
            return Ok(Declaration::Import { kind, path });
        }

        let doc = self.doc();
        let annotations = self.annotations()?;
        let doc = doc.or_else(|| self.doc());
        let keyword = match self.peek() {
            Token::Ident(k) => k.as_str(),
            _ => "",
        };
        match keyword {
            "record" | "error" | "enum" | "fixed" => {
                self.named_schema(doc, annotations).map(Declaration::Named)
            }
            _ => self.message(doc, annotations).map(Declaration::Message),
        }
    }

    fn named_schema(&mut self, doc: Option<String>, annotations: Annotations) -> Result<NamedSchema, ParseError> {
        let keyword = self.ident()?;
        let name = self.ident()?;
        self.namespaces.push(annotations.namespace.clone());

        let body = match keyword.as_str() {
            "record" | "error" => {
                self.expect_punct('{')?;
                let mut fields = Vec::new();
                while !self.is_punct('}') {
                    if matches!(self.peek(), Token::Eof) {
                        return Err(self.unexpected("'}'"));
                    }
                    self.fields(&mut fields)?;
                }
                self.expect_punct('}')?;
                NamedBody::Record {
                    error: keyword == "error",
                    fields,
                }
            }
            "enum" => {
                self.expect_punct('{')?;
                let mut symbols = Vec::new();
                while !self.is_punct('}') {
                    symbols.push(self.ident()?);
                    if !self.is_punct(',') {
                        break;
                    }
                    self.advance();
                }
                self.expect_punct('}')?;
                let default = if self.is_punct('=') {
                    self.advance();
                    let symbol = self.ident()?;
                    Some(symbol)
                } else {
                    None
                };
                if self.is_punct(';') {
                    self.advance();
                }
                NamedBody::Enum { symbols, default }
            }
            _ => {
                self.expect_punct('(')?;
                let size = self.unsigned()?;
                self.expect_punct(')')?;
                self.expect_punct(';')?;
                NamedBody::Fixed { size }
            }
        };
        self.namespaces.pop();

        Ok(NamedSchema {
            name,
            namespace: annotations.namespace,
            doc,
            aliases: annotations.aliases,
            properties: annotations.properties,
            body,
        })
    }

    /// `type name [= default] (, name [= default])* ;`
    fn fields(&mut self, fields: &mut Vec<Field>) -> Result<(), ParseError> {
        let doc = self.doc();
        let ty = self.type_expr()?;
        loop {
            let var_doc = self.doc();
            let annotations = self.annotations()?;
            let name = self.ident()?;
            let default = if self.is_punct('=') {
                self.advance();
                Some(self.json_value()?)
            } else {
                None
            };
            fields.push(Field {
                name,
                doc: var_doc.or_else(|| doc.clone()),
                ty: ty.clone(),
                default,
                aliases: annotations.aliases,
                order: annotations.order,
                properties: annotations.properties,
            });
            if self.is_punct(',') {
                self.advance();
                continue;
            }
            break;
        }
        self.expect_punct(';')
    }

    fn message(&mut self, doc: Option<String>, annotations: Annotations) -> Result<Message, ParseError> {
        let response = if self.is_keyword("void") {
            self.advance();
            None
        } else {
            Some(self.type_expr()?)
        };
        let name = self.ident()?;
        self.expect_punct('(')?;
        let mut request = Vec::new();
        while !self.is_punct(')') {
            let ty = self.type_expr()?;
            let name = self.ident()?;
            let default = if self.is_punct('=') {
                self.advance();
                Some(self.json_value()?)
            } else {
                None
            };
            request.push(Param { name, ty, default });
            if !self.is_punct(',') {
                break;
            }
            self.advance();
        }
        self.expect_punct(')')?;

        let mut one_way = false;
        let mut errors = Vec::new();
        if self.is_keyword("oneway") {
            self.advance();
            one_way = true;
        } else if self.is_keyword("throws") {
            self.advance();
            loop {
                errors.push(self.reference()?);
                if !self.is_punct(',') {
                    break;
                }
                self.advance();
            }
        }
        self.expect_punct(';')?;

        Ok(Message {
            name,
            doc,
            properties: annotations.properties,
            request,
            response,
            errors,
            one_way,
        })
    }

    fn reference(&mut self) -> Result<TypeExpr, ParseError> {
        let name = self.ident()?;
        Ok(TypeExpr::Reference {
            name,
            namespace: self.current_namespace(),
        })
    }

    fn type_expr(&mut self) -> Result<TypeExpr, ParseError> {
        let annotations = self.annotations()?;
        let mut ty = self.base_type()?;
        if !annotations.properties.is_empty() {
            match &mut ty {
                TypeExpr::Primitive { properties, .. } => properties.extend(annotations.properties),
                _ => {
                    tracing::trace!(?annotations.properties, "ignoring annotations on non-primitive type");
                }
            }
        }
        if self.is_punct('?') {
            self.advance();
            ty = TypeExpr::Nullable(Box::new(ty));
        }
        Ok(ty)
    }

    fn base_type(&mut self) -> Result<TypeExpr, ParseError> {
        let name = match self.peek() {
            Token::Ident(name) => name.clone(),
            _ => return Err(self.unexpected("type")),
        };
        match name.as_str() {
            "array" | "map" => {
                self.advance();
                self.expect_punct('<')?;
                let inner = Box::new(self.type_expr()?);
                self.expect_punct('>')?;
                Ok(if name == "array" {
                    TypeExpr::Array(inner)
                } else {
                    TypeExpr::Map(inner)
                })
            }
            "union" => {
                self.advance();
                self.expect_punct('{')?;
                let mut branches = vec![self.type_expr()?];
                while self.is_punct(',') {
                    self.advance();
                    branches.push(self.type_expr()?);
                }
                self.expect_punct('}')?;
                Ok(TypeExpr::Union(branches))
            }
            "decimal" if matches!(self.peek_at(1), Token::Punct('(')) => {
                self.advance();
                self.expect_punct('(')?;
                let precision = self.unsigned()?;
                self.expect_punct(',')?;
                let scale = self.unsigned()?;
                self.expect_punct(')')?;
                Ok(TypeExpr::Decimal { precision, scale })
            }
            _ => {
                if let Some(primitive) = PRIMITIVES.iter().find(|p| **p == name) {
                    self.advance();
                    return Ok(TypeExpr::Primitive {
                        name: primitive.to_string(),
                        properties: Map::new(),
                    });
                }
                if let Some((base, logical_type)) = logical(&name) {
                    self.advance();
                    return Ok(TypeExpr::Logical { base, logical_type });
                }
                self.reference()
            }
        }
    }

    fn json_value(&mut self) -> Result<Value, ParseError> {
        match self.peek().clone() {
            Token::Str(s) => {
                self.advance();
                Ok(Value::String(s))
            }
            Token::Number(n) => {
                let number = if let Ok(i) = n.parse::<i64>() {
                    Number::from(i)
                } else {
                    n.parse::<f64>()
                        .ok()
                        .and_then(Number::from_f64)
                        .ok_or_else(|| self.error(format!("invalid number {n}")))?
                };
                self.advance();
                Ok(Value::Number(number))
            }
            Token::Ident(word) => {
                let value = match word.as_str() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    "null" => Value::Null,
                    _ => return Err(self.unexpected("JSON value")),
                };
                self.advance();
                Ok(value)
            }
            Token::Punct('[') => {
                self.advance();
                let mut items = Vec::new();
                while !self.is_punct(']') {
                    items.push(self.json_value()?);
                    if !self.is_punct(',') {
                        break;
                    }
                    self.advance();
                }
                self.expect_punct(']')?;
                Ok(Value::Array(items))
            }
            Token::Punct('{') => {
                self.advance();
                let mut object = Map::new();
                while !self.is_punct('}') {
                    let key = self.string()?;
                    self.expect_punct(':')?;
                    let value = self.json_value()?;
                    object.insert(key, value);
                    if !self.is_punct(',') {
                        break;
                    }
                    self.advance();
                }
                self.expect_punct('}')?;
                Ok(Value::Object(object))
            }
            _ => Err(self.unexpected("JSON value")),
        }
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Ident(i) => format!("'{i}'"),
        Token::Str(s) => format!("\"{s}\""),
        Token::Number(n) => n.clone(),
        Token::Annotation(a) => format!("@{a}"),
        Token::Punct(p) => format!("'{p}'"),
        Token::Eof => "end of file".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idl::lexer::tokenize;

    fn parse_str(src: &str) -> Protocol {
        parse(&tokenize(src).unwrap()).unwrap()
    }

    #[test]
    fn test_record_enum_fixed() {
        let protocol = parse_str(
            r#"
            @namespace("ch.example")
            protocol Zones {
                /** A zone */
                record Zone {
                    string id;
                    int? level = null;
                    array<string> tags = [];
                    union { null, Kind } kind = null;
                    decimal(9, 2) amount;
                    timestamp_ms at;
                }
                enum Kind { INDOOR, OUTDOOR } = INDOOR;
                fixed Hash(16);
            }
            "#,
        );
        assert_eq!(protocol.name, "Zones");
        assert_eq!(protocol.namespace.as_deref(), Some("ch.example"));
        assert_eq!(protocol.declarations.len(), 3);

        let Declaration::Named(zone) = &protocol.declarations[0] else {
            panic!("expected record");
        };
        assert_eq!(zone.doc.as_deref(), Some("A zone"));
        let NamedBody::Record { fields, error } = &zone.body else {
            panic!("expected record body");
        };
        assert!(!error);
        assert_eq!(fields.len(), 6);
        assert!(matches!(fields[1].ty, TypeExpr::Nullable(_)));
        assert_eq!(fields[1].default, Some(Value::Null));
        assert_eq!(
            fields[3].ty,
            TypeExpr::Union(vec![
                TypeExpr::Primitive { name: "null".into(), properties: Map::new() },
                TypeExpr::Reference { name: "Kind".into(), namespace: Some("ch.example".into()) },
            ])
        );
        assert_eq!(fields[4].ty, TypeExpr::Decimal { precision: 9, scale: 2 });

        let Declaration::Named(kind) = &protocol.declarations[1] else {
            panic!("expected enum");
        };
        assert!(matches!(&kind.body, NamedBody::Enum { default: Some(d), .. } if d == "INDOOR"));
    }

    #[test]
    fn test_imports_and_messages() {
        let protocol = parse_str(
            r#"
            protocol Svc {
                import idl "Common.avdl";
                import schema "Thing.avsc";
                error Failure { string reason; }
                string lookup(string key, int limit = 10) throws Failure;
                void ping() oneway;
            }
            "#,
        );
        assert!(matches!(
            &protocol.declarations[0],
            Declaration::Import { kind: ImportKind::Idl, path } if path == "Common.avdl"
        ));
        let Declaration::Message(lookup) = &protocol.declarations[3] else {
            panic!("expected message");
        };
        assert_eq!(lookup.request.len(), 2);
        assert_eq!(lookup.errors.len(), 1);
        let Declaration::Message(ping) = &protocol.declarations[4] else {
            panic!("expected message");
        };
        assert!(ping.one_way);
        assert!(ping.response.is_none());
    }

    #[test]
    fn test_nested_namespace_annotation_scopes_references() {
        let protocol = parse_str(
            r#"
            @namespace("outer")
            protocol P {
                @namespace("inner") record A { B b; }
                record C { B b; }
            }
            "#,
        );
        let refs: Vec<_> = protocol
            .declarations
            .iter()
            .filter_map(|d| match d {
                Declaration::Named(NamedSchema { body: NamedBody::Record { fields, .. }, .. }) => {
                    Some(fields[0].ty.clone())
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            refs,
            vec![
                TypeExpr::Reference { name: "B".into(), namespace: Some("inner".into()) },
                TypeExpr::Reference { name: "B".into(), namespace: Some("outer".into()) },
            ]
        );
    }

    #[test]
    fn test_syntax_error_position() {
        let err = parse(&tokenize("protocol P {\n record A { string }\n}").unwrap()).unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("identifier"), "{}", err.message);
    }
}
