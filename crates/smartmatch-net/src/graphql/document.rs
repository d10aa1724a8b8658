//! Static analysis of GraphQL documents.
//!
//! The client needs three facts about an outgoing document: the kind of its
//! main operation (to route it), the operation name (sent as
//! `operationName`), and the root selection with each field's arguments (to
//! key results in the normalized cache). Documents are parsed with
//! `graphql-parser`; nothing is validated against a schema.

use std::collections::HashSet;

use graphql_parser::query::{
    Definition, FragmentDefinition, OperationDefinition, Selection, SelectionSet, Value as GqlValue,
    parse_query,
};
use serde_json::{Map, Number, Value};

use super::request::OperationType;

/// An argument as written in the document.
///
/// Literals are already JSON; variable references are resolved against the
/// request's variables when a cache key is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentValue {
    /// `$name`.
    Variable(String),
    /// A scalar or enum literal. Enums become strings.
    Literal(Value),
    /// A list literal.
    List(Vec<ArgumentValue>),
    /// An input object literal.
    Object(Vec<(String, ArgumentValue)>),
}

impl ArgumentValue {
    fn from_document<'a>(value: &GqlValue<'a, &'a str>) -> Result<Self, String> {
        Ok(match value {
            GqlValue::Variable(name) => Self::Variable((*name).to_string()),
            GqlValue::Null => Self::Literal(Value::Null),
            GqlValue::Boolean(b) => Self::Literal(Value::Bool(*b)),
            GqlValue::Int(n) => Self::Literal(Value::from(
                n.as_i64().ok_or_else(|| "invalid Int literal".to_string())?,
            )),
            GqlValue::Float(f) => {
                Self::Literal(Number::from_f64(*f).map_or(Value::Null, Value::Number))
            }
            GqlValue::String(s) => Self::Literal(Value::String(s.clone())),
            GqlValue::Enum(e) => Self::Literal(Value::String((*e).to_string())),
            GqlValue::List(items) => Self::List(
                items
                    .iter()
                    .map(Self::from_document)
                    .collect::<Result<_, _>>()?,
            ),
            GqlValue::Object(fields) => Self::Object(
                fields
                    .iter()
                    .map(|(name, v)| -> Result<_, String> {
                        Ok(((*name).to_string(), Self::from_document(v)?))
                    })
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// The JSON value this argument takes under `variables`.
    ///
    /// `None` when it is a variable the request does not supply. Unsupplied
    /// variables inside an object drop that field; inside a list they become
    /// `null`.
    pub fn resolve(&self, variables: &Map<String, Value>) -> Option<Value> {
        match self {
            Self::Variable(name) => variables.get(name).cloned(),
            Self::Literal(value) => Some(value.clone()),
            Self::List(items) => Some(Value::Array(
                items
                    .iter()
                    .map(|item| item.resolve(variables).unwrap_or(Value::Null))
                    .collect(),
            )),
            Self::Object(fields) => Some(Value::Object(
                fields
                    .iter()
                    .filter_map(|(name, v)| v.resolve(variables).map(|v| (name.clone(), v)))
                    .collect(),
            )),
        }
    }
}

/// One field of the root selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootField {
    /// Alias, or the field name when there is none.
    pub response_key: String,
    /// Schema field name.
    pub name: String,
    /// Arguments in document order.
    pub arguments: Vec<(String, ArgumentValue)>,
}

impl RootField {
    /// Argument values under `variables`, by argument name. Arguments bound
    /// to unsupplied variables are left out.
    pub fn resolve_arguments(&self, variables: &Map<String, Value>) -> Map<String, Value> {
        self.arguments
            .iter()
            .filter_map(|(name, value)| value.resolve(variables).map(|v| (name.clone(), v)))
            .collect()
    }
}

/// What the client knows about a document's main operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSummary {
    /// Kind of the main operation.
    pub operation_type: OperationType,
    /// Name of the main operation, if it has one.
    pub name: Option<String>,
    /// Fields selected at the root, in document order, one per response
    /// key. Fragment spreads and inline fragments are flattened.
    pub root_fields: Vec<RootField>,
}

/// Parse `query` and summarize its main operation.
///
/// The main operation is the one named `operation_name` when given,
/// otherwise the first operation definition in the document (fragment
/// definitions are skipped).
pub fn summarize(query: &str, operation_name: Option<&str>) -> Result<OperationSummary, String> {
    let document = parse_query::<&str>(query).map_err(|e| e.to_string())?;

    let mut operations = Vec::new();
    let mut fragments = Vec::new();
    for definition in &document.definitions {
        match definition {
            Definition::Operation(op) => operations.push(op),
            Definition::Fragment(fragment) => fragments.push(fragment),
        }
    }

    let main = match operation_name {
        Some(wanted) => operations
            .into_iter()
            .find(|op| definition_name(op) == Some(wanted))
            .ok_or_else(|| format!("operation '{wanted}' not found in document"))?,
        None => operations
            .into_iter()
            .next()
            .ok_or_else(|| "document contains no operation".to_string())?,
    };

    let (operation_type, selection_set) = match main {
        OperationDefinition::SelectionSet(set) => (OperationType::Query, set),
        OperationDefinition::Query(q) => (OperationType::Query, &q.selection_set),
        OperationDefinition::Mutation(m) => (OperationType::Mutation, &m.selection_set),
        OperationDefinition::Subscription(s) => (OperationType::Subscription, &s.selection_set),
    };

    let mut root_fields = Vec::new();
    let mut visited = HashSet::new();
    collect_root_fields(selection_set, &fragments, &mut visited, &mut root_fields)?;

    Ok(OperationSummary {
        operation_type,
        name: definition_name(main).map(str::to_string),
        root_fields,
    })
}

fn definition_name<'a>(op: &OperationDefinition<'a, &'a str>) -> Option<&'a str> {
    match op {
        OperationDefinition::SelectionSet(_) => None,
        OperationDefinition::Query(q) => q.name,
        OperationDefinition::Mutation(m) => m.name,
        OperationDefinition::Subscription(s) => s.name,
    }
}

fn collect_root_fields<'a>(
    selection_set: &SelectionSet<'a, &'a str>,
    fragments: &[&FragmentDefinition<'a, &'a str>],
    visited: &mut HashSet<&'a str>,
    fields: &mut Vec<RootField>,
) -> Result<(), String> {
    for selection in &selection_set.items {
        match selection {
            Selection::Field(field) => {
                let key = field.alias.unwrap_or(field.name);
                if fields.iter().any(|f| f.response_key == key) {
                    continue;
                }
                let arguments = field
                    .arguments
                    .iter()
                    .map(|(name, value)| -> Result<_, String> {
                        Ok(((*name).to_string(), ArgumentValue::from_document(value)?))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                fields.push(RootField {
                    response_key: key.to_string(),
                    name: field.name.to_string(),
                    arguments,
                });
            }
            Selection::InlineFragment(inline) => {
                collect_root_fields(&inline.selection_set, fragments, visited, fields)?;
            }
            Selection::FragmentSpread(spread) => {
                // A fragment spread twice contributes the same keys; a cycle is
                // invalid GraphQL and stops here.
                if !visited.insert(spread.fragment_name) {
                    continue;
                }
                let fragment = fragments
                    .iter()
                    .find(|f| f.name == spread.fragment_name)
                    .ok_or_else(|| format!("unknown fragment '{}'", spread.fragment_name))?;
                collect_root_fields(&fragment.selection_set, fragments, visited, fields)?;
            }
        }
    }
    Ok(())
}
