//! JSON program files: type declarations, the lambda to compile, its captured state, options and arguments.
//!
//! ```json
//! {
//!   "types": [{ "name": "Node", "fields": [{ "name": "next", "ty": { "class": 9 } }] }],
//!   "lambda": { "name": "main", "params": [], "ret": { "num": "I32" }, "body": { ... } },
//!   "constants": [{ "ty": "str", "value": "hello" }],
//!   "closure": [{ "num": "I32" }],
//!   "options": { "null_checks": true },
//!   "args": [1, null, [1, 2, 3]]
//! }
//! ```
//!
//! ## Notes
//!
//! - User types are numbered in declaration order, starting right after the builtin exception types; trees refer to
//!   them by that id. Declarations may name a base class declared earlier (or a builtin exception).
//! - Properties declared here are auto-properties backed by a hidden field.
//! - Arguments are converted to runtime values by the type of the matching lambda parameter.

use std::path::Path;

use exprc_core::{Num, NumKind};
use exprc_vm::metadata::{MetadataError, TypeKind};
use exprc_vm::{Ty, TypeRegistry, Value};
use miette::Diagnostic;
use serde::Deserialize;
use thiserror::Error;

use crate::backend::{CompileOptions, ResolvedLambda};
use crate::ir::LambdaExpr;

/// Failure loading a program file or converting its arguments.
#[derive(Debug, Error, Diagnostic)]
pub enum ProgramError {
    #[error("cannot read {path}: {message}")]
    #[diagnostic(code(exprc::program::io))]
    Io { path: String, message: String },

    #[error("invalid program JSON: {0}")]
    #[diagnostic(code(exprc::program::json), help("see `exprc --help` for the program file layout"))]
    Json(#[from] serde_json::Error),

    #[error("unknown base type '{0}'")]
    #[diagnostic(code(exprc::program::unknown_type), help("declare base classes before the types deriving from them"))]
    UnknownType(String),

    #[error("structs cannot derive from '{0}'")]
    #[diagnostic(code(exprc::program::struct_base))]
    StructBase(String),

    #[error("{name} expects {expected} argument(s), got {found}")]
    #[diagnostic(code(exprc::program::argument_count))]
    ArgumentCount { name: String, expected: usize, found: usize },

    #[error("{what}: expected {expected}, found {found}")]
    #[diagnostic(code(exprc::program::bad_value))]
    BadValue { what: String, expected: String, found: String },

    #[error(transparent)]
    #[diagnostic(code(exprc::program::metadata))]
    Metadata(#[from] MetadataError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: Ty,
    #[serde(default, rename = "static")]
    pub is_static: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: TypeKind,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
    #[serde(default)]
    pub properties: Vec<FieldDecl>,
}

fn default_kind() -> TypeKind {
    TypeKind::Class
}

/// A hoisted constant with the type its JSON value converts to.
#[derive(Debug, Clone, Deserialize)]
pub struct ConstantDecl {
    pub ty: Ty,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgramFile {
    #[serde(default)]
    pub types: Vec<TypeDecl>,
    pub lambda: LambdaExpr,
    #[serde(default)]
    pub constants: Vec<ConstantDecl>,
    #[serde(default)]
    pub closure: Vec<Ty>,
    #[serde(default)]
    pub options: CompileOptions,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

/// A loaded program: registry, resolved lambda and the file's options and arguments.
#[derive(Debug)]
pub struct Program {
    pub registry: TypeRegistry,
    pub resolved: ResolvedLambda,
    pub options: CompileOptions,
    pub args: Vec<serde_json::Value>,
}

impl Program {
    pub fn load(path: &Path) -> Result<Self, ProgramError> {
        let text = std::fs::read_to_string(path).map_err(|e| ProgramError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ProgramError> {
        let file: ProgramFile = serde_json::from_str(text)?;
        let registry = build_registry(&file.types)?;
        let constants = file
            .constants
            .iter()
            .enumerate()
            .map(|(i, c)| to_value(&c.value, &c.ty, &registry, &format!("constant #{}", i)))
            .collect::<Result<Vec<_>, _>>()?;
        let resolved = ResolvedLambda::new(file.lambda)
            .with_constants(constants)
            .with_closure(file.closure);
        Ok(Self {
            registry,
            resolved,
            options: file.options,
            args: file.args,
        })
    }

    /// Convert JSON arguments (the file's own when `args` is `None`) against the lambda's parameters.
    pub fn arguments(&self, args: Option<&[serde_json::Value]>) -> Result<Vec<Value>, ProgramError> {
        let args = args.unwrap_or(&self.args);
        let lambda = &self.resolved.lambda;
        if args.len() != lambda.params.len() {
            return Err(ProgramError::ArgumentCount {
                name: lambda.name.clone(),
                expected: lambda.params.len(),
                found: args.len(),
            });
        }
        args.iter()
            .zip(&lambda.params)
            .map(|(arg, param)| to_value(arg, &param.ty, &self.registry, &param.name))
            .collect()
    }
}

fn build_registry(types: &[TypeDecl]) -> Result<TypeRegistry, ProgramError> {
    let mut registry = TypeRegistry::new();
    let mut ids = Vec::with_capacity(types.len());
    for decl in types {
        let id = match decl.kind {
            TypeKind::Class => {
                let base = match &decl.base {
                    Some(name) => Some(registry.find_type(name).ok_or_else(|| ProgramError::UnknownType(name.clone()))?),
                    None => None,
                };
                registry.define_class(decl.name.clone(), base)
            }
            TypeKind::Struct => {
                if let Some(base) = &decl.base {
                    return Err(ProgramError::StructBase(base.clone()));
                }
                registry.define_struct(decl.name.clone())
            }
        };
        ids.push(id);
    }
    // Members are added once every type exists so fields can refer to later declarations.
    for (decl, id) in types.iter().zip(ids) {
        for field in &decl.fields {
            if field.is_static {
                registry.add_static_field(id, field.name.clone(), field.ty.clone());
            } else {
                registry.add_field(id, field.name.clone(), field.ty.clone());
            }
        }
        for prop in &decl.properties {
            if prop.is_static {
                registry.add_static_auto_property(id, prop.name.clone(), prop.ty.clone());
            } else {
                registry.add_auto_property(id, prop.name.clone(), prop.ty.clone());
            }
        }
    }
    Ok(registry)
}

/// Convert a JSON value to a runtime value of `ty`.
pub fn to_value(json: &serde_json::Value, ty: &Ty, registry: &TypeRegistry, what: &str) -> Result<Value, ProgramError> {
    use serde_json::Value as J;

    let bad = |expected: &str| ProgramError::BadValue {
        what: what.to_string(),
        expected: expected.to_string(),
        found: json.to_string(),
    };
    Ok(match (ty, json) {
        (_, J::Null) if ty.can_be_absent() => Value::default_for(ty, registry)?,
        (Ty::Nullable(inner), _) => Value::some(to_value(json, inner, registry, what)?),
        (Ty::Bool, J::Bool(b)) => Value::Bool(*b),
        (Ty::Num(kind), J::Number(n)) => Value::Num(to_num(n, *kind).ok_or_else(|| bad(kind.name()))?),
        (Ty::Str | Ty::Object, J::String(s)) => Value::str(s),
        (Ty::Object, J::Bool(b)) => Value::Bool(*b),
        (Ty::Object, J::Number(n)) => Value::Num(to_num(n, NumKind::F64).ok_or_else(|| bad("a number"))?),
        (Ty::Array(elem), J::Array(items)) => Value::new_array((**elem).clone(), convert_items(items, elem, registry, what)?),
        (Ty::List(elem), J::Array(items)) => Value::new_list((**elem).clone(), convert_items(items, elem, registry, what)?),
        (Ty::Class(id) | Ty::Struct(id), J::Object(map)) => {
            let mut value = match ty {
                Ty::Class(_) => {
                    let fields = registry
                        .instance_layout(*id)?
                        .iter()
                        .map(|t| Value::default_for(t, registry))
                        .collect::<Result<Vec<_>, _>>()?;
                    Value::new_object(*id, fields)
                }
                _ => Value::default_for(ty, registry)?,
            };
            for (name, field_json) in map {
                let field = registry.find_field(*id, name)?;
                let field_ty = registry.field(field)?.ty.clone();
                let slot = registry.field_slot(field)?;
                let field_value = to_value(field_json, &field_ty, registry, &format!("{}.{}", what, name))?;
                match &mut value {
                    Value::Object(obj) => {
                        if let Some(cell) = obj.fields.borrow_mut().get_mut(slot) {
                            *cell = field_value;
                        }
                    }
                    Value::Struct(s) => {
                        if let Some(cell) = s.fields.get_mut(slot) {
                            *cell = field_value;
                        }
                    }
                    _ => {}
                }
            }
            value
        }
        _ => return Err(bad(&ty.display(registry))),
    })
}

fn convert_items(
    items: &[serde_json::Value],
    elem: &Ty,
    registry: &TypeRegistry,
    what: &str,
) -> Result<Vec<Value>, ProgramError> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| to_value(item, elem, registry, &format!("{}[{}]", what, i)))
        .collect()
}

/// Exact conversion of a JSON number to `kind`; `None` when out of range.
fn to_num(n: &serde_json::Number, kind: NumKind) -> Option<Num> {
    let raw = if let Some(i) = n.as_i64() {
        Num::I64(i)
    } else if let Some(u) = n.as_u64() {
        Num::U64(u)
    } else {
        Num::F64(n.as_f64()?)
    };
    if kind.is_integral() && matches!(raw, Num::F64(_)) {
        return None;
    }
    raw.convert(kind, true).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    const PROGRAM: &str = r#"{
        "types": [
            { "name": "Node", "fields": [{ "name": "value", "ty": { "num": "I32" } }] }
        ],
        "lambda": {
            "name": "main",
            "params": [{ "id": 0, "name": "x", "ty": { "nullable": { "num": "I32" } } }],
            "ret": { "nullable": { "num": "I32" } },
            "body": { "kind": { "parameter": 0 }, "ty": { "nullable": { "num": "I32" } } }
        },
        "args": [41]
    }"#;

    #[test]
    fn test_parse_defines_user_types_after_builtins() {
        let program = Program::parse(PROGRAM).unwrap();
        let id = program.registry.find_type("Node").unwrap();
        assert_eq!(id as usize, TypeRegistry::new().type_count());
        assert!(program.options.null_checks);
    }

    #[test]
    fn test_arguments_follow_parameter_types() {
        let program = Program::parse(PROGRAM).unwrap();
        let args = program.arguments(None).unwrap();
        assert_eq!(args, vec![Value::some(Num::I32(41))]);
        let absent = program.arguments(Some(&[json!(null)])).unwrap();
        assert_eq!(absent, vec![Value::none()]);
        assert!(program.arguments(Some(&[])).is_err());
    }

    #[test]
    fn test_out_of_range_numbers_are_rejected() {
        let reg = TypeRegistry::new();
        assert!(to_value(&json!(300), &Ty::U8, &reg, "x").is_err());
        assert!(to_value(&json!(1.5), &Ty::I32, &reg, "x").is_err());
        assert_eq!(to_value(&json!(1.5), &Ty::F64, &reg, "x").unwrap(), Value::Num(Num::F64(1.5)));
    }

    #[test]
    fn test_objects_fill_named_fields() {
        let program = Program::parse(PROGRAM).unwrap();
        let id = program.registry.find_type("Node").unwrap();
        let value = to_value(&json!({ "value": 7 }), &Ty::Class(id), &program.registry, "n").unwrap();
        let Value::Object(obj) = value else { panic!("expected an object") };
        assert_eq!(obj.fields.borrow()[0], Value::Num(Num::I32(7)));
    }
}
