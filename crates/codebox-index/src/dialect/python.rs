use tree_sitter::Node;

use super::{
    clean_annotation, field_text, named_children, node_text, terminal_name, DefKind, Definition,
    DialectRules,
};
use crate::chunk::Parameter;

/// Python: `def`, `class`, and their decorated forms.
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonDialect;

impl DialectRules for PythonDialect {
    fn definition<'t>(&self, node: Node<'t>, src: &str) -> Option<Definition<'t>> {
        match node.kind() {
            "function_definition" => {
                let name = field_text(node, "name", src)?;
                Some(Definition::new(DefKind::Function, name, node))
            }
            "class_definition" => {
                let name = field_text(node, "name", src)?;
                Some(Definition::new(DefKind::Class, name, node))
            }
            "decorated_definition" => {
                let inner = node.child_by_field_name("definition")?;
                self.definition(inner, src).map(|d| d.wrapped_in(node))
            }
            _ => None,
        }
    }

    fn is_import(&self, node: Node<'_>) -> bool {
        matches!(
            node.kind(),
            "import_statement" | "import_from_statement" | "future_import_statement"
        )
    }

    fn callee(&self, node: Node<'_>, src: &str) -> Option<String> {
        if node.kind() != "call" {
            return None;
        }
        terminal_name(node.child_by_field_name("function")?, src)
    }

    fn parameters(&self, def: &Definition<'_>, src: &str) -> Vec<Parameter> {
        let Some(params) = def.node.child_by_field_name("parameters") else {
            return Vec::new();
        };
        named_children(params)
            .into_iter()
            .filter_map(|p| python_parameter(p, src))
            .collect()
    }

    fn return_type(&self, def: &Definition<'_>, src: &str) -> Option<String> {
        def.node
            .child_by_field_name("return_type")
            .and_then(|n| clean_annotation(node_text(n, src)))
    }

    fn docstring(&self, def: &Definition<'_>, src: &str) -> Option<String> {
        let body = def.body?;
        let first = named_children(body)
            .into_iter()
            .find(|n| n.kind() != "comment")?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let literal = first.named_child(0)?;
        (literal.kind() == "string").then(|| node_text(literal, src).to_string())
    }

    fn decorators(&self, def: &Definition<'_>, src: &str) -> Vec<String> {
        if def.outer.kind() != "decorated_definition" {
            return Vec::new();
        }
        named_children(def.outer)
            .into_iter()
            .filter(|n| n.kind() == "decorator")
            .map(|n| node_text(n, src).trim().to_string())
            .collect()
    }
}

fn python_parameter(node: Node<'_>, src: &str) -> Option<Parameter> {
    let text = |n: Node<'_>| node_text(n, src).trim().to_string();
    match node.kind() {
        "identifier" | "list_splat_pattern" | "dictionary_splat_pattern" => {
            Some(Parameter::named(text(node)))
        }
        "typed_parameter" => {
            let name = node
                .named_child(0)
                .map(text)
                .unwrap_or_else(|| text(node));
            Some(Parameter {
                name,
                type_annotation: field_text(node, "type", src),
                default: None,
            })
        }
        "default_parameter" | "typed_default_parameter" => Some(Parameter {
            name: field_text(node, "name", src)?,
            type_annotation: field_text(node, "type", src),
            default: field_text(node, "value", src),
        }),
        _ => None,
    }
}
