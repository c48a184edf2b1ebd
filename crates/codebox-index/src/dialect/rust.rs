use tree_sitter::Node;

use super::{
    clean_annotation, field_text, is_comment, leading_doc_comments, leading_siblings,
    named_children, node_text, terminal_name, DefKind, Definition, DialectRules,
};
use crate::chunk::Parameter;

/// Rust: functions, type definitions, traits, impl blocks and inline modules.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustDialect;

fn is_attribute(node: Node<'_>) -> bool {
    node.kind() == "attribute_item"
}

impl DialectRules for RustDialect {
    fn definition<'t>(&self, node: Node<'t>, src: &str) -> Option<Definition<'t>> {
        let kind = match node.kind() {
            "function_item" | "function_signature_item" => DefKind::Function,
            "struct_item" | "enum_item" | "union_item" | "trait_item" => DefKind::Class,
            "mod_item" if node.child_by_field_name("body").is_some() => DefKind::Class,
            "impl_item" => {
                let name = terminal_name(node.child_by_field_name("type")?, src)?;
                return Some(Definition::new(DefKind::Class, name, node));
            }
            _ => return None,
        };
        let name = field_text(node, "name", src)?;
        Some(Definition::new(kind, name, node))
    }

    fn is_import(&self, node: Node<'_>) -> bool {
        matches!(node.kind(), "use_declaration" | "extern_crate_declaration")
    }

    fn callee(&self, node: Node<'_>, src: &str) -> Option<String> {
        if node.kind() != "call_expression" {
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
            .filter_map(|p| match p.kind() {
                "self_parameter" => Some(Parameter::named(node_text(p, src).trim())),
                "parameter" => Some(Parameter {
                    name: field_text(p, "pattern", src)?,
                    type_annotation: field_text(p, "type", src),
                    default: None,
                }),
                "variadic_parameter" => Some(Parameter::named("...")),
                _ => None,
            })
            .collect()
    }

    fn return_type(&self, def: &Definition<'_>, src: &str) -> Option<String> {
        def.node
            .child_by_field_name("return_type")
            .and_then(|n| clean_annotation(node_text(n, src)))
    }

    fn docstring(&self, def: &Definition<'_>, src: &str) -> Option<String> {
        leading_doc_comments(
            def.outer,
            src,
            |text| text.starts_with("///") || text.starts_with("/**"),
            is_attribute,
        )
    }

    fn decorators(&self, def: &Definition<'_>, src: &str) -> Vec<String> {
        leading_siblings(def.outer, src, is_attribute)
    }

    fn is_trivia(&self, node: Node<'_>) -> bool {
        is_comment(node) || is_attribute(node)
    }
}
