use tree_sitter::Node;

use super::{
    field_text, is_comment, leading_doc_comments, named_children, node_text, DefKind, Definition,
    DialectRules,
};
use crate::chunk::Parameter;

/// Java: type declarations, methods and constructors.
#[derive(Debug, Clone, Copy, Default)]
pub struct JavaDialect;

fn is_annotation(node: Node<'_>) -> bool {
    matches!(node.kind(), "annotation" | "marker_annotation")
}

fn modifiers(node: Node<'_>) -> Option<Node<'_>> {
    named_children(node).into_iter().find(|n| n.kind() == "modifiers")
}

impl DialectRules for JavaDialect {
    fn definition<'t>(&self, node: Node<'t>, src: &str) -> Option<Definition<'t>> {
        let kind = match node.kind() {
            "class_declaration" | "interface_declaration" | "enum_declaration"
            | "record_declaration" | "annotation_type_declaration" => DefKind::Class,
            "method_declaration" | "constructor_declaration" => DefKind::Method,
            _ => return None,
        };
        let name = field_text(node, "name", src)?;
        let mut def = Definition::new(kind, name, node);
        if let Some(mods) = modifiers(node) {
            let mut cursor = mods.walk();
            let after_annotations = mods
                .children(&mut cursor)
                .find(|c| !is_annotation(*c) && !is_comment(*c))
                .map(|c| c.start_byte());
            def.signature_start = after_annotations.unwrap_or(mods.end_byte());
        }
        Some(def)
    }

    fn is_import(&self, node: Node<'_>) -> bool {
        node.kind() == "import_declaration"
    }

    fn callee(&self, node: Node<'_>, src: &str) -> Option<String> {
        if node.kind() != "method_invocation" {
            return None;
        }
        field_text(node, "name", src)
    }

    fn parameters(&self, def: &Definition<'_>, src: &str) -> Vec<Parameter> {
        let Some(params) = def.node.child_by_field_name("parameters") else {
            return Vec::new();
        };
        named_children(params)
            .into_iter()
            .filter_map(|p| match p.kind() {
                "formal_parameter" => Some(Parameter {
                    name: field_text(p, "name", src)?,
                    type_annotation: field_text(p, "type", src),
                    default: None,
                }),
                "spread_parameter" => {
                    let declarator = named_children(p)
                        .into_iter()
                        .find(|n| n.kind() == "variable_declarator")?;
                    let ty = named_children(p)
                        .into_iter()
                        .find(|n| n.kind() != "modifiers" && n.kind() != "variable_declarator")
                        .map(|n| format!("{}...", node_text(n, src).trim()));
                    Some(Parameter {
                        name: field_text(declarator, "name", src)?,
                        type_annotation: ty,
                        default: None,
                    })
                }
                _ => None,
            })
            .collect()
    }

    fn return_type(&self, def: &Definition<'_>, src: &str) -> Option<String> {
        if def.node.kind() != "method_declaration" {
            return None;
        }
        field_text(def.node, "type", src)
    }

    fn docstring(&self, def: &Definition<'_>, src: &str) -> Option<String> {
        leading_doc_comments(def.outer, src, |text| text.starts_with("/**"), |_| false)
    }

    fn decorators(&self, def: &Definition<'_>, src: &str) -> Vec<String> {
        modifiers(def.node)
            .map(|mods| {
                named_children(mods)
                    .into_iter()
                    .filter(|n| is_annotation(*n))
                    .map(|n| node_text(n, src).trim().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }
}
