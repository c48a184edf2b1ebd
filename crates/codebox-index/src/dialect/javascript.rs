use tree_sitter::Node;

use super::{
    clean_annotation, field_text, leading_doc_comments, named_children, node_text, terminal_name,
    DefKind, Definition, DialectRules,
};
use crate::chunk::Parameter;

/// JavaScript, TypeScript and TSX share one rule set; TypeScript only adds
/// node kinds that never occur in JavaScript trees.
#[derive(Debug, Clone, Copy, Default)]
pub struct JavaScriptDialect;

const FUNCTION_VALUES: &[&str] = &[
    "arrow_function",
    "function_expression",
    "function",
    "generator_function",
];

impl JavaScriptDialect {
    fn declarator_definition<'t>(&self, node: Node<'t>, src: &str) -> Option<Definition<'t>> {
        let declarators: Vec<Node<'t>> = named_children(node)
            .into_iter()
            .filter(|n| n.kind() == "variable_declarator")
            .collect();
        let [declarator] = declarators.as_slice() else {
            return None;
        };
        let value = declarator.child_by_field_name("value")?;
        if !FUNCTION_VALUES.contains(&value.kind()) {
            return None;
        }
        let name = terminal_name(declarator.child_by_field_name("name")?, src)?;
        let mut def = Definition::new(DefKind::Function, name, value).wrapped_in(node);
        def.signature_start = node.start_byte();
        Some(def)
    }
}

impl DialectRules for JavaScriptDialect {
    fn definition<'t>(&self, node: Node<'t>, src: &str) -> Option<Definition<'t>> {
        let kind = match node.kind() {
            "function_declaration" | "generator_function_declaration" => DefKind::Function,
            "class_declaration" | "abstract_class_declaration" | "interface_declaration"
            | "enum_declaration" => DefKind::Class,
            "method_definition" | "method_signature" | "abstract_method_signature" => {
                DefKind::Method
            }
            "lexical_declaration" | "variable_declaration" => {
                return self.declarator_definition(node, src);
            }
            "export_statement" => {
                let inner = node.child_by_field_name("declaration")?;
                return self.definition(inner, src).map(|d| d.wrapped_in(node));
            }
            _ => return None,
        };
        let name = terminal_name(node.child_by_field_name("name")?, src)?;
        let mut def = Definition::new(kind, name, node);
        if let Some(last_decorator) = named_children(node)
            .into_iter()
            .filter(|n| n.kind() == "decorator")
            .last()
        {
            def.signature_start = last_decorator.end_byte();
        }
        Some(def)
    }

    fn is_import(&self, node: Node<'_>) -> bool {
        node.kind() == "import_statement"
    }

    fn callee(&self, node: Node<'_>, src: &str) -> Option<String> {
        if node.kind() != "call_expression" {
            return None;
        }
        terminal_name(node.child_by_field_name("function")?, src)
    }

    fn parameters(&self, def: &Definition<'_>, src: &str) -> Vec<Parameter> {
        let params = def
            .node
            .child_by_field_name("parameters")
            .or_else(|| def.node.child_by_field_name("parameter"));
        let Some(params) = params else {
            return Vec::new();
        };
        if params.kind() == "identifier" {
            return vec![Parameter::named(node_text(params, src))];
        }
        named_children(params)
            .into_iter()
            .filter_map(|p| js_parameter(p, src))
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
            |text| text.starts_with("/**") || text.starts_with("///"),
            |_| false,
        )
    }

    fn decorators(&self, def: &Definition<'_>, src: &str) -> Vec<String> {
        let mut found = Vec::new();
        for node in [def.outer, def.node] {
            for child in named_children(node) {
                if child.kind() == "decorator" {
                    let text = node_text(child, src).trim().to_string();
                    if !found.contains(&text) {
                        found.push(text);
                    }
                }
            }
            if def.outer == def.node {
                break;
            }
        }
        found
    }
}

fn js_parameter(node: Node<'_>, src: &str) -> Option<Parameter> {
    match node.kind() {
        "identifier" | "rest_pattern" | "object_pattern" | "array_pattern" => {
            Some(Parameter::named(node_text(node, src).trim()))
        }
        "assignment_pattern" => Some(Parameter {
            name: field_text(node, "left", src)?,
            type_annotation: None,
            default: field_text(node, "right", src),
        }),
        "required_parameter" | "optional_parameter" => {
            let mut name = field_text(node, "pattern", src)?;
            if node.kind() == "optional_parameter" {
                name.push('?');
            }
            Some(Parameter {
                name,
                type_annotation: node
                    .child_by_field_name("type")
                    .and_then(|t| clean_annotation(node_text(t, src))),
                default: field_text(node, "value", src),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::testing::{find, parse};
    use codebox_scan::Language;

    #[test]
    fn exported_arrow_function_is_a_definition() {
        let src = "/** Sum values. */\nexport const sum = (a, b = 2, ...rest) => a + b;\n";
        let tree = parse(Language::JavaScript, src);
        let node = find(tree.root_node(), "export_statement");
        let def = JavaScriptDialect.definition(node, src).unwrap();
        assert_eq!(def.name, "sum");
        assert_eq!(def.outer.kind(), "export_statement");
        let params = JavaScriptDialect.parameters(&def, src);
        let names: Vec<_> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "...rest"]);
        assert_eq!(params[1].default.as_deref(), Some("2"));
        assert_eq!(
            JavaScriptDialect.docstring(&def, src).as_deref(),
            Some("/** Sum values. */")
        );
        assert_eq!(
            JavaScriptDialect.signature(&def, src).as_deref(),
            Some("const sum = (a, b = 2, ...rest)")
        );
    }

    #[test]
    fn typescript_parameters_carry_types() {
        let src = "function greet(name: string, loud?: boolean): string {\n  return name;\n}\n";
        let tree = parse(Language::TypeScript, src);
        let node = find(tree.root_node(), "function_declaration");
        let def = JavaScriptDialect.definition(node, src).unwrap();
        let params = JavaScriptDialect.parameters(&def, src);
        assert_eq!(params[0].name, "name");
        assert_eq!(params[0].type_annotation.as_deref(), Some("string"));
        assert_eq!(params[1].name, "loud?");
        assert_eq!(JavaScriptDialect.return_type(&def, src).as_deref(), Some("string"));
    }

    #[test]
    fn method_call_resolves_property() {
        let src = "this.render(1);\n";
        let tree = parse(Language::JavaScript, src);
        let call = find(tree.root_node(), "call_expression");
        assert_eq!(JavaScriptDialect.callee(call, src).as_deref(), Some("render"));
    }
}
