use tree_sitter::Node;

use super::{
    field_text, leading_doc_comments, named_children, node_text, terminal_name, DefKind,
    Definition, DialectRules,
};
use crate::chunk::Parameter;

/// C and C++: function definitions, record types with bodies, namespaces
/// and templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct CFamilyDialect;

/// Innermost `function_declarator` under a possibly pointer-wrapped declarator.
fn function_declarator(node: Node<'_>) -> Option<Node<'_>> {
    let mut current = node.child_by_field_name("declarator")?;
    loop {
        match current.kind() {
            "function_declarator" => return Some(current),
            "pointer_declarator" | "reference_declarator" | "parenthesized_declarator" => {
                current = current
                    .child_by_field_name("declarator")
                    .or_else(|| current.named_child(0))?;
            }
            _ => return None,
        }
    }
}

/// Identifier named by a declarator, looking through pointers and arrays.
fn declarator_name(node: Node<'_>, src: &str) -> Option<String> {
    let mut current = node;
    loop {
        if let Some(name) = terminal_name(current, src) {
            return Some(name);
        }
        current = current
            .child_by_field_name("declarator")
            .or_else(|| current.named_child(0))?;
    }
}

impl DialectRules for CFamilyDialect {
    fn definition<'t>(&self, node: Node<'t>, src: &str) -> Option<Definition<'t>> {
        match node.kind() {
            "function_definition" => {
                let declarator = function_declarator(node)?;
                let name = declarator_name(declarator.child_by_field_name("declarator")?, src)?;
                Some(Definition::new(DefKind::Function, name, node))
            }
            "class_specifier" | "struct_specifier" | "union_specifier" | "enum_specifier" => {
                node.child_by_field_name("body")?;
                let name = terminal_name(node.child_by_field_name("name")?, src)?;
                Some(Definition::new(DefKind::Class, name, node))
            }
            "namespace_definition" => {
                let name = field_text(node, "name", src)?;
                Some(Definition::new(DefKind::Class, name, node))
            }
            "template_declaration" => {
                let inner = named_children(node)
                    .into_iter()
                    .find_map(|child| self.definition(child, src))?;
                let mut def = inner.wrapped_in(node);
                def.signature_start = node.start_byte();
                Some(def)
            }
            _ => None,
        }
    }

    fn is_import(&self, node: Node<'_>) -> bool {
        node.kind() == "preproc_include"
    }

    fn callee(&self, node: Node<'_>, src: &str) -> Option<String> {
        if node.kind() != "call_expression" {
            return None;
        }
        terminal_name(node.child_by_field_name("function")?, src)
    }

    fn parameters(&self, def: &Definition<'_>, src: &str) -> Vec<Parameter> {
        let Some(params) = function_declarator(def.node)
            .and_then(|d| d.child_by_field_name("parameters"))
        else {
            return Vec::new();
        };
        named_children(params)
            .into_iter()
            .filter_map(|p| match p.kind() {
                "parameter_declaration" | "optional_parameter_declaration" => {
                    let declarator = p.child_by_field_name("declarator");
                    let name = declarator.and_then(|d| declarator_name(d, src));
                    let type_annotation = match (declarator, &name) {
                        (Some(d), Some(name)) => {
                            let base = src
                                .get(p.start_byte()..d.start_byte())
                                .unwrap_or("")
                                .trim();
                            let marks = node_text(d, src).replacen(name.as_str(), "", 1);
                            let marks = marks.split('=').next().unwrap_or("").trim().to_string();
                            let joined = format!("{base} {marks}");
                            let joined = joined.trim();
                            (!joined.is_empty()).then(|| joined.to_string())
                        }
                        _ => Some(node_text(p, src).trim().to_string()).filter(|t| !t.is_empty()),
                    };
                    if type_annotation.as_deref() == Some("void") && name.is_none() {
                        return None;
                    }
                    Some(Parameter {
                        name: name.unwrap_or_else(|| "_".into()),
                        type_annotation,
                        default: field_text(p, "default_value", src),
                    })
                }
                "variadic_parameter" => Some(Parameter::named("...")),
                _ => None,
            })
            .collect()
    }

    fn return_type(&self, def: &Definition<'_>, src: &str) -> Option<String> {
        if def.node.kind() != "function_definition" {
            return None;
        }
        field_text(def.node, "type", src)
    }

    fn docstring(&self, def: &Definition<'_>, src: &str) -> Option<String> {
        leading_doc_comments(
            def.outer,
            src,
            |text| text.starts_with("///") || text.starts_with("/**"),
            |_| false,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::testing::{find, parse};
    use codebox_scan::Language;

    #[test]
    fn pointer_returning_function() {
        let src = "#include <stdio.h>\n\n/** Copy a string. */\nchar *dup(const char *s, int n) {\n    return helper(s);\n}\n";
        let tree = parse(Language::C, src);
        let node = find(tree.root_node(), "function_definition");
        let def = CFamilyDialect.definition(node, src).unwrap();
        assert_eq!(def.name, "dup");
        let params = CFamilyDialect.parameters(&def, src);
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "s");
        assert_eq!(params[0].type_annotation.as_deref(), Some("const char *"));
        assert_eq!(params[1].type_annotation.as_deref(), Some("int"));
        assert_eq!(
            CFamilyDialect.docstring(&def, src).as_deref(),
            Some("/** Copy a string. */")
        );
        assert_eq!(
            CFamilyDialect.signature(&def, src).as_deref(),
            Some("char *dup(const char *s, int n)")
        );
        let include = find(tree.root_node(), "preproc_include");
        assert!(CFamilyDialect.is_import(include));
    }

    #[test]
    fn cpp_class_and_qualified_method() {
        let src = "namespace app {\nclass Box {\n  int size() const { return 1; }\n};\n}\nint Box::area() { return size(); }\n";
        let tree = parse(Language::Cpp, src);
        let ns = find(tree.root_node(), "namespace_definition");
        assert_eq!(CFamilyDialect.definition(ns, src).unwrap().name, "app");
        let class = find(tree.root_node(), "class_specifier");
        let def = CFamilyDialect.definition(class, src).unwrap();
        assert_eq!(def.kind, DefKind::Class);
        assert_eq!(def.name, "Box");
        let mut stack = vec![tree.root_node()];
        let mut names = Vec::new();
        while let Some(node) = stack.pop() {
            if let Some(d) = CFamilyDialect.definition(node, src) {
                if d.kind == DefKind::Function {
                    names.push(d.name);
                }
            }
            let mut cursor = node.walk();
            stack.extend(node.children(&mut cursor));
        }
        names.sort();
        assert_eq!(names, vec!["area", "size"]);
    }
}
