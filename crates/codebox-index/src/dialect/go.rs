use tree_sitter::Node;

use super::{
    clean_annotation, field_text, leading_doc_comments, named_children, node_text, terminal_name,
    DefKind, Definition, DialectRules,
};
use crate::chunk::Parameter;

/// Go: functions, methods with receivers, and single type declarations.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoDialect;

impl DialectRules for GoDialect {
    fn definition<'t>(&self, node: Node<'t>, src: &str) -> Option<Definition<'t>> {
        match node.kind() {
            "function_declaration" => {
                let name = field_text(node, "name", src)?;
                Some(Definition::new(DefKind::Function, name, node))
            }
            "method_declaration" => {
                let name = field_text(node, "name", src)?;
                let mut def = Definition::new(DefKind::Method, name, node);
                def.receiver = node
                    .child_by_field_name("receiver")
                    .and_then(|r| receiver_type(r, src));
                Some(def)
            }
            "type_declaration" => {
                let specs: Vec<Node<'t>> = named_children(node)
                    .into_iter()
                    .filter(|n| n.kind() == "type_spec")
                    .collect();
                let [spec] = specs.as_slice() else {
                    return None;
                };
                let name = field_text(*spec, "name", src)?;
                let mut def = Definition::new(DefKind::Class, name, node);
                def.body = spec.child_by_field_name("type");
                Some(def)
            }
            _ => None,
        }
    }

    fn is_import(&self, node: Node<'_>) -> bool {
        node.kind() == "import_declaration"
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
        let mut out = Vec::new();
        for decl in named_children(params) {
            let variadic = decl.kind() == "variadic_parameter_declaration";
            if decl.kind() != "parameter_declaration" && !variadic {
                continue;
            }
            let type_text = field_text(decl, "type", src).map(|t| {
                if variadic {
                    format!("...{t}")
                } else {
                    t
                }
            });
            let mut cursor = decl.walk();
            let names: Vec<String> = decl
                .children_by_field_name("name", &mut cursor)
                .map(|n| node_text(n, src).to_string())
                .collect();
            if names.is_empty() {
                out.push(Parameter {
                    name: "_".into(),
                    type_annotation: type_text,
                    default: None,
                });
                continue;
            }
            for name in names {
                out.push(Parameter {
                    name,
                    type_annotation: type_text.clone(),
                    default: None,
                });
            }
        }
        out
    }

    fn return_type(&self, def: &Definition<'_>, src: &str) -> Option<String> {
        def.node
            .child_by_field_name("result")
            .and_then(|n| clean_annotation(node_text(n, src)))
    }

    fn docstring(&self, def: &Definition<'_>, src: &str) -> Option<String> {
        leading_doc_comments(def.outer, src, |text| text.starts_with("//"), |_| false)
    }
}

/// `(s *Server)` -> `Server`, `(l List[T])` -> `List`.
fn receiver_type(receiver: Node<'_>, src: &str) -> Option<String> {
    let decl = named_children(receiver)
        .into_iter()
        .find(|n| n.kind() == "parameter_declaration")?;
    let ty = field_text(decl, "type", src)?;
    let bare = ty.trim_start_matches('*');
    let bare = bare.split('[').next().unwrap_or(bare).trim();
    (!bare.is_empty()).then(|| bare.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::testing::{find, parse};
    use codebox_scan::Language;

    const SOURCE: &str = r#"package main

// Serve handles requests.
// It never returns.
func (s *Server) Serve(addr string, opts ...Option) error {
	return s.listen(addr)
}

func pair(a, b int) (int, int) { return a, b }
"#;

    #[test]
    fn method_has_receiver_and_doc() {
        let tree = parse(Language::Go, SOURCE);
        let node = find(tree.root_node(), "method_declaration");
        let def = GoDialect.definition(node, SOURCE).unwrap();
        assert_eq!(def.kind, DefKind::Method);
        assert_eq!(def.receiver.as_deref(), Some("Server"));
        assert_eq!(
            GoDialect.docstring(&def, SOURCE).as_deref(),
            Some("// Serve handles requests.\n// It never returns.")
        );
        let params = GoDialect.parameters(&def, SOURCE);
        assert_eq!(params[1].name, "opts");
        assert_eq!(params[1].type_annotation.as_deref(), Some("...Option"));
        assert_eq!(GoDialect.return_type(&def, SOURCE).as_deref(), Some("error"));
    }

    #[test]
    fn grouped_names_share_a_type() {
        let tree = parse(Language::Go, SOURCE);
        let node = find(tree.root_node(), "function_declaration");
        let def = GoDialect.definition(node, SOURCE).unwrap();
        let params = GoDialect.parameters(&def, SOURCE);
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].type_annotation.as_deref(), Some("int"));
        assert_eq!(params[1].name, "b");
        assert_eq!(GoDialect.return_type(&def, SOURCE).as_deref(), Some("(int, int)"));
    }
}
