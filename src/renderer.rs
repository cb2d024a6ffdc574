use crate::ast::{AttrValue, MarkupNode, Value};
use crate::error::CssxError;
use crate::interpreter::Interpreter;

// Walks a markup tree in document order against the interpreter's current
// instance. Text and elements pass through structurally; embedded code runs
// exactly once per pass and substitutes its resulting value, so mutations
// are visible to every node rendered after it.
pub fn render(node: &MarkupNode, interpreter: &mut Interpreter) -> Result<String, CssxError> {
    let mut out = String::new();
    render_node(node, interpreter, &mut out)?;
    Ok(out)
}

fn render_node(
    node: &MarkupNode,
    interpreter: &mut Interpreter,
    out: &mut String,
) -> Result<(), CssxError> {
    match node {
        MarkupNode::Text(text) => {
            out.push_str(text);
            Ok(())
        }
        MarkupNode::Element {
            tag,
            attributes,
            children,
        } => {
            out.push('<');
            out.push_str(tag);
            for attribute in attributes {
                let value = match &attribute.value {
                    AttrValue::Literal(literal) => literal.to_value(),
                    AttrValue::Expression(expr) => interpreter.evaluate(expr)?,
                };
                out.push(' ');
                out.push_str(&attribute.name);
                out.push_str("=\"");
                out.push_str(&stringify(&value));
                out.push('"');
            }
            if children.is_empty() {
                out.push_str(" />");
            } else {
                out.push('>');
                for child in children {
                    render_node(child, interpreter, out)?;
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
            Ok(())
        }
        MarkupNode::Code(statements) => {
            let this = interpreter.this();
            let value = interpreter.in_frame(this, |i| i.execute_block(statements))?;
            out.push_str(&stringify(&value));
            Ok(())
        }
    }
}

// Nil renders as nothing; everything else uses its display form.
fn stringify(value: &Value) -> String {
    match value {
        Value::Nil => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod renderer_tests {
    use crate::ast::{MarkupNode, Value};
    use crate::instance::Instance;
    use crate::interpreter::Interpreter;
    use crate::parser;
    use crate::registry::{ClassTable, DEFAULT_NAMESPACE};
    use crate::renderer;
    use crate::scanner;
    use std::collections::BTreeMap;

    fn setup(source: &str, class: &str, states: Vec<(&str, Value)>) -> (ClassTable, Instance) {
        let tokens = scanner::scan_tokens(source).unwrap();
        let unit = parser::parse(&tokens).unwrap();
        let mut table = ClassTable::new();
        for c in unit.classes {
            table.register(c).unwrap();
        }
        let mut map = BTreeMap::new();
        for (name, value) in states {
            map.insert(name.to_string(), value);
        }
        let instance = {
            let mut interpreter = Interpreter::new(&table, None);
            interpreter
                .instantiate(DEFAULT_NAMESPACE, class, map)
                .unwrap()
        };
        (table, instance)
    }

    fn element_markup(table: &ClassTable, class: &str) -> MarkupNode {
        let decl = table.resolve(DEFAULT_NAMESPACE, class).unwrap();
        let linearized = table.linearize(decl).unwrap();
        linearized.method("element").unwrap().markup.clone().unwrap()
    }

    fn render_once(table: &ClassTable, instance: &Instance, markup: &MarkupNode) -> String {
        let mut interpreter = Interpreter::new(table, None);
        interpreter
            .in_frame(Some(instance.clone()), |i| renderer::render(markup, i))
            .unwrap()
    }

    #[test]
    fn structure_and_text_pass_through() {
        let (table, instance) = setup(
            "class main {\
                 public element() {\
                     return (<div><h1>hola mundo</h1><br /></div>);\
                 }\
             }",
            "main",
            vec![],
        );
        let markup = element_markup(&table, "main");
        assert_eq!(
            render_once(&table, &instance, &markup),
            "<div><h1>hola mundo</h1><br /></div>"
        );
    }

    #[test]
    fn attribute_interpolation_uses_instance_state() {
        let (table, instance) = setup(
            "class main {\
                 public titulo: string = init;\
                 public element() {\
                     return (<div class=\"saludo\" data={this.titulo}>hola</div>);\
                 }\
             }",
            "main",
            vec![("titulo", Value::String("bienvenida".to_string()))],
        );
        let markup = element_markup(&table, "main");
        assert_eq!(
            render_once(&table, &instance, &markup),
            "<div class=\"saludo\" data=\"bienvenida\">hola</div>"
        );
    }

    #[test]
    fn repeated_renders_accumulate_mutation() {
        let (table, instance) = setup(
            "class main {\
                 public couter: numeric = init;\
                 public element() {\
                     return (<div>{ this.couter = this.couter + 1; }</div>);\
                 }\
             }",
            "main",
            vec![("couter", Value::Number(0.0))],
        );
        let markup = element_markup(&table, "main");
        assert_eq!(render_once(&table, &instance, &markup), "<div>1</div>");
        assert_eq!(render_once(&table, &instance, &markup), "<div>2</div>");
    }

    #[test]
    fn side_effects_are_visible_to_later_siblings() {
        let (table, instance) = setup(
            "class main {\
                 public n: numeric = init;\
                 public element() {\
                     return (<div>{ this.n = this.n + 1; }<p>{ this.n + 0; }</p></div>);\
                 }\
             }",
            "main",
            vec![("n", Value::Number(10.0))],
        );
        let markup = element_markup(&table, "main");
        assert_eq!(
            render_once(&table, &instance, &markup),
            "<div>11<p>11</p></div>"
        );
    }

    #[test]
    fn nil_code_result_renders_empty() {
        let (table, instance) = setup(
            "class main {\
                 public element() {\
                     return (<div>{ print(\"lado\"); }</div>);\
                 }\
             }",
            "main",
            vec![],
        );
        let markup = element_markup(&table, "main");
        assert_eq!(render_once(&table, &instance, &markup), "<div></div>");
    }
}
