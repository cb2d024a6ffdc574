use crate::ast::RunDirective;
use crate::error::CssxError;
use crate::instance::Instance;
use crate::interpreter::{Flow, Interpreter, RuntimeError, RuntimeErrorKind};
use crate::parser;
use crate::registry::{ClassTable, RegistryError, RegistryErrorKind, DEFAULT_NAMESPACE};
use crate::renderer;
use crate::scanner;
use std::collections::BTreeMap;

// The external shell supplies the text of included source units; the core
// never reads storage itself.
pub trait SourceResolver {
    fn resolve(&self, href: &str) -> Option<String>;
}

#[derive(Debug, Default)]
pub struct MapResolver {
    units: BTreeMap<String, String>,
}

impl MapResolver {
    pub fn new() -> MapResolver {
        MapResolver {
            units: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, href: &str, source: &str) {
        self.units.insert(href.to_string(), source.to_string());
    }
}

impl SourceResolver for MapResolver {
    fn resolve(&self, href: &str) -> Option<String> {
        self.units.get(href).cloned()
    }
}

// Rendered fragments (one per element=true run, in document order) plus the
// ordered print log.
#[derive(Debug, Default)]
pub struct DocumentOutput {
    pub fragments: Vec<String>,
    pub prints: Vec<String>,
}

pub struct Driver<'a> {
    resolver: &'a dyn SourceResolver,
}

impl<'a> Driver<'a> {
    pub fn new(resolver: &'a dyn SourceResolver) -> Driver<'a> {
        Driver { resolver }
    }

    // Processes one primary unit: registers its classes, then walks the
    // document's run directives strictly in order. The first error aborts
    // the whole pass. The namespace lock lives only for this pass: once a
    // run target resolves into a non-default namespace, every later
    // resolution is restricted to it.
    pub fn run_document(&self, source: &str) -> Result<DocumentOutput, CssxError> {
        let tokens = scanner::scan_tokens(source)?;
        let unit = parser::parse(&tokens)?;
        let mut table = ClassTable::new();
        for class in unit.classes {
            table.register(class)?;
        }
        let mut output = DocumentOutput::default();
        let document = match unit.document {
            Some(document) => document,
            None => return Ok(output),
        };
        let mut scope: Option<String> = None;
        for directive in &document.directives {
            match directive {
                RunDirective::Include { href, line } => {
                    let included = self.resolver.resolve(href).ok_or(CssxError::UnknownUnit {
                        href: href.clone(),
                        line: *line,
                    })?;
                    let included_tokens = scanner::scan_tokens(&included)?;
                    let included_unit = parser::parse(&included_tokens)?;
                    for class in included_unit.classes {
                        if let Some(ns) = &scope {
                            let class_ns = ClassTable::namespace_of(&class);
                            if class_ns != ns {
                                return Err(RegistryError::new(
                                    RegistryErrorKind::NamespaceScope,
                                    &format!(
                                        "Included class '{}' is outside the scoped namespace '{}'.",
                                        class.name, ns
                                    ),
                                )
                                .into());
                            }
                        }
                        table.register(class)?;
                    }
                    // any document tree in an included unit is inert
                }
                RunDirective::Run {
                    class,
                    element,
                    states,
                    line,
                } => {
                    let (namespace, name) = {
                        let decl = table.resolve_scoped(class, scope.as_deref())?;
                        (
                            ClassTable::namespace_of(decl).to_string(),
                            decl.name.clone(),
                        )
                    };
                    if namespace != DEFAULT_NAMESPACE && scope.is_none() {
                        scope = Some(namespace.clone());
                    }
                    let mut seed = BTreeMap::new();
                    for (key, literal) in states {
                        seed.insert(key.clone(), literal.to_value());
                    }
                    let mut interpreter = Interpreter::new(&table, scope.clone());
                    let instance = interpreter.instantiate(&namespace, &name, seed)?;
                    if *element {
                        let fragment = Driver::render_element(
                            &table,
                            &mut interpreter,
                            &namespace,
                            &name,
                            &instance,
                            *line,
                        )?;
                        output.fragments.push(fragment);
                    }
                    output.prints.extend(interpreter.take_prints());
                }
            }
        }
        Ok(output)
    }

    // Locates the class's render method (named `element`), runs its leading
    // statements, then hands its markup body to the renderer.
    fn render_element(
        table: &ClassTable,
        interpreter: &mut Interpreter,
        namespace: &str,
        name: &str,
        instance: &Instance,
        line: i32,
    ) -> Result<String, CssxError> {
        let decl = table.resolve(namespace, name)?;
        let linearized = table.linearize(decl)?;
        let method = match linearized.method("element") {
            Some(method) => method.clone(),
            None => {
                return Err(RuntimeError::new(
                    RuntimeErrorKind::UndefinedProperty,
                    line,
                    &format!("Class '{}' has no 'element' method.", name),
                )
                .into())
            }
        };
        if !method.params.is_empty() {
            return Err(RuntimeError::new(
                RuntimeErrorKind::Arity,
                method.line,
                "The 'element' method takes no parameters.",
            )
            .into());
        }
        interpreter.in_frame(Some(instance.clone()), |i| {
            for statement in &method.body {
                if let Flow::Return(_) = i.execute(statement)? {
                    break;
                }
            }
            match &method.markup {
                Some(markup) => renderer::render(markup, i),
                None => Ok(String::new()),
            }
        })
    }
}

#[cfg(test)]
mod driver_tests {
    use crate::driver::{Driver, MapResolver};
    use crate::error::CssxError;
    use crate::interpreter::RuntimeErrorKind;
    use crate::registry::RegistryErrorKind;

    fn run(source: &str) -> Result<crate::driver::DocumentOutput, CssxError> {
        let resolver = MapResolver::new();
        Driver::new(&resolver).run_document(source)
    }

    #[test]
    fn runs_directives_in_document_order() {
        let output = run(
            "class Persona {\
                 public Persona() {\
                     const nombre: string = \"Juan\";\
                     let edad: numeric = init;\
                     print(\"Hola, mi nombre es \" + nombre + \" y tengo \" + edad + \" años\");\
                 }\
             }\
             class car {\
                 public car() {\
                     const marca: string = \"Nissan\";\
                     let modelo: numeric = init;\
                     print(\"Hola, mi carro es un \" + marca + \" y es modelo \" + modelo);\
                 }\
             }\
             <document>\
                 <run states={ \"name\": \"Juan\", \"edad\": 18 } Class=Persona />\
                 <run states={ \"marca\": \"Nissan\", \"modelo\": 2020 } Class=car />\
             </document>",
        )
        .unwrap();
        assert!(output.fragments.is_empty());
        assert_eq!(
            output.prints,
            vec![
                "Hola, mi nombre es Juan y tengo 18 años",
                "Hola, mi carro es un Nissan y es modelo 2020",
            ]
        );
    }

    #[test]
    fn element_runs_render_fragments() {
        let output = run(
            "class main {\
                 public couter: numeric = init;\
                 public element() {\
                     return (<div><h1>hola mundo</h1>{ this.couter = this.couter + 1; }</div>);\
                 }\
             }\
             <document>\
                 <run element=true states={ \"couter\": 0 } Class=main />\
                 <run element=true states={ \"couter\": 10 } Class=main />\
             </document>",
        )
        .unwrap();
        assert_eq!(
            output.fragments,
            vec![
                "<div><h1>hola mundo</h1>1</div>",
                "<div><h1>hola mundo</h1>11</div>",
            ]
        );
    }

    #[test]
    fn missing_init_value_is_reported() {
        let err = run(
            "class Persona { public Persona() { let edad: numeric = init; } }\
             <document><run Class=Persona /></document>",
        )
        .unwrap_err();
        match err {
            CssxError::Runtime(e) => assert_eq!(e.kind, RuntimeErrorKind::MissingInitValue),
            other => panic!("expected runtime error, got {}", other),
        }
    }

    #[test]
    fn element_run_without_element_method() {
        let err = run(
            "class Persona { public Persona() {} }\
             <document><run element=true Class=Persona /></document>",
        )
        .unwrap_err();
        match err {
            CssxError::Runtime(e) => assert_eq!(e.kind, RuntimeErrorKind::UndefinedProperty),
            other => panic!("expected runtime error, got {}", other),
        }
    }

    #[test]
    fn include_merges_classes() {
        let mut resolver = MapResolver::new();
        resolver.insert(
            "./main/hooks",
            "class Ayudante { public Ayudante() { print(\"desde hooks\"); } }",
        );
        let output = Driver::new(&resolver)
            .run_document(
                "<document>\
                     <run href='./main/hooks' />\
                     <run Class=Ayudante />\
                 </document>",
            )
            .unwrap();
        assert_eq!(output.prints, vec!["desde hooks"]);
    }

    #[test]
    fn include_with_duplicate_class_fails() {
        let mut resolver = MapResolver::new();
        resolver.insert("./otro", "class Persona {}");
        let err = Driver::new(&resolver)
            .run_document(
                "class Persona {}\
                 <document><run href='./otro' /></document>",
            )
            .unwrap_err();
        match err {
            CssxError::Registry(e) => assert_eq!(e.kind, RegistryErrorKind::DuplicateClass),
            other => panic!("expected registry error, got {}", other),
        }
    }

    #[test]
    fn unknown_unit_is_reported() {
        let err = run("<document><run href='./nada' /></document>").unwrap_err();
        match err {
            CssxError::UnknownUnit { href, .. } => assert_eq!(href, "./nada"),
            other => panic!("expected unknown unit, got {}", other),
        }
    }

    #[test]
    fn namespace_lock_restricts_later_runs() {
        let err = run(
            "class Fuera { public Fuera() {} }\
             class Dentro namespace Hooks { public Dentro() {} }\
             <document>\
                 <run Class=Dentro />\
                 <run Class=Fuera />\
             </document>",
        )
        .unwrap_err();
        match err {
            CssxError::Registry(e) => assert_eq!(e.kind, RegistryErrorKind::NamespaceScope),
            other => panic!("expected registry error, got {}", other),
        }
    }

    #[test]
    fn namespace_lock_restricts_included_classes() {
        let mut resolver = MapResolver::new();
        resolver.insert("./otro", "class Ajena {}");
        let err = Driver::new(&resolver)
            .run_document(
                "class Dentro namespace Hooks { public Dentro() {} }\
                 <document>\
                     <run Class=Dentro />\
                     <run href='./otro' />\
                 </document>",
            )
            .unwrap_err();
        match err {
            CssxError::Registry(e) => assert_eq!(e.kind, RegistryErrorKind::NamespaceScope),
            other => panic!("expected registry error, got {}", other),
        }
    }

    #[test]
    fn runs_inside_the_locked_namespace_keep_working() {
        let output = run(
            "class Dentro namespace Hooks { public Dentro() { print(\"uno\"); } }\
             class Otra namespace Hooks { public Otra() { print(\"dos\"); } }\
             <document>\
                 <run Class=Dentro />\
                 <run Class=Otra />\
             </document>",
        )
        .unwrap();
        assert_eq!(output.prints, vec!["uno", "dos"]);
    }

    #[test]
    fn unit_without_document_produces_no_output() {
        let output = run("class Persona { public Persona() { print(\"nunca\"); } }").unwrap();
        assert!(output.fragments.is_empty());
        assert!(output.prints.is_empty());
    }
}
