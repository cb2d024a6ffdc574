use crate::ast::{ClassDecl, MethodDecl, PropertyDecl};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fmt::Formatter;
use strum_macros::Display;

// Classes with no namespace modifier land here.
pub const DEFAULT_NAMESPACE: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Display)]
pub enum RegistryErrorKind {
    DuplicateClass,
    UnknownClass,
    NamespaceScope,
    InheritanceCycle,
}

#[derive(Debug)]
pub struct RegistryError {
    pub kind: RegistryErrorKind,
    message: String,
}

impl RegistryError {
    pub fn new(kind: RegistryErrorKind, message: &str) -> RegistryError {
        RegistryError {
            kind,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Class Table Error ({}): {}", self.kind, self.message)
    }
}

impl Error for RegistryError {
    fn description(&self) -> &str {
        &self.message
    }
}

// The effective member set of a class once inheritance is resolved.
// `methods` is in lookup-precedence order (own class first, then bases,
// first listed base beating later ones); `init_properties` is in
// initialization order (base-to-derived) with shadowed names removed.
#[derive(Debug, Clone, PartialEq)]
pub struct Linearized {
    pub methods: Vec<MethodDecl>,
    pub init_properties: Vec<PropertyDecl>,
}

impl Linearized {
    pub fn method(&self, name: &str) -> Option<&MethodDecl> {
        self.methods.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Default)]
pub struct ClassTable {
    classes: BTreeMap<(String, String), ClassDecl>,
}

impl ClassTable {
    pub fn new() -> ClassTable {
        ClassTable {
            classes: BTreeMap::new(),
        }
    }

    pub fn namespace_of(decl: &ClassDecl) -> &str {
        decl.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    pub fn register(&mut self, decl: ClassDecl) -> Result<(), RegistryError> {
        let key = (
            ClassTable::namespace_of(&decl).to_string(),
            decl.name.clone(),
        );
        if self.classes.contains_key(&key) {
            return Err(RegistryError {
                kind: RegistryErrorKind::DuplicateClass,
                message: format!(
                    "Class '{}' is already declared in namespace '{}'.",
                    key.1, key.0
                ),
            });
        }
        self.classes.insert(key, decl);
        Ok(())
    }

    pub fn resolve(&self, namespace: &str, name: &str) -> Result<&ClassDecl, RegistryError> {
        self.classes
            .get(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| RegistryError {
                kind: RegistryErrorKind::UnknownClass,
                message: format!("Unknown class '{}' in namespace '{}'.", name, namespace),
            })
    }

    // Name resolution under the document's namespace rule. With a lock in
    // place only that namespace is visible; unlocked, the default namespace
    // is tried first and a unique non-default declaration second.
    pub fn resolve_scoped(
        &self,
        name: &str,
        scope: Option<&str>,
    ) -> Result<&ClassDecl, RegistryError> {
        match scope {
            Some(ns) => match self.classes.get(&(ns.to_string(), name.to_string())) {
                Some(decl) => Ok(decl),
                None => {
                    if self.classes.keys().any(|(_, n)| n == name) {
                        Err(RegistryError {
                            kind: RegistryErrorKind::NamespaceScope,
                            message: format!(
                                "Class '{}' is outside the scoped namespace '{}'.",
                                name, ns
                            ),
                        })
                    } else {
                        Err(RegistryError {
                            kind: RegistryErrorKind::UnknownClass,
                            message: format!("Unknown class '{}'.", name),
                        })
                    }
                }
            },
            None => {
                if let Some(decl) = self
                    .classes
                    .get(&(DEFAULT_NAMESPACE.to_string(), name.to_string()))
                {
                    return Ok(decl);
                }
                let mut candidates = self.classes.iter().filter(|((_, n), _)| n == name);
                match (candidates.next(), candidates.next()) {
                    (Some((_, decl)), None) => Ok(decl),
                    (Some(_), Some(_)) => Err(RegistryError {
                        kind: RegistryErrorKind::UnknownClass,
                        message: format!(
                            "Class name '{}' is ambiguous across namespaces.",
                            name
                        ),
                    }),
                    _ => Err(RegistryError {
                        kind: RegistryErrorKind::UnknownClass,
                        message: format!("Unknown class '{}'.", name),
                    }),
                }
            }
        }
    }

    pub fn linearize(&self, decl: &ClassDecl) -> Result<Linearized, RegistryError> {
        let mut pre: Vec<&ClassDecl> = Vec::new();
        let mut post: Vec<&ClassDecl> = Vec::new();
        let mut visited: Vec<(String, String)> = Vec::new();
        let mut stack: Vec<(String, String)> = Vec::new();
        let decl = self.resolve(ClassTable::namespace_of(decl), &decl.name)?;
        self.walk(decl, &mut pre, &mut post, &mut visited, &mut stack)?;

        let mut methods: Vec<MethodDecl> = Vec::new();
        for class in &pre {
            for method in &class.methods {
                if !methods.iter().any(|m| m.name == method.name) {
                    methods.push(method.clone());
                }
            }
        }

        let mut winners: BTreeMap<String, (String, String)> = BTreeMap::new();
        for class in &pre {
            let key = ClassTable::key_of(class);
            for property in &class.properties {
                winners
                    .entry(property.name.clone())
                    .or_insert_with(|| key.clone());
            }
        }

        let mut init_properties: Vec<PropertyDecl> = Vec::new();
        for class in &post {
            let key = ClassTable::key_of(class);
            for property in &class.properties {
                if winners.get(&property.name) == Some(&key)
                    && !init_properties.iter().any(|p| p.name == property.name)
                {
                    init_properties.push(property.clone());
                }
            }
        }

        Ok(Linearized {
            methods,
            init_properties,
        })
    }

    fn key_of(decl: &ClassDecl) -> (String, String) {
        (
            ClassTable::namespace_of(decl).to_string(),
            decl.name.clone(),
        )
    }

    // Depth-first over the extends lists. `pre` is self-before-bases
    // (lookup precedence), `post` is bases-before-self (initialization
    // order); a class reachable twice is kept at its first position only.
    fn walk<'t>(
        &'t self,
        decl: &'t ClassDecl,
        pre: &mut Vec<&'t ClassDecl>,
        post: &mut Vec<&'t ClassDecl>,
        visited: &mut Vec<(String, String)>,
        stack: &mut Vec<(String, String)>,
    ) -> Result<(), RegistryError> {
        let key = ClassTable::key_of(decl);
        if stack.contains(&key) {
            return Err(RegistryError {
                kind: RegistryErrorKind::InheritanceCycle,
                message: format!("Inheritance cycle through class '{}'.", decl.name),
            });
        }
        if visited.contains(&key) {
            return Ok(());
        }
        visited.push(key.clone());
        stack.push(key);
        pre.push(decl);
        for base in &decl.bases {
            let base_decl = self.resolve_base(decl, base)?;
            self.walk(base_decl, pre, post, visited, stack)?;
        }
        post.push(decl);
        stack.pop();
        Ok(())
    }

    // Bases resolve in the class's own namespace first, then the default.
    fn resolve_base(&self, decl: &ClassDecl, base: &str) -> Result<&ClassDecl, RegistryError> {
        let ns = ClassTable::namespace_of(decl);
        if let Some(found) = self.classes.get(&(ns.to_string(), base.to_string())) {
            return Ok(found);
        }
        if ns != DEFAULT_NAMESPACE {
            if let Some(found) = self
                .classes
                .get(&(DEFAULT_NAMESPACE.to_string(), base.to_string()))
            {
                return Ok(found);
            }
        }
        Err(RegistryError {
            kind: RegistryErrorKind::UnknownClass,
            message: format!("Unknown base class '{}' for class '{}'.", base, decl.name),
        })
    }
}

#[cfg(test)]
mod registry_tests {
    use crate::ast::{Expression, Literal, PropertyValue};
    use crate::parser;
    use crate::registry::{ClassTable, RegistryErrorKind, DEFAULT_NAMESPACE};
    use crate::scanner;

    fn table_from(source: &str) -> ClassTable {
        let tokens = scanner::scan_tokens(source).unwrap();
        let unit = parser::parse(&tokens).unwrap();
        let mut table = ClassTable::new();
        for class in unit.classes {
            table.register(class).unwrap();
        }
        table
    }

    fn parse_single(source: &str) -> crate::ast::ClassDecl {
        let tokens = scanner::scan_tokens(source).unwrap();
        let mut unit = parser::parse(&tokens).unwrap();
        unit.classes.pop().unwrap()
    }

    #[test]
    fn duplicate_class_across_units_regardless_of_order() {
        let first = parse_single("class A { public m() {} }");
        let second = parse_single("class A {}");
        let mut table = ClassTable::new();
        table.register(second).unwrap();
        let err = table.register(first).unwrap_err();
        assert_eq!(err.kind, RegistryErrorKind::DuplicateClass);
    }

    #[test]
    fn same_name_in_different_namespaces_is_allowed() {
        let table = table_from("class Persona {} class Persona namespace Persona {}");
        assert!(table.resolve(DEFAULT_NAMESPACE, "Persona").is_ok());
        assert!(table.resolve("Persona", "Persona").is_ok());
    }

    #[test]
    fn unknown_class() {
        let table = table_from("class A {}");
        let err = table.resolve(DEFAULT_NAMESPACE, "B").unwrap_err();
        assert_eq!(err.kind, RegistryErrorKind::UnknownClass);
    }

    #[test]
    fn linearize_is_deterministic() {
        let table = table_from(
            "class A { let x: numeric = 1; public m() {} }\
             class B extends A { let y: numeric = 2; }\
             class C extends B, A { let z: numeric = 3; }",
        );
        let decl = table.resolve(DEFAULT_NAMESPACE, "C").unwrap();
        let first = table.linearize(decl).unwrap();
        let second = table.linearize(decl).unwrap();
        assert_eq!(first, second);
        let names: Vec<&str> = first
            .init_properties
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["x", "y", "z"]);
    }

    #[test]
    fn first_listed_base_wins_on_conflict() {
        let table = table_from(
            "class A { public m() { return 1; } }\
             class B { public m() { return 2; } }\
             class C extends A, B {}",
        );
        let decl = table.resolve(DEFAULT_NAMESPACE, "C").unwrap();
        let linearized = table.linearize(decl).unwrap();
        let winner = linearized.method("m").unwrap();
        let a = table.resolve(DEFAULT_NAMESPACE, "A").unwrap();
        assert_eq!(winner.body, a.methods[0].body);
    }

    #[test]
    fn own_member_shadows_bases() {
        let table = table_from(
            "class A { let x: numeric = 1; }\
             class B extends A { let x: numeric = 2; }",
        );
        let decl = table.resolve(DEFAULT_NAMESPACE, "B").unwrap();
        let linearized = table.linearize(decl).unwrap();
        assert_eq!(linearized.init_properties.len(), 1);
        assert_eq!(
            linearized.init_properties[0].value,
            PropertyValue::Literal(Expression::Literal(Literal::Number(2.0)))
        );
    }

    #[test]
    fn inheritance_cycle_is_detected() {
        let table = table_from("class A extends B {} class B extends A {}");
        let decl = table.resolve(DEFAULT_NAMESPACE, "A").unwrap();
        let err = table.linearize(decl).unwrap_err();
        assert_eq!(err.kind, RegistryErrorKind::InheritanceCycle);
    }

    #[test]
    fn scoped_resolution_is_restricted_to_the_locked_namespace() {
        let table = table_from(
            "class Fuera {}\
             class Dentro namespace Hooks {}",
        );
        assert!(table.resolve_scoped("Dentro", Some("Hooks")).is_ok());
        let err = table.resolve_scoped("Fuera", Some("Hooks")).unwrap_err();
        assert_eq!(err.kind, RegistryErrorKind::NamespaceScope);
    }

    #[test]
    fn unlocked_resolution_prefers_the_default_namespace() {
        let table = table_from("class Persona {} class Persona namespace Hooks {}");
        let decl = table.resolve_scoped("Persona", None).unwrap();
        assert_eq!(decl.namespace, None);
    }

    #[test]
    fn unlocked_resolution_finds_a_unique_namespaced_class() {
        let table = table_from("class Dentro namespace Hooks {}");
        let decl = table.resolve_scoped("Dentro", None).unwrap();
        assert_eq!(decl.namespace, Some("Hooks".to_string()));
    }
}
