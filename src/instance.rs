use crate::ast::Value;
use crate::interpreter::{RuntimeError, RuntimeErrorKind};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

// A live object. Shared by handle so the evaluator, renderer and driver all
// observe the same mutations; equality is handle identity.
#[derive(Clone, Debug)]
pub struct Instance {
    data: Rc<RefCell<InstanceImpl>>,
}

#[derive(Debug)]
struct InstanceImpl {
    namespace: String,
    class_name: String,
    fields: BTreeMap<String, Field>,
    // The run directive's state mapping; init sentinels resolve against it.
    states: BTreeMap<String, Value>,
}

#[derive(Debug)]
struct Field {
    value: Value,
    mutable: bool,
}

impl Instance {
    pub fn new(namespace: &str, class_name: &str, states: BTreeMap<String, Value>) -> Instance {
        Instance {
            data: Rc::new(RefCell::new(InstanceImpl {
                namespace: namespace.to_string(),
                class_name: class_name.to_string(),
                fields: BTreeMap::new(),
                states,
            })),
        }
    }

    pub fn namespace(&self) -> String {
        self.data.borrow().namespace.clone()
    }

    pub fn class_name(&self) -> String {
        self.data.borrow().class_name.clone()
    }

    pub fn state(&self, name: &str) -> Option<Value> {
        self.data.borrow().states.get(name).cloned()
    }

    // Initialization-time write: installs the field and its mutability.
    pub fn define(&self, name: &str, value: Value, mutable: bool) {
        self.data
            .borrow_mut()
            .fields
            .insert(name.to_string(), Field { value, mutable });
    }

    pub fn get(&self, name: &str, line: i32) -> Result<Value, RuntimeError> {
        match self.data.borrow().fields.get(name) {
            Some(field) => Ok(field.value.clone()),
            None => Err(RuntimeError::new(
                RuntimeErrorKind::UndefinedProperty,
                line,
                &format!("Undefined property '{}'.", name),
            )),
        }
    }

    pub fn set(&self, name: &str, value: Value, line: i32) -> Result<(), RuntimeError> {
        match self.data.borrow_mut().fields.get_mut(name) {
            Some(field) => {
                if !field.mutable {
                    return Err(RuntimeError::new(
                        RuntimeErrorKind::ConstReassignment,
                        line,
                        &format!("Cannot reassign const property '{}'.", name),
                    ));
                }
                field.value = value;
                Ok(())
            }
            None => Err(RuntimeError::new(
                RuntimeErrorKind::UndefinedProperty,
                line,
                &format!("Undefined property '{}'.", name),
            )),
        }
    }

    pub fn equals(&self, other: &Instance) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} instance", self.data.borrow().class_name)
    }
}
