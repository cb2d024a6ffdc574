use crate::ast::Value;
use crate::interpreter::{RuntimeError, RuntimeErrorKind};
use std::collections::BTreeMap;

#[derive(Debug)]
struct Binding {
    value: Value,
    mutable: bool,
}

// Bindings for one method activation. Method bodies are flat, so there is
// no scope chain; every call gets a fresh environment.
#[derive(Debug)]
pub struct Environment {
    values: BTreeMap<String, Binding>,
}

impl Environment {
    pub fn new() -> Environment {
        Environment {
            values: BTreeMap::new(),
        }
    }

    pub fn define(&mut self, name: &str, value: Value, mutable: bool) {
        self.values
            .insert(name.to_string(), Binding { value, mutable });
    }

    pub fn get(&self, name: &str, line: i32) -> Result<Value, RuntimeError> {
        match self.values.get(name) {
            Some(binding) => Ok(binding.value.clone()),
            None => Err(RuntimeError::new(
                RuntimeErrorKind::UndefinedVariable,
                line,
                &format!("Undefined variable '{}'.", name),
            )),
        }
    }

    pub fn assign(&mut self, name: &str, value: Value, line: i32) -> Result<(), RuntimeError> {
        match self.values.get_mut(name) {
            Some(binding) => {
                if !binding.mutable {
                    return Err(RuntimeError::new(
                        RuntimeErrorKind::ConstReassignment,
                        line,
                        &format!("Cannot reassign const variable '{}'.", name),
                    ));
                }
                binding.value = value;
                Ok(())
            }
            None => Err(RuntimeError::new(
                RuntimeErrorKind::UndefinedVariable,
                line,
                &format!("Undefined variable '{}'.", name),
            )),
        }
    }
}
