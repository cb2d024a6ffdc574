use crate::ast::{BinaryOp, Expression, MethodDecl, PropertyValue, Statement, Value, Visitor};
use crate::environment::Environment;
use crate::error::CssxError;
use crate::instance::Instance;
use crate::registry::{ClassTable, Linearized};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fmt::Formatter;
use std::mem;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Display)]
pub enum RuntimeErrorKind {
    UndefinedVariable,
    ConstReassignment,
    TypeMismatch,
    MissingInitValue,
    UndefinedProperty,
    ConstructorCall,
    Arity,
}

#[derive(Debug)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub line: i32,
    message: String,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, line: i32, message: &str) -> RuntimeError {
        RuntimeError {
            kind,
            line,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[line {}] Runtime Error ({}): {}",
            self.line, self.kind, self.message
        )
    }
}

impl Error for RuntimeError {
    fn description(&self) -> &str {
        &self.message
    }
}

// How a statement sequence ended: fell through with the last statement's
// value, or hit an explicit return.
pub enum Flow {
    Normal(Value),
    Return(Value),
}

pub struct Interpreter<'a> {
    table: &'a ClassTable,
    scope: Option<String>,
    env: Environment,
    this: Option<Instance>,
    prints: Vec<String>,
}

impl<'a> Interpreter<'a> {
    pub fn new(table: &'a ClassTable, scope: Option<String>) -> Interpreter<'a> {
        Interpreter {
            table,
            scope,
            env: Environment::new(),
            this: None,
            prints: Vec::new(),
        }
    }

    pub fn this(&self) -> Option<Instance> {
        self.this.clone()
    }

    // The ordered print log, drained. Print output sits outside markup
    // rendering; the driver decides where it ends up.
    pub fn take_prints(&mut self) -> Vec<String> {
        mem::replace(&mut self.prints, Vec::new())
    }

    pub fn evaluate(&mut self, expr: &Expression) -> Result<Value, CssxError> {
        expr.accept(self)
    }

    pub fn execute(&mut self, stmt: &Statement) -> Result<Flow, CssxError> {
        stmt.accept(self)
    }

    // Embedded-code semantics: the value of the sequence is the last
    // statement's value, with an explicit return cutting the sequence short.
    pub fn execute_block(&mut self, statements: &[Statement]) -> Result<Value, CssxError> {
        let mut last = Value::Nil;
        for statement in statements {
            match self.execute(statement)? {
                Flow::Return(value) => return Ok(value),
                Flow::Normal(value) => last = value,
            }
        }
        Ok(last)
    }

    // Runs f with a fresh environment and the given self-reference, then
    // restores the caller's frame.
    pub fn in_frame<R>(
        &mut self,
        this: Option<Instance>,
        f: impl FnOnce(&mut Interpreter<'a>) -> Result<R, CssxError>,
    ) -> Result<R, CssxError> {
        let prev_env = mem::replace(&mut self.env, Environment::new());
        let prev_this = mem::replace(&mut self.this, this);
        let result = f(self);
        self.env = prev_env;
        self.this = prev_this;
        result
    }

    // Instantiation for a run directive: inherited property initializers
    // apply base-to-derived, then the class's own constructor runs with its
    // parameters seeded by name from the directive's state mapping.
    pub fn instantiate(
        &mut self,
        namespace: &str,
        name: &str,
        states: BTreeMap<String, Value>,
    ) -> Result<Instance, CssxError> {
        let table = self.table;
        let decl = table.resolve(namespace, name)?;
        let linearized = table.linearize(decl)?;
        let instance = Instance::new(namespace, name, states);
        self.initialize_properties(&instance, &linearized)?;
        if let Some(ctor) = decl.methods.iter().find(|m| m.is_constructor) {
            let mut env = Environment::new();
            for param in &ctor.params {
                let value = instance.state(&param.name).ok_or_else(|| {
                    RuntimeError::new(
                        RuntimeErrorKind::MissingInitValue,
                        ctor.line,
                        &format!(
                            "No state value supplied for constructor parameter '{}'.",
                            param.name
                        ),
                    )
                })?;
                env.define(&param.name, value, true);
            }
            self.run_method_body(&instance, ctor, env)?;
        }
        Ok(instance)
    }

    pub fn call_method(
        &mut self,
        instance: &Instance,
        name: &str,
        arguments: Vec<Value>,
        line: i32,
    ) -> Result<Value, CssxError> {
        let table = self.table;
        let decl = table.resolve(&instance.namespace(), &instance.class_name())?;
        let linearized = table.linearize(decl)?;
        let method = match linearized.method(name) {
            Some(method) => method,
            None => {
                return Err(RuntimeError::new(
                    RuntimeErrorKind::UndefinedProperty,
                    line,
                    &format!(
                        "Undefined method '{}' on class '{}'.",
                        name,
                        instance.class_name()
                    ),
                )
                .into())
            }
        };
        if method.is_constructor {
            return Err(RuntimeError::new(
                RuntimeErrorKind::ConstructorCall,
                line,
                &format!("Constructor '{}' cannot be called as a method.", name),
            )
            .into());
        }
        if method.params.len() != arguments.len() {
            return Err(RuntimeError::new(
                RuntimeErrorKind::Arity,
                line,
                &format!(
                    "Method '{}' expects {} arguments but got {}.",
                    name,
                    method.params.len(),
                    arguments.len()
                ),
            )
            .into());
        }
        let mut env = Environment::new();
        for (param, value) in method.params.iter().zip(arguments) {
            env.define(&param.name, value, true);
        }
        self.run_method_body(instance, method, env)
    }

    fn initialize_properties(
        &mut self,
        instance: &Instance,
        linearized: &Linearized,
    ) -> Result<(), CssxError> {
        for property in &linearized.init_properties {
            let value = match &property.value {
                PropertyValue::External => instance.state(&property.name).ok_or_else(|| {
                    RuntimeError::new(
                        RuntimeErrorKind::MissingInitValue,
                        property.line,
                        &format!("No state value supplied for property '{}'.", property.name),
                    )
                })?,
                PropertyValue::Literal(expr) => {
                    self.in_frame(Some(instance.clone()), |interpreter| {
                        interpreter.evaluate(expr)
                    })?
                }
            };
            instance.define(&property.name, value, property.mutable);
        }
        Ok(())
    }

    // Call semantics: a method yields its returned value, or nil when the
    // body falls through.
    fn run_method_body(
        &mut self,
        instance: &Instance,
        method: &MethodDecl,
        env: Environment,
    ) -> Result<Value, CssxError> {
        let prev_env = mem::replace(&mut self.env, env);
        let prev_this = mem::replace(&mut self.this, Some(instance.clone()));
        let mut result = Ok(Value::Nil);
        for statement in &method.body {
            match self.execute(statement) {
                Ok(Flow::Normal(_)) => continue,
                Ok(Flow::Return(value)) => {
                    result = Ok(value);
                    break;
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.env = prev_env;
        self.this = prev_this;
        result
    }

    fn apply_binary(
        &self,
        lv: Value,
        operator: BinaryOp,
        rv: Value,
        line: i32,
    ) -> Result<Value, CssxError> {
        match operator {
            BinaryOp::Plus => match (lv, rv) {
                (Value::Number(l), Value::Number(r)) => Ok(Value::Number(l + r)),
                // '+' with a string on either side concatenates; the other
                // operand is stringified
                (Value::String(l), r) => Ok(Value::String(format!("{}{}", l, r))),
                (l, Value::String(r)) => Ok(Value::String(format!("{}{}", l, r))),
                (l, r) => Err(self.type_mismatch("+", &l, &r, line)),
            },
            BinaryOp::Minus => match (lv, rv) {
                (Value::Number(l), Value::Number(r)) => Ok(Value::Number(l - r)),
                (l, r) => Err(self.type_mismatch("-", &l, &r, line)),
            },
            BinaryOp::Star => match (lv, rv) {
                (Value::Number(l), Value::Number(r)) => Ok(Value::Number(l * r)),
                (l, r) => Err(self.type_mismatch("*", &l, &r, line)),
            },
            BinaryOp::Slash => match (lv, rv) {
                (Value::Number(l), Value::Number(r)) => Ok(Value::Number(l / r)),
                (l, r) => Err(self.type_mismatch("/", &l, &r, line)),
            },
        }
    }

    fn type_mismatch(&self, op: &str, l: &Value, r: &Value, line: i32) -> CssxError {
        RuntimeError::new(
            RuntimeErrorKind::TypeMismatch,
            line,
            &format!(
                "Operator '{}' cannot combine {} and {}.",
                op,
                l.type_name(),
                r.type_name()
            ),
        )
        .into()
    }
}

impl<'a> Visitor<Expression, Result<Value, CssxError>> for Interpreter<'a> {
    fn visit(&mut self, expr: &Expression) -> Result<Value, CssxError> {
        match expr {
            Expression::Literal(literal) => Ok(literal.to_value()),
            Expression::Init => Err(RuntimeError::new(
                RuntimeErrorKind::MissingInitValue,
                0,
                "The 'init' sentinel is only meaningful as an initializer.",
            )
            .into()),
            Expression::Variable { name, line } => Ok(self.env.get(name, *line)?),
            Expression::This { line } => match &self.this {
                Some(instance) => Ok(Value::Instance(instance.clone())),
                None => Err(RuntimeError::new(
                    RuntimeErrorKind::UndefinedVariable,
                    *line,
                    "'this' is only available inside a method.",
                )
                .into()),
            },
            Expression::Grouping(inner) => self.evaluate(inner),
            Expression::Negate { right, line } => match self.evaluate(right)? {
                Value::Number(n) => Ok(Value::Number(-n)),
                other => Err(RuntimeError::new(
                    RuntimeErrorKind::TypeMismatch,
                    *line,
                    &format!("Operand of '-' must be a number, got {}.", other.type_name()),
                )
                .into()),
            },
            Expression::Binary {
                left,
                operator,
                right,
                line,
            } => {
                let lv = self.evaluate(left)?;
                let rv = self.evaluate(right)?;
                self.apply_binary(lv, *operator, rv, *line)
            }
            Expression::Assign { name, value, line } => {
                let value = self.evaluate(value)?;
                self.env.assign(name, value.clone(), *line)?;
                Ok(value)
            }
            Expression::Get { object, name, line } => match self.evaluate(object)? {
                Value::Instance(instance) => Ok(instance.get(name, *line)?),
                other => Err(RuntimeError::new(
                    RuntimeErrorKind::TypeMismatch,
                    *line,
                    &format!("Only instances have properties, got {}.", other.type_name()),
                )
                .into()),
            },
            Expression::Set {
                object,
                name,
                value,
                line,
            } => {
                let target = self.evaluate(object)?;
                let value = self.evaluate(value)?;
                match target {
                    Value::Instance(instance) => {
                        instance.set(name, value.clone(), *line)?;
                        Ok(value)
                    }
                    other => Err(RuntimeError::new(
                        RuntimeErrorKind::TypeMismatch,
                        *line,
                        &format!("Only instances have properties, got {}.", other.type_name()),
                    )
                    .into()),
                }
            }
            Expression::Call {
                object,
                method,
                arguments,
                line,
            } => {
                let target = self.evaluate(object)?;
                let mut args = Vec::new();
                for argument in arguments {
                    args.push(self.evaluate(argument)?);
                }
                match target {
                    Value::Instance(instance) => self.call_method(&instance, method, args, *line),
                    other => Err(RuntimeError::new(
                        RuntimeErrorKind::TypeMismatch,
                        *line,
                        &format!("Only instances have methods, got {}.", other.type_name()),
                    )
                    .into()),
                }
            }
            Expression::New {
                class,
                arguments,
                line,
            } => {
                let mut args = Vec::new();
                for argument in arguments {
                    args.push(self.evaluate(argument)?);
                }
                let table = self.table;
                let scope = self.scope.clone();
                let decl = table.resolve_scoped(class, scope.as_deref())?;
                let namespace = ClassTable::namespace_of(decl).to_string();
                let linearized = table.linearize(decl)?;
                let instance = Instance::new(&namespace, &decl.name, BTreeMap::new());
                self.initialize_properties(&instance, &linearized)?;
                match decl.methods.iter().find(|m| m.is_constructor) {
                    Some(ctor) => {
                        if ctor.params.len() != args.len() {
                            return Err(RuntimeError::new(
                                RuntimeErrorKind::Arity,
                                *line,
                                &format!(
                                    "Constructor '{}' expects {} arguments but got {}.",
                                    class,
                                    ctor.params.len(),
                                    args.len()
                                ),
                            )
                            .into());
                        }
                        let mut env = Environment::new();
                        for (param, value) in ctor.params.iter().zip(args) {
                            env.define(&param.name, value, true);
                        }
                        self.run_method_body(&instance, ctor, env)?;
                    }
                    None => {
                        if !args.is_empty() {
                            return Err(RuntimeError::new(
                                RuntimeErrorKind::Arity,
                                *line,
                                &format!(
                                    "Class '{}' has no constructor but got {} arguments.",
                                    class,
                                    args.len()
                                ),
                            )
                            .into());
                        }
                    }
                }
                Ok(Value::Instance(instance))
            }
        }
    }
}

impl<'a> Visitor<Statement, Result<Flow, CssxError>> for Interpreter<'a> {
    fn visit(&mut self, stmt: &Statement) -> Result<Flow, CssxError> {
        match stmt {
            Statement::Declare {
                name,
                mutable,
                initializer,
                line,
                ..
            } => {
                let value = match initializer {
                    // the declared name doubles as the lookup key into the
                    // externally supplied state mapping
                    Expression::Init => match &self.this {
                        Some(instance) => instance.state(name).ok_or_else(|| {
                            RuntimeError::new(
                                RuntimeErrorKind::MissingInitValue,
                                *line,
                                &format!("No state value supplied for '{}'.", name),
                            )
                        })?,
                        None => {
                            return Err(RuntimeError::new(
                                RuntimeErrorKind::MissingInitValue,
                                *line,
                                &format!("No state value supplied for '{}'.", name),
                            )
                            .into())
                        }
                    },
                    other => self.evaluate(other)?,
                };
                self.env.define(name, value.clone(), *mutable);
                Ok(Flow::Normal(value))
            }
            Statement::Expression(expr) => Ok(Flow::Normal(self.evaluate(expr)?)),
            Statement::Print { value, .. } => {
                let value = self.evaluate(value)?;
                self.prints.push(value.to_string());
                Ok(Flow::Normal(Value::Nil))
            }
            Statement::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                Ok(Flow::Return(value))
            }
        }
    }
}
