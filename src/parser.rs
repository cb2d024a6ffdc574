use crate::ast::{
    Attribute, AttrValue, BinaryOp, ClassDecl, Document, Expression, Literal, MarkupNode,
    MethodDecl, Param, PropertyDecl, PropertyValue, RunDirective, Statement, TypeTag,
};
use crate::token::{Token, TokenType};
use num_enum::TryFromPrimitive;
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::error::Error;
use std::fmt;
use std::fmt::Formatter;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Display)]
pub enum ParseErrorKind {
    UnexpectedToken,
    MissingClosingBrace,
    DuplicateClassName,
    DuplicateConstructor,
}

#[derive(Debug)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub line: i32,
    pub lexeme: String,
    message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[line {}] Parse Error ({}): {} Context: '{}'",
            self.line, self.kind, self.message, self.lexeme
        )
    }
}

impl Error for ParseError {
    fn description(&self) -> &str {
        &self.message
    }
}

// A parsed compilation unit: its class declarations plus, for a primary
// unit, the <document> tree that drives execution.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceUnit {
    pub classes: Vec<ClassDecl>,
    pub document: Option<Document>,
}

// Operator binding strength, climbed one level at a time the same way the
// parser's precedence ladder works in the bytecode pipeline.
#[derive(Debug, TryFromPrimitive, PartialEq, PartialOrd, Clone, Copy)]
#[repr(u8)]
enum Precedence {
    None,
    Assignment,
    Term,   // + -
    Factor, // * /
    Unary,  // -
    Call,   // . ()
}

pub fn parse(tokens: &[Token]) -> Result<SourceUnit, ParseError> {
    Parser::new(tokens).unit()
}

pub struct Parser<'a> {
    tokens: &'a [Token],
    current: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Parser<'a> {
        Parser { tokens, current: 0 }
    }

    pub fn unit(&mut self) -> Result<SourceUnit, ParseError> {
        let mut classes = Vec::new();
        let mut document = None;
        while !self.is_at_end() {
            match self.peek().tokentype {
                TokenType::Class => {
                    let class = self.class_declaration()?;
                    if classes
                        .iter()
                        .any(|c: &ClassDecl| c.name == class.name && c.namespace == class.namespace)
                    {
                        return Err(ParseError {
                            kind: ParseErrorKind::DuplicateClassName,
                            line: class.line,
                            lexeme: class.name.clone(),
                            message: format!(
                                "Class '{}' is declared twice in this unit.",
                                class.name
                            ),
                        });
                    }
                    classes.push(class);
                }
                TokenType::Less => {
                    if document.is_some() {
                        return Err(self.error(
                            ParseErrorKind::UnexpectedToken,
                            "A source unit may contain only one document root.",
                        ));
                    }
                    document = Some(self.document()?);
                }
                _ => {
                    return Err(self.error(
                        ParseErrorKind::UnexpectedToken,
                        "Expect class declaration or document root.",
                    ))
                }
            }
        }
        Ok(SourceUnit { classes, document })
    }

    fn class_declaration(&mut self) -> Result<ClassDecl, ParseError> {
        let line = self.peek().line;
        self.advance();
        let name = self.expect_identifier("Expect class name.")?;
        let mut bases = Vec::new();
        if let TokenType::Extends = self.peek().tokentype {
            self.advance();
            loop {
                bases.push(self.expect_identifier("Expect base class name.")?);
                match self.peek().tokentype {
                    TokenType::Comma => {
                        self.advance();
                        // a trailing comma before the body is tolerated
                        match self.peek().tokentype {
                            TokenType::Identifier(_) => continue,
                            _ => break,
                        }
                    }
                    _ => break,
                }
            }
        }
        let mut namespace = None;
        if let TokenType::Namespace = self.peek().tokentype {
            self.advance();
            namespace = Some(self.expect_identifier("Expect namespace name.")?);
        }
        self.expect(
            TokenType::LeftBrace,
            ParseErrorKind::UnexpectedToken,
            "Expect '{' before class body.",
        )?;
        if let TokenType::LeftBrace = self.peek().tokentype {
            // `class X namespace Y{{` — a doubled brace is a typo, not syntax
            return Err(self.error(
                ParseErrorKind::UnexpectedToken,
                "Expect a single '{' to open a class body.",
            ));
        }
        let mut properties = Vec::new();
        let mut methods: Vec<MethodDecl> = Vec::new();
        loop {
            match self.peek().tokentype {
                TokenType::RightBrace => {
                    self.advance();
                    break;
                }
                TokenType::EOF => {
                    return Err(self.error(
                        ParseErrorKind::MissingClosingBrace,
                        "Expect '}' after class body.",
                    ))
                }
                _ => self.member(&name, &mut properties, &mut methods)?,
            }
        }
        Ok(ClassDecl {
            name,
            namespace,
            bases,
            properties,
            methods,
            line,
        })
    }

    fn member(
        &mut self,
        class_name: &str,
        properties: &mut Vec<PropertyDecl>,
        methods: &mut Vec<MethodDecl>,
    ) -> Result<(), ParseError> {
        if let TokenType::Public = self.peek().tokentype {
            self.advance();
        }
        match self.peek().tokentype {
            TokenType::Const => {
                self.advance();
                properties.push(self.property_declaration(false)?);
            }
            TokenType::Let => {
                self.advance();
                properties.push(self.property_declaration(true)?);
            }
            TokenType::Identifier(_) => match self.peek_at(1).tokentype {
                TokenType::LeftParen => {
                    let method = self.method_declaration(class_name)?;
                    if method.is_constructor && methods.iter().any(|m| m.is_constructor) {
                        return Err(ParseError {
                            kind: ParseErrorKind::DuplicateConstructor,
                            line: method.line,
                            lexeme: method.name.clone(),
                            message: format!(
                                "Class '{}' already declares a constructor.",
                                class_name
                            ),
                        });
                    }
                    methods.push(method);
                }
                // `public NAME: TYPE = ...;` declares a reassignable property
                _ => properties.push(self.property_declaration(true)?),
            },
            _ => {
                return Err(self.error(
                    ParseErrorKind::UnexpectedToken,
                    "Expect property or method declaration.",
                ))
            }
        }
        Ok(())
    }

    fn property_declaration(&mut self, mutable: bool) -> Result<PropertyDecl, ParseError> {
        let line = self.peek().line;
        let name = self.expect_identifier("Expect property name.")?;
        self.expect(
            TokenType::Colon,
            ParseErrorKind::UnexpectedToken,
            "Expect ':' and a type after property name.",
        )?;
        let type_tag = self.type_tag()?;
        self.expect(
            TokenType::Equal,
            ParseErrorKind::UnexpectedToken,
            "Expect '=' after property type.",
        )?;
        let value = if let TokenType::Init = self.peek().tokentype {
            if !mutable {
                return Err(self.error(
                    ParseErrorKind::UnexpectedToken,
                    "A 'const' property requires a value at declaration.",
                ));
            }
            self.advance();
            PropertyValue::External
        } else {
            PropertyValue::Literal(self.expression()?)
        };
        self.expect(
            TokenType::Semicolon,
            ParseErrorKind::UnexpectedToken,
            "Expect ';' after property declaration.",
        )?;
        Ok(PropertyDecl {
            name,
            type_tag,
            mutable,
            value,
            line,
        })
    }

    fn method_declaration(&mut self, class_name: &str) -> Result<MethodDecl, ParseError> {
        let line = self.peek().line;
        let name = self.expect_identifier("Expect method name.")?;
        self.expect(
            TokenType::LeftParen,
            ParseErrorKind::UnexpectedToken,
            "Expect '(' after method name.",
        )?;
        let mut params = Vec::new();
        loop {
            match self.peek().tokentype {
                TokenType::RightParen => break,
                TokenType::Identifier(_) => {
                    let param_name = self.expect_identifier("Expect parameter name.")?;
                    let type_tag = if let TokenType::Colon = self.peek().tokentype {
                        self.advance();
                        Some(self.type_tag()?)
                    } else {
                        None
                    };
                    params.push(Param {
                        name: param_name,
                        type_tag,
                    });
                    match self.peek().tokentype {
                        TokenType::Comma => {
                            self.advance();
                        }
                        TokenType::RightParen => break,
                        _ => {
                            return Err(self.error(
                                ParseErrorKind::UnexpectedToken,
                                "Expect ',' or ')' after parameter.",
                            ))
                        }
                    }
                }
                _ => {
                    return Err(
                        self.error(ParseErrorKind::UnexpectedToken, "Expect parameter name.")
                    )
                }
            }
        }
        self.advance(); // ')'
        self.expect(
            TokenType::LeftBrace,
            ParseErrorKind::UnexpectedToken,
            "Expect '{' before method body.",
        )?;
        let (body, markup) = self.method_body()?;
        Ok(MethodDecl {
            is_constructor: name == class_name,
            name,
            params,
            body,
            markup,
            line,
        })
    }

    fn method_body(&mut self) -> Result<(Vec<Statement>, Option<MarkupNode>), ParseError> {
        let mut statements = Vec::new();
        let mut markup = None;
        loop {
            match self.peek().tokentype {
                TokenType::RightBrace => {
                    self.advance();
                    return Ok((statements, markup));
                }
                TokenType::EOF => {
                    return Err(self.error(
                        ParseErrorKind::MissingClosingBrace,
                        "Expect '}' after method body.",
                    ))
                }
                TokenType::Return if self.is_markup_return() => {
                    self.advance(); // 'return'
                    self.advance(); // '('
                    let node = self.markup_node()?;
                    self.expect(
                        TokenType::RightParen,
                        ParseErrorKind::UnexpectedToken,
                        "Expect ')' after markup.",
                    )?;
                    self.expect(
                        TokenType::Semicolon,
                        ParseErrorKind::UnexpectedToken,
                        "Expect ';' after markup return.",
                    )?;
                    markup = Some(node);
                    match self.peek().tokentype {
                        TokenType::RightBrace => {
                            self.advance();
                            return Ok((statements, markup));
                        }
                        _ => {
                            return Err(self.error(
                                ParseErrorKind::UnexpectedToken,
                                "A markup return must end the method body.",
                            ))
                        }
                    }
                }
                _ => statements.push(self.statement()?),
            }
        }
    }

    fn is_markup_return(&self) -> bool {
        self.peek_at(1).tokentype == TokenType::LeftParen
            && matches!(
                self.peek_at(2).tokentype,
                TokenType::Less | TokenType::LessSlash
            )
    }

    fn statement(&mut self) -> Result<Statement, ParseError> {
        match self.peek().tokentype {
            TokenType::Const => {
                self.advance();
                self.declaration_statement(false)
            }
            TokenType::Let => {
                self.advance();
                self.declaration_statement(true)
            }
            TokenType::Print => {
                self.advance();
                self.print_statement()
            }
            TokenType::Return => {
                self.advance();
                self.return_statement()
            }
            _ => {
                let expr = self.expression()?;
                self.expect(
                    TokenType::Semicolon,
                    ParseErrorKind::UnexpectedToken,
                    "Expect ';' after expression.",
                )?;
                Ok(Statement::Expression(expr))
            }
        }
    }

    fn declaration_statement(&mut self, mutable: bool) -> Result<Statement, ParseError> {
        let line = self.previous().line;
        let name = self.expect_identifier("Expect variable name.")?;
        self.expect(
            TokenType::Colon,
            ParseErrorKind::UnexpectedToken,
            "Expect ':' and a type after variable name.",
        )?;
        let type_tag = self.type_tag()?;
        self.expect(
            TokenType::Equal,
            ParseErrorKind::UnexpectedToken,
            "Expect '=' after variable type.",
        )?;
        let initializer = if let TokenType::Init = self.peek().tokentype {
            if !mutable {
                return Err(self.error(
                    ParseErrorKind::UnexpectedToken,
                    "A 'const' variable requires a value at declaration.",
                ));
            }
            self.advance();
            Expression::Init
        } else {
            self.expression()?
        };
        self.expect(
            TokenType::Semicolon,
            ParseErrorKind::UnexpectedToken,
            "Expect ';' after variable declaration.",
        )?;
        Ok(Statement::Declare {
            name,
            type_tag,
            mutable,
            initializer,
            line,
        })
    }

    fn print_statement(&mut self) -> Result<Statement, ParseError> {
        let line = self.previous().line;
        self.expect(
            TokenType::LeftParen,
            ParseErrorKind::UnexpectedToken,
            "Expect '(' after 'print'.",
        )?;
        let value = self.expression()?;
        self.expect(
            TokenType::RightParen,
            ParseErrorKind::UnexpectedToken,
            "Expect ')' after value.",
        )?;
        self.expect(
            TokenType::Semicolon,
            ParseErrorKind::UnexpectedToken,
            "Expect ';' after value.",
        )?;
        Ok(Statement::Print { value, line })
    }

    fn return_statement(&mut self) -> Result<Statement, ParseError> {
        let line = self.previous().line;
        match self.peek().tokentype {
            TokenType::Semicolon => {
                self.advance();
                Ok(Statement::Return { value: None, line })
            }
            TokenType::LeftParen
                if matches!(
                    self.peek_at(1).tokentype,
                    TokenType::Less | TokenType::LessSlash
                ) =>
            {
                Err(self.error(
                    ParseErrorKind::UnexpectedToken,
                    "Markup may only be returned from a method body.",
                ))
            }
            _ => {
                let value = self.expression()?;
                self.expect(
                    TokenType::Semicolon,
                    ParseErrorKind::UnexpectedToken,
                    "Expect ';' after return value.",
                )?;
                Ok(Statement::Return {
                    value: Some(value),
                    line,
                })
            }
        }
    }

    fn type_tag(&mut self) -> Result<TypeTag, ParseError> {
        let tag = match &self.peek().tokentype {
            TokenType::Identifier(name) => match name.as_str() {
                "string" => TypeTag::String,
                "numeric" => TypeTag::Numeric,
                _ => {
                    return Err(self.error(
                        ParseErrorKind::UnexpectedToken,
                        "Expect type 'string' or 'numeric'.",
                    ))
                }
            },
            _ => {
                return Err(self.error(
                    ParseErrorKind::UnexpectedToken,
                    "Expect type 'string' or 'numeric'.",
                ))
            }
        };
        self.advance();
        Ok(tag)
    }

    fn expression(&mut self) -> Result<Expression, ParseError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expression, ParseError> {
        let expr = self.binary(Precedence::Term)?;
        if let TokenType::Equal = self.peek().tokentype {
            let line = self.peek().line;
            self.advance();
            let value = self.assignment()?;
            return match expr {
                Expression::Variable { name, .. } => Ok(Expression::Assign {
                    name,
                    value: Box::new(value),
                    line,
                }),
                Expression::Get { object, name, .. } => Ok(Expression::Set {
                    object,
                    name,
                    value: Box::new(value),
                    line,
                }),
                _ => Err(self.error(ParseErrorKind::UnexpectedToken, "Invalid assignment target.")),
            };
        }
        Ok(expr)
    }

    fn binary(&mut self, min: Precedence) -> Result<Expression, ParseError> {
        let mut expr = self.unary()?;
        loop {
            let operator = match self.peek().tokentype {
                TokenType::Plus => BinaryOp::Plus,
                TokenType::Minus => BinaryOp::Minus,
                TokenType::Star => BinaryOp::Star,
                TokenType::Slash => BinaryOp::Slash,
                _ => break,
            };
            let precedence = Parser::precedence_of(&self.peek().tokentype);
            if precedence < min {
                break;
            }
            let line = self.peek().line;
            self.advance();
            let next = Precedence::try_from(precedence as u8 + 1).unwrap_or(Precedence::Call);
            let right = self.binary(next)?;
            expr = Expression::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
                line,
            };
        }
        Ok(expr)
    }

    fn precedence_of(tokentype: &TokenType) -> Precedence {
        match tokentype {
            TokenType::Plus | TokenType::Minus => Precedence::Term,
            TokenType::Star | TokenType::Slash => Precedence::Factor,
            _ => Precedence::None,
        }
    }

    fn unary(&mut self) -> Result<Expression, ParseError> {
        match self.peek().tokentype {
            TokenType::Minus => {
                let line = self.peek().line;
                self.advance();
                let right = self.unary()?;
                Ok(Expression::Negate {
                    right: Box::new(right),
                    line,
                })
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek().tokentype {
                TokenType::Dot => {
                    let line = self.peek().line;
                    self.advance();
                    let name = self.expect_identifier("Expect property or method name after '.'.")?;
                    if let TokenType::LeftParen = self.peek().tokentype {
                        self.advance();
                        let arguments = self.arguments()?;
                        expr = Expression::Call {
                            object: Box::new(expr),
                            method: name,
                            arguments,
                            line,
                        };
                    } else {
                        expr = Expression::Get {
                            object: Box::new(expr),
                            name,
                            line,
                        };
                    }
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expression, ParseError> {
        match &self.peek().tokentype {
            TokenType::Number(n) => {
                let expr = Expression::Literal(Literal::Number(*n));
                self.advance();
                Ok(expr)
            }
            TokenType::String(s) => {
                let expr = Expression::Literal(Literal::String(s.clone()));
                self.advance();
                Ok(expr)
            }
            TokenType::True => {
                self.advance();
                Ok(Expression::Literal(Literal::Boolean(true)))
            }
            TokenType::False => {
                self.advance();
                Ok(Expression::Literal(Literal::Boolean(false)))
            }
            TokenType::This => {
                let line = self.peek().line;
                self.advance();
                Ok(Expression::This { line })
            }
            TokenType::Identifier(name) => {
                let expr = Expression::Variable {
                    name: name.clone(),
                    line: self.peek().line,
                };
                self.advance();
                Ok(expr)
            }
            TokenType::New => {
                let line = self.peek().line;
                self.advance();
                let class = self.expect_identifier("Expect class name after 'new'.")?;
                self.expect(
                    TokenType::LeftParen,
                    ParseErrorKind::UnexpectedToken,
                    "Expect '(' after class name.",
                )?;
                let arguments = self.arguments()?;
                Ok(Expression::New {
                    class,
                    arguments,
                    line,
                })
            }
            TokenType::LeftParen => {
                self.advance();
                let expr = self.expression()?;
                self.expect(
                    TokenType::RightParen,
                    ParseErrorKind::UnexpectedToken,
                    "Expect ')' after expression.",
                )?;
                Ok(Expression::Grouping(Box::new(expr)))
            }
            TokenType::Init => Err(self.error(
                ParseErrorKind::UnexpectedToken,
                "The 'init' sentinel may only appear as a whole initializer.",
            )),
            _ => Err(self.error(ParseErrorKind::UnexpectedToken, "Expect expression.")),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expression>, ParseError> {
        let mut arguments = Vec::new();
        if let TokenType::RightParen = self.peek().tokentype {
            self.advance();
            return Ok(arguments);
        }
        loop {
            arguments.push(self.expression()?);
            match self.peek().tokentype {
                TokenType::Comma => {
                    self.advance();
                    if let TokenType::RightParen = self.peek().tokentype {
                        break;
                    }
                }
                TokenType::RightParen => break,
                _ => {
                    return Err(self.error(
                        ParseErrorKind::UnexpectedToken,
                        "Expect ',' or ')' after argument.",
                    ))
                }
            }
        }
        self.advance(); // ')'
        Ok(arguments)
    }

    fn markup_node(&mut self) -> Result<MarkupNode, ParseError> {
        match &self.peek().tokentype {
            TokenType::Text(text) => {
                let node = MarkupNode::Text(text.clone());
                self.advance();
                Ok(node)
            }
            TokenType::Less => self.element(),
            TokenType::LeftBrace => {
                self.advance();
                let statements = self.embedded_statements()?;
                Ok(MarkupNode::Code(statements))
            }
            _ => Err(self.error(ParseErrorKind::UnexpectedToken, "Expect markup node.")),
        }
    }

    fn embedded_statements(&mut self) -> Result<Vec<Statement>, ParseError> {
        let mut statements = Vec::new();
        loop {
            match self.peek().tokentype {
                TokenType::RightBrace => {
                    self.advance();
                    return Ok(statements);
                }
                TokenType::EOF => {
                    return Err(self.error(
                        ParseErrorKind::MissingClosingBrace,
                        "Expect '}' after embedded code.",
                    ))
                }
                _ => statements.push(self.statement()?),
            }
        }
    }

    fn element(&mut self) -> Result<MarkupNode, ParseError> {
        self.advance(); // '<'
        let tag = self.expect_identifier("Expect element name.")?;
        let mut attributes = Vec::new();
        while let TokenType::Identifier(name) = &self.peek().tokentype {
            let attr_name = name.clone();
            self.advance();
            self.expect(
                TokenType::Equal,
                ParseErrorKind::UnexpectedToken,
                "Expect '=' after attribute name.",
            )?;
            let value = self.attr_value()?;
            attributes.push(Attribute {
                name: attr_name,
                value,
            });
        }
        match self.peek().tokentype {
            TokenType::SlashGreater => {
                self.advance();
                Ok(MarkupNode::Element {
                    tag,
                    attributes,
                    children: Vec::new(),
                })
            }
            TokenType::Greater => {
                self.advance();
                let mut children = Vec::new();
                loop {
                    match self.peek().tokentype {
                        TokenType::LessSlash => break,
                        TokenType::EOF => {
                            return Err(self.error(
                                ParseErrorKind::UnexpectedToken,
                                &format!("Expect closing tag for '<{}>'.", tag),
                            ))
                        }
                        _ => children.push(self.markup_node()?),
                    }
                }
                self.advance(); // '</'
                let closing = self.expect_identifier("Expect closing tag name.")?;
                if closing != tag {
                    return Err(self.error(
                        ParseErrorKind::UnexpectedToken,
                        &format!("Mismatched closing tag '{}' for '<{}>'.", closing, tag),
                    ));
                }
                self.expect(
                    TokenType::Greater,
                    ParseErrorKind::UnexpectedToken,
                    "Expect '>' after closing tag name.",
                )?;
                Ok(MarkupNode::Element {
                    tag,
                    attributes,
                    children,
                })
            }
            _ => Err(self.error(
                ParseErrorKind::UnexpectedToken,
                "Expect '>' or '/>' after element attributes.",
            )),
        }
    }

    fn attr_value(&mut self) -> Result<AttrValue, ParseError> {
        match &self.peek().tokentype {
            TokenType::String(s) => {
                let value = AttrValue::Literal(Literal::String(s.clone()));
                self.advance();
                Ok(value)
            }
            TokenType::Number(n) => {
                let value = AttrValue::Literal(Literal::Number(*n));
                self.advance();
                Ok(value)
            }
            TokenType::Identifier(name) if name == "true" => {
                self.advance();
                Ok(AttrValue::Literal(Literal::Boolean(true)))
            }
            TokenType::Identifier(name) if name == "false" => {
                self.advance();
                Ok(AttrValue::Literal(Literal::Boolean(false)))
            }
            TokenType::LeftBrace => {
                self.advance();
                let expr = self.expression()?;
                self.expect(
                    TokenType::RightBrace,
                    ParseErrorKind::MissingClosingBrace,
                    "Expect '}' after attribute expression.",
                )?;
                Ok(AttrValue::Expression(expr))
            }
            _ => Err(self.error(ParseErrorKind::UnexpectedToken, "Expect attribute value.")),
        }
    }

    fn document(&mut self) -> Result<Document, ParseError> {
        self.advance(); // '<'
        let root = self.expect_identifier("Expect 'document' root element.")?;
        if root != "document" {
            return Err(self.error(
                ParseErrorKind::UnexpectedToken,
                "Expect 'document' root element.",
            ));
        }
        self.expect(
            TokenType::Greater,
            ParseErrorKind::UnexpectedToken,
            "Expect '>' after document root.",
        )?;
        let mut directives = Vec::new();
        loop {
            match self.peek().tokentype {
                TokenType::LessSlash => break,
                TokenType::Less => directives.push(self.run_directive()?),
                _ => {
                    return Err(
                        self.error(ParseErrorKind::UnexpectedToken, "Expect <run /> directive.")
                    )
                }
            }
        }
        self.advance(); // '</'
        let closing = self.expect_identifier("Expect 'document' in closing tag.")?;
        if closing != "document" {
            return Err(self.error(
                ParseErrorKind::UnexpectedToken,
                "Expect 'document' in closing tag.",
            ));
        }
        self.expect(
            TokenType::Greater,
            ParseErrorKind::UnexpectedToken,
            "Expect '>' after closing tag name.",
        )?;
        Ok(Document { directives })
    }

    fn run_directive(&mut self) -> Result<RunDirective, ParseError> {
        let line = self.peek().line;
        self.advance(); // '<'
        let tag = self.expect_identifier("Expect <run /> directive.")?;
        if tag != "run" {
            return Err(self.error(ParseErrorKind::UnexpectedToken, "Expect <run /> directive."));
        }
        let mut element = false;
        let mut class: Option<String> = None;
        let mut href: Option<String> = None;
        let mut states = BTreeMap::new();
        while let TokenType::Identifier(name) = &self.peek().tokentype {
            let attr = name.clone();
            self.advance();
            self.expect(
                TokenType::Equal,
                ParseErrorKind::UnexpectedToken,
                "Expect '=' after run attribute.",
            )?;
            match attr.as_str() {
                "element" => element = self.boolean_value()?,
                "Class" => class = Some(self.expect_identifier("Expect class name after 'Class='.")?),
                "href" => href = Some(self.string_value()?),
                "states" => states = self.states_map()?,
                _ => {
                    return Err(self.error(
                        ParseErrorKind::UnexpectedToken,
                        &format!("Unknown run attribute '{}'.", attr),
                    ))
                }
            }
        }
        self.expect(
            TokenType::SlashGreater,
            ParseErrorKind::UnexpectedToken,
            "Expect '/>' to close a run directive.",
        )?;
        match (class, href) {
            (Some(_), Some(_)) => Err(ParseError {
                kind: ParseErrorKind::UnexpectedToken,
                line,
                lexeme: "run".to_string(),
                message: "A run directive takes either Class or href, not both.".to_string(),
            }),
            (Some(class), None) => Ok(RunDirective::Run {
                class,
                element,
                states,
                line,
            }),
            (None, Some(href)) => Ok(RunDirective::Include { href, line }),
            (None, None) => Err(ParseError {
                kind: ParseErrorKind::UnexpectedToken,
                line,
                lexeme: "run".to_string(),
                message: "A run directive requires Class or href.".to_string(),
            }),
        }
    }

    // Inside a tag header nothing is keywordized, so booleans arrive as
    // plain identifiers.
    fn boolean_value(&mut self) -> Result<bool, ParseError> {
        match &self.peek().tokentype {
            TokenType::Identifier(name) if name == "true" => {
                self.advance();
                Ok(true)
            }
            TokenType::Identifier(name) if name == "false" => {
                self.advance();
                Ok(false)
            }
            _ => Err(self.error(ParseErrorKind::UnexpectedToken, "Expect 'true' or 'false'.")),
        }
    }

    fn string_value(&mut self) -> Result<String, ParseError> {
        match &self.peek().tokentype {
            TokenType::String(s) => {
                let value = s.clone();
                self.advance();
                Ok(value)
            }
            _ => Err(self.error(ParseErrorKind::UnexpectedToken, "Expect string value.")),
        }
    }

    fn states_map(&mut self) -> Result<BTreeMap<String, Literal>, ParseError> {
        self.expect(
            TokenType::LeftBrace,
            ParseErrorKind::UnexpectedToken,
            "Expect '{' to open a states mapping.",
        )?;
        let mut states = BTreeMap::new();
        if let TokenType::RightBrace = self.peek().tokentype {
            self.advance();
            return Ok(states);
        }
        loop {
            let key = match &self.peek().tokentype {
                TokenType::String(s) => s.clone(),
                TokenType::Identifier(s) => s.clone(),
                _ => return Err(self.error(ParseErrorKind::UnexpectedToken, "Expect state name.")),
            };
            self.advance();
            self.expect(
                TokenType::Colon,
                ParseErrorKind::UnexpectedToken,
                "Expect ':' after state name.",
            )?;
            let value = self.state_literal()?;
            states.insert(key, value);
            match self.peek().tokentype {
                TokenType::Comma => {
                    self.advance();
                    if let TokenType::RightBrace = self.peek().tokentype {
                        self.advance();
                        return Ok(states);
                    }
                }
                TokenType::RightBrace => {
                    self.advance();
                    return Ok(states);
                }
                _ => {
                    return Err(self.error(
                        ParseErrorKind::UnexpectedToken,
                        "Expect ',' or '}' in states mapping.",
                    ))
                }
            }
        }
    }

    fn state_literal(&mut self) -> Result<Literal, ParseError> {
        match &self.peek().tokentype {
            TokenType::String(s) => {
                let value = Literal::String(s.clone());
                self.advance();
                Ok(value)
            }
            TokenType::Number(n) => {
                let value = Literal::Number(*n);
                self.advance();
                Ok(value)
            }
            TokenType::True => {
                self.advance();
                Ok(Literal::Boolean(true))
            }
            TokenType::False => {
                self.advance();
                Ok(Literal::Boolean(false))
            }
            TokenType::Minus => {
                self.advance();
                match self.peek().tokentype {
                    TokenType::Number(n) => {
                        self.advance();
                        Ok(Literal::Number(-n))
                    }
                    _ => Err(self.error(ParseErrorKind::UnexpectedToken, "Expect number after '-'.")),
                }
            }
            _ => Err(self.error(
                ParseErrorKind::UnexpectedToken,
                "Expect literal state value.",
            )),
        }
    }

    fn expect(
        &mut self,
        expected: TokenType,
        kind: ParseErrorKind,
        message: &str,
    ) -> Result<(), ParseError> {
        if self.peek().tokentype == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(kind, message))
        }
    }

    fn expect_identifier(&mut self, message: &str) -> Result<String, ParseError> {
        match &self.peek().tokentype {
            TokenType::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(ParseErrorKind::UnexpectedToken, message)),
        }
    }

    fn advance(&mut self) -> &'a Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().tokentype, TokenType::EOF)
    }

    fn peek(&self) -> &'a Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &'a Token {
        self.tokens
            .get(self.current + offset)
            .unwrap_or_else(|| &self.tokens[self.tokens.len() - 1])
    }

    fn previous(&self) -> &'a Token {
        &self.tokens[if self.current > 0 { self.current - 1 } else { 0 }]
    }

    fn error(&self, kind: ParseErrorKind, message: &str) -> ParseError {
        let token = self.peek();
        ParseError {
            kind,
            line: token.line,
            lexeme: token.lexeme.clone(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod parser_tests {
    use crate::ast::{
        AstPrinter, AttrValue, Expression, Literal, MarkupNode, PropertyValue, RunDirective,
        Statement, TypeTag,
    };
    use crate::parser::{self, ParseErrorKind, SourceUnit};
    use crate::scanner;

    fn parse(source: &str) -> SourceUnit {
        let tokens = scanner::scan_tokens(source).unwrap();
        parser::parse(&tokens).unwrap()
    }

    fn expect_error(source: &str, expected_kind: ParseErrorKind) {
        let tokens = scanner::scan_tokens(source).unwrap();
        let err = parser::parse(&tokens).unwrap_err();
        assert_eq!(err.kind, expected_kind, "{}", err);
    }

    #[test]
    fn class_with_bases_and_namespace() {
        let unit = parse("class main extends Persona, car namespace Hooks {}");
        assert_eq!(unit.classes.len(), 1);
        let class = &unit.classes[0];
        assert_eq!(class.name, "main");
        assert_eq!(class.bases, vec!["Persona".to_string(), "car".to_string()]);
        assert_eq!(class.namespace, Some("Hooks".to_string()));
    }

    #[test]
    fn constructor_is_flagged() {
        let unit = parse(
            "class Persona {\
                 public Persona() { print(\"hola\"); }\
                 public saludo() { return 1; }\
             }",
        );
        let class = &unit.classes[0];
        assert_eq!(class.methods.len(), 2);
        assert!(class.methods[0].is_constructor);
        assert!(!class.methods[1].is_constructor);
    }

    #[test]
    fn duplicate_class_name_in_one_unit() {
        expect_error("class A {} class A {}", ParseErrorKind::DuplicateClassName);
    }

    #[test]
    fn same_class_name_in_another_namespace_is_fine() {
        let unit = parse("class A {} class A namespace Otro {}");
        assert_eq!(unit.classes.len(), 2);
    }

    #[test]
    fn duplicate_constructor_is_rejected() {
        expect_error(
            "class Persona { public Persona() {} public Persona() {} }",
            ParseErrorKind::DuplicateConstructor,
        );
    }

    #[test]
    fn doubled_opening_brace_is_rejected() {
        expect_error(
            "class Persona namespace Persona{{ }",
            ParseErrorKind::UnexpectedToken,
        );
    }

    #[test]
    fn missing_closing_brace() {
        expect_error("class Persona {", ParseErrorKind::MissingClosingBrace);
    }

    #[test]
    fn const_property_cannot_use_init() {
        expect_error(
            "class A { const x: numeric = init; }",
            ParseErrorKind::UnexpectedToken,
        );
    }

    #[test]
    fn property_forms() {
        let unit = parse(
            "class main {\
                 public couter: numeric = init;\
                 const marca: string = \"Nissan\";\
                 let modelo: numeric = 2020;\
             }",
        );
        let class = &unit.classes[0];
        assert_eq!(class.properties.len(), 3);
        assert!(class.properties[0].mutable);
        assert_eq!(class.properties[0].value, PropertyValue::External);
        assert!(!class.properties[1].mutable);
        assert_eq!(class.properties[2].type_tag, TypeTag::Numeric);
    }

    #[test]
    fn init_statement_initializer() {
        let unit = parse("class A { public A() { let edad: numeric = init; } }");
        let body = &unit.classes[0].methods[0].body;
        match &body[0] {
            Statement::Declare { initializer, .. } => {
                assert_eq!(*initializer, Expression::Init);
            }
            other => panic!("expected declaration, got {:?}", other),
        }
    }

    #[test]
    fn init_is_not_an_ordinary_expression() {
        expect_error(
            "class A { public A() { let x: numeric = init + 1; } }",
            ParseErrorKind::UnexpectedToken,
        );
    }

    #[test]
    fn method_markup_body() {
        let unit = parse(
            "class main {\
                 public element() {\
                     return (<div class=\"saludo\">hola mundo{ this.n = this.n + 1; }</div>);\
                 }\
             }",
        );
        let method = &unit.classes[0].methods[0];
        let markup = method.markup.as_ref().unwrap();
        match markup {
            MarkupNode::Element {
                tag,
                attributes,
                children,
            } => {
                assert_eq!(tag, "div");
                assert_eq!(attributes.len(), 1);
                assert_eq!(
                    attributes[0].value,
                    AttrValue::Literal(Literal::String("saludo".to_string()))
                );
                assert_eq!(children.len(), 2);
                assert_eq!(children[0], MarkupNode::Text("hola mundo".to_string()));
                assert!(matches!(children[1], MarkupNode::Code(_)));
            }
            other => panic!("expected element, got {:?}", other),
        }
    }

    #[test]
    fn mismatched_closing_tag() {
        expect_error(
            "class main { public element() { return (<div>hola</span>); } }",
            ParseErrorKind::UnexpectedToken,
        );
    }

    #[test]
    fn document_with_run_directives() {
        let unit = parse(
            "<document>\
                 <run element=true states={ \"name\": \"Juan\", \"edad\": 18 } Class=Persona />\
                 <run href='./main/hooks' />\
             </document>",
        );
        let document = unit.document.unwrap();
        assert_eq!(document.directives.len(), 2);
        match &document.directives[0] {
            RunDirective::Run {
                class,
                element,
                states,
                ..
            } => {
                assert_eq!(class, "Persona");
                assert!(element);
                assert_eq!(
                    states.get("name"),
                    Some(&Literal::String("Juan".to_string()))
                );
                assert_eq!(states.get("edad"), Some(&Literal::Number(18.0)));
            }
            other => panic!("expected run, got {:?}", other),
        }
        match &document.directives[1] {
            RunDirective::Include { href, .. } => assert_eq!(href, "./main/hooks"),
            other => panic!("expected include, got {:?}", other),
        }
    }

    #[test]
    fn run_directive_requires_class_or_href() {
        expect_error(
            "<document><run element=true /></document>",
            ParseErrorKind::UnexpectedToken,
        );
    }

    #[test]
    fn invalid_assignment_target() {
        expect_error(
            "class A { public A() { 1 + 2 = 3; } }",
            ParseErrorKind::UnexpectedToken,
        );
    }

    #[test]
    fn class_round_trips_through_printer() {
        let unit = parse(
            "class Persona extends Base namespace Gente {\
                 public couter: numeric = init;\
                 const saludo: string = \"hola\";\
                 public Persona(name: string) {\
                     const nombre: string = \"Juan\";\
                     let edad: numeric = init;\
                     print(\"Hola, mi nombre es \" + nombre + \" y tengo \" + edad + \" años\");\
                 }\
                 public element() {\
                     return (<div><h1>hola mundo</h1>{ this.couter = this.couter + 1; }</div>);\
                 }\
             }",
        );
        let mut printer = AstPrinter {};
        let printed = printer.print_class(&unit.classes[0]);
        let tokens = scanner::scan_tokens(&printed).unwrap();
        let reparsed = parser::parse(&tokens).unwrap();
        assert_eq!(printer.print_class(&reparsed.classes[0]), printed);
    }
}
