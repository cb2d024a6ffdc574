use crate::interpreter::RuntimeError;
use crate::parser::ParseError;
use crate::registry::RegistryError;
use crate::scanner::LexError;
use std::error::Error;
use std::fmt;
use std::fmt::Formatter;

// The one error type crossing the driver boundary. Each stage keeps its own
// typed error; this enum only carries them to the caller unchanged.
#[derive(Debug)]
pub enum CssxError {
    Lex(LexError),
    Parse(ParseError),
    Registry(RegistryError),
    Runtime(RuntimeError),
    UnknownUnit { href: String, line: i32 },
}

impl fmt::Display for CssxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CssxError::Lex(e) => write!(f, "{}", e),
            CssxError::Parse(e) => write!(f, "{}", e),
            CssxError::Registry(e) => write!(f, "{}", e),
            CssxError::Runtime(e) => write!(f, "{}", e),
            CssxError::UnknownUnit { href, line } => {
                write!(f, "[line {}] Error: Unknown source unit '{}'.", line, href)
            }
        }
    }
}

impl Error for CssxError {}

impl From<LexError> for CssxError {
    fn from(e: LexError) -> CssxError {
        CssxError::Lex(e)
    }
}

impl From<ParseError> for CssxError {
    fn from(e: ParseError) -> CssxError {
        CssxError::Parse(e)
    }
}

impl From<RegistryError> for CssxError {
    fn from(e: RegistryError) -> CssxError {
        CssxError::Registry(e)
    }
}

impl From<RuntimeError> for CssxError {
    fn from(e: RuntimeError) -> CssxError {
        CssxError::Runtime(e)
    }
}
