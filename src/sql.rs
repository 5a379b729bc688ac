// SQL module - parsing and planning for the supported statement subset

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod planner;
pub mod token;

pub use ast::*;
pub use lexer::Lexer;
pub use parser::Parser;
pub use planner::{plan, Filter, KeyBounds, Plan, ScanPlan};
pub use token::Token;
