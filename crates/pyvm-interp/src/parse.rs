//! Lowering from the ruff AST to [`crate::expressions`].

use std::{borrow::Cow, fmt, rc::Rc};

use num_bigint::BigInt;
use ruff_python_ast::{
    self as ast, BoolOp, CmpOp, ConversionFlag, ElifElseClause, Expr as AstExpr, InterpolatedStringElement, Number,
    Operator as AstOperator, Stmt, UnaryOp,
};
use ruff_python_parser::parse_module;
use ruff_text_size::{Ranged, TextRange, TextSize};

use crate::{
    exception_private::ExcType,
    expressions::{
        CmpOperator, Conversion, Expr, FStringPart, Handler, ImportAlias, Literal, Node, NodeKind, Operator, Target,
        UnaryOperator,
    },
};

/// Maximum nesting depth for expressions.
/// Keeps evaluation of inputs like `((((x,),),),)` from overflowing the stack.
#[cfg(not(debug_assertions))]
pub const MAX_NESTING_DEPTH: u16 = 200;
/// Debug builds use far more stack per frame.
#[cfg(debug_assertions)]
pub const MAX_NESTING_DEPTH: u16 = 35;

/// Why source could not be turned into runnable nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ParseError {
    /// Invalid Python.
    Syntax { msg: String, line: usize },
    /// Valid Python outside the supported subset.
    NotImplemented { msg: Cow<'static, str>, line: usize },
}

impl ParseError {
    pub(crate) fn exc_type(&self) -> ExcType {
        match self {
            Self::Syntax { .. } => ExcType::SyntaxError,
            Self::NotImplemented { .. } => ExcType::NotImplementedError,
        }
    }

    pub(crate) fn line(&self) -> usize {
        match self {
            Self::Syntax { line, .. } | Self::NotImplemented { line, .. } => *line,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax { msg, .. } => f.write_str(msg),
            Self::NotImplemented { msg, .. } => write!(f, "unsupported syntax: {msg}"),
        }
    }
}

pub(crate) fn parse(code: &str) -> Result<Vec<Node>, ParseError> {
    let mut parser = Parser::new(code);
    let parsed = parse_module(code).map_err(|e| ParseError::Syntax {
        msg: e.to_string(),
        line: parser.line_of(e.range()),
    })?;
    parser.parse_statements(parsed.into_syntax().body)
}

/// 1-based line numbers for byte offsets of one source text.
#[derive(Debug)]
pub(crate) struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub(crate) fn new(code: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(code.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { starts }
    }

    pub(crate) fn line(&self, offset: TextSize) -> usize {
        let offset = usize::from(offset);
        self.starts.partition_point(|&start| start <= offset).max(1)
    }
}

struct Parser<'a> {
    code: &'a str,
    lines: LineIndex,
    depth_remaining: u16,
    loop_depth: usize,
}

impl<'a> Parser<'a> {
    fn new(code: &'a str) -> Self {
        Self {
            code,
            lines: LineIndex::new(code),
            depth_remaining: MAX_NESTING_DEPTH,
            loop_depth: 0,
        }
    }

    fn line_of(&self, range: TextRange) -> usize {
        self.lines.line(range.start())
    }

    fn not_implemented(&self, msg: impl Into<Cow<'static, str>>, range: TextRange) -> ParseError {
        ParseError::NotImplemented {
            msg: msg.into(),
            line: self.line_of(range),
        }
    }

    fn syntax(&self, msg: impl Into<String>, range: TextRange) -> ParseError {
        ParseError::Syntax {
            msg: msg.into(),
            line: self.line_of(range),
        }
    }

    fn parse_statements(&mut self, statements: Vec<Stmt>) -> Result<Vec<Node>, ParseError> {
        statements.into_iter().map(|s| self.parse_statement(s)).collect()
    }

    fn parse_statement(&mut self, statement: Stmt) -> Result<Node, ParseError> {
        let range = statement.range();
        let line = self.line_of(range);
        let kind = match statement {
            Stmt::Expr(ast::StmtExpr { value, .. }) => NodeKind::Expr(self.parse_expression(*value)?),
            Stmt::Assign(ast::StmtAssign { targets, value, .. }) => NodeKind::Assign {
                targets: targets
                    .into_iter()
                    .map(|t| self.parse_target(t))
                    .collect::<Result<_, _>>()?,
                value: self.parse_expression(*value)?,
            },
            Stmt::AnnAssign(ast::StmtAnnAssign { target, value, .. }) => match value {
                Some(value) => NodeKind::Assign {
                    targets: vec![self.parse_target(*target)?],
                    value: self.parse_expression(*value)?,
                },
                // a bare annotation binds nothing
                None => NodeKind::Pass,
            },
            Stmt::AugAssign(ast::StmtAugAssign { target, op, value, .. }) => {
                let target = self.parse_target(*target)?;
                if matches!(target, Target::Unpack(_)) {
                    return Err(self.syntax("'tuple' is an illegal expression for augmented assignment", range));
                }
                NodeKind::AugAssign {
                    target,
                    op: convert_op(op),
                    value: self.parse_expression(*value)?,
                }
            }
            Stmt::Delete(ast::StmtDelete { targets, .. }) => NodeKind::Delete(
                targets
                    .into_iter()
                    .map(|t| self.parse_target(t))
                    .collect::<Result<_, _>>()?,
            ),
            Stmt::If(ast::StmtIf {
                test,
                body,
                elif_else_clauses,
                ..
            }) => NodeKind::If {
                test: self.parse_expression(*test)?,
                body: self.parse_statements(body)?,
                orelse: self.parse_elif_else_clauses(elif_else_clauses)?,
            },
            Stmt::While(ast::StmtWhile { test, body, orelse, .. }) => NodeKind::While {
                test: self.parse_expression(*test)?,
                body: self.parse_loop_body(body)?,
                orelse: self.parse_statements(orelse)?,
            },
            Stmt::For(ast::StmtFor {
                is_async,
                target,
                iter,
                body,
                orelse,
                ..
            }) => {
                if is_async {
                    return Err(self.not_implemented("'async for'", range));
                }
                NodeKind::For {
                    target: self.parse_target(*target)?,
                    iter: self.parse_expression(*iter)?,
                    body: self.parse_loop_body(body)?,
                    orelse: self.parse_statements(orelse)?,
                }
            }
            Stmt::Break(_) if self.loop_depth > 0 => NodeKind::Break,
            Stmt::Break(_) => return Err(self.syntax("'break' outside loop", range)),
            Stmt::Continue(_) if self.loop_depth > 0 => NodeKind::Continue,
            Stmt::Continue(_) => return Err(self.syntax("'continue' not properly in loop", range)),
            Stmt::Pass(_) => NodeKind::Pass,
            Stmt::Assert(ast::StmtAssert { test, msg, .. }) => NodeKind::Assert {
                test: self.parse_expression(*test)?,
                msg: msg.map(|m| self.parse_expression(*m)).transpose()?,
            },
            Stmt::Raise(ast::StmtRaise { exc, cause, .. }) => NodeKind::Raise {
                exc: exc.map(|e| self.parse_expression(*e)).transpose()?,
                cause: cause.map(|c| self.parse_expression(*c)).transpose()?,
            },
            Stmt::Try(ast::StmtTry {
                body,
                handlers,
                orelse,
                finalbody,
                is_star,
                ..
            }) => {
                if is_star {
                    return Err(self.not_implemented("'except*'", range));
                }
                NodeKind::Try {
                    body: self.parse_statements(body)?,
                    handlers: handlers
                        .into_iter()
                        .map(|h| self.parse_except_handler(h))
                        .collect::<Result<_, _>>()?,
                    orelse: self.parse_statements(orelse)?,
                    finally: self.parse_statements(finalbody)?,
                }
            }
            Stmt::Import(ast::StmtImport { names, .. }) => NodeKind::Import(
                names
                    .iter()
                    .map(|alias| ImportAlias {
                        name: alias.name.to_string(),
                        asname: alias.asname.as_ref().map(ToString::to_string),
                    })
                    .collect(),
            ),
            Stmt::ImportFrom(ast::StmtImportFrom {
                module, names, level, ..
            }) => {
                let module = match module {
                    Some(module) if level == 0 => module.to_string(),
                    _ => {
                        return Err(self.not_implemented("relative imports", range));
                    }
                };
                NodeKind::ImportFrom {
                    module,
                    names: names
                        .iter()
                        .map(|alias| ImportAlias {
                            name: alias.name.to_string(),
                            asname: alias.asname.as_ref().map(ToString::to_string),
                        })
                        .collect(),
                }
            }
            Stmt::FunctionDef(_) => return Err(self.not_implemented("function definitions", range)),
            Stmt::ClassDef(_) => return Err(self.not_implemented("class definitions", range)),
            Stmt::Return(_) => return Err(self.syntax("'return' outside function", range)),
            Stmt::With(_) => return Err(self.not_implemented("'with' statements", range)),
            Stmt::Match(_) => return Err(self.not_implemented("'match' statements", range)),
            Stmt::Global(_) | Stmt::Nonlocal(_) => {
                return Err(self.not_implemented("'global' and 'nonlocal'", range));
            }
            Stmt::TypeAlias(_) => return Err(self.not_implemented("type aliases", range)),
            Stmt::IpyEscapeCommand(_) => return Err(self.not_implemented("IPython escape commands", range)),
        };
        Ok(Node { line, kind })
    }

    fn parse_loop_body(&mut self, body: Vec<Stmt>) -> Result<Vec<Node>, ParseError> {
        self.loop_depth += 1;
        let body = self.parse_statements(body);
        self.loop_depth -= 1;
        body
    }

    fn parse_elif_else_clauses(&mut self, clauses: Vec<ElifElseClause>) -> Result<Vec<Node>, ParseError> {
        let mut tail = Vec::new();
        for clause in clauses.into_iter().rev() {
            let line = self.line_of(clause.range);
            tail = match clause.test {
                Some(test) => vec![Node {
                    line,
                    kind: NodeKind::If {
                        test: self.parse_expression(test)?,
                        body: self.parse_statements(clause.body)?,
                        orelse: tail,
                    },
                }],
                None => self.parse_statements(clause.body)?,
            };
        }
        Ok(tail)
    }

    fn parse_except_handler(&mut self, handler: ast::ExceptHandler) -> Result<Handler, ParseError> {
        let ast::ExceptHandler::ExceptHandler(h) = handler;
        Ok(Handler {
            line: self.line_of(h.range),
            exc_type: h.type_.map(|e| self.parse_expression(*e)).transpose()?,
            name: h.name.map(|n| n.id.to_string()),
            body: self.parse_statements(h.body)?,
        })
    }

    fn parse_target(&mut self, target: AstExpr) -> Result<Target, ParseError> {
        match target {
            AstExpr::Name(ast::ExprName { id, .. }) => Ok(Target::Name(id.to_string())),
            AstExpr::Subscript(ast::ExprSubscript { value, slice, .. }) => Ok(Target::Subscript {
                object: Box::new(self.parse_expression(*value)?),
                index: Box::new(self.parse_expression(*slice)?),
            }),
            AstExpr::Attribute(ast::ExprAttribute { value, attr, .. }) => Ok(Target::Attr {
                object: Box::new(self.parse_expression(*value)?),
                attr: attr.to_string(),
            }),
            AstExpr::Tuple(ast::ExprTuple { elts, .. }) | AstExpr::List(ast::ExprList { elts, .. }) => Ok(
                Target::Unpack(elts.into_iter().map(|e| self.parse_target(e)).collect::<Result<_, _>>()?),
            ),
            AstExpr::Starred(s) => Err(self.not_implemented("starred assignment targets", s.range)),
            other => Err(self.syntax("cannot assign to expression", other.range())),
        }
    }

    fn parse_expression(&mut self, expression: AstExpr) -> Result<Expr, ParseError> {
        if self.depth_remaining == 0 {
            return Err(self.syntax("too many nested parentheses", expression.range()));
        }
        self.depth_remaining -= 1;
        let result = self.parse_expression_impl(expression);
        self.depth_remaining += 1;
        result
    }

    fn parse_expressions(&mut self, expressions: impl IntoIterator<Item = AstExpr>) -> Result<Vec<Expr>, ParseError> {
        expressions.into_iter().map(|e| self.parse_expression(e)).collect()
    }

    fn parse_expression_impl(&mut self, expression: AstExpr) -> Result<Expr, ParseError> {
        match expression {
            AstExpr::NoneLiteral(_) => Ok(Expr::Literal(Literal::None)),
            AstExpr::BooleanLiteral(ast::ExprBooleanLiteral { value, .. }) => Ok(Expr::Literal(Literal::Bool(value))),
            AstExpr::NumberLiteral(ast::ExprNumberLiteral { value, range, .. }) => match value {
                Number::Int(i) => match i.as_i64() {
                    Some(i) => Ok(Expr::Literal(Literal::Int(i))),
                    None => parse_int_literal(&i.to_string())
                        .map(|big| Expr::Literal(Literal::BigInt(big)))
                        .ok_or_else(|| self.syntax(format!("invalid integer literal: {i}"), range)),
                },
                Number::Float(f) => Ok(Expr::Literal(Literal::Float(f))),
                Number::Complex { .. } => Err(self.not_implemented("complex numbers", range)),
            },
            AstExpr::StringLiteral(ast::ExprStringLiteral { value, .. }) => {
                Ok(Expr::Literal(Literal::Str(Rc::from(value.to_string()))))
            }
            AstExpr::BytesLiteral(ast::ExprBytesLiteral { value, .. }) => {
                let bytes: Cow<'_, [u8]> = Cow::from(&value);
                Ok(Expr::Literal(Literal::Bytes(Rc::from(bytes.as_ref()))))
            }
            AstExpr::FString(ast::ExprFString { value, .. }) => self.parse_fstring(&value),
            AstExpr::Name(ast::ExprName { id, .. }) => Ok(Expr::Name(id.to_string())),
            AstExpr::List(ast::ExprList { elts, .. }) => Ok(Expr::List(self.parse_expressions(elts)?)),
            AstExpr::Tuple(ast::ExprTuple { elts, .. }) => Ok(Expr::Tuple(self.parse_expressions(elts)?)),
            AstExpr::Dict(ast::ExprDict { items, range, .. }) => {
                let mut pairs = Vec::with_capacity(items.len());
                for ast::DictItem { key, value } in items {
                    let Some(key) = key else {
                        return Err(self.not_implemented("'**' unpacking in dict displays", range));
                    };
                    pairs.push((self.parse_expression(key)?, self.parse_expression(value)?));
                }
                Ok(Expr::Dict(pairs))
            }
            AstExpr::Starred(ast::ExprStarred { value, .. }) => Ok(Expr::Starred(Box::new(self.parse_expression(*value)?))),
            AstExpr::BinOp(ast::ExprBinOp { left, op, right, .. }) => Ok(Expr::BinOp {
                left: Box::new(self.parse_expression(*left)?),
                op: convert_op(op),
                right: Box::new(self.parse_expression(*right)?),
            }),
            AstExpr::UnaryOp(ast::ExprUnaryOp { op, operand, .. }) => Ok(Expr::UnaryOp {
                op: match op {
                    UnaryOp::Not => UnaryOperator::Not,
                    UnaryOp::USub => UnaryOperator::Neg,
                    UnaryOp::UAdd => UnaryOperator::Pos,
                    UnaryOp::Invert => UnaryOperator::Invert,
                },
                operand: Box::new(self.parse_expression(*operand)?),
            }),
            AstExpr::BoolOp(ast::ExprBoolOp { op, values, .. }) => {
                let values = self.parse_expressions(values)?;
                Ok(match op {
                    BoolOp::And => Expr::And(values),
                    BoolOp::Or => Expr::Or(values),
                })
            }
            AstExpr::Compare(ast::ExprCompare {
                left, ops, comparators, ..
            }) => {
                let left = Box::new(self.parse_expression(*left)?);
                let links = ops
                    .into_vec()
                    .into_iter()
                    .zip(comparators.into_vec())
                    .map(|(op, right)| Ok((convert_compare_op(op), self.parse_expression(right)?)))
                    .collect::<Result<_, ParseError>>()?;
                Ok(Expr::Compare { left, links })
            }
            AstExpr::If(ast::ExprIf { test, body, orelse, .. }) => Ok(Expr::IfElse {
                test: Box::new(self.parse_expression(*test)?),
                body: Box::new(self.parse_expression(*body)?),
                orelse: Box::new(self.parse_expression(*orelse)?),
            }),
            AstExpr::Call(ast::ExprCall { func, arguments, .. }) => {
                let ast::Arguments { args, keywords, .. } = arguments;
                let args = self.parse_expressions(args.into_vec())?;
                let mut kwargs = Vec::with_capacity(keywords.len());
                for keyword in keywords.into_vec() {
                    let Some(name) = keyword.arg else {
                        return Err(self.not_implemented("'**' argument unpacking", keyword.range));
                    };
                    kwargs.push((name.to_string(), self.parse_expression(keyword.value)?));
                }
                Ok(Expr::Call {
                    func: Box::new(self.parse_expression(*func)?),
                    args,
                    kwargs,
                })
            }
            AstExpr::Attribute(ast::ExprAttribute { value, attr, .. }) => Ok(Expr::Attr {
                object: Box::new(self.parse_expression(*value)?),
                attr: attr.to_string(),
            }),
            AstExpr::Subscript(ast::ExprSubscript { value, slice, .. }) => Ok(Expr::Subscript {
                object: Box::new(self.parse_expression(*value)?),
                index: Box::new(self.parse_expression(*slice)?),
            }),
            AstExpr::Slice(ast::ExprSlice { lower, upper, step, .. }) => Ok(Expr::Slice {
                lower: lower.map(|e| self.parse_expression(*e).map(Box::new)).transpose()?,
                upper: upper.map(|e| self.parse_expression(*e).map(Box::new)).transpose()?,
                step: step.map(|e| self.parse_expression(*e).map(Box::new)).transpose()?,
            }),
            other => {
                let what = match &other {
                    AstExpr::Lambda(_) => "lambda expressions",
                    AstExpr::Named(_) => "assignment expressions",
                    AstExpr::ListComp(_) | AstExpr::SetComp(_) | AstExpr::DictComp(_) | AstExpr::Generator(_) => {
                        "comprehensions"
                    }
                    AstExpr::Set(_) => "sets",
                    AstExpr::Await(_) | AstExpr::Yield(_) | AstExpr::YieldFrom(_) => "coroutines and generators",
                    AstExpr::TString(_) => "template strings",
                    AstExpr::EllipsisLiteral(_) => "'...'",
                    _ => "this expression",
                };
                Err(self.not_implemented(what, other.range()))
            }
        }
    }

    fn parse_fstring(&mut self, value: &ast::FStringValue) -> Result<Expr, ParseError> {
        let mut parts = Vec::new();
        for part in value {
            match part {
                ast::FStringPart::Literal(lit) => {
                    if !lit.value.is_empty() {
                        parts.push(FStringPart::Literal(lit.value.to_string()));
                    }
                }
                ast::FStringPart::FString(fstring) => {
                    for element in &fstring.elements {
                        parts.push(self.parse_fstring_element(element)?);
                    }
                }
            }
        }
        Ok(Expr::FString(parts))
    }

    fn parse_fstring_element(&mut self, element: &InterpolatedStringElement) -> Result<FStringPart, ParseError> {
        match element {
            InterpolatedStringElement::Literal(lit) => Ok(FStringPart::Literal(lit.value.to_string())),
            InterpolatedStringElement::Interpolation(interp) => {
                if let Some(spec) = &interp.format_spec {
                    return Err(self.not_implemented("f-string format specs", spec.range));
                }
                let debug_prefix = interp.debug_text.as_ref().map(|dt| {
                    let expr_text = &self.code[interp.expression.range()];
                    format!("{}{}{}", dt.leading, expr_text, dt.trailing)
                });
                let conversion = match interp.conversion {
                    ConversionFlag::None if debug_prefix.is_some() => Conversion::Repr,
                    ConversionFlag::None => Conversion::None,
                    ConversionFlag::Str => Conversion::Str,
                    ConversionFlag::Repr | ConversionFlag::Ascii => Conversion::Repr,
                };
                Ok(FStringPart::Interpolation {
                    expr: self.parse_expression((*interp.expression).clone())?,
                    conversion,
                    debug_prefix,
                })
            }
        }
    }
}

fn convert_op(op: AstOperator) -> Operator {
    match op {
        AstOperator::Add => Operator::Add,
        AstOperator::Sub => Operator::Sub,
        AstOperator::Mult => Operator::Mult,
        AstOperator::MatMult => Operator::MatMult,
        AstOperator::Div => Operator::Div,
        AstOperator::Mod => Operator::Mod,
        AstOperator::Pow => Operator::Pow,
        AstOperator::LShift => Operator::LShift,
        AstOperator::RShift => Operator::RShift,
        AstOperator::BitOr => Operator::BitOr,
        AstOperator::BitXor => Operator::BitXor,
        AstOperator::BitAnd => Operator::BitAnd,
        AstOperator::FloorDiv => Operator::FloorDiv,
    }
}

fn convert_compare_op(op: CmpOp) -> CmpOperator {
    match op {
        CmpOp::Eq => CmpOperator::Eq,
        CmpOp::NotEq => CmpOperator::NotEq,
        CmpOp::Lt => CmpOperator::Lt,
        CmpOp::LtE => CmpOperator::LtE,
        CmpOp::Gt => CmpOperator::Gt,
        CmpOp::GtE => CmpOperator::GtE,
        CmpOp::Is => CmpOperator::Is,
        CmpOp::IsNot => CmpOperator::IsNot,
        CmpOp::In => CmpOperator::In,
        CmpOp::NotIn => CmpOperator::NotIn,
    }
}

/// Parses an integer literal too large for `i64`, honouring radix prefixes and underscores.
fn parse_int_literal(s: &str) -> Option<BigInt> {
    let cleaned: String = s.chars().filter(|c| *c != '_').collect();
    if cleaned.len() >= 2 {
        let (prefix, digits) = cleaned.split_at(2);
        let radix = match prefix.to_ascii_lowercase().as_str() {
            "0x" => Some(16),
            "0o" => Some(8),
            "0b" => Some(2),
            _ => None,
        };
        if let Some(radix) = radix {
            return BigInt::parse_bytes(digits.as_bytes(), radix);
        }
    }
    cleaned.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_index_is_one_based() {
        let lines = LineIndex::new("a = 1\nb = 2\n\nc = 3");
        assert_eq!(lines.line(TextSize::new(0)), 1);
        assert_eq!(lines.line(TextSize::new(6)), 2);
        assert_eq!(lines.line(TextSize::new(13)), 4);
    }

    #[test]
    fn elif_chain_nests_in_orelse() {
        let nodes = parse("if a:\n    pass\nelif b:\n    pass\nelse:\n    x = 1\n").unwrap();
        let NodeKind::If { orelse, .. } = &nodes[0].kind else {
            panic!("expected if");
        };
        assert_eq!(orelse[0].line, 3);
        let NodeKind::If { orelse, .. } = &orelse[0].kind else {
            panic!("expected nested if");
        };
        assert!(matches!(orelse[0].kind, NodeKind::Assign { .. }));
    }

    #[test]
    fn unsupported_syntax_is_refused_with_its_line() {
        let err = parse("x = 1\ndef f():\n    pass\n").unwrap_err();
        assert_eq!(err.exc_type(), ExcType::NotImplementedError);
        assert_eq!(err.line(), 2);
        assert_eq!(err.to_string(), "unsupported syntax: function definitions");
    }

    #[test]
    fn syntax_errors_carry_line() {
        let err = parse("x = 1\ny = (\n").unwrap_err();
        assert_eq!(err.exc_type(), ExcType::SyntaxError);
    }

    #[test]
    fn break_outside_loop_is_a_syntax_error() {
        let err = parse("for i in x:\n    break\nbreak\n").unwrap_err();
        assert_eq!(err, ParseError::Syntax {
            msg: "'break' outside loop".to_owned(),
            line: 3,
        });
        assert!(parse("while x:\n    if y:\n        continue\n").is_ok());
    }

    #[test]
    fn big_literals() {
        assert_eq!(parse_int_literal("0xffff_ffff_ffff_ffff_ff"), BigInt::parse_bytes(b"ffffffffffffffffff", 16));
        assert_eq!(parse_int_literal("12"), Some(BigInt::from(12)));
    }
}
