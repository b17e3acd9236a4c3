//! Fragment parser
//!
//! Parses the expression, metadata and complex-type grammars used when macro
//! code asks the compiler to turn a string into a program fragment. Positions
//! are offset by the position the text is parsed at.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while},
    character::complete::{alpha1, alphanumeric1, char, digit1, hex_digit1, multispace1, one_of, satisfy},
    combinator::{map, not, opt, recognize, value, verify},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated},
    IResult, Parser,
};

use crate::ast::*;
use crate::error::{GrammarEntry, ParseError};

pub type PResult<'a, T> = IResult<&'a str, T>;

/// The text being parsed and where it lives.
#[derive(Debug, Clone, Copy)]
pub struct Source<'a> {
    full: &'a str,
    file_id: u32,
    base: u32,
}

impl<'a> Source<'a> {
    pub fn new(full: &'a str, pos: Position) -> Self {
        Self {
            full,
            file_id: pos.file_id,
            base: pos.min,
        }
    }

    /// Clamped to `u32::MAX` for text parsed far into a file
    fn offset(&self, rest: &str) -> u32 {
        let consumed = u32::try_from(self.full.len() - rest.len()).unwrap_or(u32::MAX);
        self.base.saturating_add(consumed)
    }

    fn span(&self, start: &str, end: &str) -> Position {
        Position::new(self.file_id, self.offset(start), self.offset(end))
    }
}

/// Run one grammar entry over the whole of `text`.
pub fn parse_entry<'a, T>(
    entry: GrammarEntry,
    text: &'a str,
    pos: Position,
    parser: impl Fn(Source<'a>, &'a str) -> PResult<'a, T>,
) -> Result<T, ParseError> {
    let src = Source::new(text, pos);
    if text.trim().is_empty() {
        return Err(ParseError::Empty { entry, pos });
    }
    match parser(src, text) {
        Ok((rest, parsed)) => {
            let rest = skip_trailing(rest);
            if rest.is_empty() {
                Ok(parsed)
            } else {
                Err(ParseError::TrailingInput {
                    entry,
                    rest: snippet(rest),
                    pos: src.span(rest, rest),
                })
            }
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(ParseError::Unexpected {
            entry,
            found: snippet(e.input),
            pos: src.span(e.input, e.input),
        }),
        Err(nom::Err::Incomplete(_)) => Err(ParseError::Unexpected {
            entry,
            found: "<eof>".to_string(),
            pos: src.span("", ""),
        }),
    }
}

fn skip_trailing(rest: &str) -> &str {
    let rest = ws(rest).map(|(r, _)| r).unwrap_or(rest);
    let rest = rest.strip_prefix(';').unwrap_or(rest);
    ws(rest).map(|(r, _)| r).unwrap_or(rest)
}

fn snippet(input: &str) -> String {
    if input.is_empty() {
        return "<eof>".to_string();
    }
    input.chars().take(16).collect()
}

fn fail(input: &str) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Verify))
}

// =============================================================================
// Whitespace and tokens
// =============================================================================

/// Skip whitespace and comments
pub fn ws(input: &str) -> PResult<()> {
    value(
        (),
        many0(alt((
            value((), multispace1),
            value((), line_comment),
            value((), block_comment),
        ))),
    )
    .parse(input)
}

fn line_comment(input: &str) -> PResult<&str> {
    recognize((tag("//"), take_while(|c: char| c != '\n'))).parse(input)
}

fn block_comment(input: &str) -> PResult<&str> {
    recognize((tag("/*"), take_until("*/"), tag("*/"))).parse(input)
}

fn is_keyword(s: &str) -> bool {
    matches!(
        s,
        "abstract" | "break" | "case" | "cast" | "catch" | "class" | "continue" |
        "default" | "do" | "dynamic" | "else" | "enum" | "extends" | "extern" |
        "final" | "for" | "function" | "if" | "implements" | "import" | "in" |
        "inline" | "interface" | "macro" | "new" | "override" | "package" |
        "private" | "public" | "return" | "static" | "switch" | "throw" | "try" |
        "typedef" | "untyped" | "using" | "var" | "while"
    )
}

/// Parse a keyword
pub fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    move |input| {
        let (input, _) = ws(input)?;
        terminated(tag(kw), not(satisfy(|c: char| c.is_alphanumeric() || c == '_'))).parse(input)
    }
}

/// Parse a symbol with whitespace
pub fn symbol<'a>(sym: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    move |input| {
        let (input, _) = ws(input)?;
        tag(sym).parse(input)
    }
}

fn raw_identifier(input: &str) -> PResult<&str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))
    .parse(input)
}

/// Parse an identifier that is not a keyword
pub fn identifier(input: &str) -> PResult<String> {
    let (input, _) = ws(input)?;
    let (input, id) = verify(raw_identifier, |s: &str| !is_keyword(s)).parse(input)?;
    Ok((input, id.to_string()))
}

/// Identifier in a position where keywords are allowed (field names, metadata)
pub fn any_identifier(input: &str) -> PResult<String> {
    let (input, _) = ws(input)?;
    let (input, id) = raw_identifier(input)?;
    Ok((input, id.to_string()))
}

// =============================================================================
// Literals
// =============================================================================

fn exponent(input: &str) -> PResult<&str> {
    recognize((one_of("eE"), opt(one_of("+-")), digit1)).parse(input)
}

fn number(input: &str) -> PResult<Constant> {
    alt((
        map(recognize((tag("0x"), hex_digit1)), |s: &str| Constant::Int(s.to_string())),
        map(recognize((digit1, char('.'), digit1, opt(exponent))), |s: &str| {
            Constant::Float(s.to_string())
        }),
        map(recognize((digit1, exponent)), |s: &str| Constant::Float(s.to_string())),
        map(digit1, |s: &str| Constant::Int(s.to_string())),
    ))
    .parse(input)
}

fn string_literal(input: &str) -> PResult<(String, StringQuotes)> {
    let (rest, quote) = one_of("\"'").parse(input)?;
    let quotes = if quote == '\'' {
        StringQuotes::Single
    } else {
        StringQuotes::Double
    };
    let mut out = String::new();
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        if c == quote {
            return Ok((&rest[i + 1..], (out, quotes)));
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some((_, 'n')) => out.push('\n'),
            Some((_, 't')) => out.push('\t'),
            Some((_, 'r')) => out.push('\r'),
            Some((_, '0')) => out.push('\0'),
            Some((_, escaped)) => out.push(escaped),
            None => break,
        }
    }
    Err(fail(input))
}

fn regexp_literal(input: &str) -> PResult<Constant> {
    let (rest, _) = tag("~/").parse(input)?;
    let mut pattern = String::new();
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '/' => {
                let (rest, flags) = take_while(|c: char| c.is_ascii_alphabetic()).parse(&rest[i + 1..])?;
                return Ok((rest, Constant::Regexp(pattern, flags.to_string())));
            }
            '\\' => {
                pattern.push('\\');
                if let Some((_, escaped)) = chars.next() {
                    pattern.push(escaped);
                }
            }
            '\n' => break,
            c => pattern.push(c),
        }
    }
    Err(fail(input))
}

// =============================================================================
// Metadata
// =============================================================================

/// `@name`, `@:name`, optionally followed directly by `(args)`
pub fn metadata_entry<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, MetadataEntry> {
    let (input, _) = ws(input)?;
    let start = input;
    let (input, _) = char('@').parse(input)?;
    let (input, colon) = opt(char(':')).parse(input)?;
    let (input, name) = raw_identifier(input)?;
    let (input, params) = opt(preceded(char('('), |i| arg_list_tail(src, i))).parse(input)?;
    let name = if colon.is_some() {
        format!(":{}", name)
    } else {
        name.to_string()
    };
    Ok((
        input,
        MetadataEntry {
            name,
            params: params.unwrap_or_default(),
            pos: src.span(start, input),
        },
    ))
}

fn arg_list_tail<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, Vec<Expr>> {
    terminated(
        separated_list0(symbol(","), |i| expr(src, i)),
        symbol(")"),
    )
    .parse(input)
}

fn call_args<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, Vec<Expr>> {
    preceded(symbol("("), |i| arg_list_tail(src, i)).parse(input)
}

// =============================================================================
// Types
// =============================================================================

/// A complex type, including `A -> B` function types
pub fn complex_type<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, ComplexType> {
    let (input, first) = type_atom(src, input)?;
    let (input, mut rest) = many0(preceded(symbol("->"), |i| type_atom(src, i))).parse(input)?;
    match rest.pop() {
        None => Ok((input, first)),
        Some(ret) => {
            let mut args = vec![first];
            args.extend(rest);
            Ok((input, ComplexType::Function(args, Box::new(ret))))
        }
    }
}

fn type_atom<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, ComplexType> {
    alt((
        map(preceded(symbol("?"), |i| type_atom(src, i)), |t| {
            ComplexType::Optional(Box::new(t))
        }),
        map(
            delimited(symbol("("), |i| complex_type(src, i), symbol(")")),
            |t| ComplexType::Parent(Box::new(t)),
        ),
        map(|i| anonymous_type(src, i), ComplexType::Anonymous),
        map(|i| type_path(src, i), ComplexType::Path),
    ))
    .parse(input)
}

fn anonymous_type<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, Vec<Field>> {
    delimited(
        symbol("{"),
        terminated(
            separated_list0(symbol(","), |i| anonymous_field(src, i)),
            opt(symbol(",")),
        ),
        symbol("}"),
    )
    .parse(input)
}

fn anonymous_field<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, Field> {
    let (input, _) = ws(input)?;
    let start = input;
    let (input, optional) = opt(char('?')).parse(input)?;
    let (input, name) = any_identifier(input)?;
    let (input, _) = symbol(":").parse(input)?;
    let (input, ty) = complex_type(src, input)?;
    let pos = src.span(start, input);
    let meta = match optional {
        Some(_) => vec![MetadataEntry {
            name: ":optional".to_string(),
            params: Vec::new(),
            pos,
        }],
        None => Vec::new(),
    };
    Ok((
        input,
        Field {
            name,
            doc: None,
            access: Vec::new(),
            kind: FieldKind::Var(Some(ty), None),
            pos,
            meta,
        },
    ))
}

/// `pack.Name<Params>` or `pack.Module.Sub<Params>`
pub fn type_path<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, TypePath> {
    let start = input;
    let (input, parts) = separated_list1(char('.'), any_identifier).parse(input)?;
    let split = parts
        .iter()
        .position(|p| p.starts_with(|c: char| c.is_ascii_uppercase()))
        .unwrap_or(parts.len() - 1);
    if parts.len() > split + 2 {
        return Err(fail(start));
    }
    let mut parts = parts.into_iter();
    let pack: Vec<String> = parts.by_ref().take(split).collect();
    let name = parts.next().ok_or_else(|| fail(start))?;
    let sub = parts.next();
    let (input, params) = opt(delimited(
        symbol("<"),
        separated_list1(symbol(","), |i| complex_type(src, i)),
        symbol(">"),
    ))
    .parse(input)?;
    Ok((
        input,
        TypePath {
            pack,
            name,
            params: params
                .unwrap_or_default()
                .into_iter()
                .map(TypeParam::Type)
                .collect(),
            sub,
        },
    ))
}

// =============================================================================
// Expressions
// =============================================================================

/// Full expression, including assignment and ternaries
pub fn expr<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, Expr> {
    binary_expr(src, input, 0)
}

const TERNARY_PRECEDENCE: u8 = 2;

fn precedence(op: &Binop) -> (u8, bool) {
    match op {
        Binop::Assign | Binop::AssignOp(_) | Binop::Arrow => (1, true),
        Binop::NullCoal => (3, true),
        Binop::BoolOr => (4, false),
        Binop::BoolAnd => (5, false),
        Binop::Interval | Binop::In => (6, false),
        Binop::Eq | Binop::NotEq | Binop::Gt | Binop::Gte | Binop::Lt | Binop::Lte => (7, false),
        Binop::Or | Binop::And | Binop::Xor => (8, false),
        Binop::Shl | Binop::Shr | Binop::UShr => (9, false),
        Binop::Add | Binop::Sub => (10, false),
        Binop::Mult | Binop::Div => (11, false),
        Binop::Mod => (12, false),
    }
}

fn assign_op(op: Binop) -> Binop {
    Binop::AssignOp(Box::new(op))
}

fn binop(input: &str) -> PResult<Binop> {
    let (input, _) = ws(input)?;
    alt((
        alt((
            value(assign_op(Binop::UShr), tag(">>>=")),
            value(assign_op(Binop::Shl), tag("<<=")),
            value(assign_op(Binop::Shr), tag(">>=")),
            value(assign_op(Binop::NullCoal), tag("??=")),
            value(Binop::UShr, tag(">>>")),
            value(Binop::Interval, tag("...")),
            value(Binop::NullCoal, tag("??")),
            value(Binop::BoolAnd, tag("&&")),
            value(Binop::BoolOr, tag("||")),
            value(Binop::Eq, tag("==")),
            value(Binop::NotEq, tag("!=")),
            value(Binop::Gte, tag(">=")),
            value(Binop::Lte, tag("<=")),
            value(Binop::Shl, tag("<<")),
            value(Binop::Shr, tag(">>")),
            value(Binop::Arrow, tag("=>")),
        )),
        alt((
            value(assign_op(Binop::Add), tag("+=")),
            value(assign_op(Binop::Sub), tag("-=")),
            value(assign_op(Binop::Mult), tag("*=")),
            value(assign_op(Binop::Div), tag("/=")),
            value(assign_op(Binop::Mod), tag("%=")),
            value(assign_op(Binop::And), tag("&=")),
            value(assign_op(Binop::Or), tag("|=")),
            value(assign_op(Binop::Xor), tag("^=")),
            value(Binop::Add, tag("+")),
            value(Binop::Sub, terminated(tag("-"), not(char('>')))),
            value(Binop::Mult, tag("*")),
            value(Binop::Div, tag("/")),
            value(Binop::Mod, tag("%")),
            value(Binop::Gt, tag(">")),
            value(Binop::Lt, tag("<")),
            value(Binop::Assign, tag("=")),
            value(Binop::And, tag("&")),
            value(Binop::Or, tag("|")),
            value(Binop::Xor, tag("^")),
        )),
    ))
    .parse(input)
}

fn ternary_question(input: &str) -> PResult<()> {
    let (input, _) = ws(input)?;
    value((), terminated(char('?'), not(one_of("?.")))).parse(input)
}

/// Precedence climbing over binary operators and the ternary
fn binary_expr<'a>(src: Source<'a>, input: &'a str, min_prec: u8) -> PResult<'a, Expr> {
    let (mut input, mut lhs) = unary_expr(src, input)?;
    loop {
        if min_prec <= TERNARY_PRECEDENCE {
            if let Ok((rest, _)) = ternary_question(input) {
                let (rest, then) = expr(src, rest)?;
                let (rest, _) = symbol(":").parse(rest)?;
                let (rest, otherwise) = binary_expr(src, rest, TERNARY_PRECEDENCE)?;
                let pos = lhs.pos.union(otherwise.pos);
                lhs = Expr::new(
                    ExprKind::Ternary(Box::new(lhs), Box::new(then), Box::new(otherwise)),
                    pos,
                );
                input = rest;
                continue;
            }
        }
        let Ok((rest, op)) = binop(input) else {
            break;
        };
        let (prec, right_assoc) = precedence(&op);
        if prec < min_prec {
            break;
        }
        let next = if right_assoc { prec } else { prec + 1 };
        let (rest, rhs) = binary_expr(src, rest, next)?;
        let pos = lhs.pos.union(rhs.pos);
        lhs = Expr::new(ExprKind::Binop(op, Box::new(lhs), Box::new(rhs)), pos);
        input = rest;
    }
    Ok((input, lhs))
}

fn prefix_op(input: &str) -> PResult<Unop> {
    alt((
        value(Unop::Increment, tag("++")),
        value(Unop::Decrement, tag("--")),
        value(Unop::Spread, tag("...")),
        value(Unop::Not, char('!')),
        value(Unop::Neg, char('-')),
        value(Unop::NegBits, terminated(char('~'), not(char('/')))),
    ))
    .parse(input)
}

fn unary_expr<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, Expr> {
    let (input, _) = ws(input)?;
    let start = input;
    if let Ok((rest, op)) = prefix_op(input) {
        let (rest, operand) = unary_expr(src, rest)?;
        let pos = src.span(start, rest);
        let kind = match (op, operand.kind) {
            (Unop::Neg, ExprKind::Const(Constant::Int(v))) => {
                ExprKind::Const(Constant::Int(format!("-{}", v)))
            }
            (Unop::Neg, ExprKind::Const(Constant::Float(v))) => {
                ExprKind::Const(Constant::Float(format!("-{}", v)))
            }
            (op, kind) => ExprKind::Unop(op, false, Box::new(Expr::new(kind, operand.pos))),
        };
        return Ok((rest, Expr::new(kind, pos)));
    }
    postfix_expr(src, input)
}

fn postfix_expr<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, Expr> {
    let (input, _) = ws(input)?;
    let start = input;
    let (mut input, mut e) = primary(src, input)?;
    loop {
        if let Ok((rest, name)) = preceded(symbol("."), any_identifier).parse(input) {
            e = Expr::new(ExprKind::Field(Box::new(e), name), src.span(start, rest));
            input = rest;
            continue;
        }
        if let Ok((rest, args)) = call_args(src, input) {
            e = Expr::new(ExprKind::Call(Box::new(e), args), src.span(start, rest));
            input = rest;
            continue;
        }
        if let Ok((rest, index)) =
            delimited(symbol("["), |i| expr(src, i), symbol("]")).parse(input)
        {
            e = Expr::new(
                ExprKind::Array(Box::new(e), Box::new(index)),
                src.span(start, rest),
            );
            input = rest;
            continue;
        }
        if let Ok((rest, op)) = preceded(
            ws,
            alt((
                value(Unop::Increment, tag("++")),
                value(Unop::Decrement, tag("--")),
            )),
        )
        .parse(input)
        {
            e = Expr::new(ExprKind::Unop(op, true, Box::new(e)), src.span(start, rest));
            input = rest;
            continue;
        }
        break;
    }
    Ok((input, e))
}

fn primary<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, Expr> {
    let (input, _) = ws(input)?;
    let start = input;
    let (input, kind) = alt((
        |i| keyword_expr(src, i),
        |i| meta_expr(src, i),
        |i| paren_expr(src, i),
        |i| array_decl(src, i),
        |i| block_or_object(src, i),
        map(number, ExprKind::Const),
        map(string_literal, |(s, q)| ExprKind::Const(Constant::String(s, q))),
        map(regexp_literal, ExprKind::Const),
        map(identifier, |name| ExprKind::Const(Constant::Ident(name))),
    ))
    .parse(input)?;
    Ok((input, Expr::new(kind, src.span(start, input))))
}

fn boxed(e: Expr) -> Box<Expr> {
    Box::new(e)
}

fn meta_expr<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, ExprKind> {
    let (input, entry) = metadata_entry(src, input)?;
    let (input, e) = expr(src, input)?;
    Ok((input, ExprKind::Meta(entry, boxed(e))))
}

fn paren_expr<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, ExprKind> {
    let (input, _) = symbol("(").parse(input)?;
    let (input, e) = expr(src, input)?;
    let (input, check) = opt(preceded(symbol(":"), |i| complex_type(src, i))).parse(input)?;
    let (input, _) = symbol(")").parse(input)?;
    Ok((
        input,
        match check {
            Some(t) => ExprKind::CheckType(boxed(e), t),
            None => ExprKind::Parenthesis(boxed(e)),
        },
    ))
}

fn array_decl<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, ExprKind> {
    map(
        delimited(
            symbol("["),
            terminated(
                separated_list0(symbol(","), |i| expr(src, i)),
                opt(symbol(",")),
            ),
            symbol("]"),
        ),
        ExprKind::ArrayDecl,
    )
    .parse(input)
}

fn object_field<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, ObjectField> {
    let (input, _) = ws(input)?;
    let (input, (field, quoted)) = alt((
        map(any_identifier, |n| (n, false)),
        map(string_literal, |(s, _)| (s, true)),
    ))
    .parse(input)?;
    let (input, _) = symbol(":").parse(input)?;
    let (input, e) = expr(src, input)?;
    Ok((input, ObjectField { field, expr: e, quoted }))
}

fn block_or_object<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, ExprKind> {
    let (input, _) = symbol("{").parse(input)?;
    let object = terminated(
        terminated(
            separated_list1(symbol(","), |i| object_field(src, i)),
            opt(symbol(",")),
        ),
        symbol("}"),
    )
    .parse(input);
    if let Ok((rest, fields)) = object {
        return Ok((rest, ExprKind::ObjectDecl(fields)));
    }
    let (input, statements) = many0(alt((
        map(terminated(|i| expr(src, i), opt(symbol(";"))), Some),
        value(None, symbol(";")),
    )))
    .parse(input)?;
    let (input, _) = symbol("}").parse(input)?;
    Ok((input, ExprKind::Block(statements.into_iter().flatten().collect())))
}

fn keyword_expr<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, ExprKind> {
    alt((
        |i| var_expr(src, i),
        |i| function_expr(src, i),
        |i| if_expr(src, i),
        |i| while_expr(src, i),
        |i| do_while_expr(src, i),
        |i| for_expr(src, i),
        |i| new_expr(src, i),
        |i| cast_expr(src, i),
        map(preceded(keyword("return"), opt(|i| expr(src, i))), |e| {
            ExprKind::Return(e.map(boxed))
        }),
        map(preceded(keyword("throw"), |i| expr(src, i)), |e| {
            ExprKind::Throw(boxed(e))
        }),
        map(preceded(keyword("untyped"), |i| expr(src, i)), |e| {
            ExprKind::Untyped(boxed(e))
        }),
        value(ExprKind::Break, keyword("break")),
        value(ExprKind::Continue, keyword("continue")),
    ))
    .parse(input)
}

fn var_expr<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, ExprKind> {
    let (input, is_static) = opt(keyword("static")).parse(input)?;
    let (input, decl) = alt((keyword("var"), keyword("final"))).parse(input)?;
    let is_final = decl == "final";
    let (input, vars) = separated_list1(symbol(","), |i| {
        var_decl(src, i, is_final, is_static.is_some())
    })
    .parse(input)?;
    Ok((input, ExprKind::Vars(vars)))
}

fn var_decl<'a>(
    src: Source<'a>,
    input: &'a str,
    is_final: bool,
    is_static: bool,
) -> PResult<'a, Var> {
    let (input, name) = identifier(input)?;
    let (input, ty) = opt(preceded(symbol(":"), |i| complex_type(src, i))).parse(input)?;
    let (input, init) = opt(preceded(
        terminated(symbol("="), not(one_of("=>"))),
        |i| expr(src, i),
    ))
    .parse(input)?;
    Ok((
        input,
        Var {
            name,
            ty,
            expr: init.map(boxed),
            is_final,
            is_static,
            meta: Vec::new(),
        },
    ))
}

fn function_arg<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, FunctionArg> {
    let (input, opt_mark) = opt(symbol("?")).parse(input)?;
    let (input, name) = identifier(input)?;
    let (input, ty) = opt(preceded(symbol(":"), |i| complex_type(src, i))).parse(input)?;
    let (input, default) = opt(preceded(symbol("="), |i| expr(src, i))).parse(input)?;
    Ok((
        input,
        FunctionArg {
            name,
            opt: opt_mark.is_some(),
            ty,
            value: default,
            meta: Vec::new(),
        },
    ))
}

fn function_expr<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, ExprKind> {
    let (input, _) = keyword("function").parse(input)?;
    let (input, name) = opt(identifier).parse(input)?;
    let (input, args) = delimited(
        symbol("("),
        separated_list0(symbol(","), |i| function_arg(src, i)),
        symbol(")"),
    )
    .parse(input)?;
    let (input, ret) = opt(preceded(symbol(":"), |i| complex_type(src, i))).parse(input)?;
    let (input, body) = expr(src, input)?;
    let kind = match name {
        Some(name) => FunctionKind::Named(name),
        None => FunctionKind::Anonymous,
    };
    Ok((
        input,
        ExprKind::Function(
            kind,
            Function {
                args,
                ret,
                expr: Some(boxed(body)),
                params: Vec::new(),
            },
        ),
    ))
}

fn condition<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, Expr> {
    delimited(symbol("("), |i| expr(src, i), symbol(")")).parse(input)
}

fn if_expr<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, ExprKind> {
    let (input, _) = keyword("if").parse(input)?;
    let (input, cond) = condition(src, input)?;
    let (input, then) = expr(src, input)?;
    let (input, otherwise) = opt(preceded(
        pair(opt(symbol(";")), keyword("else")),
        |i| expr(src, i),
    ))
    .parse(input)?;
    Ok((
        input,
        ExprKind::If(boxed(cond), boxed(then), otherwise.map(boxed)),
    ))
}

fn while_expr<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, ExprKind> {
    let (input, _) = keyword("while").parse(input)?;
    let (input, cond) = condition(src, input)?;
    let (input, body) = expr(src, input)?;
    Ok((input, ExprKind::While(boxed(cond), boxed(body), true)))
}

fn do_while_expr<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, ExprKind> {
    let (input, _) = keyword("do").parse(input)?;
    let (input, body) = expr(src, input)?;
    let (input, _) = opt(symbol(";")).parse(input)?;
    let (input, _) = keyword("while").parse(input)?;
    let (input, cond) = condition(src, input)?;
    Ok((input, ExprKind::While(boxed(cond), boxed(body), false)))
}

fn for_expr<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, ExprKind> {
    let (input, _) = keyword("for").parse(input)?;
    let (input, _) = symbol("(").parse(input)?;
    let (input, _) = ws(input)?;
    let var_start = input;
    let (input, var) = identifier(input)?;
    let var = Expr::ident(&var, src.span(var_start, input));
    let (input, _) = keyword("in").parse(input)?;
    let (input, iter) = expr(src, input)?;
    let (input, _) = symbol(")").parse(input)?;
    let (input, body) = expr(src, input)?;
    let pos = var.pos.union(iter.pos);
    let head = Expr::new(ExprKind::Binop(Binop::In, boxed(var), boxed(iter)), pos);
    Ok((input, ExprKind::For(boxed(head), boxed(body))))
}

fn new_expr<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, ExprKind> {
    let (input, _) = keyword("new").parse(input)?;
    let (input, _) = ws(input)?;
    let (input, path) = type_path(src, input)?;
    let (input, args) = call_args(src, input)?;
    Ok((input, ExprKind::New(path, args)))
}

fn cast_expr<'a>(src: Source<'a>, input: &'a str) -> PResult<'a, ExprKind> {
    let (input, _) = keyword("cast").parse(input)?;
    let checked = (
        symbol("("),
        |i| expr(src, i),
        symbol(","),
        preceded(ws, |i| complex_type(src, i)),
        symbol(")"),
    )
        .parse(input);
    if let Ok((rest, (_, e, _, t, _))) = checked {
        return Ok((rest, ExprKind::Cast(boxed(e), Some(t))));
    }
    let (input, e) = unary_expr(src, input)?;
    Ok((input, ExprKind::Cast(boxed(e), None)))
}
