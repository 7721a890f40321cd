//! Nom-based template parser.
//!
//! A template is literal text interleaved with `{{ ... }}` actions. An action
//! is either a pipeline (`fn arg | fn2 arg`), a control keyword
//! (`if`, `else`, `else if`, `end`) or a comment (`{{/* ... */}}`).

use super::TemplateError;
use nom::{
    IResult,
    branch::alt,
    bytes::complete::{is_not, tag, take_until},
    character::complete::{char, digit1, multispace0, multispace1, satisfy},
    combinator::{map, map_res, not, opt, peek, recognize, value},
    multi::{fold_many0, many0, many0_count, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
};

/// A single argument position inside a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Function name, or a bare word that must name one.
    Ident(String),
    /// Context field such as `.User`.
    Field(String),
    Str(String),
    Int(i64),
    Bool(bool),
    /// Parenthesised sub-pipeline.
    Sub(Pipeline),
}

/// One pipeline stage: a function with arguments, or a single value.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub operands: Vec<Operand>,
}

/// Stages joined by `|`; each stage's result becomes the last argument of the next.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Action(Pipeline),
    If {
        cond: Pipeline,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

/// Flat token stream produced before control blocks are nested.
#[derive(Debug, Clone, PartialEq)]
enum Item {
    Text(String),
    Action(Pipeline),
    If(Pipeline),
    ElseIf(Pipeline),
    Else,
    End,
    Comment,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn ident(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(is_ident_start),
        many0_count(satisfy(is_ident_char)),
    ))(input)
}

/// Match a keyword only when it is not the prefix of a longer identifier.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag(kw), not(peek(satisfy(is_ident_char))))
}

enum StrFragment<'a> {
    Literal(&'a str),
    Escaped(char),
}

fn escape(input: &str) -> IResult<&str, char> {
    preceded(
        char('\\'),
        alt((
            value('\\', char('\\')),
            value('"', char('"')),
            value('\n', char('n')),
            value('\t', char('t')),
            value('\r', char('r')),
        )),
    )(input)
}

fn string_lit(input: &str) -> IResult<&str, String> {
    let fragment = alt((
        map(is_not("\\\""), StrFragment::Literal),
        map(escape, StrFragment::Escaped),
    ));
    delimited(
        char('"'),
        fold_many0(fragment, String::new, |mut acc, frag| {
            match frag {
                StrFragment::Literal(s) => acc.push_str(s),
                StrFragment::Escaped(c) => acc.push(c),
            }
            acc
        }),
        char('"'),
    )(input)
}

fn raw_string_lit(input: &str) -> IResult<&str, String> {
    map(
        delimited(char('`'), opt(is_not("`")), char('`')),
        |s: Option<&str>| s.unwrap_or_default().to_string(),
    )(input)
}

fn int_lit(input: &str) -> IResult<&str, i64> {
    map_res(
        terminated(
            recognize(pair(opt(char('-')), digit1)),
            not(peek(satisfy(is_ident_char))),
        ),
        str::parse::<i64>,
    )(input)
}

/// Deepest accepted nesting of parenthesised sub-pipelines.
pub const MAX_NESTING: usize = 32;

/// `( pipeline )` one level below `depth`. Past [`MAX_NESTING`] this is a
/// hard failure so no other branch is tried.
fn sub_pipeline(input: &str, depth: usize) -> IResult<&str, Pipeline> {
    let (rest, _) = pair(char('('), multispace0)(input)?;
    if depth >= MAX_NESTING {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::TooLarge,
        )));
    }
    terminated(
        |i| pipeline(i, depth + 1),
        pair(multispace0, char(')')),
    )(rest)
}

fn operand(input: &str, depth: usize) -> IResult<&str, Operand> {
    alt((
        map(|i| sub_pipeline(i, depth), Operand::Sub),
        map(string_lit, Operand::Str),
        map(raw_string_lit, Operand::Str),
        map(int_lit, Operand::Int),
        map(preceded(char('.'), ident), |f| Operand::Field(f.to_string())),
        value(Operand::Bool(true), keyword("true")),
        value(Operand::Bool(false), keyword("false")),
        map(ident, |s| Operand::Ident(s.to_string())),
    ))(input)
}

fn command(input: &str, depth: usize) -> IResult<&str, Command> {
    let (rest, first) = operand(input, depth)?;
    let (rest, more) = many0(preceded(multispace1, |i| operand(i, depth)))(rest)?;
    let mut operands = Vec::with_capacity(more.len() + 1);
    operands.push(first);
    operands.extend(more);
    Ok((rest, Command { operands }))
}

fn pipeline(input: &str, depth: usize) -> IResult<&str, Pipeline> {
    map(
        separated_list1(delimited(multispace0, char('|'), multispace0), |i| {
            command(i, depth)
        }),
        |commands| Pipeline { commands },
    )(input)
}

fn top_pipeline(input: &str) -> IResult<&str, Pipeline> {
    pipeline(input, 0)
}

fn action_body(input: &str) -> IResult<&str, Item> {
    alt((
        value(
            Item::Comment,
            tuple((tag("/*"), take_until("*/"), tag("*/"))),
        ),
        map(
            preceded(
                tuple((keyword("else"), multispace1, keyword("if"), multispace1)),
                top_pipeline,
            ),
            Item::ElseIf,
        ),
        map(preceded(pair(keyword("if"), multispace1), top_pipeline), Item::If),
        value(Item::Else, keyword("else")),
        value(Item::End, keyword("end")),
        map(top_pipeline, Item::Action),
    ))(input)
}

fn action(input: &str) -> IResult<&str, Item> {
    delimited(
        pair(tag("{{"), multispace0),
        action_body,
        pair(multispace0, tag("}}")),
    )(input)
}

fn text(input: &str) -> IResult<&str, Item> {
    let end = input.find("{{").unwrap_or(input.len());
    if end == 0 {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::TakeUntil,
        )));
    }
    Ok((&input[end..], Item::Text(input[..end].to_string())))
}

fn items(source: &str) -> Result<Vec<Item>, TemplateError> {
    let mut rest = source;
    let mut out = Vec::new();
    while !rest.is_empty() {
        match alt((action, text))(rest) {
            Ok((next, item)) => {
                out.push(item);
                rest = next;
            }
            Err(nom::Err::Failure(e)) if e.code == nom::error::ErrorKind::TooLarge => {
                return Err(TemplateError::Parse {
                    offset: source.len() - e.input.len(),
                    message: format!("sub-pipelines nested deeper than {}", MAX_NESTING),
                });
            }
            Err(_) => {
                let offset = source.len() - rest.len();
                let snippet: String = rest.chars().take(16).collect();
                return Err(TemplateError::Parse {
                    offset,
                    message: format!("malformed action near {:?}", snippet),
                });
            }
        }
    }
    Ok(out)
}

/// Nest the flat item stream into a node tree.
fn build(items: Vec<Item>) -> Result<Vec<Node>, TemplateError> {
    struct Frame {
        cond: Pipeline,
        then: Vec<Node>,
        otherwise: Vec<Node>,
        in_else: bool,
        /// Closed by the same `end` as the parent (from `else if`).
        chained: bool,
    }

    fn push(stack: &mut [Frame], root: &mut Vec<Node>, node: Node) {
        match stack.last_mut() {
            Some(f) if f.in_else => f.otherwise.push(node),
            Some(f) => f.then.push(node),
            None => root.push(node),
        }
    }

    fn close(stack: &mut Vec<Frame>, root: &mut Vec<Node>) -> Option<bool> {
        let f = stack.pop()?;
        let chained = f.chained;
        push(
            stack,
            root,
            Node::If {
                cond: f.cond,
                then: f.then,
                otherwise: f.otherwise,
            },
        );
        Some(chained)
    }

    let mut root = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();

    for item in items {
        match item {
            Item::Text(t) => push(&mut stack, &mut root, Node::Text(t)),
            Item::Action(p) => push(&mut stack, &mut root, Node::Action(p)),
            Item::Comment => {}
            Item::If(cond) => stack.push(Frame {
                cond,
                then: Vec::new(),
                otherwise: Vec::new(),
                in_else: false,
                chained: false,
            }),
            Item::ElseIf(cond) => {
                match stack.last_mut() {
                    Some(f) if !f.in_else => f.in_else = true,
                    _ => return Err(unexpected("else if")),
                }
                stack.push(Frame {
                    cond,
                    then: Vec::new(),
                    otherwise: Vec::new(),
                    in_else: false,
                    chained: true,
                });
            }
            Item::Else => match stack.last_mut() {
                Some(f) if !f.in_else => f.in_else = true,
                _ => return Err(unexpected("else")),
            },
            Item::End => loop {
                match close(&mut stack, &mut root) {
                    Some(true) => continue,
                    Some(false) => break,
                    None => return Err(unexpected("end")),
                }
            },
        }
    }

    if !stack.is_empty() {
        return Err(TemplateError::Parse {
            offset: 0,
            message: "unclosed if".to_string(),
        });
    }
    Ok(root)
}

fn unexpected(keyword: &str) -> TemplateError {
    TemplateError::Parse {
        offset: 0,
        message: format!("unexpected {{{{{}}}}}", keyword),
    }
}

/// Parse template source into a node tree.
pub fn parse(source: &str) -> Result<Vec<Node>, TemplateError> {
    build(items(source)?)
}
