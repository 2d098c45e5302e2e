//! Patch path parsing.
//!
//! A JSON Patch Query path is parsed into a [`Locator`]. Eight grammars are
//! recognised and tried in a fixed order, first full match wins:
//!
//! ```text
//! 1. $.note[0].text                         indexed element
//! 2. $.note[?(@.id=='n1')].text             single condition
//! 3. $.relatedParty[?(@.role.name=="x")]    single condition, dotted field
//! 4. $.note[?(@.a=='1' && @.b=='2')]        several conditions
//! 5. /note/text?item.id=n1&author=bob       query-string filter
//! 6. ?filter=note[?(@.id=='n1')].text       prefixed single condition
//! 7. $.channel.name                         nested simple field
//! 8. /status  or  $.status                  simple field
//! ```
//!
//! Identifiers are `[A-Za-z0-9_]+`. Quoted values may use `'` or `"` and extend
//! to the last closing quote that still leaves a valid `)]` tail. Filter values
//! are always strings.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1},
    combinator::{all_consuming, map, opt, recognize, rest, verify},
    error::{ErrorKind, ParseError, context},
    multi::separated_list1,
    sequence::{delimited, preceded},
};
use nom_language::error::{VerboseError, VerboseErrorKind};
use std::fmt;

use crate::error::TmfError;

type PResult<'a, O> = IResult<&'a str, O, VerboseError<&'a str>>;

/// One `field == value` equality test of a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    /// Dotted path into the element.
    pub field: String,
    pub value: String,
}

impl Condition {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Parsed target of a patch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// A top-level field, or a dotted path into a top-level object when `nested`.
    SimpleField { name: String, nested: bool },
    /// An element of a relation array addressed by position.
    IndexedElement {
        array: String,
        index: usize,
        attribute: Option<String>,
    },
    /// Elements of a relation array matching every condition.
    FilteredElement {
        array: String,
        conditions: Vec<Condition>,
        attribute: Option<String>,
    },
}

/// How array elements are selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector<'a> {
    Index(usize),
    Conditions(&'a [Condition]),
}

impl Locator {
    /// The relation array addressed, if any.
    pub fn array(&self) -> Option<&str> {
        match self {
            Locator::SimpleField { .. } => None,
            Locator::IndexedElement { array, .. } | Locator::FilteredElement { array, .. } => {
                Some(array)
            }
        }
    }

    /// Dotted sub-path inside the selected elements.
    pub fn attribute(&self) -> Option<&str> {
        match self {
            Locator::SimpleField { .. } => None,
            Locator::IndexedElement { attribute, .. }
            | Locator::FilteredElement { attribute, .. } => attribute.as_deref(),
        }
    }

    pub fn selector(&self) -> Option<Selector<'_>> {
        match self {
            Locator::SimpleField { .. } => None,
            Locator::IndexedElement { index, .. } => Some(Selector::Index(*index)),
            Locator::FilteredElement { conditions, .. } => Some(Selector::Conditions(conditions)),
        }
    }

    /// Top-level entity attribute this locator changes.
    pub fn top_level(&self) -> &str {
        match self {
            Locator::SimpleField { name, .. } => name.split('.').next().unwrap_or(name),
            Locator::IndexedElement { array, .. } | Locator::FilteredElement { array, .. } => {
                array
            }
        }
    }
}

fn quote_for(value: &str) -> char {
    if value.contains('\'') { '"' } else { '\'' }
}

/// Canonical `$.`-form of the locator; parsing it yields the same locator.
impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::SimpleField { name, .. } => write!(f, "$.{}", name),
            Locator::IndexedElement {
                array,
                index,
                attribute,
            } => {
                write!(f, "$.{}[{}]", array, index)?;
                if let Some(attribute) = attribute {
                    write!(f, ".{}", attribute)?;
                }
                Ok(())
            }
            Locator::FilteredElement {
                array,
                conditions,
                attribute,
            } => {
                write!(f, "$.{}[?(", array)?;
                for (i, condition) in conditions.iter().enumerate() {
                    if i > 0 {
                        write!(f, " && ")?;
                    }
                    let q = quote_for(&condition.value);
                    write!(f, "@.{}=={}{}{}", condition.field, q, condition.value, q)?;
                }
                write!(f, ")]")?;
                if let Some(attribute) = attribute {
                    write!(f, ".{}", attribute)?;
                }
                Ok(())
            }
        }
    }
}

/// Parse a patch path into a [`Locator`].
///
/// ```rust
/// use tmf_server::patch::path::{parse_path, Condition, Locator};
///
/// let locator = parse_path("$.note[?(@.id=='n1')].text").unwrap();
/// assert_eq!(
///     locator,
///     Locator::FilteredElement {
///         array: "note".to_string(),
///         conditions: vec![Condition::new("id", "n1")],
///         attribute: Some("text".to_string()),
///     }
/// );
/// ```
pub fn parse_path(path: &str) -> Result<Locator, TmfError> {
    let result = context(
        "expected a JSON Patch Query path such as '$.field', '$.array[0]' or '$.array[?(@.id=='x')]'",
        alt((
            indexed_element,
            single_condition_filter,
            multi_condition_filter,
            query_string_filter,
            prefixed_filter,
            nested_field,
            simple_field,
        )),
    )
    .parse(path);

    match result {
        Ok((_, locator)) => Ok(locator),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(convert_verbose_error(path, e)),
        Err(nom::Err::Incomplete(_)) => Err(TmfError::invalid_path(path, "unexpected end of input")),
    }
}

fn convert_verbose_error(input: &str, err: VerboseError<&str>) -> TmfError {
    let Some((fragment, kind)) = err.errors.last() else {
        return TmfError::invalid_path(input, "invalid path syntax");
    };

    let position = input.len() - fragment.len();
    let message = match kind {
        VerboseErrorKind::Context(ctx) => ctx.to_string(),
        VerboseErrorKind::Char(c) => format!("expected '{}'", c),
        VerboseErrorKind::Nom(nom_err) => format!("parser error: {:?}", nom_err),
    };

    TmfError::invalid_path(input, format!("{} at position {}", message, position))
}

fn reject<O>(input: &str, kind: ErrorKind) -> PResult<'_, O> {
    Err(nom::Err::Error(VerboseError::from_error_kind(input, kind)))
}

fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_quote(c: char) -> bool {
    c == '\'' || c == '"'
}

fn ident(input: &str) -> PResult<'_, &str> {
    take_while1(is_word).parse(input)
}

fn root_ident(input: &str) -> PResult<'_, &str> {
    preceded(tag("$."), ident).parse(input)
}

/// Optional `.<attr>` suffix; must consume the rest of the input.
fn attribute_tail(input: &str) -> PResult<'_, Option<String>> {
    map(
        all_consuming(opt(preceded(
            char('.'),
            verify(rest, |attr: &str| !attr.is_empty()),
        ))),
        |attribute: Option<&str>| attribute.map(str::to_string),
    )
    .parse(input)
}

/// Splits `<body>)]<tail>` at the right-most `)]` whose tail is a valid
/// attribute suffix and whose body satisfies `accept`.
fn filter_body<'a>(
    input: &'a str,
    accept: impl Fn(&'a str) -> bool,
) -> PResult<'a, (&'a str, Option<String>)> {
    for (at, _) in input.rmatch_indices(")]") {
        let body = &input[..at];
        if !accept(body) {
            continue;
        }
        if let Ok((rest, attribute)) = attribute_tail(&input[at + 2..]) {
            return Ok((rest, (body, attribute)));
        }
    }
    reject(input, ErrorKind::TakeUntil)
}

/// A quote, then a closing quote followed by optional whitespace and `&&`.
fn joins_conditions(value: &str) -> bool {
    value.char_indices().any(|(i, c)| {
        is_quote(c) && value[i + c.len_utf8()..].trim_start().starts_with("&&")
    })
}

/// `<q>value<q>)]<tail>`, with the value taken greedily.
///
/// A value that would swallow an `&&`-joined condition is refused so the
/// multi-condition grammar sees it instead.
fn quoted_value_and_tail(input: &str) -> PResult<'_, (String, Option<String>)> {
    let Some(open) = input.chars().next().filter(|c| is_quote(*c)) else {
        return reject(input, ErrorKind::Char);
    };
    let inner = &input[open.len_utf8()..];

    let (rest, (body, attribute)) = filter_body(inner, |body| {
        body.chars().last().is_some_and(is_quote) && !joins_conditions(&body[..body.len() - 1])
    })?;
    let value = &body[..body.len() - 1];
    Ok((rest, (value.to_string(), attribute)))
}

/// Grammar 1: `$.<array>[<digits>](.<attr>)?`
fn indexed_element(input: &str) -> PResult<'_, Locator> {
    let (rest, (array, digits)) =
        (root_ident, delimited(char('['), digit1, char(']'))).parse(input)?;
    let (rest, attribute) = attribute_tail(rest)?;

    Ok((
        rest,
        Locator::IndexedElement {
            array: array.to_string(),
            // Indices too large for usize can never be in range.
            index: digits.parse().unwrap_or(usize::MAX),
            attribute,
        },
    ))
}

/// Grammars 2 and 3: `$.<array>[?(@.<field>==<q-value>)](.<attr>)?`
///
/// The field is anything up to the first `=`, so a plain identifier and a
/// dotted path parse the same way.
fn single_condition_filter(input: &str) -> PResult<'_, Locator> {
    let (rest, array) = root_ident(input)?;
    let (rest, field) = preceded(tag("[?(@."), take_while1(|c: char| c != '=')).parse(rest)?;
    let (rest, (value, attribute)) = preceded(tag("=="), quoted_value_and_tail).parse(rest)?;

    Ok((
        rest,
        Locator::FilteredElement {
            array: array.to_string(),
            conditions: vec![Condition::new(field, value)],
            attribute,
        },
    ))
}

/// Grammar 4: `$.<array>[?(<cond> && <cond> ...)](.<attr>)?`
fn multi_condition_filter(input: &str) -> PResult<'_, Locator> {
    let (rest, array) = root_ident(input)?;
    let (rest, _) = tag("[?(").parse(rest)?;
    let (rest, (body, attribute)) = filter_body(rest, |body| !body.is_empty())?;

    let conditions = split_conditions(body);
    if conditions.is_empty() {
        return reject(body, ErrorKind::SeparatedList);
    }

    Ok((
        rest,
        Locator::FilteredElement {
            array: array.to_string(),
            conditions,
            attribute,
        },
    ))
}

/// Splits on `&&` (surrounding whitespace belongs to the separator) and keeps
/// the parts that read as `@.<field>==<q-value>`.
fn split_conditions(body: &str) -> Vec<Condition> {
    let parts: Vec<&str> = body.split("&&").collect();
    let last = parts.len() - 1;

    parts
        .iter()
        .enumerate()
        .filter_map(|(i, part)| {
            let part = if i > 0 { part.trim_start() } else { part };
            let part = if i < last { part.trim_end() } else { part };
            condition_in(part)
        })
        .collect()
}

/// Finds the left-most `@.<field>==<q>value<q>` that runs to the end of `part`.
fn condition_in(part: &str) -> Option<Condition> {
    part.match_indices("@.").find_map(|(at, _)| {
        let candidate = &part[at + 2..];
        let (field, rest) = candidate.split_once('=')?;
        let quoted = rest.strip_prefix('=')?;
        if field.is_empty() || quoted.chars().count() < 2 {
            return None;
        }
        let mut chars = quoted.chars();
        let (open, close) = (chars.next()?, chars.next_back()?);
        if !is_quote(open) || !is_quote(close) {
            return None;
        }
        let value = &quoted[open.len_utf8()..quoted.len() - close.len_utf8()];
        Some(Condition::new(field.trim(), value))
    })
}

/// Grammar 5: `/<array>(/<attr>)?\?<field>=<value>(&<field>=<value>)*`
fn query_string_filter(input: &str) -> PResult<'_, Locator> {
    let (after_segments, (array, attribute)) = (
        preceded(char('/'), ident),
        opt(preceded(char('/'), ident)),
    )
        .parse(input)?;
    let (remaining, query) = preceded(
        char('?'),
        all_consuming(verify(rest, |query: &str| !query.is_empty())),
    )
    .parse(after_segments)?;

    let mut conditions = Vec::new();
    for part in query.split('&') {
        let mut pieces = part.split('=');
        let field_path = pieces.next().unwrap_or_default();
        let Some(value) = pieces.next() else {
            return reject(part, ErrorKind::Char);
        };
        // `item.id` addresses `id` of the element.
        let field = match field_path.split_once('.') {
            Some((_, nested)) => nested,
            None => field_path,
        };
        conditions.push(Condition::new(field, value));
    }

    Ok((
        remaining,
        Locator::FilteredElement {
            array: array.to_string(),
            conditions,
            attribute: attribute.map(str::to_string),
        },
    ))
}

/// Grammar 6: `?filter=<array>[?(@.<ident>==<q-value>)](.<attr>)?`
fn prefixed_filter(input: &str) -> PResult<'_, Locator> {
    let (rest, (array, field)) = (
        preceded(tag("?filter="), ident),
        preceded(tag("[?(@."), ident),
    )
        .parse(input)?;
    let (rest, (value, attribute)) = preceded(tag("=="), quoted_value_and_tail).parse(rest)?;

    Ok((
        rest,
        Locator::FilteredElement {
            array: array.to_string(),
            conditions: vec![Condition::new(field, value)],
            attribute,
        },
    ))
}

/// Grammar 7: `$.<ident>(.<ident>)+`
fn nested_field(input: &str) -> PResult<'_, Locator> {
    let (rest, name) = all_consuming(preceded(
        tag("$."),
        verify(recognize(separated_list1(char('.'), ident)), |name: &str| {
            name.contains('.')
        }),
    ))
    .parse(input)?;

    Ok((
        rest,
        Locator::SimpleField {
            name: name.to_string(),
            nested: true,
        },
    ))
}

/// Grammar 8: `/<ident>` or `$.<ident>`
fn simple_field(input: &str) -> PResult<'_, Locator> {
    let (rest, name) =
        all_consuming(preceded(alt((tag("/"), tag("$."))), ident)).parse(input)?;

    Ok((
        rest,
        Locator::SimpleField {
            name: name.to_string(),
            nested: false,
        },
    ))
}
