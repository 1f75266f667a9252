//! Rule list syntax: `{prefix=0123,nexthop=127.0.0.2:7002} {domain=example.net,nexthop=proxy.example.net:5060}`
//!
//! Entries are separated by whitespace or commas; fields inside an entry by
//! `,` or `;`.

use nom::branch::alt;
use nom::bytes::complete::take_while1;
use nom::character::complete::{char, multispace0};
use nom::multi::separated_list1;
use nom::sequence::{delimited, preceded, separated_pair, terminated, tuple};
use nom::IResult;

use crate::common::errors::{IntermediaryError, Result};

/// One `{...}` entry before its fields are interpreted
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct RawEntry<'a> {
    pub offset: usize,
    pub text: &'a str,
    pub fields: Vec<(&'a str, &'a str)>,
}

fn key(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-')(input)
}

fn value(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace() && !matches!(c, ',' | ';' | '{' | '}' | '='))(input)
}

fn field(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(key, tuple((multispace0, char('='), multispace0)), value)(input)
}

fn field_separator(input: &str) -> IResult<&str, char> {
    delimited(multispace0, alt((char(','), char(';'))), multispace0)(input)
}

fn entry(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
    delimited(
        terminated(char('{'), multispace0),
        separated_list1(field_separator, field),
        preceded(multispace0, char('}')),
    )(input)
}

pub(crate) fn parse_entries(text: &str) -> Result<Vec<RawEntry<'_>>> {
    let mut entries = Vec::new();
    let mut rest = text;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            return Ok(entries);
        }
        let offset = text.len() - rest.len();
        match entry(rest) {
            Ok((remaining, fields)) => {
                let consumed = rest.len() - remaining.len();
                entries.push(RawEntry {
                    offset,
                    text: &rest[..consumed],
                    fields,
                });
                rest = remaining;
            }
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                let offset = text.len() - e.input.len();
                let message = match e.input.chars().next() {
                    Some(c) => format!("unexpected '{}'", c),
                    None => "unexpected end of rules".to_string(),
                };
                return Err(IntermediaryError::Syntax { offset, message });
            }
            Err(nom::Err::Incomplete(_)) => {
                return Err(IntermediaryError::Syntax {
                    offset: text.len(),
                    message: "unexpected end of rules".to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_and_separators() {
        let text = " {prefix=0123,nexthop=127.0.0.2:7002}, { domain = foo.net ; nexthop=proxy:5060 }\n{prefix=*,nexthop=h:1}";
        let entries = parse_entries(text).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].offset, 1);
        assert_eq!(entries[0].text, "{prefix=0123,nexthop=127.0.0.2:7002}");
        assert_eq!(entries[0].fields, vec![("prefix", "0123"), ("nexthop", "127.0.0.2:7002")]);
        assert_eq!(entries[1].fields, vec![("domain", "foo.net"), ("nexthop", "proxy:5060")]);
        assert_eq!(entries[2].fields, vec![("prefix", "*"), ("nexthop", "h:1")]);
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_entries("").unwrap().is_empty());
        assert!(parse_entries("  \n ").unwrap().is_empty());
    }

    #[test]
    fn test_syntax_errors_report_offset() {
        match parse_entries("{prefix=1,nexthop=h:1} prefix=2") {
            Err(IntermediaryError::Syntax { offset, message }) => {
                assert_eq!(offset, 23);
                assert_eq!(message, "unexpected 'p'");
            }
            other => panic!("unexpected {:?}", other),
        }
        match parse_entries("{prefix=1,nexthop=h:1") {
            Err(IntermediaryError::Syntax { offset, message }) => {
                assert_eq!(offset, 21);
                assert_eq!(message, "unexpected end of rules");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_entries("{}").is_err());
        assert!(parse_entries("{prefix=}").is_err());
    }
}
