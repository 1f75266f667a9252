//! # Reference text codec
//!
//! Parses RFC 3261 wire messages into [`Message`] values. Start lines and
//! header lines are recognised with `nom`; header values are handed to the
//! `FromStr` impls of the individual types.
//!
//! Stream transports use [`frame_length`] to cut messages out of a byte
//! stream before calling [`parse_message`].

use bytes::Bytes;
use nom::bytes::complete::{tag, take_while1, take_while_m_n};
use nom::character::complete::{char, space0, space1};
use nom::combinator::map_res;
use nom::sequence::tuple;
use nom::IResult;
use tracing::warn;

use crate::error::{Error, Result};
use crate::message::{Headers, Message, Request, Response};
use crate::types::method::is_token_char;
use crate::types::{CSeq, Method, NameAddr, RAck, StatusCode, Uri, Via};

const SIP_VERSION: &str = "SIP/2.0";

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(is_token_char)(input)
}

fn request_line(input: &str) -> IResult<&str, (&str, &str)> {
    let (input, (method, _, uri, _, _)) = tuple((
        token,
        space1,
        take_while1(|c: char| !c.is_whitespace()),
        space1,
        tag(SIP_VERSION),
    ))(input)?;
    Ok((input, (method, uri)))
}

fn status_line(input: &str) -> IResult<&str, u16> {
    let (input, (_, _, code)) = tuple((
        tag(SIP_VERSION),
        space1,
        map_res(take_while_m_n(3, 3, |c: char| c.is_ascii_digit()), |s: &str| {
            s.parse::<u16>()
        }),
    ))(input)?;
    Ok((input, code))
}

/// `name HCOLON`; the remaining input is the header value
fn header_name(input: &str) -> IResult<&str, &str> {
    let (input, (name, _, _, _)) = tuple((token, space0, char(':'), space0))(input)?;
    Ok((input, name))
}

enum StartLine {
    Request(Method, Uri),
    Response(StatusCode, String),
}

fn parse_start_line(line: &str) -> Result<StartLine> {
    let invalid = || Error::InvalidStartLine(line.to_string());
    if line.starts_with(SIP_VERSION) {
        let (reason, code) = status_line(line).map_err(|_| invalid())?;
        let status = StatusCode::from_u16(code)?;
        let reason = reason.trim();
        let reason = if reason.is_empty() {
            status.reason_phrase().to_string()
        } else {
            reason.to_string()
        };
        Ok(StartLine::Response(status, reason))
    } else {
        let (rest, (method, uri)) = request_line(line).map_err(|_| invalid())?;
        if !rest.trim().is_empty() {
            return Err(invalid());
        }
        Ok(StartLine::Request(method.parse()?, uri.parse()?))
    }
}

/// Position just past the blank line ending the header section
fn header_end(buf: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = find(buf, b"\r\n\r\n") {
        return Some((pos, pos + 4));
    }
    find(buf, b"\n\n").map(|pos| (pos, pos + 2))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Joins folded continuation lines (RFC 3261 Section 7.3.1)
fn unfold(head: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in head.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.starts_with([' ', '\t']) {
            if let Some(last) = lines.last_mut() {
                last.push(' ');
                last.push_str(line.trim());
                continue;
            }
        }
        lines.push(line.to_string());
    }
    lines
}

/// Splits a comma-separated header value, ignoring commas inside
/// quoted strings and angle brackets
fn split_list(value: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut in_quotes = false;
    let mut in_brackets = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_brackets = true,
            '>' if !in_quotes => in_brackets = false,
            ',' if !in_quotes && !in_brackets => {
                items.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(value[start..].trim());
    items.retain(|item| !item.is_empty());
    items
}

fn canonical_name(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    let canonical = match lower.as_str() {
        "v" => "via",
        "f" => "from",
        "t" => "to",
        "i" => "call-id",
        "m" => "contact",
        "l" => "content-length",
        "c" => "content-type",
        "k" => "supported",
        other => other,
    };
    canonical.to_string()
}

/// Stores a single-valued header; repeats are logged and ignored
fn keep_first<T>(slot: &mut Option<T>, header: &'static str, value: T) {
    if slot.is_some() {
        warn!(header, "repeated header, keeping the first value");
        return;
    }
    *slot = Some(value);
}

#[derive(Default)]
struct PartialHeaders {
    via: Vec<Via>,
    from: Option<NameAddr>,
    to: Option<NameAddr>,
    call_id: Option<String>,
    cseq: Option<CSeq>,
    max_forwards: Option<u32>,
    contact: Option<NameAddr>,
    route: Vec<NameAddr>,
    record_route: Vec<NameAddr>,
    rseq: Option<u32>,
    rack: Option<RAck>,
    require: Vec<String>,
    supported: Vec<String>,
    content_type: Option<String>,
    content_length: Option<usize>,
    user_agent: Option<String>,
    other: Vec<(String, String)>,
}

impl PartialHeaders {
    fn apply(&mut self, name: &str, value: &str) -> Result<()> {
        let number = |header: &'static str| {
            value
                .trim()
                .parse::<u32>()
                .map_err(|_| Error::invalid_header(header, value))
        };
        match canonical_name(name).as_str() {
            "via" => {
                for item in split_list(value) {
                    self.via.push(item.parse()?);
                }
            }
            "from" => keep_first(&mut self.from, "From", value.parse()?),
            "to" => keep_first(&mut self.to, "To", value.parse()?),
            "call-id" => {
                if value.is_empty() {
                    return Err(Error::invalid_header("Call-ID", value));
                }
                keep_first(&mut self.call_id, "Call-ID", value.to_string());
            }
            "cseq" => keep_first(&mut self.cseq, "CSeq", value.parse()?),
            "max-forwards" => {
                keep_first(&mut self.max_forwards, "Max-Forwards", number("Max-Forwards")?)
            }
            "contact" if value != "*" => {
                if let Some(first) = split_list(value).first() {
                    self.contact = Some(first.parse()?);
                }
            }
            "route" => {
                for item in split_list(value) {
                    self.route.push(item.parse()?);
                }
            }
            "record-route" => {
                for item in split_list(value) {
                    self.record_route.push(item.parse()?);
                }
            }
            "rseq" => keep_first(&mut self.rseq, "RSeq", number("RSeq")?),
            "rack" => keep_first(&mut self.rack, "RAck", value.parse()?),
            "require" => self
                .require
                .extend(split_list(value).into_iter().map(str::to_string)),
            "supported" => self
                .supported
                .extend(split_list(value).into_iter().map(str::to_string)),
            "content-type" => self.content_type = Some(value.to_string()),
            "content-length" => {
                let length = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| Error::invalid_header("Content-Length", value))?;
                keep_first(&mut self.content_length, "Content-Length", length);
            }
            "user-agent" => self.user_agent = Some(value.to_string()),
            _ => self.other.push((name.to_string(), value.to_string())),
        }
        Ok(())
    }

    fn finish(self) -> Result<Headers> {
        if self.via.is_empty() {
            return Err(Error::MissingHeader("Via"));
        }
        let from = self.from.ok_or(Error::MissingHeader("From"))?;
        let to = self.to.ok_or(Error::MissingHeader("To"))?;
        let call_id = self.call_id.ok_or(Error::MissingHeader("Call-ID"))?;
        let cseq = self.cseq.ok_or(Error::MissingHeader("CSeq"))?;

        let mut headers = Headers::new(from, to, call_id, cseq);
        headers.via = self.via;
        headers.max_forwards = self.max_forwards;
        headers.contact = self.contact;
        headers.route = self.route;
        headers.record_route = self.record_route;
        headers.rseq = self.rseq;
        headers.rack = self.rack;
        headers.require = self.require;
        headers.supported = self.supported;
        headers.content_type = self.content_type;
        headers.user_agent = self.user_agent;
        headers.other = self.other;
        Ok(headers)
    }
}

/// Length of the first complete message at the start of `buf`.
///
/// Returns `Ok(None)` while the header section or body is still incomplete.
/// Leading CRLFs (keep-alive pings on streams) count towards the first
/// message and are skipped by [`parse_message`].
pub fn frame_length(buf: &[u8]) -> Result<Option<usize>> {
    let Some((head_end, body_start)) = header_end(buf) else {
        return Ok(None);
    };
    let head = std::str::from_utf8(&buf[..head_end])
        .map_err(|_| Error::Parse("header section is not UTF-8".to_string()))?;
    let mut content_length = None;
    for line in unfold(head) {
        if let Ok((value, name)) = header_name(&line) {
            if canonical_name(name) == "content-length" && content_length.is_none() {
                content_length = Some(
                    value
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| Error::invalid_header("Content-Length", value))?,
                );
            }
        }
    }
    let total = body_start + content_length.unwrap_or(0);
    Ok((buf.len() >= total).then_some(total))
}

/// Parses one complete SIP message.
///
/// Without a Content-Length header the body extends to the end of the
/// buffer; with one, the buffer must contain at least that many body bytes.
pub fn parse_message(buf: &[u8]) -> Result<Message> {
    let start = buf
        .iter()
        .position(|b| *b != b'\r' && *b != b'\n')
        .ok_or_else(|| Error::Parse("empty message".to_string()))?;
    let buf = &buf[start..];

    let (head_end, body_start) =
        header_end(buf).ok_or_else(|| Error::Parse("unterminated header section".to_string()))?;
    let head = std::str::from_utf8(&buf[..head_end])
        .map_err(|_| Error::Parse("header section is not UTF-8".to_string()))?;

    let mut lines = unfold(head).into_iter();
    let start_line = lines
        .next()
        .ok_or_else(|| Error::Parse("missing start line".to_string()))?;
    let start_line = parse_start_line(&start_line)?;

    let mut partial = PartialHeaders::default();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (value, name) =
            header_name(&line).map_err(|_| Error::Parse(format!("malformed header line '{}'", line)))?;
        partial.apply(name, value.trim())?;
    }

    let available = &buf[body_start..];
    let body = match partial.content_length {
        Some(length) if length > available.len() => {
            return Err(Error::Parse(format!(
                "body shorter than Content-Length ({} < {})",
                available.len(),
                length
            )));
        }
        Some(length) => Bytes::copy_from_slice(&available[..length]),
        None => Bytes::copy_from_slice(available),
    };
    let headers = partial.finish()?;

    let message = match start_line {
        StartLine::Request(method, uri) => {
            if headers.cseq.method != method {
                return Err(Error::invalid_header("CSeq", headers.cseq.to_string()));
            }
            Message::Request(Request {
                method,
                uri,
                headers,
                body,
            })
        }
        StartLine::Response(status, reason) => Message::Response(Response {
            status,
            reason,
            headers,
            body,
        }),
    };
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransportType;

    const INVITE: &str = "INVITE sip:bob@biloxi.example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP pc33.atlanta.example.com;branch=z9hG4bK776asdhds\r\n\
Max-Forwards: 70\r\n\
To: Bob <sip:bob@biloxi.example.com>\r\n\
From: Alice <sip:alice@atlanta.example.com>;tag=1928301774\r\n\
Call-ID: a84b4c76e66710@pc33.atlanta.example.com\r\n\
CSeq: 314159 INVITE\r\n\
Contact: <sip:alice@pc33.atlanta.example.com>\r\n\
Supported: 100rel, timer\r\n\
Content-Type: application/sdp\r\n\
Content-Length: 4\r\n\
\r\n\
v=0\n";

    #[test]
    fn test_parse_invite() {
        let message = parse_message(INVITE.as_bytes()).unwrap();
        let request = message.as_request().unwrap();
        assert_eq!(request.method, Method::Invite);
        assert_eq!(request.uri.user.as_deref(), Some("bob"));
        assert_eq!(request.branch(), Some("z9hG4bK776asdhds"));
        assert_eq!(request.from_tag(), Some("1928301774"));
        assert_eq!(request.to_tag(), None);
        assert_eq!(request.cseq(), &CSeq::new(314159, Method::Invite));
        assert_eq!(request.headers.supported, vec!["100rel", "timer"]);
        assert_eq!(&request.body[..], b"v=0\n");
    }

    #[test]
    fn test_compact_and_folded_headers() {
        let raw = "SIP/2.0 180 Ringing\r\n\
v: SIP/2.0/TCP 10.0.0.1:5060;branch=z9hG4bKa,\r\n SIP/2.0/UDP 10.0.0.2;branch=z9hG4bKb\r\n\
f: <sip:a@10.0.0.1>;tag=x\r\n\
t: <sip:b@10.0.0.2>;tag=y\r\n\
i: call-42\r\n\
CSeq: 1 INVITE\r\n\
Require: 100rel\r\n\
RSeq: 1\r\n\
l: 0\r\n\r\n";
        let message = parse_message(raw.as_bytes()).unwrap();
        let response = message.as_response().unwrap();
        assert_eq!(response.status, StatusCode::Ringing);
        assert_eq!(response.headers.via.len(), 2);
        assert_eq!(response.headers.via[0].transport, TransportType::Tcp);
        assert_eq!(response.headers.via[1].branch(), Some("z9hG4bKb"));
        assert_eq!(response.call_id(), "call-42");
        assert!(response.is_reliable_provisional());
    }

    #[test]
    fn test_serialize_then_parse_preserves_message() {
        let message = parse_message(INVITE.as_bytes()).unwrap();
        let reparsed = parse_message(&message.to_bytes()).unwrap();
        assert_eq!(message, reparsed);
    }

    #[test]
    fn test_missing_mandatory_header() {
        let raw = "OPTIONS sip:x@10.0.0.1 SIP/2.0\r\n\
Via: SIP/2.0/UDP 10.0.0.2;branch=z9hG4bK1\r\n\
To: <sip:x@10.0.0.1>\r\n\
From: <sip:y@10.0.0.2>;tag=1\r\n\
CSeq: 1 OPTIONS\r\n\r\n";
        assert_eq!(
            parse_message(raw.as_bytes()).unwrap_err(),
            Error::MissingHeader("Call-ID")
        );
    }

    #[test]
    fn test_short_body_rejected() {
        let truncated = &INVITE.as_bytes()[..INVITE.len() - 2];
        assert!(parse_message(truncated).is_err());
    }

    #[test]
    fn test_invalid_start_line() {
        let raw = "HELLO\r\nVia: SIP/2.0/UDP h;branch=z9hG4bK1\r\n\r\n";
        assert!(matches!(
            parse_message(raw.as_bytes()),
            Err(Error::InvalidStartLine(_))
        ));
    }

    #[test]
    fn test_repeated_single_headers_keep_first() {
        let raw = "MESSAGE sip:x@10.0.0.1 SIP/2.0\r\n\
Via: SIP/2.0/UDP 10.0.0.2;branch=z9hG4bK1\r\n\
To: <sip:x@10.0.0.1>\r\n\
From: <sip:y@10.0.0.2>;tag=1\r\n\
Call-ID: first\r\n\
Call-ID: second\r\n\
CSeq: 1 MESSAGE\r\n\
Content-Length: 2\r\n\
Content-Length: 5\r\n\
\r\n\
hiMESSAGE";
        let message = parse_message(raw.as_bytes()).unwrap();
        assert_eq!(message.call_id(), "first");
        assert_eq!(&message.as_request().unwrap().body[..], b"hi");
        assert_eq!(frame_length(raw.as_bytes()).unwrap(), Some(raw.len() - 7));
    }

    #[test]
    fn test_frame_length() {
        let bytes = INVITE.as_bytes();
        assert_eq!(frame_length(&bytes[..40]).unwrap(), None);
        assert_eq!(frame_length(&bytes[..bytes.len() - 1]).unwrap(), None);

        let mut two = bytes.to_vec();
        two.extend_from_slice(bytes);
        assert_eq!(frame_length(&two).unwrap(), Some(bytes.len()));
    }
}
