//! [`MimeDecoder`] backed by the `mail-parser` crate.

use std::borrow::Cow;
use std::io::Cursor;

use futures::stream;
use mail_parser::{Message, MessageParser, MimeHeaders, PartType};

use super::{DecodedAttachment, DecoderEvent, DecoderOptions, DecoderStream, MimeDecoder, Release};
use crate::error::DecodeError;
use crate::types::{AttachmentInfo, HeaderMap, HeaderValue, TextPart};

/// Decodes complete RFC 5322 messages with `mail_parser::MessageParser`.
#[derive(Debug, Clone, Default)]
pub struct MailParserDecoder;

impl MailParserDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl MimeDecoder for MailParserDecoder {
    fn decode(&self, raw: Vec<u8>, options: &DecoderOptions) -> DecoderStream {
        let events = decode_all(&raw, options).map_or_else(|e| vec![Err(e)], |events| {
            events.into_iter().map(Ok).collect()
        });
        Box::pin(stream::iter(events))
    }
}

/// Parse `raw` and produce the full, ordered event list.
fn decode_all(raw: &[u8], options: &DecoderOptions) -> Result<Vec<DecoderEvent>, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::Malformed("empty message".into()));
    }
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| DecodeError::Malformed("unparseable message".into()))?;

    let mut events = vec![DecoderEvent::Headers(collect_headers(&parsed))];

    if let Some(body) = select_body(&parsed, options) {
        events.push(DecoderEvent::Text(body));
    }

    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        let inline = MimeHeaders::content_disposition(part)
            .is_some_and(|d| d.ctype().eq_ignore_ascii_case("inline"));
        if inline && !options.include_inline_parts {
            continue;
        }

        let content = part.contents().to_vec();
        let info = AttachmentInfo {
            filename: MimeHeaders::attachment_name(part).map(str::to_string),
            content_type: content_type_of(part),
            content_id: MimeHeaders::content_id(part).map(str::to_string),
            size: content.len(),
        };
        events.push(DecoderEvent::Attachment(DecodedAttachment {
            info,
            content: Box::new(Cursor::new(content)),
            release: Release::noop(),
        }));
    }

    events.push(DecoderEvent::End);
    Ok(events)
}

/// Root-level headers, lowercase names, repeated headers collected in order.
fn collect_headers(parsed: &Message<'_>) -> HeaderMap {
    let raw = parsed.raw_message();
    let mut headers = HeaderMap::new();

    for header in parsed.headers() {
        let value = match &header.value {
            mail_parser::HeaderValue::Text(text) => text.to_string(),
            mail_parser::HeaderValue::TextList(list) => list
                .iter()
                .map(|t| t.as_ref())
                .collect::<Vec<_>>()
                .join(", "),
            _ => {
                let start = header.offset_start as usize;
                let end = header.offset_end as usize;
                raw.get(start..end).map(unfold).unwrap_or_default()
            }
        };

        let name = header.name().to_ascii_lowercase();
        match headers.get_mut(&name) {
            Some(existing) => existing.push(value),
            None => {
                headers.insert(name, HeaderValue::Single(value));
            }
        }
    }

    headers
}

/// Join folded header lines and trim surrounding whitespace.
fn unfold(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn content_type_of(part: &mail_parser::MessagePart<'_>) -> String {
    MimeHeaders::content_type(part)
        .map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub).to_ascii_lowercase(),
            None => ct.ctype().to_ascii_lowercase(),
        })
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

fn first_part_text<'a>(
    parsed: &'a Message<'_>,
    ids: impl IntoIterator<Item = usize>,
    html: bool,
) -> Option<Cow<'a, str>> {
    ids.into_iter()
        .filter_map(|id| parsed.parts.get(id))
        .find_map(|part| match (&part.body, html) {
            (PartType::Text(text), false) => Some(Cow::Borrowed(text.as_ref())),
            (PartType::Html(text), true) => Some(Cow::Borrowed(text.as_ref())),
            _ => None,
        })
}

/// Pick the body to report.
///
/// Plain text wins unless `prefer_html` is set and an HTML body exists. An HTML-only
/// message is converted to text unless conversion is disabled or the body is too large.
fn select_body(parsed: &Message<'_>, options: &DecoderOptions) -> Option<TextPart> {
    let plain = first_part_text(parsed, parsed.text_body.iter().map(|id| *id as usize), false);
    let html = first_part_text(parsed, parsed.html_body.iter().map(|id| *id as usize), true);

    if options.prefer_html
        && let Some(html) = &html
    {
        return Some(TextPart::html(html.as_ref()));
    }
    if let Some(plain) = plain {
        return Some(TextPart::text(plain));
    }

    let html = html?;
    let too_large = options
        .max_html_length_to_parse
        .is_some_and(|max| html.len() > max);
    if options.skip_html_to_text || too_large {
        return Some(TextPart::html(html));
    }
    match parsed.body_text(0) {
        Some(text) => Some(TextPart::text(text)),
        None => Some(TextPart::html(html)),
    }
}
