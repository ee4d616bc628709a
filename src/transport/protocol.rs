//! IMAP4rev1 response parsing and command formatting.
//!
//! Pure string handling only; the session in [`super::imap`] owns all I/O.

use crate::types::MailboxInfo;

/// Completion status of a tagged response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Ok,
    No,
    Bad,
}

/// A parsed tagged completion line, e.g. `A3 OK SEARCH completed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedStatus {
    pub kind: StatusKind,
    pub text: String,
}

/// Classified untagged (`* ...`) response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Untagged {
    Exists(u32),
    Recent(u32),
    Expunge(u32),
    /// `* <seq> FETCH (...)`; `rest` is everything after `FETCH`.
    Fetch { seq: u32, rest: String },
    Search(Vec<u32>),
    Capability(Vec<String>),
    Flags(Vec<String>),
    /// `* OK [CODE ...] text`
    Ok { code: Option<String> },
    No(String),
    Bad(String),
    Bye(String),
    Other(String),
}

/// Quote a string for use as an IMAP quoted-string argument.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Render search criteria as the argument list of `UID SEARCH`.
pub fn format_search(criteria: &[String]) -> String {
    if criteria.is_empty() {
        return "ALL".to_string();
    }
    criteria.join(" ")
}

/// Parse a tagged completion line for `tag`.
pub fn parse_tagged(line: &str, tag: &str) -> Option<TaggedStatus> {
    let rest = line.strip_prefix(tag)?.strip_prefix(' ')?;
    let (word, text) = rest.split_once(' ').unwrap_or((rest, ""));
    let kind = match word.to_ascii_uppercase().as_str() {
        "OK" => StatusKind::Ok,
        "NO" => StatusKind::No,
        "BAD" => StatusKind::Bad,
        _ => return None,
    };
    Some(TaggedStatus {
        kind,
        text: text.trim_end().to_string(),
    })
}

/// Byte count of a trailing literal marker (`{123}`), if the line ends with one.
pub fn literal_size(line: &str) -> Option<usize> {
    let trimmed = line.trim_end();
    let inner = trimmed.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].trim_end_matches('+').parse().ok()
}

/// Numeric value following `name` inside a FETCH attribute list.
pub fn fetch_attr_u32(rest: &str, name: &str) -> Option<u32> {
    let mut words = rest
        .split(|c: char| c.is_whitespace() || c == '(' || c == ')')
        .filter(|w| !w.is_empty());
    while let Some(word) = words.next() {
        if word.eq_ignore_ascii_case(name) {
            return words.next()?.parse().ok();
        }
    }
    None
}

fn parenthesized_list(text: &str) -> Vec<String> {
    let start = text.find('(').map_or(0, |i| i + 1);
    let end = text.rfind(')').unwrap_or(text.len());
    text.get(start..end)
        .unwrap_or("")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn response_code(text: &str) -> Option<String> {
    let start = text.find('[')?;
    let end = text[start..].find(']')? + start;
    Some(text[start + 1..end].to_string())
}

/// Classify one untagged response line. Returns `None` for non-untagged lines.
pub fn parse_untagged(line: &str) -> Option<Untagged> {
    let body = line.strip_prefix("* ")?.trim_end();
    let (first, rest) = body.split_once(' ').unwrap_or((body, ""));

    if let Ok(n) = first.parse::<u32>() {
        let (word, tail) = rest.split_once(' ').unwrap_or((rest, ""));
        return Some(match word.to_ascii_uppercase().as_str() {
            "EXISTS" => Untagged::Exists(n),
            "RECENT" => Untagged::Recent(n),
            "EXPUNGE" => Untagged::Expunge(n),
            "FETCH" => Untagged::Fetch {
                seq: n,
                rest: tail.to_string(),
            },
            _ => Untagged::Other(body.to_string()),
        });
    }

    Some(match first.to_ascii_uppercase().as_str() {
        "SEARCH" => Untagged::Search(
            rest.split_whitespace()
                .filter_map(|w| w.parse().ok())
                .collect(),
        ),
        "CAPABILITY" => Untagged::Capability(rest.split_whitespace().map(str::to_string).collect()),
        "FLAGS" => Untagged::Flags(parenthesized_list(rest)),
        "OK" => Untagged::Ok {
            code: response_code(rest),
        },
        "NO" => Untagged::No(rest.to_string()),
        "BAD" => Untagged::Bad(rest.to_string()),
        "BYE" => Untagged::Bye(rest.to_string()),
        _ => Untagged::Other(body.to_string()),
    })
}

/// Capabilities advertised in a `[CAPABILITY ...]` response code.
pub fn capabilities_from_code(code: &str) -> Option<Vec<String>> {
    let rest = code.strip_prefix("CAPABILITY ")?;
    Some(rest.split_whitespace().map(str::to_string).collect())
}

pub fn has_capability(capabilities: &[String], name: &str) -> bool {
    capabilities.iter().any(|c| c.eq_ignore_ascii_case(name))
}

/// Fold one SELECT/EXAMINE response line into the mailbox metadata.
pub fn apply_select_line(info: &mut MailboxInfo, line: &str) {
    match parse_untagged(line) {
        Some(Untagged::Exists(n)) => info.exists = n,
        Some(Untagged::Recent(n)) => info.recent = n,
        Some(Untagged::Flags(flags)) => info.flags = flags,
        Some(Untagged::Ok { code: Some(code) }) => {
            let (name, value) = code.split_once(' ').unwrap_or((code.as_str(), ""));
            match name.to_ascii_uppercase().as_str() {
                "UIDVALIDITY" => info.uid_validity = value.trim().parse().ok(),
                "UIDNEXT" => info.uid_next = value.trim().parse().ok(),
                "READ-ONLY" => info.read_only = true,
                "READ-WRITE" => info.read_only = false,
                _ => {}
            }
        }
        _ => {}
    }
}

/// Apply the `[READ-ONLY]` / `[READ-WRITE]` code of the tagged SELECT/EXAMINE completion.
pub fn apply_select_status(info: &mut MailboxInfo, status: &TaggedStatus) {
    match response_code(&status.text).as_deref().map(str::to_ascii_uppercase).as_deref() {
        Some("READ-ONLY") => info.read_only = true,
        Some("READ-WRITE") => info.read_only = false,
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_escapes() {
        assert_eq!(quote("INBOX"), "\"INBOX\"");
        assert_eq!(quote("a\"b\\c"), "\"a\\\"b\\\\c\"");
    }

    #[test]
    fn search_formatting() {
        assert_eq!(format_search(&["UNSEEN".into()]), "UNSEEN");
        assert_eq!(
            format_search(&["UNSEEN".into(), "FROM \"a@b.c\"".into()]),
            "UNSEEN FROM \"a@b.c\""
        );
        assert_eq!(format_search(&[]), "ALL");
    }

    #[test]
    fn tagged_status_parsing() {
        let ok = parse_tagged("A3 OK SEARCH completed\r\n", "A3").unwrap();
        assert_eq!(ok.kind, StatusKind::Ok);
        assert_eq!(ok.text, "SEARCH completed");

        let no = parse_tagged("A4 NO [AUTHENTICATIONFAILED] Invalid credentials", "A4").unwrap();
        assert_eq!(no.kind, StatusKind::No);

        assert!(parse_tagged("A31 OK done", "A3").is_none());
        assert!(parse_tagged("* OK still here", "A3").is_none());
    }

    #[test]
    fn untagged_classification() {
        assert_eq!(parse_untagged("* 23 EXISTS\r\n"), Some(Untagged::Exists(23)));
        assert_eq!(parse_untagged("* 2 EXPUNGE"), Some(Untagged::Expunge(2)));
        assert_eq!(
            parse_untagged("* SEARCH 4 8 15"),
            Some(Untagged::Search(vec![4, 8, 15]))
        );
        assert_eq!(parse_untagged("* SEARCH"), Some(Untagged::Search(vec![])));
        assert_eq!(
            parse_untagged("* 5 FETCH (FLAGS (\\Seen))"),
            Some(Untagged::Fetch {
                seq: 5,
                rest: "(FLAGS (\\Seen))".into()
            })
        );
        assert!(matches!(parse_untagged("* BYE logging out"), Some(Untagged::Bye(_))));
        assert!(parse_untagged("A1 OK").is_none());
    }

    #[test]
    fn capability_parsing() {
        let Some(Untagged::Capability(caps)) = parse_untagged("* CAPABILITY IMAP4rev1 IDLE UIDPLUS")
        else {
            panic!("expected capability line");
        };
        assert!(has_capability(&caps, "idle"));
        assert!(!has_capability(&caps, "CONDSTORE"));

        let Some(Untagged::Ok { code: Some(code) }) =
            parse_untagged("* OK [CAPABILITY IMAP4rev1 IDLE] Dovecot ready.")
        else {
            panic!("expected greeting code");
        };
        assert_eq!(capabilities_from_code(&code).unwrap(), vec!["IMAP4rev1", "IDLE"]);
    }

    #[test]
    fn literal_markers() {
        assert_eq!(literal_size("* 1 FETCH (UID 9 BODY[] {342}\r\n"), Some(342));
        assert_eq!(literal_size("* 1 FETCH (UID 9 BODY[] {12+}"), Some(12));
        assert_eq!(literal_size("* 1 FETCH (FLAGS (\\Seen))"), None);
    }

    #[test]
    fn fetch_attributes() {
        let rest = "(UID 42 RFC822.SIZE 1024 BODY[] {1024}";
        assert_eq!(fetch_attr_u32(rest, "UID"), Some(42));
        assert_eq!(fetch_attr_u32(rest, "RFC822.SIZE"), Some(1024));
        assert_eq!(fetch_attr_u32(rest, "MODSEQ"), None);
    }

    #[test]
    fn select_response_folding() {
        let mut info = MailboxInfo {
            name: "INBOX".into(),
            ..MailboxInfo::default()
        };
        for line in [
            "* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)",
            "* 172 EXISTS",
            "* 1 RECENT",
            "* OK [UNSEEN 12] Message 12 is first unseen",
            "* OK [UIDVALIDITY 3857529045] UIDs valid",
            "* OK [UIDNEXT 4392] Predicted next UID",
        ] {
            apply_select_line(&mut info, line);
        }
        let status = parse_tagged("A2 OK [READ-ONLY] EXAMINE completed", "A2").unwrap();
        apply_select_status(&mut info, &status);

        assert_eq!(info.exists, 172);
        assert_eq!(info.recent, 1);
        assert_eq!(info.uid_validity, Some(3857529045));
        assert_eq!(info.uid_next, Some(4392));
        assert_eq!(info.flags.len(), 5);
        assert!(info.read_only);
    }
}
