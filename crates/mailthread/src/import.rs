use anyhow::Result;
use mailparse::{MailHeaderMap, ParsedMail};
use mailthread_core::{MessageContent, MessageData, NewPart, PartBody, ThreadHeaders};

const PREVIEW_CHARS: usize = 512;

/// Builds the store input for a raw RFC 5322 message.
pub(crate) fn message_from_raw(raw: &[u8]) -> Result<MessageData> {
    let parsed = mailparse::parse_mail(raw)?;
    let header = |name: &str| parsed.headers.get_first_value(name);

    let headers = ThreadHeaders {
        message_id: header("Message-ID"),
        in_reply_to: header("In-Reply-To"),
        references: header("References"),
    };
    let content = MessageContent {
        subject: header("Subject"),
        date: header("Date").and_then(|date| mailparse::dateparse(&date).ok()),
        sender_list: header("From"),
        to_list: header("To"),
        cc_list: header("Cc"),
        bcc_list: header("Bcc"),
        reply_to_list: header("Reply-To"),
        preview: preview(&parsed),
    };
    Ok(MessageData {
        headers,
        content,
        read: false,
        flagged: false,
        parts: Some(part_tree(&parsed)?),
    })
}

fn part_tree(parsed: &ParsedMail) -> Result<NewPart> {
    let disposition = parsed.get_content_disposition();
    let display_name = disposition
        .params
        .get("filename")
        .cloned()
        .or_else(|| parsed.ctype.params.get("name").cloned());
    let content_id = parsed.headers.get_first_value("Content-ID");

    let (body, children) = if parsed.subparts.is_empty() {
        (PartBody::Bytes(parsed.get_body_raw()?), Vec::new())
    } else {
        let children = parsed
            .subparts
            .iter()
            .map(part_tree)
            .collect::<Result<Vec<_>>>()?;
        (PartBody::Multipart, children)
    };
    Ok(NewPart {
        mime_type: parsed.ctype.mimetype.to_lowercase(),
        display_name,
        content_id,
        body,
        children,
    })
}

fn preview(parsed: &ParsedMail) -> Option<String> {
    let mut text: Option<String> = None;
    walk_parts(parsed, &mut |part| {
        if text.is_none() && part.ctype.mimetype.eq_ignore_ascii_case("text/plain") {
            text = part.get_body().ok();
        }
    });
    let text = text?;
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.chars().take(PREVIEW_CHARS).collect())
}

fn walk_parts<F>(parsed: &ParsedMail, cb: &mut F)
where
    F: FnMut(&ParsedMail),
{
    cb(parsed);
    for part in &parsed.subparts {
        walk_parts(part, cb);
    }
}
