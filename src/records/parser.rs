//! Maps a [`RawMessage`] into a normalized [`Record`].
//!
//! `parse` is pure and total. Anything that cannot be interpreted degrades to
//! a best-effort value (raw header text, `0` timestamp, empty body) with a
//! debug diagnostic.

use crate::mailbox::payload::{MessagePart, RawMessage};
use crate::records::normalize::{extract_address, extract_addresses, extract_mailing_list};
use crate::records::record::Record;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

pub fn parse(raw: &RawMessage) -> Record {
    let mut record = Record {
        id: raw.id.clone(),
        thread_id: raw.thread_id.clone(),
        timestamp_seconds: timestamp_seconds(raw),
        snippet: raw.snippet.clone(),
        ..Record::default()
    };

    let Some(payload) = raw.payload.as_ref() else {
        return record;
    };

    for header in &payload.headers {
        match header.name.to_ascii_lowercase().as_str() {
            "from" => record.from_address = extract_address(&header.value),
            "to" => record.to_addresses = extract_addresses(&header.value),
            "cc" => record.cc_addresses = extract_addresses(&header.value),
            "bcc" => record.bcc_addresses = extract_addresses(&header.value),
            "mailing-list" => record.mailing_list = extract_mailing_list(&header.value),
            "subject" => record.subject = header.value.clone(),
            _ => {}
        }
    }

    record.body_text = plain_text_body(&raw.id, payload).unwrap_or_default();
    record
}

fn timestamp_seconds(raw: &RawMessage) -> i64 {
    let Some(internal_date) = raw.internal_date.as_deref() else {
        return 0;
    };
    match internal_date.trim().parse::<i64>() {
        Ok(millis) => millis / 1000,
        Err(err) => {
            tracing::debug!(
                message_id = %raw.id,
                internal_date,
                error = %err,
                "cannot parse internal date; using 0"
            );
            0
        }
    }
}

/// Depth-first search for the first decodable `text/plain` body.
fn plain_text_body(message_id: &str, part: &MessagePart) -> Option<String> {
    if part.mime_type.eq_ignore_ascii_case("text/plain") {
        if let Some(data) = part.body.as_ref().and_then(|body| body.data.as_deref()) {
            match decode_body(data) {
                Some(text) => return Some(text),
                None => {
                    tracing::debug!(message_id, "cannot decode text/plain body; skipping part");
                }
            }
        }
    }

    part.parts
        .iter()
        .find_map(|child| plain_text_body(message_id, child))
}

fn decode_body(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    String::from_utf8(bytes).ok()
}
