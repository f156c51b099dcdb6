//! Hand-built MIME envelopes for relays that only accept raw message bytes.
//!
//! Layout produced for a message with attachments:
//!
//! ```text
//! multipart/mixed
//! ├── multipart/alternative
//! │   ├── text/plain  (base64)
//! │   └── text/html   (base64)
//! └── attachment parts (base64)
//! ```
//!
//! Bcc recipients are never written into the headers; relays receive them
//! through their explicit destination list.

use crate::models::{Attachment, EmailMessage};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use std::fmt::Write;
use uuid::Uuid;

const CRLF: &str = "\r\n";
/// RFC 2045 line length limit for base64 bodies.
const BASE64_LINE: usize = 76;

/// Fresh boundary token. Never appears in base64 output because of the `=_`.
pub fn new_boundary() -> String {
    format!("=_Part_{}", Uuid::new_v4().simple())
}

/// Render `message` as a complete RFC 5322 / MIME document.
pub fn build_raw_message(message: &EmailMessage, boundary: &str) -> String {
    let mut out = String::new();

    header(&mut out, "From", &encode_mailbox(message.from.email(), message.from.name()));
    header(&mut out, "To", &message.to.join(", "));
    if !message.cc.is_empty() {
        header(&mut out, "Cc", &message.cc.join(", "));
    }
    if let Some(reply_to) = &message.reply_to {
        header(&mut out, "Reply-To", reply_to);
    }
    header(&mut out, "Subject", &encode_header_value(&message.subject));
    header(&mut out, "MIME-Version", "1.0");
    for (name, value) in &message.headers {
        header(&mut out, name, value);
    }

    let alternative = format!("{}_alt", boundary);

    if message.has_attachments() {
        header(
            &mut out,
            "Content-Type",
            &format!("multipart/mixed; boundary=\"{}\"", boundary),
        );
        out.push_str(CRLF);

        open_part(&mut out, boundary);
        write_body_parts(&mut out, message, &alternative);

        for attachment in &message.attachments {
            open_part(&mut out, boundary);
            write_attachment(&mut out, attachment);
        }
        close_parts(&mut out, boundary);
    } else {
        write_body_parts(&mut out, message, &alternative);
    }

    out
}

/// Writes the text/html bodies, as a `multipart/alternative` when both exist.
fn write_body_parts(out: &mut String, message: &EmailMessage, alternative: &str) {
    match message.text.as_deref() {
        Some(text) => {
            header(
                out,
                "Content-Type",
                &format!("multipart/alternative; boundary=\"{}\"", alternative),
            );
            out.push_str(CRLF);

            open_part(out, alternative);
            write_text_part(out, "text/plain", text);
            open_part(out, alternative);
            write_text_part(out, "text/html", &message.html);
            close_parts(out, alternative);
        }
        None => write_text_part(out, "text/html", &message.html),
    }
}

fn write_text_part(out: &mut String, content_type: &str, body: &str) {
    header(out, "Content-Type", &format!("{}; charset=UTF-8", content_type));
    header(out, "Content-Transfer-Encoding", "base64");
    out.push_str(CRLF);
    out.push_str(&wrap_base64(body.as_bytes()));
}

fn write_attachment(out: &mut String, attachment: &Attachment) {
    let filename = quote_param(&attachment.filename);
    header(
        out,
        "Content-Type",
        &format!("{}; name={}", sanitize(attachment.mime_type()), filename),
    );
    header(
        out,
        "Content-Disposition",
        &format!("attachment; filename={}", filename),
    );
    header(out, "Content-Transfer-Encoding", "base64");
    out.push_str(CRLF);
    out.push_str(&wrap_base64(&attachment.content));
}

fn open_part(out: &mut String, boundary: &str) {
    let _ = write!(out, "--{}{}", boundary, CRLF);
}

fn close_parts(out: &mut String, boundary: &str) {
    let _ = write!(out, "--{}--{}", boundary, CRLF);
}

fn header(out: &mut String, name: &str, value: &str) {
    let _ = write!(out, "{}: {}{}", sanitize(name), sanitize(value), CRLF);
}

/// Strip CR and LF so values cannot inject extra headers.
fn sanitize(value: &str) -> String {
    value.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// Base64 encode and wrap at 76 columns, each line CRLF terminated.
pub fn wrap_base64(data: &[u8]) -> String {
    let encoded = BASE64.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE * 2 + 2);
    for chunk in encoded.as_bytes().chunks(BASE64_LINE) {
        // base64 output is pure ASCII
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push_str(CRLF);
    }
    out
}

/// RFC 2047 `B` encoding for non-ASCII header text.
pub fn encode_header_value(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", BASE64.encode(value.as_bytes()))
    }
}

/// `From`-style mailbox with an RFC 2047 display name when needed.
pub fn encode_mailbox(email: &str, name: Option<&str>) -> String {
    match name {
        Some(name) if name.is_ascii() => {
            format!("\"{}\" <{}>", name.replace(['"', '\\'], ""), email)
        }
        Some(name) => format!("{} <{}>", encode_header_value(name), email),
        None => email.to_string(),
    }
}

fn quote_param(value: &str) -> String {
    if value.is_ascii() {
        format!("\"{}\"", value.replace(['"', '\\'], ""))
    } else {
        format!("\"{}\"", encode_header_value(value))
    }
}
