//! Text normalization for display items (body, from label, copy text, search).

use std::fmt::Write;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::{
    config::DEFAULT_COPY_TIME_FORMAT,
    types::{Contact, Message},
};

/// Shown instead of the body while a message is still ciphertext.
pub const ENCRYPTED_PLACEHOLDER: &str = "[encrypted]";
const OWN_SENDER_LABEL: &str = "me";
const ELLIPSIS: &str = "...";

/// Body text as it should be displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayText {
    pub body: String,
    /// The body is the encrypted placeholder and should be styled as such.
    pub placeholder: bool,
    /// Hide the text area when there is nothing to show.
    pub visible: bool,
}

/// Derive the displayed body: trimmed text (or the encrypted placeholder)
/// followed by the group command, when any.
pub fn display_text(message: &Message) -> DisplayText {
    let placeholder = message.coder.is_encrypted();
    let mut body = if placeholder {
        ENCRYPTED_PLACEHOLDER.to_owned()
    } else {
        message.content.text.trim().to_owned()
    };
    if let Some(command) = message
        .content
        .group_command
        .as_deref()
        .filter(|command| !command.is_empty())
    {
        if !body.is_empty() {
            body.push(' ');
        }
        body.push_str(command);
    }

    DisplayText {
        visible: !body.is_empty(),
        body,
        placeholder,
    }
}

/// Strip the resource part of an address (`user@host/resource` -> `user@host`).
pub fn bare_address(address: &str) -> &str {
    address.split_once('/').map_or(address, |(bare, _)| bare)
}

/// Label naming the sender of an inbound message.
///
/// Uses the contact's name when set, otherwise the bare address, shortened to
/// `keep` characters plus an ellipsis when longer than `max_len`.
pub fn from_label(contact: Option<&Contact>, address: &str, max_len: usize, keep: usize) -> String {
    if let Some(name) = contact
        .map(|contact| contact.name.trim())
        .filter(|name| !name.is_empty())
    {
        return name.to_owned();
    }

    let bare = bare_address(address);
    if bare.chars().count() > max_len {
        let mut short: String = bare.chars().take(keep).collect();
        short.push_str(ELLIPSIS);
        short
    } else {
        bare.to_owned()
    }
}

/// Plain-text rendering used by the copy action: `<date> - <from> : <text>`.
///
/// `from` is `None` for our own messages.
pub fn copy_text(message: &Message, from: Option<&str>, time_format: &str) -> String {
    let date = format_time(message.created_at, time_format, DEFAULT_COPY_TIME_FORMAT);
    let from = from.unwrap_or(OWN_SENDER_LABEL);
    format!("{date} - {from} : {}", message.content.text)
}

/// Case-insensitive match of `query` against the message text and the names
/// and addresses of the transmission contacts.
pub fn matches_search<'a>(
    message: &Message,
    contacts: impl IntoIterator<Item = &'a Contact>,
    query: &str,
) -> bool {
    let query = query.to_lowercase();
    if message.content.text.to_lowercase().contains(&query) {
        return true;
    }
    contacts.into_iter().any(|contact| {
        contact.name.to_lowercase().contains(&query)
            || contact.address.to_lowercase().contains(&query)
    })
}

/// Format `time` with a `chrono` format string, falling back to `fallback`
/// when `format` contains an invalid specifier.
pub(crate) fn format_time(time: DateTime<Utc>, format: &str, fallback: &str) -> String {
    let mut out = String::new();
    if write!(out, "{}", time.format(format)).is_ok() {
        return out;
    }
    warn!(format, fallback, "invalid time format");
    out.clear();
    if write!(out, "{}", time.format(fallback)).is_ok() {
        return out;
    }
    time.to_rfc3339()
}

/// Width estimate of a single-line rendering of some text.
pub trait TextMeasure {
    fn preferred_width(&self, text: &str) -> u32;
}

/// Fixed advance per character, measured on the longest line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharWidthMeasure {
    pub px_per_char: u32,
}

impl TextMeasure for CharWidthMeasure {
    fn preferred_width(&self, text: &str) -> u32 {
        let longest = text
            .lines()
            .map(|line| line.chars().count())
            .max()
            .unwrap_or(0);
        u32::try_from(longest)
            .unwrap_or(u32::MAX)
            .saturating_mul(self.px_per_char)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::types::{CoderStatus, EncryptionMode, MessageContent, SigningMode, Transmission};

    fn inbound(text: &str, coder: CoderStatus) -> Message {
        Message::inbound(
            Transmission::new(3, "dave@example.org/desktop"),
            MessageContent::text(text),
            coder,
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            None,
        )
    }

    #[test]
    fn trims_body_and_appends_group_command() {
        let mut message = inbound("\t hi all  ", CoderStatus::plain());
        message.content.group_command = Some("[added bob]".into());

        let text = display_text(&message);
        assert_eq!(text.body, "hi all [added bob]");
        assert!(text.visible);
        assert!(!text.placeholder);
    }

    #[test]
    fn encrypted_body_is_replaced_by_placeholder() {
        let message = inbound(
            "ciphertext",
            CoderStatus::new(EncryptionMode::Encrypted, SigningMode::None),
        );
        let text = display_text(&message);
        assert_eq!(text.body, ENCRYPTED_PLACEHOLDER);
        assert!(text.placeholder);
    }

    #[test]
    fn empty_body_is_hidden() {
        let text = display_text(&inbound("   ", CoderStatus::plain()));
        assert!(!text.visible);
    }

    #[test]
    fn from_label_prefers_name_then_bare_address() {
        let named = Contact::new(3, "Dave", "dave@example.org");
        assert_eq!(from_label(Some(&named), "dave@example.org/x", 40, 8), "Dave");

        let unnamed = Contact::new(3, "  ", "dave@example.org");
        assert_eq!(
            from_label(Some(&unnamed), "dave@example.org/x", 40, 8),
            "dave@example.org"
        );
        assert_eq!(from_label(None, "dave@example.org", 40, 8), "dave@example.org");
    }

    #[test]
    fn long_addresses_are_shortened() {
        let address = "a-very-long-local-part-for-testing@example.org/res";
        assert_eq!(from_label(None, address, 40, 8), "a-very-l...");
    }

    #[test]
    fn copy_text_names_own_messages_me() {
        let message = inbound("hello", CoderStatus::plain());
        assert_eq!(
            copy_text(&message, None, "%Y-%m-%d %H:%M:%S"),
            "2024-01-02 03:04:05 - me : hello"
        );
        assert_eq!(
            copy_text(&message, Some("Dave"), "%Y-%m-%d"),
            "2024-01-02 - Dave : hello"
        );
    }

    #[test]
    fn invalid_time_format_uses_fallback() {
        let time = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format_time(time, "%d/%m", "%Y"), "02/01");
        assert_eq!(format_time(time, "%Q", "%Y-%m-%d"), "2024-01-02");
        assert_eq!(format_time(time, "%Q", "%Q"), "2024-01-02T03:04:05+00:00");

        let message = inbound("hello", CoderStatus::plain());
        assert_eq!(
            copy_text(&message, None, "%Q"),
            "2024-01-02 03:04:05 - me : hello"
        );
    }

    #[test]
    fn search_matches_text_and_contacts_case_insensitively() {
        let message = inbound("Lunch at noon?", CoderStatus::plain());
        let contact = Contact::new(3, "Dave", "dave@example.org");
        assert!(matches_search(&message, [&contact], "LUNCH"));
        assert!(matches_search(&message, [&contact], "dav"));
        assert!(matches_search(&message, [&contact], "example.org"));
        assert!(!matches_search(&message, [&contact], "dinner"));
    }

    #[test]
    fn char_measure_uses_longest_line() {
        let measure = CharWidthMeasure { px_per_char: 7 };
        assert_eq!(measure.preferred_width("ab\nabcd\nabc"), 28);
        assert_eq!(measure.preferred_width(""), 0);
    }
}
