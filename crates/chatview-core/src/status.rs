//! Projection of delivery and coder status into display facts.
//!
//! Everything here is a pure function of the current message state. Transition
//! ordering is the protocol layer's concern.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::{
    config::DEFAULT_TOOLTIP_TIME_FORMAT,
    normalization::format_time,
    types::{DeliveryStatus, Direction, EncryptionMode, Message, SigningMode},
};

/// Icon shown next to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusIcon {
    Pending,
    Sent,
    Delivered,
    Error,
    /// Inbound message carrying security or decoding errors.
    Warning,
}

/// Lock indicator shown next to the status icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CryptoIcon {
    Secure,
    Insecure,
}

/// Classification of a message's encryption status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityLabel {
    Secure,
    NotEncrypted,
    /// Any other combination, shown as both component words.
    Mixed {
        encryption: EncryptionMode,
        signing: SigningMode,
    },
}

impl SecurityLabel {
    pub fn classify(
        direction: Direction,
        encryption: EncryptionMode,
        signing: SigningMode,
    ) -> Self {
        let expected_signing = match direction {
            Direction::Outbound => SigningMode::Signed,
            Direction::Inbound => SigningMode::Verified,
        };

        match (encryption, signing) {
            (EncryptionMode::None, SigningMode::None) => Self::NotEncrypted,
            (EncryptionMode::Decrypted, signing) if signing == expected_signing => Self::Secure,
            (encryption, signing) => Self::Mixed {
                encryption,
                signing,
            },
        }
    }

    pub fn is_secure(self) -> bool {
        self == Self::Secure
    }
}

impl fmt::Display for SecurityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secure => f.write_str("Secure"),
            Self::NotEncrypted => f.write_str("Not encrypted"),
            Self::Mixed {
                encryption,
                signing,
            } => write!(
                f,
                "{} / {}",
                encryption_word(*encryption),
                signing_word(*signing)
            ),
        }
    }
}

fn encryption_word(mode: EncryptionMode) -> &'static str {
    match mode {
        EncryptionMode::None => "Not encrypted",
        EncryptionMode::Encrypted => "Encrypted",
        EncryptionMode::Decrypted => "Decrypted",
        EncryptionMode::Unknown => "Unknown",
    }
}

fn signing_word(mode: SigningMode) -> &'static str {
    match mode {
        SigningMode::None => "Not signed",
        SigningMode::Signed => "Signed",
        SigningMode::Verified => "Verified",
        SigningMode::Unknown => "Unknown",
    }
}

/// Choose the status icon.
///
/// A delivered timestamp overrides the stored status of an outbound message.
/// Inbound messages ignore the delivery status entirely.
pub fn status_icon(
    direction: Direction,
    status: DeliveryStatus,
    delivered_at: Option<DateTime<Utc>>,
    has_security_error: bool,
) -> Option<StatusIcon> {
    match direction {
        Direction::Inbound => has_security_error.then_some(StatusIcon::Warning),
        Direction::Outbound if delivered_at.is_some() => Some(StatusIcon::Delivered),
        Direction::Outbound => match status {
            DeliveryStatus::Pending => Some(StatusIcon::Pending),
            DeliveryStatus::Sent => Some(StatusIcon::Sent),
            DeliveryStatus::Delivered | DeliveryStatus::Received => Some(StatusIcon::Delivered),
            DeliveryStatus::Error => Some(StatusIcon::Error),
            DeliveryStatus::Unknown => {
                warn!(?status, "unknown delivery status, no icon shown");
                None
            }
        },
    }
}

/// One `label: value` row of the status tooltip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TooltipLine {
    pub label: &'static str,
    pub value: String,
}

impl TooltipLine {
    fn new(label: &'static str, value: impl Into<String>) -> Self {
        Self {
            label,
            value: value.into(),
        }
    }
}

impl fmt::Display for TooltipLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.value)
    }
}

/// Status-related display facts of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusProjection {
    pub icon: Option<StatusIcon>,
    pub crypto: CryptoIcon,
    pub security: SecurityLabel,
    pub tooltip: Vec<TooltipLine>,
}

impl StatusProjection {
    /// Project `message` using `time_format` (a `chrono` format string) for tooltip times.
    pub fn project(message: &Message, time_format: &str) -> Self {
        let delivered_at = message.delivered_at();
        let icon = status_icon(
            message.direction,
            message.status,
            delivered_at,
            message.coder.has_errors(),
        );
        let security = SecurityLabel::classify(
            message.direction,
            message.coder.encryption,
            message.coder.signing,
        );
        let crypto = if security.is_secure() {
            CryptoIcon::Secure
        } else {
            CryptoIcon::Insecure
        };

        let format =
            |time: DateTime<Utc>| format_time(time, time_format, DEFAULT_TOOLTIP_TIME_FORMAT);
        let mut tooltip = Vec::new();

        match message.direction {
            Direction::Outbound => {
                let label = outbound_status_label(message.status, delivered_at.is_some());
                let status_time = delivered_at.or(message.server_at).map(format);
                let created = format(message.created_at);
                if status_time.as_deref() != Some(created.as_str()) {
                    tooltip.push(TooltipLine::new("Created", created));
                }
                if let (Some(label), Some(time)) = (label, status_time) {
                    tooltip.push(TooltipLine::new(label, time));
                }
            }
            Direction::Inbound => {
                let received = format(message.created_at);
                if let Some(sent) = message.server_at.map(format)
                    && sent != received
                {
                    tooltip.push(TooltipLine::new("Sent", sent));
                }
                tooltip.push(TooltipLine::new("Received", received));
            }
        }

        tooltip.push(TooltipLine::new("Encryption", security.to_string()));
        if message.coder.has_errors() {
            tooltip.push(TooltipLine::new(
                "Security errors",
                message.coder.errors.join(", "),
            ));
        }
        if let Some(text) = message
            .server_error
            .as_deref()
            .filter(|text| !text.trim().is_empty())
        {
            tooltip.push(TooltipLine::new("Server error", text));
        }

        Self {
            icon,
            crypto,
            security,
            tooltip,
        }
    }

    /// Tooltip rows joined by newlines.
    pub fn tooltip_text(&self) -> String {
        self.tooltip
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn outbound_status_label(status: DeliveryStatus, delivered: bool) -> Option<&'static str> {
    if delivered {
        return Some("Delivered");
    }
    match status {
        DeliveryStatus::Pending => None,
        DeliveryStatus::Sent => Some("Sent"),
        DeliveryStatus::Delivered | DeliveryStatus::Received => Some("Delivered"),
        DeliveryStatus::Error => Some("Error report"),
        DeliveryStatus::Unknown => Some("Unknown"),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::types::{CoderStatus, MessageContent, Transmission};

    const FORMAT: &str = "%Y-%m-%d %H:%M";

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
    }

    fn outbound(status: DeliveryStatus) -> Message {
        let mut message = Message::outbound(
            Transmission::new(1, "alice@example.org"),
            MessageContent::text("hello"),
            CoderStatus::plain(),
            at(0),
        );
        message.status = status;
        message
    }

    fn inbound(server_at: Option<DateTime<Utc>>) -> Message {
        Message::inbound(
            Transmission::new(1, "alice@example.org/phone"),
            MessageContent::text("hello"),
            CoderStatus::plain(),
            at(5),
            server_at,
        )
    }

    #[test]
    fn classifies_every_encryption_signing_combination() {
        use EncryptionMode as E;
        use SigningMode as S;

        // (encryption, signing, outbound label, inbound label)
        let table = [
            (E::None, S::None, "Not encrypted", "Not encrypted"),
            (E::None, S::Signed, "Not encrypted / Signed", "Not encrypted / Signed"),
            (E::None, S::Verified, "Not encrypted / Verified", "Not encrypted / Verified"),
            (E::None, S::Unknown, "Not encrypted / Unknown", "Not encrypted / Unknown"),
            (E::Encrypted, S::None, "Encrypted / Not signed", "Encrypted / Not signed"),
            (E::Encrypted, S::Signed, "Encrypted / Signed", "Encrypted / Signed"),
            (E::Encrypted, S::Verified, "Encrypted / Verified", "Encrypted / Verified"),
            (E::Encrypted, S::Unknown, "Encrypted / Unknown", "Encrypted / Unknown"),
            (E::Decrypted, S::None, "Decrypted / Not signed", "Decrypted / Not signed"),
            (E::Decrypted, S::Signed, "Secure", "Decrypted / Signed"),
            (E::Decrypted, S::Verified, "Decrypted / Verified", "Secure"),
            (E::Decrypted, S::Unknown, "Decrypted / Unknown", "Decrypted / Unknown"),
            (E::Unknown, S::None, "Unknown / Not signed", "Unknown / Not signed"),
            (E::Unknown, S::Signed, "Unknown / Signed", "Unknown / Signed"),
            (E::Unknown, S::Verified, "Unknown / Verified", "Unknown / Verified"),
            (E::Unknown, S::Unknown, "Unknown / Unknown", "Unknown / Unknown"),
        ];
        assert_eq!(table.len(), E::ALL.len() * S::ALL.len());

        for (encryption, signing, outbound, inbound) in table {
            let out = SecurityLabel::classify(Direction::Outbound, encryption, signing);
            let inc = SecurityLabel::classify(Direction::Inbound, encryption, signing);
            assert_eq!(out.to_string(), outbound, "outbound {encryption:?}/{signing:?}");
            assert_eq!(inc.to_string(), inbound, "inbound {encryption:?}/{signing:?}");
        }
    }

    #[test]
    fn delivered_timestamp_overrides_pending_status() {
        assert_eq!(
            status_icon(Direction::Outbound, DeliveryStatus::Pending, Some(at(3)), false),
            Some(StatusIcon::Delivered)
        );
        assert_eq!(
            status_icon(Direction::Outbound, DeliveryStatus::Pending, None, false),
            Some(StatusIcon::Pending)
        );
    }

    #[test]
    fn legacy_received_status_shares_the_delivered_bucket() {
        let received = StatusProjection::project(&outbound(DeliveryStatus::Received), FORMAT);
        let delivered = StatusProjection::project(&outbound(DeliveryStatus::Delivered), FORMAT);
        assert_eq!(received.icon, Some(StatusIcon::Delivered));
        assert_eq!(received, delivered);
    }

    #[test]
    fn outbound_icons_follow_status_and_unknown_has_none() {
        let icon = |status| status_icon(Direction::Outbound, status, None, false);
        assert_eq!(icon(DeliveryStatus::Sent), Some(StatusIcon::Sent));
        assert_eq!(icon(DeliveryStatus::Error), Some(StatusIcon::Error));
        assert_eq!(icon(DeliveryStatus::Unknown), None);
    }

    #[test]
    fn inbound_icon_ignores_delivery_status() {
        assert_eq!(
            status_icon(Direction::Inbound, DeliveryStatus::Error, None, false),
            None
        );
        assert_eq!(
            status_icon(Direction::Inbound, DeliveryStatus::Pending, None, true),
            Some(StatusIcon::Warning)
        );
    }

    #[test]
    fn pending_outbound_tooltip_shows_only_creation_time() {
        let projection = StatusProjection::project(&outbound(DeliveryStatus::Pending), FORMAT);
        assert_eq!(
            projection.tooltip_text(),
            "Created: 2024-05-01 12:00\nEncryption: Not encrypted"
        );
    }

    #[test]
    fn invalid_tooltip_format_falls_back_to_default() {
        let projection = StatusProjection::project(&outbound(DeliveryStatus::Pending), "%Q");
        assert_eq!(
            projection.tooltip_text(),
            "Created: 2024-05-01 12:00\nEncryption: Not encrypted"
        );
    }

    #[test]
    fn sent_outbound_tooltip_hides_creation_time_equal_to_status_time() {
        let mut message = outbound(DeliveryStatus::Sent);
        message.server_at = Some(at(0));
        let projection = StatusProjection::project(&message, FORMAT);
        assert_eq!(
            projection.tooltip_text(),
            "Sent: 2024-05-01 12:00\nEncryption: Not encrypted"
        );

        message.server_at = Some(at(2));
        let projection = StatusProjection::project(&message, FORMAT);
        assert_eq!(
            projection.tooltip_text(),
            "Created: 2024-05-01 12:00\nSent: 2024-05-01 12:02\nEncryption: Not encrypted"
        );
    }

    #[test]
    fn receipt_time_is_labelled_delivered() {
        let mut message = outbound(DeliveryStatus::Sent);
        message.server_at = Some(at(1));
        message.transmissions[0].received_at = Some(at(7));
        let projection = StatusProjection::project(&message, FORMAT);
        assert_eq!(
            projection.tooltip[1],
            TooltipLine::new("Delivered", "2024-05-01 12:07")
        );
    }

    #[test]
    fn inbound_tooltip_omits_sent_time_matching_receipt() {
        let projection = StatusProjection::project(&inbound(Some(at(5))), FORMAT);
        assert_eq!(
            projection.tooltip_text(),
            "Received: 2024-05-01 12:05\nEncryption: Not encrypted"
        );

        let projection = StatusProjection::project(&inbound(Some(at(1))), FORMAT);
        assert_eq!(
            projection.tooltip_text(),
            "Sent: 2024-05-01 12:01\nReceived: 2024-05-01 12:05\nEncryption: Not encrypted"
        );
    }

    #[test]
    fn errors_are_appended_after_encryption_line() {
        let mut message = inbound(None);
        message.coder = CoderStatus::new(EncryptionMode::Encrypted, SigningMode::None)
            .with_error("key unavailable");
        message.server_error = Some("quota exceeded".into());

        let projection = StatusProjection::project(&message, FORMAT);
        assert_eq!(projection.icon, Some(StatusIcon::Warning));
        assert_eq!(projection.crypto, CryptoIcon::Insecure);
        let labels: Vec<_> = projection.tooltip.iter().map(|line| line.label).collect();
        assert_eq!(
            labels,
            vec!["Received", "Encryption", "Security errors", "Server error"]
        );
    }
}
