use time::{macros::format_description, OffsetDateTime, UtcOffset};

use crate::{conversation::Composer, Message, UserProfile};

pub const CLINIC_NAME: &str = "Nanairo Dental Clinic, Ashiya";

/// Falls back to UTC when the local offset can't be determined safely.
pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

pub fn header(profile: &UserProfile) -> String {
    format!("{CLINIC_NAME} | signed in as {}", profile.display_name)
}

pub fn send_time(timestamp: i64, offset: UtcOffset) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(timestamp as i128 * 1_000_000)
        .ok()
        .and_then(|at| at.to_offset(offset).format(format_description!("[hour]:[minute]")).ok())
        .unwrap_or_else(|| "--:--".to_owned())
}

pub fn message(message: &Message, me: &str, offset: UtcOffset) -> String {
    let is_me = message.sender_id == me;
    let mut line = format!("[{}] ", send_time(message.timestamp, offset));

    if message.is_important {
        line.push_str("[IMPORTANT] ");
    }
    line.push_str(if is_me { "You" } else { &message.sender_name });
    line.push_str(": ");
    line.push_str(&message.text.replace('\n', "\n        "));

    // someone besides the sender has seen it
    if is_me && message.read_by.len() > 1 {
        line.push_str("  (read)");
    }
    line
}

pub fn summary(text: &str) -> String {
    format!("[AI chat summary]\n\n{text}")
}

pub fn prompt(composer: &Composer) -> &'static str {
    if composer.important { "important> " } else { "> " }
}
