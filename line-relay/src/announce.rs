//! Legacy join convention.
//!
//! Front-ends announce a newcomer by sending an ordinary chat line such as
//! `"[12:00:00] Alice has joined the chat."`. The relay recognises the marker
//! by plain substring search and answers with a welcome line. This is text
//! matching on user content, so a participant typing the phrase triggers a
//! welcome too.

/// Substring that marks a line as a join announcement.
pub const JOIN_MARKER: &str = " has joined the chat.";

/// Closes the timestamp prefix that front-ends put in front of the name.
const PREFIX_END: &str = "] ";

/// Returns the announced name if `line` follows the join convention.
///
/// The name runs from just after the first `"] "` (or the start of the line
/// when there is no prefix) up to the marker.
pub fn joined_name(line: &str) -> Option<&str> {
    let marker = line.find(JOIN_MARKER)?;
    let head = &line[..marker];
    let start = head
        .find(PREFIX_END)
        .map_or(0, |index| index + PREFIX_END.len());
    Some(head[start..].trim())
}

/// Line the relay broadcasts ahead of a join announcement.
pub fn welcome_line(name: &str) -> String {
    format!("Welcome to the group chat, {name}!")
}
