//! Small formatting helpers shared by front ends.

use time::macros::format_description;
use time::{format_description::well_known::Rfc3339, OffsetDateTime, UtcOffset};

use crate::diff::ExpiryChange;

/// Number of leading characters shown for an abbreviated keyid.
pub const KEYID_DISPLAY_LEN: usize = 8;

/// Renders an RFC 3339 expiry as `Jan 5, 2030 14:00 UTC`.
///
/// Unparseable input is returned unchanged.
pub fn format_expiration(expires: &str) -> String {
    let format = format_description!(
        "[month repr:short] [day padding:none], [year] [hour]:[minute] UTC"
    );
    OffsetDateTime::parse(expires, &Rfc3339)
        .ok()
        .and_then(|at| at.to_offset(UtcOffset::UTC).format(&format).ok())
        .unwrap_or_else(|| expires.to_string())
}

/// Shortens a keyid to its first [`KEYID_DISPLAY_LEN`] characters.
pub fn truncate_keyid(keyid: &str) -> &str {
    match keyid.char_indices().nth(KEYID_DISPLAY_LEN) {
        Some((end, _)) => &keyid[..end],
        None => keyid,
    }
}

/// One-line summary of an expiry change.
pub fn describe_expiry_change(change: &ExpiryChange) -> String {
    match change {
        ExpiryChange::Extended { days } => format!("extended by {days} day{}", plural(*days)),
        ExpiryChange::Shortened { days } => format!("shortened by {days} day{}", plural(*days)),
        ExpiryChange::Unchanged => "unchanged".to_string(),
        ExpiryChange::Unknown => "unknown".to_string(),
    }
}

fn plural(days: i64) -> &'static str {
    if days == 1 {
        ""
    } else {
        "s"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiration_is_formatted_in_utc() {
        assert_eq!(
            format_expiration("2030-01-05T14:00:00Z"),
            "Jan 5, 2030 14:00 UTC"
        );
        assert_eq!(
            format_expiration("2030-01-05T23:30:00-02:00"),
            "Jan 6, 2030 01:30 UTC"
        );
        assert_eq!(format_expiration("never"), "never");
    }

    #[test]
    fn keyids_are_truncated() {
        assert_eq!(truncate_keyid("0123456789abcdef"), "01234567");
        assert_eq!(truncate_keyid("abc"), "abc");
        assert_eq!(truncate_keyid("01234567"), "01234567");
    }

    #[test]
    fn expiry_changes_are_described() {
        assert_eq!(
            describe_expiry_change(&ExpiryChange::Extended { days: 1 }),
            "extended by 1 day"
        );
        assert_eq!(
            describe_expiry_change(&ExpiryChange::Shortened { days: 30 }),
            "shortened by 30 days"
        );
        assert_eq!(describe_expiry_change(&ExpiryChange::Unchanged), "unchanged");
    }
}
