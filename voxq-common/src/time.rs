//! Timestamp and duration-label utilities
//!
//! Track durations travel through the system as display labels
//! ("3:45", "1:02:03") exactly as the media resolver reports them.
//! These helpers convert between labels and whole seconds.

/// Parse a duration label into whole seconds.
///
/// Accepts `SS`, `M:SS` and `H:MM:SS`. Returns `None` for labels that do not
/// describe a finite duration (e.g. "live", empty strings).
///
/// ```
/// use voxq_common::time::parse_duration_label;
///
/// assert_eq!(parse_duration_label("3:45"), Some(225));
/// assert_eq!(parse_duration_label("1:02:03"), Some(3723));
/// assert_eq!(parse_duration_label("live"), None);
/// ```
pub fn parse_duration_label(label: &str) -> Option<u64> {
    let label = label.trim();
    if label.is_empty() {
        return None;
    }

    let mut total: u64 = 0;
    let mut parts = 0;
    for part in label.split(':') {
        parts += 1;
        if parts > 3 || part.is_empty() {
            return None;
        }
        let value: u64 = part.parse().ok()?;
        total = total.checked_mul(60)?.checked_add(value)?;
    }
    Some(total)
}

/// Format whole seconds as `M:SS` (or `H:MM:SS` from one hour up).
///
/// ```
/// use voxq_common::time::format_duration_label;
///
/// assert_eq!(format_duration_label(65), "1:05");
/// assert_eq!(format_duration_label(3723), "1:02:03");
/// ```
pub fn format_duration_label(seconds: u64) -> String {
    let hours = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{}:{:02}", mins, secs)
    }
}
