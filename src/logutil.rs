//! Logging helpers so remote response bodies and raw serial bytes stay on a single log line.

/// Longest upload response body echoed into a log line or error message.
pub const BODY_PREVIEW_CHARS: usize = 200;

/// One-line preview of a remote response body.
///
/// Upload endpoints answer errors with anything from a bare `OK` to a full
/// HTML page. Whitespace runs (newlines included) collapse to a single space,
/// other control characters become `\xNN`, and the result is cut at
/// [`BODY_PREVIEW_CHARS`] with a trailing `…`.
pub fn body_preview(body: &str) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(body.len().min(BODY_PREVIEW_CHARS) + 4);
    let mut shown = 0;
    let mut pending_space = false;
    for ch in body.trim().chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if shown + usize::from(pending_space) >= BODY_PREVIEW_CHARS {
            out.push('…');
            break;
        }
        if pending_space {
            out.push(' ');
            shown += 1;
            pending_space = false;
        }
        if ch.is_control() {
            let _ = write!(&mut out, "\\x{:02X}", ch as u32);
        } else {
            out.push(ch);
        }
        shown += 1;
    }
    out
}

/// Lowercase hex preview of at most `max` leading bytes.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    let shown: String = data
        .iter()
        .take(max)
        .map(|b| format!("{:02x}", b))
        .collect();
    if data.len() > max {
        format!("{}.. ({} bytes)", shown, data.len())
    } else {
        shown
    }
}
