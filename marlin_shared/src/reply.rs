//! Marlin acknowledgment framing.
//!
//! Every finished command is terminated by a line carrying `ok`, possibly
//! preceded by diagnostic lines (temperature reports, `echo:busy`, ...).

pub const OK_TOKEN: &str = "ok";
pub const RESEND_TOKEN: &str = "Resend:";

/// Split a reply on `\n`, dropping the `\r` left behind by DOS line endings.
pub fn reply_lines(reply: &str) -> impl Iterator<Item = &str> {
    reply.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line))
}

/// Last non-empty line of a reply, if any.
pub fn last_line(reply: &str) -> Option<&str> {
    reply_lines(reply).filter(|line| !line.is_empty()).last()
}

/// True if the last non-empty line contains `ok` anywhere.
///
/// Plain substring match: `"okay"` and `"not ok yet"` both count as complete.
pub fn is_ok_reply(reply: &str) -> bool {
    last_line(reply).is_some_and(|line| line.contains(OK_TOKEN))
}

/// Line number the device asked to have sent again, if the reply carries a `Resend:`.
pub fn resend_request(reply: &str) -> Option<u32> {
    reply_lines(reply).find_map(|line| line.trim().strip_prefix(RESEND_TOKEN)?.trim().parse().ok())
}
