//! Canned-response Marlin device that sits behind the virtual connection.
//!
//! No physical model: temperatures and positions are constants. The only
//! state kept is the host line number, which Marlin tracks for resends.

use marlin_shared::config::DeviceConfig;
use marlin_shared::gcode_utils::{CommandLine, command_code, parse_command_line};

pub const BUSY_LINE: &str = "echo:busy: processing";

/// Commands that keep Marlin busy long enough to emit keepalive lines.
const BUSY_CODES: [&str; 5] = ["G28", "G29", "M109", "M190", "M400"];

#[derive(Debug, Clone)]
pub struct MarlinDevice {
    config: DeviceConfig,
    last_line: u32,
}

impl MarlinDevice {
    pub fn new(config: DeviceConfig) -> Self {
        Self { config, last_line: 0 }
    }

    pub fn last_line(&self) -> u32 {
        self.last_line
    }

    /// Reply lines for one command line, without terminators. Blank input gets no reply.
    pub fn respond(&mut self, raw: &str) -> Vec<String> {
        let line = parse_command_line(raw);
        if line.is_blank() {
            return Vec::new();
        }
        let code = command_code(line.body);
        let is_m110 = code.as_deref() == Some("M110");

        if let Some(error) = self.check_framing(&line, is_m110) {
            tracing::debug!("Rejecting '{}': {}", raw.trim(), error);
            return self.resend(&error);
        }
        if let Some(n) = line.line_number {
            self.last_line = n;
        }

        if let Some(lines) = code.as_ref().and_then(|c| self.config.replies.get(c)) {
            return lines.clone();
        }

        match code.as_deref() {
            Some("M110") => {
                let requested = line
                    .body
                    .split_whitespace()
                    .skip(1)
                    .find_map(|word| word.strip_prefix(['N', 'n'])?.parse::<u32>().ok());
                self.last_line = requested.or(line.line_number).unwrap_or(0);
                ok()
            }
            Some("M105") => vec![format!(
                "ok T:{:.2} /0.00 B:{:.2} /0.00 @:0 B@:0",
                self.config.hotend_temp, self.config.bed_temp
            )],
            Some("M114") => vec![
                "X:0.00 Y:0.00 Z:0.00 E:0.00 Count X:0 Y:0 Z:0".to_string(),
                "ok".to_string(),
            ],
            Some("M115") => vec![
                format!(
                    "FIRMWARE_NAME:{} {} SOURCE_CODE_URL:github.com/MarlinFirmware/Marlin PROTOCOL_VERSION:1.0 MACHINE_TYPE:{} EXTRUDER_COUNT:1",
                    self.config.firmware_name, self.config.firmware_version, self.config.machine_type
                ),
                "ok".to_string(),
            ],
            Some(c) if BUSY_CODES.contains(&c) => {
                let mut lines: Vec<String> =
                    (0..self.config.busy_lines).map(|_| BUSY_LINE.to_string()).collect();
                lines.push("ok".to_string());
                lines
            }
            Some(_) => ok(),
            None => vec![format!("echo:Unknown command: \"{}\"", line.body), "ok".to_string()],
        }
    }

    fn check_framing(&self, line: &CommandLine<'_>, is_m110: bool) -> Option<String> {
        match line.line_number {
            Some(n) if !is_m110 && n != self.last_line.wrapping_add(1) => {
                Some("Line Number is not Last Line Number+1".to_string())
            }
            Some(_) if line.checksum.is_none() => Some("No Checksum with line number".to_string()),
            Some(_) if !line.checksum_matches() => Some("checksum mismatch".to_string()),
            None if line.checksum.is_some() => Some("No Line Number with checksum".to_string()),
            _ => None,
        }
    }

    fn resend(&self, error: &str) -> Vec<String> {
        vec![
            format!("Error:{}, Last Line: {}", error, self.last_line),
            format!("Resend: {}", self.last_line.wrapping_add(1)),
            "ok".to_string(),
        ]
    }
}

fn ok() -> Vec<String> {
    vec!["ok".to_string()]
}
