//! Built-in vendor drivers.
//!
//! Each module exposes a `driver()` function returning the model's
//! [`DriverDefinition`](crate::driver::DriverDefinition):
//!
//! - `routeros` - MikroTik RouterOS
//! - `delln` - Dell N-series (OS6)
//! - `dellos10` - Dell OS10
//! - `ios` - Cisco IOS

pub mod delln;
pub mod dellos10;
pub mod ios;
pub mod routeros;

use crate::channel::Answer;

/// Reboot-class commands. The device goes away after any of them, so
/// each driver treats them as the end of a command batch.
pub(crate) const REBOOT_COMMANDS: &[&str] = &[
    r"^reload\b",
    r"^reboot\b",
    r"^/system(/|\s+)reboot\b",
    r"^/system(/|\s+)shutdown\b",
];

/// Answer to the enable password question.
///
/// Without a configured enable password an empty line is sent, which
/// lets the device reject the attempt instead of waiting forever.
pub(crate) fn enable_answer(password: Option<&secrecy::SecretString>) -> Vec<Answer> {
    use secrecy::ExposeSecret;

    let reply = password.map(|p| p.expose_secret().to_string()).unwrap_or_default();
    Answer::hidden(r"(?i)password:\s*$", reply)
        .map(|answer| vec![answer])
        .unwrap_or_default()
}
