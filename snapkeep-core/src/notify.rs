/*!
Delivery of the run transcript.

When recipients are configured the transcript is mailed through the local
`sendmail` binary; otherwise it is written to standard output.
*/

use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::debug;

use crate::{Result, SnapkeepError};

/// Subject prefix of transcript mails; the completion timestamp follows.
pub const SUBJECT_PREFIX: &str = "EC2 Backup Log";

/// Default location of the sendmail-compatible binary.
pub const DEFAULT_SENDMAIL: &str = "/usr/sbin/sendmail";

/// Delivers a finished run transcript.
pub trait Notifier {
    fn deliver(&self, transcript: &str, completed_at: DateTime<Utc>) -> Result<()>;
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn deliver(&self, transcript: &str, completed_at: DateTime<Utc>) -> Result<()> {
        (**self).deliver(transcript, completed_at)
    }
}

/// Mail subject for a run completed at `completed_at`.
pub fn subject(completed_at: DateTime<Utc>) -> String {
    format!("{} {}", SUBJECT_PREFIX, completed_at.to_rfc2822())
}

/// Writes the transcript to standard output.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutNotifier;

impl Notifier for StdoutNotifier {
    fn deliver(&self, transcript: &str, _completed_at: DateTime<Utc>) -> Result<()> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        handle.write_all(transcript.as_bytes())?;
        handle.flush()?;
        Ok(())
    }
}

/// Mails the transcript to every recipient with `sendmail -t -i`.
#[derive(Debug, Clone)]
pub struct SendmailNotifier {
    program: PathBuf,
    recipients: Vec<String>,
}

impl SendmailNotifier {
    pub fn new(recipients: Vec<String>) -> Self {
        Self::with_program(DEFAULT_SENDMAIL, recipients)
    }

    pub fn with_program<P: Into<PathBuf>>(program: P, recipients: Vec<String>) -> Self {
        Self {
            program: program.into(),
            recipients,
        }
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Plain-text RFC 5322 message carrying the transcript.
    pub fn compose_message(&self, transcript: &str, completed_at: DateTime<Utc>) -> String {
        let mut message = String::with_capacity(transcript.len() + 256);
        message.push_str(&format!("To: {}\r\n", self.recipients.join(", ")));
        message.push_str(&format!("Subject: {}\r\n", subject(completed_at)));
        message.push_str(&format!("Date: {}\r\n", completed_at.to_rfc2822()));
        message.push_str("MIME-Version: 1.0\r\n");
        message.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        message.push_str("\r\n");
        for line in transcript.lines() {
            message.push_str(line);
            message.push_str("\r\n");
        }
        message
    }
}

impl Notifier for SendmailNotifier {
    fn deliver(&self, transcript: &str, completed_at: DateTime<Utc>) -> Result<()> {
        let message = self.compose_message(transcript, completed_at);

        let mut child = Command::new(&self.program)
            .args(["-t", "-i"])
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| {
                SnapkeepError::notify(format!(
                    "Failed to start {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(message.as_bytes())?;
        }

        let status = child.wait()?;
        if !status.success() {
            return Err(SnapkeepError::notify(format!(
                "{} exited with {}",
                self.program.display(),
                status
            )));
        }

        debug!(recipients = self.recipients.len(), "Transcript mailed");
        Ok(())
    }
}

/// Mail when there are recipients, stdout otherwise.
pub fn notifier_for(recipients: &[String], sendmail: Option<PathBuf>) -> Box<dyn Notifier> {
    if recipients.is_empty() {
        return Box::new(StdoutNotifier);
    }
    let program = sendmail.unwrap_or_else(|| PathBuf::from(DEFAULT_SENDMAIL));
    Box::new(SendmailNotifier::with_program(program, recipients.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn completed_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap()
    }

    #[test]
    fn test_subject_carries_rfc2822_timestamp() {
        let subject = subject(completed_at());
        assert!(subject.starts_with("EC2 Backup Log Wed, "));
        assert!(subject.ends_with("May 2024 10:30:00 +0000"));
    }

    #[test]
    fn test_compose_message() {
        let notifier = SendmailNotifier::new(vec!["a@example.com".into(), "b@example.com".into()]);
        let message = notifier.compose_message("Processing web\nDone\n", completed_at());

        assert!(message.starts_with("To: a@example.com, b@example.com\r\n"));
        assert!(message.contains(&format!("Subject: {}\r\n", subject(completed_at()))));
        assert!(message.ends_with("\r\n\r\nProcessing web\r\nDone\r\n"));
    }

    #[test]
    fn test_missing_sendmail_is_notify_error() {
        let dir = tempfile::tempdir().unwrap();
        let notifier =
            SendmailNotifier::with_program(dir.path().join("no-sendmail"), vec!["a@example.com".into()]);

        let result = notifier.deliver("log", completed_at());
        assert!(matches!(result, Err(SnapkeepError::Notify(_))));
    }

    #[test]
    fn test_notifier_selection() {
        let stdout = notifier_for(&[], None);
        assert!(stdout.deliver("", completed_at()).is_ok());

        let dir = tempfile::tempdir().unwrap();
        let mail = notifier_for(&["a@example.com".into()], Some(dir.path().join("missing")));
        assert!(mail.deliver("x", completed_at()).is_err());
    }
}
