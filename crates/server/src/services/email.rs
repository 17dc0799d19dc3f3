//! Outgoing account email over SMTP (lettre).

use anyhow::{Context, Result};
use lettre::message::MultiPart;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::Config;

/// Subject of the signup email.
pub const WELCOME_SUBJECT: &str = "Signup Successful";

/// How the SMTP connection is secured, from `SMTP_ENCRYPTION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpMode {
    /// STARTTLS upgrade, usually port 587.
    StartTls,
    /// Implicit TLS, usually port 465.
    Tls,
    /// Plain text. Local mail catchers only.
    Plain,
}

impl SmtpMode {
    /// Unknown values fall back to STARTTLS.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "tls" | "smtps" => Self::Tls,
            "none" | "plain" => Self::Plain,
            _ => Self::StartTls,
        }
    }
}

/// Sends account emails over SMTP.
pub struct EmailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    site_url: String,
}

/// A rendered message: plain text plus HTML alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

fn smtp_transport(
    host: &str,
    port: u16,
    mode: SmtpMode,
    credentials: Option<Credentials>,
) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
    let builder = match mode {
        SmtpMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .with_context(|| format!("invalid SMTP host '{host}'"))?,
        SmtpMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .with_context(|| format!("invalid SMTP host '{host}'"))?,
        SmtpMode::Plain => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
    };
    let builder = builder.port(port);

    Ok(match credentials {
        Some(credentials) => builder.credentials(credentials).build(),
        None => builder.build(),
    })
}

impl EmailService {
    /// Build the service from configuration. `None` when `SMTP_HOST` is unset.
    ///
    /// No connection is opened until the first message is sent.
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        let Some(host) = config.smtp_host.as_deref() else {
            return Ok(None);
        };

        let credentials = config
            .smtp_username
            .clone()
            .zip(config.smtp_password.clone())
            .map(|(user, pass)| Credentials::new(user, pass));
        let transport = smtp_transport(
            host,
            config.smtp_port,
            SmtpMode::parse(&config.smtp_encryption),
            credentials,
        )?;

        Ok(Some(Self {
            transport,
            from_email: config.smtp_from_email.clone(),
            site_url: config.site_url.trim_end_matches('/').to_string(),
        }))
    }

    /// Send a rendered email.
    pub async fn send(&self, to: &str, email: RenderedEmail) -> Result<()> {
        let message = Message::builder()
            .from(
                self.from_email
                    .parse()
                    .context("invalid from email address")?,
            )
            .to(to.parse().context("invalid recipient email address")?)
            .subject(email.subject)
            .multipart(MultiPart::alternative_plain_html(email.text, email.html))
            .context("failed to build email message")?;

        self.transport
            .send(message)
            .await
            .context("failed to send email")?;

        Ok(())
    }

    /// Welcome a newly registered user.
    pub async fn send_welcome(&self, to: &str, name: &str) -> Result<()> {
        let email = welcome_email(name, &format!("{}/me", self.site_url));
        self.send(to, email).await
    }
}

/// Render the signup email for a user.
pub fn welcome_email(name: &str, account_url: &str) -> RenderedEmail {
    let first_name = name.split_whitespace().next().unwrap_or(name);
    let text = format!(
        "Hi {first_name},\n\n\
         Welcome to Natours, we're glad to have you!\n\n\
         Upload a profile photo and start exploring tours from your account page:\n\
         {account_url}\n\n\
         - The Natours team"
    );
    let name_html = ammonia::clean_text(first_name);
    let url_html = ammonia::clean_text(account_url);
    let html = format!(
        "<p>Hi {name_html},</p>\
         <p>Welcome to Natours, we're glad to have you!</p>\
         <p><a href=\"{url_html}\">Upload a profile photo and start exploring tours</a>.</p>\
         <p>- The Natours team</p>"
    );

    RenderedEmail {
        subject: WELCOME_SUBJECT.to_string(),
        text,
        html,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn smtp_mode_parsing() {
        assert_eq!(SmtpMode::parse("starttls"), SmtpMode::StartTls);
        assert_eq!(SmtpMode::parse(" TLS "), SmtpMode::Tls);
        assert_eq!(SmtpMode::parse("none"), SmtpMode::Plain);
        assert_eq!(SmtpMode::parse("whatever"), SmtpMode::StartTls);
    }

    #[test]
    fn transports_build_without_connecting() {
        for (host, port, mode) in [
            ("nonexistent.invalid", 587, SmtpMode::StartTls),
            ("nonexistent.invalid", 465, SmtpMode::Tls),
            ("localhost", 1025, SmtpMode::Plain),
        ] {
            let credentials = Some(Credentials::new("user".into(), "pass".into()));
            assert!(smtp_transport(host, port, mode, credentials).is_ok(), "{mode:?}");
        }
    }

    #[test]
    fn welcome_email_greets_first_name() {
        let email = welcome_email("Jonas Schmedtmann", "http://localhost:3000/me");
        assert_eq!(email.subject, "Signup Successful");
        assert!(email.text.starts_with("Hi Jonas,"));
        assert!(email.text.contains("http://localhost:3000/me"));
        assert!(email.html.contains("Hi Jonas,"));
    }

    #[test]
    fn welcome_email_escapes_html() {
        let email = welcome_email("<b>Eve</b>", "http://x");
        assert!(!email.html.contains("<b>"));
    }
}
