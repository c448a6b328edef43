//! services/email_service.rs
//! Notification Sink: entrega de un mensaje (destinatario, asunto, cuerpo).
//! No reintenta por su cuenta; los reintentos los decide el motor de trabajos.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::app_config::SmtpConfig;
use crate::models::user_model::UserRecord;

const SMTP_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Mensaje ya renderizado para un destinatario.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<()>;
}

#[derive(Clone)]
pub struct SmtpNotificationSink {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotificationSink {
    pub fn new(config: &SmtpConfig, from_email: &str) -> Result<Self> {
        let from: Mailbox = format!("SkillConnect <{}>", from_email)
            .parse()
            .context("Invalid from address")?;

        // STARTTLS sobre el puerto configurado (587 por defecto)
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .context("Invalid SMTP relay")?
            .port(config.port)
            .credentials(Credentials::new(config.user.clone(), config.pass.clone()))
            .build();

        Ok(Self { mailer, from })
    }
}

#[async_trait]
impl NotificationSink for SmtpNotificationSink {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        let to: Mailbox = email.to.parse().context("Invalid recipient address")?;

        let body = MultiPart::alternative()
            .singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_PLAIN)
                    .body(email.text.clone()),
            )
            .singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(email.html.clone()),
            );

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&email.subject)
            .multipart(body)
            .context("Failed to build email message")?;

        tokio::time::timeout(SMTP_SEND_TIMEOUT, self.mailer.send(message))
            .await
            .context("SMTP send timed out")?
            .context("SMTP send failed")?;

        log::debug!("Email sent to {}", email.to);
        Ok(())
    }
}

/// Sink usado cuando no hay SMTP configurado: solo deja constancia en el log.
#[derive(Clone, Debug, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        log::info!(
            "(log sink) email to={} subject={:?} ({} chars)",
            email.to,
            email.subject,
            email.text.len()
        );
        Ok(())
    }
}

/// Sustituye `{{firstName}}`, `{{lastName}}` y `{{email}}` con datos del destinatario.
pub fn personalize(message: &str, user: &UserRecord) -> String {
    message
        .replace("{{firstName}}", &user.first_name)
        .replace("{{lastName}}", &user.last_name)
        .replace("{{email}}", &user.email)
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn layout(heading: &str, content: &str, footer: &str) -> String {
    format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2 style="color: #333;">{heading}</h2>
  <p>{content}</p>
  <div style="margin-top: 20px; padding: 20px; background-color: #f5f5f5; border-radius: 5px;">
    <p style="margin: 0;">{footer}</p>
  </div>
</div>"#
    )
}

/// Renderiza el HTML de un mensaje. Plantillas desconocidas o ausentes => texto plano escapado.
pub fn render_template(template: Option<&str>, subject: &str, content: &str) -> String {
    let content = escape_html(content);
    let regards = "Best regards,<br>The SkillConnect Team";
    match template {
        Some("welcome") => layout("Welcome to SkillConnect!", &content, regards),
        Some("verification") => layout(
            "Verify Your Account",
            &content,
            "This link will expire in 24 hours.",
        ),
        Some("notification") => layout(&escape_html(subject), &content, regards),
        _ => content,
    }
}

/// Construye el correo de un envío masivo para un usuario concreto.
pub fn build_bulk_email(
    user: &UserRecord,
    subject: &str,
    message: &str,
    template: Option<&str>,
) -> OutgoingEmail {
    let text = personalize(message, user);
    OutgoingEmail {
        to: user.email.clone(),
        subject: subject.to_string(),
        html: render_template(template, subject, &text),
        text,
    }
}
