use crate::NotificationChannel;
use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use hostmon_common::types::AlertEvent;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

#[derive(Debug)]
pub struct EmailChannel {
    transport: SmtpTransport,
    from: String,
    to: Vec<String>,
}

impl EmailChannel {
    pub fn new(
        smtp_host: &str,
        smtp_port: u16,
        username: Option<&str>,
        password: Option<&str>,
        from: &str,
        to: Vec<String>,
    ) -> Result<Self> {
        let mut builder = SmtpTransport::relay(smtp_host)
            .with_context(|| format!("invalid SMTP relay {smtp_host}"))?
            .port(smtp_port);
        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }
        Ok(Self {
            transport: builder.build(),
            from: from.to_string(),
            to,
        })
    }

    fn format_body(event: &AlertEvent) -> String {
        let when = Utc
            .timestamp_opt(event.timestamp, 0)
            .single()
            .unwrap_or_else(Utc::now)
            .format("%Y-%m-%d %H:%M:%S UTC");
        let process_line = event
            .process_name
            .as_deref()
            .map(|p| format!("Process: {p}\n"))
            .unwrap_or_default();
        format!(
            "Alert: {}\nSeverity: {}\nHostname: {}\nTimestamp: {when}\n\
             Metric: {}\n{process_line}Current Value: {:.2}\nThreshold: {} {:.2}\n\n{}\n",
            event.alert_name,
            event.severity,
            event.hostname,
            event.metric,
            event.current_value,
            event.condition,
            event.threshold,
            event.message,
        )
    }
}

impl NotificationChannel for EmailChannel {
    fn send(&self, event: &AlertEvent) -> Result<()> {
        let subject = format!("[hostmon {}] {}", event.severity, event.alert_name);
        let body = Self::format_body(event);

        for recipient in &self.to {
            let message = Message::builder()
                .from(self.from.parse().context("invalid from address")?)
                .to(recipient.parse().context("invalid recipient address")?)
                .subject(&subject)
                .header(ContentType::TEXT_PLAIN)
                .body(body.clone())?;
            self.transport
                .send(&message)
                .with_context(|| format!("SMTP send to {recipient} failed"))?;
        }
        Ok(())
    }

    fn channel_type(&self) -> &str {
        "email"
    }
}
