//! Forwarder — composes the annotated message and hands it to SMTP.
//!
//! Every PDF of the original is re-attached. When the primary send fails a
//! short plain-text report goes to the control mailbox instead.

use std::sync::Arc;

use lettre::Message;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, Mailboxes, MultiPart, SinglePart};
use tracing::{error, info, warn};

use crate::channels::email_types::{pdf_parts, sender_display};
use crate::channels::{MailTransport, RawMessage};
use crate::error::{DeliveryError, SendError};
use crate::extract::ExtractedContent;
use crate::pipeline::types::{Annotation, RoutingDecision};

/// Subject prefix for anything routed to human review.
pub const REVIEW_PREFIX: &str = "[REVIEW] ";

/// Subject of the fallback report.
pub const ERROR_REPORT_SUBJECT: &str = "Error in Email Processing";

pub struct Forwarder {
    transport: Arc<dyn MailTransport>,
    from: String,
    control_mailbox: String,
}

impl Forwarder {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        from: impl Into<String>,
        control_mailbox: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            from: from.into(),
            control_mailbox: control_mailbox.into(),
        }
    }

    /// Send the annotated message to `decision.destination`.
    ///
    /// On failure the control mailbox gets an error report; the returned
    /// error says whether that report went out.
    pub async fn forward(
        &self,
        original: &RawMessage,
        content: &ExtractedContent,
        decision: &RoutingDecision,
        annotation: &Annotation,
    ) -> Result<(), DeliveryError> {
        let sent = match self.compose_forward(original, content, decision, annotation) {
            Ok(message) => self.transport.send(message).await,
            Err(e) => Err(e),
        };

        let primary = match sent {
            Ok(()) => {
                info!(
                    seq = original.seq,
                    to = %decision.destination,
                    reason = decision.reason.label(),
                    "Forwarded message"
                );
                return Ok(());
            }
            Err(e) => e.to_string(),
        };

        warn!(seq = original.seq, to = %decision.destination, error = %primary, "Forward failed, reporting to control mailbox");
        match self.report_error(&primary, &content.body).await {
            Ok(()) => Err(DeliveryError::Reported {
                destination: decision.destination.clone(),
                reason: primary,
            }),
            Err(report) => {
                error!(seq = original.seq, error = %report, "Error report could not be sent");
                Err(DeliveryError::Critical {
                    destination: decision.destination.clone(),
                    primary,
                    report: report.to_string(),
                })
            }
        }
    }

    /// Plain-text report to the control mailbox.
    pub async fn report_error(&self, error: &str, original_body: &str) -> Result<(), SendError> {
        let body = format!("An error occurred: {error}\n\nOriginal email body:\n{original_body}");
        let mut builder = Message::builder().from(parse_mailbox(&self.from)?);
        for to in parse_mailboxes(&self.control_mailbox)? {
            builder = builder.to(to);
        }
        let message = builder
            .subject(ERROR_REPORT_SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| SendError::Build(e.to_string()))?;
        self.transport.send(message).await
    }

    /// Build the forwarded message: header block plus original body, with
    /// every original PDF attached.
    pub fn compose_forward(
        &self,
        original: &RawMessage,
        content: &ExtractedContent,
        decision: &RoutingDecision,
        annotation: &Annotation,
    ) -> Result<Message, SendError> {
        let parsed = original.parse();
        let sender = parsed.as_ref().map(sender_display).unwrap_or_default();

        let subject = match content.subject.trim() {
            "" => "(no subject)",
            s => s,
        };
        let subject = if decision.reason.is_review() {
            format!("{REVIEW_PREFIX}{subject}")
        } else {
            subject.to_string()
        };

        let body = format!(
            "{}\n-----------------------------------------\nOriginal message from: {}\nSubject: {}\n\n{}",
            header_block(decision, annotation),
            if sender.is_empty() { "unknown" } else { sender.as_str() },
            content.subject,
            content.body
        );

        let pdf = ContentType::parse("application/pdf")
            .map_err(|e| SendError::Build(e.to_string()))?;
        let mut multipart = MultiPart::mixed().singlepart(SinglePart::plain(body));
        if let Some(parsed) = parsed.as_ref() {
            for (idx, part) in pdf_parts(parsed).into_iter().enumerate() {
                let filename = part
                    .filename
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("attachment_{idx}.pdf"));
                multipart = multipart.singlepart(Attachment::new(filename).body(part.data.to_vec(), pdf.clone()));
            }
        }

        let mut builder = Message::builder().from(parse_mailbox(&self.from)?);
        for to in parse_mailboxes(&decision.destination)? {
            builder = builder.to(to);
        }
        builder
            .subject(subject)
            .multipart(multipart)
            .map_err(|e| SendError::Build(e.to_string()))
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, SendError> {
    address.parse().map_err(|e: lettre::address::AddressError| SendError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

/// Comma-separated recipient list, as found in the `RECIPIENTS_*` variables.
pub fn parse_mailboxes(addresses: &str) -> Result<Mailboxes, SendError> {
    let invalid = |reason: String| SendError::InvalidAddress {
        address: addresses.to_string(),
        reason,
    };
    let mut mailboxes = Mailboxes::new();
    for address in addresses.split(',').map(str::trim).filter(|a| !a.is_empty()) {
        let mailbox: Mailbox = address
            .parse()
            .map_err(|e: lettre::address::AddressError| invalid(format!("{address}: {e}")))?;
        mailboxes.push(mailbox);
    }
    if mailboxes.iter().next().is_none() {
        return Err(invalid("no address given".into()));
    }
    Ok(mailboxes)
}

/// The "AI Analysis" block at the top of every forward.
fn header_block(decision: &RoutingDecision, annotation: &Annotation) -> String {
    let mut block = String::from("AI Analysis - Identified data:\n");
    block.push_str(&format!("Destination: {}\n", decision.destination));
    block.push_str(&format!("Routing: {}\n", decision.reason.label()));

    if let Some(c) = &annotation.classification {
        if let Some(dept) = &c.department {
            block.push_str(&format!("Department: {dept}\n"));
        }
        block.push_str(&format!("Confidence Level: {}\n", c.confidence));
        block.push_str(&format!("Summary: {}\n", c.summary));
        block.push_str(&format!("Equipment: {}\n", c.equipment));
        block.push_str(&format!("Address: {}\n", c.address));
    }
    if let Some(geo) = &annotation.geocode {
        block.push_str(&format!("Location: {}\n", geo.describe()));
    }
    if let Some(note) = &annotation.note {
        block.push_str(&format!("Note: {note}\n"));
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::PdfText;
    use crate::pipeline::types::{ClassificationResult, GeocodeResult, MacroArea, RouteReason};
    use mail_parser::{MessageParser, MimeHeaders};
    use std::sync::Mutex;

    /// Records sent messages; fails sends addressed to `fail_to`.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Message>>,
        fail_to: Vec<String>,
    }

    #[async_trait::async_trait]
    impl MailTransport for RecordingTransport {
        async fn send(&self, message: Message) -> Result<(), SendError> {
            let to = message.envelope().to().first().map(|a| a.to_string()).unwrap_or_default();
            if self.fail_to.contains(&to) {
                return Err(SendError::Smtp(format!("550 rejected {to}")));
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }

    const WITH_PDFS: &str = "From: Ops <ops@example.it>\r\n\
        Subject: Report\r\n\
        MIME-Version: 1.0\r\n\
        Content-Type: multipart/mixed; boundary=\"b\"\r\n\
        \r\n\
        --b\r\n\
        Content-Type: text/plain\r\n\
        \r\n\
        see attached\r\n\
        --b\r\n\
        Content-Type: application/pdf\r\n\
        Content-Disposition: attachment; filename=\"verbale.pdf\"\r\n\
        Content-Transfer-Encoding: base64\r\n\
        \r\n\
        JVBERi0xLjQK\r\n\
        --b\r\n\
        Content-Type: application/pdf\r\n\
        Content-Disposition: inline\r\n\
        Content-Transfer-Encoding: base64\r\n\
        \r\n\
        JVBERi0xLjQK\r\n\
        --b--\r\n";

    fn content() -> ExtractedContent {
        ExtractedContent {
            subject: "Report".into(),
            body: "see attached".into(),
            pdf: PdfText::NoExtractableText,
        }
    }

    fn annotation() -> Annotation {
        Annotation {
            classification: Some(ClassificationResult {
                summary: "pump broken".into(),
                equipment: "pump".into(),
                address: "Via Roma 1, Milano, Italy".into(),
                confidence: 95,
                department: Some("Manutenzione".into()),
            }),
            geocode: Some(GeocodeResult::Resolved {
                comune: "Milano".into(),
                provincia: "Milano".into(),
                regione: "Lombardia".into(),
                macro_area: MacroArea::Nord,
            }),
            note: None,
        }
    }

    fn decision(reason: RouteReason, to: &str) -> RoutingDecision {
        RoutingDecision {
            destination: to.into(),
            reason,
        }
    }

    fn forwarder(transport: Arc<RecordingTransport>) -> Forwarder {
        Forwarder::new(transport, "triage@example.it", "review@example.it")
    }

    #[test]
    fn compose_reattaches_every_pdf() {
        let raw = RawMessage::new(1, WITH_PDFS);
        let fwd = forwarder(Arc::new(RecordingTransport::default()));
        let message = fwd
            .compose_forward(&raw, &content(), &decision(RouteReason::HighConfidence, "north@ops.example"), &annotation())
            .unwrap();

        let bytes = message.formatted();
        let reparsed = MessageParser::default().parse(bytes.as_slice()).unwrap();
        let names: Vec<_> = reparsed
            .attachments()
            .filter_map(|p| p.attachment_name().map(str::to_string))
            .collect();
        assert_eq!(names, vec!["verbale.pdf", "attachment_1.pdf"]);
        for part in reparsed.attachments() {
            assert_eq!(part.content_type().unwrap().subtype(), Some("pdf"));
            assert!(part.contents().starts_with(b"%PDF-1.4"));
        }
    }

    #[test]
    fn compose_writes_header_block() {
        let raw = RawMessage::new(1, WITH_PDFS);
        let fwd = forwarder(Arc::new(RecordingTransport::default()));
        let message = fwd
            .compose_forward(&raw, &content(), &decision(RouteReason::HighConfidence, "north@ops.example"), &annotation())
            .unwrap();
        let bytes = message.formatted();
        let reparsed = MessageParser::default().parse(bytes.as_slice()).unwrap();
        let body = reparsed.body_text(0).unwrap().replace("\r\n", "\n");
        assert!(body.starts_with("AI Analysis - Identified data:"));
        assert!(body.contains("Confidence Level: 95"));
        assert!(body.contains("Location: Milano, Milano, Lombardia (Nord)"));
        assert!(body.contains("Original message from: Ops <ops@example.it>"));
        assert!(body.contains("see attached"));
        assert_eq!(reparsed.subject(), Some("Report"));
    }

    #[test]
    fn review_routes_get_subject_prefix() {
        let raw = RawMessage::new(1, WITH_PDFS);
        let fwd = forwarder(Arc::new(RecordingTransport::default()));
        let message = fwd
            .compose_forward(&raw, &content(), &decision(RouteReason::LowConfidence, "review@example.it"), &annotation())
            .unwrap();
        let bytes = message.formatted();
        let reparsed = MessageParser::default().parse(bytes.as_slice()).unwrap();
        assert_eq!(reparsed.subject(), Some("[REVIEW] Report"));
    }

    #[tokio::test]
    async fn forward_sends_to_destination() {
        let transport = Arc::new(RecordingTransport::default());
        let fwd = forwarder(transport.clone());
        let raw = RawMessage::new(1, WITH_PDFS);
        fwd.forward(&raw, &content(), &decision(RouteReason::HighConfidence, "north@ops.example"), &annotation())
            .await
            .unwrap();
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].envelope().to()[0].to_string(), "north@ops.example");
    }

    #[tokio::test]
    async fn forward_reaches_every_listed_recipient() {
        let transport = Arc::new(RecordingTransport::default());
        let fwd = forwarder(transport.clone());
        let raw = RawMessage::new(1, WITH_PDFS);
        fwd.forward(
            &raw,
            &content(),
            &decision(RouteReason::HighConfidence, "north1@ops.example, north2@ops.example"),
            &annotation(),
        )
        .await
        .unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let to: Vec<_> = sent[0].envelope().to().iter().map(|a| a.to_string()).collect();
        assert_eq!(to, vec!["north1@ops.example", "north2@ops.example"]);
    }

    #[test]
    fn recipient_lists_are_validated() {
        let list = parse_mailboxes(" a@ops.example ,b@ops.example,").unwrap();
        assert_eq!(list.iter().count(), 2);
        assert!(matches!(
            parse_mailboxes("a@ops.example, nope"),
            Err(SendError::InvalidAddress { .. })
        ));
        assert!(parse_mailboxes(" , ").is_err());
    }

    #[tokio::test]
    async fn failed_forward_is_reported() {
        let transport = Arc::new(RecordingTransport {
            fail_to: vec!["north@ops.example".into()],
            ..Default::default()
        });
        let fwd = forwarder(transport.clone());
        let raw = RawMessage::new(1, WITH_PDFS);
        let err = fwd
            .forward(&raw, &content(), &decision(RouteReason::HighConfidence, "north@ops.example"), &annotation())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Reported { .. }));

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let bytes = sent[0].formatted();
        let report = MessageParser::default().parse(bytes.as_slice()).unwrap();
        assert_eq!(report.subject(), Some(ERROR_REPORT_SUBJECT));
        let body = report.body_text(0).unwrap().replace("\r\n", "\n");
        assert!(body.starts_with("An error occurred: SMTP error: 550 rejected north@ops.example"));
        assert!(body.contains("Original email body:\nsee attached"));
    }

    #[tokio::test]
    async fn failed_report_is_critical() {
        let transport = Arc::new(RecordingTransport {
            fail_to: vec!["north@ops.example".into(), "review@example.it".into()],
            ..Default::default()
        });
        let fwd = forwarder(transport.clone());
        let raw = RawMessage::new(1, WITH_PDFS);
        let err = fwd
            .forward(&raw, &content(), &decision(RouteReason::HighConfidence, "north@ops.example"), &annotation())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Critical { .. }));
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_destination_is_reported() {
        let transport = Arc::new(RecordingTransport::default());
        let fwd = forwarder(transport.clone());
        let raw = RawMessage::new(1, WITH_PDFS);
        let err = fwd
            .forward(&raw, &content(), &decision(RouteReason::HighConfidence, "not an address"), &annotation())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Reported { .. }));
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }
}
