use lettre::address::{Address, Envelope};
use lettre::transport::smtp::{
    authentication::Credentials,
    client::{Tls, TlsParameters},
};
use lettre::{SmtpTransport, Transport};
use tracing::debug;

use pushgate_core::{GatewayError, Result};

use crate::config::SmtpConfig;

/// Hands a finished message to the outgoing relay.
pub trait MailSubmitter {
    fn submit(&mut self, envelope_from: Option<&str>, recipients: &[String], message: &[u8]) -> Result<()>;
}

pub struct SmtpSubmitter {
    transport: SmtpTransport,
}

impl SmtpSubmitter {
    pub fn new(smtp: &SmtpConfig) -> Result<Self> {
        let mut tls_builder = TlsParameters::builder(smtp.host.clone());
        if smtp.skip_tls_verify {
            tls_builder = tls_builder
                .dangerous_accept_invalid_certs(true)
                .dangerous_accept_invalid_hostnames(true);
        }
        let tls_parameters = tls_builder
            .build()
            .map_err(|e| GatewayError::ConnectionFailure(format!("smtp tls: {e}")))?;
        let builder = if smtp.port == 465 {
            SmtpTransport::builder_dangerous(&smtp.host)
                .port(smtp.port)
                .tls(Tls::Wrapper(tls_parameters))
        } else {
            SmtpTransport::builder_dangerous(&smtp.host)
                .port(smtp.port)
                .tls(Tls::Required(tls_parameters))
        };
        let builder = if smtp.username.is_empty() {
            builder
        } else {
            builder.credentials(Credentials::new(smtp.username.clone(), smtp.password.clone()))
        };
        Ok(SmtpSubmitter {
            transport: builder.build(),
        })
    }
}

impl MailSubmitter for SmtpSubmitter {
    fn submit(&mut self, envelope_from: Option<&str>, recipients: &[String], message: &[u8]) -> Result<()> {
        let envelope = build_envelope(envelope_from, recipients)?;
        debug!(recipients = recipients.len(), bytes = message.len(), "smtp submit");
        self.transport
            .send_raw(&envelope, message)
            .map_err(|e| GatewayError::SubmissionFailed(e.to_string()))?;
        Ok(())
    }
}

fn build_envelope(envelope_from: Option<&str>, recipients: &[String]) -> Result<Envelope> {
    let from = envelope_from
        .map(|addr| addr.trim().parse::<Address>())
        .transpose()
        .map_err(|e| GatewayError::SubmissionFailed(format!("sender address: {e}")))?;
    let to = recipients
        .iter()
        .map(|addr| {
            addr.trim()
                .parse::<Address>()
                .map_err(|e| GatewayError::SubmissionFailed(format!("recipient {addr}: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;
    Envelope::new(from, to).map_err(|e| GatewayError::SubmissionFailed(e.to_string()))
}
