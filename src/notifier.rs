//! Best-effort price drop alerts over a message gateway.

use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid gateway url {url:?}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to build http client")]
    Client(#[source] reqwest::Error),
    #[error("message delivery failed")]
    Delivery(#[from] reqwest::Error),
}

/// The transport capability: dispatch a message, wait out its settle time,
/// then confirm the send.
pub trait MessageGateway {
    fn send_message(&self, recipient: &str, text: &str, settle: Duration)
    -> Result<(), NotifyError>;
    fn confirm_send(&self) -> Result<(), NotifyError>;
}

pub struct Notifier<G> {
    gateway: G,
    recipient: String,
    settle: Duration,
}

impl<G: MessageGateway> Notifier<G> {
    pub fn new(gateway: G, recipient: impl Into<String>, settle: Duration) -> Self {
        Self {
            gateway,
            recipient: recipient.into(),
            settle,
        }
    }

    /// Fire-and-forget. Delivery errors are logged here and never
    /// propagated; by the time an alert goes out the observation is already
    /// persisted.
    pub fn alert(&self, product_name: &str, price: u64) {
        let text = format!("PRICE DROP on {product_name}. Price is now {price}");
        info!(recipient = %self.recipient, "sending price drop alert");

        let delivery = self
            .gateway
            .send_message(&self.recipient, &text, self.settle)
            .and_then(|()| self.gateway.confirm_send());

        match delivery {
            Ok(()) => info!("price drop alert delivered"),
            Err(err) => error!(error = %err, "price drop alert failed"),
        }
    }
}

/// Gateway over an HTTP messaging service: JSON POST to `messages`, settle,
/// then POST to `messages/confirm` to finalize the send.
pub struct HttpGateway {
    client: reqwest::blocking::Client,
    send_url: Url,
    confirm_url: Url,
}

impl HttpGateway {
    pub fn new(base_url: &str) -> Result<Self, NotifyError> {
        let url_err = |source| NotifyError::Url {
            url: base_url.to_string(),
            source,
        };
        let base = Url::parse(base_url).map_err(url_err)?;
        let send_url = base.join("messages").map_err(url_err)?;
        let confirm_url = base.join("messages/confirm").map_err(url_err)?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(NotifyError::Client)?;

        Ok(Self {
            client,
            send_url,
            confirm_url,
        })
    }
}

impl MessageGateway for HttpGateway {
    fn send_message(
        &self,
        recipient: &str,
        text: &str,
        settle: Duration,
    ) -> Result<(), NotifyError> {
        self.client
            .post(self.send_url.clone())
            .json(&serde_json::json!({ "recipient": recipient, "body": text }))
            .send()?
            .error_for_status()?;

        // The transport needs a moment before the send can be finalized.
        thread::sleep(settle);
        Ok(())
    }

    fn confirm_send(&self) -> Result<(), NotifyError> {
        self.client
            .post(self.confirm_url.clone())
            .send()?
            .error_for_status()?;
        Ok(())
    }
}
