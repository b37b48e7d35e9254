use crate::backup::function_path;
use crate::backup::notifications::Notifier;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use function_name::named;
use reqwest::blocking::Client;
use serde::Serialize;
use std::time::Duration;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct SlackMessage<'a> {
    text: &'a str,
}

/// Posts `{"text": …}` to a Slack incoming webhook.
#[derive(Clone)]
pub struct SlackWebhook {
    url: String,
}

impl SlackWebhook {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self { url: url.into() }
    }
}

// The webhook URL embeds its secret.
impl std::fmt::Debug for SlackWebhook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackWebhook").finish_non_exhaustive()
    }
}

impl Notifier for SlackWebhook {
    #[named]
    fn notify(&self, message: &str) -> Result<()> {
        tracing::debug!("Sending slack notification");
        let response = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .and_then(|client| {
                client
                    .post(&self.url)
                    .json(&SlackMessage { text: message })
                    .send()
            })
            .map_err(Error::from)
            .add_msg("Failed to send slack notification")
            .add_fn_name(function_path!())?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::webhook_status(status.as_u16())).add_fn_name(function_path!())
        }
    }
}
