use crate::backup::app_config::AppConfig;
use crate::backup::result_error::result::Result;
use std::fmt::Debug;

pub mod webhook;

/// Delivers a one-line outcome message to a human-facing channel.
///
/// Delivery is fire-and-forget from the pipeline's point of view: a failed
/// notification is logged by the caller and never changes the outcome.
pub trait Notifier: Debug + Send + Sync {
    fn notify(&self, message: &str) -> Result<()>;
}

/// Builds the notifier configured in `notifications`, if any.
pub fn from_config(config: &AppConfig) -> Option<Box<dyn Notifier>> {
    config
        .slack_webhook()
        .map(|url| Box::new(webhook::SlackWebhook::new(url)) as Box<dyn Notifier>)
}
