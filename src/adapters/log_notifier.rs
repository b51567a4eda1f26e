//! Notifier that writes messages to the tracing log.

use crate::domain::error::IntratraderError;
use crate::ports::notifier_port::NotifierPort;

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl NotifierPort for LogNotifier {
    fn notify(&self, message: &str) -> Result<(), IntratraderError> {
        tracing::info!(target: "intratrader::notify", "{message}");
        Ok(())
    }
}
