/// Local operator alert sink.
///
/// Delivery is fire and forget; implementations must not block.
pub trait SystemAlert: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// Sink that writes alerts to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlert;

impl SystemAlert for LogAlert {
    fn notify(&self, title: &str, message: &str) {
        tracing::warn!(target: "autoping::alert", %title, "{}", message);
    }
}
