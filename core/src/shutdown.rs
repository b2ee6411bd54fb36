// Cooperative cancellation shared by the long-running tasks

use tokio::sync::watch;

/// Receiving half handed to every task; `true` means stop
pub type ShutdownSignal = watch::Receiver<bool>;

/// Create a cancellation channel in the running state
pub fn shutdown_channel() -> (watch::Sender<bool>, ShutdownSignal) {
    watch::channel(false)
}

/// Resolve once shutdown is requested. A dropped sender counts as shutdown.
pub async fn wait_for_shutdown(signal: &mut ShutdownSignal) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            return;
        }
    }
}

pub fn is_shutdown(signal: &ShutdownSignal) -> bool {
    *signal.borrow()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_after_signal() {
        let (tx, mut rx) = shutdown_channel();
        let waiter = tokio::spawn(async move { wait_for_shutdown(&mut rx).await });
        tx.send(true).expect("Send");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("Timely")
            .expect("Join");
    }

    #[tokio::test]
    async fn test_dropped_sender_counts_as_shutdown() {
        let (tx, mut rx) = shutdown_channel();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(&mut rx))
            .await
            .expect("Timely");
    }

    #[tokio::test]
    async fn test_pending_while_running() {
        let (_tx, mut rx) = shutdown_channel();
        let result =
            tokio::time::timeout(Duration::from_millis(20), wait_for_shutdown(&mut rx)).await;
        assert!(result.is_err());
        assert!(!is_shutdown(&rx));
    }
}
