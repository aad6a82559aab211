use std::{sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::ConnectivityConfig,
    transport::{FallbackChannel, PushChannel},
};

/// Keep the `online` flag in line with the reachability of the call authority.
///
/// The authority counts as reachable while the push socket is open or the fallback
/// health probe succeeds. Probes run on a fixed period while reachable and back off
/// exponentially while not; a push connection change triggers an immediate re-check.
pub async fn run(
    push: Arc<dyn PushChannel>,
    fallback: Arc<dyn FallbackChannel>,
    online: watch::Sender<bool>,
    settings: ConnectivityConfig,
    cancel: CancellationToken,
) {
    let mut connection = push.connection();
    let mut delay = settings.initial_backoff;

    loop {
        let push_connected = push.is_connected();
        let reachable = push_connected || probe_fallback(&fallback, settings.probe_timeout).await;

        let previous = online.send_replace(reachable);
        if previous != reachable {
            if reachable {
                info!(push_connected, "call authority reachable; leaving offline mode");
            } else {
                warn!("call authority unreachable; entering offline mode");
            }
        }

        let wait = if reachable {
            delay = settings.initial_backoff;
            settings.healthy_poll
        } else {
            let current = delay;
            delay = (delay * 2).min(settings.max_backoff);
            current
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            Ok(()) = connection.changed() => {
                debug!(connected = *connection.borrow_and_update(), "push connection changed");
            }
            _ = sleep(wait) => {}
        }
    }

    debug!("connectivity supervisor stopped");
}

async fn probe_fallback(fallback: &Arc<dyn FallbackChannel>, limit: Duration) -> bool {
    match timeout(limit, fallback.health_check()).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            debug!(error = %err, "fallback health probe failed");
            false
        }
        Err(_) => {
            debug!(timeout_ms = limit.as_millis() as u64, "fallback health probe timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::{FakeFallbackChannel, FakePushChannel};

    const WAIT: Duration = Duration::from_secs(60);

    fn spawn_supervisor(
        push: Arc<FakePushChannel>,
        fallback: Arc<FakeFallbackChannel>,
    ) -> (watch::Receiver<bool>, CancellationToken) {
        let (online_tx, online_rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        tokio::spawn(run(
            push,
            fallback,
            online_tx,
            ConnectivityConfig::default(),
            cancel.clone(),
        ));
        (online_rx, cancel)
    }

    async fn wait_for(online: &mut watch::Receiver<bool>, expected: bool) {
        timeout(WAIT, online.wait_for(|value| *value == expected))
            .await
            .expect("connectivity did not settle in time")
            .expect("supervisor dropped the flag");
    }

    #[tokio::test(start_paused = true)]
    async fn connected_push_channel_means_online() {
        let (mut online, cancel) =
            spawn_supervisor(FakePushChannel::new(true), FakeFallbackChannel::new(false));

        wait_for(&mut online, true).await;
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_fallback_alone_keeps_the_authority_reachable() {
        let (mut online, cancel) =
            spawn_supervisor(FakePushChannel::new(false), FakeFallbackChannel::new(true));

        wait_for(&mut online, true).await;
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_is_noticed_by_the_backoff_probes() {
        let fallback = FakeFallbackChannel::new(false);
        let (mut online, cancel) = spawn_supervisor(FakePushChannel::new(false), fallback.clone());

        sleep(Duration::from_secs(5)).await;
        assert!(!*online.borrow());

        fallback.set_healthy(true);
        wait_for(&mut online, true).await;
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn losing_the_push_socket_goes_offline_at_once() {
        let push = FakePushChannel::new(true);
        let (mut online, cancel) = spawn_supervisor(push.clone(), FakeFallbackChannel::new(false));
        wait_for(&mut online, true).await;

        let before = tokio::time::Instant::now();
        push.set_connected(false);
        wait_for(&mut online, false).await;
        assert!(before.elapsed() < Duration::from_secs(1));
        cancel.cancel();
    }
}
