//! Outbound relay: local bus → bridge stream.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vzconn_core::messages::{V2CBridgeMessage, V2CMessage};
use vzconn_core::topics::{is_control, topic_of};
use vzconn_core::{cbor_decode, VzError, VzResult};

use crate::bus::{BusMessage, Subscription};

/// Turn one bus message into a stream envelope for `session_id`.
pub fn translate(prefix: &str, session_id: i64, msg: &BusMessage) -> VzResult<V2CBridgeMessage> {
    let topic = topic_of(prefix, &msg.subject).ok_or_else(|| {
        VzError::InvalidMessage(format!("subject {:?} has no topic under {prefix:?}", msg.subject))
    })?;
    if is_control(topic) {
        return Err(VzError::InvalidMessage(format!(
            "topic {topic:?} is reserved for the bridge"
        )));
    }
    let inner: V2CMessage = cbor_decode(&msg.data)?;
    Ok(V2CBridgeMessage {
        topic: topic.to_string(),
        session_id,
        msg: inner.msg,
    })
}

/// Forward every message on `subscription` to the send queue until cancelled.
///
/// Malformed messages are dropped. The subscription ending on its own means
/// the bus went away, which is fatal.
pub(crate) async fn run_outbound(
    mut subscription: Subscription,
    prefix: String,
    session_id: i64,
    tx: mpsc::Sender<V2CBridgeMessage>,
    cancel: CancellationToken,
) -> VzResult<()> {
    let result = loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => break Ok(()),
            msg = subscription.next() => msg,
        };
        let Some(msg) = msg else {
            break Err(VzError::Bus(format!(
                "subscription {} closed by the bus",
                subscription.pattern()
            )));
        };

        let envelope = match translate(&prefix, session_id, &msg) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(subject = %msg.subject, error = %e, "dropping outbound message");
                continue;
            }
        };
        debug!(topic = %envelope.topic, "relaying outbound message");

        tokio::select! {
            () = cancel.cancelled() => break Ok(()),
            sent = tx.send(envelope) => {
                if sent.is_err() {
                    debug!("send queue closed, outbound relay ending");
                    break Ok(());
                }
            }
        }
    };

    subscription.unsubscribe();
    debug!("outbound relay ended");
    result
}
