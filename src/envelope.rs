//! Translation between the generic envelopes and the wire envelopes.

use std::time::SystemTime;

use crate::domain::{
    //
    Acknowledger,
    ChannelPtr,
    Delivery,
    Dispatch,
    MessageProperties,
    OutboundMessage,
    RawDelivery,
};

/// Build the wire envelope for `dispatch`, stamping `now` when the dispatch
/// carries no timestamp of its own.
pub(crate) fn to_outbound(dispatch: &Dispatch, now: SystemTime) -> OutboundMessage {
    // ---
    OutboundMessage {
        properties: MessageProperties {
            message_type: dispatch.message_type.clone(),
            content_type: dispatch.content_type.clone(),
            content_encoding: dispatch.content_encoding.clone(),
            message_id: dispatch.message_id.clone(),
            correlation_id: dispatch.correlation_id.clone(),
            app_id: dispatch.source_id.clone(),
            timestamp: Some(dispatch.timestamp.unwrap_or(now)),
            persistent: dispatch.durable,
            expiration: dispatch.expiration,
            headers: dispatch.headers.clone(),
        },
        body: dispatch.payload.clone(),
    }
}

/// Wrap a raw broker delivery, binding its acknowledgement to `channel`.
pub(crate) fn from_raw(raw: RawDelivery, channel: ChannelPtr) -> Delivery {
    // ---
    let RawDelivery {
        delivery_tag,
        exchange,
        routing_key,
        redelivered,
        properties,
        body,
    } = raw;

    Delivery {
        delivery_tag,
        exchange,
        routing_key,
        redelivered,
        message_type: properties.message_type,
        content_type: properties.content_type,
        content_encoding: properties.content_encoding,
        message_id: properties.message_id,
        correlation_id: properties.correlation_id,
        source_id: properties.app_id,
        durable: properties.persistent,
        expiration: properties.expiration,
        timestamp: properties.timestamp,
        headers: properties.headers,
        payload: body,
        acknowledger: Acknowledger::new(channel, delivery_tag),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::testing::FakeChannel;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn outbound_stamps_missing_timestamp() {
        // ---
        let now = UNIX_EPOCH + Duration::from_secs(1_000);
        let dispatch = Dispatch::new("orders", Bytes::from_static(b"abc"))
            .durable(true)
            .expiration(Duration::from_millis(1500))
            .header("k", "v");

        let message = to_outbound(&dispatch, now);

        assert_eq!(message.body, Bytes::from_static(b"abc"));
        assert_eq!(message.properties.timestamp, Some(now));
        assert!(message.properties.persistent);
        assert_eq!(message.properties.expiration, Some(Duration::from_millis(1500)));
        assert_eq!(message.properties.headers.get("k").map(String::as_str), Some("v"));
    }

    #[test]
    fn outbound_keeps_caller_timestamp() {
        // ---
        let created = UNIX_EPOCH + Duration::from_secs(10);
        let dispatch = Dispatch::new("orders", Bytes::new()).timestamp(created);

        let message = to_outbound(&dispatch, UNIX_EPOCH + Duration::from_secs(99));

        assert_eq!(message.properties.timestamp, Some(created));
    }

    #[tokio::test]
    async fn delivery_acknowledges_on_its_channel() {
        // ---
        let channel = Arc::new(FakeChannel::new(3));
        let raw = RawDelivery {
            delivery_tag: 17,
            exchange: "orders".into(),
            routing_key: "eu".into(),
            redelivered: true,
            properties: MessageProperties {
                app_id: Some("billing".into()),
                ..MessageProperties::default()
            },
            body: Bytes::from_static(b"x"),
        };

        let delivery = from_raw(raw, channel.clone());
        assert_eq!(delivery.source_id.as_deref(), Some("billing"));
        assert!(delivery.redelivered);
        assert_eq!(delivery.acknowledger.channel().id(), 3);

        delivery.acknowledge().await.expect("ack failed");
        delivery.acknowledge_through().await.expect("multi-ack failed");

        assert_eq!(channel.calls().acks, vec![(17, false), (17, true)]);
    }
}
