//! Transport Module Tests
//!
//! ## Test Scopes
//! - **Dispatcher**: listener registration, removal and failure isolation.
//! - **Codec**: frame encoding over an in-memory pipe.
//! - **Channels**: unicast, broadcast, local delivery and per-channel ordering over
//!   loopback TCP.
//! - **Connection table**: handshake interception, disconnect and connect failures.

#[cfg(test)]
mod tests {
    use crate::cluster::types::NodeId;
    use crate::error::Error;
    use crate::testing::{connected_transports, transports, wait_until};
    use crate::transport::codec::{read_frame, write_frame};
    use crate::transport::event::CHANNEL_CONNECTED_EVENT;
    use crate::transport::{EventDispatcher, Message, NetEvent, RetryPolicy, Transport};

    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_listener(transport: &Transport, event_type: &str) -> Arc<AtomicUsize> {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        transport.add_listener(event_type, move |_event| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        counter
    }

    // ============================================================
    // TEST 1: EventDispatcher
    // ============================================================

    fn event(event_type: &str) -> NetEvent {
        Message::new(event_type).addressed(NodeId(0), NodeId(1))
    }

    #[tokio::test]
    async fn test_dispatch_invokes_every_listener_once() {
        // ARRANGE
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = calls.clone();
            dispatcher.add_listener("push__w", move |_event| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }

        // ACT
        let invoked = dispatcher.dispatch(event("push__w")).await;

        // ASSERT
        assert_eq!(invoked, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(dispatcher.dispatch(event("push__other")).await, 0);
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_stop_others() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        dispatcher.add_listener("pull__w", |_event| async {
            Err(anyhow::anyhow!("Intentional error"))
        });
        dispatcher.add_listener("pull__w", move |_event| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        dispatcher.dispatch(event("pull__w")).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remove_listener() {
        let dispatcher = EventDispatcher::new();
        let first = dispatcher.add_listener("x", |_event| async { Ok(()) });
        let second = dispatcher.add_listener("x", |_event| async { Ok(()) });

        assert_eq!(dispatcher.listener_count("x"), 2);
        assert!(dispatcher.remove_listener("x", first));
        assert!(!dispatcher.remove_listener("x", first));
        assert!(dispatcher.remove_listener("x", second));
        assert!(!dispatcher.has_listeners("x"));
        assert!(dispatcher.event_types().is_empty());
    }

    // ============================================================
    // TEST 2: Codec
    // ============================================================

    #[tokio::test]
    async fn test_frames_survive_a_pipe() {
        // ARRANGE
        let (mut client, mut server) = tokio::io::duplex(1024);
        let sent = Message::with_payload("push__v", &vec![1.5f64, 2.5])
            .unwrap()
            .addressed(NodeId(3), NodeId(1));

        // ACT
        write_frame(&mut client, &sent).await.unwrap();
        drop(client);
        let received = read_frame(&mut server).await.unwrap().unwrap();

        // ASSERT
        assert_eq!(received.event_type, "push__v");
        assert_eq!(received.src_node, NodeId(3));
        assert_eq!(received.decode::<Vec<f64>>().unwrap(), vec![1.5, 2.5]);
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        use tokio::io::AsyncWriteExt;

        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&u32::MAX.to_le_bytes()).await.unwrap();

        let result = read_frame(&mut server).await;

        assert!(matches!(result, Err(Error::FrameTooLarge(_))));
    }

    // ============================================================
    // TEST 3: Channels
    // ============================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unicast_is_stamped_with_identities() {
        // ARRANGE
        let nodes = connected_transports(2).await;
        let received = Arc::new(Mutex::new(None));
        let received_clone = received.clone();
        nodes[1].add_listener("push__greeting", move |event| {
            let received = received_clone.clone();
            async move {
                *received.lock() = Some(event);
                Ok(())
            }
        });

        // ACT
        let message = Message::with_payload("push__greeting", &"hello".to_string()).unwrap();
        nodes[0].send(NodeId(1), &message).unwrap();
        wait_until(|| received.lock().is_some()).await;

        // ASSERT
        let event = received.lock().take().unwrap();
        assert_eq!(event.src_node, NodeId(0));
        assert_eq!(event.dst_node, NodeId(1));
        assert_eq!(event.decode::<String>().unwrap(), "hello");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_channel_preserves_send_order() {
        // ARRANGE
        let nodes = connected_transports(2).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        nodes[1].add_listener("push__seq", move |event| {
            let seen = seen_clone.clone();
            async move {
                seen.lock().push(event.decode::<u32>()?);
                Ok(())
            }
        });

        // ACT
        for i in 0..500u32 {
            let message = Message::with_payload("push__seq", &i).unwrap();
            nodes[0].send(NodeId(1), &message).unwrap();
        }
        wait_until(|| seen.lock().len() == 500).await;

        // ASSERT
        let seen = seen.lock();
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_broadcast_skips_self() {
        let nodes = connected_transports(3).await;
        let counters: Vec<_> = nodes
            .iter()
            .map(|node| counting_listener(node, "push__all"))
            .collect();

        nodes[0].broadcast(&Message::new("push__all")).unwrap();
        wait_until(|| {
            counters[1].load(Ordering::SeqCst) == 1 && counters[2].load(Ordering::SeqCst) == 1
        })
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(counters[0].load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_send_to_self_is_dispatched_locally() {
        let nodes = transports(1).await;
        let counter = counting_listener(&nodes[0], "push__me");

        nodes[0].send(NodeId(0), &Message::new("push__me")).unwrap();
        wait_until(|| counter.load(Ordering::SeqCst) == 1).await;

        assert!(nodes[0].connected_peers().is_empty());
    }

    // ============================================================
    // TEST 4: Connection table
    // ============================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_handshake_is_not_delivered_to_handlers() {
        // ARRANGE
        let nodes = transports(2).await;
        let counter = counting_listener(&nodes[1], CHANNEL_CONNECTED_EVENT);

        // ACT
        nodes[0].connect_to(NodeId(1)).await.unwrap();
        nodes[1]
            .await_connected(&[NodeId(0)], Some(Duration::from_secs(5)))
            .await
            .unwrap();

        // ASSERT
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(nodes[0].connected_peers(), vec![NodeId(1)]);
        assert_eq!(nodes[1].connected_peers(), vec![NodeId(0)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_simultaneous_connects_keep_one_channel() {
        let nodes = transports(2).await;

        let (a, b) = tokio::join!(nodes[0].connect_to(NodeId(1)), nodes[1].connect_to(NodeId(0)));
        a.unwrap();
        b.unwrap();

        assert!(nodes[0].is_connected(NodeId(1)));
        assert!(nodes[1].is_connected(NodeId(0)));
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let nodes = transports(2).await;

        let result = nodes[0].send(NodeId(1), &Message::new("push__x"));

        assert!(matches!(result, Err(Error::NotConnected(NodeId(1)))));
        assert!(matches!(
            nodes[0].send(NodeId(7), &Message::new("push__x")),
            Err(Error::UnknownNode(NodeId(7)))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_disconnect_absent_peer_fails_loudly() {
        let nodes = connected_transports(2).await;

        nodes[0].disconnect(NodeId(1)).unwrap();
        let second = nodes[0].disconnect(NodeId(1));

        assert!(matches!(second, Err(Error::NotConnected(NodeId(1)))));
        assert!(nodes[0].send(NodeId(1), &Message::new("push__x")).is_err());
    }

    #[tokio::test]
    async fn test_connect_to_self_is_rejected() {
        let nodes = transports(1).await;

        assert!(matches!(
            nodes[0].connect_to(NodeId(0)).await,
            Err(Error::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_peer_surfaces_connect_error() {
        // ARRANGE: a second node whose listener is closed right away
        let (machines, mut listeners) = crate::testing::bind_listeners(2).await;
        drop(listeners.pop());
        let registry = Arc::new(
            crate::cluster::registry::ClusterRegistry::with_local_index(machines, 0).unwrap(),
        );
        let retry = RetryPolicy {
            attempts: 2,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            connect_timeout: Duration::from_millis(500),
        };
        let transport =
            Transport::with_listener(registry, listeners.pop().unwrap(), retry).unwrap();

        // ACT
        let result = transport.connect_to(NodeId(1)).await;

        // ASSERT
        assert!(matches!(result, Err(Error::Connect { .. })));
        assert!(!transport.is_connected(NodeId(1)));
    }
}
