//! End-to-end tests driving a proxy between a real client and a real
//! upstream server over loopback sockets.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tapwire::{
    AccessRule,
    ConnectionHandle,
    Handler,
    HandlerError,
    HandlerSpec,
    Handlers,
    Packet,
    PacketCodec,
    ProxyConfig,
    ProxyServer,
    SessionRegistry,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, oneshot},
    time::{sleep, timeout},
};
use tokio_util::codec::Framed;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn test_codec() -> PacketCodec { PacketCodec::new(1 << 20, 1 << 16) }

/// Upstream server: echoes every packet back and mirrors it to a channel.
/// The channel closes when the proxied connection reaches EOF.
async fn start_upstream() -> (SocketAddr, mpsc::UnboundedReceiver<Packet>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept proxied conn");
        let mut framed = Framed::new(stream, test_codec());
        while let Some(Ok(packet)) = framed.next().await {
            let _ = tx.send(packet.clone());
            if framed.send(packet).await.is_err() {
                break;
            }
        }
    });
    (addr, rx)
}

struct RunningProxy {
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    // Dropping this resolves the shutdown future and stops the proxy.
    _stop: oneshot::Sender<()>,
}

async fn start_proxy(
    upstream: SocketAddr,
    access: AccessRule,
    client_handlers: Option<Handlers>,
) -> RunningProxy {
    let config = ProxyConfig::new("127.0.0.1:0".parse().expect("addr"), upstream).access(access);
    let mut server = ProxyServer::new(config);
    if let Some(handlers) = client_handlers {
        server = server.client_handlers(handlers);
    }
    let server = server.bind().await.expect("bind proxy");
    let addr = server.local_addr().expect("proxy addr");
    let registry = server.registry();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(server.run_with_shutdown(async {
        let _ = stop_rx.await;
    }));
    RunningProxy {
        addr,
        registry,
        _stop: stop_tx,
    }
}

async fn connect_client(addr: SocketAddr) -> Framed<TcpStream, PacketCodec> {
    let stream = TcpStream::connect(addr).await.expect("connect proxy");
    Framed::new(stream, test_codec())
}

struct Append(&'static [u8]);

#[async_trait]
impl Handler for Append {
    async fn handle(
        &self,
        packet: &mut Packet,
        _inbound: &ConnectionHandle,
        _outbound: &ConnectionHandle,
    ) -> Result<(), HandlerError> {
        packet.payload.extend_from_slice(self.0);
        Ok(())
    }
}

struct FailAlways;

#[async_trait]
impl Handler for FailAlways {
    async fn handle(
        &self,
        _packet: &mut Packet,
        _inbound: &ConnectionHandle,
        _outbound: &ConnectionHandle,
    ) -> Result<(), HandlerError> {
        Err("rejected by test handler".into())
    }
}

struct DelayOpcode {
    opcode: u32,
    delay: Duration,
}

#[async_trait]
impl Handler for DelayOpcode {
    async fn handle(
        &self,
        packet: &mut Packet,
        _inbound: &ConnectionHandle,
        _outbound: &ConnectionHandle,
    ) -> Result<(), HandlerError> {
        if packet.opcode == self.opcode {
            sleep(self.delay).await;
        }
        Ok(())
    }
}

struct InjectBeforeForward;

#[async_trait]
impl Handler for InjectBeforeForward {
    async fn handle(
        &self,
        _packet: &mut Packet,
        _inbound: &ConnectionHandle,
        outbound: &ConnectionHandle,
    ) -> Result<(), HandlerError> {
        outbound
            .send_packet(&Packet::new(99, &b"oob"[..]))
            .await
            .map_err(Into::into)
    }
}

#[tokio::test]
async fn forwards_mutated_payload_with_recomputed_length() {
    let (upstream, mut seen) = start_upstream().await;
    let proxy = start_proxy(
        upstream,
        AccessRule::Any,
        Some(HandlerSpec::new(Append(b"-seen")).into()),
    )
    .await;

    let mut client = connect_client(proxy.addr).await;
    client
        .send(Packet::new(5, &b"abc"[..]))
        .await
        .expect("send frame");

    let received = timeout(TEST_TIMEOUT, seen.recv())
        .await
        .expect("upstream timed out")
        .expect("upstream saw a packet");
    assert_eq!(received.opcode, 5);
    assert_eq!(&received.payload[..], b"abc-seen");
    // Length field on the wire was recomputed from the mutated payload.
    assert_eq!(received.parsed_len(), 8);

    // The echoed frame crosses the untouched server-origin chain verbatim.
    let echoed = timeout(TEST_TIMEOUT, client.next())
        .await
        .expect("client read timed out")
        .expect("client stream open")
        .expect("echoed frame decodes");
    assert_eq!(echoed.opcode, 5);
    assert_eq!(&echoed.payload[..], b"abc-seen");
}

#[tokio::test]
async fn handler_failure_drops_only_that_packet() {
    let (upstream, mut seen) = start_upstream().await;
    let proxy = start_proxy(
        upstream,
        AccessRule::Any,
        Some(HandlerSpec::new(FailAlways).only([9]).into()),
    )
    .await;

    let mut client = connect_client(proxy.addr).await;
    client.send(Packet::new(9, &b"drop me"[..])).await.expect("send");
    client.send(Packet::new(5, &b"keep me"[..])).await.expect("send");

    let received = timeout(TEST_TIMEOUT, seen.recv())
        .await
        .expect("upstream timed out")
        .expect("upstream saw a packet");
    // Opcode 9 never reached the peer; the chain continued with opcode 5.
    assert_eq!(received.opcode, 5);
    assert_eq!(&received.payload[..], b"keep me");
}

#[tokio::test]
async fn packets_resolve_in_arrival_order_despite_latency_variance() {
    let (upstream, mut seen) = start_upstream().await;
    let proxy = start_proxy(
        upstream,
        AccessRule::Any,
        Some(
            HandlerSpec::new(DelayOpcode {
                opcode: 1,
                delay: Duration::from_millis(80),
            })
            .into(),
        ),
    )
    .await;

    let mut client = connect_client(proxy.addr).await;
    for opcode in 1..=3 {
        client
            .send(Packet::new(opcode, &b"x"[..]))
            .await
            .expect("send");
    }

    let mut order = Vec::new();
    for _ in 0..3 {
        let packet = timeout(TEST_TIMEOUT, seen.recv())
            .await
            .expect("upstream timed out")
            .expect("upstream saw a packet");
        order.push(packet.opcode);
    }
    assert_eq!(order, vec![1, 2, 3]);
}

#[tokio::test]
async fn out_of_band_send_reaches_the_peer_before_the_forwarded_frame() {
    let (upstream, mut seen) = start_upstream().await;
    let proxy = start_proxy(
        upstream,
        AccessRule::Any,
        Some(HandlerSpec::new(InjectBeforeForward).into()),
    )
    .await;

    let mut client = connect_client(proxy.addr).await;
    client.send(Packet::new(5, &b"abc"[..])).await.expect("send");

    let injected = timeout(TEST_TIMEOUT, seen.recv())
        .await
        .expect("upstream timed out")
        .expect("packet");
    assert_eq!((injected.opcode, &injected.payload[..]), (99, &b"oob"[..]));

    let forwarded = timeout(TEST_TIMEOUT, seen.recv())
        .await
        .expect("upstream timed out")
        .expect("packet");
    assert_eq!((forwarded.opcode, &forwarded.payload[..]), (5, &b"abc"[..]));
}

#[tokio::test]
async fn closing_the_client_leg_closes_the_server_leg() {
    let (upstream, mut seen) = start_upstream().await;
    let proxy = start_proxy(upstream, AccessRule::Any, None).await;

    let mut client = connect_client(proxy.addr).await;
    client.send(Packet::new(1, &b"hi"[..])).await.expect("send");
    let _ = timeout(TEST_TIMEOUT, seen.recv())
        .await
        .expect("upstream timed out")
        .expect("session wired");

    drop(client);

    // The upstream leg reaches EOF, so the echo task drops the channel.
    let closed = timeout(TEST_TIMEOUT, seen.recv())
        .await
        .expect("upstream close timed out");
    assert!(closed.is_none(), "server leg should close after client leg");

    // Teardown runs once and unregisters the session.
    timeout(TEST_TIMEOUT, async {
        while !proxy.registry.is_empty() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session was not unregistered");
}

#[tokio::test]
async fn repeated_registry_shutdown_tears_down_only_once() {
    let (upstream, mut seen) = start_upstream().await;
    let proxy = start_proxy(upstream, AccessRule::Any, None).await;

    let mut client = connect_client(proxy.addr).await;
    client.send(Packet::new(1, &b"hi"[..])).await.expect("send");
    let _ = timeout(TEST_TIMEOUT, seen.recv())
        .await
        .expect("upstream timed out")
        .expect("session wired");

    let id = timeout(TEST_TIMEOUT, async {
        loop {
            if let Some(id) = proxy.registry.active_ids().first().copied() {
                return id;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session was not registered");

    // First call latches teardown; the immediate second call is a no-op.
    assert!(proxy.registry.shutdown(&id));
    proxy.registry.shutdown(&id);

    // Exactly one close reaches the upstream leg.
    let closed = timeout(TEST_TIMEOUT, seen.recv())
        .await
        .expect("upstream close timed out");
    assert!(closed.is_none(), "upstream leg should close after shutdown");

    // The client leg drains its pending echo and then closes too.
    timeout(TEST_TIMEOUT, async {
        while let Some(frame) = client.next().await {
            frame.expect("echoed frame decodes before close");
        }
    })
    .await
    .expect("client leg did not close");

    timeout(TEST_TIMEOUT, async {
        while !proxy.registry.is_empty() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session was not unregistered");

    // Once unregistered, further teardown requests find nothing to do.
    assert!(!proxy.registry.shutdown(&id));
}

#[tokio::test]
async fn rejected_client_is_closed_without_an_upstream_connect() {
    let upstream_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind upstream");
    let upstream = upstream_listener.local_addr().expect("upstream addr");
    let proxy = start_proxy(upstream, AccessRule::predicate(|_| false), None).await;

    let mut client = connect_client(proxy.addr).await;
    // Silent close: the proxy drops the socket without a handshake.
    let eof = timeout(TEST_TIMEOUT, client.next())
        .await
        .expect("client close timed out");
    assert!(eof.is_none(), "rejected client should see EOF");

    // No upstream connection was ever attempted.
    let attempted = timeout(Duration::from_millis(200), upstream_listener.accept()).await;
    assert!(attempted.is_err(), "upstream connect should not be attempted");
    assert!(proxy.registry.is_empty());
}

#[tokio::test]
async fn admitted_loopback_client_reaches_the_upstream() {
    let (upstream, mut seen) = start_upstream().await;
    let proxy = start_proxy(
        upstream,
        AccessRule::Addr("127.0.0.1".parse().expect("ip")),
        None,
    )
    .await;

    let mut client = connect_client(proxy.addr).await;
    client.send(Packet::new(2, &b"ok"[..])).await.expect("send");
    let packet = timeout(TEST_TIMEOUT, seen.recv())
        .await
        .expect("upstream timed out")
        .expect("admitted client relays");
    assert_eq!(packet.opcode, 2);
}
