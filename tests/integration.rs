//! End-to-end tests driving the client, server and proxy endpoints against real (or in-process
//! duplex) sockets: `tokio::io::duplex` for in-process stream pairs, `tokio::spawn` for the
//! accepting side, and a paused clock for the idle-timeout assertion.

use packets::catalog::{self, Direction, Mode};
use quarry::client;
use quarry::config::{Config, Proxy};
use quarry::connection::Connection;
use quarry::error::Error;
use quarry::session;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

struct AlwaysJoined(uuid::Uuid, &'static str);

#[async_trait::async_trait]
impl session::HasJoined for AlwaysJoined {
    async fn has_joined(&self, _username: &str, _digest: &str, _client_ip: Option<&str>) -> Result<session::Profile, session::Error> {
        Ok(session::Profile {
            id: self.0,
            name: self.1.to_string(),
            properties: vec![],
        })
    }
}

struct NeverFailsJoin;

#[async_trait::async_trait]
impl session::Join for NeverFailsJoin {
    async fn join(&self, _access_token: &str, _selected_profile: uuid::Uuid, _digest: &str) -> Result<(), session::Error> {
        Ok(())
    }
}

fn offline_config(address: &str) -> Config {
    Config {
        address: address.to_string(),
        online_mode: false,
        ..Config::default()
    }
}

#[tokio::test]
async fn status_round_trip_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let config = offline_config(&addr.to_string());

    let server = tokio::spawn(quarry::server::serve(config, listener));

    let (status, pong) = client::query_status(addr, catalog::default_version(), 0xDEAD_BEEF)
        .await
        .expect("status query should succeed");

    assert!(status.body.contains("A Quarry Server"));
    assert_eq!(pong, 0xDEAD_BEEF);

    server.abort();
}

#[tokio::test]
async fn offline_login_round_trip_reaches_play() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let config = offline_config(&addr.to_string());

    let server = tokio::spawn(quarry::server::serve(config, listener));

    let profile = client::offline_profile("Notch");
    let connection = client::login(addr, catalog::default_version(), &profile)
        .await
        .expect("offline login should succeed");

    assert_eq!(connection.mode, Mode::Play);

    server.abort();
}

#[tokio::test]
async fn server_is_full_kicks_the_next_login() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let mut config = offline_config(&addr.to_string());
    config.max_players = 1;

    let server = tokio::spawn(quarry::server::serve(config, listener));

    let first = client::login(addr, catalog::default_version(), &client::offline_profile("Alice"))
        .await
        .expect("first login should succeed");
    assert_eq!(first.mode, Mode::Play);

    let second = client::login(addr, catalog::default_version(), &client::offline_profile("Bob")).await;
    match second {
        Err(Error::Application(reason)) => assert!(reason.contains("full")),
        other => panic!("expected a disconnect for a full server, got {other:?}"),
    }

    server.abort();
}

#[tokio::test(start_paused = true)]
async fn idle_connection_times_out() {
    let (client_side, server_side) = tokio::io::duplex(1024);
    let addr = "127.0.0.1:0".parse().unwrap();
    let mut connection = Connection::new(
        server_side,
        addr,
        packets::catalog::Direction::Upstream,
        packets::catalog::Direction::Downstream,
    );
    connection.set_idle_timeout_ticks(20); // 1 simulated second at 50ms/tick

    // Keep the client side alive so the duplex doesn't report EOF before the timer fires.
    let _keep_alive = client_side;

    let result = connection.read_frame().await;
    assert!(matches!(result, Err(Error::TimedOut)), "expected a timeout, got {result:?}");
}

#[tokio::test]
async fn online_login_round_trip_enables_encryption_and_reaches_play() {
    let notch = uuid::Uuid::parse_str("b50ad385-829d-3141-a216-7e7d7539ba7f").unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let config = Config {
        address: addr.to_string(),
        online_mode: true,
        ..Config::default()
    };

    let server = tokio::spawn(quarry::server::serve_with_session_service(
        config,
        listener,
        Arc::new(AlwaysJoined(notch, "Notch")),
    ));

    let profile = client::Profile::Online {
        display_name: "Notch".to_string(),
        access_token: "test-access-token".to_string(),
        uuid: notch,
    };

    let connection = tokio::time::timeout(
        Duration::from_secs(5),
        client::login_with_session_service(addr, catalog::default_version(), &profile, &NeverFailsJoin),
    )
    .await
    .expect("online login should not hang")
    .expect("online login should succeed");

    assert_eq!(connection.mode, Mode::Play);

    server.abort();
}

#[tokio::test]
async fn proxy_handler_drops_chat_message_and_replies_to_the_client() {
    let upstream_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind upstream");
    let upstream_addr = upstream_listener.local_addr().expect("upstream addr");
    let upstream_config = offline_config(&upstream_addr.to_string());
    let upstream = tokio::spawn(quarry::server::serve(upstream_config, upstream_listener));

    let proxy_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind proxy");
    let proxy_addr = proxy_listener.local_addr().expect("proxy addr");
    let mut proxy_config = offline_config(&proxy_addr.to_string());
    proxy_config.proxy = Some(Proxy {
        upstream_address: Some(upstream_addr.to_string()),
        fast_forward: false,
    });

    let proxy = tokio::spawn(quarry::proxy::serve_with_bridge_factory(
        proxy_config,
        proxy_listener,
        |fast_forward| {
            let mut bridge = quarry::proxy::Bridge::new(fast_forward);
            bridge.on(Mode::Play, Direction::Upstream, "chat_message", |_body| {
                let version = catalog::default_version();
                let id = catalog::id_of(version, Mode::Play, Direction::Downstream, "disconnect")
                    .expect("disconnect is in the catalog");
                let mut reply = packets::CursorBuffer::new();
                reply.write_varint(id);
                reply.write_string("Quiet mode enabled");
                quarry::proxy::Forward::Drop {
                    reply: Some(reply.into_inner()),
                }
            });
            bridge
        },
    ));

    let profile = client::offline_profile("Herobrine");
    let mut connection = tokio::time::timeout(
        Duration::from_secs(5),
        client::login(proxy_addr, catalog::default_version(), &profile),
    )
    .await
    .expect("login through proxy should not hang")
    .expect("login through proxy should succeed");
    assert_eq!(connection.mode, Mode::Play);

    let id = catalog::id_of(connection.protocol_version, Mode::Play, Direction::Upstream, "chat_message")
        .expect("chat_message is in the catalog");
    let mut body = packets::CursorBuffer::new();
    body.write_varint(id);
    body.write_string("/quiet");
    connection.send_raw(&body.into_inner()).await.expect("send chat message");

    let (name, mut reply) = tokio::time::timeout(Duration::from_secs(5), connection.read_frame())
        .await
        .expect("reply should not hang")
        .expect("bridge should reply instead of forwarding");
    assert_eq!(name, "disconnect");
    assert_eq!(reply.read_string().unwrap(), "Quiet mode enabled");

    proxy.abort();
    upstream.abort();
}

#[tokio::test]
async fn proxy_bridges_offline_login_to_play() {
    let upstream_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind upstream");
    let upstream_addr = upstream_listener.local_addr().expect("upstream addr");
    let upstream_config = offline_config(&upstream_addr.to_string());
    let upstream = tokio::spawn(quarry::server::serve(upstream_config, upstream_listener));

    let proxy_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind proxy");
    let proxy_addr = proxy_listener.local_addr().expect("proxy addr");
    let mut proxy_config = offline_config(&proxy_addr.to_string());
    proxy_config.proxy = Some(Proxy {
        upstream_address: Some(upstream_addr.to_string()),
        fast_forward: false,
    });
    let proxy = tokio::spawn(quarry::proxy::serve(proxy_config, proxy_listener));

    let profile = client::offline_profile("Herobrine");
    let connection = tokio::time::timeout(
        Duration::from_secs(5),
        client::login(proxy_addr, catalog::default_version(), &profile),
    )
    .await
    .expect("login through proxy should not hang")
    .expect("login through proxy should succeed");

    assert_eq!(connection.mode, Mode::Play);

    proxy.abort();
    upstream.abort();
}
