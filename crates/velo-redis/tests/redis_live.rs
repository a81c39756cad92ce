//! Live-backend integration tests.
//!
//! These require a Redis server reachable through `REDIS_HOST`/`REDIS_PORT`
//! (default 127.0.0.1:6379). Run with `cargo test -p velo-redis -- --ignored`.

use velo_io::IoContext;
use velo_redis::{RedisClient, RedisPool, RedisValue};

fn redis_host() -> String {
    std::env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn redis_port() -> u16 {
    std::env::var("REDIS_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(6379)
}

#[test]
#[ignore = "requires a running Redis server"]
fn ping_and_get_set() {
    let io = IoContext::new().expect("reactor");
    io.block_on(async {
        let client =
            RedisClient::connect(&redis_host(), redis_port(), None).await.expect("connect");
        assert!(client.connected());

        let pong = client.exec(&["PING"]).await.expect("ping");
        assert!(pong.is_string());
        assert_eq!(pong.as_str(), Some("PONG"));

        client.exec(&["SET", "velo_test_key", "v"]).await.expect("set");
        let got = client.exec(&["GET", "velo_test_key"]).await.expect("get");
        assert_eq!(got, RedisValue::Bulk("v".into()));

        let missing = client.exec(&["GET", "velo_test_key_missing"]).await.expect("get missing");
        assert_eq!(missing, RedisValue::Null);

        client.exec(&["DEL", "velo_test_key"]).await.expect("del");
    });
}

#[test]
#[ignore = "requires a running Redis server"]
fn wrongtype_is_an_in_band_error() {
    let io = IoContext::new().expect("reactor");
    io.block_on(async {
        let client =
            RedisClient::connect(&redis_host(), redis_port(), None).await.expect("connect");

        client.exec(&["DEL", "velo_test_list"]).await.expect("del");
        client.exec(&["RPUSH", "velo_test_list", "x"]).await.expect("rpush");

        let reply = client.exec(&["INCR", "velo_test_list"]).await.expect("incr completes");
        assert!(reply.is_error(), "WRONGTYPE must arrive in-band, got {reply:?}");
        assert!(client.connected(), "in-band errors must not kill the connection");

        client.exec(&["DEL", "velo_test_list"]).await.expect("del");
    });
}

#[test]
#[ignore = "requires a running Redis server"]
fn pipelined_commands_preserve_order() {
    let io = IoContext::new().expect("reactor");
    io.block_on(async {
        let client =
            RedisClient::connect(&redis_host(), redis_port(), None).await.expect("connect");

        client.exec(&["DEL", "velo_test_ctr"]).await.expect("del");

        // Issue ten INCRs concurrently on one pipelined connection; replies
        // must map back in submission order.
        let futures: Vec<_> = (0..10).map(|_| client.exec(&["INCR", "velo_test_ctr"])).collect();
        let replies = futures::future::join_all(futures).await;

        let values: Vec<i64> = replies
            .into_iter()
            .map(|r| r.expect("incr").as_int().expect("integer reply"))
            .collect();
        assert_eq!(values, (1..=10).collect::<Vec<_>>());

        client.exec(&["DEL", "velo_test_ctr"]).await.expect("del");
    });
}

#[test]
#[ignore = "requires a running Redis server"]
fn pool_round_robin() {
    let io = IoContext::new().expect("reactor");
    io.block_on(async {
        let pool =
            RedisPool::create(&redis_host(), redis_port(), None, 3).await.expect("pool");
        assert_eq!(pool.size(), 3);
        assert!(!pool.empty());
        assert_eq!(pool.healthy_count(), 3);

        // Round-robin: four calls wrap back to the first client.
        let c0 = pool.next();
        let c1 = pool.next();
        let c2 = pool.next();
        let c3 = pool.next();
        assert!(!c0.same_connection(&c1));
        assert!(!c1.same_connection(&c2));
        assert!(c3.same_connection(&c0), "fourth lease should wrap around");

        let pong = c0.exec(&["PING"]).await.expect("ping");
        assert_eq!(pong.as_str(), Some("PONG"));

        // SET through one client, GET through another.
        pool.next().exec(&["SET", "velo_pool_key", "pool_value"]).await.expect("set");
        let got = pool.next().exec(&["GET", "velo_pool_key"]).await.expect("get");
        assert_eq!(got.as_str(), Some("pool_value"));

        pool.next().exec(&["DEL", "velo_pool_key"]).await.expect("del");

        // close() ends background replacement; handles already out keep
        // working on their live connections.
        pool.close();
        assert!(pool.is_closed());
        let pong = pool.next().exec(&["PING"]).await.expect("ping after close");
        assert_eq!(pong.as_str(), Some("PONG"));
    });
}
