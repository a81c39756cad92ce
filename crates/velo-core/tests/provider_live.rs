//! Full-stack relay test against live backends.
//!
//! Requires PostgreSQL (`PG_*`) and Redis (`REDIS_*`) reachable with the
//! defaults of [`velo_core::RelayConfig`]. Run with
//! `cargo test -p velo-core -- --ignored`.

use velo_core::cache::Tag;
use velo_core::{DbProvider, RelayConfig};
use velo_io::IoContext;
use velo_pg::PgValue;

static ITEM_LOOKUP: &str = "SELECT id, label FROM velo_live_items WHERE id = ANY($1)";

#[test]
#[ignore = "requires running PostgreSQL and Redis servers"]
fn relay_end_to_end() {
    let io = IoContext::new().expect("reactor");
    io.block_on(async {
        let config = RelayConfig::from_env().expect("config");
        let provider = DbProvider::create(config).await.expect("provider");

        // Fixture table.
        provider
            .exec_sql("DROP TABLE IF EXISTS velo_live_items", &[])
            .await
            .expect("drop");
        provider
            .exec_sql(
                "CREATE TABLE velo_live_items (id bigint PRIMARY KEY, label text NOT NULL)",
                &[],
            )
            .await
            .expect("create");
        provider
            .exec_sql(
                "INSERT INTO velo_live_items VALUES (1, 'one'), (2, 'two'), (3, 'three')",
                &[],
            )
            .await
            .expect("insert");

        let items = Tag::from("items");
        let tags = [items.clone()];

        // Concurrent lookups coalesce and fill the cache.
        let (a, b, missing) = tokio::join!(
            provider.fetch_one(ITEM_LOOKUP, PgValue::Int8(1), &tags),
            provider.fetch_one(ITEM_LOOKUP, PgValue::Int8(2), &tags),
            provider.fetch_one(ITEM_LOOKUP, PgValue::Int8(99), &tags),
        );
        let a = a.expect("lookup 1").expect("row 1");
        assert!(b.expect("lookup 2").is_some());
        assert_eq!(missing.expect("lookup 99"), None, "absent keys are not-found");

        // A repeat is a cache hit with an identical artifact.
        let again = provider
            .fetch_one(ITEM_LOOKUP, PgValue::Int8(1), &tags)
            .await
            .expect("cached lookup")
            .expect("row 1 cached");
        assert_eq!(a, again);
        assert!(provider.cache().stats().hits >= 1);

        // Tag invalidation empties the tagged entries; the next fetch
        // repopulates from the backend.
        assert!(provider.invalidate_tag(&items) >= 2);
        let refetched = provider
            .fetch_one(ITEM_LOOKUP, PgValue::Int8(1), &tags)
            .await
            .expect("refetch")
            .expect("row 1 again");
        assert_eq!(a, refetched);

        // Redis path feeds the estimator.
        let pong = provider.exec_redis(&["PING"]).await.expect("ping");
        assert_eq!(pong.as_str(), Some("PONG"));
        assert!(!provider.estimator().borrow().is_redis_stale());

        provider.exec_sql("DROP TABLE velo_live_items", &[]).await.expect("cleanup");

        // Orderly shutdown: no further leases after close.
        provider.close();
        let err = provider.exec_sql("SELECT 1", &[]).await.expect_err("closed pools");
        assert_eq!(err.error_code(), "pool_closed");
    });
}
