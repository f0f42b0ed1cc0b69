//! End-to-end tests through the governed gateway.

use std::time::Duration;

use request_governor::config::{CacheRouteConfig, LimitRule};
use reqwest::StatusCode;
use serde_json::Value;

mod common;

use common::{client, config_for, start_gateway, start_mock_upstream, start_programmable_upstream, CLOCK_START_MS};

fn cache_route(prefix: &str, namespace: &str, invalidates: &[&str]) -> CacheRouteConfig {
    CacheRouteConfig {
        path_prefix: prefix.into(),
        namespace: namespace.into(),
        ttl_secs: Some(60),
        vary_by_identity: false,
        invalidates: invalidates.iter().map(|s| s.to_string()).collect(),
    }
}

fn header<'a>(res: &'a reqwest::Response, name: &str) -> &'a str {
    res.headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing header {name}"))
        .to_str()
        .unwrap()
}

#[tokio::test]
async fn test_quota_headers_and_rejection() {
    let upstream = start_mock_upstream("hello").await;
    let mut config = config_for(&upstream);
    config
        .rate_limit
        .roles
        .insert("anonymous".into(), LimitRule::new(60_000, 3));
    let gateway = start_gateway(config).await;
    let client = client();

    for expected_remaining in ["2", "1", "0"] {
        let res = client.get(gateway.url("/users")).send().await.expect("Gateway unreachable");
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(header(&res, "x-ratelimit-limit"), "3");
        assert_eq!(header(&res, "x-ratelimit-remaining"), expected_remaining);
        assert_eq!(header(&res, "x-cache"), "BYPASS");
        let reset: u64 = header(&res, "x-ratelimit-reset").parse().unwrap();
        assert_eq!(reset, (CLOCK_START_MS + 60_000) / 1000);
        assert_eq!(res.text().await.unwrap(), "hello");
    }

    let rejected = client.get(gateway.url("/users")).send().await.unwrap();
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&rejected, "retry-after"), "60");
    assert_eq!(header(&rejected, "x-ratelimit-remaining"), "0");
    let body: Value = rejected.json().await.unwrap();
    assert_eq!(body["error"]["code"], "RATE_LIMITED");
    assert_eq!(body["error"]["retry_after_secs"], 60);

    assert_eq!(upstream.hits(), 3);

    // A new window admits the caller again.
    gateway.clock.advance_ms(60_001);
    let res = client.get(gateway.url("/users")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(header(&res, "x-ratelimit-remaining"), "2");

    gateway.stop().await;
}

#[tokio::test]
async fn test_users_have_separate_quotas_and_login_override() {
    let upstream = start_mock_upstream("ok").await;
    let gateway = start_gateway(config_for(&upstream)).await;
    let client = client();

    for _ in 0..5 {
        let res = client
            .post(gateway.url("/auth/login"))
            .header("x-user-id", "alice")
            .header("x-user-role", "premium")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(header(&res, "x-ratelimit-limit"), "5");
    }
    let sixth = client
        .post(gateway.url("/auth/login"))
        .header("x-user-id", "alice")
        .header("x-user-role", "premium")
        .send()
        .await
        .unwrap();
    assert_eq!(sixth.status(), StatusCode::TOO_MANY_REQUESTS);

    // The premium quota is untouched, and bob has his own login budget.
    let profile = client
        .get(gateway.url("/profile"))
        .header("x-user-id", "alice")
        .header("x-user-role", "premium")
        .send()
        .await
        .unwrap();
    assert_eq!(profile.status(), StatusCode::OK);
    assert_eq!(header(&profile, "x-ratelimit-limit"), "5000");
    assert_eq!(header(&profile, "x-ratelimit-remaining"), "4999");

    let bob = client
        .post(gateway.url("/auth/login"))
        .header("x-user-id", "bob")
        .send()
        .await
        .unwrap();
    assert_eq!(bob.status(), StatusCode::OK);

    gateway.stop().await;
}

#[tokio::test]
async fn test_cache_hit_miss_and_write_invalidation() {
    let upstream = start_programmable_upstream(|method, path| async move {
        (200, format!("{method} {path}"))
    })
    .await;
    let mut config = config_for(&upstream);
    config.cache.routes.push(cache_route("/properties", "properties:list", &["search"]));
    config.cache.routes.push(cache_route("/search", "search", &[]));
    let gateway = start_gateway(config).await;
    let client = client();

    let first = client.get(gateway.url("/properties?b=2&a=1")).send().await.unwrap();
    assert_eq!(header(&first, "x-cache"), "MISS");
    assert_eq!(first.text().await.unwrap(), "GET /properties?b=2&a=1");

    // Same query in a different order shares the entry.
    let second = client.get(gateway.url("/properties?a=1&b=2")).send().await.unwrap();
    assert_eq!(header(&second, "x-cache"), "HIT");
    assert_eq!(second.text().await.unwrap(), "GET /properties?b=2&a=1");

    let search = client.get(gateway.url("/search?q=loft")).send().await.unwrap();
    assert_eq!(header(&search, "x-cache"), "MISS");
    assert_eq!(upstream.hits(), 2);
    assert_eq!(gateway.store.cache().len(), 2);

    let write = client.post(gateway.url("/properties")).send().await.unwrap();
    assert_eq!(write.status(), StatusCode::OK);
    assert_eq!(header(&write, "x-cache"), "BYPASS");
    assert!(gateway.store.cache().is_empty());

    let after = client.get(gateway.url("/properties?a=1&b=2")).send().await.unwrap();
    assert_eq!(header(&after, "x-cache"), "MISS");
    assert_eq!(upstream.hits(), 4);

    // Entries expire with their TTL.
    gateway.clock.advance_secs(61);
    let expired = client.get(gateway.url("/properties?a=1&b=2")).send().await.unwrap();
    assert_eq!(header(&expired, "x-cache"), "MISS");

    gateway.stop().await;
}

#[tokio::test]
async fn test_upstream_errors_are_not_cached() {
    let upstream = start_programmable_upstream(|_, _| async { (500, "boom".to_string()) }).await;
    let mut config = config_for(&upstream);
    config.cache.routes.push(cache_route("/properties", "properties:list", &[]));
    let gateway = start_gateway(config).await;
    let client = client();

    for _ in 0..2 {
        let res = client.get(gateway.url("/properties")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(header(&res, "x-cache"), "MISS");
    }
    assert_eq!(upstream.hits(), 2);
    assert!(gateway.store.cache().is_empty());

    let record = &gateway.store.performance().snapshot()["GET /properties"];
    assert_eq!(record.request_count, 2);
    assert_eq!(record.error_count, 2);

    gateway.stop().await;
}

#[tokio::test]
async fn test_abusive_origin_is_blocked_until_cleared() {
    let upstream = start_mock_upstream("ok").await;
    let mut config = config_for(&upstream);
    config.abuse.threshold = 5;
    let gateway = start_gateway(config).await;
    let client = client();

    // Different users, same origin: no single quota is near its limit.
    for i in 0..5 {
        let res = client
            .get(gateway.url("/feed"))
            .header("x-user-id", format!("user-{i}"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let blocked = client
        .get(gateway.url("/feed"))
        .header("x-user-id", "user-new")
        .send()
        .await
        .unwrap();
    assert_eq!(blocked.status(), StatusCode::FORBIDDEN);
    let body: Value = blocked.json().await.unwrap();
    assert_eq!(body["error"]["code"], "ORIGIN_BLOCKED");
    assert_eq!(upstream.hits(), 5);

    let listed: Value = client
        .get(gateway.admin_url("/admin/blocklist"))
        .bearer_auth(common::ADMIN_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed[0]["origin"], "127.0.0.1");
    assert_eq!(listed[0]["blocked_at_ms"], CLOCK_START_MS);

    let cleared = client
        .delete(gateway.admin_url("/admin/blocklist/127.0.0.1"))
        .bearer_auth(common::ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(cleared.status(), StatusCode::NO_CONTENT);

    let again = client.get(gateway.url("/feed")).send().await.unwrap();
    assert_eq!(again.status(), StatusCode::OK);

    gateway.stop().await;
}

#[tokio::test]
async fn test_upstream_failures_map_to_gateway_errors() {
    // Grab a free port and release it so nothing is listening there.
    let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let closed_addr = closed.local_addr().unwrap();
    drop(closed);

    let slow = start_programmable_upstream(|_, _| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        (200, "late".to_string())
    })
    .await;

    let mut down_config = config_for(&slow);
    down_config.upstream.address = closed_addr.to_string();
    down_config.admin.enabled = false;
    let down = start_gateway(down_config).await;

    let mut slow_config = config_for(&slow);
    slow_config.timeouts.upstream_secs = 1;
    slow_config.admin.enabled = false;
    let slow_gateway = start_gateway(slow_config).await;

    let client = client();
    let res = client.get(down.url("/anything")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert!(res.headers().contains_key("x-ratelimit-limit"));

    let res = client.get(slow_gateway.url("/anything")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);

    let record = &down.store.performance().snapshot()["GET /anything"];
    assert_eq!(record.error_count, 1);

    down.stop().await;
    slow_gateway.stop().await;
}

#[tokio::test]
async fn test_request_id_reaches_upstream_and_client() {
    let upstream = start_mock_upstream("ok").await;
    let gateway = start_gateway(config_for(&upstream)).await;
    let client = client();

    let generated = client.get(gateway.url("/ping")).send().await.unwrap();
    let id = header(&generated, "x-request-id").to_string();
    assert!(uuid::Uuid::parse_str(&id).is_ok());

    let supplied = client
        .get(gateway.url("/ping"))
        .header("x-request-id", "trace-123")
        .send()
        .await
        .unwrap();
    assert_eq!(header(&supplied, "x-request-id"), "trace-123");

    let seen = upstream.seen();
    assert_eq!(seen[0].header("x-request-id").as_deref(), Some(id.as_str()));
    assert_eq!(seen[1].header("x-request-id").as_deref(), Some("trace-123"));
    assert_eq!(seen[1].method, "GET");
    assert_eq!(seen[1].path, "/ping");

    gateway.stop().await;
}
