//! 指标接线测试

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use picoroute::common::Session;
use picoroute::config::metrics::{MetricsReport, METRICS_INBOUND_TAG, METRICS_RULE_TAG};
use picoroute::config::routing::RuleConfig;
use picoroute::config::types::{PolicyConfig, METRICS_OUTBOUND_TAG};
use picoroute::config::{load_config, save_config, Config};
use picoroute::router::geo::GeoData;
use picoroute::router::Router;

fn user_config() -> Config {
    let mut config = Config::default();
    config.routing.rules.push(RuleConfig {
        port: "1-65535".into(),
        ..RuleConfig::to_outbound("catch-all", "direct")
    });
    config
}

#[test]
fn metrics_traffic_is_not_shadowed_by_catch_all() {
    let mut config = user_config();
    let port = config.enable_metrics().unwrap();

    let router = Router::new(&config, GeoData::empty()).unwrap();
    let d = router
        .route(&Session::tcp_domain("127.0.0.1", port).with_inbound(METRICS_INBOUND_TAG))
        .unwrap();
    assert_eq!(d.rule, METRICS_RULE_TAG);
    assert_eq!(d.outbound, METRICS_OUTBOUND_TAG);

    let d = router
        .route(&Session::tcp_domain("example.com", 443).with_inbound("entry"))
        .unwrap();
    assert_eq!(d.rule, "catch-all");
}

#[test]
fn enable_disable_survives_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    let original = user_config();

    let mut config = original.clone();
    config.enable_metrics_on(10085).unwrap();
    save_config(&config, &path).unwrap();

    let mut loaded = load_config(&path).unwrap();
    assert!(loaded.metrics_enabled());
    assert_eq!(loaded.metrics_port(), Some(10085));
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"statsOutboundDownlink\": true"));

    loaded.disable_metrics();
    save_config(&loaded, &path).unwrap();
    let reloaded = load_config(&path).unwrap();
    assert!(!reloaded.metrics_enabled());
    assert_eq!(reloaded.policy, Some(PolicyConfig::default()));
    assert_eq!(Config { policy: None, ..reloaded }, original);
}

#[tokio::test]
async fn query_reads_engine_report() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let n = stream.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("GET /debug/vars"));
        let body = r#"{"stats":{"outbound":{"proxy":{"uplink":100,"downlink":2048}}}}"#;
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await.unwrap();
    });

    let report = MetricsReport::query(&reqwest::Client::new(), port).await.unwrap();
    assert_eq!(report.stats.outbound["proxy"].downlink, 2048);
    assert_eq!(report.outbound_total().uplink, 100);
}
