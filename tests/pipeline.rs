//! End-to-end tests for the combined feed pipeline: configuration lookup,
//! concurrent fetching against mock sources, and the merged document.
//!
//! Each test gets its own scratch feeds directory and mock server.

use catnapper::feed::parse_feed;
use catnapper::storage::UrlsUpdate;
use catnapper::{Catnapper, Settings};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SELF_LINK: &str = "http://catnapper.test/feed/a";

fn source(name: &str, items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(title, link)| {
            format!(
                "<item><title>{title}</title><link>{link}</link><guid>{link}</guid>\
                 <description>original text</description><pubDate>Tue, 01 Oct 2024 10:00:00 GMT</pubDate></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>{name}</title><link>http://{name}/</link>{items}</channel></rss>"#
    )
}

fn write_config(dir: &Path, file: &str, identifier: &str, urls: &[String]) {
    let body = serde_json::json!({
        "identifier": identifier,
        "title": "T",
        "description": "Combined",
        "urls": urls,
    });
    std::fs::write(dir.join(file), serde_json::to_vec_pretty(&body).unwrap()).unwrap();
}

fn settings(dir: &Path) -> Settings {
    Settings {
        feeds_dir: dir.to_path_buf(),
        max_concurrent_fetches: 4,
        ..Settings::default()
    }
}

async fn mount(server: &MockServer, at: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

// ============================================================================
// Combining
// ============================================================================

#[tokio::test]
async fn test_two_sources_combine_into_one_channel() {
    let server = MockServer::start().await;
    mount(&server, "/one", source("one", &[("A1", "http://one/1"), ("A2", "http://one/2")])).await;
    mount(&server, "/two", source("two", &[("B1", "http://two/1"), ("B2", "http://two/2")])).await;

    let dir = tempfile::tempdir().unwrap();
    write_config(
        dir.path(),
        "a.json",
        "a",
        &[format!("{}/one", server.uri()), format!("{}/two", server.uri())],
    );

    let app = Catnapper::start(settings(dir.path())).unwrap();
    let config = app.lookup_configuration("a").unwrap();
    let bytes = app.combined_feed(&config, SELF_LINK).await.unwrap();
    let text = String::from_utf8(bytes.clone()).unwrap();

    assert!(text.contains(r#"<atom:link href="http://catnapper.test/feed/a" rel="self" type="application/rss+xml"/>"#));
    assert_eq!(text.matches("<channel>").count(), 1);

    let feed = parse_feed(&bytes).unwrap();
    assert_eq!(feed.title, "T");
    assert_eq!(feed.link, SELF_LINK);
    assert_eq!(feed.description, "Combined");
    assert_eq!(feed.items.len(), 4);

    // Completion order across sources varies; order within a source does not.
    let titles: Vec<&str> = feed.items.iter().map(|i| i.title.as_str()).collect();
    let pos = |t: &str| titles.iter().position(|x| *x == t).unwrap();
    assert!(pos("A1") < pos("A2"));
    assert!(pos("B1") < pos("B2"));

    for item in &feed.items {
        assert_eq!(
            item.description,
            format!(r#"<a href="{}">{}</a>"#, item.link, item.title)
        );
        assert_eq!(item.guid, item.link);
        assert_eq!(item.pub_date, "Tue, 01 Oct 2024 10:00:00 GMT");
    }
}

#[tokio::test]
async fn test_failed_sources_are_left_out() {
    let server = MockServer::start().await;
    mount(&server, "/good", source("good", &[("G1", "http://good/1")])).await;
    mount(&server, "/atom", r#"<feed xmlns="http://www.w3.org/2005/Atom"/>"#.to_string()).await;
    Mock::given(path("/gone"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    write_config(
        dir.path(),
        "a.json",
        "a",
        &[
            format!("{}/gone", server.uri()),
            format!("{}/atom", server.uri()),
            "ftp://example.com/feed".to_string(),
            format!("{}/good", server.uri()),
        ],
    );

    let app = Catnapper::start(settings(dir.path())).unwrap();
    let config = app.lookup_configuration("a").unwrap();
    let feed = parse_feed(&app.combined_feed(&config, SELF_LINK).await.unwrap()).unwrap();

    assert_eq!(feed.items.len(), 1);
    assert_eq!(feed.items[0].title, "G1");
}

#[tokio::test]
async fn test_self_reference_is_never_fetched() {
    let server = MockServer::start().await;
    mount(&server, "/real", source("real", &[("R1", "http://real/1")])).await;
    Mock::given(path("/feed/a"))
        .respond_with(ResponseTemplate::new(200).set_body_string(source("loop", &[("L", "http://l/")])))
        .expect(0)
        .mount(&server)
        .await;

    let self_link = format!("{}/feed/a", server.uri());
    let dir = tempfile::tempdir().unwrap();
    write_config(
        dir.path(),
        "a.json",
        "a",
        &[format!("{}/real", server.uri()), format!("{self_link}?page=2")],
    );

    let app = Catnapper::start(settings(dir.path())).unwrap();
    let config = app.lookup_configuration("a").unwrap();
    let feed = parse_feed(&app.combined_feed(&config, &self_link).await.unwrap()).unwrap();

    assert_eq!(feed.items.len(), 1);
    assert_eq!(feed.items[0].title, "R1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stalled_source_bounds_latency() {
    let server = MockServer::start().await;
    mount(&server, "/fast", source("fast", &[("F1", "http://fast/1")])).await;
    Mock::given(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(source("slow", &[("S1", "http://slow/1")]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    write_config(
        dir.path(),
        "a.json",
        "a",
        &[format!("{}/slow", server.uri()), format!("{}/fast", server.uri())],
    );

    let app = Catnapper::start(Settings {
        connect_timeout_ms: 300,
        read_timeout_ms: 300,
        poll_slack_ms: 100,
        ..settings(dir.path())
    })
    .unwrap();
    let config = app.lookup_configuration("a").unwrap();

    let started = std::time::Instant::now();
    let feed = parse_feed(&app.combined_feed(&config, SELF_LINK).await.unwrap()).unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(feed.items.len(), 1);
    assert_eq!(feed.items[0].title, "F1");
}

#[tokio::test]
async fn test_concurrent_requests_share_the_pool() {
    let server = MockServer::start().await;
    mount(&server, "/s", source("s", &[("X", "http://s/1"), ("Y", "http://s/2")])).await;

    let dir = tempfile::tempdir().unwrap();
    let urls: Vec<String> = (0..3).map(|_| format!("{}/s", server.uri())).collect();
    write_config(dir.path(), "a.json", "a", &urls);
    write_config(dir.path(), "b.json", "b", &urls);

    let app = Catnapper::start(Settings {
        max_concurrent_fetches: 2,
        ..settings(dir.path())
    })
    .unwrap();
    let a = app.lookup_configuration("a").unwrap();
    let b = app.lookup_configuration("b").unwrap();

    let (fa, fb) = tokio::join!(
        app.combined_feed(&a, "http://me/a"),
        app.combined_feed(&b, "http://me/b")
    );
    assert_eq!(parse_feed(&fa.unwrap()).unwrap().items.len(), 6);
    assert_eq!(parse_feed(&fb.unwrap()).unwrap().items.len(), 6);
    assert_eq!(app.pool().available(), 2);
}

// ============================================================================
// Settings write path
// ============================================================================

#[tokio::test]
async fn test_saved_urls_are_served_after_rescan() {
    let server = MockServer::start().await;
    mount(&server, "/new", source("new", &[("N1", "http://new/1")])).await;

    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "a.json", "a", &[]);
    let app = Catnapper::start(settings(dir.path())).unwrap();

    let update = app
        .persist_new_urls("a", &format!(r#"["{}/new"]"#, server.uri()))
        .unwrap();
    assert!(matches!(update, UrlsUpdate::Saved(_)));

    // Not visible until the snapshot is rebuilt.
    assert!(app.lookup_configuration("a").unwrap().urls.is_empty());
    assert_eq!(app.store().rescan_now(), 1);

    let config = app.lookup_configuration("a").unwrap();
    assert_eq!(config.urls_json(), update.text());
    let feed = parse_feed(&app.combined_feed(&config, SELF_LINK).await.unwrap()).unwrap();
    assert_eq!(feed.items[0].title, "N1");
}

#[tokio::test]
async fn test_rejected_urls_leave_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "a.json", "a", &["http://kept.example/rss".to_string()]);
    let before = std::fs::read(dir.path().join("a.json")).unwrap();
    let app = Catnapper::start(settings(dir.path())).unwrap();

    for input in [r#"["not a url"]"#, r#"{"urls": []}"#, "[1, 2]"] {
        let update = app.persist_new_urls("a", input).unwrap();
        assert_eq!(update.text(), input);
        assert!(!update.is_saved());
    }

    assert_eq!(std::fs::read(dir.path().join("a.json")).unwrap(), before);
}
