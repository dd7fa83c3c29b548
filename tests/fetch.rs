use std::time::Duration;

use index_rss_watcher::{FailureKind, FeedFetcher, FeedSource, FetchResult, FetchSettings};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Index News</title>
    <item>
      <title>XYZ Corp will replace ABC Inc in the S&amp;P 500</title>
      <link>https://example.com/news/1</link>
      <guid>news-1</guid>
    </item>
  </channel>
</rss>"#;

fn fetcher(urls: Vec<String>) -> FeedFetcher {
    FeedFetcher::new(FetchSettings::new(urls)).expect("client builds")
}

fn entry_ids(result: &FetchResult) -> Vec<String> {
    match result {
        FetchResult::Entries { entries, .. } => entries.iter().map(|e| e.id.clone()).collect(),
        other => panic!("expected entries, got {other:?}"),
    }
}

#[tokio::test]
async fn conditional_request_yields_not_modified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .insert_header("Last-Modified", "Wed, 25 Dec 2024 10:00:00 GMT")
                .set_body_string(FEED),
        )
        .mount(&server)
        .await;

    let url = format!("{}/feed", server.uri());
    let mut fetcher = fetcher(vec![url.clone()]);

    let first = fetcher.fetch().await;
    assert_eq!(entry_ids(&first), vec!["news-1"]);
    match &first {
        FetchResult::Entries {
            etag, last_modified, ..
        } => {
            assert_eq!(etag.as_deref(), Some("\"v1\""));
            assert_eq!(
                last_modified.as_deref(),
                Some("Wed, 25 Dec 2024 10:00:00 GMT")
            );
        }
        _ => unreachable!(),
    }
    assert_eq!(fetcher.state().validator_url.as_deref(), Some(url.as_str()));

    assert_eq!(fetcher.fetch().await, FetchResult::NotModified);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(!requests[0].headers.contains_key("if-none-match"));
    assert_eq!(
        requests[1].headers.get("if-modified-since").unwrap(),
        "Wed, 25 Dec 2024 10:00:00 GMT"
    );
    assert!(requests[1]
        .headers
        .get("user-agent")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("index-rss-watcher/"));
}

#[tokio::test]
async fn unchanged_body_without_validators_is_not_modified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
        .mount(&server)
        .await;

    let mut fetcher = fetcher(vec![format!("{}/feed", server.uri())]);

    assert_eq!(entry_ids(&fetcher.fetch().await), vec!["news-1"]);
    assert_eq!(fetcher.fetch().await, FetchResult::NotModified);
}

#[tokio::test]
async fn blocked_primary_falls_back_to_mirror() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/primary"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/mirror"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
        .mount(&server)
        .await;

    let mirror = format!("{}/mirror", server.uri());
    let mut fetcher = fetcher(vec![format!("{}/primary", server.uri()), mirror.clone()]);

    assert_eq!(entry_ids(&fetcher.fetch().await), vec!["news-1"]);
    assert_eq!(fetcher.state().validator_url.as_deref(), Some(mirror.as_str()));
}

#[tokio::test]
async fn validators_are_not_sent_to_a_different_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/primary"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"p1\"")
                .set_body_string(FEED),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/primary"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/mirror"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"m1\"")
                .set_body_string(FEED),
        )
        .mount(&server)
        .await;

    let mirror = format!("{}/mirror", server.uri());
    let mut fetcher = fetcher(vec![format!("{}/primary", server.uri()), mirror.clone()]);

    assert_eq!(entry_ids(&fetcher.fetch().await), vec!["news-1"]);
    assert_eq!(fetcher.state().etag.as_deref(), Some("\"p1\""));

    // Primary is now blocked; the mirror must be asked unconditionally and
    // its own body is new to us even though the document is identical.
    assert_eq!(entry_ids(&fetcher.fetch().await), vec!["news-1"]);
    assert_eq!(fetcher.state().etag.as_deref(), Some("\"m1\""));
    assert_eq!(fetcher.state().validator_url.as_deref(), Some(mirror.as_str()));

    let requests = server.received_requests().await.unwrap();
    let mirror_requests: Vec<_> = requests
        .iter()
        .filter(|r| r.url.path() == "/mirror")
        .collect();
    assert_eq!(mirror_requests.len(), 1);
    assert!(!mirror_requests[0].headers.contains_key("if-none-match"));

    let primary_retry = requests
        .iter()
        .filter(|r| r.url.path() == "/primary")
        .nth(1)
        .expect("primary retried");
    assert_eq!(primary_retry.headers.get("if-none-match").unwrap(), "\"p1\"");
}

#[tokio::test]
async fn not_found_everywhere_is_an_empty_feed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mut fetcher = fetcher(vec![
        format!("{}/a", server.uri()),
        format!("{}/b", server.uri()),
    ]);

    assert_eq!(entry_ids(&fetcher.fetch().await), Vec::<String>::new());
}

#[tokio::test]
async fn server_error_is_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let url = format!("{}/feed", server.uri());
    let mut fetcher = fetcher(vec![url.clone()]);

    match fetcher.fetch().await {
        FetchResult::TransportError(failure) => {
            assert_eq!(failure.kind, FailureKind::HttpStatus(503));
            assert_eq!(failure.url, url);
        }
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_body_is_a_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>Access denied</html>"))
        .mount(&server)
        .await;

    let mut fetcher = fetcher(vec![format!("{}/feed", server.uri())]);

    match fetcher.fetch().await {
        FetchResult::TransportError(failure) => assert_eq!(failure.kind, FailureKind::Parse),
        other => panic!("expected parse error, got {other:?}"),
    }
    assert_eq!(fetcher.state().validator_url, None, "state untouched");
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(500))
                .set_body_string(FEED),
        )
        .mount(&server)
        .await;

    let settings = FetchSettings {
        request_timeout: Duration::from_millis(50),
        ..FetchSettings::new(vec![format!("{}/feed", server.uri())])
    };
    let mut fetcher = FeedFetcher::new(settings).unwrap();

    match fetcher.fetch().await {
        FetchResult::TransportError(failure) => assert_eq!(failure.kind, FailureKind::Timeout),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn probe_reports_each_candidate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/good"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blocked"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let fetcher = fetcher(vec![
        format!("{}/blocked", server.uri()),
        format!("{}/good", server.uri()),
    ]);

    let reports = fetcher.probe().await;
    assert_eq!(reports.len(), 2);
    assert_eq!(
        reports[0].outcome.as_ref().unwrap_err().kind,
        FailureKind::HttpStatus(403)
    );
    assert_eq!(reports[1].outcome, Ok(1));
    assert_eq!(fetcher.state().validator_url, None);
}

#[tokio::test]
async fn probe_and_fetch_classify_statuses_the_same_way() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not a feed"))
        .mount(&server)
        .await;

    let gone = format!("{}/gone", server.uri());
    let broken = format!("{}/broken", server.uri());

    let reports = fetcher(vec![gone.clone(), broken.clone()]).probe().await;
    assert_eq!(
        reports[0].outcome.as_ref().unwrap_err().kind,
        FailureKind::HttpStatus(404)
    );
    assert_eq!(reports[1].outcome.as_ref().unwrap_err().kind, FailureKind::Parse);

    // The poll path skips the 404 and reports the parse failure it hit next.
    match fetcher(vec![gone, broken.clone()]).fetch().await {
        FetchResult::TransportError(failure) => {
            assert_eq!(failure.kind, FailureKind::Parse);
            assert_eq!(failure.url, broken);
        }
        other => panic!("expected parse error, got {other:?}"),
    }
}
